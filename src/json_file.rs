use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::logging;
use crate::metrics::Metrics;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("cannot create store folder {path}: {source}")]
    InitFolder {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot deserialize configuration file {path}: {source}")]
    Deserialize {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("cannot serialize content for {path}: {source}")]
    Serialize {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("cannot write configuration file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot lock configuration file {path}: {source}")]
    Lock {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("no identifier left to allocate in {path}")]
    IdsExhausted { path: PathBuf },
}

pub fn init_folder(path: &Path) -> Result<(), StoreError> {
    std::fs::create_dir_all(path).map_err(|source| StoreError::InitFolder {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads and decodes `path`, returning `None` when the file does not exist.
pub fn read_json<T: DeserializeOwned>(
    path: &Path,
    metrics: &Metrics,
) -> Result<Option<T>, StoreError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    metrics.inc_file_read();

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StoreError::Deserialize {
            path: path.to_path_buf(),
            source,
        })
}

/// Replaces `path` with the pretty-printed JSON of `value`.
///
/// Content goes to a sibling temp file first and is renamed over the
/// target, so readers never observe a half-written file.
pub fn write_json<T: Serialize>(
    path: &Path,
    value: &T,
    metrics: &Metrics,
) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;

    let tmp = sibling(path, "tmp");
    let write_err = |source: std::io::Error| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };
    std::fs::write(&tmp, &bytes).map_err(write_err)?;
    std::fs::rename(&tmp, path).map_err(write_err)?;
    metrics.inc_file_write();
    logging::debug(format!("wrote {} bytes to {}", bytes.len(), path.display()));
    Ok(())
}

fn sibling(path: &Path, extension: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(extension);
    path.with_file_name(name)
}

/// Exclusive advisory lock held on a `<file>.lock` sidecar until dropped.
///
/// Serializes read-modify-write cycles on the same JSON file across threads
/// and processes. On non-unix targets the guard only holds the file open.
#[derive(Debug)]
pub struct FileLock {
    file: File,
}

impl FileLock {
    pub fn acquire(target: &Path) -> Result<Self, StoreError> {
        let lock_path = sibling(target, "lock");
        // The sidecar lives next to the target, so failing to create it means
        // the target's folder is not writable either.
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|source| StoreError::Write {
                path: target.to_path_buf(),
                source,
            })?;
        lock_exclusive(&file).map_err(|source| StoreError::Lock {
            path: lock_path.clone(),
            source,
        })?;
        Ok(Self { file })
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    loop {
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if rc == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(not(unix))]
fn lock_exclusive(_file: &File) -> std::io::Result<()> {
    Ok(())
}

impl Drop for FileLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            unsafe {
                libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn fixture_dir(label: &str) -> PathBuf {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let unique = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time moved backwards")
        .as_nanos();
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let path = std::env::temp_dir().join(format!("chutney-store-{label}-{unique}-{seq}"));
    std::fs::create_dir_all(&path).expect("create fixture path");
    path
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn missing_file_reads_as_none() {
        let dir = fixture_dir("json-missing");
        let got: Option<BTreeMap<String, String>> =
            read_json(&dir.join("absent.json"), &Metrics::new()).expect("read");
        assert!(got.is_none());
    }

    #[test]
    fn write_then_read_leaves_no_temp_file() {
        let dir = fixture_dir("json-write");
        let path = dir.join("map.json");
        let metrics = Metrics::new();
        let map = BTreeMap::from([("1".to_string(), "JIRA-1".to_string())]);

        write_json(&path, &map, &metrics).expect("write");
        let got: Option<BTreeMap<String, String>> = read_json(&path, &metrics).expect("read");

        assert_eq!(got, Some(map));
        assert!(!dir.join("map.json.tmp").exists());
        assert_eq!(metrics.snapshot().file_writes, 1);
    }

    #[test]
    fn corrupted_file_reports_path() {
        let dir = fixture_dir("json-corrupt");
        let path = dir.join("broken.json");
        std::fs::write(&path, b"{not json").expect("seed");

        let err = read_json::<BTreeMap<String, String>>(&path, &Metrics::new())
            .expect_err("should fail");
        match err {
            StoreError::Deserialize { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn lock_is_reacquirable_after_drop() {
        let dir = fixture_dir("json-lock");
        let path = dir.join("map.json");
        {
            let _guard = FileLock::acquire(&path).expect("first lock");
        }
        let _guard = FileLock::acquire(&path).expect("second lock");
        assert!(dir.join("map.json.lock").exists());
    }

    #[test]
    fn lock_in_missing_folder_is_a_write_failure() {
        let dir = fixture_dir("json-lock-missing");
        let path = dir.join("gone").join("map.json");

        let err = FileLock::acquire(&path).expect_err("should fail");
        match err {
            StoreError::Write { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn blocked_temp_file_is_a_write_failure() {
        let dir = fixture_dir("json-write-blocked");
        let path = dir.join("map.json");
        std::fs::create_dir(dir.join("map.json.tmp")).expect("block temp path");

        let err = write_json(&path, &BTreeMap::<String, String>::new(), &Metrics::new())
            .expect_err("should fail");
        match err {
            StoreError::Write { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("unexpected error: {other}"),
        }
    }
}
