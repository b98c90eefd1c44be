use std::sync::atomic::{AtomicU64, Ordering};

use crate::logging;

#[derive(Debug, Default)]
pub struct Metrics {
    file_reads: AtomicU64,
    file_writes: AtomicU64,
    scenario_saves: AtomicU64,
    version_conflicts: AtomicU64,
    searches: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub file_reads: u64,
    pub file_writes: u64,
    pub scenario_saves: u64,
    pub version_conflicts: u64,
    pub searches: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_file_read(&self) {
        self.file_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_file_write(&self) {
        self.file_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_scenario_save(&self) {
        self.scenario_saves.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_version_conflict(&self) {
        self.version_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_search(&self) {
        self.searches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            file_reads: self.file_reads.load(Ordering::Relaxed),
            file_writes: self.file_writes.load(Ordering::Relaxed),
            scenario_saves: self.scenario_saves.load(Ordering::Relaxed),
            version_conflicts: self.version_conflicts.load(Ordering::Relaxed),
            searches: self.searches.load(Ordering::Relaxed),
        }
    }

    pub fn log_summary(&self) {
        let s = self.snapshot();
        logging::debug(format!(
            "metrics file_reads={} file_writes={} scenario_saves={} version_conflicts={} searches={}",
            s.file_reads, s.file_writes, s.scenario_saves, s.version_conflicts, s.searches
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let metrics = Metrics::new();
        metrics.inc_file_read();
        metrics.inc_file_read();
        metrics.inc_file_write();
        metrics.inc_version_conflict();

        let s = metrics.snapshot();
        assert_eq!(s.file_reads, 2);
        assert_eq!(s.file_writes, 1);
        assert_eq!(s.scenario_saves, 0);
        assert_eq!(s.version_conflicts, 1);
        assert_eq!(s.searches, 0);
    }
}
