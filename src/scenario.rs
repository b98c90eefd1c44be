mod schema;

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};

use crate::logging;
use crate::metrics::Metrics;
use crate::search::ContentFilter;
use schema::{format_timestamp, join_tags, metadata_from_row, parse_id, METADATA_COLUMNS};

/// Scenario header, everything but the body.
///
/// `id` is `None` for a scenario that has never been stored; rows read back
/// from the repository always carry one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseMetadata {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub creation_date: DateTime<Utc>,
    pub update_date: DateTime<Utc>,
    #[serde(default)]
    pub author: String,
    #[serde(default = "initial_version")]
    pub version: i32,
    #[serde(default)]
    pub default_dataset: Option<String>,
}

impl TestCaseMetadata {
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            title: title.into(),
            description: String::new(),
            tags: Vec::new(),
            creation_date: now,
            update_date: now,
            author: String::new(),
            version: initial_version(),
            default_dataset: None,
        }
    }
}

const fn initial_version() -> i32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(flatten)]
    pub metadata: TestCaseMetadata,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub dataset: Option<String>,
}

impl TestCase {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            metadata: TestCaseMetadata::new(title),
            content: content.into(),
            dataset: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.metadata.id = Some(id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved(String),
    /// The stored scenario no longer has the version the caller edited.
    VersionConflict { id: String, version: i32 },
}

#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("cannot parse scenario id '{0}'")]
    NotParsable(String),
    #[error("scenario storage failed: {0}")]
    Storage(#[from] rusqlite::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioExecution {
    pub id: i64,
    pub scenario_id: String,
    pub campaign_execution_id: Option<i64>,
}

#[derive(Debug)]
pub struct ScenarioRepository {
    conn: Mutex<Connection>,
    metrics: Arc<Metrics>,
}

impl ScenarioRepository {
    pub fn open(path: &Path, metrics: Arc<Metrics>) -> Result<Self, ScenarioError> {
        let conn = Connection::open(path)?;
        schema::bootstrap(&conn)?;
        logging::debug(format!("scenario database {}", path.display()));
        Ok(Self {
            conn: Mutex::new(conn),
            metrics,
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("scenario database mutex poisoned")
    }

    /// Stores `test_case`.
    ///
    /// A non-negative id with no activated row behind it is inserted as-is;
    /// an activated row is updated only if its version still matches. No id
    /// or a negative one gets a generated id.
    pub fn save(&self, test_case: &TestCase) -> Result<SaveOutcome, ScenarioError> {
        self.metrics.inc_scenario_save();
        let requested = match test_case.metadata.id.as_deref() {
            None => None,
            Some(raw) => Some(
                raw.parse::<i64>()
                    .map_err(|_| ScenarioError::NotParsable(raw.to_string()))?,
            ),
        };

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let outcome = match requested {
            Some(id) if id >= 0 => {
                if is_activated(&tx, id)? {
                    update_versioned(&tx, id, test_case)?
                } else {
                    insert_with_explicit_id(&tx, id, test_case)?;
                    SaveOutcome::Saved(id.to_string())
                }
            }
            _ => SaveOutcome::Saved(insert_generated(&tx, test_case)?.to_string()),
        };
        tx.commit()?;

        match &outcome {
            SaveOutcome::Saved(id) => logging::debug(format!("saved scenario {}", id)),
            SaveOutcome::VersionConflict { id, version } => {
                self.metrics.inc_version_conflict();
                logging::warn(format!(
                    "scenario {} was modified concurrently; version {} is stale",
                    id, version
                ));
            }
        }
        Ok(outcome)
    }

    pub fn find_by_id(&self, scenario_id: &str) -> Result<Option<TestCase>, ScenarioError> {
        let Some(id) = parse_id(scenario_id) else {
            return Ok(None);
        };
        let conn = self.conn();
        let sql = format!(
            "SELECT {METADATA_COLUMNS}, content, dataset FROM scenario WHERE id = ?1 AND activated = 1"
        );
        let found = conn
            .query_row(&sql, params![id], |row| {
                Ok(TestCase {
                    metadata: metadata_from_row(row)?,
                    content: row.get(9)?,
                    dataset: row.get(10)?,
                })
            })
            .optional()?;
        Ok(found)
    }

    pub fn find_metadata_by_id(
        &self,
        scenario_id: &str,
    ) -> Result<Option<TestCaseMetadata>, ScenarioError> {
        let Some(id) = parse_id(scenario_id) else {
            return Ok(None);
        };
        let conn = self.conn();
        let sql =
            format!("SELECT {METADATA_COLUMNS} FROM scenario WHERE id = ?1 AND activated = 1");
        Ok(conn
            .query_row(&sql, params![id], metadata_from_row)
            .optional()?)
    }

    pub fn find_all(&self) -> Result<Vec<TestCaseMetadata>, ScenarioError> {
        let conn = self.conn();
        let sql =
            format!("SELECT {METADATA_COLUMNS} FROM scenario WHERE activated = 1 ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], metadata_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Deactivates a scenario after detaching its executions from campaign
    /// executions and dropping its campaign memberships.
    ///
    /// Malformed, unknown, and already removed ids are a no-op.
    pub fn remove_by_id(&self, scenario_id: &str) -> Result<(), ScenarioError> {
        let Some(id) = parse_id(scenario_id) else {
            return Ok(());
        };
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        if !is_activated(&tx, id)? {
            return Ok(());
        }

        let key = id.to_string();
        let detached = tx.execute(
            "UPDATE scenario_execution SET campaign_execution_id = NULL WHERE scenario_id = ?1",
            params![key],
        )?;
        let unlinked = tx.execute(
            "DELETE FROM campaign_scenario WHERE scenario_id = ?1",
            params![key],
        )?;
        tx.execute(
            "UPDATE scenario SET activated = 0, version = version + 1 WHERE id = ?1",
            params![id],
        )?;
        tx.commit()?;

        logging::info(format!(
            "removed scenario {} (executions detached={}, campaign links dropped={})",
            id, detached, unlinked
        ));
        Ok(())
    }

    pub fn last_version(&self, scenario_id: &str) -> Result<Option<i32>, ScenarioError> {
        let Some(id) = parse_id(scenario_id) else {
            return Ok(None);
        };
        let conn = self.conn();
        Ok(conn
            .query_row(
                "SELECT version FROM scenario WHERE id = ?1 AND activated = 1",
                params![id],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Metadata of the scenarios whose content contains any search term.
    ///
    /// An empty filter, or one that yields no terms, lists everything.
    pub fn search(&self, text_filter: &str) -> Result<Vec<TestCaseMetadata>, ScenarioError> {
        if text_filter.is_empty() {
            return self.find_all();
        }
        self.metrics.inc_search();

        let filter = ContentFilter::from_text(text_filter);
        let Some(clause) = filter.to_sql("content", 1) else {
            return self.find_all();
        };
        logging::debug(format!("scenario search terms={:?}", filter.terms()));

        let conn = self.conn();
        let sql = format!(
            "SELECT {METADATA_COLUMNS} FROM scenario WHERE activated = 1 AND {clause} ORDER BY id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(filter.terms()), metadata_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn record_execution(
        &self,
        scenario_id: &str,
        campaign_execution_id: Option<i64>,
    ) -> Result<i64, ScenarioError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO scenario_execution(scenario_id, campaign_execution_id) VALUES (?1, ?2)",
            params![scenario_id, campaign_execution_id],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn executions_of(&self, scenario_id: &str) -> Result<Vec<ScenarioExecution>, ScenarioError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, scenario_id, campaign_execution_id FROM scenario_execution WHERE scenario_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![scenario_id], |row| {
            Ok(ScenarioExecution {
                id: row.get(0)?,
                scenario_id: row.get(1)?,
                campaign_execution_id: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn add_to_campaign(
        &self,
        campaign_id: i64,
        scenario_id: &str,
        rank: i32,
    ) -> Result<(), ScenarioError> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO campaign_scenario(campaign_id, scenario_id, rank) VALUES (?1, ?2, ?3)",
            params![campaign_id, scenario_id, rank],
        )?;
        Ok(())
    }

    pub fn campaigns_of(&self, scenario_id: &str) -> Result<Vec<i64>, ScenarioError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT campaign_id FROM campaign_scenario WHERE scenario_id = ?1 ORDER BY campaign_id",
        )?;
        let rows = stmt.query_map(params![scenario_id], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

fn is_activated(tx: &Transaction<'_>, id: i64) -> rusqlite::Result<bool> {
    tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM scenario WHERE id = ?1 AND activated = 1)",
        params![id],
        |row| row.get(0),
    )
}

fn insert_generated(tx: &Transaction<'_>, test_case: &TestCase) -> rusqlite::Result<i64> {
    let meta = &test_case.metadata;
    tx.execute(
        "
INSERT INTO scenario(title, description, content, tags, creation_date, dataset, activated,
                     user_id, update_date, version, default_dataset)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?8, ?9, ?10)
",
        params![
            meta.title,
            meta.description,
            test_case.content,
            join_tags(&meta.tags)?,
            format_timestamp(&meta.creation_date),
            test_case.dataset,
            meta.author,
            format_timestamp(&meta.update_date),
            meta.version,
            meta.default_dataset,
        ],
    )?;
    Ok(tx.last_insert_rowid())
}

/// Inserts under the caller's id, reviving a deactivated row if one holds it.
fn insert_with_explicit_id(tx: &Transaction<'_>, id: i64, test_case: &TestCase) -> rusqlite::Result<()> {
    let meta = &test_case.metadata;
    tx.execute(
        "
INSERT INTO scenario(id, title, description, content, tags, creation_date, dataset, activated,
                     user_id, update_date, version, default_dataset)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?9, ?10, ?11)
ON CONFLICT(id) DO UPDATE SET
  title = excluded.title,
  description = excluded.description,
  content = excluded.content,
  tags = excluded.tags,
  creation_date = excluded.creation_date,
  dataset = excluded.dataset,
  activated = 1,
  user_id = excluded.user_id,
  update_date = excluded.update_date,
  version = excluded.version,
  default_dataset = excluded.default_dataset
",
        params![
            id,
            meta.title,
            meta.description,
            test_case.content,
            join_tags(&meta.tags)?,
            format_timestamp(&meta.creation_date),
            test_case.dataset,
            meta.author,
            format_timestamp(&meta.update_date),
            meta.version,
            meta.default_dataset,
        ],
    )?;
    Ok(())
}

fn update_versioned(
    tx: &Transaction<'_>,
    id: i64,
    test_case: &TestCase,
) -> rusqlite::Result<SaveOutcome> {
    let meta = &test_case.metadata;
    let changed = tx.execute(
        "
UPDATE scenario SET
  title = ?1,
  description = ?2,
  content = ?3,
  tags = ?4,
  dataset = ?5,
  user_id = ?6,
  update_date = ?7,
  default_dataset = ?8,
  version = version + 1
WHERE id = ?9 AND version = ?10 AND activated = 1
",
        params![
            meta.title,
            meta.description,
            test_case.content,
            join_tags(&meta.tags)?,
            test_case.dataset,
            meta.author,
            format_timestamp(&meta.update_date),
            meta.default_dataset,
            id,
            meta.version,
        ],
    )?;

    if changed == 0 {
        return Ok(SaveOutcome::VersionConflict {
            id: id.to_string(),
            version: meta.version,
        });
    }
    Ok(SaveOutcome::Saved(id.to_string()))
}
