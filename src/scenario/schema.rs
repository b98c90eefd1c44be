use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row};

use super::TestCaseMetadata;

pub(super) const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS scenario (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  title TEXT NOT NULL,
  description TEXT NOT NULL DEFAULT '',
  content TEXT NOT NULL DEFAULT '',
  tags TEXT NOT NULL DEFAULT '[]',
  creation_date TEXT NOT NULL,
  dataset TEXT,
  activated INTEGER NOT NULL DEFAULT 1,
  user_id TEXT NOT NULL DEFAULT '',
  update_date TEXT NOT NULL,
  version INTEGER NOT NULL DEFAULT 1,
  default_dataset TEXT
);
CREATE TABLE IF NOT EXISTS scenario_execution (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  scenario_id TEXT NOT NULL,
  campaign_execution_id INTEGER
);
CREATE INDEX IF NOT EXISTS idx_scenario_execution_scenario
  ON scenario_execution(scenario_id);
CREATE TABLE IF NOT EXISTS campaign_scenario (
  campaign_id INTEGER NOT NULL,
  scenario_id TEXT NOT NULL,
  rank INTEGER NOT NULL DEFAULT 0,
  PRIMARY KEY (campaign_id, scenario_id, rank)
);
";

/// Columns read by [`metadata_from_row`], in order.
pub(super) const METADATA_COLUMNS: &str =
    "id, title, description, tags, creation_date, user_id, update_date, version, default_dataset";

pub(super) fn bootstrap(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)
}

pub(super) fn metadata_from_row(row: &Row<'_>) -> rusqlite::Result<TestCaseMetadata> {
    let id: i64 = row.get(0)?;
    Ok(TestCaseMetadata {
        id: Some(id.to_string()),
        title: row.get(1)?,
        description: row.get(2)?,
        tags: tags(row, 3)?,
        creation_date: timestamp(row, 4)?,
        author: row.get(5)?,
        update_date: timestamp(row, 6)?,
        version: row.get(7)?,
        default_dataset: row.get(8)?,
    })
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

pub(super) fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339()
}

/// Tags are stored as a JSON array of trimmed, non-empty strings.
pub(super) fn join_tags(tags: &[String]) -> rusqlite::Result<String> {
    let cleaned: Vec<&str> = tags
        .iter()
        .map(|tag| tag.trim())
        .filter(|tag| !tag.is_empty())
        .collect();
    serde_json::to_string(&cleaned).map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))
}

fn tags(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

/// Strict decimal id: digits only, no sign or whitespace.
pub(super) fn parse_id(raw: &str) -> Option<i64> {
    if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}
