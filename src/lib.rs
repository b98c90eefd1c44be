//! `chutney-store` is the persistence layer of the Chutney test platform:
//! scenarios in SQLite, Jira links and campaign schedules in JSON files.

/// Runtime configuration loading and validation.
pub mod config;
/// Jira link maps and Jira server configuration, one JSON file each.
pub mod jira_store;
/// Locked, atomically replaced JSON files shared by the file-backed stores.
pub mod json_file;
/// Link lookups between Chutney entities and Jira test executions.
pub mod links;
/// Logging helpers used throughout the crate.
pub mod logging;
/// Runtime metrics counters.
pub mod metrics;
/// SQLite-backed scenario repository.
pub mod scenario;
/// Periodic campaign schedules.
pub mod schedule;
/// Quoted-phrase search terms and content filters.
pub mod search;
