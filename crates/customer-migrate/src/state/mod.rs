//! Durable per-customer-set migration state.
//!
//! One JSON file per sorted customer id set records, for every database,
//! the outcome of each table and routine. The file is rewritten after every
//! outcome so an interrupted run resumes where it stopped.

mod store;
pub mod timestamp;

pub use store::StateStore;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::RoutineKind;
use crate::error::{MigrateError, Result};

/// Maximum length of a failure reason stored in the state file.
pub const MAX_REASON_LEN: usize = 100;

/// Reason recorded for the table in flight when a run is cancelled.
pub const REASON_INTERRUPTED: &str = "interrupted";

/// Sorted, de-duplicated customer ids identifying a state file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateKey(Vec<i64>);

impl StateKey {
    /// Build a key from customer ids in any order.
    pub fn new(ids: &[i64]) -> Result<Self> {
        if ids.is_empty() {
            return Err(MigrateError::Config(
                "at least one customer id is required".into(),
            ));
        }
        let mut ids = ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        Ok(Self(ids))
    }

    pub fn ids(&self) -> &[i64] {
        &self.0
    }

    /// `migration_state_<id1>_<id2>...json`
    pub fn file_name(&self) -> String {
        format!("migration_state_{}.json", self)
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|id| id.to_string()).collect();
        f.write_str(&parts.join("_"))
    }
}

/// Outcome of one table or routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Completed,
    Skipped,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskStatus::Completed => "completed",
            TaskStatus::Skipped => "skipped",
            TaskStatus::Failed => "failed",
        })
    }
}

/// State of a single table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableEntry {
    pub status: TaskStatus,

    /// Rows copied by the recorded attempt.
    #[serde(default)]
    pub rows: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,

    /// Fields written by other tools, kept on rewrite.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// State of a single routine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutineEntry {
    #[serde(rename = "type")]
    pub kind: RoutineKind,

    pub status: TaskStatus,

    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Tables and routines of one database.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseState {
    #[serde(default)]
    pub tables: BTreeMap<String, TableEntry>,

    #[serde(default)]
    pub routines: BTreeMap<String, RoutineEntry>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Status counts for one database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl DatabaseState {
    /// Look up a table entry, falling back to a case-insensitive match.
    pub fn table(&self, name: &str) -> Option<&TableEntry> {
        self.tables.get(name).or_else(|| {
            self.tables
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v)
        })
    }

    /// Look up a routine entry.
    pub fn routine(&self, name: &str) -> Option<&RoutineEntry> {
        self.routines.get(name)
    }

    /// Count table entries by status.
    pub fn table_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for entry in self.tables.values() {
            match entry.status {
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Skipped => counts.skipped += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

/// Whole state file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationState {
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,

    #[serde(
        default,
        with = "timestamp::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub databases: BTreeMap<String, DatabaseState>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for MigrationState {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationState {
    /// Create an empty state.
    pub fn new() -> Self {
        Self {
            created_at: Utc::now(),
            updated_at: None,
            databases: BTreeMap::new(),
            extra: Map::new(),
        }
    }

    /// Load state from a file.
    ///
    /// A file that exists but does not parse is reported as
    /// [`MigrateError::StateCorruption`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            MigrateError::StateCorruption(format!("{}: {}", path.display(), e))
        })
    }

    pub fn database(&self, name: &str) -> Option<&DatabaseState> {
        self.databases.get(name)
    }

    /// Entry for a table, if any.
    pub fn table(&self, database: &str, table: &str) -> Option<&TableEntry> {
        self.database(database).and_then(|db| db.table(table))
    }

    /// Entry for a routine, if any.
    pub fn routine(&self, database: &str, name: &str) -> Option<&RoutineEntry> {
        self.database(database).and_then(|db| db.routine(name))
    }

    /// Record a table outcome in memory. Existing unknown fields are kept.
    pub fn set_table(
        &mut self,
        database: &str,
        table: &str,
        status: TaskStatus,
        rows: i64,
        reason: Option<&str>,
    ) {
        let now = Utc::now();
        let reason = reason.map(truncate_reason);
        let db = self.databases.entry(database.to_string()).or_default();
        match db.tables.get_mut(table) {
            Some(entry) => {
                entry.status = status;
                entry.rows = rows;
                entry.reason = reason;
                entry.timestamp = now;
            }
            None => {
                db.tables.insert(
                    table.to_string(),
                    TableEntry {
                        status,
                        rows,
                        reason,
                        timestamp: now,
                        extra: Map::new(),
                    },
                );
            }
        }
    }

    /// Record a routine outcome in memory.
    pub fn set_routine(&mut self, database: &str, name: &str, kind: RoutineKind, status: TaskStatus) {
        let now = Utc::now();
        let db = self.databases.entry(database.to_string()).or_default();
        match db.routines.get_mut(name) {
            Some(entry) => {
                entry.kind = kind;
                entry.status = status;
                entry.timestamp = now;
            }
            None => {
                db.routines.insert(
                    name.to_string(),
                    RoutineEntry {
                        kind,
                        status,
                        timestamp: now,
                        extra: Map::new(),
                    },
                );
            }
        }
    }
}

/// Cut a failure reason to [`MAX_REASON_LEN`] characters.
pub fn truncate_reason(reason: &str) -> String {
    reason.chars().take(MAX_REASON_LEN).collect()
}
