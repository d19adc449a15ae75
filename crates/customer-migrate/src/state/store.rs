use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::FileExt;
use tracing::debug;

use super::{MigrationState, StateKey, TaskStatus};
use crate::core::RoutineKind;
use crate::error::{MigrateError, Result};

/// Owner of the state file for one customer id set.
///
/// Holds an exclusive advisory lock on `<state file>.lock` for its whole
/// lifetime, so two runs for the same ids cannot interleave writes. Every
/// `record_*` call rewrites the file atomically before returning.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    key: StateKey,
    state: MigrationState,
    _lock: File,
}

impl StateStore {
    /// Open (or prepare to create) the state file for a key.
    ///
    /// The file itself is only created by the first recorded outcome.
    pub fn open<P: AsRef<Path>>(dir: P, key: &StateKey) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let path = Self::path_for(dir, key);
        let lock_path = path.with_extension("json.lock");
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        lock.try_lock_exclusive().map_err(|_| {
            MigrateError::State(format!(
                "another run holds the lock for customers {} ({})",
                key,
                lock_path.display()
            ))
        })?;

        let state = if path.exists() {
            let state = MigrationState::load(&path)?;
            debug!("Loaded state from {}", path.display());
            state
        } else {
            MigrationState::new()
        };

        Ok(Self {
            path,
            key: key.clone(),
            state,
            _lock: lock,
        })
    }

    /// Path of the state file for a key inside a directory.
    pub fn path_for<P: AsRef<Path>>(dir: P, key: &StateKey) -> PathBuf {
        dir.as_ref().join(key.file_name())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn key(&self) -> &StateKey {
        &self.key
    }

    /// Current in-memory state.
    pub fn state(&self) -> &MigrationState {
        &self.state
    }

    /// Copy of the state for planning.
    pub fn snapshot(&self) -> MigrationState {
        self.state.clone()
    }

    /// Record a table outcome and flush.
    pub fn record_table_outcome(
        &mut self,
        database: &str,
        table: &str,
        status: TaskStatus,
        rows: i64,
        reason: Option<&str>,
    ) -> Result<()> {
        self.state.set_table(database, table, status, rows, reason);
        self.flush()
    }

    /// Record a routine outcome and flush.
    pub fn record_routine_outcome(
        &mut self,
        database: &str,
        routine: &str,
        kind: RoutineKind,
        status: TaskStatus,
    ) -> Result<()> {
        self.state.set_routine(database, routine, kind, status);
        self.flush()
    }

    /// Write the state durably: temp file, fsync, rename.
    fn flush(&mut self) -> Result<()> {
        self.state.updated_at = Some(Utc::now());

        let content = serde_json::to_string_pretty(&self.state)?;
        let temp_path = self.path.with_extension("json.tmp");

        let write = || -> std::io::Result<()> {
            let mut file = File::create(&temp_path)?;
            file.write_all(content.as_bytes())?;
            file.write_all(b"\n")?;
            file.sync_all()?;
            std::fs::rename(&temp_path, &self.path)?;
            #[cfg(unix)]
            if let Some(parent) = self.path.parent() {
                File::open(parent)?.sync_all()?;
            }
            Ok(())
        };

        write().map_err(|e| {
            MigrateError::State(format!("writing {}: {}", self.path.display(), e))
        })
    }
}
