//! Error types for the migration library.

use thiserror::Error;

/// Process exit code for configuration errors.
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Process exit code when a database cannot be reached.
pub const EXIT_CONNECTIVITY_ERROR: u8 = 2;
/// Process exit code for unreadable or locked state files.
pub const EXIT_STATE_ERROR: u8 = 3;
/// Process exit code when at least one table or routine failed.
pub const EXIT_INCOMPLETE: u8 = 4;
/// Process exit code for file system errors.
pub const EXIT_IO_ERROR: u8 = 7;
/// Process exit code after SIGINT/SIGTERM.
pub const EXIT_CANCELLED: u8 = 130;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, bad rule pattern, conflicting rules, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A database could not be reached. Raised before any state is written.
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Source database query error
    #[error("Source database error: {0}")]
    Source(#[from] sqlx::Error),

    /// Destination database query error
    #[error("Destination database error: {0}")]
    Target(#[from] mysql_async::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Destination table or column missing
    #[error("Schema mismatch for table {table}: {message}")]
    SchemaMismatch { table: String, message: String },

    /// Batch read or write failed for a specific table
    #[error("Copy failed for table {table}: {message}")]
    Copy { table: String, message: String },

    /// Routine definition could not be read or applied
    #[error("Routine {name} failed: {message}")]
    Routine { name: String, message: String },

    /// State file exists but cannot be parsed
    #[error("State file is corrupt: {0}")]
    StateCorruption(String),

    /// State file error (lock held, write failure)
    #[error("State file error: {0}")]
    State(String),

    /// The run finished but some units failed
    #[error("Migration incomplete: {failed} unit(s) failed")]
    Incomplete { failed: usize },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Copy error
    pub fn copy(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Copy {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a SchemaMismatch error
    pub fn schema_mismatch(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::SchemaMismatch {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Routine error
    pub fn routine(name: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Routine {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Whether the error only affects the unit being migrated.
    ///
    /// Unit-scoped errors are recorded as `failed` in the state file and the
    /// run moves on to the next table; everything else aborts the run.
    pub fn is_unit_scoped(&self) -> bool {
        matches!(
            self,
            MigrateError::SchemaMismatch { .. }
                | MigrateError::Copy { .. }
                | MigrateError::Routine { .. }
                | MigrateError::Source(_)
                | MigrateError::Target(_)
                | MigrateError::Pool { .. }
        )
    }

    /// Map the error to a process exit code.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => EXIT_CONFIG_ERROR,
            MigrateError::Connectivity(_)
            | MigrateError::Source(_)
            | MigrateError::Target(_)
            | MigrateError::Pool { .. } => EXIT_CONNECTIVITY_ERROR,
            MigrateError::StateCorruption(_) | MigrateError::State(_) | MigrateError::Json(_) => {
                EXIT_STATE_ERROR
            }
            MigrateError::SchemaMismatch { .. }
            | MigrateError::Copy { .. }
            | MigrateError::Routine { .. }
            | MigrateError::Incomplete { .. } => EXIT_INCOMPLETE,
            MigrateError::Io(_) => EXIT_IO_ERROR,
            MigrateError::Cancelled => EXIT_CANCELLED,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
