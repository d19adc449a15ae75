//! Configuration type definitions.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Source (read) server.
    #[serde(default)]
    pub source: ConnectionConfig,

    /// Destination (write) server.
    #[serde(default)]
    pub target: ConnectionConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// MySQL/MariaDB server connection.
///
/// No default database: every database of a run is addressed by name.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Database host.
    #[serde(default)]
    pub host: String,

    /// Database port (default: 3306).
    #[serde(default = "default_mysql_port")]
    pub port: u16,

    /// Username.
    #[serde(default)]
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// TLS mode: disable, prefer, require, verify-ca, verify-full.
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_mysql_port(),
            user: String::new(),
            password: String::new(),
            ssl_mode: default_ssl_mode(),
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

impl ConnectionConfig {
    /// `host:port` for log lines.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Databases to migrate. Empty means every non-system database.
    #[serde(default)]
    pub databases: Vec<String>,

    /// Customer ids selecting the rows to copy.
    #[serde(default)]
    pub customer_ids: Vec<i64>,

    /// User ids copied from `user_id` tables (default: 1, 2).
    #[serde(default = "default_seed_user_ids")]
    pub seed_user_ids: Vec<i64>,

    /// Reference tables above this many rows need confirmation (default: 400).
    #[serde(default = "default_confirmation_threshold")]
    pub confirmation_threshold: i64,

    /// Skip reference tables above the threshold instead of asking.
    #[serde(default)]
    pub auto_skip_large: bool,

    /// Skip rules (`DB.TABLE`, `DB.*`, `*.TABLE`, `TABLE`).
    #[serde(default)]
    pub skip_tables: Vec<String>,

    /// Force rules: matching reference tables copy without confirmation.
    #[serde(default = "default_force_rules")]
    pub force_rules: Vec<String>,

    /// Directory holding state files (default: .migration_state).
    #[serde(default = "default_state_directory")]
    pub state_directory: PathBuf,

    /// Rows per read/write batch (default: 1000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Copy stored procedures and functions (default: true).
    #[serde(default = "default_true")]
    pub migrate_routines: bool,

    /// Treat conflicting rules as a configuration error (default: false).
    #[serde(default)]
    pub strict_rules: bool,

    /// Infer foreign keys from `<table>_id` column names (default: false).
    #[serde(default)]
    pub detect_implicit_foreign_keys: bool,

    /// Source connection pool size (default: 4).
    #[serde(default = "default_max_source_connections")]
    pub max_source_connections: u32,

    /// Command-line overrides; never read from or written to the file.
    #[serde(skip)]
    pub overrides: RunOverrides,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            databases: Vec::new(),
            customer_ids: Vec::new(),
            seed_user_ids: default_seed_user_ids(),
            confirmation_threshold: default_confirmation_threshold(),
            auto_skip_large: false,
            skip_tables: Vec::new(),
            force_rules: default_force_rules(),
            state_directory: default_state_directory(),
            batch_size: default_batch_size(),
            migrate_routines: true,
            strict_rules: false,
            detect_implicit_foreign_keys: false,
            max_source_connections: default_max_source_connections(),
            overrides: RunOverrides::default(),
        }
    }
}

/// Command-line overrides. Rules from here outrank every config rule.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    /// `--force`: re-copy every table and routine, ignoring state.
    pub force_all: bool,
    /// `--force-tables`
    pub force_tables: Vec<String>,
    /// `--skip-tables`
    pub skip_tables: Vec<String>,
}

fn default_mysql_port() -> u16 {
    3306
}

fn default_ssl_mode() -> String {
    "prefer".to_string()
}

fn default_seed_user_ids() -> Vec<i64> {
    vec![1, 2]
}

fn default_confirmation_threshold() -> i64 {
    400
}

pub(crate) fn default_force_rules() -> Vec<String> {
    vec![
        "*.schema_version".to_string(),
        "*.flyway_schema_history".to_string(),
    ]
}

fn default_state_directory() -> PathBuf {
    PathBuf::from(".migration_state")
}

fn default_batch_size() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

fn default_max_source_connections() -> u32 {
    4
}
