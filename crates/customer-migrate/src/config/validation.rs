//! Configuration validation.

use super::Config;
use crate::error::{MigrateError, Result};

/// Check that every rule pattern parses.
pub fn validate_rules(config: &Config) -> Result<()> {
    config.rules().map(|_| ())
}

/// Validate the resolved configuration.
pub fn validate(config: &Config) -> Result<()> {
    if config.source.host.is_empty() {
        return Err(MigrateError::Config(
            "source.host is required (or READ_DB_HOST)".into(),
        ));
    }
    if config.source.user.is_empty() {
        return Err(MigrateError::Config(
            "source.user is required (or READ_DB_USER)".into(),
        ));
    }
    if config.target.host.is_empty() {
        return Err(MigrateError::Config(
            "target.host is required (or WRITE_DB_HOST)".into(),
        ));
    }
    if config.target.user.is_empty() {
        return Err(MigrateError::Config(
            "target.user is required (or WRITE_DB_USER)".into(),
        ));
    }

    // Same database names on both sides: one server would copy onto itself
    if config.source.host.eq_ignore_ascii_case(&config.target.host)
        && config.source.port == config.target.port
    {
        return Err(MigrateError::Config(format!(
            "source and target are the same server ({})",
            config.source.endpoint()
        )));
    }

    let m = &config.migration;
    if m.customer_ids.is_empty() {
        return Err(MigrateError::Config(
            "migration.customer_ids must list at least one id".into(),
        ));
    }
    if m.batch_size == 0 {
        return Err(MigrateError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }
    if m.confirmation_threshold < 0 {
        return Err(MigrateError::Config(
            "migration.confirmation_threshold must not be negative".into(),
        ));
    }
    if m.max_source_connections == 0 {
        return Err(MigrateError::Config(
            "migration.max_source_connections must be at least 1".into(),
        ));
    }
    if m.databases.iter().any(|d| d.trim().is_empty()) {
        return Err(MigrateError::Config(
            "migration.databases contains an empty name".into(),
        ));
    }

    validate_rules(config)
}
