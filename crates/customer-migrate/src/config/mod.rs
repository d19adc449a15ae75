//! Configuration loading and validation.
//!
//! Values come from three layers, later ones winning: the YAML file, the
//! environment (`READ_DB_*`, `WRITE_DB_*`, ...), and command-line overrides.

mod types;
mod validation;

pub use types::*;

use std::path::Path;

use crate::error::{MigrateError, Result};
use crate::planner::PlanPolicy;
use crate::rules::{parse_rules, Rule, RuleAction, RuleSource};

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    ///
    /// Only the file itself is checked here; [`validate`](Self::validate)
    /// runs once the environment and command line have been applied.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        validation::validate_rules(&config)?;
        Ok(config)
    }

    /// Validate the resolved configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Apply environment variables from the process environment.
    pub fn apply_process_env(&mut self) -> Result<()> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Apply environment variables through a lookup function.
    ///
    /// Unset or empty variables leave the current value alone.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        apply_connection_env(&mut self.source, "READ_DB", &get)?;
        apply_connection_env(&mut self.target, "WRITE_DB", &get)?;

        let m = &mut self.migration;
        if let Some(v) = get("AUTO_CONFIRM_THRESHOLD") {
            m.confirmation_threshold = parse_env("AUTO_CONFIRM_THRESHOLD", &v)?;
        }
        if let Some(v) = get("SEED_USER_IDS") {
            m.seed_user_ids = parse_id_list(&v)
                .map_err(|e| MigrateError::Config(format!("SEED_USER_IDS: {}", e)))?;
        }
        if let Some(v) = get("FORCE_MIGRATE_TABLES") {
            m.force_rules = split_list(&v);
        }
        if let Some(v) = get("SKIP_TABLES") {
            m.skip_tables = split_list(&v);
        }
        if let Some(v) = get("SKIP_LARGE_TABLES") {
            m.auto_skip_large = parse_flag(&v);
        }
        if let Some(v) = get("MIGRATION_STATE_DIR") {
            m.state_directory = v.into();
        }
        Ok(())
    }

    /// Build the rule set: CLI rules first, then config rules, each in
    /// declaration order.
    pub fn rules(&self) -> Result<Vec<Rule>> {
        let m = &self.migration;
        let mut rules = parse_rules(&m.overrides.force_tables, RuleAction::Force, RuleSource::Cli)?;
        rules.extend(parse_rules(&m.overrides.skip_tables, RuleAction::Skip, RuleSource::Cli)?);
        rules.extend(parse_rules(&m.skip_tables, RuleAction::Skip, RuleSource::Config)?);
        rules.extend(parse_rules(&m.force_rules, RuleAction::Force, RuleSource::Config)?);
        Ok(rules)
    }

    /// Planner policy derived from this configuration.
    pub fn plan_policy(&self) -> Result<PlanPolicy> {
        Ok(PlanPolicy {
            rules: self.rules()?,
            force_all: self.migration.overrides.force_all,
            confirmation_threshold: self.migration.confirmation_threshold,
            auto_skip_large: self.migration.auto_skip_large,
            migrate_routines: self.migration.migrate_routines,
        })
    }
}

fn apply_connection_env<G>(conn: &mut ConnectionConfig, prefix: &str, get: &G) -> Result<()>
where
    G: Fn(&str) -> Option<String>,
{
    if let Some(v) = get(&format!("{}_HOST", prefix)) {
        conn.host = v;
    }
    if let Some(v) = get(&format!("{}_PORT", prefix)) {
        conn.port = parse_env(&format!("{}_PORT", prefix), &v)?;
    }
    if let Some(v) = get(&format!("{}_USER", prefix)) {
        conn.user = v;
    }
    if let Some(v) = get(&format!("{}_PASSWORD", prefix)) {
        conn.password = v;
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| MigrateError::Config(format!("{} has invalid value '{}'", key, value)))
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Split a comma-separated list, dropping blanks.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a comma-separated list of integer ids.
pub fn parse_id_list(value: &str) -> std::result::Result<Vec<i64>, String> {
    split_list(value)
        .iter()
        .map(|s| s.parse::<i64>().map_err(|_| format!("'{}' is not an integer id", s)))
        .collect()
}
