//! Human-readable rendering of state files, plans and run results.

use std::fmt::Write;
use std::path::{Path, PathBuf};

use customer_migrate::planner::Unit;
use customer_migrate::{
    Decision, HealthCheckResult, MigrateError, MigrationResult, MigrationState, Phase, Plan,
    StateKey,
};

/// Renders the state file of one customer-id set.
pub struct StatusReporter {
    path: PathBuf,
    state: Option<MigrationState>,
}

impl StatusReporter {
    /// Read the state file; a missing file is not an error.
    pub fn load(path: &Path) -> Result<Self, MigrateError> {
        let state = if path.exists() {
            Some(MigrationState::load(path)?)
        } else {
            None
        };
        Ok(Self {
            path: path.to_path_buf(),
            state,
        })
    }

    pub fn to_json(&self) -> Result<String, MigrateError> {
        let value = serde_json::json!({
            "state_file": self.path,
            "state": self.state,
        });
        Ok(serde_json::to_string_pretty(&value)?)
    }

    pub fn render(&self, key: &StateKey) -> String {
        let ids = key
            .ids()
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ");

        let Some(state) = &self.state else {
            return format!(
                "No migration state for customers {} ({})\n",
                ids,
                self.path.display()
            );
        };

        let mut out = String::new();
        let _ = writeln!(out, "Migration state for customers {}", ids);
        let _ = writeln!(out, "  File: {}", self.path.display());
        let _ = writeln!(out, "  Created: {}", state.created_at.to_rfc3339());
        if let Some(updated) = state.updated_at {
            let _ = writeln!(out, "  Updated: {}", updated.to_rfc3339());
        }

        for (name, db) in &state.databases {
            let counts = db.table_counts();
            let _ = writeln!(
                out,
                "\n{}: {} completed, {} skipped, {} failed",
                name, counts.completed, counts.skipped, counts.failed
            );
            for (table, entry) in &db.tables {
                let _ = write!(
                    out,
                    "  {:<10} {:<32} {:>10} rows",
                    entry.status.to_string(),
                    table,
                    entry.rows
                );
                if let Some(reason) = &entry.reason {
                    let _ = write!(out, "  {}", reason);
                }
                out.push('\n');
            }
            if !db.routines.is_empty() {
                let _ = writeln!(out, "  routines:");
                for (routine, entry) in &db.routines {
                    let _ = writeln!(
                        out,
                        "    {:<10} {} {}",
                        entry.status.to_string(),
                        entry.kind.as_str(),
                        routine
                    );
                }
            }
        }
        out
    }
}

fn decision_text(decision: &Decision) -> String {
    match decision {
        Decision::Skip(reason) => format!("skip ({})", reason),
        other => other.label().to_string(),
    }
}

/// Render one database plan, grouped by phase.
pub fn render_plan(plan: &Plan) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Plan for {} (confirmation threshold {})",
        plan.database, plan.threshold
    );

    for phase in Phase::ALL {
        let mut items = plan.phase(phase).peekable();
        if items.peek().is_none() {
            continue;
        }
        let _ = writeln!(out, "  {}", phase);
        for item in items {
            let what = match &item.unit {
                Unit::Table { name, category } => format!("{} [{}]", name, category),
                Unit::Routine { routine } => format!("{} {}", routine.kind.as_str(), routine.name),
            };
            let _ = write!(
                out,
                "    {:<24} {}: {}",
                decision_text(&item.decision),
                what,
                item.rationale
            );
            if let Some(rows) = item.row_count {
                let _ = write!(out, " ({} rows)", rows);
            }
            out.push('\n');
        }
    }

    if !plan.conflicts.is_empty() {
        let _ = writeln!(out, "  Rule conflicts:");
        for conflict in &plan.conflicts {
            let _ = writeln!(out, "    {}", conflict);
        }
    }
    if !plan.flags.is_empty() {
        let _ = writeln!(out, "  Flagged tables:");
        for flag in &plan.flags {
            let _ = writeln!(out, "    {}", flag);
        }
    }
    out
}

/// Run summary for the terminal.
pub fn render_result(result: &MigrationResult) -> String {
    let headline = match result.status.as_str() {
        "dry_run" => "Dry run completed!",
        "completed" => "Migration completed!",
        _ => "Migration incomplete",
    };
    let ids = result
        .customer_ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ");

    let mut out = String::new();
    let _ = writeln!(out, "\n{}", headline);
    let _ = writeln!(out, "  Run ID: {}", result.run_id);
    let _ = writeln!(out, "  Duration: {:.2}s", result.duration_seconds);
    let _ = writeln!(out, "  Customers: {}", ids);
    if result.status != "dry_run" {
        let _ = writeln!(out, "  State file: {}", result.state_file.display());
        let _ = writeln!(
            out,
            "  Tables: {} completed, {} skipped, {} failed",
            result.tables_completed, result.tables_skipped, result.tables_failed
        );
        if result.routines_failed > 0 {
            let _ = writeln!(out, "  Routines failed: {}", result.routines_failed);
        }
        let _ = writeln!(out, "  Rows: {}", result.rows_copied);
    }
    if !result.failed_tables.is_empty() {
        let _ = writeln!(out, "  Failed tables: {}", result.failed_tables.join(", "));
    }
    out
}

pub fn render_health(result: &HealthCheckResult) -> String {
    let mut out = String::from("Health Check Results:\n");
    let _ = writeln!(
        out,
        "  Source (MySQL): {} ({}ms)",
        if result.source_connected { "OK" } else { "FAILED" },
        result.source_latency_ms
    );
    if let Some(err) = &result.source_error {
        let _ = writeln!(out, "    Error: {}", err);
    }
    let _ = writeln!(
        out,
        "  Target (MySQL): {} ({}ms)",
        if result.target_connected { "OK" } else { "FAILED" },
        result.target_latency_ms
    );
    if let Some(err) = &result.target_error {
        let _ = writeln!(out, "    Error: {}", err);
    }
    let _ = writeln!(
        out,
        "\n  Overall: {}",
        if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
    );
    out
}
