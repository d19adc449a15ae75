//! Migration planning.
//!
//! [`plan`] turns a classified schema snapshot, the rule set and a snapshot of
//! the state file into an ordered list of [`PlanItem`]s grouped by [`Phase`].
//! It performs no I/O: tables that need an operator decision are returned as
//! [`Decision::Confirm`] and settled afterwards by
//! [`Plan::resolve_confirmations`].

mod decide;

pub use decide::{decide_routine, decide_table, Verdict};

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tracing::{info, warn};

use crate::classify::{Category, ClassificationFlag, ClassificationMap};
use crate::confirm::{ConfirmationRequest, Confirmer};
use crate::core::{RoutineDescriptor, SchemaSnapshot};
use crate::error::Result;
use crate::rules::{self, Rule, RuleConflict, RuleSource};
use crate::state::MigrationState;

/// Execution phase. Phases run in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Routines,
    DirectCustomer,
    DirectUser,
    IndirectFk,
    Reference,
}

impl Phase {
    /// All phases in execution order.
    pub const ALL: [Phase; 5] = [
        Phase::Routines,
        Phase::DirectCustomer,
        Phase::DirectUser,
        Phase::IndirectFk,
        Phase::Reference,
    ];

    /// Phase for a table category.
    pub fn for_category(category: &Category) -> Self {
        match category {
            Category::DirectCustomer { .. } => Phase::DirectCustomer,
            Category::DirectUser { .. } => Phase::DirectUser,
            Category::IndirectFk { .. } => Phase::IndirectFk,
            Category::Reference => Phase::Reference,
        }
    }

    /// Whether writes in this phase run with foreign key checks suspended.
    pub fn suspends_foreign_keys(&self) -> bool {
        matches!(
            self,
            Phase::DirectCustomer | Phase::DirectUser | Phase::IndirectFk
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            Phase::Routines => "Phase 0",
            Phase::DirectCustomer => "Phase 1",
            Phase::DirectUser => "Phase 1B",
            Phase::IndirectFk => "Phase 1C",
            Phase::Reference => "Phase 2",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Phase::Routines => "stored procedures and functions",
            Phase::DirectCustomer => "tables with customer_id",
            Phase::DirectUser => "tables with user_id",
            Phase::IndirectFk => "tables related through foreign keys",
            Phase::Reference => "reference tables",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label(), self.description())
    }
}

/// Why a table is skipped. The string form is what the state file records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    CliSkipTables,
    EnvSkipTables,
    AutoSkipLarge,
    UserDeclined,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::CliSkipTables => "cli_skip_tables",
            SkipReason::EnvSkipTables => "env_skip_tables",
            SkipReason::AutoSkipLarge => "auto_skip_large",
            SkipReason::UserDeclined => "user_declined",
        }
    }

    /// Reason for a skip rule of the given source.
    pub fn for_rule_source(source: RuleSource) -> Self {
        match source {
            RuleSource::Cli => SkipReason::CliSkipTables,
            RuleSource::Config => SkipReason::EnvSkipTables,
        }
    }
}

impl FromStr for SkipReason {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "cli_skip_tables" => Ok(SkipReason::CliSkipTables),
            "env_skip_tables" => Ok(SkipReason::EnvSkipTables),
            "auto_skip_large" => Ok(SkipReason::AutoSkipLarge),
            "user_declined" => Ok(SkipReason::UserDeclined),
            _ => Err(()),
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens to a unit in this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Copy the unit.
    Migrate,
    /// Copy the unit even though state or thresholds would stop it.
    Force,
    /// Record the unit as skipped.
    Skip(SkipReason),
    /// Nothing to do; the state file is not touched.
    NoOp,
    /// Ask the operator.
    Confirm,
}

impl Decision {
    /// Whether the unit is copied.
    pub fn copies(&self) -> bool {
        matches!(self, Decision::Migrate | Decision::Force)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Decision::Migrate => "migrate",
            Decision::Force => "force",
            Decision::Skip(_) => "skip",
            Decision::NoOp => "no-op",
            Decision::Confirm => "confirm",
        }
    }
}

/// Why a decision was taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rationale {
    AlreadyCompleted,
    SkipRule { source: RuleSource, pattern: String },
    ForceRule { pattern: String },
    ForcedByTablesFlag { pattern: String },
    ForcedByFlag,
    ExceedsThreshold { rows: i64, threshold: i64 },
    AutoSkippedLarge { rows: i64, threshold: i64 },
    BelowThreshold { rows: i64, threshold: i64 },
    PreviouslyDeclined { rows: i64, threshold: i64 },
    StickySkip { reason: SkipReason },
    RowCountUnavailable,
    AcceptedByOperator,
    DeclinedByOperator,
    Default,
}

impl fmt::Display for Rationale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rationale::AlreadyCompleted => f.write_str("state says completed"),
            Rationale::SkipRule { source, pattern } => {
                let origin = match source {
                    RuleSource::Cli => "--skip-tables",
                    RuleSource::Config => "skip rule",
                };
                write!(f, "matched {} '{}'", origin, pattern)
            }
            Rationale::ForceRule { pattern } => write!(f, "matched force rule '{}'", pattern),
            Rationale::ForcedByTablesFlag { pattern } => {
                write!(f, "forced by --force-tables '{}'", pattern)
            }
            Rationale::ForcedByFlag => f.write_str("forced by --force"),
            Rationale::ExceedsThreshold { rows, threshold } => write!(
                f,
                "{} rows exceeds threshold {}; needs confirmation",
                rows, threshold
            ),
            Rationale::AutoSkippedLarge { rows, threshold } => write!(
                f,
                "{} rows exceeds threshold {}; auto-skipped",
                rows, threshold
            ),
            Rationale::BelowThreshold { rows, threshold } => {
                write!(f, "{} rows within threshold {}", rows, threshold)
            }
            Rationale::PreviouslyDeclined { rows, threshold } => write!(
                f,
                "previously declined; {} rows exceeds threshold {}, asking again",
                rows, threshold
            ),
            Rationale::StickySkip { reason } => write!(f, "still skipped ({})", reason),
            Rationale::RowCountUnavailable => f.write_str("row count unavailable; needs confirmation"),
            Rationale::AcceptedByOperator => f.write_str("accepted by operator"),
            Rationale::DeclinedByOperator => f.write_str("declined by operator"),
            Rationale::Default => f.write_str("default"),
        }
    }
}

/// The thing a plan item migrates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "unit", rename_all = "snake_case")]
pub enum Unit {
    Table { name: String, category: Category },
    Routine { routine: RoutineDescriptor },
}

/// One planned unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanItem {
    pub database: String,
    #[serde(flatten)]
    pub unit: Unit,
    pub phase: Phase,
    pub decision: Decision,
    pub rationale: Rationale,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<i64>,
}

impl PlanItem {
    /// Table or routine name.
    pub fn name(&self) -> &str {
        match &self.unit {
            Unit::Table { name, .. } => name,
            Unit::Routine { routine } => &routine.name,
        }
    }

    /// Table category, for table items.
    pub fn category(&self) -> Option<&Category> {
        match &self.unit {
            Unit::Table { category, .. } => Some(category),
            Unit::Routine { .. } => None,
        }
    }
}

/// Everything the planner decides from, besides the state snapshot.
#[derive(Debug, Clone)]
pub struct PlanPolicy {
    /// Skip and force rules in declaration order.
    pub rules: Vec<Rule>,
    /// `--force`: re-copy everything, ignoring state.
    pub force_all: bool,
    /// Reference tables above this many rows need confirmation.
    pub confirmation_threshold: i64,
    /// Skip reference tables above the threshold instead of asking.
    pub auto_skip_large: bool,
    /// Plan Phase 0.
    pub migrate_routines: bool,
}

impl Default for PlanPolicy {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            force_all: false,
            confirmation_threshold: 400,
            auto_skip_large: false,
            migrate_routines: true,
        }
    }
}

/// Inputs for planning one database.
#[derive(Debug, Clone, Copy)]
pub struct PlanInputs<'a> {
    pub snapshot: &'a SchemaSnapshot,
    pub classification: &'a ClassificationMap,
    pub routines: &'a [RoutineDescriptor],
    /// Full-table row counts for the tables that need one.
    pub row_counts: &'a HashMap<String, i64>,
    pub policy: &'a PlanPolicy,
}

/// Plan for one database.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub database: String,
    pub threshold: i64,
    pub items: Vec<PlanItem>,
    pub conflicts: Vec<RuleConflict>,
    pub flags: Vec<ClassificationFlag>,
}

impl Plan {
    /// Items of one phase, in order.
    pub fn phase(&self, phase: Phase) -> impl Iterator<Item = &PlanItem> {
        self.items.iter().filter(move |i| i.phase == phase)
    }

    /// Whether any table in Phases 1-1C will be copied.
    pub fn writes_with_foreign_keys_suspended(&self) -> bool {
        self.items
            .iter()
            .any(|i| i.phase.suspends_foreign_keys() && i.decision.copies())
    }

    /// Items still waiting for an operator decision.
    pub fn pending_confirmations(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.decision == Decision::Confirm)
            .count()
    }

    /// Ask the confirmer about every [`Decision::Confirm`] item.
    ///
    /// Accepted tables become [`Decision::Force`] for this run; declined ones
    /// become `Skip(user_declined)`.
    pub fn resolve_confirmations(&mut self, confirmer: &dyn Confirmer) -> Result<()> {
        for item in self.items.iter_mut().filter(|i| i.decision == Decision::Confirm) {
            let request = ConfirmationRequest {
                database: item.database.clone(),
                table: item.name().to_string(),
                row_count: item.row_count,
                threshold: self.threshold,
            };
            if confirmer.confirm(&request)? {
                info!("{}.{}: accepted", item.database, item.name());
                item.decision = Decision::Force;
                item.rationale = Rationale::AcceptedByOperator;
            } else {
                info!("{}.{}: declined", item.database, item.name());
                item.decision = Decision::Skip(SkipReason::UserDeclined);
                item.rationale = Rationale::DeclinedByOperator;
            }
        }
        Ok(())
    }
}

/// Reference tables whose decision depends on their row count.
///
/// The caller counts these (full table, no filter) and passes the counts back
/// through [`PlanInputs::row_counts`].
pub fn tables_needing_row_counts(
    snapshot: &SchemaSnapshot,
    classification: &ClassificationMap,
    policy: &PlanPolicy,
    state: &MigrationState,
) -> Vec<String> {
    snapshot
        .tables
        .iter()
        .filter(|t| {
            let category = classification.get(&t.name).unwrap_or(&Category::Reference);
            let prior = state.table(&snapshot.database, &t.name);
            matches!(
                decide_table(&snapshot.database, &t.name, category, None, policy, prior),
                Verdict::NeedsRowCount
            )
        })
        .map(|t| t.name.clone())
        .collect()
}

/// Build the plan for one database.
pub fn plan(inputs: PlanInputs<'_>, state: &MigrationState) -> Plan {
    let database = inputs.snapshot.database.clone();
    let policy = inputs.policy;
    let mut items = Vec::new();

    if policy.migrate_routines {
        for routine in inputs.routines {
            let prior = state.routine(&database, &routine.name);
            let (decision, rationale) = decide_routine(policy, prior);
            items.push(PlanItem {
                database: database.clone(),
                unit: Unit::Routine {
                    routine: routine.clone(),
                },
                phase: Phase::Routines,
                decision,
                rationale,
                row_count: None,
            });
        }
    }

    let mut conflicts = Vec::new();
    for table in &inputs.snapshot.tables {
        let category = inputs
            .classification
            .get(&table.name)
            .cloned()
            .unwrap_or(Category::Reference);
        let prior = state.table(&database, &table.name);
        let row_count = inputs.row_counts.get(&table.name).copied();

        if let Some(conflict) =
            rules::resolve(&database, &table.name, &policy.rules).and_then(|r| r.conflict)
        {
            warn!("Conflicting rules for {}", conflict);
            conflicts.push(conflict);
        }

        let (decision, rationale) =
            match decide_table(&database, &table.name, &category, row_count, policy, prior) {
                Verdict::Decided(decision, rationale) => (decision, rationale),
                Verdict::NeedsRowCount => (Decision::Confirm, Rationale::RowCountUnavailable),
            };

        items.push(PlanItem {
            database: database.clone(),
            phase: Phase::for_category(&category),
            unit: Unit::Table {
                name: table.name.clone(),
                category,
            },
            decision,
            rationale,
            row_count,
        });
    }

    // Stable: keeps snapshot order inside each phase.
    items.sort_by_key(|i| i.phase);

    for flag in inputs.classification.flags() {
        warn!("Classification needs review: {}", flag);
    }

    Plan {
        database,
        threshold: policy.confirmation_threshold,
        items,
        conflicts,
        flags: inputs.classification.flags().to_vec(),
    }
}

#[cfg(test)]
mod tests;
