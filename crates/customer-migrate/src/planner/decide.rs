//! Per-unit decision rules.

use crate::classify::Category;
use crate::rules::{self, RuleAction, RuleSource};
use crate::state::{RoutineEntry, TableEntry, TaskStatus};

use super::{Decision, PlanPolicy, Rationale, SkipReason};

/// Result of deciding a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Decided(Decision, Rationale),
    /// The decision depends on the table's row count, which was not supplied.
    NeedsRowCount,
}

/// Decide what happens to one table, highest priority first:
///
/// 1. any matching CLI force rule (`--force-tables`), even when a more
///    specific skip rule also matches
/// 2. `--force`
/// 3. state says completed
/// 4. a skip rule (CLI before config)
/// 5. a config force rule, which skips the threshold check
/// 6. reference tables over the threshold: auto-skip or confirm
/// 7. migrate
///
/// Prior skips other than `user_declined` stay skipped without a new state
/// write while their cause still applies.
pub fn decide_table(
    database: &str,
    table: &str,
    category: &Category,
    row_count: Option<i64>,
    policy: &PlanPolicy,
    prior: Option<&TableEntry>,
) -> Verdict {
    use Verdict::Decided;

    // --force-tables wins over state and every skip rule, however specific.
    let forced = policy.rules.iter().find(|r| {
        r.source == RuleSource::Cli
            && r.action == RuleAction::Force
            && r.pattern.matches(database, table)
    });
    if let Some(rule) = forced {
        return Decided(
            Decision::Force,
            Rationale::ForcedByTablesFlag {
                pattern: rule.pattern.to_string(),
            },
        );
    }

    let resolution = rules::resolve(database, table, &policy.rules);

    if policy.force_all {
        return Decided(Decision::Force, Rationale::ForcedByFlag);
    }

    if prior.is_some_and(|e| e.status == TaskStatus::Completed) {
        return Decided(Decision::NoOp, Rationale::AlreadyCompleted);
    }

    let prior_skip: Option<SkipReason> = prior
        .filter(|e| e.status == TaskStatus::Skipped)
        .and_then(|e| e.reason.as_deref())
        .and_then(|r| r.parse().ok());

    if let Some(res) = &resolution {
        match res.action() {
            RuleAction::Skip => {
                let reason = SkipReason::for_rule_source(res.source());
                if prior_skip == Some(reason) {
                    return Decided(Decision::NoOp, Rationale::StickySkip { reason });
                }
                return Decided(
                    Decision::Skip(reason),
                    Rationale::SkipRule {
                        source: res.source(),
                        pattern: res.rule.pattern.to_string(),
                    },
                );
            }
            RuleAction::Force => {
                return Decided(
                    Decision::Migrate,
                    Rationale::ForceRule {
                        pattern: res.rule.pattern.to_string(),
                    },
                );
            }
        }
    }

    if *category != Category::Reference {
        return Decided(Decision::Migrate, Rationale::Default);
    }

    let Some(rows) = row_count else {
        return Verdict::NeedsRowCount;
    };
    let threshold = policy.confirmation_threshold;

    if rows <= threshold {
        return Decided(Decision::Migrate, Rationale::BelowThreshold { rows, threshold });
    }

    if policy.auto_skip_large {
        if prior_skip == Some(SkipReason::AutoSkipLarge) {
            return Decided(
                Decision::NoOp,
                Rationale::StickySkip {
                    reason: SkipReason::AutoSkipLarge,
                },
            );
        }
        return Decided(
            Decision::Skip(SkipReason::AutoSkipLarge),
            Rationale::AutoSkippedLarge { rows, threshold },
        );
    }

    if prior_skip == Some(SkipReason::UserDeclined) {
        return Decided(Decision::Confirm, Rationale::PreviouslyDeclined { rows, threshold });
    }

    Decided(Decision::Confirm, Rationale::ExceedsThreshold { rows, threshold })
}

/// Decide what happens to one routine.
pub fn decide_routine(policy: &PlanPolicy, prior: Option<&RoutineEntry>) -> (Decision, Rationale) {
    if policy.force_all {
        return (Decision::Force, Rationale::ForcedByFlag);
    }
    if prior.is_some_and(|e| e.status == TaskStatus::Completed) {
        return (Decision::NoOp, Rationale::AlreadyCompleted);
    }
    (Decision::Migrate, Rationale::Default)
}
