use super::*;
use crate::classify::classify_snapshot;
use crate::confirm::ConfirmPolicy;
use crate::core::{Column, ForeignKey, RoutineKind, TableDescriptor};
use crate::rules::{Rule, RuleAction, RuleSource};
use crate::state::TaskStatus;

fn table(name: &str, columns: &[&str]) -> TableDescriptor {
    let mut t = TableDescriptor::new("app", name);
    t.columns = columns.iter().map(|c| Column::new(*c, "int")).collect();
    t.primary_key = vec!["id".into()];
    t
}

fn snapshot() -> SchemaSnapshot {
    let mut grants = table("grants", &["id", "role_id"]);
    grants.foreign_keys.push(ForeignKey::declared("role_id", "roles", "id"));
    SchemaSnapshot::new(
        "app",
        vec![
            table("audit_log", &["id", "message"]),
            table("countries", &["id", "name"]),
            grants,
            table("roles", &["id", "customer_id"]),
            table("sessions", &["id", "user_id"]),
        ],
    )
}

fn rule(p: &str, action: RuleAction, source: RuleSource) -> Rule {
    Rule::parse(p, action, source).unwrap()
}

struct Fixture {
    snapshot: SchemaSnapshot,
    classification: ClassificationMap,
    routines: Vec<RoutineDescriptor>,
    counts: HashMap<String, i64>,
    policy: PlanPolicy,
}

impl Fixture {
    fn new() -> Self {
        let snapshot = snapshot();
        let classification = classify_snapshot(&snapshot);
        let mut counts = HashMap::new();
        counts.insert("audit_log".to_string(), 500);
        counts.insert("countries".to_string(), 20);
        Self {
            snapshot,
            classification,
            routines: vec![RoutineDescriptor::new("calc_total", RoutineKind::Function)],
            counts,
            policy: PlanPolicy::default(),
        }
    }

    fn plan(&self, state: &MigrationState) -> Plan {
        plan(
            PlanInputs {
                snapshot: &self.snapshot,
                classification: &self.classification,
                routines: &self.routines,
                row_counts: &self.counts,
                policy: &self.policy,
            },
            state,
        )
    }
}

fn item<'a>(plan: &'a Plan, name: &str) -> &'a PlanItem {
    plan.items.iter().find(|i| i.name() == name).unwrap()
}

#[test]
fn test_phases_in_order() {
    let fx = Fixture::new();
    let plan = fx.plan(&MigrationState::new());
    let order: Vec<(&str, Phase)> = plan.items.iter().map(|i| (i.name(), i.phase)).collect();
    assert_eq!(
        order,
        vec![
            ("calc_total", Phase::Routines),
            ("roles", Phase::DirectCustomer),
            ("sessions", Phase::DirectUser),
            ("grants", Phase::IndirectFk),
            ("audit_log", Phase::Reference),
            ("countries", Phase::Reference),
        ]
    );
}

#[test]
fn test_routines_not_planned_when_disabled() {
    let mut fx = Fixture::new();
    fx.policy.migrate_routines = false;
    let plan = fx.plan(&MigrationState::new());
    assert_eq!(plan.phase(Phase::Routines).count(), 0);
}

#[test]
fn test_default_decisions() {
    let fx = Fixture::new();
    let plan = fx.plan(&MigrationState::new());
    assert_eq!(item(&plan, "roles").decision, Decision::Migrate);
    assert_eq!(item(&plan, "countries").decision, Decision::Migrate);
    assert_eq!(
        item(&plan, "countries").rationale,
        Rationale::BelowThreshold {
            rows: 20,
            threshold: 400
        }
    );
    assert_eq!(item(&plan, "audit_log").decision, Decision::Confirm);
    assert!(plan.writes_with_foreign_keys_suspended());
}

#[test]
fn test_cli_force_beats_config_skip() {
    let mut fx = Fixture::new();
    fx.policy.rules = vec![
        rule("*.audit_log", RuleAction::Skip, RuleSource::Config),
        rule("audit_log", RuleAction::Force, RuleSource::Cli),
    ];
    let plan = fx.plan(&MigrationState::new());
    let audit = item(&plan, "audit_log");
    assert_eq!(audit.decision, Decision::Force);
    assert_eq!(
        audit.rationale,
        Rationale::ForcedByTablesFlag {
            pattern: "audit_log".into()
        }
    );
}

#[test]
fn test_cli_force_beats_more_specific_cli_skip() {
    let mut fx = Fixture::new();
    fx.policy.rules = vec![
        rule("audit_log", RuleAction::Force, RuleSource::Cli),
        rule("*.audit_log", RuleAction::Skip, RuleSource::Cli),
        rule("app.*", RuleAction::Skip, RuleSource::Cli),
    ];
    let mut state = MigrationState::new();
    state.set_table("app", "audit_log", TaskStatus::Completed, 500, None);
    let plan = fx.plan(&state);

    let audit = item(&plan, "audit_log");
    assert_eq!(audit.decision, Decision::Force);
    assert_eq!(
        audit.rationale,
        Rationale::ForcedByTablesFlag {
            pattern: "audit_log".into()
        }
    );
    assert_eq!(
        item(&plan, "countries").decision,
        Decision::Skip(SkipReason::CliSkipTables)
    );
}

#[test]
fn test_cli_force_beats_completed_state() {
    let mut fx = Fixture::new();
    fx.policy.rules = vec![rule("roles", RuleAction::Force, RuleSource::Cli)];
    let mut state = MigrationState::new();
    state.set_table("app", "roles", TaskStatus::Completed, 3, None);
    let plan = fx.plan(&state);
    assert_eq!(item(&plan, "roles").decision, Decision::Force);
}

#[test]
fn test_force_all_redoes_completed_units() {
    let mut fx = Fixture::new();
    fx.policy.force_all = true;
    let mut state = MigrationState::new();
    state.set_table("app", "roles", TaskStatus::Completed, 3, None);
    state.set_routine("app", "calc_total", RoutineKind::Function, TaskStatus::Completed);
    let plan = fx.plan(&state);
    assert!(plan.items.iter().all(|i| i.decision == Decision::Force));
}

#[test]
fn test_completed_is_noop() {
    let fx = Fixture::new();
    let mut state = MigrationState::new();
    state.set_table("app", "roles", TaskStatus::Completed, 3, None);
    state.set_routine("app", "calc_total", RoutineKind::Function, TaskStatus::Completed);
    let plan = fx.plan(&state);
    assert_eq!(item(&plan, "roles").decision, Decision::NoOp);
    assert_eq!(item(&plan, "roles").rationale, Rationale::AlreadyCompleted);
    assert_eq!(item(&plan, "calc_total").decision, Decision::NoOp);
}

#[test]
fn test_failed_is_replanned() {
    let fx = Fixture::new();
    let mut state = MigrationState::new();
    state.set_table("app", "roles", TaskStatus::Failed, 0, Some("Duplicate entry"));
    let plan = fx.plan(&state);
    assert_eq!(item(&plan, "roles").decision, Decision::Migrate);
}

#[test]
fn test_skip_rules_and_reasons() {
    let mut fx = Fixture::new();
    fx.policy.rules = vec![
        rule("app.sessions", RuleAction::Skip, RuleSource::Config),
        rule("roles", RuleAction::Skip, RuleSource::Cli),
    ];
    let plan = fx.plan(&MigrationState::new());
    assert_eq!(
        item(&plan, "sessions").decision,
        Decision::Skip(SkipReason::EnvSkipTables)
    );
    assert_eq!(
        item(&plan, "roles").decision,
        Decision::Skip(SkipReason::CliSkipTables)
    );
}

#[test]
fn test_rule_skip_is_sticky() {
    let mut fx = Fixture::new();
    fx.policy.rules = vec![rule("*.sessions", RuleAction::Skip, RuleSource::Config)];
    let mut state = MigrationState::new();
    state.set_table("app", "sessions", TaskStatus::Skipped, 0, Some("env_skip_tables"));
    let plan = fx.plan(&state);
    assert_eq!(item(&plan, "sessions").decision, Decision::NoOp);
    assert_eq!(
        item(&plan, "sessions").rationale,
        Rationale::StickySkip {
            reason: SkipReason::EnvSkipTables
        }
    );
}

#[test]
fn test_stale_skip_is_replanned() {
    let fx = Fixture::new();
    let mut state = MigrationState::new();
    state.set_table("app", "sessions", TaskStatus::Skipped, 0, Some("env_skip_tables"));
    let plan = fx.plan(&state);
    assert_eq!(item(&plan, "sessions").decision, Decision::Migrate);
}

#[test]
fn test_auto_skip_large() {
    let mut fx = Fixture::new();
    fx.policy.auto_skip_large = true;
    let plan = fx.plan(&MigrationState::new());
    let audit = item(&plan, "audit_log");
    assert_eq!(audit.decision, Decision::Skip(SkipReason::AutoSkipLarge));
    assert_eq!(
        audit.rationale,
        Rationale::AutoSkippedLarge {
            rows: 500,
            threshold: 400
        }
    );
    assert_eq!(plan.pending_confirmations(), 0);
}

#[test]
fn test_auto_skip_is_sticky_while_still_large() {
    let mut fx = Fixture::new();
    fx.policy.auto_skip_large = true;
    let mut state = MigrationState::new();
    state.set_table("app", "audit_log", TaskStatus::Skipped, 0, Some("auto_skip_large"));
    assert_eq!(item(&fx.plan(&state), "audit_log").decision, Decision::NoOp);

    fx.counts.insert("audit_log".into(), 10);
    assert_eq!(item(&fx.plan(&state), "audit_log").decision, Decision::Migrate);
}

#[test]
fn test_config_force_rule_bypasses_threshold() {
    let mut fx = Fixture::new();
    fx.policy.rules = vec![rule("*.audit_log", RuleAction::Force, RuleSource::Config)];
    let plan = fx.plan(&MigrationState::new());
    assert_eq!(item(&plan, "audit_log").decision, Decision::Migrate);
    assert!(matches!(
        item(&plan, "audit_log").rationale,
        Rationale::ForceRule { .. }
    ));
}

#[test]
fn test_config_force_rule_respects_completed_state() {
    let mut fx = Fixture::new();
    fx.policy.rules = vec![rule("*.audit_log", RuleAction::Force, RuleSource::Config)];
    let mut state = MigrationState::new();
    state.set_table("app", "audit_log", TaskStatus::Completed, 500, None);
    assert_eq!(item(&fx.plan(&state), "audit_log").decision, Decision::NoOp);
}

#[test]
fn test_declined_table_is_offered_again() {
    let fx = Fixture::new();
    let mut state = MigrationState::new();
    state.set_table("app", "audit_log", TaskStatus::Skipped, 0, Some("user_declined"));
    let plan = fx.plan(&state);
    let audit = item(&plan, "audit_log");
    assert_eq!(audit.decision, Decision::Confirm);
    assert_eq!(
        audit.rationale,
        Rationale::PreviouslyDeclined {
            rows: 500,
            threshold: 400
        }
    );
}

#[test]
fn test_resolve_confirmations() {
    let fx = Fixture::new();

    let mut plan = fx.plan(&MigrationState::new());
    plan.resolve_confirmations(&ConfirmPolicy::AlwaysDecline).unwrap();
    let audit = item(&plan, "audit_log");
    assert_eq!(audit.decision, Decision::Skip(SkipReason::UserDeclined));
    assert_eq!(audit.rationale, Rationale::DeclinedByOperator);

    let mut plan = fx.plan(&MigrationState::new());
    plan.resolve_confirmations(&ConfirmPolicy::AcceptUpTo(1000)).unwrap();
    assert_eq!(item(&plan, "audit_log").decision, Decision::Force);
    assert_eq!(plan.pending_confirmations(), 0);
}

#[test]
fn test_missing_row_count_asks_operator() {
    let mut fx = Fixture::new();
    fx.counts.clear();
    let plan = fx.plan(&MigrationState::new());
    let countries = item(&plan, "countries");
    assert_eq!(countries.decision, Decision::Confirm);
    assert_eq!(countries.rationale, Rationale::RowCountUnavailable);
}

#[test]
fn test_tables_needing_row_counts() {
    let mut fx = Fixture::new();
    let mut state = MigrationState::new();
    state.set_table("app", "countries", TaskStatus::Completed, 20, None);
    let needed = tables_needing_row_counts(&fx.snapshot, &fx.classification, &fx.policy, &state);
    assert_eq!(needed, vec!["audit_log".to_string()]);

    fx.policy.rules = vec![rule("audit_log", RuleAction::Skip, RuleSource::Cli)];
    let needed = tables_needing_row_counts(&fx.snapshot, &fx.classification, &fx.policy, &state);
    assert!(needed.is_empty());
}

#[test]
fn test_conflicts_listed_in_plan() {
    let mut fx = Fixture::new();
    fx.policy.rules = vec![
        rule("*.countries", RuleAction::Skip, RuleSource::Config),
        rule("*.countries", RuleAction::Force, RuleSource::Config),
    ];
    let plan = fx.plan(&MigrationState::new());
    assert_eq!(plan.conflicts.len(), 1);
    assert_eq!(plan.conflicts[0].table, "countries");
    assert_eq!(
        item(&plan, "countries").decision,
        Decision::Skip(SkipReason::EnvSkipTables)
    );
}

#[test]
fn test_reference_only_plan_keeps_foreign_keys_on() {
    let mut fx = Fixture::new();
    let mut state = MigrationState::new();
    for t in ["roles", "sessions", "grants"] {
        state.set_table("app", t, TaskStatus::Completed, 1, None);
    }
    fx.policy.migrate_routines = false;
    assert!(!fx.plan(&state).writes_with_foreign_keys_suspended());
}
