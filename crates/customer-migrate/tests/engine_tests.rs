//! End-to-end runs of the engine against in-memory source and destination
//! databases.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use customer_migrate::core::{
    Batch, Column, ForeignKey, ReadOptions, RoutineDescriptor, RoutineKind, Row, RowFilter,
    SchemaSnapshot, SourceReader, SqlValue, TableDescriptor, TargetWriter,
};
use customer_migrate::routines::RoutineMigrator;
use customer_migrate::{
    Config, ConfirmPolicy, MigrateError, MigrationState, Orchestrator, Result, StateKey,
    StateStore, TaskStatus,
};

const DB: &str = "shop";
const CUSTOMER: i64 = 1001;
const OTHER_CUSTOMER: i64 = 2002;

// ============================================================================
// In-memory source
// ============================================================================

struct FakeSource {
    snapshot: SchemaSnapshot,
    rows: HashMap<String, Vec<Row>>,
    routines: Vec<(RoutineDescriptor, String)>,
}

fn column_index(table: &TableDescriptor, column: &str) -> usize {
    table
        .columns
        .iter()
        .position(|c| c.name.eq_ignore_ascii_case(column))
        .expect("column exists")
}

fn id_in(value: &SqlValue, ids: &HashSet<i64>) -> bool {
    value.as_i64().is_some_and(|v| ids.contains(&v))
}

impl FakeSource {
    fn select(&self, table: &TableDescriptor, filter: &RowFilter) -> Vec<Row> {
        let rows = self.rows.get(&table.name).cloned().unwrap_or_default();
        match filter {
            RowFilter::All => rows,
            RowFilter::ColumnIn { column, ids } => {
                let idx = column_index(table, column);
                let ids: HashSet<i64> = ids.iter().copied().collect();
                rows.into_iter().filter(|r| id_in(&r[idx], &ids)).collect()
            }
            RowFilter::ParentIn { join, ids } => {
                let parent = self.snapshot.table(&join.parent_table).expect("parent");
                let filter_idx = column_index(parent, &join.parent_filter_column);
                let key_idx = column_index(parent, &join.parent_column);
                let ids: HashSet<i64> = ids.iter().copied().collect();
                let keys: HashSet<i64> = self.rows[&parent.name]
                    .iter()
                    .filter(|r| id_in(&r[filter_idx], &ids))
                    .filter_map(|r| r[key_idx].as_i64())
                    .collect();
                let local_idx = column_index(table, &join.local_column);
                rows.into_iter()
                    .filter(|r| id_in(&r[local_idx], &keys))
                    .collect()
            }
        }
    }
}

#[async_trait]
impl SourceReader for FakeSource {
    async fn list_databases(&self) -> Result<Vec<String>> {
        Ok(vec![DB.to_string()])
    }

    async fn introspect(&self, _database: &str) -> Result<SchemaSnapshot> {
        Ok(self.snapshot.clone())
    }

    async fn list_routines(&self, _database: &str) -> Result<Vec<RoutineDescriptor>> {
        Ok(self.routines.iter().map(|(r, _)| r.clone()).collect())
    }

    async fn routine_definition(
        &self,
        _database: &str,
        routine: &RoutineDescriptor,
    ) -> Result<String> {
        Ok(self
            .routines
            .iter()
            .find(|(r, _)| r.name == routine.name)
            .map(|(_, def)| def.clone())
            .unwrap_or_default())
    }

    async fn count_rows(&self, table: &TableDescriptor, filter: &RowFilter) -> Result<i64> {
        Ok(self.select(table, filter).len() as i64)
    }

    fn read_table(&self, opts: ReadOptions) -> mpsc::Receiver<Result<Batch>> {
        let (tx, rx) = mpsc::channel(16);
        let rows = self.select(&opts.table, &opts.filter);
        let batch_size = opts.batch_size.max(1);

        tokio::spawn(async move {
            let chunks: Vec<Vec<Row>> = rows.chunks(batch_size).map(|c| c.to_vec()).collect();
            if chunks.is_empty() {
                let mut batch = Batch::new(Vec::new());
                batch.is_last = true;
                let _ = tx.send(Ok(batch)).await;
                return;
            }
            let count = chunks.len();
            for (i, chunk) in chunks.into_iter().enumerate() {
                let mut batch = Batch::new(chunk);
                batch.is_last = i + 1 == count;
                if tx.send(Ok(batch)).await.is_err() {
                    break;
                }
            }
        });

        rx
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn db_type(&self) -> &str {
        "fake"
    }

    async fn close(&self) {}
}

// ============================================================================
// In-memory destination
// ============================================================================

struct FakeTable {
    columns: Vec<String>,
    rows: Vec<Row>,
}

struct TargetState {
    tables: HashMap<String, FakeTable>,
    fk_checks: bool,
    fk_events: Vec<bool>,
    /// (table, foreign key checks enabled) per insert
    writes: Vec<(String, bool)>,
    routines: HashMap<String, String>,
    fail_tables: HashSet<String>,
    cancel_on: Option<(String, CancellationToken)>,
}

struct FakeTarget {
    state: Mutex<TargetState>,
}

impl FakeTarget {
    /// Empty copies of every source table.
    fn mirror(source: &FakeSource) -> Self {
        let tables = source
            .snapshot
            .tables
            .iter()
            .map(|t| {
                (
                    t.name.clone(),
                    FakeTable {
                        columns: t.column_names(),
                        rows: Vec::new(),
                    },
                )
            })
            .collect();
        Self {
            state: Mutex::new(TargetState {
                tables,
                fk_checks: true,
                fk_events: Vec::new(),
                writes: Vec::new(),
                routines: HashMap::new(),
                fail_tables: HashSet::new(),
                cancel_on: None,
            }),
        }
    }

    fn ids(&self, table: &str) -> Vec<i64> {
        let state = self.state.lock().unwrap();
        let mut ids: Vec<i64> = state.tables[table]
            .rows
            .iter()
            .filter_map(|r| r[0].as_i64())
            .collect();
        ids.sort_unstable();
        ids
    }

    fn row_count(&self, table: &str) -> usize {
        self.state.lock().unwrap().tables[table].rows.len()
    }

    fn total_rows(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.tables.values().map(|t| t.rows.len()).sum()
    }

    fn fk_events(&self) -> Vec<bool> {
        self.state.lock().unwrap().fk_events.clone()
    }

    fn writes(&self) -> Vec<(String, bool)> {
        self.state.lock().unwrap().writes.clone()
    }

    fn written_tables(&self) -> HashSet<String> {
        self.writes().into_iter().map(|(t, _)| t).collect()
    }

    fn clear_log(&self) {
        let mut state = self.state.lock().unwrap();
        state.writes.clear();
        state.fk_events.clear();
    }

    fn fail_on(&self, table: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_tables
            .insert(table.to_string());
    }

    fn heal(&self) {
        self.state.lock().unwrap().fail_tables.clear();
    }

    fn cancel_on(&self, table: &str, token: CancellationToken) {
        self.state.lock().unwrap().cancel_on = Some((table.to_string(), token));
    }

    fn drop_table(&self, table: &str) {
        self.state.lock().unwrap().tables.remove(table);
    }

    fn drop_column(&self, table: &str, column: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(t) = state.tables.get_mut(table) {
            t.columns.retain(|c| c != column);
        }
    }

    fn routine(&self, name: &str) -> Option<String> {
        self.state.lock().unwrap().routines.get(name).cloned()
    }
}

#[async_trait]
impl TargetWriter for FakeTarget {
    async fn table_columns(&self, _database: &str, table: &str) -> Result<Option<Vec<String>>> {
        let state = self.state.lock().unwrap();
        Ok(state.tables.get(table).map(|t| t.columns.clone()))
    }

    async fn set_foreign_key_checks(&self, enabled: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.fk_checks = enabled;
        state.fk_events.push(enabled);
        Ok(())
    }

    async fn insert_ignore(
        &self,
        _database: &str,
        table: &str,
        _columns: &[String],
        batch: Batch,
    ) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        if state.fail_tables.contains(table) {
            return Err(MigrateError::pool(
                "simulated write failure",
                "INSERT IGNORE batch",
            ));
        }

        let fk_checks = state.fk_checks;
        state.writes.push((table.to_string(), fk_checks));
        if let Some((name, token)) = &state.cancel_on {
            if name == table {
                token.cancel();
            }
        }

        let target = state
            .tables
            .get_mut(table)
            .ok_or_else(|| MigrateError::copy(table, "no such table"))?;
        let mut inserted = 0;
        for row in batch.rows {
            if target.rows.iter().any(|r| r[0] == row[0]) {
                continue;
            }
            target.rows.push(row);
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn replace_routine(
        &self,
        _database: &str,
        routine: &RoutineDescriptor,
        create_statement: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .routines
            .insert(routine.name.clone(), create_statement.to_string());
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn db_type(&self) -> &str {
        "fake"
    }

    async fn close(&self) {}
}

// ============================================================================
// Fixture
// ============================================================================

fn table(name: &str, columns: &[&str]) -> TableDescriptor {
    let mut t = TableDescriptor::new(DB, name);
    t.columns = columns.iter().map(|c| Column::new(*c, "int")).collect();
    t.primary_key = vec!["id".to_string()];
    t
}

fn row(values: Vec<SqlValue>) -> Row {
    values
}

/// Phase 1: accounts, invoices, profiles. Phase 1B: sessions.
/// Phase 1C: orders (via accounts). Phase 2: audit_log (500 rows), countries.
fn fixture() -> FakeSource {
    let mut orders = table("orders", &["id", "account_id", "total"]);
    orders.foreign_keys = vec![ForeignKey::declared("account_id", "accounts", "id")];

    let snapshot = SchemaSnapshot::new(
        DB,
        vec![
            table("sessions", &["id", "user_id", "token"]),
            table("accounts", &["id", "customer_id", "name"]),
            table("audit_log", &["id", "message"]),
            table("countries", &["id", "code"]),
            table("invoices", &["id", "customer_id", "amount"]),
            orders,
            table("profiles", &["id", "customer_id", "bio"]),
        ],
    );

    let mut rows = HashMap::new();
    rows.insert(
        "accounts".to_string(),
        vec![
            row(vec![1.into(), CUSTOMER.into(), "alpha".into()]),
            row(vec![2.into(), CUSTOMER.into(), "beta".into()]),
            row(vec![3.into(), OTHER_CUSTOMER.into(), "gamma".into()]),
        ],
    );
    rows.insert(
        "orders".to_string(),
        vec![
            row(vec![10.into(), 1.into(), 100.into()]),
            row(vec![11.into(), 2.into(), 200.into()]),
            row(vec![12.into(), 3.into(), 300.into()]),
            row(vec![13.into(), 1.into(), 400.into()]),
            row(vec![14.into(), SqlValue::Null, 500.into()]),
        ],
    );
    rows.insert(
        "invoices".to_string(),
        vec![
            row(vec![100.into(), CUSTOMER.into(), 5.into()]),
            row(vec![101.into(), OTHER_CUSTOMER.into(), 6.into()]),
        ],
    );
    rows.insert(
        "profiles".to_string(),
        vec![
            row(vec![200.into(), CUSTOMER.into(), "a".into()]),
            row(vec![201.into(), CUSTOMER.into(), "b".into()]),
            row(vec![202.into(), OTHER_CUSTOMER.into(), "c".into()]),
        ],
    );
    rows.insert(
        "sessions".to_string(),
        vec![
            row(vec![1.into(), 1.into(), "t1".into()]),
            row(vec![2.into(), 2.into(), "t2".into()]),
            row(vec![3.into(), 3.into(), "t3".into()]),
        ],
    );
    rows.insert(
        "countries".to_string(),
        vec![
            row(vec![1.into(), "NZ".into()]),
            row(vec![2.into(), "DE".into()]),
            row(vec![3.into(), "JP".into()]),
        ],
    );
    rows.insert(
        "audit_log".to_string(),
        (1..=500i64)
            .map(|i| row(vec![i.into(), format!("event {}", i).into()]))
            .collect(),
    );

    FakeSource {
        snapshot,
        rows,
        routines: vec![(
            RoutineDescriptor::new("refresh_totals", RoutineKind::Procedure),
            "CREATE PROCEDURE refresh_totals() BEGIN END".to_string(),
        )],
    }
}

fn config(state_dir: &Path) -> Config {
    let mut config = Config::default();
    config.migration.databases = vec![DB.to_string()];
    config.migration.customer_ids = vec![CUSTOMER];
    config.migration.batch_size = 2;
    config.migration.state_directory = state_dir.to_path_buf();
    config
}

fn orchestrator(
    config: Config,
    source: &Arc<FakeSource>,
    target: &Arc<FakeTarget>,
    policy: ConfirmPolicy,
) -> Orchestrator {
    Orchestrator::with_drivers(config, source.clone(), target.clone(), Arc::new(policy))
}

fn setup() -> (Arc<FakeSource>, Arc<FakeTarget>) {
    let source = fixture();
    let target = FakeTarget::mirror(&source);
    (Arc::new(source), Arc::new(target))
}

fn state_path(dir: &Path) -> std::path::PathBuf {
    StateStore::path_for(dir, &StateKey::new(&[CUSTOMER]).unwrap())
}

fn load_state(dir: &Path) -> MigrationState {
    MigrationState::load(state_path(dir)).unwrap()
}

// ============================================================================
// Runs
// ============================================================================

#[tokio::test]
async fn test_run_copies_customer_subset() {
    let dir = tempfile::tempdir().unwrap();
    let (source, target) = setup();
    let orch = orchestrator(config(dir.path()), &source, &target, ConfirmPolicy::AlwaysAccept);

    let result = orch.run(&CancellationToken::new(), false).await.unwrap();

    assert!(result.is_success());
    assert_eq!(result.status, "completed");
    assert_eq!(target.ids("accounts"), vec![1, 2]);
    assert_eq!(target.ids("invoices"), vec![100]);
    assert_eq!(target.ids("profiles"), vec![200, 201]);
    assert_eq!(target.ids("sessions"), vec![1, 2]);
    assert_eq!(target.ids("orders"), vec![10, 11, 13]);
    assert_eq!(target.row_count("countries"), 3);
    assert_eq!(target.row_count("audit_log"), 500);
    assert!(target.routine("refresh_totals").is_some());

    let state = load_state(dir.path());
    let accounts = state.table(DB, "accounts").unwrap();
    assert_eq!(accounts.status, TaskStatus::Completed);
    assert_eq!(accounts.rows, 2);
    let routine = state.routine(DB, "refresh_totals").unwrap();
    assert_eq!(routine.kind, RoutineKind::Procedure);
    assert_eq!(routine.status, TaskStatus::Completed);
    assert_eq!(result.tables_completed, 7);
    assert_eq!(result.rows_copied, 2 + 1 + 2 + 2 + 3 + 3 + 500);
}

#[tokio::test]
async fn test_indirect_rows_equal_join() {
    let dir = tempfile::tempdir().unwrap();
    let (source, target) = setup();
    let orch = orchestrator(config(dir.path()), &source, &target, ConfirmPolicy::AlwaysDecline);
    orch.run(&CancellationToken::new(), false).await.unwrap();

    // independently: orders whose account belongs to the customer
    let accounts: HashSet<i64> = source.rows["accounts"]
        .iter()
        .filter(|r| r[1].as_i64() == Some(CUSTOMER))
        .filter_map(|r| r[0].as_i64())
        .collect();
    let mut expected: Vec<i64> = source.rows["orders"]
        .iter()
        .filter(|r| r[1].as_i64().is_some_and(|a| accounts.contains(&a)))
        .filter_map(|r| r[0].as_i64())
        .collect();
    expected.sort_unstable();

    assert_eq!(target.ids("orders"), expected);
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let (source, target) = setup();

    let orch = orchestrator(config(dir.path()), &source, &target, ConfirmPolicy::AlwaysAccept);
    orch.run(&CancellationToken::new(), false).await.unwrap();
    let first: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(state_path(dir.path())).unwrap()).unwrap();
    let rows_after_first = target.total_rows();
    target.clear_log();

    let orch = orchestrator(config(dir.path()), &source, &target, ConfirmPolicy::AlwaysAccept);
    let result = orch.run(&CancellationToken::new(), false).await.unwrap();
    let second: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(state_path(dir.path())).unwrap()).unwrap();

    let strip = |mut v: serde_json::Value| {
        v.as_object_mut().unwrap().remove("updated_at");
        v
    };
    assert_eq!(strip(first), strip(second));
    assert_eq!(target.total_rows(), rows_after_first);
    assert!(target.writes().is_empty());
    assert!(target.fk_events().is_empty());
    assert_eq!(result.tables_completed, 0);
    assert_eq!(result.databases[0].tables_unchanged, 7);
}

#[tokio::test]
async fn test_unknown_database_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let (source, target) = setup();
    let mut config = config(dir.path());
    config.migration.databases = vec!["archive".to_string(), DB.to_string()];

    let orch = orchestrator(config, &source, &target, ConfirmPolicy::AlwaysAccept);
    assert_eq!(orch.databases().await.unwrap(), vec![DB.to_string()]);

    let result = orch.run(&CancellationToken::new(), false).await.unwrap();
    assert_eq!(result.databases.len(), 1);
    assert_eq!(result.databases[0].database, DB);
    assert_eq!(target.row_count("audit_log"), 500);
}

#[tokio::test]
async fn test_cli_force_beats_config_skip() {
    let dir = tempfile::tempdir().unwrap();
    let (source, target) = setup();
    let mut config = config(dir.path());
    config.migration.skip_tables = vec!["*.AUDIT_LOG".to_string()];
    config.migration.overrides.force_tables = vec!["AUDIT_LOG".to_string()];

    let orch = orchestrator(config, &source, &target, ConfirmPolicy::AlwaysDecline);
    orch.run(&CancellationToken::new(), false).await.unwrap();

    let entry = load_state(dir.path()).table(DB, "audit_log").cloned().unwrap();
    assert_eq!(entry.status, TaskStatus::Completed);
    assert_eq!(target.row_count("audit_log"), 500);
}

#[tokio::test]
async fn test_force_tables_beats_more_specific_skip_tables() {
    let dir = tempfile::tempdir().unwrap();
    let (source, target) = setup();
    let mut config = config(dir.path());
    config.migration.overrides.force_tables = vec!["audit_log".to_string()];
    config.migration.overrides.skip_tables =
        vec!["*.audit_log".to_string(), "shop.*".to_string()];

    let orch = orchestrator(config, &source, &target, ConfirmPolicy::AlwaysDecline);
    orch.run(&CancellationToken::new(), false).await.unwrap();

    let state = load_state(dir.path());
    let audit = state.table(DB, "audit_log").cloned().unwrap();
    assert_eq!(audit.status, TaskStatus::Completed);
    assert_eq!(target.row_count("audit_log"), 500);

    let countries = state.table(DB, "countries").cloned().unwrap();
    assert_eq!(countries.status, TaskStatus::Skipped);
    assert_eq!(countries.reason.as_deref(), Some("cli_skip_tables"));
    assert_eq!(target.row_count("countries"), 0);
}

#[tokio::test]
async fn test_large_reference_table_auto_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let (source, target) = setup();
    let mut config = config(dir.path());
    config.migration.auto_skip_large = true;

    let orch = orchestrator(config.clone(), &source, &target, ConfirmPolicy::AlwaysAccept);
    orch.run(&CancellationToken::new(), false).await.unwrap();

    let entry = load_state(dir.path()).table(DB, "audit_log").cloned().unwrap();
    assert_eq!(entry.status, TaskStatus::Skipped);
    assert_eq!(entry.reason.as_deref(), Some("auto_skip_large"));
    assert_eq!(entry.rows, 0);
    assert_eq!(target.row_count("audit_log"), 0);
    assert_eq!(target.row_count("countries"), 3);

    // still over threshold with auto-skip on: sticky, entry untouched
    let orch = orchestrator(config, &source, &target, ConfirmPolicy::AlwaysAccept);
    orch.run(&CancellationToken::new(), false).await.unwrap();
    let again = load_state(dir.path()).table(DB, "audit_log").cloned().unwrap();
    assert_eq!(again.timestamp, entry.timestamp);
    assert_eq!(target.row_count("audit_log"), 0);
}

#[tokio::test]
async fn test_declined_table_offered_again() {
    let dir = tempfile::tempdir().unwrap();
    let (source, target) = setup();

    let orch = orchestrator(config(dir.path()), &source, &target, ConfirmPolicy::AlwaysDecline);
    orch.run(&CancellationToken::new(), false).await.unwrap();
    let entry = load_state(dir.path()).table(DB, "audit_log").cloned().unwrap();
    assert_eq!(entry.status, TaskStatus::Skipped);
    assert_eq!(entry.reason.as_deref(), Some("user_declined"));

    let orch = orchestrator(config(dir.path()), &source, &target, ConfirmPolicy::AlwaysAccept);
    orch.run(&CancellationToken::new(), false).await.unwrap();
    let entry = load_state(dir.path()).table(DB, "audit_log").cloned().unwrap();
    assert_eq!(entry.status, TaskStatus::Completed);
    assert_eq!(entry.reason, None);
    assert_eq!(target.row_count("audit_log"), 500);
}

#[tokio::test]
async fn test_resume_after_failure() {
    let dir = tempfile::tempdir().unwrap();
    let (source, target) = setup();
    target.fail_on("invoices");

    let orch = orchestrator(config(dir.path()), &source, &target, ConfirmPolicy::AlwaysAccept);
    let result = orch.run(&CancellationToken::new(), false).await.unwrap();
    assert!(!result.is_success());
    assert_eq!(result.status, "incomplete");
    assert_eq!(result.failed_tables, vec!["shop.invoices"]);

    let first = load_state(dir.path());
    let failed = first.table(DB, "invoices").unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert!(failed.reason.as_deref().unwrap().contains("simulated write failure"));
    assert!(failed.reason.as_deref().unwrap().chars().count() <= 100);

    target.heal();
    target.clear_log();
    let orch = orchestrator(config(dir.path()), &source, &target, ConfirmPolicy::AlwaysAccept);
    let result = orch.run(&CancellationToken::new(), false).await.unwrap();
    assert!(result.is_success());

    let second = load_state(dir.path());
    assert_eq!(
        second.table(DB, "invoices").unwrap().status,
        TaskStatus::Completed
    );
    for name in ["accounts", "profiles", "sessions", "orders", "countries"] {
        assert_eq!(
            second.table(DB, name).unwrap().timestamp,
            first.table(DB, name).unwrap().timestamp,
            "{} was rewritten",
            name
        );
    }
    assert_eq!(
        target.written_tables(),
        HashSet::from(["invoices".to_string()])
    );
}

#[tokio::test]
async fn test_foreign_key_checks_suspended_once() {
    let dir = tempfile::tempdir().unwrap();
    let (source, target) = setup();
    target.fail_on("profiles");

    let orch = orchestrator(config(dir.path()), &source, &target, ConfirmPolicy::AlwaysAccept);
    orch.run(&CancellationToken::new(), false).await.unwrap();

    assert_eq!(target.fk_events(), vec![false, true]);
    for (table, fk_checks) in target.writes() {
        let dependent = ["accounts", "invoices", "profiles", "sessions", "orders"]
            .contains(&table.as_str());
        assert_eq!(fk_checks, !dependent, "{} written with checks={}", table, fk_checks);
    }
}

#[tokio::test]
async fn test_missing_destination_table_is_recorded_failed() {
    let dir = tempfile::tempdir().unwrap();
    let (source, target) = setup();
    target.drop_table("profiles");
    target.drop_column("invoices", "amount");

    let orch = orchestrator(config(dir.path()), &source, &target, ConfirmPolicy::AlwaysAccept);
    let result = orch.run(&CancellationToken::new(), false).await.unwrap();

    let state = load_state(dir.path());
    let profiles = state.table(DB, "profiles").unwrap();
    assert_eq!(profiles.status, TaskStatus::Failed);
    assert!(profiles.reason.as_deref().unwrap().contains("does not exist"));
    let invoices = state.table(DB, "invoices").unwrap();
    assert_eq!(invoices.status, TaskStatus::Failed);
    assert!(invoices.reason.as_deref().unwrap().contains("amount"));

    assert_eq!(result.tables_failed, 2);
    assert_eq!(state.table(DB, "orders").unwrap().status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_cancellation_records_interrupted() {
    let dir = tempfile::tempdir().unwrap();
    let (source, target) = setup();
    let cancel = CancellationToken::new();
    target.cancel_on("accounts", cancel.clone());

    let mut config = config(dir.path());
    config.migration.batch_size = 1;
    let orch = orchestrator(config, &source, &target, ConfirmPolicy::AlwaysAccept);
    let err = orch.run(&cancel, false).await.unwrap_err();
    assert!(matches!(err, MigrateError::Cancelled));

    let state = load_state(dir.path());
    let accounts = state.table(DB, "accounts").unwrap();
    assert_eq!(accounts.status, TaskStatus::Failed);
    assert_eq!(accounts.reason.as_deref(), Some("interrupted"));
    assert!(state.table(DB, "invoices").is_none());
    assert_eq!(target.fk_events(), vec![false, true]);

    // the lock is released with the run
    assert!(StateStore::open(dir.path(), &StateKey::new(&[CUSTOMER]).unwrap()).is_ok());
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (source, target) = setup();
    let orch = orchestrator(config(dir.path()), &source, &target, ConfirmPolicy::AlwaysAccept);

    let result = orch.run(&CancellationToken::new(), true).await.unwrap();

    assert_eq!(result.status, "dry_run");
    assert_eq!(result.plans.len(), 1);
    assert_eq!(result.plans[0].items.len(), 8);
    assert!(!state_path(dir.path()).exists());
    assert_eq!(target.total_rows(), 0);
    assert!(target.fk_events().is_empty());
}

#[tokio::test]
async fn test_strict_rules_reject_conflicts_before_copy() {
    let dir = tempfile::tempdir().unwrap();
    let (source, target) = setup();
    let mut config = config(dir.path());
    config.migration.skip_tables = vec!["*.countries".to_string()];
    config.migration.force_rules = vec!["*.countries".to_string()];

    let orch = orchestrator(config.clone(), &source, &target, ConfirmPolicy::AlwaysAccept);
    let plans = orch.plan().await.unwrap();
    assert_eq!(plans[0].conflicts.len(), 1);

    config.migration.strict_rules = true;
    let orch = orchestrator(config, &source, &target, ConfirmPolicy::AlwaysAccept);
    let err = orch.run(&CancellationToken::new(), false).await.unwrap_err();
    assert!(matches!(err, MigrateError::Config(_)));
    assert_eq!(target.total_rows(), 0);
    assert!(!state_path(dir.path()).exists());
}

#[tokio::test]
async fn test_second_run_on_same_ids_is_locked_out() {
    let dir = tempfile::tempdir().unwrap();
    let (source, target) = setup();
    let _held = StateStore::open(dir.path(), &StateKey::new(&[CUSTOMER]).unwrap()).unwrap();

    let orch = orchestrator(config(dir.path()), &source, &target, ConfirmPolicy::AlwaysAccept);
    let err = orch.run(&CancellationToken::new(), false).await.unwrap_err();
    assert!(matches!(err, MigrateError::State(_)));
    assert_eq!(target.total_rows(), 0);
}

// ============================================================================
// Routines
// ============================================================================

#[tokio::test]
async fn test_migrate_routines_continues_past_failures() {
    let mut source = fixture();
    source.routines.push((
        RoutineDescriptor::new("hidden_fn", RoutineKind::Function),
        String::new(),
    ));
    let target = Arc::new(FakeTarget::mirror(&source));
    let source = Arc::new(source);

    let migrator = RoutineMigrator::new(source, target.clone());
    let outcomes = migrator.migrate_routines(DB).await.unwrap();

    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].status, TaskStatus::Completed);
    assert_eq!(outcomes[1].name, "hidden_fn");
    assert_eq!(outcomes[1].status, TaskStatus::Failed);
    assert!(outcomes[1].error.as_deref().unwrap().contains("empty definition"));
    assert_eq!(
        target.routine("refresh_totals").as_deref(),
        Some("CREATE PROCEDURE refresh_totals() BEGIN END")
    );
    assert!(target.routine("hidden_fn").is_none());
}

#[tokio::test]
async fn test_health_check() {
    let (source, target) = setup();
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(config(dir.path()), &source, &target, ConfirmPolicy::AlwaysAccept);

    let health = orch.health_check().await;
    assert!(health.healthy);
    assert!(health.source_connected && health.target_connected);
}
