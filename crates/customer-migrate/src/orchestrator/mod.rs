//! Migration orchestrator - main workflow coordinator.
//!
//! A run plans every database up front (introspection, classification, row
//! counts, rule resolution), settles confirmations, then executes each
//! database phase by phase. The state file is rewritten after every unit.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::classify::{classify_snapshot, detect_implicit_foreign_keys, Category};
use crate::config::Config;
use crate::confirm::Confirmer;
use crate::copier::{row_filter, DataCopier, ForeignKeyChecksGuard};
use crate::core::{RowFilter, SchemaSnapshot, SourceReader, TargetWriter};
use crate::drivers::{MysqlSource, MysqlTarget};
use crate::error::{MigrateError, Result};
use crate::planner::{
    self, tables_needing_row_counts, Decision, Phase, Plan, PlanInputs, PlanItem, PlanPolicy,
    SkipReason, Unit,
};
use crate::routines::RoutineMigrator;
use crate::state::{MigrationState, StateKey, StateStore, TaskStatus, REASON_INTERRUPTED};

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    source: Arc<dyn SourceReader>,
    target: Arc<dyn TargetWriter>,
    confirmer: Arc<dyn Confirmer>,
}

/// Per-database totals of a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DatabaseSummary {
    pub database: String,
    pub tables_completed: usize,
    pub tables_skipped: usize,
    pub tables_failed: usize,
    /// Tables left untouched (already completed, sticky skips).
    pub tables_unchanged: usize,
    pub routines_completed: usize,
    pub routines_failed: usize,
    /// Rows inserted on the destination.
    pub rows_copied: u64,
    pub failed_tables: Vec<String>,
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status: `completed`, `incomplete` or `dry_run`.
    pub status: String,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// When the migration started.
    pub started_at: DateTime<Utc>,

    /// When the migration completed.
    pub completed_at: DateTime<Utc>,

    /// Sorted customer ids of the run.
    pub customer_ids: Vec<i64>,

    /// State file of the run.
    pub state_file: PathBuf,

    pub databases: Vec<DatabaseSummary>,

    pub tables_completed: usize,
    pub tables_skipped: usize,
    pub tables_failed: usize,
    pub routines_failed: usize,

    /// Total rows inserted on the destination.
    pub rows_copied: u64,

    /// Failed tables as `db.table`.
    pub failed_tables: Vec<String>,

    /// Plans, filled for dry runs.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub plans: Vec<Plan>,
}

impl MigrationResult {
    /// Whether every planned unit ended completed or skipped.
    pub fn is_success(&self) -> bool {
        self.tables_failed == 0 && self.routines_failed == 0
    }

    /// Number of failed tables and routines.
    pub fn failed_units(&self) -> usize {
        self.tables_failed + self.routines_failed
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Connection health of both servers.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub source_connected: bool,
    pub source_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_error: Option<String>,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_error: Option<String>,
    pub healthy: bool,
}

/// Phases written with foreign key checks suspended.
const FOREIGN_KEY_PHASES: &[Phase] = &[Phase::DirectCustomer, Phase::DirectUser, Phase::IndirectFk];

/// Snapshot and plan for one database.
struct PreparedDatabase {
    snapshot: SchemaSnapshot,
    plan: Plan,
}

impl Orchestrator {
    /// Validate the configuration and connect to both servers.
    pub async fn connect(config: Config, confirmer: Arc<dyn Confirmer>) -> Result<Self> {
        config.validate()?;

        let source = MysqlSource::connect(&config.source, config.migration.max_source_connections)
            .await?;
        let target = MysqlTarget::connect(&config.target).await?;

        Ok(Self::with_drivers(
            config,
            Arc::new(source),
            Arc::new(target),
            confirmer,
        ))
    }

    /// Build an orchestrator over already-connected drivers.
    pub fn with_drivers(
        config: Config,
        source: Arc<dyn SourceReader>,
        target: Arc<dyn TargetWriter>,
        confirmer: Arc<dyn Confirmer>,
    ) -> Self {
        Self {
            config,
            source,
            target,
            confirmer,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn state_key(&self) -> Result<StateKey> {
        StateKey::new(&self.config.migration.customer_ids)
    }

    /// Databases of the run: the configured list, or every non-system
    /// database on the source. Configured names missing from the source are
    /// skipped with a warning.
    pub async fn databases(&self) -> Result<Vec<String>> {
        let available = self.source.list_databases().await?;
        if self.config.migration.databases.is_empty() {
            return Ok(available);
        }

        let mut databases = Vec::new();
        for name in &self.config.migration.databases {
            if available.iter().any(|a| a == name) {
                databases.push(name.clone());
            } else {
                warn!("Database {} not found on source, skipping", name);
            }
        }
        Ok(databases)
    }

    /// Plan every database without writing anything.
    ///
    /// The state file is read but not locked.
    pub async fn plan(&self) -> Result<Vec<Plan>> {
        let key = self.state_key()?;
        let path = StateStore::path_for(&self.config.migration.state_directory, &key);
        let state = if path.exists() {
            MigrationState::load(&path)?
        } else {
            MigrationState::new()
        };

        let policy = self.config.plan_policy()?;
        let mut plans = Vec::new();
        for database in self.databases().await? {
            plans.push(self.prepare(&database, &policy, &state).await?.plan);
        }
        Ok(plans)
    }

    async fn prepare(
        &self,
        database: &str,
        policy: &PlanPolicy,
        state: &MigrationState,
    ) -> Result<PreparedDatabase> {
        let mut snapshot = self.source.introspect(database).await?;

        if self.config.migration.detect_implicit_foreign_keys {
            let found = detect_implicit_foreign_keys(&mut snapshot);
            if found > 0 {
                info!("{}: inferred {} foreign keys from column names", database, found);
            }
        }

        let classification = classify_snapshot(&snapshot);
        debug!("{}: classified {} tables", database, classification.len());

        let routines = if policy.migrate_routines {
            self.source.list_routines(database).await?
        } else {
            Vec::new()
        };

        let mut row_counts = HashMap::new();
        for name in tables_needing_row_counts(&snapshot, &classification, policy, state) {
            let Some(table) = snapshot.table(&name) else {
                continue;
            };
            match self.source.count_rows(table, &RowFilter::All).await {
                Ok(count) => {
                    row_counts.insert(name, count);
                }
                Err(e) => warn!("{}.{}: could not count rows: {}", database, name, e),
            }
        }

        let plan = planner::plan(
            PlanInputs {
                snapshot: &snapshot,
                classification: &classification,
                routines: &routines,
                row_counts: &row_counts,
                policy,
            },
            state,
        );

        Ok(PreparedDatabase { snapshot, plan })
    }

    /// Run the migration.
    ///
    /// With `dry_run` the plans are returned in the result and neither the
    /// destination nor the state file is touched.
    pub async fn run(&self, cancel: &CancellationToken, dry_run: bool) -> Result<MigrationResult> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let start_time = Instant::now();

        let key = self.state_key()?;
        let policy = self.config.plan_policy()?;
        info!("Starting migration run {} for customers {}", run_id, key);

        if dry_run {
            let plans = self.plan().await?;
            let mut result = self.new_result(run_id, started_at, &key);
            result.status = "dry_run".to_string();
            result.plans = plans;
            result.completed_at = Utc::now();
            result.duration_seconds = start_time.elapsed().as_secs_f64();
            return Ok(result);
        }

        let mut store = StateStore::open(&self.config.migration.state_directory, &key)?;
        let state = store.snapshot();

        let mut prepared = Vec::new();
        for database in self.databases().await? {
            prepared.push(self.prepare(&database, &policy, &state).await?);
        }

        let conflicts: Vec<String> = prepared
            .iter()
            .flat_map(|p| p.plan.conflicts.iter().map(|c| c.to_string()))
            .collect();
        if self.config.migration.strict_rules && !conflicts.is_empty() {
            return Err(MigrateError::Config(format!(
                "conflicting rules (strict_rules is set): {}",
                conflicts.join("; ")
            )));
        }

        for p in &mut prepared {
            if p.plan.pending_confirmations() > 0 {
                p.plan.resolve_confirmations(self.confirmer.as_ref())?;
            }
        }

        let mut result = self.new_result(run_id, started_at, &key);
        result.state_file = store.path().to_path_buf();

        for p in &prepared {
            let mut summary = DatabaseSummary {
                database: p.plan.database.clone(),
                ..Default::default()
            };
            let outcome = self
                .execute_database(p, &mut store, cancel, &mut summary)
                .await;

            info!(
                "{}: {} completed, {} skipped, {} failed, {} unchanged, {} rows",
                summary.database,
                summary.tables_completed,
                summary.tables_skipped,
                summary.tables_failed,
                summary.tables_unchanged,
                summary.rows_copied
            );
            result.add(summary);
            outcome?;
        }

        result.status = if result.is_success() {
            "completed"
        } else {
            "incomplete"
        }
        .to_string();
        result.completed_at = Utc::now();
        result.duration_seconds = start_time.elapsed().as_secs_f64();

        info!(
            "Migration {}: {} tables completed, {} skipped, {} failed, {} rows in {:.1}s",
            result.status,
            result.tables_completed,
            result.tables_skipped,
            result.tables_failed,
            result.rows_copied,
            result.duration_seconds
        );
        Ok(result)
    }

    fn new_result(&self, run_id: String, started_at: DateTime<Utc>, key: &StateKey) -> MigrationResult {
        MigrationResult {
            run_id,
            status: String::new(),
            duration_seconds: 0.0,
            started_at,
            completed_at: started_at,
            customer_ids: key.ids().to_vec(),
            state_file: StateStore::path_for(&self.config.migration.state_directory, key),
            databases: Vec::new(),
            tables_completed: 0,
            tables_skipped: 0,
            tables_failed: 0,
            routines_failed: 0,
            rows_copied: 0,
            failed_tables: Vec::new(),
            plans: Vec::new(),
        }
    }

    async fn execute_database(
        &self,
        prepared: &PreparedDatabase,
        store: &mut StateStore,
        cancel: &CancellationToken,
        summary: &mut DatabaseSummary,
    ) -> Result<()> {
        let plan = &prepared.plan;
        let database = plan.database.as_str();

        info!("{}: {}", database, Phase::Routines);
        let migrator = RoutineMigrator::new(self.source.clone(), self.target.clone());
        for item in plan.phase(Phase::Routines) {
            check_cancelled(cancel)?;
            self.execute_routine(&migrator, item, store, summary).await?;
        }

        let guard = if plan.writes_with_foreign_keys_suspended() {
            Some(ForeignKeyChecksGuard::suspend(self.target.clone(), database).await?)
        } else {
            None
        };

        let copied = self
            .execute_phases(FOREIGN_KEY_PHASES, prepared, store, cancel, summary)
            .await;

        let restored = match guard {
            Some(guard) => guard.restore().await,
            None => Ok(()),
        };
        if let Err(e) = &restored {
            error!("{}: failed to restore foreign key checks: {}", database, e);
        }
        copied?;
        restored?;

        self.execute_phases(&[Phase::Reference], prepared, store, cancel, summary)
            .await
    }

    async fn execute_phases(
        &self,
        phases: &[Phase],
        prepared: &PreparedDatabase,
        store: &mut StateStore,
        cancel: &CancellationToken,
        summary: &mut DatabaseSummary,
    ) -> Result<()> {
        for phase in phases {
            info!("{}: {}", prepared.plan.database, phase);
            for item in prepared.plan.phase(*phase) {
                check_cancelled(cancel)?;
                self.execute_table(item, &prepared.snapshot, store, cancel, summary)
                    .await?;
            }
        }
        Ok(())
    }

    async fn execute_routine(
        &self,
        migrator: &RoutineMigrator,
        item: &PlanItem,
        store: &mut StateStore,
        summary: &mut DatabaseSummary,
    ) -> Result<()> {
        let Unit::Routine { routine } = &item.unit else {
            return Ok(());
        };
        let database = item.database.as_str();

        if !item.decision.copies() {
            debug!("{}: {} {}: {}", database, routine.kind, routine.name, item.rationale);
            return Ok(());
        }

        match migrator.migrate_routine(database, routine).await {
            Ok(()) => {
                store.record_routine_outcome(
                    database,
                    &routine.name,
                    routine.kind,
                    TaskStatus::Completed,
                )?;
                summary.routines_completed += 1;
            }
            Err(e) => {
                error!("{}: {}", database, e);
                store.record_routine_outcome(
                    database,
                    &routine.name,
                    routine.kind,
                    TaskStatus::Failed,
                )?;
                summary.routines_failed += 1;
            }
        }
        Ok(())
    }

    async fn execute_table(
        &self,
        item: &PlanItem,
        snapshot: &SchemaSnapshot,
        store: &mut StateStore,
        cancel: &CancellationToken,
        summary: &mut DatabaseSummary,
    ) -> Result<()> {
        let database = item.database.as_str();
        let name = item.name();

        let skip_reason = match item.decision {
            Decision::NoOp => {
                debug!("{}.{}: unchanged ({})", database, name, item.rationale);
                summary.tables_unchanged += 1;
                return Ok(());
            }
            Decision::Skip(reason) => Some(reason),
            // unresolved confirmations count as declined
            Decision::Confirm => Some(SkipReason::UserDeclined),
            Decision::Migrate | Decision::Force => None,
        };

        if let Some(reason) = skip_reason {
            info!("{}.{}: skipped ({})", database, name, item.rationale);
            store.record_table_outcome(
                database,
                name,
                TaskStatus::Skipped,
                0,
                Some(reason.as_str()),
            )?;
            summary.tables_skipped += 1;
            return Ok(());
        }

        let table = snapshot.table(name).ok_or_else(|| {
            MigrateError::schema_mismatch(
                format!("{}.{}", database, name),
                "table disappeared from the source snapshot",
            )
        })?;
        let category = item.category().cloned().unwrap_or(Category::Reference);
        let filter = row_filter(
            &category,
            &self.config.migration.customer_ids,
            &self.config.migration.seed_user_ids,
        );

        info!("{}.{}: copying [{}] ({})", database, name, category, item.rationale);
        let copier = DataCopier::new(
            self.source.clone(),
            self.target.clone(),
            self.config.migration.batch_size,
        );

        match copier.copy(table, &filter, cancel).await {
            Ok(stats) => {
                info!(
                    "{}.{}: completed ({} rows read, {} inserted)",
                    database, name, stats.rows_read, stats.rows_written
                );
                store.record_table_outcome(
                    database,
                    name,
                    TaskStatus::Completed,
                    stats.rows_written as i64,
                    None,
                )?;
                summary.tables_completed += 1;
                summary.rows_copied += stats.rows_written;
                Ok(())
            }
            Err(MigrateError::Cancelled) => {
                warn!("{}.{}: interrupted", database, name);
                store.record_table_outcome(
                    database,
                    name,
                    TaskStatus::Failed,
                    0,
                    Some(REASON_INTERRUPTED),
                )?;
                summary.tables_failed += 1;
                summary.failed_tables.push(format!("{}.{}", database, name));
                Err(MigrateError::Cancelled)
            }
            Err(e) if e.is_unit_scoped() => {
                error!("{}.{}: {}", database, name, e);
                store.record_table_outcome(
                    database,
                    name,
                    TaskStatus::Failed,
                    0,
                    Some(&e.to_string()),
                )?;
                summary.tables_failed += 1;
                summary.failed_tables.push(format!("{}.{}", database, name));
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Check both connections.
    pub async fn health_check(&self) -> HealthCheckResult {
        let (source, target) = futures::join!(
            async {
                let start = Instant::now();
                let result = self.source.ping().await;
                (result, start.elapsed().as_millis() as u64)
            },
            async {
                let start = Instant::now();
                let result = self.target.ping().await;
                (result, start.elapsed().as_millis() as u64)
            }
        );

        let (source_result, source_latency_ms) = source;
        let (target_result, target_latency_ms) = target;
        let healthy = source_result.is_ok() && target_result.is_ok();

        HealthCheckResult {
            source_connected: source_result.is_ok(),
            source_latency_ms,
            source_error: source_result.err().map(|e| e.to_string()),
            target_connected: target_result.is_ok(),
            target_latency_ms,
            target_error: target_result.err().map(|e| e.to_string()),
            healthy,
        }
    }

    /// Close both connections.
    pub async fn close(&self) {
        self.source.close().await;
        self.target.close().await;
    }
}

impl MigrationResult {
    fn add(&mut self, summary: DatabaseSummary) {
        self.tables_completed += summary.tables_completed;
        self.tables_skipped += summary.tables_skipped;
        self.tables_failed += summary.tables_failed;
        self.routines_failed += summary.routines_failed;
        self.rows_copied += summary.rows_copied;
        self.failed_tables
            .extend(summary.failed_tables.iter().cloned());
        self.databases.push(summary);
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(MigrateError::Cancelled)
    } else {
        Ok(())
    }
}
