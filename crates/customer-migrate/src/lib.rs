//! # customer-migrate
//!
//! Customer-scoped subset migration between MySQL/MariaDB servers.
//!
//! Copies the rows that belong to a set of customer ids from a source server
//! into a structurally identical destination:
//!
//! - **Classification** of every table by its relation to `customer_id`
//! - **Phased execution** with foreign key checks suspended for dependent phases
//! - **Layered rules** (command line > config > defaults) to skip or force tables
//! - **Resumable runs** via a locked, atomically rewritten JSON state file
//! - **Routine copy** of stored procedures and functions
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use customer_migrate::{Config, ConfirmPolicy, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> customer_migrate::Result<()> {
//!     let mut config = Config::load("config.yaml")?;
//!     config.apply_process_env()?;
//!     let confirmer = Arc::new(ConfirmPolicy::AlwaysDecline);
//!     let orchestrator = Orchestrator::connect(config, confirmer).await?;
//!     let result = orchestrator.run(&CancellationToken::new(), false).await?;
//!     println!("Copied {} rows", result.rows_copied);
//!     Ok(())
//! }
//! ```

pub mod classify;
pub mod config;
pub mod confirm;
pub mod copier;
pub mod core;
pub mod drivers;
pub mod error;
pub mod orchestrator;
pub mod planner;
pub mod routines;
pub mod rules;
pub mod state;

// Re-exports for convenient access
pub use classify::{Category, ClassificationMap};
pub use config::{Config, ConnectionConfig, MigrationConfig, RunOverrides};
pub use confirm::{ConfirmPolicy, ConfirmationRequest, Confirmer};
pub use error::{MigrateError, Result};
pub use orchestrator::{DatabaseSummary, HealthCheckResult, MigrationResult, Orchestrator};
pub use planner::{Decision, Phase, Plan, PlanItem};
pub use state::{MigrationState, StateKey, StateStore, TaskStatus};
