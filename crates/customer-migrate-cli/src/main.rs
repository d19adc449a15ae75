//! customer-migrate CLI - customer-scoped MySQL/MariaDB subset migration.

mod prompt;
mod status;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use customer_migrate::config::{parse_id_list, split_list};
use customer_migrate::{
    Config, ConfirmPolicy, Confirmer, MigrateError, MigrationResult, Orchestrator, StateKey,
    StateStore,
};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use crate::prompt::InteractiveConfirmer;
use crate::status::{render_health, render_plan, render_result, StatusReporter};

#[derive(Parser)]
#[command(name = "customer-migrate")]
#[command(about = "Copy one or more customers' data between MySQL/MariaDB servers")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Directory holding state files (overrides migration.state_directory)
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct Selection {
    /// Comma-separated customer ids (overrides migration.customer_ids)
    #[arg(long)]
    customer_ids: Option<String>,

    /// Comma-separated databases (overrides migration.databases)
    #[arg(long)]
    databases: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate the selected customers
    Run {
        #[command(flatten)]
        selection: Selection,

        /// Re-copy every table and routine, ignoring the state file
        #[arg(long)]
        force: bool,

        /// Tables to copy regardless of state or skip rules (DB.TABLE, DB.*, *.TABLE, TABLE)
        #[arg(long, value_delimiter = ',')]
        force_tables: Vec<String>,

        /// Tables to skip (DB.TABLE, DB.*, *.TABLE, TABLE)
        #[arg(long, value_delimiter = ',')]
        skip_tables: Vec<String>,

        /// Skip reference tables above the confirmation threshold instead of asking
        #[arg(long)]
        auto_skip_large: bool,

        /// Large-table confirmation: interactive, always-accept, always-decline, threshold:N
        #[arg(long, default_value = "interactive")]
        confirm: String,

        /// Dry run: classify and show the plan without writing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the plan for the selected customers without writing anything
    Plan {
        #[command(flatten)]
        selection: Selection,
    },

    /// Show the recorded state for a set of customers
    Status {
        /// Comma-separated customer ids (overrides migration.customer_ids)
        #[arg(long)]
        customer_ids: Option<String>,
    },

    /// Test database connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    // A missing .env is fine
    dotenv::dotenv().ok();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| MigrateError::Config(e.to_string()))?;

    // Status only reads the state file, so the config file is optional there
    let config_optional = matches!(cli.command, Commands::Status { .. });
    let mut config = load_config(&cli.config, config_optional)?;
    config.apply_process_env()?;
    if let Some(dir) = &cli.state_dir {
        config.migration.state_directory = dir.clone();
    }

    match cli.command {
        Commands::Run {
            selection,
            force,
            force_tables,
            skip_tables,
            auto_skip_large,
            confirm,
            dry_run,
        } => {
            apply_selection(&mut config, &selection)?;
            let overrides = &mut config.migration.overrides;
            overrides.force_all = force;
            overrides.force_tables = force_tables;
            overrides.skip_tables = skip_tables;
            if auto_skip_large {
                config.migration.auto_skip_large = true;
            }
            // Rules from the command line are checked like the file's
            config.rules()?;

            let confirmer = confirmer_for(&confirm)?;
            let cancel = setup_signal_handler();

            let orchestrator = Orchestrator::connect(config, confirmer).await?;
            let outcome = orchestrator.run(&cancel, dry_run).await;
            orchestrator.close().await;
            let result = outcome?;

            print_result(&result, cli.output_json)?;
            if !result.is_success() {
                return Err(MigrateError::Incomplete {
                    failed: result.failed_units(),
                });
            }
        }

        Commands::Plan { selection } => {
            apply_selection(&mut config, &selection)?;
            let orchestrator =
                Orchestrator::connect(config, Arc::new(ConfirmPolicy::AlwaysDecline)).await?;
            let outcome = orchestrator.plan().await;
            orchestrator.close().await;
            let plans = outcome?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&plans)?);
            } else {
                for plan in &plans {
                    print!("{}", render_plan(plan));
                }
            }
        }

        Commands::Status { customer_ids } => {
            if let Some(ids) = customer_ids {
                config.migration.customer_ids = parse_ids(&ids)?;
            }
            let key = StateKey::new(&config.migration.customer_ids)?;
            let path = StateStore::path_for(&config.migration.state_directory, &key);
            let reporter = StatusReporter::load(&path)?;

            if cli.output_json {
                println!("{}", reporter.to_json()?);
            } else {
                print!("{}", reporter.render(&key));
            }
        }

        Commands::HealthCheck => {
            let orchestrator =
                Orchestrator::connect(config, Arc::new(ConfirmPolicy::AlwaysDecline)).await?;
            let result = orchestrator.health_check().await;
            orchestrator.close().await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print!("{}", render_health(&result));
            }

            if !result.healthy {
                return Err(MigrateError::Connectivity("Health check failed".to_string()));
            }
        }
    }

    Ok(())
}

fn load_config(path: &Path, optional: bool) -> Result<Config, MigrateError> {
    if optional && !path.exists() {
        return Ok(Config::default());
    }
    let config = Config::load(path)?;
    info!("Loaded configuration from {:?}", path);
    Ok(config)
}

fn parse_ids(value: &str) -> Result<Vec<i64>, MigrateError> {
    parse_id_list(value).map_err(|e| MigrateError::Config(format!("--customer-ids: {}", e)))
}

fn apply_selection(config: &mut Config, selection: &Selection) -> Result<(), MigrateError> {
    if let Some(ids) = &selection.customer_ids {
        config.migration.customer_ids = parse_ids(ids)?;
    }
    if let Some(databases) = &selection.databases {
        config.migration.databases = split_list(databases);
    }
    Ok(())
}

fn confirmer_for(policy: &str) -> Result<Arc<dyn Confirmer>, MigrateError> {
    if policy.trim().eq_ignore_ascii_case("interactive") {
        return Ok(Arc::new(InteractiveConfirmer));
    }
    let policy: ConfirmPolicy = policy.parse()?;
    Ok(Arc::new(policy))
}

fn print_result(result: &MigrationResult, json: bool) -> Result<(), MigrateError> {
    if json {
        println!("{}", result.to_json()?);
        return Ok(());
    }
    for plan in &result.plans {
        print!("{}", render_plan(plan));
    }
    print!("{}", render_result(result));
    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" | "info" | "warn" | "error" | "trace" => verbosity.to_lowercase(),
        _ => "info".to_string(),
    };

    // RUST_LOG wins over --verbosity
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    let installed = match format {
        "json" => subscriber.json().try_init(),
        "text" => subscriber.try_init(),
        other => return Err(format!("unknown log format '{}': expected text or json", other)),
    };
    installed.map_err(|e| e.to_string())
}

/// Cancel the run on SIGINT (Ctrl-C) or SIGTERM.
///
/// The table in flight finishes its current batch, is recorded as
/// interrupted, and foreign key checks are restored before exit.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    let token_int = cancel_token.clone();
    let token_term = cancel_token.clone();

    tokio::spawn(async move {
        if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
            sigint.recv().await;
            eprintln!("\nReceived SIGINT. Stopping after the current batch...");
            token_int.cancel();
        }
    });

    tokio::spawn(async move {
        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            sigterm.recv().await;
            eprintln!("\nReceived SIGTERM. Stopping after the current batch...");
            token_term.cancel();
        }
    });

    cancel_token
}

#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping after the current batch...");
            token.cancel();
        }
    });

    cancel_token
}
