//! sef-daemon library target.
//!
//! Startup wiring for the storage event finality job. Exposed as a library
//! so argument parsing and config loading are testable without a database.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use sef_config::{
    load_layered_yaml, report_unused_keys, resolve_database_url, JobSettings, LoadedConfig,
    UnusedKeyPolicy, UnusedKeyReport,
};
use sef_runtime::{run_schedule, PgStore, RunController, RunOutcome};
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "sef-daemon")]
#[command(about = "Storage event finality job", long_about = None)]
pub struct DaemonArgs {
    /// Layered config paths in merge order (base -> env -> overrides)
    #[arg(long = "config")]
    pub config_paths: Vec<String>,

    /// Run a single reconciliation pass and exit instead of scheduling.
    #[arg(long, default_value_t = false)]
    pub once: bool,

    /// Do not apply embedded migrations at startup.
    #[arg(long, default_value_t = false)]
    pub skip_migrate: bool,
}

/// Everything derived from config before touching the database.
#[derive(Debug)]
pub struct Startup {
    pub config: LoadedConfig,
    pub settings: JobSettings,
    pub unused_keys: UnusedKeyReport,
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// Load, validate and hash the layered config. Unused keys are logged, not fatal.
pub fn load_startup(args: &DaemonArgs) -> Result<Startup> {
    let paths: Vec<&str> = args.config_paths.iter().map(String::as_str).collect();
    let config = load_layered_yaml(&paths).context("config load failed")?;
    let settings = config.job_settings()?;

    let unused_keys = report_unused_keys(&config.config_json, UnusedKeyPolicy::Warn)?;
    if !unused_keys.is_clean() {
        warn!(
            unused = ?unused_keys.unused_leaf_pointers,
            "CONFIG_UNUSED_KEYS: config leaves not read by the job"
        );
    }

    Ok(Startup {
        config,
        settings,
        unused_keys,
    })
}

pub async fn run(args: DaemonArgs) -> Result<()> {
    let startup = load_startup(&args)?;
    let settings = startup.settings;
    info!(
        config_hash = %startup.config.config_hash,
        job = %settings.job_name,
        cadence_secs = settings.cadence_secs,
        max_run_time_ms = settings.max_run_time_ms,
        finality_time_ms = settings.finality_time_ms,
        "config loaded"
    );

    let db_url = resolve_database_url(&startup.config.config_json)?;
    let pool = sef_db::connect(db_url.expose()).await?;
    info!(env_var = db_url.env_var(), "database connected");

    if !args.skip_migrate {
        sef_db::migrate(&pool).await?;
    }
    let status = sef_db::status(&pool).await?;
    if !status.ok {
        bail!("database connectivity check returned an unexpected result");
    }
    if !status.has_storage_events_table {
        bail!("storage_events table missing; run without --skip-migrate");
    }

    let store = Arc::new(PgStore::new(pool));
    let controller = RunController::new(&settings, store.clone(), store.clone(), store);

    if args.once {
        return match controller.run_once(Utc::now()).await {
            RunOutcome::Completed { .. } | RunOutcome::AlreadyRunning => Ok(()),
            RunOutcome::LockFailed(err) => Err(err.context("lock acquire failed")),
            RunOutcome::Failed { error, .. } => Err(anyhow!("run failed: {error}")),
        };
    }

    run_schedule(&controller, settings.cadence(), Utc::now, shutdown_signal()).await;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(err) => {
            error!(error = %err, "ctrl-c handler unavailable; running until killed");
            std::future::pending::<()>().await;
        }
    }
}
