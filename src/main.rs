//! jobmill worker: claims and runs background jobs until stopped.
//!
//! Main entry point that wires the stores, the handler registry and the
//! worker runner together.

use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::{self, Instrument};
use tracing_subscriber::{EnvFilter, fmt};

use jobmill_core::clock::{Clock, SystemClock};
use jobmill_core::config::AppConfig;
use jobmill_core::error::AppError;
use jobmill_database::store::{JobStore, LockStore};
use jobmill_database::{DatabasePool, JobRepository, LockRepository, migration};
use jobmill_worker::jobs::MaintenanceJobHandler;
use jobmill_worker::{JobExecutor, JobQueue, RetryPolicy, WorkerRunner};

/// Command-line flags for the worker binary
#[derive(Debug, Parser)]
#[command(name = "jobmill-worker", version, about, long_about = None)]
struct Args {
    /// Configuration environment (`config/{env}.toml`)
    #[arg(long, env = "JOBMILL_ENV", default_value = "development")]
    env: String,

    /// Run due jobs until none remain, then exit
    #[arg(long)]
    drain: bool,

    /// Skip running database migrations at startup
    #[arg(long)]
    skip_migrations: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match AppConfig::load(&args.env) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config, args).await {
        tracing::error!("Worker error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Main worker run function
async fn run(config: AppConfig, args: Args) -> Result<(), AppError> {
    tracing::info!(env = %args.env, "Starting jobmill worker v{}", env!("CARGO_PKG_VERSION"));

    // ── Step 1: Database connection + migrations ─────────────────
    let db = DatabasePool::connect(&config.database).await?;
    if !db.health_check().await? {
        return Err(AppError::service_unavailable(
            "Database health check returned an unexpected result",
        ));
    }
    if !args.skip_migrations {
        migration::run_migrations(db.pool()).await?;
    }

    // ── Step 2: Stores ───────────────────────────────────────────
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let jobs: Arc<dyn JobStore> = Arc::new(JobRepository::new(db.pool().clone(), clock.clone()));
    let locks: Arc<dyn LockStore> =
        Arc::new(LockRepository::new(db.pool().clone(), clock.clone()));

    // ── Step 3: Handlers ─────────────────────────────────────────
    let mut executor = JobExecutor::new();
    executor.register(Arc::new(MaintenanceJobHandler::new(
        jobs.clone(),
        locks.clone(),
        clock.clone(),
        &config.maintenance,
    )));

    let queue = Arc::new(
        JobQueue::new(jobs.clone()).with_known_names(executor.registered_names()),
    );

    if config.maintenance.enabled {
        MaintenanceJobHandler::install(&queue, locks.as_ref(), &config.maintenance, clock.as_ref())
            .await?;
    }

    // ── Step 4: Worker runner ────────────────────────────────────
    let worker_id = format!("worker-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
    let runner = WorkerRunner::new(
        queue,
        Arc::new(executor),
        config.worker.clone(),
        worker_id.clone(),
    )
    .with_retry(RetryPolicy::from_config(&config.retry)?);
    let span = tracing::info_span!("worker", worker.id = %worker_id);

    if args.drain {
        let mut processed = 0u64;
        while runner.run_once().instrument(span.clone()).await?.is_some() {
            processed += 1;
        }
        tracing::info!(processed, "Drained all due jobs");
    } else if config.worker.enabled {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(async move { runner.run(shutdown_rx).await }.instrument(span));

        shutdown_signal().await;
        tracing::info!("Shutdown signal received, stopping worker...");
        let _ = shutdown_tx.send(true);

        if let Err(e) = worker.await {
            tracing::error!("Worker task ended abnormally: {}", e);
        }
    } else {
        tracing::warn!("Worker disabled by configuration; nothing to do");
    }

    db.close().await;
    tracing::info!("jobmill worker stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
