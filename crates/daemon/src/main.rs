//! jobq daemon - Main Entry Point
//! JSON-RPC server + worker pool + stalled-job sweeper + retention

mod handlers;
mod settings;
mod telemetry;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use jobq_api_rpc::RpcServer;
use jobq_core::application::{
    shutdown_channel, EventBus, HandlerRegistry, MaintenanceScheduler, QueueService,
    StalledJobSweeper, Worker,
};
use jobq_core::port::id_provider::UuidProvider;
use jobq_core::port::time_provider::SystemTimeProvider;
use jobq_core::port::{InMemoryJobStore, JobStore, Maintenance};
use jobq_infra_sqlite::SqliteJobStore;
use settings::{LogFormat, Settings, StoreLocation};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_LOG_FILTER: &str = "jobq=info";
const LOG_FILE_PREFIX: &str = "jobq-daemon.log";

/// Grace period for background loops after the worker has drained
const BACKGROUND_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Configuration (before logging so the log format is known)
    let settings = Settings::load().context("Failed to load settings")?;

    // 2. Logging
    let _log_guard = init_logging(&settings)?;
    info!("jobq daemon v{} starting...", VERSION);

    // 3. Store
    let result = match settings.store_location() {
        StoreLocation::Memory => {
            warn!("Using in-memory store; jobs are lost on exit");
            run(settings, Arc::new(InMemoryJobStore::new())).await
        }
        StoreLocation::Sqlite(url) => {
            if let Some(dir) = settings.database_dir() {
                std::fs::create_dir_all(&dir)
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
            }
            info!(database_url = %url, "Initializing database...");
            let store = SqliteJobStore::connect(&url, settings.database.max_connections)
                .await
                .context("Failed to open SQLite store")?;
            run(settings, Arc::new(store)).await
        }
    };

    telemetry::shutdown();
    result
}

fn init_logging(settings: &Settings) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))
        .context("Failed to create env filter")?;

    let (writer, guard) = match &settings.log_dir {
        Some(dir) => {
            let dir = shellexpand::tilde(dir).into_owned();
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stdout), None),
    };
    let to_terminal = guard.is_none();

    let fmt_layer = match settings.log_format {
        // Production: JSON structured logging
        LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
        // Development: pretty formatting
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_ansi(to_terminal)
            .with_writer(writer)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(telemetry::layer::<Registry>()?)
        .with(fmt_layer)
        .with(env_filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

async fn run<S>(settings: Settings, store: Arc<S>) -> Result<()>
where
    S: JobStore + Maintenance + 'static,
{
    // DI wiring
    let time_provider = Arc::new(SystemTimeProvider);
    let events = EventBus::default();
    let backoff = settings.backoff();

    let queue = Arc::new(QueueService::new(
        store.clone(),
        Arc::new(UuidProvider),
        time_provider.clone(),
        Arc::new(events.clone()),
    ));

    let mut registry = HandlerRegistry::new();
    handlers::register_builtin(&mut registry, handlers::EXAMPLE_STEP)?;
    info!(handlers = ?registry.names(), "Handlers registered");

    // Crash recovery: jobs left active by a previous run
    let sweeper = StalledJobSweeper::new(
        store.clone(),
        Arc::new(events.clone()),
        time_provider.clone(),
        backoff,
        settings.stall_config(),
    );
    match sweeper.run_once().await {
        Ok(count) => info!(recovered_jobs = count, "Startup stall recovery completed"),
        Err(e) => error!(error = %e, "Startup stall recovery failed"),
    }

    // JSON-RPC server
    let rpc_server = RpcServer::new(settings.rpc_config(), queue, events.clone());
    let (rpc_addr, rpc_handle) = rpc_server
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("RPC server start failed: {}", e))?;

    let (shutdown_tx, shutdown_rx) = shutdown_channel();

    // Worker
    let worker = Worker::new(
        store.clone(),
        Arc::new(registry),
        Arc::new(events.clone()),
        time_provider.clone(),
        backoff,
        settings.worker_config(),
    );
    let worker_handle = tokio::spawn(async move {
        if let Err(e) = worker.run(shutdown_rx).await {
            error!(error = %e, "Worker failed");
        }
    });

    let mut background = vec![tokio::spawn(sweeper.run(shutdown_tx.token()))];

    if settings.retention.enabled {
        let scheduler = MaintenanceScheduler::new(
            store.clone(),
            time_provider.clone(),
            settings.retention_policy(),
            Duration::from_millis(settings.retention.interval_ms),
        );
        background.push(tokio::spawn(scheduler.run(shutdown_tx.token())));
    }

    info!(rpc_addr = %rpc_addr, "System ready. Waiting for jobs...");
    info!("Press Ctrl+C to shutdown");

    wait_for_shutdown(tokio::signal::ctrl_c()).await;

    // Stop intake first, then let in-flight jobs finish
    if let Err(e) = rpc_handle.stop() {
        warn!(error = %e, "RPC server was already stopped");
    }
    shutdown_tx.shutdown();

    if let Err(e) = worker_handle.await {
        error!(error = %e, "Worker task panicked");
    }
    for handle in background {
        if tokio::time::timeout(BACKGROUND_STOP_TIMEOUT, handle)
            .await
            .is_err()
        {
            warn!("Background task did not stop in time");
        }
    }

    store.close().await;

    info!("Shutdown complete.");
    Ok(())
}

/// Wait for `signal`. A listener failure is logged and treated as a shutdown
/// request so the drain path still runs.
async fn wait_for_shutdown<F>(signal: F)
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => info!("Shutdown signal received. Exiting gracefully..."),
        Err(e) => error!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_signal_listener_failure_falls_through_to_shutdown() {
        let outcome = tokio::time::timeout(
            Duration::from_secs(1),
            wait_for_shutdown(async { Err(std::io::Error::other("no signal handler")) }),
        )
        .await;
        tokio_test::assert_ok!(outcome);
    }
}
