//! Service startup and one-shot commands.

use crate::app::scheduler::spawn_scheduler;
use crate::app::server::router;
use crate::app::RelayState;
use relay_config_and_utils::{Config, Paths};
use relay_database::AsyncDatabase;
use relay_drain::{DeliveryConfig, DrainOrchestrator, OrchestratorConfig, PrimaryClient};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{info, warn};

type AppResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Open the staging database and wire the drain components.
async fn build_state(config: Config, paths: &Paths) -> AppResult<RelayState> {
    let db = AsyncDatabase::open(&config.database_path(paths)).await?;

    let client = PrimaryClient::new(&DeliveryConfig {
        endpoint_url: config.primary.endpoint_url.clone(),
        shared_secret: config.primary.shared_secret.clone(),
        timeout: Duration::from_secs(config.drain.delivery_timeout_seconds),
    })?;

    let drain = DrainOrchestrator::new(
        Arc::new(db.clone()),
        Arc::new(client),
        OrchestratorConfig {
            batch_size: config.drain.batch_size,
            interval_seconds: config.drain.interval_seconds,
            delivery_concurrency: config.drain.delivery_concurrency,
        },
    )?;

    Ok(RelayState::new(config, db, drain))
}

/// Run the HTTP server and the drain scheduler until Ctrl-C or SIGTERM.
pub async fn run_service(config: Config, paths: Paths) -> AppResult<()> {
    info!(
        base_dir = %paths.base_dir().display(),
        primary = %config.primary.endpoint_url,
        batch_size = config.drain.batch_size,
        interval_seconds = config.drain.interval_seconds,
        "Starting relay drain service"
    );

    let state = build_state(config, &paths).await?;
    let listen_addr = state.config.listen_addr();
    let period = Duration::from_secs(state.config.drain.interval_seconds);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    info!(addr = %listen_addr, database = state.db.path(), "HTTP server listening");

    let (scheduler_tx, scheduler_rx) = oneshot::channel();
    let scheduler = spawn_scheduler(state.drain.clone(), period, scheduler_rx);

    axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down relay drain service");
    let _ = scheduler_tx.send(());
    if let Err(e) = scheduler.await {
        warn!(error = %e, "Drain scheduler task ended abnormally");
    }

    let RelayState { db, .. } = state;
    db.close().await?;
    info!("Relay drain service stopped");
    Ok(())
}

/// Run one drain cycle and print the report as JSON.
pub async fn run_single_cycle(config: Config, paths: Paths) -> AppResult<()> {
    let state = build_state(config, &paths).await?;
    let report = state.drain.run_once().await?;

    let output = json!({
        "success": true,
        "processed": report.processed,
        "delivered": report.delivered,
        "failed": report.failed,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Print the drain status snapshot as JSON.
pub async fn print_status(config: Config, paths: Paths) -> AppResult<()> {
    let state = build_state(config, &paths).await?;
    let status = state.drain.status().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
