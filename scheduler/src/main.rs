// Scheduler binary entry point
// Runs the publication loop, the status validator and the ops listener in one process.

mod routes;

use anyhow::{anyhow, Context, Result};
use common::bootstrap::{init_credentials, init_registry, init_services, init_store};
use common::config::Settings;
use common::scheduler::Scheduler;
use common::telemetry::{init_logging, init_metrics, shutdown_tracer};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load().context("Failed to load configuration")?;

    init_logging(
        &settings.observability.log_level,
        settings.observability.tracing_endpoint.as_deref(),
    )?;
    info!("Starting publication scheduler");

    settings
        .validate()
        .map_err(|e| anyhow!("Invalid configuration: {}", e))?;
    info!(
        store_backend = ?settings.store.backend,
        tick_interval_seconds = settings.scheduler.tick_interval_seconds,
        validator_interval_seconds = settings.validator.interval_seconds,
        "Configuration loaded"
    );

    init_metrics(settings.observability.metrics_port)?;

    let store = init_store(&settings).await?;
    let registry = init_registry(&settings)?;
    let credentials = init_credentials(&settings);
    let services = init_services(&settings, store, registry, credentials);

    let validator = Arc::clone(&services.validator);
    let validator_task = tokio::spawn(async move { validator.start().await });

    let engine = Arc::clone(&services.engine);
    let engine_task = tokio::spawn(async move {
        if let Err(e) = engine.start().await {
            error!(error = %e, "Scheduler loop error");
        }
    });

    let addr = SocketAddr::from((
        settings
            .ops
            .host
            .parse::<std::net::IpAddr>()
            .context("Invalid ops host")?,
        settings.ops.port,
    ));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind ops listener on {}", addr))?;
    info!(addr = %addr, "Ops listener started");

    let (server_stop_tx, server_stop_rx) = oneshot::channel::<()>();
    let app = routes::create_router(services.operations.clone());
    let server_task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = server_stop_rx.await;
            })
            .await
    });

    shutdown_signal().await;

    // The in-flight tick, if any, completes before the loop exits
    if let Err(e) = services.engine.stop().await {
        error!(error = %e, "Error stopping scheduler loop");
    }
    services.validator.stop();
    let _ = server_stop_tx.send(());

    if let Err(e) = engine_task.await {
        error!(error = %e, "Scheduler task ended abnormally");
    }
    if let Err(e) = validator_task.await {
        error!(error = %e, "Validator task ended abnormally");
    }
    match server_task.await {
        Ok(Err(e)) => error!(error = %e, "Ops listener error"),
        Err(e) => error!(error = %e, "Ops listener task ended abnormally"),
        Ok(Ok(())) => {}
    }

    shutdown_tracer();
    info!("Publication scheduler stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received SIGTERM signal"),
    }

    info!("Initiating graceful shutdown");
}
