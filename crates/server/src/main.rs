//! Model server - retrains the hit classifier on uploaded gameplay
//! telemetry and serves the latest model in the mobile format.

use anyhow::{Context, Result};
use server_lib::{
    api::{self, AppState},
    health::{components, HealthRegistry},
    observability::{ServiceMetrics, StructuredLogger},
    service::ModelService,
    store::{LocalBlobStore, ModelRegistry, SqliteLedger},
    training::Trainer,
};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting model-server");

    let config = config::ServerConfig::load()?;
    info!(
        bucket = %config.bucket_name,
        storage_root = %config.storage_root.display(),
        port = config.api_port,
        "Server configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::BLOB_STORE).await;
    health_registry.register(components::LEDGER).await;

    let metrics = ServiceMetrics::new();
    let logger = StructuredLogger::new("model-server");

    let blobs = LocalBlobStore::open(&config.storage_root, &config.bucket_name)
        .await
        .context("Failed to open blob store")?;
    let ledger = Arc::new(
        SqliteLedger::connect(&config.database_url)
            .await
            .context("Failed to open model ledger")?,
    );

    let registry = ModelRegistry::new(Arc::new(blobs), ledger.clone());
    let service = ModelService::new(
        registry,
        Trainer::new(config.forest_params()),
        health_registry.clone(),
        metrics,
        logger.clone(),
    );

    if !service.check_storage().await {
        warn!("Storage collaborators unreachable at startup, not ready until they answer");
    }

    if config.reconcile_on_startup {
        if let Err(e) = service.reconcile(config.delete_orphans).await {
            warn!(error = %e, "Orphan reconciliation failed, continuing");
        }
    }

    logger.log_startup(SERVICE_VERSION, &config.bucket_name);

    let app_state = Arc::new(AppState::new(service));
    health_registry.set_ready(true).await;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let mut api_handle = tokio::spawn(api::serve(config.api_port, app_state, async move {
        let _ = shutdown_rx.await;
    }));

    let exited = tokio::select! {
        result = &mut api_handle => Some(result),
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!(error = %e, "Failed to listen for SIGINT");
            }
            None
        }
    };

    let result = match exited {
        Some(result) => {
            logger.log_shutdown("API server exited");
            result
        }
        None => {
            logger.log_shutdown("SIGINT received");
            let _ = shutdown_tx.send(());
            // In-flight ingests must record their ledger rows before the pool closes
            api_handle.await
        }
    };

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "API server failed"),
        Err(e) => error!(error = %e, "API server task aborted"),
    }

    ledger.close().await;
    info!("Shutting down");

    Ok(())
}
