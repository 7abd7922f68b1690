//! Entitle Service - HTTP API for the access entitlement core.
//!
//! This is the main entry point for the entitle service.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use entitle_service::{create_router, AppState, Scanner, ServiceConfig};
use entitle_store::RocksStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,entitle=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Entitle Service");

    // Load configuration from environment
    let config = ServiceConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        data_dir = %config.data_dir,
        provider_configured = %config.provider_api_url.is_some(),
        webhook_secret_configured = %config.provider_webhook_secret.is_some(),
        reconcile_interval_seconds = %config.reconcile_interval_seconds,
        "Service configuration loaded"
    );

    // Initialize RocksDB store
    tracing::info!(path = %config.data_dir, "Opening RocksDB store");
    let store = Arc::new(RocksStore::open(&config.data_dir)?);

    // Build app state
    let state = AppState::new(store.clone(), config.clone());

    // Periodic reconciliation sweep, when configured. The task dies with
    // the process; each account repair is its own short write, so an
    // interrupted sweep leaves no account half-repaired.
    if config.reconcile_interval_seconds > 0 {
        if let Some(gateway) = state.gateway.clone() {
            let interval = Duration::from_secs(config.reconcile_interval_seconds);
            let scanner = Scanner::new(
                store,
                gateway,
                Duration::from_secs(config.provider_timeout_seconds),
            );
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(interval).await;
                    if let Err(e) = scanner.scan().await {
                        tracing::error!(error = %e, "background reconciliation sweep failed");
                    }
                }
            });
            tracing::info!(
                interval_seconds = config.reconcile_interval_seconds,
                "Background reconciliation enabled"
            );
        } else {
            tracing::warn!(
                "RECONCILE_INTERVAL_SECONDS set but provider gateway not configured"
            );
        }
    }

    // Create the router
    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    // Start HTTP server
    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}
