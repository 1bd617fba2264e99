//! Potholes Live service binary.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `potholes-config.yaml` and the environment
//! 2. Initialize structured logging (tracing)
//! 3. Build the report store, share collaborators and subscription manager
//! 4. Serve HTTP and `WebSocket` requests until `Ctrl-C`

use std::sync::Arc;

use anyhow::Context;
use potholes_server::{AppState, LogFormat, ServiceConfig, start_server};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load configuration.
    let config = ServiceConfig::load().context("loading configuration")?;

    // 2. Initialize structured logging.
    init_tracing(&config);
    info!(
        host = config.server.host,
        port = config.server.port,
        store = ?config.store.backend,
        tiles = config.share.tile_endpoint.is_some(),
        geocoder = config.share.geocode_endpoint.is_some(),
        "potholes-server starting"
    );

    // 3. Build collaborators.
    let state = Arc::new(
        AppState::from_config(&config)
            .await
            .context("building application state")?,
    );

    // 4. Serve until interrupted.
    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            return;
        }
        info!("Ctrl-C received");
        trigger.cancel();
    });

    start_server(&config.server, state, shutdown)
        .await
        .context("running server")?;
    Ok(())
}

fn init_tracing(config: &ServiceConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    match config.logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}
