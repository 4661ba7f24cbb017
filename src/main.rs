// =============================================================================
// QuantDash Backend — Main Entry Point
// =============================================================================
//
// Wires the config, the shared state, the background upstream ticker stream,
// and the REST/WS server together, then waits for Ctrl+C.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod backtest;
mod config;
mod error;
mod market_data;
mod rate_limit;
mod report;
mod types;
mod upbit;

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::RuntimeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║            QuantDash Backend — Starting Up               ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = RuntimeConfig::load("config.json").unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });

    // Override markets and bind address from env if available.
    if let Ok(markets) = std::env::var("QUANTDASH_MARKETS") {
        config.live_markets = markets
            .split(',')
            .map(|m| m.trim().to_uppercase())
            .filter(|m| !m.is_empty())
            .collect();
    }
    if let Ok(addr) = std::env::var("QUANTDASH_BIND_ADDR") {
        config.bind_addr = addr;
    }

    info!(markets = ?config.live_markets, "Configured live markets");

    // ── 2. Build shared state ────────────────────────────────────────────
    let state = Arc::new(AppState::new(config));

    // ── 3. Spawn the upstream ticker stream ──────────────────────────────
    // Exactly one persistent subscription for the process lifetime; it
    // reconnects on its own and outlives every downstream subscriber.
    let hub = state.ticker_hub.clone();
    let stream_config = state.ticker_stream_config();
    tokio::spawn(async move {
        market_data::ticker_stream::run_ticker_service(hub, stream_config).await;
    });

    // ── 4. Start the API server ──────────────────────────────────────────
    let bind_addr = state.config.read().bind_addr.clone();
    let app = api::rest::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "API server listening");

    let server = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("API server failed");
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");
    server.abort();

    info!("QuantDash backend shut down complete.");
    Ok(())
}
