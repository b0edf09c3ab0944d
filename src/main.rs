// =============================================================================
// Signal Desk — Main Entry Point
// =============================================================================
//
// Loads the runtime config, runs the first refresh cycle, arms the
// auto-refresh timer and serves the control API until Ctrl+C.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod indicators;
mod market_data;
mod refresh;
mod runtime_config;
mod strategy;
mod types;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::market_data::BybitClient;
use crate::refresh::RefreshOrchestrator;
use crate::runtime_config::RuntimeConfig;

const DEFAULT_CONFIG_PATH: &str = "signal_desk.json";

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Signal Desk starting up");

    let config_path = PathBuf::from(
        std::env::var("SIGNAL_DESK_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into()),
    );

    let mut config = RuntimeConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, path = %config_path.display(), "Failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_env_overrides();

    info!(
        symbols = ?config.symbols.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
        capital = config.capital_per_signal,
        auto_refresh = config.auto_refresh,
        interval_ms = config.refresh_interval.as_millis(),
        "Configuration loaded"
    );

    // ── 2. Market data provider ──────────────────────────────────────────
    let source = Arc::new(BybitClient::new(
        config.provider_base_url.clone(),
        config.request_timeout(),
    )?);

    // ── 3. Orchestrator & shared state ───────────────────────────────────
    let orchestrator = Arc::new(RefreshOrchestrator::new(source, config.clone()));
    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState::new(config, orchestrator.clone(), Some(config_path.clone())));

    orchestrator.start()?;

    // ── 4. Control API ───────────────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "API server listening");

    let app = api::router(state.clone());
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server failed");
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received, stopping");

    orchestrator.shutdown();

    if let Err(e) = state.config().save(&config_path) {
        error!(error = %e, "Failed to save runtime config on shutdown");
    }

    info!("Signal Desk shut down complete.");
    Ok(())
}
