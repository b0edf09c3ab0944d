// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// Boundary between the refresh orchestrator and whatever renders it. All
// endpoints live under `/api/v1/`:
//
//   GET    /health            liveness
//   GET    /signals           current result set + loading / error status
//   GET    /config            current configuration
//   POST   /config            partial configuration update
//   POST   /symbols           add one symbol
//   DELETE /symbols/:symbol   remove one symbol
//   POST   /refresh           manual refresh (auto refresh must be off)
//
// CORS is configured permissively for development.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::api::error::ApiError;
use crate::app_state::AppState;
use crate::runtime_config::{RefreshInterval, RuntimeConfig};
use crate::types::Symbol;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/signals", get(signals))
        .route("/api/v1/config", get(get_config).post(update_config))
        .route("/api/v1/symbols", post(add_symbol))
        .route("/api/v1/symbols/:symbol", delete(remove_symbol))
        .route("/api/v1/refresh", post(refresh))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    server_time: i64,
    uptime_secs: u64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        server_time: chrono::Utc::now().timestamp_millis(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

// =============================================================================
// Signals
// =============================================================================

async fn signals(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.orchestrator.snapshot())
}

// =============================================================================
// Configuration
// =============================================================================

async fn get_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.config())
}

#[derive(Deserialize)]
struct ConfigUpdate {
    #[serde(default)]
    symbols: Option<Vec<String>>,
    #[serde(default)]
    capital_per_signal: Option<f64>,
    #[serde(default)]
    refresh_interval_ms: Option<u64>,
    #[serde(default)]
    auto_refresh: Option<bool>,
}

#[derive(Serialize)]
struct ConfigResponse {
    config: RuntimeConfig,
    /// Sequence number of the cycle the edit started, if any.
    cycle: Option<u64>,
}

async fn update_config(
    State(state): State<Arc<AppState>>,
    Json(update): Json<ConfigUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let change = state.edit_config(|cfg| -> Result<(), ApiError> {
        if let Some(raw) = &update.symbols {
            let mut symbols: Vec<Symbol> = Vec::with_capacity(raw.len());
            for s in raw {
                let symbol = Symbol::parse(s)?;
                if !symbols.contains(&symbol) {
                    symbols.push(symbol);
                }
            }
            cfg.symbols = symbols;
        }
        if let Some(capital) = update.capital_per_signal {
            cfg.set_capital(capital);
        }
        if let Some(ms) = update.refresh_interval_ms {
            cfg.refresh_interval = RefreshInterval::try_from(ms)?;
        }
        if let Some(auto) = update.auto_refresh {
            cfg.auto_refresh = auto;
        }
        Ok(())
    })?;

    info!(
        symbols = change.config.symbols.len(),
        capital = change.config.capital_per_signal,
        auto_refresh = change.config.auto_refresh,
        interval_ms = change.config.refresh_interval.as_millis(),
        "Configuration updated via API"
    );

    Ok(Json(ConfigResponse {
        cycle: change.cycle.map(|c| c.seq),
        config: change.config,
    }))
}

// =============================================================================
// Symbols
// =============================================================================

#[derive(Deserialize)]
struct AddSymbolRequest {
    symbol: String,
}

async fn add_symbol(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddSymbolRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let change = state.edit_config(|cfg| cfg.add_symbol(&req.symbol).map_err(ApiError::from))?;

    let status = if change.value {
        info!(symbol = %req.symbol.trim().to_uppercase(), "Symbol added via API");
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        Json(ConfigResponse {
            cycle: change.cycle.map(|c| c.seq),
            config: change.config,
        }),
    ))
}

async fn remove_symbol(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let change = state.edit_config(|cfg| {
        if cfg.remove_symbol(&symbol) {
            Ok(())
        } else {
            Err(ApiError::NotFound(format!("symbol '{symbol}' is not configured")))
        }
    })?;

    info!(symbol = %symbol, "Symbol removed via API");

    Ok(Json(ConfigResponse {
        cycle: change.cycle.map(|c| c.seq),
        config: change.config,
    }))
}

// =============================================================================
// Manual refresh
// =============================================================================

#[derive(Serialize)]
struct RefreshResponse {
    cycle: u64,
}

async fn refresh(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let handle = state.orchestrator.refresh_now()?;
    info!(cycle = handle.seq, "Manual refresh requested via API");
    Ok((StatusCode::ACCEPTED, Json(RefreshResponse { cycle: handle.seq })))
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::{Candle, KlineSeries, MarketDataError, MarketDataSource, Ticker};
    use crate::refresh::RefreshOrchestrator;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct FlatSource;

    #[async_trait]
    impl MarketDataSource for FlatSource {
        async fn fetch_ticker(&self, symbol: &Symbol) -> Result<Ticker, MarketDataError> {
            Ok(Ticker {
                symbol: symbol.clone(),
                last_price: 10.0,
                mark_price: 10.0,
                change_24h_pct: 0.0,
                turnover_24h: 0.0,
            })
        }

        async fn fetch_klines(
            &self,
            _symbol: &Symbol,
            _interval_minutes: u32,
            limit: u32,
        ) -> Result<KlineSeries, MarketDataError> {
            Ok((0..limit)
                .map(|i| Candle { start_ms: i as i64, open: 10.0, high: 10.01, low: 9.99, close: 10.0 })
                .collect())
        }
    }

    fn test_state(auto_refresh: bool) -> Arc<AppState> {
        let config = RuntimeConfig {
            symbols: vec![Symbol::parse("BTCUSDT").unwrap()],
            auto_refresh,
            ..RuntimeConfig::default()
        };
        let orchestrator = Arc::new(RefreshOrchestrator::new(Arc::new(FlatSource), config.clone()));
        Arc::new(AppState::new(config, orchestrator, None))
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder().method(method).uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = router(test_state(false));
        let resp = app.oneshot(empty_request("GET", "/api/v1/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "ok");
    }

    #[tokio::test]
    async fn manual_refresh_conflicts_while_auto_on() {
        let app = router(test_state(true));
        let resp = app.oneshot(empty_request("POST", "/api/v1/refresh")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn signals_reflect_completed_cycle() {
        let state = test_state(false);
        state.orchestrator.refresh_now().unwrap().wait().await;

        let resp = router(state).oneshot(empty_request("GET", "/api/v1/signals")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["loading"], false);
        assert_eq!(body["has_partial_failures"], false);
        assert_eq!(body["results"]["signals"][0]["status"], "success");
        assert_eq!(body["results"]["signals"][0]["symbol"], "BTCUSDT");
    }

    #[tokio::test]
    async fn add_symbol_normalises_and_starts_cycle() {
        let state = test_state(false);
        let app = router(state.clone());

        let resp = app
            .clone()
            .oneshot(json_request("POST", "/api/v1/symbols", serde_json::json!({ "symbol": " dogeusdt" })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = body_json(resp).await;
        assert_eq!(body["config"]["symbols"][1], "DOGEUSDT");
        assert!(body["cycle"].is_u64());

        // Duplicate add is accepted but changes nothing.
        let resp = app
            .oneshot(json_request("POST", "/api/v1/symbols", serde_json::json!({ "symbol": "DOGEUSDT" })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_json(resp).await["cycle"].is_null());
        assert_eq!(state.config().symbols.len(), 2);
    }

    #[tokio::test]
    async fn invalid_symbol_is_rejected() {
        let app = router(test_state(false));
        let resp = app
            .oneshot(json_request("POST", "/api/v1/symbols", serde_json::json!({ "symbol": "BTCEUR" })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn remove_unknown_symbol_is_not_found() {
        let app = router(test_state(false));
        let resp = app.oneshot(empty_request("DELETE", "/api/v1/symbols/ETHUSDT")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn config_update_validates_interval_and_clamps_capital() {
        let state = test_state(false);
        let app = router(state.clone());

        let resp = app
            .clone()
            .oneshot(json_request("POST", "/api/v1/config", serde_json::json!({ "refresh_interval_ms": 1234 })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let resp = app
            .oneshot(json_request(
                "POST",
                "/api/v1/config",
                serde_json::json!({ "capital_per_signal": 1, "refresh_interval_ms": 60000, "auto_refresh": true }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["config"]["capital_per_signal"], 5.0);
        assert_eq!(body["config"]["refresh_interval_ms"], 60000);

        assert!(state.config().auto_refresh);
        assert_eq!(
            state.orchestrator.timer_period(),
            Some(std::time::Duration::from_secs(60))
        );
    }
}
