// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. The backtest and report routes are
// rate-limited per client IP; health and the live WebSocket are not.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Json, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::backtest::{self, BacktestParams, MIN_CANDLES};
use crate::error::ServiceError;
use crate::market_data::ohlcv;
use crate::report;
use crate::types::{BacktestRequest, BacktestResponse, ReportRequest};

/// Candle count above which the simulation leaves the async scheduler.
const BLOCKING_THRESHOLD: usize = 500;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST/WS router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/backtest", post(run_backtest))
        .route("/api/v1/report", post(generate_report))
        .route("/api/v1/live", get(crate::api::ws::live_handler))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health (never rate-limited)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    server_time: i64,
    live_subscribers: usize,
    tracked_markets: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.uptime_secs(),
        server_time: chrono::Utc::now().timestamp_millis(),
        live_subscribers: state.ticker_hub.subscriber_count(),
        tracked_markets: state.ticker_hub.tracked_market_count(),
    })
}

// =============================================================================
// Backtest
// =============================================================================

fn enforce_rate_limit(state: &AppState, addr: &SocketAddr) -> Result<(), ServiceError> {
    let decision = state.rate_limiter.check(addr.ip());
    if decision.allowed {
        Ok(())
    } else {
        Err(ServiceError::rate_limited(decision.retry_after_secs))
    }
}

async fn run_backtest(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<BacktestRequest>,
) -> Result<Json<BacktestResponse>, ServiceError> {
    enforce_rate_limit(&state, &addr)?;
    request.validate()?;

    let candle_ttl = state.candle_cache_ttl();
    let offset = state.exchange_utc_offset_hours();

    // The engine consumes 5 lookback days before producing the first row.
    let needed = request.days as usize + 5;
    let candles =
        ohlcv::fetch_daily_candles(&state.upbit, &request.market, needed, candle_ttl, offset)
            .await?;

    if candles.len() < MIN_CANDLES {
        return Err(ServiceError::invalid_input(format!(
            "not enough OHLCV history for {} ({} candles available, {MIN_CANDLES} required)",
            request.market,
            candles.len()
        )));
    }

    let params = BacktestParams {
        k: request.k,
        fee: request.fee,
        slippage: request.slippage,
        use_ma_filter: request.use_ma_filter,
    };

    // Large simulations are CPU-bound enough to stall other handlers.
    let daily_results = if candles.len() >= BLOCKING_THRESHOLD {
        let candles = candles.clone();
        tokio::task::spawn_blocking(move || backtest::simulate(&candles, &params))
            .await
            .map_err(|e| ServiceError::internal(format!("simulation task failed: {e}")))?
    } else {
        backtest::simulate(&candles, &params)
    };

    let trades = backtest::collect_trades(&daily_results);
    let trade_summary = backtest::summarize_trades(&trades);
    let metrics = backtest::compute_metrics(&daily_results, &trades);

    // Ticker enrichment is best-effort: a live-price hiccup must not fail an
    // otherwise complete backtest.
    let ticker =
        match ohlcv::fetch_market_ticker(&state.upbit, &request.market, request.k, candle_ttl)
            .await
        {
            Ok(ticker) => ticker,
            Err(e) => {
                warn!(market = %request.market, error = %e, "ticker enrichment failed");
                None
            }
        };

    info!(
        market = %request.market,
        days = metrics.total_days,
        trades = metrics.trade_count,
        "backtest complete"
    );

    Ok(Json(BacktestResponse {
        daily_results,
        trades,
        trade_summary,
        metrics,
        ticker,
    }))
}

// =============================================================================
// AI strategy report
// =============================================================================

async fn generate_report(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<ReportRequest>,
) -> Result<Json<report::StrategyReport>, ServiceError> {
    enforce_rate_limit(&state, &addr)?;
    request.validate()?;

    let key = report::cache_key(&request);
    if let Some(cached) = state.cache.get(&key) {
        if let Ok(cached_report) = serde_json::from_value::<report::StrategyReport>(cached) {
            return Ok(Json(cached_report));
        }
    }

    let generated = state.report_generator.generate(&request).await?;

    match serde_json::to_value(&generated) {
        Ok(value) => state.cache.put(key, value, state.report_cache_ttl()),
        Err(e) => warn!(error = %e, "report not cacheable"),
    }

    info!(market = %request.market, "strategy report generated");
    Ok(Json(generated))
}
