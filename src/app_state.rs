// =============================================================================
// Central Application State — QuantDash backend
// =============================================================================
//
// The single source of truth shared by every request handler and background
// task. Each subsystem owns its own lock-guarded tables; AppState ties them
// together via constructor injection so nothing lives in ambient globals.
//
// Thread safety:
//   - parking_lot locks inside each subsystem, held only across map ops.
//   - Arc wrappers for subsystems shared with background tasks.
// =============================================================================

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::config::RuntimeConfig;
use crate::market_data::{TickerHub, TickerStreamConfig};
use crate::rate_limit::RateLimiter;
use crate::report::ReportGenerator;
use crate::upbit::{TtlCache, UpbitClient};

/// Shared application state, wrapped in `Arc` immediately after construction.
pub struct AppState {
    // ── Configuration ───────────────────────────────────────────────────
    pub config: Arc<RwLock<RuntimeConfig>>,

    // ── Upstream access ─────────────────────────────────────────────────
    /// Response cache shared by market-data and report lookups.
    pub cache: Arc<TtlCache>,
    pub upbit: Arc<UpbitClient>,

    // ── Request guarding ────────────────────────────────────────────────
    pub rate_limiter: RateLimiter,

    // ── Live ticker distribution ────────────────────────────────────────
    pub ticker_hub: Arc<TickerHub>,

    // ── AI report collaborator ──────────────────────────────────────────
    pub report_generator: ReportGenerator,

    // ── Timing ──────────────────────────────────────────────────────────
    /// Instant when the service started. Used for uptime reporting.
    pub start_time: Instant,
}

impl AppState {
    /// Construct the full state tree from the runtime configuration.
    pub fn new(config: RuntimeConfig) -> Self {
        let cache = Arc::new(TtlCache::new());
        let upbit = Arc::new(UpbitClient::new(&config, cache.clone()));

        let rate_limiter = RateLimiter::new(
            Duration::from_secs(config.rate_limit_window_secs),
            config.rate_limit_max_requests,
        );

        let report_generator = ReportGenerator::new(
            config.gemini_api_url.clone(),
            std::env::var("GEMINI_API_KEY").unwrap_or_default(),
        );

        Self {
            config: Arc::new(RwLock::new(config)),
            cache,
            upbit,
            rate_limiter,
            ticker_hub: Arc::new(TickerHub::new()),
            report_generator,
            start_time: Instant::now(),
        }
    }

    // ── Config accessors ────────────────────────────────────────────────

    pub fn candle_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.config.read().candle_cache_ttl_secs)
    }

    pub fn report_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.config.read().report_cache_ttl_secs)
    }

    pub fn exchange_utc_offset_hours(&self) -> i32 {
        self.config.read().exchange_utc_offset_hours
    }

    /// Settings for the background upstream ticker stream.
    pub fn ticker_stream_config(&self) -> TickerStreamConfig {
        let config = self.config.read();
        TickerStreamConfig {
            url: config.upstream_ws_url.clone(),
            markets: config.live_markets.clone(),
            initial_backoff: Duration::from_secs(config.ticker_backoff_initial_secs),
            max_backoff: Duration::from_secs(config.ticker_backoff_max_secs),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
