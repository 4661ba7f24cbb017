// =============================================================================
// Runtime Configuration — upstream endpoints, resilience knobs, calendars
// =============================================================================
//
// Every tunable lives here. All fields carry serde defaults so that older
// config files keep loading when new fields are added. Persistence uses the
// atomic tmp + rename pattern to prevent corruption on crash.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_upstream_rest_url() -> String {
    "https://api.upbit.com/v1".to_string()
}

fn default_upstream_ws_url() -> String {
    "wss://api.upbit.com/websocket/v1".to_string()
}

fn default_live_markets() -> Vec<String> {
    vec![
        "KRW-BTC".to_string(),
        "KRW-ETH".to_string(),
        "KRW-SOL".to_string(),
        "KRW-XRP".to_string(),
        "KRW-DOGE".to_string(),
    ]
}

fn default_exchange_utc_offset_hours() -> i32 {
    // Upbit daily candles roll over on the KST trading day.
    9
}

fn default_candle_cache_ttl_secs() -> u64 {
    60
}

fn default_report_cache_ttl_secs() -> u64 {
    600
}

fn default_breaker_threshold() -> u32 {
    5
}

fn default_breaker_cooldown_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    400
}

fn default_rate_limit_window_secs() -> u64 {
    60
}

fn default_rate_limit_max_requests() -> u32 {
    10
}

fn default_ticker_backoff_initial_secs() -> u64 {
    1
}

fn default_ticker_backoff_max_secs() -> u64 {
    60
}

fn default_gemini_api_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        .to_string()
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Server ------------------------------------------------------------

    /// Address the REST/WS server binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    // --- Upstream exchange --------------------------------------------------

    /// Base URL of the Upbit REST API.
    #[serde(default = "default_upstream_rest_url")]
    pub upstream_rest_url: String,

    /// URL of the Upbit streaming WebSocket.
    #[serde(default = "default_upstream_ws_url")]
    pub upstream_ws_url: String,

    /// Market codes the live ticker stream subscribes to.
    #[serde(default = "default_live_markets")]
    pub live_markets: Vec<String>,

    /// UTC offset (hours) of the exchange's trading-day calendar. Candles
    /// dated "today" in this calendar are still accumulating and get dropped
    /// by the OHLCV pipeline.
    #[serde(default = "default_exchange_utc_offset_hours")]
    pub exchange_utc_offset_hours: i32,

    // --- Caching ------------------------------------------------------------

    /// TTL for cached daily-candle pages. Zero disables candle caching.
    #[serde(default = "default_candle_cache_ttl_secs")]
    pub candle_cache_ttl_secs: u64,

    /// TTL for cached AI strategy reports. Zero disables report caching.
    #[serde(default = "default_report_cache_ttl_secs")]
    pub report_cache_ttl_secs: u64,

    // --- Circuit breaker ----------------------------------------------------

    /// Consecutive failures per endpoint before the breaker opens.
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,

    /// How long an open breaker fast-fails before allowing traffic again.
    #[serde(default = "default_breaker_cooldown_secs")]
    pub breaker_cooldown_secs: u64,

    // --- Retry --------------------------------------------------------------

    /// Total attempts per upstream call (first try included).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay for exponential backoff between attempts.
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    // --- Per-client rate limiting -------------------------------------------

    /// Length of the fixed rate-limit window.
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,

    /// Requests allowed per client per window on guarded routes.
    #[serde(default = "default_rate_limit_max_requests")]
    pub rate_limit_max_requests: u32,

    // --- Live ticker reconnect ----------------------------------------------

    /// Initial reconnect delay after a stream failure.
    #[serde(default = "default_ticker_backoff_initial_secs")]
    pub ticker_backoff_initial_secs: u64,

    /// Cap on the reconnect delay.
    #[serde(default = "default_ticker_backoff_max_secs")]
    pub ticker_backoff_max_secs: u64,

    // --- AI report collaborator ---------------------------------------------

    /// Endpoint of the report-generation LLM. The API key comes from the
    /// GEMINI_API_KEY environment variable, never from this file.
    #[serde(default = "default_gemini_api_url")]
    pub gemini_api_url: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            upstream_rest_url: default_upstream_rest_url(),
            upstream_ws_url: default_upstream_ws_url(),
            live_markets: default_live_markets(),
            exchange_utc_offset_hours: default_exchange_utc_offset_hours(),
            candle_cache_ttl_secs: default_candle_cache_ttl_secs(),
            report_cache_ttl_secs: default_report_cache_ttl_secs(),
            breaker_threshold: default_breaker_threshold(),
            breaker_cooldown_secs: default_breaker_cooldown_secs(),
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
            rate_limit_max_requests: default_rate_limit_max_requests(),
            ticker_backoff_initial_secs: default_ticker_backoff_initial_secs(),
            ticker_backoff_max_secs: default_ticker_backoff_max_secs(),
            gemini_api_url: default_gemini_api_url(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(
            path = %path.display(),
            markets = ?config.live_markets,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.upstream_rest_url, "https://api.upbit.com/v1");
        assert_eq!(cfg.live_markets.len(), 5);
        assert_eq!(cfg.live_markets[0], "KRW-BTC");
        assert_eq!(cfg.exchange_utc_offset_hours, 9);
        assert_eq!(cfg.breaker_threshold, 5);
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.rate_limit_max_requests, 10);
        assert_eq!(cfg.ticker_backoff_initial_secs, 1);
        assert_eq!(cfg.ticker_backoff_max_secs, 60);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080");
        assert_eq!(cfg.candle_cache_ttl_secs, 60);
        assert_eq!(cfg.breaker_cooldown_secs, 30);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "live_markets": ["KRW-ETH"], "breaker_threshold": 3 }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.live_markets, vec!["KRW-ETH"]);
        assert_eq!(cfg.breaker_threshold, 3);
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.rate_limit_window_secs, 60);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.live_markets, cfg2.live_markets);
        assert_eq!(cfg.breaker_threshold, cfg2.breaker_threshold);
        assert_eq!(cfg.bind_addr, cfg2.bind_addr);
    }
}
