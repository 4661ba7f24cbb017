// =============================================================================
// API Contracts — request/response types and validation
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::backtest::{DailyResult, MetricSummary, Trade, TradeSummary};
use crate::error::ServiceError;
use crate::market_data::MarketTicker;

/// Bounds on the requested simulation length.
pub const MIN_DAYS: u32 = 10;
pub const MAX_DAYS: u32 = 2000;

// -----------------------------------------------------------------------------
// Backtest
// -----------------------------------------------------------------------------

/// `POST /api/v1/backtest` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct BacktestRequest {
    /// Upbit market code, e.g. `KRW-BTC`.
    pub market: String,
    /// Breakout range multiplier.
    pub k: f64,
    /// One-way fee as a fraction.
    pub fee: f64,
    /// One-way slippage as a fraction.
    #[serde(default)]
    pub slippage: f64,
    /// Number of simulated days.
    pub days: u32,
    /// Gate entries on the open being above the 5-day moving average.
    pub use_ma_filter: bool,
}

impl BacktestRequest {
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.market.trim().is_empty() {
            return Err(ServiceError::invalid_input("market must not be empty"));
        }
        if !self.k.is_finite() || self.k < 0.0 {
            return Err(ServiceError::invalid_input("k must be a non-negative number"));
        }
        if !self.fee.is_finite() || self.fee < 0.0 {
            return Err(ServiceError::invalid_input("fee must be a non-negative number"));
        }
        if !self.slippage.is_finite() || self.slippage < 0.0 {
            return Err(ServiceError::invalid_input(
                "slippage must be a non-negative number",
            ));
        }
        if !(MIN_DAYS..=MAX_DAYS).contains(&self.days) {
            return Err(ServiceError::invalid_input(format!(
                "days must be between {MIN_DAYS} and {MAX_DAYS}"
            )));
        }
        Ok(())
    }
}

/// `POST /api/v1/backtest` response body.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestResponse {
    pub daily_results: Vec<DailyResult>,
    pub trades: Vec<Trade>,
    pub trade_summary: TradeSummary,
    pub metrics: MetricSummary,
    /// Live market snapshot; absent when the ticker fetch fails.
    pub ticker: Option<MarketTicker>,
}

// -----------------------------------------------------------------------------
// AI strategy report
// -----------------------------------------------------------------------------

/// `POST /api/v1/report` request body: the strategy settings plus the metrics
/// the caller wants summarized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRequest {
    pub market: String,
    pub k: f64,
    pub fee: f64,
    #[serde(default)]
    pub slippage: f64,
    pub use_ma_filter: bool,
    pub metrics: MetricSummary,
}

impl ReportRequest {
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.market.trim().is_empty() {
            return Err(ServiceError::invalid_input("market must not be empty"));
        }
        if self.metrics.total_days == 0 {
            return Err(ServiceError::invalid_input(
                "metrics cover zero days; run a backtest first",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn valid_request() -> BacktestRequest {
        BacktestRequest {
            market: "KRW-BTC".to_string(),
            k: 0.5,
            fee: 0.0005,
            slippage: 0.0,
            days: 100,
            use_ma_filter: true,
        }
    }

    #[test]
    fn valid_request_passes() {
        assert!(valid_request().validate().is_ok());
    }

    #[test]
    fn slippage_defaults_to_zero() {
        let json = r#"{ "market": "KRW-BTC", "k": 0.5, "fee": 0.0005,
                        "days": 100, "use_ma_filter": false }"#;
        let req: BacktestRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.slippage, 0.0);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn days_bounds_are_enforced() {
        let mut req = valid_request();
        req.days = 9;
        assert!(req.validate().is_err());
        req.days = 10;
        assert!(req.validate().is_ok());
        req.days = 2000;
        assert!(req.validate().is_ok());
        req.days = 2001;
        assert!(req.validate().is_err());
    }

    #[test]
    fn negative_or_non_finite_parameters_are_rejected() {
        let mut req = valid_request();
        req.k = -0.1;
        assert!(req.validate().is_err());

        let mut req = valid_request();
        req.fee = f64::NAN;
        assert!(req.validate().is_err());

        let mut req = valid_request();
        req.slippage = -0.01;
        assert!(req.validate().is_err());

        let mut req = valid_request();
        req.market = "   ".to_string();
        assert!(req.validate().is_err());
    }

    #[test]
    fn report_request_rejects_zero_day_metrics() {
        let req = ReportRequest {
            market: "KRW-BTC".to_string(),
            k: 0.5,
            fee: 0.0005,
            slippage: 0.0,
            use_ma_filter: false,
            metrics: crate::backtest::MetricSummary {
                total_return_pct: 0.0,
                win_rate: 0.0,
                max_drawdown_pct: 0.0,
                cagr_pct: 0.0,
                trade_count: 0,
                total_days: 0,
            },
        };
        assert!(req.validate().is_err());
    }
}
