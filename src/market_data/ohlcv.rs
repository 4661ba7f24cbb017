// =============================================================================
// OHLCV Pipeline — paginated daily-candle assembly from the Upbit REST API
// =============================================================================
//
// `/candles/days` returns at most 200 rows per call, newest first, and pages
// backward in time through the `to` cursor (the oldest `candle_date_time_utc`
// seen so far). The pipeline accumulates pages until it has one row more than
// requested, drops the still-open "today" candle (today in the exchange's
// trading-day calendar), trims to the most recent `n`, and returns the series
// oldest-first. A hole in the day sequence means the upstream data cannot be
// trusted and the whole fetch is aborted.
// =============================================================================

use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::ServiceError;
use crate::upbit::UpbitClient;

/// Upstream page size limit for `/candles/days`.
const MAX_PAGE_SIZE: usize = 200;

/// One closed trading day of OHLCV data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candle {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Live market snapshot returned alongside a backtest: current price plus
/// today's breakout target and MA5, derived from the last closed candles.
#[derive(Debug, Clone, Serialize)]
pub struct MarketTicker {
    pub market: String,
    pub current_price: f64,
    pub opening_price: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub target_price: f64,
    pub ma5: f64,
    pub signed_change_rate: f64,
}

// -----------------------------------------------------------------------------
// Row parsing
// -----------------------------------------------------------------------------

fn require_f64(row: &Value, field: &str) -> Result<f64, ServiceError> {
    row[field].as_f64().ok_or_else(|| {
        ServiceError::malformed_upstream(format!("candle row missing numeric field {field}"))
    })
}

/// Parse one upstream candle row. The trading date is the row's UTC open time
/// shifted into the exchange's local calendar.
fn parse_candle_row(row: &Value, utc_offset_hours: i32) -> Result<Candle, ServiceError> {
    let utc_str = row["candle_date_time_utc"].as_str().ok_or_else(|| {
        ServiceError::malformed_upstream("candle row missing candle_date_time_utc")
    })?;

    let opened_utc = NaiveDateTime::parse_from_str(utc_str, "%Y-%m-%dT%H:%M:%S")
        .map_err(|_| {
            ServiceError::malformed_upstream(format!("unparseable candle timestamp {utc_str}"))
        })?;
    let date = (opened_utc + chrono::Duration::hours(utc_offset_hours as i64)).date();

    Ok(Candle {
        date,
        open: require_f64(row, "opening_price")?,
        high: require_f64(row, "high_price")?,
        low: require_f64(row, "low_price")?,
        close: require_f64(row, "trade_price")?,
        volume: require_f64(row, "candle_acc_trade_volume")?,
    })
}

/// Today's date in the exchange's trading-day calendar.
pub fn exchange_today(utc_offset_hours: i32) -> NaiveDate {
    (Utc::now() + chrono::Duration::hours(utc_offset_hours as i64)).date_naive()
}

// -----------------------------------------------------------------------------
// Series assembly (pure — separated from paging for testability)
// -----------------------------------------------------------------------------

/// Turn raw newest-first upstream rows into a clean ascending series of the
/// `n` most recent closed candles: parse, drop `today`, trim, reverse, and
/// verify day-over-day contiguity.
fn assemble_series(
    rows: &[Value],
    n: usize,
    utc_offset_hours: i32,
    today: NaiveDate,
) -> Result<Vec<Candle>, ServiceError> {
    let mut candles = rows
        .iter()
        .map(|row| parse_candle_row(row, utc_offset_hours))
        .collect::<Result<Vec<_>, _>>()?;

    candles.retain(|c| c.date != today);
    candles.truncate(n);
    candles.reverse();

    for pair in candles.windows(2) {
        let gap = pair[1].date - pair[0].date;
        if gap != chrono::Duration::days(1) {
            return Err(ServiceError::malformed_upstream(format!(
                "candle series has a gap between {} and {}",
                pair[0].date, pair[1].date
            )));
        }
    }

    Ok(candles)
}

// -----------------------------------------------------------------------------
// Paged fetch
// -----------------------------------------------------------------------------

/// Fetch the most recent `n` closed daily candles for `market`, oldest first.
///
/// Returns an empty vec when the upstream has no history at all; the caller
/// decides whether that is an error.
pub async fn fetch_daily_candles(
    client: &UpbitClient,
    market: &str,
    n: usize,
    cache_ttl: Duration,
    utc_offset_hours: i32,
) -> Result<Vec<Candle>, ServiceError> {
    // One extra row beyond `n` so dropping today still leaves enough.
    let want = n + 1;
    let mut rows: Vec<Value> = Vec::with_capacity(want);
    let mut cursor: Option<String> = None;

    loop {
        let remaining = want.saturating_sub(rows.len());
        if remaining == 0 {
            break;
        }

        let batch = remaining.min(MAX_PAGE_SIZE);
        let mut params = vec![
            ("market".to_string(), market.to_string()),
            ("count".to_string(), batch.to_string()),
        ];
        if let Some(to) = &cursor {
            params.push(("to".to_string(), to.clone()));
        }

        let page = client.fetch_rows("/candles/days", &params, cache_ttl).await?;
        if page.is_empty() {
            break;
        }

        // The page is newest-first; its last row is the oldest seen so far
        // and becomes the next cursor.
        cursor = Some(
            page.last()
                .and_then(|row| row["candle_date_time_utc"].as_str())
                .ok_or_else(|| {
                    ServiceError::malformed_upstream("candle row missing candle_date_time_utc")
                })?
                .to_string(),
        );

        let short_page = page.len() < batch;
        rows.extend(page);
        debug!(market, total = rows.len(), "candle page accumulated");

        if short_page {
            // No more history upstream.
            break;
        }
    }

    if rows.is_empty() {
        return Ok(Vec::new());
    }

    assemble_series(&rows, n, utc_offset_hours, exchange_today(utc_offset_hours))
}

// -----------------------------------------------------------------------------
// Current-ticker enrichment
// -----------------------------------------------------------------------------

/// Fetch the live ticker for `market` and derive today's breakout target and
/// MA5 from the most recent candles. Ticker responses are never cached.
pub async fn fetch_market_ticker(
    client: &UpbitClient,
    market: &str,
    k: f64,
    cache_ttl: Duration,
) -> Result<Option<MarketTicker>, ServiceError> {
    let ticker_rows = client
        .fetch_rows(
            "/ticker",
            &[("markets".to_string(), market.to_string())],
            Duration::ZERO,
        )
        .await?;

    let Some(ticker) = ticker_rows.first() else {
        return Ok(None);
    };

    let candle_rows = client
        .fetch_rows(
            "/candles/days",
            &[
                ("market".to_string(), market.to_string()),
                ("count".to_string(), "6".to_string()),
            ],
            cache_ttl,
        )
        .await?;

    if candle_rows.is_empty() {
        return Ok(None);
    }

    // MA5 from the five most recent *closed* days (rows are newest-first and
    // row 0 is today); fall back to whatever history exists.
    let ma_source: &[Value] = if candle_rows.len() >= 6 {
        &candle_rows[1..6]
    } else if candle_rows.len() > 1 {
        &candle_rows[1..]
    } else {
        &candle_rows[..]
    };
    let mut ma5 = 0.0;
    for row in ma_source {
        ma5 += require_f64(row, "trade_price")?;
    }
    ma5 /= ma_source.len() as f64;

    let prev_day = candle_rows.get(1).unwrap_or(&candle_rows[0]);
    let prev_range = require_f64(prev_day, "high_price")? - require_f64(prev_day, "low_price")?;

    let opening_price = require_f64(ticker, "opening_price")?;

    Ok(Some(MarketTicker {
        market: ticker["market"].as_str().unwrap_or(market).to_string(),
        current_price: require_f64(ticker, "trade_price")?,
        opening_price,
        high_price: require_f64(ticker, "high_price")?,
        low_price: require_f64(ticker, "low_price")?,
        target_price: opening_price + prev_range * k,
        ma5,
        signed_change_rate: require_f64(ticker, "signed_change_rate")?,
    }))
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    /// Upbit-shaped daily candle row. The real API reports daily candles with
    /// a midnight-UTC open time, which maps to the same calendar date in KST.
    fn row(d: &str, close: f64) -> Value {
        json!({
            "market": "KRW-BTC",
            "candle_date_time_utc": format!("{d}T00:00:00"),
            "candle_date_time_kst": format!("{d}T09:00:00"),
            "opening_price": close - 1.0,
            "high_price": close + 2.0,
            "low_price": close - 2.0,
            "trade_price": close,
            "candle_acc_trade_volume": 10.0,
        })
    }

    #[test]
    fn parse_shifts_utc_open_time_into_exchange_calendar() {
        // 20:00 UTC is already the next day in KST (+9).
        let raw = json!({
            "candle_date_time_utc": "2024-03-01T20:00:00",
            "opening_price": 1.0,
            "high_price": 2.0,
            "low_price": 0.5,
            "trade_price": 1.5,
            "candle_acc_trade_volume": 3.0,
        });
        let candle = parse_candle_row(&raw, 9).unwrap();
        assert_eq!(candle.date, date("2024-03-02"));

        let candle_utc = parse_candle_row(&raw, 0).unwrap();
        assert_eq!(candle_utc.date, date("2024-03-01"));
    }

    #[test]
    fn assemble_drops_today_trims_and_orders_ascending() {
        // Newest-first rows including the still-open "today" candle.
        let rows = vec![
            row("2024-03-05", 105.0), // today — must be dropped
            row("2024-03-04", 104.0),
            row("2024-03-03", 103.0),
            row("2024-03-02", 102.0),
            row("2024-03-01", 101.0),
        ];
        let series = assemble_series(&rows, 3, 9, date("2024-03-05")).unwrap();

        assert_eq!(series.len(), 3);
        assert_eq!(series[0].date, date("2024-03-02"));
        assert_eq!(series[2].date, date("2024-03-04"));
        assert_eq!(series[2].close, 104.0);
    }

    #[test]
    fn assemble_keeps_all_rows_when_today_is_absent() {
        let rows = vec![row("2024-03-04", 104.0), row("2024-03-03", 103.0)];
        let series = assemble_series(&rows, 2, 9, date("2024-03-06")).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].date, date("2024-03-03"));
    }

    #[test]
    fn assemble_aborts_on_a_day_gap() {
        let rows = vec![
            row("2024-03-05", 105.0),
            row("2024-03-03", 103.0), // 03-04 missing
            row("2024-03-02", 102.0),
        ];
        let err = assemble_series(&rows, 3, 9, date("2024-03-09")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedUpstream);
    }

    #[test]
    fn assemble_rejects_row_missing_a_price_field() {
        let mut bad = row("2024-03-03", 103.0);
        bad.as_object_mut().unwrap().remove("high_price");
        let err = assemble_series(&[bad], 1, 9, date("2024-03-09")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedUpstream);
    }

    #[test]
    fn empty_input_assembles_to_empty_series() {
        let series = assemble_series(&[], 10, 9, date("2024-03-09")).unwrap();
        assert!(series.is_empty());
    }

    // -------------------------------------------------------------------------
    // Paged fetch against a local in-process upstream
    // -------------------------------------------------------------------------

    mod paging {
        use super::*;
        use crate::config::RuntimeConfig;
        use crate::upbit::TtlCache;
        use axum::{
            extract::{Query, State},
            routing::get,
            Json, Router,
        };
        use std::collections::HashMap;
        use std::sync::Arc;

        /// Serve a fixed newest-first candle dataset with Upbit's paging
        /// contract: `count` rows strictly older than `to`.
        async fn candles(
            State(rows): State<Arc<Vec<Value>>>,
            Query(params): Query<HashMap<String, String>>,
        ) -> Json<Value> {
            let count: usize = params
                .get("count")
                .and_then(|c| c.parse().ok())
                .unwrap_or(MAX_PAGE_SIZE);
            let to = params.get("to");

            let page: Vec<Value> = rows
                .iter()
                .filter(|row| match to {
                    Some(cursor) => {
                        row["candle_date_time_utc"].as_str().unwrap() < cursor.as_str()
                    }
                    None => true,
                })
                .take(count)
                .cloned()
                .collect();

            Json(Value::Array(page))
        }

        async fn spawn_upstream(rows: Vec<Value>) -> String {
            let app = Router::new()
                .route("/candles/days", get(candles))
                .with_state(Arc::new(rows));
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });
            format!("http://{addr}")
        }

        /// Newest-first contiguous dataset ending at the exchange's "today".
        fn dataset(days: usize) -> Vec<Value> {
            let today = exchange_today(9);
            (0..days)
                .map(|i| {
                    let d = today - chrono::Duration::days(i as i64);
                    row(&d.format("%Y-%m-%d").to_string(), 100.0 + i as f64)
                })
                .collect()
        }

        #[tokio::test]
        async fn paginates_excludes_today_and_returns_ascending() {
            let base = spawn_upstream(dataset(500)).await;
            let config = RuntimeConfig {
                upstream_rest_url: base,
                base_backoff_ms: 5,
                ..RuntimeConfig::default()
            };
            let client = UpbitClient::new(&config, Arc::new(TtlCache::new()));

            // 405 > 2 pages of 200; forces the cursor path.
            let series = fetch_daily_candles(&client, "KRW-BTC", 405, Duration::ZERO, 9)
                .await
                .unwrap();

            assert_eq!(series.len(), 405);
            let today = exchange_today(9);
            assert!(series.iter().all(|c| c.date != today));
            assert_eq!(series.last().unwrap().date, today - chrono::Duration::days(1));
            for pair in series.windows(2) {
                assert_eq!(pair[1].date - pair[0].date, chrono::Duration::days(1));
            }
        }

        #[tokio::test]
        async fn short_history_returns_what_exists() {
            let base = spawn_upstream(dataset(8)).await;
            let config = RuntimeConfig {
                upstream_rest_url: base,
                base_backoff_ms: 5,
                ..RuntimeConfig::default()
            };
            let client = UpbitClient::new(&config, Arc::new(TtlCache::new()));

            let series = fetch_daily_candles(&client, "KRW-BTC", 50, Duration::ZERO, 9)
                .await
                .unwrap();

            // 8 rows minus the today candle.
            assert_eq!(series.len(), 7);
        }

        #[tokio::test]
        async fn empty_upstream_yields_empty_series() {
            let base = spawn_upstream(Vec::new()).await;
            let config = RuntimeConfig {
                upstream_rest_url: base,
                base_backoff_ms: 5,
                ..RuntimeConfig::default()
            };
            let client = UpbitClient::new(&config, Arc::new(TtlCache::new()));

            let series = fetch_daily_candles(&client, "KRW-BTC", 50, Duration::ZERO, 9)
                .await
                .unwrap();
            assert!(series.is_empty());
        }
    }
}
