// =============================================================================
// Backtest Engine — volatility-breakout simulation and portfolio metrics
// =============================================================================
//
// Pure functions from a daily candle series to per-day results, materialized
// trades, and aggregate statistics. Nothing here touches the network, the
// clock, or shared state, so repeated calls over the same input are
// bit-identical.
//
// Strategy: each day's breakout target is the day's open plus the previous
// day's range scaled by `k`. A day enters when its high crosses the target
// (optionally gated on the open sitting above the 5-day moving average). The
// round-trip cost (fee + slippage) is applied once on entry and once on exit.
// =============================================================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::market_data::Candle;

/// Days of history required before the first tradeable day.
const LOOKBACK_DAYS: usize = 5;

/// Minimum series length: the lookback plus one tradeable day.
pub const MIN_CANDLES: usize = LOOKBACK_DAYS + 1;

// -----------------------------------------------------------------------------
// Inputs & outputs
// -----------------------------------------------------------------------------

/// Strategy parameters for one simulation run.
#[derive(Debug, Clone, Copy)]
pub struct BacktestParams {
    /// Breakout range multiplier.
    pub k: f64,
    /// One-way fee as a fraction (0.0005 = 5 bp).
    pub fee: f64,
    /// One-way slippage as a fraction.
    pub slippage: f64,
    /// Require the open above the 5-day moving average to enter.
    pub use_ma_filter: bool,
}

/// Outcome of one simulated day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyResult {
    pub date: NaiveDate,
    pub close_price: f64,
    pub target_price: f64,
    pub ma5: f64,
    pub entered: bool,
    /// The day's return in percent; 0 for non-entered days.
    pub return_pct: f64,
    /// Holding-period return multiplier after this day.
    pub cumulative_return: f64,
}

/// A materialized entry: bought at the breakout target, sold at the close.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    pub date: NaiveDate,
    pub entry_price: f64,
    pub exit_price: f64,
    pub return_pct: f64,
}

/// Aggregate statistics over the trade list. All zero when nothing traded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeSummary {
    pub count: usize,
    pub win_rate: f64,
    pub avg_return_pct: f64,
    pub best_return_pct: f64,
    pub worst_return_pct: f64,
}

/// Portfolio-level statistics over the whole simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub total_return_pct: f64,
    pub win_rate: f64,
    pub max_drawdown_pct: f64,
    pub cagr_pct: f64,
    pub trade_count: usize,
    pub total_days: usize,
}

// -----------------------------------------------------------------------------
// Simulation
// -----------------------------------------------------------------------------

/// Simulate the breakout strategy over `candles` (ascending by date).
///
/// The first [`LOOKBACK_DAYS`] candles only seed the moving average and
/// produce no result rows; fewer than [`MIN_CANDLES`] candles yield an empty
/// result.
pub fn simulate(candles: &[Candle], params: &BacktestParams) -> Vec<DailyResult> {
    if candles.len() < MIN_CANDLES {
        return Vec::new();
    }

    // Round-trip cost multiplier, applied once on entry and once on exit.
    let fee_multiplier = (1.0 - (params.fee + params.slippage).min(1.0)).max(0.0);

    let mut cumulative = 1.0;
    let mut results = Vec::with_capacity(candles.len() - LOOKBACK_DAYS);

    for i in LOOKBACK_DAYS..candles.len() {
        let prev = &candles[i - 1];
        let curr = &candles[i];

        let ma5 = candles[i - LOOKBACK_DAYS..i]
            .iter()
            .map(|c| c.close)
            .sum::<f64>()
            / LOOKBACK_DAYS as f64;

        let target = curr.open + (prev.high - prev.low) * params.k;

        let mut entered = curr.high > target;
        if params.use_ma_filter {
            entered = entered && curr.open > ma5;
        }

        let day_return = if entered {
            (curr.close / target) * fee_multiplier * fee_multiplier
        } else {
            1.0
        };
        cumulative *= day_return;

        results.push(DailyResult {
            date: curr.date,
            close_price: curr.close,
            target_price: target,
            ma5,
            entered,
            return_pct: (day_return - 1.0) * 100.0,
            cumulative_return: cumulative,
        });
    }

    results
}

/// Materialize the entered days as trades.
pub fn collect_trades(results: &[DailyResult]) -> Vec<Trade> {
    results
        .iter()
        .filter(|r| r.entered)
        .map(|r| Trade {
            date: r.date,
            entry_price: r.target_price,
            exit_price: r.close_price,
            return_pct: r.return_pct,
        })
        .collect()
}

/// Aggregate the trade list. An empty list yields all-zero statistics.
pub fn summarize_trades(trades: &[Trade]) -> TradeSummary {
    if trades.is_empty() {
        return TradeSummary {
            count: 0,
            win_rate: 0.0,
            avg_return_pct: 0.0,
            best_return_pct: 0.0,
            worst_return_pct: 0.0,
        };
    }

    let count = trades.len();
    let wins = trades.iter().filter(|t| t.return_pct > 0.0).count();
    let sum: f64 = trades.iter().map(|t| t.return_pct).sum();
    let best = trades.iter().map(|t| t.return_pct).fold(f64::MIN, f64::max);
    let worst = trades.iter().map(|t| t.return_pct).fold(f64::MAX, f64::min);

    TradeSummary {
        count,
        win_rate: wins as f64 / count as f64,
        avg_return_pct: sum / count as f64,
        best_return_pct: best,
        worst_return_pct: worst,
    }
}

/// Portfolio metrics over the whole run.
pub fn compute_metrics(results: &[DailyResult], trades: &[Trade]) -> MetricSummary {
    let total_days = results.len();
    let final_cumulative = results.last().map_or(1.0, |r| r.cumulative_return);

    let cagr_pct = if total_days == 0 || final_cumulative <= 0.0 {
        0.0
    } else {
        (final_cumulative.powf(365.0 / total_days as f64) - 1.0) * 100.0
    };

    let wins = trades.iter().filter(|t| t.return_pct > 0.0).count();
    let win_rate = if trades.is_empty() {
        0.0
    } else {
        wins as f64 / trades.len() as f64
    };

    MetricSummary {
        total_return_pct: (final_cumulative - 1.0) * 100.0,
        win_rate,
        max_drawdown_pct: max_drawdown_pct(results),
        cagr_pct,
        trade_count: trades.len(),
        total_days,
    }
}

/// Largest peak-to-trough decline of the cumulative-return series, as a
/// percentage. The peak starts at the series origin (1.0), so a series that
/// never moves reports 0.
fn max_drawdown_pct(results: &[DailyResult]) -> f64 {
    let mut peak = 1.0f64;
    let mut worst = 0.0f64;

    for r in results {
        let value = r.cumulative_return;
        if value > peak {
            peak = value;
        } else {
            worst = worst.max((peak - value) / peak);
        }
    }

    worst * 100.0
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn day(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap() + chrono::Duration::days(offset)
    }

    fn candle(offset: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            date: day(offset),
            open,
            high,
            low,
            close,
            volume: 100.0,
        }
    }

    /// Five identical lookback days followed by one configurable day.
    fn six_candles(open: f64, high: f64, low: f64, close: f64) -> Vec<Candle> {
        let mut candles: Vec<Candle> =
            (0..5).map(|i| candle(i, 100.0, 110.0, 95.0, 105.0)).collect();
        candles.push(candle(5, open, high, low, close));
        candles
    }

    fn no_cost(k: f64, use_ma_filter: bool) -> BacktestParams {
        BacktestParams {
            k,
            fee: 0.0,
            slippage: 0.0,
            use_ma_filter,
        }
    }

    #[test]
    fn breakout_below_target_does_not_enter() {
        // target = 106 + (110 - 95) * 0.5 = 113.5; high 112 stays below it.
        let candles = six_candles(106.0, 112.0, 100.0, 108.0);
        let results = simulate(&candles, &no_cost(0.5, false));

        assert_eq!(results.len(), 1);
        let r = &results[0];
        assert_eq!(r.target_price, 113.5);
        assert_eq!(r.ma5, 105.0);
        assert!(!r.entered);
        assert_eq!(r.return_pct, 0.0);
        assert_eq!(r.cumulative_return, 1.0);
    }

    #[test]
    fn breakout_above_target_enters_at_target() {
        // Same target, but the high crosses it.
        let candles = six_candles(106.0, 120.0, 100.0, 108.0);
        let results = simulate(&candles, &no_cost(0.5, false));

        let r = &results[0];
        assert!(r.entered);
        let expected = 108.0 / 113.5;
        assert!((r.cumulative_return - expected).abs() < 1e-12);
        assert!((r.return_pct - (expected - 1.0) * 100.0).abs() < 1e-12);
    }

    #[test]
    fn round_trip_cost_is_applied_twice() {
        let candles = six_candles(106.0, 120.0, 100.0, 120.0);
        let params = BacktestParams {
            k: 0.5,
            fee: 0.001,
            slippage: 0.0005,
            use_ma_filter: false,
        };
        let results = simulate(&candles, &params);

        let m = 1.0 - 0.0015;
        let expected = (120.0 / 113.5) * m * m;
        assert!((results[0].cumulative_return - expected).abs() < 1e-12);
    }

    #[test]
    fn absurd_cost_floors_the_multiplier_at_zero() {
        let candles = six_candles(106.0, 120.0, 100.0, 120.0);
        let params = BacktestParams {
            k: 0.5,
            fee: 0.8,
            slippage: 0.7,
            use_ma_filter: false,
        };
        let results = simulate(&candles, &params);
        assert_eq!(results[0].cumulative_return, 0.0);
    }

    #[test]
    fn ma_filter_blocks_entry_when_open_is_below_ma5() {
        // Open 104 < ma5 105, but high 120 crosses the target (111.5).
        let candles = six_candles(104.0, 120.0, 100.0, 108.0);

        let without_filter = simulate(&candles, &no_cost(0.5, false));
        assert!(without_filter[0].entered);

        let with_filter = simulate(&candles, &no_cost(0.5, true));
        assert!(!with_filter[0].entered);
    }

    #[test]
    fn ma_filter_allows_entry_when_open_is_above_ma5() {
        let candles = six_candles(106.0, 120.0, 100.0, 108.0);
        let results = simulate(&candles, &no_cost(0.5, true));
        assert!(results[0].entered);
    }

    #[test]
    fn fewer_than_six_candles_is_empty() {
        let candles: Vec<Candle> =
            (0..5).map(|i| candle(i, 100.0, 110.0, 95.0, 105.0)).collect();
        assert!(simulate(&candles, &no_cost(0.5, false)).is_empty());
    }

    #[test]
    fn simulation_is_deterministic() {
        let candles = six_candles(106.0, 120.0, 100.0, 108.0);
        let params = BacktestParams {
            k: 0.5,
            fee: 0.0005,
            slippage: 0.0,
            use_ma_filter: true,
        };
        let a = simulate(&candles, &params);
        let b = simulate(&candles, &params);
        assert_eq!(a, b);
    }

    #[test]
    fn cumulative_return_compounds_across_days() {
        // Two tradeable days, both entering.
        let mut candles: Vec<Candle> =
            (0..5).map(|i| candle(i, 100.0, 110.0, 95.0, 105.0)).collect();
        candles.push(candle(5, 106.0, 120.0, 100.0, 115.0));
        candles.push(candle(6, 110.0, 130.0, 105.0, 125.0));

        let results = simulate(&candles, &no_cost(0.5, false));
        assert_eq!(results.len(), 2);

        let first = 115.0 / 113.5; // target day 6: 106 + 15 * 0.5
        let second = 125.0 / 120.0; // target day 7: 110 + (120 - 100) * 0.5
        assert!((results[0].cumulative_return - first).abs() < 1e-12);
        assert!((results[1].cumulative_return - first * second).abs() < 1e-12);
    }

    #[test]
    fn trades_materialize_only_entered_days() {
        let mut candles: Vec<Candle> =
            (0..5).map(|i| candle(i, 100.0, 110.0, 95.0, 105.0)).collect();
        candles.push(candle(5, 106.0, 120.0, 100.0, 115.0)); // enters
        candles.push(candle(6, 110.0, 112.0, 105.0, 111.0)); // stays out

        let results = simulate(&candles, &no_cost(0.5, false));
        let trades = collect_trades(&results);

        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].date, day(5));
        assert_eq!(trades[0].entry_price, 113.5);
        assert_eq!(trades[0].exit_price, 115.0);
    }

    #[test]
    fn no_trades_yields_all_zero_summary_and_metrics() {
        let candles = six_candles(106.0, 112.0, 100.0, 108.0);
        let results = simulate(&candles, &no_cost(0.5, false));
        let trades = collect_trades(&results);

        let summary = summarize_trades(&trades);
        assert_eq!(summary.count, 0);
        assert_eq!(summary.win_rate, 0.0);
        assert_eq!(summary.avg_return_pct, 0.0);
        assert_eq!(summary.best_return_pct, 0.0);
        assert_eq!(summary.worst_return_pct, 0.0);

        let metrics = compute_metrics(&results, &trades);
        assert_eq!(metrics.total_return_pct, 0.0);
        assert_eq!(metrics.max_drawdown_pct, 0.0);
        assert_eq!(metrics.cagr_pct, 0.0);
        assert_eq!(metrics.trade_count, 0);
        assert_eq!(metrics.total_days, 1);
    }

    #[test]
    fn trade_summary_aggregates_wins_and_losses() {
        let trades = vec![
            Trade { date: day(5), entry_price: 100.0, exit_price: 110.0, return_pct: 10.0 },
            Trade { date: day(6), entry_price: 100.0, exit_price: 95.0, return_pct: -5.0 },
            Trade { date: day(7), entry_price: 100.0, exit_price: 102.0, return_pct: 2.0 },
        ];
        let summary = summarize_trades(&trades);

        assert_eq!(summary.count, 3);
        assert!((summary.win_rate - 2.0 / 3.0).abs() < 1e-12);
        assert!((summary.avg_return_pct - 7.0 / 3.0).abs() < 1e-12);
        assert_eq!(summary.best_return_pct, 10.0);
        assert_eq!(summary.worst_return_pct, -5.0);
    }

    fn result_with_hpr(offset: i64, cumulative: f64) -> DailyResult {
        DailyResult {
            date: day(offset),
            close_price: 100.0,
            target_price: 100.0,
            ma5: 100.0,
            entered: false,
            return_pct: 0.0,
            cumulative_return: cumulative,
        }
    }

    #[test]
    fn max_drawdown_measures_peak_to_trough() {
        // Peak at 1.2, trough at 0.9 afterwards: (1.2 - 0.9) / 1.2 = 25 %.
        let results = vec![
            result_with_hpr(0, 1.1),
            result_with_hpr(1, 1.2),
            result_with_hpr(2, 1.0),
            result_with_hpr(3, 0.9),
            result_with_hpr(4, 1.05),
        ];
        let metrics = compute_metrics(&results, &[]);
        assert!((metrics.max_drawdown_pct - 25.0).abs() < 1e-9);
    }

    #[test]
    fn drawdown_counts_dips_below_the_origin() {
        // The series never beats its starting peak of 1.0 but dips to 0.8.
        let results = vec![result_with_hpr(0, 0.9), result_with_hpr(1, 0.8)];
        let metrics = compute_metrics(&results, &[]);
        assert!((metrics.max_drawdown_pct - 20.0).abs() < 1e-9);
    }

    #[test]
    fn cagr_annualizes_the_final_cumulative_return() {
        // 10 % over 365 simulated days annualizes to exactly 10 %.
        let results: Vec<DailyResult> =
            (0..365).map(|i| result_with_hpr(i, 1.1)).collect();
        let metrics = compute_metrics(&results, &[]);
        assert!((metrics.cagr_pct - 10.0).abs() < 1e-9);
    }

    #[test]
    fn cagr_is_zero_for_empty_or_wiped_out_series() {
        let metrics = compute_metrics(&[], &[]);
        assert_eq!(metrics.cagr_pct, 0.0);
        assert_eq!(metrics.total_days, 0);

        let wiped = vec![result_with_hpr(0, 0.0)];
        let metrics = compute_metrics(&wiped, &[]);
        assert_eq!(metrics.cagr_pct, 0.0);
        assert_eq!(metrics.total_return_pct, -100.0);
    }
}
