//! Five-filter momentum gate (the second stage).
//!
//! 52-week proximity, MA alignment, relative strength vs the benchmark,
//! a weighted composite, and a volatility sanity check. A symbol
//! qualifies on four of five.

use chrono::{DateTime, NaiveDate, Utc};
use engine_core::stats::{clamp01, simple_returns, std_dev};
use engine_core::{
    defaults, Bar, BenchmarkContext, EngineError, IndicatorSet, MomentumMetrics, MomentumScore,
};
use technical::indicators::avg_volume;

/// Minimum per-day fractional slopes for the three MA layers.
const SLOPE_FLOORS: (f64, f64, f64) = (0.001, 0.0005, 0.0002);

/// Excess-return floors vs the benchmark at 1M/3M/6M.
const RS_FLOORS: (f64, f64, f64) = (0.05, 0.10, 0.15);

/// Score one symbol. Needs 200 trading days; fewer is a skip.
pub fn score_momentum(
    symbol: &str,
    week: NaiveDate,
    bars: &[Bar],
    indicators: &IndicatorSet,
    benchmark: &BenchmarkContext,
    calculated_at: DateTime<Utc>,
) -> Result<MomentumScore, EngineError> {
    if bars.len() < defaults::MIN_MOMENTUM_HISTORY_DAYS {
        return Err(EngineError::InsufficientHistory(format!(
            "{}: {} bars, need {}",
            symbol,
            bars.len(),
            defaults::MIN_MOMENTUM_HISTORY_DAYS
        )));
    }

    let close = bars.last().expect("bars checked non-empty").close;
    let window = &bars[bars.len().saturating_sub(252)..];
    let high52 = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let low52 = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);

    // Filter 2A: 52-week range proximity, with a volume-surge fallback.
    let range = high52 - low52;
    let proximity = if range > 0.0 { (close - low52) / range } else { 0.0 };
    let volume_surge = if indicators.vol20 > 0.0 {
        avg_volume(bars, 5) / indicators.vol20
    } else {
        0.0
    };
    let passed_proximity = proximity >= 0.90 || (proximity >= 0.80 && volume_surge >= 1.5);

    // Filter 2B: MA alignment, four of five checks.
    let slopes_ok = indicators.slope20 >= SLOPE_FLOORS.0
        && indicators.slope50 >= SLOPE_FLOORS.1
        && indicators.slope200 >= SLOPE_FLOORS.2;
    let ma_checks = [
        close > indicators.sma20,
        close > indicators.sma50,
        close > indicators.sma200,
        indicators.sma20 > indicators.sma50 && indicators.sma50 > indicators.sma200,
        slopes_ok,
    ];
    let ma_align_score = ma_checks.iter().filter(|&&c| c).count() as u8;
    let passed_ma_alignment = ma_align_score >= 4;

    // Filter 2C: relative strength on two of three horizons.
    let ret_1m = trailing_return(bars, 21);
    let ret_3m = trailing_return(bars, 63);
    let ret_6m = trailing_return(bars, 126);
    let excess_1m = ret_1m - benchmark.ret_1m;
    let excess_3m = ret_3m - benchmark.ret_3m;
    let excess_6m = ret_6m - benchmark.ret_6m;
    let rs_hits = [
        excess_1m >= RS_FLOORS.0,
        excess_3m >= RS_FLOORS.1,
        excess_6m >= RS_FLOORS.2,
    ]
    .iter()
    .filter(|&&h| h)
    .count();
    let passed_relative_strength = rs_hits >= 2;

    // Filter 2D: weighted composite of the normalized sub-metrics.
    let proximity_norm = clamp01(proximity);
    let rs_norm = (clamp01(excess_1m / RS_FLOORS.0)
        + clamp01(excess_3m / RS_FLOORS.1)
        + clamp01(excess_6m / RS_FLOORS.2))
        / 3.0;
    let accel = ret_1m - ret_3m / 3.0;
    let accel_norm = clamp01(0.5 + accel / 0.10);
    let composite = 0.25 * proximity_norm
        + 0.25 * rs_norm
        + 0.25 * (ma_align_score as f64 / 5.0)
        + 0.25 * accel_norm;
    let passed_composite = composite >= 0.75;

    // Filter 2E: volatility no worse than 1.5x the benchmark.
    let stock_returns = simple_returns(
        &bars[bars.len().saturating_sub(31)..]
            .iter()
            .map(|b| b.close)
            .collect::<Vec<_>>(),
    );
    let stock_vol30 = std_dev(&stock_returns);
    let vol_ratio = if benchmark.vol30 > 0.0 {
        stock_vol30 / benchmark.vol30
    } else {
        0.0
    };
    let passed_vol_adjusted = vol_ratio <= 1.5;

    let filters_passed = [
        passed_proximity,
        passed_ma_alignment,
        passed_relative_strength,
        passed_composite,
        passed_vol_adjusted,
    ]
    .iter()
    .filter(|&&p| p)
    .count() as u8;

    Ok(MomentumScore {
        symbol: symbol.to_string(),
        week,
        calculated_at,
        score: composite * 100.0,
        passed_proximity,
        passed_ma_alignment,
        passed_relative_strength,
        passed_composite,
        passed_vol_adjusted,
        filters_passed,
        metrics: MomentumMetrics {
            proximity_52w: proximity,
            volume_surge,
            ma_align_score,
            excess_return_1m: excess_1m,
            excess_return_3m: excess_3m,
            excess_return_6m: excess_6m,
            composite,
            vol_ratio,
        },
        qualifies: filters_passed >= 4,
    })
}

/// Close-to-close return over the trailing `days` sessions.
fn trailing_return(bars: &[Bar], days: usize) -> f64 {
    if bars.len() <= days {
        return 0.0;
    }
    let then = bars[bars.len() - 1 - days].close;
    if then <= 0.0 {
        return 0.0;
    }
    bars.last().map(|b| b.close / then - 1.0).unwrap_or(0.0)
}
