use engine_core::stats::finite_or;
use engine_core::{Bar, EngineError, IndicatorSet};
use rayon::prelude::*;
use std::collections::HashMap;

/// Simple Moving Average. Output aligns to the input tail:
/// result[i] is the SMA ending at data[i + period - 1].
pub fn sma(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period {
        return vec![];
    }

    let mut result = Vec::with_capacity(data.len() - period + 1);
    let mut window_sum: f64 = data[..period].iter().sum();
    result.push(finite_or(window_sum / period as f64, 0.0));
    for i in period..data.len() {
        window_sum += data[i] - data[i - period];
        result.push(finite_or(window_sum / period as f64, 0.0));
    }
    result
}

/// Exponential Moving Average, SMA-seeded, output length matches input.
pub fn ema(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.is_empty() {
        return vec![];
    }

    let multiplier = 2.0 / (period as f64 + 1.0);

    if data.len() < period {
        let avg = data.iter().sum::<f64>() / data.len() as f64;
        return vec![finite_or(avg, 0.0)];
    }

    let seed: f64 = data[..period].iter().sum::<f64>() / period as f64;
    let seed = finite_or(seed, 0.0);

    let mut result = Vec::with_capacity(data.len());
    for _ in 0..period {
        result.push(seed);
    }
    for i in period..data.len() {
        let prev = result[i - 1];
        let val = (data[i] - prev) * multiplier + prev;
        result.push(finite_or(val, prev));
    }
    result
}

/// Wilder RSI. result[i] is the RSI after bar data[i + period].
pub fn rsi(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period + 1 {
        return vec![];
    }

    let mut gains = Vec::new();
    let mut losses = Vec::new();
    for i in 1..data.len() {
        let change = data[i] - data[i - 1];
        if change > 0.0 {
            gains.push(change);
            losses.push(0.0);
        } else {
            gains.push(0.0);
            losses.push(change.abs());
        }
    }

    let mut avg_gain = gains[..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss = losses[..period].iter().sum::<f64>() / period as f64;

    let mut out = Vec::with_capacity(data.len() - period);
    let push_rsi = |avg_gain: f64, avg_loss: f64, out: &mut Vec<f64>| {
        let rs = if avg_loss == 0.0 { 100.0 } else { avg_gain / avg_loss };
        out.push(finite_or(100.0 - 100.0 / (1.0 + rs), 50.0));
    };
    push_rsi(avg_gain, avg_loss, &mut out);

    for i in period..gains.len() {
        avg_gain = (avg_gain * (period - 1) as f64 + gains[i]) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + losses[i]) / period as f64;
        push_rsi(avg_gain, avg_loss, &mut out);
    }

    out
}

/// Wilder ATR over OHLC bars. result[i] is the ATR after bars[i + period].
pub fn atr(bars: &[Bar], period: usize) -> Vec<f64> {
    if period == 0 || bars.len() < period + 1 {
        return vec![];
    }

    let true_ranges: Vec<f64> = (1..bars.len())
        .map(|i| {
            let high_low = bars[i].high - bars[i].low;
            let high_close = (bars[i].high - bars[i - 1].close).abs();
            let low_close = (bars[i].low - bars[i - 1].close).abs();
            high_low.max(high_close).max(low_close)
        })
        .collect();

    let mut value = true_ranges[..period].iter().sum::<f64>() / period as f64;
    let mut out = Vec::with_capacity(true_ranges.len() - period + 1);
    out.push(value);
    for tr in &true_ranges[period..] {
        value = (value * (period - 1) as f64 + tr) / period as f64;
        out.push(finite_or(value, 0.0));
    }
    out
}

/// MACD histogram series for (fast, slow, signal) = (12, 26, 9) by default.
pub fn macd_histogram(data: &[f64], fast: usize, slow: usize, signal: usize) -> Vec<f64> {
    if fast == 0 || slow == 0 || signal == 0 || slow <= fast || data.len() < slow {
        return vec![];
    }

    let ema_fast = ema(data, fast);
    let ema_slow = ema(data, slow);
    let macd_line: Vec<f64> = ema_fast
        .iter()
        .zip(ema_slow.iter())
        .map(|(f, s)| f - s)
        .collect();

    let signal_line = ema(&macd_line, signal);
    macd_line
        .iter()
        .zip(signal_line.iter())
        .map(|(m, s)| m - s)
        .collect()
}

/// Per-day fractional slope of an MA series over `window` points (or the
/// widest span available). (last − first) / (span · first).
pub fn ma_slope(series: &[f64], window: usize) -> f64 {
    if series.len() < 2 {
        return 0.0;
    }
    let span = window.min(series.len() - 1);
    let first = series[series.len() - 1 - span];
    if first.abs() < 1e-12 {
        return 0.0;
    }
    let last = series[series.len() - 1];
    (last - first) / (span as f64 * first)
}

/// Average volume over the trailing `period` bars.
pub fn avg_volume(bars: &[Bar], period: usize) -> f64 {
    if bars.is_empty() {
        return 0.0;
    }
    let tail = &bars[bars.len().saturating_sub(period)..];
    tail.iter().map(|b| b.volume).sum::<f64>() / tail.len() as f64
}

/// Latest indicator values for a symbol. Requires at least 200 bars for
/// the 200-day MA; slopes shrink their window when history is short.
pub fn compute_indicator_set(bars: &[Bar]) -> Result<IndicatorSet, EngineError> {
    if bars.len() < 200 {
        return Err(EngineError::InsufficientHistory(format!(
            "{} bars, need 200 for indicator set",
            bars.len()
        )));
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

    let sma20_series = sma(&closes, 20);
    let sma50_series = sma(&closes, 50);
    let sma200_series = sma(&closes, 200);
    let atr_series = atr(bars, 14);
    let rsi_series = rsi(&closes, 14);
    let hist_series = macd_histogram(&closes, 12, 26, 9);

    Ok(IndicatorSet {
        sma20: *sma20_series.last().unwrap_or(&0.0),
        sma50: *sma50_series.last().unwrap_or(&0.0),
        sma200: *sma200_series.last().unwrap_or(&0.0),
        atr14: *atr_series.last().unwrap_or(&0.0),
        rsi14: *rsi_series.last().unwrap_or(&50.0),
        macd_hist: *hist_series.last().unwrap_or(&0.0),
        vol20: avg_volume(bars, 20),
        slope20: ma_slope(&sma20_series, 20),
        slope50: ma_slope(&sma50_series, 50),
        slope200: ma_slope(&sma200_series, 200),
    })
}

/// Indicator sets for a batch of symbols, computed in parallel.
/// Symbols with insufficient history are silently skipped.
pub fn compute_indicator_sets(
    bars_by_symbol: &HashMap<String, Vec<Bar>>,
) -> HashMap<String, IndicatorSet> {
    bars_by_symbol
        .par_iter()
        .filter_map(|(symbol, bars)| {
            compute_indicator_set(bars)
                .ok()
                .map(|set| (symbol.clone(), set))
        })
        .collect()
}
