use chrono::{DateTime, NaiveDate, Utc};
use engine_core::stats::clamp01;
use engine_core::{Bar, IndicatorSet, SetupType, StopMethod, TradeSetup};

use crate::indicators::{atr, avg_volume, macd_histogram};

/// Max stop distance from mid entry.
const STOP_DISTANCE_CAP: f64 = 0.08;

/// Tolerance for reward/risk floor comparisons; rr lands exactly on the
/// floor when the structural stop is the tighter one.
const RR_EPS: f64 = 1e-9;

/// Everything the detector needs for one symbol.
pub struct SetupInputs<'a> {
    pub symbol: &'a str,
    pub week: NaiveDate,
    pub bars: &'a [Bar],
    pub indicators: &'a IndicatorSet,
    /// Regime-restricted pattern set, in recognition order.
    pub allowed: &'a [SetupType],
    pub rr_floor: f64,
    pub calculated_at: DateTime<Utc>,
}

struct PatternMatch {
    setup_type: SetupType,
    support: f64,
    /// 0–100 from how strongly each predicate is met.
    confidence: f64,
}

/// Highest high over the trailing 252 bars.
pub fn high_52w(bars: &[Bar]) -> f64 {
    bars[bars.len().saturating_sub(252)..]
        .iter()
        .map(|b| b.high)
        .fold(f64::MIN, f64::max)
}

/// Try the four patterns in order and emit zero or one setup with its
/// full trade geometry. The quality composite is filled in by the caller.
pub fn detect_setup(inputs: &SetupInputs) -> Option<TradeSetup> {
    if inputs.bars.len() < 60 {
        return None;
    }

    let matched = inputs.allowed.iter().find_map(|setup_type| match setup_type {
        SetupType::Pullback => detect_pullback(inputs),
        SetupType::VcpBreakout => detect_vcp(inputs),
        SetupType::Retest => detect_retest(inputs),
        SetupType::GapFill => detect_gap_fill(inputs),
    })?;

    build_geometry(inputs, matched)
}

/// Pullback to a rising MA on drying volume with a momentum reset.
fn detect_pullback(inputs: &SetupInputs) -> Option<PatternMatch> {
    let ind = inputs.indicators;
    let bars = inputs.bars;
    let close = bars.last()?.close;

    // Uptrend is the precondition for buying a dip.
    if !(close > ind.sma50 && ind.sma50 > ind.sma200) {
        return None;
    }

    let ma_low = ind.sma20.min(ind.sma50);
    if ma_low <= 0.0 {
        return None;
    }
    let ratio = close / ma_low;
    if !(0.95..=1.03).contains(&ratio) {
        return None;
    }

    let vol3 = avg_volume(bars, 3);
    if ind.vol20 <= 0.0 || vol3 > 0.70 * ind.vol20 {
        return None;
    }

    if !(35.0..=55.0).contains(&ind.rsi14) {
        return None;
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let hist = macd_histogram(&closes, 12, 26, 9);
    if hist.len() < 2 {
        return None;
    }
    let (hist_prev, hist_now) = (hist[hist.len() - 2], hist[hist.len() - 1]);
    if hist_now <= hist_prev {
        return None;
    }
    let crossing_from_below = hist_prev <= 0.0;

    let ma_touch = clamp01(1.0 - (ratio - 1.0).abs() / 0.05);
    let volume_dry = clamp01((0.70 - vol3 / ind.vol20) / 0.70);
    let rsi_reset = clamp01(1.0 - (ind.rsi14 - 45.0).abs() / 10.0);
    let macd_turn = if crossing_from_below { 1.0 } else { 0.6 };
    let trend = clamp01((close / ind.sma50 - 1.0) / 0.10);

    let confidence =
        100.0 * (0.25 * ma_touch + 0.20 * volume_dry + 0.20 * rsi_reset + 0.20 * macd_turn + 0.15 * trend);

    Some(PatternMatch {
        setup_type: SetupType::Pullback,
        support: ind.sma20,
        confidence,
    })
}

/// Volatility contraction: a 3–8 week base tighter than 12% with shrinking
/// ATR and the close holding the upper part of the range.
fn detect_vcp(inputs: &SetupInputs) -> Option<PatternMatch> {
    let bars = inputs.bars;
    let close = bars.last()?.close;

    let atr_series = atr(bars, 14);
    if atr_series.len() < 22 {
        return None;
    }
    let atr_now = atr_series[atr_series.len() - 1];
    let atr_prior = atr_series[atr_series.len() - 22];
    if atr_now >= atr_prior {
        return None;
    }

    // Search 3–8 week windows, tightest first.
    let mut best: Option<(f64, f64, f64)> = None; // (pct, range_high, range_low)
    for window in 15..=40usize {
        if bars.len() < window {
            break;
        }
        let slice = &bars[bars.len() - window..];
        let range_high = slice.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let range_low = slice.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        if range_low <= 0.0 {
            continue;
        }
        let pct = (range_high - range_low) / range_low;
        if pct <= 0.12 && best.map_or(true, |(b, _, _)| pct < b) {
            best = Some((pct, range_high, range_low));
        }
    }
    let (pct, range_high, range_low) = best?;

    let mid = (range_high + range_low) / 2.0;
    if (close - mid).abs() / mid > 0.05 {
        return None;
    }
    let range = range_high - range_low;
    if range <= 0.0 {
        return None;
    }
    let position = (close - range_low) / range;
    // Upper 70% of the range.
    if position < 0.30 {
        return None;
    }

    let tightness = clamp01((0.12 - pct) / 0.12);
    let contraction = clamp01((1.0 - atr_now / atr_prior) / 0.5);
    let hold = clamp01(position);
    let centered = clamp01(1.0 - (close - mid).abs() / (0.05 * mid));

    let confidence = 100.0 * (0.35 * tightness + 0.30 * contraction + 0.20 * hold + 0.15 * centered);

    Some(PatternMatch {
        setup_type: SetupType::VcpBreakout,
        support: range_high,
        confidence,
    })
}

/// High-volume breakout two to three weeks back, now retesting the level
/// on quiet volume while holding a higher low.
fn detect_retest(inputs: &SetupInputs) -> Option<PatternMatch> {
    let bars = inputs.bars;
    let n = bars.len();
    if n < 80 {
        return None;
    }
    let close = bars.last()?.close;

    // Breakout bar 10–15 sessions back.
    let mut found: Option<(usize, f64, f64, f64)> = None; // (idx, level, breakout_vol, vol20_before)
    for back in 10..=15usize {
        let i = n - 1 - back;
        let prior = &bars[i.saturating_sub(60)..i];
        if prior.len() < 40 {
            continue;
        }
        let prior_high = prior.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let vol20_before = avg_volume(&bars[..i], 20);
        if vol20_before <= 0.0 {
            continue;
        }
        if bars[i].close > prior_high && bars[i].volume >= 2.5 * vol20_before {
            found = Some((i, prior_high, bars[i].volume, vol20_before));
            break;
        }
    }
    let (idx, level, breakout_vol, vol20_before) = found?;

    if close < 0.97 * level {
        return None;
    }

    let vol5 = avg_volume(bars, 5);
    if vol5 > 0.60 * breakout_vol {
        return None;
    }

    // Higher-low structure: the retest low must hold above the pullback
    // low that preceded the breakout.
    let low_since = bars[idx..].iter().map(|b| b.low).fold(f64::MAX, f64::min);
    let prior_low = bars[idx.saturating_sub(10)..idx]
        .iter()
        .map(|b| b.low)
        .fold(f64::MAX, f64::min);
    if low_since <= prior_low {
        return None;
    }

    let hold = clamp01((close / level - 0.97) / 0.06);
    let dry_up = clamp01((0.60 - vol5 / breakout_vol) / 0.60);
    let higher_low = clamp01((low_since / prior_low - 1.0) / 0.05);
    let thrust = clamp01(breakout_vol / (5.0 * vol20_before));

    let confidence = 100.0 * (0.30 * hold + 0.25 * dry_up + 0.20 * higher_low + 0.25 * thrust);

    Some(PatternMatch {
        setup_type: SetupType::Retest,
        support: level,
        confidence,
    })
}

/// Small up-gap in an uptrend, half to three-quarters filled, with the gap
/// sitting above a rising 20-day MA.
fn detect_gap_fill(inputs: &SetupInputs) -> Option<PatternMatch> {
    let ind = inputs.indicators;
    let bars = inputs.bars;
    let n = bars.len();
    let close = bars.last()?.close;

    if close <= ind.sma50 || ind.slope20 <= 0.0 {
        return None;
    }

    for back in 1..=10usize {
        let g = n - 1 - back;
        if g == 0 {
            break;
        }
        let prev_close = bars[g - 1].close;
        if prev_close <= 0.0 {
            continue;
        }
        let gap_pct = bars[g].open / prev_close - 1.0;
        if !(0.005..=0.02).contains(&gap_pct) {
            continue;
        }
        if ind.vol20 <= 0.0 || bars[g].volume < 1.8 * ind.vol20 {
            continue;
        }

        let gap_top = bars[g].open;
        if gap_top <= ind.sma20 {
            continue;
        }
        let gap_size = gap_top - prev_close;
        if gap_size <= 0.0 {
            continue;
        }
        let fill_pct = (gap_top - close) / gap_size;
        if !(0.50..=0.75).contains(&fill_pct) {
            continue;
        }

        let fill_centered = clamp01(1.0 - (fill_pct - 0.625).abs() / 0.125);
        let thrust = clamp01(bars[g].volume / (3.6 * ind.vol20));
        let trend = clamp01((close / ind.sma50 - 1.0) / 0.08);
        let size_centered = clamp01(1.0 - (gap_pct - 0.0125).abs() / 0.0075);

        let confidence =
            100.0 * (0.30 * fill_centered + 0.25 * thrust + 0.25 * trend + 0.20 * size_centered);

        return Some(PatternMatch {
            setup_type: SetupType::GapFill,
            support: gap_top,
            confidence,
        });
    }

    None
}

/// Entry band, tighter-of-two stop, structural-risk targets, RR gate.
fn build_geometry(inputs: &SetupInputs, matched: PatternMatch) -> Option<TradeSetup> {
    let bars = inputs.bars;
    let atr14 = inputs.indicators.atr14;
    if atr14 <= 0.0 || matched.support <= 0.0 {
        return None;
    }

    let entry_low = matched.support - 0.5 * atr14;
    let entry_high = matched.support + 0.5 * atr14;
    let mid_entry = matched.support;

    let swing_low = bars[bars.len().saturating_sub(20)..]
        .iter()
        .map(|b| b.low)
        .fold(f64::MAX, f64::min);
    let stop_struct = swing_low * 0.99;
    let stop_vol = entry_low - 2.0 * atr14;
    let (stop, stop_method) = if stop_struct >= stop_vol {
        (stop_struct, StopMethod::Structure)
    } else {
        (stop_vol, StopMethod::Volatility)
    };

    if stop >= entry_low {
        return None;
    }

    // Targets project off the structural stop; rr is measured against the
    // final (tighter) stop, so rr >= 2 whenever volatility is tighter.
    let risk_struct = mid_entry - stop_struct;
    let risk = mid_entry - stop;
    if risk_struct <= 0.0 || risk <= 0.0 {
        return None;
    }

    let high52 = high_52w(bars);
    let target2 = (mid_entry + 3.0 * risk_struct).min(high52);
    let target1 = (mid_entry + 2.0 * risk_struct).min(target2);
    if target1 <= entry_high {
        return None;
    }

    let rr = (target1 - mid_entry) / risk;
    let stop_distance_pct = risk / mid_entry;

    if rr < inputs.rr_floor - RR_EPS || stop_distance_pct > STOP_DISTANCE_CAP {
        return None;
    }

    Some(TradeSetup {
        symbol: inputs.symbol.to_string(),
        week: inputs.week,
        calculated_at: inputs.calculated_at,
        setup_type: matched.setup_type,
        support: matched.support,
        entry_low,
        entry_high,
        stop,
        stop_method,
        target1,
        target2,
        rr,
        stop_distance_pct,
        confidence: matched.confidence,
        quality_composite: 0.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(i: usize) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 2).unwrap() + chrono::Duration::days(i as i64)
    }

    fn bar(i: usize, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Bar {
        Bar {
            date: day(i),
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Long climb to ~101.5, a 17-bar decline into the MA zone, then five
    /// rising closes on volume well below the 20-day average.
    fn pullback_bars() -> Vec<Bar> {
        let mut bars = Vec::new();
        for i in 0..255 {
            let p = 60.0 + 41.5 * (i as f64 / 254.0);
            bars.push(bar(i, p, p + 0.8, p - 0.8, p, 100_000.0));
        }
        for k in 0..17 {
            // 101.1 down to 94.8; lows bottom out at 94.0.
            let p = 101.1 - 6.3 * (k as f64 / 16.0);
            bars.push(bar(255 + k, p, p + 0.8, p - 0.8, p, 100_000.0));
        }
        for (k, close) in [95.1, 95.4, 95.7, 96.0].iter().enumerate() {
            bars.push(bar(272 + k, *close, close + 0.5, close - 0.8, *close, 40_000.0));
        }
        bars
    }

    fn pullback_indicators() -> IndicatorSet {
        IndicatorSet {
            sma20: 95.0,
            sma50: 94.0,
            sma200: 80.0,
            atr14: 2.0,
            rsi14: 45.0,
            macd_hist: -0.1,
            vol20: 100_000.0,
            slope20: 0.002,
            slope50: 0.001,
            slope200: 0.0005,
        }
    }

    const ALL_SETUPS: [SetupType; 4] = [
        SetupType::Pullback,
        SetupType::VcpBreakout,
        SetupType::Retest,
        SetupType::GapFill,
    ];

    #[test]
    fn test_pullback_detection_and_geometry() {
        let bars = pullback_bars();
        let indicators = pullback_indicators();
        let inputs = SetupInputs {
            symbol: "TEST",
            week: NaiveDate::from_ymd_opt(2026, 3, 9).unwrap(),
            bars: &bars,
            indicators: &indicators,
            allowed: &ALL_SETUPS,
            rr_floor: 2.0,
            calculated_at: Utc::now(),
        };

        let setup = detect_setup(&inputs).expect("pullback should be detected");
        assert_eq!(setup.setup_type, SetupType::Pullback);
        assert_eq!(setup.support, 95.0);
        assert!((setup.entry_low - 94.0).abs() < 1e-9);
        assert!((setup.entry_high - 96.0).abs() < 1e-9);

        // Swing low 94.0 -> structural stop 93.06, tighter than 94 - 4 = 90.
        assert_eq!(setup.stop_method, StopMethod::Structure);
        assert!((setup.stop - 93.06).abs() < 1e-9);

        // Targets off structural risk 1.94: 98.88 / 100.82.
        assert!((setup.target1 - 98.88).abs() < 1e-9);
        assert!((setup.rr - 2.0).abs() < 1e-9);
        assert!(setup.stop < setup.entry_low);
        assert!(setup.entry_low < setup.entry_high);
        assert!(setup.entry_high < setup.target1);
        assert!(setup.target1 <= setup.target2);
        assert!(setup.confidence > 50.0);
    }

    #[test]
    fn test_rr_floor_boundary() {
        let bars = pullback_bars();
        let indicators = pullback_indicators();

        // rr comes out exactly 2.0 here: accepted at a 2.0 floor,
        // rejected at anything above it.
        let accepted = detect_setup(&SetupInputs {
            symbol: "TEST",
            week: NaiveDate::from_ymd_opt(2026, 3, 9).unwrap(),
            bars: &bars,
            indicators: &indicators,
            allowed: &ALL_SETUPS,
            rr_floor: 2.0,
            calculated_at: Utc::now(),
        });
        assert!(accepted.is_some());

        let rejected = detect_setup(&SetupInputs {
            symbol: "TEST",
            week: NaiveDate::from_ymd_opt(2026, 3, 9).unwrap(),
            bars: &bars,
            indicators: &indicators,
            allowed: &ALL_SETUPS,
            rr_floor: 2.001,
            calculated_at: Utc::now(),
        });
        assert!(rejected.is_none());
    }

    #[test]
    fn test_regime_restriction_blocks_pattern() {
        let bars = pullback_bars();
        let indicators = pullback_indicators();
        let inputs = SetupInputs {
            symbol: "TEST",
            week: NaiveDate::from_ymd_opt(2026, 3, 9).unwrap(),
            bars: &bars,
            indicators: &indicators,
            allowed: &[SetupType::Retest],
            rr_floor: 2.0,
            calculated_at: Utc::now(),
        };
        // The pullback is there, but the allowed set excludes it and no
        // high-volume breakout exists to retest.
        assert!(detect_setup(&inputs).is_none());
    }

    #[test]
    fn test_downtrend_emits_nothing() {
        let mut bars = Vec::new();
        for i in 0..280 {
            let p = 140.0 - 0.2 * i as f64;
            bars.push(bar(i, p, p + 1.0, p - 1.0, p, 100_000.0));
        }
        let indicators = IndicatorSet {
            sma20: 86.0,
            sma50: 89.0,
            sma200: 112.0,
            atr14: 2.0,
            rsi14: 30.0,
            macd_hist: -0.5,
            vol20: 100_000.0,
            slope20: -0.002,
            slope50: -0.002,
            slope200: -0.001,
        };
        let inputs = SetupInputs {
            symbol: "TEST",
            week: NaiveDate::from_ymd_opt(2026, 3, 9).unwrap(),
            bars: &bars,
            indicators: &indicators,
            allowed: &ALL_SETUPS,
            rr_floor: 2.0,
            calculated_at: Utc::now(),
        };
        assert!(detect_setup(&inputs).is_none());
    }

    #[test]
    fn test_vcp_detection() {
        let mut bars = Vec::new();
        // Volatile advance to 115, a correction to 100, then a tight
        // multi-week base well below the 52-week high.
        for i in 0..200 {
            let p = 70.0 + 45.0 * (i as f64 / 199.0);
            bars.push(bar(i, p, p + 3.0, p - 3.0, p, 100_000.0));
        }
        for i in 200..255 {
            let p = 115.0 - 15.0 * ((i - 200) as f64 / 54.0);
            bars.push(bar(i, p, p + 3.0, p - 3.0, p, 100_000.0));
        }
        for i in 255..280 {
            let p = 100.0 + 0.25 * ((i % 5) as f64 - 2.0);
            bars.push(bar(i, p, p + 0.6, p - 0.6, p, 60_000.0));
        }
        let indicators = IndicatorSet {
            sma20: 100.0,
            sma50: 101.5,
            sma200: 95.0,
            atr14: 1.2,
            rsi14: 52.0,
            macd_hist: 0.05,
            vol20: 80_000.0,
            slope20: 0.0002,
            slope50: -0.0005,
            slope200: 0.0004,
        };
        let inputs = SetupInputs {
            symbol: "TEST",
            week: NaiveDate::from_ymd_opt(2026, 3, 9).unwrap(),
            bars: &bars,
            indicators: &indicators,
            allowed: &[SetupType::VcpBreakout],
            rr_floor: 2.0,
            calculated_at: Utc::now(),
        };
        let setup = detect_setup(&inputs).expect("tight base should match VCP");
        assert_eq!(setup.setup_type, SetupType::VcpBreakout);
        // Support is the top of the contraction range.
        assert!(setup.support >= 100.0);
        assert!(setup.rr >= 2.0);
        assert!(setup.target2 > setup.target1 - 1e-9);
    }
}
