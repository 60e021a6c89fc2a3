//! Liquidity and tradability gate (stage 4A).
//!
//! Turnover depth, peak capacity, volume stability, circuit-hit and
//! overnight-gap behavior over the trailing quarter.

use chrono::{DateTime, NaiveDate, Utc};
use engine_core::stats::{clamp01, mean, std_dev};
use engine_core::{defaults, Bar, EngineError, LiquidityScore};

/// Turnover (₹ Cr) at which the 20/60-day components max out.
const TURNOVER_FULL_MARKS_CR: f64 = 50.0;

/// Peak single-day turnover (₹ Cr) at which that component maxes out.
const PEAK_FULL_MARKS_CR: f64 = 100.0;

/// Minimum 20-day average turnover to qualify, ₹ Cr.
const MIN_TURNOVER_20D_CR: f64 = 10.0;

/// Daily move treated as a circuit hit when the close pins the extreme.
const CIRCUIT_MOVE_PCT: f64 = 0.049;

/// Max circuit hits allowed over 30 days.
const MAX_CIRCUIT_HITS: u32 = 1;

/// Max average overnight gap to qualify.
const MAX_AVG_GAP_PCT: f64 = 0.02;

/// Qualification floor for the composite score.
const MIN_SCORE: f64 = 75.0;

/// Score one symbol from its last 90 daily bars.
pub fn score_liquidity(
    symbol: &str,
    week: NaiveDate,
    bars: &[Bar],
    calculated_at: DateTime<Utc>,
) -> Result<LiquidityScore, EngineError> {
    if bars.len() < defaults::MIN_LIQUIDITY_HISTORY_DAYS {
        return Err(EngineError::InsufficientHistory(format!(
            "{}: {} bars, need {}",
            symbol,
            bars.len(),
            defaults::MIN_LIQUIDITY_HISTORY_DAYS
        )));
    }

    let turnovers: Vec<f64> = bars.iter().map(|b| b.turnover()).collect();
    let n = turnovers.len();

    let turnover_20d_cr = mean(&turnovers[n - 20..]) / defaults::CRORE;
    let turnover_60d_cr = mean(&turnovers[n - 60..]) / defaults::CRORE;
    let peak_30d_cr = turnovers[n - 30..]
        .iter()
        .fold(f64::MIN, |a, &b| a.max(b))
        / defaults::CRORE;

    let volumes_20d: Vec<f64> = bars[bars.len() - 20..].iter().map(|b| b.volume).collect();
    let vol_mean = mean(&volumes_20d);
    let vol_stability = if vol_mean > 0.0 {
        clamp01(1.0 - std_dev(&volumes_20d) / vol_mean)
    } else {
        0.0
    };

    let circuit_hits_30d = circuit_hits(&bars[bars.len() - 30..]);
    let avg_gap_pct = average_gap(&bars[bars.len() - 30..]);

    let t20_n = clamp01(turnover_20d_cr / TURNOVER_FULL_MARKS_CR);
    let t60_n = clamp01(turnover_60d_cr / TURNOVER_FULL_MARKS_CR);
    let peak_n = clamp01(peak_30d_cr / PEAK_FULL_MARKS_CR);
    let score = 100.0 * (0.40 * t20_n + 0.30 * t60_n + 0.20 * peak_n + 0.10 * vol_stability);

    let qualifies = score >= MIN_SCORE
        && turnover_20d_cr >= MIN_TURNOVER_20D_CR
        && circuit_hits_30d <= MAX_CIRCUIT_HITS
        && avg_gap_pct <= MAX_AVG_GAP_PCT;

    Ok(LiquidityScore {
        symbol: symbol.to_string(),
        week,
        calculated_at,
        turnover_20d_cr,
        turnover_60d_cr,
        peak_30d_cr,
        vol_stability,
        circuit_hits_30d,
        avg_gap_pct,
        score,
        qualifies,
    })
}

/// Daily-range circuit heuristic: a ±4.9% close-to-close move with the
/// close pinned at the day's extreme.
fn circuit_hits(bars: &[Bar]) -> u32 {
    bars.windows(2)
        .filter(|pair| {
            let prev_close = pair[0].close;
            if prev_close <= 0.0 {
                return false;
            }
            let bar = &pair[1];
            let move_pct = bar.close / prev_close - 1.0;
            let range = bar.high - bar.low;
            let tolerance = (range * 0.02).max(prev_close * 1e-4);
            (move_pct >= CIRCUIT_MOVE_PCT && (bar.high - bar.close).abs() <= tolerance)
                || (move_pct <= -CIRCUIT_MOVE_PCT && (bar.close - bar.low).abs() <= tolerance)
        })
        .count() as u32
}

/// Mean absolute overnight gap, open vs previous close.
fn average_gap(bars: &[Bar]) -> f64 {
    let gaps: Vec<f64> = bars
        .windows(2)
        .filter_map(|pair| {
            if pair[0].close > 0.0 {
                Some((pair[1].open / pair[0].close - 1.0).abs())
            } else {
                None
            }
        })
        .collect();
    mean(&gaps)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(i: usize) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 1).unwrap() + chrono::Duration::days(i as i64)
    }

    /// 90 deep, stable days: ~₹50 Cr/day at a 500 price.
    fn deep_bars() -> Vec<Bar> {
        (0..90)
            .map(|i| Bar {
                date: day(i),
                open: 500.0,
                high: 505.0,
                low: 495.0,
                close: 500.0,
                volume: 1.0e6,
            })
            .collect()
    }

    fn week() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 9).unwrap()
    }

    #[test]
    fn test_deep_liquid_name_qualifies() {
        let s = score_liquidity("DEEP", week(), &deep_bars(), Utc::now()).unwrap();
        assert!((s.turnover_20d_cr - 50.0).abs() < 1e-9);
        assert_eq!(s.circuit_hits_30d, 0);
        assert!(s.avg_gap_pct < 0.001);
        assert!(s.score >= 75.0);
        assert!(s.qualifies);
    }

    #[test]
    fn test_thin_name_fails_turnover_floor() {
        let mut bars = deep_bars();
        for b in &mut bars {
            b.volume = 1.0e5; // ~₹5 Cr/day
        }
        let s = score_liquidity("THIN", week(), &bars, Utc::now()).unwrap();
        assert!(s.turnover_20d_cr < MIN_TURNOVER_20D_CR);
        assert!(!s.qualifies);
    }

    #[test]
    fn test_two_circuit_hits_disqualify() {
        let mut bars = deep_bars();
        let n = bars.len();
        // Two limit-up style days inside the last 30: +6% closing at the high.
        for &i in &[n - 5, n - 15] {
            let prev = bars[i - 1].close;
            bars[i].close = prev * 1.06;
            bars[i].high = bars[i].close;
            bars[i].low = prev * 1.01;
            bars[i].open = prev * 1.01;
        }
        let s = score_liquidity("CIRCUIT", week(), &bars, Utc::now()).unwrap();
        assert!(s.circuit_hits_30d >= 2);
        assert!(!s.qualifies);
    }

    #[test]
    fn test_single_circuit_hit_allowed() {
        let mut bars = deep_bars();
        let n = bars.len();
        let prev = bars[n - 11].close;
        bars[n - 10].close = prev * 1.06;
        bars[n - 10].high = bars[n - 10].close;
        bars[n - 10].low = prev * 1.01;
        bars[n - 10].open = prev * 1.01;
        let s = score_liquidity("ONEHIT", week(), &bars, Utc::now()).unwrap();
        assert_eq!(s.circuit_hits_30d, 1);
        // One hit stays within the cap; the gap average may still bite.
        assert!(s.circuit_hits_30d <= MAX_CIRCUIT_HITS);
    }

    #[test]
    fn test_gappy_name_disqualified() {
        let mut bars = deep_bars();
        // Alternate +3%/-3% opens against the prior close.
        for (i, b) in bars.iter_mut().enumerate() {
            b.open = if i % 2 == 0 { 515.0 } else { 485.0 };
        }
        let s = score_liquidity("GAPPY", week(), &bars, Utc::now()).unwrap();
        assert!(s.avg_gap_pct > MAX_AVG_GAP_PCT);
        assert!(!s.qualifies);
    }

    #[test]
    fn test_insufficient_history_is_skip() {
        let bars: Vec<Bar> = deep_bars().into_iter().take(60).collect();
        assert!(matches!(
            score_liquidity("YOUNG", week(), &bars, Utc::now()),
            Err(EngineError::InsufficientHistory(_))
        ));
    }
}
