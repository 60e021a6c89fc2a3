//! Weekly-return consistency gate (the third stage).
//!
//! Nine metrics over the last 52 weekly returns, judged against
//! regime-adaptive thresholds, plus a one-sided binomial significance
//! test: a win rate that cannot reject p=0.5 at the 10% level is noise,
//! whatever the other metrics say.

use chrono::{DateTime, NaiveDate, Utc};
use engine_core::stats::{clamp01, downside_std_dev, mean, percentile_rank, std_dev};
use engine_core::{defaults, ConsistencyScore, ConsistencyThresholds, WeeklyBar};
use statrs::distribution::{Binomial, DiscreteCDF};

/// Per-symbol metrics before the batch-wide percentile pass.
struct RawMetrics {
    symbol: String,
    weeks: usize,
    pos_pct: f64,
    pos_count: u64,
    plus3_pct: f64,
    plus5_pct: f64,
    std_dev: f64,
    avg_return: f64,
    sharpe: f64,
    sortino: f64,
    max_win_streak: usize,
    consistency_score: f64,
    regime_score: f64,
}

/// Weekly close-to-close returns from resampled bars, oldest first.
pub fn weekly_returns(weekly: &[WeeklyBar]) -> Vec<f64> {
    weekly
        .windows(2)
        .filter_map(|w| {
            if w[0].close != 0.0 {
                Some((w[1].close - w[0].close) / w[0].close)
            } else {
                None
            }
        })
        .collect()
}

/// Score a batch of symbols. Symbols with fewer than 40 weekly returns
/// are skipped. The percentile component needs the whole batch, so this
/// runs in two passes; output is sorted by symbol for deterministic
/// persistence.
pub fn score_consistency_batch(
    weekly_by_symbol: &[(String, Vec<WeeklyBar>)],
    thresholds: &ConsistencyThresholds,
    week: NaiveDate,
    calculated_at: DateTime<Utc>,
) -> Vec<ConsistencyScore> {
    let mut raw: Vec<RawMetrics> = weekly_by_symbol
        .iter()
        .filter_map(|(symbol, bars)| compute_metrics(symbol, bars, thresholds))
        .collect();
    raw.sort_by(|a, b| a.symbol.cmp(&b.symbol));

    let all_scores: Vec<f64> = raw.iter().map(|r| r.consistency_score).collect();

    raw.into_iter()
        .map(|r| {
            let pct_rank = percentile_rank(r.consistency_score, &all_scores);
            finalize(r, pct_rank, thresholds, week, calculated_at)
        })
        .collect()
}

fn compute_metrics(
    symbol: &str,
    weekly: &[WeeklyBar],
    thresholds: &ConsistencyThresholds,
) -> Option<RawMetrics> {
    let all_returns = weekly_returns(weekly);
    if all_returns.len() < defaults::MIN_CONSISTENCY_WEEKS {
        tracing::debug!(
            "{}: {} weekly returns, need {} — skipped",
            symbol,
            all_returns.len(),
            defaults::MIN_CONSISTENCY_WEEKS
        );
        return None;
    }
    let returns =
        &all_returns[all_returns.len().saturating_sub(defaults::CONSISTENCY_WINDOW_WEEKS)..];
    let n = returns.len();

    let pos_count = returns.iter().filter(|&&r| r > 0.0).count();
    let pos_pct = pos_count as f64 / n as f64;
    let plus3_pct = returns.iter().filter(|&&r| r >= 0.03).count() as f64 / n as f64;
    let plus5_pct = returns.iter().filter(|&&r| r >= 0.05).count() as f64 / n as f64;

    let sd = std_dev(returns);
    let avg = mean(returns);
    let sharpe = if sd > 1e-12 { avg / sd } else { 0.0 };
    let downside = downside_std_dev(returns);
    let sortino = if downside > 1e-12 { avg / downside } else { 0.0 };

    let mut max_win_streak = 0usize;
    let mut streak = 0usize;
    for &r in returns {
        if r > 0.0 {
            streak += 1;
            max_win_streak = max_win_streak.max(streak);
        } else {
            streak = 0;
        }
    }

    // Weighted consistency composite, each component normalized to [0, 1].
    let pos_n = clamp01((pos_pct - 0.40) / 0.40);
    let band_mid = (thresholds.plus3_band.0 + thresholds.plus3_band.1) / 2.0;
    let band_half = (thresholds.plus3_band.1 - thresholds.plus3_band.0) / 2.0;
    let plus3_n = if band_half > 0.0 {
        clamp01(1.0 - (plus3_pct - band_mid).abs() / band_half)
    } else {
        0.0
    };
    let inv_std_n = if sd > 1e-12 {
        clamp01(thresholds.max_std_dev / sd / 2.0)
    } else {
        1.0
    };
    let sharpe_n = clamp01(sharpe / 0.30);
    let streak_n = clamp01(max_win_streak as f64 / 8.0);

    let consistency_score = 100.0
        * (0.25 * pos_n + 0.25 * plus3_n + 0.20 * inv_std_n + 0.15 * sharpe_n + 0.15 * streak_n);

    // Recent-quarter strength relative to the full year.
    let avg_13 = mean(&returns[n.saturating_sub(13)..]);
    let regime_score = if avg.abs() < 1e-9 {
        if avg_13 > 0.0 {
            1.5
        } else {
            0.0
        }
    } else {
        (avg_13 / avg).clamp(0.0, 3.0)
    };

    Some(RawMetrics {
        symbol: symbol.to_string(),
        weeks: n,
        pos_pct,
        pos_count: pos_count as u64,
        plus3_pct,
        plus5_pct,
        std_dev: sd,
        avg_return: avg,
        sharpe,
        sortino,
        max_win_streak,
        consistency_score,
        regime_score,
    })
}

fn finalize(
    r: RawMetrics,
    percentile: f64,
    thresholds: &ConsistencyThresholds,
    week: NaiveDate,
    calculated_at: DateTime<Utc>,
) -> ConsistencyScore {
    let regime_n = clamp01(r.regime_score / 2.0);
    let sharpe_n = clamp01(r.sharpe / 0.30);
    let final_score = 0.40 * r.consistency_score
        + 0.25 * (regime_n * 100.0)
        + 0.20 * (percentile * 100.0)
        + 0.15 * (sharpe_n * 100.0);

    let checks = [
        r.pos_pct >= thresholds.min_pos_pct,
        r.plus3_pct >= thresholds.plus3_band.0 && r.plus3_pct <= thresholds.plus3_band.1,
        r.std_dev <= thresholds.max_std_dev,
        r.sharpe >= thresholds.min_sharpe,
        r.consistency_score >= 75.0,
        r.regime_score >= 1.0,
    ];
    let checks_passed = checks.iter().filter(|&&c| c).count() as u8;

    let significance_p = binomial_p_value(r.pos_count, r.weeks as u64);
    let significant = significance_p < defaults::CONSISTENCY_SIGNIFICANCE_P;

    ConsistencyScore {
        symbol: r.symbol,
        week,
        calculated_at,
        weeks_observed: r.weeks,
        pos_pct: r.pos_pct,
        plus3_pct: r.plus3_pct,
        plus5_pct: r.plus5_pct,
        std_dev: r.std_dev,
        avg_weekly_return: r.avg_return,
        sharpe: r.sharpe,
        sortino: r.sortino,
        max_win_streak: r.max_win_streak,
        consistency_score: r.consistency_score,
        regime_score: r.regime_score,
        percentile_rank: percentile,
        final_score,
        checks_passed,
        significance_p,
        qualifies: checks_passed >= 5 && significant,
    }
}

/// One-sided p-value for observing at least `wins` positive weeks out of
/// `n` under p = 0.5.
fn binomial_p_value(wins: u64, n: u64) -> f64 {
    if n == 0 {
        return 1.0;
    }
    if wins == 0 {
        return 1.0;
    }
    let dist = Binomial::new(0.5, n).expect("0.5 is a valid probability");
    1.0 - dist.cdf(wins - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_core::{RegimeState, Thresholds};

    fn bars_from_returns(returns: &[f64]) -> Vec<WeeklyBar> {
        let mut close = 100.0;
        let mut bars = vec![weekly_bar(0, close)];
        for (i, r) in returns.iter().enumerate() {
            close *= 1.0 + r;
            bars.push(weekly_bar(i + 1, close));
        }
        bars
    }

    fn weekly_bar(i: usize, close: f64) -> WeeklyBar {
        WeeklyBar {
            week: NaiveDate::from_ymd_opt(2025, 1, 6).unwrap()
                + chrono::Duration::weeks(i as i64),
            open: close,
            high: close * 1.01,
            low: close * 0.99,
            close,
            volume: 1.0e6,
        }
    }

    fn risk_on_thresholds() -> ConsistencyThresholds {
        Thresholds::for_regime(RegimeState::RiskOn).consistency
    }

    /// 36 positive weeks of 52, strong finish: passes every check.
    fn winning_returns() -> Vec<f64> {
        let mut r = Vec::new();
        r.extend(std::iter::repeat(-0.015).take(16));
        r.extend(std::iter::repeat(0.015).take(23));
        r.extend(std::iter::repeat(0.035).take(13));
        r
    }

    #[test]
    fn test_consistent_winner_qualifies() {
        let batch = vec![("WINNER".to_string(), bars_from_returns(&winning_returns()))];
        let scores =
            score_consistency_batch(&batch, &risk_on_thresholds(), week(), Utc::now());

        assert_eq!(scores.len(), 1);
        let s = &scores[0];
        assert!((s.pos_pct - 36.0 / 52.0).abs() < 1e-9);
        assert!((s.plus3_pct - 13.0 / 52.0).abs() < 1e-9);
        assert!(s.std_dev <= 0.065);
        assert!(s.sharpe >= 0.12);
        assert!(s.consistency_score >= 75.0);
        assert!(s.regime_score >= 1.0);
        assert!(s.significance_p < 0.10);
        assert_eq!(s.checks_passed, 6);
        assert!(s.qualifies);
    }

    #[test]
    fn test_coin_flip_fails_significance() {
        // 27/52 positive: pos_pct 0.519, binomial p ~ 0.44. Rejected on
        // significance even where other checks pass.
        let mut r = Vec::new();
        r.extend(std::iter::repeat(-0.01).take(25));
        r.extend(std::iter::repeat(0.02).take(27));
        let batch = vec![("FLIP".to_string(), bars_from_returns(&r))];
        let scores =
            score_consistency_batch(&batch, &risk_on_thresholds(), week(), Utc::now());

        let s = &scores[0];
        assert!((s.pos_pct - 27.0 / 52.0).abs() < 1e-9);
        assert!(s.significance_p > 0.40 && s.significance_p < 0.50);
        assert!(!s.qualifies);
    }

    #[test]
    fn test_39_weeks_skipped_40_scored() {
        let r39: Vec<f64> = std::iter::repeat(0.02).take(39).collect();
        let r40: Vec<f64> = std::iter::repeat(0.02).take(40).collect();
        let batch = vec![
            ("SHORT".to_string(), bars_from_returns(&r39)),
            ("JUST".to_string(), bars_from_returns(&r40)),
        ];
        let scores =
            score_consistency_batch(&batch, &risk_on_thresholds(), week(), Utc::now());

        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].symbol, "JUST");
        assert_eq!(scores[0].weeks_observed, 40);
    }

    #[test]
    fn test_high_volatility_fails_std_check() {
        // Big alternating swings: positive expectancy but wild.
        let r: Vec<f64> = (0..52)
            .map(|i| if i % 2 == 0 { 0.09 } else { -0.07 })
            .collect();
        let batch = vec![("WILD".to_string(), bars_from_returns(&r))];
        let scores =
            score_consistency_batch(&batch, &risk_on_thresholds(), week(), Utc::now());

        let s = &scores[0];
        assert!(s.std_dev > 0.065);
        assert!(!s.qualifies);
    }

    #[test]
    fn test_binomial_p_values() {
        // 34/52 is well past two sigma.
        assert!(binomial_p_value(34, 52) < 0.02);
        // 26/52 is dead even.
        assert!(binomial_p_value(26, 52) > 0.40);
        assert_eq!(binomial_p_value(0, 52), 1.0);
    }

    #[test]
    fn test_batch_percentile_ordering() {
        let strong = winning_returns();
        let weak: Vec<f64> = (0..52)
            .map(|i| if i % 3 == 0 { 0.02 } else { -0.005 })
            .collect();
        let batch = vec![
            ("STRONG".to_string(), bars_from_returns(&strong)),
            ("WEAK".to_string(), bars_from_returns(&weak)),
        ];
        let scores =
            score_consistency_batch(&batch, &risk_on_thresholds(), week(), Utc::now());

        let strong_score = scores.iter().find(|s| s.symbol == "STRONG").unwrap();
        let weak_score = scores.iter().find(|s| s.symbol == "WEAK").unwrap();
        assert!(strong_score.consistency_score > weak_score.consistency_score);
        assert!(strong_score.percentile_rank > weak_score.percentile_rank);
    }

    fn week() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 9).unwrap()
    }
}
