//! Market regime classifier gating the weekly pipeline.
//!
//! Four equally weighted sub-scores (trend, breadth, volatility,
//! leadership) roll up into a composite that maps to
//! RISK_ON / CHOPPY / RISK_OFF and a position-size multiplier. The
//! classifier also emits the regime-adaptive threshold bundle injected
//! into every downstream scoring stage.

use chrono::{DateTime, NaiveDate, Utc};
use engine_core::stats::{mean, std_dev};
use engine_core::{
    Bar, EngineError, RegimeSnapshot, RegimeState, RegimeSubScores, Thresholds,
};
use technical::indicators::{ma_slope, sma};

/// Cyclical sector indices whose strength signals risk appetite.
pub const CYCLICAL_INDICES: [&str; 4] = ["NIFTY BANK", "NIFTY METAL", "NIFTY REALTY", "NIFTY AUTO"];

/// Defensive sector indices that lead when risk is being shed.
pub const DEFENSIVE_INDICES: [&str; 3] = ["NIFTY PHARMA", "NIFTY FMCG", "NIFTY IT"];

/// Inputs assembled by the orchestrator for one classification.
pub struct RegimeInputs<'a> {
    /// Nifty daily bars, oldest first, at least 220.
    pub nifty_bars: &'a [Bar],
    /// India VIX closes, oldest first; None substitutes realized vol.
    pub vix: Option<&'a [f64]>,
    /// Universe breadth sample: (above 200 DMA, above 50 DMA, total).
    pub breadth: BreadthSample,
    /// Mean 20-day return of cyclical minus defensive sector indices.
    pub leadership_spread: f64,
}

/// Counts from a sample of universe symbols.
#[derive(Debug, Clone, Copy)]
pub struct BreadthSample {
    pub above_200dma: usize,
    pub above_50dma: usize,
    pub total: usize,
}

/// Classify the market for `week` and derive the threshold bundle.
pub fn classify(
    week: NaiveDate,
    inputs: &RegimeInputs,
    override_state: Option<RegimeState>,
    calculated_at: DateTime<Utc>,
) -> Result<(RegimeSnapshot, Thresholds), EngineError> {
    if inputs.nifty_bars.len() < 220 {
        return Err(EngineError::BenchmarkUnavailable(format!(
            "{} Nifty bars, need 220 for regime classification",
            inputs.nifty_bars.len()
        )));
    }

    let sub_scores = RegimeSubScores {
        trend: trend_score(inputs.nifty_bars),
        breadth: breadth_score(&inputs.breadth),
        volatility: volatility_score(inputs.nifty_bars, inputs.vix),
        leadership: leadership_score(inputs.leadership_spread),
    };
    let composite = sub_scores.composite();

    let (state, multiplier) = if let Some(forced) = override_state {
        (forced, base_multiplier(forced))
    } else {
        classify_composite(composite, sub_scores.trend)
    };

    // Confidence grows with distance from the nearest classification edge.
    let confidence = if override_state.is_some() {
        1.0
    } else {
        let edge_distance = (composite - 40.0).abs().min((composite - 70.0).abs());
        (0.5 + edge_distance / 60.0).min(1.0)
    };

    let snapshot = RegimeSnapshot {
        week,
        state,
        confidence,
        sub_scores,
        composite,
        multiplier,
        calculated_at,
    };

    tracing::info!(
        "Regime for {}: {} (composite {:.1}, trend {:.0}, breadth {:.0}, vol {:.0}, leadership {:.0}, multiplier {:.1})",
        week,
        state.as_str(),
        composite,
        sub_scores.trend,
        sub_scores.breadth,
        sub_scores.volatility,
        sub_scores.leadership,
        multiplier
    );

    let thresholds = Thresholds::for_regime(state);
    Ok((snapshot, thresholds))
}

fn base_multiplier(state: RegimeState) -> f64 {
    match state {
        RegimeState::RiskOn => 1.0,
        RegimeState::Choppy => 0.5,
        RegimeState::RiskOff => 0.0,
    }
}

/// Composite ≥ 70 is full RISK_ON. 50–69 with a still-strong trend is the
/// reduced RISK_ON variant (×0.7); the rest of 40–69 is CHOPPY.
fn classify_composite(composite: f64, trend: f64) -> (RegimeState, f64) {
    if composite >= 70.0 {
        (RegimeState::RiskOn, 1.0)
    } else if composite >= 50.0 && trend >= 60.0 {
        (RegimeState::RiskOn, 0.7)
    } else if composite >= 40.0 {
        (RegimeState::Choppy, 0.5)
    } else {
        (RegimeState::RiskOff, 0.0)
    }
}

/// Nifty close vs the 20/50/200 DMAs, MA stacking, and slope direction.
fn trend_score(bars: &[Bar]) -> f64 {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let close = *closes.last().unwrap_or(&0.0);

    let sma20_series = sma(&closes, 20);
    let sma50_series = sma(&closes, 50);
    let sma200_series = sma(&closes, 200);
    let sma20 = *sma20_series.last().unwrap_or(&f64::MAX);
    let sma50 = *sma50_series.last().unwrap_or(&f64::MAX);
    let sma200 = *sma200_series.last().unwrap_or(&f64::MAX);

    let mut score = 0.0;
    if close > sma20 {
        score += 15.0;
    }
    if close > sma50 {
        score += 15.0;
    }
    if close > sma200 {
        score += 20.0;
    }
    if sma20 > sma50 {
        score += 10.0;
    }
    if sma50 > sma200 {
        score += 10.0;
    }
    if ma_slope(&sma20_series, 20) > 0.0 {
        score += 10.0;
    }
    if ma_slope(&sma50_series, 50) > 0.0 {
        score += 10.0;
    }
    if ma_slope(&sma200_series, 200) > 0.0 {
        score += 10.0;
    }
    score
}

/// Fraction of the universe above its long MAs.
fn breadth_score(sample: &BreadthSample) -> f64 {
    if sample.total == 0 {
        return 50.0;
    }
    let frac200 = sample.above_200dma as f64 / sample.total as f64;
    let frac50 = sample.above_50dma as f64 / sample.total as f64;
    100.0 * (0.5 * frac200 + 0.5 * frac50)
}

/// VIX level band plus trend and spike components. Without India VIX the
/// realized 20-day Nifty vol (annualized, in points) substitutes.
fn volatility_score(nifty_bars: &[Bar], vix: Option<&[f64]>) -> f64 {
    let series: Vec<f64> = match vix {
        Some(v) if !v.is_empty() => v.to_vec(),
        _ => realized_vol_series(nifty_bars),
    };
    let Some(&current) = series.last() else {
        return 0.0;
    };

    let base = match current {
        v if v < 13.0 => 40.0,
        v if v < 16.0 => 35.0,
        v if v < 20.0 => 25.0,
        v if v < 25.0 => 10.0,
        _ => 0.0,
    };

    let avg10 = mean(&series[series.len().saturating_sub(10)..]);
    let trend = if avg10 <= 0.0 {
        20.0
    } else if current < avg10 * 0.98 {
        35.0
    } else if current <= avg10 * 1.02 {
        20.0
    } else {
        0.0
    };

    let spike_penalty_free = if avg10 > 0.0 && current > 1.3 * avg10 {
        0.0
    } else {
        25.0
    };

    base + trend + spike_penalty_free
}

/// Rolling annualized 20-day realized vol of Nifty, scaled to VIX-like points.
fn realized_vol_series(bars: &[Bar]) -> Vec<f64> {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let returns: Vec<f64> = closes
        .windows(2)
        .map(|w| if w[0] != 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect();
    if returns.len() < 20 {
        return vec![];
    }

    (20..=returns.len())
        .map(|end| std_dev(&returns[end - 20..end]) * (252.0_f64).sqrt() * 100.0)
        .collect()
}

/// Cyclical-minus-defensive 20-day return spread, banded.
fn leadership_score(spread: f64) -> f64 {
    match spread {
        s if s >= 0.03 => 100.0,
        s if s >= 0.01 => 75.0,
        s if s >= -0.01 => 50.0,
        s if s >= -0.03 => 25.0,
        _ => 0.0,
    }
}

/// Mean 20-day return of each group, cyclical minus defensive.
pub fn leadership_spread(cyclical: &[Vec<f64>], defensive: &[Vec<f64>]) -> f64 {
    fn group_mean_return(series: &[Vec<f64>]) -> f64 {
        let returns: Vec<f64> = series
            .iter()
            .filter_map(|closes| {
                if closes.len() < 21 {
                    return None;
                }
                let first = closes[closes.len() - 21];
                let last = closes[closes.len() - 1];
                if first != 0.0 {
                    Some(last / first - 1.0)
                } else {
                    None
                }
            })
            .collect();
        mean(&returns)
    }

    group_mean_return(cyclical) - group_mean_return(defensive)
}
