//! Trade-card assembly (the final stage).
//!
//! Joins the per-symbol outputs of every scoring stage into a fully
//! specified recommendation: levels, sizing, action steps, the Monday
//! gap contingency, and invalidation conditions.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use engine_core::{
    defaults, ConsistencyScore, IndicatorSet, LiquidityScore, MomentumScore, PhaseScores,
    PositionSizing, Recommendation, RecommendationStatus, RegimeSnapshot, StageCounts, Stock,
    TechnicalContext, TradeCard, TradeLevels, TradeSetup, TradeSizing,
};

/// Conviction weights: momentum, consistency, liquidity, fundamental,
/// setup confidence.
const CONVICTION_WEIGHTS: [f64; 5] = [0.25, 0.20, 0.15, 0.20, 0.20];

/// Everything known about one selected symbol.
pub struct CardInputs<'a> {
    pub stock: &'a Stock,
    pub momentum: &'a MomentumScore,
    pub consistency: &'a ConsistencyScore,
    pub liquidity: &'a LiquidityScore,
    pub setup: &'a TradeSetup,
    pub sizing: &'a PositionSizing,
    pub indicators: &'a IndicatorSet,
    pub fundamental: Option<f64>,
    pub current_price: f64,
    pub high_52w: f64,
}

/// 0–10 conviction across the phase scores. A missing fundamental score
/// renormalizes the remaining weights rather than counting as zero.
pub fn conviction10(
    momentum: f64,
    consistency: f64,
    liquidity: f64,
    fundamental: Option<f64>,
    setup_confidence: f64,
) -> f64 {
    let [wm, wc, wl, wf, ws] = CONVICTION_WEIGHTS;
    match fundamental {
        Some(f) => {
            (wm * momentum + wc * consistency + wl * liquidity + wf * f + ws * setup_confidence)
                / 10.0
        }
        None => {
            let remaining = wm + wc + wl + ws;
            ((wm * momentum + wc * consistency + wl * liquidity + ws * setup_confidence)
                / remaining)
                / 10.0
        }
    }
}

pub fn conviction_label(conviction: f64) -> &'static str {
    match conviction {
        c if c >= 8.0 => "Very High",
        c if c >= 6.5 => "High",
        c if c >= 5.0 => "Medium",
        c if c >= 3.5 => "Low",
        _ => "Very Low",
    }
}

/// Build the card for one selected position.
pub fn build_card(inputs: &CardInputs) -> TradeCard {
    let setup = inputs.setup;
    let sizing = inputs.sizing;
    let mid_entry = setup.mid_entry();
    let risk = mid_entry - setup.stop;

    let conviction = conviction10(
        inputs.momentum.score,
        inputs.consistency.final_score,
        inputs.liquidity.score,
        inputs.fundamental,
        setup.confidence,
    );

    let action_steps = vec![
        format!(
            "Place a limit order in the ₹{:.2}–₹{:.2} zone, {} shares",
            setup.entry_low, setup.entry_high, sizing.final_shares
        ),
        format!(
            "Set the initial stop at ₹{:.2} ({} stop)",
            setup.stop,
            setup.stop_method.as_str()
        ),
        format!(
            "At +1R (₹{:.2}) move the stop to breakeven",
            mid_entry + risk
        ),
        format!(
            "At +2R (₹{:.2}) trail the stop to +1R",
            mid_entry + 2.0 * risk
        ),
        format!(
            "Book half at target 1 ₹{:.2}; exit the rest at target 2 ₹{:.2}",
            setup.target1, setup.target2
        ),
    ];

    let gap_contingency = format!(
        "Monday open at or below ₹{:.2}: skip, gapped through stop. Open above ₹{:.2}: do not chase. \
         Open inside ₹{:.2}–₹{:.2}: enter at open. Open between stop and band: enter, small gap against. \
         Otherwise wait for a pullback into the band.",
        setup.stop,
        setup.entry_high * 1.02,
        setup.entry_low,
        setup.entry_high
    );

    let invalidation = vec![
        format!("Daily close below the stop at ₹{:.2}", setup.stop),
        format!(
            "{} structure fails: close below support ₹{:.2} on above-average volume",
            setup.setup_type.as_str(),
            setup.support
        ),
        "Regime flips to RISK_OFF before entry".to_string(),
    ];

    TradeCard {
        symbol: inputs.stock.symbol.clone(),
        name: inputs.stock.name.clone(),
        sector: inputs
            .stock
            .sector
            .clone()
            .unwrap_or_else(|| "Unclassified".to_string()),
        week: setup.week,
        setup_type: setup.setup_type,
        scores: PhaseScores {
            momentum: inputs.momentum.score,
            consistency: inputs.consistency.final_score,
            liquidity: inputs.liquidity.score,
            fundamental: inputs.fundamental,
            setup_confidence: setup.confidence,
            conviction10: conviction,
            conviction_label: conviction_label(conviction).to_string(),
        },
        context: TechnicalContext {
            current_price: inputs.current_price,
            high_52w: inputs.high_52w,
            sma20: inputs.indicators.sma20,
            sma50: inputs.indicators.sma50,
            sma200: inputs.indicators.sma200,
            atr14: inputs.indicators.atr14,
        },
        levels: TradeLevels {
            entry_low: setup.entry_low,
            entry_high: setup.entry_high,
            stop: setup.stop,
            stop_method: setup.stop_method,
            target1: setup.target1,
            target2: setup.target2,
            rr: setup.rr,
        },
        sizing: TradeSizing {
            shares: sizing.final_shares,
            investment: sizing.position_value,
            risk_amount: sizing.final_risk,
            position_pct: sizing.position_pct,
        },
        action_steps,
        gap_contingency,
        invalidation,
    }
}

/// Assemble the weekly recommendation document.
pub fn assemble(
    week: NaiveDate,
    regime: RegimeSnapshot,
    mut cards: Vec<TradeCard>,
    stage_counts: StageCounts,
    fatal_reasons: Vec<String>,
    calculated_at: DateTime<Utc>,
) -> Recommendation {
    cards.sort_by(|a, b| {
        b.scores
            .conviction10
            .partial_cmp(&a.scores.conviction10)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });

    tracing::info!(
        "Recommendation for {}: {} setups under {} regime",
        week,
        cards.len(),
        regime.state.as_str()
    );

    Recommendation {
        week,
        calculated_at,
        market_regime: regime,
        total_setups: cards.len(),
        cards,
        stage_counts,
        fatal_reasons,
        status: RecommendationStatus::Draft,
        expires_at: calculated_at + Duration::days(defaults::RECOMMENDATION_TTL_DAYS),
    }
}

/// A recommendation past its expiry is stale and surfaced as such.
pub fn is_stale(rec: &Recommendation, now: DateTime<Utc>) -> bool {
    now >= rec.expires_at
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_core::{RegimeState, RegimeSubScores};

    #[test]
    fn test_conviction_with_fundamental() {
        let c = conviction10(80.0, 70.0, 90.0, Some(60.0), 75.0);
        let expected = (0.25 * 80.0 + 0.20 * 70.0 + 0.15 * 90.0 + 0.20 * 60.0 + 0.20 * 75.0) / 10.0;
        assert!((c - expected).abs() < 1e-12);
    }

    #[test]
    fn test_conviction_renormalizes_missing_fundamental() {
        let c = conviction10(80.0, 70.0, 90.0, None, 75.0);
        let expected =
            ((0.25 * 80.0 + 0.20 * 70.0 + 0.15 * 90.0 + 0.20 * 75.0) / 0.80) / 10.0;
        assert!((c - expected).abs() < 1e-12);

        // Uniform scores are unchanged by renormalization.
        let uniform_with = conviction10(80.0, 80.0, 80.0, Some(80.0), 80.0);
        let uniform_without = conviction10(80.0, 80.0, 80.0, None, 80.0);
        assert!((uniform_with - uniform_without).abs() < 1e-12);
        assert!((uniform_with - 8.0).abs() < 1e-12);
    }

    #[test]
    fn test_conviction_labels() {
        assert_eq!(conviction_label(8.5), "Very High");
        assert_eq!(conviction_label(8.0), "Very High");
        assert_eq!(conviction_label(7.0), "High");
        assert_eq!(conviction_label(5.5), "Medium");
        assert_eq!(conviction_label(4.0), "Low");
        assert_eq!(conviction_label(2.0), "Very Low");
    }

    #[test]
    fn test_risk_off_assembly_is_empty() {
        let week = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        let regime = RegimeSnapshot {
            week,
            state: RegimeState::RiskOff,
            confidence: 0.9,
            sub_scores: RegimeSubScores {
                trend: 10.0,
                breadth: 20.0,
                volatility: 30.0,
                leadership: 25.0,
            },
            composite: 21.25,
            multiplier: 0.0,
            calculated_at: Utc::now(),
        };
        let rec = assemble(
            week,
            regime,
            Vec::new(),
            StageCounts::default(),
            Vec::new(),
            Utc::now(),
        );
        assert_eq!(rec.total_setups, 0);
        assert_eq!(rec.market_regime.state, RegimeState::RiskOff);
        assert_eq!(rec.status, RecommendationStatus::Draft);
    }

    #[test]
    fn test_staleness_window() {
        let week = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        let created = Utc::now();
        let regime = RegimeSnapshot {
            week,
            state: RegimeState::RiskOn,
            confidence: 0.8,
            sub_scores: RegimeSubScores {
                trend: 80.0,
                breadth: 75.0,
                volatility: 70.0,
                leadership: 75.0,
            },
            composite: 75.0,
            multiplier: 1.0,
            calculated_at: created,
        };
        let rec = assemble(
            week,
            regime,
            Vec::new(),
            StageCounts::default(),
            Vec::new(),
            created,
        );
        assert!(!is_stale(&rec, created + Duration::days(6)));
        assert!(is_stale(&rec, created + Duration::days(7)));
    }
}
