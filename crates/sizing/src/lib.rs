//! Risk geometry (stage 5): volatility- and Kelly-adjusted share counts.
//!
//! The stop is already the tighter-of-two from the setup detector; this
//! stage turns it into a share count under the per-trade risk budget,
//! the regime multiplier, and the single-position capital cap.

use chrono::{DateTime, Utc};
use engine_core::{defaults, PositionSizing, SystemStats, TradeSetup};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;

/// Inputs for sizing one setup.
pub struct SizingInputs<'a> {
    pub setup: &'a TradeSetup,
    pub stock_atr14: f64,
    pub nifty_atr14: f64,
    /// Rolling outcome snapshot taken at stage start.
    pub stats: SystemStats,
    pub regime_multiplier: f64,
    pub rr_floor: f64,
    pub portfolio_value: f64,
    pub risk_pct_per_trade: f64,
}

/// Kelly fraction from the rolling stats, clipped to [0, 1]. Thin
/// history falls back to the configured prior.
pub fn kelly_fraction(stats: &SystemStats) -> f64 {
    let effective = if stats.num_trades < defaults::MIN_OUTCOME_HISTORY {
        SystemStats::prior()
    } else {
        *stats
    };

    if effective.avg_win <= 0.0 {
        return 0.0;
    }
    let p = effective.win_rate;
    let q = 1.0 - p;
    ((p * effective.avg_win - q * effective.avg_loss) / effective.avg_win).clamp(0.0, 1.0)
}

/// Size one position. Disqualified setups come back with zero shares and
/// `qualifies = false` rather than an error; they are still persisted.
pub fn size_position(inputs: &SizingInputs, calculated_at: DateTime<Utc>) -> PositionSizing {
    let setup = inputs.setup;
    let mid_entry = setup.mid_entry();
    let risk_per_share = mid_entry - setup.stop;

    let disqualified = |reason: &str| {
        tracing::debug!("{}: sizing rejected ({})", setup.symbol, reason);
        PositionSizing {
            symbol: setup.symbol.clone(),
            week: setup.week,
            calculated_at,
            stop_method: setup.stop_method,
            risk_per_share,
            base_shares: 0,
            vol_adj: 0.0,
            kelly_fraction: 0.0,
            regime_multiplier: inputs.regime_multiplier,
            final_shares: 0,
            final_risk: 0.0,
            position_value: 0.0,
            position_pct: 0.0,
            qualifies: false,
        }
    };

    if risk_per_share <= 0.0 || mid_entry <= 0.0 {
        return disqualified("degenerate geometry");
    }
    if setup.stop_distance_pct > defaults::STOP_DISTANCE_CAP {
        return disqualified("stop too far");
    }
    // Same tolerance the setup detector applies at the floor.
    if setup.rr < inputs.rr_floor - 1e-9 {
        return disqualified("below regime rr floor");
    }

    let base_risk_budget = inputs.portfolio_value * inputs.risk_pct_per_trade;
    let base_shares = (base_risk_budget / risk_per_share).floor() as i64;

    let vol_adj = if inputs.stock_atr14 > 0.0 {
        (inputs.nifty_atr14 / inputs.stock_atr14).clamp(0.5, 1.5)
    } else {
        0.5
    };
    let kelly = kelly_fraction(&inputs.stats);

    let mut final_shares =
        (base_shares as f64 * vol_adj * kelly * inputs.regime_multiplier).floor() as i64;

    // Single-position capital cap.
    let mid_dec = Decimal::from_f64(mid_entry).unwrap_or_default();
    let cap_value =
        Decimal::from_f64(inputs.portfolio_value * defaults::POSITION_VALUE_CAP)
            .unwrap_or_default();
    let position_value = Decimal::from(final_shares) * mid_dec;
    if position_value > cap_value && mid_dec > Decimal::ZERO {
        final_shares = (cap_value / mid_dec).floor().to_i64().unwrap_or(0);
    }

    let position_value = (Decimal::from(final_shares) * mid_dec)
        .to_f64()
        .unwrap_or(0.0);
    let final_risk = final_shares as f64 * risk_per_share;
    let position_pct = if inputs.portfolio_value > 0.0 {
        position_value / inputs.portfolio_value
    } else {
        0.0
    };

    PositionSizing {
        symbol: setup.symbol.clone(),
        week: setup.week,
        calculated_at,
        stop_method: setup.stop_method,
        risk_per_share,
        base_shares,
        vol_adj,
        kelly_fraction: kelly,
        regime_multiplier: inputs.regime_multiplier,
        final_shares,
        final_risk,
        position_value,
        position_pct,
        qualifies: final_shares >= 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use engine_core::{SetupType, StopMethod};

    fn setup(mid: f64, stop: f64, rr: f64) -> TradeSetup {
        TradeSetup {
            symbol: "TEST".to_string(),
            week: NaiveDate::from_ymd_opt(2026, 3, 9).unwrap(),
            calculated_at: Utc::now(),
            setup_type: SetupType::Pullback,
            support: mid,
            entry_low: mid - 1.0,
            entry_high: mid + 1.0,
            stop,
            stop_method: StopMethod::Structure,
            target1: mid + 2.0 * (mid - stop),
            target2: mid + 3.0 * (mid - stop),
            rr,
            stop_distance_pct: (mid - stop) / mid,
            confidence: 70.0,
            quality_composite: 75.0,
        }
    }

    fn inputs(setup: &TradeSetup, portfolio_value: f64) -> SizingInputs<'_> {
        SizingInputs {
            setup,
            stock_atr14: 2.0,
            nifty_atr14: 2.0,
            stats: SystemStats::prior(),
            regime_multiplier: 1.0,
            rr_floor: 2.0,
            portfolio_value,
            risk_pct_per_trade: 0.015,
        }
    }

    #[test]
    fn test_prior_kelly_sizing() {
        // ₹10,00,000 at 1.5% risk, ₹2 per share of risk: 7500 base shares,
        // prior Kelly (0.6 - 0.55)/1.2 = 1/24.
        let s = setup(95.0, 93.0, 2.0);
        let sized = size_position(&inputs(&s, 1_000_000.0), Utc::now());

        assert_eq!(sized.base_shares, 7500);
        assert!((sized.vol_adj - 1.0).abs() < 1e-12);
        assert!((sized.kelly_fraction - 1.0 / 24.0).abs() < 1e-9);
        assert_eq!(sized.final_shares, 312);
        assert!(sized.qualifies);
        assert!((sized.final_risk - 624.0).abs() < 1e-9);
    }

    #[test]
    fn test_doubling_portfolio_doubles_shares() {
        let s = setup(95.0, 93.0, 2.0);
        let small = size_position(&inputs(&s, 1_000_000.0), Utc::now());
        let large = size_position(&inputs(&s, 2_000_000.0), Utc::now());

        // Within floor rounding.
        let ratio = large.final_shares as f64 / small.final_shares as f64;
        assert!((ratio - 2.0).abs() < 0.01);
    }

    #[test]
    fn test_regime_multiplier_zero_gives_no_shares() {
        let s = setup(95.0, 93.0, 2.0);
        let mut i = inputs(&s, 1_000_000.0);
        i.regime_multiplier = 0.0;
        let sized = size_position(&i, Utc::now());
        assert_eq!(sized.final_shares, 0);
        assert!(!sized.qualifies);
    }

    #[test]
    fn test_capital_cap_binds() {
        // A tight stop on a cheap stock wants more value than 8% allows.
        let s = setup(50.0, 49.8, 2.0);
        let mut i = inputs(&s, 1_000_000.0);
        i.stats = SystemStats {
            win_rate: 0.65,
            avg_win: 2.0,
            avg_loss: 1.0,
            num_trades: 60,
        };
        let sized = size_position(&i, Utc::now());
        assert!(sized.position_value <= 80_000.0 + 1e-6);
        assert!(sized.final_shares <= 1600);
        assert!(sized.qualifies);
    }

    #[test]
    fn test_rr_floor_rejects() {
        let s = setup(95.0, 93.0, 1.999);
        let sized = size_position(&inputs(&s, 1_000_000.0), Utc::now());
        assert!(!sized.qualifies);
        assert_eq!(sized.final_shares, 0);
    }

    #[test]
    fn test_wide_stop_rejects() {
        // Stop 10% below mid entry breaches the cap.
        let s = setup(100.0, 90.0, 2.0);
        let sized = size_position(&inputs(&s, 1_000_000.0), Utc::now());
        assert!(!sized.qualifies);
    }

    #[test]
    fn test_kelly_prior_under_thin_history() {
        let thin = SystemStats {
            win_rate: 0.9,
            avg_win: 3.0,
            avg_loss: 0.5,
            num_trades: 4,
        };
        // Four trades is not evidence; the prior applies.
        assert!((kelly_fraction(&thin) - 1.0 / 24.0).abs() < 1e-9);

        let seasoned = SystemStats {
            win_rate: 0.6,
            avg_win: 1.5,
            avg_loss: 1.0,
            num_trades: 60,
        };
        let k = kelly_fraction(&seasoned);
        assert!((k - (0.6 * 1.5 - 0.4 * 1.0) / 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_losing_system_kelly_clamps_to_zero() {
        let losing = SystemStats {
            win_rate: 0.3,
            avg_win: 1.0,
            avg_loss: 1.5,
            num_trades: 60,
        };
        assert_eq!(kelly_fraction(&losing), 0.0);
    }
}
