use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::regime::RegimeState;

/// Parameters carried by every stage invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunParams {
    /// Monday of the ISO week being generated.
    pub week_start: NaiveDate,
    /// Total portfolio value in rupees.
    pub portfolio_value: f64,
    /// Fraction of portfolio value risked per trade.
    pub risk_pct_per_trade: f64,
    /// Operator override replacing the classified regime.
    pub regime_override: Option<RegimeState>,
}

impl RunParams {
    pub fn new(week_start: NaiveDate, portfolio_value: f64) -> Self {
        RunParams {
            week_start,
            portfolio_value,
            risk_pct_per_trade: defaults::RISK_PCT_PER_TRADE,
            regime_override: None,
        }
    }
}

/// Static configuration constants. Every threshold and weight in the
/// engine is a constant here or in the owning stage.
pub mod defaults {
    /// Fraction of portfolio value risked per trade.
    pub const RISK_PCT_PER_TRADE: f64 = 0.015;

    /// Hard cap on total portfolio positions.
    pub const MAX_POSITIONS: usize = 12;

    /// Max positions per sector.
    pub const SECTOR_MAX_POSITIONS: usize = 3;

    /// Max fraction of portfolio value per sector.
    pub const SECTOR_VALUE_CAP: f64 = 0.25;

    /// Pairwise 60-day return correlation bound for kept pairs.
    pub const CORRELATION_CAP: f64 = 0.70;

    /// Max fraction of portfolio value in a single position.
    pub const POSITION_VALUE_CAP: f64 = 0.08;

    /// Max stop distance from mid entry.
    pub const STOP_DISTANCE_CAP: f64 = 0.08;

    /// Closed trades needed before the rolling stats replace the prior.
    pub const MIN_OUTCOME_HISTORY: usize = 10;

    /// Quality score floor for momentum candidates.
    pub const MIN_QUALITY_SCORE: i64 = 60;

    /// Trading days of history required by the momentum stage.
    pub const MIN_MOMENTUM_HISTORY_DAYS: usize = 200;

    /// Weekly bars required by the consistency stage.
    pub const MIN_CONSISTENCY_WEEKS: usize = 40;

    /// Weekly bars used when more are available.
    pub const CONSISTENCY_WINDOW_WEEKS: usize = 52;

    /// One-sided binomial significance level for pos_pct > 0.50.
    pub const CONSISTENCY_SIGNIFICANCE_P: f64 = 0.10;

    /// Daily bars required by the liquidity stage.
    pub const MIN_LIQUIDITY_HISTORY_DAYS: usize = 90;

    /// Per-symbol fan-out width inside a batch activity.
    pub const BOUNDED_CONCURRENCY: usize = 8;

    /// Minimum delay between provider calls, milliseconds.
    pub const PROVIDER_MIN_DELAY_MS: u64 = 300;

    /// Rupees per crore.
    pub const CRORE: f64 = 1.0e7;

    /// Days a recommendation stays valid before expiring.
    pub const RECOMMENDATION_TTL_DAYS: i64 = 7;
}
