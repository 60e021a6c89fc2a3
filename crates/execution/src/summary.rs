use chrono::NaiveDate;
use engine_core::stats::clamp01;
use engine_core::TradeOutcome;
use serde::{Deserialize, Serialize};

use crate::tracker::TrackedPosition;

/// System-level verdict from the weekly health score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecommendedAction {
    Continue,
    Reduce,
    Pause,
    Stop,
}

impl RecommendedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendedAction::Continue => "CONTINUE",
            RecommendedAction::Reduce => "REDUCE",
            RecommendedAction::Pause => "PAUSE",
            RecommendedAction::Stop => "STOP",
        }
    }

    fn from_health(health: f64) -> Self {
        match health {
            h if h >= 70.0 => RecommendedAction::Continue,
            h if h >= 50.0 => RecommendedAction::Reduce,
            h if h >= 30.0 => RecommendedAction::Pause,
            _ => RecommendedAction::Stop,
        }
    }
}

/// Trailing-12-week inputs to the health score.
#[derive(Debug, Clone, Copy)]
pub struct HealthInputs {
    pub win_rate_12w: f64,
    /// Mean R per closed trade over 12 weeks.
    pub expectancy_r_12w: f64,
    /// Peak-to-trough equity drawdown, as a fraction.
    pub max_drawdown_pct: f64,
    /// Fraction of Monday decisions that were executed as decided.
    pub execution_score: f64,
}

/// Weighted health score and the resulting action.
pub fn health_score(inputs: &HealthInputs) -> (f64, RecommendedAction) {
    let expectancy_n = clamp01(inputs.expectancy_r_12w / 0.5);
    let drawdown_n = clamp01(inputs.max_drawdown_pct / 0.20);
    let health = 0.4 * inputs.win_rate_12w * 100.0
        + 0.3 * expectancy_n * 100.0
        + 0.2 * (100.0 - drawdown_n * 100.0)
        + 0.1 * inputs.execution_score * 100.0;
    (health, RecommendedAction::from_health(health))
}

/// Friday review of the week's positions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FridaySummary {
    pub week: NaiveDate,
    pub positions_tracked: usize,
    pub entered: usize,
    pub skipped: usize,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub weekly_r_sum: f64,
    pub week_win_rate: f64,
    pub health: f64,
    pub recommended_action: String,
}

/// Roll the week up. `last_closes` supplies marks for anything still
/// open; `history_12w` is the trailing closed-outcome window.
pub fn friday_summary(
    week: NaiveDate,
    positions: &[TrackedPosition],
    last_closes: &dyn Fn(&str) -> Option<f64>,
    history_12w: &[TradeOutcome],
    max_drawdown_pct: f64,
) -> FridaySummary {
    let entered = positions
        .iter()
        .filter(|p| p.entry_price.is_some())
        .count();
    let skipped = positions
        .iter()
        .filter(|p| p.status == engine_core::PositionStatus::Skipped)
        .count();

    let realized_pnl: f64 = positions.iter().filter_map(|p| p.realized_pnl()).sum();
    let unrealized_pnl: f64 = positions
        .iter()
        .filter_map(|p| last_closes(&p.symbol).and_then(|c| p.unrealized_pnl(c)))
        .sum();

    let r_values: Vec<f64> = positions.iter().filter_map(|p| p.r_multiple).collect();
    let weekly_r_sum: f64 = r_values.iter().sum();
    let week_win_rate = if r_values.is_empty() {
        0.0
    } else {
        r_values.iter().filter(|&&r| r > 0.0).count() as f64 / r_values.len() as f64
    };

    let win_rate_12w = if history_12w.is_empty() {
        week_win_rate
    } else {
        history_12w.iter().filter(|o| o.win).count() as f64 / history_12w.len() as f64
    };
    let expectancy_r_12w = if history_12w.is_empty() {
        0.0
    } else {
        history_12w.iter().map(|o| o.r_multiple).sum::<f64>() / history_12w.len() as f64
    };

    let decisions = positions.iter().filter(|p| p.gap_decision.is_some()).count();
    let followed = positions
        .iter()
        .filter(|p| {
            p.gap_decision
                .map(|d| d.is_entry() == p.entry_price.is_some())
                .unwrap_or(false)
        })
        .count();
    let execution_score = if decisions == 0 {
        1.0
    } else {
        followed as f64 / decisions as f64
    };

    let (health, action) = health_score(&HealthInputs {
        win_rate_12w,
        expectancy_r_12w,
        max_drawdown_pct,
        execution_score,
    });

    tracing::info!(
        "Friday summary for {}: {} tracked, {} entered, R sum {:.2}, health {:.0} ({})",
        week,
        positions.len(),
        entered,
        weekly_r_sum,
        health,
        action.as_str()
    );

    FridaySummary {
        week,
        positions_tracked: positions.len(),
        entered,
        skipped,
        realized_pnl,
        unrealized_pnl,
        weekly_r_sum,
        week_win_rate,
        health,
        recommended_action: action.as_str().to_string(),
    }
}
