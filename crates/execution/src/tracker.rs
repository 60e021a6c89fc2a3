use chrono::{DateTime, NaiveDate, Utc};
use engine_core::{GapDecision, PositionStatus, SystemStats, TradeOutcome};
use serde::{Deserialize, Serialize};

/// A recommended position being tracked through its trading week.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedPosition {
    pub symbol: String,
    pub week: NaiveDate,
    pub shares: i64,
    pub entry_low: f64,
    pub entry_high: f64,
    pub stop: f64,
    pub target1: f64,
    pub target2: f64,
    pub status: PositionStatus,
    pub gap_decision: Option<GapDecision>,
    pub entry_price: Option<f64>,
    pub exit_price: Option<f64>,
    pub r_multiple: Option<f64>,
}

impl TrackedPosition {
    pub fn new(
        symbol: String,
        week: NaiveDate,
        shares: i64,
        entry_low: f64,
        entry_high: f64,
        stop: f64,
        target1: f64,
        target2: f64,
    ) -> Self {
        TrackedPosition {
            symbol,
            week,
            shares,
            entry_low,
            entry_high,
            stop,
            target1,
            target2,
            status: PositionStatus::Pending,
            gap_decision: None,
            entry_price: None,
            exit_price: None,
            r_multiple: None,
        }
    }

    /// Apply the Monday-open decision.
    pub fn apply_gap_decision(&mut self, decision: GapDecision, open: f64) {
        self.gap_decision = Some(decision);
        match decision {
            GapDecision::EnterAtOpen | GapDecision::EnterAtOpenSmallGapAgainst => {
                self.status = PositionStatus::Entered;
                self.entry_price = Some(open);
            }
            GapDecision::SkipGappedThroughStop | GapDecision::SkipDoNotChase => {
                self.status = PositionStatus::Skipped;
            }
            GapDecision::WaitAndWatch => {
                self.status = PositionStatus::Watching;
            }
        }
    }

    /// A watched position whose price falls back into the band enters late.
    pub fn enter_from_watch(&mut self, price: f64) {
        if self.status == PositionStatus::Watching
            && price >= self.entry_low
            && price <= self.entry_high
        {
            self.status = PositionStatus::Entered;
            self.entry_price = Some(price);
        }
    }

    /// Check an intra-week bar against stop and targets, tightest first.
    pub fn update_on_close(&mut self, close: f64) {
        if self.status != PositionStatus::Entered {
            return;
        }
        if close <= self.stop {
            self.close_at(close, PositionStatus::StoppedOut);
        } else if close >= self.target2 {
            self.close_at(close, PositionStatus::Target2Hit);
        } else if close >= self.target1 {
            self.close_at(close, PositionStatus::Target1Hit);
        }
    }

    /// Friday close for whatever is still open.
    pub fn close_week_end(&mut self, close: f64) {
        if self.status == PositionStatus::Entered {
            self.close_at(close, PositionStatus::ClosedWeekEnd);
        } else if self.status == PositionStatus::Watching {
            self.status = PositionStatus::Skipped;
        }
    }

    fn close_at(&mut self, price: f64, status: PositionStatus) {
        let Some(entry) = self.entry_price else {
            return;
        };
        let risk = entry - self.stop;
        self.exit_price = Some(price);
        self.r_multiple = if risk > 0.0 {
            Some((price - entry) / risk)
        } else {
            None
        };
        self.status = status;
    }

    /// Realized P&L in rupees, None while open.
    pub fn realized_pnl(&self) -> Option<f64> {
        match (self.entry_price, self.exit_price) {
            (Some(entry), Some(exit)) if self.status.is_closed() => {
                Some((exit - entry) * self.shares as f64)
            }
            _ => None,
        }
    }

    /// Mark-to-market P&L for an open position.
    pub fn unrealized_pnl(&self, last_close: f64) -> Option<f64> {
        match self.entry_price {
            Some(entry) if self.status == PositionStatus::Entered => {
                Some((last_close - entry) * self.shares as f64)
            }
            _ => None,
        }
    }

    /// Outcome record once closed, feeding the rolling Kelly stats.
    pub fn outcome(&self, closed_at: DateTime<Utc>) -> Option<TradeOutcome> {
        let r = self.r_multiple?;
        if !self.status.is_closed() {
            return None;
        }
        Some(TradeOutcome {
            symbol: self.symbol.clone(),
            week: self.week,
            r_multiple: r,
            win: r > 0.0,
            closed_at,
        })
    }
}

/// Rolling win rate and average win/loss in R from closed outcomes.
pub fn rolling_stats(outcomes: &[TradeOutcome]) -> SystemStats {
    if outcomes.is_empty() {
        return SystemStats::prior();
    }

    let wins: Vec<f64> = outcomes
        .iter()
        .filter(|o| o.win)
        .map(|o| o.r_multiple)
        .collect();
    let losses: Vec<f64> = outcomes
        .iter()
        .filter(|o| !o.win)
        .map(|o| o.r_multiple.abs())
        .collect();

    let prior = SystemStats::prior();
    SystemStats {
        win_rate: wins.len() as f64 / outcomes.len() as f64,
        avg_win: if wins.is_empty() {
            prior.avg_win
        } else {
            wins.iter().sum::<f64>() / wins.len() as f64
        },
        avg_loss: if losses.is_empty() {
            prior.avg_loss
        } else {
            losses.iter().sum::<f64>() / losses.len() as f64
        },
        num_trades: outcomes.len(),
    }
}
