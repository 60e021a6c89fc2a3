use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::records::SetupType;

/// Market regime classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegimeState {
    RiskOn,
    Choppy,
    RiskOff,
}

impl RegimeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegimeState::RiskOn => "RISK_ON",
            RegimeState::Choppy => "CHOPPY",
            RegimeState::RiskOff => "RISK_OFF",
        }
    }
}

impl std::str::FromStr for RegimeState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RISK_ON" => Ok(RegimeState::RiskOn),
            "CHOPPY" => Ok(RegimeState::Choppy),
            "RISK_OFF" => Ok(RegimeState::RiskOff),
            other => Err(format!("unknown regime: {other}")),
        }
    }
}

/// Four equally weighted 0–100 sub-scores behind the classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RegimeSubScores {
    pub trend: f64,
    pub breadth: f64,
    pub volatility: f64,
    pub leadership: f64,
}

impl RegimeSubScores {
    pub fn composite(&self) -> f64 {
        (self.trend + self.breadth + self.volatility + self.leadership) / 4.0
    }
}

/// Weekly regime record gating the whole pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeSnapshot {
    pub week: NaiveDate,
    pub state: RegimeState,
    pub confidence: f64,
    pub sub_scores: RegimeSubScores,
    pub composite: f64,
    /// Position-size scalar in {0.0, 0.5, 0.7, 1.0}.
    pub multiplier: f64,
    pub calculated_at: DateTime<Utc>,
}

/// Regime-adaptive consistency thresholds (the S3 gate columns).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConsistencyThresholds {
    pub min_pos_pct: f64,
    pub plus3_band: (f64, f64),
    pub max_std_dev: f64,
    pub min_sharpe: f64,
}

/// Threshold bundle produced once per run by the regime classifier and
/// injected into each scoring stage. No global mutable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thresholds {
    pub consistency: ConsistencyThresholds,
    /// Minimum reward/risk to target 1; None under RISK_OFF (no setups).
    pub rr_floor: Option<f64>,
    pub allowed_setups: Vec<SetupType>,
    pub cash_reserve_pct: f64,
}

impl Thresholds {
    pub fn for_regime(state: RegimeState) -> Self {
        match state {
            RegimeState::RiskOn => Thresholds {
                consistency: ConsistencyThresholds {
                    min_pos_pct: 0.60,
                    plus3_band: (0.22, 0.40),
                    max_std_dev: 0.065,
                    min_sharpe: 0.12,
                },
                rr_floor: Some(2.0),
                allowed_setups: vec![
                    SetupType::Pullback,
                    SetupType::VcpBreakout,
                    SetupType::Retest,
                    SetupType::GapFill,
                ],
                cash_reserve_pct: 0.30,
            },
            RegimeState::Choppy => Thresholds {
                consistency: ConsistencyThresholds {
                    min_pos_pct: 0.65,
                    plus3_band: (0.25, 0.35),
                    max_std_dev: 0.060,
                    min_sharpe: 0.15,
                },
                rr_floor: Some(2.5),
                allowed_setups: vec![SetupType::Pullback],
                cash_reserve_pct: 0.35,
            },
            RegimeState::RiskOff => Thresholds {
                consistency: ConsistencyThresholds {
                    min_pos_pct: 0.70,
                    plus3_band: (0.20, 0.30),
                    max_std_dev: 0.045,
                    min_sharpe: 0.18,
                },
                rr_floor: None,
                allowed_setups: Vec::new(),
                cash_reserve_pct: 1.0,
            },
        }
    }
}
