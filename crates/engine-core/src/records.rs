use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::regime::RegimeSnapshot;

/// Numeric sub-metrics behind the five momentum filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MomentumMetrics {
    /// Position within the 52-week range, 0 at the low, 1 at the high.
    pub proximity_52w: f64,
    /// 5-day average volume / 20-day average volume.
    pub volume_surge: f64,
    /// MA alignment checks passed, out of 5.
    pub ma_align_score: u8,
    pub excess_return_1m: f64,
    pub excess_return_3m: f64,
    pub excess_return_6m: f64,
    /// Weighted composite in [0, 1].
    pub composite: f64,
    /// Stock 30-day return vol / Nifty 30-day return vol.
    pub vol_ratio: f64,
}

/// S2 output: five-filter momentum gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MomentumScore {
    pub symbol: String,
    pub week: NaiveDate,
    pub calculated_at: DateTime<Utc>,
    /// Composite 0–100.
    pub score: f64,
    pub passed_proximity: bool,
    pub passed_ma_alignment: bool,
    pub passed_relative_strength: bool,
    pub passed_composite: bool,
    pub passed_vol_adjusted: bool,
    pub filters_passed: u8,
    pub metrics: MomentumMetrics,
    pub qualifies: bool,
}

/// S3 output: weekly-return consistency gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyScore {
    pub symbol: String,
    pub week: NaiveDate,
    pub calculated_at: DateTime<Utc>,
    pub weeks_observed: usize,
    pub pos_pct: f64,
    pub plus3_pct: f64,
    pub plus5_pct: f64,
    pub std_dev: f64,
    pub avg_weekly_return: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub max_win_streak: usize,
    pub consistency_score: f64,
    /// 13-week vs 52-week average return ratio, clipped to [0, 3].
    pub regime_score: f64,
    /// Rank of consistency_score among this run's candidates, 0..1.
    pub percentile_rank: f64,
    pub final_score: f64,
    pub checks_passed: u8,
    /// One-sided binomial p-value for pos_pct > 0.50.
    pub significance_p: f64,
    pub qualifies: bool,
}

/// S4A output: liquidity and tradability gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidityScore {
    pub symbol: String,
    pub week: NaiveDate,
    pub calculated_at: DateTime<Utc>,
    pub turnover_20d_cr: f64,
    pub turnover_60d_cr: f64,
    pub peak_30d_cr: f64,
    pub vol_stability: f64,
    pub circuit_hits_30d: u32,
    pub avg_gap_pct: f64,
    pub score: f64,
    pub qualifies: bool,
}

/// Chart pattern categories recognized by the setup detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SetupType {
    Pullback,
    VcpBreakout,
    Retest,
    GapFill,
}

impl SetupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetupType::Pullback => "PULLBACK",
            SetupType::VcpBreakout => "VCP_BREAKOUT",
            SetupType::Retest => "RETEST",
            SetupType::GapFill => "GAP_FILL",
        }
    }
}

impl std::str::FromStr for SetupType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PULLBACK" => Ok(SetupType::Pullback),
            "VCP_BREAKOUT" => Ok(SetupType::VcpBreakout),
            "RETEST" => Ok(SetupType::Retest),
            "GAP_FILL" => Ok(SetupType::GapFill),
            other => Err(format!("unknown setup type: {other}")),
        }
    }
}

/// Which of the two stop candidates ended up tighter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopMethod {
    Structure,
    Volatility,
}

impl StopMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopMethod::Structure => "structure",
            StopMethod::Volatility => "volatility",
        }
    }
}

impl std::str::FromStr for StopMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "structure" => Ok(StopMethod::Structure),
            "volatility" => Ok(StopMethod::Volatility),
            other => Err(format!("unknown stop method: {other}")),
        }
    }
}

/// S4B output: one recognized setup with its full trade geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSetup {
    pub symbol: String,
    pub week: NaiveDate,
    pub calculated_at: DateTime<Utc>,
    pub setup_type: SetupType,
    pub support: f64,
    pub entry_low: f64,
    pub entry_high: f64,
    pub stop: f64,
    pub stop_method: StopMethod,
    pub target1: f64,
    pub target2: f64,
    /// (target1 − midEntry) / (midEntry − stop).
    pub rr: f64,
    pub stop_distance_pct: f64,
    /// Pattern-specific strength, 0–100.
    pub confidence: f64,
    /// 0.25·momentum + 0.25·consistency + 0.25·liquidity + 0.25·confidence.
    pub quality_composite: f64,
}

impl TradeSetup {
    pub fn mid_entry(&self) -> f64 {
        (self.entry_low + self.entry_high) / 2.0
    }
}

/// S5 output: volatility- and Kelly-adjusted position size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSizing {
    pub symbol: String,
    pub week: NaiveDate,
    pub calculated_at: DateTime<Utc>,
    pub stop_method: StopMethod,
    pub risk_per_share: f64,
    pub base_shares: i64,
    pub vol_adj: f64,
    pub kelly_fraction: f64,
    pub regime_multiplier: f64,
    pub final_shares: i64,
    pub final_risk: f64,
    pub position_value: f64,
    pub position_pct: f64,
    pub qualifies: bool,
}

/// One selected position inside a weekly allocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationPosition {
    pub symbol: String,
    pub sector: String,
    pub shares: i64,
    pub position_value: f64,
    pub risk_amount: f64,
    pub quality_composite: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationStatus {
    Draft,
    Approved,
    Executed,
}

impl AllocationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationStatus::Draft => "draft",
            AllocationStatus::Approved => "approved",
            AllocationStatus::Executed => "executed",
        }
    }
}

impl std::str::FromStr for AllocationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(AllocationStatus::Draft),
            "approved" => Ok(AllocationStatus::Approved),
            "executed" => Ok(AllocationStatus::Executed),
            other => Err(format!("unknown allocation status: {other}")),
        }
    }
}

/// S6 output: the weekly portfolio under correlation and sector constraints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioAllocation {
    pub week: NaiveDate,
    pub calculated_at: DateTime<Utc>,
    pub positions: Vec<AllocationPosition>,
    /// Sector → allocated fraction of portfolio value.
    pub sector_allocation: HashMap<String, f64>,
    pub allocated_pct: f64,
    pub cash_pct: f64,
    pub total_risk_pct: f64,
    pub correlation_filtered: u32,
    pub sector_filtered: u32,
    pub status: AllocationStatus,
    /// Populated when the allocation is empty (RISK_OFF, no survivors).
    pub reason: Option<String>,
}

/// Monday-open gap decision for an approved position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GapDecision {
    SkipGappedThroughStop,
    SkipDoNotChase,
    EnterAtOpen,
    EnterAtOpenSmallGapAgainst,
    WaitAndWatch,
}

impl GapDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            GapDecision::SkipGappedThroughStop => "SKIP_GAPPED_THROUGH_STOP",
            GapDecision::SkipDoNotChase => "SKIP_DO_NOT_CHASE",
            GapDecision::EnterAtOpen => "ENTER_AT_OPEN",
            GapDecision::EnterAtOpenSmallGapAgainst => "ENTER_AT_OPEN_SMALL_GAP_AGAINST",
            GapDecision::WaitAndWatch => "WAIT_AND_WATCH",
        }
    }

    pub fn is_entry(&self) -> bool {
        matches!(
            self,
            GapDecision::EnterAtOpen | GapDecision::EnterAtOpenSmallGapAgainst
        )
    }
}

/// Lifecycle of a tracked position through the trading week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Pending,
    Entered,
    Skipped,
    Watching,
    StoppedOut,
    Target1Hit,
    Target2Hit,
    ClosedWeekEnd,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Pending => "PENDING",
            PositionStatus::Entered => "ENTERED",
            PositionStatus::Skipped => "SKIPPED",
            PositionStatus::Watching => "WATCHING",
            PositionStatus::StoppedOut => "STOPPED_OUT",
            PositionStatus::Target1Hit => "TARGET1_HIT",
            PositionStatus::Target2Hit => "TARGET2_HIT",
            PositionStatus::ClosedWeekEnd => "CLOSED_WEEK_END",
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            PositionStatus::StoppedOut
                | PositionStatus::Target1Hit
                | PositionStatus::Target2Hit
                | PositionStatus::ClosedWeekEnd
        )
    }
}

impl std::str::FromStr for PositionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PositionStatus::Pending),
            "ENTERED" => Ok(PositionStatus::Entered),
            "SKIPPED" => Ok(PositionStatus::Skipped),
            "WATCHING" => Ok(PositionStatus::Watching),
            "STOPPED_OUT" => Ok(PositionStatus::StoppedOut),
            "TARGET1_HIT" => Ok(PositionStatus::Target1Hit),
            "TARGET2_HIT" => Ok(PositionStatus::Target2Hit),
            "CLOSED_WEEK_END" => Ok(PositionStatus::ClosedWeekEnd),
            other => Err(format!("unknown position status: {other}")),
        }
    }
}

/// Closed-trade outcome feeding the rolling Kelly statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub symbol: String,
    pub week: NaiveDate,
    pub r_multiple: f64,
    pub win: bool,
    pub closed_at: DateTime<Utc>,
}

/// Rolling system statistics snapshot used by the Kelly fraction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SystemStats {
    pub win_rate: f64,
    /// Average winning trade in R.
    pub avg_win: f64,
    /// Average losing trade in R, as a positive number.
    pub avg_loss: f64,
    pub num_trades: usize,
}

impl SystemStats {
    /// Prior used while the outcome history is thin.
    pub fn prior() -> Self {
        SystemStats {
            win_rate: 0.50,
            avg_win: 1.2,
            avg_loss: 1.1,
            num_trades: 0,
        }
    }
}

/// Per-stage candidate counts recorded on the weekly recommendation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StageCounts {
    pub universe: usize,
    pub momentum_qualified: usize,
    pub consistency_qualified: usize,
    pub liquidity_qualified: usize,
    pub setups_emitted: usize,
    pub sized_qualified: usize,
    pub selected: usize,
}

/// Phase scores carried on a trade card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseScores {
    pub momentum: f64,
    pub consistency: f64,
    pub liquidity: f64,
    pub fundamental: Option<f64>,
    pub setup_confidence: f64,
    pub conviction10: f64,
    pub conviction_label: String,
}

/// Technical context snapshot on a trade card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnicalContext {
    pub current_price: f64,
    pub high_52w: f64,
    pub sma20: f64,
    pub sma50: f64,
    pub sma200: f64,
    pub atr14: f64,
}

/// Price levels on a trade card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeLevels {
    pub entry_low: f64,
    pub entry_high: f64,
    pub stop: f64,
    pub stop_method: StopMethod,
    pub target1: f64,
    pub target2: f64,
    pub rr: f64,
}

/// Sizing block on a trade card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSizing {
    pub shares: i64,
    pub investment: f64,
    pub risk_amount: f64,
    pub position_pct: f64,
}

/// S8 output: one fully specified trade recommendation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeCard {
    pub symbol: String,
    pub name: String,
    pub sector: String,
    pub week: NaiveDate,
    pub setup_type: SetupType,
    pub scores: PhaseScores,
    pub context: TechnicalContext,
    pub levels: TradeLevels,
    pub sizing: TradeSizing,
    pub action_steps: Vec<String>,
    pub gap_contingency: String,
    pub invalidation: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecommendationStatus {
    Draft,
    Approved,
    Executed,
    Expired,
}

impl RecommendationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationStatus::Draft => "draft",
            RecommendationStatus::Approved => "approved",
            RecommendationStatus::Executed => "executed",
            RecommendationStatus::Expired => "expired",
        }
    }
}

impl std::str::FromStr for RecommendationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(RecommendationStatus::Draft),
            "approved" => Ok(RecommendationStatus::Approved),
            "executed" => Ok(RecommendationStatus::Executed),
            "expired" => Ok(RecommendationStatus::Expired),
            other => Err(format!("unknown recommendation status: {other}")),
        }
    }
}

/// Weekly recommendation: the final consumer-facing document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub week: NaiveDate,
    pub calculated_at: DateTime<Utc>,
    pub market_regime: RegimeSnapshot,
    pub total_setups: usize,
    pub cards: Vec<TradeCard>,
    pub stage_counts: StageCounts,
    pub fatal_reasons: Vec<String>,
    pub status: RecommendationStatus,
    pub expires_at: DateTime<Utc>,
}

/// Sum type over stage-specific record variants, sharing the
/// `(symbol, week, calculated_at)` header. Each stage writes its own
/// variant through the store's single upsert entry point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageRecord {
    Momentum(MomentumScore),
    Consistency(ConsistencyScore),
    Liquidity(LiquidityScore),
    Setup(TradeSetup),
    Sizing(PositionSizing),
}

impl StageRecord {
    pub fn symbol(&self) -> &str {
        match self {
            StageRecord::Momentum(r) => &r.symbol,
            StageRecord::Consistency(r) => &r.symbol,
            StageRecord::Liquidity(r) => &r.symbol,
            StageRecord::Setup(r) => &r.symbol,
            StageRecord::Sizing(r) => &r.symbol,
        }
    }

    pub fn week(&self) -> NaiveDate {
        match self {
            StageRecord::Momentum(r) => r.week,
            StageRecord::Consistency(r) => r.week,
            StageRecord::Liquidity(r) => r.week,
            StageRecord::Setup(r) => r.week,
            StageRecord::Sizing(r) => r.week,
        }
    }
}
