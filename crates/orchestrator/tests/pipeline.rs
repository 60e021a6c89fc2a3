//! End-to-end pipeline tests over an in-memory provider and store:
//! regime gating, the qualification chain, monotone stage counts,
//! idempotent re-runs, and the Monday/Friday execution flow.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc, Weekday};
use engine_core::{
    defaults, week_start, AllocationStatus, Bar, EngineError, FundamentalData, GapDecision,
    Holdings, Instrument, PositionStatus, RegimeState, RunParams, SetupType, StageRecord,
    StopMethod, TradeSetup,
};
use market_data::{validate_bars, IndexName, MarketDataProvider, NIFTY_SYMBOL};
use orchestrator::{friday_review, monday_gap_check, run_weekly, StageContext};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use store::{Stage, Store};

/// In-memory provider backing a run with fixture data.
#[derive(Default)]
struct FixtureProvider {
    bars: HashMap<String, Vec<Bar>>,
    instruments: Vec<Instrument>,
    mtf: HashSet<String>,
    index_members: HashSet<String>,
    vix: Option<Vec<f64>>,
    cyclical_return_20d: f64,
}

#[async_trait]
impl MarketDataProvider for FixtureProvider {
    async fn fetch_daily(&self, symbol: &str, horizon_days: usize) -> Result<Vec<Bar>, EngineError> {
        let bars = self
            .bars
            .get(symbol)
            .ok_or_else(|| EngineError::Provider(format!("{symbol}: no data")))?;
        validate_bars(symbol, bars)?;
        let start = bars.len().saturating_sub(horizon_days);
        Ok(bars[start..].to_vec())
    }

    async fn fetch_instruments(&self) -> Result<Vec<Instrument>, EngineError> {
        Ok(self.instruments.clone())
    }

    async fn fetch_mtf_symbols(&self) -> Result<HashSet<String>, EngineError> {
        Ok(self.mtf.clone())
    }

    async fn fetch_index_constituents(
        &self,
        _index: IndexName,
    ) -> Result<HashSet<String>, EngineError> {
        Ok(self.index_members.clone())
    }

    async fn fetch_sector_index(&self, name: &str, days: usize) -> Result<Vec<f64>, EngineError> {
        // Cyclicals move by the configured spread over 20 days; defensives flat.
        let is_cyclical = regime::CYCLICAL_INDICES.contains(&name);
        let total = if is_cyclical { self.cyclical_return_20d } else { 0.0 };
        Ok((0..days)
            .map(|i| 100.0 * (1.0 + total * i as f64 / (days - 1).max(1) as f64))
            .collect())
    }

    async fn fetch_vix(&self, _days: usize) -> Result<Option<Vec<f64>>, EngineError> {
        Ok(self.vix.clone())
    }

    async fn fetch_holdings(&self, _symbol: &str) -> Result<Option<Holdings>, EngineError> {
        Ok(None)
    }

    async fn fetch_fundamentals(
        &self,
        _symbol: &str,
    ) -> Result<Option<FundamentalData>, EngineError> {
        Ok(None)
    }
}

/// `n` consecutive weekday dates starting Monday 2024-07-01.
fn weekday_dates(n: usize) -> Vec<NaiveDate> {
    let mut dates = Vec::with_capacity(n);
    let mut d = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
    while dates.len() < n {
        if !matches!(d.weekday(), Weekday::Sat | Weekday::Sun) {
            dates.push(d);
        }
        d += chrono::Duration::days(1);
    }
    dates
}

/// Bars following per-week returns, spread uniformly over five sessions.
fn bars_from_weekly_returns(start_price: f64, weekly: &[f64], volume: f64) -> Vec<Bar> {
    let dates = weekday_dates(weekly.len() * 5);
    let mut bars = Vec::with_capacity(dates.len());
    let mut close = start_price;
    for (w, ret) in weekly.iter().enumerate() {
        let daily = (1.0 + ret).powf(0.2);
        for d in 0..5 {
            let open = close;
            close *= daily;
            bars.push(Bar {
                date: dates[w * 5 + d],
                open,
                high: close * 1.004,
                low: close.min(open) * 0.996,
                close,
                volume,
            });
        }
    }
    bars
}

/// 84 weeks: a quiet year, a shakeout, a steady climb, a strong finish.
fn winner_weekly_pattern() -> Vec<f64> {
    let mut weeks = Vec::new();
    weeks.extend(std::iter::repeat(0.01).take(32));
    weeks.extend(std::iter::repeat(-0.015).take(16));
    weeks.extend(std::iter::repeat(0.015).take(23));
    weeks.extend(std::iter::repeat(0.035).take(13));
    weeks
}

/// Gently rising benchmark with alternating daily noise.
fn nifty_bars(drift_per_day: f64) -> Vec<Bar> {
    let dates = weekday_dates(420);
    let mut bars = Vec::with_capacity(dates.len());
    let mut trend = 20_000.0;
    let mut prev_close = trend;
    for (i, date) in dates.iter().enumerate() {
        trend *= 1.0 + drift_per_day;
        let wiggle = if i % 2 == 0 { 1.004 } else { 0.996 };
        let close = trend * wiggle;
        bars.push(Bar {
            date: *date,
            open: prev_close,
            high: close.max(prev_close) * 1.002,
            low: close.min(prev_close) * 0.998,
            close,
            volume: 1.0e8,
        });
        prev_close = close;
    }
    bars
}

fn instrument(symbol: &str, industry: &str) -> Instrument {
    Instrument {
        symbol: symbol.to_string(),
        name: format!("{} Ltd", symbol),
        isin: format!("INE{}01", symbol),
        segment: "NSE_EQ".to_string(),
        instrument_type: "EQ".to_string(),
        lot_size: 1,
        tick_size: 0.05,
        industry: Some(industry.to_string()),
    }
}

fn run_week(bars: &HashMap<String, Vec<Bar>>) -> NaiveDate {
    let last = bars
        .values()
        .flat_map(|b| b.iter().map(|bar| bar.date))
        .max()
        .unwrap();
    week_start(last) + chrono::Duration::weeks(1)
}

fn bullish_provider() -> FixtureProvider {
    let mut bars = HashMap::new();
    for (symbol, start) in [("ALPHA", 40.0), ("BRAVO", 55.0), ("CHARL", 70.0)] {
        bars.insert(
            symbol.to_string(),
            bars_from_weekly_returns(start, &winner_weekly_pattern(), 1.2e7),
        );
    }
    // One symbol with a corrupt bar: dropped by validation, never scored.
    let mut corrupt = bars_from_weekly_returns(50.0, &winner_weekly_pattern(), 1.2e7);
    corrupt[100].high = corrupt[100].low - 1.0;
    bars.insert("BADBAR".to_string(), corrupt);
    bars.insert(NIFTY_SYMBOL.to_string(), nifty_bars(0.0005));

    let symbols: Vec<String> = ["ALPHA", "BRAVO", "CHARL", "BADBAR"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    FixtureProvider {
        bars,
        instruments: symbols
            .iter()
            .map(|s| instrument(s, "Banking"))
            .chain([instrument("PENNY", "Unknown")])
            .collect(),
        mtf: symbols.iter().cloned().collect(),
        index_members: symbols.iter().cloned().collect(),
        vix: Some(vec![12.0; 60]),
        cyclical_return_20d: 0.04,
    }
}

fn bearish_provider() -> FixtureProvider {
    let mut bars = HashMap::new();
    let declining: Vec<f64> = std::iter::repeat(-0.02).take(84).collect();
    for (symbol, start) in [("DELTA", 900.0), ("ECHO", 1200.0)] {
        bars.insert(
            symbol.to_string(),
            bars_from_weekly_returns(start, &declining, 1.2e7),
        );
    }
    bars.insert(NIFTY_SYMBOL.to_string(), nifty_bars(-0.002));

    let symbols: Vec<String> = ["DELTA", "ECHO"].iter().map(|s| s.to_string()).collect();
    FixtureProvider {
        bars,
        instruments: symbols.iter().map(|s| instrument(s, "Metals")).collect(),
        mtf: symbols.iter().cloned().collect(),
        index_members: symbols.iter().cloned().collect(),
        vix: Some(vec![30.0; 60]),
        cyclical_return_20d: -0.05,
    }
}

async fn context(provider: FixtureProvider) -> (StageContext, NaiveDate) {
    let week = run_week(&provider.bars);
    let store = Store::new("sqlite::memory:").await.unwrap();
    let params = RunParams::new(week, 1_000_000.0);
    (StageContext::new(store, Arc::new(provider), params), week)
}

#[tokio::test]
async fn test_risk_off_yields_empty_recommendation() {
    let (ctx, week) = context(bearish_provider()).await;
    let recommendation = run_weekly(&ctx).await.unwrap();

    assert_eq!(recommendation.market_regime.state, RegimeState::RiskOff);
    assert_eq!(recommendation.market_regime.multiplier, 0.0);
    assert_eq!(recommendation.total_setups, 0);
    assert!(recommendation.cards.is_empty());

    let allocation = ctx.store.load_allocation(week).await.unwrap().unwrap();
    assert!(allocation.positions.is_empty());
    assert!(allocation.reason.is_some());
}

#[tokio::test]
async fn test_bullish_run_gates_and_monotone_counts() {
    let (ctx, week) = context(bullish_provider()).await;
    let recommendation = run_weekly(&ctx).await.unwrap();

    assert_eq!(recommendation.market_regime.state, RegimeState::RiskOn);

    let counts = recommendation.stage_counts;
    assert!(counts.momentum_qualified >= 1);
    assert!(counts.consistency_qualified >= 1);
    assert!(counts.liquidity_qualified >= 1);

    // Monotone filtering down the funnel.
    assert!(counts.momentum_qualified <= counts.universe);
    assert!(counts.consistency_qualified <= counts.momentum_qualified);
    assert!(counts.liquidity_qualified <= counts.consistency_qualified);
    assert!(counts.setups_emitted <= counts.liquidity_qualified);
    assert!(counts.sized_qualified <= counts.setups_emitted);
    assert!(counts.selected <= counts.sized_qualified);

    // The corrupt symbol was dropped before scoring.
    let momentum = ctx.store.load_momentum(week, false).await.unwrap();
    assert!(momentum.iter().all(|m| m.symbol != "BADBAR"));
    assert!(momentum.iter().any(|m| m.symbol == "ALPHA" && m.qualifies));

    // Qualification chain: every consistency qualifier is a momentum
    // qualifier, and so on down.
    let momentum_q: HashSet<String> = momentum
        .iter()
        .filter(|m| m.qualifies)
        .map(|m| m.symbol.clone())
        .collect();
    let consistency = ctx.store.load_consistency(week, true).await.unwrap();
    for c in &consistency {
        assert!(momentum_q.contains(&c.symbol));
    }
    let consistency_q: HashSet<String> =
        consistency.iter().map(|c| c.symbol.clone()).collect();
    for l in &ctx.store.load_liquidity(week, true).await.unwrap() {
        assert!(consistency_q.contains(&l.symbol));
    }
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let (ctx, week) = context(bullish_provider()).await;
    run_weekly(&ctx).await.unwrap();
    let first: Vec<(String, serde_json::Value)> = stage_payloads(&ctx, week).await;

    run_weekly(&ctx).await.unwrap();
    let second: Vec<(String, serde_json::Value)> = stage_payloads(&ctx, week).await;

    assert_eq!(first.len(), second.len());
    for ((sym_a, val_a), (sym_b, val_b)) in first.iter().zip(second.iter()) {
        assert_eq!(sym_a, sym_b);
        assert_eq!(val_a, val_b, "stage output changed on re-run for {}", sym_a);
    }
}

/// All momentum/consistency/liquidity payloads with timestamps stripped.
async fn stage_payloads(ctx: &StageContext, week: NaiveDate) -> Vec<(String, serde_json::Value)> {
    let mut out = Vec::new();
    for stage in [Stage::Momentum, Stage::Consistency, Stage::Liquidity] {
        for (symbol, payload) in ctx.store.stage_payloads(stage, week).await.unwrap() {
            let mut value: serde_json::Value = serde_json::from_str(&payload).unwrap();
            value.as_object_mut().unwrap().remove("calculated_at");
            out.push((symbol, value));
        }
    }
    out
}

#[tokio::test]
async fn test_regime_override_forces_risk_off() {
    let (mut ctx, week) = context(bullish_provider()).await;
    ctx.params.regime_override = Some(RegimeState::RiskOff);

    let recommendation = run_weekly(&ctx).await.unwrap();
    assert_eq!(recommendation.market_regime.state, RegimeState::RiskOff);
    assert_eq!(recommendation.total_setups, 0);

    let allocation = ctx.store.load_allocation(week).await.unwrap().unwrap();
    assert!(allocation.positions.is_empty());
}

fn seeded_setup(symbol: &str, week: NaiveDate) -> TradeSetup {
    TradeSetup {
        symbol: symbol.to_string(),
        week,
        calculated_at: Utc::now(),
        setup_type: SetupType::Pullback,
        support: 95.0,
        entry_low: 94.0,
        entry_high: 96.0,
        stop: 93.0,
        stop_method: StopMethod::Structure,
        target1: 99.0,
        target2: 101.0,
        rr: 2.0,
        stop_distance_pct: 0.021,
        confidence: 70.0,
        quality_composite: 80.0,
    }
}

fn monday_bar(date: NaiveDate, open: f64, close: f64) -> Bar {
    Bar {
        date,
        open,
        high: open.max(close) * 1.002,
        low: open.min(close) * 0.998,
        close,
        volume: 1.0e6,
    }
}

#[tokio::test]
async fn test_monday_gap_and_friday_review_flow() {
    let week = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
    let monday = week;

    // GONE gaps through its stop; WIN opens in the band and runs to T1.
    let mut bars = HashMap::new();
    bars.insert("GONE".to_string(), vec![monday_bar(monday, 92.0, 91.0)]);
    bars.insert("WIN".to_string(), vec![monday_bar(monday, 95.0, 99.5)]);

    let provider = FixtureProvider {
        bars,
        ..Default::default()
    };
    let store = Store::new("sqlite::memory:").await.unwrap();
    let ctx = StageContext::new(
        store,
        Arc::new(provider),
        RunParams::new(week, 1_000_000.0),
    );

    for symbol in ["GONE", "WIN"] {
        ctx.store
            .upsert_stage_record(&StageRecord::Setup(seeded_setup(symbol, week)))
            .await
            .unwrap();
    }
    let allocation = engine_core::PortfolioAllocation {
        week,
        calculated_at: Utc::now(),
        positions: ["GONE", "WIN"]
            .iter()
            .map(|s| engine_core::AllocationPosition {
                symbol: s.to_string(),
                sector: "Banking".to_string(),
                shares: 100,
                position_value: 9_500.0,
                risk_amount: 200.0,
                quality_composite: 80.0,
            })
            .collect(),
        sector_allocation: HashMap::new(),
        allocated_pct: 0.019,
        cash_pct: 0.981,
        total_risk_pct: 0.0004,
        correlation_filtered: 0,
        sector_filtered: 0,
        status: AllocationStatus::Approved,
        reason: None,
    };
    ctx.store.upsert_allocation(&allocation).await.unwrap();

    let decisions = monday_gap_check(&ctx).await.unwrap();
    let by_symbol: HashMap<_, _> = decisions.into_iter().collect();
    assert_eq!(
        by_symbol.get("GONE"),
        Some(&GapDecision::SkipGappedThroughStop)
    );
    assert_eq!(by_symbol.get("WIN"), Some(&GapDecision::EnterAtOpen));

    let tracked = ctx.store.load_tracked_positions(week).await.unwrap();
    let gone = tracked.iter().find(|p| p.symbol == "GONE").unwrap();
    assert_eq!(gone.status, PositionStatus::Skipped);
    assert!(gone.entry_price.is_none());

    let summary = friday_review(&ctx).await.unwrap();
    assert_eq!(summary.positions_tracked, 2);
    assert_eq!(summary.entered, 1);
    assert_eq!(summary.skipped, 1);
    // WIN entered at 95 with stop 93 and tagged target 1 at 99.5: +2.25R.
    assert!((summary.weekly_r_sum - 2.25).abs() < 1e-9);

    let outcomes = ctx
        .store
        .outcomes_since(week - chrono::Duration::weeks(1))
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].symbol, "WIN");
    assert!(outcomes[0].win);
}

#[tokio::test]
async fn test_universe_quality_floor_applies() {
    let (ctx, _week) = context(bullish_provider()).await;
    orchestrator::stages::stage_universe(&ctx).await.unwrap();

    let active = ctx
        .store
        .active_stocks_above(defaults::MIN_QUALITY_SCORE)
        .await
        .unwrap();
    // PENNY is neither MTF nor index member: tier D, inactive.
    assert_eq!(active.len(), 4);
    assert!(active.iter().all(|s| s.symbol != "PENNY"));
}
