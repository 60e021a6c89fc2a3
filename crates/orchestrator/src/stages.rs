use chrono::Utc;
use engine_core::stats::{simple_returns, std_dev};
use engine_core::{
    defaults, Bar, BenchmarkContext, EngineError, PortfolioAllocation, Recommendation,
    RegimeSnapshot, StageCounts, StageRecord, Thresholds,
};
use market_data::{fetch_daily_batch, weekly_bars, IndexName, NIFTY_SYMBOL};
use std::collections::HashMap;
use store::Stage;
use technical::indicators::{atr, compute_indicator_set, compute_indicator_sets};
use technical::setups::{detect_setup, high_52w, SetupInputs};
use universe::{IndexMembership, UniverseSummary};

use crate::activity::{run_activity, RetryPolicy, TimeoutClass};
use crate::pipeline::StageContext;

/// Trading-day horizons per stage.
const MOMENTUM_HORIZON_DAYS: usize = 400;
const LIQUIDITY_HORIZON_DAYS: usize = 90;
const CORRELATION_HORIZON_DAYS: usize = 61;

/// Universe symbols sampled for the regime breadth sub-score.
const BREADTH_SAMPLE: usize = 200;

pub(crate) fn store_err(e: anyhow::Error) -> EngineError {
    EngineError::Store(e.to_string())
}

/// S1: build and persist the quality-tiered universe.
pub async fn stage_universe(ctx: &StageContext) -> Result<UniverseSummary, EngineError> {
    let policy = RetryPolicy::default();

    let instruments = run_activity(
        "fetch-instruments",
        TimeoutClass::SingleFetch,
        policy,
        &ctx.cancel,
        || ctx.provider.fetch_instruments(),
    )
    .await?;

    let mtf = run_activity(
        "fetch-mtf",
        TimeoutClass::SingleFetch,
        policy,
        &ctx.cancel,
        || ctx.provider.fetch_mtf_symbols(),
    )
    .await?;

    let mut memberships = Vec::with_capacity(4);
    for index in IndexName::all() {
        let set = run_activity(
            "fetch-index-constituents",
            TimeoutClass::SingleFetch,
            policy,
            &ctx.cancel,
            || ctx.provider.fetch_index_constituents(index),
        )
        .await?;
        memberships.push(set);
    }
    let mut memberships = memberships.into_iter();
    let indexes = IndexMembership {
        nifty_50: memberships.next().unwrap_or_default(),
        nifty_100: memberships.next().unwrap_or_default(),
        nifty_200: memberships.next().unwrap_or_default(),
        nifty_500: memberships.next().unwrap_or_default(),
    };

    let (stocks, summary) = universe::build_universe(&instruments, &mtf, &indexes, Utc::now());
    ctx.store.replace_universe(&stocks).await.map_err(store_err)?;

    Ok(summary)
}

/// Benchmark context for momentum, regime and sizing. A failure here is
/// fatal for the stage: everything downstream needs the benchmark.
pub async fn fetch_benchmark(ctx: &StageContext) -> Result<(Vec<Bar>, BenchmarkContext), EngineError> {
    let bars = run_activity(
        "fetch-benchmark",
        TimeoutClass::SingleFetch,
        RetryPolicy::default(),
        &ctx.cancel,
        || ctx.provider.fetch_daily(NIFTY_SYMBOL, MOMENTUM_HORIZON_DAYS),
    )
    .await
    .map_err(|e| EngineError::BenchmarkUnavailable(e.to_string()))?;

    if bars.len() < 220 {
        return Err(EngineError::BenchmarkUnavailable(format!(
            "{} benchmark bars, need 220",
            bars.len()
        )));
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let last = *closes.last().expect("length checked");
    let ret = |days: usize| -> f64 {
        let then = closes[closes.len() - 1 - days];
        if then > 0.0 {
            last / then - 1.0
        } else {
            0.0
        }
    };
    let atr_series = atr(&bars, 14);
    let returns30 = simple_returns(&closes[closes.len().saturating_sub(31)..]);

    let context = BenchmarkContext {
        close: last,
        ret_1m: ret(21),
        ret_3m: ret(63),
        ret_6m: ret(126),
        atr14: *atr_series.last().unwrap_or(&0.0),
        vol30: std_dev(&returns30),
    };

    Ok((bars, context))
}

/// S2: five-filter momentum gate over the quality universe.
pub async fn stage_momentum(
    ctx: &StageContext,
    benchmark: &BenchmarkContext,
) -> Result<usize, EngineError> {
    let stocks = ctx
        .store
        .active_stocks_above(defaults::MIN_QUALITY_SCORE)
        .await
        .map_err(store_err)?;
    let symbols: Vec<String> = stocks.iter().map(|s| s.symbol.clone()).collect();
    tracing::info!("Momentum stage: {} high-quality candidates", symbols.len());

    let provider = ctx.provider.clone();
    let bars_by_symbol = run_activity(
        "fetch-momentum-bars",
        TimeoutClass::BatchIo,
        RetryPolicy::default(),
        &ctx.cancel,
        || async {
            Ok(fetch_daily_batch(
                provider.clone(),
                &symbols,
                MOMENTUM_HORIZON_DAYS,
                defaults::BOUNDED_CONCURRENCY,
            )
            .await)
        },
    )
    .await?;

    let now = Utc::now();
    let mut qualified = 0usize;

    // Indicator math is pure and parallel; persistence stays sequential
    // in symbol order so re-runs write identically.
    let indicator_sets = compute_indicator_sets(&bars_by_symbol);
    let mut ordered: Vec<_> = bars_by_symbol.into_iter().collect();
    ordered.sort_by(|a, b| a.0.cmp(&b.0));

    for (symbol, bars) in ordered {
        ctx.store
            .upsert_daily_bars(&symbol, &bars)
            .await
            .map_err(store_err)?;
        let weekly = weekly_bars(&bars);
        ctx.store
            .upsert_weekly_bars(&symbol, &weekly)
            .await
            .map_err(store_err)?;

        let Some(indicators) = indicator_sets.get(&symbol) else {
            tracing::debug!("{}: insufficient history for indicator set", symbol);
            continue;
        };
        ctx.indicator_cache.insert(symbol.clone(), indicators.clone());

        match momentum::score_momentum(
            &symbol,
            ctx.params.week_start,
            &bars,
            indicators,
            benchmark,
            now,
        ) {
            Ok(score) => {
                if score.qualifies {
                    qualified += 1;
                }
                ctx.store
                    .upsert_stage_record(&StageRecord::Momentum(score))
                    .await
                    .map_err(store_err)?;
            }
            Err(EngineError::InsufficientHistory(reason)) => {
                tracing::debug!("{}: {}", symbol, reason);
            }
            Err(e) => return Err(e),
        }
    }

    ctx.store
        .assign_stage_ranks(Stage::Momentum, ctx.params.week_start)
        .await
        .map_err(store_err)?;
    tracing::info!("Momentum stage: {} qualified", qualified);

    Ok(qualified)
}

/// Regime classification for the run week; must complete before S3.
pub async fn stage_regime(
    ctx: &StageContext,
    nifty_bars: &[Bar],
) -> Result<(RegimeSnapshot, Thresholds), EngineError> {
    let vix = run_activity(
        "fetch-vix",
        TimeoutClass::SingleFetch,
        RetryPolicy::default(),
        &ctx.cancel,
        || ctx.provider.fetch_vix(60),
    )
    .await
    .unwrap_or_else(|e| {
        tracing::warn!("VIX unavailable ({}), substituting realized vol", e);
        None
    });

    // Breadth over a sample of the active universe, from persisted bars.
    let stocks = ctx
        .store
        .active_stocks_above(defaults::MIN_QUALITY_SCORE)
        .await
        .map_err(store_err)?;
    let mut above_200 = 0usize;
    let mut above_50 = 0usize;
    let mut total = 0usize;
    for stock in stocks.iter().take(BREADTH_SAMPLE) {
        let bars = ctx
            .store
            .load_daily_bars(&stock.symbol, 220)
            .await
            .map_err(store_err)?;
        if bars.len() < 200 {
            continue;
        }
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let close = *closes.last().expect("length checked");
        let sma200 = closes[closes.len() - 200..].iter().sum::<f64>() / 200.0;
        let sma50 = closes[closes.len() - 50..].iter().sum::<f64>() / 50.0;
        total += 1;
        if close > sma200 {
            above_200 += 1;
        }
        if close > sma50 {
            above_50 += 1;
        }
    }

    // Sector leadership spread; neutral on fetch failure.
    let mut cyclical = Vec::new();
    for name in regime::CYCLICAL_INDICES {
        match ctx.provider.fetch_sector_index(name, 30).await {
            Ok(closes) => cyclical.push(closes),
            Err(e) => tracing::warn!("Sector index {} unavailable: {}", name, e),
        }
    }
    let mut defensive = Vec::new();
    for name in regime::DEFENSIVE_INDICES {
        match ctx.provider.fetch_sector_index(name, 30).await {
            Ok(closes) => defensive.push(closes),
            Err(e) => tracing::warn!("Sector index {} unavailable: {}", name, e),
        }
    }
    let spread = if cyclical.is_empty() || defensive.is_empty() {
        0.0
    } else {
        regime::leadership_spread(&cyclical, &defensive)
    };

    let inputs = regime::RegimeInputs {
        nifty_bars,
        vix: vix.as_deref(),
        breadth: regime::BreadthSample {
            above_200dma: above_200,
            above_50dma: above_50,
            total,
        },
        leadership_spread: spread,
    };

    let (snapshot, thresholds) = regime::classify(
        ctx.params.week_start,
        &inputs,
        ctx.params.regime_override,
        Utc::now(),
    )?;
    ctx.store.upsert_regime(&snapshot).await.map_err(store_err)?;

    Ok((snapshot, thresholds))
}

/// S3: weekly-return consistency over momentum qualifiers.
pub async fn stage_consistency(
    ctx: &StageContext,
    thresholds: &Thresholds,
) -> Result<usize, EngineError> {
    let momentum_qualified = ctx
        .store
        .load_momentum(ctx.params.week_start, true)
        .await
        .map_err(store_err)?;

    let mut weekly_by_symbol = Vec::with_capacity(momentum_qualified.len());
    for m in &momentum_qualified {
        let weekly = ctx
            .store
            .load_weekly_bars(
                &m.symbol,
                ctx.params.week_start,
                defaults::CONSISTENCY_WINDOW_WEEKS + 1,
            )
            .await
            .map_err(store_err)?;
        weekly_by_symbol.push((m.symbol.clone(), weekly));
    }

    let scores = consistency::score_consistency_batch(
        &weekly_by_symbol,
        &thresholds.consistency,
        ctx.params.week_start,
        Utc::now(),
    );

    let mut qualified = 0usize;
    for score in scores {
        if score.qualifies {
            qualified += 1;
        }
        ctx.store
            .upsert_stage_record(&StageRecord::Consistency(score))
            .await
            .map_err(store_err)?;
    }
    ctx.store
        .assign_stage_ranks(Stage::Consistency, ctx.params.week_start)
        .await
        .map_err(store_err)?;
    tracing::info!("Consistency stage: {} qualified", qualified);

    Ok(qualified)
}

/// S4A: liquidity gate over consistency qualifiers.
pub async fn stage_liquidity(ctx: &StageContext) -> Result<usize, EngineError> {
    let consistency_qualified = ctx
        .store
        .load_consistency(ctx.params.week_start, true)
        .await
        .map_err(store_err)?;

    let now = Utc::now();
    let mut qualified = 0usize;
    for c in &consistency_qualified {
        let bars = ctx
            .store
            .load_daily_bars(&c.symbol, LIQUIDITY_HORIZON_DAYS)
            .await
            .map_err(store_err)?;
        match liquidity::score_liquidity(&c.symbol, ctx.params.week_start, &bars, now) {
            Ok(score) => {
                if score.qualifies {
                    qualified += 1;
                }
                ctx.store
                    .upsert_stage_record(&StageRecord::Liquidity(score))
                    .await
                    .map_err(store_err)?;
            }
            Err(EngineError::InsufficientHistory(reason)) => {
                tracing::debug!("{}: {}", c.symbol, reason);
            }
            Err(e) => return Err(e),
        }
    }
    ctx.store
        .assign_stage_ranks(Stage::Liquidity, ctx.params.week_start)
        .await
        .map_err(store_err)?;
    tracing::info!("Liquidity stage: {} qualified", qualified);

    Ok(qualified)
}

/// S4B: setup detection over liquidity qualifiers. Emits zero or one
/// setup per symbol; the allowed pattern set comes from the regime.
pub async fn stage_setups(
    ctx: &StageContext,
    thresholds: &Thresholds,
) -> Result<usize, EngineError> {
    let Some(rr_floor) = thresholds.rr_floor else {
        tracing::info!("Setup stage: no setups allowed under this regime");
        return Ok(0);
    };

    let week = ctx.params.week_start;
    let liquidity_qualified = ctx.store.load_liquidity(week, true).await.map_err(store_err)?;
    let momentum_by_symbol: HashMap<String, f64> = ctx
        .store
        .load_momentum(week, true)
        .await
        .map_err(store_err)?
        .into_iter()
        .map(|m| (m.symbol.clone(), m.score))
        .collect();
    let consistency_by_symbol: HashMap<String, f64> = ctx
        .store
        .load_consistency(week, true)
        .await
        .map_err(store_err)?
        .into_iter()
        .map(|c| (c.symbol.clone(), c.final_score))
        .collect();

    let now = Utc::now();
    let mut emitted = 0usize;
    for l in &liquidity_qualified {
        let bars = ctx
            .store
            .load_daily_bars(&l.symbol, MOMENTUM_HORIZON_DAYS)
            .await
            .map_err(store_err)?;
        let indicators = match ctx.indicator_cache.get(&l.symbol) {
            Some(cached) => cached.value().clone(),
            None => match compute_indicator_set(&bars) {
                Ok(set) => set,
                Err(_) => continue,
            },
        };

        let inputs = SetupInputs {
            symbol: &l.symbol,
            week,
            bars: &bars,
            indicators: &indicators,
            allowed: &thresholds.allowed_setups,
            rr_floor,
            calculated_at: now,
        };
        if let Some(mut setup) = detect_setup(&inputs) {
            let momentum_score = momentum_by_symbol.get(&l.symbol).copied().unwrap_or(0.0);
            let consistency_score = consistency_by_symbol.get(&l.symbol).copied().unwrap_or(0.0);
            setup.quality_composite = 0.25 * momentum_score
                + 0.25 * consistency_score
                + 0.25 * l.score
                + 0.25 * setup.confidence;
            emitted += 1;
            ctx.store
                .upsert_stage_record(&StageRecord::Setup(setup))
                .await
                .map_err(store_err)?;
        }
    }
    ctx.store
        .assign_stage_ranks(Stage::Setup, week)
        .await
        .map_err(store_err)?;
    tracing::info!("Setup stage: {} setups emitted", emitted);

    Ok(emitted)
}

/// S5: risk geometry over emitted setups.
pub async fn stage_sizing(
    ctx: &StageContext,
    regime_snapshot: &RegimeSnapshot,
    thresholds: &Thresholds,
    benchmark: &BenchmarkContext,
) -> Result<usize, EngineError> {
    let week = ctx.params.week_start;
    let setups = ctx.store.load_setups(week).await.map_err(store_err)?;
    let stats = ctx
        .store
        .system_stats_snapshot(week)
        .await
        .map_err(store_err)?;
    let rr_floor = thresholds.rr_floor.unwrap_or(f64::INFINITY);

    let now = Utc::now();
    let mut qualified = 0usize;
    for setup in &setups {
        let stock_atr = ctx
            .indicator_cache
            .get(&setup.symbol)
            .map(|i| i.atr14)
            .unwrap_or(0.0);
        let sized = sizing::size_position(
            &sizing::SizingInputs {
                setup,
                stock_atr14: stock_atr,
                nifty_atr14: benchmark.atr14,
                stats,
                regime_multiplier: regime_snapshot.multiplier,
                rr_floor,
                portfolio_value: ctx.params.portfolio_value,
                risk_pct_per_trade: ctx.params.risk_pct_per_trade,
            },
            now,
        );
        if sized.qualifies {
            qualified += 1;
        }
        ctx.store
            .upsert_stage_record(&StageRecord::Sizing(sized))
            .await
            .map_err(store_err)?;
    }
    ctx.store
        .assign_stage_ranks(Stage::Sizing, week)
        .await
        .map_err(store_err)?;
    tracing::info!("Sizing stage: {} qualified", qualified);

    Ok(qualified)
}

/// S6: greedy constrained portfolio construction.
pub async fn stage_portfolio(
    ctx: &StageContext,
    regime_snapshot: &RegimeSnapshot,
    thresholds: &Thresholds,
) -> Result<PortfolioAllocation, EngineError> {
    let week = ctx.params.week_start;
    let sizings = ctx.store.load_sizings(week, true).await.map_err(store_err)?;
    let setups_by_symbol: HashMap<String, f64> = ctx
        .store
        .load_setups(week)
        .await
        .map_err(store_err)?
        .into_iter()
        .map(|s| (s.symbol.clone(), s.quality_composite))
        .collect();

    let mut candidates = Vec::with_capacity(sizings.len());
    for sized in &sizings {
        let stock = ctx
            .store
            .get_stock(&sized.symbol)
            .await
            .map_err(store_err)?;
        let sector = stock
            .and_then(|s| s.sector)
            .unwrap_or_else(|| "Unclassified".to_string());
        let bars = ctx
            .store
            .load_daily_bars(&sized.symbol, CORRELATION_HORIZON_DAYS)
            .await
            .map_err(store_err)?;
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

        candidates.push(portfolio::Candidate {
            symbol: sized.symbol.clone(),
            sector,
            quality_composite: setups_by_symbol.get(&sized.symbol).copied().unwrap_or(0.0),
            shares: sized.final_shares,
            position_value: sized.position_value,
            risk_amount: sized.final_risk,
            returns_60d: simple_returns(&closes),
        });
    }

    let allocation = portfolio::construct_portfolio(
        candidates,
        regime_snapshot,
        thresholds,
        ctx.params.portfolio_value,
        week,
        Utc::now(),
    );
    ctx.store
        .upsert_allocation(&allocation)
        .await
        .map_err(store_err)?;

    Ok(allocation)
}

/// S8: join stage outputs into the weekly recommendation.
pub async fn stage_recommend(
    ctx: &StageContext,
    regime_snapshot: &RegimeSnapshot,
    allocation: &PortfolioAllocation,
    fatal_reasons: Vec<String>,
) -> Result<Recommendation, EngineError> {
    let week = ctx.params.week_start;
    let store = &ctx.store;

    let momentum_by_symbol: HashMap<String, _> = store
        .load_momentum(week, false)
        .await
        .map_err(store_err)?
        .into_iter()
        .map(|m| (m.symbol.clone(), m))
        .collect();
    let consistency_by_symbol: HashMap<String, _> = store
        .load_consistency(week, false)
        .await
        .map_err(store_err)?
        .into_iter()
        .map(|c| (c.symbol.clone(), c))
        .collect();
    let liquidity_by_symbol: HashMap<String, _> = store
        .load_liquidity(week, false)
        .await
        .map_err(store_err)?
        .into_iter()
        .map(|l| (l.symbol.clone(), l))
        .collect();
    let setups_by_symbol: HashMap<String, _> = store
        .load_setups(week)
        .await
        .map_err(store_err)?
        .into_iter()
        .map(|s| (s.symbol.clone(), s))
        .collect();
    let sizing_by_symbol: HashMap<String, _> = store
        .load_sizings(week, false)
        .await
        .map_err(store_err)?
        .into_iter()
        .map(|s| (s.symbol.clone(), s))
        .collect();

    let mut cards = Vec::with_capacity(allocation.positions.len());
    for position in &allocation.positions {
        let symbol = &position.symbol;
        let (Some(stock), Some(m), Some(c), Some(l), Some(setup), Some(sized)) = (
            store.get_stock(symbol).await.map_err(store_err)?,
            momentum_by_symbol.get(symbol),
            consistency_by_symbol.get(symbol),
            liquidity_by_symbol.get(symbol),
            setups_by_symbol.get(symbol),
            sizing_by_symbol.get(symbol),
        ) else {
            tracing::warn!("{}: incomplete stage outputs, dropped from cards", symbol);
            continue;
        };

        let bars = store
            .load_daily_bars(symbol, MOMENTUM_HORIZON_DAYS)
            .await
            .map_err(store_err)?;
        let indicators = match ctx.indicator_cache.get(symbol) {
            Some(cached) => cached.value().clone(),
            None => match compute_indicator_set(&bars) {
                Ok(set) => set,
                Err(_) => continue,
            },
        };
        let current_price = bars.last().map(|b| b.close).unwrap_or(0.0);

        // Fundamentals are optional; absent data renormalizes conviction.
        let fundamental = match ctx.provider.fetch_fundamentals(symbol).await {
            Ok(Some(data)) => {
                let holdings = ctx.provider.fetch_holdings(symbol).await.ok().flatten();
                fundamentals::score_fundamentals(&data, holdings.as_ref())
            }
            _ => None,
        };

        cards.push(recommend::build_card(&recommend::CardInputs {
            stock: &stock,
            momentum: m,
            consistency: c,
            liquidity: l,
            setup,
            sizing: sized,
            indicators: &indicators,
            fundamental,
            current_price,
            high_52w: high_52w(&bars),
        }));
    }

    let stage_counts = StageCounts {
        universe: store
            .active_stocks_above(defaults::MIN_QUALITY_SCORE)
            .await
            .map_err(store_err)?
            .len(),
        momentum_qualified: store
            .stage_qualified_count(Stage::Momentum, week)
            .await
            .map_err(store_err)?,
        consistency_qualified: store
            .stage_qualified_count(Stage::Consistency, week)
            .await
            .map_err(store_err)?,
        liquidity_qualified: store
            .stage_qualified_count(Stage::Liquidity, week)
            .await
            .map_err(store_err)?,
        setups_emitted: store
            .stage_qualified_count(Stage::Setup, week)
            .await
            .map_err(store_err)?,
        sized_qualified: store
            .stage_qualified_count(Stage::Sizing, week)
            .await
            .map_err(store_err)?,
        selected: allocation.positions.len(),
    };

    let now = Utc::now();
    let recommendation = recommend::assemble(
        week,
        regime_snapshot.clone(),
        cards,
        stage_counts,
        fatal_reasons,
        now,
    );
    store
        .upsert_recommendation(&recommendation)
        .await
        .map_err(store_err)?;
    store
        .expire_stale_recommendations(now)
        .await
        .map_err(store_err)?;

    Ok(recommendation)
}
