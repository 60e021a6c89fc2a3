use dashmap::DashMap;
use engine_core::{EngineError, IndicatorSet, Recommendation, RunParams};
use market_data::MarketDataProvider;
use std::sync::Arc;
use store::Store;
use tokio_util::sync::CancellationToken;

use crate::stages;

/// Everything a stage needs: the store, the provider, the run
/// parameters, cooperative cancellation, and the per-run indicator
/// cache shared across stages.
pub struct StageContext {
    pub store: Store,
    pub provider: Arc<dyn MarketDataProvider>,
    pub params: RunParams,
    pub cancel: CancellationToken,
    pub indicator_cache: DashMap<String, IndicatorSet>,
}

impl StageContext {
    pub fn new(store: Store, provider: Arc<dyn MarketDataProvider>, params: RunParams) -> Self {
        StageContext {
            store,
            provider,
            params,
            cancel: CancellationToken::new(),
            indicator_cache: DashMap::new(),
        }
    }

    fn checkpoint(&self, stage: &str) -> Result<(), EngineError> {
        if self.cancel.is_cancelled() {
            Err(EngineError::Fatal(format!(
                "run cancelled before {stage}; completed stages remain durable"
            )))
        } else {
            Ok(())
        }
    }
}

/// The master weekly workflow: S1 through S8 in DAG order, with the
/// regime classifier completing before S3. Any stage-level error aborts
/// the run; completed stages stay persisted and re-runnable.
pub async fn run_weekly(ctx: &StageContext) -> Result<Recommendation, EngineError> {
    let week = ctx.params.week_start;
    tracing::info!(
        "Weekly run for {} (portfolio value {:.0}, risk {:.3})",
        week,
        ctx.params.portfolio_value,
        ctx.params.risk_pct_per_trade
    );

    ctx.checkpoint("universe")?;
    let summary = stages::stage_universe(ctx).await?;
    tracing::info!(
        "Universe: {} instruments, {} investable",
        summary.total,
        summary.total - summary.excluded
    );

    ctx.checkpoint("momentum")?;
    let (nifty_bars, benchmark) = stages::fetch_benchmark(ctx).await?;
    stages::stage_momentum(ctx, &benchmark).await?;

    ctx.checkpoint("regime")?;
    let (regime_snapshot, thresholds) = stages::stage_regime(ctx, &nifty_bars).await?;

    ctx.checkpoint("consistency")?;
    stages::stage_consistency(ctx, &thresholds).await?;

    ctx.checkpoint("liquidity")?;
    stages::stage_liquidity(ctx).await?;

    ctx.checkpoint("setups")?;
    stages::stage_setups(ctx, &thresholds).await?;

    ctx.checkpoint("sizing")?;
    stages::stage_sizing(ctx, &regime_snapshot, &thresholds, &benchmark).await?;

    ctx.checkpoint("portfolio")?;
    let allocation = stages::stage_portfolio(ctx, &regime_snapshot, &thresholds).await?;

    ctx.checkpoint("recommend")?;
    let recommendation =
        stages::stage_recommend(ctx, &regime_snapshot, &allocation, Vec::new()).await?;

    tracing::info!(
        "Weekly run complete: {} setups, regime {}",
        recommendation.total_setups,
        recommendation.market_regime.state.as_str()
    );

    Ok(recommendation)
}
