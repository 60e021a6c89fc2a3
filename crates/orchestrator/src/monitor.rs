use chrono::Utc;
use engine_core::stats::max_drawdown;
use engine_core::{EngineError, GapDecision};
use execution::{decide_at_open, friday_summary, FridaySummary, TrackedPosition};
use std::collections::HashMap;

use crate::pipeline::StageContext;
use crate::stages::store_err;

/// Monday: decide every approved position against its open and persist
/// the tracked state. Independent of the weekly generation DAG; reads
/// the latest approved allocation.
pub async fn monday_gap_check(
    ctx: &StageContext,
) -> Result<Vec<(String, GapDecision)>, EngineError> {
    let Some(allocation) = ctx
        .store
        .latest_approved_allocation()
        .await
        .map_err(store_err)?
    else {
        tracing::info!("Monday check: no approved allocation");
        return Ok(Vec::new());
    };

    let setups_by_symbol: HashMap<String, _> = ctx
        .store
        .load_setups(allocation.week)
        .await
        .map_err(store_err)?
        .into_iter()
        .map(|s| (s.symbol.clone(), s))
        .collect();

    let mut decisions = Vec::new();
    let mut tracked = Vec::new();
    for position in &allocation.positions {
        let Some(setup) = setups_by_symbol.get(&position.symbol) else {
            tracing::warn!("{}: no setup behind approved position", position.symbol);
            continue;
        };

        // Latest session's open is the decision input.
        let bars = ctx
            .provider
            .fetch_daily(&position.symbol, 5)
            .await
            .unwrap_or_default();
        let Some(today) = bars.last() else {
            tracing::warn!("{}: no Monday bar, position left pending", position.symbol);
            continue;
        };

        let decision = decide_at_open(today.open, setup.stop, setup.entry_low, setup.entry_high);
        let mut p = TrackedPosition::new(
            position.symbol.clone(),
            allocation.week,
            position.shares,
            setup.entry_low,
            setup.entry_high,
            setup.stop,
            setup.target1,
            setup.target2,
        );
        p.apply_gap_decision(decision, today.open);

        tracing::info!(
            "{}: open {:.2} vs band [{:.2}, {:.2}] -> {}",
            position.symbol,
            today.open,
            setup.entry_low,
            setup.entry_high,
            decision.as_str()
        );
        decisions.push((position.symbol.clone(), decision));
        tracked.push(p);
    }

    ctx.store
        .upsert_tracked_positions(&tracked)
        .await
        .map_err(store_err)?;

    Ok(decisions)
}

/// Friday: close out the week, record outcomes into the rolling store,
/// and compute the system health summary.
pub async fn friday_review(ctx: &StageContext) -> Result<FridaySummary, EngineError> {
    let Some(allocation) = ctx
        .store
        .latest_approved_allocation()
        .await
        .map_err(store_err)?
    else {
        return Err(EngineError::Fatal(
            "Friday review: no approved allocation".to_string(),
        ));
    };

    let mut positions = ctx
        .store
        .load_tracked_positions(allocation.week)
        .await
        .map_err(store_err)?;

    let mut closes: HashMap<String, f64> = HashMap::new();
    for p in &mut positions {
        let bars = ctx
            .provider
            .fetch_daily(&p.symbol, 5)
            .await
            .unwrap_or_default();
        let Some(last) = bars.last() else { continue };
        closes.insert(p.symbol.clone(), last.close);

        p.update_on_close(last.close);
        p.close_week_end(last.close);
    }

    let now = Utc::now();
    for p in &positions {
        if let Some(outcome) = p.outcome(now) {
            ctx.store.upsert_outcome(&outcome).await.map_err(store_err)?;
        }
    }
    ctx.store
        .upsert_tracked_positions(&positions)
        .await
        .map_err(store_err)?;

    // Trailing 12 weeks of outcomes; drawdown proxied off the R equity
    // curve at the configured per-trade risk.
    let cutoff = allocation.week - chrono::Duration::weeks(12);
    let history = ctx.store.outcomes_since(cutoff).await.map_err(store_err)?;
    let mut equity = vec![1.0];
    for outcome in &history {
        let last = *equity.last().expect("seeded");
        equity.push(last * (1.0 + outcome.r_multiple * ctx.params.risk_pct_per_trade));
    }
    let drawdown = max_drawdown(&equity);

    let lookup = |symbol: &str| closes.get(symbol).copied();
    Ok(friday_summary(
        allocation.week,
        &positions,
        &lookup,
        &history,
        drawdown,
    ))
}
