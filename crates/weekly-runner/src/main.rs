//! weekly-runner: trigger the weekly selection pipeline or one of the
//! execution-engine checks from the command line.
//!
//! Usage:
//!   cargo run -p weekly-runner                          # full weekly run
//!   cargo run -p weekly-runner -- --week 2026-03-09
//!   cargo run -p weekly-runner -- --portfolio-value 2500000 --risk 0.01
//!   cargo run -p weekly-runner -- --regime-override RISK_OFF
//!   cargo run -p weekly-runner -- --monday-check
//!   cargo run -p weekly-runner -- --friday-review
//!   cargo run -p weekly-runner -- --approve 2026-03-09
//!
//! Environment: DATABASE_URL, PROVIDER_BASE_URL, PROVIDER_API_KEY,
//! PROVIDER_MIN_DELAY_MS.

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use engine_core::{defaults, week_start, RecommendationStatus, RegimeState, RunParams};
use market_data::HttpMarketData;
use orchestrator::StageContext;
use std::str::FromStr;
use std::sync::Arc;
use store::Store;

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "weekly_runner=info,orchestrator=info,market_data=warn".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:weekly-engine.db".to_string());
    let base_url = std::env::var("PROVIDER_BASE_URL")
        .context("PROVIDER_BASE_URL must point at the market-data service")?;
    let api_key = std::env::var("PROVIDER_API_KEY").unwrap_or_default();
    let min_delay_ms = std::env::var("PROVIDER_MIN_DELAY_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults::PROVIDER_MIN_DELAY_MS);

    let store = Store::new(&database_url).await?;
    let provider = Arc::new(HttpMarketData::new(base_url, api_key, min_delay_ms));

    // Status transitions are plain store writes; no pipeline needed.
    if let Some(week_str) = flag_value(&args, "--approve") {
        let week = NaiveDate::parse_from_str(&week_str, "%Y-%m-%d")?;
        store
            .set_recommendation_status(week, RecommendationStatus::Approved)
            .await?;
        store
            .set_allocation_status(week, engine_core::AllocationStatus::Approved)
            .await?;
        tracing::info!("Week {} approved", week);
        return Ok(());
    }
    if let Some(week_str) = flag_value(&args, "--mark-executed") {
        let week = NaiveDate::parse_from_str(&week_str, "%Y-%m-%d")?;
        store
            .set_recommendation_status(week, RecommendationStatus::Executed)
            .await?;
        store
            .set_allocation_status(week, engine_core::AllocationStatus::Executed)
            .await?;
        tracing::info!("Week {} marked executed", week);
        return Ok(());
    }

    let week = match flag_value(&args, "--week") {
        Some(w) => NaiveDate::parse_from_str(&w, "%Y-%m-%d")?,
        // Default to the upcoming week: a weekend run targets Monday.
        None => week_start(Utc::now().date_naive() + chrono::Duration::days(7)),
    };
    let portfolio_value: f64 = flag_value(&args, "--portfolio-value")
        .map(|v| v.parse())
        .transpose()?
        .unwrap_or(1_000_000.0);
    let risk_pct: f64 = flag_value(&args, "--risk")
        .map(|v| v.parse())
        .transpose()?
        .unwrap_or(defaults::RISK_PCT_PER_TRADE);
    let regime_override = match flag_value(&args, "--regime-override") {
        Some(v) => Some(RegimeState::from_str(&v).map_err(anyhow::Error::msg)?),
        None => None,
    };

    if portfolio_value <= 0.0 {
        bail!("portfolio value must be positive");
    }
    if !(0.0..=0.05).contains(&risk_pct) {
        bail!("risk per trade must be within (0, 0.05]");
    }

    let mut params = RunParams::new(week, portfolio_value);
    params.risk_pct_per_trade = risk_pct;
    params.regime_override = regime_override;

    let ctx = StageContext::new(store, provider, params);

    if args.iter().any(|a| a == "--monday-check") {
        let decisions = orchestrator::monday_gap_check(&ctx).await?;
        for (symbol, decision) in decisions {
            println!("{symbol}: {}", decision.as_str());
        }
        return Ok(());
    }

    if args.iter().any(|a| a == "--friday-review") {
        let summary = orchestrator::friday_review(&ctx).await?;
        println!(
            "Week {}: {} tracked, {} entered, R sum {:.2}, P&L {:.0}, health {:.0} ({})",
            summary.week,
            summary.positions_tracked,
            summary.entered,
            summary.weekly_r_sum,
            summary.realized_pnl + summary.unrealized_pnl,
            summary.health,
            summary.recommended_action
        );
        return Ok(());
    }

    let recommendation = orchestrator::run_weekly(&ctx).await?;
    println!(
        "Week {}: {} setups under {} regime ({} momentum, {} consistency, {} liquidity qualified)",
        recommendation.week,
        recommendation.total_setups,
        recommendation.market_regime.state.as_str(),
        recommendation.stage_counts.momentum_qualified,
        recommendation.stage_counts.consistency_qualified,
        recommendation.stage_counts.liquidity_qualified,
    );
    for card in &recommendation.cards {
        println!(
            "  {} [{}] entry {:.2}-{:.2} stop {:.2} t1 {:.2} t2 {:.2} shares {} conviction {:.1} ({})",
            card.symbol,
            card.setup_type.as_str(),
            card.levels.entry_low,
            card.levels.entry_high,
            card.levels.stop,
            card.levels.target1,
            card.levels.target2,
            card.sizing.shares,
            card.scores.conviction10,
            card.scores.conviction_label,
        );
    }

    Ok(())
}
