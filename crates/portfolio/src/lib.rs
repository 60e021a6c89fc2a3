//! Greedy constrained portfolio constructor (stage 6).
//!
//! Candidates arrive conviction-ranked; the constructor walks down the
//! list enforcing pairwise correlation, sector count, sector value, and
//! cash reserve constraints until twelve positions or the list runs out.

use chrono::{DateTime, NaiveDate, Utc};
use engine_core::stats::pearson;
use engine_core::{
    defaults, AllocationPosition, AllocationStatus, PortfolioAllocation, RegimeSnapshot,
    RegimeState, Thresholds,
};
use rayon::prelude::*;
use std::collections::HashMap;

/// One sized, setup-backed symbol entering selection.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub symbol: String,
    pub sector: String,
    pub quality_composite: f64,
    pub shares: i64,
    pub position_value: f64,
    pub risk_amount: f64,
    /// Daily returns over the trailing 60 sessions, oldest first.
    pub returns_60d: Vec<f64>,
}

/// Pairwise Pearson correlations over the candidates' 60-day returns.
fn correlation_matrix(candidates: &[Candidate]) -> Vec<Vec<f64>> {
    (0..candidates.len())
        .into_par_iter()
        .map(|i| {
            (0..candidates.len())
                .map(|j| {
                    if i == j {
                        1.0
                    } else {
                        pearson(&candidates[i].returns_60d, &candidates[j].returns_60d)
                    }
                })
                .collect()
        })
        .collect()
}

/// Build the weekly allocation. Under RISK_OFF the allocation is empty by
/// construction, with the reason recorded.
pub fn construct_portfolio(
    mut candidates: Vec<Candidate>,
    regime: &RegimeSnapshot,
    thresholds: &Thresholds,
    portfolio_value: f64,
    week: NaiveDate,
    calculated_at: DateTime<Utc>,
) -> PortfolioAllocation {
    if regime.state == RegimeState::RiskOff || regime.multiplier == 0.0 {
        return empty_allocation(
            week,
            calculated_at,
            "regime is RISK_OFF; no positions taken".to_string(),
        );
    }

    // Conviction order, symbol tie-break for deterministic output.
    candidates.sort_by(|a, b| {
        b.quality_composite
            .partial_cmp(&a.quality_composite)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });

    let corr = correlation_matrix(&candidates);
    let investable = (1.0 - thresholds.cash_reserve_pct) * portfolio_value;
    let sector_cap_value = defaults::SECTOR_VALUE_CAP * portfolio_value;

    let mut selected: Vec<usize> = Vec::new();
    let mut sector_count: HashMap<&str, usize> = HashMap::new();
    let mut sector_value: HashMap<&str, f64> = HashMap::new();
    let mut cumulative_value = 0.0;
    let mut correlation_filtered = 0u32;
    let mut sector_filtered = 0u32;

    for (i, c) in candidates.iter().enumerate() {
        if selected.len() >= defaults::MAX_POSITIONS {
            break;
        }
        if c.shares < 1 || c.position_value <= 0.0 {
            continue;
        }

        if selected
            .iter()
            .any(|&s| corr[i][s].abs() > defaults::CORRELATION_CAP)
        {
            correlation_filtered += 1;
            continue;
        }

        let count = sector_count.get(c.sector.as_str()).copied().unwrap_or(0);
        if count >= defaults::SECTOR_MAX_POSITIONS {
            sector_filtered += 1;
            continue;
        }
        let value = sector_value.get(c.sector.as_str()).copied().unwrap_or(0.0);
        if value + c.position_value > sector_cap_value {
            sector_filtered += 1;
            continue;
        }

        if cumulative_value + c.position_value > investable {
            continue;
        }

        selected.push(i);
        *sector_count.entry(c.sector.as_str()).or_insert(0) += 1;
        *sector_value.entry(c.sector.as_str()).or_insert(0.0) += c.position_value;
        cumulative_value += c.position_value;
    }

    if selected.is_empty() {
        return empty_allocation(
            week,
            calculated_at,
            "no candidate cleared correlation, sector, and capital constraints".to_string(),
        );
    }

    let positions: Vec<AllocationPosition> = selected
        .iter()
        .map(|&i| {
            let c = &candidates[i];
            AllocationPosition {
                symbol: c.symbol.clone(),
                sector: c.sector.clone(),
                shares: c.shares,
                position_value: c.position_value,
                risk_amount: c.risk_amount,
                quality_composite: c.quality_composite,
            }
        })
        .collect();

    let total_risk: f64 = positions.iter().map(|p| p.risk_amount).sum();
    let sector_allocation: HashMap<String, f64> = sector_value
        .iter()
        .map(|(sector, value)| (sector.to_string(), value / portfolio_value))
        .collect();

    tracing::info!(
        "Portfolio for {}: {} positions, {:.1}% allocated, {} correlation-filtered, {} sector-filtered",
        week,
        positions.len(),
        100.0 * cumulative_value / portfolio_value,
        correlation_filtered,
        sector_filtered
    );

    PortfolioAllocation {
        week,
        calculated_at,
        positions,
        sector_allocation,
        allocated_pct: cumulative_value / portfolio_value,
        cash_pct: 1.0 - cumulative_value / portfolio_value,
        total_risk_pct: total_risk / portfolio_value,
        correlation_filtered,
        sector_filtered,
        status: AllocationStatus::Draft,
        reason: None,
    }
}

fn empty_allocation(
    week: NaiveDate,
    calculated_at: DateTime<Utc>,
    reason: String,
) -> PortfolioAllocation {
    PortfolioAllocation {
        week,
        calculated_at,
        positions: Vec::new(),
        sector_allocation: HashMap::new(),
        allocated_pct: 0.0,
        cash_pct: 1.0,
        total_risk_pct: 0.0,
        correlation_filtered: 0,
        sector_filtered: 0,
        status: AllocationStatus::Draft,
        reason: Some(reason),
    }
}
