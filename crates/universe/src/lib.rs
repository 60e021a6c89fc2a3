//! Universe construction and quality tiering (the first gate).
//!
//! MTF eligibility is the liquidity proxy, broad-index membership the
//! quality proxy. Symbols with neither are tier D and excluded.

use chrono::{DateTime, Utc};
use engine_core::{Instrument, Stock, Tier};
use std::collections::HashSet;

/// Index membership sets for one build.
pub struct IndexMembership {
    pub nifty_50: HashSet<String>,
    pub nifty_100: HashSet<String>,
    pub nifty_200: HashSet<String>,
    pub nifty_500: HashSet<String>,
}

/// Per-tier counts reported after a build.
#[derive(Debug, Default, Clone, Copy)]
pub struct UniverseSummary {
    pub total: usize,
    pub tier_a: usize,
    pub tier_b: usize,
    pub tier_c: usize,
    pub excluded: usize,
}

/// Score and tier every instrument. Tier D records are returned too so
/// the store can deactivate them; they never reach later stages.
pub fn build_universe(
    instruments: &[Instrument],
    mtf: &HashSet<String>,
    indexes: &IndexMembership,
    calculated_at: DateTime<Utc>,
) -> (Vec<Stock>, UniverseSummary) {
    let mut summary = UniverseSummary::default();
    let mut stocks = Vec::with_capacity(instruments.len());

    for inst in instruments {
        let is_mtf = mtf.contains(&inst.symbol);
        let in_50 = indexes.nifty_50.contains(&inst.symbol);
        let in_100 = indexes.nifty_100.contains(&inst.symbol);
        let in_200 = indexes.nifty_200.contains(&inst.symbol);
        let in_500 = indexes.nifty_500.contains(&inst.symbol);
        let in_any_index = in_50 || in_100 || in_200 || in_500;

        let quality_score = if !is_mtf && !in_any_index {
            0
        } else {
            let base = if is_mtf { 40 } else { 0 };
            let bonus = if in_50 {
                50
            } else if in_100 {
                35
            } else if in_200 {
                25
            } else if in_500 {
                20
            } else {
                0
            };
            base + bonus
        };

        let tier = Tier::from_quality_score(quality_score);
        let active = tier != Tier::D;

        summary.total += 1;
        match tier {
            Tier::A => summary.tier_a += 1,
            Tier::B => summary.tier_b += 1,
            Tier::C => summary.tier_c += 1,
            Tier::D => summary.excluded += 1,
        }

        stocks.push(Stock {
            symbol: inst.symbol.clone(),
            name: inst.name.clone(),
            isin: inst.isin.clone(),
            sector: inst.industry.clone(),
            lot_size: inst.lot_size,
            is_mtf,
            in_nifty_50: in_50,
            in_nifty_100: in_100,
            in_nifty_200: in_200,
            in_nifty_500: in_500,
            quality_score,
            tier,
            active,
            calculated_at,
        });
    }

    tracing::info!(
        "Universe built: {} instruments, {} tier A, {} tier B, {} tier C, {} excluded",
        summary.total,
        summary.tier_a,
        summary.tier_b,
        summary.tier_c,
        summary.excluded
    );

    (stocks, summary)
}
