use async_trait::async_trait;
use engine_core::{Bar, EngineError, FundamentalData, Holdings, Instrument};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Benchmark index symbol.
pub const NIFTY_SYMBOL: &str = "NIFTY 50";

/// Broad index memberships used for quality tiering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexName {
    Nifty50,
    Nifty100,
    Nifty200,
    Nifty500,
}

impl IndexName {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexName::Nifty50 => "NIFTY 50",
            IndexName::Nifty100 => "NIFTY 100",
            IndexName::Nifty200 => "NIFTY 200",
            IndexName::Nifty500 => "NIFTY 500",
        }
    }

    pub fn all() -> [IndexName; 4] {
        [
            IndexName::Nifty50,
            IndexName::Nifty100,
            IndexName::Nifty200,
            IndexName::Nifty500,
        ]
    }
}

/// External market-data surface the pipeline consumes. Implementations
/// must be rate-limited and safe to call concurrently.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Daily bars for one symbol, oldest first, covering `horizon_days`
    /// trading days (fewer when the listing is younger).
    async fn fetch_daily(&self, symbol: &str, horizon_days: usize) -> Result<Vec<Bar>, EngineError>;

    /// Exchange instrument master (cash equity segment only).
    async fn fetch_instruments(&self) -> Result<Vec<Instrument>, EngineError>;

    /// Symbols eligible for margin trading.
    async fn fetch_mtf_symbols(&self) -> Result<HashSet<String>, EngineError>;

    /// Constituents of a broad index.
    async fn fetch_index_constituents(&self, index: IndexName)
        -> Result<HashSet<String>, EngineError>;

    /// Daily closes of a sector index (Bank, Metal, Realty, Auto,
    /// Pharma, FMCG, IT), oldest first.
    async fn fetch_sector_index(&self, name: &str, days: usize) -> Result<Vec<f64>, EngineError>;

    /// India VIX daily closes, oldest first. None when the series is not
    /// offered; realized Nifty vol substitutes downstream.
    async fn fetch_vix(&self, days: usize) -> Result<Option<Vec<f64>>, EngineError>;

    /// Institutional holdings snapshot; None when not offered.
    async fn fetch_holdings(&self, symbol: &str) -> Result<Option<Holdings>, EngineError>;

    /// Fundamental metrics (monthly refresh); None when not offered.
    async fn fetch_fundamentals(&self, symbol: &str)
        -> Result<Option<FundamentalData>, EngineError>;
}

/// Fetch daily bars for a batch of symbols with bounded concurrency.
///
/// A symbol whose fetch fails after the client's own retries is omitted
/// from the result (logged, not fatal).
pub async fn fetch_daily_batch(
    provider: Arc<dyn MarketDataProvider>,
    symbols: &[String],
    horizon_days: usize,
    concurrency: usize,
) -> HashMap<String, Vec<Bar>> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for symbol in symbols {
        let provider = Arc::clone(&provider);
        let semaphore = Arc::clone(&semaphore);
        let symbol = symbol.clone();
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            let result = provider.fetch_daily(&symbol, horizon_days).await;
            (symbol, result)
        });
    }

    let mut bars_by_symbol = HashMap::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((symbol, Ok(bars))) => {
                bars_by_symbol.insert(symbol, bars);
            }
            Ok((symbol, Err(e))) => {
                tracing::warn!("Omitting {} from this run: {}", symbol, e);
            }
            Err(e) => {
                tracing::warn!("Fetch task panicked: {}", e);
            }
        }
    }

    bars_by_symbol
}
