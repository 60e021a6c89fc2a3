use async_trait::async_trait;
use chrono::NaiveDate;
use engine_core::{Bar, EngineError, FundamentalData, Holdings, Instrument};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::provider::{IndexName, MarketDataProvider};
use crate::validate::validate_bars;

/// Minimum-interval rate limiter: at most one request per `interval`
/// across all clones, enforced before every provider call.
#[derive(Clone)]
struct IntervalLimiter {
    last_call: Arc<Mutex<Option<Instant>>>,
    interval: Duration,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            last_call: Arc::new(Mutex::new(None)),
            interval,
        }
    }

    async fn acquire(&self) {
        let mut last = self.last_call.lock().await;
        let now = Instant::now();
        if let Some(prev) = *last {
            let elapsed = now.duration_since(prev);
            if elapsed < self.interval {
                let wait = self.interval - elapsed;
                tracing::debug!("Rate limiter: waiting {}ms for provider slot", wait.as_millis());
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// HTTP market-data client. One instance per provider connection; clones
/// share the rate limiter.
#[derive(Clone)]
pub struct HttpMarketData {
    base_url: String,
    api_key: String,
    client: Client,
    limiter: IntervalLimiter,
}

#[derive(Deserialize)]
struct OhlcvRow {
    date: NaiveDate,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

#[derive(Deserialize)]
struct OhlcvResponse {
    candles: Vec<OhlcvRow>,
}

#[derive(Deserialize)]
struct InstrumentRow {
    symbol: String,
    name: String,
    isin: String,
    segment: String,
    instrument_type: String,
    lot_size: i64,
    tick_size: f64,
    industry: Option<String>,
}

#[derive(Deserialize)]
struct SymbolListResponse {
    symbols: Vec<String>,
}

#[derive(Deserialize)]
struct CloseSeriesResponse {
    closes: Vec<f64>,
}

impl HttpMarketData {
    pub fn new(base_url: String, api_key: String, min_delay_ms: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            base_url,
            api_key,
            client,
            limiter: IntervalLimiter::new(Duration::from_millis(min_delay_ms)),
        }
    }

    /// Send a GET with rate limiting and automatic 429 retry.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, EngineError> {
        let url = format!("{}{}", self.base_url, path);

        for attempt in 0..3u32 {
            self.limiter.acquire().await;
            let response = self
                .client
                .get(&url)
                .query(query)
                .header("x-api-key", &self.api_key)
                .send()
                .await
                .map_err(|e| EngineError::Provider(e.to_string()))?;

            if response.status().as_u16() == 429 {
                let wait_secs = 5u64 << attempt;
                tracing::warn!(
                    "Provider 429 on {}, waiting {}s before retry {}/3",
                    path,
                    wait_secs,
                    attempt + 1
                );
                tokio::time::sleep(Duration::from_secs(wait_secs)).await;
                continue;
            }

            if !response.status().is_success() {
                return Err(EngineError::Provider(format!(
                    "HTTP {} on {}: {}",
                    response.status(),
                    path,
                    response.text().await.unwrap_or_default()
                )));
            }

            return response
                .json::<T>()
                .await
                .map_err(|e| EngineError::Provider(e.to_string()));
        }

        Err(EngineError::Provider(format!(
            "Rate limited on {} after 3 retries",
            path
        )))
    }
}

#[async_trait]
impl MarketDataProvider for HttpMarketData {
    async fn fetch_daily(&self, symbol: &str, horizon_days: usize) -> Result<Vec<Bar>, EngineError> {
        let response: OhlcvResponse = self
            .get_json(
                &format!("/v1/ohlcv/{}", symbol),
                &[("days", horizon_days.to_string())],
            )
            .await?;

        let mut bars: Vec<Bar> = response
            .candles
            .into_iter()
            .map(|r| Bar {
                date: r.date,
                open: r.open,
                high: r.high,
                low: r.low,
                close: r.close,
                volume: r.volume,
            })
            .collect();
        bars.sort_by_key(|b| b.date);
        validate_bars(symbol, &bars)?;

        Ok(bars)
    }

    async fn fetch_instruments(&self) -> Result<Vec<Instrument>, EngineError> {
        let rows: Vec<InstrumentRow> = self.get_json("/v1/instruments", &[]).await?;

        // Cash-market equities only.
        Ok(rows
            .into_iter()
            .filter(|r| r.segment == "NSE_EQ" && r.instrument_type == "EQ")
            .map(|r| Instrument {
                symbol: r.symbol,
                name: r.name,
                isin: r.isin,
                segment: r.segment,
                instrument_type: r.instrument_type,
                lot_size: r.lot_size,
                tick_size: r.tick_size,
                industry: r.industry,
            })
            .collect())
    }

    async fn fetch_mtf_symbols(&self) -> Result<HashSet<String>, EngineError> {
        let response: SymbolListResponse = self.get_json("/v1/mtf-eligible", &[]).await?;
        Ok(response.symbols.into_iter().collect())
    }

    async fn fetch_index_constituents(
        &self,
        index: IndexName,
    ) -> Result<HashSet<String>, EngineError> {
        let response: SymbolListResponse = self
            .get_json(
                "/v1/index-constituents",
                &[("index", index.as_str().to_string())],
            )
            .await?;
        Ok(response.symbols.into_iter().collect())
    }

    async fn fetch_sector_index(&self, name: &str, days: usize) -> Result<Vec<f64>, EngineError> {
        let response: CloseSeriesResponse = self
            .get_json(
                "/v1/index-closes",
                &[("index", name.to_string()), ("days", days.to_string())],
            )
            .await?;
        Ok(response.closes)
    }

    async fn fetch_vix(&self, days: usize) -> Result<Option<Vec<f64>>, EngineError> {
        match self
            .get_json::<CloseSeriesResponse>("/v1/vix", &[("days", days.to_string())])
            .await
        {
            Ok(response) => Ok(Some(response.closes)),
            // VIX is optional; a missing series is not a provider failure.
            Err(EngineError::Provider(msg)) if msg.contains("HTTP 404") => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn fetch_holdings(&self, symbol: &str) -> Result<Option<Holdings>, EngineError> {
        match self
            .get_json::<Holdings>(&format!("/v1/holdings/{}", symbol), &[])
            .await
        {
            Ok(holdings) => Ok(Some(holdings)),
            Err(EngineError::Provider(msg)) if msg.contains("HTTP 404") => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn fetch_fundamentals(
        &self,
        symbol: &str,
    ) -> Result<Option<FundamentalData>, EngineError> {
        match self
            .get_json::<FundamentalData>(&format!("/v1/fundamentals/{}", symbol), &[])
            .await
        {
            Ok(data) => Ok(Some(data)),
            Err(EngineError::Provider(msg)) if msg.contains("HTTP 404") => Ok(None),
            Err(e) => Err(e),
        }
    }
}
