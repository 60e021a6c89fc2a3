pub mod client;
pub mod provider;
pub mod resample;
pub mod validate;

pub use client::HttpMarketData;
pub use provider::{fetch_daily_batch, IndexName, MarketDataProvider, NIFTY_SYMBOL};
pub use resample::weekly_bars;
pub use validate::validate_bars;
