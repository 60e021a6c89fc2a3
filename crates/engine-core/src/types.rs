use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Daily OHLCV bar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Daily traded value in rupees.
    pub fn turnover(&self) -> f64 {
        self.close * self.volume
    }
}

/// Weekly bar resampled from daily bars (ISO week, Monday–Friday).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyBar {
    /// Monday of the ISO week.
    pub week: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Monday of the ISO week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    let days_back = date.weekday().num_days_from_monday() as i64;
    date - chrono::Duration::days(days_back)
}

/// True on Saturday/Sunday.
pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Instrument master record from the exchange list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub name: String,
    pub isin: String,
    pub segment: String,
    pub instrument_type: String,
    pub lot_size: i64,
    pub tick_size: f64,
    pub industry: Option<String>,
}

/// Quality tier assigned by the universe stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tier {
    A,
    B,
    C,
    D,
}

impl Tier {
    pub fn from_quality_score(score: i64) -> Self {
        match score {
            s if s >= 90 => Tier::A,
            s if s >= 75 => Tier::B,
            s if s >= 60 => Tier::C,
            _ => Tier::D,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::A => "A",
            Tier::B => "B",
            Tier::C => "C",
            Tier::D => "D",
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(Tier::A),
            "B" => Ok(Tier::B),
            "C" => Ok(Tier::C),
            "D" => Ok(Tier::D),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

/// Tradable stock with quality tiering (universe stage output).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stock {
    pub symbol: String,
    pub name: String,
    pub isin: String,
    pub sector: Option<String>,
    pub lot_size: i64,
    pub is_mtf: bool,
    pub in_nifty_50: bool,
    pub in_nifty_100: bool,
    pub in_nifty_200: bool,
    pub in_nifty_500: bool,
    pub quality_score: i64,
    pub tier: Tier,
    pub active: bool,
    pub calculated_at: DateTime<Utc>,
}

/// Latest indicator values for a symbol, computed locally from daily bars.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub sma20: f64,
    pub sma50: f64,
    pub sma200: f64,
    pub atr14: f64,
    pub rsi14: f64,
    pub macd_hist: f64,
    /// 20-day average daily volume.
    pub vol20: f64,
    /// Per-day fractional slope of each MA over its own window.
    pub slope20: f64,
    pub slope50: f64,
    pub slope200: f64,
}

/// Benchmark (Nifty) context shared by momentum, regime and sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkContext {
    pub close: f64,
    pub ret_1m: f64,
    pub ret_3m: f64,
    pub ret_6m: f64,
    pub atr14: f64,
    /// Std dev of daily returns over 30 days.
    pub vol30: f64,
}

/// Institutional holdings snapshot (optional provider data).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holdings {
    pub fii_pct: Option<f64>,
    pub dii_pct: Option<f64>,
    pub promoter_pledge_pct: Option<f64>,
    pub fii_net_change_30d_pct: Option<f64>,
}

/// Fundamental metrics (optional, monthly refresh).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FundamentalData {
    pub eps_qoq_growth: Option<f64>,
    pub revenue_yoy_growth: Option<f64>,
    pub roce: Option<f64>,
    pub roe: Option<f64>,
    pub debt_to_equity: Option<f64>,
    pub operating_margin: Option<f64>,
    pub fcf_yield: Option<f64>,
    /// Cash EPS / reported EPS — earnings-quality proxy.
    pub cash_eps_ratio: Option<f64>,
}
