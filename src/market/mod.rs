//! Market data module
//!
//! Quotes, candles, technical indicators and regime classification

mod http;
mod indicators;
mod regime;

pub use http::HttpMarketData;
pub use indicators::{adx, atr, ema, rsi, Indicators, MIN_CANDLES};
pub use regime::{Regime, RegimeDetector};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Latest bid/ask for an instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub bid: Decimal,
    pub ask: Decimal,
    pub time: DateTime<Utc>,
}

impl Quote {
    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }

    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }
}

/// OHLC bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Market data errors
#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("market data unreachable: {0}")]
    Unreachable(String),
    #[error("no data for {0}")]
    NoData(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Trait for market data sources
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Freshest bid/ask for a symbol
    async fn quote(&self, symbol: &str) -> Result<Quote, MarketDataError>;
    /// Most recent `count` candles, oldest first
    async fn candles(
        &self,
        symbol: &str,
        timeframe: &str,
        count: usize,
    ) -> Result<Vec<Candle>, MarketDataError>;
}
