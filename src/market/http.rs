//! JSON bridge client for quotes and candles

use super::{Candle, MarketData, MarketDataError, Quote};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

/// Market data served by an HTTP bridge in front of the trading terminal
pub struct HttpMarketData {
    base_url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct TickResponse {
    bid: Decimal,
    ask: Decimal,
    #[serde(default)]
    time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct CandleResponse {
    time: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
}

impl HttpMarketData {
    /// Create a client with a bounded per-request timeout
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, MarketDataError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MarketDataError::Unreachable(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, MarketDataError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::trace!(url = %url, "Fetching market data");

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| MarketDataError::Unreachable(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(MarketDataError::NoData(path.to_string()));
        }
        if !response.status().is_success() {
            return Err(MarketDataError::Unreachable(format!(
                "{} returned {}",
                path,
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| MarketDataError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl MarketData for HttpMarketData {
    async fn quote(&self, symbol: &str) -> Result<Quote, MarketDataError> {
        let tick: TickResponse = self.get_json(&format!("/tick/{symbol}"), &[]).await?;
        Ok(Quote {
            symbol: symbol.to_string(),
            bid: tick.bid,
            ask: tick.ask,
            time: tick.time.unwrap_or_else(Utc::now),
        })
    }

    async fn candles(
        &self,
        symbol: &str,
        timeframe: &str,
        count: usize,
    ) -> Result<Vec<Candle>, MarketDataError> {
        let rows: Vec<CandleResponse> = self
            .get_json(
                &format!("/candles/{symbol}"),
                &[
                    ("timeframe", timeframe.to_string()),
                    ("count", count.to_string()),
                ],
            )
            .await?;

        let mut candles: Vec<Candle> = rows
            .into_iter()
            .map(|r| Candle {
                time: r.time,
                open: r.open,
                high: r.high,
                low: r.low,
                close: r.close,
            })
            .collect();
        candles.sort_by_key(|c| c.time);
        Ok(candles)
    }
}
