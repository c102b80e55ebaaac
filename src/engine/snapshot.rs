//! Concurrent per-symbol market snapshots

use crate::brain::DecisionContext;
use crate::market::{Indicators, MarketData, RegimeDetector};
use crate::retry::{with_retry, RetryPolicy};
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;

/// Parameters shared by every symbol's fetch
pub struct SnapshotRequest<'a> {
    pub timeframe: &'a str,
    pub candle_count: usize,
    pub retry: &'a RetryPolicy,
    pub timeout: Duration,
    pub detector: &'a RegimeDetector,
}

/// Result of one round of fetches
#[derive(Debug)]
pub struct SnapshotRound {
    pub contexts: Vec<DecisionContext>,
    /// Symbols whose quote could not be fetched
    pub failed: Vec<String>,
}

impl SnapshotRound {
    /// Every symbol failed: the market source itself is down
    pub fn all_failed(&self) -> bool {
        !self.contexts.is_empty() && self.failed.len() == self.contexts.len()
    }
}

/// Fetch quote and candles for every symbol concurrently and wait for all
/// of them. Fetch failures leave the corresponding fields empty so that
/// validation rejects the context.
pub async fn fetch_snapshots(
    market: &Arc<dyn MarketData>,
    symbols: &[String],
    request: &SnapshotRequest<'_>,
) -> SnapshotRound {
    let fetches = symbols.iter().map(|symbol| fetch_one(market, symbol, request));
    let results = join_all(fetches).await;

    let mut round = SnapshotRound {
        contexts: Vec::with_capacity(results.len()),
        failed: Vec::new(),
    };
    for (ctx, quote_ok) in results {
        if !quote_ok {
            round.failed.push(ctx.symbol.clone());
        }
        round.contexts.push(ctx);
    }
    round
}

async fn fetch_one(
    market: &Arc<dyn MarketData>,
    symbol: &str,
    request: &SnapshotRequest<'_>,
) -> (DecisionContext, bool) {
    let quote_fut = with_retry(request.retry, "quote", request.timeout, || market.quote(symbol));
    let candles_fut = with_retry(request.retry, "candles", request.timeout, || {
        market.candles(symbol, request.timeframe, request.candle_count)
    });
    let (quote, candles) = tokio::join!(quote_fut, candles_fut);

    let mut ctx = DecisionContext::new(symbol);
    let quote_ok = match quote {
        Ok(q) => {
            ctx.quote = Some(q);
            true
        }
        Err(e) => {
            tracing::warn!(symbol, error = %e, "Quote unavailable");
            false
        }
    };
    match candles {
        Ok(candles) => {
            ctx.indicators = Indicators::from_candles(&candles);
            ctx.regime = request.detector.classify(&ctx.indicators);
        }
        Err(e) => {
            tracing::warn!(symbol, error = %e, "Candles unavailable");
        }
    }
    (ctx, quote_ok)
}
