//! Decision context validation

use crate::market::{Indicators, Quote, Regime};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

/// Context is missing fields required for a decision
#[derive(Debug, Clone, Error, PartialEq)]
#[error("incomplete decision context for {symbol}: missing {}", .missing.join(", "))]
pub struct ValidationError {
    pub symbol: String,
    pub missing: Vec<String>,
}

/// Raw per-symbol market state as gathered by the engine
#[derive(Debug, Clone)]
pub struct DecisionContext {
    pub symbol: String,
    pub quote: Option<Quote>,
    pub indicators: Indicators,
    pub regime: Option<Regime>,
}

impl DecisionContext {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            quote: None,
            indicators: Indicators::default(),
            regime: None,
        }
    }

    /// Check every required field at once so the error lists all gaps
    pub fn validate(
        &self,
        max_quote_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<ValidatedContext, ValidationError> {
        let mut missing = Vec::new();

        let quote = match &self.quote {
            Some(q) if q.bid <= Decimal::ZERO || q.ask <= Decimal::ZERO => {
                missing.push("bid_ask".to_string());
                None
            }
            Some(q) if q.ask < q.bid => {
                missing.push("spread".to_string());
                None
            }
            Some(q) if now - q.time > max_quote_age => {
                missing.push("fresh_quote".to_string());
                None
            }
            Some(q) => Some(q.clone()),
            None => {
                missing.push("quote".to_string());
                None
            }
        };

        let mut field = |name: &str, value: Option<f64>| match value {
            Some(v) if v.is_finite() => Some(v),
            _ => {
                missing.push(name.to_string());
                None
            }
        };
        let rsi = field("rsi", self.indicators.rsi);
        let adx = field("adx", self.indicators.adx);
        let atr = field("atr", self.indicators.atr);
        let ema_fast = field("ema_fast", self.indicators.ema_fast);
        let ema_slow = field("ema_slow", self.indicators.ema_slow);

        if self.regime.is_none() {
            missing.push("regime".to_string());
        }

        match (quote, rsi, adx, atr, ema_fast, ema_slow, self.regime) {
            (Some(quote), Some(rsi), Some(adx), Some(atr), Some(ema_fast), Some(ema_slow), Some(regime))
                if missing.is_empty() =>
            {
                Ok(ValidatedContext {
                    symbol: self.symbol.clone(),
                    quote,
                    rsi,
                    adx,
                    atr,
                    ema_fast,
                    ema_slow,
                    regime,
                })
            }
            _ => Err(ValidationError {
                symbol: self.symbol.clone(),
                missing,
            }),
        }
    }
}

/// A context that passed validation. Only obtainable through
/// [`DecisionContext::validate`].
#[derive(Debug, Clone)]
pub struct ValidatedContext {
    symbol: String,
    quote: Quote,
    rsi: f64,
    adx: f64,
    atr: f64,
    ema_fast: f64,
    ema_slow: f64,
    regime: Regime,
}

impl ValidatedContext {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn quote(&self) -> &Quote {
        &self.quote
    }

    pub fn spread(&self) -> Decimal {
        self.quote.spread()
    }

    pub fn rsi(&self) -> f64 {
        self.rsi
    }

    pub fn adx(&self) -> f64 {
        self.adx
    }

    pub fn atr(&self) -> f64 {
        self.atr
    }

    pub fn ema_fast(&self) -> f64 {
        self.ema_fast
    }

    pub fn ema_slow(&self) -> f64 {
        self.ema_slow
    }

    pub fn regime(&self) -> Regime {
        self.regime
    }

    /// Mid price
    pub fn price(&self) -> Decimal {
        self.quote.mid()
    }
}
