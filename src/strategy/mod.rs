//! Strategy module
//!
//! The contract pluggable strategies implement, and the persisted records the
//! engine keeps for them. No trading logic ships with the crate.

mod types;

pub use types::{StrategyRecord, StrategySignal, StrategyStatus, COUNTED_MEMORY, RECENT_WINDOW};

use crate::brain::ValidatedContext;
use crate::ledger::TradeId;
use crate::store::{Store, StoreError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;

/// Failure raised by a strategy while evaluating a context
#[derive(Debug, Error)]
#[error("strategy {code} failed: {message}")]
pub struct StrategyError {
    pub code: String,
    pub message: String,
}

impl StrategyError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Trait for pluggable strategies
pub trait Strategy: Send + Sync {
    /// Bare strategy code, without any instrument suffix
    fn code(&self) -> &str;

    /// Propose a trade for a validated context, or `None` to stand aside
    fn evaluate(&self, ctx: &ValidatedContext) -> Result<Option<StrategySignal>, StrategyError>;
}

/// Raw strategy identifier recorded on trades: `SYMBOL_CODE`
pub fn strategy_id(symbol: &str, code: &str) -> String {
    format!("{symbol}_{code}")
}

/// Access to persisted strategy records
#[derive(Clone)]
pub struct StrategyBook {
    store: Arc<dyn Store>,
}

impl StrategyBook {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Create records for codes not yet persisted. New codes split equally
    /// whatever allocation ACTIVE records leave unclaimed, so the ACTIVE
    /// total never exceeds 100.
    pub async fn ensure_registered(&self, codes: &[String]) -> Result<Vec<StrategyRecord>, StoreError> {
        let existing = self.store.strategies().await?;
        let mut missing: Vec<&String> = codes
            .iter()
            .filter(|code| !existing.iter().any(|r| &r.code == *code))
            .collect();
        missing.sort();
        missing.dedup();
        if missing.is_empty() {
            return Ok(existing);
        }

        let claimed: Decimal = existing
            .iter()
            .filter(|r| r.is_active())
            .map(|r| r.allocation_pct)
            .sum();
        let headroom = (Decimal::ONE_HUNDRED - claimed).max(Decimal::ZERO);
        let share = (headroom / Decimal::from(missing.len() as u64))
            .round_dp_with_strategy(2, rust_decimal::RoundingStrategy::ToZero);
        if share == Decimal::ZERO {
            tracing::warn!(
                claimed = %claimed,
                count = missing.len(),
                "No allocation headroom, new strategies start at 0% until the next rebalance"
            );
        }

        let records: Vec<StrategyRecord> = missing
            .into_iter()
            .map(|code| StrategyRecord::new(code.clone(), share))
            .collect();
        tracing::info!(
            count = records.len(),
            allocation_pct = %share,
            "Registering new strategies"
        );
        self.store.save_strategies(&records).await?;
        self.store.strategies().await
    }

    pub async fn records(&self) -> Result<Vec<StrategyRecord>, StoreError> {
        self.store.strategies().await
    }

    pub async fn get(&self, code: &str) -> Result<Option<StrategyRecord>, StoreError> {
        self.store.load_strategy(code).await
    }

    /// Fold a closed trade into the strategy's rolling performance. Returns
    /// false when the trade was already counted.
    pub async fn record_close(
        &self,
        code: &str,
        trade_id: TradeId,
        net: Decimal,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut record = match self.store.load_strategy(code).await? {
            Some(r) => r,
            None => StrategyRecord::new(code, Decimal::ZERO),
        };
        if !record.record_trade_close(trade_id, net, at) {
            return Ok(false);
        }
        self.store.save_strategies(std::slice::from_ref(&record)).await?;
        Ok(true)
    }

    /// Operator status change
    pub async fn set_status(&self, code: &str, status: StrategyStatus) -> Result<bool, StoreError> {
        let Some(mut record) = self.store.load_strategy(code).await? else {
            return Ok(false);
        };
        record.status = status;
        record.updated_at = Utc::now();
        self.store.save_strategies(std::slice::from_ref(&record)).await?;
        Ok(true)
    }
}
