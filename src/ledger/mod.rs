//! Trade ledger module
//!
//! Canonical record of every order. Status changes go through the store so
//! a crash between two steps leaves a record the reconciliation sweep can
//! resolve.

mod reconcile;
mod types;

pub use reconcile::{ReconcileReport, Reconciler};
pub use types::{
    AttemptOutcome, AttemptRecord, Direction, Settlement, Trade, TradeId, TradeStatus,
    TransitionError,
};

use crate::store::{Store, StoreError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;

/// Ledger errors
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("trade {0} not found")]
    NotFound(TradeId),
}

/// Store-backed trade lifecycle
#[derive(Clone)]
pub struct TradeLedger {
    store: Arc<dyn Store>,
}

impl TradeLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Persist a new PENDING trade before its order is submitted
    pub async fn create_pending(&self, trade: Trade) -> Result<Trade, LedgerError> {
        debug_assert_eq!(trade.status(), TradeStatus::Pending);
        self.store.save_trade(&trade).await?;
        tracing::debug!(trade_id = %trade.id, symbol = %trade.symbol, "Trade pending");
        Ok(trade)
    }

    pub async fn get(&self, id: TradeId) -> Result<Trade, LedgerError> {
        self.store
            .load_trade(id)
            .await?
            .ok_or(LedgerError::NotFound(id))
    }

    async fn update<F>(&self, id: TradeId, f: F) -> Result<Trade, LedgerError>
    where
        F: FnOnce(&mut Trade) -> Result<(), TransitionError>,
    {
        let mut trade = self.get(id).await?;
        f(&mut trade)?;
        self.store.save_trade(&trade).await?;
        Ok(trade)
    }

    pub async fn mark_open(
        &self,
        id: TradeId,
        ticket: u64,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<Trade, LedgerError> {
        let trade = self.update(id, |t| t.mark_open(ticket, price, at)).await?;
        tracing::info!(trade_id = %id, ticket, price = %price, "Trade open");
        Ok(trade)
    }

    pub async fn mark_rejected(&self, id: TradeId, reason: &str) -> Result<Trade, LedgerError> {
        let trade = self.update(id, |t| t.mark_rejected(reason)).await?;
        tracing::info!(trade_id = %id, reason, "Trade rejected");
        Ok(trade)
    }

    pub async fn mark_closed(
        &self,
        id: TradeId,
        settlement: Settlement,
    ) -> Result<Trade, LedgerError> {
        let trade = self.update(id, |t| t.mark_closed(settlement)).await?;
        tracing::info!(
            trade_id = %id,
            net_profit = %trade.net_profit(),
            "Trade closed"
        );
        Ok(trade)
    }

    pub async fn mark_settled(&self, id: TradeId, at: DateTime<Utc>) -> Result<Trade, LedgerError> {
        let trade = self.update(id, |t| t.mark_settled(at)).await?;
        tracing::debug!(trade_id = %id, "Trade settled");
        Ok(trade)
    }

    /// CLOSED trades whose post-close updates have not all been applied
    pub async fn unsettled_closed(&self) -> Result<Vec<Trade>, LedgerError> {
        Ok(self
            .store
            .trades_with_status(TradeStatus::Closed)
            .await?
            .into_iter()
            .filter(|t| !t.is_settled())
            .collect())
    }

    pub async fn open_trades(&self) -> Result<Vec<Trade>, LedgerError> {
        Ok(self.store.trades_with_status(TradeStatus::Open).await?)
    }

    pub async fn pending_trades(&self) -> Result<Vec<Trade>, LedgerError> {
        Ok(self.store.trades_with_status(TradeStatus::Pending).await?)
    }

    /// PENDING trades created before `cutoff`
    pub async fn stale_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<Trade>, LedgerError> {
        Ok(self
            .pending_trades()
            .await?
            .into_iter()
            .filter(|t| t.created_at <= cutoff)
            .collect())
    }

    pub async fn record_attempt(&self, record: &AttemptRecord) -> Result<(), LedgerError> {
        self.store.append_attempt(record).await?;
        Ok(())
    }

    /// Most recent trades, newest first
    pub async fn recent(&self, limit: usize) -> Result<Vec<Trade>, LedgerError> {
        let mut trades = self.store.trades().await?;
        trades.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        trades.truncate(limit);
        Ok(trades)
    }
}
