//! Persistent store module
//!
//! Durable records of trades, strategies, risk state, learning records and
//! the attempted-trade audit log. Written only by the engine process.

mod json;
mod memory;

pub use json::JsonStore;
pub use memory::MemoryStore;

use crate::brain::LearningRecord;
use crate::ledger::{AttemptRecord, Trade, TradeId, TradeStatus};
use crate::risk::RiskState;
use crate::strategy::StrategyRecord;
use async_trait::async_trait;
use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt record: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Trait for persistent stores
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or replace a trade
    async fn save_trade(&self, trade: &Trade) -> Result<(), StoreError>;
    async fn load_trade(&self, id: TradeId) -> Result<Option<Trade>, StoreError>;
    /// All trades, oldest first
    async fn trades(&self) -> Result<Vec<Trade>, StoreError>;

    /// Replace every given strategy record in one commit
    async fn save_strategies(&self, records: &[StrategyRecord]) -> Result<(), StoreError>;
    async fn strategies(&self) -> Result<Vec<StrategyRecord>, StoreError>;

    async fn save_risk_state(&self, state: &RiskState) -> Result<(), StoreError>;
    async fn load_risk_state(&self) -> Result<Option<RiskState>, StoreError>;

    async fn save_learning(&self, record: &LearningRecord) -> Result<(), StoreError>;
    async fn load_learning(&self, key: &str) -> Result<Option<LearningRecord>, StoreError>;
    async fn learning_records(&self) -> Result<Vec<LearningRecord>, StoreError>;

    async fn append_attempt(&self, record: &AttemptRecord) -> Result<(), StoreError>;
    /// Most recent `limit` audit entries, oldest first
    async fn attempts(&self, limit: usize) -> Result<Vec<AttemptRecord>, StoreError>;

    /// Trades currently in `status`
    async fn trades_with_status(&self, status: TradeStatus) -> Result<Vec<Trade>, StoreError> {
        Ok(self
            .trades()
            .await?
            .into_iter()
            .filter(|t| t.status() == status)
            .collect())
    }

    async fn load_strategy(&self, code: &str) -> Result<Option<StrategyRecord>, StoreError> {
        Ok(self.strategies().await?.into_iter().find(|s| s.code == code))
    }
}
