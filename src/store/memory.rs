//! In-memory store for single-process runs and tests

use super::{Store, StoreError};
use crate::brain::LearningRecord;
use crate::ledger::{AttemptRecord, Trade, TradeId};
use crate::risk::RiskState;
use crate::strategy::StrategyRecord;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    trades: Vec<Trade>,
    strategies: BTreeMap<String, StrategyRecord>,
    risk_state: Option<RiskState>,
    learning: BTreeMap<String, LearningRecord>,
    attempts: Vec<AttemptRecord>,
}

/// Store backed by process memory
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail until cleared
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save_trade(&self, trade: &Trade) -> Result<(), StoreError> {
        self.check()?;
        let mut inner = self.inner.write().await;
        match inner.trades.iter_mut().find(|t| t.id == trade.id) {
            Some(existing) => *existing = trade.clone(),
            None => inner.trades.push(trade.clone()),
        }
        Ok(())
    }

    async fn load_trade(&self, id: TradeId) -> Result<Option<Trade>, StoreError> {
        self.check()?;
        let inner = self.inner.read().await;
        Ok(inner.trades.iter().find(|t| t.id == id).cloned())
    }

    async fn trades(&self) -> Result<Vec<Trade>, StoreError> {
        self.check()?;
        Ok(self.inner.read().await.trades.clone())
    }

    async fn save_strategies(&self, records: &[StrategyRecord]) -> Result<(), StoreError> {
        self.check()?;
        let mut inner = self.inner.write().await;
        for record in records {
            inner.strategies.insert(record.code.clone(), record.clone());
        }
        Ok(())
    }

    async fn strategies(&self) -> Result<Vec<StrategyRecord>, StoreError> {
        self.check()?;
        Ok(self.inner.read().await.strategies.values().cloned().collect())
    }

    async fn save_risk_state(&self, state: &RiskState) -> Result<(), StoreError> {
        self.check()?;
        self.inner.write().await.risk_state = Some(state.clone());
        Ok(())
    }

    async fn load_risk_state(&self) -> Result<Option<RiskState>, StoreError> {
        self.check()?;
        Ok(self.inner.read().await.risk_state.clone())
    }

    async fn save_learning(&self, record: &LearningRecord) -> Result<(), StoreError> {
        self.check()?;
        self.inner
            .write()
            .await
            .learning
            .insert(record.strategy.clone(), record.clone());
        Ok(())
    }

    async fn load_learning(&self, key: &str) -> Result<Option<LearningRecord>, StoreError> {
        self.check()?;
        Ok(self.inner.read().await.learning.get(key).cloned())
    }

    async fn learning_records(&self) -> Result<Vec<LearningRecord>, StoreError> {
        self.check()?;
        Ok(self.inner.read().await.learning.values().cloned().collect())
    }

    async fn append_attempt(&self, record: &AttemptRecord) -> Result<(), StoreError> {
        self.check()?;
        self.inner.write().await.attempts.push(record.clone());
        Ok(())
    }

    async fn attempts(&self, limit: usize) -> Result<Vec<AttemptRecord>, StoreError> {
        self.check()?;
        let inner = self.inner.read().await;
        let skip = inner.attempts.len().saturating_sub(limit);
        Ok(inner.attempts[skip..].to_vec())
    }
}
