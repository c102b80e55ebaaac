//! File-backed store: one JSON document per collection
//!
//! Documents are replaced atomically (temp file + rename) and always read
//! from disk, so a reader in another process sees the last committed write.

use super::{Store, StoreError};
use crate::brain::LearningRecord;
use crate::ledger::{AttemptRecord, Trade, TradeId};
use crate::risk::RiskState;
use crate::strategy::StrategyRecord;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const TRADES: &str = "trades.json";
const STRATEGIES: &str = "strategies.json";
const RISK_STATE: &str = "risk_state.json";
const LEARNING: &str = "learning.json";
const ATTEMPTS: &str = "attempts.jsonl";

/// Store persisted as JSON files in a directory
pub struct JsonStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonStore {
    /// Open (and create if needed) a store directory
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        tracing::debug!(path = %dir.display(), "Opened JSON store");
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn read_doc<T: DeserializeOwned + Default>(&self, name: &str) -> Result<T, StoreError> {
        match fs::read(self.dir.join(name)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_doc<T: Serialize>(&self, name: &str, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(value)?;
        let target = self.dir.join(name);
        let tmp = self.dir.join(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4()));

        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = fs::rename(&tmp, &target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl Store for JsonStore {
    async fn save_trade(&self, trade: &Trade) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut trades: Vec<Trade> = self.read_doc(TRADES).await?;
        match trades.iter_mut().find(|t| t.id == trade.id) {
            Some(existing) => *existing = trade.clone(),
            None => trades.push(trade.clone()),
        }
        self.write_doc(TRADES, &trades).await
    }

    async fn load_trade(&self, id: TradeId) -> Result<Option<Trade>, StoreError> {
        let trades: Vec<Trade> = self.read_doc(TRADES).await?;
        Ok(trades.into_iter().find(|t| t.id == id))
    }

    async fn trades(&self) -> Result<Vec<Trade>, StoreError> {
        self.read_doc(TRADES).await
    }

    async fn save_strategies(&self, records: &[StrategyRecord]) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut all: BTreeMap<String, StrategyRecord> = self
            .read_doc::<Vec<StrategyRecord>>(STRATEGIES)
            .await?
            .into_iter()
            .map(|r| (r.code.clone(), r))
            .collect();
        for record in records {
            all.insert(record.code.clone(), record.clone());
        }
        let all: Vec<StrategyRecord> = all.into_values().collect();
        self.write_doc(STRATEGIES, &all).await
    }

    async fn strategies(&self) -> Result<Vec<StrategyRecord>, StoreError> {
        self.read_doc(STRATEGIES).await
    }

    async fn save_risk_state(&self, state: &RiskState) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.write_doc(RISK_STATE, &Some(state)).await
    }

    async fn load_risk_state(&self) -> Result<Option<RiskState>, StoreError> {
        self.read_doc(RISK_STATE).await
    }

    async fn save_learning(&self, record: &LearningRecord) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut all: BTreeMap<String, LearningRecord> = self.read_doc(LEARNING).await?;
        all.insert(record.strategy.clone(), record.clone());
        self.write_doc(LEARNING, &all).await
    }

    async fn load_learning(&self, key: &str) -> Result<Option<LearningRecord>, StoreError> {
        let mut all: BTreeMap<String, LearningRecord> = self.read_doc(LEARNING).await?;
        Ok(all.remove(key))
    }

    async fn learning_records(&self) -> Result<Vec<LearningRecord>, StoreError> {
        let all: BTreeMap<String, LearningRecord> = self.read_doc(LEARNING).await?;
        Ok(all.into_values().collect())
    }

    async fn append_attempt(&self, record: &AttemptRecord) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(ATTEMPTS))
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn attempts(&self, limit: usize) -> Result<Vec<AttemptRecord>, StoreError> {
        let content = match fs::read_to_string(self.dir.join(ATTEMPTS)).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };
        let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        let skip = lines.len().saturating_sub(limit);
        lines[skip..]
            .iter()
            .map(|l| serde_json::from_str(l).map_err(StoreError::from))
            .collect()
    }
}
