//! Single-owner access to the persisted risk state

use super::RiskState;
use crate::store::{Store, StoreError};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Serializes every read-modify-write of [`RiskState`] through the store.
/// Reads always go to the store, never to a cached copy.
#[derive(Clone)]
pub struct RiskStateHandle {
    store: Arc<dyn Store>,
    write_lock: Arc<Mutex<()>>,
}

impl RiskStateHandle {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Last committed state, or a fresh one if none was ever written
    pub async fn read(&self) -> Result<RiskState, StoreError> {
        Ok(self
            .store
            .load_risk_state()
            .await?
            .unwrap_or_else(|| RiskState::new(Utc::now())))
    }

    /// Load, mutate and commit as one unit
    pub async fn update<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut RiskState) -> T,
    {
        let _guard = self.write_lock.lock().await;
        let mut state = self.read().await?;
        let out = f(&mut state);
        self.store.save_risk_state(&state).await?;
        Ok(out)
    }
}
