//! Engine error classes

use crate::brain::{BrainError, ValidationError};
use crate::broker::BrokerError;
use crate::ledger::LedgerError;
use crate::market::MarketDataError;
use crate::risk::{RejectReason, RiskError};
use crate::store::StoreError;
use thiserror::Error;

/// Every failure the engine loop handles falls in one of these classes
#[derive(Debug, Error)]
pub enum EngineError {
    /// Broker, store or network; retried with backoff, cycle skipped
    #[error("transient failure: {0}")]
    Transient(String),
    /// Decision context incomplete; cycle aborted before any order
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Risk rejection or kill switch; order never submitted
    #[error("safety violation: {0}")]
    Safety(String),
    /// Trade state could not be resolved; left for the sweep
    #[error("reconciliation required: {0}")]
    Reconciliation(String),
}

impl EngineError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Transient(_))
    }

    /// Label for metrics
    pub fn class(&self) -> &'static str {
        match self {
            EngineError::Transient(_) => "transient",
            EngineError::Validation(_) => "validation",
            EngineError::Safety(_) => "safety",
            EngineError::Reconciliation(_) => "reconciliation",
        }
    }
}

impl From<BrokerError> for EngineError {
    fn from(e: BrokerError) -> Self {
        EngineError::Transient(e.to_string())
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Transient(e.to_string())
    }
}

impl From<MarketDataError> for EngineError {
    fn from(e: MarketDataError) -> Self {
        EngineError::Transient(e.to_string())
    }
}

impl From<LedgerError> for EngineError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Store(e) => EngineError::Transient(e.to_string()),
            other => EngineError::Reconciliation(other.to_string()),
        }
    }
}

impl From<RiskError> for EngineError {
    fn from(e: RiskError) -> Self {
        match e {
            RiskError::Store(e) => EngineError::Transient(e.to_string()),
            other => EngineError::Reconciliation(other.to_string()),
        }
    }
}

impl From<BrainError> for EngineError {
    fn from(e: BrainError) -> Self {
        match e {
            BrainError::Store(e) => EngineError::Transient(e.to_string()),
            BrainError::AllocationOverflow(_) => EngineError::Safety(e.to_string()),
            BrainError::NotClosed => EngineError::Reconciliation(e.to_string()),
        }
    }
}

impl From<RejectReason> for EngineError {
    fn from(reason: RejectReason) -> Self {
        EngineError::Safety(reason.to_string())
    }
}
