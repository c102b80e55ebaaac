//! Broker adapter module
//!
//! The engine talks to a broker only through [`BrokerAdapter`]. Dry-run mode
//! uses the in-process [`ShadowBroker`] with the same call shape.

mod shadow;
mod types;

pub use shadow::ShadowBroker;
pub use types::{AccountSnapshot, Deal, OrderAck, OrderOutcome, OrderRequest, Position};

use crate::market::Quote;
use async_trait::async_trait;
use thiserror::Error;

/// Broker errors
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker unreachable: {0}")]
    Unreachable(String),
    #[error("broker call timed out")]
    Timeout,
    #[error("broker protocol error: {0}")]
    Protocol(String),
}

/// Trait for broker adapters
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    /// Submit a market order with protective stops
    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderOutcome, BrokerError>;
    async fn get_open_positions(&self) -> Result<Vec<Position>, BrokerError>;
    async fn get_account_snapshot(&self) -> Result<AccountSnapshot, BrokerError>;
    /// Closing deal of a position that is no longer open
    async fn get_deal(&self, ticket: u64) -> Result<Option<Deal>, BrokerError>;

    /// Latest price for a symbol; simulated adapters use it to fill and
    /// close positions
    async fn on_quote(&self, _quote: &Quote) {}

    /// Whether positions from this adapter are simulated
    fn is_simulated(&self) -> bool {
        false
    }
}
