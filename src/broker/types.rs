//! Broker adapter types

use crate::ledger::{Direction, TradeId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An order to be submitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Ledger id, echoed back on the resulting position
    pub client_id: TradeId,
    pub symbol: String,
    pub direction: Direction,
    pub lots: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
}

/// Broker confirmation of a fill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub ticket: u64,
    pub price: Decimal,
    pub time: DateTime<Utc>,
}

/// Result of an order submission
#[derive(Debug, Clone, PartialEq)]
pub enum OrderOutcome {
    Ack(OrderAck),
    Reject { reason: String },
}

/// A live (or simulated) open position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub ticket: u64,
    pub client_id: Option<TradeId>,
    pub symbol: String,
    pub direction: Direction,
    pub lots: Decimal,
    pub open_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub opened_at: DateTime<Utc>,
    /// Unrealized profit at the last known price
    pub profit: Decimal,
}

/// Account balances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub balance: Decimal,
    pub equity: Decimal,
    pub margin: Decimal,
    pub free_margin: Decimal,
    pub time: DateTime<Utc>,
}

impl AccountSnapshot {
    pub fn new(balance: Decimal, equity: Decimal) -> Self {
        Self {
            balance,
            equity,
            margin: Decimal::ZERO,
            free_margin: equity,
            time: Utc::now(),
        }
    }
}

/// Closing deal for a position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub ticket: u64,
    pub exit_price: Decimal,
    pub profit: Decimal,
    pub commission: Decimal,
    pub swap: Decimal,
    pub time: DateTime<Utc>,
}
