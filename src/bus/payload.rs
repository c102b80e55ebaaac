//! Fixed payload shapes for each event name

use super::EventName;
use crate::brain::Badge;
use crate::ledger::{Direction, TradeId, TradeStatus};
use crate::market::Regime;
use crate::risk::TripReason;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Binds a payload type to the one event name it is published under
pub trait EventPayload: Serialize {
    const NAME: EventName;
}

macro_rules! payload {
    ($ty:ty => $name:ident) => {
        impl EventPayload for $ty {
            const NAME: EventName = EventName::$name;
        }
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStarted {
    pub mode: String,
    pub symbols: Vec<String>,
    pub strategies: Vec<String>,
}
payload!(EngineStarted => EngineStarted);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStopped {
    pub cycles: u64,
    /// Trades left for the reconciliation sweep
    pub pending_trades: usize,
}
payload!(EngineStopped => EngineStopped);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOpened {
    pub trade_id: TradeId,
    pub symbol: String,
    pub direction: Direction,
    pub lots: Decimal,
    pub entry_price: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    /// Bare strategy code
    pub strategy: String,
    pub strategy_id: String,
    pub ticket: u64,
    pub simulated: bool,
}
payload!(TradeOpened => TradeOpened);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeClosed {
    pub trade_id: TradeId,
    pub symbol: String,
    pub direction: Direction,
    pub lots: Decimal,
    /// Bare strategy code
    pub strategy: String,
    pub strategy_id: String,
    pub entry_price: Option<Decimal>,
    pub exit_price: Decimal,
    pub profit: Decimal,
    pub commission: Decimal,
    pub swap: Decimal,
    pub net_profit: Decimal,
    pub simulated: bool,
}
payload!(TradeClosed => TradeClosed);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRejected {
    pub trade_id: Option<TradeId>,
    pub symbol: String,
    pub strategy: String,
    pub direction: Direction,
    pub requested_lots: Decimal,
    pub reason: String,
}
payload!(TradeRejected => TradeRejected);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeReconciled {
    pub trade_id: TradeId,
    pub symbol: String,
    pub resolved_to: TradeStatus,
    pub ticket: Option<u64>,
}
payload!(TradeReconciled => TradeReconciled);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillSwitchTripped {
    pub reason: TripReason,
    pub tripped_at: DateTime<Utc>,
}
payload!(KillSwitchTripped => KillSwitchTripped);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillSwitchReset {
    pub reset_by: String,
    pub reset_at: DateTime<Utc>,
    pub previous_reason: Option<TripReason>,
}
payload!(KillSwitchReset => KillSwitchReset);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillSwitchResetRequested {
    pub requested_by: String,
}
payload!(KillSwitchResetRequested => KillSwitchResetRequested);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillSwitchTripRequested {
    pub requested_by: String,
    pub reason: String,
}
payload!(KillSwitchTripRequested => KillSwitchTripRequested);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationChanged {
    /// Allocation percentage per strategy code
    pub allocations: BTreeMap<String, Decimal>,
}
payload!(AllocationChanged => AllocationChanged);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeChanged {
    pub symbol: String,
    pub from: Option<Regime>,
    pub to: Regime,
}
payload!(RegimeChanged => RegimeChanged);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleSkipped {
    pub cycle: u64,
    pub symbol: Option<String>,
    pub reason: String,
    #[serde(default)]
    pub missing: Vec<String>,
}
payload!(CycleSkipped => CycleSkipped);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyFailed {
    pub strategy: String,
    pub symbol: String,
    pub error: String,
}
payload!(StrategyFailed => StrategyError);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelUp {
    pub strategy: String,
    pub level: u32,
    pub xp: u64,
}
payload!(LevelUp => LevelUp);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BadgeEarned {
    pub strategy: String,
    pub badge: Badge,
}
payload!(BadgeEarned => BadgeEarned);
