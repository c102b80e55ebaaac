//! Event bus types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Closed set of event names shared by every producer and consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventName {
    EngineStarted,
    EngineStopped,
    TradeOpened,
    TradeClosed,
    TradeRejected,
    TradeReconciled,
    KillSwitchTripped,
    KillSwitchReset,
    KillSwitchResetRequested,
    KillSwitchTripRequested,
    AllocationChanged,
    RegimeChanged,
    CycleSkipped,
    StrategyError,
    LevelUp,
    BadgeEarned,
}

impl EventName {
    pub const ALL: [EventName; 16] = [
        EventName::EngineStarted,
        EventName::EngineStopped,
        EventName::TradeOpened,
        EventName::TradeClosed,
        EventName::TradeRejected,
        EventName::TradeReconciled,
        EventName::KillSwitchTripped,
        EventName::KillSwitchReset,
        EventName::KillSwitchResetRequested,
        EventName::KillSwitchTripRequested,
        EventName::AllocationChanged,
        EventName::RegimeChanged,
        EventName::CycleSkipped,
        EventName::StrategyError,
        EventName::LevelUp,
        EventName::BadgeEarned,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventName::EngineStarted => "ENGINE_STARTED",
            EventName::EngineStopped => "ENGINE_STOPPED",
            EventName::TradeOpened => "TRADE_OPENED",
            EventName::TradeClosed => "TRADE_CLOSED",
            EventName::TradeRejected => "TRADE_REJECTED",
            EventName::TradeReconciled => "TRADE_RECONCILED",
            EventName::KillSwitchTripped => "KILL_SWITCH_TRIPPED",
            EventName::KillSwitchReset => "KILL_SWITCH_RESET",
            EventName::KillSwitchResetRequested => "KILL_SWITCH_RESET_REQUESTED",
            EventName::KillSwitchTripRequested => "KILL_SWITCH_TRIP_REQUESTED",
            EventName::AllocationChanged => "ALLOCATION_CHANGED",
            EventName::RegimeChanged => "REGIME_CHANGED",
            EventName::CycleSkipped => "CYCLE_SKIPPED",
            EventName::StrategyError => "STRATEGY_ERROR",
            EventName::LevelUp => "LEVEL_UP",
            EventName::BadgeEarned => "BADGE_EARNED",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A published event, also the cross-process wire frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub name: EventName,
    pub payload: serde_json::Map<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    /// Identifier of the publishing process
    pub origin: String,
}

impl Event {
    pub fn new(
        name: EventName,
        payload: serde_json::Map<String, serde_json::Value>,
        origin: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            payload,
            timestamp: Utc::now(),
            origin: origin.into(),
        }
    }

    /// Decode the payload into a typed shape
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(serde_json::Value::Object(self.payload.clone()))
    }
}

/// Error returned by an in-process handler
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Event bus errors
#[derive(Debug, Error, PartialEq)]
pub enum BusError {
    #[error("payload for {0} is not a JSON object")]
    PayloadNotObject(EventName),
    #[error("no relay configured")]
    NoRelay,
    #[error("relay listener already started")]
    ListenerAlreadyStarted,
    #[error("relay unavailable: {0}")]
    RelayUnavailable(String),
    #[error("handlers registered for {0:?} but the relay listener was never started")]
    HandlersWithoutListener(Vec<EventName>),
    #[error("relay listener is running but no handlers are registered")]
    ListenerWithoutHandlers,
}
