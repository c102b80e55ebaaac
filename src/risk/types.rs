//! Risk types

use crate::ledger::{Direction, TradeId};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Settled trade ids remembered to make `post_trade_update` idempotent
pub const SETTLED_MEMORY: usize = 1024;

/// Why the kill switch tripped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripReason {
    /// Drawdown from the equity high-water mark reached the ceiling
    Drawdown { drawdown_pct: Decimal, limit_pct: Decimal },
    /// Realized loss today reached the ceiling
    DailyLoss { loss: Decimal, limit: Decimal },
    /// Operator halt
    Manual { requested_by: String, note: String },
}

impl fmt::Display for TripReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TripReason::Drawdown {
                drawdown_pct,
                limit_pct,
            } => write!(f, "drawdown {}% >= {}%", drawdown_pct.round_dp(2), limit_pct),
            TripReason::DailyLoss { loss, limit } => {
                write!(f, "daily loss {} >= {}", loss.round_dp(2), limit.round_dp(2))
            }
            TripReason::Manual { requested_by, note } => {
                write!(f, "manual halt by {requested_by}: {note}")
            }
        }
    }
}

/// Persisted kill-switch flag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KillSwitchFlag {
    #[default]
    Armed,
    Tripped {
        reason: TripReason,
        tripped_at: DateTime<Utc>,
    },
}

impl KillSwitchFlag {
    pub fn is_tripped(&self) -> bool {
        matches!(self, KillSwitchFlag::Tripped { .. })
    }
}

/// Result of a kill-switch check
#[derive(Debug, Clone, PartialEq)]
pub enum KillSwitchStatus {
    Ok,
    Tripped(TripReason),
}

/// Account-level risk record; single writer is the engine process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskState {
    pub daily_pnl: Decimal,
    pub weekly_pnl: Decimal,
    pub monthly_pnl: Decimal,
    /// Accumulator anchors: the UTC day, ISO week and month they cover
    pub day: NaiveDate,
    pub iso_week: (i32, u32),
    pub month: (i32, u32),
    pub peak_equity: Decimal,
    pub drawdown_pct: Decimal,
    pub kill_switch: KillSwitchFlag,
    #[serde(default)]
    pub settled_trades: VecDeque<TradeId>,
    /// Learning outcomes recorded since the last allocation rebalance
    #[serde(default)]
    pub closes_since_rebalance: u32,
    pub updated_at: DateTime<Utc>,
}

impl RiskState {
    pub fn new(now: DateTime<Utc>) -> Self {
        let day = now.date_naive();
        Self {
            daily_pnl: Decimal::ZERO,
            weekly_pnl: Decimal::ZERO,
            monthly_pnl: Decimal::ZERO,
            day,
            iso_week: (day.iso_week().year(), day.iso_week().week()),
            month: (day.year(), day.month()),
            peak_equity: Decimal::ZERO,
            drawdown_pct: Decimal::ZERO,
            kill_switch: KillSwitchFlag::Armed,
            settled_trades: VecDeque::new(),
            closes_since_rebalance: 0,
            updated_at: now,
        }
    }

    /// Start new accumulation periods when `now` is past the current anchors.
    /// Anchors only move forward.
    pub fn roll(&mut self, now: DateTime<Utc>) {
        let day = now.date_naive();
        if day > self.day {
            self.daily_pnl = Decimal::ZERO;
            self.day = day;
        }
        let week = (day.iso_week().year(), day.iso_week().week());
        if week > self.iso_week {
            self.weekly_pnl = Decimal::ZERO;
            self.iso_week = week;
        }
        let month = (day.year(), day.month());
        if month > self.month {
            self.monthly_pnl = Decimal::ZERO;
            self.month = month;
        }
    }

    /// Add a realized result closed at `closed_at` to every accumulator whose
    /// period contains it; false when already applied. A result from an
    /// already finished period never touches the current totals.
    pub fn apply_settlement(
        &mut self,
        trade_id: TradeId,
        net: Decimal,
        closed_at: DateTime<Utc>,
    ) -> bool {
        if self.settled_trades.contains(&trade_id) {
            return false;
        }
        self.roll(closed_at);
        let day = closed_at.date_naive();
        if day == self.day {
            self.daily_pnl += net;
        }
        if (day.iso_week().year(), day.iso_week().week()) == self.iso_week {
            self.weekly_pnl += net;
        }
        if (day.year(), day.month()) == self.month {
            self.monthly_pnl += net;
        }
        self.settled_trades.push_back(trade_id);
        while self.settled_trades.len() > SETTLED_MEMORY {
            self.settled_trades.pop_front();
        }
        self.updated_at = self.updated_at.max(closed_at);
        true
    }
}

/// A trade the engine wants to place
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateOrder {
    pub symbol: String,
    /// Bare strategy code
    pub strategy: String,
    pub direction: Direction,
    pub requested_lots: Decimal,
    pub entry: Decimal,
    pub stop_loss: Decimal,
}

impl CandidateOrder {
    pub fn stop_distance(&self) -> Decimal {
        (self.entry - self.stop_loss).abs()
    }
}

/// Why a candidate was refused
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    KillSwitchTripped { reason: TripReason },
    UnknownSymbol,
    WeekendGapRisk,
    StrategyInactive,
    NoAllocation,
    MaxOpenPositions { open: usize, limit: usize },
    InvalidStop,
    BelowMinimumSize { lots: Decimal, min_lots: Decimal },
}

impl RejectReason {
    pub fn is_kill_switch(&self) -> bool {
        matches!(self, RejectReason::KillSwitchTripped { .. })
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::KillSwitchTripped { reason } => write!(f, "kill switch tripped: {reason}"),
            RejectReason::UnknownSymbol => f.write_str("symbol not configured"),
            RejectReason::WeekendGapRisk => f.write_str("weekend gap-risk window"),
            RejectReason::StrategyInactive => f.write_str("strategy not active"),
            RejectReason::NoAllocation => f.write_str("strategy has no allocation"),
            RejectReason::MaxOpenPositions { open, limit } => {
                write!(f, "open positions {open} >= limit {limit}")
            }
            RejectReason::InvalidStop => f.write_str("stop distance is zero"),
            RejectReason::BelowMinimumSize { lots, min_lots } => {
                write!(f, "size {lots} below minimum {min_lots}")
            }
        }
    }
}

/// Pre-trade verdict
#[derive(Debug, Clone, PartialEq)]
pub enum PretradeDecision {
    Approved { lots: Decimal },
    Resized { requested: Decimal, lots: Decimal },
    Rejected(RejectReason),
}

impl PretradeDecision {
    /// Lots to submit, if the order may proceed
    pub fn lots(&self) -> Option<Decimal> {
        match self {
            PretradeDecision::Approved { lots } | PretradeDecision::Resized { lots, .. } => {
                Some(*lots)
            }
            PretradeDecision::Rejected(_) => None,
        }
    }
}
