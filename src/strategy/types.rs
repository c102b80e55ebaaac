//! Strategy types

use crate::ledger::{Direction, TradeId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Outcomes kept for the recency-weighted profit factor
pub const RECENT_WINDOW: usize = 20;

/// Trade ids remembered to make [`StrategyRecord::record_trade_close`] idempotent
pub const COUNTED_MEMORY: usize = 256;

/// Operator-controlled strategy state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyStatus {
    Active,
    Paused,
    Stopped,
}

impl fmt::Display for StrategyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyStatus::Active => f.write_str("ACTIVE"),
            StrategyStatus::Paused => f.write_str("PAUSED"),
            StrategyStatus::Stopped => f.write_str("STOPPED"),
        }
    }
}

/// Persisted strategy record with rolling performance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRecord {
    /// Bare strategy code
    pub code: String,
    pub status: StrategyStatus,
    /// Share of equity this strategy may risk, in percent
    pub allocation_pct: Decimal,
    pub trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub gross_profit: Decimal,
    /// Sum of losing trades, stored as a positive number
    pub gross_loss: Decimal,
    /// Net results of the most recent closed trades, oldest first
    #[serde(default)]
    pub recent: VecDeque<Decimal>,
    #[serde(default)]
    pub counted_trades: VecDeque<TradeId>,
    pub updated_at: DateTime<Utc>,
}

impl StrategyRecord {
    pub fn new(code: impl Into<String>, allocation_pct: Decimal) -> Self {
        Self {
            code: code.into(),
            status: StrategyStatus::Active,
            allocation_pct,
            trades: 0,
            wins: 0,
            losses: 0,
            gross_profit: Decimal::ZERO,
            gross_loss: Decimal::ZERO,
            recent: VecDeque::new(),
            counted_trades: VecDeque::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == StrategyStatus::Active
    }

    /// Fold one closed trade into the aggregates
    pub fn record_close(&mut self, net: Decimal, at: DateTime<Utc>) {
        self.trades += 1;
        if net > Decimal::ZERO {
            self.wins += 1;
            self.gross_profit += net;
        } else {
            self.losses += 1;
            self.gross_loss += -net;
        }
        self.recent.push_back(net);
        while self.recent.len() > RECENT_WINDOW {
            self.recent.pop_front();
        }
        self.updated_at = at;
    }

    /// [`record_close`](Self::record_close) at most once per trade; false
    /// when `trade_id` was already counted
    pub fn record_trade_close(&mut self, trade_id: TradeId, net: Decimal, at: DateTime<Utc>) -> bool {
        if self.counted_trades.contains(&trade_id) {
            return false;
        }
        self.record_close(net, at);
        self.counted_trades.push_back(trade_id);
        while self.counted_trades.len() > COUNTED_MEMORY {
            self.counted_trades.pop_front();
        }
        true
    }

    /// Fraction of closed trades that were winners (0..=1)
    pub fn win_rate(&self) -> Decimal {
        if self.trades == 0 {
            return Decimal::ZERO;
        }
        Decimal::from(self.wins) / Decimal::from(self.trades)
    }

    /// Gross profit over gross loss, `None` when there are no losses
    pub fn profit_factor(&self) -> Option<Decimal> {
        profit_factor(self.gross_profit, self.gross_loss)
    }

    /// Profit factor over the recent window
    pub fn recent_profit_factor(&self) -> Option<Decimal> {
        let (gp, gl) = self
            .recent
            .iter()
            .fold((Decimal::ZERO, Decimal::ZERO), |(gp, gl), n| {
                if *n > Decimal::ZERO {
                    (gp + n, gl)
                } else {
                    (gp, gl - n)
                }
            });
        profit_factor(gp, gl)
    }
}

fn profit_factor(gross_profit: Decimal, gross_loss: Decimal) -> Option<Decimal> {
    if gross_loss == Decimal::ZERO {
        return None;
    }
    Some(gross_profit / gross_loss)
}

/// A trade idea produced by a strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySignal {
    pub direction: Direction,
    pub entry: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    /// 0..=1
    pub confidence: f64,
    /// Requested lots; the symbol default applies when absent
    pub lots: Option<Decimal>,
}

impl StrategySignal {
    pub fn new(direction: Direction, entry: Decimal, confidence: f64) -> Self {
        Self {
            direction,
            entry,
            stop_loss: None,
            take_profit: None,
            confidence,
            lots: None,
        }
    }

    pub fn with_stops(mut self, stop_loss: Decimal, take_profit: Decimal) -> Self {
        self.stop_loss = Some(stop_loss);
        self.take_profit = Some(take_profit);
        self
    }

    pub fn with_lots(mut self, lots: Decimal) -> Self {
        self.lots = Some(lots);
        self
    }
}
