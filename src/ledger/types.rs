//! Trade ledger types

use crate::market::Regime;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Trade identifier, also sent to the broker as the client order id
pub type TradeId = Uuid;

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    /// +1 for buys, -1 for sells
    pub fn sign(self) -> Decimal {
        match self {
            Direction::Buy => Decimal::ONE,
            Direction::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Buy => f.write_str("BUY"),
            Direction::Sell => f.write_str("SELL"),
        }
    }
}

/// Lifecycle state of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    Pending,
    Open,
    Closed,
    Rejected,
}

impl TradeStatus {
    /// Legal moves: PENDING -> OPEN -> CLOSED and PENDING -> REJECTED
    pub fn can_transition_to(self, next: TradeStatus) -> bool {
        matches!(
            (self, next),
            (TradeStatus::Pending, TradeStatus::Open)
                | (TradeStatus::Pending, TradeStatus::Rejected)
                | (TradeStatus::Open, TradeStatus::Closed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TradeStatus::Closed | TradeStatus::Rejected)
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TradeStatus::Pending => "PENDING",
            TradeStatus::Open => "OPEN",
            TradeStatus::Closed => "CLOSED",
            TradeStatus::Rejected => "REJECTED",
        };
        f.write_str(s)
    }
}

/// Illegal status change
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("illegal trade transition {from} -> {to} for {trade_id}")]
pub struct TransitionError {
    pub trade_id: TradeId,
    pub from: TradeStatus,
    pub to: TradeStatus,
}

/// Broker-confirmed exit of an open trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub exit_price: Decimal,
    pub profit: Decimal,
    pub commission: Decimal,
    pub swap: Decimal,
    pub closed_at: DateTime<Utc>,
}

impl Settlement {
    pub fn net(&self) -> Decimal {
        self.profit - self.commission - self.swap
    }
}

/// Canonical record of one order and its outcome
///
/// `status` is only changed through the `mark_*` transition methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub symbol: String,
    pub direction: Direction,
    pub lots: Decimal,
    /// Raw strategy identifier as reported by the strategy
    pub strategy: String,
    /// Bare strategy code learning and performance are keyed by, fixed when
    /// the trade is placed
    #[serde(default)]
    pub strategy_code: Option<String>,
    status: TradeStatus,
    pub simulated: bool,
    pub entry_price: Option<Decimal>,
    pub exit_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub regime_at_entry: Option<Regime>,
    pub broker_ticket: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    /// Set once the close has been folded into risk, learning and strategy
    /// performance
    #[serde(default)]
    pub settled_at: Option<DateTime<Utc>>,
    pub profit: Decimal,
    pub commission: Decimal,
    pub swap: Decimal,
    pub reject_reason: Option<String>,
}

impl Trade {
    /// A new PENDING trade
    pub fn pending(
        symbol: impl Into<String>,
        direction: Direction,
        lots: Decimal,
        strategy: impl Into<String>,
        simulated: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            direction,
            lots,
            strategy: strategy.into(),
            strategy_code: None,
            status: TradeStatus::Pending,
            simulated,
            entry_price: None,
            exit_price: None,
            stop_loss: None,
            take_profit: None,
            regime_at_entry: None,
            broker_ticket: None,
            created_at: Utc::now(),
            opened_at: None,
            closed_at: None,
            settled_at: None,
            profit: Decimal::ZERO,
            commission: Decimal::ZERO,
            swap: Decimal::ZERO,
            reject_reason: None,
        }
    }

    pub fn with_protection(mut self, stop_loss: Decimal, take_profit: Decimal) -> Self {
        self.stop_loss = Some(stop_loss);
        self.take_profit = Some(take_profit);
        self
    }

    pub fn with_strategy_code(mut self, code: impl Into<String>) -> Self {
        self.strategy_code = Some(code.into());
        self
    }

    pub fn with_regime(mut self, regime: Regime) -> Self {
        self.regime_at_entry = Some(regime);
        self
    }

    pub fn with_entry_price(mut self, price: Decimal) -> Self {
        self.entry_price = Some(price);
        self
    }

    pub fn status(&self) -> TradeStatus {
        self.status
    }

    /// Realized result after costs
    pub fn net_profit(&self) -> Decimal {
        self.profit - self.commission - self.swap
    }

    fn transition(&mut self, next: TradeStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                trade_id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Broker confirmed the fill
    pub fn mark_open(
        &mut self,
        ticket: u64,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.transition(TradeStatus::Open)?;
        self.broker_ticket = Some(ticket);
        self.entry_price = Some(price);
        self.opened_at = Some(at);
        Ok(())
    }

    /// Broker confirmed the exit
    pub fn mark_closed(&mut self, settlement: Settlement) -> Result<(), TransitionError> {
        self.transition(TradeStatus::Closed)?;
        self.exit_price = Some(settlement.exit_price);
        self.profit = settlement.profit;
        self.commission = settlement.commission;
        self.swap = settlement.swap;
        self.closed_at = Some(settlement.closed_at);
        Ok(())
    }

    /// Record that every post-close update was applied. Only CLOSED trades
    /// can be settled.
    pub fn mark_settled(&mut self, at: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status != TradeStatus::Closed {
            return Err(TransitionError {
                trade_id: self.id,
                from: self.status,
                to: TradeStatus::Closed,
            });
        }
        self.settled_at.get_or_insert(at);
        Ok(())
    }

    pub fn is_settled(&self) -> bool {
        self.settled_at.is_some()
    }

    /// Broker rejected the order or it could not be confirmed
    pub fn mark_rejected(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(TradeStatus::Rejected)?;
        self.reject_reason = Some(reason.into());
        Ok(())
    }
}

/// Why an attempted trade never reached the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptOutcome {
    RiskRejected,
    KillSwitch,
}

/// Audit entry for a trade that was attempted but not submitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub symbol: String,
    pub strategy: String,
    pub direction: Direction,
    pub requested_lots: Decimal,
    pub outcome: AttemptOutcome,
    pub reason: String,
    pub time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn settlement(profit: Decimal) -> Settlement {
        Settlement {
            exit_price: dec!(1.1050),
            profit,
            commission: dec!(0.50),
            swap: dec!(0.10),
            closed_at: Utc::now(),
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut trade = Trade::pending("EURUSD", Direction::Buy, dec!(0.01), "TREND_EURUSD", true);
        assert_eq!(trade.status(), TradeStatus::Pending);

        trade.mark_open(7, dec!(1.1000), Utc::now()).unwrap();
        assert_eq!(trade.status(), TradeStatus::Open);
        assert_eq!(trade.broker_ticket, Some(7));

        trade.mark_closed(settlement(dec!(5))).unwrap();
        assert_eq!(trade.status(), TradeStatus::Closed);
        assert_eq!(trade.net_profit(), dec!(4.40));
    }

    #[test]
    fn test_rejection_from_pending_only() {
        let mut trade = Trade::pending("EURUSD", Direction::Sell, dec!(0.01), "MR", false);
        trade.mark_open(1, dec!(1.1), Utc::now()).unwrap();

        let err = trade.mark_rejected("late").unwrap_err();
        assert_eq!(err.from, TradeStatus::Open);
        assert_eq!(err.to, TradeStatus::Rejected);
        assert_eq!(trade.status(), TradeStatus::Open);
    }

    #[test]
    fn test_no_backward_transitions() {
        for from in [
            TradeStatus::Open,
            TradeStatus::Closed,
            TradeStatus::Rejected,
        ] {
            assert!(!from.can_transition_to(TradeStatus::Pending));
        }
        assert!(!TradeStatus::Closed.can_transition_to(TradeStatus::Open));
        assert!(!TradeStatus::Rejected.can_transition_to(TradeStatus::Open));
        assert!(!TradeStatus::Pending.can_transition_to(TradeStatus::Closed));
    }

    #[test]
    fn test_closed_is_immutable() {
        let mut trade = Trade::pending("EURUSD", Direction::Buy, dec!(0.01), "MR", true);
        trade.mark_open(1, dec!(1.1), Utc::now()).unwrap();
        trade.mark_closed(settlement(dec!(1))).unwrap();
        assert!(trade.mark_closed(settlement(dec!(2))).is_err());
        assert_eq!(trade.profit, dec!(1));
    }

    #[test]
    fn test_settle_requires_closed() {
        let mut trade = Trade::pending("EURUSD", Direction::Buy, dec!(0.01), "MR", true);
        trade.mark_open(1, dec!(1.1), Utc::now()).unwrap();
        assert!(trade.mark_settled(Utc::now()).is_err());
        assert!(!trade.is_settled());

        trade.mark_closed(settlement(dec!(1))).unwrap();
        trade.mark_settled(Utc::now()).unwrap();
        assert!(trade.is_settled());
    }

    #[test]
    fn test_status_round_trips_through_json() {
        let mut trade = Trade::pending("XAUUSD", Direction::Buy, dec!(0.02), "BRK", true);
        trade.mark_open(3, dec!(2300), Utc::now()).unwrap();
        let json = serde_json::to_string(&trade).unwrap();
        assert!(json.contains("\"status\":\"OPEN\""));
        let back: Trade = serde_json::from_str(&json).unwrap();
        assert_eq!(back.status(), TradeStatus::Open);
    }
}
