//! Shadow registry: simulated positions for dry-run mode

use super::{
    AccountSnapshot, BrokerAdapter, BrokerError, Deal, OrderAck, OrderOutcome, OrderRequest,
    Position,
};
use crate::ledger::Direction;
use crate::market::Quote;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

struct ShadowState {
    balance: Decimal,
    positions: BTreeMap<u64, Position>,
    deals: HashMap<u64, Deal>,
    quotes: HashMap<String, Quote>,
    next_ticket: u64,
}

/// Simulated broker. Positions stay open until closed by a stop/target hit
/// on a later quote or by [`ShadowBroker::close_position`].
#[derive(Clone)]
pub struct ShadowBroker {
    contract_sizes: HashMap<String, Decimal>,
    commission_per_lot: Decimal,
    state: Arc<RwLock<ShadowState>>,
}

impl ShadowBroker {
    pub fn new(balance: Decimal, contract_sizes: HashMap<String, Decimal>) -> Self {
        Self {
            contract_sizes,
            commission_per_lot: Decimal::ZERO,
            state: Arc::new(RwLock::new(ShadowState {
                balance,
                positions: BTreeMap::new(),
                deals: HashMap::new(),
                quotes: HashMap::new(),
                next_ticket: 1,
            })),
        }
    }

    pub fn with_commission_per_lot(mut self, commission: Decimal) -> Self {
        self.commission_per_lot = commission;
        self
    }

    fn contract_size(&self, symbol: &str) -> Decimal {
        self.contract_sizes
            .get(symbol)
            .copied()
            .unwrap_or(Decimal::ONE)
    }

    fn pnl(&self, position: &Position, price: Decimal) -> Decimal {
        (price - position.open_price)
            * position.direction.sign()
            * position.lots
            * self.contract_size(&position.symbol)
    }

    /// Close a simulated position at `price`
    pub async fn close_position(&self, ticket: u64, price: Decimal) -> Option<Deal> {
        let mut state = self.state.write().await;
        self.close_locked(&mut state, ticket, price, Utc::now())
    }

    fn close_locked(
        &self,
        state: &mut ShadowState,
        ticket: u64,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> Option<Deal> {
        let position = state.positions.remove(&ticket)?;
        let profit = self.pnl(&position, price);
        let commission = self.commission_per_lot * position.lots;
        state.balance += profit - commission;

        let deal = Deal {
            ticket,
            exit_price: price,
            profit,
            commission,
            swap: Decimal::ZERO,
            time: at,
        };
        state.deals.insert(ticket, deal.clone());
        tracing::info!(
            ticket,
            symbol = %position.symbol,
            exit_price = %price,
            profit = %profit,
            "Shadow position closed"
        );
        Some(deal)
    }

    pub async fn balance(&self) -> Decimal {
        self.state.read().await.balance
    }
}

fn exit_price(direction: Direction, quote: &Quote) -> Decimal {
    match direction {
        Direction::Buy => quote.bid,
        Direction::Sell => quote.ask,
    }
}

/// Stop or target level crossed by `price`, if any
fn triggered_level(position: &Position, price: Decimal) -> Option<Decimal> {
    match position.direction {
        Direction::Buy if price <= position.stop_loss => Some(position.stop_loss),
        Direction::Buy if price >= position.take_profit => Some(position.take_profit),
        Direction::Sell if price >= position.stop_loss => Some(position.stop_loss),
        Direction::Sell if price <= position.take_profit => Some(position.take_profit),
        _ => None,
    }
}

#[async_trait]
impl BrokerAdapter for ShadowBroker {
    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderOutcome, BrokerError> {
        let mut state = self.state.write().await;
        let Some(quote) = state.quotes.get(&order.symbol).cloned() else {
            return Ok(OrderOutcome::Reject {
                reason: format!("no price for {}", order.symbol),
            });
        };

        let price = match order.direction {
            Direction::Buy => quote.ask,
            Direction::Sell => quote.bid,
        };
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        let now = Utc::now();

        state.positions.insert(
            ticket,
            Position {
                ticket,
                client_id: Some(order.client_id),
                symbol: order.symbol.clone(),
                direction: order.direction,
                lots: order.lots,
                open_price: price,
                stop_loss: order.stop_loss,
                take_profit: order.take_profit,
                opened_at: now,
                profit: Decimal::ZERO,
            },
        );

        tracing::info!(ticket, symbol = %order.symbol, price = %price, "Shadow order filled");
        Ok(OrderOutcome::Ack(OrderAck {
            ticket,
            price,
            time: now,
        }))
    }

    async fn get_open_positions(&self) -> Result<Vec<Position>, BrokerError> {
        Ok(self.state.read().await.positions.values().cloned().collect())
    }

    async fn get_account_snapshot(&self) -> Result<AccountSnapshot, BrokerError> {
        let state = self.state.read().await;
        let unrealized: Decimal = state.positions.values().map(|p| p.profit).sum();
        Ok(AccountSnapshot::new(state.balance, state.balance + unrealized))
    }

    async fn get_deal(&self, ticket: u64) -> Result<Option<Deal>, BrokerError> {
        Ok(self.state.read().await.deals.get(&ticket).cloned())
    }

    async fn on_quote(&self, quote: &Quote) {
        let mut state = self.state.write().await;
        state.quotes.insert(quote.symbol.clone(), quote.clone());

        let mut to_close = Vec::new();
        for position in state.positions.values_mut() {
            if position.symbol != quote.symbol {
                continue;
            }
            let price = exit_price(position.direction, quote);
            match triggered_level(position, price) {
                Some(level) => to_close.push((position.ticket, level)),
                None => {
                    position.profit = (price - position.open_price)
                        * position.direction.sign()
                        * position.lots
                        * self.contract_size(&position.symbol);
                }
            }
        }

        for (ticket, level) in to_close {
            self.close_locked(&mut state, ticket, level, quote.time);
        }
    }

    fn is_simulated(&self) -> bool {
        true
    }
}
