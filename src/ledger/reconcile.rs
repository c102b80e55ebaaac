//! Reconciliation sweep for trades stuck in PENDING

use super::{LedgerError, Trade, TradeLedger, TradeStatus};
use crate::broker::{BrokerAdapter, Position};
use crate::bus::payload::TradeReconciled;
use crate::bus::EventBus;
use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use std::collections::HashSet;
use std::sync::Arc;

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub opened: usize,
    pub rejected: usize,
    /// Left PENDING because the broker could not be queried
    pub deferred: usize,
}

/// Resolves PENDING trades older than a timeout against the broker's positions
pub struct Reconciler {
    ledger: TradeLedger,
    broker: Arc<dyn BrokerAdapter>,
    bus: EventBus,
    pending_timeout: Duration,
}

impl Reconciler {
    pub fn new(
        ledger: TradeLedger,
        broker: Arc<dyn BrokerAdapter>,
        bus: EventBus,
        pending_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            broker,
            bus,
            pending_timeout,
        }
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<ReconcileReport, LedgerError> {
        let stale = self.ledger.stale_pending(now - self.pending_timeout).await?;
        if stale.is_empty() {
            return Ok(ReconcileReport::default());
        }

        let positions = match self.broker.get_open_positions().await {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    pending = stale.len(),
                    "Reconciliation deferred, broker positions unavailable"
                );
                return Ok(ReconcileReport {
                    deferred: stale.len(),
                    ..Default::default()
                });
            }
        };

        let mut claimed: HashSet<u64> = self
            .ledger
            .open_trades()
            .await?
            .iter()
            .filter_map(|t| t.broker_ticket)
            .collect();

        let mut report = ReconcileReport::default();
        for trade in stale {
            match find_position(&trade, &positions, &claimed) {
                Some(position) => {
                    claimed.insert(position.ticket);
                    self.ledger
                        .mark_open(trade.id, position.ticket, position.open_price, position.opened_at)
                        .await?;
                    report.opened += 1;
                    self.announce(&trade, TradeStatus::Open, Some(position.ticket));
                }
                None => {
                    let reason = format!(
                        "no matching broker position after {}s",
                        self.pending_timeout.num_seconds()
                    );
                    self.ledger.mark_rejected(trade.id, &reason).await?;
                    report.rejected += 1;
                    self.announce(&trade, TradeStatus::Rejected, None);
                }
            }
        }

        tracing::info!(
            opened = report.opened,
            rejected = report.rejected,
            "Reconciliation sweep resolved pending trades"
        );
        Ok(report)
    }

    fn announce(&self, trade: &Trade, resolved_to: TradeStatus, ticket: Option<u64>) {
        counter!("hydra_trades_reconciled_total", "resolved_to" => resolved_to.to_string())
            .increment(1);
        self.bus.emit(&TradeReconciled {
            trade_id: trade.id,
            symbol: trade.symbol.clone(),
            resolved_to,
            ticket,
        });
    }
}

/// Match by client id first, then by shape among unclaimed positions
fn find_position<'a>(
    trade: &Trade,
    positions: &'a [Position],
    claimed: &HashSet<u64>,
) -> Option<&'a Position> {
    positions
        .iter()
        .find(|p| p.client_id == Some(trade.id))
        .or_else(|| {
            positions.iter().find(|p| {
                p.client_id.is_none()
                    && !claimed.contains(&p.ticket)
                    && p.symbol == trade.symbol
                    && p.direction == trade.direction
                    && p.lots == trade.lots
            })
        })
}
