//! Risk management module
//!
//! Pre-trade sizing and rejection, realized P&L accumulation and the kill
//! switch. All shared risk state lives in one persisted [`RiskState`].

mod calendar;
mod kill_switch;
mod sizing;
mod state;
mod types;

pub use calendar::{CalendarCheck, TradingCalendar};
pub use kill_switch::KillSwitch;
pub use sizing::LotSizer;
pub use state::RiskStateHandle;
pub use types::{
    CandidateOrder, KillSwitchFlag, KillSwitchStatus, PretradeDecision, RejectReason, RiskState,
    TripReason, SETTLED_MEMORY,
};

use crate::broker::AccountSnapshot;
use crate::config::{Config, SymbolConfig};
use crate::ledger::{Trade, TradeStatus};
use crate::store::StoreError;
use crate::strategy::StrategyRecord;
use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Risk errors
#[derive(Debug, Error)]
pub enum RiskError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("trade {0} is not closed")]
    NotClosed(crate::ledger::TradeId),
}

/// Pre-trade checks and post-trade accounting
pub struct RiskManager {
    state: RiskStateHandle,
    kill_switch: Arc<KillSwitch>,
    calendar: TradingCalendar,
    sizer: LotSizer,
    symbols: BTreeMap<String, SymbolConfig>,
    max_open_positions: usize,
}

impl RiskManager {
    pub fn new(config: &Config, state: RiskStateHandle, kill_switch: Arc<KillSwitch>) -> Self {
        Self {
            state,
            kill_switch,
            calendar: TradingCalendar::new(&config.calendar, &config.symbols),
            sizer: LotSizer::from_config(&config.risk, config.engine.mode),
            symbols: config.symbols.clone(),
            max_open_positions: config.risk.max_open_positions,
        }
    }

    pub fn kill_switch(&self) -> &Arc<KillSwitch> {
        &self.kill_switch
    }

    pub fn sizer(&self) -> &LotSizer {
        &self.sizer
    }

    /// Approve, resize or reject a candidate order
    pub async fn evaluate_pretrade(
        &self,
        candidate: &CandidateOrder,
        account: &AccountSnapshot,
        strategy: Option<&StrategyRecord>,
        open_positions: usize,
        now: DateTime<Utc>,
    ) -> Result<PretradeDecision, RiskError> {
        let decision = self
            .decide(candidate, account, strategy, open_positions, now)
            .await?;

        match &decision {
            PretradeDecision::Rejected(reason) => {
                tracing::warn!(
                    symbol = %candidate.symbol,
                    strategy = %candidate.strategy,
                    reason = %reason,
                    "Pre-trade rejection"
                );
                counter!("hydra_pretrade_rejections_total").increment(1);
            }
            PretradeDecision::Resized { requested, lots } => {
                tracing::debug!(
                    symbol = %candidate.symbol,
                    requested = %requested,
                    lots = %lots,
                    "Order resized"
                );
            }
            PretradeDecision::Approved { .. } => {}
        }
        Ok(decision)
    }

    async fn decide(
        &self,
        candidate: &CandidateOrder,
        account: &AccountSnapshot,
        strategy: Option<&StrategyRecord>,
        open_positions: usize,
        now: DateTime<Utc>,
    ) -> Result<PretradeDecision, RiskError> {
        if let Some(reason) = self.kill_switch.is_tripped().await? {
            return Ok(PretradeDecision::Rejected(
                RejectReason::KillSwitchTripped { reason },
            ));
        }

        match self.calendar.check(&candidate.symbol, now) {
            CalendarCheck::Open => {}
            CalendarCheck::UnknownSymbol => {
                return Ok(PretradeDecision::Rejected(RejectReason::UnknownSymbol))
            }
            CalendarCheck::WeekendGapRisk => {
                return Ok(PretradeDecision::Rejected(RejectReason::WeekendGapRisk))
            }
        }
        let Some(symbol) = self.symbols.get(&candidate.symbol) else {
            return Ok(PretradeDecision::Rejected(RejectReason::UnknownSymbol));
        };

        let allocation = match strategy {
            Some(s) if s.is_active() => s.allocation_pct,
            _ => return Ok(PretradeDecision::Rejected(RejectReason::StrategyInactive)),
        };
        if allocation <= Decimal::ZERO {
            return Ok(PretradeDecision::Rejected(RejectReason::NoAllocation));
        }

        if open_positions >= self.max_open_positions {
            return Ok(PretradeDecision::Rejected(RejectReason::MaxOpenPositions {
                open: open_positions,
                limit: self.max_open_positions,
            }));
        }

        let stop_distance = candidate.stop_distance();
        if stop_distance <= Decimal::ZERO {
            return Ok(PretradeDecision::Rejected(RejectReason::InvalidStop));
        }

        let lots = self.sizer.size(
            candidate.requested_lots,
            account.equity,
            allocation,
            stop_distance,
            symbol.contract_size,
        );
        if lots < self.sizer.min_lots() {
            return Ok(PretradeDecision::Rejected(RejectReason::BelowMinimumSize {
                lots,
                min_lots: self.sizer.min_lots(),
            }));
        }

        if lots < candidate.requested_lots {
            Ok(PretradeDecision::Resized {
                requested: candidate.requested_lots,
                lots,
            })
        } else {
            Ok(PretradeDecision::Approved { lots })
        }
    }

    /// Fold a settled trade into the realized P&L accumulators. Must run in
    /// the same cycle the trade closed. Returns false if already applied.
    pub async fn post_trade_update(&self, trade: &Trade) -> Result<bool, RiskError> {
        if trade.status() != TradeStatus::Closed {
            return Err(RiskError::NotClosed(trade.id));
        }
        let net = trade.net_profit();
        let at = trade.closed_at.unwrap_or_else(Utc::now);

        let (applied, daily) = self
            .state
            .update(|s| (s.apply_settlement(trade.id, net, at), s.daily_pnl))
            .await?;

        if applied {
            tracing::info!(
                trade_id = %trade.id,
                net = %net,
                daily_pnl = %daily,
                "Realized P&L recorded"
            );
            gauge!("hydra_daily_pnl").set(daily.to_f64().unwrap_or_default());
        } else {
            tracing::debug!(trade_id = %trade.id, "Settlement already recorded");
        }
        Ok(applied)
    }

    pub async fn state(&self) -> Result<RiskState, StoreError> {
        self.state.read().await
    }
}
