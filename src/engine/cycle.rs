//! One engine cycle

use super::protection::protective_levels;
use super::snapshot::{fetch_snapshots, SnapshotRequest};
use super::Engine;
use crate::brain::{Candidate, Decision, DecisionContext, ValidatedContext};
use crate::broker::{AccountSnapshot, OrderOutcome, OrderRequest};
use crate::bus::payload::{
    CycleSkipped, RegimeChanged, StrategyFailed, TradeClosed, TradeOpened, TradeRejected,
};
use crate::error::EngineError;
use crate::ledger::{
    AttemptOutcome, AttemptRecord, Direction, ReconcileReport, Settlement, Trade,
};
use crate::market::Quote;
use crate::retry::{with_retry, RetryError};
use crate::risk::{CandidateOrder, KillSwitchStatus, PretradeDecision, RejectReason};
use crate::strategy::strategy_id;
use crate::telemetry::{record_latency, set_gauge, GaugeMetric, LatencyMetric};
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::time::{Duration, Instant};

/// What one cycle did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub cycle: u64,
    pub closed: usize,
    /// Earlier closes whose post-close updates were completed this cycle
    pub recovered: usize,
    pub opened: usize,
    /// Submissions left PENDING after a broker error or timeout
    pub unconfirmed: usize,
    pub rejected: usize,
    /// Symbols skipped for an incomplete context or unusable stops
    pub skipped: usize,
    pub kill_switch_tripped: bool,
    pub reconciled: Option<ReconcileReport>,
}

fn transient<E: Display>(e: RetryError<E>) -> EngineError {
    EngineError::Transient(e.to_string())
}

impl Engine {
    fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.config.market.timeout_ms.max(1))
    }

    fn order_timeout(&self) -> Duration {
        Duration::from_secs(self.config.engine.order_timeout_secs.max(1))
    }

    /// Run one cycle. Settlement, reconciliation and the kill-switch check
    /// always run before any error is returned; new orders are only placed
    /// when all three succeeded.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, EngineError> {
        self.cycle += 1;
        let cycle = self.cycle;
        let started = Instant::now();
        let now = Utc::now();
        let mut report = CycleReport {
            cycle,
            ..Default::default()
        };
        counter!("hydra_cycles_total").increment(1);

        let snapshot_started = Instant::now();
        let round = {
            let request = SnapshotRequest {
                timeframe: &self.config.engine.candle_timeframe,
                candle_count: self.config.engine.candle_count,
                retry: &self.config.retry,
                timeout: self.io_timeout(),
                detector: &self.detector,
            };
            fetch_snapshots(&self.market, &self.symbols, &request).await
        };
        record_latency(LatencyMetric::Snapshot, snapshot_started.elapsed());

        let mut quotes: HashMap<String, Quote> = HashMap::new();
        for ctx in &round.contexts {
            if let Some(quote) = &ctx.quote {
                self.broker.on_quote(quote).await;
                quotes.insert(ctx.symbol.clone(), quote.clone());
            }
            self.track_regime(ctx);
        }

        let mut deferred: Option<EngineError> = None;
        if let Err(e) = self.settle(&quotes, &mut report).await {
            tracing::warn!(cycle, error = %e, "Settlement incomplete");
            deferred = Some(e);
        }

        if self.reconcile_due(now) {
            match self.reconciler.sweep(now).await {
                Ok(r) => report.reconciled = Some(r),
                Err(e) => {
                    tracing::warn!(cycle, error = %e, "Reconciliation sweep failed");
                    deferred.get_or_insert(e.into());
                }
            }
            self.last_reconcile = Some(now);
        }

        let account = match self.fetch_account().await {
            Ok(account) => {
                self.last_account = Some(account.clone());
                account
            }
            Err(e) => match self.last_account.clone() {
                Some(stale) => {
                    tracing::warn!(cycle, error = %e, "Account snapshot unavailable, using last known");
                    deferred.get_or_insert(e);
                    stale
                }
                None => return Err(e),
            },
        };

        // Exactly once per cycle, on every path that reaches here
        let status = self.kill_switch.check(&account).await?;
        report.kill_switch_tripped = matches!(status, KillSwitchStatus::Tripped(_));
        set_gauge(GaugeMetric::Equity, account.equity.to_f64().unwrap_or_default());
        set_gauge(GaugeMetric::Balance, account.balance.to_f64().unwrap_or_default());

        if let Some(e) = deferred {
            return Err(e);
        }
        if round.all_failed() {
            return Err(EngineError::Transient(
                "market data unavailable for every symbol".to_string(),
            ));
        }

        for ctx in round.contexts {
            self.trade_symbol(ctx, &account, now, &mut report).await?;
        }

        let open = self.ledger.open_trades().await?.len();
        let pending = self.ledger.pending_trades().await?.len();
        set_gauge(GaugeMetric::OpenTrades, open as f64);
        set_gauge(GaugeMetric::PendingTrades, pending as f64);
        record_latency(LatencyMetric::Cycle, started.elapsed());

        tracing::info!(
            cycle,
            opened = report.opened,
            closed = report.closed,
            rejected = report.rejected,
            skipped = report.skipped,
            open_trades = open,
            "Cycle finished"
        );
        Ok(report)
    }

    fn track_regime(&mut self, ctx: &DecisionContext) {
        let Some(regime) = ctx.regime else {
            return;
        };
        let previous = self.regimes.insert(ctx.symbol.clone(), regime);
        if previous != Some(regime) {
            tracing::info!(symbol = %ctx.symbol, from = ?previous, to = %regime, "Regime changed");
            self.bus.emit(&RegimeChanged {
                symbol: ctx.symbol.clone(),
                from: previous,
                to: regime,
            });
        }
    }

    fn reconcile_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_reconcile {
            None => true,
            Some(last) => {
                (now - last).num_seconds() >= self.config.engine.reconcile_interval_secs as i64
            }
        }
    }

    async fn fetch_account(&self) -> Result<AccountSnapshot, EngineError> {
        with_retry(&self.config.retry, "account_snapshot", self.io_timeout(), || {
            self.broker.get_account_snapshot()
        })
        .await
        .map_err(transient)
    }

    /// Finish closes left half-applied by an earlier cycle, then close every
    /// OPEN trade whose position the broker no longer holds
    async fn settle(
        &self,
        quotes: &HashMap<String, Quote>,
        report: &mut CycleReport,
    ) -> Result<(), EngineError> {
        for trade in self.ledger.unsettled_closed().await? {
            tracing::warn!(trade_id = %trade.id, "Completing post-close updates for closed trade");
            self.apply_close(&trade).await?;
            report.recovered += 1;
        }

        let open = self.ledger.open_trades().await?;
        if !open.is_empty() {
            let positions =
                with_retry(&self.config.retry, "open_positions", self.io_timeout(), || {
                    self.broker.get_open_positions()
                })
                .await
                .map_err(transient)?;
            let live: HashSet<u64> = positions.iter().map(|p| p.ticket).collect();

            for trade in open {
                let Some(ticket) = trade.broker_ticket else {
                    continue;
                };
                if live.contains(&ticket) {
                    continue;
                }
                let Some(settlement) = self.settlement_for(&trade, ticket, quotes).await? else {
                    tracing::warn!(
                        trade_id = %trade.id,
                        symbol = %trade.symbol,
                        "Position gone but no deal or price to settle it, retrying next cycle"
                    );
                    continue;
                };
                let trade = self.ledger.mark_closed(trade.id, settlement).await?;
                self.apply_close(&trade).await?;
                report.closed += 1;
            }
        }

        if report.closed + report.recovered > 0 {
            self.brain.maybe_rebalance().await?;
        }
        Ok(())
    }

    async fn settlement_for(
        &self,
        trade: &Trade,
        ticket: u64,
        quotes: &HashMap<String, Quote>,
    ) -> Result<Option<Settlement>, EngineError> {
        let deal = with_retry(&self.config.retry, "deal", self.io_timeout(), || {
            self.broker.get_deal(ticket)
        })
        .await
        .map_err(transient)?;

        if let Some(deal) = deal {
            return Ok(Some(Settlement {
                exit_price: deal.exit_price,
                profit: deal.profit,
                commission: deal.commission,
                swap: deal.swap,
                closed_at: deal.time,
            }));
        }

        let (Some(quote), Some(entry)) = (quotes.get(&trade.symbol), trade.entry_price) else {
            return Ok(None);
        };
        let exit = match trade.direction {
            Direction::Buy => quote.bid,
            Direction::Sell => quote.ask,
        };
        let contract = self
            .config
            .symbols
            .get(&trade.symbol)
            .map(|s| s.contract_size)
            .unwrap_or(Decimal::ONE);
        tracing::info!(trade_id = %trade.id, exit_price = %exit, "No deal record, settling at last quote");
        Ok(Some(Settlement {
            exit_price: exit,
            profit: (exit - entry) * trade.direction.sign() * trade.lots * contract,
            commission: Decimal::ZERO,
            swap: Decimal::ZERO,
            closed_at: quote.time,
        }))
    }

    /// Post-close pipeline for a CLOSED trade. Every step is idempotent and
    /// the trade is only marked settled once all of them succeeded, so a
    /// failure part way is completed by the next cycle. Realized P&L is
    /// folded into the risk accumulators before anything else reads them.
    async fn apply_close(&self, trade: &Trade) -> Result<(), EngineError> {
        with_retry(&self.config.retry, "post_trade_update", self.io_timeout(), || {
            self.risk.post_trade_update(trade)
        })
        .await
        .map_err(transient)?;

        self.brain.record_outcome(trade).await?;
        let key = self.brain.trade_key(trade);
        let closed_at = trade.closed_at.unwrap_or_else(Utc::now);
        self.book
            .record_close(&key, trade.id, trade.net_profit(), closed_at)
            .await?;
        let trade = self.ledger.mark_settled(trade.id, Utc::now()).await?;

        counter!("hydra_trades_closed_total").increment(1);
        self.bus.emit(&TradeClosed {
            trade_id: trade.id,
            symbol: trade.symbol.clone(),
            direction: trade.direction,
            lots: trade.lots,
            strategy: key,
            strategy_id: trade.strategy.clone(),
            entry_price: trade.entry_price,
            exit_price: trade.exit_price.unwrap_or_default(),
            profit: trade.profit,
            commission: trade.commission,
            swap: trade.swap,
            net_profit: trade.net_profit(),
            simulated: trade.simulated,
        });
        Ok(())
    }

    async fn trade_symbol(
        &self,
        ctx: DecisionContext,
        account: &AccountSnapshot,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> Result<(), EngineError> {
        let max_age = chrono::Duration::seconds(self.config.engine.max_quote_age_secs as i64);
        let validated = match ctx.validate(max_age, now) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(
                    cycle = self.cycle,
                    symbol = %e.symbol,
                    missing = ?e.missing,
                    "Decision context incomplete, symbol skipped"
                );
                counter!("hydra_cycle_skips_total").increment(1);
                self.bus.emit(&CycleSkipped {
                    cycle: self.cycle,
                    symbol: Some(e.symbol.clone()),
                    reason: "incomplete decision context".to_string(),
                    missing: e.missing,
                });
                report.skipped += 1;
                return Ok(());
            }
        };

        let open = self.ledger.open_trades().await?;
        let pending = self.ledger.pending_trades().await?;
        let busy: HashSet<&str> = open
            .iter()
            .chain(pending.iter())
            .filter(|t| t.symbol == validated.symbol())
            .map(|t| t.strategy.as_str())
            .collect();

        let candidates = self.collect_candidates(&validated, &busy);
        let Some(decision) = self.brain.decide(&validated, candidates).await? else {
            return Ok(());
        };
        self.place(
            &validated,
            decision,
            account,
            open.len() + pending.len(),
            now,
            report,
        )
        .await
    }

    fn collect_candidates(&self, ctx: &ValidatedContext, busy: &HashSet<&str>) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        for strategy in &self.strategies {
            let id = strategy_id(ctx.symbol(), strategy.code());
            if busy.contains(id.as_str()) {
                continue;
            }
            match strategy.evaluate(ctx) {
                Ok(Some(signal)) => candidates.push(Candidate {
                    strategy_id: id,
                    signal,
                }),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(strategy = strategy.code(), symbol = ctx.symbol(), error = %e, "Strategy failed");
                    counter!("hydra_strategy_errors_total").increment(1);
                    self.bus.emit(&StrategyFailed {
                        strategy: strategy.code().to_string(),
                        symbol: ctx.symbol().to_string(),
                        error: e.message,
                    });
                }
            }
        }
        candidates
    }

    async fn place(
        &self,
        ctx: &ValidatedContext,
        decision: Decision,
        account: &AccountSnapshot,
        open_positions: usize,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> Result<(), EngineError> {
        let symbol = ctx.symbol();
        let Some(symbol_cfg) = self.config.symbols.get(symbol) else {
            return Ok(());
        };
        let direction = decision.action;
        let entry = if decision.signal.entry > Decimal::ZERO {
            decision.signal.entry
        } else {
            match direction {
                Direction::Buy => ctx.quote().ask,
                Direction::Sell => ctx.quote().bid,
            }
        };

        let Some((stop_loss, take_profit)) = protective_levels(
            direction,
            entry,
            decision.signal.stop_loss,
            decision.signal.take_profit,
            ctx.atr(),
            symbol_cfg,
        ) else {
            tracing::warn!(symbol, strategy = %decision.strategy, "No usable stop-loss, signal skipped");
            report.skipped += 1;
            return Ok(());
        };

        let candidate = CandidateOrder {
            symbol: symbol.to_string(),
            strategy: decision.learning_key.clone(),
            direction,
            requested_lots: decision
                .signal
                .lots
                .filter(|l| *l > Decimal::ZERO)
                .unwrap_or(symbol_cfg.lot_size),
            entry,
            stop_loss,
        };
        let record = self.book.get(&decision.learning_key).await?;
        let verdict = self
            .risk
            .evaluate_pretrade(&candidate, account, record.as_ref(), open_positions, now)
            .await?;

        let lots = match verdict {
            PretradeDecision::Approved { lots } | PretradeDecision::Resized { lots, .. } => lots,
            PretradeDecision::Rejected(reason) => {
                self.record_rejection(&candidate, &reason, now).await?;
                report.rejected += 1;
                return Ok(());
            }
        };

        let trade = Trade::pending(
            symbol,
            direction,
            lots,
            decision.strategy.clone(),
            self.broker.is_simulated(),
        )
        .with_strategy_code(decision.learning_key.clone())
        .with_protection(stop_loss, take_profit)
        .with_regime(ctx.regime())
        .with_entry_price(entry);
        let trade = self.ledger.create_pending(trade).await?;

        let order = OrderRequest {
            client_id: trade.id,
            symbol: symbol.to_string(),
            direction,
            lots,
            stop_loss,
            take_profit,
        };
        let submitted = Instant::now();
        let outcome = tokio::time::timeout(self.order_timeout(), self.broker.submit_order(&order)).await;
        record_latency(LatencyMetric::OrderSubmission, submitted.elapsed());

        match outcome {
            Ok(Ok(OrderOutcome::Ack(ack))) => {
                let trade = self
                    .ledger
                    .mark_open(trade.id, ack.ticket, ack.price, ack.time)
                    .await?;
                counter!("hydra_trades_opened_total").increment(1);
                self.bus.emit(&TradeOpened {
                    trade_id: trade.id,
                    symbol: trade.symbol.clone(),
                    direction,
                    lots,
                    entry_price: ack.price,
                    stop_loss: trade.stop_loss,
                    take_profit: trade.take_profit,
                    strategy: decision.learning_key,
                    strategy_id: trade.strategy.clone(),
                    ticket: ack.ticket,
                    simulated: trade.simulated,
                });
                report.opened += 1;
            }
            Ok(Ok(OrderOutcome::Reject { reason })) => {
                self.ledger.mark_rejected(trade.id, &reason).await?;
                counter!("hydra_broker_rejections_total").increment(1);
                self.bus.emit(&TradeRejected {
                    trade_id: Some(trade.id),
                    symbol: symbol.to_string(),
                    strategy: decision.learning_key,
                    direction,
                    requested_lots: lots,
                    reason,
                });
                report.rejected += 1;
            }
            Ok(Err(e)) => {
                tracing::warn!(trade_id = %trade.id, error = %e, "Order submission failed, trade left PENDING for reconciliation");
                report.unconfirmed += 1;
            }
            Err(_) => {
                tracing::warn!(
                    trade_id = %trade.id,
                    timeout_secs = self.config.engine.order_timeout_secs,
                    "Order acknowledgment timed out, trade left PENDING for reconciliation"
                );
                report.unconfirmed += 1;
            }
        }
        Ok(())
    }

    async fn record_rejection(
        &self,
        candidate: &CandidateOrder,
        reason: &RejectReason,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let outcome = if reason.is_kill_switch() {
            AttemptOutcome::KillSwitch
        } else {
            AttemptOutcome::RiskRejected
        };
        self.ledger
            .record_attempt(&AttemptRecord {
                symbol: candidate.symbol.clone(),
                strategy: candidate.strategy.clone(),
                direction: candidate.direction,
                requested_lots: candidate.requested_lots,
                outcome,
                reason: reason.to_string(),
                time: now,
            })
            .await?;
        self.bus.emit(&TradeRejected {
            trade_id: None,
            symbol: candidate.symbol.clone(),
            strategy: candidate.strategy.clone(),
            direction: candidate.direction,
            requested_lots: candidate.requested_lots,
            reason: reason.to_string(),
        });
        Ok(())
    }
}
