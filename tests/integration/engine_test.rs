//! Engine cycle integration tests

mod support;

use async_trait::async_trait;
use hydra_engine::broker::{
    AccountSnapshot, BrokerAdapter, BrokerError, Deal, OrderOutcome, OrderRequest, Position,
    ShadowBroker,
};
use hydra_engine::bus::payload::CycleSkipped;
use hydra_engine::bus::{EventBus, EventName};
use hydra_engine::engine::{Engine, EngineParts};
use hydra_engine::ledger::TradeStatus;
use hydra_engine::market::{MarketData, Quote};
use hydra_engine::store::Store;
use hydra_engine::strategy::{Strategy, StrategyRecord};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use support::*;
use tokio::sync::watch;

struct Harness {
    engine: Engine,
    store: Arc<RecordingStore>,
    shadow: ShadowBroker,
    market: Arc<ScriptedMarket>,
    bus: EventBus,
}

fn harness_with(
    broker: Option<Arc<dyn BrokerAdapter>>,
    strategies: Vec<Arc<dyn Strategy>>,
) -> Harness {
    let config = test_config();
    let store = Arc::new(RecordingStore::new());
    let shadow = ShadowBroker::new(dec!(10000), contract_sizes(&config));
    let market = Arc::new(ScriptedMarket::new(dec!(1.1000)));
    let bus = EventBus::local("engine-test");
    let broker = broker.unwrap_or_else(|| Arc::new(shadow.clone()) as Arc<dyn BrokerAdapter>);

    let engine = Engine::new(EngineParts {
        config,
        store: store.clone(),
        broker,
        market: market.clone() as Arc<dyn MarketData>,
        bus: bus.clone(),
        strategies,
    })
    .with_seed(7);

    Harness {
        engine,
        store,
        shadow,
        market,
        bus,
    }
}

fn trend_strategy() -> Arc<dyn Strategy> {
    Arc::new(FixedStrategy::new("TREND", dec!(1.0950), dec!(1.1100)))
}

fn valid_history(history: &[TradeStatus]) -> bool {
    let open_path = [TradeStatus::Pending, TradeStatus::Open, TradeStatus::Closed];
    let reject_path = [TradeStatus::Pending, TradeStatus::Rejected];
    history.len() <= open_path.len() && history == &open_path[..history.len()]
        || history.len() <= reject_path.len() && history == &reject_path[..history.len()]
}

#[tokio::test]
async fn test_trade_opens_and_settles_once() {
    let mut h = harness_with(None, vec![trend_strategy()]);
    let opened = capture(&h.bus, EventName::TradeOpened);
    let closed = capture(&h.bus, EventName::TradeClosed);
    h.engine.register_strategies().await.unwrap();

    let report = h.engine.run_cycle().await.unwrap();
    assert_eq!(report.opened, 1);
    let open = h.engine.ledger().open_trades().await.unwrap();
    assert_eq!(open.len(), 1);
    let trade = open[0].clone();
    assert_eq!(trade.strategy, "EURUSD_TREND");
    assert!(trade.simulated);
    assert_eq!(trade.lots, dec!(0.01));
    assert_eq!(opened.lock().unwrap()[0].payload["strategy"], "TREND");

    // Quote through the target closes the shadow position at the target
    h.market.set_bid(dec!(1.1150));
    let report = h.engine.run_cycle().await.unwrap();
    assert_eq!(report.closed, 1);

    let settled = h.engine.ledger().get(trade.id).await.unwrap();
    assert_eq!(settled.status(), TradeStatus::Closed);
    assert!(settled.is_settled());
    assert_eq!(settled.strategy_code.as_deref(), Some("TREND"));
    assert_eq!(settled.exit_price, Some(dec!(1.1100)));
    assert_eq!(settled.net_profit(), dec!(9.8));
    assert_eq!(
        h.store.history(trade.id),
        vec![TradeStatus::Pending, TradeStatus::Open, TradeStatus::Closed]
    );

    let event = closed.lock().unwrap()[0].clone();
    assert_eq!(event.payload["strategy"], "TREND");
    assert_eq!(event.payload["strategy_id"], "EURUSD_TREND");

    let state = h.engine.risk().state().await.unwrap();
    assert_eq!(state.daily_pnl, dec!(9.8));

    // A second application of the same settlement is ignored
    assert!(!h.engine.risk().post_trade_update(&settled).await.unwrap());
    assert_eq!(h.engine.risk().state().await.unwrap().daily_pnl, dec!(9.8));

    let learning = h.engine.brain().learning_records().await.unwrap();
    assert_eq!(learning.len(), 1);
    assert_eq!(learning[0].strategy, "TREND");
    assert_eq!(learning[0].trades, 1);

    for history in h.store.all_histories() {
        assert!(valid_history(&history), "unexpected history {history:?}");
    }
}

#[tokio::test]
async fn test_failed_post_close_update_is_completed_next_cycle() {
    let mut h = harness_with(None, vec![trend_strategy()]);
    let closed = capture(&h.bus, EventName::TradeClosed);
    h.engine.register_strategies().await.unwrap();

    h.engine.run_cycle().await.unwrap();
    let trade = h.engine.ledger().open_trades().await.unwrap()[0].clone();

    h.store.refuse_risk_writes(true);
    h.market.set_bid(dec!(1.1150));
    assert!(h.engine.run_cycle().await.is_err());

    let stuck = h.engine.ledger().get(trade.id).await.unwrap();
    assert_eq!(stuck.status(), TradeStatus::Closed);
    assert!(!stuck.is_settled());
    assert_eq!(h.engine.risk().state().await.unwrap().daily_pnl, Decimal::ZERO);
    assert!(h.engine.brain().learning_records().await.unwrap().is_empty());
    assert!(closed.lock().unwrap().is_empty());

    h.store.refuse_risk_writes(false);
    let report = h.engine.run_cycle().await.unwrap();
    assert_eq!(report.recovered, 1);
    assert_eq!(report.closed, 0);

    for _ in 0..2 {
        let report = h.engine.run_cycle().await.unwrap();
        assert_eq!(report.recovered, 0);
    }

    assert!(h.engine.ledger().get(trade.id).await.unwrap().is_settled());
    assert_eq!(h.engine.risk().state().await.unwrap().daily_pnl, dec!(9.8));
    let learning = h.engine.brain().learning_records().await.unwrap();
    assert_eq!(learning.len(), 1);
    assert_eq!(learning[0].trades, 1);
    let record = h.store.load_strategy("TREND").await.unwrap().unwrap();
    assert_eq!(record.trades, 1);
    assert_eq!(record.gross_profit, dec!(9.8));
    assert_eq!(closed.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_simulated_position_survives_until_closed() {
    let mut h = harness_with(None, vec![trend_strategy()]);
    h.engine.register_strategies().await.unwrap();

    h.engine.run_cycle().await.unwrap();
    for _ in 0..3 {
        let report = h.engine.run_cycle().await.unwrap();
        assert_eq!(report.closed, 0);
        // Strategy already holds the symbol, nothing new is placed
        assert_eq!(report.opened, 0);
        assert_eq!(h.shadow.get_open_positions().await.unwrap().len(), 1);
        assert_eq!(h.engine.ledger().open_trades().await.unwrap().len(), 1);
    }

    let ticket = h.shadow.get_open_positions().await.unwrap()[0].ticket;
    h.shadow.close_position(ticket, dec!(1.0990)).await.unwrap();
    let report = h.engine.run_cycle().await.unwrap();
    assert_eq!(report.closed, 1);

    let closed: Vec<_> = h
        .store
        .trades()
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.status() == TradeStatus::Closed)
        .collect();
    assert_eq!(closed.len(), 1);
    assert!(closed[0].net_profit() < Decimal::ZERO);
}

/// Fills on the shadow registry but never acknowledges in time
struct SilentBroker {
    inner: ShadowBroker,
}

#[async_trait]
impl BrokerAdapter for SilentBroker {
    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderOutcome, BrokerError> {
        let outcome = self.inner.submit_order(order).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        outcome
    }

    async fn get_open_positions(&self) -> Result<Vec<Position>, BrokerError> {
        self.inner.get_open_positions().await
    }

    async fn get_account_snapshot(&self) -> Result<AccountSnapshot, BrokerError> {
        self.inner.get_account_snapshot().await
    }

    async fn get_deal(&self, ticket: u64) -> Result<Option<Deal>, BrokerError> {
        self.inner.get_deal(ticket).await
    }

    async fn on_quote(&self, quote: &Quote) {
        self.inner.on_quote(quote).await
    }

    fn is_simulated(&self) -> bool {
        true
    }
}

#[tokio::test]
async fn test_unacknowledged_order_is_reconciled() {
    let config = test_config();
    let shadow = ShadowBroker::new(dec!(10000), contract_sizes(&config));
    let broker = Arc::new(SilentBroker {
        inner: shadow.clone(),
    });
    let mut h = harness_with(Some(broker as Arc<dyn BrokerAdapter>), vec![trend_strategy()]);
    h.engine.register_strategies().await.unwrap();
    let reconciled = capture(&h.bus, EventName::TradeReconciled);

    let report = h.engine.run_cycle().await.unwrap();
    assert_eq!(report.opened, 0);
    assert_eq!(report.unconfirmed, 1);
    let pending = h.engine.ledger().pending_trades().await.unwrap();
    assert_eq!(pending.len(), 1);
    let id = pending[0].id;

    let report = h.engine.run_cycle().await.unwrap();
    assert_eq!(report.reconciled.map(|r| r.opened), Some(1));
    // The reconciled trade occupies the strategy, no duplicate order
    assert_eq!(report.unconfirmed, 0);

    let trade = h.engine.ledger().get(id).await.unwrap();
    assert_eq!(trade.status(), TradeStatus::Open);
    assert_eq!(trade.broker_ticket, Some(1));
    assert_eq!(h.store.history(id), vec![TradeStatus::Pending, TradeStatus::Open]);
    assert_eq!(reconciled.lock().unwrap().len(), 1);
}

/// Refuses every order
struct RejectingBroker {
    inner: ShadowBroker,
}

#[async_trait]
impl BrokerAdapter for RejectingBroker {
    async fn submit_order(&self, _order: &OrderRequest) -> Result<OrderOutcome, BrokerError> {
        Ok(OrderOutcome::Reject {
            reason: "market closed".into(),
        })
    }

    async fn get_open_positions(&self) -> Result<Vec<Position>, BrokerError> {
        self.inner.get_open_positions().await
    }

    async fn get_account_snapshot(&self) -> Result<AccountSnapshot, BrokerError> {
        self.inner.get_account_snapshot().await
    }

    async fn get_deal(&self, ticket: u64) -> Result<Option<Deal>, BrokerError> {
        self.inner.get_deal(ticket).await
    }
}

#[tokio::test]
async fn test_broker_rejection_is_terminal() {
    let config = test_config();
    let broker = Arc::new(RejectingBroker {
        inner: ShadowBroker::new(dec!(10000), contract_sizes(&config)),
    });
    let mut h = harness_with(Some(broker as Arc<dyn BrokerAdapter>), vec![trend_strategy()]);
    h.engine.register_strategies().await.unwrap();
    let rejected = capture(&h.bus, EventName::TradeRejected);

    let report = h.engine.run_cycle().await.unwrap();
    assert_eq!(report.rejected, 1);

    let trades = h.store.trades().await.unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].status(), TradeStatus::Rejected);
    assert_eq!(trades[0].reject_reason.as_deref(), Some("market closed"));
    assert_eq!(
        h.store.history(trades[0].id),
        vec![TradeStatus::Pending, TradeStatus::Rejected]
    );
    assert_eq!(
        rejected.lock().unwrap()[0].payload["trade_id"],
        serde_json::json!(trades[0].id)
    );
}

#[tokio::test]
async fn test_market_outage_is_transient_after_kill_switch_check() {
    let mut h = harness_with(None, vec![trend_strategy()]);
    h.engine.register_strategies().await.unwrap();
    h.market.set_down(true);

    let err = h.engine.run_cycle().await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(h.engine.kill_switch().check_count(), 1);
    assert!(h.store.trades().await.unwrap().is_empty());

    h.market.set_down(false);
    let report = h.engine.run_cycle().await.unwrap();
    assert_eq!(report.opened, 1);
    assert_eq!(h.engine.kill_switch().check_count(), 2);
}

#[tokio::test]
async fn test_incomplete_context_skips_symbol() {
    let strategy = Arc::new(FixedStrategy::new("TREND", dec!(1.0950), dec!(1.1100)));
    let mut h = harness_with(None, vec![strategy.clone() as Arc<dyn Strategy>]);
    h.engine.register_strategies().await.unwrap();
    let skipped = capture(&h.bus, EventName::CycleSkipped);
    h.market.limit_candles(10);

    let report = h.engine.run_cycle().await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.opened, 0);
    assert_eq!(strategy.evaluations.load(Ordering::SeqCst), 0);
    assert_eq!(h.engine.kill_switch().check_count(), 1);

    let event: CycleSkipped = skipped.lock().unwrap()[0].decode().unwrap();
    assert_eq!(event.symbol.as_deref(), Some("EURUSD"));
    assert!(event.missing.contains(&"rsi".to_string()));
    assert!(event.missing.contains(&"regime".to_string()));
}

#[tokio::test]
async fn test_strategy_failure_is_isolated() {
    let mut h = harness_with(None, vec![Arc::new(FailingStrategy) as Arc<dyn Strategy>, trend_strategy()]);
    h.engine.register_strategies().await.unwrap();
    let failures = capture(&h.bus, EventName::StrategyError);

    let report = h.engine.run_cycle().await.unwrap();
    assert_eq!(report.opened, 1);
    let failures = failures.lock().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].payload["strategy"], "BROKEN");
}

#[tokio::test]
async fn test_new_strategies_share_allocation() {
    let h = harness_with(
        None,
        vec![
            Arc::new(FixedStrategy::new("A", dec!(1.09), dec!(1.11))) as Arc<dyn Strategy>,
            Arc::new(FixedStrategy::new("B", dec!(1.09), dec!(1.11))),
        ],
    );
    h.engine.register_strategies().await.unwrap();
    let records = h.store.strategies().await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.allocation_pct == dec!(50)));
}

#[tokio::test]
async fn test_registration_respects_existing_active_allocation() {
    let h = harness_with(
        None,
        vec![
            Arc::new(FixedStrategy::new("A", dec!(1.09), dec!(1.11))) as Arc<dyn Strategy>,
            Arc::new(FixedStrategy::new("B", dec!(1.09), dec!(1.11))),
        ],
    );
    h.store
        .save_strategies(&[StrategyRecord::new("A", dec!(70))])
        .await
        .unwrap();
    h.engine.register_strategies().await.unwrap();

    let records = h.store.strategies().await.unwrap();
    let active: Decimal = records
        .iter()
        .filter(|r| r.is_active())
        .map(|r| r.allocation_pct)
        .sum();
    assert!(active <= dec!(100), "active allocation {active}");
    let b = h.store.load_strategy("B").await.unwrap().unwrap();
    assert_eq!(b.allocation_pct, dec!(30));
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let mut h = harness_with(None, vec![trend_strategy()]);
    let started = capture(&h.bus, EventName::EngineStarted);
    let stopped = capture(&h.bus, EventName::EngineStopped);

    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        let _ = tx.send(true);
    });
    let summary = tokio::time::timeout(Duration::from_secs(5), h.engine.run(rx))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(summary.cycles, 1);
    assert_eq!(summary.pending_trades, 0);
    assert_eq!(started.lock().unwrap().len(), 1);
    assert_eq!(stopped.lock().unwrap()[0].payload["cycles"], 1);
}
