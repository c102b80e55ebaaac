//! Risk gate, kill switch and reset integration tests

mod support;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use hydra_engine::broker::{AccountSnapshot, BrokerAdapter, ShadowBroker};
use hydra_engine::bus::payload::{KillSwitchResetRequested, KillSwitchTripRequested};
use hydra_engine::bus::{EventBus, EventName};
use hydra_engine::engine::{Engine, EngineParts};
use hydra_engine::ledger::{AttemptOutcome, Direction, Settlement, Trade};
use hydra_engine::market::MarketData;
use hydra_engine::risk::{
    CandidateOrder, KillSwitch, KillSwitchStatus, PretradeDecision, RejectReason, RiskManager,
    RiskStateHandle, TripReason,
};
use hydra_engine::store::{JsonStore, MemoryStore, Store};
use hydra_engine::strategy::{Strategy, StrategyRecord};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use support::*;
use tokio_test::{assert_err, assert_ok};

fn risk_manager(store: Arc<dyn Store>, bus: EventBus) -> (RiskManager, Arc<KillSwitch>) {
    let config = test_config();
    let state = RiskStateHandle::new(store);
    let kill_switch = Arc::new(KillSwitch::new(
        state.clone(),
        config.kill_switch.clone(),
        bus,
    ));
    (RiskManager::new(&config, state, kill_switch.clone()), kill_switch)
}

fn candidate(symbol: &str) -> CandidateOrder {
    CandidateOrder {
        symbol: symbol.to_string(),
        strategy: "TREND".to_string(),
        direction: Direction::Buy,
        requested_lots: dec!(0.01),
        entry: dec!(1.1000),
        stop_loss: dec!(1.0950),
    }
}

fn closed_trade(net: Decimal) -> Trade {
    closed_trade_at(net, Utc::now())
}

fn closed_trade_at(net: Decimal, closed_at: DateTime<Utc>) -> Trade {
    let mut trade = Trade::pending("EURUSD", Direction::Buy, dec!(0.1), "EURUSD_TREND", true);
    trade.mark_open(1, dec!(1.1000), Utc::now()).unwrap();
    trade
        .mark_closed(Settlement {
            exit_price: dec!(1.1000),
            profit: net,
            commission: Decimal::ZERO,
            swap: Decimal::ZERO,
            closed_at,
        })
        .unwrap();
    trade
}

#[tokio::test]
async fn test_drawdown_trip_blocks_until_reset() {
    let bus = EventBus::local("safety-test");
    let tripped = capture(&bus, EventName::KillSwitchTripped);
    let reset = capture(&bus, EventName::KillSwitchReset);
    let (risk, kill_switch) = risk_manager(Arc::new(MemoryStore::new()), bus);
    let strategy = StrategyRecord::new("TREND", dec!(100));
    let now = Utc::now();

    let healthy = AccountSnapshot::new(dec!(10000), dec!(10000));
    assert_eq!(kill_switch.check(&healthy).await.unwrap(), KillSwitchStatus::Ok);

    let stale = AccountSnapshot::new(dec!(10000), dec!(7500));
    match kill_switch.check(&stale).await.unwrap() {
        KillSwitchStatus::Tripped(TripReason::Drawdown { drawdown_pct, .. }) => {
            assert_eq!(drawdown_pct, dec!(25))
        }
        other => panic!("expected drawdown trip, got {other:?}"),
    }
    assert_eq!(tripped.lock().unwrap().len(), 1);

    for _ in 0..3 {
        let decision = risk
            .evaluate_pretrade(&candidate("EURUSD"), &healthy, Some(&strategy), 0, now)
            .await
            .unwrap();
        assert!(matches!(
            decision,
            PretradeDecision::Rejected(RejectReason::KillSwitchTripped { .. })
        ));
    }

    let previous = kill_switch.reset("ops").await.unwrap();
    assert!(matches!(previous, Some(TripReason::Drawdown { .. })));
    assert_eq!(reset.lock().unwrap()[0].payload["reset_by"], "ops");

    let decision = risk
        .evaluate_pretrade(&candidate("EURUSD"), &stale, Some(&strategy), 0, now)
        .await
        .unwrap();
    assert_eq!(decision.lots(), Some(dec!(0.01)));

    // The stale snapshot still breaches the ceiling on a fresh check
    assert!(matches!(
        kill_switch.check(&stale).await.unwrap(),
        KillSwitchStatus::Tripped(_)
    ));
}

#[tokio::test]
async fn test_daily_accumulator_is_exact_sum() {
    let (risk, _) = risk_manager(Arc::new(MemoryStore::new()), EventBus::local("safety-test"));
    let nets = [dec!(12.5), dec!(-40.25), dec!(3.1), dec!(-0.35)];
    let trades: Vec<Trade> = nets.iter().map(|n| closed_trade(*n)).collect();

    for trade in &trades {
        assert!(risk.post_trade_update(trade).await.unwrap());
    }
    // Repeated settlement of the same trades changes nothing
    for trade in &trades {
        assert!(!risk.post_trade_update(trade).await.unwrap());
    }

    let state = risk.state().await.unwrap();
    let expected: Decimal = nets.iter().sum();
    assert_eq!(state.daily_pnl, expected);
    assert_eq!(state.weekly_pnl, expected);
    assert_eq!(state.monthly_pnl, expected);
}

#[tokio::test]
async fn test_post_trade_update_requires_closed_trade() {
    let (risk, _) = risk_manager(Arc::new(MemoryStore::new()), EventBus::local("safety-test"));
    let pending = Trade::pending("EURUSD", Direction::Buy, dec!(0.1), "EURUSD_TREND", true);
    assert_err!(risk.post_trade_update(&pending).await);
}

#[tokio::test]
async fn test_daily_loss_trips_kill_switch() {
    let (risk, kill_switch) =
        risk_manager(Arc::new(MemoryStore::new()), EventBus::local("safety-test"));
    assert_ok!(risk.post_trade_update(&closed_trade(dec!(-600))).await);

    let account = AccountSnapshot::new(dec!(10000), dec!(10000));
    match kill_switch.check(&account).await.unwrap() {
        KillSwitchStatus::Tripped(TripReason::DailyLoss { loss, limit }) => {
            assert_eq!(loss, dec!(600));
            assert_eq!(limit, dec!(500));
        }
        other => panic!("expected daily-loss trip, got {other:?}"),
    }
}

#[tokio::test]
async fn test_late_close_stamp_keeps_daily_loss_gate() {
    let (risk, kill_switch) =
        risk_manager(Arc::new(MemoryStore::new()), EventBus::local("safety-test"));
    let now = Utc::now();

    assert_ok!(risk.post_trade_update(&closed_trade_at(dec!(-300), now)).await);
    // Broker reports a close from the previous day after today's loss
    let yesterday = now - ChronoDuration::days(1);
    assert_ok!(risk.post_trade_update(&closed_trade_at(dec!(-10), yesterday)).await);
    assert_eq!(risk.state().await.unwrap().daily_pnl, dec!(-300));

    assert_ok!(risk.post_trade_update(&closed_trade_at(dec!(-250), now)).await);
    let account = AccountSnapshot::new(dec!(10000), dec!(10000));
    match kill_switch.check(&account).await.unwrap() {
        KillSwitchStatus::Tripped(TripReason::DailyLoss { loss, .. }) => {
            assert_eq!(loss, dec!(550))
        }
        other => panic!("expected daily-loss trip, got {other:?}"),
    }
}

#[tokio::test]
async fn test_tripped_flag_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store: Arc<dyn Store> = Arc::new(JsonStore::open(dir.path()).await.unwrap());
        let (_, kill_switch) = risk_manager(store, EventBus::local("safety-test"));
        kill_switch
            .check(&AccountSnapshot::new(dec!(10000), dec!(10000)))
            .await
            .unwrap();
        kill_switch
            .check(&AccountSnapshot::new(dec!(10000), dec!(7000)))
            .await
            .unwrap();
    }

    let store: Arc<dyn Store> = Arc::new(JsonStore::open(dir.path()).await.unwrap());
    let (_, kill_switch) = risk_manager(store, EventBus::local("safety-test"));
    assert!(kill_switch.is_tripped().await.unwrap().is_some());
}

#[tokio::test]
async fn test_calendar_and_symbol_gates() {
    let mut config = test_config();
    config.symbols.insert(
        "XAUUSD".to_string(),
        hydra_engine::config::SymbolConfig {
            lot_size: dec!(0.01),
            sl_atr_mult: dec!(2),
            tp_atr_mult: dec!(2.5),
            contract_size: dec!(100),
            weekend_gap_risk: true,
        },
    );
    let state = RiskStateHandle::new(Arc::new(MemoryStore::new()));
    let kill_switch = Arc::new(KillSwitch::new(
        state.clone(),
        config.kill_switch.clone(),
        EventBus::local("safety-test"),
    ));
    let risk = RiskManager::new(&config, state, kill_switch);
    let strategy = StrategyRecord::new("TREND", dec!(100));
    let account = AccountSnapshot::new(dec!(10000), dec!(10000));
    let saturday = Utc.with_ymd_and_hms(2026, 10, 17, 12, 0, 0).unwrap();

    let mut gold = candidate("XAUUSD");
    gold.entry = dec!(2400);
    gold.stop_loss = dec!(2390);
    let decision = risk
        .evaluate_pretrade(&gold, &account, Some(&strategy), 0, saturday)
        .await
        .unwrap();
    assert_eq!(decision, PretradeDecision::Rejected(RejectReason::WeekendGapRisk));

    let decision = risk
        .evaluate_pretrade(&candidate("EURUSD"), &account, Some(&strategy), 0, saturday)
        .await
        .unwrap();
    assert!(decision.lots().is_some());

    let decision = risk
        .evaluate_pretrade(&candidate("BTCUSD"), &account, Some(&strategy), 0, saturday)
        .await
        .unwrap();
    assert_eq!(decision, PretradeDecision::Rejected(RejectReason::UnknownSymbol));
}

#[tokio::test]
async fn test_engine_records_blocked_attempts_and_applies_reset() {
    let config = test_config();
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let bus = EventBus::local("safety-test");
    let rejected = capture(&bus, EventName::TradeRejected);
    let shadow = ShadowBroker::new(dec!(10000), contract_sizes(&config));
    let market: Arc<dyn MarketData> = Arc::new(ScriptedMarket::new(dec!(1.1000)));
    let strategy: Arc<dyn Strategy> =
        Arc::new(FixedStrategy::new("TREND", dec!(1.0950), dec!(1.1100)));

    let mut engine = Engine::new(EngineParts {
        config,
        store: store.clone(),
        broker: Arc::new(shadow.clone()),
        market,
        bus: bus.clone(),
        strategies: vec![strategy],
    });
    engine.register_strategies().await.unwrap();

    engine
        .kill_switch()
        .check(&AccountSnapshot::new(dec!(10000), dec!(10000)))
        .await
        .unwrap();
    engine
        .kill_switch()
        .check(&AccountSnapshot::new(dec!(10000), dec!(7000)))
        .await
        .unwrap();

    let report = engine.run_cycle().await.unwrap();
    assert!(report.kill_switch_tripped);
    assert_eq!(report.opened, 0);
    assert_eq!(report.rejected, 1);
    assert!(shadow.get_open_positions().await.unwrap().is_empty());
    assert!(store.trades().await.unwrap().is_empty());

    let attempts = store.attempts(10).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].outcome, AttemptOutcome::KillSwitch);
    assert_eq!(attempts[0].strategy, "TREND");
    assert!(rejected.lock().unwrap()[0].payload["trade_id"].is_null());

    // Operator request arrives as an event and is applied between cycles
    bus.emit(&KillSwitchResetRequested {
        requested_by: "ops".to_string(),
    });
    assert!(engine.kill_switch().is_tripped().await.unwrap().is_some());
    assert_eq!(engine.drain_commands().await.unwrap(), 1);
    assert!(engine.kill_switch().is_tripped().await.unwrap().is_none());

    let report = engine.run_cycle().await.unwrap();
    assert!(!report.kill_switch_tripped);
    assert_eq!(report.opened, 1);
}

#[tokio::test]
async fn test_operator_halt_is_applied_between_cycles() {
    let config = test_config();
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let bus = EventBus::local("safety-test");
    let tripped = capture(&bus, EventName::KillSwitchTripped);
    let shadow = ShadowBroker::new(dec!(10000), contract_sizes(&config));
    let strategy: Arc<dyn Strategy> =
        Arc::new(FixedStrategy::new("TREND", dec!(1.0950), dec!(1.1100)));

    let mut engine = Engine::new(EngineParts {
        config,
        store: store.clone(),
        broker: Arc::new(shadow.clone()),
        market: Arc::new(ScriptedMarket::new(dec!(1.1000))),
        bus: bus.clone(),
        strategies: vec![strategy],
    });
    engine.register_strategies().await.unwrap();

    bus.emit(&KillSwitchTripRequested {
        requested_by: "ops".to_string(),
        reason: "central bank announcement".to_string(),
    });
    assert!(engine.kill_switch().is_tripped().await.unwrap().is_none());
    assert_eq!(engine.drain_commands().await.unwrap(), 1);
    assert!(matches!(
        engine.kill_switch().is_tripped().await.unwrap(),
        Some(TripReason::Manual { .. })
    ));
    assert_eq!(tripped.lock().unwrap()[0].payload["reason"]["kind"], "MANUAL");

    let report = engine.run_cycle().await.unwrap();
    assert!(report.kill_switch_tripped);
    assert_eq!(report.opened, 0);
    assert!(shadow.get_open_positions().await.unwrap().is_empty());
    assert_eq!(tripped.lock().unwrap().len(), 1);
}
