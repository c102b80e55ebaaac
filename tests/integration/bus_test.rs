//! Event bus and relay integration tests

mod support;

use hydra_engine::bus::payload::{KillSwitchResetRequested, TradeReconciled};
use hydra_engine::bus::{
    BusError, Event, EventBus, EventName, LocalRelay, Relay, RelayHub, WsRelay, WsRelayConfig,
};
use hydra_engine::ledger::TradeStatus;
use std::sync::Arc;
use std::time::Duration;
use support::capture;
use tokio::sync::{mpsc, watch};
use tokio_test::assert_ok;

#[test]
fn test_exact_name_delivery() {
    let bus = EventBus::local("bus-test");
    let closed = capture(&bus, EventName::TradeClosed);
    let opened = capture(&bus, EventName::TradeOpened);
    let rejected = capture(&bus, EventName::TradeRejected);

    bus.publish(EventName::TradeClosed, serde_json::json!({"symbol": "EURUSD"}));

    assert_eq!(closed.lock().unwrap().len(), 1);
    assert!(opened.lock().unwrap().is_empty());
    assert!(rejected.lock().unwrap().is_empty());
    assert_eq!(closed.lock().unwrap()[0].name.as_str(), "TRADE_CLOSED");
}

#[test]
fn test_names_are_case_sensitive() {
    assert_eq!(
        serde_json::from_str::<EventName>("\"TRADE_CLOSED\"").unwrap(),
        EventName::TradeClosed
    );
    for alias in ["\"trade_closed\"", "\"TradeClosed\"", "\"TRADE_CLOSE\"", "\"POSITION_CLOSED\""] {
        assert!(serde_json::from_str::<EventName>(alias).is_err(), "{alias} accepted");
    }
}

#[test]
fn test_non_object_payload_is_dropped() {
    let bus = EventBus::local("bus-test");
    let seen = capture(&bus, EventName::LevelUp);
    bus.publish(EventName::LevelUp, 42);
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_local_relay_crosses_buses_but_not_back() {
    let relay: Arc<dyn Relay> = Arc::new(LocalRelay::new());
    let engine = EventBus::with_relay("engine", relay.clone());
    let consumer = EventBus::with_relay("consumer", relay.clone());

    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    consumer.subscribe(EventName::TradeReconciled, move |event| {
        let _ = tx.send(event.clone());
        Ok(())
    });
    let echoed = capture(&engine, EventName::TradeReconciled);
    engine.start_listener().unwrap();
    consumer.start_listener().unwrap();
    assert_ok!(engine.self_test());
    assert_ok!(consumer.self_test());

    // Frames with a name outside the closed set are discarded
    relay
        .send(r#"{"id":"00000000-0000-0000-0000-000000000000","name":"trade_reconciled","payload":{},"timestamp":"2026-10-16T00:00:00Z","origin":"rogue"}"#)
        .unwrap();

    let trade_id = uuid::Uuid::new_v4();
    engine.emit(&TradeReconciled {
        trade_id,
        symbol: "EURUSD".into(),
        resolved_to: TradeStatus::Open,
        ticket: Some(9),
    });

    let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.origin, "engine");
    let payload: TradeReconciled = event.decode().unwrap();
    assert_eq!(payload.trade_id, trade_id);
    assert_eq!(payload.ticket, Some(9));

    // Own frame comes back over the relay but is not delivered twice
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(echoed.lock().unwrap().len(), 1);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_self_test_catches_startup_order() {
    let relay: Arc<dyn Relay> = Arc::new(LocalRelay::new());

    let bus = EventBus::with_relay("late-listener", relay.clone());
    bus.subscribe(EventName::LevelUp, |_| Ok(()));
    assert!(matches!(
        bus.self_test(),
        Err(BusError::HandlersWithoutListener(names)) if names == vec![EventName::LevelUp]
    ));
    bus.start_listener().unwrap();
    assert_ok!(bus.self_test());
    assert!(matches!(
        bus.start_listener(),
        Err(BusError::ListenerAlreadyStarted)
    ));

    let idle = EventBus::with_relay("idle", relay);
    idle.start_listener().unwrap();
    assert!(matches!(idle.self_test(), Err(BusError::ListenerWithoutHandlers)));

    assert!(matches!(
        EventBus::local("no-relay").start_listener(),
        Err(BusError::NoRelay)
    ));
}

async fn wait_connected(relay: &WsRelay) {
    for _ in 0..100 {
        if relay.is_connected() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("relay never connected to {}", relay.url());
}

#[tokio::test]
async fn test_ws_hub_relays_between_processes() {
    let hub = RelayHub::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", hub.local_addr().unwrap());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let hub_task = tokio::spawn(hub.run(shutdown_rx));

    let cli_relay = Arc::new(WsRelay::connect(WsRelayConfig::new(url.clone())));
    let engine_relay = Arc::new(WsRelay::connect(WsRelayConfig::new(url)));
    let cli = EventBus::with_relay("cli", cli_relay.clone());
    let engine = EventBus::with_relay("engine", engine_relay.clone());

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    engine.subscribe(EventName::KillSwitchResetRequested, move |event| {
        let request: KillSwitchResetRequested = event
            .decode()
            .map_err(|e| hydra_engine::bus::HandlerError::new(e.to_string()))?;
        let _ = tx.send(request.requested_by);
        Ok(())
    });
    engine.start_listener().unwrap();
    engine.self_test().unwrap();

    wait_connected(&cli_relay).await;
    wait_connected(&engine_relay).await;

    // Delivery is at-most-once; republish until the hub has both peers
    let received = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            cli.emit(&KillSwitchResetRequested {
                requested_by: "ops".into(),
            });
            if let Ok(Some(by)) = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
                return by;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(received, "ops");

    shutdown_tx.send(true).unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(2), hub_task).await;
}

#[tokio::test]
async fn test_relay_send_fails_while_disconnected() {
    let relay = WsRelay::connect(WsRelayConfig::new("ws://127.0.0.1:9").max_reconnects(1));
    assert!(!relay.is_connected());
    assert!(matches!(relay.send("{}"), Err(BusError::RelayUnavailable(_))));
}
