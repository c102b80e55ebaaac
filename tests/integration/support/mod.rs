//! Test doubles shared by the integration suites
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use hydra_engine::brain::{LearningRecord, ValidatedContext};
use hydra_engine::bus::{Event, EventBus, EventName};
use hydra_engine::config::Config;
use hydra_engine::ledger::{AttemptRecord, Direction, Trade, TradeId, TradeStatus};
use hydra_engine::market::{Candle, MarketData, MarketDataError, Quote};
use hydra_engine::risk::RiskState;
use hydra_engine::store::{MemoryStore, Store, StoreError};
use hydra_engine::strategy::{Strategy, StrategyError, StrategyRecord, StrategySignal};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const CONFIG: &str = r#"
[engine]
mode = "dry_run"
loop_interval_secs = 1
pending_timeout_secs = 0
reconcile_interval_secs = 0
order_timeout_secs = 1
max_quote_age_secs = 30
candle_timeframe = "H1"
candle_count = 200
max_cycle_backoff_secs = 4
dry_run_balance = 10000

[symbols.EURUSD]
lot_size = 0.01
sl_atr_mult = 1.5
tp_atr_mult = 2.0
contract_size = 100000
weekend_gap_risk = false

[risk]
equity_tiers = [
    { min_equity = 0, max_lots = 0.05 },
    { min_equity = 5000, max_lots = 0.20 },
]
dry_run_max_lots = 0.01
risk_per_trade_pct = 1.0
max_open_positions = 8
min_lots = 0.01
lot_step = 0.01

[kill_switch]
max_drawdown_pct = 20
max_daily_loss_pct = 5

[brain]
auto_allocation = false

[store]
kind = "memory"

[retry]
max_retries = 0
base_delay_ms = 0
max_delay_ms = 0

[market]
base_url = "http://127.0.0.1:1"
timeout_ms = 500

[telemetry]
log_level = "warn"
"#;

pub fn test_config() -> Config {
    let config: Config = toml::from_str(CONFIG).unwrap();
    config.validate().unwrap();
    config
}

pub fn contract_sizes(config: &Config) -> HashMap<String, Decimal> {
    config
        .symbols
        .iter()
        .map(|(s, c)| (s.clone(), c.contract_size))
        .collect()
}

/// Market whose bid is set by the test; candles trend gently upwards
pub struct ScriptedMarket {
    bid: Mutex<Decimal>,
    candle_count: Mutex<usize>,
    down: AtomicBool,
}

impl ScriptedMarket {
    pub fn new(bid: Decimal) -> Self {
        Self {
            bid: Mutex::new(bid),
            candle_count: Mutex::new(200),
            down: AtomicBool::new(false),
        }
    }

    pub fn set_bid(&self, bid: Decimal) {
        *self.bid.lock().unwrap() = bid;
    }

    /// Serve at most `n` candles regardless of the request
    pub fn limit_candles(&self, n: usize) {
        *self.candle_count.lock().unwrap() = n;
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl MarketData for ScriptedMarket {
    async fn quote(&self, symbol: &str) -> Result<Quote, MarketDataError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(MarketDataError::Unreachable("connection refused".into()));
        }
        let bid = *self.bid.lock().unwrap();
        Ok(Quote {
            symbol: symbol.to_string(),
            bid,
            ask: bid + dec!(0.0002),
            time: Utc::now(),
        })
    }

    async fn candles(
        &self,
        _symbol: &str,
        _timeframe: &str,
        count: usize,
    ) -> Result<Vec<Candle>, MarketDataError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(MarketDataError::Unreachable("connection refused".into()));
        }
        let n = count.min(*self.candle_count.lock().unwrap());
        let start = Utc::now() - ChronoDuration::hours(n as i64);
        Ok((0..n)
            .map(|i| {
                let close = 1.09 + (i as f64) * 0.00005;
                Candle {
                    time: start + ChronoDuration::hours(i as i64),
                    open: close - 0.00002,
                    high: close + 0.0008,
                    low: close - 0.0008,
                    close,
                }
            })
            .collect())
    }
}

/// Always buys with fixed protective levels
pub struct FixedStrategy {
    code: String,
    stop_loss: Decimal,
    take_profit: Decimal,
    pub evaluations: AtomicUsize,
}

impl FixedStrategy {
    pub fn new(code: &str, stop_loss: Decimal, take_profit: Decimal) -> Self {
        Self {
            code: code.to_string(),
            stop_loss,
            take_profit,
            evaluations: AtomicUsize::new(0),
        }
    }
}

impl Strategy for FixedStrategy {
    fn code(&self) -> &str {
        &self.code
    }

    fn evaluate(&self, _ctx: &ValidatedContext) -> Result<Option<StrategySignal>, StrategyError> {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        Ok(Some(
            StrategySignal::new(Direction::Buy, Decimal::ZERO, 0.8)
                .with_stops(self.stop_loss, self.take_profit),
        ))
    }
}

pub struct FailingStrategy;

impl Strategy for FailingStrategy {
    fn code(&self) -> &str {
        "BROKEN"
    }

    fn evaluate(&self, _ctx: &ValidatedContext) -> Result<Option<StrategySignal>, StrategyError> {
        Err(StrategyError::new("BROKEN", "division by zero"))
    }
}

/// Memory store that records every status a trade is saved with
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryStore,
    statuses: Mutex<HashMap<TradeId, Vec<TradeStatus>>>,
    refuse_risk_writes: AtomicBool,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every risk-state commit fail while set
    pub fn refuse_risk_writes(&self, refuse: bool) {
        self.refuse_risk_writes.store(refuse, Ordering::SeqCst);
    }

    /// Distinct statuses in the order they were first saved
    pub fn history(&self, id: TradeId) -> Vec<TradeStatus> {
        let statuses = self.statuses.lock().unwrap();
        let mut out: Vec<TradeStatus> = Vec::new();
        for status in statuses.get(&id).cloned().unwrap_or_default() {
            if out.last() != Some(&status) {
                out.push(status);
            }
        }
        out
    }

    pub fn all_histories(&self) -> Vec<Vec<TradeStatus>> {
        let ids: Vec<TradeId> = self.statuses.lock().unwrap().keys().copied().collect();
        ids.into_iter().map(|id| self.history(id)).collect()
    }
}

#[async_trait]
impl Store for RecordingStore {
    async fn save_trade(&self, trade: &Trade) -> Result<(), StoreError> {
        self.statuses
            .lock()
            .unwrap()
            .entry(trade.id)
            .or_default()
            .push(trade.status());
        self.inner.save_trade(trade).await
    }

    async fn load_trade(&self, id: TradeId) -> Result<Option<Trade>, StoreError> {
        self.inner.load_trade(id).await
    }

    async fn trades(&self) -> Result<Vec<Trade>, StoreError> {
        self.inner.trades().await
    }

    async fn save_strategies(&self, records: &[StrategyRecord]) -> Result<(), StoreError> {
        self.inner.save_strategies(records).await
    }

    async fn strategies(&self) -> Result<Vec<StrategyRecord>, StoreError> {
        self.inner.strategies().await
    }

    async fn save_risk_state(&self, state: &RiskState) -> Result<(), StoreError> {
        if self.refuse_risk_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("risk state write refused".into()));
        }
        self.inner.save_risk_state(state).await
    }

    async fn load_risk_state(&self) -> Result<Option<RiskState>, StoreError> {
        self.inner.load_risk_state().await
    }

    async fn save_learning(&self, record: &LearningRecord) -> Result<(), StoreError> {
        self.inner.save_learning(record).await
    }

    async fn load_learning(&self, key: &str) -> Result<Option<LearningRecord>, StoreError> {
        self.inner.load_learning(key).await
    }

    async fn learning_records(&self) -> Result<Vec<LearningRecord>, StoreError> {
        self.inner.learning_records().await
    }

    async fn append_attempt(&self, record: &AttemptRecord) -> Result<(), StoreError> {
        self.inner.append_attempt(record).await
    }

    async fn attempts(&self, limit: usize) -> Result<Vec<AttemptRecord>, StoreError> {
        self.inner.attempts(limit).await
    }
}

/// Capture every event published under `name`
pub fn capture(bus: &EventBus, name: EventName) -> Arc<Mutex<Vec<Event>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    bus.subscribe(name, move |event| {
        sink.lock().unwrap().push(event.clone());
        Ok(())
    });
    seen
}
