//! Engine loop module
//!
//! Drives one trading cycle at a time: snapshot, settle, reconcile, kill
//! switch, decide, risk-check, submit. The engine is the only caller of the
//! broker, risk manager, brain and ledger, and the single writer of the
//! shared risk and allocation state.

mod cycle;
mod protection;
mod snapshot;

pub use cycle::CycleReport;
pub use protection::protective_levels;
pub use snapshot::{fetch_snapshots, SnapshotRequest, SnapshotRound};

use crate::brain::Brain;
use crate::broker::{AccountSnapshot, BrokerAdapter};
use crate::bus::payload::{
    EngineStarted, EngineStopped, KillSwitchResetRequested, KillSwitchTripRequested,
};
use crate::bus::{EventBus, EventName, HandlerError};
use crate::config::Config;
use crate::error::EngineError;
use crate::ledger::{Reconciler, TradeLedger};
use crate::market::{MarketData, Regime, RegimeDetector};
use crate::risk::{KillSwitch, RiskManager, RiskStateHandle};
use crate::store::Store;
use crate::strategy::{Strategy, StrategyBook};
use crate::telemetry::{set_gauge, GaugeMetric};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Operator commands executed by the engine between cycles
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    ResetKillSwitch { requested_by: String },
    TripKillSwitch { requested_by: String, reason: String },
}

/// Collaborators the engine is built from
pub struct EngineParts {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub broker: Arc<dyn BrokerAdapter>,
    pub market: Arc<dyn MarketData>,
    pub bus: EventBus,
    pub strategies: Vec<Arc<dyn Strategy>>,
}

/// Summary returned when the loop stops
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: u64,
    pub pending_trades: usize,
}

pub struct Engine {
    config: Config,
    symbols: Vec<String>,
    broker: Arc<dyn BrokerAdapter>,
    market: Arc<dyn MarketData>,
    bus: EventBus,
    ledger: TradeLedger,
    book: StrategyBook,
    risk: RiskManager,
    kill_switch: Arc<KillSwitch>,
    brain: Brain,
    reconciler: Reconciler,
    strategies: Vec<Arc<dyn Strategy>>,
    detector: RegimeDetector,
    regimes: HashMap<String, Regime>,
    last_account: Option<AccountSnapshot>,
    last_reconcile: Option<DateTime<Utc>>,
    cycle: u64,
    control_tx: mpsc::UnboundedSender<ControlCommand>,
    control_rx: mpsc::UnboundedReceiver<ControlCommand>,
}

impl Engine {
    /// Build the engine and register its control handler on the bus. Start
    /// the bus listener after this, not before.
    pub fn new(parts: EngineParts) -> Self {
        let EngineParts {
            config,
            store,
            broker,
            market,
            bus,
            strategies,
        } = parts;

        let symbols: Vec<String> = config.symbols.keys().cloned().collect();
        let state = RiskStateHandle::new(store.clone());
        let kill_switch = Arc::new(KillSwitch::new(
            state.clone(),
            config.kill_switch.clone(),
            bus.clone(),
        ));
        let risk = RiskManager::new(&config, state.clone(), kill_switch.clone());
        let ledger = TradeLedger::new(store.clone());
        let reconciler = Reconciler::new(
            ledger.clone(),
            broker.clone(),
            bus.clone(),
            chrono::Duration::seconds(config.engine.pending_timeout_secs as i64),
        );
        let brain = Brain::new(
            store.clone(),
            state,
            bus.clone(),
            config.brain.clone(),
            config.allocation.clone(),
            symbols.clone(),
        );
        let detector =
            RegimeDetector::new(config.brain.adx_trend_threshold, config.brain.volatility_atr_pct);

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let tx = control_tx.clone();
        bus.subscribe(EventName::KillSwitchResetRequested, move |event| {
            let request: KillSwitchResetRequested = event
                .decode()
                .map_err(|e| HandlerError::new(format!("bad reset request: {e}")))?;
            tx.send(ControlCommand::ResetKillSwitch {
                requested_by: request.requested_by,
            })
            .map_err(|_| HandlerError::new("engine control channel closed"))
        });
        let tx = control_tx.clone();
        bus.subscribe(EventName::KillSwitchTripRequested, move |event| {
            let request: KillSwitchTripRequested = event
                .decode()
                .map_err(|e| HandlerError::new(format!("bad trip request: {e}")))?;
            tx.send(ControlCommand::TripKillSwitch {
                requested_by: request.requested_by,
                reason: request.reason,
            })
            .map_err(|_| HandlerError::new("engine control channel closed"))
        });

        Self {
            config,
            symbols,
            broker,
            market,
            bus,
            ledger,
            book: StrategyBook::new(store),
            risk,
            kill_switch,
            brain,
            reconciler,
            strategies,
            detector,
            regimes: HashMap::new(),
            last_account: None,
            last_reconcile: None,
            cycle: 0,
            control_tx,
            control_rx,
        }
    }

    /// Deterministic bandit sampling
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.brain = self.brain.with_seed(seed);
        self
    }

    /// Channel for in-process control commands
    pub fn control(&self) -> mpsc::UnboundedSender<ControlCommand> {
        self.control_tx.clone()
    }

    pub fn kill_switch(&self) -> &Arc<KillSwitch> {
        &self.kill_switch
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    pub fn brain(&self) -> &Brain {
        &self.brain
    }

    pub fn ledger(&self) -> &TradeLedger {
        &self.ledger
    }

    pub fn cycles(&self) -> u64 {
        self.cycle
    }

    /// Register every strategy's record; new ones split what is left equally
    pub async fn register_strategies(&self) -> Result<(), EngineError> {
        let codes: Vec<String> = self
            .strategies
            .iter()
            .map(|s| self.brain.learning_key(s.code()))
            .collect();
        self.book.ensure_registered(&codes).await?;
        Ok(())
    }

    /// Execute queued operator commands
    pub async fn drain_commands(&mut self) -> Result<usize, EngineError> {
        let mut handled = 0;
        while let Ok(command) = self.control_rx.try_recv() {
            match command {
                ControlCommand::ResetKillSwitch { requested_by } => {
                    let previous = self.kill_switch.reset(&requested_by).await?;
                    tracing::warn!(
                        requested_by = %requested_by,
                        was_tripped = previous.is_some(),
                        "Kill switch reset on operator request"
                    );
                }
                ControlCommand::TripKillSwitch {
                    requested_by,
                    reason,
                } => {
                    let tripped = self.kill_switch.trip(&requested_by, &reason).await?;
                    tracing::warn!(
                        requested_by = %requested_by,
                        reason = %reason,
                        newly_tripped = tripped,
                        "Kill switch tripped on operator request"
                    );
                }
            }
            handled += 1;
        }
        Ok(handled)
    }

    fn cycle_delay(&self, failures: u32) -> Duration {
        let base = self.config.engine.loop_interval_secs.max(1);
        if failures == 0 {
            return Duration::from_secs(base);
        }
        let factor = 2u64.saturating_pow(failures.min(16));
        Duration::from_secs(
            base.saturating_mul(factor)
                .min(self.config.engine.max_cycle_backoff_secs.max(base)),
        )
    }

    /// Run cycles until `shutdown` flips to true. Shutdown is observed only
    /// between cycles; trades still PENDING are left for the next sweep.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<RunSummary, EngineError> {
        self.register_strategies().await?;
        self.bus.emit(&EngineStarted {
            mode: format!("{:?}", self.config.engine.mode).to_lowercase(),
            symbols: self.symbols.clone(),
            strategies: self.strategies.iter().map(|s| s.code().to_string()).collect(),
        });
        tracing::info!(
            mode = ?self.config.engine.mode,
            symbols = ?self.symbols,
            strategies = self.strategies.len(),
            "Engine started"
        );

        let mut failures: u32 = 0;
        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.drain_commands().await {
                tracing::error!(error = %e, "Control command failed");
            }

            match self.run_cycle().await {
                Ok(report) => {
                    failures = 0;
                    tracing::debug!(?report, "Cycle complete");
                }
                Err(e) if e.is_transient() => {
                    failures += 1;
                    tracing::warn!(cycle = self.cycle, failures, error = %e, "Cycle failed, backing off");
                }
                Err(e) => {
                    failures = 0;
                    tracing::error!(cycle = self.cycle, class = e.class(), error = %e, "Cycle aborted");
                }
            }
            set_gauge(GaugeMetric::CycleFailures, failures as f64);

            let delay = self.cycle_delay(failures);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        let pending = match self.ledger.pending_trades().await {
            Ok(p) => p.len(),
            Err(e) => {
                tracing::warn!(error = %e, "Could not count pending trades at shutdown");
                0
            }
        };
        if pending > 0 {
            tracing::warn!(pending, "Stopping with PENDING trades, left for reconciliation");
        }
        self.bus.emit(&EngineStopped {
            cycles: self.cycle,
            pending_trades: pending,
        });
        tracing::info!(cycles = self.cycle, "Engine stopped");

        Ok(RunSummary {
            cycles: self.cycle,
            pending_trades: pending,
        })
    }
}
