//! CLI interface for hydra
//!
//! Provides subcommands for:
//! - `run`: Start the engine loop
//! - `hub`: Run the cross-process relay hub
//! - `watch`: Print every relayed event
//! - `reset-kill-switch`: Ask the engine to reset the kill switch
//! - `trip-kill-switch`: Ask the engine to halt trading
//! - `status`: Show persisted risk, strategy and trade state
//! - `config`: Show the effective configuration

mod hub;
mod kill_switch;
mod run;
mod status;
mod watch;

pub use hub::HubArgs;
pub use kill_switch::{ResetArgs, TripArgs};
pub use run::RunArgs;
pub use status::StatusArgs;
pub use watch::WatchArgs;

use crate::bus::{EventBus, WsRelay, WsRelayConfig};
use crate::config::{BusConfig, RelayKind, StoreConfig, StoreKind};
use crate::store::{JsonStore, MemoryStore, Store};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch as watch_channel;

#[derive(Parser, Debug)]
#[command(name = "hydra")]
#[command(about = "Autonomous multi-strategy trading controller")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the engine loop
    Run(RunArgs),
    /// Run the relay hub that connects engine and consumer processes
    Hub(HubArgs),
    /// Print every event relayed from other processes
    Watch(WatchArgs),
    /// Request a kill-switch reset from the running engine
    ResetKillSwitch(ResetArgs),
    /// Ask the running engine to trip the kill switch
    TripKillSwitch(TripArgs),
    /// Show persisted state
    Status(StatusArgs),
    /// Show configuration
    Config,
}

/// Open the configured persistent store
pub async fn build_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn Store>> {
    Ok(match config.kind {
        StoreKind::Memory => Arc::new(MemoryStore::new()),
        StoreKind::Json => Arc::new(JsonStore::open(&config.path).await?),
    })
}

/// Build a bus for this process. The relay, if any, is returned so callers
/// can wait for it to connect.
pub fn build_bus(config: &BusConfig, origin: &str) -> anyhow::Result<(EventBus, Option<Arc<WsRelay>>)> {
    match config.relay {
        RelayKind::None => Ok((EventBus::local(origin), None)),
        RelayKind::Ws => {
            let url = config
                .hub_url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("bus.relay = \"ws\" requires bus.hub_url"))?;
            let relay = Arc::new(WsRelay::connect(WsRelayConfig::new(url)));
            Ok((EventBus::with_relay(origin, relay.clone()), Some(relay)))
        }
    }
}

/// Process origin id: role plus pid
pub fn origin(role: &str) -> String {
    format!("{role}-{}", std::process::id())
}

/// Poll until the relay is connected or `timeout` elapses
pub async fn wait_connected(relay: &WsRelay, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while !relay.is_connected() {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    true
}

/// Shutdown channel that flips on Ctrl-C
pub fn shutdown_on_ctrl_c() -> watch_channel::Receiver<bool> {
    let (tx, rx) = watch_channel::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            let _ = tx.send(true);
        }
    });
    rx
}
