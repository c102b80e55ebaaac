//! Kill-switch operator commands
//!
//! Both commands only publish a request on the bus. The running engine is
//! the sole writer of the persisted flag and applies the request before its
//! next cycle.

use super::{build_bus, origin, wait_connected};
use crate::bus::payload::{KillSwitchResetRequested, KillSwitchTripRequested};
use crate::bus::{EventBus, EventPayload};
use crate::config::Config;
use clap::Args;
use std::time::Duration;

#[derive(Args, Debug)]
pub struct ResetArgs {
    /// Operator requesting the reset
    #[arg(long)]
    pub by: String,
}

impl ResetArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let bus = connected_bus(config, "reset").await?;
        publish(
            &bus,
            &KillSwitchResetRequested {
                requested_by: self.by.clone(),
            },
        )
        .await;
        println!("Reset requested by {}; the engine applies it before its next cycle", self.by);
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct TripArgs {
    /// Operator requesting the halt
    #[arg(long)]
    pub by: String,

    /// Why trading is being halted
    #[arg(long)]
    pub reason: String,
}

impl TripArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let bus = connected_bus(config, "trip").await?;
        publish(
            &bus,
            &KillSwitchTripRequested {
                requested_by: self.by.clone(),
                reason: self.reason.clone(),
            },
        )
        .await;
        println!("Halt requested by {}; the engine trips the kill switch before its next cycle", self.by);
        Ok(())
    }
}

async fn connected_bus(config: &Config, role: &str) -> anyhow::Result<EventBus> {
    let (bus, relay) = build_bus(&config.bus, &origin(role))?;
    let Some(relay) = relay else {
        anyhow::bail!("no relay configured: the engine cannot receive the request");
    };
    if !wait_connected(&relay, Duration::from_secs(5)).await {
        anyhow::bail!("relay hub {} not reachable", relay.url());
    }
    Ok(bus)
}

async fn publish<P: EventPayload>(bus: &EventBus, payload: &P) {
    bus.emit(payload);
    // Give the writer task time to flush the frame
    tokio::time::sleep(Duration::from_millis(300)).await;
}
