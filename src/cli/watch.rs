//! Watch command implementation

use super::{build_bus, origin, shutdown_on_ctrl_c, wait_connected};
use crate::bus::EventName;
use crate::config::Config;
use clap::Args;
use std::time::Duration;

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Only print these events (SCREAMING_SNAKE names)
    #[arg(short, long, value_delimiter = ',')]
    pub events: Vec<String>,
}

impl WatchArgs {
    fn selected(&self) -> anyhow::Result<Vec<EventName>> {
        if self.events.is_empty() {
            return Ok(EventName::ALL.to_vec());
        }
        self.events
            .iter()
            .map(|name| {
                serde_json::from_value(serde_json::Value::String(name.clone()))
                    .map_err(|_| anyhow::anyhow!("unknown event name: {name}"))
            })
            .collect()
    }

    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let names = self.selected()?;
        let (bus, relay) = build_bus(&config.bus, &origin("watch"))?;
        let Some(relay) = relay else {
            anyhow::bail!("watch needs bus.relay = \"ws\" to receive events from other processes");
        };

        for name in names {
            bus.subscribe(name, |event| {
                println!(
                    "{} {:<28} {} {}",
                    event.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
                    event.name.as_str(),
                    event.origin,
                    serde_json::Value::Object(event.payload.clone())
                );
                Ok(())
            });
        }
        bus.start_listener()?;
        bus.self_test()?;

        if !wait_connected(&relay, Duration::from_secs(5)).await {
            tracing::warn!(url = relay.url(), "Hub not reachable yet, will keep retrying");
        }
        let mut shutdown = shutdown_on_ctrl_c();
        let _ = shutdown.changed().await;
        Ok(())
    }
}
