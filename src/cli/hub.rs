//! Hub command implementation

use super::shutdown_on_ctrl_c;
use crate::bus::RelayHub;
use crate::config::Config;
use clap::Args;

#[derive(Args, Debug)]
pub struct HubArgs {
    /// Listen address, overrides bus.hub_listen
    #[arg(short, long)]
    pub listen: Option<String>,
}

impl HubArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let addr = self
            .listen
            .clone()
            .unwrap_or_else(|| config.bus.hub_listen.clone());
        let hub = RelayHub::bind(&addr).await?;
        tracing::info!(addr = %hub.local_addr()?, "Relay hub listening");
        hub.run(shutdown_on_ctrl_c()).await?;
        Ok(())
    }
}
