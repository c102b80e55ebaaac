//! Run command implementation

use super::{build_bus, build_store, origin, shutdown_on_ctrl_c};
use crate::broker::{BrokerAdapter, ShadowBroker};
use crate::config::{Config, ExecutionMode};
use crate::engine::{Engine, EngineParts};
use crate::market::{HttpMarketData, MarketData};
use clap::Args;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Force dry-run mode (shadow registry)
    #[arg(long, conflicts_with = "live")]
    pub dry_run: bool,

    /// Force live mode
    #[arg(long)]
    pub live: bool,
}

impl RunArgs {
    pub async fn execute(&self, mut config: Config) -> anyhow::Result<()> {
        if self.dry_run {
            config.engine.mode = ExecutionMode::DryRun;
        } else if self.live {
            config.engine.mode = ExecutionMode::Live;
        }

        let broker: Arc<dyn BrokerAdapter> = match config.engine.mode {
            ExecutionMode::DryRun => {
                let contract_sizes: HashMap<String, _> = config
                    .symbols
                    .iter()
                    .map(|(s, c)| (s.clone(), c.contract_size))
                    .collect();
                Arc::new(ShadowBroker::new(config.engine.dry_run_balance, contract_sizes))
            }
            ExecutionMode::Live => anyhow::bail!(
                "live mode needs a broker adapter; embed hydra_engine and pass one to Engine::new"
            ),
        };

        let market: Arc<dyn MarketData> = Arc::new(HttpMarketData::new(
            config.market.base_url.clone(),
            Duration::from_millis(config.market.timeout_ms),
        )?);
        let store = build_store(&config.store).await?;
        let (bus, relay) = build_bus(&config.bus, &origin("engine"))?;

        tracing::warn!("No strategies are compiled into this binary; the engine will manage existing trades only");
        let mut engine = Engine::new(EngineParts {
            config,
            store,
            broker,
            market,
            bus: bus.clone(),
            strategies: Vec::new(),
        });

        // Handlers are registered by Engine::new; only now start listening
        if relay.is_some() {
            bus.start_listener()?;
        }
        bus.self_test()?;

        let summary = engine.run(shutdown_on_ctrl_c()).await?;
        tracing::info!(
            cycles = summary.cycles,
            pending_trades = summary.pending_trades,
            "Run finished"
        );
        Ok(())
    }
}
