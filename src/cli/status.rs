//! Status command implementation

use super::build_store;
use crate::config::Config;
use crate::ledger::TradeLedger;
use crate::risk::{KillSwitchFlag, RiskState};
use chrono::Utc;
use clap::Args;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Number of recent trades and attempts to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,
}

impl StatusArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let store = build_store(&config.store).await?;
        let risk = store
            .load_risk_state()
            .await?
            .unwrap_or_else(|| RiskState::new(Utc::now()));

        println!("hydra status");
        println!("  Mode: {:?}", config.engine.mode);
        match &risk.kill_switch {
            KillSwitchFlag::Armed => println!("  Kill switch: armed"),
            KillSwitchFlag::Tripped { reason, tripped_at } => {
                println!("  Kill switch: TRIPPED at {tripped_at} ({reason})")
            }
        }
        println!(
            "  P&L: day {} / week {} / month {}",
            risk.daily_pnl, risk.weekly_pnl, risk.monthly_pnl
        );
        println!(
            "  Drawdown: {}% (peak equity {})",
            risk.drawdown_pct.round_dp(2),
            risk.peak_equity
        );

        println!("Strategies:");
        for s in store.strategies().await? {
            println!(
                "  {:<16} {:<8} alloc {:>6}%  trades {:>4}  win {:>5}%  pf {}",
                s.code,
                s.status.to_string(),
                s.allocation_pct,
                s.trades,
                (s.win_rate() * rust_decimal::Decimal::ONE_HUNDRED).round_dp(1),
                s.profit_factor()
                    .map(|pf| pf.round_dp(2).to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
        }

        println!("Recent trades:");
        for t in TradeLedger::new(store.clone()).recent(self.limit).await? {
            println!(
                "  {} {:<8} {:<4} {:>5} {:<20} {:<8} net {}",
                t.created_at.format("%m-%d %H:%M"),
                t.symbol,
                t.direction.to_string(),
                t.lots,
                t.strategy,
                t.status().to_string(),
                t.net_profit()
            );
        }

        println!("Recent blocked attempts:");
        for a in store.attempts(self.limit).await? {
            println!(
                "  {} {:<8} {:<16} {:?}: {}",
                a.time.format("%m-%d %H:%M"),
                a.symbol,
                a.strategy,
                a.outcome,
                a.reason
            );
        }
        Ok(())
    }
}
