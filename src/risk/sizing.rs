//! Lot sizing and mode-dependent caps
//!
//! Live mode caps lots by equity tier; dry-run mode uses a fixed cap that is
//! never larger than the smallest live cap.

use crate::config::{EquityTier, ExecutionMode, RiskConfig};
use rust_decimal::{Decimal, RoundingStrategy};

/// Computes order size from allocation and stop distance
#[derive(Debug, Clone)]
pub struct LotSizer {
    mode: ExecutionMode,
    tiers: Vec<EquityTier>,
    dry_run_max_lots: Decimal,
    risk_per_trade_pct: Decimal,
    min_lots: Decimal,
    lot_step: Decimal,
}

impl LotSizer {
    pub fn from_config(config: &RiskConfig, mode: ExecutionMode) -> Self {
        Self {
            mode,
            tiers: config.equity_tiers.clone(),
            dry_run_max_lots: config.dry_run_max_lots,
            risk_per_trade_pct: config.risk_per_trade_pct,
            min_lots: config.min_lots,
            lot_step: config.lot_step,
        }
    }

    pub fn min_lots(&self) -> Decimal {
        self.min_lots
    }

    /// Largest order allowed at this equity
    pub fn mode_cap(&self, equity: Decimal) -> Decimal {
        match self.mode {
            ExecutionMode::DryRun => self.dry_run_max_lots,
            ExecutionMode::Live => self
                .tiers
                .iter()
                .filter(|t| t.min_equity <= equity)
                .last()
                .or_else(|| self.tiers.first())
                .map(|t| t.max_lots)
                .unwrap_or(Decimal::ZERO),
        }
    }

    /// Lots such that hitting the stop loses `risk_per_trade_pct` of the
    /// strategy's allocated equity
    pub fn risk_lots(
        &self,
        equity: Decimal,
        allocation_pct: Decimal,
        stop_distance: Decimal,
        contract_size: Decimal,
    ) -> Decimal {
        let loss_per_lot = stop_distance * contract_size;
        if loss_per_lot <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let budget = equity * allocation_pct / Decimal::ONE_HUNDRED * self.risk_per_trade_pct
            / Decimal::ONE_HUNDRED;
        budget / loss_per_lot
    }

    /// Round down to the broker's lot step
    pub fn floor_to_step(&self, lots: Decimal) -> Decimal {
        if self.lot_step <= Decimal::ZERO {
            return lots;
        }
        (lots / self.lot_step).round_dp_with_strategy(0, RoundingStrategy::ToZero) * self.lot_step
    }

    /// Final size: min of request, risk budget and mode cap, floored to step
    pub fn size(
        &self,
        requested: Decimal,
        equity: Decimal,
        allocation_pct: Decimal,
        stop_distance: Decimal,
        contract_size: Decimal,
    ) -> Decimal {
        let by_risk = self.risk_lots(equity, allocation_pct, stop_distance, contract_size);
        let capped = requested.min(by_risk).min(self.mode_cap(equity));
        self.floor_to_step(capped).normalize()
    }
}
