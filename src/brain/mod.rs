//! Decision and learning module
//!
//! Picks among eligible strategy signals with Thompson sampling over
//! per-regime beliefs, turns closed trades into XP and badges, and
//! rebalances strategy allocations from their track records.

mod allocation;
mod bandit;
mod context;
mod key;
mod types;
mod xp;

pub use allocation::{compute_allocation, strategy_score};
pub use bandit::{thompson_select, Arm, Selection};
pub use context::{DecisionContext, ValidatedContext, ValidationError};
pub use key::learning_key;
pub use types::{Badge, BetaBelief, LearningRecord, APPLIED_MEMORY};
pub use xp::{apply_outcome, level_for_xp, xp_for_trade, OutcomeEffects};

use crate::bus::payload::{AllocationChanged, BadgeEarned, LevelUp};
use crate::bus::EventBus;
use crate::config::{AllocationConfig, BrainConfig};
use crate::ledger::{Direction, Trade, TradeStatus};
use crate::risk::RiskStateHandle;
use crate::store::{Store, StoreError};
use crate::strategy::StrategySignal;
use chrono::Utc;
use metrics::counter;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Brain errors
#[derive(Debug, Error)]
pub enum BrainError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("allocation total {0} exceeds 100")]
    AllocationOverflow(Decimal),
    #[error("trade is not closed")]
    NotClosed,
}

/// A strategy's signal for the current symbol, offered to [`Brain::decide`]
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Raw strategy id as recorded on trades, e.g. `EURUSD_TREND`
    pub strategy_id: String,
    pub signal: StrategySignal,
}

/// The chosen signal
#[derive(Debug, Clone)]
pub struct Decision {
    pub strategy: String,
    pub learning_key: String,
    pub action: Direction,
    pub confidence: f64,
    /// Sampled win probability for the chosen arm
    pub sampled: f64,
    pub signal: StrategySignal,
}

/// Learning component; the only writer of learning records and allocations
pub struct Brain {
    store: Arc<dyn Store>,
    /// Holds the persisted count of outcomes since the last rebalance
    state: RiskStateHandle,
    bus: EventBus,
    config: BrainConfig,
    allocation: AllocationConfig,
    symbols: Vec<String>,
    rng: Mutex<StdRng>,
}

impl Brain {
    pub fn new(
        store: Arc<dyn Store>,
        state: RiskStateHandle,
        bus: EventBus,
        config: BrainConfig,
        allocation: AllocationConfig,
        symbols: Vec<String>,
    ) -> Self {
        Self {
            store,
            state,
            bus,
            config,
            allocation,
            symbols,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic sampling, for tests and replays
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn learning_key(&self, strategy_id: &str) -> String {
        learning_key(strategy_id, &self.symbols)
    }

    /// Key a trade's outcome is recorded under: the code stored on the
    /// trade, falling back to normalizing its raw strategy id
    pub fn trade_key(&self, trade: &Trade) -> String {
        match &trade.strategy_code {
            Some(code) => code.clone(),
            None => self.learning_key(&trade.strategy),
        }
    }

    /// Pick one candidate by sampling each one's belief for the current
    /// regime, weighted by the signal's confidence
    pub async fn decide(
        &self,
        ctx: &ValidatedContext,
        candidates: Vec<Candidate>,
    ) -> Result<Option<Decision>, StoreError> {
        let eligible: Vec<Candidate> = candidates
            .into_iter()
            .filter(|c| c.signal.confidence.is_finite())
            .filter(|c| c.signal.confidence >= self.config.min_confidence)
            .collect();
        if eligible.is_empty() {
            return Ok(None);
        }

        let mut arms = Vec::with_capacity(eligible.len());
        let mut keys = Vec::with_capacity(eligible.len());
        for c in &eligible {
            let key = self.learning_key(&c.strategy_id);
            let belief = self
                .store
                .load_learning(&key)
                .await?
                .map(|r| r.belief(ctx.regime()))
                .unwrap_or_default();
            arms.push(Arm {
                belief,
                weight: c.signal.confidence,
            });
            keys.push(key);
        }

        let selection = {
            let mut rng = match self.rng.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            thompson_select(&arms, &mut *rng)
        };
        let Some(selection) = selection else {
            return Ok(None);
        };

        let chosen = eligible[selection.index].clone();
        tracing::debug!(
            symbol = ctx.symbol(),
            regime = %ctx.regime(),
            strategy = %chosen.strategy_id,
            candidates = eligible.len(),
            sampled = selection.draw,
            "Strategy selected"
        );
        counter!("hydra_decisions_total").increment(1);

        Ok(Some(Decision {
            strategy: chosen.strategy_id,
            learning_key: keys.swap_remove(selection.index),
            action: chosen.signal.direction,
            confidence: chosen.signal.confidence,
            sampled: selection.draw,
            signal: chosen.signal,
        }))
    }

    /// Update beliefs, XP, streaks and badges from a closed trade. Returns
    /// `None` when this trade's outcome was already applied.
    pub async fn record_outcome(&self, trade: &Trade) -> Result<Option<OutcomeEffects>, BrainError> {
        if trade.status() != TradeStatus::Closed {
            return Err(BrainError::NotClosed);
        }
        let key = self.trade_key(trade);
        let mut record = self
            .store
            .load_learning(&key)
            .await?
            .unwrap_or_else(|| LearningRecord::new(key.clone()));
        if !record.remember_trade(trade.id) {
            tracing::debug!(strategy = %key, trade_id = %trade.id, "Outcome already applied");
            return Ok(None);
        }

        let net = trade.net_profit().to_f64().unwrap_or_default();
        let at = trade.closed_at.unwrap_or_else(Utc::now);
        let effects = apply_outcome(&mut record, trade.regime_at_entry, net, at);
        self.store.save_learning(&record).await?;
        self.state.update(|s| s.closes_since_rebalance += 1).await?;

        tracing::info!(
            strategy = %key,
            trade_id = %trade.id,
            xp_gained = effects.xp_gained,
            level = record.level,
            win_streak = record.win_streak,
            loss_streak = record.loss_streak,
            "Learning record updated"
        );

        if let Some(level) = effects.new_level {
            self.bus.emit(&LevelUp {
                strategy: key.clone(),
                level,
                xp: record.xp,
            });
        }
        for badge in &effects.new_badges {
            tracing::info!(strategy = %key, badge = %badge, "Badge earned");
            self.bus.emit(&BadgeEarned {
                strategy: key.clone(),
                badge: *badge,
            });
        }
        Ok(Some(effects))
    }

    /// Recompute and commit every strategy's allocation in one write
    pub async fn rebalance(&self) -> Result<BTreeMap<String, Decimal>, BrainError> {
        let mut records = self.store.strategies().await?;
        if records.is_empty() {
            return Ok(BTreeMap::new());
        }
        let allocations = compute_allocation(&records, &self.allocation);

        let total: Decimal = records
            .iter()
            .filter(|r| r.is_active())
            .filter_map(|r| allocations.get(&r.code))
            .sum();
        if total > Decimal::ONE_HUNDRED {
            tracing::error!(total = %total, "Allocation exceeds 100, not written");
            return Err(BrainError::AllocationOverflow(total));
        }

        let now = Utc::now();
        for record in &mut records {
            record.allocation_pct = if record.is_active() {
                allocations.get(&record.code).copied().unwrap_or_default()
            } else {
                Decimal::ZERO
            };
            record.updated_at = now;
        }
        self.store.save_strategies(&records).await?;
        self.state.update(|s| s.closes_since_rebalance = 0).await?;

        let written: BTreeMap<String, Decimal> = records
            .iter()
            .map(|r| (r.code.clone(), r.allocation_pct))
            .collect();
        tracing::info!(allocations = ?written, "Allocations rebalanced");
        counter!("hydra_rebalances_total").increment(1);
        self.bus.emit(&AllocationChanged {
            allocations: written.clone(),
        });
        Ok(written)
    }

    /// Rebalance if auto-allocation is on and enough trades closed since
    /// the last one
    pub async fn maybe_rebalance(&self) -> Result<Option<BTreeMap<String, Decimal>>, BrainError> {
        if !self.config.auto_allocation {
            return Ok(None);
        }
        let every = self.config.rebalance_every_trades.max(1);
        if self.state.read().await?.closes_since_rebalance < every {
            return Ok(None);
        }
        self.rebalance().await.map(Some)
    }

    pub async fn learning_records(&self) -> Result<Vec<LearningRecord>, StoreError> {
        self.store.learning_records().await
    }
}
