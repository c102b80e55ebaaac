//! Learning types

use crate::ledger::TradeId;
use crate::market::Regime;
use chrono::{DateTime, Utc};
use rand::Rng;
use rand_distr::{Beta, Distribution};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

/// Trade ids remembered per record so each outcome is applied once
pub const APPLIED_MEMORY: usize = 256;

/// Beta-distributed success/failure belief
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BetaBelief {
    pub alpha: f64,
    pub beta: f64,
}

impl Default for BetaBelief {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
        }
    }
}

impl BetaBelief {
    pub fn update(&mut self, won: bool) {
        if won {
            self.alpha += 1.0;
        } else {
            self.beta += 1.0;
        }
    }

    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    pub fn trials(&self) -> f64 {
        self.alpha + self.beta - 2.0
    }

    /// Draw a success probability; falls back to the mean if the
    /// parameters are invalid
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match Beta::new(self.alpha, self.beta) {
            Ok(dist) => dist.sample(rng),
            Err(_) => self.mean(),
        }
    }
}

/// Achievement awarded to a strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Badge {
    FirstWin,
    /// Five wins in a row
    HotStreak,
    /// A win ending a loss streak of five or more
    Survivor,
    /// One hundred closed trades
    Centurion,
    /// Level ten reached
    Veteran,
}

impl fmt::Display for Badge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Badge::FirstWin => "FIRST_WIN",
            Badge::HotStreak => "HOT_STREAK",
            Badge::Survivor => "SURVIVOR",
            Badge::Centurion => "CENTURION",
            Badge::Veteran => "VETERAN",
        };
        f.write_str(s)
    }
}

/// Per-strategy learning state, keyed by the bare strategy code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningRecord {
    pub strategy: String,
    /// Belief across all regimes
    pub overall: BetaBelief,
    #[serde(default)]
    pub by_regime: BTreeMap<Regime, BetaBelief>,
    pub trades: u32,
    pub total_reward: f64,
    pub xp: u64,
    pub level: u32,
    pub win_streak: u32,
    pub loss_streak: u32,
    pub best_win_streak: u32,
    #[serde(default)]
    pub badges: BTreeSet<Badge>,
    /// Most recent trades folded into this record
    #[serde(default)]
    pub applied_trades: VecDeque<TradeId>,
    pub updated_at: DateTime<Utc>,
}

impl LearningRecord {
    pub fn new(strategy: impl Into<String>) -> Self {
        Self {
            strategy: strategy.into(),
            overall: BetaBelief::default(),
            by_regime: BTreeMap::new(),
            trades: 0,
            total_reward: 0.0,
            xp: 0,
            level: 1,
            win_streak: 0,
            loss_streak: 0,
            best_win_streak: 0,
            badges: BTreeSet::new(),
            applied_trades: VecDeque::new(),
            updated_at: Utc::now(),
        }
    }

    /// Belief for a regime, or the Beta(1,1) prior if none yet
    pub fn belief(&self, regime: Regime) -> BetaBelief {
        self.by_regime.get(&regime).copied().unwrap_or_default()
    }

    /// Remember `trade_id`; false if its outcome was already applied
    pub fn remember_trade(&mut self, trade_id: TradeId) -> bool {
        if self.applied_trades.contains(&trade_id) {
            return false;
        }
        self.applied_trades.push_back(trade_id);
        while self.applied_trades.len() > APPLIED_MEMORY {
            self.applied_trades.pop_front();
        }
        true
    }

    pub fn average_reward(&self) -> f64 {
        if self.trades == 0 {
            return 0.0;
        }
        self.total_reward / self.trades as f64
    }
}
