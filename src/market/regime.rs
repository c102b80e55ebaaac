//! Market regime classification

use super::Indicators;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Market regime of a single instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Regime {
    TrendingUp,
    TrendingDown,
    Ranging,
    Volatile,
}

impl Regime {
    pub fn as_str(self) -> &'static str {
        match self {
            Regime::TrendingUp => "TRENDING_UP",
            Regime::TrendingDown => "TRENDING_DOWN",
            Regime::Ranging => "RANGING",
            Regime::Volatile => "VOLATILE",
        }
    }

    pub const ALL: [Regime; 4] = [
        Regime::TrendingUp,
        Regime::TrendingDown,
        Regime::Ranging,
        Regime::Volatile,
    ];
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies indicators into a regime
#[derive(Debug, Clone)]
pub struct RegimeDetector {
    adx_trend_threshold: f64,
    volatility_atr_pct: f64,
}

impl RegimeDetector {
    pub fn new(adx_trend_threshold: f64, volatility_atr_pct: f64) -> Self {
        Self {
            adx_trend_threshold,
            volatility_atr_pct,
        }
    }

    /// Classify, or `None` when the indicators needed are missing
    pub fn classify(&self, ind: &Indicators) -> Option<Regime> {
        let adx = ind.adx?;
        let atr = ind.atr?;
        let fast = ind.ema_fast?;
        let slow = ind.ema_slow?;
        let price = ind.last_close?;

        if adx >= self.adx_trend_threshold {
            return Some(if fast >= slow {
                Regime::TrendingUp
            } else {
                Regime::TrendingDown
            });
        }

        if price > 0.0 && atr / price * 100.0 >= self.volatility_atr_pct {
            return Some(Regime::Volatile);
        }

        Some(Regime::Ranging)
    }
}

impl Default for RegimeDetector {
    fn default() -> Self {
        Self::new(25.0, 0.5)
    }
}
