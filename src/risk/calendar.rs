//! Per-instrument trading calendar
//!
//! Only instruments explicitly flagged with `weekend_gap_risk` are blocked
//! over the weekend window; nothing is inferred from the symbol name.

use crate::config::{CalendarConfig, SymbolConfig};
use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use std::collections::HashMap;

/// Calendar verdict for one symbol at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarCheck {
    Open,
    WeekendGapRisk,
    UnknownSymbol,
}

#[derive(Debug, Clone)]
pub struct TradingCalendar {
    gap_risk: HashMap<String, bool>,
    friday_cutoff_hour: u32,
    sunday_open_hour: u32,
}

impl TradingCalendar {
    pub fn new<'a>(
        config: &CalendarConfig,
        symbols: impl IntoIterator<Item = (&'a String, &'a SymbolConfig)>,
    ) -> Self {
        Self {
            gap_risk: symbols
                .into_iter()
                .map(|(s, c)| (s.clone(), c.weekend_gap_risk))
                .collect(),
            friday_cutoff_hour: config.friday_cutoff_hour_utc,
            sunday_open_hour: config.sunday_open_hour_utc,
        }
    }

    /// Friday from the cutoff hour through Sunday before the open hour
    pub fn in_weekend_window(&self, now: DateTime<Utc>) -> bool {
        match now.weekday() {
            Weekday::Fri => now.hour() >= self.friday_cutoff_hour,
            Weekday::Sat => true,
            Weekday::Sun => now.hour() < self.sunday_open_hour,
            _ => false,
        }
    }

    pub fn check(&self, symbol: &str, now: DateTime<Utc>) -> CalendarCheck {
        match self.gap_risk.get(symbol) {
            None => CalendarCheck::UnknownSymbol,
            Some(true) if self.in_weekend_window(now) => CalendarCheck::WeekendGapRisk,
            Some(_) => CalendarCheck::Open,
        }
    }
}
