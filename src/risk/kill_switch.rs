//! Account-level kill switch

use super::{KillSwitchFlag, KillSwitchStatus, RiskStateHandle, TripReason};
use crate::broker::AccountSnapshot;
use crate::bus::payload::{KillSwitchReset, KillSwitchTripped};
use crate::bus::EventBus;
use crate::config::KillSwitchConfig;
use crate::store::StoreError;
use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};

/// Trips on drawdown or daily-loss breaches and stays tripped until reset
pub struct KillSwitch {
    state: RiskStateHandle,
    limits: KillSwitchConfig,
    bus: EventBus,
    checks: AtomicU64,
}

enum CheckOutcome {
    Ok,
    AlreadyTripped(TripReason),
    NewlyTripped(TripReason),
}

impl KillSwitch {
    pub fn new(state: RiskStateHandle, limits: KillSwitchConfig, bus: EventBus) -> Self {
        Self {
            state,
            limits,
            bus,
            checks: AtomicU64::new(0),
        }
    }

    /// Number of `check` calls made through this instance
    pub fn check_count(&self) -> u64 {
        self.checks.load(Ordering::SeqCst)
    }

    /// Evaluate the ceilings against `account` and persist the result
    pub async fn check(&self, account: &AccountSnapshot) -> Result<KillSwitchStatus, StoreError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let max_dd = self.limits.max_drawdown_pct;
        let max_daily = self.limits.max_daily_loss_pct;

        let (outcome, drawdown_pct, daily_pnl) = self
            .state
            .update(|s| {
                s.roll(now);
                let hwm = s.peak_equity.max(account.balance).max(account.equity);
                s.peak_equity = hwm;
                s.drawdown_pct = if hwm > Decimal::ZERO {
                    ((hwm - account.equity) / hwm * Decimal::ONE_HUNDRED).max(Decimal::ZERO)
                } else {
                    Decimal::ZERO
                };
                s.updated_at = now;

                if let KillSwitchFlag::Tripped { reason, .. } = &s.kill_switch {
                    return (CheckOutcome::AlreadyTripped(reason.clone()), s.drawdown_pct, s.daily_pnl);
                }

                let daily_limit = account.balance * max_daily / Decimal::ONE_HUNDRED;
                let reason = if s.drawdown_pct >= max_dd {
                    Some(TripReason::Drawdown {
                        drawdown_pct: s.drawdown_pct,
                        limit_pct: max_dd,
                    })
                } else if s.daily_pnl < Decimal::ZERO && -s.daily_pnl >= daily_limit {
                    Some(TripReason::DailyLoss {
                        loss: -s.daily_pnl,
                        limit: daily_limit,
                    })
                } else {
                    None
                };

                match reason {
                    Some(reason) => {
                        s.kill_switch = KillSwitchFlag::Tripped {
                            reason: reason.clone(),
                            tripped_at: now,
                        };
                        (CheckOutcome::NewlyTripped(reason), s.drawdown_pct, s.daily_pnl)
                    }
                    None => (CheckOutcome::Ok, s.drawdown_pct, s.daily_pnl),
                }
            })
            .await?;

        gauge!("hydra_drawdown_pct").set(drawdown_pct.to_f64().unwrap_or_default());
        gauge!("hydra_daily_pnl").set(daily_pnl.to_f64().unwrap_or_default());

        match outcome {
            CheckOutcome::Ok => Ok(KillSwitchStatus::Ok),
            CheckOutcome::AlreadyTripped(reason) => Ok(KillSwitchStatus::Tripped(reason)),
            CheckOutcome::NewlyTripped(reason) => {
                self.announce_trip(&reason, now);
                Ok(KillSwitchStatus::Tripped(reason))
            }
        }
    }

    fn announce_trip(&self, reason: &TripReason, at: DateTime<Utc>) {
        tracing::error!(reason = %reason, "Kill switch tripped");
        counter!("hydra_kill_switch_trips_total").increment(1);
        gauge!("hydra_kill_switch_tripped").set(1.0);
        self.bus.emit(&KillSwitchTripped {
            reason: reason.clone(),
            tripped_at: at,
        });
    }

    /// Operator halt. Persists and announces like an automatic trip; a
    /// switch that is already tripped keeps its original reason. Returns
    /// true when this call tripped it.
    pub async fn trip(&self, requested_by: &str, note: &str) -> Result<bool, StoreError> {
        let now = Utc::now();
        let reason = TripReason::Manual {
            requested_by: requested_by.to_string(),
            note: note.to_string(),
        };
        let tripped = self
            .state
            .update(|s| {
                if s.kill_switch.is_tripped() {
                    return false;
                }
                s.kill_switch = KillSwitchFlag::Tripped {
                    reason: reason.clone(),
                    tripped_at: now,
                };
                s.updated_at = now;
                true
            })
            .await?;

        if tripped {
            self.announce_trip(&reason, now);
        } else {
            tracing::info!(requested_by, "Manual halt requested but kill switch already tripped");
        }
        Ok(tripped)
    }

    /// Current persisted flag
    pub async fn is_tripped(&self) -> Result<Option<TripReason>, StoreError> {
        Ok(match self.state.read().await?.kill_switch {
            KillSwitchFlag::Tripped { reason, .. } => Some(reason),
            KillSwitchFlag::Armed => None,
        })
    }

    /// Clear the persisted flag and announce it. The equity high-water mark
    /// is rebased on the next check.
    pub async fn reset(&self, by: &str) -> Result<Option<TripReason>, StoreError> {
        let now = Utc::now();
        let previous = self
            .state
            .update(|s| {
                let previous = match std::mem::take(&mut s.kill_switch) {
                    KillSwitchFlag::Tripped { reason, .. } => Some(reason),
                    KillSwitchFlag::Armed => None,
                };
                s.peak_equity = Decimal::ZERO;
                s.drawdown_pct = Decimal::ZERO;
                s.updated_at = now;
                previous
            })
            .await?;

        tracing::warn!(reset_by = by, previous = ?previous, "Kill switch reset");
        gauge!("hydra_kill_switch_tripped").set(0.0);
        self.bus.emit(&KillSwitchReset {
            reset_by: by.to_string(),
            reset_at: now,
            previous_reason: previous.clone(),
        });
        Ok(previous)
    }
}
