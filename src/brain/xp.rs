//! Experience, levels and badges

use super::{Badge, LearningRecord};
use crate::market::Regime;
use chrono::{DateTime, Utc};

pub const BASE_XP: u64 = 10;
pub const WIN_BONUS_XP: u64 = 15;
/// Cap on the profit-scaled bonus
pub const MAX_PROFIT_BONUS_XP: u64 = 25;
/// Net profit per bonus point
pub const PROFIT_PER_BONUS_XP: f64 = 10.0;

pub const HOT_STREAK_WINS: u32 = 5;
pub const SURVIVOR_LOSSES: u32 = 5;
pub const CENTURION_TRADES: u32 = 100;
pub const VETERAN_LEVEL: u32 = 10;

/// XP earned by one closed trade
pub fn xp_for_trade(net: f64) -> u64 {
    if net > 0.0 {
        let bonus = (net / PROFIT_PER_BONUS_XP).floor() as u64;
        BASE_XP + WIN_BONUS_XP + bonus.min(MAX_PROFIT_BONUS_XP)
    } else {
        BASE_XP
    }
}

/// Level 1 at 0 XP, level n at 100 * (n - 1)^2 XP
pub fn level_for_xp(xp: u64) -> u32 {
    ((xp as f64 / 100.0).sqrt().floor() as u32) + 1
}

/// What one outcome changed on a learning record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutcomeEffects {
    pub xp_gained: u64,
    pub new_level: Option<u32>,
    pub new_badges: Vec<Badge>,
}

/// Fold a closed trade's net result into `record`
pub fn apply_outcome(
    record: &mut LearningRecord,
    regime: Option<Regime>,
    net: f64,
    at: DateTime<Utc>,
) -> OutcomeEffects {
    let won = net > 0.0;
    let mut earned = Vec::new();

    record.overall.update(won);
    if let Some(regime) = regime {
        record.by_regime.entry(regime).or_default().update(won);
    }
    record.trades += 1;
    record.total_reward += net;

    // Streak badges look at the streak as it stood before this trade
    let prior_losses = record.loss_streak;
    if won {
        if prior_losses >= SURVIVOR_LOSSES {
            earned.push(Badge::Survivor);
        }
        record.win_streak += 1;
        record.loss_streak = 0;
        record.best_win_streak = record.best_win_streak.max(record.win_streak);
        earned.push(Badge::FirstWin);
        if record.win_streak >= HOT_STREAK_WINS {
            earned.push(Badge::HotStreak);
        }
    } else {
        record.loss_streak += 1;
        record.win_streak = 0;
    }

    let xp_gained = xp_for_trade(net);
    let previous_level = record.level;
    record.xp += xp_gained;
    record.level = level_for_xp(record.xp);
    let new_level = (record.level > previous_level).then_some(record.level);

    if record.trades >= CENTURION_TRADES {
        earned.push(Badge::Centurion);
    }
    if record.level >= VETERAN_LEVEL {
        earned.push(Badge::Veteran);
    }

    let new_badges = earned
        .into_iter()
        .filter(|b| record.badges.insert(*b))
        .collect();
    record.updated_at = at;

    OutcomeEffects {
        xp_gained,
        new_level,
        new_badges,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xp_per_trade() {
        assert_eq!(xp_for_trade(-40.0), BASE_XP);
        assert_eq!(xp_for_trade(0.0), BASE_XP);
        assert_eq!(xp_for_trade(55.0), BASE_XP + WIN_BONUS_XP + 5);
        assert_eq!(xp_for_trade(10_000.0), BASE_XP + WIN_BONUS_XP + MAX_PROFIT_BONUS_XP);
    }

    #[test]
    fn test_levels() {
        assert_eq!(level_for_xp(0), 1);
        assert_eq!(level_for_xp(99), 1);
        assert_eq!(level_for_xp(100), 2);
        assert_eq!(level_for_xp(400), 3);
        assert_eq!(level_for_xp(8100), 10);
    }

    #[test]
    fn test_survivor_sees_streak_before_reset() {
        let mut record = LearningRecord::new("MR");
        for _ in 0..5 {
            apply_outcome(&mut record, None, -10.0, Utc::now());
        }
        assert_eq!(record.loss_streak, 5);

        let effects = apply_outcome(&mut record, None, 20.0, Utc::now());
        assert!(effects.new_badges.contains(&Badge::Survivor));
        assert!(effects.new_badges.contains(&Badge::FirstWin));
        assert_eq!(record.loss_streak, 0);
        assert_eq!(record.win_streak, 1);
    }

    #[test]
    fn test_four_losses_are_not_enough() {
        let mut record = LearningRecord::new("MR");
        for _ in 0..4 {
            apply_outcome(&mut record, None, -10.0, Utc::now());
        }
        let effects = apply_outcome(&mut record, None, 20.0, Utc::now());
        assert!(!effects.new_badges.contains(&Badge::Survivor));
    }

    #[test]
    fn test_badges_awarded_once() {
        let mut record = LearningRecord::new("MR");
        let mut hot = 0;
        for _ in 0..8 {
            let effects = apply_outcome(&mut record, None, 5.0, Utc::now());
            hot += effects
                .new_badges
                .iter()
                .filter(|b| **b == Badge::HotStreak)
                .count();
        }
        assert_eq!(hot, 1);
        assert_eq!(record.best_win_streak, 8);
    }

    #[test]
    fn test_regime_belief_updated() {
        let mut record = LearningRecord::new("MR");
        apply_outcome(&mut record, Some(Regime::Ranging), 5.0, Utc::now());
        apply_outcome(&mut record, Some(Regime::Ranging), -5.0, Utc::now());
        apply_outcome(&mut record, Some(Regime::Volatile), -5.0, Utc::now());

        let ranging = record.belief(Regime::Ranging);
        assert_eq!((ranging.alpha, ranging.beta), (2.0, 2.0));
        let volatile = record.belief(Regime::Volatile);
        assert_eq!((volatile.alpha, volatile.beta), (1.0, 2.0));
        assert_eq!(record.overall.trials(), 3.0);
    }

    #[test]
    fn test_level_up_reported() {
        let mut record = LearningRecord::new("MR");
        let mut levels = Vec::new();
        for _ in 0..3 {
            if let Some(l) = apply_outcome(&mut record, None, 500.0, Utc::now()).new_level {
                levels.push(l);
            }
        }
        // 50 XP per trade: 150 XP is level 2
        assert_eq!(levels, vec![2]);
        assert_eq!(record.xp, 150);
    }
}
