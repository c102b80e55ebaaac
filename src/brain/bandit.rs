//! Thompson sampling over per-regime Beta beliefs

use super::BetaBelief;
use rand::Rng;

/// One eligible arm: a belief and a weight in (0, 1] taken from the
/// strategy's own signal confidence
#[derive(Debug, Clone, Copy)]
pub struct Arm {
    pub belief: BetaBelief,
    pub weight: f64,
}

/// Winning arm and its weighted draw
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selection {
    pub index: usize,
    pub draw: f64,
    pub score: f64,
}

/// Sample every arm once and pick the highest weighted draw. Ties go to
/// the earlier arm.
pub fn thompson_select<R: Rng + ?Sized>(arms: &[Arm], rng: &mut R) -> Option<Selection> {
    let mut best: Option<Selection> = None;
    for (index, arm) in arms.iter().enumerate() {
        let draw = arm.belief.sample(rng);
        let score = draw * arm.weight.clamp(0.0, 1.0);
        if best.map_or(true, |b| score > b.score) {
            best = Some(Selection { index, draw, score });
        }
    }
    best
}
