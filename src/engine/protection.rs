//! Stop-loss and take-profit derivation

use crate::config::SymbolConfig;
use crate::ledger::Direction;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

fn stop_valid(direction: Direction, entry: Decimal, stop: Decimal) -> bool {
    stop > Decimal::ZERO
        && match direction {
            Direction::Buy => stop < entry,
            Direction::Sell => stop > entry,
        }
}

fn target_valid(direction: Direction, entry: Decimal, target: Decimal) -> bool {
    target > Decimal::ZERO
        && match direction {
            Direction::Buy => target > entry,
            Direction::Sell => target < entry,
        }
}

/// Keep the signal's own levels where they sit on the correct side of
/// `entry`, otherwise derive them from ATR. `None` if a level is needed
/// and ATR is unusable.
pub fn protective_levels(
    direction: Direction,
    entry: Decimal,
    stop_loss: Option<Decimal>,
    take_profit: Option<Decimal>,
    atr: f64,
    symbol: &SymbolConfig,
) -> Option<(Decimal, Decimal)> {
    let atr = Decimal::from_f64(atr).filter(|a| *a > Decimal::ZERO);
    let sign = direction.sign();

    let stop = match stop_loss.filter(|s| stop_valid(direction, entry, *s)) {
        Some(s) => s,
        None => entry - sign * atr? * symbol.sl_atr_mult,
    };
    let target = match take_profit.filter(|t| target_valid(direction, entry, *t)) {
        Some(t) => t,
        None => entry + sign * atr? * symbol.tp_atr_mult,
    };

    (stop_valid(direction, entry, stop) && target_valid(direction, entry, target))
        .then_some((stop, target))
}
