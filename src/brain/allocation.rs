//! Capital allocation across strategies

use crate::config::AllocationConfig;
use crate::strategy::StrategyRecord;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::BTreeMap;

fn round_down(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::ToZero)
}

/// Profit factor with the cap applied; a loss-free record with profit
/// scores the cap
fn capped_pf(pf: Option<Decimal>, has_profit: bool, cap: Decimal) -> Decimal {
    match pf {
        Some(v) => v.min(cap),
        None if has_profit => cap,
        None => Decimal::ZERO,
    }
}

/// Recency-weighted profit factor times a win-rate multiplier
pub fn strategy_score(record: &StrategyRecord, config: &AllocationConfig) -> Decimal {
    let cap = config.profit_factor_cap;
    let overall = capped_pf(
        record.profit_factor(),
        record.gross_profit > Decimal::ZERO,
        cap,
    );
    let recent = if record.recent.is_empty() {
        overall
    } else {
        capped_pf(
            record.recent_profit_factor(),
            record.recent.iter().any(|n| *n > Decimal::ZERO),
            cap,
        )
    };
    let w = config.recency_weight;
    let blended = (recent * w + overall * (Decimal::ONE - w)).min(cap);
    blended * (Decimal::new(5, 1) + record.win_rate())
}

/// Allocation percentage per strategy code.
///
/// Inactive strategies get 0. Each under-sampled active strategy gets the
/// floor (scaled down if the floors alone would exceed 100); the rest is
/// shared in proportion to [`strategy_score`]. Values are rounded down to
/// two decimals and the rounding remainder goes to the best-scoring
/// strategy, so active allocations sum to exactly 100.
pub fn compute_allocation(
    records: &[StrategyRecord],
    config: &AllocationConfig,
) -> BTreeMap<String, Decimal> {
    let mut out: BTreeMap<String, Decimal> = records
        .iter()
        .map(|r| (r.code.clone(), Decimal::ZERO))
        .collect();

    let active: Vec<&StrategyRecord> = records.iter().filter(|r| r.is_active()).collect();
    if active.is_empty() {
        return out;
    }
    let hundred = Decimal::ONE_HUNDRED;

    let (under, sampled): (Vec<&StrategyRecord>, Vec<&StrategyRecord>) = active
        .iter()
        .copied()
        .partition(|r| r.trades < config.min_trades);

    if sampled.is_empty() {
        let share = round_down(hundred / Decimal::from(under.len() as u64));
        for r in &under {
            out.insert(r.code.clone(), share);
        }
    } else {
        let mut floor = config.floor_pct.max(Decimal::ZERO);
        let n_under = Decimal::from(under.len() as u64);
        if floor * n_under > hundred {
            floor = round_down(hundred / n_under);
        }
        for r in &under {
            out.insert(r.code.clone(), floor);
        }

        let remaining = hundred - floor * n_under;
        let scores: Vec<Decimal> = sampled
            .iter()
            .map(|r| strategy_score(r, config))
            .collect();
        let total: Decimal = scores.iter().sum();

        for (r, score) in sampled.iter().zip(&scores) {
            let share = if total > Decimal::ZERO {
                remaining * *score / total
            } else {
                remaining / Decimal::from(sampled.len() as u64)
            };
            out.insert(r.code.clone(), round_down(share));
        }
    }

    let assigned: Decimal = out.values().sum();
    let remainder = hundred - assigned;
    if remainder > Decimal::ZERO {
        let top = active
            .iter()
            .filter(|r| r.trades >= config.min_trades)
            .max_by(|a, b| strategy_score(a, config).cmp(&strategy_score(b, config)))
            .or_else(|| active.first());
        if let Some(top) = top {
            if let Some(v) = out.get_mut(&top.code) {
                *v += remainder;
            }
        }
    }
    out
}
