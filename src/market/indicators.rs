//! Technical indicators computed from candles
//!
//! Wilder smoothing is used for RSI, ATR and ADX.

use super::Candle;
use serde::{Deserialize, Serialize};

/// Candles required before indicators are reported
pub const MIN_CANDLES: usize = 50;

const RSI_PERIOD: usize = 14;
const ATR_PERIOD: usize = 14;
const ADX_PERIOD: usize = 14;
const EMA_FAST: usize = 20;
const EMA_SLOW: usize = 50;

/// Latest indicator values; `None` when not computable
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Indicators {
    pub rsi: Option<f64>,
    pub adx: Option<f64>,
    pub atr: Option<f64>,
    pub ema_fast: Option<f64>,
    pub ema_slow: Option<f64>,
    pub last_close: Option<f64>,
}

impl Indicators {
    /// Compute the standard indicator set from candles ordered oldest first
    pub fn from_candles(candles: &[Candle]) -> Self {
        if candles.len() < MIN_CANDLES {
            return Self {
                last_close: candles.last().map(|c| c.close),
                ..Self::default()
            };
        }

        let close: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let high: Vec<f64> = candles.iter().map(|c| c.high).collect();
        let low: Vec<f64> = candles.iter().map(|c| c.low).collect();

        Self {
            rsi: rsi(&close, RSI_PERIOD),
            adx: adx(&high, &low, &close, ADX_PERIOD),
            atr: atr(&high, &low, &close, ATR_PERIOD),
            ema_fast: ema(&close, EMA_FAST).last().copied(),
            ema_slow: ema(&close, EMA_SLOW).last().copied(),
            last_close: close.last().copied(),
        }
    }
}

/// Exponential moving average seeded with the SMA of the first `period` values
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return vec![];
    }
    let k = 2.0 / (period as f64 + 1.0);
    let seed = values[..period].iter().sum::<f64>() / period as f64;

    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(seed);
    for v in &values[period..] {
        let prev = out[out.len() - 1];
        out.push(v * k + prev * (1.0 - k));
    }
    out
}

/// Relative strength index of the last value
pub fn rsi(close: &[f64], period: usize) -> Option<f64> {
    if period == 0 || close.len() <= period {
        return None;
    }

    let mut gain = 0.0;
    let mut loss = 0.0;
    for w in close[..=period].windows(2) {
        let change = w[1] - w[0];
        if change > 0.0 {
            gain += change;
        } else {
            loss -= change;
        }
    }
    let mut avg_gain = gain / period as f64;
    let mut avg_loss = loss / period as f64;

    for w in close[period..].windows(2) {
        let change = w[1] - w[0];
        let (g, l) = if change > 0.0 { (change, 0.0) } else { (0.0, -change) };
        avg_gain = (avg_gain * (period as f64 - 1.0) + g) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + l) / period as f64;
    }

    if avg_loss == 0.0 {
        return Some(if avg_gain == 0.0 { 50.0 } else { 100.0 });
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

fn true_ranges(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    (1..close.len())
        .map(|i| {
            let hl = high[i] - low[i];
            let hc = (high[i] - close[i - 1]).abs();
            let lc = (low[i] - close[i - 1]).abs();
            hl.max(hc).max(lc)
        })
        .collect()
}

fn wilder(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return vec![];
    }
    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(values[..period].iter().sum::<f64>() / period as f64);
    for v in &values[period..] {
        let prev = out[out.len() - 1];
        out.push((prev * (period as f64 - 1.0) + v) / period as f64);
    }
    out
}

/// Average true range of the last bar
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Option<f64> {
    if high.len() != close.len() || low.len() != close.len() {
        return None;
    }
    wilder(&true_ranges(high, low, close), period).last().copied()
}

/// Average directional index of the last bar
pub fn adx(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Option<f64> {
    let n = close.len();
    if high.len() != n || low.len() != n || n < 2 * period + 1 {
        return None;
    }

    let mut plus_dm = Vec::with_capacity(n - 1);
    let mut minus_dm = Vec::with_capacity(n - 1);
    for i in 1..n {
        let up = high[i] - high[i - 1];
        let down = low[i - 1] - low[i];
        plus_dm.push(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dm.push(if down > up && down > 0.0 { down } else { 0.0 });
    }

    let tr = wilder(&true_ranges(high, low, close), period);
    let pdm = wilder(&plus_dm, period);
    let mdm = wilder(&minus_dm, period);

    let dx: Vec<f64> = tr
        .iter()
        .zip(pdm.iter().zip(mdm.iter()))
        .map(|(tr, (p, m))| {
            if *tr == 0.0 {
                return 0.0;
            }
            let plus_di = 100.0 * p / tr;
            let minus_di = 100.0 * m / tr;
            let sum = plus_di + minus_di;
            if sum == 0.0 {
                0.0
            } else {
                100.0 * (plus_di - minus_di).abs() / sum
            }
        })
        .collect();

    wilder(&dx, period).last().copied()
}
