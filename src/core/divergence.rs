use tracing::debug;

use crate::config::DivergenceConfig;
use crate::models::{CandleSeries, Direction, DivergenceMode};

/// Relative Strength Index with Wilder smoothing. Values before the first
/// full period are NaN.
pub fn rsi(closes: &[f64], period: usize) -> Vec<f64> {
    let n = closes.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 || n < period + 1 {
        return out;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let ch = closes[i] - closes[i - 1];
        if ch > 0.0 {
            avg_gain += ch;
        } else {
            avg_loss -= ch;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    out[period] = rsi_value(avg_gain, avg_loss);

    let p = period as f64;
    for i in (period + 1)..n {
        let ch = closes[i] - closes[i - 1];
        let (gain, loss) = if ch > 0.0 { (ch, 0.0) } else { (0.0, -ch) };
        avg_gain = (avg_gain * (p - 1.0) + gain) / p;
        avg_loss = (avg_loss * (p - 1.0) + loss) / p;
        out[i] = rsi_value(avg_gain, avg_loss);
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            50.0
        } else {
            100.0
        }
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

/// close[t] - close[t - period]; NaN for the first `period` values.
pub fn momentum(closes: &[f64], period: usize) -> Vec<f64> {
    let n = closes.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 {
        return out;
    }
    for i in period..n {
        out[i] = closes[i] - closes[i - period];
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DivergenceVerdict {
    pub oscillator: bool,
    pub momentum: bool,
}

impl DivergenceVerdict {
    pub fn passes(&self, mode: DivergenceMode) -> bool {
        match mode {
            DivergenceMode::Strict => self.oscillator && self.momentum,
            DivergenceMode::Lenient => self.oscillator || self.momentum,
        }
    }
}

/// Classic divergence on the breakout leg: price extends beyond its
/// previous swing while the indicator does not.
pub struct DivergenceFilter {
    pub mode: DivergenceMode,
    pub lookback: usize,
    pub swing_strength: usize,
    pub rsi_period: usize,
    pub momentum_period: usize,
}

impl DivergenceFilter {
    pub fn new(cfg: &DivergenceConfig) -> Self {
        Self {
            mode: cfg.mode,
            lookback: cfg.lookback,
            swing_strength: cfg.swing_strength.max(1),
            rsi_period: cfg.rsi_period,
            momentum_period: cfg.momentum_period,
        }
    }

    /// Candles needed for both indicators to be defined across the lookback.
    pub fn required_history(&self) -> usize {
        self.rsi_period.max(self.momentum_period) + self.lookback + 1
    }

    pub fn evaluate(&self, candles: &CandleSeries, side: Direction) -> DivergenceVerdict {
        let Some(swing) = self.nearest_swing(candles, side) else {
            debug!("divergence: no prior swing for {}", side);
            return DivergenceVerdict::default();
        };

        let closes = candles.closes();
        let cur = candles.len() - 1;
        let price_extends = match side {
            Direction::Long => candles[cur].low < candles[swing].low,
            Direction::Short => candles[cur].high > candles[swing].high,
        };
        if !price_extends {
            return DivergenceVerdict::default();
        }

        let osc = rsi(&closes, self.rsi_period);
        let mom = momentum(&closes, self.momentum_period);
        let verdict = DivergenceVerdict {
            oscillator: indicator_diverges(&osc, swing, cur, side),
            momentum: indicator_diverges(&mom, swing, cur, side),
        };
        debug!(
            "divergence {}: swing={} rsi={} momentum={}",
            side, swing, verdict.oscillator, verdict.momentum
        );
        verdict
    }

    pub fn passes(&self, candles: &CandleSeries, side: Direction) -> bool {
        self.evaluate(candles, side).passes(self.mode)
    }

    /// Index of the nearest swing low (long) or swing high (short) that is
    /// fully formed before the newest candle.
    fn nearest_swing(&self, candles: &CandleSeries, side: Direction) -> Option<usize> {
        let n = candles.len();
        let k = self.swing_strength;
        if n < 2 * k + 2 {
            return None;
        }
        let cur = n - 1;
        let newest = cur - 1 - k;
        let oldest = cur.saturating_sub(self.lookback).max(k);
        if newest < oldest {
            return None;
        }

        (oldest..=newest).rev().find(|&j| {
            let mut neighbours = (j - k..j).chain(j + 1..=j + k);
            match side {
                Direction::Long => neighbours.all(|i| candles[i].low >= candles[j].low),
                Direction::Short => neighbours.all(|i| candles[i].high <= candles[j].high),
            }
        })
    }
}

fn indicator_diverges(values: &[f64], swing: usize, cur: usize, side: Direction) -> bool {
    let (a, b) = (values[swing], values[cur]);
    if !a.is_finite() || !b.is_finite() {
        return false;
    }
    match side {
        Direction::Long => b > a,
        Direction::Short => b < a,
    }
}
