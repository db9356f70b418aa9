use tracing::debug;

use crate::config::VolumeFilterConfig;
use crate::models::{Candle, CandleSeries};

/// Volume gate for both legs of the pattern: a weak breakout followed by
/// a strong reversal.
pub struct VolumeFilter {
    pub average_window: usize,
    pub breakout_max_multiplier: f64,
    pub reversal_min_multiplier: f64,
}

impl VolumeFilter {
    pub fn new(cfg: &VolumeFilterConfig) -> Self {
        Self {
            average_window: cfg.average_window,
            breakout_max_multiplier: cfg.breakout_max_multiplier,
            reversal_min_multiplier: cfg.reversal_min_multiplier,
        }
    }

    /// Simple mean over the `average_window` candles preceding the newest one.
    /// `None` when there is not enough history or the mean is not positive.
    pub fn average_volume(&self, candles: &CandleSeries) -> Option<f64> {
        let n = candles.len();
        if self.average_window == 0 || n < self.average_window + 1 {
            return None;
        }
        let window = &candles.as_slice()[n - 1 - self.average_window..n - 1];
        let avg = window.iter().map(|c| c.volume).sum::<f64>() / self.average_window as f64;
        (avg.is_finite() && avg > 0.0).then_some(avg)
    }

    pub fn passes_breakout(&self, candle: &Candle, average: Option<f64>) -> bool {
        let Some(avg) = average else {
            debug!("volume filter: no average volume, breakout rejected");
            return false;
        };
        let limit = avg * self.breakout_max_multiplier;
        let passed = candle.volume <= limit;
        debug!(
            "volume filter breakout: vol={:.0} limit={:.0} passed={}",
            candle.volume, limit, passed
        );
        passed
    }

    pub fn passes_reversal(&self, candle: &Candle, average: Option<f64>) -> bool {
        let Some(avg) = average else {
            debug!("volume filter: no average volume, reversal rejected");
            return false;
        };
        let floor = avg * self.reversal_min_multiplier;
        let passed = candle.volume >= floor;
        debug!(
            "volume filter reversal: vol={:.0} floor={:.0} passed={}",
            candle.volume, floor, passed
        );
        passed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::make_candles_with_volume;

    fn filter() -> VolumeFilter {
        VolumeFilter {
            average_window: 3,
            breakout_max_multiplier: 1.0,
            reversal_min_multiplier: 1.5,
        }
    }

    #[test]
    fn average_excludes_newest_candle() {
        let s = make_candles_with_volume(&[
            (1.0, 1.1, 0.9, 1.0, 100.0),
            (1.0, 1.1, 0.9, 1.0, 200.0),
            (1.0, 1.1, 0.9, 1.0, 300.0),
            (1.0, 1.1, 0.9, 1.0, 9000.0),
        ]);
        let avg = filter().average_volume(&s).unwrap();
        assert!((avg - 200.0).abs() < 1e-9);
    }

    #[test]
    fn average_undefined_with_short_history_or_zero_volume() {
        let short = make_candles_with_volume(&[(1.0, 1.1, 0.9, 1.0, 100.0); 3]);
        assert!(filter().average_volume(&short).is_none());

        let zero = make_candles_with_volume(&[(1.0, 1.1, 0.9, 1.0, 0.0); 5]);
        assert!(filter().average_volume(&zero).is_none());
    }

    #[test]
    fn breakout_needs_weak_volume() {
        let s = make_candles_with_volume(&[(1.0, 1.1, 0.9, 1.0, 80.0), (1.0, 1.1, 0.9, 1.0, 120.0)]);
        let f = filter();
        assert!(f.passes_breakout(&s[0], Some(100.0)));
        assert!(!f.passes_breakout(&s[1], Some(100.0)));
    }

    #[test]
    fn reversal_needs_strong_volume() {
        let s = make_candles_with_volume(&[(1.0, 1.1, 0.9, 1.0, 150.0), (1.0, 1.1, 0.9, 1.0, 149.0)]);
        let f = filter();
        assert!(f.passes_reversal(&s[0], Some(100.0)));
        assert!(!f.passes_reversal(&s[1], Some(100.0)));
    }

    #[test]
    fn missing_average_fails_closed() {
        let s = make_candles_with_volume(&[(1.0, 1.1, 0.9, 1.0, 1.0)]);
        let f = filter();
        assert!(!f.passes_breakout(&s[0], None));
        assert!(!f.passes_reversal(&s[0], None));
    }
}
