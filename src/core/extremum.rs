use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::range::ReferenceRange;
use crate::models::{Candle, CandleSeries, Direction, Timeframe};

/// Time span searched for the stop anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtremumWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ExtremumWindow {
    /// `[max(breakout, reversal - lookback bars), reversal]`.
    pub fn new(
        breakout: DateTime<Utc>,
        reversal: DateTime<Utc>,
        lookback: usize,
        tf: Timeframe,
    ) -> Self {
        let floor = reversal - tf.as_chrono() * lookback as i32;
        Self {
            start: breakout.max(floor),
            end: reversal,
        }
    }

    /// Candles to request: bars spanned by the window plus `margin`,
    /// capped at `max`.
    pub fn fetch_size(&self, tf: Timeframe, margin: usize, max: usize) -> usize {
        let span = (self.end - self.start).num_seconds().max(0) as u64;
        let bars = (span / tf.as_seconds()) as usize + 1;
        (bars + margin).min(max).max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchPass {
    /// Counter-trend polarity candles only.
    Polarity,
    /// Any boundary-breaching candle.
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtremumHit {
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    pub pass: SearchPass,
}

/// Outcome of the search. `Undefined` carries no price, so nothing
/// downstream can do arithmetic on a missing extreme.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Extremum {
    Found(ExtremumHit),
    Undefined,
}

impl Extremum {
    pub fn is_found(&self) -> bool {
        matches!(self, Extremum::Found(_))
    }

    pub fn hit(&self) -> Option<&ExtremumHit> {
        match self {
            Extremum::Found(hit) => Some(hit),
            Extremum::Undefined => None,
        }
    }
}

pub struct ExtremumFinder {
    pub epsilon: f64,
}

impl ExtremumFinder {
    pub fn new(epsilon: f64) -> Self {
        Self { epsilon }
    }

    /// Two passes over the in-window candles that closed beyond the
    /// boundary: first bullish (long) / bearish (short) candles only,
    /// then any of them.
    pub fn find(
        &self,
        candles: &CandleSeries,
        window: &ExtremumWindow,
        side: Direction,
        range: &ReferenceRange,
    ) -> Extremum {
        let breaching: Vec<&Candle> = candles
            .iter()
            .filter(|c| c.timestamp >= window.start && c.timestamp <= window.end)
            .filter(|c| range.is_breached(side, c.close, self.epsilon))
            .collect();

        let polarity_matches = |c: &Candle| match side {
            Direction::Long => c.is_bullish(),
            Direction::Short => c.is_bearish(),
        };

        let preferred = breaching
            .iter()
            .copied()
            .filter(|c| polarity_matches(*c));
        if let Some((price, timestamp)) = most_extreme(preferred, side) {
            return Extremum::Found(ExtremumHit {
                price,
                timestamp,
                pass: SearchPass::Polarity,
            });
        }

        match most_extreme(breaching.iter().copied(), side) {
            Some((price, timestamp)) => Extremum::Found(ExtremumHit {
                price,
                timestamp,
                pass: SearchPass::Fallback,
            }),
            None => Extremum::Undefined,
        }
    }
}

/// Lowest low for longs, highest high for shorts. Earliest candle wins ties.
fn most_extreme<'a, I>(candles: I, side: Direction) -> Option<(f64, DateTime<Utc>)>
where
    I: Iterator<Item = &'a Candle>,
{
    let mut best: Option<(f64, DateTime<Utc>)> = None;
    for c in candles {
        let price = match side {
            Direction::Long => c.low,
            Direction::Short => c.high,
        };
        let better = match best {
            None => true,
            Some((current, _)) => match side {
                Direction::Long => price < current,
                Direction::Short => price > current,
            },
        };
        if better {
            best = Some((price, c.timestamp));
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{base_time, candle_at};
    use chrono::Duration;

    fn range() -> ReferenceRange {
        ReferenceRange::new(1.10450, 1.10200, base_time()).unwrap()
    }

    fn full_window() -> ExtremumWindow {
        ExtremumWindow {
            start: base_time(),
            end: base_time() + Duration::hours(2),
        }
    }

    #[test]
    fn window_clamps_to_breakout() {
        let breakout = base_time() + Duration::minutes(50);
        let reversal = base_time() + Duration::minutes(60);
        let w = ExtremumWindow::new(breakout, reversal, 48, Timeframe::M5);
        assert_eq!(w.start, breakout);
        assert_eq!(w.end, reversal);
        assert_eq!(w.fetch_size(Timeframe::M5, 10, 500), 3 + 10);
    }

    #[test]
    fn window_clamps_to_lookback() {
        let breakout = base_time();
        let reversal = base_time() + Duration::hours(10);
        let w = ExtremumWindow::new(breakout, reversal, 12, Timeframe::M5);
        assert_eq!(w.start, reversal - Duration::minutes(60));
        assert_eq!(w.fetch_size(Timeframe::M5, 10, 15), 15);
    }

    #[test]
    fn pass_one_ignores_more_extreme_opposite_polarity() {
        let candles = CandleSeries::new(vec![
            // bearish, deeper low
            candle_at(1, 1.1018, 1.1019, 1.1005, 1.1010, 100.0),
            // bullish, shallower low
            candle_at(2, 1.1011, 1.1019, 1.1009, 1.1015, 100.0),
        ]);
        let result = ExtremumFinder::new(0.0).find(&candles, &full_window(), Direction::Long, &range());
        let hit = result.hit().unwrap();
        assert_eq!(hit.pass, SearchPass::Polarity);
        assert!((hit.price - 1.1009).abs() < 1e-12);
    }

    #[test]
    fn fallback_takes_global_extreme_of_breaching_candles() {
        let candles = CandleSeries::new(vec![
            candle_at(1, 1.1018, 1.1019, 1.1005, 1.1010, 100.0),
            candle_at(2, 1.1016, 1.1017, 1.1008, 1.1012, 100.0),
            // inside the range: never qualifies even with the lowest low
            candle_at(3, 1.1030, 1.1031, 1.0990, 1.1025, 100.0),
        ]);
        let result = ExtremumFinder::new(0.0).find(&candles, &full_window(), Direction::Long, &range());
        let hit = result.hit().unwrap();
        assert_eq!(hit.pass, SearchPass::Fallback);
        assert!((hit.price - 1.1005).abs() < 1e-12);
    }

    #[test]
    fn undefined_when_nothing_breaches() {
        let candles = CandleSeries::new(vec![
            candle_at(1, 1.1030, 1.1035, 1.1010, 1.1032, 100.0),
            candle_at(2, 1.1032, 1.1040, 1.1025, 1.1038, 100.0),
        ]);
        let result = ExtremumFinder::new(0.0).find(&candles, &full_window(), Direction::Long, &range());
        assert_eq!(result, Extremum::Undefined);
        assert!(!result.is_found());
    }

    #[test]
    fn candles_outside_window_are_ignored() {
        let candles = CandleSeries::new(vec![
            candle_at(1, 1.1011, 1.1019, 1.0990, 1.1015, 100.0),
            candle_at(5, 1.1011, 1.1019, 1.1010, 1.1015, 100.0),
        ]);
        let window = ExtremumWindow {
            start: base_time() + Duration::minutes(20),
            end: base_time() + Duration::minutes(30),
        };
        let hit = ExtremumFinder::new(0.0)
            .find(&candles, &window, Direction::Long, &range())
            .hit()
            .copied()
            .unwrap();
        assert!((hit.price - 1.1010).abs() < 1e-12);
    }

    #[test]
    fn short_side_uses_bearish_highs() {
        let candles = CandleSeries::new(vec![
            // bullish, higher high
            candle_at(1, 1.1046, 1.1070, 1.1045, 1.1050, 100.0),
            // bearish, lower high
            candle_at(2, 1.1055, 1.1060, 1.1046, 1.1048, 100.0),
        ]);
        let hit = ExtremumFinder::new(0.0)
            .find(&candles, &full_window(), Direction::Short, &range())
            .hit()
            .copied()
            .unwrap();
        assert_eq!(hit.pass, SearchPass::Polarity);
        assert!((hit.price - 1.1060).abs() < 1e-12);
    }
}
