use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Timeframe;

/// A closed OHLCV bar. `timestamp` is the bar's open time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub timeframe: Timeframe,
}

impl Candle {
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn total_range(&self) -> f64 {
        self.high - self.low
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    pub fn close_time(&self) -> DateTime<Utc> {
        self.timestamp + self.timeframe.as_chrono()
    }

    /// A bar is closed once its full duration has elapsed at `now`.
    pub fn is_closed_at(&self, now: DateTime<Utc>) -> bool {
        self.close_time() <= now
    }
}

/// Oldest-first sequence of candles of one timeframe.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CandleSeries {
    candles: Vec<Candle>,
}

impl CandleSeries {
    pub fn new(candles: Vec<Candle>) -> Self {
        Self { candles }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Candle> {
        self.candles.get(index)
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn first(&self) -> Option<&Candle> {
        self.candles.first()
    }

    pub fn tail(&self, n: usize) -> CandleSeries {
        let start = self.candles.len().saturating_sub(n);
        CandleSeries::new(self.candles[start..].to_vec())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Candle> {
        self.candles.iter()
    }

    pub fn as_slice(&self) -> &[Candle] {
        &self.candles
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.volume).collect()
    }

    /// Candles whose open time falls inside `[start, end]`.
    pub fn between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> CandleSeries {
        let candles: Vec<Candle> = self
            .candles
            .iter()
            .filter(|c| c.timestamp >= start && c.timestamp <= end)
            .cloned()
            .collect();
        CandleSeries::new(candles)
    }

    pub fn push(&mut self, candle: Candle) {
        self.candles.push(candle);
    }
}

impl std::ops::Index<usize> for CandleSeries {
    type Output = Candle;
    fn index(&self, index: usize) -> &Self::Output {
        &self.candles[index]
    }
}

impl IntoIterator for CandleSeries {
    type Item = Candle;
    type IntoIter = std::vec::IntoIter<Candle>;
    fn into_iter(self) -> Self::IntoIter {
        self.candles.into_iter()
    }
}

impl<'a> IntoIterator for &'a CandleSeries {
    type Item = &'a Candle;
    type IntoIter = std::slice::Iter<'a, Candle>;
    fn into_iter(self) -> Self::IntoIter {
        self.candles.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{base_time, make_candles};

    fn bullish_candle() -> Candle {
        Candle {
            timestamp: base_time(),
            open: 1.1000,
            high: 1.1015,
            low: 1.0995,
            close: 1.1010,
            volume: 50.0,
            timeframe: Timeframe::M5,
        }
    }

    #[test]
    fn candle_polarity() {
        let c = bullish_candle();
        assert!(c.is_bullish());
        assert!(!c.is_bearish());

        let doji = Candle {
            close: c.open,
            ..c
        };
        assert!(!doji.is_bullish());
        assert!(!doji.is_bearish());
    }

    #[test]
    fn candle_body_and_range() {
        let c = bullish_candle();
        assert!((c.body() - 0.0010).abs() < 1e-9);
        assert!((c.total_range() - 0.0020).abs() < 1e-9);
    }

    #[test]
    fn close_time_adds_one_bar() {
        let c = bullish_candle();
        assert_eq!(c.close_time(), base_time() + chrono::Duration::minutes(5));
        assert!(!c.is_closed_at(base_time() + chrono::Duration::minutes(4)));
        assert!(c.is_closed_at(base_time() + chrono::Duration::minutes(5)));
    }

    #[test]
    fn between_is_inclusive_on_both_ends() {
        let s = make_candles(&[
            (1.0, 1.2, 0.9, 1.1),
            (1.1, 1.3, 1.0, 1.2),
            (1.2, 1.4, 1.1, 1.3),
            (1.3, 1.5, 1.2, 1.4),
        ]);
        let w = s.between(s[1].timestamp, s[2].timestamp);
        assert_eq!(w.len(), 2);
        assert!((w[0].open - 1.1).abs() < 1e-9);
    }

    #[test]
    fn tail_clamps_to_length() {
        let s = make_candles(&[(1.0, 1.2, 0.9, 1.1), (1.1, 1.3, 1.0, 1.2)]);
        assert_eq!(s.tail(10).len(), 2);
        assert_eq!(s.tail(1)[0].close, 1.2);
    }
}
