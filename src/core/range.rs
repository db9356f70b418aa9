use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::models::{Candle, CandleSeries, Direction};

/// High/low band of the most recent qualifying long-period candle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRange {
    pub high: f64,
    pub low: f64,
    pub source_timestamp: DateTime<Utc>,
}

impl ReferenceRange {
    /// Returns `None` unless `high > low`.
    pub fn new(high: f64, low: f64, source_timestamp: DateTime<Utc>) -> Option<Self> {
        (high > low && high.is_finite() && low.is_finite()).then_some(Self {
            high,
            low,
            source_timestamp,
        })
    }

    pub fn from_candle(candle: &Candle) -> Option<Self> {
        Self::new(candle.high, candle.low, candle.timestamp)
    }

    /// The boundary a side trades against: the low for longs, the high for shorts.
    pub fn boundary(&self, side: Direction) -> f64 {
        match side {
            Direction::Long => self.low,
            Direction::Short => self.high,
        }
    }

    /// Close strictly beyond the boundary, away from the range.
    pub fn is_breached(&self, side: Direction, close: f64, epsilon: f64) -> bool {
        match side {
            Direction::Long => close < self.low - epsilon,
            Direction::Short => close > self.high + epsilon,
        }
    }

    /// Close strictly back across the boundary, toward the range interior.
    pub fn is_reentered(&self, side: Direction, close: f64, epsilon: f64) -> bool {
        match side {
            Direction::Long => close > self.low + epsilon,
            Direction::Short => close < self.high - epsilon,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RangeUpdate {
    Unchanged,
    Rotated(ReferenceRange),
    /// No qualifying candle in the data yet.
    Unavailable,
}

pub struct RangeTracker {
    current: Option<ReferenceRange>,
    qualifying_hours: Vec<u32>,
    timezone: Tz,
}

impl RangeTracker {
    pub fn new(qualifying_hours: Vec<u32>, timezone: Tz) -> Self {
        Self {
            current: None,
            qualifying_hours,
            timezone,
        }
    }

    pub fn current(&self) -> Option<&ReferenceRange> {
        self.current.as_ref()
    }

    pub fn qualifies(&self, candle: &Candle) -> bool {
        if candle.high <= candle.low {
            return false;
        }
        if self.qualifying_hours.is_empty() {
            return true;
        }
        let hour = candle.timestamp.with_timezone(&self.timezone).hour();
        self.qualifying_hours.contains(&hour)
    }

    /// Picks the newest qualifying closed candle. A different source
    /// candle replaces the active range outright.
    pub fn update(&mut self, long_candles: &CandleSeries) -> RangeUpdate {
        let newest = long_candles
            .iter()
            .rev()
            .filter(|c| self.qualifies(c))
            .find_map(ReferenceRange::from_candle);

        match (newest, self.current) {
            (None, None) => RangeUpdate::Unavailable,
            (None, Some(_)) => RangeUpdate::Unchanged,
            (Some(range), Some(current)) if range.source_timestamp == current.source_timestamp => {
                RangeUpdate::Unchanged
            }
            (Some(range), Some(current)) if range.source_timestamp < current.source_timestamp => {
                // Older data than what we already hold; keep the newer range.
                RangeUpdate::Unchanged
            }
            (Some(range), _) => {
                self.current = Some(range);
                RangeUpdate::Rotated(range)
            }
        }
    }
}
