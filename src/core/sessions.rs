use anyhow::{anyhow, Result};
use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;

use crate::config::TradingWindow;

/// Daily trading window in a named timezone. Breakout and reversal
/// transitions are only evaluated inside it.
#[derive(Debug, Clone, Copy)]
pub struct SessionWindow {
    start_min: u32,
    end_min: u32,
    pub timezone: Tz,
}

impl SessionWindow {
    pub fn new(window: &TradingWindow) -> Result<Self> {
        Ok(Self {
            start_min: window.start.0 * 60 + window.start.1,
            end_min: window.end.0 * 60 + window.end.1,
            timezone: parse_timezone(&window.timezone)?,
        })
    }

    pub fn always_open(&self) -> bool {
        self.start_min == self.end_min
    }

    pub fn contains(&self, utc: DateTime<Utc>) -> bool {
        if self.always_open() {
            return true;
        }
        let local = utc.with_timezone(&self.timezone);
        let minute = local.hour() * 60 + local.minute();
        if self.start_min < self.end_min {
            minute >= self.start_min && minute < self.end_min
        } else {
            // Wraps midnight (e.g. 22:00 - 02:00)
            minute >= self.start_min || minute < self.end_min
        }
    }
}

pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| anyhow!("unknown timezone '{}'", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn window(start: (u32, u32), end: (u32, u32), tz: &str) -> SessionWindow {
        SessionWindow::new(&TradingWindow {
            start,
            end,
            timezone: tz.to_string(),
        })
        .unwrap()
    }

    fn utc(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, h, m, 0).unwrap()
    }

    #[test]
    fn equal_bounds_mean_always_open() {
        let w = window((0, 0), (0, 0), "UTC");
        assert!(w.always_open());
        assert!(w.contains(utc(3, 17)));
    }

    #[test]
    fn plain_window_is_half_open() {
        let w = window((8, 0), (17, 0), "UTC");
        assert!(w.contains(utc(8, 0)));
        assert!(w.contains(utc(16, 59)));
        assert!(!w.contains(utc(17, 0)));
        assert!(!w.contains(utc(7, 59)));
    }

    #[test]
    fn window_wrapping_midnight() {
        let w = window((22, 0), (2, 0), "UTC");
        assert!(w.contains(utc(23, 30)));
        assert!(w.contains(utc(1, 0)));
        assert!(!w.contains(utc(12, 0)));
    }

    #[test]
    fn window_in_named_timezone() {
        // 09:30-16:00 New York in January is 14:30-21:00 UTC
        let w = window((9, 30), (16, 0), "America/New_York");
        assert!(w.contains(utc(15, 0)));
        assert!(!w.contains(utc(13, 0)));
    }

    #[test]
    fn unknown_timezone_is_an_error() {
        let err = SessionWindow::new(&TradingWindow {
            start: (8, 0),
            end: (9, 0),
            timezone: "Mars/Olympus".into(),
        });
        assert!(err.is_err());
    }
}
