use chrono::{DateTime, Duration, Utc};

use crate::config::Config;
use crate::models::{Candle, CandleSeries, SymbolRiskProfile, Timeframe};

pub fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-15T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Create 5m candles from (open, high, low, close) tuples with auto-incrementing timestamps.
pub fn make_candles(data: &[(f64, f64, f64, f64)]) -> CandleSeries {
    let with_volume: Vec<(f64, f64, f64, f64, f64)> = data
        .iter()
        .map(|&(o, h, l, c)| (o, h, l, c, 100.0))
        .collect();
    make_candles_with_volume(&with_volume)
}

/// Same as `make_candles` with an explicit volume per candle.
pub fn make_candles_with_volume(data: &[(f64, f64, f64, f64, f64)]) -> CandleSeries {
    let candles: Vec<Candle> = data
        .iter()
        .enumerate()
        .map(|(i, &(o, h, l, c, v))| Candle {
            timestamp: base_time() + Duration::minutes(5 * i as i64),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: v,
            timeframe: Timeframe::M5,
        })
        .collect();

    CandleSeries::new(candles)
}

/// A single 5m candle at `base_time() + 5m * index`.
pub fn candle_at(index: i64, o: f64, h: f64, l: f64, c: f64, volume: f64) -> Candle {
    Candle {
        timestamp: base_time() + Duration::minutes(5 * index),
        open: o,
        high: h,
        low: l,
        close: c,
        volume,
        timeframe: Timeframe::M5,
    }
}

pub fn eurusd_profile() -> SymbolRiskProfile {
    SymbolRiskProfile {
        symbol: "EURUSD".to_string(),
        point_size: 0.00001,
        tick_value: 1.0,
        digits: 5,
        min_lot: 0.01,
        max_lot: 100.0,
        lot_step: 0.01,
        profit_currency: "USD".to_string(),
    }
}

/// A Config suitable for testing: paper mode, filters off, temp log dir.
pub fn default_test_config() -> Config {
    let mut cfg = Config::default();
    cfg.volume.enabled = false;
    cfg.divergence.enabled = false;
    cfg.log_dir = std::env::temp_dir()
        .join("breakout_bot_test")
        .to_string_lossy()
        .to_string();
    cfg.log_level = "ERROR".to_string();
    cfg
}
