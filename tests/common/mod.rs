#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};

use breakout_reversal_bot::config::Config;
use breakout_reversal_bot::exchange::HistoricalExchange;
use breakout_reversal_bot::models::{Candle, SymbolRiskProfile, Timeframe};

pub fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-15T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// 5m candle `index` bars after `base_time()`.
pub fn m5(index: i64, o: f64, h: f64, l: f64, c: f64) -> Candle {
    m5_with_volume(index, o, h, l, c, 100.0)
}

pub fn m5_with_volume(index: i64, o: f64, h: f64, l: f64, c: f64, volume: f64) -> Candle {
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

/// The 4h bar that closes at `base_time()`: high 1.10450, low 1.10200.
pub fn h4_range() -> Candle {
    Candle {
        timestamp: base_time() - Duration::hours(4),
        open: 1.10300,
        high: 1.10450,
        low: 1.10200,
        close: 1.10400,
        volume: 5000.0,
        timeframe: Timeframe::H4,
    }
}

pub fn fx_profile(symbol: &str) -> SymbolRiskProfile {
    SymbolRiskProfile {
        symbol: symbol.to_string(),
        point_size: 0.00001,
        tick_value: 1.0,
        digits: 5,
        min_lot: 0.01,
        max_lot: 100.0,
        lot_step: 0.01,
        profit_currency: "USD".to_string(),
    }
}

/// Quiet bar, breakout below 1.10200, a bullish breaching bar, then the
/// reversal close back inside.
pub fn long_reversal_candles() -> Vec<Candle> {
    vec![
        m5(0, 1.10300, 1.10320, 1.10280, 1.10310),
        m5(1, 1.10250, 1.10260, 1.10140, 1.10150),
        m5(2, 1.10130, 1.10180, 1.10120, 1.10170),
        m5(3, 1.10170, 1.10270, 1.10160, 1.10259),
    ]
}

/// Filters off, one symbol, state files under a per-test temp dir.
pub fn test_config(name: &str) -> Config {
    let mut cfg = Config::default();
    cfg.volume.enabled = false;
    cfg.divergence.enabled = false;
    cfg.symbols = vec!["EURUSD".to_string()];
    cfg.log_dir = std::env::temp_dir()
        .join(format!("breakout_bot_it_{}", name))
        .to_string_lossy()
        .to_string();
    cfg.log_level = "ERROR".to_string();
    cfg
}

/// Replay feed for `symbol` with the given 5m bars and the standard range,
/// clock at the close of the first 5m bar.
pub fn replay(symbol: &str, m5_candles: Vec<Candle>) -> HistoricalExchange {
    let mut ex = HistoricalExchange::new();
    ex.set_profile(fx_profile(symbol));
    ex.set_spread_points(symbol, 1.0);
    ex.load(symbol, Timeframe::H4, vec![h4_range()]);
    ex.load(symbol, Timeframe::M5, m5_candles);
    ex.set_time(base_time() + Duration::minutes(5));
    ex
}
