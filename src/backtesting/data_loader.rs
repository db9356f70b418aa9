use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

use crate::exchange::HistoricalExchange;
use crate::models::{Candle, SymbolRiskProfile, Timeframe};

/// One bar as stored on disk; the timeframe comes from the file name.
#[derive(Debug, Deserialize)]
struct CandleRow {
    timestamp: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

/// Broker contract plus an optional fixed spread for replay quotes.
#[derive(Debug, Deserialize)]
struct SymbolEntry {
    #[serde(flatten)]
    profile: SymbolRiskProfile,
    #[serde(default)]
    spread_points: f64,
}

/// Reads `{dir}/{symbol}_{tf}.json`.
pub fn load_candles(dir: &str, symbol: &str, tf: Timeframe) -> Result<Vec<Candle>> {
    let path = format!("{}/{}_{}.json", dir, symbol, tf);
    let content =
        std::fs::read_to_string(&path).with_context(|| format!("reading {}", path))?;
    let rows: Vec<CandleRow> =
        serde_json::from_str(&content).with_context(|| format!("parsing {}", path))?;

    let mut candles: Vec<Candle> = rows
        .into_iter()
        .map(|r| Candle {
            timestamp: r.timestamp,
            open: r.open,
            high: r.high,
            low: r.low,
            close: r.close,
            volume: r.volume,
            timeframe: tf,
        })
        .collect();
    // Deduplicate by timestamp and sort
    candles.sort_by_key(|c| c.timestamp);
    candles.dedup_by_key(|c| c.timestamp);
    Ok(candles)
}

/// Reads `{dir}/symbols.json`: a list of risk profiles with optional
/// `spread_points`.
pub fn load_profiles(dir: &str) -> Result<Vec<(SymbolRiskProfile, f64)>> {
    let path = format!("{}/symbols.json", dir);
    let content =
        std::fs::read_to_string(&path).with_context(|| format!("reading {}", path))?;
    let entries: Vec<SymbolEntry> =
        serde_json::from_str(&content).with_context(|| format!("parsing {}", path))?;
    Ok(entries
        .into_iter()
        .map(|e| (e.profile, e.spread_points))
        .collect())
}

/// Aggregates bars into `target` buckets aligned to the UTC epoch.
pub fn resample(candles: &[Candle], target: Timeframe) -> Vec<Candle> {
    let bucket_secs = target.as_seconds() as i64;
    let mut buckets: BTreeMap<i64, Candle> = BTreeMap::new();
    for c in candles {
        let ts = c.timestamp.timestamp();
        let key = ts - ts.rem_euclid(bucket_secs);
        buckets
            .entry(key)
            .and_modify(|b| {
                b.high = b.high.max(c.high);
                b.low = b.low.min(c.low);
                b.close = c.close;
                b.volume += c.volume;
            })
            .or_insert_with(|| Candle {
                timestamp: DateTime::from_timestamp(key, 0).unwrap_or(c.timestamp),
                timeframe: target,
                ..c.clone()
            });
    }
    buckets.into_values().collect()
}

/// Builds a replay feed for `symbols` from `dir`. A missing range series is
/// resampled from the finest series on disk.
pub fn load_exchange(
    dir: &str,
    symbols: &[String],
    range_tf: Timeframe,
    signal_tf: Timeframe,
) -> Result<HistoricalExchange> {
    let mut exchange = HistoricalExchange::new();
    for (profile, spread) in load_profiles(dir)? {
        if symbols.contains(&profile.symbol) {
            exchange.set_spread_points(&profile.symbol, spread);
            exchange.set_profile(profile);
        }
    }

    for symbol in symbols {
        if exchange.profile(symbol).is_none() {
            anyhow::bail!("{} missing from {}/symbols.json", symbol, dir);
        }
        let signal = load_candles(dir, symbol, signal_tf)?;
        info!("{}: loaded {} {} candles", symbol, signal.len(), signal_tf);

        let range_path = format!("{}/{}_{}.json", dir, symbol, range_tf);
        let range = if Path::new(&range_path).exists() {
            load_candles(dir, symbol, range_tf)?
        } else {
            warn!("{}: no {} file, resampling from {}", symbol, range_tf, signal_tf);
            resample(&signal, range_tf)
        };
        info!("{}: {} {} candles", symbol, range.len(), range_tf);

        exchange.load(symbol, signal_tf, signal);
        exchange.load(symbol, range_tf, range);
    }
    Ok(exchange)
}
