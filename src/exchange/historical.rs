use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use crate::exchange::Exchange;
use crate::models::{Candle, CandleSeries, Quote, SymbolRiskProfile, Timeframe};

/// An Exchange implementation that replays pre-loaded historical data.
/// A cursor (`now`) controls which candles are visible: only candles whose
/// close time is at or before `now` are returned, simulating a forward walk.
pub struct HistoricalExchange {
    data: HashMap<(String, Timeframe), Vec<Candle>>,
    profiles: HashMap<String, SymbolRiskProfile>,
    spread_points: HashMap<String, f64>,
    now: DateTime<Utc>,
    step: Duration,
    end: Option<DateTime<Utc>>,
    pace: Option<std::time::Duration>,
    started: bool,
}

impl Default for HistoricalExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoricalExchange {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            profiles: HashMap::new(),
            spread_points: HashMap::new(),
            now: Utc::now(),
            step: Timeframe::M5.as_chrono(),
            end: None,
            pace: None,
            started: false,
        }
    }

    /// Load candles for one symbol and timeframe. Sorted oldest-first here.
    pub fn load(&mut self, symbol: &str, tf: Timeframe, mut candles: Vec<Candle>) {
        candles.sort_by_key(|c| c.timestamp);
        self.data.insert((symbol.to_string(), tf), candles);
    }

    pub fn set_profile(&mut self, profile: SymbolRiskProfile) {
        self.profiles.insert(profile.symbol.clone(), profile);
    }

    /// Spread applied on top of the last close when quoting `symbol`.
    pub fn set_spread_points(&mut self, symbol: &str, points: f64) {
        self.spread_points.insert(symbol.to_string(), points);
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = self.profiles.keys().cloned().collect();
        out.sort();
        out
    }

    /// Clock step taken by `next_cycle`.
    pub fn set_step(&mut self, tf: Timeframe) {
        self.step = tf.as_chrono();
    }

    pub fn set_end(&mut self, end: DateTime<Utc>) {
        self.end = Some(end);
    }

    /// Real delay between cycles, for paced replays.
    pub fn set_pace(&mut self, pace: std::time::Duration) {
        self.pace = Some(pace);
    }

    /// Advance the simulation clock.
    pub fn set_time(&mut self, t: DateTime<Utc>) {
        self.now = t;
    }

    pub fn current_time(&self) -> DateTime<Utc> {
        self.now
    }

    /// Get the earliest timestamp across all loaded series.
    pub fn earliest_time(&self) -> Option<DateTime<Utc>> {
        self.data
            .values()
            .filter_map(|v| v.first().map(|c| c.timestamp))
            .min()
    }

    /// Get the latest close time across all loaded series.
    pub fn latest_time(&self) -> Option<DateTime<Utc>> {
        self.data
            .values()
            .filter_map(|v| v.last().map(|c| c.close_time()))
            .max()
    }

    /// Closed candles up to `self.now`, capped at `limit`.
    fn visible_candles(&self, symbol: &str, tf: Timeframe, limit: usize) -> CandleSeries {
        let Some(all) = self.data.get(&(symbol.to_string(), tf)) else {
            return CandleSeries::default();
        };

        // Binary search for the rightmost closed candle
        let end = match all.partition_point(|c| c.close_time() <= self.now) {
            0 => return CandleSeries::default(),
            n => n,
        };

        let start = end.saturating_sub(limit);
        CandleSeries::new(all[start..end].to_vec())
    }

    pub fn profile(&self, symbol: &str) -> Option<&SymbolRiskProfile> {
        self.profiles.get(symbol)
    }

    /// Closed candles of one series that opened strictly after `after`.
    pub fn closed_since(
        &self,
        symbol: &str,
        tf: Timeframe,
        after: Option<DateTime<Utc>>,
    ) -> &[Candle] {
        let Some(all) = self.data.get(&(symbol.to_string(), tf)) else {
            return &[];
        };
        let end = all.partition_point(|c| c.close_time() <= self.now);
        let start = after.map_or(0, |t| all[..end].partition_point(|c| c.timestamp <= t));
        &all[start..end]
    }

    /// Close of the most recent closed candle, used to mark positions.
    pub fn last_close(&self, symbol: &str) -> Option<f64> {
        self.last_closed(symbol).map(|c| c.close)
    }

    /// Most recent closed candle of `symbol` across every loaded timeframe.
    fn last_closed(&self, symbol: &str) -> Option<&Candle> {
        self.data
            .iter()
            .filter(|((s, _), _)| s == symbol)
            .filter_map(|(_, candles)| {
                let end = candles.partition_point(|c| c.close_time() <= self.now);
                end.checked_sub(1).map(|i| &candles[i])
            })
            .max_by_key(|c| c.close_time())
    }
}

#[async_trait]
impl Exchange for HistoricalExchange {
    async fn fetch_candles(
        &mut self,
        symbol: &str,
        tf: Timeframe,
        limit: usize,
    ) -> Result<CandleSeries> {
        if !self.data.contains_key(&(symbol.to_string(), tf)) {
            anyhow::bail!("no {} data loaded for {}", tf, symbol);
        }
        Ok(self.visible_candles(symbol, tf, limit))
    }

    async fn quote(&mut self, symbol: &str) -> Result<Quote> {
        let close = self
            .last_closed(symbol)
            .map(|c| c.close)
            .with_context(|| format!("no price for {} at {}", symbol, self.now))?;
        let point = self.profiles.get(symbol).map_or(0.0, |p| p.point_size);
        let spread = self.spread_points.get(symbol).copied().unwrap_or(0.0) * point;
        Ok(Quote {
            bid: close,
            ask: close + spread,
        })
    }

    async fn risk_profile(&mut self, symbol: &str) -> Result<SymbolRiskProfile> {
        self.profiles
            .get(symbol)
            .cloned()
            .with_context(|| format!("no risk profile for {}", symbol))
    }

    async fn next_cycle(&mut self) -> Option<DateTime<Utc>> {
        if !self.started {
            self.started = true;
        } else {
            if let Some(pace) = self.pace {
                tokio::time::sleep(pace).await;
            }
            self.now += self.step;
        }
        let end = self.end.or_else(|| self.latest_time())?;
        (self.now <= end).then_some(self.now)
    }
}
