use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::models::{DivergenceMode, SymbolCategory, Timeframe};

pub type SharedConfig = Arc<RwLock<Config>>;

/// Daily trading window as (hour, minute) pairs in `timezone`.
/// `start == end` keeps the window open all day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingWindow {
    pub start: (u32, u32),
    pub end: (u32, u32),
    pub timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeFilterConfig {
    pub enabled: bool,
    pub average_window: usize,
    pub breakout_max_multiplier: f64,
    pub reversal_min_multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DivergenceConfig {
    pub enabled: bool,
    pub mode: DivergenceMode,
    /// Candles searched backwards for the prior swing.
    pub lookback: usize,
    /// Neighbours on each side a swing must dominate.
    pub swing_strength: usize,
    pub rsi_period: usize,
    pub momentum_period: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakEvenConfig {
    pub enabled: bool,
    /// Favourable move, in multiples of the initial risk, before the stop moves.
    pub trigger_r: f64,
    pub offset_points: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CategoryProfile {
    /// Fraction of the extremum price added beyond it for the stop.
    pub stop_buffer_ratio: f64,
    pub loss_threshold: u32,
    pub win_recovery_threshold: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Account
    pub symbols: Vec<String>,
    pub account_currency: String,
    pub paper_trade: bool,
    pub initial_balance: f64,

    // Timeframes
    pub range_tf: Timeframe,
    pub signal_tf: Timeframe,
    /// Open hours (window timezone) of range candles that qualify; empty = all.
    pub range_hours: Vec<u32>,
    pub range_history: usize,
    pub trading_window: TradingWindow,

    // Confirmation filters (baseline)
    pub volume: VolumeFilterConfig,
    pub divergence: DivergenceConfig,

    // Extremum search
    pub extremum_lookback: usize,
    pub extremum_fetch_margin: usize,
    pub extremum_max_fetch: usize,

    // Levels
    pub reward_ratio: f64,
    pub boundary_epsilon_points: f64,

    // Risk
    pub risk_percent: f64,
    pub risk_tolerance_multiplier: f64,
    pub min_lot: f64,
    pub max_lot: f64,
    pub max_spread_points: f64,
    pub max_positions_per_symbol: usize,
    pub break_even: BreakEvenConfig,

    // Symbol categories
    pub symbol_categories: HashMap<String, SymbolCategory>,
    pub category_profiles: HashMap<SymbolCategory, CategoryProfile>,
    pub default_category: SymbolCategory,

    // Runtime
    pub poll_interval_secs: u64,
    pub data_dir: String,
    pub log_dir: String,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        let mut category_profiles = HashMap::new();
        category_profiles.insert(
            SymbolCategory::Forex,
            CategoryProfile {
                stop_buffer_ratio: 0.0002,
                loss_threshold: 3,
                win_recovery_threshold: 2,
            },
        );
        category_profiles.insert(
            SymbolCategory::Metal,
            CategoryProfile {
                stop_buffer_ratio: 0.0005,
                loss_threshold: 2,
                win_recovery_threshold: 2,
            },
        );
        category_profiles.insert(
            SymbolCategory::Index,
            CategoryProfile {
                stop_buffer_ratio: 0.0003,
                loss_threshold: 3,
                win_recovery_threshold: 2,
            },
        );
        category_profiles.insert(
            SymbolCategory::Energy,
            CategoryProfile {
                stop_buffer_ratio: 0.0005,
                loss_threshold: 2,
                win_recovery_threshold: 2,
            },
        );
        category_profiles.insert(
            SymbolCategory::Crypto,
            CategoryProfile {
                stop_buffer_ratio: 0.001,
                loss_threshold: 2,
                win_recovery_threshold: 3,
            },
        );

        let symbol_categories = parse_category_table(
            "EURUSD:forex,GBPUSD:forex,USDJPY:forex,EURJPY:forex,XAUUSD:metal,\
             US30:index,NAS100:index,USOIL:energy,BTCUSD:crypto",
        );

        Config {
            symbols: vec!["EURUSD".to_string()],
            account_currency: "USD".to_string(),
            paper_trade: true,
            initial_balance: 10_000.0,
            range_tf: Timeframe::H4,
            signal_tf: Timeframe::M5,
            range_hours: Vec::new(),
            range_history: 12,
            trading_window: TradingWindow {
                start: (0, 0),
                end: (0, 0),
                timezone: "UTC".to_string(),
            },
            volume: VolumeFilterConfig {
                enabled: true,
                average_window: 20,
                breakout_max_multiplier: 1.0,
                reversal_min_multiplier: 1.2,
            },
            divergence: DivergenceConfig {
                enabled: false,
                mode: DivergenceMode::Lenient,
                lookback: 30,
                swing_strength: 2,
                rsi_period: 14,
                momentum_period: 14,
            },
            extremum_lookback: 48,
            extremum_fetch_margin: 10,
            extremum_max_fetch: 500,
            reward_ratio: 2.0,
            boundary_epsilon_points: 0.0,
            risk_percent: 1.0,
            risk_tolerance_multiplier: 1.5,
            min_lot: 0.01,
            max_lot: 50.0,
            max_spread_points: 0.0,
            max_positions_per_symbol: 2,
            break_even: BreakEvenConfig {
                enabled: false,
                trigger_r: 1.0,
                offset_points: 0.0,
            },
            symbol_categories,
            category_profiles,
            default_category: SymbolCategory::Forex,
            poll_interval_secs: 10,
            data_dir: "data".to_string(),
            log_dir: "logs".to_string(),
            log_level: "INFO".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let mut cfg = Config::default();

        if let Ok(symbols) = std::env::var("SYMBOLS") {
            let parsed: Vec<String> = symbols
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
            if !parsed.is_empty() {
                cfg.symbols = parsed;
            }
        }

        cfg.account_currency = env_or("ACCOUNT_CURRENCY", cfg.account_currency).to_uppercase();
        cfg.paper_trade = env_or("PAPER_TRADE", cfg.paper_trade);
        cfg.initial_balance = env_or("INITIAL_BALANCE", cfg.initial_balance);

        if let Some(tf) = std::env::var("RANGE_TF")
            .ok()
            .and_then(|s| Timeframe::from_str_loose(&s))
        {
            cfg.range_tf = tf;
        }
        if let Some(tf) = std::env::var("SIGNAL_TF")
            .ok()
            .and_then(|s| Timeframe::from_str_loose(&s))
        {
            cfg.signal_tf = tf;
        }
        if let Ok(hours) = std::env::var("RANGE_HOURS") {
            cfg.range_hours = hours
                .split(',')
                .filter_map(|h| h.trim().parse().ok())
                .filter(|h| *h < 24)
                .collect();
        }
        if let Some((start, end)) = std::env::var("TRADING_WINDOW")
            .ok()
            .and_then(|s| parse_window(&s))
        {
            cfg.trading_window.start = start;
            cfg.trading_window.end = end;
        }
        cfg.trading_window.timezone = env_or("TRADING_TZ", cfg.trading_window.timezone);

        cfg.volume.enabled = env_or("VOLUME_FILTER", cfg.volume.enabled);
        cfg.volume.average_window = env_or("VOLUME_AVG_WINDOW", cfg.volume.average_window);
        cfg.volume.breakout_max_multiplier =
            env_or("VOLUME_BREAKOUT_MAX", cfg.volume.breakout_max_multiplier);
        cfg.volume.reversal_min_multiplier =
            env_or("VOLUME_REVERSAL_MIN", cfg.volume.reversal_min_multiplier);

        cfg.divergence.enabled = env_or("DIVERGENCE_FILTER", cfg.divergence.enabled);
        if env_or("DIVERGENCE_STRICT", false) {
            cfg.divergence.mode = DivergenceMode::Strict;
        }
        cfg.divergence.lookback = env_or("DIVERGENCE_LOOKBACK", cfg.divergence.lookback);
        cfg.divergence.rsi_period = env_or("RSI_PERIOD", cfg.divergence.rsi_period);
        cfg.divergence.momentum_period = env_or("MOMENTUM_PERIOD", cfg.divergence.momentum_period);

        cfg.extremum_lookback = env_or("EXTREMUM_LOOKBACK", cfg.extremum_lookback);
        cfg.extremum_max_fetch = env_or("EXTREMUM_MAX_FETCH", cfg.extremum_max_fetch);
        cfg.reward_ratio = env_or("REWARD_RATIO", cfg.reward_ratio);
        cfg.boundary_epsilon_points = env_or("BOUNDARY_EPSILON_POINTS", cfg.boundary_epsilon_points);

        cfg.risk_percent = env_or("RISK_PERCENT", cfg.risk_percent);
        cfg.risk_tolerance_multiplier = env_or("RISK_TOLERANCE", cfg.risk_tolerance_multiplier);
        cfg.min_lot = env_or("MIN_LOT", cfg.min_lot);
        cfg.max_lot = env_or("MAX_LOT", cfg.max_lot);
        cfg.max_spread_points = env_or("MAX_SPREAD_POINTS", cfg.max_spread_points);

        cfg.break_even.enabled = env_or("BREAK_EVEN", cfg.break_even.enabled);
        cfg.break_even.trigger_r = env_or("BREAK_EVEN_TRIGGER_R", cfg.break_even.trigger_r);
        cfg.break_even.offset_points = env_or("BREAK_EVEN_OFFSET_POINTS", cfg.break_even.offset_points);

        if let Ok(table) = std::env::var("SYMBOL_CATEGORIES") {
            cfg.symbol_categories.extend(parse_category_table(&table));
        }

        cfg.poll_interval_secs = env_or("POLL_INTERVAL_SECS", cfg.poll_interval_secs);
        cfg.data_dir = env_or("DATA_DIR", cfg.data_dir);
        cfg.log_dir = env_or("LOG_DIR", cfg.log_dir);
        cfg.log_level = env_or("LOG_LEVEL", cfg.log_level);

        cfg
    }

    pub fn shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }

    pub fn category_for(&self, symbol: &str) -> SymbolCategory {
        self.symbol_categories
            .get(symbol)
            .copied()
            .unwrap_or(self.default_category)
    }

    pub fn category_profile(&self, symbol: &str) -> CategoryProfile {
        let category = self.category_for(symbol);
        self.category_profiles
            .get(&category)
            .copied()
            .unwrap_or(CategoryProfile {
                stop_buffer_ratio: 0.0002,
                loss_threshold: 3,
                win_recovery_threshold: 2,
            })
    }

    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            bail!("no symbols configured");
        }
        if self.risk_percent <= 0.0 || self.risk_percent > 100.0 {
            bail!("risk_percent must be in (0, 100], got {}", self.risk_percent);
        }
        if self.risk_tolerance_multiplier < 1.0 {
            bail!(
                "risk_tolerance_multiplier must be >= 1, got {}",
                self.risk_tolerance_multiplier
            );
        }
        if self.reward_ratio <= 0.0 {
            bail!("reward_ratio must be positive, got {}", self.reward_ratio);
        }
        if self.min_lot <= 0.0 || self.min_lot > self.max_lot {
            bail!("lot bounds invalid: min {} max {}", self.min_lot, self.max_lot);
        }
        if self.range_tf.as_seconds() <= self.signal_tf.as_seconds() {
            bail!(
                "range timeframe {} must be longer than signal timeframe {}",
                self.range_tf,
                self.signal_tf
            );
        }
        if self.volume.average_window == 0 {
            bail!("volume average window must be at least one candle");
        }
        for (category, profile) in &self.category_profiles {
            if profile.loss_threshold == 0 || profile.win_recovery_threshold == 0 {
                bail!("{} adaptive thresholds must be non-zero", category);
            }
            if profile.stop_buffer_ratio < 0.0 {
                bail!("{} stop buffer must not be negative", category);
            }
        }
        if self.trading_window.timezone.parse::<chrono_tz::Tz>().is_err() {
            bail!("unknown timezone '{}'", self.trading_window.timezone);
        }
        Ok(())
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Parses `SYMBOL:category` pairs separated by commas. Unknown categories are skipped.
pub fn parse_category_table(table: &str) -> HashMap<String, SymbolCategory> {
    table
        .split(',')
        .filter_map(|entry| {
            let (symbol, category) = entry.split_once(':')?;
            let category = SymbolCategory::from_str_loose(category)?;
            Some((symbol.trim().to_uppercase(), category))
        })
        .collect()
}

/// Parses `HH:MM-HH:MM`.
fn parse_window(s: &str) -> Option<((u32, u32), (u32, u32))> {
    let (start, end) = s.split_once('-')?;
    Some((parse_hm(start)?, parse_hm(end)?))
}

fn parse_hm(s: &str) -> Option<(u32, u32)> {
    let (h, m) = s.trim().split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    (h < 24 && m < 60).then_some((h, m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn category_table_parsing() {
        let table = parse_category_table("xauusd:metal, GER40:index,BAD:nothing");
        assert_eq!(table.get("XAUUSD"), Some(&SymbolCategory::Metal));
        assert_eq!(table.get("GER40"), Some(&SymbolCategory::Index));
        assert!(!table.contains_key("BAD"));
    }

    #[test]
    fn unknown_symbol_uses_default_category() {
        let cfg = Config::default();
        assert_eq!(cfg.category_for("XAUUSD"), SymbolCategory::Metal);
        assert_eq!(cfg.category_for("AUDCAD"), SymbolCategory::Forex);
        assert_eq!(cfg.category_profile("XAUUSD").loss_threshold, 2);
    }

    #[test]
    fn window_parsing() {
        assert_eq!(parse_window("08:00-16:30"), Some(((8, 0), (16, 30))));
        assert_eq!(parse_window("25:00-16:30"), None);
        assert_eq!(parse_window("0800"), None);
    }

    #[test]
    fn validate_rejects_inverted_timeframes() {
        let mut cfg = Config::default();
        cfg.range_tf = Timeframe::M1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_tolerance_below_one() {
        let mut cfg = Config::default();
        cfg.risk_tolerance_multiplier = 0.5;
        assert!(cfg.validate().is_err());
    }
}
