use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::config::Config;
use crate::exchange::{ExecutionGateway, OpenPosition, OrderOutcome, OrderRequest};
use crate::models::{AccountSnapshot, Candle, Direction, PositionStatus, SymbolRiskProfile};
use crate::trading::trade_record::{ClosedTradeOutcome, TradeRecord};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperPosition {
    pub position: OpenPosition,
    #[serde(default)]
    pub comment: String,
}

/// Simulated broker: fills market orders at the entry hint and settles
/// positions against later candles.
pub struct PaperTrader {
    pub balance: f64,
    currency: String,
    positions: Vec<PaperPosition>,
    trade_history: Vec<TradeRecord>,
    trade_counter: u64,
    profiles: HashMap<String, SymbolRiskProfile>,
    max_positions_per_symbol: usize,
    max_volume: f64,
    trades_file: String,
    /// When set, used instead of Utc::now() for timestamps (backtesting)
    pub sim_time: Option<DateTime<Utc>>,
    /// Per-symbol feed clocks; take precedence over `sim_time`.
    symbol_clocks: HashMap<String, DateTime<Utc>>,
}

impl PaperTrader {
    pub fn new(cfg: &Config) -> Self {
        let mut trader = Self::new_fresh(cfg);
        trader.trades_file = format!("{}/paper_trades.json", cfg.log_dir);
        trader.load_state(cfg);
        trader
    }

    /// Create a fresh trader without loading previous state (for backtesting)
    pub fn new_fresh(cfg: &Config) -> Self {
        Self {
            balance: cfg.initial_balance,
            currency: cfg.account_currency.clone(),
            positions: Vec::new(),
            trade_history: Vec::new(),
            trade_counter: 0,
            profiles: HashMap::new(),
            max_positions_per_symbol: cfg.max_positions_per_symbol,
            max_volume: cfg.max_lot,
            trades_file: String::new(),
            sim_time: None,
            symbol_clocks: HashMap::new(),
        }
    }

    pub fn register_profile(&mut self, profile: SymbolRiskProfile) {
        self.profiles.insert(profile.symbol.clone(), profile);
    }

    /// Moves `symbol`'s simulated clock forward; never backwards. Fills and
    /// exits of that symbol are stamped with its own clock, so a feed that
    /// lags another still settles against all of its candles.
    pub fn advance_clock(&mut self, symbol: &str, t: DateTime<Utc>) {
        let clock = self.symbol_clocks.entry(symbol.to_string()).or_insert(t);
        *clock = (*clock).max(t);
    }

    /// Get the current time (sim_time for backtesting, Utc::now() for live)
    fn now(&self) -> DateTime<Utc> {
        self.sim_time.unwrap_or_else(Utc::now)
    }

    fn now_for(&self, symbol: &str) -> DateTime<Utc> {
        self.symbol_clocks
            .get(symbol)
            .copied()
            .unwrap_or_else(|| self.now())
    }

    pub fn positions(&self) -> impl Iterator<Item = &OpenPosition> {
        self.positions.iter().map(|p| &p.position)
    }

    pub fn trade_history(&self) -> &[TradeRecord] {
        &self.trade_history
    }

    pub fn open_count(&self, symbol: &str) -> usize {
        self.positions
            .iter()
            .filter(|p| p.position.symbol == symbol)
            .count()
    }

    /// Unrealized PnL of every open position at the given prices.
    pub fn unrealized_pnl(&self, prices: &HashMap<String, f64>) -> f64 {
        self.positions
            .iter()
            .filter_map(|p| {
                let price = prices.get(&p.position.symbol)?;
                self.pnl_for(&p.position, *price)
            })
            .sum()
    }

    fn pnl_for(&self, pos: &OpenPosition, exit_price: f64) -> Option<f64> {
        let profile = self.profiles.get(&pos.symbol)?;
        let points = (exit_price - pos.entry_price) * pos.side.sign() / profile.point_size;
        Some(points * profile.tick_value * pos.volume)
    }

    /// Settles positions of `candle`'s symbol against its range. The stop is
    /// checked before the target when both are touched.
    pub fn on_candle(&mut self, symbol: &str, candle: &Candle) -> Vec<TradeRecord> {
        let mut closed = Vec::new();
        let mut i = 0;
        while i < self.positions.len() {
            let pos = &self.positions[i].position;
            if pos.symbol != symbol || candle.timestamp < pos.opened_at {
                i += 1;
                continue;
            }

            let hit_sl = match pos.side {
                Direction::Long => candle.low <= pos.stop_loss,
                Direction::Short => candle.high >= pos.stop_loss,
            };
            let hit_tp = match pos.side {
                Direction::Long => candle.high >= pos.take_profit,
                Direction::Short => candle.low <= pos.take_profit,
            };

            if hit_sl {
                let price = pos.stop_loss;
                closed.push(self.close_position(i, price, PositionStatus::ClosedSl));
            } else if hit_tp {
                let price = pos.take_profit;
                closed.push(self.close_position(i, price, PositionStatus::ClosedTp));
            } else {
                i += 1;
            }
        }

        if !closed.is_empty() {
            self.save_state();
        }
        closed
    }

    /// Closes one position at `price`, e.g. when a replay ends.
    pub fn close_ticket(&mut self, ticket: u64, price: f64) -> Option<TradeRecord> {
        let idx = self.positions.iter().position(|p| p.position.ticket == ticket)?;
        let record = self.close_position(idx, price, PositionStatus::ClosedManual);
        self.save_state();
        Some(record)
    }

    fn close_position(&mut self, idx: usize, exit_price: f64, status: PositionStatus) -> TradeRecord {
        let exit_time = self.now_for(&self.positions[idx].position.symbol);
        let PaperPosition { position: pos, comment } = self.positions.remove(idx);
        let pnl = self.pnl_for(&pos, exit_price).unwrap_or(0.0);
        self.balance += pnl;

        let record = TradeRecord {
            position_id: pos.ticket,
            symbol: pos.symbol,
            direction: pos.side,
            lots: pos.volume,
            entry_price: pos.entry_price,
            exit_price,
            initial_stop: pos.initial_stop,
            take_profit: pos.take_profit,
            entry_time: pos.opened_at,
            exit_time,
            status,
            pnl: round2(pnl),
            comment,
        };
        info!(
            "{} #{} {} closed ({}) at {:.5}: pnl {:.2}",
            record.symbol, record.position_id, record.direction, status, exit_price, record.pnl
        );
        self.trade_history.push(record.clone());
        record
    }

    pub fn get_stats(&self) -> TradingStats {
        let open_positions = self.positions.len();
        if self.trade_history.is_empty() {
            return TradingStats {
                total_trades: 0,
                balance: round2(self.balance),
                win_rate: 0.0,
                total_pnl: 0.0,
                avg_win: 0.0,
                avg_loss: 0.0,
                best_trade: 0.0,
                worst_trade: 0.0,
                open_positions,
            };
        }

        let wins: Vec<&TradeRecord> = self.trade_history.iter().filter(|t| t.pnl > 0.0).collect();
        let losses: Vec<&TradeRecord> = self.trade_history.iter().filter(|t| t.pnl <= 0.0).collect();

        TradingStats {
            total_trades: self.trade_history.len(),
            balance: round2(self.balance),
            win_rate: round1(wins.len() as f64 / self.trade_history.len() as f64 * 100.0),
            total_pnl: round2(self.trade_history.iter().map(|t| t.pnl).sum()),
            avg_win: if wins.is_empty() {
                0.0
            } else {
                round2(wins.iter().map(|t| t.pnl).sum::<f64>() / wins.len() as f64)
            },
            avg_loss: if losses.is_empty() {
                0.0
            } else {
                round2(losses.iter().map(|t| t.pnl).sum::<f64>() / losses.len() as f64)
            },
            best_trade: round2(
                self.trade_history
                    .iter()
                    .map(|t| t.pnl)
                    .fold(f64::NEG_INFINITY, f64::max),
            ),
            worst_trade: round2(
                self.trade_history
                    .iter()
                    .map(|t| t.pnl)
                    .fold(f64::INFINITY, f64::min),
            ),
            open_positions,
        }
    }

    fn save_state(&self) {
        if self.trades_file.is_empty() {
            return;
        }
        if let Some(parent) = Path::new(&self.trades_file).parent() {
            let _ = fs::create_dir_all(parent);
        }

        let state = serde_json::json!({
            "balance": self.balance,
            "trade_counter": self.trade_counter,
            "positions": self.positions,
            "trade_history": self.trade_history,
        });

        if let Ok(json) = serde_json::to_string_pretty(&state) {
            let _ = fs::write(&self.trades_file, json);
        }
    }

    fn load_state(&mut self, cfg: &Config) {
        let Ok(content) = fs::read_to_string(&self.trades_file) else {
            return;
        };
        let Ok(state) = serde_json::from_str::<serde_json::Value>(&content) else {
            return;
        };
        self.balance = state["balance"].as_f64().unwrap_or(cfg.initial_balance);
        self.trade_counter = state["trade_counter"].as_u64().unwrap_or(0);
        if let Ok(positions) = serde_json::from_value::<Vec<PaperPosition>>(state["positions"].clone()) {
            self.positions = positions;
        }
        if let Ok(history) = serde_json::from_value::<Vec<TradeRecord>>(state["trade_history"].clone()) {
            self.trade_history = history;
        }
        info!(
            "Paper trader restored: balance {:.2}, {} open, {} closed",
            self.balance,
            self.positions.len(),
            self.trade_history.len()
        );
    }

    fn rejection(&self, req: &OrderRequest) -> Option<String> {
        if !(req.volume.is_finite() && req.volume > 0.0) {
            return Some(format!("invalid volume {}", req.volume));
        }
        if req.volume > self.max_volume {
            return Some(format!("volume {} above cap {}", req.volume, self.max_volume));
        }
        if !self.profiles.contains_key(&req.symbol) {
            return Some(format!("unknown symbol {}", req.symbol));
        }
        if self.open_count(&req.symbol) >= self.max_positions_per_symbol {
            return Some(format!(
                "{} already has {} open positions",
                req.symbol, self.max_positions_per_symbol
            ));
        }
        let stops_valid = match req.side {
            Direction::Long => req.stop_loss < req.entry_hint && req.take_profit > req.entry_hint,
            Direction::Short => req.stop_loss > req.entry_hint && req.take_profit < req.entry_hint,
        };
        if !stops_valid {
            return Some("invalid stops".to_string());
        }
        None
    }
}

#[async_trait]
impl ExecutionGateway for PaperTrader {
    async fn place_order(&mut self, req: OrderRequest) -> Result<OrderOutcome> {
        if let Some(reason) = self.rejection(&req) {
            warn!("{}: paper order rejected: {}", req.symbol, reason);
            return Ok(OrderOutcome::Rejected { reason });
        }

        self.trade_counter += 1;
        let ticket = self.trade_counter;
        let position = OpenPosition {
            ticket,
            symbol: req.symbol.clone(),
            side: req.side,
            volume: req.volume,
            entry_price: req.entry_hint,
            stop_loss: req.stop_loss,
            take_profit: req.take_profit,
            initial_stop: req.stop_loss,
            opened_at: self.now_for(&req.symbol),
        };
        info!(
            "{} #{} {} {:.2} lots @ {:.5} sl={:.5} tp={:.5}",
            position.symbol,
            ticket,
            position.side,
            position.volume,
            position.entry_price,
            position.stop_loss,
            position.take_profit
        );
        self.positions.push(PaperPosition {
            position,
            comment: req.comment,
        });
        self.save_state();
        Ok(OrderOutcome::Placed { ticket })
    }

    async fn modify_order(&mut self, ticket: u64, stop_loss: f64, take_profit: f64) -> Result<()> {
        let Some(p) = self.positions.iter_mut().find(|p| p.position.ticket == ticket) else {
            bail!("no open position #{}", ticket);
        };
        p.position.stop_loss = stop_loss;
        p.position.take_profit = take_profit;
        self.save_state();
        Ok(())
    }

    async fn open_positions(&mut self, symbol: &str) -> Result<Vec<OpenPosition>> {
        Ok(self
            .positions
            .iter()
            .filter(|p| p.position.symbol == symbol)
            .map(|p| p.position.clone())
            .collect())
    }

    async fn closed_trade_outcomes(
        &mut self,
        symbol: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ClosedTradeOutcome>> {
        Ok(self
            .trade_history
            .iter()
            .filter(|t| t.symbol == symbol && t.exit_time >= since)
            .map(TradeRecord::outcome)
            .collect())
    }

    async fn account_snapshot(&mut self) -> Result<AccountSnapshot> {
        Ok(AccountSnapshot {
            balance: self.balance,
            currency: self.currency.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct TradingStats {
    pub total_trades: usize,
    pub balance: f64,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub best_trade: f64,
    pub worst_trade: f64,
    pub open_positions: usize,
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}
fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
