pub mod historical;
pub mod serialized;

pub use historical::HistoricalExchange;
pub use serialized::SerializedGateway;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{AccountSnapshot, CandleSeries, Direction, Quote, SymbolRiskProfile, Timeframe};
use crate::trading::trade_record::ClosedTradeOutcome;

/// Market data and broker contract information.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Up to `limit` most recent closed candles, oldest first.
    async fn fetch_candles(
        &mut self,
        symbol: &str,
        tf: Timeframe,
        limit: usize,
    ) -> Result<CandleSeries>;

    async fn quote(&mut self, symbol: &str) -> Result<Quote>;

    async fn risk_profile(&mut self, symbol: &str) -> Result<SymbolRiskProfile>;

    /// Broker-side loss for one lot between `entry` and `stop`, in account
    /// currency. `None` when the feed cannot compute it.
    async fn loss_per_lot(
        &mut self,
        _symbol: &str,
        _side: Direction,
        _entry: f64,
        _stop: f64,
    ) -> Result<Option<f64>> {
        Ok(None)
    }

    /// Waits for the next evaluation point. `None` once the feed is exhausted.
    async fn next_cycle(&mut self) -> Option<DateTime<Utc>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Direction,
    pub volume: f64,
    pub entry_hint: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderOutcome {
    Placed { ticket: u64 },
    Rejected { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub ticket: u64,
    pub symbol: String,
    pub side: Direction,
    pub volume: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// Stop at fill time, before any modification.
    pub initial_stop: f64,
    pub opened_at: DateTime<Utc>,
}

impl OpenPosition {
    pub fn initial_risk(&self) -> f64 {
        (self.entry_price - self.initial_stop).abs()
    }
}

#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    async fn place_order(&mut self, req: OrderRequest) -> Result<OrderOutcome>;

    async fn modify_order(&mut self, ticket: u64, stop_loss: f64, take_profit: f64) -> Result<()>;

    async fn open_positions(&mut self, symbol: &str) -> Result<Vec<OpenPosition>>;

    /// Outcomes of positions on `symbol` closed at or after `since`.
    async fn closed_trade_outcomes(
        &mut self,
        symbol: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ClosedTradeOutcome>>;

    async fn account_snapshot(&mut self) -> Result<AccountSnapshot>;
}
