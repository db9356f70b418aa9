use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Direction, PositionStatus};

/// What the adaptive controller sees of a closed trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTradeOutcome {
    pub position_id: u64,
    pub symbol: String,
    pub net_pnl: f64,
    pub closed_at: DateTime<Utc>,
}

impl ClosedTradeOutcome {
    pub fn is_win(&self) -> bool {
        self.net_pnl > 0.0
    }
}

/// Full record of a finished paper trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub position_id: u64,
    pub symbol: String,
    pub direction: Direction,
    pub lots: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub initial_stop: f64,
    pub take_profit: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub status: PositionStatus,
    pub pnl: f64,
    #[serde(default)]
    pub comment: String,
}

impl TradeRecord {
    pub fn outcome(&self) -> ClosedTradeOutcome {
        ClosedTradeOutcome {
            position_id: self.position_id,
            symbol: self.symbol.clone(),
            net_pnl: self.pnl,
            closed_at: self.exit_time,
        }
    }

    pub fn hold_duration_seconds(&self) -> i64 {
        (self.exit_time - self.entry_time).num_seconds()
    }

    /// PnL in units of initial risk.
    pub fn r_multiple(&self) -> Option<f64> {
        let risk = (self.entry_price - self.initial_stop).abs();
        if risk <= 0.0 {
            return None;
        }
        let moved = (self.exit_price - self.entry_price) * self.direction.sign();
        Some(moved / risk)
    }
}
