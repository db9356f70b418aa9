use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::extremum::ExtremumHit;
use crate::core::position_sizer::SizingConfidence;
use crate::exchange::OrderRequest;
use crate::models::Direction;

/// A fully validated order intent. Built only after a side reaches
/// ReversalConfirmed and every downstream check passed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSignal {
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub lot_size: f64,
    pub breakout_time: DateTime<Utc>,
    pub reversal_time: DateTime<Utc>,
    pub extremum: ExtremumHit,
    pub sizing_confidence: SizingConfidence,
    pub reason: String,
}

impl TradeSignal {
    pub fn risk_reward(&self) -> f64 {
        let risk = (self.entry_price - self.stop_loss).abs();
        if risk <= 0.0 {
            return 0.0;
        }
        (self.take_profit - self.entry_price).abs() / risk
    }

    /// Consumes the signal; it is submitted at most once.
    pub fn into_order(self) -> OrderRequest {
        OrderRequest {
            symbol: self.symbol,
            side: self.direction,
            volume: self.lot_size,
            entry_hint: self.entry_price,
            stop_loss: self.stop_loss,
            take_profit: self.take_profit,
            comment: self.reason,
        }
    }
}
