use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolCategory {
    Forex,
    Metal,
    Index,
    Energy,
    Crypto,
}

impl SymbolCategory {
    pub const ALL: [SymbolCategory; 5] = [
        SymbolCategory::Forex,
        SymbolCategory::Metal,
        SymbolCategory::Index,
        SymbolCategory::Energy,
        SymbolCategory::Crypto,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolCategory::Forex => "forex",
            SymbolCategory::Metal => "metal",
            SymbolCategory::Index => "index",
            SymbolCategory::Energy => "energy",
            SymbolCategory::Crypto => "crypto",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<SymbolCategory> {
        match s.trim().to_lowercase().as_str() {
            "forex" | "fx" => Some(SymbolCategory::Forex),
            "metal" | "metals" => Some(SymbolCategory::Metal),
            "index" | "indices" => Some(SymbolCategory::Index),
            "energy" | "energies" => Some(SymbolCategory::Energy),
            "crypto" => Some(SymbolCategory::Crypto),
            _ => None,
        }
    }
}

impl fmt::Display for SymbolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Broker contract specification, refreshed once per evaluation cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolRiskProfile {
    pub symbol: String,
    pub point_size: f64,
    /// Value of a one-point move for one lot, in `profit_currency`.
    pub tick_value: f64,
    pub digits: u32,
    pub min_lot: f64,
    pub max_lot: f64,
    pub lot_step: f64,
    pub profit_currency: String,
}

impl SymbolRiskProfile {
    pub fn price_to_points(&self, distance: f64) -> f64 {
        distance / self.point_size
    }

    pub fn round_price(&self, price: f64) -> f64 {
        let factor = 10f64.powi(self.digits as i32);
        (price * factor).round() / factor
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub balance: f64,
    pub currency: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
}

impl Quote {
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }
}
