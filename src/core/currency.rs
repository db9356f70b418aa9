use serde::{Deserialize, Serialize};

use crate::models::Quote;

const SEPARATORS: [&str; 4] = ["", "/", "-", "_"];

/// A symbol that may quote the profit currency against the account currency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairCandidate {
    pub symbol: String,
    /// Quoted as ACCOUNT/PROFIT, so the rate is 1 / mid.
    pub inverse: bool,
}

impl PairCandidate {
    /// Units of account currency per unit of profit currency.
    pub fn rate_from(&self, quote: &Quote) -> Option<f64> {
        let mid = quote.mid();
        if !mid.is_finite() || mid <= 0.0 {
            return None;
        }
        Some(if self.inverse { 1.0 / mid } else { mid })
    }
}

/// Direct pairs first, then inverse pairs, each in plain and separated forms.
pub fn candidate_pairs(profit: &str, account: &str) -> Vec<PairCandidate> {
    let profit = profit.trim().to_uppercase();
    let account = account.trim().to_uppercase();
    let mut out = Vec::with_capacity(SEPARATORS.len() * 2);
    for inverse in [false, true] {
        let (base, quote) = if inverse {
            (&account, &profit)
        } else {
            (&profit, &account)
        };
        for sep in SEPARATORS {
            out.push(PairCandidate {
                symbol: format!("{}{}{}", base, sep, quote),
                inverse,
            });
        }
    }
    out
}

/// How the broker tick value relates to the account currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TickConversion {
    /// Profit currency already equals the account currency.
    Native,
    Rate { pair: String, rate: f64 },
    /// No pair could be quoted; the tick value is used unconverted.
    Unavailable,
}

impl TickConversion {
    pub fn apply(&self, tick_value: f64) -> f64 {
        match self {
            TickConversion::Rate { rate, .. } => tick_value * rate,
            TickConversion::Native | TickConversion::Unavailable => tick_value,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, TickConversion::Unavailable)
    }
}

pub fn same_currency(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}
