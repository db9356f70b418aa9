use serde::{Deserialize, Serialize};

use crate::core::extremum::Extremum;
use crate::error::SignalAbort;
use crate::models::{Direction, SymbolRiskProfile};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProtectiveLevels {
    pub stop_loss: f64,
    pub take_profit: f64,
    /// |entry - stop|, in price units.
    pub risk_distance: f64,
}

impl ProtectiveLevels {
    /// Rounds both levels to the instrument's digits. Callers must
    /// re-validate afterwards since rounding can pull the stop onto entry.
    pub fn rounded(&self, profile: &SymbolRiskProfile, entry: f64) -> Self {
        let stop_loss = profile.round_price(self.stop_loss);
        Self {
            stop_loss,
            take_profit: profile.round_price(self.take_profit),
            risk_distance: (entry - stop_loss).abs(),
        }
    }

    /// Last check before any order attempt.
    pub fn validate(&self, side: Direction, entry: f64) -> Result<(), SignalAbort> {
        if !(self.stop_loss.is_finite() && self.take_profit.is_finite()) {
            return Err(SignalAbort::InvalidLevels("non-finite level".into()));
        }
        if self.stop_loss <= 0.0 {
            return Err(SignalAbort::InvalidLevels(format!(
                "stop loss {:.5} not positive",
                self.stop_loss
            )));
        }
        if self.take_profit <= 0.0 {
            return Err(SignalAbort::InvalidLevels(format!(
                "take profit {:.5} not positive",
                self.take_profit
            )));
        }
        if !is_protective(side, entry, self.stop_loss) {
            return Err(SignalAbort::InvalidLevels(format!(
                "stop {:.5} not beyond entry {:.5} for {}",
                self.stop_loss, entry, side
            )));
        }
        Ok(())
    }
}

fn is_protective(side: Direction, entry: f64, stop: f64) -> bool {
    match side {
        Direction::Long => stop < entry,
        Direction::Short => stop > entry,
    }
}

/// Stop = extreme -/+ extreme x buffer, target = entry +/- risk x reward.
pub fn compute_levels(
    side: Direction,
    extremum: &Extremum,
    entry: f64,
    buffer_ratio: f64,
    reward_ratio: f64,
) -> Result<ProtectiveLevels, SignalAbort> {
    let Extremum::Found(hit) = extremum else {
        return Err(SignalAbort::UndefinedExtremum);
    };
    let extreme = hit.price;

    let stop_loss = match side {
        Direction::Long => extreme - extreme * buffer_ratio,
        Direction::Short => extreme + extreme * buffer_ratio,
    };
    if !is_protective(side, entry, stop_loss) {
        return Err(SignalAbort::InvalidLevels(format!(
            "stop {:.5} on the wrong side of entry {:.5} for {}",
            stop_loss, entry, side
        )));
    }

    let risk_distance = (entry - stop_loss).abs();
    let take_profit = match side {
        Direction::Long => entry + risk_distance * reward_ratio,
        Direction::Short => entry - risk_distance * reward_ratio,
    };

    let levels = ProtectiveLevels {
        stop_loss,
        take_profit,
        risk_distance,
    };
    levels.validate(side, entry)?;
    Ok(levels)
}
