use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Config;
use crate::core::currency::TickConversion;
use crate::error::SignalAbort;
use crate::models::SymbolRiskProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingConfidence {
    Full,
    /// Tick value could not be converted into the account currency.
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSize {
    pub lots: f64,
    pub risk_amount: f64,
    pub actual_risk_percent: f64,
    pub tick_value_used: f64,
    pub confidence: SizingConfidence,
    /// Lot was cut back after the post-hoc risk check.
    pub reduced: bool,
}

pub struct SizingRequest<'a> {
    pub balance: f64,
    pub entry: f64,
    pub stop_loss: f64,
    pub profile: &'a SymbolRiskProfile,
    pub conversion: &'a TickConversion,
    /// Broker-computed loss for one lot between entry and stop, in
    /// account currency. Preferred over tick value arithmetic when present.
    pub broker_loss_per_lot: Option<f64>,
}

pub struct PositionSizer {
    pub risk_percent: f64,
    pub tolerance_multiplier: f64,
    pub min_lot: f64,
    pub max_lot: f64,
}

impl PositionSizer {
    pub fn new(cfg: &Config) -> Self {
        Self {
            risk_percent: cfg.risk_percent,
            tolerance_multiplier: cfg.risk_tolerance_multiplier,
            min_lot: cfg.min_lot,
            max_lot: cfg.max_lot,
        }
    }

    pub fn size(&self, req: &SizingRequest<'_>) -> Result<PositionSize, SignalAbort> {
        let profile = req.profile;
        validate_profile(profile)?;
        if !(req.balance.is_finite() && req.balance > 0.0) {
            return Err(SignalAbort::InvalidRiskProfile(format!(
                "account balance {:.2} not positive",
                req.balance
            )));
        }

        let stop_points = profile.price_to_points((req.entry - req.stop_loss).abs());
        if !(stop_points.is_finite() && stop_points > 0.0) {
            return Err(SignalAbort::InvalidLevels("zero stop distance".into()));
        }

        let risk_amount = req.balance * self.risk_percent / 100.0;
        let tick_value_used = req.conversion.apply(profile.tick_value);
        let confidence = if req.conversion.is_degraded() {
            warn!(
                "{}: no {} conversion rate, sizing with unconverted tick value",
                profile.symbol, profile.profit_currency
            );
            SizingConfidence::Degraded
        } else {
            SizingConfidence::Full
        };

        let lot_floor = profile.min_lot.max(self.min_lot);
        let lot_ceiling = profile.max_lot.min(self.max_lot);
        if lot_floor > lot_ceiling {
            return Err(SignalAbort::InvalidRiskProfile(format!(
                "lot bounds [{}, {}] are empty",
                lot_floor, lot_ceiling
            )));
        }

        let raw_lot = risk_amount / (stop_points * tick_value_used);
        let lots = floor_to_step(raw_lot, profile.lot_step).clamp(lot_floor, lot_ceiling);

        let loss_per_lot = req
            .broker_loss_per_lot
            .filter(|l| l.is_finite() && *l > 0.0)
            .unwrap_or(stop_points * tick_value_used);
        let actual_risk_percent = lots * loss_per_lot / req.balance * 100.0;
        debug!(
            "{} sizing: raw={:.4} lots={:.2} risk={:.2}% (target {:.2}%)",
            profile.symbol, raw_lot, lots, actual_risk_percent, self.risk_percent
        );

        if actual_risk_percent <= self.risk_percent * self.tolerance_multiplier {
            return Ok(PositionSize {
                lots,
                risk_amount,
                actual_risk_percent,
                tick_value_used,
                confidence,
                reduced: false,
            });
        }

        // Target the configured risk itself, not the tolerance ceiling.
        let reduced_raw = floor_to_step(risk_amount / loss_per_lot, profile.lot_step);
        if reduced_raw < lot_floor {
            warn!(
                "{}: risk {:.2}% over tolerance, reduced lot {:.4} below minimum {}",
                profile.symbol, actual_risk_percent, reduced_raw, lot_floor
            );
            return Err(SignalAbort::SizingBelowMinimum {
                lots: reduced_raw,
                min: lot_floor,
            });
        }
        let reduced = reduced_raw.min(lot_ceiling);
        let reduced_risk = reduced * loss_per_lot / req.balance * 100.0;
        warn!(
            "{}: risk {:.2}% over tolerance, lot {:.2} -> {:.2} ({:.2}%)",
            profile.symbol, actual_risk_percent, lots, reduced, reduced_risk
        );
        Ok(PositionSize {
            lots: reduced,
            risk_amount,
            actual_risk_percent: reduced_risk,
            tick_value_used,
            confidence,
            reduced: true,
        })
    }
}

fn validate_profile(p: &SymbolRiskProfile) -> Result<(), SignalAbort> {
    let positive = |v: f64| v.is_finite() && v > 0.0;
    if !positive(p.point_size) || !positive(p.tick_value) {
        return Err(SignalAbort::InvalidRiskProfile(format!(
            "{}: point size {} / tick value {}",
            p.symbol, p.point_size, p.tick_value
        )));
    }
    if !positive(p.lot_step) || !positive(p.min_lot) || p.max_lot < p.min_lot {
        return Err(SignalAbort::InvalidRiskProfile(format!(
            "{}: lots min {} max {} step {}",
            p.symbol, p.min_lot, p.max_lot, p.lot_step
        )));
    }
    Ok(())
}

/// Rounds down to a whole number of steps, trimming float noise.
pub fn floor_to_step(lots: f64, step: f64) -> f64 {
    if !lots.is_finite() || lots <= 0.0 {
        return 0.0;
    }
    let steps = (lots / step + 1e-9).floor();
    round8(steps * step)
}

fn round8(x: f64) -> f64 {
    (x * 1e8).round() / 1e8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::eurusd_profile;

    fn sizer(risk: f64) -> PositionSizer {
        PositionSizer {
            risk_percent: risk,
            tolerance_multiplier: 1.5,
            min_lot: 0.01,
            max_lot: 100.0,
        }
    }

    fn request<'a>(
        profile: &'a SymbolRiskProfile,
        conversion: &'a TickConversion,
        stop_loss: f64,
        broker_loss_per_lot: Option<f64>,
    ) -> SizingRequest<'a> {
        SizingRequest {
            balance: 10_000.0,
            entry: 1.10260,
            stop_loss,
            profile,
            conversion,
            broker_loss_per_lot,
        }
    }

    #[test]
    fn one_percent_over_162_points() {
        let p = eurusd_profile();
        let size = sizer(1.0)
            .size(&request(&p, &TickConversion::Native, 1.10098, None))
            .unwrap();
        // 100 / (162 * 1.0) = 0.617 -> 0.61
        assert!((size.lots - 0.61).abs() < 1e-9);
        assert!((size.risk_amount - 100.0).abs() < 1e-9);
        assert!(size.actual_risk_percent <= 1.0);
        assert_eq!(size.confidence, SizingConfidence::Full);
        assert!(!size.reduced);
    }

    #[test]
    fn stale_tick_value_is_capped_at_target_risk() {
        // Stale tick value of 0.0615 against a true loss of 100 per lot over
        // 100 points: the raw lot would risk ~48.8%.
        let mut p = eurusd_profile();
        p.tick_value = 0.0615;
        let size = sizer(3.0)
            .size(&request(&p, &TickConversion::Native, 1.10160, Some(100.0)))
            .unwrap();
        assert!(size.reduced);
        assert!((size.lots - 3.0).abs() < 1e-9);
        assert!(size.actual_risk_percent <= 3.0 + 1e-9);
    }

    #[test]
    fn reduction_below_minimum_rejects() {
        let mut p = eurusd_profile();
        p.min_lot = 1.0;
        let s = PositionSizer {
            risk_percent: 0.5,
            tolerance_multiplier: 1.5,
            min_lot: 0.01,
            max_lot: 100.0,
        };
        // 50 / 162 = 0.31 lots, clamped up to 1.0 -> 1.62% > 0.75%
        let err = s
            .size(&request(&p, &TickConversion::Native, 1.10098, None))
            .unwrap_err();
        assert!(matches!(err, SignalAbort::SizingBelowMinimum { .. }));
    }

    #[test]
    fn missing_conversion_degrades() {
        let mut p = eurusd_profile();
        p.profit_currency = "JPY".into();
        let size = sizer(1.0)
            .size(&request(&p, &TickConversion::Unavailable, 1.10098, None))
            .unwrap();
        assert_eq!(size.confidence, SizingConfidence::Degraded);
        assert!((size.tick_value_used - 1.0).abs() < 1e-12);
    }

    #[test]
    fn conversion_rescales_tick_value() {
        let mut p = eurusd_profile();
        p.tick_value = 150.0;
        p.profit_currency = "JPY".into();
        let conv = TickConversion::Rate {
            pair: "USDJPY".into(),
            rate: 1.0 / 150.0,
        };
        let size = sizer(1.0).size(&request(&p, &conv, 1.10098, None)).unwrap();
        assert!((size.tick_value_used - 1.0).abs() < 1e-9);
        assert!((size.lots - 0.61).abs() < 1e-9);
    }

    #[test]
    fn invalid_profile_and_zero_distance_abort() {
        let mut p = eurusd_profile();
        p.lot_step = 0.0;
        let err = sizer(1.0)
            .size(&request(&p, &TickConversion::Native, 1.10098, None))
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_risk_profile");

        let p = eurusd_profile();
        let err = sizer(1.0)
            .size(&request(&p, &TickConversion::Native, 1.10260, None))
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_levels");
    }

    #[test]
    fn lots_clamp_to_user_maximum() {
        let p = eurusd_profile();
        let s = PositionSizer {
            risk_percent: 1.0,
            tolerance_multiplier: 1.5,
            min_lot: 0.01,
            max_lot: 0.2,
        };
        let size = s
            .size(&request(&p, &TickConversion::Native, 1.10098, None))
            .unwrap();
        assert!((size.lots - 0.2).abs() < 1e-12);
    }

    #[test]
    fn floor_to_step_rounds_down() {
        assert!((floor_to_step(0.617, 0.01) - 0.61).abs() < 1e-12);
        assert!((floor_to_step(0.3, 0.1) - 0.3).abs() < 1e-12);
        assert_eq!(floor_to_step(-1.0, 0.01), 0.0);
    }
}
