use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::core::breakout::BreakoutGate;
use crate::core::divergence::DivergenceFilter;
use crate::core::volume::VolumeFilter;
use crate::models::{Candle, CandleSeries, Direction};

/// Which confirmation filters are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterToggles {
    pub volume: bool,
    pub divergence: bool,
}

impl FilterToggles {
    pub const ALL_ON: FilterToggles = FilterToggles {
        volume: true,
        divergence: true,
    };

    pub fn from_config(cfg: &Config) -> Self {
        Self {
            volume: cfg.volume.enabled,
            divergence: cfg.divergence.enabled,
        }
    }
}

pub struct ConfirmationFilters {
    pub volume: VolumeFilter,
    pub divergence: DivergenceFilter,
}

impl ConfirmationFilters {
    pub fn new(cfg: &Config) -> Self {
        Self {
            volume: VolumeFilter::new(&cfg.volume),
            divergence: DivergenceFilter::new(&cfg.divergence),
        }
    }

    /// Short-period candles to fetch so every filter has its history.
    pub fn required_history(&self) -> usize {
        (self.volume.average_window + 1).max(self.divergence.required_history())
    }

    /// Binds the filters to this cycle's candles. Average volume is
    /// computed here, once per cycle.
    pub fn for_cycle<'a>(
        &'a self,
        candles: &'a CandleSeries,
        toggles: FilterToggles,
    ) -> CycleGate<'a> {
        let average_volume = if toggles.volume {
            self.volume.average_volume(candles)
        } else {
            None
        };
        CycleGate {
            filters: self,
            candles,
            toggles,
            average_volume,
        }
    }
}

pub struct CycleGate<'a> {
    filters: &'a ConfirmationFilters,
    candles: &'a CandleSeries,
    toggles: FilterToggles,
    average_volume: Option<f64>,
}

impl CycleGate<'_> {
    pub fn average_volume(&self) -> Option<f64> {
        self.average_volume
    }
}

impl BreakoutGate for CycleGate<'_> {
    fn confirm_breakout(&self, side: Direction, candle: &Candle) -> bool {
        if self.toggles.volume
            && !self
                .filters
                .volume
                .passes_breakout(candle, self.average_volume)
        {
            return false;
        }
        if self.toggles.divergence && !self.filters.divergence.passes(self.candles, side) {
            return false;
        }
        true
    }

    fn confirm_reversal(&self, _side: Direction, candle: &Candle) -> bool {
        !self.toggles.volume
            || self
                .filters
                .volume
                .passes_reversal(candle, self.average_volume)
    }
}
