use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::range::ReferenceRange;
use crate::models::{BreakoutPhase, Candle, Direction};

/// Confirmation filters as seen by the state machine.
pub trait BreakoutGate {
    fn confirm_breakout(&self, side: Direction, candle: &Candle) -> bool;
    fn confirm_reversal(&self, side: Direction, candle: &Candle) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transition {
    None,
    /// Close beyond the boundary, filters failed; still idle.
    BreakoutRejected,
    BreakoutConfirmed,
    /// Re-entry seen but the reversal filter failed; back to idle.
    ReversalRejected,
    ReversalConfirmed,
}

/// Per-side progress through Idle -> BreakoutConfirmed -> ReversalConfirmed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakoutState {
    pub side: Direction,
    pub phase: BreakoutPhase,
    pub breakout_timestamp: Option<DateTime<Utc>>,
    pub breakout_volume: Option<f64>,
    pub reversal_timestamp: Option<DateTime<Utc>>,
    pub reversal_volume: Option<f64>,
}

impl BreakoutState {
    pub fn new(side: Direction) -> Self {
        Self {
            side,
            phase: BreakoutPhase::Idle,
            breakout_timestamp: None,
            breakout_volume: None,
            reversal_timestamp: None,
            reversal_volume: None,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.side);
    }

    pub fn is_idle(&self) -> bool {
        self.phase == BreakoutPhase::Idle
    }

    /// Feeds one newly closed short-period candle. At most one phase
    /// advance happens per candle.
    pub fn on_candle(
        &mut self,
        candle: &Candle,
        range: &ReferenceRange,
        gate: &dyn BreakoutGate,
        epsilon: f64,
    ) -> Transition {
        match self.phase {
            BreakoutPhase::Idle => {
                if !range.is_breached(self.side, candle.close, epsilon) {
                    return Transition::None;
                }
                if !gate.confirm_breakout(self.side, candle) {
                    debug!(
                        "{} breakout at {:.5} rejected by filters",
                        self.side, candle.close
                    );
                    return Transition::BreakoutRejected;
                }
                self.phase = BreakoutPhase::BreakoutConfirmed;
                self.breakout_timestamp = Some(candle.timestamp);
                self.breakout_volume = Some(candle.volume);
                info!(
                    "{} breakout confirmed: close {:.5} beyond {:.5}",
                    self.side,
                    candle.close,
                    range.boundary(self.side)
                );
                Transition::BreakoutConfirmed
            }
            BreakoutPhase::BreakoutConfirmed => {
                if self
                    .breakout_timestamp
                    .is_some_and(|ts| candle.timestamp <= ts)
                {
                    return Transition::None;
                }
                if !range.is_reentered(self.side, candle.close, epsilon) {
                    return Transition::None;
                }
                if !gate.confirm_reversal(self.side, candle) {
                    info!(
                        "{} reversal at {:.5} rejected by volume, back to idle",
                        self.side, candle.close
                    );
                    self.reset();
                    return Transition::ReversalRejected;
                }
                self.phase = BreakoutPhase::ReversalConfirmed;
                self.reversal_timestamp = Some(candle.timestamp);
                self.reversal_volume = Some(candle.volume);
                info!(
                    "{} reversal confirmed: close {:.5} back inside {:.5}",
                    self.side,
                    candle.close,
                    range.boundary(self.side)
                );
                Transition::ReversalConfirmed
            }
            // Waiting to be consumed by the pipeline.
            BreakoutPhase::ReversalConfirmed => Transition::None,
        }
    }
}
