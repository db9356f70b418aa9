use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Direction {
    pub const BOTH: [Direction; 2] = [Direction::Long, Direction::Short];

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }

    /// +1 for long, -1 for short.
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakoutPhase {
    Idle,
    BreakoutConfirmed,
    ReversalConfirmed,
}

impl fmt::Display for BreakoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakoutPhase::Idle => write!(f, "idle"),
            BreakoutPhase::BreakoutConfirmed => write!(f, "breakout_confirmed"),
            BreakoutPhase::ReversalConfirmed => write!(f, "reversal_confirmed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    Relaxed,
    Tightened,
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterMode::Relaxed => write!(f, "relaxed"),
            FilterMode::Tightened => write!(f, "tightened"),
        }
    }
}

/// How the two divergence detectors combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DivergenceMode {
    /// Both detectors must agree.
    Strict,
    /// Either detector is enough.
    Lenient,
}

impl fmt::Display for DivergenceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DivergenceMode::Strict => write!(f, "strict"),
            DivergenceMode::Lenient => write!(f, "lenient"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    ClosedTp,
    ClosedSl,
    ClosedManual,
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionStatus::ClosedTp => write!(f, "closed_tp"),
            PositionStatus::ClosedSl => write!(f, "closed_sl"),
            PositionStatus::ClosedManual => write!(f, "closed_manual"),
        }
    }
}
