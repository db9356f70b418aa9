use thiserror::Error;

/// Reasons a pipeline pass ends without an order. All are local to one
/// symbol and one cycle; none is fatal to the process.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SignalAbort {
    #[error("market data unavailable: {0}")]
    DataUnavailable(String),

    #[error("no boundary-breaching candle in the extremum window")]
    UndefinedExtremum,

    #[error("invalid levels: {0}")]
    InvalidLevels(String),

    #[error("lot size {lots} below minimum {min}")]
    SizingBelowMinimum { lots: f64, min: f64 },

    #[error("invalid risk profile: {0}")]
    InvalidRiskProfile(String),

    #[error("spread {spread_points:.1} points exceeds limit {limit:.1}")]
    SpreadTooWide { spread_points: f64, limit: f64 },

    #[error("gateway rejected order: {0}")]
    GatewayRejection(String),
}

impl SignalAbort {
    /// Short stable label used for counters and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            SignalAbort::DataUnavailable(_) => "data_unavailable",
            SignalAbort::UndefinedExtremum => "undefined_extremum",
            SignalAbort::InvalidLevels(_) => "invalid_levels",
            SignalAbort::SizingBelowMinimum { .. } => "sizing_below_minimum",
            SignalAbort::InvalidRiskProfile(_) => "invalid_risk_profile",
            SignalAbort::SpreadTooWide { .. } => "spread_too_wide",
            SignalAbort::GatewayRejection(_) => "gateway_rejection",
        }
    }
}
