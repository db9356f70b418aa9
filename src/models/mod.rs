pub mod candle;
pub mod direction;
pub mod symbol;
pub mod timeframe;

pub use candle::{Candle, CandleSeries};
pub use direction::*;
pub use symbol::{AccountSnapshot, Quote, SymbolCategory, SymbolRiskProfile};
pub use timeframe::Timeframe;
