pub mod reversal_engine;
pub mod signals;

pub use reversal_engine::{CycleReport, ReversalEngine, SymbolContext};
pub use signals::TradeSignal;
