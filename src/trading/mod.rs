pub mod paper_trader;
pub mod trade_record;

pub use paper_trader::{PaperTrader, TradingStats};
pub use trade_record::{ClosedTradeOutcome, TradeRecord};
