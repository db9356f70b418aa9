pub mod data_loader;
pub mod report;
pub mod runner;

pub use report::BacktestReport;
pub use runner::BacktestRunner;
