pub mod backtest;
pub mod data;
pub mod metrics;

// Re-export commonly used types
pub use backtest::{
    BacktestConfig, BacktestEngine, BacktestResult, EngineError, ExitReason, FinalizedLedger,
    TradeRecord,
};
pub use data::{Bar, DataLoader, OptionType};
pub use metrics::{MetricsCalculator, PerformanceMetrics};
