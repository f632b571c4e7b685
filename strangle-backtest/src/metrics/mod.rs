//! Performance metrics module.
//!
//! Post-hoc statistics over a finalized ledger:
//! - Win rate and average trade return
//! - NAV curve and maximum drawdown
//! - CAGR, monthly returns
//! - Call/put and expiry breakdowns

pub mod calculator;

pub use calculator::{MetricsCalculator, MonthlyReturn, PerformanceMetrics, SideBreakdown};
