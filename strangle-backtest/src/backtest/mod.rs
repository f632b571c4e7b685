//! Backtesting engine for the intraday short strangle.
//!
//! This module provides the full simulation pipeline:
//! - Strategy configuration
//! - Instrument registry and per-minute candidate selection
//! - Position tracking (one slot per instrument)
//! - Trade ledger with running capital

pub mod config;
pub mod engine;
pub mod ledger;
pub mod registry;
pub mod selector;
pub mod state;

pub use config::{BacktestConfig, ConfigError};
pub use engine::{BacktestEngine, BacktestResult, EngineError};
pub use ledger::{ClosedPosition, ExitReason, FinalizedLedger, LedgerRow, TradeLedger, TradeRecord};
pub use registry::{InstrumentId, InstrumentRegistry};
pub use selector::{CohortRow, MinuteCandidates, MinuteIndex};
pub use state::{OpenPosition, PositionState, PositionStore};
