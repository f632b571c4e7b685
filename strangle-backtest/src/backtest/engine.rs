//! Core backtesting engine.
//!
//! Runs the minute-by-minute simulation loop over the trading window:
//! 1. Entry time: sell the call and put candidates
//! 2. Exit time: buy back every open leg at the close
//! 3. Other minutes: buy back legs whose high reached the stop level,
//!    then (with reentry) sell the minute's candidates again
//!
//! A leg opened in a minute is never stop-checked in that same minute, and
//! no leg may survive past the exit time of its trading day.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, info};

use crate::data::{Bar, OptionType};

use super::config::{BacktestConfig, ConfigError};
use super::ledger::{ClosedPosition, ExitReason, FinalizedLedger, TradeLedger};
use super::registry::InstrumentRegistry;
use super::selector::{CohortRow, MinuteIndex};
use super::state::{OpenPosition, PositionState, PositionStore};

/// Invariant violations that abort a run.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid config: {0}")]
    Config(#[from] ConfigError),

    #[error("Unknown instrument: {0}")]
    UnknownInstrument(String),

    #[error("Duplicate bar for {ticker} at {minute}")]
    DuplicateBar {
        ticker: String,
        minute: NaiveDateTime,
    },

    #[error("Cannot close {ticker} at {minute}: no open position")]
    NotOpen {
        ticker: String,
        minute: NaiveDateTime,
    },

    #[error("{ticker} entered at {entry_time} is still open after {boundary}")]
    PositionLeftOpen {
        ticker: String,
        entry_time: NaiveDateTime,
        boundary: NaiveDateTime,
    },
}

/// Result of a completed backtest.
#[derive(Debug, Clone)]
pub struct BacktestResult {
    /// Configuration used.
    pub config: BacktestConfig,

    /// All completed trades with running capital.
    pub ledger: FinalizedLedger,

    /// Distinct contracts in the input.
    pub instruments: usize,

    /// Minutes inside the trading window.
    pub minutes_processed: usize,

    /// First and last trading date simulated.
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,

    /// Legs sold, including reentries.
    pub entries: usize,

    /// Legs sold in the minute of a stop loss.
    pub reentries: usize,

    pub stop_loss_exits: usize,
    pub end_of_window_exits: usize,
}

impl BacktestResult {
    fn empty(config: BacktestConfig) -> Self {
        let ledger = TradeLedger::from_config(&config).finalize();
        Self {
            config,
            ledger,
            instruments: 0,
            minutes_processed: 0,
            start_date: None,
            end_date: None,
            entries: 0,
            reentries: 0,
            stop_loss_exits: 0,
            end_of_window_exits: 0,
        }
    }

    pub fn total_trades(&self) -> usize {
        self.ledger.len()
    }

    pub fn total_pnl(&self) -> Decimal {
        self.ledger.total_pnl()
    }

    pub fn final_capital(&self) -> Decimal {
        self.ledger.final_capital()
    }

    /// Generate summary string.
    pub fn summary(&self) -> String {
        let period = match (self.start_date, self.end_date) {
            (Some(s), Some(e)) => format!("{} to {}", s, e),
            _ => "no trading days".to_string(),
        };
        format!(
            "Backtest Results ({})\n\
             ----------------------------------------\n\
             Instruments: {}\n\
             Minutes Simulated: {}\n\
             \n\
             Trades: {} (Stop Loss: {}, End of Window: {})\n\
             Entries: {} (Reentries: {})\n\
             \n\
             Total P&L: {:.2}\n\
             Starting Capital: {:.2}\n\
             Final Capital: {:.2}",
            period,
            self.instruments,
            self.minutes_processed,
            self.total_trades(),
            self.stop_loss_exits,
            self.end_of_window_exits,
            self.entries,
            self.reentries,
            self.total_pnl(),
            self.config.starting_capital,
            self.final_capital(),
        )
    }
}

/// The main backtesting engine.
///
/// Holds only configuration; every run builds its own lookups, position
/// store and ledger, so repeated runs on the same input are identical.
pub struct BacktestEngine {
    config: BacktestConfig,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Simulate the strategy over `bars`.
    ///
    /// Input without instruments or without minutes in the trading window
    /// yields an empty ledger.
    pub fn run(&self, bars: &[Bar]) -> Result<BacktestResult, EngineError> {
        self.config.validate()?;

        let registry = InstrumentRegistry::from_bars(bars);
        if registry.is_empty() {
            info!("No instruments in input, nothing to simulate");
            return Ok(BacktestResult::empty(self.config.clone()));
        }

        let index = MinuteIndex::build(bars, &registry, self.config.target_premium)?;
        let minutes: Vec<NaiveDateTime> = index
            .minutes()
            .filter(|m| self.config.in_window(m.time()))
            .collect();

        info!(
            "Simulating {} bars, {} instruments, {} of {} minutes in window {}-{}",
            bars.len(),
            registry.len(),
            minutes.len(),
            index.len(),
            self.config.entry_time,
            self.config.exit_time
        );

        let mut sim = Simulation::new(&self.config, bars, &registry, &index);
        for &minute in &minutes {
            sim.step(minute)?;
        }
        sim.ensure_flat()?;

        let result = BacktestResult {
            config: self.config.clone(),
            ledger: sim.ledger.finalize(),
            instruments: registry.len(),
            minutes_processed: minutes.len(),
            start_date: minutes.first().map(|m| m.date()),
            end_date: minutes.last().map(|m| m.date()),
            entries: sim.entries,
            reentries: sim.reentries,
            stop_loss_exits: sim.stop_loss_exits,
            end_of_window_exits: sim.end_of_window_exits,
        };

        info!(
            "Backtest complete: {} trades ({} stop loss, {} end of window), P&L {}",
            result.total_trades(),
            result.stop_loss_exits,
            result.end_of_window_exits,
            result.total_pnl()
        );

        Ok(result)
    }
}

/// Mutable state of a single run.
struct Simulation<'a> {
    config: &'a BacktestConfig,
    bars: &'a [Bar],
    registry: &'a InstrumentRegistry,
    index: &'a MinuteIndex,
    positions: PositionStore,
    ledger: TradeLedger,
    last_minute: Option<NaiveDateTime>,
    entries: usize,
    reentries: usize,
    stop_loss_exits: usize,
    end_of_window_exits: usize,
}

impl<'a> Simulation<'a> {
    fn new(
        config: &'a BacktestConfig,
        bars: &'a [Bar],
        registry: &'a InstrumentRegistry,
        index: &'a MinuteIndex,
    ) -> Self {
        Self {
            config,
            bars,
            registry,
            index,
            positions: PositionStore::new(registry.len()),
            ledger: TradeLedger::from_config(config),
            last_minute: None,
            entries: 0,
            reentries: 0,
            stop_loss_exits: 0,
            end_of_window_exits: 0,
        }
    }

    /// Process one minute of the trading window.
    fn step(&mut self, minute: NaiveDateTime) -> Result<(), EngineError> {
        if self.last_minute.is_some_and(|last| last.date() != minute.date()) {
            self.ensure_flat()?;
        }
        self.last_minute = Some(minute);

        let time = minute.time();
        if time == self.config.entry_time {
            self.entries += self.enter(minute)?;
            return Ok(());
        }

        let index = self.index;
        let cohort = index.cohort(minute);
        if cohort.is_empty() {
            return Ok(());
        }

        if time == self.config.exit_time {
            let open: Vec<CohortRow> = cohort
                .iter()
                .filter(|r| self.positions.is_open(r.instrument))
                .copied()
                .collect();
            self.end_of_window_exits += self.close_batch(minute, &open, ExitReason::EndOfWindow)?;
            return Ok(());
        }

        let bars = self.bars;
        let hits: Vec<CohortRow> = cohort
            .iter()
            .filter(|r| {
                self.positions
                    .get(r.instrument)
                    .is_some_and(|p| bars[r.row].high >= p.stop_loss)
            })
            .copied()
            .collect();
        if hits.is_empty() {
            return Ok(());
        }

        self.stop_loss_exits += self.close_batch(minute, &hits, ExitReason::StopLoss)?;

        if self.config.reentry {
            let reentered = self.enter(minute)?;
            self.entries += reentered;
            self.reentries += reentered;
        }
        Ok(())
    }

    /// Sell each side's candidate for `minute` unless that contract is already open.
    fn enter(&mut self, minute: NaiveDateTime) -> Result<usize, EngineError> {
        let candidates = self.index.candidates(minute);
        let mut entered = 0;

        for side in OptionType::ALL {
            let Some(candidate) = candidates.side(side) else {
                continue;
            };
            let bar = &self.bars[candidate.row];

            if let PositionState::Open(existing) = self.positions.state(candidate.instrument) {
                debug!(
                    "{} {} already open since {}, skipping entry at {}",
                    side.as_str(),
                    bar.ticker,
                    existing.entry_time,
                    minute
                );
                continue;
            }

            let position = OpenPosition {
                stop_loss: self.config.stop_level(bar.close),
                entry_price: bar.close,
                entry_time: minute,
                entry_row: candidate.row,
            };
            if !self.positions.open(candidate.instrument, position) {
                return Err(EngineError::UnknownInstrument(bar.ticker.clone()));
            }

            debug!(
                "Sold {} {} at {} (stop {}) on {}",
                side.as_str(),
                bar.ticker,
                position.entry_price,
                position.stop_loss,
                minute
            );
            entered += 1;
        }

        Ok(entered)
    }

    /// Flatten every listed row's instrument and record the trades.
    fn close_batch(
        &mut self,
        minute: NaiveDateTime,
        rows: &[CohortRow],
        reason: ExitReason,
    ) -> Result<usize, EngineError> {
        let bars = self.bars;
        let mut closed = Vec::with_capacity(rows.len());

        for row in rows {
            let exit_bar = &bars[row.row];
            let position = self
                .positions
                .close(row.instrument)
                .ok_or_else(|| EngineError::NotOpen {
                    ticker: exit_bar.ticker.clone(),
                    minute,
                })?;

            debug!(
                "Bought back {} at {} ({}) on {}",
                exit_bar.ticker,
                reason.exit_price(&position, exit_bar),
                reason.as_str(),
                minute
            );

            closed.push(ClosedPosition {
                instrument: row.instrument,
                position,
                entry_bar: &bars[position.entry_row],
                exit_bar,
            });
        }

        self.ledger.append(&closed, reason);
        Ok(closed.len())
    }

    /// Fail if any leg is still open at a day boundary or the end of input.
    fn ensure_flat(&self) -> Result<(), EngineError> {
        let Some(boundary) = self.last_minute else {
            return Ok(());
        };
        match self.positions.open_positions().next() {
            Some((id, position)) => Err(EngineError::PositionLeftOpen {
                ticker: self.registry.ticker(id).unwrap_or_default().to_string(),
                entry_time: position.entry_time,
                boundary,
            }),
            None => Ok(()),
        }
    }
}
