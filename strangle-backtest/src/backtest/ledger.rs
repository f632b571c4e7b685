//! Trade ledger: closed short legs and running capital.
//!
//! Handles the accounting side of the trade lifecycle:
//! - One record per leg bought back, in closing order
//! - Value and P&L fields (short convention: profit = entry - exit)
//! - Cumulative P&L and available capital on finalize
//! - Tabular export for reporting

use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::*;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::data::{Bar, OptionType};

use super::config::BacktestConfig;
use super::registry::InstrumentId;
use super::state::OpenPosition;

/// Reason for buying back a leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitReason {
    /// Bar high reached the stop level; filled at the stop level.
    StopLoss,
    /// Forced exit at the end of the trading window; filled at the close.
    EndOfWindow,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StopLoss => "stop_loss",
            Self::EndOfWindow => "end_of_window",
        }
    }

    /// Fill price for a position closing on `exit_bar`.
    pub fn exit_price(&self, position: &OpenPosition, exit_bar: &Bar) -> Decimal {
        match self {
            Self::StopLoss => position.stop_loss,
            Self::EndOfWindow => exit_bar.close,
        }
    }
}

/// A position leaving the book, with the bars it entered and exited on.
#[derive(Debug, Clone, Copy)]
pub struct ClosedPosition<'a> {
    pub instrument: InstrumentId,
    pub position: OpenPosition,
    pub entry_bar: &'a Bar,
    pub exit_bar: &'a Bar,
}

/// A completed trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub entry_date: NaiveDate,
    pub entry_time: NaiveDateTime,
    pub exit_date: NaiveDate,
    pub exit_time: NaiveDateTime,
    pub instrument: InstrumentId,
    pub ticker: String,
    pub strike: Decimal,
    pub option_type: OptionType,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub quantity: Decimal,
    pub entry_value: Decimal,
    pub exit_value: Decimal,
    pub gross_pnl: Decimal,
    /// Gross P&L as a fraction of entry value.
    pub pnl_pct: Decimal,
    pub exit_reason: ExitReason,
    pub is_expiry: bool,
    /// Underlying reference price at entry.
    pub underlying_close: Decimal,
}

impl TradeRecord {
    fn new(closed: &ClosedPosition<'_>, reason: ExitReason, quantity: Decimal) -> Self {
        let entry_price = closed.position.entry_price;
        let exit_price = reason.exit_price(&closed.position, closed.exit_bar);
        let entry_value = quantity * entry_price;
        let exit_value = quantity * exit_price;
        let gross_pnl = entry_value - exit_value;
        let pnl_pct = gross_pnl.checked_div(entry_value).unwrap_or(Decimal::ZERO);

        Self {
            entry_date: closed.position.entry_time.date(),
            entry_time: closed.position.entry_time,
            exit_date: closed.exit_bar.date,
            exit_time: closed.exit_bar.minute,
            instrument: closed.instrument,
            ticker: closed.entry_bar.ticker.clone(),
            strike: closed.entry_bar.strike,
            option_type: closed.entry_bar.option_type,
            entry_price,
            exit_price,
            quantity,
            entry_value,
            exit_value,
            gross_pnl,
            pnl_pct,
            exit_reason: reason,
            is_expiry: closed.exit_bar.is_expiry,
            underlying_close: closed.entry_bar.underlying_close,
        }
    }

    /// Check if trade was profitable.
    pub fn is_winner(&self) -> bool {
        self.gross_pnl > Decimal::ZERO
    }
}

/// Append-only store of closed trades for one run.
#[derive(Debug, Clone)]
pub struct TradeLedger {
    quantity: Decimal,
    starting_capital: Decimal,
    trades: Vec<TradeRecord>,
}

impl TradeLedger {
    pub fn new(quantity: Decimal, starting_capital: Decimal) -> Self {
        Self {
            quantity,
            starting_capital,
            trades: Vec::new(),
        }
    }

    pub fn from_config(config: &BacktestConfig) -> Self {
        Self::new(config.quantity(), config.starting_capital)
    }

    /// Record one trade per closed position, in the order given.
    pub fn append(&mut self, closed: &[ClosedPosition<'_>], source: ExitReason) {
        let quantity = self.quantity;
        self.trades
            .extend(closed.iter().map(|c| TradeRecord::new(c, source, quantity)));
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    /// Snapshot the ledger with its running capital columns.
    pub fn finalize(&self) -> FinalizedLedger {
        let mut running = Decimal::ZERO;
        let cumulative_pnl: Vec<Decimal> = self
            .trades
            .iter()
            .map(|t| {
                running += t.gross_pnl;
                running
            })
            .collect();
        let available_capital = cumulative_pnl
            .iter()
            .map(|c| self.starting_capital + *c)
            .collect();

        FinalizedLedger {
            starting_capital: self.starting_capital,
            trades: self.trades.clone(),
            cumulative_pnl,
            available_capital,
        }
    }
}

/// One ledger row with its derived columns.
#[derive(Debug, Clone, Copy)]
pub struct LedgerRow<'a> {
    pub trade: &'a TradeRecord,
    pub cumulative_pnl: Decimal,
    pub available_capital: Decimal,
}

/// Read-only ledger table produced at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizedLedger {
    starting_capital: Decimal,
    trades: Vec<TradeRecord>,
    cumulative_pnl: Vec<Decimal>,
    available_capital: Vec<Decimal>,
}

impl FinalizedLedger {
    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn cumulative_pnl(&self) -> &[Decimal] {
        &self.cumulative_pnl
    }

    pub fn available_capital(&self) -> &[Decimal] {
        &self.available_capital
    }

    pub fn starting_capital(&self) -> Decimal {
        self.starting_capital
    }

    pub fn rows(&self) -> impl Iterator<Item = LedgerRow<'_>> {
        self.trades
            .iter()
            .zip(self.cumulative_pnl.iter().zip(self.available_capital.iter()))
            .map(|(trade, (&cumulative_pnl, &available_capital))| LedgerRow {
                trade,
                cumulative_pnl,
                available_capital,
            })
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    pub fn total_pnl(&self) -> Decimal {
        self.cumulative_pnl.last().copied().unwrap_or(Decimal::ZERO)
    }

    pub fn final_capital(&self) -> Decimal {
        self.starting_capital + self.total_pnl()
    }

    /// Export the ledger as a polars DataFrame, one row per trade.
    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let trades = self.trades.as_slice();

        let columns = vec![
            text_column("entry_date", trades, |t| t.entry_date.format("%Y-%m-%d").to_string()),
            text_column("entry_time", trades, |t| t.entry_time.format("%H:%M:%S").to_string()),
            text_column("exit_date", trades, |t| t.exit_date.format("%Y-%m-%d").to_string()),
            text_column("exit_time", trades, |t| t.exit_time.format("%H:%M:%S").to_string()),
            text_column("ticker", trades, |t| t.ticker.clone()),
            decimal_column("strike", trades, |t| t.strike),
            text_column("option_type", trades, |t| t.option_type.as_str().to_string()),
            decimal_column("entry_price", trades, |t| t.entry_price),
            decimal_column("exit_price", trades, |t| t.exit_price),
            decimal_column("quantity", trades, |t| t.quantity),
            decimal_column("entry_value", trades, |t| t.entry_value),
            decimal_column("exit_value", trades, |t| t.exit_value),
            decimal_column("gross_pnl", trades, |t| t.gross_pnl),
            decimal_column("pnl_pct", trades, |t| t.pnl_pct),
            text_column("exit_reason", trades, |t| t.exit_reason.as_str().to_string()),
            Column::new(
                "is_expiry".into(),
                trades.iter().map(|t| t.is_expiry).collect::<Vec<bool>>(),
            ),
            decimal_column("underlying_close", trades, |t| t.underlying_close),
            Column::new(
                "cumulative_pnl".into(),
                self.cumulative_pnl.iter().map(|d| to_f64(*d)).collect::<Vec<f64>>(),
            ),
            Column::new(
                "available_capital".into(),
                self.available_capital.iter().map(|d| to_f64(*d)).collect::<Vec<f64>>(),
            ),
        ];

        DataFrame::new(columns)
    }
}

fn decimal_column(
    name: &str,
    trades: &[TradeRecord],
    f: impl Fn(&TradeRecord) -> Decimal,
) -> Column {
    let values: Vec<f64> = trades.iter().map(|t| to_f64(f(t))).collect();
    Column::new(name.into(), values)
}

fn text_column(
    name: &str,
    trades: &[TradeRecord],
    f: impl Fn(&TradeRecord) -> String,
) -> Column {
    let values: Vec<String> = trades.iter().map(f).collect();
    Column::new(name.into(), values)
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::registry::InstrumentRegistry;
    use rust_decimal_macros::dec;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 1, 4)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn bar(at: NaiveDateTime, close: Decimal) -> Bar {
        Bar {
            date: at.date(),
            time: at.time(),
            minute: at,
            ticker: "NIFTY18000CE".to_string(),
            option_type: OptionType::Call,
            strike: dec!(18000),
            open: close,
            high: close,
            low: close,
            close,
            underlying_close: dec!(17950),
            is_expiry: true,
            is_week_one: true,
        }
    }

    fn open_at(price: Decimal, time: NaiveDateTime) -> OpenPosition {
        OpenPosition {
            stop_loss: price * dec!(1.5),
            entry_price: price,
            entry_time: time,
            entry_row: 0,
        }
    }

    fn closed<'a>(entry: &'a Bar, exit: &'a Bar) -> ClosedPosition<'a> {
        ClosedPosition {
            instrument: id(),
            position: open_at(entry.close, entry.minute),
            entry_bar: entry,
            exit_bar: exit,
        }
    }

    fn id() -> InstrumentId {
        InstrumentRegistry::from_tickers(["NIFTY18000CE"])
            .id("NIFTY18000CE")
            .unwrap()
    }

    #[test]
    fn test_stop_loss_trade_fields() {
        let entry = bar(at(9, 20), dec!(50));
        let exit = bar(at(10, 5), dec!(74));
        let mut ledger = TradeLedger::new(dec!(15), dec!(1000));

        ledger.append(&[closed(&entry, &exit)], ExitReason::StopLoss);

        let trade = &ledger.trades()[0];
        assert_eq!(trade.exit_price, dec!(75)); // stop level, not the close
        assert_eq!(trade.entry_value, dec!(750));
        assert_eq!(trade.exit_value, dec!(1125));
        assert_eq!(trade.gross_pnl, dec!(-375));
        assert_eq!(trade.pnl_pct, dec!(-0.5));
        assert_eq!(trade.underlying_close, dec!(17950));
        assert!(trade.is_expiry);
        assert!(!trade.is_winner());
    }

    #[test]
    fn test_end_of_window_uses_close() {
        let entry = bar(at(9, 20), dec!(50));
        let exit = bar(at(15, 20), dec!(20));
        let mut ledger = TradeLedger::new(dec!(15), dec!(1000));

        ledger.append(&[closed(&entry, &exit)], ExitReason::EndOfWindow);

        let trade = &ledger.trades()[0];
        assert_eq!(trade.exit_price, dec!(20));
        assert_eq!(trade.gross_pnl, dec!(450));
        assert_eq!(trade.pnl_pct, dec!(0.6));
        assert!(trade.is_winner());
    }

    #[test]
    fn test_finalize_running_capital() {
        let entry = bar(at(9, 20), dec!(50));
        let win = bar(at(15, 20), dec!(40));
        let loss = bar(at(15, 20), dec!(60));
        let mut ledger = TradeLedger::new(dec!(10), dec!(1000));

        ledger.append(
            &[closed(&entry, &win), closed(&entry, &loss)],
            ExitReason::EndOfWindow,
        );
        ledger.append(&[closed(&entry, &win)], ExitReason::EndOfWindow);

        let table = ledger.finalize();
        assert_eq!(table.cumulative_pnl(), &[dec!(100), dec!(0), dec!(100)]);
        assert_eq!(table.available_capital(), &[dec!(1100), dec!(1000), dec!(1100)]);
        assert_eq!(table.final_capital(), dec!(1100));

        // Finalizing again yields the same table and leaves the ledger alone
        assert_eq!(ledger.finalize(), table);
        assert_eq!(ledger.len(), 3);
    }

    #[test]
    fn test_empty_ledger() {
        let table = TradeLedger::new(dec!(15), dec!(1000)).finalize();
        assert!(table.is_empty());
        assert_eq!(table.total_pnl(), Decimal::ZERO);
        assert_eq!(table.final_capital(), dec!(1000));
        assert_eq!(table.to_dataframe().unwrap().height(), 0);
    }

    #[test]
    fn test_dataframe_columns() {
        let entry = bar(at(9, 20), dec!(50));
        let exit = bar(at(15, 20), dec!(45));
        let mut ledger = TradeLedger::new(dec!(15), dec!(1000));
        ledger.append(&[closed(&entry, &exit)], ExitReason::EndOfWindow);

        let df = ledger.finalize().to_dataframe().unwrap();
        assert_eq!(df.height(), 1);
        assert_eq!(df.width(), 19);
        let capital = df.column("available_capital").unwrap().f64().unwrap();
        assert_eq!(capital.get(0), Some(1075.0));
        let reason = df.column("exit_reason").unwrap().str().unwrap();
        assert_eq!(reason.get(0), Some("end_of_window"));
    }
}
