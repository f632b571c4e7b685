//! Performance metrics calculator.
//!
//! Calculates post-hoc statistics from a finalized trade ledger.

use std::collections::BTreeMap;

use chrono::Datelike;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::backtest::{FinalizedLedger, TradeRecord};
use crate::data::OptionType;

/// Trade statistics for one side (or both combined).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SideBreakdown {
    pub trades: usize,
    pub winners: usize,
    pub losers: usize,
    pub win_rate: f64,

    /// Mean of `pnl_pct`, in percent.
    pub avg_pnl_pct: Option<f64>,
    pub expiry_avg_pnl_pct: Option<f64>,
    pub non_expiry_avg_pnl_pct: Option<f64>,
}

/// Month-end NAV and its change versus the previous month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyReturn {
    pub year: i32,
    pub month: u32,
    pub nav: f64,
    pub return_pct: f64,
}

/// Comprehensive performance metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    // Basic statistics
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,

    // P&L metrics
    pub total_pnl: Decimal,
    pub avg_trade_pct: f64,

    // NAV, one point before the first trade and one after each trade
    pub base_nav: f64,
    pub nav_curve: Vec<f64>,
    pub drawdown_curve: Vec<f64>,
    pub final_nav: f64,

    // Return and risk
    pub max_drawdown_pct: f64,
    pub cagr: Option<f64>,

    // Breakdowns
    pub calls: SideBreakdown,
    pub puts: SideBreakdown,
    pub combined: SideBreakdown,
    pub monthly_returns: Vec<MonthlyReturn>,
}

impl PerformanceMetrics {
    /// Metrics of a run without trades.
    pub fn empty(base_nav: f64) -> Self {
        Self {
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            win_rate: 0.0,
            total_pnl: Decimal::ZERO,
            avg_trade_pct: 0.0,
            base_nav,
            nav_curve: vec![base_nav],
            drawdown_curve: vec![0.0],
            final_nav: base_nav,
            max_drawdown_pct: 0.0,
            cagr: None,
            calls: SideBreakdown::default(),
            puts: SideBreakdown::default(),
            combined: SideBreakdown::default(),
            monthly_returns: Vec::new(),
        }
    }

    /// Generate a summary report.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Performance Summary\n\
             ====================\n\
             \n\
             Trades: {} (W: {}, L: {})\n\
             Win Rate: {:.1}%\n\
             Avg Trade: {:.2}%\n\
             Total P&L: {:.2}\n\
             \n\
             NAV: {:.2} -> {:.2}\n\
             CAGR: {}\n\
             Max Drawdown: {:.2}%\n",
            self.total_trades,
            self.winning_trades,
            self.losing_trades,
            self.win_rate * 100.0,
            self.avg_trade_pct,
            self.total_pnl,
            self.base_nav,
            self.final_nav,
            fmt_pct(self.cagr.map(|c| c * 100.0)),
            self.max_drawdown_pct,
        );

        out.push_str("\nSide      Trades   Win%    Avg%   Expiry%  Non-Expiry%\n");
        for (label, side) in [
            ("Call", &self.calls),
            ("Put", &self.puts),
            ("Combined", &self.combined),
        ] {
            out.push_str(&format!(
                "{:<9} {:>6} {:>6.1} {:>7} {:>9} {:>12}\n",
                label,
                side.trades,
                side.win_rate * 100.0,
                fmt_pct(side.avg_pnl_pct),
                fmt_pct(side.expiry_avg_pnl_pct),
                fmt_pct(side.non_expiry_avg_pnl_pct),
            ));
        }

        if !self.monthly_returns.is_empty() {
            out.push_str("\nMonthly Returns\n");
            for m in &self.monthly_returns {
                out.push_str(&format!(
                    "  {}-{:02}: {:>7.2}% (NAV {:.2})\n",
                    m.year, m.month, m.return_pct, m.nav
                ));
            }
        }

        out
    }
}

fn fmt_pct(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{:.2}", v))
}

/// Metrics calculator.
pub struct MetricsCalculator;

impl MetricsCalculator {
    /// Calculate all metrics from a finalized ledger.
    ///
    /// Each trade compounds the NAV by `1 + gross_pnl / starting_capital`.
    pub fn calculate(ledger: &FinalizedLedger, base_nav: f64) -> PerformanceMetrics {
        let trades = ledger.trades();
        if trades.is_empty() {
            warn!("No trades in ledger, returning empty metrics");
            return PerformanceMetrics::empty(base_nav);
        }

        let combined = Self::side_breakdown(trades.iter());
        let calls = Self::side_breakdown(
            trades
                .iter()
                .filter(|t| t.option_type == OptionType::Call),
        );
        let puts = Self::side_breakdown(
            trades
                .iter()
                .filter(|t| t.option_type == OptionType::Put),
        );

        let nav_curve = Self::nav_curve(trades, ledger.starting_capital(), base_nav);
        let drawdown_curve = Self::drawdown_curve(&nav_curve);
        let max_drawdown_pct = drawdown_curve.iter().copied().fold(0.0_f64, f64::min) * 100.0;
        let final_nav = nav_curve.last().copied().unwrap_or(base_nav);

        let days = match (trades.first(), trades.last()) {
            (Some(first), Some(last)) => (last.exit_date - first.entry_date).num_days(),
            _ => 0,
        };
        let cagr = Self::calculate_cagr(base_nav, final_nav, days);

        PerformanceMetrics {
            total_trades: combined.trades,
            winning_trades: combined.winners,
            losing_trades: combined.losers,
            win_rate: combined.win_rate,
            total_pnl: ledger.total_pnl(),
            avg_trade_pct: combined.avg_pnl_pct.unwrap_or(0.0),
            base_nav,
            monthly_returns: Self::monthly_returns(trades, &nav_curve),
            nav_curve,
            drawdown_curve,
            final_nav,
            max_drawdown_pct,
            cagr,
            calls,
            puts,
            combined,
        }
    }

    fn side_breakdown<'a>(trades: impl Iterator<Item = &'a TradeRecord>) -> SideBreakdown {
        let trades: Vec<&TradeRecord> = trades.collect();
        let winners = trades.iter().filter(|t| t.is_winner()).count();
        let win_rate = if trades.is_empty() {
            0.0
        } else {
            winners as f64 / trades.len() as f64
        };

        SideBreakdown {
            trades: trades.len(),
            winners,
            losers: trades.len() - winners,
            win_rate,
            avg_pnl_pct: Self::mean_pct(trades.iter().copied()),
            expiry_avg_pnl_pct: Self::mean_pct(trades.iter().copied().filter(|t| t.is_expiry)),
            non_expiry_avg_pnl_pct: Self::mean_pct(
                trades.iter().copied().filter(|t| !t.is_expiry),
            ),
        }
    }

    /// Mean `pnl_pct` in percent, `None` without trades.
    fn mean_pct<'a>(trades: impl Iterator<Item = &'a TradeRecord>) -> Option<f64> {
        let (sum, n) = trades.fold((0.0, 0usize), |(sum, n), t| {
            (sum + to_f64(t.pnl_pct), n + 1)
        });
        (n > 0).then(|| sum / n as f64 * 100.0)
    }

    fn nav_curve(trades: &[TradeRecord], starting_capital: Decimal, base_nav: f64) -> Vec<f64> {
        let capital = to_f64(starting_capital);
        let mut nav = base_nav;
        let mut curve = Vec::with_capacity(trades.len() + 1);
        curve.push(nav);
        for trade in trades {
            if capital != 0.0 {
                nav *= 1.0 + to_f64(trade.gross_pnl) / capital;
            }
            curve.push(nav);
        }
        curve
    }

    /// Fractional distance below the running peak, zero or negative.
    fn drawdown_curve(nav_curve: &[f64]) -> Vec<f64> {
        let mut peak = f64::MIN;
        nav_curve
            .iter()
            .map(|&nav| {
                peak = peak.max(nav);
                if peak > 0.0 {
                    (nav - peak) / peak
                } else {
                    0.0
                }
            })
            .collect()
    }

    /// Calculate CAGR (Compound Annual Growth Rate) as a fraction.
    fn calculate_cagr(initial: f64, final_val: f64, days: i64) -> Option<f64> {
        if initial <= 0.0 || final_val < 0.0 {
            return None;
        }
        let years = days.max(1) as f64 / 365.0;
        Some((final_val / initial).powf(1.0 / years) - 1.0)
    }

    /// Month-end NAV by exit date, with the percent change versus the prior month.
    ///
    /// Every calendar month between the first and last trade gets a row; a
    /// month without trades carries the previous NAV forward (0% return).
    fn monthly_returns(trades: &[TradeRecord], nav_curve: &[f64]) -> Vec<MonthlyReturn> {
        let mut month_end: BTreeMap<(i32, u32), f64> = BTreeMap::new();
        for (trade, nav) in trades.iter().zip(nav_curve.iter().skip(1)) {
            month_end.insert((trade.exit_date.year(), trade.exit_date.month()), *nav);
        }

        let (Some((&first, &first_nav)), Some((&last, _))) =
            (month_end.first_key_value(), month_end.last_key_value())
        else {
            return Vec::new();
        };

        let mut returns = Vec::new();
        let mut prev = first_nav;
        let mut current = next_month(first);
        while current <= last {
            let nav = month_end.get(&current).copied().unwrap_or(prev);
            let return_pct = if prev != 0.0 {
                (nav / prev - 1.0) * 100.0
            } else {
                0.0
            };
            returns.push(MonthlyReturn {
                year: current.0,
                month: current.1,
                nav,
                return_pct,
            });
            prev = nav;
            current = next_month(current);
        }
        returns
    }
}

fn next_month((year, month): (i32, u32)) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}
