//! Strategy configuration for a backtest run.

use std::path::Path;

use chrono::{NaiveTime, Timelike};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Configuration for backtest execution.
///
/// Every field is required; the engine never falls back to built-in values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Time of day at which both legs are sold.
    pub entry_time: NaiveTime,

    /// Time of day at which every open leg is bought back.
    pub exit_time: NaiveTime,

    /// Stop loss as a fraction of the entry premium (e.g., 0.5 = exit at 150%).
    pub stoploss_pct: Decimal,

    /// Contracts per lot.
    pub lot_size: u32,

    /// Lots traded per leg.
    pub num_lots: u32,

    /// Premium the candidate selector aims for.
    pub target_premium: Decimal,

    /// Re-sell a leg in the same minute it was stopped out.
    pub reentry: bool,

    /// Capital the cumulative P&L is added to.
    pub starting_capital: Decimal,
}

impl BacktestConfig {
    /// Contracts traded per leg.
    pub fn quantity(&self) -> Decimal {
        Decimal::from(self.lot_size) * Decimal::from(self.num_lots)
    }

    /// Stop trigger for a short sold at `entry_price`.
    pub fn stop_level(&self, entry_price: Decimal) -> Decimal {
        entry_price * (Decimal::ONE + self.stoploss_pct)
    }

    /// Check whether a minute-of-day lies in the trading window.
    pub fn in_window(&self, time: NaiveTime) -> bool {
        self.entry_time <= time && time <= self.exit_time
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, time) in [("entry_time", self.entry_time), ("exit_time", self.exit_time)] {
            if time.second() != 0 || time.nanosecond() != 0 {
                return Err(ConfigError::Invalid(format!(
                    "{} {} must fall on a whole minute",
                    name, time
                )));
            }
        }
        if self.entry_time >= self.exit_time {
            return Err(ConfigError::Invalid(format!(
                "entry_time {} must be before exit_time {}",
                self.entry_time, self.exit_time
            )));
        }
        if self.stoploss_pct.is_sign_negative() {
            return Err(ConfigError::Invalid(format!(
                "stoploss_pct must be non-negative, got {}",
                self.stoploss_pct
            )));
        }
        if self.lot_size == 0 || self.num_lots == 0 {
            return Err(ConfigError::Invalid(format!(
                "lot_size ({}) and num_lots ({}) must be positive",
                self.lot_size, self.num_lots
            )));
        }
        if self.target_premium.is_sign_negative() {
            return Err(ConfigError::Invalid(format!(
                "target_premium must be non-negative, got {}",
                self.target_premium
            )));
        }
        Ok(())
    }

    /// Parse and validate a TOML document holding only the strategy table.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const STRATEGY: &str = r#"
        entry_time = "09:20:00"
        exit_time = "15:20:00"
        stoploss_pct = 0.5
        lot_size = 15
        num_lots = 2
        target_premium = 50.0
        reentry = true
        starting_capital = 1000.0
    "#;

    #[test]
    fn test_parse_strategy() {
        let config = BacktestConfig::from_toml_str(STRATEGY).unwrap();
        assert_eq!(config.entry_time, NaiveTime::from_hms_opt(9, 20, 0).unwrap());
        assert_eq!(config.stoploss_pct, dec!(0.5));
        assert_eq!(config.quantity(), dec!(30));
        assert_eq!(config.stop_level(dec!(50)), dec!(75));
        assert!(config.reentry);
    }

    #[test]
    fn test_missing_field_is_rejected() {
        let partial = STRATEGY.replace("reentry = true", "");
        assert!(matches!(
            BacktestConfig::from_toml_str(&partial),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_inverted_window_is_rejected() {
        let inverted = STRATEGY.replace("\"15:20:00\"", "\"09:00:00\"");
        assert!(matches!(
            BacktestConfig::from_toml_str(&inverted),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_times_with_seconds_are_rejected() {
        let offset = STRATEGY.replace("\"09:20:00\"", "\"09:20:30\"");
        assert!(matches!(
            BacktestConfig::from_toml_str(&offset),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_window_is_inclusive() {
        let config = BacktestConfig::from_toml_str(STRATEGY).unwrap();
        assert!(config.in_window(config.entry_time));
        assert!(config.in_window(config.exit_time));
        assert!(!config.in_window(NaiveTime::from_hms_opt(15, 21, 0).unwrap()));
    }
}
