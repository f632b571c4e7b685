//! Core data types for intraday options backtesting.
//!
//! One [`Bar`] is one minute of OHLC data for one option contract. Bars are
//! produced by the loader and are read-only to the engine.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Option type (call or put).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    /// Both sides, in the order the engine processes them.
    pub const ALL: [OptionType; 2] = [OptionType::Call, OptionType::Put];

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "CE" | "C" | "CALL" => Some(Self::Call),
            "PE" | "P" | "PUT" => Some(Self::Put),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "CE",
            Self::Put => "PE",
        }
    }
}

/// A single minute bar for one option contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Trading date
    pub date: NaiveDate,

    /// Time of day as recorded in the source
    pub time: NaiveTime,

    /// Timestamp floored to the minute
    pub minute: NaiveDateTime,

    /// Option contract symbol (e.g., "NIFTY23JAN18000CE")
    pub ticker: String,

    /// Option type (call or put)
    pub option_type: OptionType,

    /// Strike price
    pub strike: Decimal,

    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,

    /// Reference price of the underlying at this minute
    pub underlying_close: Decimal,

    /// Trading date is a weekly expiry
    pub is_expiry: bool,

    /// Trading date falls in the first trading week of its month
    pub is_week_one: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_type_parsing() {
        assert_eq!(OptionType::from_str("CE"), Some(OptionType::Call));
        assert_eq!(OptionType::from_str("PE"), Some(OptionType::Put));
        assert_eq!(OptionType::from_str("call"), Some(OptionType::Call));
        assert_eq!(OptionType::from_str(" P "), Some(OptionType::Put));
        assert_eq!(OptionType::from_str("X"), None);
    }

    #[test]
    fn test_option_type_labels() {
        assert_eq!(OptionType::Call.as_str(), "CE");
        assert_eq!(OptionType::Put.as_str(), "PE");
    }
}
