//! Data loader for minute-level option bars.
//!
//! Reads CSV or parquet files with one row per option contract per minute:
//! - Date, Time, Ticker, Call/Put
//! - Open, High, Low, Close
//! - Strike (optional; derived from the ticker when absent)
//!
//! The loader attaches the derived fields the engine relies on: the
//! minute-floored timestamp, the strike, the per-minute underlying reference
//! and the calendar flags.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use polars::prelude::*;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::info;

use super::calendar;
use super::types::{Bar, OptionType};

/// Columns every input file must provide.
pub const EXPECTED_COLUMNS: &[&str] = &[
    "Date", "Time", "Ticker", "Call/Put", "Open", "High", "Low", "Close",
];

/// Optional column carrying an explicit strike price.
pub const STRIKE_COLUMN: &str = "Strike";

const PRICE_COLUMNS: &[&str] = &["Open", "High", "Low", "Close"];

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Missing column: {0}")]
    MissingColumn(String),

    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Loader for a single bar file.
pub struct DataLoader {
    path: PathBuf,
}

impl DataLoader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Scan the file lazily, picking the reader from the extension.
    pub fn load_lazy(&self) -> Result<LazyFrame, LoaderError> {
        if !self.path.exists() {
            return Err(LoaderError::FileNotFound(self.path.display().to_string()));
        }

        let extension = self
            .path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        let lf = match extension.as_deref() {
            Some("csv") => LazyCsvReader::new(&self.path).with_has_header(true).finish()?,
            Some("parquet") => LazyFrame::scan_parquet(&self.path, ScanArgsParquet::default())?,
            _ => {
                return Err(LoaderError::InvalidData(format!(
                    "Unsupported file type: {}",
                    self.path.display()
                )))
            }
        };
        Ok(lf)
    }

    /// Load the file as a typed DataFrame.
    ///
    /// Prices are cast to Float64, date and time to strings.
    pub fn load_frame(&self) -> Result<DataFrame, LoaderError> {
        let mut lf = self.load_lazy()?;
        let schema = lf.collect_schema()?;

        for name in EXPECTED_COLUMNS {
            if schema.get(name).is_none() {
                return Err(LoaderError::MissingColumn(name.to_string()));
            }
        }

        let mut exprs = vec![
            col("Date").cast(DataType::String),
            col("Time").cast(DataType::String),
            col("Ticker").cast(DataType::String),
            col("Call/Put").cast(DataType::String),
        ];
        exprs.extend(PRICE_COLUMNS.iter().map(|c| col(*c).cast(DataType::Float64)));
        if schema.get(STRIKE_COLUMN).is_some() {
            exprs.push(col(STRIKE_COLUMN).cast(DataType::Float64));
        }

        Ok(lf.select(exprs).collect()?)
    }

    /// Load, type and annotate all bars in the file.
    pub fn load_bars(&self) -> Result<Vec<Bar>, LoaderError> {
        info!("Loading data from {}", self.path.display());
        let df = self.load_frame()?;
        info!("Loaded {} rows", df.height());
        dataframe_to_bars(&df)
    }
}

/// Convert a typed DataFrame into bars with every derived field populated.
pub fn dataframe_to_bars(df: &DataFrame) -> Result<Vec<Bar>, LoaderError> {
    let date_col = df.column("Date")?.str()?;
    let time_col = df.column("Time")?.str()?;
    let ticker_col = df.column("Ticker")?.str()?;
    let side_col = df.column("Call/Put")?.str()?;
    let open_col = df.column("Open")?.f64()?;
    let high_col = df.column("High")?.f64()?;
    let low_col = df.column("Low")?.f64()?;
    let close_col = df.column("Close")?.f64()?;
    let strike_col = match df.column(STRIKE_COLUMN) {
        Ok(c) => Some(c.f64()?),
        Err(_) => None,
    };

    let mut bars = Vec::with_capacity(df.height());

    for idx in 0..df.height() {
        let row = idx + 1;
        let date_str = date_col
            .get(idx)
            .ok_or_else(|| LoaderError::InvalidData(format!("Row {}: missing Date", row)))?;
        let time_str = time_col
            .get(idx)
            .ok_or_else(|| LoaderError::InvalidData(format!("Row {}: missing Time", row)))?;
        let ticker = ticker_col
            .get(idx)
            .ok_or_else(|| LoaderError::InvalidData(format!("Row {}: missing Ticker", row)))?;
        let side_str = side_col
            .get(idx)
            .ok_or_else(|| LoaderError::InvalidData(format!("Row {}: missing Call/Put", row)))?;

        let date = parse_date(date_str).ok_or_else(|| {
            LoaderError::InvalidData(format!("Row {}: bad date {}", row, date_str))
        })?;
        let time = parse_time(time_str).ok_or_else(|| {
            LoaderError::InvalidData(format!("Row {}: bad time {}", row, time_str))
        })?;
        let option_type = OptionType::from_str(side_str).ok_or_else(|| {
            LoaderError::InvalidData(format!("Row {}: unknown option type {}", row, side_str))
        })?;

        let strike = match strike_col.and_then(|c| c.get(idx)) {
            Some(s) => to_decimal(s, "Strike", row)?,
            None => extract_strike(ticker).ok_or_else(|| {
                LoaderError::InvalidData(format!("Row {}: no strike in ticker {}", row, ticker))
            })?,
        };

        let price = |c: &Float64Chunked, name: &str| -> Result<Decimal, LoaderError> {
            let v = c
                .get(idx)
                .ok_or_else(|| LoaderError::InvalidData(format!("Row {}: missing {}", row, name)))?;
            to_decimal(v, name, row)
        };

        bars.push(Bar {
            date,
            time,
            minute: floor_to_minute(date, time),
            ticker: ticker.to_string(),
            option_type,
            strike,
            open: price(open_col, "Open")?,
            high: price(high_col, "High")?,
            low: price(low_col, "Low")?,
            close: price(close_col, "Close")?,
            underlying_close: Decimal::ZERO,
            is_expiry: false,
            is_week_one: false,
        });
    }

    attach_underlying(&mut bars);
    calendar::annotate(&mut bars);

    Ok(bars)
}

fn to_decimal(value: f64, name: &str, row: usize) -> Result<Decimal, LoaderError> {
    Decimal::from_f64(value).ok_or_else(|| {
        LoaderError::InvalidData(format!("Row {}: {} is not finite ({})", row, name, value))
    })
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

/// Combine date and time, dropping seconds.
pub fn floor_to_minute(date: NaiveDate, time: NaiveTime) -> NaiveDateTime {
    let floored = NaiveTime::from_hms_opt(time.hour(), time.minute(), 0).unwrap_or(time);
    date.and_time(floored)
}

/// Strike encoded in an option symbol: the first run of digits.
pub fn extract_strike(ticker: &str) -> Option<Decimal> {
    let digits: String = ticker
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse::<Decimal>().ok()
}

/// Set each bar's underlying reference to the median strike of its minute.
fn attach_underlying(bars: &mut [Bar]) {
    let mut strikes: BTreeMap<NaiveDateTime, Vec<Decimal>> = BTreeMap::new();
    for bar in bars.iter() {
        strikes.entry(bar.minute).or_default().push(bar.strike);
    }

    let medians: BTreeMap<NaiveDateTime, Decimal> = strikes
        .into_iter()
        .map(|(minute, mut values)| {
            values.sort();
            (minute, median(&values))
        })
        .collect();

    for bar in bars.iter_mut() {
        if let Some(m) = medians.get(&bar.minute) {
            bar.underlying_close = *m;
        }
    }
}

/// Median of sorted values (mean of the middle pair for even counts).
fn median(sorted: &[Decimal]) -> Decimal {
    let n = sorted.len();
    if n == 0 {
        return Decimal::ZERO;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / Decimal::TWO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_frame() -> DataFrame {
        df!(
            "Date" => &["2023-01-02", "2023-01-02", "2023-01-04"],
            "Time" => &["09:20:59", "09:20:00", "09:21:00"],
            "Ticker" => &["NIFTY18000CE", "NIFTY17900PE", "NIFTY18000CE"],
            "Call/Put" => &["CE", "PE", "CE"],
            "Open" => &[50.0, 48.0, 51.0],
            "High" => &[52.5, 49.0, 53.0],
            "Low" => &[49.0, 47.5, 50.0],
            "Close" => &[50.1, 48.0, 52.0]
        )
        .unwrap()
    }

    #[test]
    fn test_extract_strike() {
        assert_eq!(extract_strike("NIFTY18000CE"), Some(dec!(18000)));
        assert_eq!(extract_strike("BANKNIFTY42500PE"), Some(dec!(42500)));
        assert_eq!(extract_strike("NIFTYCE"), None);
    }

    #[test]
    fn test_floor_to_minute() {
        let date = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        let time = NaiveTime::from_hms_opt(9, 20, 59).unwrap();
        let minute = floor_to_minute(date, time);
        assert_eq!(minute.time(), NaiveTime::from_hms_opt(9, 20, 0).unwrap());
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[dec!(1), dec!(3), dec!(7)]), dec!(3));
        assert_eq!(median(&[dec!(17900), dec!(18000)]), dec!(17950));
        assert_eq!(median(&[]), Decimal::ZERO);
    }

    #[test]
    fn test_dataframe_to_bars() {
        let bars = dataframe_to_bars(&sample_frame()).unwrap();
        assert_eq!(bars.len(), 3);

        let call = &bars[0];
        assert_eq!(call.option_type, OptionType::Call);
        assert_eq!(call.strike, dec!(18000));
        assert_eq!(call.close, dec!(50.1));
        assert_eq!(call.minute, bars[1].minute);
        // Two rows share 09:20 on the 2nd
        assert_eq!(call.underlying_close, dec!(17950));
        assert!(!call.is_expiry);
        assert!(call.is_week_one);

        // 2023-01-04 is a Wednesday
        assert!(bars[2].is_expiry);
        assert_eq!(bars[2].underlying_close, dec!(18000));
    }

    #[test]
    fn test_rejects_unknown_option_type() {
        let df = df!(
            "Date" => &["2023-01-02"],
            "Time" => &["09:20:00"],
            "Ticker" => &["NIFTY18000XX"],
            "Call/Put" => &["XX"],
            "Open" => &[1.0],
            "High" => &[1.0],
            "Low" => &[1.0],
            "Close" => &[1.0]
        )
        .unwrap();
        assert!(matches!(dataframe_to_bars(&df), Err(LoaderError::InvalidData(_))));
    }

    #[test]
    fn test_missing_file() {
        let loader = DataLoader::new("does/not/exist.csv");
        assert!(matches!(loader.load_frame(), Err(LoaderError::FileNotFound(_))));
    }
}
