//! Calendar features and trading-universe filtering.
//!
//! - Expiry days are Wednesdays (weekly index options)
//! - Week one of a month is the five calendar days starting at the first
//!   Monday observed in that month's data

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use tracing::info;

use super::types::Bar;

/// Weekday on which weekly contracts expire.
pub const EXPIRY_WEEKDAY: Weekday = Weekday::Wed;

/// Number of calendar days, starting at the first Monday, that make up week one.
pub const WEEK_ONE_DAYS: i64 = 5;

/// Check whether a trading date is an expiry day.
pub fn is_expiry_day(date: NaiveDate) -> bool {
    date.weekday() == EXPIRY_WEEKDAY
}

/// Collect every date that belongs to the first week of its month.
///
/// Only Mondays present in `dates` anchor a week, so a month whose first
/// Monday is a holiday starts week one at the next observed Monday.
pub fn week_one_dates<I>(dates: I) -> BTreeSet<NaiveDate>
where
    I: IntoIterator<Item = NaiveDate>,
{
    let mut first_monday: BTreeMap<(i32, u32), NaiveDate> = BTreeMap::new();
    for date in dates {
        if date.weekday() != Weekday::Mon {
            continue;
        }
        first_monday
            .entry((date.year(), date.month()))
            .and_modify(|d| *d = (*d).min(date))
            .or_insert(date);
    }

    first_monday
        .values()
        .flat_map(|&monday| (0..WEEK_ONE_DAYS).map(move |offset| monday + Duration::days(offset)))
        .collect()
}

/// Fill in the `is_expiry` and `is_week_one` flags of every bar.
pub fn annotate(bars: &mut [Bar]) {
    let week_one = week_one_dates(bars.iter().map(|b| b.date));
    for bar in bars.iter_mut() {
        bar.is_expiry = is_expiry_day(bar.date);
        bar.is_week_one = week_one.contains(&bar.date);
    }
}

/// Restrict the bars to the tradable universe.
pub fn filter_universe(bars: Vec<Bar>, week_one_only: bool) -> Vec<Bar> {
    if !week_one_only {
        info!("Trading on all weeks of the month");
        return bars;
    }

    info!("Trading only on the first week of the month");
    let before = bars.len();
    let kept: Vec<Bar> = bars.into_iter().filter(|b| b.is_week_one).collect();
    info!("Universe filter kept {} of {} bars", kept.len(), before);
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_expiry_day() {
        assert!(is_expiry_day(d(2023, 1, 4))); // Wednesday
        assert!(!is_expiry_day(d(2023, 1, 5)));
    }

    #[test]
    fn test_week_one_spans_five_days_from_first_monday() {
        // January 2023: first Monday is the 2nd
        let dates = vec![d(2023, 1, 2), d(2023, 1, 9), d(2023, 1, 16)];
        let week_one = week_one_dates(dates);

        assert!(week_one.contains(&d(2023, 1, 2)));
        assert!(week_one.contains(&d(2023, 1, 6)));
        assert!(!week_one.contains(&d(2023, 1, 7)));
        assert!(!week_one.contains(&d(2023, 1, 9)));
        assert_eq!(week_one.len(), 5);
    }

    #[test]
    fn test_week_one_skips_missing_monday() {
        // February 2023: 6th missing from the data, so the 13th anchors
        let dates = vec![d(2023, 2, 1), d(2023, 2, 13)];
        let week_one = week_one_dates(dates);

        assert!(!week_one.contains(&d(2023, 2, 1)));
        assert!(week_one.contains(&d(2023, 2, 15)));
    }

    #[test]
    fn test_month_without_monday_has_no_week_one() {
        let week_one = week_one_dates(vec![d(2023, 3, 1), d(2023, 3, 2)]);
        assert!(week_one.is_empty());
    }
}
