//! Per-minute entry candidate selection.
//!
//! For every minute and option side the selector picks the contract whose
//! close is nearest the target premium:
//! - primary key: |close - target_premium|, smaller wins
//! - calls: higher strike wins a tie
//! - puts: lower strike wins a tie
//! - remaining ties: lower instrument id wins
//!
//! It also indexes every bar by minute so the engine can walk one minute's
//! cohort at a time. Both lookups are built once and read-only afterwards.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use rust_decimal::Decimal;

use crate::data::{Bar, OptionType};

use super::engine::EngineError;
use super::registry::{InstrumentId, InstrumentRegistry};

/// One bar of a minute's cohort, resolved to its instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CohortRow {
    pub instrument: InstrumentId,
    /// Index into the bar slice the index was built from.
    pub row: usize,
}

/// Entry candidates for a single minute, at most one per side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MinuteCandidates {
    pub call: Option<CohortRow>,
    pub put: Option<CohortRow>,
}

impl MinuteCandidates {
    pub fn side(&self, side: OptionType) -> Option<CohortRow> {
        match side {
            OptionType::Call => self.call,
            OptionType::Put => self.put,
        }
    }

    fn side_mut(&mut self, side: OptionType) -> &mut Option<CohortRow> {
        match side {
            OptionType::Call => &mut self.call,
            OptionType::Put => &mut self.put,
        }
    }
}

/// Ranking key of a bar for its side; smaller ranks first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct RankKey {
    distance: Decimal,
    tiebreak: Decimal,
    instrument: InstrumentId,
}

impl RankKey {
    fn new(bar: &Bar, instrument: InstrumentId, target_premium: Decimal) -> Self {
        let tiebreak = match bar.option_type {
            OptionType::Call => -bar.strike,
            OptionType::Put => bar.strike,
        };
        Self {
            distance: (bar.close - target_premium).abs(),
            tiebreak,
            instrument,
        }
    }
}

/// Static per-minute lookups for one run.
#[derive(Debug, Clone, Default)]
pub struct MinuteIndex {
    rows_by_minute: BTreeMap<NaiveDateTime, Vec<CohortRow>>,
    candidates: BTreeMap<NaiveDateTime, MinuteCandidates>,
}

impl MinuteIndex {
    /// Index `bars` by minute and rank candidates against `target_premium`.
    ///
    /// Fails if a ticker is missing from the registry or appears twice in
    /// the same minute.
    pub fn build(
        bars: &[Bar],
        registry: &InstrumentRegistry,
        target_premium: Decimal,
    ) -> Result<Self, EngineError> {
        let mut rows_by_minute: BTreeMap<NaiveDateTime, Vec<CohortRow>> = BTreeMap::new();
        let mut best: BTreeMap<(NaiveDateTime, OptionType), (RankKey, CohortRow)> = BTreeMap::new();

        for (row, bar) in bars.iter().enumerate() {
            let instrument = registry
                .id(&bar.ticker)
                .ok_or_else(|| EngineError::UnknownInstrument(bar.ticker.clone()))?;
            let entry = CohortRow { instrument, row };
            rows_by_minute.entry(bar.minute).or_default().push(entry);

            let key = RankKey::new(bar, instrument, target_premium);
            best.entry((bar.minute, bar.option_type))
                .and_modify(|current| {
                    if key < current.0 {
                        *current = (key, entry);
                    }
                })
                .or_insert((key, entry));
        }

        for (minute, cohort) in rows_by_minute.iter_mut() {
            cohort.sort_by_key(|r| r.instrument);
            if let Some(pair) = cohort.windows(2).find(|w| w[0].instrument == w[1].instrument) {
                return Err(EngineError::DuplicateBar {
                    ticker: bars[pair[0].row].ticker.clone(),
                    minute: *minute,
                });
            }
        }

        let mut candidates: BTreeMap<NaiveDateTime, MinuteCandidates> = BTreeMap::new();
        for ((minute, side), (_, entry)) in best {
            *candidates.entry(minute).or_default().side_mut(side) = Some(entry);
        }

        Ok(Self {
            rows_by_minute,
            candidates,
        })
    }

    /// Every distinct minute, ascending.
    pub fn minutes(&self) -> impl Iterator<Item = NaiveDateTime> + '_ {
        self.rows_by_minute.keys().copied()
    }

    /// All bars of a minute, ordered by instrument id.
    pub fn cohort(&self, minute: NaiveDateTime) -> &[CohortRow] {
        self.rows_by_minute
            .get(&minute)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn candidates(&self, minute: NaiveDateTime) -> MinuteCandidates {
        self.candidates.get(&minute).copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.rows_by_minute.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows_by_minute.is_empty()
    }
}
