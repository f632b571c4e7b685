//! Dense integer identities for option contracts.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::data::Bar;

/// Index of an instrument in every per-instrument array of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstrumentId(usize);

impl InstrumentId {
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Bijective mapping between ticker strings and `0..n`, ordered by ticker.
#[derive(Debug, Clone, Default)]
pub struct InstrumentRegistry {
    tickers: Vec<String>,
    ids: BTreeMap<String, InstrumentId>,
}

impl InstrumentRegistry {
    /// Build the registry from every distinct ticker in the bars.
    pub fn from_bars(bars: &[Bar]) -> Self {
        Self::from_tickers(bars.iter().map(|b| b.ticker.as_str()))
    }

    pub fn from_tickers<'a, I>(tickers: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut sorted: Vec<String> = tickers.into_iter().map(str::to_string).collect();
        sorted.sort();
        sorted.dedup();

        let ids = sorted
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), InstrumentId(i)))
            .collect();

        Self {
            tickers: sorted,
            ids,
        }
    }

    pub fn id(&self, ticker: &str) -> Option<InstrumentId> {
        self.ids.get(ticker).copied()
    }

    pub fn ticker(&self, id: InstrumentId) -> Option<&str> {
        self.tickers.get(id.0).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tickers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty()
    }
}
