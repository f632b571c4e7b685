//! Per-instrument position state, indexed by [`InstrumentId`].

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::registry::InstrumentId;

/// A short leg that has been sold and not yet bought back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenPosition {
    /// Price at which the stop loss triggers.
    pub stop_loss: Decimal,
    pub entry_price: Decimal,
    pub entry_time: NaiveDateTime,
    /// Bar the position was opened on.
    pub entry_row: usize,
}

/// Status of one instrument.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionState {
    #[default]
    Flat,
    Open(OpenPosition),
}

/// Fixed-size store with one slot per instrument.
///
/// At most one position per instrument can be open; a flat slot carries no
/// stale entry data.
#[derive(Debug, Clone, Default)]
pub struct PositionStore {
    slots: Vec<PositionState>,
}

impl PositionStore {
    pub fn new(instruments: usize) -> Self {
        Self {
            slots: vec![PositionState::Flat; instruments],
        }
    }

    pub fn state(&self, id: InstrumentId) -> PositionState {
        self.slots.get(id.index()).copied().unwrap_or_default()
    }

    pub fn get(&self, id: InstrumentId) -> Option<&OpenPosition> {
        match self.slots.get(id.index()) {
            Some(PositionState::Open(p)) => Some(p),
            _ => None,
        }
    }

    pub fn is_open(&self, id: InstrumentId) -> bool {
        self.get(id).is_some()
    }

    /// Open a position on a flat instrument.
    ///
    /// Returns false and leaves the slot untouched if the instrument is
    /// already open or out of range.
    pub fn open(&mut self, id: InstrumentId, position: OpenPosition) -> bool {
        match self.slots.get_mut(id.index()) {
            Some(slot @ PositionState::Flat) => {
                *slot = PositionState::Open(position);
                true
            }
            _ => false,
        }
    }

    /// Flatten an instrument, returning the position that was open.
    pub fn close(&mut self, id: InstrumentId) -> Option<OpenPosition> {
        let slot = self.slots.get_mut(id.index())?;
        match std::mem::take(slot) {
            PositionState::Open(p) => Some(p),
            PositionState::Flat => None,
        }
    }

    /// Open positions in instrument order.
    pub fn open_positions(&self) -> impl Iterator<Item = (InstrumentId, &OpenPosition)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| match s {
            PositionState::Open(p) => Some((InstrumentId::from_index(i), p)),
            PositionState::Flat => None,
        })
    }
}
