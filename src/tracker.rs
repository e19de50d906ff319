// src/tracker.rs
// Logical record of what sits on each square and in each holding slot. The
// physical board has no sensors, so this is the only source of truth for
// occupancy; it is mutated by the move executor alone.

use heapless::Vec;
use log::debug;

use crate::board::{BoardState, HoldingSlot, Occupant, Square};
use crate::config::{Calibration, MAX_HOLDING_SLOTS};
use crate::error::HeadError;

/// Board occupancy plus the contents of the holding slots.
#[derive(Clone, Debug)]
pub struct OccupancyTracker {
    board: BoardState,
    /// One entry per configured slot; `None` is free.
    slots: Vec<Option<Occupant>, MAX_HOLDING_SLOTS>,
}

impl OccupancyTracker {
    /// Tracker for the starting position with `cal.slot_count()` empty slots.
    pub fn new(cal: &Calibration) -> Self {
        let mut slots = Vec::new();
        for _ in 0..cal.slot_count().min(MAX_HOLDING_SLOTS) {
            // Cannot fail: bounded by the capacity above.
            let _ = slots.push(None);
        }
        Self { board: BoardState::starting_position(), slots }
    }

    /// Same slots, but starting from an arbitrary position.
    pub fn with_board(cal: &Calibration, board: BoardState) -> Self {
        let mut tracker = Self::new(cal);
        tracker.board = board;
        tracker
    }

    /// Back to the starting position with every slot free.
    pub fn initialize(&mut self) {
        self.board = BoardState::starting_position();
        self.release_all();
    }

    pub fn board(&self) -> &BoardState {
        &self.board
    }

    pub fn lookup(&self, square: Square) -> Occupant {
        self.board.get(square)
    }

    /// Records `occupant` on `square`, which must be empty.
    pub fn place(&mut self, square: Square, occupant: Occupant) -> Result<(), HeadError> {
        if !self.board.get(square).is_empty() {
            return Err(HeadError::OccupiedSquare(square));
        }
        self.board.set(square, occupant);
        Ok(())
    }

    pub fn clear(&mut self, square: Square) {
        self.board.set(square, Occupant::Empty);
    }

    /// The slot the next allocation would hand out.
    pub fn peek_free_slot(&self) -> Option<HoldingSlot> {
        self.slots.iter().position(Option::is_none).map(|i| HoldingSlot::new(i as u8))
    }

    /// Reserves the lowest free slot for `occupant`.
    pub fn allocate_holding_slot(&mut self, occupant: Occupant) -> Result<HoldingSlot, HeadError> {
        let slot = self.peek_free_slot().ok_or(HeadError::SlotsExhausted)?;
        self.slots[slot.index as usize] = Some(occupant);
        debug!("Holding slot {} now holds {:?}", slot.index, occupant);
        Ok(slot)
    }

    pub fn release_holding_slot(&mut self, slot: HoldingSlot) {
        if let Some(entry) = self.slots.get_mut(slot.index as usize) {
            *entry = None;
        }
    }

    pub fn release_all(&mut self) {
        for entry in self.slots.iter_mut() {
            *entry = None;
        }
    }

    /// Occupant parked in slot `index`, `None` if the slot is free or unknown.
    pub fn holding_slot(&self, index: u8) -> Option<Occupant> {
        self.slots.get(index as usize).copied().flatten()
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Parked pieces in slot order.
    pub fn parked(&self) -> impl Iterator<Item = (HoldingSlot, Occupant)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, entry)| entry.map(|occupant| (HoldingSlot::new(i as u8), occupant)))
    }

    /// Pieces on the board plus pieces in holding slots.
    pub fn occupant_count(&self) -> usize {
        self.board.occupied_count() + self.parked().count()
    }
}
