// src/mapper.rs
// Board coordinates -> absolute motor steps. Integer arithmetic only, so the
// same square always lands on the same step count.

use crate::board::{HoldingSlot, Square, BOARD_SIZE};
use crate::config::Calibration;

/// Absolute head position in motor steps.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StepPosition {
    pub x: i32,
    pub y: i32,
}

impl StepPosition {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// How the head arrives at a square.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Approach {
    /// Stop on the square centre.
    Direct,
    /// Stop on the corner shared with the next file and rank, between the
    /// pieces, so a dragged piece clears its neighbours.
    PassThrough,
}

/// Converts squares and holding slots into step targets for one calibration.
#[derive(Copy, Clone, Debug)]
pub struct CoordinateMapper {
    cal: Calibration,
}

impl CoordinateMapper {
    pub fn new(cal: Calibration) -> Self {
        Self { cal }
    }

    /// Step target for `square`, clamped to the normal travel range.
    pub fn to_steps(&self, square: Square, approach: Approach) -> StepPosition {
        let adjust = match approach {
            Approach::Direct => 0,
            Approach::PassThrough => self.cal.half_square as i64,
        };
        let pitch = self.cal.steps_per_square as i64;
        let x = square.file() as i64 * pitch + self.cal.x_offset as i64 + adjust;
        let y = square.rank() as i64 * pitch + self.cal.y_offset as i64 + adjust;
        StepPosition::new(self.clamp(x, self.cal.steps_max), self.clamp(y, self.cal.steps_max))
    }

    /// Step target for a holding slot.
    ///
    /// Slots form `slot_columns` columns at virtual files 8, 9, ... pushed out by
    /// `steps_extra`, with `slot_rows` spots per column spaced `half_square`
    /// apart. Slot `index = column * slot_rows + row`.
    pub fn slot_to_steps(&self, slot: HoldingSlot) -> StepPosition {
        let rows = self.cal.slot_rows.max(1) as i64;
        let column = slot.index as i64 / rows;
        let row = slot.index as i64 % rows;
        let x = (BOARD_SIZE as i64 + column) * self.cal.steps_per_square as i64
            + self.cal.x_offset as i64
            + self.cal.steps_extra as i64;
        let y = row * self.cal.half_square as i64 + self.cal.y_offset as i64;
        let max = self.cal.extra_max();
        StepPosition::new(self.clamp(x, max), self.clamp(y, max))
    }

    // Arithmetic is widened so a calibration that never went through
    // `Calibration::validate` clamps instead of overflowing.
    fn clamp(&self, value: i64, max: i32) -> i32 {
        value.min(max as i64).max(self.cal.steps_min as i64) as i32
    }

    /// Off-board corner the head retreats to so the operator can reach the board.
    pub fn park_position(&self) -> StepPosition {
        StepPosition::new(self.cal.steps_max, self.cal.steps_max)
    }

    pub fn in_board_range(&self, pos: StepPosition) -> bool {
        let range = self.cal.steps_min..=self.cal.steps_max;
        range.contains(&pos.x) && range.contains(&pos.y)
    }

    pub fn in_extra_range(&self, pos: StepPosition) -> bool {
        let range = self.cal.steps_min..=self.cal.extra_max();
        range.contains(&pos.x) && range.contains(&pos.y)
    }
}
