// src/config.rs
// Rig calibration. Every physical constant the controller needs lives here so a
// different board can be driven without recompiling.

use core::fmt;

use crate::board::BOARD_SIZE;

/// Calibration and timing for one physical rig.
///
/// All positions are in motor steps. `Default` gives the reference rig.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Calibration {
    /// Steps between the centres of two neighbouring squares.
    pub steps_per_square: i32,
    /// Lowest commandable position on either axis.
    pub steps_min: i32,
    /// Highest commandable position on either axis for normal board moves.
    pub steps_max: i32,
    /// Offset from a square centre to the corner shared with its neighbours.
    pub half_square: i32,
    /// Overtravel allowed past `steps_max` when parking a piece off the board.
    pub steps_extra: i32,
    /// Step position of the a-file centre relative to the homed origin.
    pub x_offset: i32,
    /// Step position of the first rank centre relative to the homed origin.
    pub y_offset: i32,
    /// Counter value assigned to the X axis when its limit switch trips.
    pub x_zero_offset: i32,
    /// Counter value assigned to the Y axis when its limit switch trips.
    pub y_zero_offset: i32,

    // --- Timing ---
    /// Period of one step tick during normal moves, in microseconds.
    pub step_interval_us: u32,
    /// Period of one step tick while seeking the limit switches.
    pub homing_interval_us: u32,
    /// High time of a step pulse.
    pub pulse_width_us: u32,
    /// Time the magnet needs to grip or release after its line changes.
    pub magnet_settle_ms: u32,
    /// Sleep between two command/button polls while idle.
    pub poll_interval_ms: u32,
    /// Homing passes attempted before a homing fault is surfaced.
    pub homing_attempts: u8,

    // --- Holding slots ---
    /// Columns of parking spots beyond the h-file.
    pub slot_columns: u8,
    /// Parking spots per column, spaced `half_square` apart.
    pub slot_rows: u8,
}

/// Upper bound on `slot_columns * slot_rows`.
pub const MAX_HOLDING_SLOTS: usize = 64;

impl Calibration {
    /// Values measured on the reference board.
    pub const REFERENCE: Calibration = Calibration {
        steps_per_square: 7100,
        steps_min: 0,
        steps_max: 63900, // steps_per_square * 9
        half_square: 3550,
        steps_extra: 500,
        x_offset: -1250,
        y_offset: 0,
        x_zero_offset: 0,
        y_zero_offset: 1000,
        step_interval_us: 150,
        homing_interval_us: 600,
        pulse_width_us: 5,
        magnet_settle_ms: 250,
        poll_interval_ms: 10,
        homing_attempts: 3,
        slot_columns: 2,
        slot_rows: 16,
    };

    /// Total number of holding slots.
    pub fn slot_count(&self) -> usize {
        self.slot_columns as usize * self.slot_rows as usize
    }

    /// Upper bound for off-board parking moves.
    pub fn extra_max(&self) -> i32 {
        self.steps_max.saturating_add(self.steps_extra)
    }

    /// Checks the relationships the controller relies on.
    pub fn validate(&self) -> Result<(), CalibrationError> {
        if self.steps_per_square <= 0 {
            return Err(CalibrationError::NonPositive("steps_per_square"));
        }
        if self.steps_min >= self.steps_max {
            return Err(CalibrationError::EmptyTravel);
        }
        if self.half_square <= 0 || self.half_square > self.steps_per_square {
            return Err(CalibrationError::HalfSquare);
        }
        if self.steps_extra < 0 {
            return Err(CalibrationError::NonPositive("steps_extra"));
        }
        if self.step_interval_us <= self.pulse_width_us || self.homing_interval_us <= self.pulse_width_us {
            return Err(CalibrationError::PulseTooLong);
        }
        if self.homing_attempts == 0 {
            return Err(CalibrationError::NonPositive("homing_attempts"));
        }
        let slots = self.slot_count();
        if slots == 0 || slots > MAX_HOLDING_SLOTS {
            return Err(CalibrationError::SlotCount(slots));
        }
        self.validate_reach()
    }

    /// Every square centre and corner must map to its own step position, and
    /// every holding slot must be reachable, without clamping merging two
    /// targets. Computed in `i64` so extreme values are rejected instead of
    /// overflowing.
    fn validate_reach(&self) -> Result<(), CalibrationError> {
        let pitch = self.steps_per_square as i64;
        let half = self.half_square as i64;
        let min = self.steps_min as i64;
        let max = self.steps_max as i64;
        let last = BOARD_SIZE as i64 - 1;
        for (axis, offset) in [("x", self.x_offset as i64), ("y", self.y_offset as i64)] {
            // The first file or rank may clamp onto steps_min; the second must not.
            if offset + pitch <= min || last * pitch + offset + half > max {
                return Err(CalibrationError::BoardReach(axis));
            }
        }

        let extra_max = max + self.steps_extra as i64;
        let last_column = BOARD_SIZE as i64 + self.slot_columns as i64 - 1;
        let slot_x = last_column * pitch + self.x_offset as i64 + self.steps_extra as i64;
        let slot_y = (self.slot_rows as i64 - 1) * half + self.y_offset as i64;
        if extra_max > i32::MAX as i64 || slot_x > extra_max || slot_y > extra_max {
            return Err(CalibrationError::SlotReach);
        }
        if self.slot_rows > 1 && self.y_offset as i64 + half <= min {
            return Err(CalibrationError::SlotReach);
        }
        Ok(())
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self::REFERENCE
    }
}

/// Reasons a `Calibration` is rejected.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationError {
    NonPositive(&'static str),
    EmptyTravel,
    HalfSquare,
    PulseTooLong,
    SlotCount(usize),
    /// Squares on this axis would clamp onto each other.
    BoardReach(&'static str),
    /// A holding slot lies outside the overtravel range.
    SlotReach,
}

impl fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationError::NonPositive(name) => write!(f, "{} must be positive", name),
            CalibrationError::EmptyTravel => write!(f, "steps_min must be below steps_max"),
            CalibrationError::HalfSquare => write!(f, "half_square must lie within one square"),
            CalibrationError::PulseTooLong => write!(f, "pulse_width_us must be shorter than the step intervals"),
            CalibrationError::SlotCount(n) => {
                write!(f, "holding slot count {} outside 1..={}", n, MAX_HOLDING_SLOTS)
            }
            CalibrationError::BoardReach(axis) => {
                write!(f, "board squares on the {} axis do not fit inside steps_min..=steps_max", axis)
            }
            CalibrationError::SlotReach => write!(f, "holding slots do not fit inside the overtravel range"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_is_valid() {
        assert_eq!(Calibration::default().validate(), Ok(()));
        assert_eq!(Calibration::REFERENCE.steps_max, Calibration::REFERENCE.steps_per_square * 9);
        assert_eq!(Calibration::REFERENCE.half_square * 2, Calibration::REFERENCE.steps_per_square);
    }

    #[test]
    fn reference_has_room_for_every_capture() {
        // 30 non-king pieces can be taken in one game.
        assert!(Calibration::REFERENCE.slot_count() >= 30);
    }

    #[test]
    fn rejects_inverted_travel() {
        let cal = Calibration { steps_min: 100, steps_max: 100, ..Calibration::REFERENCE };
        assert_eq!(cal.validate(), Err(CalibrationError::EmptyTravel));
    }

    #[test]
    fn rejects_too_many_slots() {
        let cal = Calibration { slot_columns: 5, slot_rows: 16, ..Calibration::REFERENCE };
        assert_eq!(cal.validate(), Err(CalibrationError::SlotCount(80)));
    }

    #[test]
    fn rejects_travel_too_short_for_the_board() {
        // f1 and h1 would both clamp to 30000.
        let cal = Calibration { steps_max: 30_000, ..Calibration::REFERENCE };
        assert_eq!(cal.validate(), Err(CalibrationError::BoardReach("x")));
        let cal = Calibration { y_offset: 12_000, ..Calibration::REFERENCE };
        assert_eq!(cal.validate(), Err(CalibrationError::BoardReach("y")));
        let cal = Calibration { x_offset: -7_100, ..Calibration::REFERENCE };
        assert_eq!(cal.validate(), Err(CalibrationError::BoardReach("x")));
    }

    #[test]
    fn rejects_slots_beyond_the_overtravel() {
        let cal = Calibration { slot_columns: 3, slot_rows: 16, ..Calibration::REFERENCE };
        assert_eq!(cal.validate(), Err(CalibrationError::SlotReach));
        let cal = Calibration { steps_extra: 0, x_offset: 0, ..Calibration::REFERENCE };
        assert_eq!(cal.validate(), Ok(()));
    }

    #[test]
    fn rejects_values_that_would_overflow() {
        let cal = Calibration {
            steps_per_square: 400_000_000,
            steps_max: i32::MAX - 1,
            half_square: 1,
            ..Calibration::REFERENCE
        };
        assert_eq!(cal.validate(), Err(CalibrationError::BoardReach("x")));
        let cal = Calibration { steps_extra: i32::MAX, ..Calibration::REFERENCE };
        assert_eq!(cal.validate(), Err(CalibrationError::SlotReach));
    }

    #[test]
    fn rejects_pulse_longer_than_interval() {
        let cal = Calibration { pulse_width_us: 150, ..Calibration::REFERENCE };
        assert_eq!(cal.validate(), Err(CalibrationError::PulseTooLong));
    }
}
