// src/error.rs
// Failure taxonomy shared by the motion, tracking and session layers.

use core::fmt;

use crate::board::Square;
use crate::hal::AxisId;
use crate::session::SessionState;

/// Everything that can stop the head from completing a request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HeadError {
    /// The axis travelled its full range without its limit switch asserting.
    Homing { axis: AxisId },
    /// A computed target lies outside the axis travel.
    OutOfRange { x: i32, y: i32 },
    /// Motion was requested before the head completed a homing pass.
    NotHomed,
    /// A piece would be placed on a square that already holds one.
    OccupiedSquare(Square),
    /// Every holding slot is already in use.
    SlotsExhausted,
    /// A move started from a square with nothing on it.
    VacantSquare(Square),
    /// The request is not accepted in the current session state.
    WrongState(SessionState),
}

impl HeadError {
    /// Fatal errors mean the physical and logical boards may disagree; the
    /// operator has to intervene before play can continue.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, HeadError::NotHomed | HeadError::WrongState(_))
    }
}

impl fmt::Display for HeadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeadError::Homing { axis } => write!(f, "{:?} limit switch never triggered while homing", axis),
            HeadError::OutOfRange { x, y } => write!(f, "target ({}, {}) is outside the travel range", x, y),
            HeadError::NotHomed => write!(f, "head has not been homed"),
            HeadError::OccupiedSquare(sq) => write!(f, "square {} is already occupied", sq),
            HeadError::SlotsExhausted => write!(f, "no free holding slot"),
            HeadError::VacantSquare(sq) => write!(f, "square {} is empty", sq),
            HeadError::WrongState(state) => write!(f, "request not allowed while {:?}", state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatality() {
        assert!(HeadError::Homing { axis: AxisId::X }.is_fatal());
        assert!(HeadError::SlotsExhausted.is_fatal());
        assert!(HeadError::OutOfRange { x: 0, y: 70000 }.is_fatal());
        assert!(!HeadError::NotHomed.is_fatal());
        assert!(!HeadError::WrongState(SessionState::Running).is_fatal());
    }

    #[test]
    fn messages_name_the_square() {
        let sq = Square::new(4, 3).unwrap();
        assert_eq!(HeadError::OccupiedSquare(sq).to_string(), "square e4 is already occupied");
        assert_eq!(HeadError::VacantSquare(sq).to_string(), "square e4 is empty");
    }
}
