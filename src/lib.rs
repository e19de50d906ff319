#![cfg_attr(not(test), no_std)]

// Controller core for the magnetic chess head. Everything in here runs inside a
// single cooperative loop; hardware is reached only through the traits in `hal`.

// --- Public Modules ---
pub mod board;
pub mod command;
pub mod config;
pub mod error;
pub mod executor;
pub mod hal;        // Capability traits for steppers, switches and the magnet
pub mod hal_impl;   // embedded-hal backed implementations of the `hal` traits
pub mod mapper;
pub mod motion;
pub mod session;
#[cfg(any(test, feature = "sim"))]
pub mod sim;        // In-memory rig used by tests and the host simulator
pub mod tracker;

// --- Re-exports ---
pub use board::{BoardState, HoldingSlot, Occupant, Square};
pub use config::Calibration;
pub use error::HeadError;
pub use mapper::{Approach, CoordinateMapper, StepPosition};
pub use motion::{HeadState, Motion, MotionController};
pub use session::{CommandSourceKind, Session, SessionState};
pub use tracker::OccupancyTracker;
