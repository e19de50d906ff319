// src/executor.rs
// Turns a validated board move into head motion and keeps the occupancy record
// in step with what was physically done.

use heapless::Vec;
use log::{debug, info, warn};

use crate::board::{BoardState, HoldingSlot, Occupant, Square, BOARD_SIZE};
use crate::config::{Calibration, MAX_HOLDING_SLOTS};
use crate::error::HeadError;
use crate::mapper::{Approach, CoordinateMapper};
use crate::motion::Motion;
use crate::tracker::OccupancyTracker;

/// Plans and runs piece transports.
///
/// Every method takes a `hold` checkpoint. It runs between two transports,
/// with the magnet released, and may block (for example while the session is
/// paused). It never runs while a piece is being dragged.
pub struct MoveExecutor {
    mapper: CoordinateMapper,
}

impl MoveExecutor {
    pub fn new(cal: Calibration) -> Self {
        Self { mapper: CoordinateMapper::new(cal) }
    }

    pub fn mapper(&self) -> &CoordinateMapper {
        &self.mapper
    }

    /// Carries the piece on `from` to `to`, first parking any enemy piece on
    /// `to` in a holding slot. Returns the slot used for a capture.
    ///
    /// All checks happen before the first pulse. A motion failure aborts the
    /// sequence where it happened; the tracker then reflects the last
    /// completed transport.
    pub fn execute_move<M: Motion + ?Sized>(
        &self,
        motion: &mut M,
        tracker: &mut OccupancyTracker,
        from: Square,
        to: Square,
        mut hold: impl FnMut(),
    ) -> Result<Option<HoldingSlot>, HeadError> {
        if !motion.head_state().homed {
            return Err(HeadError::NotHomed);
        }
        let mover = tracker.lookup(from);
        if mover.is_empty() {
            return Err(HeadError::VacantSquare(from));
        }
        let victim = tracker.lookup(to);
        if from == to || !(victim.is_empty() || victim.is_enemy_of(mover)) {
            return Err(HeadError::OccupiedSquare(to));
        }

        let mut captured = None;
        if !victim.is_empty() {
            let slot = tracker.peek_free_slot().ok_or(HeadError::SlotsExhausted)?;
            info!("Capture on {}: parking {:?} in slot {}", to, victim, slot.index);
            self.park_piece(motion, to, slot)?;
            tracker.allocate_holding_slot(victim)?;
            tracker.clear(to);
            captured = Some(slot);
            hold();
        }

        info!("Moving {} -> {}", from, to);
        self.transport(motion, from, to)?;
        tracker.clear(from);
        tracker.place(to, mover)?;
        Ok(captured)
    }

    /// Releases the magnet and retreats to the park corner.
    pub fn park<M: Motion + ?Sized>(&self, motion: &mut M) -> Result<(), HeadError> {
        motion.disengage();
        motion.move_to(self.mapper.park_position())
    }

    /// Physically restores the opening colour layout.
    ///
    /// Pieces standing outside their colour's home ranks are parked first, then
    /// every parked piece (including earlier captures) is carried to a free
    /// home square of its colour. Only colour is tracked, so which piece lands
    /// on which home square is arbitrary.
    pub fn setup_pieces<M: Motion + ?Sized>(
        &self,
        motion: &mut M,
        tracker: &mut OccupancyTracker,
        mut hold: impl FnMut(),
    ) -> Result<(), HeadError> {
        if !motion.head_state().homed {
            return Err(HeadError::NotHomed);
        }
        info!("Setting up pieces");

        for square in Square::all() {
            let occupant = tracker.lookup(square);
            let at_home = occupant.home_ranks().map_or(true, |ranks| ranks.contains(&square.rank()));
            if at_home {
                continue;
            }
            let slot = tracker.peek_free_slot().ok_or(HeadError::SlotsExhausted)?;
            debug!("Clearing {:?} off {} into slot {}", occupant, square, slot.index);
            self.park_piece(motion, square, slot)?;
            tracker.allocate_holding_slot(occupant)?;
            tracker.clear(square);
            hold();
        }

        let parked: Vec<(HoldingSlot, Occupant), MAX_HOLDING_SLOTS> = tracker.parked().collect();
        for (slot, occupant) in parked {
            let Some(home) = free_home_square(tracker.board(), occupant) else {
                warn!("No free home square for {:?} in slot {}", occupant, slot.index);
                continue;
            };
            debug!("Returning {:?} from slot {} to {}", occupant, slot.index, home);
            self.unpark_piece(motion, slot, home)?;
            tracker.release_holding_slot(slot);
            tracker.place(home, occupant)?;
            hold();
        }

        if tracker.board() == &BoardState::starting_position() {
            tracker.initialize();
            info!("Pieces are in the starting layout");
        } else {
            warn!("Board does not match the starting layout; {} pieces tracked", tracker.occupant_count());
        }
        Ok(())
    }

    /// Drags the piece on `from` straight to `to`.
    fn transport<M: Motion + ?Sized>(&self, motion: &mut M, from: Square, to: Square) -> Result<(), HeadError> {
        motion.move_to(self.mapper.to_steps(from, Approach::Direct))?;
        motion.engage();
        motion.move_to(self.mapper.to_steps(to, Approach::Direct))?;
        motion.disengage();
        Ok(())
    }

    /// Drags the piece on `square` out through its corner into `slot`.
    fn park_piece<M: Motion + ?Sized>(&self, motion: &mut M, square: Square, slot: HoldingSlot) -> Result<(), HeadError> {
        motion.move_to(self.mapper.to_steps(square, Approach::Direct))?;
        motion.engage();
        motion.move_to(self.mapper.to_steps(square, Approach::PassThrough))?;
        motion.move_to_extra(self.mapper.slot_to_steps(slot))?;
        motion.disengage();
        Ok(())
    }

    /// Reverse of `park_piece`.
    fn unpark_piece<M: Motion + ?Sized>(&self, motion: &mut M, slot: HoldingSlot, square: Square) -> Result<(), HeadError> {
        motion.move_to_extra(self.mapper.slot_to_steps(slot))?;
        motion.engage();
        motion.move_to(self.mapper.to_steps(square, Approach::PassThrough))?;
        motion.move_to(self.mapper.to_steps(square, Approach::Direct))?;
        motion.disengage();
        Ok(())
    }
}

fn free_home_square(board: &BoardState, occupant: Occupant) -> Option<Square> {
    let ranks = occupant.home_ranks()?;
    ranks
        .iter()
        .flat_map(|&rank| (0..BOARD_SIZE).filter_map(move |file| Square::new(file, rank)))
        .find(|&square| board.get(square).is_empty())
}
