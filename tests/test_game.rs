use std::cell::RefCell;

use magchess_mcu::command::SerialCommandSource;
use magchess_mcu::session::Outcome;
use magchess_mcu::sim::{SimDelay, SimRig, SimSerial, SimSwitch};
use magchess_mcu::{
    Approach, BoardState, Calibration, CommandSourceKind, CoordinateMapper, HeadError, HoldingSlot, OccupancyTracker,
    Occupant, Session, SessionState, Square, StepPosition,
};

const CAL: Calibration = Calibration::REFERENCE;

fn physical(pos: StepPosition) -> StepPosition {
    StepPosition::new(pos.x - CAL.x_zero_offset, pos.y - CAL.y_zero_offset)
}

/// Every tracked square and slot has a matching piece on the simulated table.
fn assert_table_matches(rig: &SimRig, session_board: &BoardState, parked: &[(HoldingSlot, Occupant)]) {
    let mapper = CoordinateMapper::new(CAL);
    for square in Square::all() {
        let pos = physical(mapper.to_steps(square, Approach::Direct));
        let found = rig.piece_at(pos).unwrap_or(Occupant::Empty);
        assert_eq!(found, session_board.get(square), "mismatch on {}", square);
    }
    for (slot, occupant) in parked {
        let pos = physical(mapper.slot_to_steps(*slot));
        assert_eq!(rig.piece_at(pos), Some(*occupant), "mismatch in slot {}", slot.index);
    }
    assert_eq!(rig.pieces().len(), 32);
}

#[test]
fn test_scandinavian_opening_with_captures() {
    let mut rig = SimRig::new(StepPosition::new(20_000, 15_000));
    rig.place_starting_pieces(&CAL);
    let rig = RefCell::new(rig);

    // 1. e4 d5 2. exd5 Qxd5 3. Nc3 Qa5
    let script = b"me2e4\r\nmd7d5\r\nme4d5\r\nmd8d5\r\nmb1c3\r\nmd5a5\r\n";
    let mut session = Session::new(
        SimRig::motion(&rig, CAL),
        SerialCommandSource::new(SimSerial::new(script)),
        SimSwitch::button(&rig),
        SimDelay::new(&rig),
        CAL,
    );
    session.start().unwrap();

    let mut captures = Vec::new();
    while let Ok(outcome) = session.service() {
        match outcome {
            Outcome::Moved { captured: Some(slot), .. } => captures.push(slot),
            Outcome::Moved { .. } => {}
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    assert_eq!(captures, vec![HoldingSlot::new(0), HoldingSlot::new(1)]);
    assert_eq!(session.state(), SessionState::Running);
    assert_eq!(session.expected_source(), CommandSourceKind::User);
    assert_eq!(session.source().serial().sent(), b"dddddd");

    let tracker = session.tracker();
    assert_eq!(tracker.occupant_count(), 32);
    assert_eq!(tracker.holding_slot(0), Some(Occupant::BlackPiece));
    assert_eq!(tracker.holding_slot(1), Some(Occupant::WhitePiece));
    assert_eq!(tracker.lookup(Square::from_algebraic(b"a5").unwrap()), Occupant::BlackPiece);
    assert_eq!(tracker.lookup(Square::from_algebraic(b"c3").unwrap()), Occupant::WhitePiece);

    let parked: Vec<_> = tracker.parked().collect();
    assert_table_matches(&rig.borrow(), tracker.board(), &parked);
    assert!(!rig.borrow().magnet_engaged());
}

#[test]
fn test_setup_pieces_after_a_game() {
    let rig = RefCell::new({
        let mut rig = SimRig::new(StepPosition::new(0, 0));
        rig.place_starting_pieces(&CAL);
        rig
    });
    let script = b"me2e4 md7d5 me4d5 md8d5 mg1f3 md5e4";
    let mut session = Session::new(
        SimRig::motion(&rig, CAL),
        SerialCommandSource::new(SimSerial::new(script)),
        SimSwitch::button(&rig),
        SimDelay::new(&rig),
        CAL,
    );
    session.start().unwrap();
    while session.service().is_ok() {}

    session.setup_pieces().unwrap();
    assert_eq!(session.tracker().board(), &BoardState::starting_position());
    assert_eq!(session.tracker().parked().count(), 0);
    assert_table_matches(&rig.borrow(), &BoardState::starting_position(), &[]);
}

#[test]
fn test_fatal_fault_holds_the_pause_until_pieces_are_reset() {
    let rig = RefCell::new({
        let mut rig = SimRig::new(StepPosition::new(0, 0));
        rig.place_starting_pieces(&CAL);
        rig
    });
    // The second frame drops the queen onto its own king.
    let script = b"me2e4 md1e1 md7d5";
    let mut session = Session::new(
        SimRig::motion(&rig, CAL),
        SerialCommandSource::new(SimSerial::new(script)),
        SimSwitch::button(&rig),
        SimDelay::new(&rig),
        CAL,
    );
    session.start().unwrap();
    assert!(matches!(session.service(), Ok(Outcome::Moved { .. })));
    let outcome = session.service().unwrap();
    assert_eq!(outcome, Outcome::Faulted(HeadError::OccupiedSquare(Square::from_algebraic(b"e1").unwrap())));
    assert_eq!(session.state(), SessionState::Paused);

    session.button_release();
    session.button_press();
    assert_eq!(session.state(), SessionState::Paused);
    assert!(session.fault().is_some());

    session.setup_pieces().unwrap();
    assert_eq!(session.state(), SessionState::Running);
    assert_eq!(session.fault(), None);
    assert_table_matches(&rig.borrow(), &BoardState::starting_position(), &[]);

    assert!(matches!(session.service(), Ok(Outcome::Moved { .. })));
    assert_eq!(session.source().serial().sent(), b"dfd");
}

/// Piece totals are conserved and no square or slot holds two pieces.
fn assert_occupancy_invariants(rig: &SimRig, tracker: &OccupancyTracker) {
    let on_board = Square::all().filter(|sq| tracker.lookup(*sq) != Occupant::Empty).count();
    let parked: Vec<_> = tracker.parked().collect();
    assert_eq!(tracker.occupant_count(), 32);
    assert_eq!(on_board + parked.len(), 32);

    let pieces = rig.pieces();
    for (i, piece) in pieces.iter().enumerate() {
        assert!(pieces[i + 1..].iter().all(|p| p.position != piece.position), "two pieces at {:?}", piece.position);
    }
    assert_table_matches(rig, tracker.board(), &parked);
}

#[test]
fn test_occupancy_invariants_hold_after_every_command() {
    let rig = RefCell::new({
        let mut rig = SimRig::new(StepPosition::new(5_000, 5_000));
        rig.place_starting_pieces(&CAL);
        rig
    });
    // Two captures, then a move from an empty square. After the board is reset,
    // four more captures and a queen dropped onto its own pawn.
    let script = b"me2e4 md7d5 me4d5 md8d5 mb1c3 md5a5 me3e5 \
                   mg1f3 mg8f6 mf3e5 mf6e4 me5f7 me4f2 mf7d8 me8d8 md1e2";
    let mut session = Session::new(
        SimRig::motion(&rig, CAL),
        SerialCommandSource::new(SimSerial::new(script)),
        SimSwitch::button(&rig),
        SimDelay::new(&rig),
        CAL,
    );
    session.start().unwrap();

    let mut captures = 0;
    let mut faults = Vec::new();
    while let Ok(outcome) = session.service() {
        assert_occupancy_invariants(&rig.borrow(), session.tracker());
        match outcome {
            Outcome::Moved { captured: Some(_), .. } => captures += 1,
            Outcome::Moved { .. } => {}
            Outcome::Faulted(e) => {
                faults.push(e);
                session.setup_pieces().unwrap();
                assert_eq!(session.tracker().board(), &BoardState::starting_position());
                assert_occupancy_invariants(&rig.borrow(), session.tracker());
            }
            Outcome::Parked => panic!("unexpected park"),
        }
    }

    assert_eq!(captures, 6);
    assert_eq!(
        faults,
        vec![
            HeadError::VacantSquare(Square::from_algebraic(b"e3").unwrap()),
            HeadError::OccupiedSquare(Square::from_algebraic(b"e2").unwrap()),
        ]
    );
    assert_eq!(session.source().serial().sent(), b"ddddddfddddddddf");
}
