// src/sim.rs
// A simulated rig: two steppers with limit switches, the magnet, a mode button,
// a clock and the pieces sitting on the table. Every simulated device borrows the
// same `RefCell<SimRig>`, so one single-threaded test can inspect everything the
// controller did. Used by the unit tests and by the host simulator.

use core::cell::RefCell;

use embedded_hal::delay::DelayNs;
use embedded_hal_nb::serial::{self, ErrorKind, Read, Write};
use heapless::Vec;

use crate::board::Occupant;
use crate::config::Calibration;
use crate::hal::{AxisId, Direction, Magnet, StepperDriver, SwitchSensor};
use crate::mapper::StepPosition;
use crate::motion::{Axis, MotionController};

/// Pieces the table can hold (a full set).
pub const MAX_SIM_PIECES: usize = 32;
const MAX_BUTTON_EVENTS: usize = 16;
/// Physical position of the frame behind the limit switches. Steps that would
/// drive the head further stall without moving it.
pub const FRAME_STOP: i32 = -2_000;

/// Faults that can be injected into an axis.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum AxisFault {
    #[default]
    None,
    /// The limit switch is broken or disconnected.
    SwitchNeverTriggers,
}

#[derive(Copy, Clone, Debug)]
struct SimAxis {
    position: i32,
    direction: Direction,
    step_high: bool,
    pulses: u32,
    last_step_at: Option<u64>,
    fault: AxisFault,
}

impl SimAxis {
    fn new(position: i32) -> Self {
        Self {
            position,
            direction: Direction::Positive,
            step_high: false,
            pulses: 0,
            last_step_at: None,
            fault: AxisFault::None,
        }
    }
}

/// A piece resting (or being dragged) on the table, in physical steps.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SimPiece {
    pub position: StepPosition,
    pub occupant: Occupant,
}

/// Shared state behind all simulated devices.
///
/// Positions are physical: 0 is where the limit switch trips, independent of
/// the controller's zero offsets.
pub struct SimRig {
    axes: [SimAxis; 2],
    magnet: bool,
    magnet_switches: u32,
    clock_ns: u64,
    trace_origin: u64,
    button_events: Vec<(u64, bool), MAX_BUTTON_EVENTS>,
    pieces: Vec<SimPiece, MAX_SIM_PIECES>,
    carried: Option<usize>,
}

/// Motion controller wired to a simulated rig.
pub type SimMotion<'a> =
    MotionController<SimStepper<'a>, SimSwitch<'a>, SimStepper<'a>, SimSwitch<'a>, SimMagnet<'a>, SimDelay<'a>>;

fn axis_index(axis: AxisId) -> usize {
    match axis {
        AxisId::X => 0,
        AxisId::Y => 1,
    }
}

impl SimRig {
    /// Head starts at `physical` with the magnet released and no pieces placed.
    pub fn new(physical: StepPosition) -> Self {
        Self {
            axes: [SimAxis::new(physical.x), SimAxis::new(physical.y)],
            magnet: false,
            magnet_switches: 0,
            clock_ns: 0,
            trace_origin: 0,
            button_events: Vec::new(),
            pieces: Vec::new(),
            carried: None,
        }
    }

    /// Builds a motion controller whose devices all point at `rig`.
    pub fn motion(rig: &RefCell<SimRig>, cal: Calibration) -> SimMotion<'_> {
        MotionController::new(
            Axis::new(AxisId::X, SimStepper::new(rig, AxisId::X), SimSwitch::limit(rig, AxisId::X)),
            Axis::new(AxisId::Y, SimStepper::new(rig, AxisId::Y), SimSwitch::limit(rig, AxisId::Y)),
            SimMagnet::new(rig),
            SimDelay::new(rig),
            cal,
        )
    }

    /// Puts one piece per occupied square of the starting layout on the table,
    /// at the physical positions `cal` maps them to.
    pub fn place_starting_pieces(&mut self, cal: &Calibration) {
        let mapper = crate::mapper::CoordinateMapper::new(*cal);
        for square in crate::board::Square::all() {
            let occupant = crate::board::BoardState::starting_occupant(square);
            if !occupant.is_empty() {
                let pos = mapper.to_steps(square, crate::mapper::Approach::Direct);
                let physical = StepPosition::new(pos.x - cal.x_zero_offset, pos.y - cal.y_zero_offset);
                self.place_piece(physical, occupant);
            }
        }
    }

    pub fn place_piece(&mut self, physical: StepPosition, occupant: Occupant) {
        // The table holds at most a full set; extra pieces are not modelled.
        let _ = self.pieces.push(SimPiece { position: physical, occupant });
    }

    /// Piece resting at exactly `physical`, if any.
    pub fn piece_at(&self, physical: StepPosition) -> Option<Occupant> {
        self.pieces.iter().find(|p| p.position == physical).map(|p| p.occupant)
    }

    pub fn pieces(&self) -> &[SimPiece] {
        &self.pieces
    }

    pub fn inject_fault(&mut self, axis: AxisId, fault: AxisFault) {
        self.axes[axis_index(axis)].fault = fault;
    }

    /// Presses (`true`) or releases the mode button at absolute time `at_ns`.
    pub fn schedule_button(&mut self, at_ns: u64, pressed: bool) {
        let _ = self.button_events.push((at_ns, pressed));
    }

    fn button_pressed(&self) -> bool {
        self.button_events
            .iter()
            .filter(|(at, _)| *at <= self.clock_ns)
            .max_by_key(|(at, _)| *at)
            .map(|(_, pressed)| *pressed)
            .unwrap_or(false)
    }

    pub fn physical(&self) -> StepPosition {
        StepPosition::new(self.axes[0].position, self.axes[1].position)
    }

    pub fn magnet_engaged(&self) -> bool {
        self.magnet
    }

    /// Number of times the magnet line actually changed level.
    pub fn magnet_switches(&self) -> u32 {
        self.magnet_switches
    }

    pub fn clock_ns(&self) -> u64 {
        self.clock_ns
    }

    /// Rising edges seen on the (X, Y) step lines since the last trace reset.
    pub fn pulses(&self) -> (u32, u32) {
        (self.axes[0].pulses, self.axes[1].pulses)
    }

    /// Time of the last step on `axis`, relative to the last trace reset.
    pub fn last_step_at(&self, axis: AxisId) -> Option<u64> {
        self.axes[axis_index(axis)].last_step_at
    }

    pub fn reset_trace(&mut self) {
        self.trace_origin = self.clock_ns;
        for axis in self.axes.iter_mut() {
            axis.pulses = 0;
            axis.last_step_at = None;
        }
    }

    fn step(&mut self, axis: AxisId) {
        let now = self.clock_ns - self.trace_origin;
        let state = &mut self.axes[axis_index(axis)];
        let next = state.position + state.direction.delta();
        if next >= FRAME_STOP {
            state.position = next;
        }
        state.pulses += 1;
        state.last_step_at = Some(now);
        if let Some(index) = self.carried {
            let head = self.physical();
            self.pieces[index].position = head;
        }
    }

    fn set_magnet(&mut self, engaged: bool) {
        if engaged == self.magnet {
            return;
        }
        self.magnet = engaged;
        self.magnet_switches += 1;
        self.carried = if engaged {
            let head = self.physical();
            self.pieces.iter().position(|p| p.position == head)
        } else {
            None
        };
    }

    fn limit_triggered(&self, axis: AxisId) -> bool {
        let state = &self.axes[axis_index(axis)];
        state.fault != AxisFault::SwitchNeverTriggers && state.position <= 0
    }
}

// --- Devices ---

pub struct SimStepper<'a> {
    rig: &'a RefCell<SimRig>,
    axis: AxisId,
}

impl<'a> SimStepper<'a> {
    pub fn new(rig: &'a RefCell<SimRig>, axis: AxisId) -> Self {
        Self { rig, axis }
    }
}

impl StepperDriver for SimStepper<'_> {
    fn set_direction(&mut self, direction: Direction) {
        self.rig.borrow_mut().axes[axis_index(self.axis)].direction = direction;
    }

    fn set_step(&mut self, high: bool) {
        let mut rig = self.rig.borrow_mut();
        let rising = high && !rig.axes[axis_index(self.axis)].step_high;
        rig.axes[axis_index(self.axis)].step_high = high;
        if rising {
            rig.step(self.axis);
        }
    }
}

enum SwitchKind {
    Limit(AxisId),
    ModeButton,
}

pub struct SimSwitch<'a> {
    rig: &'a RefCell<SimRig>,
    kind: SwitchKind,
}

impl<'a> SimSwitch<'a> {
    pub fn limit(rig: &'a RefCell<SimRig>, axis: AxisId) -> Self {
        Self { rig, kind: SwitchKind::Limit(axis) }
    }

    /// The mode button, driven by `SimRig::schedule_button`.
    pub fn button(rig: &'a RefCell<SimRig>) -> Self {
        Self { rig, kind: SwitchKind::ModeButton }
    }
}

impl SwitchSensor for SimSwitch<'_> {
    fn is_triggered(&mut self) -> bool {
        let rig = self.rig.borrow();
        match self.kind {
            SwitchKind::Limit(axis) => rig.limit_triggered(axis),
            SwitchKind::ModeButton => rig.button_pressed(),
        }
    }
}

pub struct SimMagnet<'a> {
    rig: &'a RefCell<SimRig>,
}

impl<'a> SimMagnet<'a> {
    pub fn new(rig: &'a RefCell<SimRig>) -> Self {
        Self { rig }
    }
}

impl Magnet for SimMagnet<'_> {
    fn set_engaged(&mut self, engaged: bool) {
        self.rig.borrow_mut().set_magnet(engaged);
    }
}

/// Advances the rig clock instead of sleeping.
pub struct SimDelay<'a> {
    rig: &'a RefCell<SimRig>,
}

impl<'a> SimDelay<'a> {
    pub fn new(rig: &'a RefCell<SimRig>) -> Self {
        Self { rig }
    }
}

impl DelayNs for SimDelay<'_> {
    fn delay_ns(&mut self, ns: u32) {
        self.rig.borrow_mut().clock_ns += ns as u64;
    }
}

// --- Serial ---

/// Bytes queued on a `SimSerial` have all been read.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SerialClosed;

impl serial::Error for SerialClosed {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Serial port fed from a fixed byte script. Reads fail with `SerialClosed`
/// once the script is used up; written bytes are kept for inspection.
pub struct SimSerial<'a> {
    input: &'a [u8],
    cursor: usize,
    sent: Vec<u8, 64>,
}

impl<'a> SimSerial<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self { input, cursor: 0, sent: Vec::new() }
    }

    pub fn sent(&self) -> &[u8] {
        &self.sent
    }
}

impl serial::ErrorType for SimSerial<'_> {
    type Error = SerialClosed;
}

impl Read<u8> for SimSerial<'_> {
    fn read(&mut self) -> nb::Result<u8, SerialClosed> {
        let byte = *self.input.get(self.cursor).ok_or(nb::Error::Other(SerialClosed))?;
        self.cursor += 1;
        Ok(byte)
    }
}

impl Write<u8> for SimSerial<'_> {
    fn write(&mut self, word: u8) -> nb::Result<(), SerialClosed> {
        // Replies past the buffer size are dropped; tests never send that many.
        let _ = self.sent.push(word);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), SerialClosed> {
        Ok(())
    }
}
