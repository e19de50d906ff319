// src/session.rs
// Top-level state machine: homing, pause/resume from the mode button, turn
// bookkeeping and fault handling around the move executor.

use core::convert::Infallible;

use embedded_hal::delay::DelayNs;
use log::{debug, error, info, warn};

use crate::board::{HoldingSlot, Square};
use crate::command::{Command, CommandSource, SourcedCommand};
use crate::config::Calibration;
use crate::error::HeadError;
use crate::executor::MoveExecutor;
use crate::hal::SwitchSensor;
use crate::motion::{HeadState, Motion};
use crate::tracker::OccupancyTracker;

/// Lifecycle of a session.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionState {
    Idle,
    Homing,
    Running,
    Paused,
}

/// Whose move the session is waiting for.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandSourceKind {
    User,
    Computer,
}

impl CommandSourceKind {
    pub fn other(self) -> Self {
        match self {
            CommandSourceKind::User => CommandSourceKind::Computer,
            CommandSourceKind::Computer => CommandSourceKind::User,
        }
    }
}

/// What one `service` call did.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Outcome {
    Moved { from: Square, to: Square, captured: Option<HoldingSlot> },
    Parked,
    /// The command failed and the session is now paused.
    Faulted(HeadError),
}

/// Edge detector for the pause/resume button. A press counts once; the button
/// must be seen released before the next press counts.
pub struct ModeButton<B> {
    sensor: B,
    armed: bool,
}

impl<B: SwitchSensor> ModeButton<B> {
    pub fn new(sensor: B) -> Self {
        Self { sensor, armed: true }
    }

    /// Samples the sensor; true on a press edge.
    pub fn poll(&mut self) -> bool {
        if self.sensor.is_triggered() {
            self.press()
        } else {
            self.release();
            false
        }
    }

    fn press(&mut self) -> bool {
        let fire = self.armed;
        self.armed = false;
        fire
    }

    fn release(&mut self) {
        self.armed = true;
    }
}

/// A fatal fault keeps the session paused until the board is resynchronised.
fn toggle_pause(state: &mut SessionState, fault: &mut Option<HeadError>) {
    match *state {
        SessionState::Running => {
            *state = SessionState::Paused;
            info!("Paused");
        }
        SessionState::Paused => match *fault {
            Some(e) if e.is_fatal() => warn!("Resume refused: {}", e),
            _ => {
                *fault = None;
                *state = SessionState::Running;
                info!("Resumed");
            }
        },
        other => debug!("Button ignored while {:?}", other),
    }
}

/// Blocks at a transport boundary until the session is no longer paused.
fn wait_while_paused<B: SwitchSensor, D: DelayNs>(
    button: &mut ModeButton<B>,
    state: &mut SessionState,
    fault: &mut Option<HeadError>,
    delay: &mut D,
    poll_interval_ms: u32,
) {
    loop {
        if button.poll() {
            toggle_pause(state, fault);
        }
        if *state != SessionState::Paused {
            return;
        }
        delay.delay_ms(poll_interval_ms);
    }
}

/// Owns the head, the occupancy record and the command source, and runs the
/// game loop.
pub struct Session<M, S, B, D> {
    motion: M,
    source: S,
    button: ModeButton<B>,
    delay: D,
    executor: MoveExecutor,
    tracker: OccupancyTracker,
    state: SessionState,
    expected: CommandSourceKind,
    fault: Option<HeadError>,
    poll_interval_ms: u32,
    homing_attempts: u8,
}

impl<M, S, B, D> Session<M, S, B, D>
where
    M: Motion,
    S: CommandSource,
    B: SwitchSensor,
    D: DelayNs,
{
    /// A new session is idle, expects the user to move first and assumes the
    /// pieces stand in the starting layout.
    pub fn new(motion: M, source: S, button: B, delay: D, cal: Calibration) -> Self {
        Self {
            motion,
            source,
            button: ModeButton::new(button),
            delay,
            executor: MoveExecutor::new(cal),
            tracker: OccupancyTracker::new(&cal),
            state: SessionState::Idle,
            expected: CommandSourceKind::User,
            fault: None,
            poll_interval_ms: cal.poll_interval_ms,
            homing_attempts: cal.homing_attempts.max(1),
        }
    }

    // --- Accessors ---

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn expected_source(&self) -> CommandSourceKind {
        self.expected
    }

    /// The error that last paused the session. A fatal one stays until
    /// `setup_pieces`, `reset` or (for a homing fault) `zero_head` succeeds.
    pub fn fault(&self) -> Option<HeadError> {
        self.fault
    }

    pub fn tracker(&self) -> &OccupancyTracker {
        &self.tracker
    }

    pub fn head_state(&self) -> HeadState {
        self.motion.head_state()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    // --- Lifecycle ---

    /// Homes the head and starts taking commands.
    pub fn start(&mut self) -> Result<(), HeadError> {
        if self.state != SessionState::Idle {
            return Err(HeadError::WrongState(self.state));
        }
        self.zero_head()
    }

    /// Runs a homing pass. Allowed from Idle (the session then runs) or Paused
    /// (it stays paused). Success clears a pending homing fault.
    pub fn zero_head(&mut self) -> Result<(), HeadError> {
        let previous = self.state;
        if !matches!(previous, SessionState::Idle | SessionState::Paused) {
            return Err(HeadError::WrongState(previous));
        }
        self.state = SessionState::Homing;
        match self.home_with_retries() {
            Ok(()) => {
                if matches!(self.fault, Some(HeadError::Homing { .. })) {
                    self.fault = None;
                }
                self.state = if previous == SessionState::Idle { SessionState::Running } else { SessionState::Paused };
                Ok(())
            }
            Err(e) => {
                self.enter_fault(e);
                Err(e)
            }
        }
    }

    fn home_with_retries(&mut self) -> Result<(), HeadError> {
        let mut last = HeadError::NotHomed;
        for attempt in 1..=self.homing_attempts {
            match self.motion.home() {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("Homing attempt {}/{} failed: {}", attempt, self.homing_attempts, e);
                    last = e;
                }
            }
        }
        Err(last)
    }

    /// Back to Idle with a fresh occupancy record. The head keeps its homing.
    pub fn reset(&mut self) {
        self.motion.disengage();
        self.tracker.initialize();
        self.state = SessionState::Idle;
        self.expected = CommandSourceKind::User;
        self.fault = None;
        info!("Session reset");
    }

    /// Physically restores the starting layout and clears any pending fault.
    ///
    /// Runs from Idle, Running or Paused. The button can pause it between
    /// transports; afterwards an idle session stays idle and any other
    /// resumes running.
    pub fn setup_pieces(&mut self) -> Result<(), HeadError> {
        let previous = self.state;
        if previous == SessionState::Homing {
            return Err(HeadError::WrongState(previous));
        }
        if !self.motion.head_state().homed {
            if let Err(e) = self.home_with_retries() {
                self.enter_fault(e);
                return Err(e);
            }
        }
        self.state = SessionState::Running;
        // Pauses taken during the resync resume normally.
        let mut resync_fault = None;
        let Self { executor, motion, tracker, button, state, delay, poll_interval_ms, .. } = self;
        let result = executor.setup_pieces(motion, tracker, || {
            wait_while_paused(button, state, &mut resync_fault, delay, *poll_interval_ms)
        });
        match result {
            Ok(()) => {
                self.fault = None;
                self.expected = CommandSourceKind::User;
                if previous == SessionState::Idle {
                    self.state = SessionState::Idle;
                }
                Ok(())
            }
            Err(e) => {
                self.enter_fault(e);
                Err(e)
            }
        }
    }

    // --- Button ---

    /// Press edge from the mode button: toggles Running and Paused. Ignored
    /// until the button has been released since the last press.
    ///
    /// While a homing fault is pending the press first retries homing, so a
    /// repaired switch can be recovered from the button alone. Any other fatal
    /// fault keeps the session paused until `setup_pieces` or `reset`.
    pub fn button_press(&mut self) {
        if !self.button.press() {
            return;
        }
        if self.state == SessionState::Paused && matches!(self.fault, Some(HeadError::Homing { .. })) {
            if let Err(e) = self.zero_head() {
                warn!("Homing retry failed: {}", e);
                return;
            }
        }
        toggle_pause(&mut self.state, &mut self.fault);
        if self.state == SessionState::Paused {
            self.motion.disengage();
        }
    }

    pub fn button_release(&mut self) {
        self.button.release();
    }

    fn poll_button(&mut self) {
        if self.button.sensor.is_triggered() {
            self.button_press();
        } else {
            self.button_release();
        }
    }

    /// Samples the button, then reports whether the session is paused.
    pub fn check_if_paused(&mut self) -> bool {
        self.poll_button();
        self.state == SessionState::Paused
    }

    // --- Commands ---

    /// Waits for the next command, servicing the button in between. No command
    /// is taken while paused.
    pub fn get_command(&mut self) -> Result<SourcedCommand, S::Error> {
        loop {
            if self.check_if_paused() {
                self.delay.delay_ms(self.poll_interval_ms);
                continue;
            }
            match self.source.poll_command(self.expected) {
                Ok(command) => return Ok(command),
                Err(nb::Error::WouldBlock) => self.delay.delay_ms(self.poll_interval_ms),
                Err(nb::Error::Other(e)) => return Err(e),
            }
        }
    }

    /// Takes one command, carries it out and acknowledges it. Head errors are
    /// reported in the outcome; only command source errors are returned.
    pub fn service(&mut self) -> Result<Outcome, S::Error> {
        let sourced = self.get_command()?;
        if sourced.source != self.expected {
            warn!("Command for {:?} while {:?} was expected", sourced.source, self.expected);
        }
        let outcome = match sourced.command {
            Command::Move { from, to } => match self.execute_with_recovery(from, to) {
                Ok(captured) => {
                    self.expected = sourced.source.other();
                    Outcome::Moved { from, to, captured }
                }
                Err(e) => self.fault_outcome(e),
            },
            Command::Park => match self.executor.park(&mut self.motion) {
                Ok(()) => Outcome::Parked,
                Err(e) => self.fault_outcome(e),
            },
        };
        self.source.acknowledge(!matches!(outcome, Outcome::Faulted(_)));
        Ok(outcome)
    }

    /// Homes if needed and services commands until the source fails.
    pub fn run(&mut self) -> Result<Infallible, S::Error> {
        if self.state == SessionState::Idle {
            if let Err(e) = self.start() {
                error!("Start-up homing failed: {}", e);
            }
        }
        loop {
            self.service()?;
        }
    }

    fn execute_with_recovery(&mut self, from: Square, to: Square) -> Result<Option<HoldingSlot>, HeadError> {
        match self.execute(from, to) {
            Err(HeadError::NotHomed) => {
                info!("Head not homed; homing before {} -> {}", from, to);
                self.home_with_retries()?;
                self.execute(from, to)
            }
            other => other,
        }
    }

    fn execute(&mut self, from: Square, to: Square) -> Result<Option<HoldingSlot>, HeadError> {
        let Self { executor, motion, tracker, button, state, fault, delay, poll_interval_ms, .. } = self;
        executor.execute_move(motion, tracker, from, to, || {
            wait_while_paused(button, state, fault, delay, *poll_interval_ms)
        })
    }

    fn fault_outcome(&mut self, e: HeadError) -> Outcome {
        self.enter_fault(e);
        Outcome::Faulted(e)
    }

    fn enter_fault(&mut self, e: HeadError) {
        error!("Head fault: {}", e);
        self.motion.disengage();
        self.fault = Some(e);
        self.state = SessionState::Paused;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::Occupant;
    use crate::command::SerialCommandSource;
    use crate::hal::AxisId;
    use crate::mapper::StepPosition;
    use crate::motion::Engagement;
    use crate::sim::{AxisFault, SerialClosed, SimDelay, SimMotion, SimRig, SimSerial, SimSwitch};
    use core::cell::RefCell;

    const CAL: Calibration = Calibration::REFERENCE;
    const SECOND: u64 = 1_000_000_000;

    type SimSession<'a> = Session<SimMotion<'a>, SerialCommandSource<SimSerial<'a>>, SimSwitch<'a>, SimDelay<'a>>;

    fn sq(name: &str) -> Square {
        Square::from_algebraic(name.as_bytes()).unwrap()
    }

    fn rig() -> RefCell<SimRig> {
        let mut rig = SimRig::new(StepPosition::new(0, 0));
        rig.place_starting_pieces(&CAL);
        RefCell::new(rig)
    }

    fn session<'a>(rig: &'a RefCell<SimRig>, script: &'a [u8]) -> SimSession<'a> {
        Session::new(
            SimRig::motion(rig, CAL),
            SerialCommandSource::new(SimSerial::new(script)),
            SimSwitch::button(rig),
            SimDelay::new(rig),
            CAL,
        )
    }

    #[test]
    fn start_homes_then_moves_and_flips_turns() {
        let rig = rig();
        let mut session = session(&rig, b"me2e4\nme7e5\n");
        assert_eq!(session.state(), SessionState::Idle);
        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Running);
        assert!(session.head_state().homed);

        let outcome = session.service().unwrap();
        assert_eq!(outcome, Outcome::Moved { from: sq("e2"), to: sq("e4"), captured: None });
        assert_eq!(session.expected_source(), CommandSourceKind::Computer);
        session.service().unwrap();
        assert_eq!(session.expected_source(), CommandSourceKind::User);
        assert_eq!(session.source().serial().sent(), b"dd");

        assert_eq!(session.service(), Err(SerialClosed));
    }

    #[test]
    fn zero_head_only_from_idle_or_paused() {
        let rig = rig();
        let mut session = session(&rig, b"");
        session.start().unwrap();
        assert_eq!(session.zero_head(), Err(HeadError::WrongState(SessionState::Running)));
        assert_eq!(session.start(), Err(HeadError::WrongState(SessionState::Running)));

        session.button_press();
        assert_eq!(session.state(), SessionState::Paused);
        session.zero_head().unwrap();
        assert_eq!(session.state(), SessionState::Paused);
    }

    #[test]
    fn button_needs_a_release_between_presses() {
        let rig = rig();
        let mut session = session(&rig, b"");
        session.start().unwrap();
        session.button_press();
        assert_eq!(session.state(), SessionState::Paused);
        session.button_press();
        assert_eq!(session.state(), SessionState::Paused);
        session.button_release();
        session.button_press();
        assert_eq!(session.state(), SessionState::Running);
    }

    #[test]
    fn pausing_releases_the_magnet() {
        let rig = rig();
        let mut session = session(&rig, b"");
        session.start().unwrap();
        session.motion.engage();
        session.button_press();
        assert_eq!(session.head_state().engagement, Engagement::Disengaged);
        assert!(!rig.borrow().magnet_engaged());
    }

    #[test]
    fn check_if_paused_samples_the_button() {
        let rig = rig();
        let mut session = session(&rig, b"");
        session.start().unwrap();
        let now = rig.borrow().clock_ns();
        rig.borrow_mut().schedule_button(now, true);
        assert!(session.check_if_paused());
        // Still held down: no second toggle.
        assert!(session.check_if_paused());
        rig.borrow_mut().schedule_button(now + 1, false);
        rig.borrow_mut().schedule_button(now + 2, true);
        session.delay.delay_ns(1);
        assert!(session.check_if_paused());
        session.delay.delay_ns(1);
        assert!(!session.check_if_paused());
    }

    #[test]
    fn head_errors_pause_and_are_acknowledged_as_faults() {
        let rig = rig();
        let mut session = session(&rig, b"me4e5");
        session.start().unwrap();
        session.motion.engage();
        let outcome = session.service().unwrap();
        assert_eq!(outcome, Outcome::Faulted(HeadError::VacantSquare(sq("e4"))));
        assert_eq!(session.state(), SessionState::Paused);
        assert_eq!(session.head_state().engagement, Engagement::Disengaged);
        assert_eq!(session.fault(), Some(HeadError::VacantSquare(sq("e4"))));
        assert_eq!(session.expected_source(), CommandSourceKind::User);
        assert_eq!(session.source().serial().sent(), b"f");
    }

    #[test]
    fn homing_fault_is_retried_from_the_button() {
        let rig = rig();
        rig.borrow_mut().inject_fault(AxisId::Y, AxisFault::SwitchNeverTriggers);
        let mut session = session(&rig, b"me2e4");
        assert_eq!(session.start(), Err(HeadError::Homing { axis: AxisId::Y }));
        assert_eq!(session.state(), SessionState::Paused);
        assert!(!session.head_state().homed);

        // Still broken: the press retries homing and stays paused.
        session.button_press();
        assert_eq!(session.state(), SessionState::Paused);
        assert_eq!(session.fault(), Some(HeadError::Homing { axis: AxisId::Y }));

        // Operator repairs the switch and presses again.
        rig.borrow_mut().inject_fault(AxisId::Y, AxisFault::None);
        session.button_release();
        session.button_press();
        assert_eq!(session.state(), SessionState::Running);
        assert_eq!(session.fault(), None);
        let outcome = session.service().unwrap();
        assert_eq!(outcome, Outcome::Moved { from: sq("e2"), to: sq("e4"), captured: None });
        assert!(session.head_state().homed);
    }

    #[test]
    fn homing_gives_up_after_the_configured_attempts() {
        let rig = rig();
        rig.borrow_mut().inject_fault(AxisId::Y, AxisFault::SwitchNeverTriggers);
        let mut session = session(&rig, b"");
        assert_eq!(session.start(), Err(HeadError::Homing { axis: AxisId::Y }));
        // Y never backs off (its switch never reads pressed), so every pass is a
        // full-length seek.
        let (_, y_pulses) = rig.borrow().pulses();
        assert_eq!(y_pulses, CAL.homing_attempts as u32 * CAL.steps_max as u32);
    }

    #[test]
    fn zero_head_clears_a_homing_fault() {
        let rig = rig();
        rig.borrow_mut().inject_fault(AxisId::X, AxisFault::SwitchNeverTriggers);
        let mut session = session(&rig, b"");
        assert!(session.start().is_err());
        rig.borrow_mut().inject_fault(AxisId::X, AxisFault::None);
        session.zero_head().unwrap();
        assert_eq!(session.state(), SessionState::Paused);
        assert_eq!(session.fault(), None);
        assert!(session.head_state().homed);
    }

    #[test]
    fn fatal_fault_blocks_resume_until_setup_pieces() {
        let rig = rig();
        let mut session = session(&rig, b"md1e1 me2e4");
        session.start().unwrap();
        assert_eq!(session.service().unwrap(), Outcome::Faulted(HeadError::OccupiedSquare(sq("e1"))));

        session.button_release();
        session.button_press();
        assert_eq!(session.state(), SessionState::Paused);
        assert_eq!(session.fault(), Some(HeadError::OccupiedSquare(sq("e1"))));

        session.setup_pieces().unwrap();
        assert_eq!(session.state(), SessionState::Running);
        assert_eq!(session.fault(), None);
        let outcome = session.service().unwrap();
        assert_eq!(outcome, Outcome::Moved { from: sq("e2"), to: sq("e4"), captured: None });
    }

    #[test]
    fn pause_during_a_capture_waits_at_the_transport_boundary() {
        let rig = rig();
        let mut session = session(&rig, b"me2e4 md7d5 me4d5");
        session.start().unwrap();
        session.service().unwrap();
        session.service().unwrap();

        // Pressed while the victim is being dragged away, held, then pressed
        // again much later to resume.
        let now = rig.borrow().clock_ns();
        {
            let mut rig = rig.borrow_mut();
            rig.schedule_button(now + SECOND / 1000, true);
            rig.schedule_button(now + 60 * SECOND, false);
            rig.schedule_button(now + 120 * SECOND, true);
            rig.schedule_button(now + 121 * SECOND, false);
        }
        let outcome = session.service().unwrap();
        assert_eq!(outcome, Outcome::Moved { from: sq("e4"), to: sq("d5"), captured: Some(HoldingSlot::new(0)) });
        assert_eq!(session.state(), SessionState::Running);
        assert!(rig.borrow().clock_ns() > now + 120 * SECOND);
        assert_eq!(session.tracker().holding_slot(0), Some(Occupant::BlackPiece));
        assert_eq!(session.tracker().occupant_count(), 32);
    }

    #[test]
    fn no_command_is_taken_while_paused() {
        let rig = rig();
        let mut session = session(&rig, b"me2e4");
        session.start().unwrap();
        session.button_press();
        let now = rig.borrow().clock_ns();
        rig.borrow_mut().schedule_button(now + SECOND, true);
        rig.borrow_mut().schedule_button(now + 2 * SECOND, false);
        session.service().unwrap();
        assert!(rig.borrow().clock_ns() >= now + SECOND);
        assert_eq!(session.tracker().lookup(sq("e4")), Occupant::WhitePiece);
    }

    #[test]
    fn setup_pieces_clears_the_fault() {
        let rig = rig();
        let mut session = session(&rig, b"me2e4 md7d5 me4d5 me4e5");
        session.start().unwrap();
        for _ in 0..3 {
            session.service().unwrap();
        }
        assert!(matches!(session.service().unwrap(), Outcome::Faulted(_)));
        assert_eq!(session.state(), SessionState::Paused);
        session.setup_pieces().unwrap();
        assert_eq!(session.fault(), None);
        assert_eq!(session.state(), SessionState::Running);
        assert_eq!(session.tracker().occupant_count(), 32);
        assert_eq!(session.tracker().parked().count(), 0);
        assert_eq!(session.expected_source(), CommandSourceKind::User);
    }

    #[test]
    fn park_command_retreats_to_the_corner() {
        let rig = rig();
        let mut session = session(&rig, b"mx9x9");
        session.start().unwrap();
        assert_eq!(session.service().unwrap(), Outcome::Parked);
        assert_eq!(session.head_state().position, StepPosition::new(63_900, 63_900));
        assert_eq!(session.expected_source(), CommandSourceKind::User);
    }

    #[test]
    fn reset_returns_to_idle() {
        let rig = rig();
        let mut session = session(&rig, b"me2e4");
        session.start().unwrap();
        session.service().unwrap();
        session.reset();
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.expected_source(), CommandSourceKind::User);
        assert_eq!(session.tracker().lookup(sq("e2")), Occupant::WhitePiece);
        assert!(session.head_state().homed);
    }
}
