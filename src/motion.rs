// src/motion.rs
// Two-axis motion control: homing against the limit switches, coordinated
// step/direction moves and the magnet. This is the only code that touches the
// steppers or the magnet line.

use embedded_hal::delay::DelayNs;
use log::{debug, info, warn};

use crate::config::Calibration;
use crate::error::HeadError;
use crate::hal::{AxisId, Direction, Magnet, StepperDriver, SwitchSensor};
use crate::mapper::StepPosition;

/// Whether the magnet is currently gripping.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Engagement {
    Engaged,
    #[default]
    Disengaged,
}

/// Snapshot of the head.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HeadState {
    pub position: StepPosition,
    pub engagement: Engagement,
    /// False until both axes have completed a homing pass in this power cycle.
    pub homed: bool,
}

/// What the move executor needs from the head. `MotionController` is the real
/// implementation.
pub trait Motion {
    /// Seeks both limit switches and establishes the step origin.
    fn home(&mut self) -> Result<(), HeadError>;

    /// Moves both axes to `target`, which must lie in the normal travel range.
    fn move_to(&mut self, target: StepPosition) -> Result<(), HeadError>;

    /// Like `move_to`, but the target may lie in the overtravel band used for
    /// parking captured pieces.
    fn move_to_extra(&mut self, target: StepPosition) -> Result<(), HeadError>;

    fn engage(&mut self);

    fn disengage(&mut self);

    fn head_state(&self) -> HeadState;
}

/// One stepper and the limit switch at its zero end.
pub struct Axis<S, L> {
    id: AxisId,
    driver: S,
    limit: L,
    position: i32,
    homed: bool,
    direction: Option<Direction>,
    // Bresenham accumulator for the current move.
    error: i64,
}

impl<S: StepperDriver, L: SwitchSensor> Axis<S, L> {
    pub fn new(id: AxisId, driver: S, limit: L) -> Self {
        Self { id, driver, limit, position: 0, homed: false, direction: None, error: 0 }
    }

    pub fn id(&self) -> AxisId {
        self.id
    }

    fn set_direction(&mut self, direction: Direction) {
        if self.direction != Some(direction) {
            self.driver.set_direction(direction);
            self.direction = Some(direction);
        }
    }
}

/// Drives the head through the capability traits in `hal`.
pub struct MotionController<XS, XL, YS, YL, M, D> {
    x: Axis<XS, XL>,
    y: Axis<YS, YL>,
    magnet: M,
    delay: D,
    cal: Calibration,
    engagement: Engagement,
}

impl<XS, XL, YS, YL, M, D> MotionController<XS, XL, YS, YL, M, D>
where
    XS: StepperDriver,
    XL: SwitchSensor,
    YS: StepperDriver,
    YL: SwitchSensor,
    M: Magnet,
    D: DelayNs,
{
    /// The head starts unhomed with the magnet released.
    pub fn new(x: Axis<XS, XL>, y: Axis<YS, YL>, mut magnet: M, delay: D, cal: Calibration) -> Self {
        magnet.set_engaged(false);
        Self { x, y, magnet, delay, cal, engagement: Engagement::Disengaged }
    }

    /// Emits one step tick on the selected axes and waits out the tick period.
    fn pulse(&mut self, step_x: bool, step_y: bool, interval_us: u32) {
        if step_x {
            self.x.driver.set_step(true);
        }
        if step_y {
            self.y.driver.set_step(true);
        }
        self.delay.delay_us(self.cal.pulse_width_us);
        if step_x {
            self.x.driver.set_step(false);
        }
        if step_y {
            self.y.driver.set_step(false);
        }
        self.delay.delay_us(interval_us.saturating_sub(self.cal.pulse_width_us));
    }

    /// Moves any axis whose switch is already pressed off it, so the seek pass
    /// always finds the switch edge from the same side.
    fn back_off_switches(&mut self) -> Result<(), HeadError> {
        self.x.set_direction(Direction::Positive);
        self.y.set_direction(Direction::Positive);
        let mut travelled: i32 = 0;
        loop {
            let step_x = self.x.limit.is_triggered();
            let step_y = self.y.limit.is_triggered();
            if !step_x && !step_y {
                if travelled > 0 {
                    debug!("Backed off limit switches by {} steps", travelled);
                }
                return Ok(());
            }
            if travelled >= self.cal.steps_max {
                let axis = if step_x { self.x.id() } else { self.y.id() };
                warn!("{:?} limit switch never released", axis);
                return Err(HeadError::Homing { axis });
            }
            self.pulse(step_x, step_y, self.cal.homing_interval_us);
            travelled += 1;
        }
    }

    /// Drives both axes towards their switches and zeroes each one as it trips.
    fn seek_switches(&mut self) -> Result<(), HeadError> {
        self.x.set_direction(Direction::Negative);
        self.y.set_direction(Direction::Negative);
        let mut travelled: i32 = 0;
        loop {
            if !self.x.homed && self.x.limit.is_triggered() {
                self.x.position = self.cal.x_zero_offset;
                self.x.homed = true;
                debug!("X homed after {} steps", travelled);
            }
            if !self.y.homed && self.y.limit.is_triggered() {
                self.y.position = self.cal.y_zero_offset;
                self.y.homed = true;
                debug!("Y homed after {} steps", travelled);
            }
            if self.x.homed && self.y.homed {
                return Ok(());
            }
            if travelled >= self.cal.steps_max {
                let axis = if self.x.homed { self.y.id() } else { self.x.id() };
                warn!("{:?} limit switch not reached after {} steps", axis, travelled);
                return Err(HeadError::Homing { axis });
            }
            self.pulse(!self.x.homed, !self.y.homed, self.cal.homing_interval_us);
            travelled += 1;
        }
    }

    fn travel(&mut self, target: StepPosition, max: i32) -> Result<(), HeadError> {
        if !(self.x.homed && self.y.homed) {
            return Err(HeadError::NotHomed);
        }
        let range = self.cal.steps_min..=max;
        if !range.contains(&target.x) || !range.contains(&target.y) {
            warn!("Rejecting target ({}, {}): outside {}..={}", target.x, target.y, self.cal.steps_min, max);
            return Err(HeadError::OutOfRange { x: target.x, y: target.y });
        }

        let dx = target.x - self.x.position;
        let dy = target.y - self.y.position;
        if dx == 0 && dy == 0 {
            return Ok(());
        }
        debug!(
            "Move ({}, {}) -> ({}, {}), magnet {:?}",
            self.x.position, self.y.position, target.x, target.y, self.engagement
        );

        if dx != 0 {
            self.x.set_direction(if dx > 0 { Direction::Positive } else { Direction::Negative });
        }
        if dy != 0 {
            self.y.set_direction(if dy > 0 { Direction::Positive } else { Direction::Negative });
        }

        // Both axes share one tick clock: the longer axis steps on every tick and
        // the shorter one is spread evenly across them, so both finish together.
        let steps_x = dx.unsigned_abs() as i64;
        let steps_y = dy.unsigned_abs() as i64;
        let major = steps_x.max(steps_y);
        self.x.error = major / 2;
        self.y.error = major / 2;
        let x_delta = if dx > 0 { 1 } else { -1 };
        let y_delta = if dy > 0 { 1 } else { -1 };

        for _ in 0..major {
            self.x.error += steps_x;
            let step_x = self.x.error >= major;
            if step_x {
                self.x.error -= major;
                self.x.position += x_delta;
            }
            self.y.error += steps_y;
            let step_y = self.y.error >= major;
            if step_y {
                self.y.error -= major;
                self.y.position += y_delta;
            }
            self.pulse(step_x, step_y, self.cal.step_interval_us);
        }
        Ok(())
    }
}

impl<XS, XL, YS, YL, M, D> Motion for MotionController<XS, XL, YS, YL, M, D>
where
    XS: StepperDriver,
    XL: SwitchSensor,
    YS: StepperDriver,
    YL: SwitchSensor,
    M: Magnet,
    D: DelayNs,
{
    fn home(&mut self) -> Result<(), HeadError> {
        self.disengage();
        self.x.homed = false;
        self.y.homed = false;
        info!("Homing both axes");
        self.back_off_switches()?;
        self.seek_switches()?;
        info!("Homed at ({}, {})", self.x.position, self.y.position);
        Ok(())
    }

    fn move_to(&mut self, target: StepPosition) -> Result<(), HeadError> {
        self.travel(target, self.cal.steps_max)
    }

    fn move_to_extra(&mut self, target: StepPosition) -> Result<(), HeadError> {
        self.travel(target, self.cal.extra_max())
    }

    fn engage(&mut self) {
        if self.engagement == Engagement::Engaged {
            return;
        }
        self.magnet.set_engaged(true);
        self.delay.delay_ms(self.cal.magnet_settle_ms);
        self.engagement = Engagement::Engaged;
    }

    fn disengage(&mut self) {
        if self.engagement == Engagement::Disengaged {
            return;
        }
        self.magnet.set_engaged(false);
        self.delay.delay_ms(self.cal.magnet_settle_ms);
        self.engagement = Engagement::Disengaged;
    }

    fn head_state(&self) -> HeadState {
        HeadState {
            position: StepPosition::new(self.x.position, self.y.position),
            engagement: self.engagement,
            homed: self.x.homed && self.y.homed,
        }
    }
}
