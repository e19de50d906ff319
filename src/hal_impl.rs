// src/hal_impl.rs
// Implementations of the `hal` traits on top of embedded-hal 1.0 pins, so any
// board support crate can hand its GPIOs to the controller.

use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::pwm::SetDutyCycle;
use log::error;

use crate::hal::{Direction, Magnet, StepperDriver, SwitchSensor};

// --- Stepper ---

/// A step/direction driver (A4988, DRV8825, TMC in standalone mode, ...).
pub struct PinStepper<STEP, DIR> {
    step: STEP,
    dir: DIR,
    /// Level on the direction line that moves the axis away from its switch.
    positive_level: bool,
}

impl<STEP: OutputPin, DIR: OutputPin> PinStepper<STEP, DIR> {
    /// `positive_level` is the direction-line level for `Direction::Positive`;
    /// flip it instead of rewiring a motor that runs backwards.
    pub fn new(mut step: STEP, dir: DIR, positive_level: bool) -> Self {
        step.set_low().unwrap_or_else(|_| error!("PinStepper: failed to idle step line"));
        Self { step, dir, positive_level }
    }

    pub fn release(self) -> (STEP, DIR) {
        (self.step, self.dir)
    }
}

impl<STEP: OutputPin, DIR: OutputPin> StepperDriver for PinStepper<STEP, DIR> {
    fn set_direction(&mut self, direction: Direction) {
        let level = match direction {
            Direction::Positive => self.positive_level,
            Direction::Negative => !self.positive_level,
        };
        self.dir
            .set_state(level.into())
            .unwrap_or_else(|_| error!("PinStepper: failed to set direction line"));
    }

    fn set_step(&mut self, high: bool) {
        self.step
            .set_state(high.into())
            .unwrap_or_else(|_| error!("PinStepper: failed to drive step line"));
    }
}

// --- Switches ---

/// A switch wired to ground with a pull-up: pressed reads low.
pub struct ActiveLowSwitch<P> {
    pin: P,
}

impl<P: InputPin> ActiveLowSwitch<P> {
    pub fn new(pin: P) -> Self {
        Self { pin }
    }
}

impl<P: InputPin> SwitchSensor for ActiveLowSwitch<P> {
    fn is_triggered(&mut self) -> bool {
        match self.pin.is_low() {
            Ok(low) => low,
            Err(_) => {
                // An unreadable limit switch must stop motion, so report it pressed.
                error!("ActiveLowSwitch: pin read failed");
                true
            }
        }
    }
}

// --- Magnet ---

/// Electromagnet switched through a transistor or relay on one output line.
pub struct PinMagnet<P> {
    pin: P,
}

impl<P: OutputPin> PinMagnet<P> {
    pub fn new(mut pin: P) -> Self {
        pin.set_low().unwrap_or_else(|_| error!("PinMagnet: failed to release magnet"));
        Self { pin }
    }
}

impl<P: OutputPin> Magnet for PinMagnet<P> {
    fn set_engaged(&mut self, engaged: bool) {
        self.pin
            .set_state(engaged.into())
            .unwrap_or_else(|_| error!("PinMagnet: failed to drive magnet line"));
    }
}

/// A permanent magnet raised against the board by a hobby servo.
///
/// Duty values are fractions of the PWM period expressed in percent; at 50 Hz a
/// 1 ms..2 ms servo pulse is 5..10 percent.
pub struct ServoMagnet<PWM> {
    pwm: PWM,
    engaged_percent: u8,
    released_percent: u8,
}

impl<PWM: SetDutyCycle> ServoMagnet<PWM> {
    pub fn new(pwm: PWM, engaged_percent: u8, released_percent: u8) -> Self {
        let mut servo = Self { pwm, engaged_percent, released_percent };
        servo.set_engaged(false);
        servo
    }
}

impl<PWM: SetDutyCycle> Magnet for ServoMagnet<PWM> {
    fn set_engaged(&mut self, engaged: bool) {
        let percent = if engaged { self.engaged_percent } else { self.released_percent };
        self.pwm
            .set_duty_cycle_percent(percent)
            .unwrap_or_else(|_| error!("ServoMagnet: failed to set duty cycle"));
    }
}
