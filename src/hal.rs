// src/hal.rs
// Capability traits the controller is written against. Real pins are wired up in
// `hal_impl`; tests and the host simulator use `sim`.

/// Identifies one of the two motion axes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AxisId {
    X,
    Y,
}

/// Direction of travel along an axis.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Away from the limit switch.
    Positive,
    /// Towards the limit switch.
    Negative,
}

impl Direction {
    /// Step counter change for one pulse in this direction.
    pub fn delta(self) -> i32 {
        match self {
            Direction::Positive => 1,
            Direction::Negative => -1,
        }
    }
}

/// Step/direction driver for a single axis.
pub trait StepperDriver {
    /// Sets the direction line. Called before the first pulse of a move.
    fn set_direction(&mut self, direction: Direction);

    /// Drives the step line. The driver steps on the rising edge.
    fn set_step(&mut self, high: bool);
}

/// A mechanical switch or button. Implementations handle the electrical level;
/// callers only see whether it is pressed.
pub trait SwitchSensor {
    fn is_triggered(&mut self) -> bool;
}

/// The piece-gripping electromagnet (or the actuator that lifts it).
pub trait Magnet {
    fn set_engaged(&mut self, engaged: bool);
}
