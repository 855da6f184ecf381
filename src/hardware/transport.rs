//! Actuator transport boundary.

use std::io;

use thiserror::Error;

use crate::control::mixer::MotorCommand;

/// Pulse width emitted for zero duty, in microseconds.
pub const PULSE_BASE_US: f64 = 1000.0;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("actuator board disconnected")]
    Disconnected,

    #[error("actuator I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Low-level motor output.
pub trait ActuatorTransport: Send {
    fn write(&mut self, command: &MotorCommand) -> Result<(), TransportError>;

    /// Drive every motor to zero duty.
    fn zero(&mut self) -> Result<(), TransportError> {
        self.write(&MotorCommand::ZERO)
    }
}

/// PWM pulse widths (µs) for a command, in mixer order.
pub fn pulse_widths_us(command: &MotorCommand) -> [u32; 4] {
    command.duties().map(|d| (PULSE_BASE_US + d.max(0.0)).round() as u32)
}
