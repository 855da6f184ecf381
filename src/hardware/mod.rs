//! Boundary to the vehicle's microcontroller: motor output, its watchdog, and
//! the range sensor.

pub mod ranging;
pub mod transport;
pub mod watchdog;

pub use ranging::{RangingInput, RangingParams, RangingPoller, RangingReading};
pub use transport::{ActuatorTransport, TransportError};
pub use watchdog::{ActuatorWatchdog, GuardedActuator};
