//! Attitude mixing and the fixed-period control loop.

pub mod control_loop;
pub mod mixer;
pub mod snapshot;

pub use control_loop::{ControlExit, ControlInputs, ControlLoop, ControlParams};
pub use mixer::{Calibration, MixerParams, MotorCommand, MotorMixer, Orientation, OrientationSource};
pub use snapshot::TickSnapshot;
