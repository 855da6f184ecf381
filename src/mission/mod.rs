//! Mission sequencing: states, the flight state machine, and the location and
//! target data it consumes.

pub mod location;
pub mod state;
pub mod state_machine;
pub mod waypoint;

pub use location::{BestFix, LocationFix, LocationSource, SharedLocation};
pub use state::MissionState;
pub use state_machine::{
    AcceptanceBox, FlightStateMachine, Guidance, LockRequest, OperatorEvent, SeekParams, StepOutcome,
    Transition,
};
pub use waypoint::{GeoCoordinate, TargetWaypointPair};
