//! Mission orchestration and thread management.
//!
//! `MissionSystem` spawns and coordinates the worker threads. Shared state
//! and the observer event type live alongside it.

pub mod messages;
mod mission_system;
pub mod pattern_worker;
pub mod shared_state;

pub use messages::MissionEvent;
pub use mission_system::{MissionHardware, MissionSystem};
pub use pattern_worker::PatternWorker;
pub use shared_state::{Latest, SharedState, Worker};
