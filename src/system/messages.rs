//! Inter-thread message types.
//!
//! `MissionEvent`s flow from the worker threads to whoever holds the observer
//! end of the event channel (an operator display, a logger, a test).

use crossbeam_channel::Sender;
use tracing::trace;

use crate::control::mixer::Calibration;
use crate::mission::{LocationFix, LockRequest, MissionState, TargetWaypointPair};
use crate::vision::PatternFix;

#[derive(Debug, Clone, PartialEq)]
pub enum MissionEvent {
    StateChanged {
        from: MissionState,
        to: MissionState,
        tick: u64,
    },
    CalibrationCaptured(Calibration),
    /// The target link was (re)started.
    LinkArmed,
    TargetAcquired(TargetWaypointPair),
    LockRequested(LockRequest),
    /// The pattern was seen; carries the best location fix at that moment.
    PatternSighted {
        fix: PatternFix,
        location: Option<LocationFix>,
    },
    /// A malformed block or receiver error on the target link.
    LinkFault(String),
    /// The actuator transport went away; the mission is over.
    TransportLost(String),
}

/// Best-effort delivery to the observer. A full or closed channel drops the
/// event rather than stalling the sender.
pub fn emit(events: &Sender<MissionEvent>, event: MissionEvent) {
    if let Err(e) = events.try_send(event) {
        trace!("mission event dropped: {:?}", e.into_inner());
    }
}
