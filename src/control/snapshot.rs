//! Per-tick view of every input the control loop consumes.

use crate::hardware::ranging::RangingReading;
use crate::mission::{LocationFix, OperatorEvent, TargetWaypointPair};
use crate::velocity::Velocity;
use crate::vision::PatternFix;

use super::mixer::Orientation;

/// Everything read from the shared cells and channels at the start of one
/// control tick. The state machine and mixer only ever see this.
#[derive(Debug, Clone)]
pub struct TickSnapshot {
    /// Control loop iteration, starting at zero.
    pub tick: u64,
    pub orientation: Orientation,
    pub velocity: Velocity,
    pub location: Option<LocationFix>,
    /// Decoded target pair, if one arrived since the last tick.
    pub target: Option<TargetWaypointPair>,
    /// Newest pattern fix delivered since the last tick.
    pub pattern: Option<PatternFix>,
    pub ranging: Option<RangingReading>,
    pub events: Vec<OperatorEvent>,
}

impl TickSnapshot {
    /// Snapshot with a level orientation and no other input.
    pub fn quiet(tick: u64) -> Self {
        Self {
            tick,
            orientation: Orientation::identity(),
            velocity: Velocity::ZERO,
            location: None,
            target: None,
            pattern: None,
            ranging: None,
            events: Vec::new(),
        }
    }

    pub fn has_event(&self, event: OperatorEvent) -> bool {
        self.events.contains(&event)
    }
}
