//! State shared between the mission threads.
//!
//! Each cell has exactly one writer thread. Values are replaced whole under a
//! lock, so readers never see a half-updated value.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::hardware::ranging::RangingReading;
use crate::mission::{MissionState, TargetWaypointPair};
use crate::velocity::SharedVelocity;

/// Most recent value published by a producer thread.
#[derive(Debug)]
pub struct Latest<T> {
    value: RwLock<Option<T>>,
}

impl<T: Clone> Latest<T> {
    pub fn new() -> Self {
        Self {
            value: RwLock::new(None),
        }
    }

    pub fn publish(&self, value: T) {
        *self.value.write() = Some(value);
    }

    pub fn get(&self) -> Option<T> {
        self.value.read().clone()
    }

    /// Read and clear.
    pub fn take(&self) -> Option<T> {
        self.value.write().take()
    }
}

impl<T: Clone> Default for Latest<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Threads that can be stopped individually during shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Worker {
    Control,
    Odometry,
    Ranging,
    Pattern,
    Watchdog,
}

/// Shared state accessible by every mission thread.
#[derive(Debug, Default)]
pub struct SharedState {
    /// Written by visual odometry, read by the control loop.
    pub velocity: SharedVelocity,

    /// Written by the ranging poller.
    pub ranging: Latest<RangingReading>,

    /// Written once per acquisition by the target link callback; taken by the
    /// control loop.
    pub target: Latest<TargetWaypointPair>,

    /// Published by the control loop after every step, for observers.
    pub mission_state: RwLock<MissionState>,

    control_stop: AtomicBool,
    odometry_stop: AtomicBool,
    ranging_stop: AtomicBool,
    pattern_stop: AtomicBool,
    watchdog_stop: AtomicBool,
}

impl SharedState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn flag(&self, worker: Worker) -> &AtomicBool {
        match worker {
            Worker::Control => &self.control_stop,
            Worker::Odometry => &self.odometry_stop,
            Worker::Ranging => &self.ranging_stop,
            Worker::Pattern => &self.pattern_stop,
            Worker::Watchdog => &self.watchdog_stop,
        }
    }

    pub fn request_stop(&self, worker: Worker) {
        self.flag(worker).store(true, Ordering::SeqCst);
    }

    pub fn should_stop(&self, worker: Worker) -> bool {
        self.flag(worker).load(Ordering::SeqCst)
    }

    /// Ask every worker to stop.
    pub fn request_shutdown(&self) {
        for worker in [
            Worker::Control,
            Worker::Odometry,
            Worker::Ranging,
            Worker::Pattern,
            Worker::Watchdog,
        ] {
            self.request_stop(worker);
        }
    }

    pub fn mission_state(&self) -> MissionState {
        *self.mission_state.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_take_clears() {
        let cell = Latest::new();
        assert_eq!(cell.get(), None);
        cell.publish(3);
        cell.publish(4);
        assert_eq!(cell.get(), Some(4));
        assert_eq!(cell.take(), Some(4));
        assert_eq!(cell.take(), None);
    }

    #[test]
    fn test_stop_flags_are_independent() {
        let shared = SharedState::new();
        shared.request_stop(Worker::Control);
        assert!(shared.should_stop(Worker::Control));
        assert!(!shared.should_stop(Worker::Watchdog));
        shared.request_shutdown();
        assert!(shared.should_stop(Worker::Watchdog));
    }
}
