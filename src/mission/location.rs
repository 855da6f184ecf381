//! Satellite location boundary.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tracing::debug;

use super::waypoint::GeoCoordinate;

/// One location service fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Metres above the reference ellipsoid.
    pub altitude_m: f64,
    /// Horizontal accuracy radius in metres. Smaller is better.
    pub accuracy_m: f64,
}

impl LocationFix {
    pub fn coordinate(&self) -> GeoCoordinate {
        GeoCoordinate::new(self.latitude, self.longitude)
    }

    pub fn is_more_accurate_than(&self, other: &LocationFix) -> bool {
        self.accuracy_m < other.accuracy_m
    }
}

/// Supplier of location fixes.
pub trait LocationSource: Send + Sync {
    /// Most recent fix, if any has arrived.
    fn last_fix(&self) -> Option<LocationFix>;
    fn resume(&self);
    fn pause(&self);
}

/// Location cell fed by a platform callback.
///
/// Fixes offered while paused are dropped.
#[derive(Debug)]
pub struct SharedLocation {
    fix: RwLock<Option<LocationFix>>,
    active: AtomicBool,
}

impl SharedLocation {
    pub fn new() -> Self {
        Self {
            fix: RwLock::new(None),
            active: AtomicBool::new(true),
        }
    }

    pub fn update(&self, fix: LocationFix) {
        if self.active.load(Ordering::SeqCst) {
            *self.fix.write() = Some(fix);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Default for SharedLocation {
    fn default() -> Self {
        Self::new()
    }
}

impl LocationSource for SharedLocation {
    fn last_fix(&self) -> Option<LocationFix> {
        *self.fix.read()
    }

    fn resume(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    fn pause(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

/// Keeps the most accurate fix seen so far.
#[derive(Debug, Clone, Default)]
pub struct BestFix {
    best: Option<LocationFix>,
}

impl BestFix {
    /// Returns true when `fix` replaced the retained one.
    pub fn offer(&mut self, fix: LocationFix) -> bool {
        if !fix.accuracy_m.is_finite() {
            return false;
        }
        let better = self.best.is_none_or(|b| fix.is_more_accurate_than(&b));
        if better {
            debug!(
                lat = fix.latitude,
                lon = fix.longitude,
                accuracy_m = fix.accuracy_m,
                "retained location fix"
            );
            self.best = Some(fix);
        }
        better
    }

    pub fn get(&self) -> Option<LocationFix> {
        self.best
    }

    pub fn clear(&mut self) {
        self.best = None;
    }
}
