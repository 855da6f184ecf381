//! The velocity capability seen by the control loop.

use std::sync::Arc;

use parking_lot::RwLock;

/// Vehicle velocity in metres per second.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Velocity {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Velocity {
    pub const ZERO: Velocity = Velocity { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    pub fn horizontal_speed(&self) -> f64 {
        self.x.hypot(self.y)
    }
}

/// Anything that can report the current velocity.
pub trait VelocityProvider: Send + Sync {
    fn velocity(&self) -> Velocity;
}

/// Velocity cell written by the visual odometry thread.
///
/// The whole triple is swapped under one lock, so a reader never sees `x`
/// from one estimate and `y` from another.
#[derive(Debug, Default, Clone)]
pub struct SharedVelocity {
    inner: Arc<RwLock<Velocity>>,
}

impl SharedVelocity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new estimate. `None` and non-finite values keep the last one.
    pub fn publish(&self, estimate: Option<Velocity>) -> bool {
        match estimate {
            Some(v) if v.is_finite() => {
                *self.inner.write() = v;
                true
            }
            _ => false,
        }
    }
}

impl VelocityProvider for SharedVelocity {
    fn velocity(&self) -> Velocity {
        *self.inner.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_holds_previous() {
        let cell = SharedVelocity::new();
        assert!(cell.publish(Some(Velocity::new(1.0, 2.0, 0.5))));
        assert!(!cell.publish(None));
        assert!(!cell.publish(Some(Velocity::new(f64::NAN, 0.0, 0.0))));
        assert_eq!(cell.velocity(), Velocity::new(1.0, 2.0, 0.5));
    }

    #[test]
    fn test_clones_share_cell() {
        let writer = SharedVelocity::new();
        let reader: Box<dyn VelocityProvider> = Box::new(writer.clone());
        writer.publish(Some(Velocity::new(0.0, -3.0, 0.0)));
        assert_eq!(reader.velocity().y, -3.0);
    }
}
