//! Pose-delta velocity estimator.
//!
//! Differences successive camera-pose translations and rotates the planar step
//! into the vehicle frame using the current yaw.

use nalgebra::Vector3;
use serde::Deserialize;
use tracing::trace;

use crate::geometry::Displacement;

use super::provider::Velocity;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoseDeltaParams {
    /// Angle between the camera's forward axis and the vehicle nose, degrees.
    pub yaw_offset_deg: f64,
}

impl Default for PoseDeltaParams {
    fn default() -> Self {
        Self {
            yaw_offset_deg: 90.0,
        }
    }
}

/// Frame-differencing estimator over camera translations.
#[derive(Debug, Clone)]
pub struct PoseDeltaEstimator {
    /// Previous translation.
    prev_translation: Option<Vector3<f64>>,
    /// Vertical step of the last update.
    dz: f64,
    yaw_offset: f64,
}

impl Default for PoseDeltaEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl PoseDeltaEstimator {
    pub fn new() -> Self {
        Self::with_params(&PoseDeltaParams::default())
    }

    pub fn with_params(params: &PoseDeltaParams) -> Self {
        Self {
            prev_translation: None,
            dz: 0.0,
            yaw_offset: params.yaw_offset_deg.to_radians(),
        }
    }

    /// Update with a new pose and return the planar step since the last one.
    ///
    /// The first call caches the pose and returns zero. Later calls rotate the
    /// step by `yaw` minus the yaw offset (π/2 by default).
    pub fn on_pose(&mut self, translation: Vector3<f64>, yaw: f64) -> Displacement {
        let step = match self.prev_translation {
            Some(prev) => {
                let delta = translation - prev;
                self.dz = delta.z;
                Displacement::new(delta.x, delta.y).rotated(yaw - self.yaw_offset)
            }
            None => {
                self.dz = 0.0;
                Displacement::ZERO
            }
        };
        self.prev_translation = Some(translation);
        step
    }

    /// Vertical component of the last step.
    pub fn dz(&self) -> f64 {
        self.dz
    }
}

/// Pose-delta estimator that divides by the pose timestamp delta.
#[derive(Debug, Clone, Default)]
pub struct PoseDeltaVelocity {
    estimator: PoseDeltaEstimator,
    last_timestamp_ns: Option<u64>,
}

impl PoseDeltaVelocity {
    pub fn new(params: &PoseDeltaParams) -> Self {
        Self {
            estimator: PoseDeltaEstimator::with_params(params),
            last_timestamp_ns: None,
        }
    }

    pub fn on_pose(&mut self, translation: Vector3<f64>, yaw: f64, timestamp_ns: u64) -> Option<Velocity> {
        let step = self.estimator.on_pose(translation, yaw);
        let prev_ts = self.last_timestamp_ns.replace(timestamp_ns)?;
        if timestamp_ns <= prev_ts {
            trace!(prev_ts, ts = timestamp_ns, "non-increasing pose timestamp");
            return None;
        }
        let dt = (timestamp_ns - prev_ts) as f64 * 1e-9;
        let v = Velocity::new(step.dx / dt, step.dy / dt, self.estimator.dz() / dt);
        v.is_finite().then_some(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_first_call_is_zero() {
        let mut est = PoseDeltaEstimator::new();
        let d = est.on_pose(Vector3::new(5.0, -2.0, 1.0), 0.7);
        assert_eq!(d, Displacement::ZERO);
        assert_eq!(est.dz(), 0.0);
    }

    #[test]
    fn test_magnitude_matches_translation_distance() {
        let mut est = PoseDeltaEstimator::new();
        est.on_pose(Vector3::new(1.0, 1.0, 0.0), 0.0);
        let d = est.on_pose(Vector3::new(4.0, 5.0, 0.5), 0.0);
        assert_relative_eq!(d.magnitude(), 5.0, epsilon = 1e-12);
        assert_relative_eq!(est.dz(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_yaw_rotates_direction() {
        let mut est = PoseDeltaEstimator::new();
        est.on_pose(Vector3::zeros(), FRAC_PI_2);
        // At yaw = π/2 the rotation cancels out.
        let d = est.on_pose(Vector3::new(2.0, 0.0, 0.0), FRAC_PI_2);
        assert_relative_eq!(d.dx, 2.0, epsilon = 1e-12);
        assert_relative_eq!(d.dy, 0.0, epsilon = 1e-12);

        // At yaw = 0 a step along +x becomes a step along -y.
        let d = est.on_pose(Vector3::new(3.0, 0.0, 0.0), 0.0);
        assert_relative_eq!(d.dx, 0.0, epsilon = 1e-12);
        assert_relative_eq!(d.dy, -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_velocity_divides_by_dt() {
        let mut vo = PoseDeltaVelocity::new(&PoseDeltaParams::default());
        assert!(vo.on_pose(Vector3::zeros(), FRAC_PI_2, 0).is_none());
        let v = vo
            .on_pose(Vector3::new(0.5, 0.0, -0.25), FRAC_PI_2, 500_000_000)
            .unwrap();
        assert_relative_eq!(v.x, 1.0, epsilon = 1e-9);
        assert_relative_eq!(v.y, 0.0, epsilon = 1e-9);
        assert_relative_eq!(v.z, -0.5, epsilon = 1e-9);
    }
}
