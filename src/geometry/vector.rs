//! Planar displacement vectors and angle helpers.

use std::f64::consts::{PI, TAU};

/// A 2D motion estimate (dx, dy) since the previous sample.
///
/// Units are local to whichever estimator produced it: pixels for the
/// optical-flow path, session units (metres) for the pose-delta path.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Displacement {
    pub dx: f64,
    pub dy: f64,
}

impl Displacement {
    pub const ZERO: Displacement = Displacement { dx: 0.0, dy: 0.0 };

    pub fn new(dx: f64, dy: f64) -> Self {
        Self { dx, dy }
    }

    /// Build a displacement from a direction (radians) and a length.
    pub fn from_polar(angle: f64, magnitude: f64) -> Self {
        Self {
            dx: angle.cos() * magnitude,
            dy: angle.sin() * magnitude,
        }
    }

    #[inline]
    pub fn magnitude(&self) -> f64 {
        self.dx.hypot(self.dy)
    }

    /// Direction in radians, `atan2(dy, dx)`. The zero vector maps to 0.
    #[inline]
    pub fn angle(&self) -> f64 {
        self.dy.atan2(self.dx)
    }

    pub fn is_finite(&self) -> bool {
        self.dx.is_finite() && self.dy.is_finite()
    }

    /// Rotate counter-clockwise by `theta` radians.
    pub fn rotated(&self, theta: f64) -> Self {
        let (s, c) = theta.sin_cos();
        Self {
            dx: c * self.dx - s * self.dy,
            dy: s * self.dx + c * self.dy,
        }
    }
}

/// Wrap an angle into `(-π, π]`.
pub fn wrap_angle(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI { wrapped + TAU } else { wrapped }
}

/// Arithmetic centroid of a set of displacements.
///
/// Returns `None` for an empty set rather than dividing by zero.
pub fn centroid(points: &[Displacement]) -> Option<Displacement> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.dx, sy + p.dy));
    Some(Displacement::new(sx / n, sy / n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_polar_round_trip_components() {
        let d = Displacement::new(3.0, -1.0);
        let back = Displacement::from_polar(d.angle(), d.magnitude());
        assert_relative_eq!(back.dx, 3.0, epsilon = 1e-12);
        assert_relative_eq!(back.dy, -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rotation_quarter_turn() {
        let d = Displacement::new(1.0, 0.0).rotated(FRAC_PI_2);
        assert_relative_eq!(d.dx, 0.0, epsilon = 1e-12);
        assert_relative_eq!(d.dy, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_wrap_angle_range() {
        assert_relative_eq!(wrap_angle(3.0 * PI), PI, epsilon = 1e-12);
        assert_relative_eq!(wrap_angle(-PI), PI, epsilon = 1e-12);
        assert_relative_eq!(wrap_angle(0.5), 0.5, epsilon = 1e-12);
        assert_relative_eq!(wrap_angle(-TAU - 0.25), -0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_centroid_empty_is_none() {
        assert!(centroid(&[]).is_none());
    }

    #[test]
    fn test_centroid_mean() {
        let c = centroid(&[Displacement::new(1.0, 2.0), Displacement::new(3.0, 4.0)]).unwrap();
        assert_relative_eq!(c.dx, 2.0);
        assert_relative_eq!(c.dy, 3.0);
    }
}
