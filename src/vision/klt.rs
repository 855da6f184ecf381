//! Pyramidal Lucas–Kanade sparse tracker.
//!
//! Features are tracked coarse-to-fine. At each level the spatial gradient
//! matrix G of the template window in the previous image is computed once;
//! the displacement is refined with `d += G⁻¹ b` where `b` accumulates the
//! gradient-weighted intensity error against the current image.
//!
//! A correspondence is reported as untracked when G is singular, when its
//! normalised minimum eigenvalue at full resolution falls below
//! `min_eigen_threshold`, or when the tracked point leaves the image.

use nalgebra::{Point2, Vector2};

use super::gradient::central_gradient;
use super::image::FloatImage;
use super::pyramid::Pyramid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackStatus {
    Tracked,
    /// Gradient matrix singular or too weak to constrain both axes.
    Lost,
    OutOfBounds,
}

/// A previous/current point pair for one feature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    pub previous: Point2<f32>,
    pub current: Point2<f32>,
    pub status: TrackStatus,
}

impl Correspondence {
    pub fn is_tracked(&self) -> bool {
        self.status == TrackStatus::Tracked
    }

    pub fn displacement(&self) -> Vector2<f32> {
        self.current - self.previous
    }
}

#[derive(Debug, Clone)]
pub struct KltTracker {
    /// Window half-size; the patch is `(2 * half_window + 1)²`.
    pub half_window: usize,
    pub max_iterations: usize,
    pub epsilon: f32,
    pub min_eigen_threshold: f32,
}

enum LevelResult {
    Refined(Vector2<f32>),
    Weak(Vector2<f32>),
    Singular,
}

impl KltTracker {
    pub fn new(window_size: usize, max_iterations: usize, epsilon: f32, min_eigen_threshold: f32) -> Self {
        Self {
            half_window: (window_size.max(3) - 1) / 2,
            max_iterations,
            epsilon,
            min_eigen_threshold,
        }
    }

    pub fn track(
        &self,
        prev: &Pyramid,
        curr: &Pyramid,
        points: &[Point2<f32>],
    ) -> Vec<Correspondence> {
        let levels = prev.num_levels().min(curr.num_levels());
        points
            .iter()
            .map(|p| self.track_point(prev, curr, *p, levels))
            .collect()
    }

    fn track_point(
        &self,
        prev: &Pyramid,
        curr: &Pyramid,
        point: Point2<f32>,
        levels: usize,
    ) -> Correspondence {
        let mut d = Vector2::zeros();
        let mut status = TrackStatus::Tracked;

        for level in (0..levels).rev() {
            let scale = 1.0 / (1u32 << level) as f32;
            let p = Point2::new(point.x * scale, point.y * scale);

            match self.refine(&prev.levels[level], &curr.levels[level], p, d) {
                LevelResult::Refined(new_d) => d = new_d,
                LevelResult::Weak(new_d) => {
                    d = new_d;
                    if level == 0 {
                        status = TrackStatus::Lost;
                    }
                }
                LevelResult::Singular => {
                    if level == 0 {
                        status = TrackStatus::Lost;
                    }
                }
            }

            if level > 0 {
                d *= 2.0;
            }
        }

        let current = point + d;
        if status == TrackStatus::Tracked && !curr.levels[0].contains(current.x, current.y) {
            status = TrackStatus::OutOfBounds;
        }
        if !d.x.is_finite() || !d.y.is_finite() {
            status = TrackStatus::Lost;
        }

        Correspondence {
            previous: point,
            current,
            status,
        }
    }

    fn refine(&self, prev: &FloatImage, curr: &FloatImage, p: Point2<f32>, mut d: Vector2<f32>) -> LevelResult {
        let half = self.half_window as isize;
        let side = 2 * self.half_window + 1;
        let area = (side * side) as f32;

        let mut template = Vec::with_capacity(side * side);
        let (mut g00, mut g01, mut g11) = (0.0f32, 0.0f32, 0.0f32);
        for wy in -half..=half {
            for wx in -half..=half {
                let x = p.x + wx as f32;
                let y = p.y + wy as f32;
                let (gx, gy) = central_gradient(prev, x, y);
                g00 += gx * gx;
                g01 += gx * gy;
                g11 += gy * gy;
                template.push((prev.sample(x, y), gx, gy));
            }
        }

        let det = g00 * g11 - g01 * g01;
        if det.abs() < f32::EPSILON {
            return LevelResult::Singular;
        }
        let min_eigen = (g00 + g11 - ((g00 - g11) * (g00 - g11) + 4.0 * g01 * g01).sqrt()) / (2.0 * area);
        let inv_det = 1.0 / det;

        for _ in 0..self.max_iterations {
            let (mut b0, mut b1) = (0.0f32, 0.0f32);
            let mut idx = 0;
            for wy in -half..=half {
                for wx in -half..=half {
                    let (t, gx, gy) = template[idx];
                    idx += 1;
                    let j = curr.sample(p.x + d.x + wx as f32, p.y + d.y + wy as f32);
                    let e = t - j;
                    b0 += gx * e;
                    b1 += gy * e;
                }
            }

            let delta = Vector2::new(inv_det * (g11 * b0 - g01 * b1), inv_det * (g00 * b1 - g01 * b0));
            d += delta;
            if delta.norm_squared() < self.epsilon * self.epsilon {
                break;
            }
        }

        if min_eigen < self.min_eigen_threshold {
            LevelResult::Weak(d)
        } else {
            LevelResult::Refined(d)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::image::GrayFrame;
    use approx::assert_abs_diff_eq;

    fn texture(x: f32, y: f32) -> u8 {
        let v = 128.0 + 50.0 * (x / 5.0).sin() * (y / 6.0).cos() + 40.0 * ((x + 2.0 * y) / 9.0).sin();
        v.clamp(0.0, 255.0) as u8
    }

    fn shifted_pair(tx: f32, ty: f32) -> (Pyramid, Pyramid) {
        let a = GrayFrame::from_fn(96, 96, 0, |x, y| texture(x as f32, y as f32)).unwrap();
        let b = GrayFrame::from_fn(96, 96, 1, |x, y| texture(x as f32 - tx, y as f32 - ty)).unwrap();
        (Pyramid::build(&a, 3), Pyramid::build(&b, 3))
    }

    #[test]
    fn test_identical_frames_track_in_place() {
        let (a, _) = shifted_pair(0.0, 0.0);
        let tracker = KltTracker::new(15, 10, 0.03, 1e-4);
        let out = tracker.track(&a, &a, &[Point2::new(40.0, 50.0)]);
        assert_eq!(out[0].status, TrackStatus::Tracked);
        assert_abs_diff_eq!(out[0].displacement().norm(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_recovers_integer_shift() {
        let (a, b) = shifted_pair(3.0, -1.0);
        let tracker = KltTracker::new(15, 10, 0.03, 1e-4);
        let out = tracker.track(&a, &b, &[Point2::new(48.0, 48.0), Point2::new(35.0, 55.0)]);
        for c in out {
            assert!(c.is_tracked());
            let d = c.displacement();
            assert_abs_diff_eq!(d.x, 3.0, epsilon = 0.5);
            assert_abs_diff_eq!(d.y, -1.0, epsilon = 0.5);
        }
    }

    #[test]
    fn test_flat_region_is_lost() {
        let flat = GrayFrame::from_fn(64, 64, 0, |_, _| 90).unwrap();
        let pyr = Pyramid::build(&flat, 3);
        let tracker = KltTracker::new(15, 10, 0.03, 1e-4);
        let out = tracker.track(&pyr, &pyr, &[Point2::new(32.0, 32.0)]);
        assert_eq!(out[0].status, TrackStatus::Lost);
    }
}
