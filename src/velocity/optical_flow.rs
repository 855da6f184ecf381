//! Optical-flow velocity estimator.
//!
//! Corners are detected in the previous frame, tracked into the current one
//! with pyramidal Lucas–Kanade, and the per-feature displacements are reduced
//! to one vector either by a gated centroid or by the dual median.

use nalgebra::Point2;
use serde::Deserialize;
use tracing::trace;

use crate::geometry::{Displacement, dual_median, gated_centroid};
use crate::vision::{CornerDetector, FloatImage, GrayFrame, KltTracker, Pyramid};

use super::provider::Velocity;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OpticalFlowParams {
    pub max_features: usize,
    pub quality_level: f32,
    pub min_distance: f32,
    pub block_size: usize,
    pub window_size: usize,
    pub pyramid_levels: usize,
    pub max_iterations: usize,
    pub epsilon: f32,
    pub min_eigen_threshold: f32,
    /// Displacements at or above this length (pixels) are ignored by the
    /// centroid reduction.
    pub gate: f64,
    /// Use the dual median instead of the gated centroid.
    pub robust: bool,
    /// Ground distance covered by one pixel of image motion.
    pub metres_per_pixel: f64,
}

impl Default for OpticalFlowParams {
    fn default() -> Self {
        Self {
            max_features: 100,
            quality_level: 0.1,
            min_distance: 7.0,
            block_size: 7,
            window_size: 15,
            pyramid_levels: 3,
            max_iterations: 10,
            epsilon: 0.03,
            min_eigen_threshold: 1e-4,
            gate: 30.0,
            robust: true,
            metres_per_pixel: 0.005,
        }
    }
}

pub struct OpticalFlowEstimator {
    detector: CornerDetector,
    tracker: KltTracker,
    pyramid_levels: usize,
    gate: f64,
}

impl OpticalFlowEstimator {
    pub fn new(params: &OpticalFlowParams) -> Self {
        Self {
            detector: CornerDetector::new(
                params.max_features,
                params.quality_level,
                params.min_distance,
                params.block_size,
            ),
            tracker: KltTracker::new(
                params.window_size,
                params.max_iterations,
                params.epsilon,
                params.min_eigen_threshold,
            ),
            pyramid_levels: params.pyramid_levels.max(1),
            gate: params.gate,
        }
    }

    pub fn build_pyramid(&self, frame: &GrayFrame) -> Pyramid {
        Pyramid::build(frame, self.pyramid_levels)
    }

    /// Displacement of the scene between two frames, or `None` when the frames
    /// differ in size, no feature can be found or tracked, or the reduction
    /// degenerates.
    pub fn estimate(
        &self,
        previous: &GrayFrame,
        current: &GrayFrame,
        robust: bool,
    ) -> Option<Displacement> {
        if !previous.same_size(current) {
            trace!(
                "frame size changed from {}x{} to {}x{}",
                previous.width(),
                previous.height(),
                current.width(),
                current.height()
            );
            return None;
        }
        let prev = self.build_pyramid(previous);
        let curr = self.build_pyramid(current);
        self.estimate_pyramids(&prev, &curr, robust)
    }

    /// Same as [`estimate`](Self::estimate) on prebuilt pyramids.
    pub fn estimate_pyramids(
        &self,
        prev: &Pyramid,
        curr: &Pyramid,
        robust: bool,
    ) -> Option<Displacement> {
        let displacements = self.displacements(prev, curr);
        if displacements.is_empty() {
            trace!("no tracked features");
            return None;
        }
        if robust {
            dual_median(&displacements)
        } else {
            gated_centroid(&displacements, self.gate)
        }
    }

    /// Per-feature displacements of every successfully tracked corner.
    pub fn displacements(&self, prev: &Pyramid, curr: &Pyramid) -> Vec<Displacement> {
        let (Some(base_prev), Some(base_curr)) = (prev.levels.first(), curr.levels.first()) else {
            return Vec::new();
        };
        if base_prev.width() != base_curr.width() || base_prev.height() != base_curr.height() {
            return Vec::new();
        }

        let points = self.feature_points(base_prev);
        if points.is_empty() {
            return Vec::new();
        }

        self.tracker
            .track(prev, curr, &points)
            .into_iter()
            .filter(|c| c.is_tracked())
            .map(|c| {
                let d = c.displacement();
                Displacement::new(d.x as f64, d.y as f64)
            })
            .filter(Displacement::is_finite)
            .collect()
    }

    /// Corners whose tracking window lies fully inside the image.
    fn feature_points(&self, img: &FloatImage) -> Vec<Point2<f32>> {
        let margin = self.tracker.half_window as f32;
        let max_x = img.width() as f32 - 1.0 - margin;
        let max_y = img.height() as f32 - 1.0 - margin;
        self.detector
            .detect(img)
            .into_iter()
            .map(|c| c.position)
            .filter(|p| p.x >= margin && p.y >= margin && p.x <= max_x && p.y <= max_y)
            .collect()
    }
}

/// Stateful optical-flow estimator that keeps the previous frame and reports
/// metres per second.
pub struct OpticalFlowVelocity {
    estimator: OpticalFlowEstimator,
    robust: bool,
    metres_per_pixel: f64,
    previous: Option<(u64, Pyramid)>,
}

impl OpticalFlowVelocity {
    pub fn new(params: &OpticalFlowParams) -> Self {
        Self {
            estimator: OpticalFlowEstimator::new(params),
            robust: params.robust,
            metres_per_pixel: params.metres_per_pixel,
            previous: None,
        }
    }

    /// Feed the next frame. The first frame, a non-increasing timestamp or a
    /// failed estimate yields `None`; the frame always becomes the new
    /// reference.
    pub fn on_frame(&mut self, frame: &GrayFrame) -> Option<Velocity> {
        let pyramid = self.estimator.build_pyramid(frame);
        let previous = self.previous.replace((frame.timestamp_ns, pyramid));
        let (prev_ts, prev_pyr) = previous?;
        let (_, curr_pyr) = self.previous.as_ref()?;

        if frame.timestamp_ns <= prev_ts {
            trace!(prev_ts, ts = frame.timestamp_ns, "non-increasing frame timestamp");
            return None;
        }
        let dt = (frame.timestamp_ns - prev_ts) as f64 * 1e-9;

        let d = self
            .estimator
            .estimate_pyramids(&prev_pyr, curr_pyr, self.robust)?;
        let scale = self.metres_per_pixel / dt;
        let v = Velocity::new(d.dx * scale, d.dy * scale, 0.0);
        v.is_finite().then_some(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn texture(x: f32, y: f32) -> u8 {
        let v = 128.0 + 50.0 * (x / 5.0).sin() * (y / 6.0).cos() + 40.0 * ((x + 2.0 * y) / 9.0).sin();
        v.clamp(0.0, 255.0) as u8
    }

    fn frame(tx: f32, ty: f32, ts: u64) -> GrayFrame {
        GrayFrame::from_fn(128, 128, ts, |x, y| texture(x as f32 - tx, y as f32 - ty)).unwrap()
    }

    #[test]
    fn test_identical_frames_give_zero() {
        let est = OpticalFlowEstimator::new(&OpticalFlowParams::default());
        let f = frame(0.0, 0.0, 0);
        for robust in [false, true] {
            let d = est.estimate(&f, &f, robust).unwrap();
            assert_abs_diff_eq!(d.dx, 0.0, epsilon = 1e-6);
            assert_abs_diff_eq!(d.dy, 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_shift_is_recovered() {
        let est = OpticalFlowEstimator::new(&OpticalFlowParams::default());
        let a = frame(0.0, 0.0, 0);
        let b = frame(3.0, -1.0, 1);

        let robust = est.estimate(&a, &b, true).unwrap();
        assert_abs_diff_eq!(robust.dx, 3.0, epsilon = 0.3);
        assert_abs_diff_eq!(robust.dy, -1.0, epsilon = 0.3);

        let centroid = est.estimate(&a, &b, false).unwrap();
        assert_abs_diff_eq!(centroid.dx, 3.0, epsilon = 0.5);
        assert_abs_diff_eq!(centroid.dy, -1.0, epsilon = 0.5);
    }

    #[test]
    fn test_featureless_or_mismatched_frames() {
        let est = OpticalFlowEstimator::new(&OpticalFlowParams::default());
        let flat = GrayFrame::from_fn(64, 64, 0, |_, _| 77).unwrap();
        assert!(est.estimate(&flat, &flat, true).is_none());

        let small = GrayFrame::from_fn(64, 48, 0, |x, y| texture(x as f32, y as f32)).unwrap();
        assert!(est.estimate(&frame(0.0, 0.0, 0), &small, false).is_none());
    }

    #[test]
    fn test_velocity_scaling() {
        let params = OpticalFlowParams {
            metres_per_pixel: 0.01,
            ..OpticalFlowParams::default()
        };
        let mut vo = OpticalFlowVelocity::new(&params);
        assert!(vo.on_frame(&frame(0.0, 0.0, 0)).is_none());
        // 3 px in 0.1 s at 1 cm/px.
        let v = vo.on_frame(&frame(3.0, -1.0, 100_000_000)).unwrap();
        assert_abs_diff_eq!(v.x, 0.3, epsilon = 0.03);
        assert_abs_diff_eq!(v.y, -0.1, epsilon = 0.03);

        // Repeated timestamp.
        assert!(vo.on_frame(&frame(3.0, -1.0, 100_000_000)).is_none());
    }
}
