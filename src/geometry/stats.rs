//! Robust reductions over sets of displacement vectors.
//!
//! Two policies turn many noisy per-feature displacements into one estimate:
//! - `gated_centroid`: mean of the displacements shorter than a gate.
//! - `dual_median`: angle and magnitude are trimmed to one standard deviation
//!   independently, then the medians of each are recombined.
//!
//! Both return `None` instead of a non-finite result.

use super::vector::{Displacement, centroid, wrap_angle};

/// Minimum number of samples required by the dual-median reduction, both
/// before and after trimming.
pub const MIN_DUAL_MEDIAN_SAMPLES: usize = 2;

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1 denominator).
pub fn sample_std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m) * (v - m)).sum();
    Some((ss / (values.len() - 1) as f64).sqrt())
}

/// Median; averages the two middle values for even-length input.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() || values.iter().any(|v| v.is_nan()) {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some(0.5 * (sorted[mid - 1] + sorted[mid]))
    } else {
        Some(sorted[mid])
    }
}

/// Circular mean of a set of angles (radians).
///
/// `None` when the resultant vector vanishes (e.g. two opposite angles).
pub fn circular_mean(angles: &[f64]) -> Option<f64> {
    if angles.is_empty() {
        return None;
    }
    let (s, c) = angles
        .iter()
        .fold((0.0, 0.0), |(s, c), a| (s + a.sin(), c + a.cos()));
    if s.hypot(c) < 1e-12 * angles.len() as f64 {
        return None;
    }
    Some(s.atan2(c))
}

/// Centroid of the displacements whose magnitude is strictly below `gate`.
pub fn gated_centroid(points: &[Displacement], gate: f64) -> Option<Displacement> {
    let kept: Vec<Displacement> = points.iter().copied().filter(|p| p.magnitude() < gate).collect();
    centroid(&kept).filter(Displacement::is_finite)
}

/// Outlier-trimmed median of direction and magnitude, recombined.
///
/// Directions are compared against their circular mean so that motion near
/// ±π is not split in two. Samples are kept when they lie within one sample
/// standard deviation of the mean (inclusive), which keeps every sample of a
/// perfectly uniform set.
pub fn dual_median(points: &[Displacement]) -> Option<Displacement> {
    if points.len() < MIN_DUAL_MEDIAN_SAMPLES {
        return None;
    }

    let angles: Vec<f64> = points.iter().map(Displacement::angle).collect();
    let magnitudes: Vec<f64> = points.iter().map(Displacement::magnitude).collect();

    // Angles: deviations from the circular mean.
    let mu = circular_mean(&angles)?;
    let deviations: Vec<f64> = angles.iter().map(|a| wrap_angle(a - mu)).collect();
    let angle_sd = (deviations.iter().map(|d| d * d).sum::<f64>()
        / (deviations.len() - 1) as f64)
        .sqrt();
    let kept_deviations: Vec<f64> = deviations
        .into_iter()
        .filter(|d| d.abs() <= angle_sd)
        .collect();

    // Magnitudes: plain mean and sample standard deviation.
    let mag_mean = mean(&magnitudes)?;
    let mag_sd = sample_std_dev(&magnitudes)?;
    let kept_magnitudes: Vec<f64> = magnitudes
        .into_iter()
        .filter(|m| (m - mag_mean).abs() <= mag_sd)
        .collect();

    if kept_deviations.len() < MIN_DUAL_MEDIAN_SAMPLES
        || kept_magnitudes.len() < MIN_DUAL_MEDIAN_SAMPLES
    {
        return None;
    }

    let angle = wrap_angle(mu + median(&kept_deviations)?);
    let magnitude = median(&kept_magnitudes)?;
    let d = Displacement::from_polar(angle, magnitude);
    d.is_finite().then_some(d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use std::f64::consts::PI;

    fn uniform_with_outliers() -> Vec<Displacement> {
        let mut pts = vec![Displacement::new(3.0, -1.0); 40];
        pts.extend(std::iter::repeat_n(Displacement::new(50.0, 50.0), 3));
        pts
    }

    #[test]
    fn test_median_odd_and_even() {
        assert_relative_eq!(median(&[3.0, 1.0, 2.0]).unwrap(), 2.0);
        assert_relative_eq!(median(&[4.0, 1.0, 2.0, 3.0]).unwrap(), 2.5);
        assert!(median(&[]).is_none());
    }

    #[test]
    fn test_sample_std_dev() {
        let sd = sample_std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert_relative_eq!(sd, 2.138_089_935, epsilon = 1e-6);
        assert!(sample_std_dev(&[1.0]).is_none());
    }

    #[test]
    fn test_circular_mean_across_pi() {
        let mu = circular_mean(&[PI - 0.1, -PI + 0.1]).unwrap();
        assert_abs_diff_eq!(mu.abs(), PI, epsilon = 1e-9);
    }

    #[test]
    fn test_gated_centroid_rejects_long_vectors() {
        let c = gated_centroid(&uniform_with_outliers(), 30.0).unwrap();
        assert_abs_diff_eq!(c.dx, 3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(c.dy, -1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_gated_centroid_nothing_under_gate() {
        assert!(gated_centroid(&[Displacement::new(40.0, 0.0)], 30.0).is_none());
    }

    #[test]
    fn test_dual_median_rejects_outliers() {
        let d = dual_median(&uniform_with_outliers()).unwrap();
        assert_abs_diff_eq!(d.dx, 3.0, epsilon = 1e-6);
        assert_abs_diff_eq!(d.dy, -1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_dual_median_uniform_zero_motion() {
        let d = dual_median(&vec![Displacement::ZERO; 10]).unwrap();
        assert_eq!(d, Displacement::new(0.0, 0.0));
    }

    #[test]
    fn test_dual_median_needs_two_samples() {
        assert!(dual_median(&[Displacement::new(1.0, 1.0)]).is_none());
        assert!(dual_median(&[]).is_none());
    }

    #[test]
    fn test_dual_median_trimmed_below_two_is_none() {
        // Two opposite vectors: the circular mean is undefined.
        let pts = [Displacement::new(1.0, 0.0), Displacement::new(-1.0, 0.0)];
        assert!(dual_median(&pts).is_none());
    }

    #[test]
    fn test_single_extreme_outlier_matches_clean_set() {
        let clean: Vec<Displacement> = (0..20)
            .map(|i| {
                let jitter = (i as f64 - 10.0) * 0.01;
                Displacement::new(2.0 + jitter, 1.0 - jitter)
            })
            .collect();
        let mut dirty = clean.clone();
        dirty.push(Displacement::new(100.0, -80.0));

        let clean_c = gated_centroid(&clean, 30.0).unwrap();
        let dirty_c = gated_centroid(&dirty, 30.0).unwrap();
        assert_abs_diff_eq!(clean_c.dx, dirty_c.dx, epsilon = 1e-9);
        assert_abs_diff_eq!(clean_c.dy, dirty_c.dy, epsilon = 1e-9);

        let clean_m = dual_median(&clean).unwrap();
        let dirty_m = dual_median(&dirty).unwrap();
        assert_abs_diff_eq!(clean_m.dx, dirty_m.dx, epsilon = 0.05);
        assert_abs_diff_eq!(clean_m.dy, dirty_m.dy, epsilon = 0.05);
    }
}
