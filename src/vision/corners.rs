//! Shi–Tomasi "good features to track" corner detector.
//!
//! For every pixel the 2×2 structure tensor is summed over a square block and
//! its smaller eigenvalue is the corner response. Responses below
//! `quality_level × max_response` are dropped, survivors must be 3×3 local
//! maxima, and the strongest are accepted greedily while keeping at least
//! `min_distance` pixels between any two accepted corners.

use nalgebra::Point2;

use super::gradient::sobel_xy;
use super::image::FloatImage;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Corner {
    pub position: Point2<f32>,
    pub response: f32,
}

#[derive(Debug, Clone)]
pub struct CornerDetector {
    pub max_corners: usize,
    pub quality_level: f32,
    pub min_distance: f32,
    /// Side of the square summation window (odd).
    pub block_size: usize,
}

impl CornerDetector {
    pub fn new(max_corners: usize, quality_level: f32, min_distance: f32, block_size: usize) -> Self {
        Self {
            max_corners,
            quality_level,
            min_distance,
            block_size: block_size.max(3) | 1,
        }
    }

    /// Minimum-eigenvalue response image.
    pub fn response(&self, img: &FloatImage) -> FloatImage {
        let (w, h) = (img.width(), img.height());
        let (gx, gy) = sobel_xy(img);

        let sxx = IntegralImage::from_fn(w, h, |x, y| {
            let v = gx.get(x, y) as f64;
            v * v
        });
        let syy = IntegralImage::from_fn(w, h, |x, y| {
            let v = gy.get(x, y) as f64;
            v * v
        });
        let sxy = IntegralImage::from_fn(w, h, |x, y| gx.get(x, y) as f64 * gy.get(x, y) as f64);

        let r = self.block_size / 2;
        let mut out = FloatImage::zeros(w, h);
        for y in 0..h {
            for x in 0..w {
                let x0 = x.saturating_sub(r);
                let y0 = y.saturating_sub(r);
                let x1 = (x + r).min(w - 1);
                let y1 = (y + r).min(h - 1);
                let a = sxx.sum(x0, y0, x1, y1);
                let c = syy.sum(x0, y0, x1, y1);
                let b = sxy.sum(x0, y0, x1, y1);
                let half_trace = 0.5 * (a + c);
                let disc = (0.25 * (a - c) * (a - c) + b * b).sqrt();
                out.set(x, y, (half_trace - disc).max(0.0) as f32);
            }
        }
        out
    }

    /// Detect corners, strongest first.
    pub fn detect(&self, img: &FloatImage) -> Vec<Corner> {
        if self.max_corners == 0 {
            return Vec::new();
        }
        let (w, h) = (img.width(), img.height());
        let margin = self.block_size / 2 + 1;
        if w <= 2 * margin || h <= 2 * margin {
            return Vec::new();
        }

        let response = self.response(img);
        let mut max_response = 0.0f32;
        for y in margin..h - margin {
            for x in margin..w - margin {
                max_response = max_response.max(response.get(x, y));
            }
        }
        if max_response <= f32::EPSILON {
            return Vec::new();
        }
        let threshold = self.quality_level * max_response;

        let mut candidates = Vec::new();
        for y in margin..h - margin {
            for x in margin..w - margin {
                let v = response.get(x, y);
                if v < threshold || v <= 0.0 {
                    continue;
                }
                if is_local_max(&response, x, y, v) {
                    candidates.push(Corner {
                        position: Point2::new(x as f32, y as f32),
                        response: v,
                    });
                }
            }
        }
        candidates.sort_by(|a, b| b.response.total_cmp(&a.response));

        let min_dist_sq = self.min_distance * self.min_distance;
        let mut accepted: Vec<Corner> = Vec::with_capacity(self.max_corners);
        for c in candidates {
            let far_enough = accepted
                .iter()
                .all(|a| (a.position - c.position).norm_squared() >= min_dist_sq);
            if far_enough {
                accepted.push(c);
                if accepted.len() == self.max_corners {
                    break;
                }
            }
        }
        accepted
    }
}

fn is_local_max(img: &FloatImage, x: usize, y: usize, v: f32) -> bool {
    for dy in -1isize..=1 {
        for dx in -1isize..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            if img.get_clamped(x as isize + dx, y as isize + dy) > v {
                return false;
            }
        }
    }
    true
}

/// Summed-area table for O(1) box sums.
struct IntegralImage {
    width: usize,
    table: Vec<f64>,
}

impl IntegralImage {
    fn from_fn<F: Fn(usize, usize) -> f64>(width: usize, height: usize, f: F) -> Self {
        let stride = width + 1;
        let mut table = vec![0.0; stride * (height + 1)];
        for y in 0..height {
            let mut row = 0.0;
            for x in 0..width {
                row += f(x, y);
                table[(y + 1) * stride + x + 1] = table[y * stride + x + 1] + row;
            }
        }
        Self { width, table }
    }

    /// Sum over the inclusive rectangle `[x0, x1] × [y0, y1]`.
    fn sum(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> f64 {
        let s = self.width + 1;
        self.table[(y1 + 1) * s + x1 + 1] - self.table[y0 * s + x1 + 1] - self.table[(y1 + 1) * s + x0]
            + self.table[y0 * s + x0]
    }
}
