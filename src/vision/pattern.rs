//! Landing-pattern matcher.
//!
//! The pattern is a coloured marker. Pixels are converted to HSV (hue in
//! `[0, 180)`, saturation and value in `[0, 255]`), thresholded against a
//! range, and the centroid of the largest 4-connected blob is reported.

use std::collections::VecDeque;

use anyhow::Result;
use serde::Deserialize;

use super::image::ColorFrame;

/// Locates the landing pattern in a colour frame.
pub trait PatternMatcher: Send {
    /// Pixel-space centroid `(x, y)` of the pattern, or `None` when absent.
    fn locate(&mut self, frame: &ColorFrame) -> Option<(f64, f64)>;
}

/// Supplies colour frames on demand for visual-lock attempts.
pub trait ColorFrameSource: Send {
    fn capture(&mut self) -> Result<ColorFrame>;
}

/// Pattern centroid in pixels with the capture time of the frame it came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatternFix {
    pub x: f64,
    pub y: f64,
    pub timestamp_ns: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct HsvRange {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl Default for HsvRange {
    fn default() -> Self {
        Self {
            lower: [100, 84, 141],
            upper: [186, 255, 255],
        }
    }
}

impl HsvRange {
    fn contains(&self, hsv: [u8; 3]) -> bool {
        (0..3).all(|i| hsv[i] >= self.lower[i] && hsv[i] <= self.upper[i])
    }
}

/// Colour-threshold blob matcher.
#[derive(Debug, Clone)]
pub struct ColorBlobMatcher {
    pub range: HsvRange,
    /// Blobs smaller than this many pixels are ignored.
    pub min_area: usize,
}

impl ColorBlobMatcher {
    pub fn new(range: HsvRange, min_area: usize) -> Self {
        Self {
            range,
            min_area: min_area.max(1),
        }
    }
}

impl PatternMatcher for ColorBlobMatcher {
    fn locate(&mut self, frame: &ColorFrame) -> Option<(f64, f64)> {
        let (w, h) = (frame.width(), frame.height());
        let mut mask = vec![false; w * h];
        for y in 0..h {
            for x in 0..w {
                mask[y * w + x] = self.range.contains(rgb_to_hsv(frame.rgb(x, y)));
            }
        }

        let mut visited = vec![false; w * h];
        let mut best: Option<(usize, f64, f64)> = None;
        let mut queue = VecDeque::new();

        for start in 0..w * h {
            if !mask[start] || visited[start] {
                continue;
            }
            visited[start] = true;
            queue.push_back(start);
            let (mut area, mut sx, mut sy) = (0usize, 0.0f64, 0.0f64);

            while let Some(i) = queue.pop_front() {
                let (x, y) = (i % w, i / w);
                area += 1;
                sx += x as f64;
                sy += y as f64;

                let mut visit = |j: usize| {
                    if mask[j] && !visited[j] {
                        visited[j] = true;
                        queue.push_back(j);
                    }
                };
                if x > 0 {
                    visit(i - 1);
                }
                if x + 1 < w {
                    visit(i + 1);
                }
                if y > 0 {
                    visit(i - w);
                }
                if y + 1 < h {
                    visit(i + w);
                }
            }

            if best.is_none_or(|(a, _, _)| area > a) {
                best = Some((area, sx, sy));
            }
        }

        best.filter(|(area, _, _)| *area >= self.min_area)
            .map(|(area, sx, sy)| (sx / area as f64, sy / area as f64))
    }
}

/// RGB → HSV using the 8-bit convention (H ∈ [0, 180)).
pub fn rgb_to_hsv([r, g, b]: [u8; 3]) -> [u8; 3] {
    let (rf, gf, bf) = (r as f32, g as f32, b as f32);
    let max = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let delta = max - min;

    let v = max;
    let s = if max > 0.0 { 255.0 * delta / max } else { 0.0 };
    let mut h = if delta == 0.0 {
        0.0
    } else if max == rf {
        60.0 * (gf - bf) / delta
    } else if max == gf {
        120.0 + 60.0 * (bf - rf) / delta
    } else {
        240.0 + 60.0 * (rf - gf) / delta
    };
    if h < 0.0 {
        h += 360.0;
    }

    [(h / 2.0).round().min(179.0) as u8, s.round() as u8, v.round() as u8]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_hsv_primaries() {
        assert_eq!(rgb_to_hsv([255, 0, 0]), [0, 255, 255]);
        assert_eq!(rgb_to_hsv([0, 255, 0]), [60, 255, 255]);
        assert_eq!(rgb_to_hsv([0, 0, 255]), [120, 255, 255]);
        assert_eq!(rgb_to_hsv([0, 0, 0]), [0, 0, 0]);
    }

    #[test]
    fn test_largest_blob_centroid() {
        let mut frame = ColorFrame::new(60, 40, vec![0; 60 * 40 * 3], 0).unwrap();
        // Blue (H=120) falls inside the default range.
        frame.fill_rect(10, 10, 10, 6, [0, 0, 255]);
        frame.fill_rect(40, 30, 2, 2, [0, 0, 255]);
        let mut m = ColorBlobMatcher::new(HsvRange::default(), 5);
        let (x, y) = m.locate(&frame).unwrap();
        assert_relative_eq!(x, 14.5);
        assert_relative_eq!(y, 12.5);
    }

    #[test]
    fn test_absent_pattern() {
        let frame = ColorFrame::new(20, 20, vec![200; 20 * 20 * 3], 0).unwrap();
        let mut m = ColorBlobMatcher::new(HsvRange::default(), 5);
        assert!(m.locate(&frame).is_none());
    }
}
