//! Frame containers for the visual pipeline.
//!
//! `GrayFrame` and `ColorFrame` are what the camera supplier hands over;
//! `FloatImage` is the working representation used by the pyramid, the corner
//! detector and the tracker.

use anyhow::{Result, bail};

/// Single-channel 8-bit frame with its capture time.
#[derive(Debug, Clone, PartialEq)]
pub struct GrayFrame {
    width: usize,
    height: usize,
    data: Vec<u8>,
    pub timestamp_ns: u64,
}

impl GrayFrame {
    pub fn new(width: usize, height: usize, data: Vec<u8>, timestamp_ns: u64) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("frame must be non-empty, got {}x{}", width, height);
        }
        if data.len() != width * height {
            bail!(
                "frame buffer holds {} bytes, expected {} for {}x{}",
                data.len(),
                width * height,
                width,
                height
            );
        }
        Ok(Self {
            width,
            height,
            data,
            timestamp_ns,
        })
    }

    /// Build a frame by evaluating `f(x, y)` at every pixel.
    pub fn from_fn<F>(width: usize, height: usize, timestamp_ns: u64, mut f: F) -> Result<Self>
    where
        F: FnMut(usize, usize) -> u8,
    {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self::new(width, height, data, timestamp_ns)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn same_size(&self, other: &GrayFrame) -> bool {
        self.width == other.width && self.height == other.height
    }
}

/// Interleaved 8-bit RGB frame, used only by the pattern matcher.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorFrame {
    width: usize,
    height: usize,
    rgb: Vec<u8>,
    pub timestamp_ns: u64,
}

impl ColorFrame {
    pub fn new(width: usize, height: usize, rgb: Vec<u8>, timestamp_ns: u64) -> Result<Self> {
        if rgb.len() != width * height * 3 {
            bail!(
                "colour buffer holds {} bytes, expected {} for {}x{}",
                rgb.len(),
                width * height * 3,
                width,
                height
            );
        }
        Ok(Self {
            width,
            height,
            rgb,
            timestamp_ns,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn rgb(&self, x: usize, y: usize) -> [u8; 3] {
        let i = (y * self.width + x) * 3;
        [self.rgb[i], self.rgb[i + 1], self.rgb[i + 2]]
    }

    /// Paint an axis-aligned rectangle, clipped to the frame.
    pub fn fill_rect(&mut self, x0: usize, y0: usize, w: usize, h: usize, color: [u8; 3]) {
        for y in y0..(y0 + h).min(self.height) {
            for x in x0..(x0 + w).min(self.width) {
                let i = (y * self.width + x) * 3;
                self.rgb[i..i + 3].copy_from_slice(&color);
            }
        }
    }
}

/// Single-channel `f32` image with intensities normalised to `[0, 1]`.
#[derive(Debug, Clone)]
pub struct FloatImage {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl FloatImage {
    pub fn zeros(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    pub fn from_gray(frame: &GrayFrame) -> Self {
        Self {
            width: frame.width(),
            height: frame.height(),
            data: frame.as_slice().iter().map(|&v| v as f32 / 255.0).collect(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: f32) {
        self.data[y * self.width + x] = value;
    }

    /// Pixel lookup with coordinates clamped to the border.
    #[inline]
    pub fn get_clamped(&self, x: isize, y: isize) -> f32 {
        let cx = x.clamp(0, self.width as isize - 1) as usize;
        let cy = y.clamp(0, self.height as isize - 1) as usize;
        self.get(cx, cy)
    }

    /// Bilinear sample at sub-pixel `(x, y)`, clamping at the borders.
    pub fn sample(&self, x: f32, y: f32) -> f32 {
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let (xi, yi) = (x0 as isize, y0 as isize);

        let p00 = self.get_clamped(xi, yi);
        let p10 = self.get_clamped(xi + 1, yi);
        let p01 = self.get_clamped(xi, yi + 1);
        let p11 = self.get_clamped(xi + 1, yi + 1);

        let top = p00 + fx * (p10 - p00);
        let bottom = p01 + fx * (p11 - p01);
        top + fy * (bottom - top)
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= 0.0 && y >= 0.0 && x <= (self.width - 1) as f32 && y <= (self.height - 1) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_gray_frame_rejects_bad_buffer() {
        assert!(GrayFrame::new(4, 4, vec![0; 15], 0).is_err());
        assert!(GrayFrame::new(0, 4, vec![], 0).is_err());
    }

    #[test]
    fn test_from_fn_layout() {
        let f = GrayFrame::from_fn(3, 2, 7, |x, y| (x + 10 * y) as u8).unwrap();
        assert_eq!(f.get(2, 1), 12);
        assert_eq!(f.timestamp_ns, 7);
    }

    #[test]
    fn test_bilinear_midpoint() {
        let f = GrayFrame::new(2, 1, vec![0, 255], 0).unwrap();
        let img = FloatImage::from_gray(&f);
        assert_relative_eq!(img.sample(0.5, 0.0), 0.5, epsilon = 1e-6);
        // Clamped past the right border.
        assert_relative_eq!(img.sample(5.0, 0.0), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_color_fill_rect_clips() {
        let mut c = ColorFrame::new(4, 4, vec![0; 48], 0).unwrap();
        c.fill_rect(2, 2, 10, 10, [255, 0, 0]);
        assert_eq!(c.rgb(3, 3), [255, 0, 0]);
        assert_eq!(c.rgb(1, 1), [0, 0, 0]);
    }
}
