//! Gaussian image pyramid for coarse-to-fine tracking.
//!
//! Each level is the previous one blurred with a 5-tap binomial kernel
//! `[1 4 6 4 1] / 16` and decimated by two.

use super::image::{FloatImage, GrayFrame};

const KERNEL: [f32; 5] = [1.0 / 16.0, 4.0 / 16.0, 6.0 / 16.0, 4.0 / 16.0, 1.0 / 16.0];

/// Smallest side length a pyramid level may have.
const MIN_LEVEL_SIDE: usize = 8;

pub struct Pyramid {
    /// `levels[0]` is full resolution.
    pub levels: Vec<FloatImage>,
}

impl Pyramid {
    /// Build up to `num_levels` levels; stops early when a level would fall
    /// below `MIN_LEVEL_SIDE` pixels on either side.
    pub fn build(frame: &GrayFrame, num_levels: usize) -> Self {
        let mut levels = Vec::with_capacity(num_levels.max(1));
        levels.push(FloatImage::from_gray(frame));

        while levels.len() < num_levels {
            let Some(prev) = levels.last() else { break };
            if prev.width() / 2 < MIN_LEVEL_SIDE || prev.height() / 2 < MIN_LEVEL_SIDE {
                break;
            }
            let next = downsample(&blur(prev));
            levels.push(next);
        }

        Self { levels }
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }
}

fn blur(src: &FloatImage) -> FloatImage {
    let (w, h) = (src.width(), src.height());
    let mut tmp = FloatImage::zeros(w, h);
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (k, weight) in KERNEL.iter().enumerate() {
                acc += weight * src.get_clamped(x as isize + k as isize - 2, y as isize);
            }
            tmp.set(x, y, acc);
        }
    }
    let mut out = FloatImage::zeros(w, h);
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (k, weight) in KERNEL.iter().enumerate() {
                acc += weight * tmp.get_clamped(x as isize, y as isize + k as isize - 2);
            }
            out.set(x, y, acc);
        }
    }
    out
}

fn downsample(src: &FloatImage) -> FloatImage {
    let w = src.width().div_ceil(2);
    let h = src.height().div_ceil(2);
    let mut out = FloatImage::zeros(w, h);
    for y in 0..h {
        for x in 0..w {
            out.set(x, y, src.get(2 * x, 2 * y));
        }
    }
    out
}
