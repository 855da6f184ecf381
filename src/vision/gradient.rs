//! Image gradients.

use super::image::FloatImage;

/// 3×3 Sobel gradients, normalised by 1/8 so a unit step gives unit slope.
pub fn sobel_xy(src: &FloatImage) -> (FloatImage, FloatImage) {
    let (w, h) = (src.width(), src.height());
    let mut gx = FloatImage::zeros(w, h);
    let mut gy = FloatImage::zeros(w, h);

    for y in 0..h as isize {
        for x in 0..w as isize {
            let p = |dx: isize, dy: isize| src.get_clamped(x + dx, y + dy);
            let sx = (p(1, -1) + 2.0 * p(1, 0) + p(1, 1)) - (p(-1, -1) + 2.0 * p(-1, 0) + p(-1, 1));
            let sy = (p(-1, 1) + 2.0 * p(0, 1) + p(1, 1)) - (p(-1, -1) + 2.0 * p(0, -1) + p(1, -1));
            gx.set(x as usize, y as usize, sx / 8.0);
            gy.set(x as usize, y as usize, sy / 8.0);
        }
    }

    (gx, gy)
}

/// Central-difference gradient at a sub-pixel location.
#[inline]
pub fn central_gradient(img: &FloatImage, x: f32, y: f32) -> (f32, f32) {
    let gx = 0.5 * (img.sample(x + 1.0, y) - img.sample(x - 1.0, y));
    let gy = 0.5 * (img.sample(x, y + 1.0) - img.sample(x, y - 1.0));
    (gx, gy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::image::GrayFrame;
    use approx::assert_relative_eq;

    #[test]
    fn test_horizontal_ramp() {
        let frame = GrayFrame::from_fn(9, 9, 0, |x, _| (x * 10) as u8).unwrap();
        let img = FloatImage::from_gray(&frame);
        let (gx, gy) = sobel_xy(&img);
        assert_relative_eq!(gx.get(4, 4), 10.0 / 255.0, epsilon = 1e-6);
        assert_relative_eq!(gy.get(4, 4), 0.0, epsilon = 1e-6);

        let (cx, cy) = central_gradient(&img, 4.0, 4.0);
        assert_relative_eq!(cx, 10.0 / 255.0, epsilon = 1e-6);
        assert_relative_eq!(cy, 0.0, epsilon = 1e-6);
    }
}
