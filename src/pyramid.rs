//! Half-resolution image pyramids for pyramidal Lucas-Kanade tracking.

use image::GrayImage;

/// One pyramid level: an owned f32 intensity grid.
pub struct Level {
    data: Vec<f32>,
    width: u32,
    height: u32,
}

impl Level {
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Read the pixel at integer coordinates, clamped to the border.
    #[inline]
    pub fn get(&self, x: i64, y: i64) -> f32 {
        let cx = x.clamp(0, self.width as i64 - 1) as usize;
        let cy = y.clamp(0, self.height as i64 - 1) as usize;
        self.data[cy * self.width as usize + cx]
    }

    /// Bilinear sample at sub-pixel coordinates, clamped to the border.
    pub fn sample(&self, x: f32, y: f32) -> f32 {
        let x = x.clamp(0.0, self.width as f32 - 1.0);
        let y = y.clamp(0.0, self.height as f32 - 1.0);
        let x0 = x.floor() as i64;
        let y0 = y.floor() as i64;
        let fx = x - x0 as f32;
        let fy = y - y0 as f32;
        let p00 = self.get(x0, y0);
        let p10 = self.get(x0 + 1, y0);
        let p01 = self.get(x0, y0 + 1);
        let p11 = self.get(x0 + 1, y0 + 1);
        (1.0 - fx) * (1.0 - fy) * p00
            + fx * (1.0 - fy) * p10
            + (1.0 - fx) * fy * p01
            + fx * fy * p11
    }
}

/// Image pyramid: level 0 is the full-resolution frame, each further level
/// halves the resolution by 2x2 averaging.
pub struct Pyramid {
    pub levels: Vec<Level>,
}

impl Pyramid {
    /// Build a pyramid with `extra_levels` half-resolution levels above the
    /// full-size frame. Levels stop early once a dimension would collapse
    /// below 2 pixels.
    pub fn build(frame: &GrayImage, extra_levels: usize) -> Self {
        let width = frame.width();
        let height = frame.height();
        let data: Vec<f32> = frame.as_raw().iter().map(|&v| v as f32).collect();
        let mut levels = vec![Level {
            data,
            width,
            height,
        }];

        for _ in 0..extra_levels {
            let prev = &levels[levels.len() - 1];
            if prev.width < 4 || prev.height < 4 {
                break;
            }
            let width = prev.width / 2;
            let height = prev.height / 2;
            let mut data = Vec::with_capacity(width as usize * height as usize);
            for y in 0..height {
                for x in 0..width {
                    let sx = (2 * x) as i64;
                    let sy = (2 * y) as i64;
                    let mean = (prev.get(sx, sy)
                        + prev.get(sx + 1, sy)
                        + prev.get(sx, sy + 1)
                        + prev.get(sx + 1, sy + 1))
                        * 0.25;
                    data.push(mean);
                }
            }
            levels.push(Level {
                data,
                width,
                height,
            });
        }

        Pyramid { levels }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_level_count_and_dims() {
        let frame = GrayImage::new(64, 48);
        let pyr = Pyramid::build(&frame, 2);
        assert_eq!(pyr.levels.len(), 3);
        assert_eq!((pyr.levels[0].width(), pyr.levels[0].height()), (64, 48));
        assert_eq!((pyr.levels[1].width(), pyr.levels[1].height()), (32, 24));
        assert_eq!((pyr.levels[2].width(), pyr.levels[2].height()), (16, 12));
    }

    #[test]
    fn test_small_frame_stops_early() {
        let frame = GrayImage::new(5, 5);
        let pyr = Pyramid::build(&frame, 4);
        // 5x5 -> 2x2, then too small to halve again.
        assert_eq!(pyr.levels.len(), 2);
    }

    #[test]
    fn test_downsample_is_block_mean() {
        let frame = GrayImage::from_fn(4, 4, |x, y| image::Luma([(x + 4 * y) as u8 * 10]));
        let pyr = Pyramid::build(&frame, 1);
        let l1 = &pyr.levels[1];
        // Top-left 2x2 block of level 0: 0, 10, 40, 50 -> mean 25.
        assert_relative_eq!(l1.get(0, 0), 25.0, epsilon = 1e-5);
    }

    #[test]
    fn test_sample_at_integer_matches_get() {
        let frame = GrayImage::from_fn(4, 4, |x, y| image::Luma([(x * 50 + y * 3) as u8]));
        let pyr = Pyramid::build(&frame, 0);
        let l0 = &pyr.levels[0];
        assert_relative_eq!(l0.sample(2.0, 3.0), l0.get(2, 3), epsilon = 1e-5);
    }

    #[test]
    fn test_sample_midpoint_and_clamping() {
        let frame = GrayImage::from_fn(2, 2, |x, y| image::Luma([((x + 2 * y) * 10) as u8]));
        let pyr = Pyramid::build(&frame, 0);
        let l0 = &pyr.levels[0];
        // Midpoint of 0, 10, 20, 30 is 15.
        assert_relative_eq!(l0.sample(0.5, 0.5), 15.0, epsilon = 1e-5);
        // Out-of-range coordinates clamp to the nearest corner.
        assert_relative_eq!(l0.sample(9.0, 9.0), 30.0, epsilon = 1e-5);
        assert_relative_eq!(l0.sample(-3.0, -3.0), 0.0, epsilon = 1e-5);
    }
}
