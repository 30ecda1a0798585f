//! Per-pixel sample store: the bag of historical intensities behind every
//! classification decision.
//!
//! The store is one flat, contiguous byte buffer indexed row-major over
//! `(position, slot)`. Positions may belong to a plain frame grid or to the
//! oversized canvas of the motion-compensated model; in the latter case the
//! caller supplies the integer offset that maps frame-local coordinates into
//! store coordinates.

use image::GrayImage;
use rand::Rng;

use crate::config::ModelConfig;

/// Fixed-size bag of intensity samples per store position, with the
/// classification and stochastic-update primitives of the model.
pub struct SampleStore {
    /// Samples in row-major (position, slot) order.
    /// Length = width * height * nbsamples.
    data: Vec<u8>,
    width: u32,
    height: u32,
    nbsamples: usize,
    req_matches: usize,
    d_thresh: u8,
    ssample: u32,
}

impl SampleStore {
    /// Allocate a zeroed store covering `width * height` positions.
    ///
    /// `config` must already be validated.
    pub fn new(width: u32, height: u32, config: &ModelConfig) -> Self {
        let positions = width as usize * height as usize;
        Self {
            data: vec![0; positions * config.nbsamples],
            width,
            height,
            nbsamples: config.nbsamples,
            req_matches: config.req_matches,
            d_thresh: config.d_thresh,
            ssample: config.ssample,
        }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of slots per position.
    #[inline]
    pub fn nbsamples(&self) -> usize {
        self.nbsamples
    }

    /// Map a frame-local coordinate through `offset` to the start index of
    /// that position's slot run.
    #[inline]
    fn base(&self, x: u32, y: u32, offset: (i64, i64)) -> usize {
        let sx = x as i64 + offset.0;
        let sy = y as i64 + offset.1;
        debug_assert!(
            sx >= 0 && sx < self.width as i64 && sy >= 0 && sy < self.height as i64,
            "mapped coordinate ({sx}, {sy}) outside {}x{} store",
            self.width,
            self.height,
        );
        (sy as usize * self.width as usize + sx as usize) * self.nbsamples
    }

    /// Borrow the slot run of a store position (frame-local coordinate plus
    /// offset). Used by tests to snapshot a pixel's model.
    pub fn samples(&self, x: u32, y: u32, offset: (i64, i64)) -> &[u8] {
        let base = self.base(x, y, offset);
        &self.data[base..base + self.nbsamples]
    }

    /// Seed the store position mapped from frame pixel `(x, y)`.
    ///
    /// Slots 0 and 1 take the pixel's own observed value; every remaining
    /// slot takes the value of an independently, uniformly chosen
    /// 8-connected neighbour of `(x, y)` in `frame` (fresh draw per slot).
    /// The neighbour values inject spatial diversity so early classification
    /// is not brittle to a single noisy reading.
    pub fn seed<R: Rng>(
        &mut self,
        x: u32,
        y: u32,
        offset: (i64, i64),
        frame: &GrayImage,
        rng: &mut R,
    ) {
        let base = self.base(x, y, offset);
        let own = frame.get_pixel(x, y)[0];
        self.data[base] = own;
        self.data[base + 1] = own;
        for slot in 2..self.nbsamples {
            let (nx, ny) = random_neighbour(x, y, frame.width(), frame.height(), rng);
            self.data[base + slot] = frame.get_pixel(nx, ny)[0];
        }
    }

    /// Classify `value` against the store position mapped from `(x, y)`.
    ///
    /// Returns true (background) iff at least `req_matches` slots lie within
    /// `d_thresh` of `value`. The loop exits as soon as the count is
    /// reached; the boolean outcome is independent of slot order.
    pub fn classify(&self, x: u32, y: u32, offset: (i64, i64), value: u8) -> bool {
        let base = self.base(x, y, offset);
        let mut count = 0;
        for &sample in &self.data[base..base + self.nbsamples] {
            let distance = (value as i16 - sample as i16).abs();
            if distance < self.d_thresh as i16 {
                count += 1;
                if count >= self.req_matches {
                    return true;
                }
            }
        }
        false
    }

    /// Stochastically absorb a confirmed background observation.
    ///
    /// Must only be called for pixels that classified background. Two
    /// independent events, each fired when a uniform draw in `[0, ssample)`
    /// lands on zero:
    ///
    /// - self-update: overwrite one uniformly chosen slot of this position
    ///   with `value`;
    /// - diffusion: pick one uniformly random 8-connected neighbour of
    ///   `(x, y)` within the `frame_w` x `frame_h` grid, and overwrite one
    ///   uniformly chosen slot of that neighbour's mapped position.
    pub fn update<R: Rng>(
        &mut self,
        x: u32,
        y: u32,
        offset: (i64, i64),
        frame_w: u32,
        frame_h: u32,
        value: u8,
        rng: &mut R,
    ) {
        if rng.gen_range(0..self.ssample) == 0 {
            let base = self.base(x, y, offset);
            let slot = rng.gen_range(0..self.nbsamples);
            self.data[base + slot] = value;
        }
        if rng.gen_range(0..self.ssample) == 0 {
            let (nx, ny) = random_neighbour(x, y, frame_w, frame_h, rng);
            let base = self.base(nx, ny, offset);
            let slot = rng.gen_range(0..self.nbsamples);
            self.data[base + slot] = value;
        }
    }
}

/// Uniformly choose one 8-connected neighbour of `(x, y)` inside a
/// `width` x `height` grid. Border pixels draw from their clamped candidate
/// set; `(x, y)` itself is never returned.
fn random_neighbour<R: Rng>(x: u32, y: u32, width: u32, height: u32, rng: &mut R) -> (u32, u32) {
    let mut candidates = [(0u32, 0u32); 8];
    let mut n = 0;
    for dy in -1i64..=1 {
        for dx in -1i64..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            let cx = x as i64 + dx;
            let cy = y as i64 + dy;
            if cx >= 0 && cx < width as i64 && cy >= 0 && cy < height as i64 {
                candidates[n] = (cx as u32, cy as u32);
                n += 1;
            }
        }
    }
    candidates[rng.gen_range(0..n)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn constant_frame(width: u32, height: u32, value: u8) -> GrayImage {
        GrayImage::from_pixel(width, height, image::Luma([value]))
    }

    fn default_store(width: u32, height: u32) -> SampleStore {
        SampleStore::new(width, height, &ModelConfig::default())
    }

    #[test]
    fn test_seed_fills_every_slot() {
        let frame = constant_frame(5, 5, 90);
        let mut store = default_store(5, 5);
        let mut rng = StdRng::seed_from_u64(7);
        for y in 0..5 {
            for x in 0..5 {
                store.seed(x, y, (0, 0), &frame, &mut rng);
            }
        }
        for y in 0..5 {
            for x in 0..5 {
                let samples = store.samples(x, y, (0, 0));
                assert_eq!(samples.len(), 20);
                assert!(samples.iter().all(|&s| s == 90));
            }
        }
    }

    #[test]
    fn test_seed_first_two_slots_are_own_value() {
        // Gradient frame so the pixel's own value differs from neighbours.
        let frame = GrayImage::from_fn(4, 4, |x, y| image::Luma([(x * 40 + y * 10) as u8]));
        let mut store = default_store(4, 4);
        let mut rng = StdRng::seed_from_u64(3);
        store.seed(2, 1, (0, 0), &frame, &mut rng);
        let samples = store.samples(2, 1, (0, 0));
        let own = frame.get_pixel(2, 1)[0];
        assert_eq!(samples[0], own);
        assert_eq!(samples[1], own);
    }

    #[test]
    fn test_seed_neighbour_slots_come_from_neighbourhood() {
        let frame = GrayImage::from_fn(8, 8, |x, y| image::Luma([(x + 8 * y) as u8]));
        let mut store = default_store(8, 8);
        let mut rng = StdRng::seed_from_u64(11);
        store.seed(4, 4, (0, 0), &frame, &mut rng);
        // Every value 4+8*4 ± {0,1,7,8,9} is a legal neighbourhood read.
        let own = 4 + 8 * 4u32;
        let legal: Vec<u8> = [-9i32, -8, -7, -1, 1, 7, 8, 9]
            .iter()
            .map(|d| (own as i32 + d) as u8)
            .collect();
        for &s in &store.samples(4, 4, (0, 0))[2..] {
            assert!(legal.contains(&s), "sample {s} not from 8-neighbourhood");
        }
    }

    #[test]
    fn test_classify_matches_and_misses() {
        let frame = constant_frame(3, 3, 100);
        let mut store = default_store(3, 3);
        let mut rng = StdRng::seed_from_u64(1);
        store.seed(1, 1, (0, 0), &frame, &mut rng);
        // Within d_thresh = 20 of every stored sample.
        assert!(store.classify(1, 1, (0, 0), 100));
        assert!(store.classify(1, 1, (0, 0), 119));
        assert!(store.classify(1, 1, (0, 0), 81));
        // Exactly at the threshold: |120 - 100| == 20, strict comparison.
        assert!(!store.classify(1, 1, (0, 0), 120));
        assert!(!store.classify(1, 1, (0, 0), 200));
    }

    #[test]
    fn test_classify_monotonic_in_d_thresh() {
        // Widening d_thresh never turns a background pixel foreground.
        let frame = GrayImage::from_fn(3, 3, |x, y| image::Luma([(x * 30 + y * 17) as u8]));
        let mut seeded: Vec<SampleStore> = Vec::new();
        for d_thresh in [5u8, 10, 20, 40, 80] {
            let config = ModelConfig {
                d_thresh,
                ..ModelConfig::default()
            };
            let mut store = SampleStore::new(3, 3, &config);
            // Same seed per store so the sample sets are identical.
            let mut seeding = StdRng::seed_from_u64(42);
            for y in 0..3 {
                for x in 0..3 {
                    store.seed(x, y, (0, 0), &frame, &mut seeding);
                }
            }
            seeded.push(store);
        }
        for value in [0u8, 33, 64, 120, 250] {
            let mut prev_background = false;
            for store in &seeded {
                let background = store.classify(1, 1, (0, 0), value);
                assert!(
                    background || !prev_background,
                    "widened threshold reclassified value {value} as foreground"
                );
                prev_background = background;
            }
        }
    }

    #[test]
    fn test_classify_req_matches_boundary() {
        // Centre pixel 10, neighbours 200: seeding leaves slots 0/1 at 10
        // and every other slot at 200, so a value near 10 has exactly two
        // matching slots.
        let mut mixed = constant_frame(3, 3, 200);
        mixed.put_pixel(1, 1, image::Luma([10]));
        let mut rng = StdRng::seed_from_u64(2);

        let two_matches = ModelConfig::default();
        let mut store = SampleStore::new(3, 3, &two_matches);
        store.seed(1, 1, (0, 0), &mixed, &mut rng);
        assert!(store.classify(1, 1, (0, 0), 15)); // matches slots 0 and 1
        assert!(!store.classify(1, 1, (0, 0), 35)); // matches nothing

        let three_matches = ModelConfig {
            req_matches: 3,
            ..ModelConfig::default()
        };
        let mut store = SampleStore::new(3, 3, &three_matches);
        store.seed(1, 1, (0, 0), &mixed, &mut rng);
        // Two matching slots are no longer enough.
        assert!(!store.classify(1, 1, (0, 0), 15));
        // A value matching the 200-valued slots clears the bar easily.
        assert!(store.classify(1, 1, (0, 0), 205));
    }

    #[test]
    fn test_update_self_event_overwrites_one_slot() {
        let frame = constant_frame(3, 3, 50);
        // ssample = 1 makes both events certain.
        let config = ModelConfig {
            ssample: 1,
            ..ModelConfig::default()
        };
        let mut store = SampleStore::new(3, 3, &config);
        let mut rng = StdRng::seed_from_u64(9);
        store.seed(1, 1, (0, 0), &frame, &mut rng);
        store.update(1, 1, (0, 0), 3, 3, 200, &mut rng);
        let own: Vec<u8> = store.samples(1, 1, (0, 0)).to_vec();
        assert_eq!(own.iter().filter(|&&s| s == 200).count(), 1);
        assert_eq!(own.iter().filter(|&&s| s == 50).count(), 19);
    }

    #[test]
    fn test_update_diffuses_into_a_neighbour() {
        let frame = constant_frame(3, 3, 50);
        let config = ModelConfig {
            ssample: 1,
            ..ModelConfig::default()
        };
        let mut store = SampleStore::new(3, 3, &config);
        let mut rng = StdRng::seed_from_u64(13);
        for y in 0..3 {
            for x in 0..3 {
                store.seed(x, y, (0, 0), &frame, &mut rng);
            }
        }
        store.update(1, 1, (0, 0), 3, 3, 222, &mut rng);
        // Exactly one neighbour position holds one sample of 222.
        let mut touched = 0;
        for y in 0..3 {
            for x in 0..3 {
                if (x, y) == (1, 1) {
                    continue;
                }
                let hits = store
                    .samples(x, y, (0, 0))
                    .iter()
                    .filter(|&&s| s == 222)
                    .count();
                assert!(hits <= 1);
                touched += hits;
            }
        }
        assert_eq!(touched, 1);
    }

    #[test]
    fn test_update_never_fires_with_huge_ssample() {
        let frame = constant_frame(3, 3, 50);
        let config = ModelConfig {
            ssample: u32::MAX,
            ..ModelConfig::default()
        };
        let mut store = SampleStore::new(3, 3, &config);
        let mut rng = StdRng::seed_from_u64(17);
        for y in 0..3 {
            for x in 0..3 {
                store.seed(x, y, (0, 0), &frame, &mut rng);
            }
        }
        for _ in 0..100 {
            store.update(1, 1, (0, 0), 3, 3, 222, &mut rng);
        }
        for y in 0..3 {
            for x in 0..3 {
                assert!(store.samples(x, y, (0, 0)).iter().all(|&s| s == 50));
            }
        }
    }

    #[test]
    fn test_offset_maps_into_larger_store() {
        let frame = constant_frame(4, 4, 77);
        let mut store = default_store(12, 12);
        let mut rng = StdRng::seed_from_u64(21);
        let offset = (4i64, 4i64);
        for y in 0..4 {
            for x in 0..4 {
                store.seed(x, y, offset, &frame, &mut rng);
            }
        }
        // The mapped window is seeded; a corner outside it is untouched.
        assert!(store.samples(0, 0, offset).iter().all(|&s| s == 77));
        assert!(store.samples(0, 0, (0, 0)).iter().all(|&s| s == 0));
        assert!(store.classify(0, 0, offset, 77));
    }

    #[test]
    fn test_random_neighbour_excludes_self_and_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64(23);
        // Corner pixel: only 3 candidates.
        for _ in 0..200 {
            let (nx, ny) = random_neighbour(0, 0, 5, 5, &mut rng);
            assert!((nx, ny) != (0, 0));
            assert!(nx <= 1 && ny <= 1);
        }
        // Interior pixel: all 8 candidates seen eventually.
        let mut seen = std::collections::HashSet::new();
        for _ in 0..500 {
            seen.insert(random_neighbour(2, 2, 5, 5, &mut rng));
        }
        assert_eq!(seen.len(), 8);
        assert!(!seen.contains(&(2, 2)));
    }
}
