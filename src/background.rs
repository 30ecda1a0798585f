//! Static-camera background model.

use image::{GrayImage, Luma};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use crate::config::ModelConfig;
use crate::samples::SampleStore;
use crate::{Error, Result};

/// Sample-based background model over a stationary frame grid.
///
/// Owns all per-session mutable state: the per-pixel sample store, the
/// session dimensions, the RNG driving stochastic updates, and the frame
/// counter. Produces one 0/255 segmentation map per processed frame.
/// Frames must be processed strictly in sequence: classification for frame
/// `t` observes the model exactly as updated through frame `t - 1`.
pub struct BackgroundModel {
    /// Model configuration.
    pub config: ModelConfig,
    store: SampleStore,
    width: u32,
    height: u32,
    rng: StdRng,
    frame_index: u64,
}

impl BackgroundModel {
    /// Create a model seeded from the first frame of the session, with an
    /// entropy-seeded RNG.
    pub fn new(config: ModelConfig, first_frame: &GrayImage) -> Result<Self> {
        Self::with_rng(config, first_frame, StdRng::from_entropy())
    }

    /// Create a model with a caller-provided RNG, for deterministic runs.
    pub fn with_rng(config: ModelConfig, first_frame: &GrayImage, mut rng: StdRng) -> Result<Self> {
        config.validate()?;
        let width = first_frame.width();
        let height = first_frame.height();
        if width == 0 || height == 0 {
            return Err(Error::EmptyFrame);
        }

        let mut store = SampleStore::new(width, height, &config);
        for y in 0..height {
            for x in 0..width {
                store.seed(x, y, (0, 0), first_frame, &mut rng);
            }
        }

        Ok(Self {
            config,
            store,
            width,
            height,
            rng,
            frame_index: 0,
        })
    }

    /// Session frame dimensions.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Number of frames processed so far (the seed frame is frame 0).
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Read access to the per-pixel sample store.
    pub fn sample_store(&self) -> &SampleStore {
        &self.store
    }

    /// Classify one frame and absorb its background observations.
    ///
    /// Classification runs first, read-only, over the whole frame; the
    /// stochastic updates are applied afterwards so that no diffusion write
    /// can influence a classification within the same frame.
    pub fn process(&mut self, frame: &GrayImage) -> Result<GrayImage> {
        self.frame_index += 1;
        if frame.width() != self.width || frame.height() != self.height {
            return Err(Error::FrameSizeMismatch {
                frame_index: self.frame_index,
                expected_w: self.width,
                expected_h: self.height,
                got_w: frame.width(),
                got_h: frame.height(),
            });
        }

        let mut map = GrayImage::new(self.width, self.height);
        for y in 0..self.height {
            for x in 0..self.width {
                let value = frame.get_pixel(x, y)[0];
                let background = self.store.classify(x, y, (0, 0), value);
                map.put_pixel(x, y, Luma([if background { 0 } else { 255 }]));
            }
        }

        for y in 0..self.height {
            for x in 0..self.width {
                if map.get_pixel(x, y)[0] == 0 {
                    let value = frame.get_pixel(x, y)[0];
                    self.store
                        .update(x, y, (0, 0), self.width, self.height, value, &mut self.rng);
                }
            }
        }

        let foreground = map.as_raw().iter().filter(|&&v| v != 0).count();
        debug!(
            frame = self.frame_index,
            foreground, "segmented frame (static model)"
        );
        Ok(map)
    }
}
