//! Motion-compensated background model for panning cameras.
//!
//! The sample store covers an oversized canvas instead of the frame grid.
//! An integer offset maps frame-local coordinates into the canvas; each
//! frame the offset moves by the negated global translation estimate, so a
//! physically fixed background point keeps a constant canvas coordinate as
//! the camera pans. Canvas locations are seeded lazily, exactly once, the
//! first time the frame window reveals them.

use image::{GrayImage, Luma};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, warn};

use crate::config::{DriftPolicy, FlowConfig, ModelConfig};
use crate::flow::FlowEstimator;
use crate::samples::SampleStore;
use crate::{Error, Result};

/// Background model that tracks camera panning with an oversized canvas.
pub struct MotionCompensatedModel {
    /// Model configuration.
    pub config: ModelConfig,
    flow: FlowEstimator,
    store: SampleStore,
    /// One flag per canvas position; flips false -> true exactly once.
    initialized: Vec<bool>,
    offset: (i64, i64),
    width: u32,
    height: u32,
    canvas_w: u32,
    canvas_h: u32,
    prev_frame: GrayImage,
    rng: StdRng,
    frame_index: u64,
}

impl MotionCompensatedModel {
    /// Create a model from the first frame, with an entropy-seeded RNG.
    ///
    /// Allocates the canvas at `(2 * scale_factor + 1)` frame sizes per
    /// axis, centres the frame window in it, and seeds every mapped
    /// location.
    pub fn new(
        config: ModelConfig,
        flow_config: FlowConfig,
        first_frame: &GrayImage,
    ) -> Result<Self> {
        Self::with_rng(config, flow_config, first_frame, StdRng::from_entropy())
    }

    /// Create a model with a caller-provided RNG, for deterministic runs.
    pub fn with_rng(
        config: ModelConfig,
        flow_config: FlowConfig,
        first_frame: &GrayImage,
        mut rng: StdRng,
    ) -> Result<Self> {
        config.validate()?;
        flow_config.validate()?;
        let width = first_frame.width();
        let height = first_frame.height();
        if width == 0 || height == 0 {
            return Err(Error::EmptyFrame);
        }

        let span = 2 * config.scale_factor + 1;
        let canvas_w = width * span;
        let canvas_h = height * span;
        let offset = (
            (width * config.scale_factor) as i64,
            (height * config.scale_factor) as i64,
        );

        let mut store = SampleStore::new(canvas_w, canvas_h, &config);
        let mut initialized = vec![false; canvas_w as usize * canvas_h as usize];
        for y in 0..height {
            for x in 0..width {
                store.seed(x, y, offset, first_frame, &mut rng);
                let index = canvas_index(x, y, offset, canvas_w);
                initialized[index] = true;
            }
        }

        Ok(Self {
            flow: FlowEstimator::new(flow_config),
            config,
            store,
            initialized,
            offset,
            width,
            height,
            canvas_w,
            canvas_h,
            prev_frame: first_frame.clone(),
            rng,
            frame_index: 0,
        })
    }

    /// Session frame dimensions.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Canvas dimensions, fixed at construction.
    pub fn canvas_dimensions(&self) -> (u32, u32) {
        (self.canvas_w, self.canvas_h)
    }

    /// Current registration offset mapping frame to canvas coordinates.
    pub fn offset(&self) -> (i64, i64) {
        self.offset
    }

    /// Number of frames processed so far (the seed frame is frame 0).
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Read access to the canvas sample store.
    pub fn sample_store(&self) -> &SampleStore {
        &self.store
    }

    /// Classify one frame through the canvas mapping and absorb its
    /// background observations.
    ///
    /// Estimates the global translation against the previously processed
    /// frame, re-registers the canvas, lazily seeds newly revealed
    /// locations from the current frame, then classifies and updates every
    /// frame-local pixel exactly as the static model does, indexed through
    /// the canvas mapping.
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

        let (dx, dy) = self.flow.estimate(Some(&self.prev_frame), frame);
        debug!(frame = self.frame_index, dx, dy, "shifting background canvas");
        self.register(dx, dy)?;

        // Lazy expansion: newly revealed terrain gets a fresh model exactly
        // once, on first observation.
        for y in 0..self.height {
            for x in 0..self.width {
                let index = canvas_index(x, y, self.offset, self.canvas_w);
                if !self.initialized[index] {
                    self.store.seed(x, y, self.offset, frame, &mut self.rng);
                    self.initialized[index] = true;
                }
            }
        }

        let mut map = GrayImage::new(self.width, self.height);
        for y in 0..self.height {
            for x in 0..self.width {
                let value = frame.get_pixel(x, y)[0];
                let background = self.store.classify(x, y, self.offset, value);
                map.put_pixel(x, y, Luma([if background { 0 } else { 255 }]));
            }
        }

        for y in 0..self.height {
            for x in 0..self.width {
                if map.get_pixel(x, y)[0] == 0 {
                    let value = frame.get_pixel(x, y)[0];
                    self.store.update(
                        x,
                        y,
                        self.offset,
                        self.width,
                        self.height,
                        value,
                        &mut self.rng,
                    );
                }
            }
        }

        self.prev_frame = frame.clone();

        let foreground = map.as_raw().iter().filter(|&&v| v != 0).count();
        debug!(
            frame = self.frame_index,
            foreground, "segmented frame (motion-compensated model)"
        );
        Ok(map)
    }

    /// Apply the estimated translation to the registration offset and
    /// enforce the drift policy.
    ///
    /// Subtracting the observed motion keeps a physically fixed background
    /// point's canvas coordinate constant as the camera pans.
    fn register(&mut self, dx: i32, dy: i32) -> Result<()> {
        let ox = self.offset.0 - dx as i64;
        let oy = self.offset.1 - dy as i64;

        let max_ox = (self.canvas_w - self.width) as i64;
        let max_oy = (self.canvas_h - self.height) as i64;
        let in_bounds = (0..=max_ox).contains(&ox) && (0..=max_oy).contains(&oy);

        if in_bounds {
            self.offset = (ox, oy);
            return Ok(());
        }

        match self.config.drift_policy {
            DriftPolicy::Fail => Err(Error::CanvasBounds {
                frame_index: self.frame_index,
                ox,
                oy,
                canvas_w: self.canvas_w,
                canvas_h: self.canvas_h,
                frame_w: self.width,
                frame_h: self.height,
            }),
            DriftPolicy::Clamp => {
                let clamped = (ox.clamp(0, max_ox), oy.clamp(0, max_oy));
                warn!(
                    frame = self.frame_index,
                    ox,
                    oy,
                    clamped_ox = clamped.0,
                    clamped_oy = clamped.1,
                    "drift exhausted the canvas, clamping registration"
                );
                self.offset = clamped;
                Ok(())
            }
        }
    }
}

#[inline]
fn canvas_index(x: u32, y: u32, offset: (i64, i64), canvas_w: u32) -> usize {
    let cx = (x as i64 + offset.0) as usize;
    let cy = (y as i64 + offset.1) as usize;
    cy * canvas_w as usize + cx
}
