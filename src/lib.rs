//! # Vibeflow - Sample-Based Background Subtraction
//!
//! Per-pixel, sample-based background/foreground segmentation for grayscale
//! video, with a motion-compensated variant for panning cameras.
//!
//! Each pixel keeps a small bag of historical intensity samples. A pixel is
//! classified background when the current value is close to enough of its
//! stored samples; confirmed background observations are written back
//! stochastically, both into the pixel's own bag and into a random
//! neighbour's (diffusion). The motion-compensated variant tracks a global
//! translation between consecutive frames with sparse pyramidal optical flow
//! and re-registers an oversized background canvas so a physically fixed
//! point keeps a constant canvas coordinate as the camera pans.
//!
//! ## Features
//!
//! - Per-pixel sample stores with stochastic update and neighbour diffusion
//! - Static-camera model producing one 0/255 segmentation map per frame
//! - Motion-compensated model with lazy canvas initialization
//! - Global translation estimation (Shi-Tomasi corners + pyramidal LK,
//!   median-aggregated)
//! - Deterministic operation via injectable seeded RNGs
//!
//! ## Example
//!
//! ```rust,ignore
//! use vibeflow::{BackgroundModel, ModelConfig};
//!
//! let config = ModelConfig::default();
//! let mut model = BackgroundModel::new(config, &first_frame)?;
//! for frame in frames {
//!     let mask = model.process(&frame)?; // GrayImage, 0 = bg, 255 = fg
//! }
//! ```

pub mod background;
pub mod compensated;
pub mod config;
pub mod flow;
pub mod pyramid;
pub mod samples;

// Re-exports for convenience
pub use background::BackgroundModel;
pub use compensated::MotionCompensatedModel;
pub use config::{DriftPolicy, FlowConfig, ModelConfig};
pub use flow::FlowEstimator;
pub use samples::SampleStore;

// Error types
pub use crate::error::{Error, Result};

mod error {
    use thiserror::Error;

    /// Errors that can occur in the vibeflow library
    #[derive(Error, Debug)]
    pub enum Error {
        #[error("Invalid configuration: {0}")]
        InvalidConfig(String),

        #[error(
            "Frame {frame_index} is {got_w}x{got_h}, session frames are {expected_w}x{expected_h}"
        )]
        FrameSizeMismatch {
            frame_index: u64,
            expected_w: u32,
            expected_h: u32,
            got_w: u32,
            got_h: u32,
        },

        #[error(
            "Frame {frame_index}: offset ({ox}, {oy}) pushes the {frame_w}x{frame_h} frame \
             window outside the {canvas_w}x{canvas_h} canvas"
        )]
        CanvasBounds {
            frame_index: u64,
            ox: i64,
            oy: i64,
            canvas_w: u32,
            canvas_h: u32,
            frame_w: u32,
            frame_h: u32,
        },

        #[error("Frame has zero width or height")]
        EmptyFrame,
    }

    /// Result type for vibeflow operations
    pub type Result<T> = std::result::Result<T, Error>;
}
