//! Configuration for the segmentation models and the flow estimator.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Policy applied when cumulative camera drift would push the mapped frame
/// window outside the allocated background canvas.
///
/// The canvas is sized once at construction from
/// [`ModelConfig::scale_factor`] and never reallocated, so sustained panning
/// in one direction eventually exhausts it. There is no silent out-of-range
/// access: the model either reports the condition or pins the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DriftPolicy {
    /// Abort the session with [`Error::CanvasBounds`]. Default.
    #[default]
    Fail,
    /// Clamp the offset so the frame window stays inside the canvas,
    /// accepting loss of registration at the touched border.
    Clamp,
}

/// Configuration for [`BackgroundModel`](crate::BackgroundModel) and
/// [`MotionCompensatedModel`](crate::MotionCompensatedModel).
///
/// Fixed at construction and immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Number of intensity samples kept per pixel.
    pub nbsamples: usize,

    /// Matches required for a pixel to classify as background.
    pub req_matches: usize,

    /// Absolute intensity distance below which a sample counts as a match.
    pub d_thresh: u8,

    /// Subsampling factor: each stochastic update event fires with
    /// probability 1/ssample.
    pub ssample: u32,

    /// Canvas radius in frame sizes. The canvas spans
    /// `(2 * scale_factor + 1)` frames per axis; must be even.
    /// Only used by the motion-compensated model.
    pub scale_factor: u32,

    /// What to do when drift exhausts the canvas.
    pub drift_policy: DriftPolicy,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            nbsamples: 20,
            req_matches: 2,
            d_thresh: 20,
            ssample: 16,
            scale_factor: 2,
            drift_policy: DriftPolicy::default(),
        }
    }
}

impl ModelConfig {
    /// Validate the configuration.
    ///
    /// Called by the model constructors; exposed for callers that build
    /// configs from external sources.
    pub fn validate(&self) -> Result<()> {
        if self.nbsamples < 2 {
            return Err(Error::InvalidConfig(format!(
                "nbsamples must be at least 2, got {}",
                self.nbsamples
            )));
        }
        if self.req_matches == 0 || self.req_matches > self.nbsamples {
            return Err(Error::InvalidConfig(format!(
                "req_matches must be in 1..={}, got {}",
                self.nbsamples, self.req_matches
            )));
        }
        if self.d_thresh == 0 {
            return Err(Error::InvalidConfig(
                "d_thresh must be positive".to_string(),
            ));
        }
        if self.ssample == 0 {
            return Err(Error::InvalidConfig(
                "ssample must be positive".to_string(),
            ));
        }
        if self.scale_factor == 0 || self.scale_factor % 2 != 0 {
            return Err(Error::InvalidConfig(format!(
                "scale_factor must be positive and even, got {}",
                self.scale_factor
            )));
        }
        Ok(())
    }
}

/// Tuning for [`FlowEstimator`](crate::FlowEstimator): sparse corner
/// detection in the previous frame plus iterative pyramidal Lucas-Kanade
/// tracking into the current one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Maximum number of corners to track per frame pair.
    pub max_corners: usize,

    /// Corner response threshold relative to the strongest response in the
    /// frame (0..1). Candidates below `quality_level * max_response` are
    /// dropped.
    pub quality_level: f32,

    /// Minimum euclidean distance in pixels between accepted corners.
    pub min_distance: f32,

    /// Side length of the structure-tensor window used for the corner
    /// response.
    pub block_size: usize,

    /// Side length of the Lucas-Kanade tracking window.
    pub window_size: usize,

    /// Pyramid depth: number of half-resolution levels above the full-size
    /// image. Depth 2 means tracking runs over 3 levels.
    pub pyramid_levels: usize,

    /// Maximum Lucas-Kanade iterations per pyramid level.
    pub max_iterations: usize,

    /// Convergence tolerance: iteration stops once the incremental update
    /// falls below this length in pixels.
    pub epsilon: f32,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            max_corners: 100,
            quality_level: 0.3,
            min_distance: 7.0,
            block_size: 7,
            window_size: 15,
            pyramid_levels: 2,
            max_iterations: 10,
            epsilon: 0.03,
        }
    }
}

impl FlowConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_corners == 0 {
            return Err(Error::InvalidConfig(
                "max_corners must be positive".to_string(),
            ));
        }
        if !(self.quality_level > 0.0 && self.quality_level <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "quality_level must be in (0, 1], got {}",
                self.quality_level
            )));
        }
        if self.block_size == 0 || self.window_size == 0 {
            return Err(Error::InvalidConfig(
                "block_size and window_size must be positive".to_string(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(Error::InvalidConfig(
                "max_iterations must be positive".to_string(),
            ));
        }
        if !(self.epsilon > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "epsilon must be positive, got {}",
                self.epsilon
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_model_config_is_valid() {
        assert!(ModelConfig::default().validate().is_ok());
    }

    #[test]
    fn test_default_flow_config_is_valid() {
        assert!(FlowConfig::default().validate().is_ok());
    }

    #[test]
    fn test_odd_scale_factor_rejected() {
        let config = ModelConfig {
            scale_factor: 3,
            ..ModelConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_req_matches_above_nbsamples_rejected() {
        let config = ModelConfig {
            nbsamples: 4,
            req_matches: 5,
            ..ModelConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_ssample_rejected() {
        let config = ModelConfig {
            ssample: 0,
            ..ModelConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_quality_level_bounds() {
        let mut config = FlowConfig::default();
        config.quality_level = 0.0;
        assert!(config.validate().is_err());
        config.quality_level = 1.5;
        assert!(config.validate().is_err());
        config.quality_level = 1.0;
        assert!(config.validate().is_ok());
    }
}
