//! Global translation estimation between consecutive grayscale frames.
//!
//! Strong corners are detected in the previous frame (Shi-Tomasi
//! min-eigenvalue response with quality-relative thresholding and minimum
//! separation), tracked into the current frame with iterative pyramidal
//! Lucas-Kanade, and the surviving displacements are aggregated with a
//! componentwise median. The median, not the mean, rejects the minority of
//! points mistracked because they sit on moving foreground or get occluded.

use image::GrayImage;
use nalgebra::Vector2;
use tracing::{debug, warn};

use crate::config::FlowConfig;
use crate::pyramid::{Level, Pyramid};

/// Estimates one integer `(dx, dy)` camera translation per frame pair.
pub struct FlowEstimator {
    config: FlowConfig,
}

impl FlowEstimator {
    /// Create an estimator. `config` must already be validated.
    pub fn new(config: FlowConfig) -> Self {
        Self { config }
    }

    /// Estimate the global translation from `prev` to `curr`.
    ///
    /// Returns `(0, 0)` when there is no previous frame or when no corner
    /// survives tracking; both are normal conditions, not errors.
    pub fn estimate(&self, prev: Option<&GrayImage>, curr: &GrayImage) -> (i32, i32) {
        let Some(prev) = prev else {
            return (0, 0);
        };

        let prev_pyr = Pyramid::build(prev, self.config.pyramid_levels);
        let curr_pyr = Pyramid::build(curr, self.config.pyramid_levels);

        let corners = self.detect_corners(&prev_pyr.levels[0]);
        debug!(corners = corners.len(), "detected corners for flow");

        let mut dxs: Vec<f32> = Vec::with_capacity(corners.len());
        let mut dys: Vec<f32> = Vec::with_capacity(corners.len());
        for corner in &corners {
            if let Some(tracked) = self.track_corner(&prev_pyr, &curr_pyr, *corner) {
                let displacement = tracked - corner;
                dxs.push(displacement.x);
                dys.push(displacement.y);
            }
        }

        if dxs.is_empty() {
            warn!("no corners survived tracking, assuming zero translation");
            return (0, 0);
        }

        let dx = median(&mut dxs) as i32;
        let dy = median(&mut dys) as i32;
        debug!(dx, dy, tracked = dxs.len(), "estimated global translation");
        (dx, dy)
    }

    /// Shi-Tomasi corner detection on the full-resolution previous frame.
    ///
    /// The corner response is the smaller eigenvalue of the structure tensor
    /// accumulated over a `block_size` window. Candidates below
    /// `quality_level` of the strongest response are dropped, the rest are
    /// greedily thinned to `min_distance` separation, strongest first.
    fn detect_corners(&self, level: &Level) -> Vec<Vector2<f32>> {
        let width = level.width() as i64;
        let height = level.height() as i64;
        let half = (self.config.block_size / 2) as i64;
        let margin = half + 1;

        let mut candidates: Vec<(f32, Vector2<f32>)> = Vec::new();
        let mut max_response = 0.0f32;

        for y in margin..height - margin {
            for x in margin..width - margin {
                let mut sxx = 0.0f32;
                let mut sxy = 0.0f32;
                let mut syy = 0.0f32;
                for wy in -half..=half {
                    for wx in -half..=half {
                        let px = x + wx;
                        let py = y + wy;
                        let ix = (level.get(px + 1, py) - level.get(px - 1, py)) * 0.5;
                        let iy = (level.get(px, py + 1) - level.get(px, py - 1)) * 0.5;
                        sxx += ix * ix;
                        sxy += ix * iy;
                        syy += iy * iy;
                    }
                }
                // Smaller eigenvalue of [[sxx, sxy], [sxy, syy]].
                let trace = sxx + syy;
                let delta = ((sxx - syy) * (sxx - syy) + 4.0 * sxy * sxy).sqrt();
                let response = 0.5 * (trace - delta);
                if response > 0.0 {
                    max_response = max_response.max(response);
                    candidates.push((response, Vector2::new(x as f32, y as f32)));
                }
            }
        }

        if candidates.is_empty() {
            return Vec::new();
        }

        let threshold = self.config.quality_level * max_response;
        candidates.retain(|(response, _)| *response >= threshold);
        candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let min_dist_sq = self.config.min_distance * self.config.min_distance;
        let mut accepted: Vec<Vector2<f32>> = Vec::new();
        for (_, position) in candidates {
            if accepted.len() >= self.config.max_corners {
                break;
            }
            let separated = accepted
                .iter()
                .all(|other| (position - other).norm_squared() >= min_dist_sq);
            if separated {
                accepted.push(position);
            }
        }
        accepted
    }

    /// Track one corner from `prev_pyr` into `curr_pyr` with iterative
    /// pyramidal Lucas-Kanade. Returns the tracked position, or `None` when
    /// tracking fails (flat neighbourhood, divergence, or the point leaving
    /// the frame).
    fn track_corner(
        &self,
        prev_pyr: &Pyramid,
        curr_pyr: &Pyramid,
        position: Vector2<f32>,
    ) -> Option<Vector2<f32>> {
        let levels = prev_pyr.levels.len().min(curr_pyr.levels.len());
        let half = (self.config.window_size / 2) as i64;
        let mut guess = Vector2::new(0.0f32, 0.0);

        for level_idx in (0..levels).rev() {
            let scale = 1.0 / (1u32 << level_idx) as f32;
            let px = position.x * scale;
            let py = position.y * scale;
            let prev = &prev_pyr.levels[level_idx];
            let curr = &curr_pyr.levels[level_idx];

            // Gradient matrix of the window around the point in prev; fixed
            // across iterations at this level.
            let mut g11 = 0.0f32;
            let mut g12 = 0.0f32;
            let mut g22 = 0.0f32;
            for wy in -half..=half {
                for wx in -half..=half {
                    let sx = px + wx as f32;
                    let sy = py + wy as f32;
                    let ix = (prev.sample(sx + 1.0, sy) - prev.sample(sx - 1.0, sy)) * 0.5;
                    let iy = (prev.sample(sx, sy + 1.0) - prev.sample(sx, sy - 1.0)) * 0.5;
                    g11 += ix * ix;
                    g12 += ix * iy;
                    g22 += iy * iy;
                }
            }

            let det = g11 * g22 - g12 * g12;
            if det.abs() < 1e-6 {
                if level_idx == 0 {
                    return None;
                }
                // Texture may still be resolvable at finer levels.
                continue;
            }
            let inv_det = 1.0 / det;

            // Guess carried from the coarser level, in this level's units.
            let mut d = Vector2::new(guess.x * scale, guess.y * scale);

            for _ in 0..self.config.max_iterations {
                let mut bx = 0.0f32;
                let mut by = 0.0f32;
                for wy in -half..=half {
                    for wx in -half..=half {
                        let sx = px + wx as f32;
                        let sy = py + wy as f32;
                        let ix = (prev.sample(sx + 1.0, sy) - prev.sample(sx - 1.0, sy)) * 0.5;
                        let iy = (prev.sample(sx, sy + 1.0) - prev.sample(sx, sy - 1.0)) * 0.5;
                        let it = curr.sample(sx + d.x, sy + d.y) - prev.sample(sx, sy);
                        bx += ix * it;
                        by += iy * it;
                    }
                }
                let step = Vector2::new(
                    inv_det * (g22 * bx - g12 * by),
                    inv_det * (-g12 * bx + g11 * by),
                );
                d -= step;
                if !d.x.is_finite() || !d.y.is_finite() {
                    return None;
                }
                if step.norm() < self.config.epsilon {
                    break;
                }
            }

            // Propagate to the next finer level.
            guess = Vector2::new(d.x / scale, d.y / scale);
        }

        let tracked = position + guess;
        let level0 = &prev_pyr.levels[0];
        let in_bounds = tracked.x >= 0.0
            && tracked.y >= 0.0
            && tracked.x <= level0.width() as f32 - 1.0
            && tracked.y <= level0.height() as f32 - 1.0;
        in_bounds.then_some(tracked)
    }
}

/// Median of a slice, sorting in place; an even count averages the two
/// middle elements.
fn median(values: &mut [f32]) -> f32 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}
