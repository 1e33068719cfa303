// src/config.rs
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::landmarks::LANDMARK_COUNT;

/// Tunable constants for every stage of the pipeline. All fields default to
/// the values the pipeline was tuned with; a JSON file may override any
/// subset of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub filter: FilterConfig,
    pub blender: BlenderConfig,
    pub predictor: PredictorConfig,
    pub tracker: TrackerConfig,
    pub render: RenderConfig,
    pub capture: CaptureConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Variance added to every axis on each predict step.
    pub process_noise: f32,
    pub measurement_noise_xy: f32,
    /// Depth is noisier than the image-plane axes.
    pub measurement_noise_z: f32,
    /// EMA weight of the innovation when updating the drift velocity.
    pub velocity_alpha: f32,
    /// Apply the smoothed drift in the predict step.
    pub drift_compensation: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            process_noise: 1.0e-5,
            measurement_noise_xy: 4.0e-5,
            measurement_noise_z: 2.0e-4,
            velocity_alpha: 0.2,
            drift_compensation: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlenderConfig {
    /// Mean per-landmark displacement (normalized units) at which motion saturates to 1.
    pub motion_threshold: f32,
    pub still_weight: f32,
    pub moving_weight: f32,
}

impl Default for BlenderConfig {
    fn default() -> Self {
        Self {
            motion_threshold: 0.01,
            still_weight: 0.3,
            moving_weight: 0.7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    /// EMA weight of a fresh velocity sample against the stored velocity.
    pub velocity_alpha: f32,
    /// Extrapolation never runs further than this past the last snapshot.
    pub max_extrapolation_ms: f64,
    /// Detection intervals above this are treated as a gap, not motion.
    pub max_interval_ms: f64,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            velocity_alpha: 0.5,
            max_extrapolation_ms: 120.0,
            max_interval_ms: 500.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub landmark_count: usize,
    /// Consecutive misses before the face is considered lost.
    pub lost_after_misses: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            landmark_count: LANDMARK_COUNT,
            lost_after_misses: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Resolution of the packed contour/highlight mask relative to the frame.
    pub mask_scale: f32,
    /// Selfie view: mirror the camera image horizontally on present.
    pub mirror: bool,
    /// Fragments with alpha below this are discarded.
    pub alpha_cutoff: f32,
    /// Contour mask blur radius as a fraction of face width.
    pub contour_blur_fraction: f32,
    pub max_makeup_draws: usize,
    pub mesh_vertex_capacity: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            mask_scale: 0.25,
            mirror: true,
            alpha_cutoff: 0.008,
            contour_blur_fraction: 0.02,
            max_makeup_draws: 24,
            mesh_vertex_capacity: 16_384,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Run the detector on every Nth captured frame; the rest are submitted
    /// without landmarks and drawn with predicted positions.
    pub detect_every: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self { detect_every: 1 }
    }
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| PipelineError::config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Missing file yields defaults; a present but malformed file is an error.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "facepaint", "facepaint")
            .map(|dirs| dirs.config_dir().join("config.json"))
    }

    pub fn validate(&self) -> Result<()> {
        let f = &self.filter;
        if f.process_noise <= 0.0 || f.measurement_noise_xy <= 0.0 || f.measurement_noise_z <= 0.0 {
            return Err(PipelineError::config("filter noise constants must be positive"));
        }
        if !(0.0..=1.0).contains(&f.velocity_alpha) {
            return Err(PipelineError::config("filter.velocity_alpha must be in [0, 1]"));
        }

        let b = &self.blender;
        if b.motion_threshold <= 0.0 {
            return Err(PipelineError::config("blender.motion_threshold must be positive"));
        }
        if !(0.0..=1.0).contains(&b.still_weight) || !(0.0..=1.0).contains(&b.moving_weight) {
            return Err(PipelineError::config("blender weights must be in [0, 1]"));
        }

        let p = &self.predictor;
        if !(0.0..=1.0).contains(&p.velocity_alpha) {
            return Err(PipelineError::config("predictor.velocity_alpha must be in [0, 1]"));
        }
        if p.max_extrapolation_ms < 0.0 || p.max_interval_ms <= 0.0 {
            return Err(PipelineError::config("predictor windows must be positive"));
        }
        if p.max_extrapolation_ms > p.max_interval_ms {
            return Err(PipelineError::config(
                "predictor.max_extrapolation_ms must not exceed max_interval_ms",
            ));
        }

        if self.tracker.landmark_count == 0 {
            return Err(PipelineError::config("tracker.landmark_count must be non-zero"));
        }
        if self.tracker.lost_after_misses == 0 {
            return Err(PipelineError::config("tracker.lost_after_misses must be at least 1"));
        }

        let r = &self.render;
        if !(r.mask_scale > 0.0 && r.mask_scale <= 1.0) {
            return Err(PipelineError::config("render.mask_scale must be in (0, 1]"));
        }
        if !(0.0..=0.1).contains(&r.alpha_cutoff) {
            return Err(PipelineError::config("render.alpha_cutoff must be in [0, 0.1]"));
        }
        if r.max_makeup_draws == 0 || r.mesh_vertex_capacity < 3 {
            return Err(PipelineError::config("render buffers are too small"));
        }

        if self.capture.detect_every == 0 {
            return Err(PipelineError::config("capture.detect_every must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "predictor": {{ "max_extrapolation_ms": 90.0 }} }}"#).unwrap();

        let config = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(config.predictor.max_extrapolation_ms, 90.0);
        assert_eq!(config.predictor.max_interval_ms, 500.0);
        assert_eq!(config.filter, FilterConfig::default());
    }

    #[test]
    fn cap_beyond_gap_bound_is_rejected() {
        let mut config = PipelineConfig::default();
        config.predictor.max_extrapolation_ms = 800.0;
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(
            PipelineConfig::load(file.path()),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::load_or_default(dir.path().join("absent.json")).unwrap();
        assert_eq!(config, PipelineConfig::default());
    }
}
