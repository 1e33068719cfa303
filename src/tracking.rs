// src/tracking.rs - per-face stabilization state machine
use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::filter::{MotionBlender, TemporalFilter};
use crate::landmarks::LandmarkSet;
use crate::predictor::{MotionSnapshot, Predictor, VelocityUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingPhase {
    NoFace,
    Tracking,
}

/// Landmarks published with a camera frame. The motion snapshot lets the
/// render side extrapolate without touching tracker state.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedFace {
    pub landmarks: LandmarkSet,
    pub source_timestamp_ms: f64,
    pub motion: Arc<MotionSnapshot>,
}

#[derive(Debug, Clone)]
pub struct TrackerOutput {
    pub phase: TrackingPhase,
    /// Present only when this call consumed a usable detection.
    pub face: Option<TrackedFace>,
    pub motion: f32,
    pub velocity_update: Option<VelocityUpdate>,
    /// True when this call moved the tracker into `NoFace`.
    pub lost: bool,
}

/// Owns the filter, blender, and predictor for one tracked face lifetime.
/// All three are reset together on every transition into `NoFace`.
pub struct FaceTracker {
    filter: TemporalFilter,
    blender: MotionBlender,
    predictor: Predictor,
    phase: TrackingPhase,
    landmark_count: usize,
    lost_after_misses: u32,
    misses: u32,
    detections: u64,
}

impl FaceTracker {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            filter: TemporalFilter::new(config.filter.clone()),
            blender: MotionBlender::new(config.blender.clone()),
            predictor: Predictor::new(config.predictor.clone()),
            phase: TrackingPhase::NoFace,
            landmark_count: config.tracker.landmark_count,
            lost_after_misses: config.tracker.lost_after_misses,
            misses: 0,
            detections: 0,
        }
    }

    pub fn process(&mut self, detection: Option<LandmarkSet>, timestamp_ms: f64) -> TrackerOutput {
        let detection = detection.filter(|landmarks| self.is_usable(landmarks));

        let Some(raw) = detection else {
            return self.on_miss();
        };

        self.misses = 0;
        if self.phase == TrackingPhase::NoFace {
            tracing::info!(timestamp_ms, "face acquired");
            self.phase = TrackingPhase::Tracking;
        }

        let filtered = self.filter.update(&raw);
        let (stabilized, motion) = self.blender.apply(&filtered);
        let velocity_update = self.predictor.on_detection(&stabilized, timestamp_ms);
        self.detections += 1;

        let face = self.predictor.snapshot().map(|motion_snapshot| TrackedFace {
            landmarks: stabilized,
            source_timestamp_ms: timestamp_ms,
            motion: motion_snapshot,
        });

        TrackerOutput {
            phase: self.phase,
            face,
            motion,
            velocity_update: Some(velocity_update),
            lost: false,
        }
    }

    fn on_miss(&mut self) -> TrackerOutput {
        let mut lost = false;
        if self.phase == TrackingPhase::Tracking {
            self.misses += 1;
            if self.misses >= self.lost_after_misses {
                tracing::info!(misses = self.misses, "face lost, resetting tracking state");
                self.reset();
                lost = true;
            }
        }
        TrackerOutput {
            phase: self.phase,
            face: None,
            motion: 0.0,
            velocity_update: None,
            lost,
        }
    }

    fn is_usable(&self, landmarks: &LandmarkSet) -> bool {
        if landmarks.len() != self.landmark_count {
            tracing::debug!(
                got = landmarks.len(),
                expected = self.landmark_count,
                "discarding detection with wrong landmark count"
            );
            return false;
        }
        if !landmarks.is_finite() {
            tracing::debug!("discarding detection with non-finite landmarks");
            return false;
        }
        true
    }

    /// Back to `NoFace` with filter, blender, and predictor cleared together.
    pub fn reset(&mut self) {
        self.filter.reset();
        self.blender.reset();
        self.predictor.reset();
        self.phase = TrackingPhase::NoFace;
        self.misses = 0;
    }

    pub fn is_reset(&self) -> bool {
        self.filter.is_reset() && self.blender.is_reset() && self.predictor.is_reset()
    }

    pub fn phase(&self) -> TrackingPhase {
        self.phase
    }

    pub fn snapshot(&self) -> Option<Arc<MotionSnapshot>> {
        self.predictor.snapshot()
    }

    pub fn predict(&self, render_ms: f64) -> Option<LandmarkSet> {
        self.predictor.predict(render_ms)
    }

    pub fn detections(&self) -> u64 {
        self.detections
    }

    pub fn last_motion(&self) -> f32 {
        self.blender.last_motion()
    }
}
