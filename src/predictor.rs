// src/predictor.rs - latency-hiding extrapolation between detections
use std::sync::Arc;

use nalgebra::Vector3;

use crate::config::PredictorConfig;
use crate::landmarks::LandmarkSet;

/// Outcome of folding a detection into the velocity estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VelocityUpdate {
    /// First snapshot; nothing to difference against.
    Bootstrap,
    Applied,
    /// Timestamp did not advance; previous velocity kept.
    SkippedClockBackward,
    /// Interval too long to be continuous motion; previous velocity kept.
    SkippedGap,
    /// Landmark count changed; velocity cleared.
    SkippedTopologyChange,
}

/// Immutable predictor state published to the render side. `predict` is pure,
/// so any number of render ticks can read one snapshot concurrently.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionSnapshot {
    pub landmarks: LandmarkSet,
    pub timestamp_ms: f64,
    /// Normalized units per millisecond.
    pub velocity: Arc<[Vector3<f32>]>,
    pub max_extrapolation_ms: f64,
}

impl MotionSnapshot {
    /// Position at `render_ms`, extrapolated by at most `max_extrapolation_ms`.
    /// Render times earlier than the snapshot return the snapshot itself.
    pub fn predict(&self, render_ms: f64) -> LandmarkSet {
        let elapsed = self.extrapolation_ms(render_ms);
        if elapsed <= 0.0 {
            return self.landmarks.clone();
        }
        let elapsed = elapsed as f32;
        let points = self
            .landmarks
            .points()
            .iter()
            .zip(self.velocity.iter())
            .map(|(p, v)| p + v * elapsed)
            .collect();
        LandmarkSet::from_points(points)
    }

    pub fn extrapolation_ms(&self, render_ms: f64) -> f64 {
        let elapsed = render_ms - self.timestamp_ms;
        if !elapsed.is_finite() || elapsed <= 0.0 {
            return 0.0;
        }
        elapsed.min(self.max_extrapolation_ms)
    }
}

#[derive(Debug, Clone)]
pub struct Predictor {
    config: PredictorConfig,
    snapshot: Option<Arc<MotionSnapshot>>,
    has_velocity: bool,
}

impl Predictor {
    pub fn new(config: PredictorConfig) -> Self {
        Self {
            config,
            snapshot: None,
            has_velocity: false,
        }
    }

    pub fn on_detection(&mut self, landmarks: &LandmarkSet, timestamp_ms: f64) -> VelocityUpdate {
        let zero = || -> Arc<[Vector3<f32>]> { vec![Vector3::zeros(); landmarks.len()].into() };

        let (velocity, outcome) = match self.snapshot.as_deref() {
            None => (zero(), VelocityUpdate::Bootstrap),
            Some(previous) if previous.landmarks.len() != landmarks.len() => {
                self.has_velocity = false;
                (zero(), VelocityUpdate::SkippedTopologyChange)
            }
            Some(previous) => {
                let dt = timestamp_ms - previous.timestamp_ms;
                if !(dt > 0.0) {
                    tracing::debug!(dt, "detection clock did not advance, keeping velocity");
                    (previous.velocity.clone(), VelocityUpdate::SkippedClockBackward)
                } else if dt > self.config.max_interval_ms {
                    tracing::debug!(dt, "detection gap, keeping velocity");
                    (previous.velocity.clone(), VelocityUpdate::SkippedGap)
                } else {
                    let alpha = self.config.velocity_alpha;
                    let dt = dt as f32;
                    let smooth = self.has_velocity;
                    let velocity = landmarks
                        .points()
                        .iter()
                        .zip(previous.landmarks.points())
                        .zip(previous.velocity.iter())
                        .map(|((now, before), old)| {
                            let sample = (now - before) / dt;
                            if smooth {
                                sample * alpha + old * (1.0 - alpha)
                            } else {
                                sample
                            }
                        })
                        .collect();
                    self.has_velocity = true;
                    (velocity, VelocityUpdate::Applied)
                }
            }
        };

        self.snapshot = Some(Arc::new(MotionSnapshot {
            landmarks: landmarks.clone(),
            timestamp_ms,
            velocity,
            max_extrapolation_ms: self.config.max_extrapolation_ms,
        }));
        outcome
    }

    pub fn predict(&self, render_ms: f64) -> Option<LandmarkSet> {
        self.snapshot.as_ref().map(|s| s.predict(render_ms))
    }

    pub fn snapshot(&self) -> Option<Arc<MotionSnapshot>> {
        self.snapshot.clone()
    }

    pub fn velocity(&self, index: usize) -> Option<Vector3<f32>> {
        self.snapshot
            .as_ref()
            .and_then(|s| s.velocity.get(index).copied())
    }

    pub fn reset(&mut self) {
        self.snapshot = None;
        self.has_velocity = false;
    }

    pub fn is_reset(&self) -> bool {
        self.snapshot.is_none() && !self.has_velocity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(x: f32) -> LandmarkSet {
        LandmarkSet::from_raw(&[[x, 0.5, 0.0]])
    }

    #[test]
    fn first_detection_predicts_in_place() {
        let mut p = Predictor::new(PredictorConfig::default());
        assert_eq!(p.on_detection(&at(0.3), 0.0), VelocityUpdate::Bootstrap);
        assert_eq!(p.predict(50.0).unwrap(), at(0.3));
    }

    #[test]
    fn extrapolates_along_measured_velocity() {
        let mut p = Predictor::new(PredictorConfig::default());
        p.on_detection(&at(0.30), 0.0);
        assert_eq!(p.on_detection(&at(0.33), 30.0), VelocityUpdate::Applied);
        let x = p.predict(45.0).unwrap().get(0).unwrap().x;
        assert!((x - 0.345).abs() < 1e-5, "got {x}");
    }

    #[test]
    fn extrapolation_is_capped() {
        let mut p = Predictor::new(PredictorConfig::default());
        p.on_detection(&at(0.30), 0.0);
        p.on_detection(&at(0.33), 30.0);
        let far = p.predict(10_000.0).unwrap();
        let capped = p.predict(30.0 + 120.0).unwrap();
        assert_eq!(far, capped);
    }

    #[test]
    fn clock_going_backward_keeps_previous_velocity() {
        let mut p = Predictor::new(PredictorConfig::default());
        p.on_detection(&at(0.30), 0.0);
        p.on_detection(&at(0.33), 30.0);
        let before = p.velocity(0).unwrap();
        assert_eq!(
            p.on_detection(&at(0.40), 20.0),
            VelocityUpdate::SkippedClockBackward
        );
        assert_eq!(p.velocity(0).unwrap(), before);
    }

    #[test]
    fn long_gap_does_not_produce_velocity() {
        let mut p = Predictor::new(PredictorConfig::default());
        p.on_detection(&at(0.30), 0.0);
        assert_eq!(p.on_detection(&at(0.80), 900.0), VelocityUpdate::SkippedGap);
        assert_eq!(p.velocity(0).unwrap(), Vector3::zeros());
    }

    #[test]
    fn velocity_is_smoothed_after_the_first_pair() {
        let mut p = Predictor::new(PredictorConfig::default());
        p.on_detection(&at(0.30), 0.0);
        p.on_detection(&at(0.33), 30.0); // 0.001 / ms
        p.on_detection(&at(0.33), 60.0); // raw 0
        let v = p.velocity(0).unwrap().x;
        assert!((v - 0.0005).abs() < 1e-7, "got {v}");
    }

    #[test]
    fn render_time_before_snapshot_returns_snapshot() {
        let mut p = Predictor::new(PredictorConfig::default());
        p.on_detection(&at(0.30), 100.0);
        p.on_detection(&at(0.33), 130.0);
        assert_eq!(p.predict(120.0).unwrap(), at(0.33));
    }

    #[test]
    fn reset_clears_velocity() {
        let mut p = Predictor::new(PredictorConfig::default());
        p.on_detection(&at(0.30), 0.0);
        p.on_detection(&at(0.33), 30.0);
        p.reset();
        assert!(p.is_reset());
        assert!(p.predict(40.0).is_none());
        assert_eq!(p.on_detection(&at(0.5), 60.0), VelocityUpdate::Bootstrap);
    }
}
