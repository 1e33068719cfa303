// src/scheduler.rs - per-render-tick landmark selection and geometry build
use std::sync::Arc;

use crate::config::RenderConfig;
use crate::coords::ViewTransform;
use crate::exchange::FramePacket;
use crate::geometry::{FaceGeometry, GeometryBuilder};
use crate::landmarks::LandmarkSet;
use crate::predictor::MotionSnapshot;

/// Where the landmarks drawn on a tick came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandmarkSource {
    /// A detection that arrived since the previous tick.
    Detection,
    /// Extrapolated from the latest motion snapshot.
    Predicted,
    None,
}

/// Everything one render tick consumes. The packet stays referenced until
/// the tick is done, which keeps its pixel buffer out of the reuse pool.
#[derive(Debug, Clone)]
pub struct PreparedFrame {
    pub packet: Arc<FramePacket>,
    pub render_ms: f64,
    pub source: LandmarkSource,
    pub landmarks: Option<LandmarkSet>,
    pub geometry: Option<FaceGeometry>,
    /// True when the packet was not seen on an earlier tick.
    pub new_packet: bool,
}

impl PreparedFrame {
    pub fn frame_size(&self) -> (u32, u32) {
        (self.packet.frame.width, self.packet.frame.height)
    }

    pub fn has_face(&self) -> bool {
        self.geometry.is_some()
    }
}

/// Render-side state: the last packet sequence consumed and the motion
/// snapshot used for extrapolation. Never writes tracker state.
pub struct FrameScheduler {
    mirror: bool,
    builder: Option<GeometryBuilder>,
    last_sequence: u64,
    motion: Option<Arc<MotionSnapshot>>,
    ticks: u64,
    predicted_ticks: u64,
}

impl FrameScheduler {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            mirror: config.mirror,
            builder: None,
            last_sequence: 0,
            motion: None,
            ticks: 0,
            predicted_ticks: 0,
        }
    }

    pub fn prepare(&mut self, packet: Option<Arc<FramePacket>>, render_ms: f64) -> Option<PreparedFrame> {
        let packet = packet?;
        self.ticks += 1;
        let new_packet = packet.sequence != self.last_sequence;

        let (source, landmarks) = if new_packet {
            self.last_sequence = packet.sequence;
            self.motion = packet.motion.clone();
            match &packet.face {
                Some(face) => (LandmarkSource::Detection, Some(face.landmarks.clone())),
                None => self.extrapolate(render_ms),
            }
        } else {
            self.extrapolate(render_ms)
        };
        if source == LandmarkSource::Predicted {
            self.predicted_ticks += 1;
        }

        let builder = self.builder_for(packet.frame.width, packet.frame.height);
        let geometry = landmarks
            .as_ref()
            .map(|landmarks| builder.build(landmarks, Some(&packet.frame)));

        Some(PreparedFrame {
            packet,
            render_ms,
            source,
            landmarks,
            geometry,
            new_packet,
        })
    }

    fn extrapolate(&self, render_ms: f64) -> (LandmarkSource, Option<LandmarkSet>) {
        match &self.motion {
            Some(motion) => (LandmarkSource::Predicted, Some(motion.predict(render_ms))),
            None => (LandmarkSource::None, None),
        }
    }

    fn builder_for(&mut self, width: u32, height: u32) -> GeometryBuilder {
        let view = ViewTransform::new(width, height, self.mirror);
        match self.builder {
            Some(builder) if builder.view() == view => builder,
            _ => {
                let builder = GeometryBuilder::new(view);
                self.builder = Some(builder);
                builder
            }
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn predicted_ticks(&self) -> u64 {
        self.predicted_ticks
    }

    pub fn reset(&mut self) {
        self.builder = None;
        self.last_sequence = 0;
        self.motion = None;
        self.ticks = 0;
        self.predicted_ticks = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::detector::{canonical_face, FacePose};
    use crate::exchange::FrameExchange;
    use crate::tracking::FaceTracker;
    use crate::video::CameraFrame;

    fn frame(timestamp_ms: f64) -> CameraFrame {
        CameraFrame::new(64, 48, vec![90; 64 * 48 * 4], timestamp_ms).unwrap()
    }

    #[test]
    fn nothing_to_draw_before_the_first_packet() {
        let mut scheduler = FrameScheduler::new(&RenderConfig::default());
        assert!(scheduler.prepare(None, 0.0).is_none());
    }

    #[test]
    fn detection_then_prediction_on_the_same_packet() {
        let config = PipelineConfig::default();
        let exchange = FrameExchange::new();
        let mut tracker = FaceTracker::new(&config);
        let mut scheduler = FrameScheduler::new(&config.render);

        let face = canonical_face(&FacePose::default());
        let out = tracker.process(Some(face), 0.0);
        exchange
            .submit_frame(frame(0.0), out.face, tracker.snapshot())
            .unwrap();

        let first = scheduler.prepare(exchange.acquire_latest(), 0.0).unwrap();
        assert_eq!(first.source, LandmarkSource::Detection);
        assert!(first.new_packet);
        assert!(first.has_face());

        let second = scheduler.prepare(exchange.acquire_latest(), 16.0).unwrap();
        assert_eq!(second.source, LandmarkSource::Predicted);
        assert!(!second.new_packet);
        assert_eq!(scheduler.predicted_ticks(), 1);
    }

    #[test]
    fn packet_without_motion_means_no_face() {
        let exchange = FrameExchange::new();
        let mut scheduler = FrameScheduler::new(&RenderConfig::default());
        exchange.submit_frame(frame(0.0), None, None).unwrap();
        let prepared = scheduler.prepare(exchange.acquire_latest(), 5.0).unwrap();
        assert_eq!(prepared.source, LandmarkSource::None);
        assert!(prepared.geometry.is_none());
        assert_eq!(prepared.frame_size(), (64, 48));
    }
}
