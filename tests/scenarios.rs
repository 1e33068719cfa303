// tests/scenarios.rs - end-to-end behaviour across producer, exchange, scheduler
use std::sync::Arc;

use nalgebra::Vector2;

use facepaint::config::PipelineConfig;
use facepaint::coords::ViewTransform;
use facepaint::detector::{canonical_face, FacePose, FaceScript, SyntheticFaceDetector};
use facepaint::exchange::FrameExchange;
use facepaint::geometry::{GeometryBuilder, MeshVertex, RegionKind, RegionMesh};
use facepaint::landmarks::regions;
use facepaint::producer::{InferenceStage, StageOutcome, StatusBoard};
use facepaint::raster::{self, FeatherImage};
use facepaint::scheduler::{FrameScheduler, LandmarkSource};
use facepaint::video::CameraFrame;

fn frame(timestamp_ms: f64) -> CameraFrame {
    CameraFrame::new(64, 48, vec![100; 64 * 48 * 4], timestamp_ms).unwrap()
}

fn stage(config: &PipelineConfig, script: FaceScript) -> (InferenceStage, Arc<FrameExchange>) {
    let exchange = Arc::new(FrameExchange::new());
    let stage = InferenceStage::new(
        config,
        Box::new(SyntheticFaceDetector::new(script)),
        exchange.clone(),
        Arc::new(StatusBoard::new()),
    );
    (stage, exchange)
}

#[test]
fn half_rate_detection_alternates_with_prediction_and_moves_monotonically() {
    let config = PipelineConfig::default();
    let (mut stage, exchange) = stage(&config, FaceScript::drifting(Vector2::new(2.0e-4, 0.0)));
    let mut scheduler = FrameScheduler::new(&config.render);

    let render_interval = 1000.0 / 60.0;
    let mut sources = Vec::new();
    let mut nose_x = Vec::new();
    for tick in 0..24_u32 {
        let now = tick as f64 * render_interval;
        if tick % 2 == 0 {
            assert_eq!(stage.process(frame(now)).unwrap(), StageOutcome::Detected);
        }
        let prepared = scheduler.prepare(exchange.acquire_latest(), now).unwrap();
        sources.push(prepared.source);
        let landmarks = prepared.landmarks.unwrap();
        nose_x.push(landmarks.get(regions::NOSE_TIP).unwrap().x);
    }

    for (tick, source) in sources.iter().enumerate() {
        let expected = if tick % 2 == 0 {
            LandmarkSource::Detection
        } else {
            LandmarkSource::Predicted
        };
        assert_eq!(*source, expected, "tick {tick}");
    }
    assert_eq!(scheduler.predicted_ticks(), 12);

    // Skip the filter warm-up, then every tick must move in the drift direction.
    for pair in nose_x[4..].windows(2) {
        assert!(pair[1] >= pair[0] - 1e-6, "motion reversed: {nose_x:?}");
    }
    assert!(nose_x[23] > nose_x[4]);
}

#[test]
fn ten_misses_leave_every_tracking_stage_reset() {
    let config = PipelineConfig::default();
    let script = FaceScript::still().with_absence(100.0..10_000.0);
    let (mut stage, exchange) = stage(&config, script);

    for i in 0..3 {
        assert_eq!(stage.process(frame(i as f64 * 33.0)).unwrap(), StageOutcome::Detected);
    }
    assert!(!stage.tracker().is_reset());

    let mut outcomes = Vec::new();
    for i in 0..10 {
        outcomes.push(stage.process(frame(100.0 + i as f64 * 33.0)).unwrap());
    }
    assert_eq!(outcomes[0], StageOutcome::Lost);
    assert!(outcomes[1..].iter().all(|o| *o == StageOutcome::Missed));
    assert!(stage.tracker().is_reset());

    let packet = exchange.acquire_latest().unwrap();
    assert!(packet.face.is_none());
    assert!(packet.motion.is_none(), "stale motion published after reset");
    assert!(!exchange.face_detected());
}

#[test]
fn tolerant_tracker_resets_only_after_the_configured_misses() {
    let mut config = PipelineConfig::default();
    config.tracker.lost_after_misses = 3;
    let script = FaceScript::still().with_absence(50.0..10_000.0);
    let (mut stage, _) = stage(&config, script);

    stage.process(frame(0.0)).unwrap();
    assert_eq!(stage.process(frame(60.0)).unwrap(), StageOutcome::Missed);
    assert_eq!(stage.process(frame(90.0)).unwrap(), StageOutcome::Missed);
    assert!(!stage.tracker().is_reset());
    assert_eq!(stage.process(frame(120.0)).unwrap(), StageOutcome::Lost);
    assert!(stage.tracker().is_reset());
}

/// Fan over a circle: feather 1 at the center, 0 on the ring.
fn disc_mesh(center: [f32; 2], radius: f32, segments: usize) -> RegionMesh {
    let vertex = |position: [f32; 2], feather: f32| MeshVertex {
        position,
        feather,
        uv: [0.0, 0.0],
    };
    let ring: Vec<[f32; 2]> = (0..segments)
        .map(|i| {
            let a = i as f32 / segments as f32 * std::f32::consts::TAU;
            [center[0] + radius * a.cos(), center[1] + radius * a.sin()]
        })
        .collect();
    let mut vertices = Vec::with_capacity(segments * 3);
    for i in 0..segments {
        let j = (i + 1) % segments;
        vertices.extend_from_slice(&[vertex(ring[i], 0.0), vertex(ring[j], 0.0), vertex(center, 1.0)]);
    }
    RegionMesh {
        kind: RegionKind::Lips,
        vertices,
        centroid: center,
    }
}

#[test]
fn lipstick_alpha_falls_off_from_centroid_to_outline() {
    let opacity = 0.68;
    let cutoff = PipelineConfig::default().render.alpha_cutoff;
    let mesh = disc_mesh([0.0, 0.0], 0.4, 48);
    let mut image = FeatherImage::new(200, 200);
    raster::rasterize(&mut image, &mesh, opacity, cutoff);

    let center = image.alpha_at(100, 100);
    assert!((center - opacity).abs() < 1e-4, "center alpha {center}");

    // Ring sits 40px right of the center.
    let profile: Vec<f32> = (100..=142).map(|x| image.alpha_at(x, 100)).collect();
    for pair in profile.windows(2) {
        assert!(pair[1] <= pair[0] + 1e-6, "profile rises: {profile:?}");
    }
    let outside = image.alpha_at(142, 100);
    assert_eq!(outside, 0.0);
    assert!(center - outside > 0.5);

    // Strictly decreasing through the outer feather band.
    let band: Vec<f32> = (126..=134).map(|x| image.alpha_at(x, 100)).collect();
    for pair in band.windows(2) {
        assert!(pair[1] < pair[0], "flat band: {band:?}");
    }
}

#[test]
fn face_mask_is_one_at_the_centroid_and_zero_outside() {
    let mask = raster::face_mask(&disc_mesh([0.1, -0.1], 0.5, 6), 120, 120, 0.008);
    assert_eq!(mask.alpha_at_ndc([0.1, -0.1]), 1.0);
    for ndc in [[0.95, 0.95], [-0.95, 0.0], [0.1, 0.6], [0.1, -0.8]] {
        assert_eq!(mask.alpha_at_ndc(ndc), 0.0, "at {ndc:?}");
    }
}

#[test]
fn canonical_face_oval_masks_the_face_only() {
    let view = ViewTransform::new(160, 120, true);
    let geometry = GeometryBuilder::new(view).build(&canonical_face(&FacePose::default()), None);
    let oval = geometry.face_oval.expect("face oval");
    let mask = raster::face_mask(&oval, 160, 120, 0.008);
    assert_eq!(mask.alpha_at_ndc(oval.centroid), 1.0);
    for (x, y) in [(0, 0), (159, 0), (0, 119), (159, 119)] {
        assert_eq!(mask.alpha_at(x, y), 0.0);
    }
}

#[test]
fn acquire_is_idempotent_and_pixels_match_landmark_time() {
    let config = PipelineConfig::default();
    let (mut stage, exchange) = stage(&config, FaceScript::still());
    stage.process(frame(40.0)).unwrap();

    let a = exchange.acquire_latest().unwrap();
    let b = exchange.acquire_latest().unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.landmark_timestamp_ms(), Some(a.timestamp_ms()));
}
