// tests/gpu.rs - render pipeline smoke tests; skipped on machines without a GPU
use facepaint::config::PipelineConfig;
use facepaint::detector::{canonical_face, FacePose, FaceScript};
use facepaint::error::PipelineError;
use facepaint::exchange::FrameExchange;
use facepaint::geometry::RegionKind;
use facepaint::raster;
use facepaint::render::{RenderPipeline, VisualizationMode};
use facepaint::scheduler::{FrameScheduler, PreparedFrame};
use facepaint::style::StyleParameters;
use facepaint::tracking::FaceTracker;
use facepaint::video::{CameraFrame, FrameSource, SyntheticCameraSource};

fn pipeline(config: &PipelineConfig) -> Option<RenderPipeline> {
    match pollster::block_on(RenderPipeline::new(&config.render)) {
        Ok(pipeline) => Some(pipeline),
        Err(PipelineError::Resource(msg)) if msg.contains("no suitable GPU adapter found") => {
            eprintln!("skipping: {msg}");
            None
        }
        Err(e) => panic!("pipeline creation failed: {e}"),
    }
}

fn prepared(config: &PipelineConfig, with_face: bool) -> PreparedFrame {
    let exchange = FrameExchange::new();
    let mut source = SyntheticCameraSource::new(160, 120, 30.0, FaceScript::still());
    let frame: CameraFrame = source.next_frame().unwrap().into_frame().unwrap();
    let timestamp_ms = frame.timestamp_ms;
    let mut tracker = FaceTracker::new(config);
    let face = if with_face {
        tracker
            .process(Some(canonical_face(&FacePose::default())), timestamp_ms)
            .face
    } else {
        None
    };
    exchange.submit_frame(frame, face, tracker.snapshot()).unwrap();
    FrameScheduler::new(&config.render)
        .prepare(exchange.acquire_latest(), timestamp_ms)
        .unwrap()
}

#[test]
fn renders_and_reads_back_a_frame() {
    let config = PipelineConfig::default();
    let Some(mut pipeline) = pipeline(&config) else {
        return;
    };
    assert!(matches!(pipeline.read_output(), Err(PipelineError::State(_))));

    let frame = prepared(&config, true);
    let stats = pipeline
        .render(&frame, &StyleParameters::evening(), VisualizationMode::Composite)
        .unwrap();
    assert!(stats.has_face);
    assert!(stats.makeup_draws > 0);
    assert_eq!(pipeline.size(), Some((160, 120)));

    let image = pipeline.read_output().unwrap();
    assert_eq!(image.dimensions(), (160, 120));
    assert!(image.pixels().any(|p| p.0[3] > 0));
}

#[test]
fn faceless_frames_and_debug_views_render() {
    let config = PipelineConfig::default();
    let Some(mut pipeline) = pipeline(&config) else {
        return;
    };
    let frame = prepared(&config, false);
    for index in 0..5 {
        let stats = pipeline
            .render(&frame, &StyleParameters::default(), VisualizationMode::from_index(index))
            .unwrap();
        assert!(!stats.has_face);
        assert_eq!(stats.makeup_draws, 0);
    }
    assert_eq!(pipeline.frames_rendered(), 5);

    let mask = pipeline.read_output().unwrap();
    assert!(mask.pixels().all(|p| p.0[0] == 0));
}

fn pixel_at(image: &image::RgbaImage, ndc: [f32; 2]) -> [u8; 4] {
    let p = raster::ndc_to_pixel(ndc, image.width(), image.height());
    let x = (p.x.max(0.0) as u32).min(image.width() - 1);
    let y = (p.y.max(0.0) as u32).min(image.height() - 1);
    image.get_pixel(x, y).0
}

fn corners(image: &image::RgbaImage) -> [[u8; 4]; 4] {
    let (w, h) = image.dimensions();
    [(0, 0), (w - 1, 0), (0, h - 1), (w - 1, h - 1)].map(|(x, y)| image.get_pixel(x, y).0)
}

#[test]
fn face_mask_is_full_at_the_centroid_and_empty_outside_the_hull() {
    let config = PipelineConfig::default();
    let Some(mut pipeline) = pipeline(&config) else {
        return;
    };
    let frame = prepared(&config, true);
    let oval = frame
        .geometry
        .as_ref()
        .and_then(|g| g.face_oval.as_ref())
        .expect("face oval");

    pipeline
        .render(&frame, &StyleParameters::default(), VisualizationMode::FaceMask)
        .unwrap();
    let mask = pipeline.read_output().unwrap();
    assert!(pixel_at(&mask, oval.centroid)[0] >= 250, "{:?}", pixel_at(&mask, oval.centroid));
    for corner in corners(&mask) {
        assert_eq!(corner[0], 0);
    }
}

#[test]
fn lip_tint_moves_the_lip_center_and_leaves_the_rest_alone() {
    let config = PipelineConfig::default();
    let Some(mut pipeline) = pipeline(&config) else {
        return;
    };
    let frame = prepared(&config, true);
    let geometry = frame.geometry.as_ref().expect("geometry");
    let lip_center = geometry.region(RegionKind::Lips).expect("lips").centroid;
    let face_center = geometry.face_oval.as_ref().expect("face oval").centroid;

    let bare = StyleParameters::bare();
    let mut lips_only = StyleParameters::bare();
    lips_only.lips = StyleParameters::default().lips;

    pipeline.render(&frame, &bare, VisualizationMode::Composite).unwrap();
    let before = pipeline.read_output().unwrap();
    pipeline.render(&frame, &lips_only, VisualizationMode::Composite).unwrap();
    let after = pipeline.read_output().unwrap();

    let tint = lips_only.lips.color.map(|c| c * 255.0);
    let distance = |p: [u8; 4]| -> f32 {
        (0..3).map(|c| (p[c] as f32 - tint[c]).powi(2)).sum::<f32>().sqrt()
    };
    let (was, now) = (pixel_at(&before, lip_center), pixel_at(&after, lip_center));
    assert!(distance(now) < distance(was), "lip center {was:?} -> {now:?}");

    let unchanged = |a: [u8; 4], b: [u8; 4]| (0..3).all(|c| a[c].abs_diff(b[c]) <= 1);
    for (a, b) in corners(&before).into_iter().zip(corners(&after)) {
        assert!(unchanged(a, b), "{a:?} vs {b:?}");
    }
    let (a, b) = (pixel_at(&before, face_center), pixel_at(&after, face_center));
    assert!(unchanged(a, b), "face center {a:?} vs {b:?}");
}
