// src/main.rs
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use facepaint::data::TraceRecorder;
use facepaint::detector::{FaceScript, SyntheticFaceDetector};
use facepaint::video::SyntheticCameraSource;
use facepaint::{MakeupEngine, PipelineConfig, StyleParameters, VisualizationMode};

/// Runs the makeup pipeline headless and saves one captured frame.
#[derive(Debug, Parser)]
#[command(name = "facepaint", version, about)]
struct Args {
    /// Pipeline configuration JSON; defaults to the per-user config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Style JSON; the built-in "natural" look when omitted.
    #[arg(long)]
    style: Option<PathBuf>,

    /// Render ticks to run before capturing.
    #[arg(long, default_value_t = 180)]
    ticks: u32,

    #[arg(long, default_value_t = 640)]
    width: u32,

    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Camera frame rate.
    #[arg(long, default_value_t = 30.0)]
    fps: f64,

    /// Display refresh rate driving the render loop.
    #[arg(long, default_value_t = 60.0)]
    render_hz: f64,

    /// Landmark detection rate; frames in between carry motion only.
    #[arg(long, default_value_t = 30.0)]
    detect_hz: f64,

    /// 0 composite, 1 contour mask, 2 highlight mask, 3 beard mask, 4 face mask.
    #[arg(long, default_value_t = 0)]
    visualize: u32,

    /// Directory to write a per-tick trace CSV into.
    #[arg(long)]
    trace: Option<PathBuf>,

    /// Where to save the captured frame.
    #[arg(long, default_value = "facepaint-capture.png")]
    output: PathBuf,

    /// Use this webcam instead of the synthetic face.
    #[cfg(feature = "camera")]
    #[arg(long)]
    camera: Option<u32>,
}

fn load_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => match PipelineConfig::default_path() {
            Some(path) => PipelineConfig::load_or_default(&path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => PipelineConfig::default(),
        },
    };
    let detect_every = (args.fps / args.detect_hz.max(0.1)).round().max(1.0) as u32;
    config.capture.detect_every = detect_every;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn load_style(args: &Args) -> Result<StyleParameters> {
    match &args.style {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read style {}", path.display()))?;
            StyleParameters::from_json(&text).context("failed to parse style")
        }
        None => Ok(StyleParameters::default()),
    }
}

fn setup(engine: &mut MakeupEngine, args: &Args) -> Result<()> {
    let detector = Box::new(SyntheticFaceDetector::new(FaceScript::swaying()).with_jitter(0.0015));

    #[cfg(feature = "camera")]
    if let Some(index) = args.camera {
        let (width, height, fps) = (args.width, args.height, args.fps.round() as u32);
        return engine
            .setup(
                move || facepaint::video::NokhwaCamera::open(index, width, height, fps),
                detector,
            )
            .context("failed to start camera pipeline");
    }

    let (width, height, fps) = (args.width, args.height, args.fps);
    engine
        .setup(
            move || Ok(SyntheticCameraSource::new(width, height, fps, FaceScript::swaying()).paced()),
            detector,
        )
        .context("failed to start synthetic pipeline")
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let style = load_style(&args)?;

    let mut engine = MakeupEngine::new(config);
    engine.set_style(style);
    engine.set_visualization_mode(VisualizationMode::from_index(args.visualize));
    if let Some(dir) = &args.trace {
        engine.start_trace(TraceRecorder::new(dir, None));
    }
    setup(&mut engine, &args)?;
    if let Some(info) = engine.adapter_info() {
        tracing::info!(adapter = %info.name, backend = ?info.backend, "rendering");
    }

    let interval = Duration::from_secs_f64(1.0 / args.render_hz.max(1.0));
    let started = Instant::now();
    let mut rendered = 0_u32;
    let mut predicted = 0_u32;
    for tick in 0..args.ticks {
        let deadline = started + interval * (tick + 1);
        let now_ms = started.elapsed().as_secs_f64() * 1000.0;
        match engine.render_tick(now_ms).context("render tick failed")? {
            Some(stats) => {
                rendered += 1;
                if stats.source == Some(facepaint::scheduler::LandmarkSource::Predicted) {
                    predicted += 1;
                }
            }
            None => tracing::debug!(tick, "no frame to render yet"),
        }
        if !engine.is_capturing() {
            tracing::warn!("capture source ended early");
            break;
        }
        std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
    }

    let (sender, receiver) = mpsc::channel();
    engine.request_capture(move |result| {
        let _ = sender.send(result);
    });
    let mut capture = None;
    for _ in 0..30 {
        let now_ms = started.elapsed().as_secs_f64() * 1000.0;
        engine.render_tick(now_ms).context("render tick failed")?;
        if let Ok(result) = receiver.recv_timeout(interval) {
            capture = Some(result);
            break;
        }
    }
    match capture {
        Some(result) => {
            let image = result.context("capture failed")?;
            image
                .save(&args.output)
                .with_context(|| format!("failed to save {}", args.output.display()))?;
            tracing::info!(path = %args.output.display(), "capture saved");
        }
        None => tracing::warn!("no frame was rendered, nothing captured"),
    }

    let status = engine.status();
    tracing::info!(
        rendered,
        predicted,
        frames = status.frames,
        detections = status.detections,
        detector_errors = status.detector_errors,
        status = %status.message,
        "run finished"
    );

    if let Some(mut trace) = engine.take_trace() {
        let csv = trace.export_csv()?;
        let summary = trace.write_summary()?;
        tracing::info!(csv = %csv.display(), summary = %summary.display(), "trace written");
    }
    engine.teardown().context("teardown failed")?;
    Ok(())
}
