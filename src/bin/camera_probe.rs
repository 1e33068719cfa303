// src/bin/camera_probe.rs - checks webcam access and one frame round-trip
use anyhow::{Context, Result};
use clap::Parser;
use nokhwa::utils::ApiBackend;
use tracing_subscriber::EnvFilter;

use facepaint::video::{FrameSource, NokhwaCamera};

#[derive(Debug, Parser)]
#[command(name = "camera_probe", about = "List cameras and grab one frame")]
struct Args {
    #[arg(long, default_value_t = 0)]
    index: u32,

    #[arg(long, default_value_t = 640)]
    width: u32,

    #[arg(long, default_value_t = 480)]
    height: u32,

    #[arg(long, default_value_t = 30)]
    fps: u32,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let cameras = nokhwa::query(ApiBackend::Auto).context("failed to query cameras")?;
    tracing::info!(count = cameras.len(), "cameras found");
    for (i, camera) in cameras.iter().enumerate() {
        tracing::info!(index = i, name = %camera.human_name(), "camera");
    }

    let mut camera = NokhwaCamera::open(args.index, args.width, args.height, args.fps).context(
        "failed to open camera; it may be in use by another app, \
         permission may not be granted, or no camera is connected",
    )?;
    let frame = camera
        .next_frame()
        .context("failed to capture frame")?
        .into_frame()
        .context("camera stream ended before the first frame")?;
    tracing::info!(
        width = frame.width,
        height = frame.height,
        timestamp_ms = frame.timestamp_ms,
        "frame captured, camera access working"
    );
    Ok(())
}
