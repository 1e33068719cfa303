//! Real-time facial makeup augmentation.
//!
//! A capture thread runs landmark detection on the newest camera frame,
//! stabilizes the landmarks (per-axis Kalman filter plus motion-adaptive
//! blend) and publishes them with the frame through a latest-wins exchange.
//! The render loop extrapolates between detections, builds feathered region
//! meshes, and composites makeup in a chain of GPU passes.

pub mod analysis;
pub mod config;
pub mod coords;
pub mod data;
pub mod detector;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod filter;
pub mod geometry;
pub mod landmarks;
pub mod predictor;
pub mod producer;
pub mod raster;
pub mod render;
pub mod scheduler;
pub mod shading;
pub mod style;
pub mod tracking;
pub mod video;

pub use config::PipelineConfig;
pub use engine::MakeupEngine;
pub use error::{PipelineError, Result};
pub use render::{RenderPipeline, RenderStats, VisualizationMode};
pub use style::StyleParameters;
