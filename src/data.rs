// src/data.rs
use crate::landmarks::LandmarkSet;
use crate::render::RenderStats;
use crate::scheduler::{LandmarkSource, PreparedFrame};
use anyhow::Result;
use chrono::Local;
use csv::Writer;
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Rows held in memory before they are appended to the CSV.
const FLUSH_ROWS: usize = 256;

#[derive(Debug, Clone, Serialize)]
struct TraceRecord {
    tick: u64,
    render_ms: f64,
    sequence: u64,
    new_packet: bool,
    tracking: bool,
    source: &'static str,

    // Motion
    extrapolation_ms: Option<f64>,
    landmark_shift: Option<f32>,

    // Pose
    face_width_px: Option<f32>,
    yaw: Option<f32>,
    left_visibility: Option<f32>,
    right_visibility: Option<f32>,
    light_side_bias: Option<f32>,

    // Scene
    exposure: Option<f32>,
    contrast: Option<f32>,
    contour_gain: Option<f32>,

    // Render
    makeup_draws: Option<usize>,
    contour_segments: Option<u32>,
    skipped_regions: usize,
}

fn source_name(source: LandmarkSource) -> &'static str {
    match source {
        LandmarkSource::Detection => "detection",
        LandmarkSource::Predicted => "predicted",
        LandmarkSource::None => "none",
    }
}

/// Running totals for the summary, so rows can leave memory once written.
#[derive(Debug, Default)]
struct TraceTotals {
    ticks: u64,
    detected: u64,
    predicted: u64,
    max_extrapolation_ms: f64,
    shift_sum: f64,
    shift_count: u64,
}

impl TraceTotals {
    fn add(&mut self, record: &TraceRecord) {
        self.ticks += 1;
        match record.source {
            "detection" => self.detected += 1,
            "predicted" => self.predicted += 1,
            _ => {}
        }
        if let Some(ms) = record.extrapolation_ms {
            self.max_extrapolation_ms = self.max_extrapolation_ms.max(ms);
        }
        if let Some(shift) = record.landmark_shift {
            self.shift_sum += shift as f64;
            self.shift_count += 1;
        }
    }
}

/// Per-tick tracking and render diagnostics, streamed to CSV for re-tuning
/// the filter, predictor, and contour constants. Rows are buffered and
/// appended every `FLUSH_ROWS` ticks.
pub struct TraceRecorder {
    output_dir: PathBuf,
    session_name: String,
    pending: Vec<TraceRecord>,
    writer: Option<Writer<File>>,
    totals: TraceTotals,
    previous: Option<LandmarkSet>,
}

impl TraceRecorder {
    pub fn new(output_dir: impl AsRef<Path>, session_name: Option<String>) -> Self {
        let session_name = session_name.unwrap_or_else(|| {
            format!("session_{}", Local::now().format("%Y%m%d_%H%M%S"))
        });

        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            session_name,
            pending: Vec::with_capacity(FLUSH_ROWS),
            writer: None,
            totals: TraceTotals::default(),
            previous: None,
        }
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    pub fn csv_path(&self) -> PathBuf {
        self.output_dir.join(&self.session_name).join("trace.csv")
    }

    /// Ticks recorded so far, written or not.
    pub fn len(&self) -> usize {
        self.totals.ticks as usize
    }

    pub fn is_empty(&self) -> bool {
        self.totals.ticks == 0
    }

    /// Rows not yet written to disk.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn record(&mut self, prepared: &PreparedFrame, stats: Option<&RenderStats>) -> Result<()> {
        let packet = &prepared.packet;
        let geometry = prepared.geometry.as_ref();
        let scene = geometry.and_then(|g| g.scene);

        // Shift against the previous tick, in normalized image units.
        let landmark_shift = match (&self.previous, &prepared.landmarks) {
            (Some(previous), Some(current)) => current.mean_displacement(previous),
            _ => None,
        };
        self.previous = prepared.landmarks.clone();

        let record = TraceRecord {
            tick: self.totals.ticks,
            render_ms: prepared.render_ms,
            sequence: packet.sequence,
            new_packet: prepared.new_packet,
            tracking: packet.motion.is_some(),
            source: source_name(prepared.source),
            extrapolation_ms: packet
                .motion
                .as_ref()
                .filter(|_| prepared.source == LandmarkSource::Predicted)
                .map(|motion| motion.extrapolation_ms(prepared.render_ms)),
            landmark_shift,
            face_width_px: geometry.map(|g| g.face_width_px),
            yaw: geometry.map(|g| g.yaw),
            left_visibility: geometry.map(|g| g.visibility.left),
            right_visibility: geometry.map(|g| g.visibility.right),
            light_side_bias: geometry.and_then(|g| g.lighting).map(|l| l.side_bias),
            exposure: scene.map(|s| s.exposure),
            contrast: scene.map(|s| s.contrast),
            contour_gain: scene.map(|s| s.contour_gain()),
            makeup_draws: stats.map(|s| s.makeup_draws),
            contour_segments: stats.map(|s| s.contour_segments),
            skipped_regions: geometry.map(|g| g.skipped.len()).unwrap_or(0),
        };
        self.totals.add(&record);
        self.pending.push(record);

        if self.pending.len() >= FLUSH_ROWS {
            self.flush()?;
        }
        Ok(())
    }

    /// Appends buffered rows to the CSV, creating it on first use.
    pub fn flush(&mut self) -> Result<()> {
        if self.writer.is_none() {
            let csv_path = self.csv_path();
            if let Some(parent) = csv_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            self.writer = Some(Writer::from_writer(File::create(&csv_path)?));
        }
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        for record in self.pending.drain(..) {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn export_csv(&mut self) -> Result<PathBuf> {
        self.flush()?;
        let csv_path = self.csv_path();
        tracing::info!(path = %csv_path.display(), rows = self.totals.ticks, "trace exported");
        Ok(csv_path)
    }

    /// Short plain-text digest of the session, written next to the CSV.
    pub fn write_summary(&self) -> Result<PathBuf> {
        let summary_path = self.output_dir
            .join(&self.session_name)
            .join("summary.txt");

        if let Some(parent) = summary_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(&summary_path, self.summary())?;
        Ok(summary_path)
    }

    pub fn summary(&self) -> String {
        let totals = &self.totals;
        let mean_shift = if totals.shift_count == 0 {
            0.0
        } else {
            totals.shift_sum / totals.shift_count as f64
        };

        format!(
            "session: {}\n\
             ticks: {}\n\
             detection ticks: {}\n\
             predicted ticks: {}\n\
             faceless ticks: {}\n\
             max extrapolation: {:.1} ms\n\
             mean landmark shift per tick: {mean_shift:.5}\n",
            self.session_name,
            totals.ticks,
            totals.detected,
            totals.predicted,
            totals.ticks - totals.detected - totals.predicted,
            totals.max_extrapolation_ms,
        )
    }
}
