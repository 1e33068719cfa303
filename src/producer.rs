// src/producer.rs - capture/inference side: frame -> detector -> tracker -> exchange
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::detector::LandmarkDetector;
use crate::error::{PipelineError, Result};
use crate::exchange::FrameExchange;
use crate::tracking::{FaceTracker, TrackingPhase};
use crate::video::{CameraFrame, Capture, FrameSource};

/// Snapshot of what the producer is doing, for display by a host UI.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineStatus {
    pub message: String,
    pub face_detected: bool,
    pub frames: u64,
    pub detections: u64,
    pub detector_errors: u64,
    pub capture_errors: u64,
    pub running: bool,
}

#[derive(Debug, Default)]
pub struct StatusBoard {
    inner: Mutex<PipelineStatus>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PipelineStatus> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> PipelineStatus {
        self.lock().clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut PipelineStatus)) {
        f(&mut self.lock());
    }

    pub fn set_message(&self, message: impl Into<String>) {
        self.lock().message = message.into();
    }

    pub fn reset(&self) {
        *self.lock() = PipelineStatus::default();
    }
}

/// What one camera frame produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Detected,
    /// No face (or a failed inference) while not tracking.
    Missed,
    /// This frame ended tracking; filter, blender, and predictor were reset.
    Lost,
    /// Detection was not scheduled for this frame; published with the
    /// current motion state only.
    Carried,
    /// Frame timestamp did not advance; nothing was published.
    Skipped,
}

/// Runs the detector synchronously on each frame and publishes the result.
/// Owns the tracker, so filter state is only ever touched from here.
pub struct InferenceStage {
    detector: Box<dyn LandmarkDetector>,
    tracker: FaceTracker,
    exchange: Arc<FrameExchange>,
    status: Arc<StatusBoard>,
    detect_every: u32,
    frames: u64,
    last_timestamp_ms: Option<f64>,
    detector_failing: bool,
}

impl InferenceStage {
    pub fn new(
        config: &PipelineConfig,
        detector: Box<dyn LandmarkDetector>,
        exchange: Arc<FrameExchange>,
        status: Arc<StatusBoard>,
    ) -> Self {
        Self {
            detector,
            tracker: FaceTracker::new(config),
            exchange,
            status,
            detect_every: config.capture.detect_every.max(1),
            frames: 0,
            last_timestamp_ms: None,
            detector_failing: false,
        }
    }

    pub fn process(&mut self, frame: CameraFrame) -> Result<StageOutcome> {
        let frame = frame.into_upright()?;
        let timestamp_ms = frame.timestamp_ms;
        if self.last_timestamp_ms.is_some_and(|last| timestamp_ms <= last) {
            tracing::debug!(timestamp_ms, "frame timestamp did not advance, dropping frame");
            return Ok(StageOutcome::Skipped);
        }
        self.last_timestamp_ms = Some(timestamp_ms);

        let scheduled = self.frames % self.detect_every as u64 == 0;
        self.frames += 1;

        if !scheduled {
            let motion = self.tracker.snapshot();
            self.exchange.submit_frame(frame, None, motion)?;
            self.status.update(|s| s.frames += 1);
            return Ok(StageOutcome::Carried);
        }

        let detection = match self.detector.detect(&frame) {
            Ok(detection) => {
                if self.detector_failing {
                    tracing::info!("detector recovered");
                    self.detector_failing = false;
                }
                detection
            }
            Err(e) => {
                if !self.detector_failing {
                    tracing::warn!("detector failed, treating frame as no face: {e}");
                    self.detector_failing = true;
                }
                self.status.update(|s| s.detector_errors += 1);
                None
            }
        };

        let output = self.tracker.process(detection, timestamp_ms);
        let detected = output.face.is_some();
        let motion = self.tracker.snapshot();
        self.exchange.submit_frame(frame, output.face, motion)?;

        let tracking = output.phase == TrackingPhase::Tracking;
        let failing = self.detector_failing;
        self.status.update(|s| {
            s.frames += 1;
            if detected {
                s.detections += 1;
            }
            s.face_detected = tracking;
            s.message = match (tracking, failing) {
                (_, true) => "detector unavailable".to_string(),
                (true, false) => "tracking face".to_string(),
                (false, false) => "no face".to_string(),
            };
        });

        Ok(if detected {
            StageOutcome::Detected
        } else if output.lost {
            StageOutcome::Lost
        } else {
            StageOutcome::Missed
        })
    }

    /// Clears tracking state; the next frame starts from `NoFace`.
    pub fn reset(&mut self) {
        self.tracker.reset();
        self.frames = 0;
        self.last_timestamp_ms = None;
        self.detector_failing = false;
    }

    pub fn tracker(&self) -> &FaceTracker {
        &self.tracker
    }
}

/// Dedicated capture thread polling a [`FrameSource`] and feeding an
/// [`InferenceStage`]. Frames the stage cannot keep up with are dropped by
/// the source (latest-wins), never queued.
pub struct CaptureLoop {
    stop: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    status: Arc<StatusBoard>,
}

impl CaptureLoop {
    /// Opens the source on the capture thread and starts polling. Returns
    /// the source's open error if it cannot be created.
    pub fn spawn<S, F>(open_source: F, mut stage: InferenceStage) -> Result<Self>
    where
        S: FrameSource,
        F: FnOnce() -> Result<S> + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let status = stage.status.clone();
        let (opened_tx, opened_rx) = mpsc::sync_channel::<Result<()>>(1);

        let worker = {
            let stop = stop.clone();
            let finished = finished.clone();
            let status = status.clone();
            thread::Builder::new()
                .name("facepaint-capture".to_owned())
                .spawn(move || {
                    let mut source = match open_source() {
                        Ok(source) => {
                            let _ = opened_tx.send(Ok(()));
                            source
                        }
                        Err(e) => {
                            let _ = opened_tx.send(Err(e));
                            finished.store(true, Ordering::Release);
                            return;
                        }
                    };
                    status.update(|s| s.running = true);
                    run_capture(&mut source, &mut stage, &stop);
                    stage.reset();
                    status.update(|s| {
                        s.running = false;
                        s.face_detected = false;
                    });
                    finished.store(true, Ordering::Release);
                })
                .map_err(|e| PipelineError::state(format!("failed to spawn capture thread: {e}")))?
        };

        let opened = opened_rx
            .recv()
            .map_err(|_| PipelineError::state("capture thread exited before opening its source"));
        let mut capture = Self {
            stop,
            finished,
            worker: Some(worker),
            status,
        };
        if let Err(e) = opened.and_then(|r| r) {
            capture.join()?;
            return Err(e);
        }
        tracing::info!("capture loop started");
        Ok(capture)
    }

    /// True once the source ended or the loop was stopped.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn status(&self) -> Arc<StatusBoard> {
        self.status.clone()
    }

    /// Signals the thread and waits for it. Tracking state is reset on the
    /// capture thread before it exits.
    pub fn stop(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::Release);
        self.join()
    }

    fn join(&mut self) -> Result<()> {
        match self.worker.take() {
            Some(handle) => {
                let joined = handle
                    .join()
                    .map_err(|_| PipelineError::state("capture thread panicked"));
                if joined.is_ok() {
                    tracing::info!("capture loop stopped");
                }
                joined
            }
            None => Ok(()),
        }
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::error!("{e}");
        }
    }
}

const CAPTURE_RETRY: Duration = Duration::from_millis(10);

fn run_capture<S: FrameSource>(source: &mut S, stage: &mut InferenceStage, stop: &AtomicBool) {
    source.share_buffers(stage.exchange.clone());
    let mut failing = false;
    while !stop.load(Ordering::Acquire) {
        match source.next_frame() {
            Ok(Capture::Frame(frame)) => {
                failing = false;
                match stage.process(frame) {
                    Ok(_) => {}
                    Err(e) if e.is_fatal() => {
                        tracing::error!("capture stage failed: {e}");
                        break;
                    }
                    Err(e) => tracing::warn!("dropping frame: {e}"),
                }
            }
            Ok(Capture::Idle) => tracing::debug!("no frame from source yet"),
            Ok(Capture::Ended) => {
                tracing::info!("frame source ended");
                stage.status.set_message("camera stream ended");
                break;
            }
            Err(e) => {
                if !failing {
                    tracing::warn!("frame source error: {e}");
                    failing = true;
                }
                stage.status.update(|s| {
                    s.capture_errors += 1;
                    s.message = e.to_string();
                });
                thread::sleep(CAPTURE_RETRY);
            }
        }
    }
}
