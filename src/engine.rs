// src/engine.rs - host-facing lifecycle: setup, per-tick render, capture, teardown
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

use image::RgbaImage;

use crate::config::PipelineConfig;
use crate::data::TraceRecorder;
use crate::detector::LandmarkDetector;
use crate::error::{PipelineError, Result};
use crate::exchange::FrameExchange;
use crate::producer::{CaptureLoop, InferenceStage, PipelineStatus, StatusBoard};
use crate::render::{RenderPipeline, RenderStats, VisualizationMode};
use crate::scheduler::{FrameScheduler, PreparedFrame};
use crate::style::StyleParameters;
use crate::video::FrameSource;

/// Receives the pixels of one still capture, or why it failed.
pub type CaptureCallback = Box<dyn FnOnce(Result<RgbaImage>) + Send + 'static>;

type Delivery = (CaptureCallback, Result<RgbaImage>);

/// Runs capture callbacks off the render thread.
struct DeliveryWorker {
    sender: Option<mpsc::Sender<Delivery>>,
    worker: Option<JoinHandle<()>>,
}

impl DeliveryWorker {
    fn spawn() -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<Delivery>();
        let worker = thread::Builder::new()
            .name("facepaint-deliver".to_owned())
            .spawn(move || {
                while let Ok((callback, result)) = receiver.recv() {
                    callback(result);
                }
            })
            .map_err(|e| PipelineError::state(format!("failed to spawn capture delivery thread: {e}")))?;
        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    fn deliver(&self, callback: CaptureCallback, result: Result<RgbaImage>) {
        let Some(sender) = &self.sender else {
            callback(result);
            return;
        };
        if let Err(mpsc::SendError((callback, result))) = sender.send((callback, result)) {
            tracing::warn!("capture delivery thread is gone, delivering inline");
            callback(result);
        }
    }

    fn finish(&mut self) -> Result<()> {
        drop(self.sender.take());
        match self.worker.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| PipelineError::state("capture delivery thread panicked")),
            None => Ok(()),
        }
    }
}

impl Drop for DeliveryWorker {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            tracing::error!("{e}");
        }
    }
}

/// One makeup pipeline instance. The host calls [`setup`](Self::setup) once,
/// then [`render_tick`](Self::render_tick) from its display callback, and
/// [`teardown`](Self::teardown) before setting up again.
///
/// Style, visualization mode, and capture requests take `&self` so a host
/// can drive them from UI code while the render loop owns the engine.
pub struct MakeupEngine {
    config: PipelineConfig,
    exchange: Arc<FrameExchange>,
    status: Arc<StatusBoard>,
    scheduler: FrameScheduler,
    style: RwLock<Arc<StyleParameters>>,
    mode: AtomicU32,
    pending_captures: Mutex<Vec<CaptureCallback>>,
    renderer: Option<RenderPipeline>,
    producer: Option<CaptureLoop>,
    delivery: Option<DeliveryWorker>,
    trace: Option<TraceRecorder>,
    last_stats: Option<RenderStats>,
}

impl MakeupEngine {
    pub fn new(config: PipelineConfig) -> Self {
        let scheduler = FrameScheduler::new(&config.render);
        Self {
            config,
            exchange: Arc::new(FrameExchange::new()),
            status: Arc::new(StatusBoard::new()),
            scheduler,
            style: RwLock::new(Arc::new(StyleParameters::default())),
            mode: AtomicU32::new(VisualizationMode::Composite.index()),
            pending_captures: Mutex::new(Vec::new()),
            renderer: None,
            producer: None,
            delivery: None,
            trace: None,
            last_stats: None,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn is_set_up(&self) -> bool {
        self.renderer.is_some()
    }

    /// Acquires the GPU, then starts the capture thread on the source
    /// returned by `open_source`. Fails with a state error if the engine is
    /// already running; call [`teardown`](Self::teardown) first.
    pub fn setup<S, F>(&mut self, open_source: F, detector: Box<dyn LandmarkDetector>) -> Result<()>
    where
        S: FrameSource,
        F: FnOnce() -> Result<S> + Send + 'static,
    {
        if self.renderer.is_some() || self.producer.is_some() {
            return Err(PipelineError::state("pipeline is already set up; tear it down first"));
        }
        self.config.validate()?;
        tracing::info!("setting up makeup pipeline");

        let renderer = pollster::block_on(RenderPipeline::new(&self.config.render))?;
        let delivery = DeliveryWorker::spawn()?;
        let stage = InferenceStage::new(
            &self.config,
            detector,
            self.exchange.clone(),
            self.status.clone(),
        );
        let producer = CaptureLoop::spawn(open_source, stage)?;

        self.renderer = Some(renderer);
        self.delivery = Some(delivery);
        self.producer = Some(producer);
        self.status.set_message("starting");
        Ok(())
    }

    /// Renders the latest packet for display time `now_ms`. Returns `None`
    /// before the first frame arrives or when a non-fatal error dropped this
    /// frame. Resource errors are returned; the host should tear down.
    pub fn render_tick(&mut self, now_ms: f64) -> Result<Option<RenderStats>> {
        let style = self.style();
        let mode = self.visualization_mode();
        let Some(renderer) = self.renderer.as_mut() else {
            return Err(PipelineError::state("render tick before setup"));
        };
        let Some(prepared) = self.scheduler.prepare(self.exchange.acquire_latest(), now_ms) else {
            return Ok(None);
        };
        if let Some(geometry) = prepared.geometry.as_ref().filter(|g| !g.skipped.is_empty()) {
            tracing::debug!(skipped = ?geometry.skipped, "regions skipped this frame");
        }

        let stats = match renderer.render(&prepared, &style, mode) {
            Ok(stats) => stats,
            Err(e) if e.is_fatal() => {
                tracing::error!("render failed: {e}");
                return Err(e);
            }
            Err(e) => {
                tracing::warn!("frame dropped: {e}");
                self.trace_tick(&prepared, None);
                return Ok(None);
            }
        };

        self.trace_tick(&prepared, Some(&stats));
        self.service_captures();
        self.last_stats = Some(stats.clone());
        Ok(Some(stats))
    }

    /// A trace that cannot be written is abandoned; rendering carries on.
    fn trace_tick(&mut self, prepared: &PreparedFrame, stats: Option<&RenderStats>) {
        let Some(trace) = self.trace.as_mut() else {
            return;
        };
        if let Err(e) = trace.record(prepared, stats) {
            tracing::warn!("stopping trace, write failed: {e:#}");
            self.trace = None;
        }
    }

    fn service_captures(&self) {
        let pending: Vec<CaptureCallback> = std::mem::take(&mut *self.lock_captures());
        if pending.is_empty() {
            return;
        }
        let Some(renderer) = self.renderer.as_ref() else {
            self.fail_captures(pending, "pipeline is not set up");
            return;
        };
        let image = renderer.read_output();
        match &image {
            Ok(image) => tracing::info!(
                width = image.width(),
                height = image.height(),
                requests = pending.len(),
                "capture read back"
            ),
            Err(e) => tracing::warn!("capture readback failed: {e}"),
        }
        for callback in pending {
            let result = match &image {
                Ok(image) => Ok(image.clone()),
                Err(e) => Err(PipelineError::readback(e.to_string())),
            };
            self.deliver(callback, result);
        }
    }

    fn fail_captures(&self, pending: Vec<CaptureCallback>, reason: &str) {
        for callback in pending {
            self.deliver(callback, Err(PipelineError::state(reason)));
        }
    }

    fn deliver(&self, callback: CaptureCallback, result: Result<RgbaImage>) {
        match &self.delivery {
            Some(delivery) => delivery.deliver(callback, result),
            None => callback(result),
        }
    }

    fn lock_captures(&self) -> std::sync::MutexGuard<'_, Vec<CaptureCallback>> {
        self.pending_captures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a still capture. It is read back after the next rendered frame
    /// and `callback` runs on the delivery thread, never the render thread.
    pub fn request_capture(&self, callback: impl FnOnce(Result<RgbaImage>) + Send + 'static) {
        tracing::info!("capture requested");
        if self.renderer.is_none() {
            self.deliver(Box::new(callback), Err(PipelineError::state("pipeline is not set up")));
            return;
        }
        self.lock_captures().push(Box::new(callback));
    }

    /// Read at the start of every render tick.
    pub fn set_style(&self, style: StyleParameters) {
        let style = Arc::new(style.clamped());
        *self.style.write().unwrap_or_else(PoisonError::into_inner) = style;
    }

    pub fn style(&self) -> Arc<StyleParameters> {
        self.style.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set_visualization_mode(&self, mode: VisualizationMode) {
        self.mode.store(mode.index(), Ordering::Relaxed);
    }

    pub fn visualization_mode(&self) -> VisualizationMode {
        VisualizationMode::from_index(self.mode.load(Ordering::Relaxed))
    }

    pub fn face_detected(&self) -> bool {
        self.exchange.face_detected()
    }

    pub fn status(&self) -> PipelineStatus {
        self.status.snapshot()
    }

    /// True while the capture thread is still delivering frames.
    pub fn is_capturing(&self) -> bool {
        self.producer.as_ref().is_some_and(|p| !p.is_finished())
    }

    pub fn last_stats(&self) -> Option<&RenderStats> {
        self.last_stats.as_ref()
    }

    pub fn output_texture(&self) -> Option<&wgpu::Texture> {
        self.renderer.as_ref().and_then(|r| r.output_texture())
    }

    pub fn adapter_info(&self) -> Option<&wgpu::AdapterInfo> {
        self.renderer.as_ref().map(|r| r.adapter_info())
    }

    pub fn start_trace(&mut self, recorder: TraceRecorder) {
        self.trace = Some(recorder);
    }

    pub fn take_trace(&mut self) -> Option<TraceRecorder> {
        self.trace.take()
    }

    /// Stops the producer, releases the GPU, and clears exchange, scheduler,
    /// and status so the next setup starts clean. Pending captures fail.
    pub fn teardown(&mut self) -> Result<()> {
        if self.renderer.is_none() && self.producer.is_none() && self.delivery.is_none() {
            return Ok(());
        }
        tracing::info!("tearing down makeup pipeline");

        let stopped = match self.producer.take() {
            Some(mut producer) => producer.stop(),
            None => Ok(()),
        };
        self.renderer = None;

        let pending = std::mem::take(&mut *self.lock_captures());
        self.fail_captures(pending, "pipeline torn down before the capture was rendered");
        let delivered = match self.delivery.take() {
            Some(mut delivery) => delivery.finish(),
            None => Ok(()),
        };

        self.exchange.reset();
        self.scheduler.reset();
        self.status.reset();
        self.last_stats = None;
        tracing::info!("pipeline torn down");
        stopped.and(delivered)
    }
}

impl Drop for MakeupEngine {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            tracing::error!("teardown failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_before_setup_is_a_state_error() {
        let mut engine = MakeupEngine::new(PipelineConfig::default());
        assert!(matches!(engine.render_tick(0.0), Err(PipelineError::State(_))));
        assert!(!engine.is_set_up());
        assert!(!engine.face_detected());
    }

    #[test]
    fn capture_without_setup_fails_through_the_callback() {
        let engine = MakeupEngine::new(PipelineConfig::default());
        let (tx, rx) = mpsc::channel();
        engine.request_capture(move |result| {
            let _ = tx.send(result.is_err());
        });
        assert!(rx.recv().unwrap());
    }

    #[test]
    fn style_is_clamped_when_set() {
        let engine = MakeupEngine::new(PipelineConfig::default());
        let mut style = StyleParameters::evening();
        style.lips.opacity = 4.0;
        engine.set_style(style);
        assert!(engine.style().lips.opacity <= 1.0);
        assert_eq!(engine.style().name, "evening");
    }

    #[test]
    fn visualization_mode_is_shared() {
        let engine = MakeupEngine::new(PipelineConfig::default());
        assert_eq!(engine.visualization_mode(), VisualizationMode::Composite);
        engine.set_visualization_mode(VisualizationMode::BeardMask);
        assert_eq!(engine.visualization_mode(), VisualizationMode::BeardMask);
    }

    #[test]
    fn teardown_without_setup_is_a_no_op() {
        let mut engine = MakeupEngine::new(PipelineConfig::default());
        engine.teardown().unwrap();
        engine.teardown().unwrap();
    }

    #[test]
    fn delivery_worker_runs_callbacks_in_order() {
        let mut worker = DeliveryWorker::spawn().unwrap();
        let (tx, rx) = mpsc::channel();
        for i in 0..3 {
            let tx = tx.clone();
            worker.deliver(
                Box::new(move |result: Result<RgbaImage>| {
                    let _ = tx.send((i, result.is_ok()));
                }),
                Ok(RgbaImage::new(1, 1)),
            );
        }
        worker.finish().unwrap();
        let got: Vec<_> = rx.try_iter().collect();
        assert_eq!(got, vec![(0, true), (1, true), (2, true)]);
    }
}
