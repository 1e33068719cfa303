// src/video.rs - camera frame type and frame sources
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

use image::{imageops, Rgba, RgbaImage};

use crate::detector::FaceScript;
use crate::error::{PipelineError, Result};
use crate::exchange::FrameExchange;

/// Sensor orientation of a delivered buffer, as reported by the capture layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    #[default]
    Upright,
    Rotated90,
    Rotated180,
    Rotated270,
}

/// One RGBA8 camera image. The capture timestamp travels with the pixels
/// so the exchange can pair them with landmarks from the same image.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    pub timestamp_ms: f64,
    pub orientation: Orientation,
    pub pixels: Vec<u8>,
}

impl CameraFrame {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>, timestamp_ms: f64) -> Result<Self> {
        validate_rgba(width, height, pixels.len())?;
        if !timestamp_ms.is_finite() {
            return Err(PipelineError::invalid_frame("timestamp is not finite"));
        }
        Ok(Self {
            width,
            height,
            timestamp_ms,
            orientation: Orientation::Upright,
            pixels,
        })
    }

    /// Expands a packed RGB buffer (the common camera decode format) to RGBA.
    pub fn from_rgb(width: u32, height: u32, rgb: &[u8], timestamp_ms: f64) -> Result<Self> {
        Self::from_rgb_into(Vec::new(), width, height, rgb, timestamp_ms)
    }

    /// Like [`from_rgb`](Self::from_rgb), but writes into `storage`, which
    /// is resized to fit.
    pub fn from_rgb_into(
        mut storage: Vec<u8>,
        width: u32,
        height: u32,
        rgb: &[u8],
        timestamp_ms: f64,
    ) -> Result<Self> {
        let texels = width as usize * height as usize;
        if rgb.len() != texels * 3 {
            return Err(PipelineError::invalid_frame(format!(
                "expected {} RGB bytes for {width}x{height}, got {}",
                texels * 3,
                rgb.len()
            )));
        }
        storage.resize(texels * 4, 0);
        for (dst, src) in storage.chunks_exact_mut(4).zip(rgb.chunks_exact(3)) {
            dst[..3].copy_from_slice(src);
            dst[3] = 255;
        }
        Self::new(width, height, storage, timestamp_ms)
    }

    pub fn from_image(image: RgbaImage, timestamp_ms: f64) -> Result<Self> {
        let (width, height) = image.dimensions();
        Self::new(width, height, image.into_raw(), timestamp_ms)
    }

    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn to_image(&self) -> Option<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.pixels.clone())
    }

    /// Rotates the buffer so it is upright. Landmarks must be detected on the
    /// upright frame.
    pub fn into_upright(self) -> Result<Self> {
        if self.orientation == Orientation::Upright {
            return Ok(self);
        }
        let timestamp_ms = self.timestamp_ms;
        let orientation = self.orientation;
        let image = RgbaImage::from_raw(self.width, self.height, self.pixels)
            .ok_or_else(|| PipelineError::invalid_frame("pixel buffer does not match dimensions"))?;
        let upright = match orientation {
            Orientation::Upright => image,
            Orientation::Rotated90 => imageops::rotate270(&image),
            Orientation::Rotated180 => imageops::rotate180(&image),
            Orientation::Rotated270 => imageops::rotate90(&image),
        };
        Self::from_image(upright, timestamp_ms)
    }

    pub fn rgba(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        self.pixels.get(i..i + 4).map(|p| [p[0], p[1], p[2], p[3]])
    }

    /// RGB in [0,1].
    pub fn rgb(&self, x: u32, y: u32) -> Option<[f32; 3]> {
        self.rgba(x, y)
            .map(|p| [p[0] as f32 / 255.0, p[1] as f32 / 255.0, p[2] as f32 / 255.0])
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

pub fn validate_rgba(width: u32, height: u32, len: usize) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(PipelineError::invalid_frame(format!(
            "empty frame {width}x{height}"
        )));
    }
    let expected = width as usize * height as usize * 4;
    if len != expected {
        return Err(PipelineError::invalid_frame(format!(
            "expected {expected} RGBA bytes for {width}x{height}, got {len}"
        )));
    }
    Ok(())
}

/// What one poll of a [`FrameSource`] produced.
#[derive(Debug)]
pub enum Capture {
    Frame(CameraFrame),
    /// Nothing arrived in time. Poll again.
    Idle,
    /// The stream has ended.
    Ended,
}

impl Capture {
    pub fn into_frame(self) -> Option<CameraFrame> {
        match self {
            Capture::Frame(frame) => Some(frame),
            Capture::Idle | Capture::Ended => None,
        }
    }
}

/// A stream of camera frames.
///
/// Sources are created on the capture thread that polls them, so they need
/// not be `Send`.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Capture>;

    fn resolution(&self) -> (u32, u32);

    /// Draw pixel storage from the exchange's pool of released packets
    /// instead of allocating per frame. Sources that receive ready-made
    /// buffers ignore this.
    fn share_buffers(&mut self, _exchange: Arc<FrameExchange>) {}
}

fn take_storage(buffers: Option<&FrameExchange>, len: usize) -> Vec<u8> {
    match buffers {
        Some(exchange) => exchange.take_buffer(len),
        None => vec![0; len],
    }
}

/// Renders a flat-shaded face following a [`FaceScript`], for demos and
/// tests that run without a camera.
pub struct SyntheticCameraSource {
    width: u32,
    height: u32,
    interval_ms: f64,
    next_timestamp_ms: f64,
    remaining: Option<u64>,
    script: FaceScript,
    pace: bool,
    buffers: Option<Arc<FrameExchange>>,
}

impl SyntheticCameraSource {
    pub fn new(width: u32, height: u32, fps: f64, script: FaceScript) -> Self {
        Self {
            width,
            height,
            interval_ms: 1000.0 / fps.max(1.0),
            next_timestamp_ms: 0.0,
            remaining: None,
            script,
            pace: false,
            buffers: None,
        }
    }

    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.remaining = Some(frames);
        self
    }

    /// Sleep between frames so the source runs in real time.
    pub fn paced(mut self) -> Self {
        self.pace = true;
        self
    }

    pub fn render(&self, timestamp_ms: f64) -> RgbaImage {
        let mut image = RgbaImage::new(self.width, self.height);
        self.paint(&mut image, timestamp_ms);
        image
    }

    /// Overwrites every pixel of `image`.
    fn paint(&self, image: &mut RgbaImage, timestamp_ms: f64) {
        let (w, h) = image.dimensions();
        let pose = self.script.pose_at(timestamp_ms).map(|mut pose| {
            pose.image_aspect = w as f32 / h.max(1) as f32;
            pose
        });

        for (x, y, pixel) in image.enumerate_pixels_mut() {
            let face = pose.as_ref().and_then(|pose| {
                let local = pose.to_local(
                    (x as f32 + 0.5) / w as f32,
                    (y as f32 + 0.5) / h as f32,
                );
                face_color(local.0, local.1)
            });
            *pixel = match face {
                Some(color) => Rgba(color),
                None => {
                    let shade = 70 + (40 * y / h.max(1)) as u8;
                    Rgba([shade, shade, shade.saturating_add(10), 255])
                }
            };
        }
    }
}

fn inside(x: f32, y: f32, cx: f32, cy: f32, rx: f32, ry: f32) -> bool {
    let dx = (x - cx) / rx;
    let dy = (y - cy) / ry;
    dx * dx + dy * dy <= 1.0
}

/// Flat colors in face-local coordinates (width 2, height 2.6, y down).
fn face_color(x: f32, y: f32) -> Option<[u8; 4]> {
    if !inside(x, y, 0.0, 0.0, 1.0, 1.3) {
        return None;
    }
    if inside(x, y, 0.0, 0.62, 0.34, 0.13) {
        return Some([170, 90, 92, 255]);
    }
    for cx in [-0.38, 0.38] {
        if inside(x, y, cx, -0.12, 0.16, 0.06) {
            return Some([235, 235, 230, 255]);
        }
        if inside(x, y, cx * 1.05, -0.38, 0.24, 0.04) {
            return Some([60, 45, 38, 255]);
        }
    }
    // Soft side shading so the lighting estimate has something to measure.
    let shade = 1.0 - 0.12 * (x + 1.0) * 0.5;
    Some([
        (222.0 * shade) as u8,
        (170.0 * shade) as u8,
        (140.0 * shade) as u8,
        255,
    ])
}

impl FrameSource for SyntheticCameraSource {
    fn next_frame(&mut self) -> Result<Capture> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return Ok(Capture::Ended);
            }
            *remaining -= 1;
        }
        if self.pace {
            std::thread::sleep(Duration::from_secs_f64(self.interval_ms / 1000.0));
        }
        let timestamp_ms = self.next_timestamp_ms;
        self.next_timestamp_ms += self.interval_ms;

        let len = self.width as usize * self.height as usize * 4;
        let storage = take_storage(self.buffers.as_deref(), len);
        let mut image = RgbaImage::from_raw(self.width, self.height, storage)
            .ok_or_else(|| PipelineError::invalid_frame("frame storage does not match dimensions"))?;
        self.paint(&mut image, timestamp_ms);
        CameraFrame::from_image(image, timestamp_ms).map(Capture::Frame)
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn share_buffers(&mut self, exchange: Arc<FrameExchange>) {
        self.buffers = Some(exchange);
    }
}

/// Frames pushed by an external capture layer. Only the newest queued frame
/// is returned; older ones are dropped.
pub struct ChannelSource {
    receiver: Receiver<CameraFrame>,
    resolution: (u32, u32),
    wait: Duration,
    dropped: u64,
}

impl ChannelSource {
    pub fn new(receiver: Receiver<CameraFrame>, resolution: (u32, u32)) -> Self {
        Self {
            receiver,
            resolution,
            wait: Duration::from_millis(100),
            dropped: 0,
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl FrameSource for ChannelSource {
    fn next_frame(&mut self) -> Result<Capture> {
        let mut newest = match self.receiver.recv_timeout(self.wait) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => return Ok(Capture::Idle),
            Err(RecvTimeoutError::Disconnected) => return Ok(Capture::Ended),
        };
        loop {
            match self.receiver.try_recv() {
                Ok(frame) => {
                    self.dropped += 1;
                    newest = frame;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        Ok(Capture::Frame(newest))
    }

    fn resolution(&self) -> (u32, u32) {
        self.resolution
    }
}

#[cfg(feature = "camera")]
pub use nokhwa_camera::NokhwaCamera;

#[cfg(feature = "camera")]
mod nokhwa_camera {
    use std::sync::Arc;
    use std::time::Instant;

    use nokhwa::pixel_format::RgbFormat;
    use nokhwa::utils::{
        CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
    };
    use nokhwa::Camera;

    use super::{take_storage, CameraFrame, Capture, FrameSource};
    use crate::error::{PipelineError, Result};
    use crate::exchange::FrameExchange;

    pub struct NokhwaCamera {
        camera: Camera,
        started: Instant,
        resolution: (u32, u32),
        buffers: Option<Arc<FrameExchange>>,
    }

    impl NokhwaCamera {
        pub fn open(index: u32, width: u32, height: u32, fps: u32) -> Result<Self> {
            tracing::info!(index, width, height, fps, "opening camera");
            let format = CameraFormat::new(Resolution::new(width, height), FrameFormat::MJPEG, fps);
            let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(format));
            let mut camera = Camera::new(CameraIndex::Index(index), requested)
                .map_err(|e| PipelineError::capture(format!("failed to open camera: {e}")))?;
            camera
                .open_stream()
                .map_err(|e| PipelineError::capture(format!("failed to open camera stream: {e}")))?;
            let actual = camera.resolution();
            tracing::info!(width = actual.width(), height = actual.height(), "camera stream open");
            Ok(Self {
                camera,
                started: Instant::now(),
                resolution: (actual.width(), actual.height()),
                buffers: None,
            })
        }
    }

    impl FrameSource for NokhwaCamera {
        fn next_frame(&mut self) -> Result<Capture> {
            let frame = self
                .camera
                .frame()
                .map_err(|e| PipelineError::capture(format!("failed to capture frame: {e}")))?;
            let timestamp_ms = self.started.elapsed().as_secs_f64() * 1000.0;
            let decoded = frame
                .decode_image::<RgbFormat>()
                .map_err(|e| PipelineError::capture(format!("failed to decode frame: {e}")))?;
            let (width, height) = (decoded.width(), decoded.height());
            let storage = take_storage(self.buffers.as_deref(), width as usize * height as usize * 4);
            CameraFrame::from_rgb_into(storage, width, height, decoded.as_raw(), timestamp_ms)
                .map(Capture::Frame)
        }

        fn resolution(&self) -> (u32, u32) {
            self.resolution
        }

        fn share_buffers(&mut self, exchange: Arc<FrameExchange>) {
            self.buffers = Some(exchange);
        }
    }

    impl Drop for NokhwaCamera {
        fn drop(&mut self) {
            if let Err(e) = self.camera.stop_stream() {
                tracing::warn!("failed to stop camera stream: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn rejects_mismatched_buffers() {
        assert!(CameraFrame::new(4, 4, vec![0; 63], 0.0).is_err());
        assert!(CameraFrame::new(0, 4, vec![], 0.0).is_err());
        assert!(CameraFrame::new(4, 4, vec![0; 64], f64::NAN).is_err());
        assert!(CameraFrame::new(4, 4, vec![0; 64], 0.0).is_ok());
    }

    #[test]
    fn rgb_expands_to_opaque_rgba() {
        let frame = CameraFrame::from_rgb(2, 1, &[10, 20, 30, 40, 50, 60], 5.0).unwrap();
        assert_eq!(frame.pixels, vec![10, 20, 30, 255, 40, 50, 60, 255]);
        assert_eq!(frame.rgba(1, 0), Some([40, 50, 60, 255]));
        assert_eq!(frame.rgba(2, 0), None);
    }

    #[test]
    fn upright_rotation_swaps_dimensions() {
        let frame = CameraFrame::new(4, 2, vec![0; 32], 1.0)
            .unwrap()
            .with_orientation(Orientation::Rotated90);
        let upright = frame.into_upright().unwrap();
        assert_eq!((upright.width, upright.height), (2, 4));
        assert_eq!(upright.timestamp_ms, 1.0);
    }

    #[test]
    fn synthetic_source_advances_time_and_stops() {
        let mut source =
            SyntheticCameraSource::new(64, 48, 30.0, FaceScript::still()).with_frame_limit(2);
        let a = source.next_frame().unwrap().into_frame().unwrap();
        let b = source.next_frame().unwrap().into_frame().unwrap();
        assert!(b.timestamp_ms > a.timestamp_ms);
        assert!(matches!(source.next_frame().unwrap(), Capture::Ended));
        // Face pixels differ from the background at the image center.
        assert_ne!(a.rgba(32, 24), a.rgba(0, 0));
    }

    #[test]
    fn channel_source_keeps_only_the_newest_frame() {
        let (tx, rx) = mpsc::channel();
        let mut source = ChannelSource::new(rx, (2, 2));
        for t in 0..3 {
            tx.send(CameraFrame::new(2, 2, vec![0; 16], t as f64).unwrap())
                .unwrap();
        }
        let frame = source.next_frame().unwrap().into_frame().unwrap();
        assert_eq!(frame.timestamp_ms, 2.0);
        assert_eq!(source.dropped(), 2);
        drop(tx);
        assert!(matches!(source.next_frame().unwrap(), Capture::Ended));
    }

    #[test]
    fn idle_channel_polls_as_idle_not_error() {
        let (tx, rx) = mpsc::channel::<CameraFrame>();
        let mut source = ChannelSource::new(rx, (2, 2));
        assert!(matches!(source.next_frame().unwrap(), Capture::Idle));
        drop(tx);
        assert!(matches!(source.next_frame().unwrap(), Capture::Ended));
    }

    #[test]
    fn shared_buffers_reuse_released_frame_storage() {
        let exchange = Arc::new(FrameExchange::new());
        let mut source = SyntheticCameraSource::new(16, 12, 30.0, FaceScript::still());
        source.share_buffers(exchange.clone());

        let first = source.next_frame().unwrap().into_frame().unwrap();
        let first_storage = first.pixels.as_ptr();
        let expected = first.pixels.clone();
        exchange.submit_frame(first, None, None).unwrap();
        let second = source.next_frame().unwrap().into_frame().unwrap();
        exchange.submit_frame(second, None, None).unwrap();

        let third = source.next_frame().unwrap().into_frame().unwrap();
        assert_eq!(third.pixels.as_ptr(), first_storage);
        assert_eq!(third.pixels, expected);
        assert_eq!(exchange.recycled(), 1);
    }

    #[test]
    fn rgb_into_reuses_larger_storage() {
        let storage = Vec::with_capacity(64);
        let ptr = storage.as_ptr();
        let frame = CameraFrame::from_rgb_into(storage, 2, 1, &[1, 2, 3, 4, 5, 6], 0.0).unwrap();
        assert_eq!(frame.pixels, vec![1, 2, 3, 255, 4, 5, 6, 255]);
        assert_eq!(frame.pixels.as_ptr(), ptr);
    }
}
