// src/exchange.rs - latest-wins handoff between the capture thread and the renderer
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{PipelineError, Result};
use crate::landmarks::LandmarkSet;
use crate::predictor::MotionSnapshot;
use crate::tracking::TrackedFace;
use crate::video::{validate_rgba, CameraFrame};

/// Buffers kept for reuse; one in flight on each side is enough.
const POOL_CAPACITY: usize = 2;

/// Pixels and the landmarks detected on those same pixels. Never mutated
/// after construction; shared with the render side through an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct FramePacket {
    pub sequence: u64,
    pub frame: CameraFrame,
    /// Present only when a detection ran on `frame` and found a face.
    pub face: Option<TrackedFace>,
    /// Tracker motion state at submit time, present while a face is tracked
    /// even when this frame had no detection of its own.
    pub motion: Option<Arc<MotionSnapshot>>,
}

impl FramePacket {
    pub fn timestamp_ms(&self) -> f64 {
        self.frame.timestamp_ms
    }

    pub fn landmarks(&self) -> Option<&LandmarkSet> {
        self.face.as_ref().map(|face| &face.landmarks)
    }

    pub fn landmark_timestamp_ms(&self) -> Option<f64> {
        self.face.as_ref().map(|face| face.source_timestamp_ms)
    }
}

#[derive(Default)]
struct Slot {
    latest: Option<Arc<FramePacket>>,
    sequence: u64,
    pool: Vec<Vec<u8>>,
    recycled: u64,
    dropped: u64,
    last_acquired: u64,
}

/// Single-slot exchange. `submit` replaces whatever is there; `acquire_latest`
/// hands out the newest packet and never blocks on the producer beyond the
/// slot lock.
#[derive(Default)]
pub struct FrameExchange {
    slot: Mutex<Slot>,
    face_detected: AtomicBool,
}

impl FrameExchange {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publishes one packet. Rejects buffers that do not match the stated
    /// size and landmarks that were not detected on this frame.
    pub fn submit(
        &self,
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        face: Option<TrackedFace>,
        timestamp_ms: f64,
    ) -> Result<u64> {
        let frame = CameraFrame::new(width, height, pixels, timestamp_ms)?;
        self.submit_frame(frame, face, None)
    }

    pub fn submit_frame(
        &self,
        frame: CameraFrame,
        face: Option<TrackedFace>,
        motion: Option<Arc<MotionSnapshot>>,
    ) -> Result<u64> {
        validate_rgba(frame.width, frame.height, frame.pixels.len())?;
        if let Some(face) = &face {
            if face.source_timestamp_ms != frame.timestamp_ms {
                return Err(PipelineError::invalid_frame(format!(
                    "landmarks from {} ms paired with pixels from {} ms",
                    face.source_timestamp_ms, frame.timestamp_ms
                )));
            }
            if !face.landmarks.is_finite() {
                return Err(PipelineError::invalid_frame("non-finite landmarks"));
            }
        }
        let motion = motion.or_else(|| face.as_ref().map(|f| f.motion.clone()));
        let detected = face.is_some() || motion.is_some();

        let mut slot = self.lock();
        slot.sequence += 1;
        let packet = Arc::new(FramePacket {
            sequence: slot.sequence,
            frame,
            face,
            motion,
        });
        if let Some(previous) = slot.latest.replace(packet) {
            if previous.sequence > slot.last_acquired {
                slot.dropped += 1;
            }
            // Only reclaim pixels the renderer no longer holds.
            if let Ok(previous) = Arc::try_unwrap(previous) {
                if slot.pool.len() < POOL_CAPACITY {
                    slot.pool.push(previous.frame.pixels);
                }
            }
        }
        self.face_detected.store(detected, Ordering::Release);
        Ok(slot.sequence)
    }

    /// A buffer of `len` bytes for the next frame, reusing released packet
    /// storage when possible. Fresh buffers are zeroed; recycled ones keep
    /// their old contents, so callers must overwrite every byte.
    pub fn take_buffer(&self, len: usize) -> Vec<u8> {
        let recycled = {
            let mut slot = self.lock();
            let index = slot.pool.iter().position(|buf| buf.capacity() >= len);
            let buffer = index.map(|i| slot.pool.swap_remove(i));
            if buffer.is_some() {
                slot.recycled += 1;
            }
            buffer
        };
        match recycled {
            Some(mut buffer) => {
                buffer.resize(len, 0);
                buffer
            }
            None => vec![0; len],
        }
    }

    /// Newest packet, or `None` before the first submit. Calling twice with
    /// no submit in between returns the same packet.
    pub fn acquire_latest(&self) -> Option<Arc<FramePacket>> {
        let mut slot = self.lock();
        let latest = slot.latest.clone();
        if let Some(packet) = &latest {
            slot.last_acquired = slot.last_acquired.max(packet.sequence);
        }
        latest
    }

    pub fn latest_sequence(&self) -> u64 {
        self.lock().sequence
    }

    pub fn face_detected(&self) -> bool {
        self.face_detected.load(Ordering::Acquire)
    }

    /// Packets replaced before the consumer ever acquired them.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    /// Buffers handed out again by [`take_buffer`](Self::take_buffer).
    pub fn recycled(&self) -> u64 {
        self.lock().recycled
    }

    pub fn pooled(&self) -> usize {
        self.lock().pool.len()
    }

    /// Empties the slot and the buffer pool.
    pub fn reset(&self) {
        let mut slot = self.lock();
        *slot = Slot::default();
        self.face_detected.store(false, Ordering::Release);
    }

    pub fn is_empty(&self) -> bool {
        self.lock().latest.is_none()
    }
}
