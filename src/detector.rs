// src/detector.rs - landmark detector seam and a deterministic synthetic detector
use std::ops::Range;

use nalgebra::{Vector2, Vector3};

use crate::error::Result;
use crate::landmarks::{regions, LandmarkSet, LANDMARK_COUNT};
use crate::shading::pcg_hash;
use crate::video::CameraFrame;

/// Face-landmark inference. Called synchronously from the capture thread
/// with strictly increasing timestamps, never concurrently with itself.
///
/// `Ok(None)` means no face; `Err` is a transient failure for this frame.
pub trait LandmarkDetector: Send {
    fn detect(&mut self, frame: &CameraFrame) -> Result<Option<LandmarkSet>>;
}

impl<F> LandmarkDetector for F
where
    F: FnMut(&CameraFrame) -> Result<Option<LandmarkSet>> + Send,
{
    fn detect(&mut self, frame: &CameraFrame) -> Result<Option<LandmarkSet>> {
        self(frame)
    }
}

/// Head placement in the image. Face-local coordinates span x in [-1,1]
/// (cheek to cheek) and y in [-1.3,1.3] (forehead to chin), y down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FacePose {
    /// Face center in normalized image coordinates.
    pub center: Vector2<f32>,
    /// Half face width in normalized image x units.
    pub scale: f32,
    /// Rotation about the vertical axis, radians. Positive turns the
    /// image-left cheek away from the camera.
    pub yaw: f32,
    /// In-plane rotation, radians.
    pub roll: f32,
    /// 0 closed, 1 wide open.
    pub mouth_open: f32,
    /// Image width over height, so the face is not squashed in non-square frames.
    pub image_aspect: f32,
}

impl Default for FacePose {
    fn default() -> Self {
        Self {
            center: Vector2::new(0.5, 0.5),
            scale: 0.22,
            yaw: 0.0,
            roll: 0.0,
            mouth_open: 0.0,
            image_aspect: 4.0 / 3.0,
        }
    }
}

impl FacePose {
    /// Face-local (x, y, z) to normalized image space.
    pub fn to_image(&self, local: Vector3<f32>) -> Vector3<f32> {
        let (sy, cy) = self.yaw.sin_cos();
        let x = local.x * cy + local.z * sy;
        let z = -local.x * sy + local.z * cy;
        let (sr, cr) = self.roll.sin_cos();
        let (rx, ry) = (x * cr - local.y * sr, x * sr + local.y * cr);
        Vector3::new(
            self.center.x + rx * self.scale,
            self.center.y + ry * self.scale * self.image_aspect,
            z * self.scale,
        )
    }

    /// Normalized image point to face-local (x, y), ignoring yaw.
    pub fn to_local(&self, x: f32, y: f32) -> (f32, f32) {
        let scale = self.scale.max(1e-6);
        let dx = (x - self.center.x) / scale;
        let dy = (y - self.center.y) / (scale * self.image_aspect.max(1e-6));
        let (sr, cr) = self.roll.sin_cos();
        (dx * cr + dy * sr, -dx * sr + dy * cr)
    }
}

fn ring(cx: f32, cy: f32, rx: f32, ry: f32, start: f32, step: f32, count: usize) -> Vec<(f32, f32)> {
    (0..count)
        .map(|i| {
            let t = start + step * i as f32;
            (cx + rx * t.cos(), cy + ry * t.sin())
        })
        .collect()
}

fn depth(x: f32, y: f32) -> f32 {
    let r2 = x * x + (y / 1.3) * (y / 1.3);
    -0.3 * (1.0 - r2).clamp(0.0, 1.0)
}

/// A full 478-point landmark set for `pose`. Every named region gets a
/// plausible shape; remaining indices fill the face interior.
pub fn canonical_face(pose: &FacePose) -> LandmarkSet {
    let mut local: Vec<Option<(f32, f32)>> = vec![None; LANDMARK_COUNT];
    let mut assign = |indices: &[usize], points: &[(f32, f32)]| {
        for (&i, &p) in indices.iter().zip(points) {
            if local[i].is_none() {
                local[i] = Some(p);
            }
        }
    };
    let tau = std::f32::consts::TAU;
    let pi = std::f32::consts::PI;

    assign(
        &regions::FACE_OVAL,
        &ring(0.0, 0.0, 1.0, 1.3, -pi / 2.0, tau / 36.0, 36),
    );

    let open = pose.mouth_open.clamp(0.0, 1.0);
    assign(
        &regions::LIPS_OUTER,
        &ring(0.0, 0.62, 0.34, 0.13 + 0.06 * open, pi, pi / 10.0, 20),
    );
    assign(
        &regions::LIPS_INNER,
        &ring(0.0, 0.62, 0.26, 0.012 + 0.10 * open, pi, pi / 10.0, 20),
    );

    assign(&regions::LEFT_EYE, &ring(-0.38, -0.12, 0.16, 0.06, pi, tau / 16.0, 16));
    assign(&regions::RIGHT_EYE, &ring(0.38, -0.12, 0.16, 0.06, 0.0, -tau / 16.0, 16));

    for (brow, sign) in [(&regions::LEFT_BROW, -1.0_f32), (&regions::RIGHT_BROW, 1.0)] {
        let mut points = Vec::with_capacity(10);
        // Upper edge outer to inner, then lower edge inner to outer.
        for i in 0..5 {
            let t = i as f32 / 4.0;
            points.push((sign * (0.62 - 0.46 * t), -0.42 - 0.04 * (pi * t).sin()));
        }
        for j in 0..5 {
            let t = j as f32 / 4.0;
            points.push((sign * (0.16 + 0.46 * t), -0.35 - 0.03 * (pi * t).sin()));
        }
        assign(brow, &points);
    }

    assign(&regions::LEFT_CHEEK, &ring(-0.55, 0.22, 0.2, 0.15, -0.75 * pi, tau / 8.0, 8));
    assign(&regions::RIGHT_CHEEK, &ring(0.55, 0.22, 0.2, 0.15, -0.25 * pi, -tau / 8.0, 8));

    let hollow = [(-1.0, 0.0), (-1.0, 0.0), (-0.85, 0.12), (-0.72, 0.22), (-0.6, 0.32)];
    assign(&regions::LEFT_CHEEK_HOLLOW, &hollow);
    let mirrored: Vec<_> = hollow.iter().map(|&(x, y)| (-x, y)).collect();
    assign(&regions::RIGHT_CHEEK_HOLLOW, &mirrored);

    assign(
        &regions::NOSE_BRIDGE,
        &[(0.0, -0.22), (0.0, -0.1), (0.0, 0.02), (0.0, 0.14), (0.0, 0.25)],
    );
    assign(&[regions::NOSE_TIP], &[(0.0, 0.32)]);
    assign(&regions::LEFT_NOSTRIL, &[(-0.16, 0.36), (-0.12, 0.41), (-0.08, 0.37)]);
    assign(&regions::RIGHT_NOSTRIL, &[(0.16, 0.36), (0.12, 0.41), (0.08, 0.37)]);
    assign(&[regions::FOREHEAD_CENTER], &[(0.0, -0.85)]);

    assign(&[regions::LEFT_IRIS_CENTER], &[(-0.38, -0.12)]);
    assign(&[regions::RIGHT_IRIS_CENTER], &[(0.38, -0.12)]);
    assign(&[469, 470, 471, 472], &ring(-0.38, -0.12, 0.05, 0.05, 0.0, tau / 4.0, 4));
    assign(&[474, 475, 476, 477], &ring(0.38, -0.12, 0.05, 0.05, 0.0, tau / 4.0, 4));

    let free: Vec<usize> = (0..LANDMARK_COUNT).filter(|&i| local[i].is_none()).collect();
    let golden = pi * (3.0 - 5.0_f32.sqrt());
    for (k, &i) in free.iter().enumerate() {
        let r = ((k as f32 + 0.5) / free.len() as f32).sqrt() * 0.85;
        let t = k as f32 * golden;
        local[i] = Some((r * t.cos(), 1.3 * r * t.sin()));
    }

    let points = local
        .into_iter()
        .map(|p| {
            let (x, y) = p.unwrap_or((0.0, 0.0));
            pose.to_image(Vector3::new(x, y, depth(x, y)))
        })
        .collect();
    LandmarkSet::from_points(points)
}

/// Pose over time: a base pose with linear drift and a horizontal sway,
/// absent during the listed intervals.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceScript {
    pub base: FacePose,
    /// Normalized image units per millisecond.
    pub drift_per_ms: Vector2<f32>,
    pub sway_amplitude: f32,
    pub sway_period_ms: f64,
    pub absent: Vec<Range<f64>>,
}

impl FaceScript {
    pub fn still() -> Self {
        Self {
            base: FacePose::default(),
            drift_per_ms: Vector2::zeros(),
            sway_amplitude: 0.0,
            sway_period_ms: 2000.0,
            absent: Vec::new(),
        }
    }

    /// Gentle side-to-side motion, used by the demo binary.
    pub fn swaying() -> Self {
        Self {
            sway_amplitude: 0.05,
            ..Self::still()
        }
    }

    pub fn drifting(drift_per_ms: Vector2<f32>) -> Self {
        Self {
            drift_per_ms,
            ..Self::still()
        }
    }

    pub fn with_absence(mut self, range: Range<f64>) -> Self {
        self.absent.push(range);
        self
    }

    pub fn pose_at(&self, timestamp_ms: f64) -> Option<FacePose> {
        if self.absent.iter().any(|r| r.contains(&timestamp_ms)) {
            return None;
        }
        let mut pose = self.base;
        pose.center += self.drift_per_ms * timestamp_ms as f32;
        if self.sway_amplitude != 0.0 && self.sway_period_ms > 0.0 {
            let phase = (timestamp_ms / self.sway_period_ms) * std::f64::consts::TAU;
            pose.center.x += self.sway_amplitude * phase.sin() as f32;
            pose.yaw += self.sway_amplitude * 4.0 * phase.cos() as f32;
        }
        Some(pose)
    }
}

/// Stand-in detector that reads the face pose from a [`FaceScript`] at the
/// frame timestamp, with optional deterministic jitter.
pub struct SyntheticFaceDetector {
    script: FaceScript,
    jitter: f32,
    calls: u32,
}

impl SyntheticFaceDetector {
    pub fn new(script: FaceScript) -> Self {
        Self {
            script,
            jitter: 0.0,
            calls: 0,
        }
    }

    /// Uniform noise of +/- `amount` normalized units on x and y.
    pub fn with_jitter(mut self, amount: f32) -> Self {
        self.jitter = amount.max(0.0);
        self
    }
}

impl LandmarkDetector for SyntheticFaceDetector {
    fn detect(&mut self, frame: &CameraFrame) -> Result<Option<LandmarkSet>> {
        self.calls = self.calls.wrapping_add(1);
        let Some(mut pose) = self.script.pose_at(frame.timestamp_ms) else {
            return Ok(None);
        };
        pose.image_aspect = frame.width as f32 / frame.height.max(1) as f32;
        let face = canonical_face(&pose);
        if self.jitter == 0.0 {
            return Ok(Some(face));
        }

        let seed = pcg_hash(self.calls);
        let noise = |i: usize, axis: u32| {
            let h = pcg_hash(seed ^ pcg_hash(i as u32 * 3 + axis));
            (h as f32 / u32::MAX as f32 * 2.0 - 1.0) * self.jitter
        };
        let points = face
            .points()
            .iter()
            .enumerate()
            .map(|(i, p)| Vector3::new(p.x + noise(i, 0), p.y + noise(i, 1), p.z))
            .collect();
        Ok(Some(LandmarkSet::from_points(points)))
    }
}
