// src/analysis.rs - per-frame image statistics sampled around the face
use nalgebra::{Point2, Vector2};

use crate::geometry::{MaskChannel, Side};
use crate::landmarks::{regions, LandmarkSet};
use crate::shading;
use crate::video::CameraFrame;

/// Exposure and contrast of the face region, used to scale contour strength.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneStats {
    /// Mean luma in [0,1].
    pub exposure: f32,
    /// Luma standard deviation.
    pub contrast: f32,
    pub samples: u32,
}

impl Default for SceneStats {
    fn default() -> Self {
        Self {
            exposure: 0.5,
            contrast: 0.15,
            samples: 0,
        }
    }
}

const SCENE_SAMPLE_GRID: u32 = 48;

impl SceneStats {
    /// Samples a coarse grid inside `lo..hi` (normalized image space).
    pub fn measure(frame: &CameraFrame, lo: Vector2<f32>, hi: Vector2<f32>) -> Self {
        let clamp01 = |v: f32| v.clamp(0.0, 1.0);
        let (x0, x1) = (clamp01(lo.x), clamp01(hi.x));
        let (y0, y1) = (clamp01(lo.y), clamp01(hi.y));
        if !(x1 > x0 && y1 > y0) {
            return Self::default();
        }

        let mut sum = 0.0_f64;
        let mut sum_sq = 0.0_f64;
        let mut samples = 0_u32;
        for j in 0..SCENE_SAMPLE_GRID {
            for i in 0..SCENE_SAMPLE_GRID {
                let u = x0 + (x1 - x0) * (i as f32 + 0.5) / SCENE_SAMPLE_GRID as f32;
                let v = y0 + (y1 - y0) * (j as f32 + 0.5) / SCENE_SAMPLE_GRID as f32;
                let px = ((u * frame.width as f32) as u32).min(frame.width.saturating_sub(1));
                let py = ((v * frame.height as f32) as u32).min(frame.height.saturating_sub(1));
                if let Some(rgb) = frame.rgb(px, py) {
                    let y = shading::luma(rgb) as f64;
                    sum += y;
                    sum_sq += y * y;
                    samples += 1;
                }
            }
        }
        if samples == 0 {
            return Self::default();
        }
        let mean = sum / samples as f64;
        let variance = (sum_sq / samples as f64 - mean * mean).max(0.0);
        Self {
            exposure: mean as f32,
            contrast: variance.sqrt() as f32,
            samples,
        }
    }

    pub fn contour_gain(&self) -> f32 {
        shading::adaptive_contour_gain(self.exposure, self.contrast)
    }

    pub fn highlight_gain(&self) -> f32 {
        shading::adaptive_highlight_gain(self.exposure, self.contrast)
    }
}

/// Mean RGB of a square patch centered on a pixel, clipped to the frame.
pub fn patch_mean(frame: &CameraFrame, center: Point2<f32>, radius_px: f32) -> Option<[f32; 3]> {
    if !(center.x.is_finite() && center.y.is_finite()) {
        return None;
    }
    let r = radius_px.max(0.0).round() as i64;
    let (cx, cy) = (center.x.round() as i64, center.y.round() as i64);
    let (w, h) = (frame.width as i64, frame.height as i64);

    let mut acc = [0.0_f32; 3];
    let mut n = 0_u32;
    for y in (cy - r).max(0)..=(cy + r).min(h - 1) {
        for x in (cx - r).max(0)..=(cx + r).min(w - 1) {
            if let Some(rgb) = frame.rgb(x as u32, y as u32) {
                for c in 0..3 {
                    acc[c] += rgb[c];
                }
                n += 1;
            }
        }
    }
    (n > 0).then(|| acc.map(|c| c / n as f32))
}

pub fn patch_luma(frame: &CameraFrame, center: Point2<f32>, radius_px: f32) -> Option<f32> {
    patch_mean(frame, center, radius_px).map(shading::luma)
}

fn landmark_pixel(frame: &CameraFrame, landmarks: &LandmarkSet, index: usize) -> Option<Point2<f32>> {
    landmarks
        .get(index)
        .map(|p| Point2::new(p.x * frame.width as f32, p.y * frame.height as f32))
}

/// Local light direction from luma patches at the nose and both cheekbones.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightingEstimate {
    pub nose_luma: f32,
    pub left_luma: f32,
    pub right_luma: f32,
    /// -1 when the image-left cheek is fully lit and the right dark, +1 the reverse.
    pub side_bias: f32,
}

pub fn estimate_lighting(
    frame: &CameraFrame,
    landmarks: &LandmarkSet,
    radius_px: f32,
) -> Option<LightingEstimate> {
    let sample = |index| {
        landmark_pixel(frame, landmarks, index).and_then(|p| patch_luma(frame, p, radius_px))
    };
    let nose_luma = sample(regions::NOSE_TIP)?;
    let left_luma = sample(regions::LEFT_CHEEKBONE)?;
    let right_luma = sample(regions::RIGHT_CHEEKBONE)?;
    let side_bias = ((right_luma - left_luma) / (right_luma + left_luma + 1e-4)).clamp(-1.0, 1.0);
    Some(LightingEstimate {
        nose_luma,
        left_luma,
        right_luma,
        side_bias,
    })
}

/// How strongly the cheek luma imbalance shifts contour and highlight
/// between the two sides.
const SIDE_LIGHT_RESPONSE: f32 = 2.0;
const SIDE_SCALE_RANGE: (f32, f32) = (0.5, 1.5);

impl LightingEstimate {
    /// +1 when `side` holds all the light, -1 when it is fully shaded.
    fn litness(&self, side: Side) -> f32 {
        match side {
            Side::Left => -self.side_bias,
            Side::Right => self.side_bias,
            Side::Center => 0.0,
        }
    }

    /// Strength multiplier for a contour or highlight shape on `side`.
    /// Contour goes deeper on the lit side and eases off where the face is
    /// already in shadow; highlight does the opposite.
    pub fn side_scale(&self, side: Side, channel: MaskChannel) -> f32 {
        let shift = SIDE_LIGHT_RESPONSE * self.litness(side);
        let scale = match channel {
            MaskChannel::Contour => 1.0 + shift,
            MaskChannel::Highlight => 1.0 - shift,
        };
        scale.clamp(SIDE_SCALE_RANGE.0, SIDE_SCALE_RANGE.1)
    }
}

/// Average skin color from forehead and cheek patches, skipping patches
/// that do not look like skin (hair, glasses, strong shadow).
pub fn estimate_skin_tone(
    frame: &CameraFrame,
    landmarks: &LandmarkSet,
    radius_px: f32,
) -> Option<[f32; 3]> {
    let mut acc = [0.0_f32; 3];
    let mut weight = 0.0_f32;
    for index in [
        regions::FOREHEAD_CENTER,
        regions::LEFT_CHEEKBONE,
        regions::RIGHT_CHEEKBONE,
    ] {
        let Some(rgb) = landmark_pixel(frame, landmarks, index)
            .and_then(|p| patch_mean(frame, p, radius_px * 1.5))
        else {
            continue;
        };
        let w = shading::skin_likelihood(rgb);
        for c in 0..3 {
            acc[c] += rgb[c] * w;
        }
        weight += w;
    }
    (weight > 0.05).then(|| acc.map(|c| c / weight))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{canonical_face, FacePose, FaceScript};
    use crate::video::SyntheticCameraSource;

    fn flat(width: u32, height: u32, rgb: [u8; 3]) -> CameraFrame {
        let pixels = (0..width * height)
            .flat_map(|_| [rgb[0], rgb[1], rgb[2], 255])
            .collect();
        CameraFrame::new(width, height, pixels, 0.0).unwrap()
    }

    #[test]
    fn flat_frame_has_no_contrast() {
        let frame = flat(32, 32, [128, 128, 128]);
        let stats = SceneStats::measure(&frame, Vector2::new(0.1, 0.1), Vector2::new(0.9, 0.9));
        assert!((stats.exposure - 128.0 / 255.0).abs() < 1e-3);
        assert!(stats.contrast < 1e-3);
        assert!(stats.samples > 0);
    }

    #[test]
    fn empty_region_falls_back_to_defaults() {
        let frame = flat(8, 8, [10, 10, 10]);
        let stats = SceneStats::measure(&frame, Vector2::new(0.5, 0.5), Vector2::new(0.5, 0.9));
        assert_eq!(stats, SceneStats::default());
    }

    #[test]
    fn patch_is_clipped_at_the_border() {
        let frame = flat(4, 4, [255, 0, 0]);
        let mean = patch_mean(&frame, Point2::new(0.0, 0.0), 3.0).unwrap();
        assert!((mean[0] - 1.0).abs() < 1e-6 && mean[1] == 0.0);
        assert!(patch_mean(&frame, Point2::new(f32::NAN, 0.0), 1.0).is_none());
    }

    #[test]
    fn synthetic_face_reads_as_skin_and_lit_from_the_left() {
        let source = SyntheticCameraSource::new(320, 240, 30.0, FaceScript::still());
        let frame = CameraFrame::from_image(source.render(0.0), 0.0).unwrap();
        let face = canonical_face(&FacePose::default());

        let tone = estimate_skin_tone(&frame, &face, 3.0).unwrap();
        assert!(shading::skin_likelihood(tone) > 0.5);

        let light = estimate_lighting(&frame, &face, 3.0).unwrap();
        assert!(light.left_luma > light.right_luma);
        assert!(light.side_bias < 0.0);

        let contour = |side| light.side_scale(side, MaskChannel::Contour);
        let highlight = |side| light.side_scale(side, MaskChannel::Highlight);
        assert!(contour(Side::Left) > contour(Side::Right));
        assert!(highlight(Side::Left) < highlight(Side::Right));
        assert_eq!(contour(Side::Center), 1.0);
    }

    #[test]
    fn side_scales_stay_bounded_and_flat_light_is_neutral() {
        let flat = LightingEstimate {
            nose_luma: 0.6,
            left_luma: 0.6,
            right_luma: 0.6,
            side_bias: 0.0,
        };
        for side in [Side::Left, Side::Right, Side::Center] {
            assert_eq!(flat.side_scale(side, MaskChannel::Contour), 1.0);
            assert_eq!(flat.side_scale(side, MaskChannel::Highlight), 1.0);
        }

        let harsh = LightingEstimate { side_bias: 1.0, ..flat };
        assert_eq!(harsh.side_scale(Side::Right, MaskChannel::Contour), 1.5);
        assert_eq!(harsh.side_scale(Side::Left, MaskChannel::Contour), 0.5);
        assert_eq!(harsh.side_scale(Side::Right, MaskChannel::Highlight), 0.5);
    }

    #[test]
    fn bright_contrasty_scenes_get_less_highlight() {
        let flat = SceneStats { exposure: 0.5, contrast: 0.08, samples: 1 };
        let bright = SceneStats { exposure: 0.85, contrast: 0.30, samples: 1 };
        assert!(bright.highlight_gain() < flat.highlight_gain());
        assert!(bright.highlight_gain() < 1.0);
    }
}
