//! Uniform blocks uploaded to the WGSL programs. Every struct is `#[repr(C)]`,
//! `Pod`, and padded to a multiple of 16 bytes to match the WGSL layout.

use bytemuck::{Pod, Zeroable};

use crate::analysis::LightingEstimate;
use crate::config::RenderConfig;
use crate::geometry::{
    ContourGeometry, EffectKind, EllipseShape, FaceGeometry, MaskChannel, Side, SideVisibility,
};
use crate::shading;
use crate::style::StyleParameters;

pub const MAX_CONTOUR_SEGMENTS: usize = 64;
pub const MAX_CONTOUR_SPOTS: usize = 16;
pub const MAX_EXCLUSIONS: usize = 16;

/// Seed for the blush grain and sparkle hash. Fixed so sparkles stay put
/// on the skin from frame to frame.
pub const PIGMENT_SEED: u32 = 1_013;

/// Matches `FrameGlobals` in common.wgsl.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FrameGlobals {
    pub resolution: [f32; 2],
    pub mask_resolution: [f32; 2],
    pub aspect: f32,
    pub mirror: u32,
    pub alpha_cutoff: f32,
    pub face_width_px: f32,
}

impl FrameGlobals {
    pub fn new(config: &RenderConfig, size: (u32, u32), mask_size: (u32, u32), face_width_px: f32) -> Self {
        let (width, height) = size;
        Self {
            resolution: [width as f32, height as f32],
            mask_resolution: [mask_size.0 as f32, mask_size.1 as f32],
            aspect: if height == 0 { 1.0 } else { width as f32 / height as f32 },
            mirror: u32::from(config.mirror),
            alpha_cutoff: config.alpha_cutoff,
            face_width_px,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SegmentGpu {
    pub ends: [f32; 4],
    pub params: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct EllipseGpu {
    pub shape: [f32; 4],
    pub params: [f32; 4],
}

impl EllipseGpu {
    fn new(ellipse: &EllipseShape, strength: f32, channel: f32, side_weight: f32) -> Self {
        Self {
            shape: [ellipse.center.x, ellipse.center.y, ellipse.radii.x, ellipse.radii.y],
            params: [ellipse.angle, strength, channel, side_weight],
        }
    }
}

fn channel_code(channel: MaskChannel) -> f32 {
    match channel {
        MaskChannel::Contour => 0.0,
        MaskChannel::Highlight => 1.0,
    }
}

/// Matches `ContourShapes` in contour_mask.wgsl. Polylines are flattened to
/// segments; anything past the fixed capacity is dropped.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ContourShapes {
    pub counts: [u32; 4],
    pub segments: [SegmentGpu; MAX_CONTOUR_SEGMENTS],
    pub spots: [EllipseGpu; MAX_CONTOUR_SPOTS],
    pub exclusions: [EllipseGpu; MAX_EXCLUSIONS],
}

impl ContourShapes {
    pub fn empty() -> Self {
        Self::zeroed()
    }

    /// Each shape's side weight combines yaw visibility with the measured
    /// light direction, when there is one.
    pub fn from_geometry(
        contour: &ContourGeometry,
        visibility: SideVisibility,
        lighting: Option<&LightingEstimate>,
    ) -> Self {
        let side_weight = |side: Side, channel: MaskChannel| {
            let light = lighting.map_or(1.0, |l| l.side_scale(side, channel));
            visibility.for_side(side) * light
        };
        let mut shapes = Self::zeroed();
        let mut segments = 0;
        'strokes: for stroke in &contour.strokes {
            let side = side_weight(stroke.side, stroke.channel);
            for pair in stroke.points.windows(2) {
                if segments == MAX_CONTOUR_SEGMENTS {
                    break 'strokes;
                }
                shapes.segments[segments] = SegmentGpu {
                    ends: [pair[0].x, pair[0].y, pair[1].x, pair[1].y],
                    params: [stroke.half_width, stroke.strength, channel_code(stroke.channel), side],
                };
                segments += 1;
            }
        }

        let spots = contour.spots.len().min(MAX_CONTOUR_SPOTS);
        for (slot, spot) in shapes.spots.iter_mut().zip(&contour.spots) {
            *slot = EllipseGpu::new(
                &spot.shape,
                spot.strength,
                channel_code(spot.channel),
                side_weight(spot.side, spot.channel),
            );
        }

        let exclusions = contour.exclusions.len().min(MAX_EXCLUSIONS);
        for (slot, zone) in shapes.exclusions.iter_mut().zip(&contour.exclusions) {
            *slot = EllipseGpu::new(zone, 0.0, 0.0, 1.0);
        }

        shapes.counts = [segments as u32, spots as u32, exclusions as u32, 0];
        shapes
    }

    pub fn segment_count(&self) -> u32 {
        self.counts[0]
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BlurParams {
    pub direction: [f32; 2],
    pub radius_px: f32,
    pub _pad: f32,
}

impl BlurParams {
    pub fn horizontal(radius_px: f32) -> Self {
        Self {
            direction: [1.0, 0.0],
            radius_px,
            _pad: 0.0,
        }
    }

    pub fn vertical(radius_px: f32) -> Self {
        Self {
            direction: [0.0, 1.0],
            radius_px,
            _pad: 0.0,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SkinParams {
    pub tint: [f32; 4],
    pub amounts: [f32; 4],
}

impl SkinParams {
    pub fn new(style: &StyleParameters, face_width_px: f32) -> Self {
        let foundation = &style.foundation;
        let [r, g, b] = foundation.tint;
        Self {
            tint: [r, g, b, foundation.coverage.clamp(0.0, 1.0)],
            amounts: [
                foundation.smoothing.clamp(0.0, 1.0),
                foundation.concealer.clamp(0.0, 1.0),
                (face_width_px * 0.06).max(2.0),
                (face_width_px * 0.006).max(1.0),
            ],
        }
    }
}

/// Per-draw block for the makeup programs, one slot per draw in a
/// dynamically offset buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DrawParams {
    pub color: [f32; 4],
    pub color_outer: [f32; 4],
    pub sparkle: [f32; 4],
    pub shape: [f32; 4],
}

impl DrawParams {
    /// `None` when the effect is switched off in `style`.
    pub fn for_effect(effect: EffectKind, style: &StyleParameters, visibility: f32) -> Option<Self> {
        let sparkle = [
            style.sparkle.density,
            style.sparkle.intensity,
            style.sparkle.cell_px,
            PIGMENT_SEED as f32,
        ];
        let mut params = Self {
            color: [0.0; 4],
            color_outer: [0.0; 4],
            sparkle,
            shape: [visibility.clamp(0.0, 1.0), 0.0, 0.0, 0.0],
        };
        match effect {
            EffectKind::Lips => {
                params.color = style.lips.to_array();
                params.color_outer[3] = style.lip_gloss;
                style.lips.is_enabled().then_some(params)
            }
            EffectKind::Eyeshadow => {
                params.color = style.eyeshadow.to_array();
                let [r, g, b] = style.eyeshadow_outer;
                params.color_outer = [r, g, b, 0.0];
                style.eyeshadow.is_enabled().then_some(params)
            }
            EffectKind::Blush => {
                params.color = style.blush.to_array();
                style.blush.is_enabled().then_some(params)
            }
            EffectKind::Liner => {
                params.color = style.liner.to_array();
                style.liner.is_enabled().then_some(params)
            }
            EffectKind::Sparkle => style.sparkle_enabled().then_some(params),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct RelightParams {
    pub shadow: [f32; 4],
    pub highlight: [f32; 4],
    pub beard: [f32; 4],
    pub beard_extra: [f32; 4],
}

/// Used when the skin tone could not be sampled.
const NEUTRAL_SKIN: [f32; 3] = [0.78, 0.60, 0.50];

impl RelightParams {
    pub fn new(style: &StyleParameters, geometry: Option<&FaceGeometry>) -> Self {
        let Some(geometry) = geometry else {
            return Self {
                shadow: [1.0, 1.0, 1.0, 0.0],
                highlight: [1.0, 1.0, 1.0, 0.0],
                beard: [0.0, 0.0, 1.0, 1.0],
                beard_extra: [0.0, 0.0, 1.0, 0.0],
            };
        };
        let skin = geometry.skin_tone.unwrap_or(NEUTRAL_SKIN);
        let (gain, highlight_gain) = geometry
            .scene
            .as_ref()
            .map_or((1.0, 1.0), |scene| (scene.contour_gain(), scene.highlight_gain()));
        let sculpt = &style.sculpt;
        let [sr, sg, sb] = sculpt.contour_shade.unwrap_or_else(|| shading::shadow_multiplier(skin));
        let [hr, hg, hb] = sculpt.highlight_shade.unwrap_or_else(|| shading::highlight_color(skin));
        let (beard, beard_extra) = match &geometry.beard_zone {
            Some(zone) => (
                [zone.center.x, zone.center.y, zone.radii.x, zone.radii.y],
                [zone.angle, 1.0, 1.5, 0.0],
            ),
            None => ([0.0, 0.0, 1.0, 1.0], [0.0, 0.0, 1.5, 0.0]),
        };
        Self {
            shadow: [sr, sg, sb, (sculpt.contour_strength * gain).clamp(0.0, 1.0)],
            highlight: [hr, hg, hb, (sculpt.highlight_strength * highlight_gain).clamp(0.0, 1.0)],
            beard,
            beard_extra,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PresentParams {
    pub mode: u32,
    pub _pad: [u32; 3],
}

impl PresentParams {
    pub fn new(mode: u32) -> Self {
        Self { mode, _pad: [0; 3] }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::SceneStats;
    use crate::coords::ViewTransform;
    use crate::detector::{canonical_face, FacePose, FaceScript};
    use crate::geometry::{ContourSpot, ContourStroke, GeometryBuilder};
    use crate::video::{CameraFrame, SyntheticCameraSource};
    use nalgebra::{Point2, Vector2};

    fn shaded_face_geometry() -> FaceGeometry {
        let source = SyntheticCameraSource::new(320, 240, 30.0, FaceScript::still());
        let frame = CameraFrame::from_image(source.render(0.0), 0.0).unwrap();
        GeometryBuilder::new(ViewTransform::new(320, 240, true))
            .build(&canonical_face(&FacePose::default()), Some(&frame))
    }

    #[test]
    fn uniform_sizes_match_wgsl() {
        assert_eq!(std::mem::size_of::<FrameGlobals>(), 32);
        assert_eq!(std::mem::size_of::<SegmentGpu>(), 32);
        assert_eq!(std::mem::size_of::<ContourShapes>(), 16 + 32 * (64 + 16 + 16));
        assert_eq!(std::mem::size_of::<BlurParams>(), 16);
        assert_eq!(std::mem::size_of::<SkinParams>(), 32);
        assert_eq!(std::mem::size_of::<DrawParams>(), 64);
        assert_eq!(std::mem::size_of::<RelightParams>(), 64);
        assert_eq!(std::mem::size_of::<PresentParams>(), 16);
        assert_eq!(std::mem::size_of::<ContourShapes>() % 16, 0);
    }

    fn stroke(points: usize, side: Side) -> ContourStroke {
        ContourStroke {
            points: (0..points).map(|i| Point2::new(i as f32 * 0.01, 0.5)).collect(),
            half_width: 0.05,
            side,
            channel: MaskChannel::Contour,
            strength: 1.0,
        }
    }

    #[test]
    fn strokes_flatten_to_segments_with_side_visibility() {
        let contour = ContourGeometry {
            strokes: vec![stroke(4, Side::Left)],
            spots: vec![ContourSpot {
                shape: EllipseShape {
                    center: Point2::new(0.6, 0.3),
                    radii: Vector2::new(0.05, 0.02),
                    angle: 0.1,
                },
                side: Side::Right,
                channel: MaskChannel::Highlight,
                strength: 0.9,
            }],
            exclusions: Vec::new(),
        };
        let visibility = SideVisibility { left: 0.25, right: 1.0 };
        let shapes = ContourShapes::from_geometry(&contour, visibility, None);
        assert_eq!(shapes.counts, [3, 1, 0, 0]);
        assert_eq!(shapes.segments[0].params, [0.05, 1.0, 0.0, 0.25]);
        assert_eq!(shapes.spots[0].params[2], 1.0);
    }

    #[test]
    fn segment_capacity_is_enforced() {
        let contour = ContourGeometry {
            strokes: vec![stroke(50, Side::Left), stroke(50, Side::Right)],
            ..ContourGeometry::default()
        };
        let shapes = ContourShapes::from_geometry(&contour, SideVisibility::default(), None);
        assert_eq!(shapes.segment_count(), MAX_CONTOUR_SEGMENTS as u32);
    }

    #[test]
    fn disabled_effects_produce_no_draw() {
        let bare = StyleParameters::bare();
        for effect in [
            EffectKind::Lips,
            EffectKind::Eyeshadow,
            EffectKind::Blush,
            EffectKind::Liner,
            EffectKind::Sparkle,
        ] {
            assert!(DrawParams::for_effect(effect, &bare, 1.0).is_none(), "{effect:?}");
        }
        let lips = DrawParams::for_effect(EffectKind::Lips, &StyleParameters::default(), 1.0).unwrap();
        assert_eq!(lips.color[3], 0.68);
    }

    #[test]
    fn side_lighting_shifts_contour_toward_the_lit_side() {
        let geometry = shaded_face_geometry();
        let lighting = geometry.lighting.expect("lighting estimate");
        assert!(lighting.side_bias < 0.0, "synthetic face is lit from the image left");
        let lit = ContourShapes::from_geometry(&geometry.contour, geometry.visibility, Some(&lighting));
        let unlit = ContourShapes::from_geometry(&geometry.contour, geometry.visibility, None);

        // Relative to yaw visibility alone: the lit left side gains contour
        // and loses highlight, the shaded right side the reverse.
        let mut first_segment = 0;
        let mut sides_seen = 0;
        for stroke in &geometry.contour.strokes {
            if first_segment >= MAX_CONTOUR_SEGMENTS {
                break;
            }
            let ratio = lit.segments[first_segment].params[3] / unlit.segments[first_segment].params[3];
            match (stroke.side, stroke.channel) {
                (Side::Left, MaskChannel::Contour) => {
                    assert!(ratio > 1.0, "left contour ratio {ratio}");
                    sides_seen += 1;
                }
                (Side::Right, MaskChannel::Contour) => {
                    assert!(ratio < 1.0, "right contour ratio {ratio}");
                    sides_seen += 1;
                }
                (Side::Center, _) => assert_eq!(ratio, 1.0),
                _ => {}
            }
            first_segment += stroke.points.len().saturating_sub(1);
        }
        assert_eq!(sides_seen, 4);

        for (i, spot) in geometry.contour.spots.iter().enumerate() {
            let ratio = lit.spots[i].params[3] / unlit.spots[i].params[3];
            match (spot.side, spot.channel) {
                (Side::Left, MaskChannel::Highlight) => assert!(ratio < 1.0),
                (Side::Right, MaskChannel::Highlight) => assert!(ratio > 1.0),
                (Side::Left, MaskChannel::Contour) => assert!(ratio > 1.0),
                (Side::Right, MaskChannel::Contour) => assert!(ratio < 1.0),
                (Side::Center, _) => assert_eq!(ratio, 1.0),
            }
        }
    }

    #[test]
    fn highlight_backs_off_in_bright_contrasty_scenes() {
        let style = StyleParameters::default();
        let mut geometry = shaded_face_geometry();
        geometry.scene = Some(SceneStats { exposure: 0.5, contrast: 0.08, samples: 1 });
        let flat = RelightParams::new(&style, Some(&geometry));
        geometry.scene = Some(SceneStats { exposure: 0.85, contrast: 0.30, samples: 1 });
        let bright = RelightParams::new(&style, Some(&geometry));
        assert!(bright.highlight[3] < flat.highlight[3]);
        assert!(bright.highlight[3] < style.sculpt.highlight_strength);
    }

    #[test]
    fn relight_without_a_face_is_neutral() {
        let params = RelightParams::new(&StyleParameters::default(), None);
        assert_eq!(params.shadow[3], 0.0);
        assert_eq!(params.highlight[3], 0.0);
        assert_eq!(params.beard_extra[1], 0.0);
    }

    #[test]
    fn globals_carry_the_mirror_flag() {
        let config = RenderConfig::default();
        let globals = FrameGlobals::new(&config, (640, 480), (160, 120), 200.0);
        assert_eq!(globals.mirror, 1);
        assert!((globals.aspect - 4.0 / 3.0).abs() < 1e-6);
    }
}
