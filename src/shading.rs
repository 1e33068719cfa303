//! CPU reference for the numeric functions used by the WGSL programs in
//! `shaders/`. Each function here has a same-named counterpart in
//! `shaders/common.wgsl` (or the pass that uses it); keep them in lockstep.

use nalgebra::{Point2, Vector2};

/// End of the sharp inner ramp of the edge feather curve.
pub const FEATHER_INNER_RAMP: f32 = 0.20;
/// End of the gentle outer ramp of the edge feather curve.
pub const FEATHER_OUTER_RAMP: f32 = 0.55;
/// Fraction of the strip half-width covered by the strong contour core.
pub const STRIP_CORE_FRACTION: f32 = 0.45;

pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    if edge0 == edge1 {
        return if x < edge0 { 0.0 } else { 1.0 };
    }
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Soft-edge alpha from a feather attribute (0 at the outline, 1 inside).
/// Used by every mesh pass so all regions share one edge profile.
pub fn edge_alpha(feather: f32) -> f32 {
    let f = feather.clamp(0.0, 1.0);
    smoothstep(0.0, FEATHER_INNER_RAMP, f) * smoothstep(0.0, FEATHER_OUTER_RAMP, f)
}

/// Clamps to [0,1] and returns `None` where the fragment would be discarded.
pub fn apply_alpha_cutoff(alpha: f32, cutoff: f32) -> Option<f32> {
    let alpha = alpha.clamp(0.0, 1.0);
    if alpha < cutoff {
        None
    } else {
        Some(alpha)
    }
}

pub fn segment_distance(p: Point2<f32>, a: Point2<f32>, b: Point2<f32>) -> f32 {
    let ab = b - a;
    let len2 = ab.norm_squared();
    if len2 <= f32::EPSILON {
        return (p - a).norm();
    }
    let t = ((p - a).dot(&ab) / len2).clamp(0.0, 1.0);
    (p - (a + ab * t)).norm()
}

pub fn polyline_distance(p: Point2<f32>, points: &[Point2<f32>]) -> Option<f32> {
    match points {
        [] => None,
        [only] => Some((p - only).norm()),
        _ => points
            .windows(2)
            .map(|w| segment_distance(p, w[0], w[1]))
            .reduce(f32::min),
    }
}

/// `(core, blend)` strengths of a contour strip at `distance` from its spine.
/// Both are zero at and beyond `half_width`.
pub fn strip_falloff(distance: f32, half_width: f32) -> (f32, f32) {
    if half_width <= 0.0 || distance >= half_width {
        return (0.0, 0.0);
    }
    let blend = 1.0 - smoothstep(0.0, half_width, distance);
    let core = 1.0 - smoothstep(0.0, half_width * STRIP_CORE_FRACTION, distance);
    (core, blend)
}

/// Normalized radius of `p` in an ellipse rotated by `angle` radians;
/// 1.0 on the boundary.
pub fn ellipse_radius(p: Point2<f32>, center: Point2<f32>, radii: Vector2<f32>, angle: f32) -> f32 {
    let d = p - center;
    let (s, c) = angle.sin_cos();
    let local = Vector2::new(d.x * c + d.y * s, -d.x * s + d.y * c);
    let rx = radii.x.max(1e-6);
    let ry = radii.y.max(1e-6);
    Vector2::new(local.x / rx, local.y / ry).norm()
}

/// Multiplier that removes mask strength inside an exclusion ellipse.
pub fn exclusion_factor(radius: f32) -> f32 {
    smoothstep(0.85, 1.15, radius)
}

/// `(core, blend)` strengths of an elliptical contour or highlight spot at
/// normalized radius `radius`.
pub fn spot_falloff(radius: f32) -> (f32, f32) {
    let core = 1.0 - smoothstep(0.0, 0.6, radius);
    let blend = 1.0 - smoothstep(0.0, 1.0, radius);
    (core, blend)
}

/// Blush strength from region uv (0.5, 0.5 at the center of the cheek).
pub fn blush_falloff(u: f32, v: f32) -> f32 {
    let r = Vector2::new(u - 0.5, v - 0.5).norm() * 2.0;
    (1.0 - smoothstep(0.0, 1.0, r)).powf(1.5)
}

/// Integer hash matching `pcg_hash` in common.wgsl.
pub fn pcg_hash(input: u32) -> u32 {
    let state = input.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    let word = ((state >> ((state >> 28) + 4)) ^ state).wrapping_mul(277_803_737);
    (word >> 22) ^ word
}

pub fn hash_cell(x: i32, y: i32, seed: u32) -> f32 {
    let h = pcg_hash((x as u32) ^ pcg_hash((y as u32) ^ pcg_hash(seed)));
    h as f32 / u32::MAX as f32
}

/// 1.0 for pixels inside a lit sparkle cell, 0.0 elsewhere.
pub fn sparkle_mask(px: f32, py: f32, cell_size: f32, density: f32, seed: u32) -> f32 {
    let cell = cell_size.max(1.0);
    let n = hash_cell((px / cell).floor() as i32, (py / cell).floor() as i32, seed);
    if n > 1.0 - density.clamp(0.0, 1.0) {
        1.0
    } else {
        0.0
    }
}

/// Per-pixel grain used to break up flat blush color.
pub fn grain(px: f32, py: f32, seed: u32) -> f32 {
    hash_cell(px.floor() as i32, py.floor() as i32, seed.wrapping_add(0x9e37_79b9)) - 0.5
}

pub fn luma(rgb: [f32; 3]) -> f32 {
    0.299 * rgb[0] + 0.587 * rgb[1] + 0.114 * rgb[2]
}

/// BT.601 full range, chroma centered on zero.
pub fn rgb_to_ycbcr(rgb: [f32; 3]) -> [f32; 3] {
    let y = luma(rgb);
    let cb = -0.168_736 * rgb[0] - 0.331_264 * rgb[1] + 0.5 * rgb[2];
    let cr = 0.5 * rgb[0] - 0.418_688 * rgb[1] - 0.081_312 * rgb[2];
    [y, cb, cr]
}

pub fn ycbcr_to_rgb(ycc: [f32; 3]) -> [f32; 3] {
    let [y, cb, cr] = ycc;
    [
        y + 1.402 * cr,
        y - 0.344_136 * cb - 0.714_136 * cr,
        y + 1.772 * cb,
    ]
}

pub fn saturation(rgb: [f32; 3]) -> f32 {
    let max = rgb[0].max(rgb[1]).max(rgb[2]);
    let min = rgb[0].min(rgb[1]).min(rgb[2]);
    if max <= 1e-5 {
        0.0
    } else {
        (max - min) / max
    }
}

fn window(x: f32, lo: f32, hi: f32, soft: f32) -> f32 {
    smoothstep(lo - soft, lo + soft, x) * (1.0 - smoothstep(hi - soft, hi + soft, x))
}

/// Soft membership of a color in the skin-likely luma/chroma box.
pub fn skin_likelihood(rgb: [f32; 3]) -> f32 {
    let [y, cb, cr] = rgb_to_ycbcr(rgb);
    window(y, 0.15, 0.92, 0.05) * window(cb, -0.17, 0.02, 0.03) * window(cr, 0.01, 0.21, 0.03)
}

/// Facial-hair texture cue: dark, low-saturation, high local frequency.
pub fn beard_cue(luma: f32, saturation: f32, local_contrast: f32) -> f32 {
    let dark = 1.0 - smoothstep(0.22, 0.40, luma);
    let neutral = 1.0 - smoothstep(0.12, 0.28, saturation);
    let busy = smoothstep(0.025, 0.07, local_contrast);
    dark * neutral * busy
}

/// Contour strength multiplier from scene statistics: boosted under flat
/// lighting, reduced when the scene already has strong shading.
pub fn adaptive_contour_gain(exposure: f32, contrast: f32) -> f32 {
    let exposure_gain = 0.8 + 0.2 * smoothstep(0.15, 0.35, exposure);
    contrast_gain(contrast) * exposure_gain
}

fn contrast_gain(contrast: f32) -> f32 {
    (1.0 + (0.16 - contrast) * 2.5).clamp(0.6, 1.4)
}

/// Highlight strength multiplier: shares the contrast term with contour and
/// backs off as exposure climbs, so already bright skin does not clip.
pub fn adaptive_highlight_gain(exposure: f32, contrast: f32) -> f32 {
    let exposure_gain = 1.0 - 0.4 * smoothstep(0.55, 0.85, exposure);
    contrast_gain(contrast) * exposure_gain
}

/// Per-channel multiplier that deepens skin toward a natural shadow. Deeper
/// skin tones get a milder multiplier so contour does not turn grey.
pub fn shadow_multiplier(skin: [f32; 3]) -> [f32; 3] {
    let light = [0.70, 0.62, 0.58];
    let deep = [0.80, 0.75, 0.72];
    let t = smoothstep(0.2, 0.75, luma(skin));
    [
        deep[0] + (light[0] - deep[0]) * t,
        deep[1] + (light[1] - deep[1]) * t,
        deep[2] + (light[2] - deep[2]) * t,
    ]
}

pub fn highlight_color(skin: [f32; 3]) -> [f32; 3] {
    let target = [1.0, 0.97, 0.92];
    [
        skin[0] + (target[0] - skin[0]) * 0.55,
        skin[1] + (target[1] - skin[1]) * 0.55,
        skin[2] + (target[2] - skin[2]) * 0.55,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_alpha_endpoints_and_monotonicity() {
        assert_eq!(edge_alpha(0.0), 0.0);
        assert_eq!(edge_alpha(1.0), 1.0);
        assert_eq!(edge_alpha(FEATHER_OUTER_RAMP), 1.0);
        let mut last = 0.0;
        for i in 1..=55 {
            let a = edge_alpha(i as f32 / 100.0);
            assert!(a > last, "not increasing at {i}");
            last = a;
        }
    }

    #[test]
    fn inner_ramp_is_sharper_than_outer() {
        // Half way up the inner ramp the product is still well below the
        // outer ramp alone.
        let f = FEATHER_INNER_RAMP * 0.5;
        assert!(edge_alpha(f) < smoothstep(0.0, FEATHER_OUTER_RAMP, f));
    }

    #[test]
    fn cutoff_discards_faint_alpha() {
        assert_eq!(apply_alpha_cutoff(0.004, 0.008), None);
        assert_eq!(apply_alpha_cutoff(1.7, 0.008), Some(1.0));
        assert_eq!(apply_alpha_cutoff(-0.2, 0.0), Some(0.0));
    }

    #[test]
    fn strip_is_bounded_and_core_is_narrower() {
        assert_eq!(strip_falloff(0.05, 0.05), (0.0, 0.0));
        assert_eq!(strip_falloff(0.2, 0.05), (0.0, 0.0));
        let (core, blend) = strip_falloff(0.0, 0.05);
        assert_eq!((core, blend), (1.0, 1.0));
        let (core, blend) = strip_falloff(0.03, 0.05);
        assert_eq!(core, 0.0);
        assert!(blend > 0.0);
    }

    #[test]
    fn polyline_distance_uses_nearest_segment() {
        let line = [
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 1.0),
        ];
        let d = polyline_distance(Point2::new(1.5, 0.5), &line).unwrap();
        assert!((d - 0.5).abs() < 1e-6);
        assert!(polyline_distance(Point2::new(0.0, 0.0), &[]).is_none());
    }

    #[test]
    fn rotated_ellipse_radius() {
        let c = Point2::new(0.0, 0.0);
        let radii = Vector2::new(2.0, 1.0);
        let r = ellipse_radius(Point2::new(0.0, 2.0), c, radii, std::f32::consts::FRAC_PI_2);
        assert!((r - 1.0).abs() < 1e-5, "got {r}");
        assert_eq!(exclusion_factor(0.2), 0.0);
        assert_eq!(exclusion_factor(2.0), 1.0);
    }

    #[test]
    fn spot_core_sits_inside_the_blend() {
        assert_eq!(spot_falloff(0.0), (1.0, 1.0));
        let (core, blend) = spot_falloff(0.7);
        assert_eq!(core, 0.0);
        assert!(blend > 0.0);
        assert_eq!(spot_falloff(1.0), (0.0, 0.0));
    }

    #[test]
    fn blush_peaks_at_center() {
        assert_eq!(blush_falloff(0.5, 0.5), 1.0);
        assert!(blush_falloff(0.7, 0.5) < 1.0);
        assert_eq!(blush_falloff(1.0, 0.5), 0.0);
    }

    #[test]
    fn sparkle_density_controls_coverage() {
        let count = |density: f32| {
            (0..64)
                .flat_map(|y| (0..64).map(move |x| (x, y)))
                .filter(|&(x, y)| sparkle_mask(x as f32 * 4.0, y as f32 * 4.0, 4.0, density, 7) > 0.0)
                .count()
        };
        assert_eq!(count(0.0), 0);
        let sparse = count(0.05);
        let dense = count(0.5);
        assert!(sparse < dense);
        assert!(sparse > 0);
    }

    #[test]
    fn ycbcr_round_trip_is_close() {
        let rgb = [0.8, 0.55, 0.45];
        let back = ycbcr_to_rgb(rgb_to_ycbcr(rgb));
        for c in 0..3 {
            assert!((back[c] - rgb[c]).abs() < 1e-3);
        }
    }

    #[test]
    fn skin_tones_score_higher_than_foliage() {
        let skin = skin_likelihood([0.86, 0.64, 0.52]);
        let green = skin_likelihood([0.2, 0.6, 0.25]);
        assert!(skin > 0.5, "skin scored {skin}");
        assert!(green < 0.05, "green scored {green}");
    }

    #[test]
    fn stubble_cue_requires_all_three_signals() {
        assert!(beard_cue(0.2, 0.05, 0.1) > 0.9);
        assert_eq!(beard_cue(0.6, 0.05, 0.1), 0.0);
        assert_eq!(beard_cue(0.2, 0.5, 0.1), 0.0);
        assert_eq!(beard_cue(0.2, 0.05, 0.0), 0.0);
    }

    #[test]
    fn contour_gain_adapts_to_contrast() {
        let flat = adaptive_contour_gain(0.5, 0.05);
        let harsh = adaptive_contour_gain(0.5, 0.35);
        assert!(flat > 1.0);
        assert!(harsh < 1.0);
    }

    #[test]
    fn deeper_skin_gets_milder_shadow() {
        let fair = shadow_multiplier([0.92, 0.78, 0.70]);
        let deep = shadow_multiplier([0.36, 0.24, 0.18]);
        assert!(deep[0] > fair[0]);
    }
}
