// src/raster.rs - CPU rasterization of feathered region meshes
//
// Produces the same coverage the mesh passes write on the GPU (barycentric
// feather interpolation, shared edge curve, alpha cutoff). Used for the face
// mask checks in tests and for the CPU fallback of debug views.

use nalgebra::Point2;

use crate::geometry::{MeshVertex, RegionMesh};
use crate::shading;

/// Single-channel coverage image, row-major, top row first.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatherImage {
    pub width: u32,
    pub height: u32,
    data: Vec<f32>,
}

impl FeatherImage {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width as usize * height as usize],
        }
    }

    pub fn alpha_at(&self, x: u32, y: u32) -> f32 {
        if x >= self.width || y >= self.height {
            return 0.0;
        }
        self.data[y as usize * self.width as usize + x as usize]
    }

    /// Alpha at the pixel containing an NDC position.
    pub fn alpha_at_ndc(&self, ndc: [f32; 2]) -> f32 {
        let p = ndc_to_pixel(ndc, self.width, self.height);
        if p.x < 0.0 || p.y < 0.0 {
            return 0.0;
        }
        self.alpha_at(p.x as u32, p.y as u32)
    }

    pub fn max_alpha(&self) -> f32 {
        self.data.iter().copied().fold(0.0, f32::max)
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// 8-bit grayscale copy, for writing debug images.
    pub fn to_luma8(&self) -> Option<image::GrayImage> {
        let bytes = self
            .data
            .iter()
            .map(|a| (a.clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect();
        image::GrayImage::from_raw(self.width, self.height, bytes)
    }
}

pub fn ndc_to_pixel(ndc: [f32; 2], width: u32, height: u32) -> Point2<f32> {
    Point2::new(
        (ndc[0] + 1.0) * 0.5 * width as f32,
        (1.0 - ndc[1]) * 0.5 * height as f32,
    )
}

fn edge(a: Point2<f32>, b: Point2<f32>, p: Point2<f32>) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

/// Visits every pixel center covered by a triangle with its interpolated feather.
fn for_each_fragment(tri: &[MeshVertex], width: u32, height: u32, mut visit: impl FnMut(u32, u32, f32)) {
    let p: Vec<Point2<f32>> = tri
        .iter()
        .map(|v| ndc_to_pixel(v.position, width, height))
        .collect();
    let area = edge(p[0], p[1], p[2]);
    if area.abs() <= f32::EPSILON {
        return;
    }

    let min_x = p.iter().map(|q| q.x).fold(f32::INFINITY, f32::min).floor().max(0.0) as u32;
    let min_y = p.iter().map(|q| q.y).fold(f32::INFINITY, f32::min).floor().max(0.0) as u32;
    let max_x = p.iter().map(|q| q.x).fold(f32::NEG_INFINITY, f32::max).ceil();
    let max_y = p.iter().map(|q| q.y).fold(f32::NEG_INFINITY, f32::max).ceil();
    if max_x < 0.0 || max_y < 0.0 {
        return;
    }
    let max_x = (max_x as u32).min(width);
    let max_y = (max_y as u32).min(height);

    for y in min_y..max_y {
        for x in min_x..max_x {
            let c = Point2::new(x as f32 + 0.5, y as f32 + 0.5);
            let w0 = edge(p[1], p[2], c) / area;
            let w1 = edge(p[2], p[0], c) / area;
            let w2 = edge(p[0], p[1], c) / area;
            if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                continue;
            }
            let feather = w0 * tri[0].feather + w1 * tri[1].feather + w2 * tri[2].feather;
            visit(x, y, feather);
        }
    }
}

/// Draws `mesh` with `opacity`, keeping the strongest coverage per pixel.
pub fn rasterize(target: &mut FeatherImage, mesh: &RegionMesh, opacity: f32, alpha_cutoff: f32) {
    let (width, height) = (target.width, target.height);
    let opacity = opacity.clamp(0.0, 1.0);
    for tri in mesh.vertices.chunks_exact(3) {
        for_each_fragment(tri, width, height, |x, y, feather| {
            let alpha = shading::edge_alpha(feather) * opacity;
            if let Some(alpha) = shading::apply_alpha_cutoff(alpha, alpha_cutoff) {
                let slot = &mut target.data[y as usize * width as usize + x as usize];
                *slot = slot.max(alpha);
            }
        });
    }
}

/// Destination clearing: scales existing coverage by the inverse of the
/// protected region's edge alpha.
pub fn clear_protected(target: &mut FeatherImage, mesh: &RegionMesh) {
    let width = target.width;
    let height = target.height;
    let mut keep = vec![1.0_f32; target.data.len()];
    for tri in mesh.vertices.chunks_exact(3) {
        for_each_fragment(tri, width, height, |x, y, feather| {
            let slot = &mut keep[y as usize * width as usize + x as usize];
            *slot = slot.min(1.0 - shading::edge_alpha(feather));
        });
    }
    for (value, k) in target.data.iter_mut().zip(keep) {
        *value *= k;
    }
}

pub fn face_mask(mesh: &RegionMesh, width: u32, height: u32, alpha_cutoff: f32) -> FeatherImage {
    let mut image = FeatherImage::new(width, height);
    rasterize(&mut image, mesh, 1.0, alpha_cutoff);
    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{RegionKind, RegionMesh};

    fn triangle() -> RegionMesh {
        let v = |x: f32, y: f32, feather: f32| MeshVertex {
            position: [x, y],
            feather,
            uv: [0.0, 0.0],
        };
        RegionMesh {
            kind: RegionKind::Lips,
            vertices: vec![v(-0.8, -0.8, 1.0), v(0.8, -0.8, 1.0), v(0.0, 0.8, 1.0)],
            centroid: [0.0, -0.27],
        }
    }

    #[test]
    fn solid_triangle_covers_its_interior_only() {
        let image = face_mask(&triangle(), 40, 40, 0.008);
        assert_eq!(image.alpha_at_ndc([0.0, -0.2]), 1.0);
        assert_eq!(image.alpha_at_ndc([0.9, 0.9]), 0.0);
        assert_eq!(image.alpha_at(100, 100), 0.0);
    }

    #[test]
    fn opacity_scales_coverage() {
        let mut image = FeatherImage::new(20, 20);
        rasterize(&mut image, &triangle(), 0.5, 0.008);
        assert!((image.max_alpha() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn protection_clears_the_overlap() {
        let mut image = face_mask(&triangle(), 20, 20, 0.008);
        clear_protected(&mut image, &triangle());
        assert_eq!(image.max_alpha(), 0.0);
    }

    #[test]
    fn debug_export_has_matching_size() {
        let image = face_mask(&triangle(), 12, 9, 0.008);
        let gray = image.to_luma8().unwrap();
        assert_eq!(gray.dimensions(), (12, 9));
    }
}
