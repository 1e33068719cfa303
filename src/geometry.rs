// src/geometry.rs - landmark set to renderer-facing meshes and derived scalars
use bytemuck::{Pod, Zeroable};
use nalgebra::{Point2, Vector2, Vector3};

use crate::analysis::{self, LightingEstimate, SceneStats};
use crate::coords::ViewTransform;
use crate::landmarks::{regions, LandmarkSet};
use crate::shading;
use crate::video::CameraFrame;

/// Vertex layout shared by the face mask, makeup, and protection programs.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    /// Normalized device coordinates.
    pub position: [f32; 2],
    /// 0 on the region outline, rising to 1 at the interior centroid.
    pub feather: f32,
    /// Region-local coordinates, see [`RegionKind`] for each region's frame.
    pub uv: [f32; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
    Center,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionKind {
    FaceOval,
    Lips,
    MouthOpening,
    LeftEye,
    RightEye,
    LeftBrow,
    RightBrow,
    /// uv.x runs inner corner (0) to outer corner (1); uv.y lid (0) to brow (1).
    LeftEyeshadow,
    RightEyeshadow,
    /// uv.x runs inner (0) to outer (1) along the lash line; uv.y across the stroke.
    LeftLiner,
    RightLiner,
    LeftCheek,
    RightCheek,
}

/// Shading program used for a region in the makeup pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectKind {
    Lips,
    Eyeshadow,
    Blush,
    Liner,
    Sparkle,
}

impl RegionKind {
    pub fn side(self) -> Side {
        match self {
            Self::LeftEye | Self::LeftBrow | Self::LeftEyeshadow | Self::LeftLiner | Self::LeftCheek => {
                Side::Left
            }
            Self::RightEye
            | Self::RightBrow
            | Self::RightEyeshadow
            | Self::RightLiner
            | Self::RightCheek => Side::Right,
            Self::FaceOval | Self::Lips | Self::MouthOpening => Side::Center,
        }
    }

    pub fn effect(self) -> Option<EffectKind> {
        match self {
            Self::Lips => Some(EffectKind::Lips),
            Self::LeftEyeshadow | Self::RightEyeshadow => Some(EffectKind::Eyeshadow),
            Self::LeftLiner | Self::RightLiner => Some(EffectKind::Liner),
            Self::LeftCheek | Self::RightCheek => Some(EffectKind::Blush),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegionMesh {
    pub kind: RegionKind,
    /// Triangle list.
    pub vertices: Vec<MeshVertex>,
    pub centroid: [f32; 2],
}

impl RegionMesh {
    pub fn triangle_count(&self) -> usize {
        self.vertices.len() / 3
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskChannel {
    Contour,
    Highlight,
}

/// A shading strip along a landmark polyline, in mask space.
#[derive(Debug, Clone, PartialEq)]
pub struct ContourStroke {
    pub points: Vec<Point2<f32>>,
    pub half_width: f32,
    pub side: Side,
    pub channel: MaskChannel,
    pub strength: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EllipseShape {
    pub center: Point2<f32>,
    pub radii: Vector2<f32>,
    pub angle: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContourSpot {
    pub shape: EllipseShape,
    pub side: Side,
    pub channel: MaskChannel,
    pub strength: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContourGeometry {
    pub strokes: Vec<ContourStroke>,
    pub spots: Vec<ContourSpot>,
    /// Eyes, brows, lips, nostrils: the contour mask is cleared inside these.
    pub exclusions: Vec<EllipseShape>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SideVisibility {
    pub left: f32,
    pub right: f32,
}

impl SideVisibility {
    pub fn for_side(&self, side: Side) -> f32 {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
            Side::Center => self.left.max(self.right),
        }
    }
}

impl Default for SideVisibility {
    fn default() -> Self {
        Self {
            left: 1.0,
            right: 1.0,
        }
    }
}

/// Everything the render passes need for one frame, derived from one
/// landmark set. Rebuilt every frame; never carried across frames.
#[derive(Debug, Clone)]
pub struct FaceGeometry {
    pub view: ViewTransform,
    pub face_oval: Option<RegionMesh>,
    pub makeup: Vec<RegionMesh>,
    pub protected: Vec<RegionMesh>,
    pub contour: ContourGeometry,
    pub beard_zone: Option<EllipseShape>,
    pub face_width_px: f32,
    /// Face width in mask-space units (output height = 1).
    pub face_width: f32,
    /// Positive when the image-left side of the face is turned away.
    pub yaw: f32,
    pub visibility: SideVisibility,
    pub lighting: Option<LightingEstimate>,
    pub scene: Option<SceneStats>,
    pub skin_tone: Option<[f32; 3]>,
    pub skipped: Vec<&'static str>,
}

impl FaceGeometry {
    pub fn region(&self, kind: RegionKind) -> Option<&RegionMesh> {
        self.makeup
            .iter()
            .chain(self.protected.iter())
            .chain(self.face_oval.iter())
            .find(|mesh| mesh.kind == kind)
    }
}

const MIN_POLYGON_AREA: f32 = 1e-7;
const MOUTH_OPEN_AREA_RATIO: f32 = 0.08;
const LINER_HALF_WIDTH: f32 = 0.010;
const YAW_FADE_START: f32 = 0.05;
const YAW_FADE_END: f32 = 0.6;
const FAR_SIDE_MIN_VISIBILITY: f32 = 0.15;

/// Converts landmark sets into [`FaceGeometry`] for a fixed output view.
#[derive(Debug, Clone, Copy)]
pub struct GeometryBuilder {
    view: ViewTransform,
}

impl GeometryBuilder {
    pub fn new(view: ViewTransform) -> Self {
        Self { view }
    }

    pub fn view(&self) -> ViewTransform {
        self.view
    }

    /// Mask space: output uv with x scaled by the aspect ratio, so distances
    /// are isotropic and one unit equals the output height.
    pub fn to_mask(&self, p: &Vector3<f32>) -> Point2<f32> {
        let uv = self.view.image_to_uv(p);
        Point2::new(uv.x * self.view.aspect(), uv.y)
    }

    pub fn mask_to_ndc(&self, q: Point2<f32>) -> [f32; 2] {
        let uv = Point2::new(q.x / self.view.aspect(), q.y);
        let ndc = self.view.uv_to_ndc(uv);
        [ndc.x, ndc.y]
    }

    fn ring(&self, landmarks: &LandmarkSet, indices: &[usize]) -> Option<Vec<Point2<f32>>> {
        indices
            .iter()
            .map(|&i| landmarks.get(i).map(|p| self.to_mask(&p)))
            .collect()
    }

    fn point(&self, landmarks: &LandmarkSet, index: usize) -> Option<Point2<f32>> {
        landmarks.get(index).map(|p| self.to_mask(&p))
    }

    pub fn build(&self, landmarks: &LandmarkSet, frame: Option<&CameraFrame>) -> FaceGeometry {
        let mut skipped = Vec::new();

        let (face_width_px, face_width) = self.face_width(landmarks).unwrap_or_else(|| {
            skipped.push("face_width");
            (0.0, 0.0)
        });
        let yaw = self.yaw(landmarks).unwrap_or(0.0);
        let visibility = visibility_from_yaw(yaw);

        let mut geometry = FaceGeometry {
            view: self.view,
            face_oval: None,
            makeup: Vec::new(),
            protected: Vec::new(),
            contour: ContourGeometry::default(),
            beard_zone: None,
            face_width_px,
            face_width,
            yaw,
            visibility,
            lighting: None,
            scene: None,
            skin_tone: None,
            skipped,
        };

        if face_width <= 0.0 {
            // Every stroke width and blur radius scales with face width.
            return geometry;
        }

        let mut take = |mesh: Option<RegionMesh>, name: &'static str| -> Option<RegionMesh> {
            if mesh.is_none() {
                tracing::debug!(region = name, "skipping degenerate region");
                geometry.skipped.push(name);
            }
            mesh
        };

        let face_oval = take(
            self.fan_region(landmarks, RegionKind::FaceOval, &regions::FACE_OVAL, UvFrame::Bounds),
            "face_oval",
        );

        let mut makeup = Vec::new();
        let mut protected = Vec::new();

        let lips = take(
            self.fan_region(landmarks, RegionKind::Lips, &regions::LIPS_OUTER, UvFrame::Bounds),
            "lips",
        );
        if let Some(lips) = lips {
            makeup.push(lips);
            if let Some(opening) = self.mouth_opening(landmarks) {
                protected.push(opening);
            }
        }

        let shadow_frames = [
            (
                RegionKind::LeftEyeshadow,
                &regions::LEFT_EYESHADOW[..],
                regions::LEFT_EYE[8],
                regions::LEFT_EYE[0],
                "left_eyeshadow",
            ),
            (
                RegionKind::RightEyeshadow,
                &regions::RIGHT_EYESHADOW[..],
                regions::RIGHT_EYE[8],
                regions::RIGHT_EYE[0],
                "right_eyeshadow",
            ),
        ];
        for (kind, indices, inner, outer, name) in shadow_frames {
            let uv_frame = match (self.point(landmarks, inner), self.point(landmarks, outer)) {
                (Some(inner), Some(outer)) => UvFrame::Axis { origin: inner, toward: outer },
                _ => UvFrame::Bounds,
            };
            if let Some(mesh) = take(self.fan_region(landmarks, kind, indices, uv_frame), name) {
                makeup.push(mesh);
            }
        }

        let cheeks = [
            (RegionKind::LeftCheek, &regions::LEFT_CHEEK[..], "left_cheek"),
            (RegionKind::RightCheek, &regions::RIGHT_CHEEK[..], "right_cheek"),
        ];
        for (kind, indices, name) in cheeks {
            if let Some(mesh) = take(self.fan_region(landmarks, kind, indices, UvFrame::Bounds), name) {
                makeup.push(mesh);
            }
        }

        let liners = [
            (RegionKind::LeftLiner, &regions::LEFT_LASH_LINE[..], "left_liner"),
            (RegionKind::RightLiner, &regions::RIGHT_LASH_LINE[..], "right_liner"),
        ];
        for (kind, indices, name) in liners {
            let mesh = self.stroke_region(landmarks, kind, indices, face_width * LINER_HALF_WIDTH);
            if let Some(mesh) = take(mesh, name) {
                makeup.push(mesh);
            }
        }

        let guarded = [
            (RegionKind::LeftEye, &regions::LEFT_EYE[..], "left_eye"),
            (RegionKind::RightEye, &regions::RIGHT_EYE[..], "right_eye"),
            (RegionKind::LeftBrow, &regions::LEFT_BROW[..], "left_brow"),
            (RegionKind::RightBrow, &regions::RIGHT_BROW[..], "right_brow"),
        ];
        for (kind, indices, name) in guarded {
            if let Some(mesh) = take(self.fan_region(landmarks, kind, indices, UvFrame::Bounds), name) {
                protected.push(mesh);
            }
        }

        geometry.face_oval = face_oval;
        geometry.makeup = makeup;
        geometry.protected = protected;
        geometry.contour = self.contour(landmarks, face_width);
        geometry.beard_zone = self.beard_zone(landmarks);

        if let Some(frame) = frame {
            let radius_px = (face_width_px * 0.03).max(1.0);
            geometry.lighting = analysis::estimate_lighting(frame, landmarks, radius_px);
            geometry.skin_tone = analysis::estimate_skin_tone(frame, landmarks, radius_px);
            geometry.scene = landmarks
                .bounds_of(&regions::FACE_OVAL)
                .map(|(lo, hi)| SceneStats::measure(frame, lo.xy(), hi.xy()));
        }

        geometry
    }

    pub fn face_width(&self, landmarks: &LandmarkSet) -> Option<(f32, f32)> {
        let (a, b) = regions::FACE_WIDTH_ENDPOINTS;
        let (pa, pb) = (landmarks.get(a)?, landmarks.get(b)?);
        let px = self.view.pixel_distance(&pa, &pb);
        if !(px > 1.0) {
            return None;
        }
        let mask = (self.to_mask(&pa) - self.to_mask(&pb)).norm();
        Some((px, mask))
    }

    /// Yaw proxy from the depth difference of the face-width endpoints.
    pub fn yaw(&self, landmarks: &LandmarkSet) -> Option<f32> {
        let (a, b) = regions::FACE_WIDTH_ENDPOINTS;
        let (pa, pb) = (landmarks.get(a)?, landmarks.get(b)?);
        let span = (pb.x - pa.x).abs().max(1e-3);
        Some(((pa.z - pb.z) / span).clamp(-1.0, 1.0))
    }

    fn fan_region(
        &self,
        landmarks: &LandmarkSet,
        kind: RegionKind,
        indices: &[usize],
        frame: UvFrame,
    ) -> Option<RegionMesh> {
        let ring = self.ring(landmarks, indices)?;
        let vertices = fan_mesh(&ring, frame, |q| self.mask_to_ndc(q))?;
        let centroid = polygon_centroid(&ring)?;
        Some(RegionMesh {
            kind,
            vertices,
            centroid: self.mask_to_ndc(centroid),
        })
    }

    fn mouth_opening(&self, landmarks: &LandmarkSet) -> Option<RegionMesh> {
        let outer = self.ring(landmarks, &regions::LIPS_OUTER)?;
        let inner = self.ring(landmarks, &regions::LIPS_INNER)?;
        let outer_area = polygon_area(&outer).abs();
        let inner_area = polygon_area(&inner).abs();
        if outer_area <= MIN_POLYGON_AREA || inner_area < outer_area * MOUTH_OPEN_AREA_RATIO {
            return None;
        }
        self.fan_region(landmarks, RegionKind::MouthOpening, &regions::LIPS_INNER, UvFrame::Bounds)
    }

    fn stroke_region(
        &self,
        landmarks: &LandmarkSet,
        kind: RegionKind,
        indices: &[usize],
        half_width: f32,
    ) -> Option<RegionMesh> {
        let line = self.ring(landmarks, indices)?;
        // Lash lines are listed outer to inner; liner uv runs inner to outer.
        let line: Vec<_> = line.into_iter().rev().collect();
        let vertices = stroke_mesh(&line, half_width, |q| self.mask_to_ndc(q))?;
        let mid = line[line.len() / 2];
        Some(RegionMesh {
            kind,
            vertices,
            centroid: self.mask_to_ndc(mid),
        })
    }

    fn contour(&self, landmarks: &LandmarkSet, face_width: f32) -> ContourGeometry {
        let mut contour = ContourGeometry::default();

        let strokes = [
            (&regions::LEFT_CHEEK_HOLLOW[..], Side::Left, MaskChannel::Contour, 0.060, 1.0),
            (&regions::RIGHT_CHEEK_HOLLOW[..], Side::Right, MaskChannel::Contour, 0.060, 1.0),
            (&regions::LEFT_JAW[..], Side::Left, MaskChannel::Contour, 0.050, 0.8),
            (&regions::RIGHT_JAW[..], Side::Right, MaskChannel::Contour, 0.050, 0.8),
            (&regions::NOSE_BRIDGE[..], Side::Center, MaskChannel::Highlight, 0.025, 0.9),
        ];
        for (indices, side, channel, width, strength) in strokes {
            match self.ring(landmarks, indices) {
                Some(points) if points.len() >= 2 => contour.strokes.push(ContourStroke {
                    points,
                    half_width: face_width * width,
                    side,
                    channel,
                    strength,
                }),
                _ => tracing::debug!(?side, ?channel, "skipping contour stroke"),
            }
        }

        let eye_line = match (
            self.point(landmarks, regions::LEFT_EYE[0]),
            self.point(landmarks, regions::RIGHT_EYE[0]),
        ) {
            (Some(a), Some(b)) => {
                let d = b - a;
                d.y.atan2(d.x)
            }
            _ => 0.0,
        };

        let spots = [
            (regions::FOREHEAD_CENTER, Side::Center, MaskChannel::Highlight, (0.16, 0.07), 0.8),
            (regions::LEFT_CHEEKBONE, Side::Left, MaskChannel::Highlight, (0.09, 0.035), 0.7),
            (regions::RIGHT_CHEEKBONE, Side::Right, MaskChannel::Highlight, (0.09, 0.035), 0.7),
            (regions::LEFT_TEMPLE, Side::Left, MaskChannel::Contour, (0.06, 0.12), 0.6),
            (regions::RIGHT_TEMPLE, Side::Right, MaskChannel::Contour, (0.06, 0.12), 0.6),
        ];
        for (index, side, channel, (rx, ry), strength) in spots {
            if let Some(center) = self.point(landmarks, index) {
                contour.spots.push(ContourSpot {
                    shape: EllipseShape {
                        center,
                        radii: Vector2::new(face_width * rx, face_width * ry),
                        angle: eye_line,
                    },
                    side,
                    channel,
                    strength,
                });
            }
        }

        let exclusion_sets: [(&[usize], f32, f32); 7] = [
            (&regions::LEFT_EYE, 1.35, 1.9),
            (&regions::RIGHT_EYE, 1.35, 1.9),
            (&regions::LEFT_BROW, 1.15, 1.8),
            (&regions::RIGHT_BROW, 1.15, 1.8),
            (&regions::LIPS_OUTER, 1.15, 1.35),
            (&regions::LEFT_NOSTRIL, 1.6, 2.4),
            (&regions::RIGHT_NOSTRIL, 1.6, 2.4),
        ];
        let floor = face_width * 0.02;
        for (indices, pad_major, pad_minor) in exclusion_sets {
            if let Some(points) = self.ring(landmarks, indices) {
                if let Some(shape) = fit_ellipse(&points, pad_major, pad_minor, floor) {
                    contour.exclusions.push(shape);
                }
            }
        }

        contour
    }

    /// Lower-face zone (upper lip to chin, jaw to jaw) where facial hair may
    /// be mistaken for shadow.
    fn beard_zone(&self, landmarks: &LandmarkSet) -> Option<EllipseShape> {
        let left = self.point(landmarks, regions::LEFT_MOUTH_CORNER)?;
        let right = self.point(landmarks, regions::RIGHT_MOUTH_CORNER)?;
        let chin = self.point(landmarks, regions::CHIN)?;
        let jaw_l = self.point(landmarks, regions::LEFT_JAW[0])?;
        let jaw_r = self.point(landmarks, regions::RIGHT_JAW[0])?;

        let mouth = Point2::from((left.coords + right.coords) * 0.5);
        let mouth_to_chin = (chin - mouth).norm();
        let half_jaw = (jaw_r - jaw_l).norm() * 0.5;
        if mouth_to_chin <= 1e-5 || half_jaw <= 1e-5 {
            return None;
        }
        let d = right - left;
        Some(EllipseShape {
            center: Point2::from(mouth.coords + (chin - mouth) * 0.35),
            radii: Vector2::new(half_jaw * 0.95, mouth_to_chin * 1.05),
            angle: d.y.atan2(d.x),
        })
    }
}

fn visibility_from_yaw(yaw: f32) -> SideVisibility {
    let fade = |turn: f32| {
        let t = shading::smoothstep(YAW_FADE_START, YAW_FADE_END, turn);
        1.0 - t * (1.0 - FAR_SIDE_MIN_VISIBILITY)
    };
    SideVisibility {
        left: fade(yaw),
        right: fade(-yaw),
    }
}

#[derive(Debug, Clone, Copy)]
enum UvFrame {
    Bounds,
    Axis { origin: Point2<f32>, toward: Point2<f32> },
}

/// Signed shoelace area.
pub fn polygon_area(ring: &[Point2<f32>]) -> f32 {
    if ring.len() < 3 {
        return 0.0;
    }
    let mut twice = 0.0;
    for i in 0..ring.len() {
        let a = ring[i];
        let b = ring[(i + 1) % ring.len()];
        twice += a.x * b.y - b.x * a.y;
    }
    twice * 0.5
}

/// Area centroid; falls back to the vertex mean for near-zero area.
pub fn polygon_centroid(ring: &[Point2<f32>]) -> Option<Point2<f32>> {
    if ring.is_empty() {
        return None;
    }
    let area = polygon_area(ring);
    if area.abs() <= MIN_POLYGON_AREA {
        let sum = ring.iter().fold(Vector2::zeros(), |acc, p| acc + p.coords);
        return Some(Point2::from(sum / ring.len() as f32));
    }
    let (mut cx, mut cy) = (0.0, 0.0);
    for i in 0..ring.len() {
        let a = ring[i];
        let b = ring[(i + 1) % ring.len()];
        let cross = a.x * b.y - b.x * a.y;
        cx += (a.x + b.x) * cross;
        cy += (a.y + b.y) * cross;
    }
    Some(Point2::new(cx / (6.0 * area), cy / (6.0 * area)))
}

fn boundary_distance(p: Point2<f32>, ring: &[Point2<f32>]) -> f32 {
    (0..ring.len())
        .map(|i| shading::segment_distance(p, ring[i], ring[(i + 1) % ring.len()]))
        .fold(f32::INFINITY, f32::min)
}

/// Concentric fan triangulation: boundary ring (feather 0), a half-way ring,
/// and the centroid (feather 1). Feather of the interior vertices is their
/// distance to the outline normalized by the centroid's distance.
fn fan_mesh(
    ring: &[Point2<f32>],
    frame: UvFrame,
    to_ndc: impl Fn(Point2<f32>) -> [f32; 2],
) -> Option<Vec<MeshVertex>> {
    if ring.len() < 3 || polygon_area(ring).abs() <= MIN_POLYGON_AREA {
        return None;
    }
    let center = polygon_centroid(ring)?;
    let depth = boundary_distance(center, ring);
    if !(depth > 1e-6) {
        return None;
    }

    let uv_of = uv_mapper(ring, frame);
    let vertex = |q: Point2<f32>, feather: f32| MeshVertex {
        position: to_ndc(q),
        feather,
        uv: uv_of(q),
    };

    let mid: Vec<_> = ring
        .iter()
        .map(|p| Point2::from(center.coords + (p - center) * 0.5))
        .collect();
    let mid_feather: Vec<_> = mid
        .iter()
        .map(|m| (boundary_distance(*m, ring) / depth).clamp(0.0, 1.0))
        .collect();

    let mut vertices = Vec::with_capacity(ring.len() * 9);
    for i in 0..ring.len() {
        let j = (i + 1) % ring.len();
        let (b0, b1) = (vertex(ring[i], 0.0), vertex(ring[j], 0.0));
        let (m0, m1) = (vertex(mid[i], mid_feather[i]), vertex(mid[j], mid_feather[j]));
        vertices.extend_from_slice(&[b0, b1, m1, b0, m1, m0]);
        vertices.extend_from_slice(&[m0, m1, vertex(center, 1.0)]);
    }
    Some(vertices)
}

fn uv_mapper(ring: &[Point2<f32>], frame: UvFrame) -> impl Fn(Point2<f32>) -> [f32; 2] {
    let (lo, hi) = ring.iter().fold(
        (Point2::new(f32::MAX, f32::MAX), Point2::new(f32::MIN, f32::MIN)),
        |(lo, hi), p| (lo.inf(p), hi.sup(p)),
    );
    let span = Vector2::new((hi.x - lo.x).max(1e-6), (hi.y - lo.y).max(1e-6));

    let axis = match frame {
        UvFrame::Bounds => None,
        UvFrame::Axis { origin, toward } => {
            let dir = toward - origin;
            let len = dir.norm();
            (len > 1e-6).then(|| (origin, dir / len, len))
        }
    };
    let max_lift = axis.map(|(origin, dir, _)| {
        ring.iter()
            .map(|p| {
                let d = p - origin;
                (d.x * dir.y - d.y * dir.x).abs()
            })
            .fold(1e-6_f32, f32::max)
    });

    move |q: Point2<f32>| match (axis, max_lift) {
        (Some((origin, dir, len)), Some(lift)) => {
            let d = q - origin;
            let along = d.dot(&dir) / len;
            let across = (d.x * dir.y - d.y * dir.x).abs() / lift;
            [along.clamp(0.0, 1.0), across.clamp(0.0, 1.0)]
        }
        _ => [(q.x - lo.x) / span.x, (hi.y - q.y) / span.y],
    }
}

/// Three-row strip along a polyline: lower edge and upper edge at feather 0,
/// spine at feather 1. Width tapers toward the start of the line.
fn stroke_mesh(
    line: &[Point2<f32>],
    half_width: f32,
    to_ndc: impl Fn(Point2<f32>) -> [f32; 2],
) -> Option<Vec<MeshVertex>> {
    if line.len() < 2 || !(half_width > 0.0) {
        return None;
    }
    let mut lengths = vec![0.0_f32];
    for w in line.windows(2) {
        let last = lengths.last().copied().unwrap_or(0.0);
        lengths.push(last + (w[1] - w[0]).norm());
    }
    let total = lengths.last().copied().unwrap_or(0.0);
    if total <= 1e-6 {
        return None;
    }

    let mut rows = Vec::with_capacity(line.len());
    for (i, p) in line.iter().enumerate() {
        let prev = line[i.saturating_sub(1)];
        let next = line[(i + 1).min(line.len() - 1)];
        let tangent = next - prev;
        let len = tangent.norm();
        if len <= 1e-9 {
            return None;
        }
        // Normal pointing up the image (negative y).
        let mut normal = Vector2::new(tangent.y, -tangent.x) / len;
        if normal.y > 0.0 {
            normal = -normal;
        }
        let u = lengths[i] / total;
        let hw = half_width * (0.45 + 0.55 * u);
        let lower = Point2::from(p.coords - normal * hw * 0.35);
        let upper = Point2::from(p.coords + normal * hw);
        rows.push([
            MeshVertex { position: to_ndc(lower), feather: 0.0, uv: [u, 0.0] },
            MeshVertex { position: to_ndc(*p), feather: 1.0, uv: [u, 0.5] },
            MeshVertex { position: to_ndc(upper), feather: 0.0, uv: [u, 1.0] },
        ]);
    }

    let mut vertices = Vec::with_capacity((rows.len() - 1) * 12);
    for w in rows.windows(2) {
        let (a, b) = (w[0], w[1]);
        for k in 0..2 {
            vertices.extend_from_slice(&[a[k], b[k], b[k + 1], a[k], b[k + 1], a[k + 1]]);
        }
    }
    Some(vertices)
}

/// Oriented ellipse around a point set, major axis along its first-to-farthest spread.
fn fit_ellipse(points: &[Point2<f32>], pad_major: f32, pad_minor: f32, floor: f32) -> Option<EllipseShape> {
    if points.is_empty() {
        return None;
    }
    let center = Point2::from(
        points.iter().fold(Vector2::zeros(), |acc, p| acc + p.coords) / points.len() as f32,
    );
    let far = points
        .iter()
        .copied()
        .max_by(|a, b| (a - center).norm().total_cmp(&(b - center).norm()))?;
    let axis = far - center;
    let angle = if axis.norm() > 1e-6 { axis.y.atan2(axis.x) } else { 0.0 };
    let (s, c) = angle.sin_cos();

    let (mut major, mut minor) = (0.0_f32, 0.0_f32);
    for p in points {
        let d = p - center;
        major = major.max((d.x * c + d.y * s).abs());
        minor = minor.max((-d.x * s + d.y * c).abs());
    }
    Some(EllipseShape {
        center,
        radii: Vector2::new((major * pad_major).max(floor), (minor * pad_minor).max(floor)),
        angle,
    })
}
