// src/landmarks.rs
use std::sync::Arc;

use nalgebra::Vector3;

/// Points per face in the reference detector topology (468 mesh + 10 iris).
pub const LANDMARK_COUNT: usize = 478;

/// One detection result: positions in normalized image space (x/y in [0,1],
/// y down) with relative depth in z. Immutable and cheap to clone, so a
/// snapshot can be handed across threads without copying.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkSet {
    points: Arc<[Vector3<f32>]>,
}

impl LandmarkSet {
    pub fn from_points(points: Vec<Vector3<f32>>) -> Self {
        Self {
            points: points.into(),
        }
    }

    pub fn from_raw(raw: &[[f32; 3]]) -> Self {
        Self::from_points(raw.iter().map(|p| Vector3::new(p[0], p[1], p[2])).collect())
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Vector3<f32>> {
        self.points.get(index).copied()
    }

    pub fn points(&self) -> &[Vector3<f32>] {
        &self.points
    }

    pub fn is_finite(&self) -> bool {
        self.points
            .iter()
            .all(|p| p.x.is_finite() && p.y.is_finite() && p.z.is_finite())
    }

    /// Mean image-plane displacement between two sets of equal length.
    pub fn mean_displacement(&self, other: &LandmarkSet) -> Option<f32> {
        if self.len() != other.len() || self.is_empty() {
            return None;
        }
        let total: f32 = self
            .points
            .iter()
            .zip(other.points.iter())
            .map(|(a, b)| (a.xy() - b.xy()).norm())
            .sum();
        Some(total / self.len() as f32)
    }

    /// `self + (other - self) * weight`, per point.
    pub fn lerp(&self, other: &LandmarkSet, weight: f32) -> Option<LandmarkSet> {
        if self.len() != other.len() {
            return None;
        }
        let points = self
            .points
            .iter()
            .zip(other.points.iter())
            .map(|(a, b)| a + (b - a) * weight)
            .collect();
        Some(Self::from_points(points))
    }

    /// Axis-aligned bounds of the listed indices, `(min, max)` in normalized image space.
    pub fn bounds_of(&self, indices: &[usize]) -> Option<(Vector3<f32>, Vector3<f32>)> {
        let mut iter = indices.iter().filter_map(|&i| self.get(i));
        let first = iter.next()?;
        Some(iter.fold((first, first), |(lo, hi), p| (lo.inf(&p), hi.sup(&p))))
    }
}

/// Fixed index lists into the detector topology. Order is contractual:
/// rings are listed in drawing order and must never be re-sorted.
pub mod regions {
    pub const FACE_OVAL: [usize; 36] = [
        10, 338, 297, 332, 284, 251, 389, 356, 454, 323, 361, 288, 397, 365, 379, 378, 400, 377,
        152, 148, 176, 149, 150, 136, 172, 58, 132, 93, 234, 127, 162, 21, 54, 103, 67, 109,
    ];

    // Both lip rings start at the image-left mouth corner, run over the
    // upper lip to the opposite corner, and return along the lower lip.
    pub const LIPS_OUTER: [usize; 20] = [
        61, 185, 40, 39, 37, 0, 267, 269, 270, 409, 291, 375, 321, 405, 314, 17, 84, 181, 91, 146,
    ];
    pub const LIPS_INNER: [usize; 20] = [
        78, 191, 80, 81, 82, 13, 312, 311, 310, 415, 308, 324, 318, 402, 317, 14, 87, 178, 88, 95,
    ];

    // Eye rings start at the outer corner and run over the upper lid.
    pub const LEFT_EYE: [usize; 16] = [
        33, 246, 161, 160, 159, 158, 157, 173, 133, 155, 154, 153, 145, 144, 163, 7,
    ];
    pub const RIGHT_EYE: [usize; 16] = [
        263, 466, 388, 387, 386, 385, 384, 398, 362, 382, 381, 380, 374, 373, 390, 249,
    ];

    pub const LEFT_BROW: [usize; 10] = [70, 63, 105, 66, 107, 55, 65, 52, 53, 46];
    pub const RIGHT_BROW: [usize; 10] = [300, 293, 334, 296, 336, 285, 295, 282, 283, 276];

    /// Upper lid (outer to inner) closed against the brow underside.
    pub const LEFT_EYESHADOW: [usize; 14] =
        [33, 246, 161, 160, 159, 158, 157, 173, 133, 55, 65, 52, 53, 46];
    pub const RIGHT_EYESHADOW: [usize; 14] =
        [263, 466, 388, 387, 386, 385, 384, 398, 362, 285, 295, 282, 283, 276];

    pub const LEFT_LASH_LINE: [usize; 9] = [33, 246, 161, 160, 159, 158, 157, 173, 133];
    pub const RIGHT_LASH_LINE: [usize; 9] = [263, 466, 388, 387, 386, 385, 384, 398, 362];

    pub const LEFT_CHEEK: [usize; 8] = [116, 117, 118, 101, 36, 205, 187, 123];
    pub const RIGHT_CHEEK: [usize; 8] = [345, 346, 347, 330, 266, 425, 411, 352];

    pub const LEFT_CHEEK_HOLLOW: [usize; 5] = [234, 93, 137, 177, 215];
    pub const RIGHT_CHEEK_HOLLOW: [usize; 5] = [454, 323, 366, 401, 435];

    pub const LEFT_JAW: [usize; 6] = [172, 136, 150, 149, 176, 148];
    pub const RIGHT_JAW: [usize; 6] = [397, 365, 379, 378, 400, 377];

    pub const NOSE_BRIDGE: [usize; 5] = [168, 6, 197, 195, 5];

    pub const LEFT_NOSTRIL: [usize; 3] = [48, 64, 98];
    pub const RIGHT_NOSTRIL: [usize; 3] = [278, 294, 327];

    pub const FOREHEAD_CENTER: usize = 151;
    pub const FOREHEAD_TOP: usize = 10;
    pub const LEFT_TEMPLE: usize = 54;
    pub const RIGHT_TEMPLE: usize = 284;
    pub const LEFT_CHEEKBONE: usize = 117;
    pub const RIGHT_CHEEKBONE: usize = 346;
    pub const NOSE_TIP: usize = 4;
    pub const CHIN: usize = 152;
    pub const LOWER_LIP_CENTER: usize = 17;
    pub const LEFT_MOUTH_CORNER: usize = 61;
    pub const RIGHT_MOUTH_CORNER: usize = 291;

    /// Widest points of the lower face; their distance is the face width.
    pub const FACE_WIDTH_ENDPOINTS: (usize, usize) = (234, 454);

    pub const LEFT_IRIS_CENTER: usize = 468;
    pub const RIGHT_IRIS_CENTER: usize = 473;

    pub fn all_lists() -> [&'static [usize]; 22] {
        [
            &FACE_OVAL,
            &LIPS_OUTER,
            &LIPS_INNER,
            &LEFT_EYE,
            &RIGHT_EYE,
            &LEFT_BROW,
            &RIGHT_BROW,
            &LEFT_EYESHADOW,
            &RIGHT_EYESHADOW,
            &LEFT_LASH_LINE,
            &RIGHT_LASH_LINE,
            &LEFT_CHEEK,
            &RIGHT_CHEEK,
            &LEFT_CHEEK_HOLLOW,
            &RIGHT_CHEEK_HOLLOW,
            &LEFT_JAW,
            &RIGHT_JAW,
            &NOSE_BRIDGE,
            &LEFT_NOSTRIL,
            &RIGHT_NOSTRIL,
            &[
                FOREHEAD_CENTER,
                FOREHEAD_TOP,
                LEFT_TEMPLE,
                RIGHT_TEMPLE,
                LEFT_CHEEKBONE,
                RIGHT_CHEEKBONE,
                NOSE_TIP,
                CHIN,
                LOWER_LIP_CENTER,
                LEFT_MOUTH_CORNER,
                RIGHT_MOUTH_CORNER,
                FACE_WIDTH_ENDPOINTS.0,
                FACE_WIDTH_ENDPOINTS.1,
            ],
            &[LEFT_IRIS_CENTER, RIGHT_IRIS_CENTER],
        ]
    }

    /// True when every region index fits a topology of `count` points.
    pub fn fits(count: usize) -> bool {
        all_lists().iter().all(|list| list.iter().all(|&i| i < count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_region_fits_the_reference_topology() {
        assert!(regions::fits(LANDMARK_COUNT));
        assert!(!regions::fits(468));
    }

    #[test]
    fn lip_rings_share_corner_orientation() {
        assert_eq!(regions::LIPS_OUTER[0], regions::LEFT_MOUTH_CORNER);
        assert_eq!(regions::LIPS_OUTER[10], regions::RIGHT_MOUTH_CORNER);
        assert_eq!(regions::LIPS_OUTER[15], regions::LOWER_LIP_CENTER);
    }

    #[test]
    fn mean_displacement_requires_equal_lengths() {
        let a = LandmarkSet::from_raw(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]]);
        let b = LandmarkSet::from_raw(&[[0.0, 0.3, 0.0], [1.0, 0.1, 5.0]]);
        let c = LandmarkSet::from_raw(&[[0.0, 0.0, 0.0]]);

        let d = a.mean_displacement(&b).unwrap();
        assert!((d - 0.2).abs() < 1e-6, "depth must not count, got {d}");
        assert!(a.mean_displacement(&c).is_none());
    }

    #[test]
    fn lerp_endpoints() {
        let a = LandmarkSet::from_raw(&[[0.2, 0.4, 0.0]]);
        let b = LandmarkSet::from_raw(&[[0.6, 0.0, 1.0]]);
        assert_eq!(a.lerp(&b, 0.0).unwrap(), a);
        let mid = a.lerp(&b, 0.5).unwrap().get(0).unwrap();
        assert!((mid.x - 0.4).abs() < 1e-6 && (mid.y - 0.2).abs() < 1e-6);
    }

    #[test]
    fn non_finite_points_are_detected() {
        let bad = LandmarkSet::from_raw(&[[0.1, f32::NAN, 0.0]]);
        assert!(!bad.is_finite());
    }
}
