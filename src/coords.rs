//! Named coordinate spaces shared by the geometry builder and every shader pass.
//!
//! - **image**: normalized camera image, x/y in [0,1], y down (detector output).
//! - **ndc**: normalized device coordinates of the output, x/y in [-1,1], y up.
//! - **uv**: output texture coordinates, x/y in [0,1], y down.
//! - **camera uv**: where a given output uv samples the camera texture.
//!
//! Mirroring (selfie view) is applied in exactly one place: between image and
//! output space. Shaders receive the same flag through the globals uniform.

use nalgebra::{Point2, Vector3};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewTransform {
    pub mirror: bool,
    pub width: u32,
    pub height: u32,
}

impl ViewTransform {
    pub fn new(width: u32, height: u32, mirror: bool) -> Self {
        Self {
            mirror,
            width,
            height,
        }
    }

    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }

    fn mirror_x(&self, x: f32) -> f32 {
        if self.mirror {
            1.0 - x
        } else {
            x
        }
    }

    pub fn image_to_ndc(&self, p: &Vector3<f32>) -> Point2<f32> {
        let x = self.mirror_x(p.x);
        Point2::new(x * 2.0 - 1.0, 1.0 - p.y * 2.0)
    }

    pub fn ndc_to_image(&self, ndc: Point2<f32>) -> Point2<f32> {
        let x = (ndc.x + 1.0) * 0.5;
        Point2::new(self.mirror_x(x), (1.0 - ndc.y) * 0.5)
    }

    pub fn ndc_to_uv(&self, ndc: Point2<f32>) -> Point2<f32> {
        Point2::new((ndc.x + 1.0) * 0.5, (1.0 - ndc.y) * 0.5)
    }

    pub fn uv_to_ndc(&self, uv: Point2<f32>) -> Point2<f32> {
        Point2::new(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0)
    }

    pub fn image_to_uv(&self, p: &Vector3<f32>) -> Point2<f32> {
        self.ndc_to_uv(self.image_to_ndc(p))
    }

    /// Output uv to the camera texture coordinate holding that pixel.
    pub fn uv_to_camera_uv(&self, uv: Point2<f32>) -> Point2<f32> {
        Point2::new(self.mirror_x(uv.x), uv.y)
    }

    /// Camera pixel coordinates (unmirrored; the camera buffer is never flipped).
    pub fn image_to_pixel(&self, p: &Vector3<f32>) -> Point2<f32> {
        Point2::new(p.x * self.width as f32, p.y * self.height as f32)
    }

    pub fn uv_to_pixel(&self, uv: Point2<f32>) -> Point2<f32> {
        Point2::new(uv.x * self.width as f32, uv.y * self.height as f32)
    }

    /// Distance between two image-space points, in pixels.
    pub fn pixel_distance(&self, a: &Vector3<f32>, b: &Vector3<f32>) -> f32 {
        (self.image_to_pixel(a) - self.image_to_pixel(b)).norm()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Point2<f32>, b: Point2<f32>) -> bool {
        (a - b).norm() < 1e-6
    }

    #[test]
    fn image_corners_map_to_ndc_corners() {
        let view = ViewTransform::new(640, 480, false);
        let top_left = view.image_to_ndc(&Vector3::new(0.0, 0.0, 0.0));
        assert!(close(top_left, Point2::new(-1.0, 1.0)));
        let bottom_right = view.image_to_ndc(&Vector3::new(1.0, 1.0, 0.0));
        assert!(close(bottom_right, Point2::new(1.0, -1.0)));
    }

    #[test]
    fn mirroring_flips_only_x() {
        let plain = ViewTransform::new(640, 480, false);
        let mirrored = ViewTransform::new(640, 480, true);
        let p = Vector3::new(0.2, 0.7, 0.0);
        let a = plain.image_to_ndc(&p);
        let b = mirrored.image_to_ndc(&p);
        assert!((a.x + b.x).abs() < 1e-6);
        assert!((a.y - b.y).abs() < 1e-6);
    }

    #[test]
    fn output_uv_samples_the_same_camera_pixel() {
        let view = ViewTransform::new(320, 240, true);
        let p = Vector3::new(0.3, 0.6, 0.0);
        let uv = view.image_to_uv(&p);
        let camera_uv = view.uv_to_camera_uv(uv);
        assert!(close(camera_uv, Point2::new(0.3, 0.6)));
        assert!(close(view.ndc_to_image(view.image_to_ndc(&p)), Point2::new(0.3, 0.6)));
    }

    #[test]
    fn pixel_distance_respects_aspect() {
        let view = ViewTransform::new(640, 480, true);
        let a = Vector3::new(0.25, 0.5, 0.0);
        let b = Vector3::new(0.75, 0.5, 0.0);
        assert!((view.pixel_distance(&a, &b) - 320.0).abs() < 1e-3);
        assert!((view.aspect() - 4.0 / 3.0).abs() < 1e-6);
    }
}
