use super::raster::View;
use crate::scene::Ray;
use glam::{Mat4, Vec2, Vec3};

/// Sub-rectangle of a larger virtual viewport, see
/// [`PerspectiveCamera::set_view_offset`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewOffset {
    pub full_width: f32,
    pub full_height: f32,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PerspectiveCamera {
    /// Vertical field of view, degrees.
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    view_offset: Option<ViewOffset>,
}

impl Default for PerspectiveCamera {
    fn default() -> Self {
        let mut camera = Self::new(75.0, 1.0, 1.0, 10_000.0);
        camera.look_at(Vec3::new(0.0, 1000.0, 1000.0), Vec3::ZERO);
        camera
    }
}

impl PerspectiveCamera {
    pub fn new(fov: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            fov,
            aspect,
            near,
            far,
            position: Vec3::new(0.0, 0.0, 1.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            view_offset: None,
        }
    }

    pub fn look_at(&mut self, position: Vec3, target: Vec3) {
        self.position = position;
        self.target = target;
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }

    /// Renders only the `width`×`height` window at (`x`, `y`) of a virtual
    /// `full_width`×`full_height` viewport, at full projection accuracy.
    pub fn set_view_offset(&mut self, full_width: f32, full_height: f32, x: f32, y: f32, width: f32, height: f32) {
        self.view_offset = Some(ViewOffset {
            full_width,
            full_height,
            x,
            y,
            width,
            height,
        });
    }

    pub fn clear_view_offset(&mut self) {
        self.view_offset = None;
    }

    pub fn view_offset(&self) -> Option<ViewOffset> {
        self.view_offset
    }

    pub fn direction(&self) -> Vec3 {
        (self.target - self.position).normalize_or_zero()
    }

    pub fn view_matrix(&self) -> Mat4 {
        let forward = self.direction();
        // Keep look_at well defined when looking along `up`.
        let up = if forward.cross(self.up).length_squared() < 1e-10 {
            forward.any_orthonormal_vector()
        } else {
            self.up
        };
        Mat4::look_at_rh(self.position, self.target, up)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        let top = self.near * (0.5 * self.fov.to_radians()).tan();
        let mut height = 2.0 * top;
        let mut width = self.aspect * height;
        let mut left = -0.5 * width;
        let mut top = top;
        if let Some(offset) = self.view_offset {
            left += offset.x * width / offset.full_width;
            top -= offset.y * height / offset.full_height;
            width *= offset.width / offset.full_width;
            height *= offset.height / offset.full_height;
        }
        frustum(left, left + width, top - height, top, self.near, self.far)
    }

    pub fn view(&self) -> View {
        View {
            view: self.view_matrix(),
            projection: self.projection_matrix(),
        }
    }

    /// World point to normalized device coordinates.
    pub fn project(&self, world: Vec3) -> Vec3 {
        let clip = self.view().view_proj() * world.extend(1.0);
        if clip.w.abs() < f32::EPSILON {
            return Vec3::splat(f32::NAN);
        }
        clip.truncate() / clip.w
    }

    pub fn unproject(&self, ndc: Vec3) -> Vec3 {
        self.view().view_proj().inverse().project_point3(ndc)
    }

    /// Ray from the eye through a point given in normalized device coordinates.
    pub fn ray_from_ndc(&self, ndc: Vec2) -> Ray {
        let far = self.unproject(ndc.extend(0.5));
        Ray::new(self.position, far - self.position)
    }
}

/// OpenGL-style off-axis perspective frustum.
pub fn frustum(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Mat4 {
    let x = 2.0 * near / (right - left);
    let y = 2.0 * near / (top - bottom);
    let a = (right + left) / (right - left);
    let b = (top + bottom) / (top - bottom);
    let c = -(far + near) / (far - near);
    let d = -2.0 * far * near / (far - near);
    Mat4::from_cols_array(&[
        x, 0.0, 0.0, 0.0, //
        0.0, y, 0.0, 0.0, //
        a, b, c, -1.0, //
        0.0, 0.0, d, 0.0,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symmetric_frustum_matches_glam_perspective() {
        let camera = PerspectiveCamera::new(60.0, 1.5, 0.1, 100.0);
        let expected = Mat4::perspective_rh_gl(60f32.to_radians(), 1.5, 0.1, 100.0);
        assert!(camera.projection_matrix().abs_diff_eq(expected, 1e-5));
    }

    #[test]
    fn view_offset_zooms_into_one_pixel() {
        let mut camera = PerspectiveCamera::new(60.0, 2.0, 0.1, 100.0);
        camera.look_at(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO);
        let target = Vec3::new(1.0, 0.5, 0.0);
        let ndc = camera.project(target);
        let (w, h) = (200.0, 100.0);
        let px = ((ndc.x * 0.5 + 0.5) * w).floor();
        let py = ((0.5 - ndc.y * 0.5) * h).floor();

        camera.set_view_offset(w, h, px, py, 1.0, 1.0);
        let zoomed = camera.project(target);
        assert!(zoomed.x.abs() <= 1.0 && zoomed.y.abs() <= 1.0);
        camera.clear_view_offset();
        assert!(camera.project(target).abs_diff_eq(ndc, 1e-5));
    }

    #[test]
    fn ray_from_center_follows_view_direction() {
        let mut camera = PerspectiveCamera::new(45.0, 1.0, 0.1, 100.0);
        camera.look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO);
        let ray = camera.ray_from_ndc(Vec2::ZERO);
        assert!(ray.direction.abs_diff_eq(Vec3::NEG_Z, 1e-4));
    }

    #[test]
    fn looking_straight_down_is_finite() {
        let mut camera = PerspectiveCamera::new(45.0, 1.0, 0.1, 100.0);
        camera.look_at(Vec3::new(0.0, 10.0, 0.0), Vec3::ZERO);
        assert!(camera.view_matrix().is_finite());
    }
}
