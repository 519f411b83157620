use super::axes::AxisId;
use crate::engine::PerspectiveCamera;
use crate::scene::Aabb;
use glam::Vec3;

/// Keeps the orbit away from the poles where yaw is undefined.
const MAX_PITCH: f32 = std::f32::consts::FRAC_PI_2 - 1e-3;
const MIN_DISTANCE: f32 = 1e-3;

/// Orbit/pan/dolly controls around a target point, plus camera focusing.
#[derive(Debug, Clone)]
pub struct CameraController {
    camera: PerspectiveCamera,
    enabled: bool,
    max_distance: f32,
    focus_box: Aabb,
}

impl CameraController {
    pub fn new(camera: PerspectiveCamera) -> Self {
        Self {
            camera,
            enabled: true,
            max_distance: 10_000.0,
            focus_box: Aabb::EMPTY,
        }
    }

    pub fn camera(&self) -> &PerspectiveCamera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut PerspectiveCamera {
        &mut self.camera
    }

    pub fn position(&self) -> Vec3 {
        self.camera.position
    }

    pub fn target(&self) -> Vec3 {
        self.camera.target
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Disabled controls ignore orbit, pan and dolly input. Focusing and
    /// axis rotation still work.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.camera.resize(width, height);
    }

    /// Rotates the eye around the target. Returns whether the camera moved.
    pub fn orbit(&mut self, yaw_delta: f32, pitch_delta: f32) -> bool {
        if !self.enabled || (yaw_delta == 0.0 && pitch_delta == 0.0) {
            return false;
        }
        let offset = self.camera.position - self.camera.target;
        let distance = offset.length().max(MIN_DISTANCE);
        let (mut yaw, mut pitch) = offset_to_yaw_pitch(offset);
        yaw += yaw_delta;
        pitch = (pitch + pitch_delta).clamp(-MAX_PITCH, MAX_PITCH);
        wrap_angle(&mut yaw);
        self.camera.up = Vec3::Y;
        self.camera.position = self.camera.target + yaw_pitch_to_offset(yaw, pitch) * distance;
        true
    }

    /// Moves eye and target together in the view plane. `dx`/`dy` are
    /// fractions of the viewport height.
    pub fn pan(&mut self, dx: f32, dy: f32) -> bool {
        if !self.enabled || (dx == 0.0 && dy == 0.0) {
            return false;
        }
        let forward = self.camera.direction();
        let right = forward.cross(self.camera.up).normalize_or_zero();
        let up = right.cross(forward);
        let distance = (self.camera.position - self.camera.target).length();
        let visible_height = 2.0 * distance * (0.5 * self.camera.fov.to_radians()).tan();
        let shift = (-right * dx + up * dy) * visible_height;
        self.camera.position += shift;
        self.camera.target += shift;
        true
    }

    /// Scales the eye distance to the target; `scale < 1` moves closer.
    pub fn dolly(&mut self, scale: f32) -> bool {
        if !self.enabled || scale <= 0.0 || scale == 1.0 {
            return false;
        }
        let offset = self.camera.position - self.camera.target;
        let distance = (offset.length() * scale).clamp(MIN_DISTANCE, self.max_distance);
        self.camera.position = self.camera.target + offset.normalize_or_zero() * distance;
        true
    }

    /// Frames `bounds` keeping the current view direction. `offset` scales
    /// the fitting distance.
    pub fn focus_on_box(&mut self, bounds: &Aabb, offset: f32) {
        if bounds.is_empty() {
            return;
        }
        let size = bounds.size();
        let center = bounds.center();
        let max_size = size.x.max(size.y).max(size.z);
        let fit_height = max_size / (2.0 * (std::f32::consts::PI * self.camera.fov / 360.0).atan());
        let fit_width = fit_height / self.camera.aspect;
        let distance = offset * fit_height.max(fit_width);

        let mut direction = self.camera.direction();
        if direction == Vec3::ZERO {
            direction = Vec3::NEG_Z;
        }
        self.max_distance = (distance * 10.0).max(10_000.0);
        self.camera.near = (distance / 100.0).min(1.0);
        self.camera.far = (distance * 100.0).max(10_000.0);
        self.camera.target = center;
        self.camera.position = center - direction * distance;
        log::debug!("Camera focused on {:?} at distance {:.3}", center, distance);
    }

    /// Focuses on the union of `boxes`. An empty list refocuses on the
    /// previous focus box, if any.
    pub fn focus_on_boxes(&mut self, boxes: &[Aabb], offset: f32) {
        if !boxes.is_empty() {
            self.focus_box = boxes.iter().fold(Aabb::EMPTY, |acc, b| acc.union(b));
        }
        let focus_box = self.focus_box;
        self.focus_on_box(&focus_box, offset);
    }

    /// Places the eye on `axis` at the current target distance.
    pub fn rotate_to_face(&mut self, axis: AxisId) {
        let (direction, up) = axis.facing();
        let radius = (self.camera.position - self.camera.target).length();
        self.camera.position = self.camera.target + direction * radius;
        self.camera.up = up;
    }
}

impl Default for CameraController {
    fn default() -> Self {
        Self::new(PerspectiveCamera::default())
    }
}

fn offset_to_yaw_pitch(offset: Vec3) -> (f32, f32) {
    let n = offset.normalize_or_zero();
    (n.z.atan2(n.x), n.y.clamp(-1.0, 1.0).asin())
}

fn yaw_pitch_to_offset(yaw: f32, pitch: f32) -> Vec3 {
    let cos_pitch = pitch.cos();
    Vec3::new(yaw.cos() * cos_pitch, pitch.sin(), yaw.sin() * cos_pitch)
}

fn wrap_angle(angle: &mut f32) {
    const TWO_PI: f32 = std::f32::consts::PI * 2.0;
    if angle.is_finite() {
        *angle = (*angle + std::f32::consts::PI).rem_euclid(TWO_PI) - std::f32::consts::PI;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> CameraController {
        let mut camera = PerspectiveCamera::new(45.0, 1.0, 0.1, 1000.0);
        camera.look_at(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO);
        CameraController::new(camera)
    }

    #[test]
    fn orbit_keeps_distance_to_target() {
        let mut controller = controller();
        assert!(controller.orbit(0.7, 0.3));
        let distance = controller.position().distance(controller.target());
        assert!((distance - 10.0).abs() < 1e-4);
        assert!(controller.position().is_finite());
    }

    #[test]
    fn orbit_clamps_at_the_pole() {
        let mut controller = controller();
        controller.orbit(0.0, 10.0);
        assert!(controller.position().y < 10.0);
        assert!(controller.camera().view_matrix().is_finite());
    }

    #[test]
    fn disabled_controls_ignore_input() {
        let mut controller = controller();
        controller.set_enabled(false);
        assert!(!controller.orbit(1.0, 0.0));
        assert!(!controller.pan(0.1, 0.1));
        assert!(!controller.dolly(0.5));
        assert_eq!(controller.position(), Vec3::new(0.0, 0.0, 10.0));
    }

    #[test]
    fn focus_keeps_direction_and_fits_box() {
        let mut controller = controller();
        let bounds = Aabb::new(Vec3::new(9.0, -1.0, -1.0), Vec3::new(11.0, 1.0, 1.0));
        controller.focus_on_box(&bounds, 1.2);
        assert_eq!(controller.target(), Vec3::new(10.0, 0.0, 0.0));
        let offset = controller.position() - controller.target();
        assert!(offset.x.abs() < 1e-5 && offset.y.abs() < 1e-5 && offset.z > 0.0);
        assert!(controller.camera().near <= 1.0);
        assert!(controller.camera().far >= 10_000.0);
    }

    #[test]
    fn empty_focus_request_reuses_last_box() {
        let mut controller = controller();
        let bounds = Aabb::new(Vec3::splat(4.0), Vec3::splat(6.0));
        controller.focus_on_boxes(&[bounds], 1.2);
        let first = controller.position();
        controller.dolly(2.0);
        controller.focus_on_boxes(&[], 1.2);
        assert!(controller.position().distance(first) < 1e-4);
    }

    #[test]
    fn rotate_to_face_top_looks_down() {
        let mut controller = controller();
        controller.rotate_to_face(AxisId::Z);
        assert!(controller.position().distance(Vec3::new(0.0, 10.0, 0.0)) < 1e-4);
        assert_eq!(controller.camera().up, Vec3::NEG_Z);
        assert!(controller.camera().view_matrix().is_finite());
    }
}
