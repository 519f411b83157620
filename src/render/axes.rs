//! Orientation gizmo drawn into a corner of the canvas.
//!
//! Axes follow the Z-up convention: the gizmo's Z points along scene +Y and
//! its Y along scene -Z.

use crate::engine::{DrawCall, Material, RenderTarget, SoftwareRenderer, View, Viewport};
use crate::options::AxesPlacement;
use glam::{Mat4, Vec2, Vec3};

const AXIS_LENGTH: f32 = 0.8;
const AXIS_HALF_WIDTH: f32 = 0.04;
const LABEL_RADIUS: f32 = 0.3;
const NEGATIVE_LABEL_SCALE: f32 = 0.8;
/// Gizmo space spans [-EXTENT, EXTENT] on both screen axes.
const EXTENT: f32 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisId {
    X,
    Y,
    Z,
    NegX,
    NegY,
    NegZ,
}

impl AxisId {
    pub const ALL: [AxisId; 6] = [
        AxisId::X,
        AxisId::Y,
        AxisId::Z,
        AxisId::NegX,
        AxisId::NegY,
        AxisId::NegZ,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AxisId::X => "x",
            AxisId::Y => "y",
            AxisId::Z => "z",
            AxisId::NegX => "-x",
            AxisId::NegY => "-y",
            AxisId::NegZ => "-z",
        }
    }

    /// Z-up axis direction expressed in scene (Y-up) coordinates.
    pub fn scene_direction(self) -> Vec3 {
        match self {
            AxisId::X => Vec3::X,
            AxisId::Y => Vec3::NEG_Z,
            AxisId::Z => Vec3::Y,
            AxisId::NegX => Vec3::NEG_X,
            AxisId::NegY => Vec3::Z,
            AxisId::NegZ => Vec3::NEG_Y,
        }
    }

    /// Camera offset direction from its target and the camera up vector
    /// that make the view face this axis.
    pub fn facing(self) -> (Vec3, Vec3) {
        match self {
            AxisId::X => (Vec3::X, Vec3::Y),
            AxisId::Y => (Vec3::NEG_Z, Vec3::Y),
            AxisId::Z => (Vec3::Y, Vec3::NEG_Z),
            AxisId::NegX => (Vec3::NEG_X, Vec3::Y),
            AxisId::NegY => (Vec3::Z, Vec3::Y),
            AxisId::NegZ => (Vec3::NEG_Y, Vec3::Z),
        }
    }

    fn color(self) -> u32 {
        match self {
            AxisId::X => 0xFF3653,
            AxisId::Y => 0x8ADB00,
            AxisId::Z => 0x2C8FFF,
            AxisId::NegX => 0xA32235,
            AxisId::NegY => 0x588C00,
            AxisId::NegZ => 0x1C5BA3,
        }
    }

    fn is_negative(self) -> bool {
        matches!(self, AxisId::NegX | AxisId::NegY | AxisId::NegZ)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AxesGizmo {
    enabled: bool,
    placement: AxesPlacement,
    size: u32,
}

impl AxesGizmo {
    pub fn new(enabled: bool, placement: AxesPlacement, size: u32) -> Self {
        Self {
            enabled,
            placement,
            size,
        }
    }

    pub fn update_options(&mut self, enabled: bool, placement: AxesPlacement, size: u32) {
        self.enabled = enabled;
        self.placement = placement;
        self.size = size;
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn placement(&self) -> AxesPlacement {
        self.placement
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Corner rectangle of a `width`×`height` buffer, top-left origin.
    pub fn viewport(&self, width: u32, height: u32) -> Viewport {
        let size = self.size.min(width).min(height);
        let right = width - size;
        let bottom = height - size;
        let (x, y) = match self.placement {
            AxesPlacement::TopLeft => (0, 0),
            AxesPlacement::TopRight => (right, 0),
            AxesPlacement::BottomLeft => (0, bottom),
            AxesPlacement::BottomRight => (right, bottom),
        };
        Viewport::new(x, y, size, size)
    }

    /// Label centers in gizmo space: x right, y up, z toward the viewer.
    fn labels(camera_view: &Mat4) -> [(AxisId, Vec3); 6] {
        AxisId::ALL.map(|axis| (axis, camera_view.transform_vector3(axis.scene_direction())))
    }

    /// Axis label under `point` (canvas pixels, top-left origin). The label
    /// nearest to the viewer wins.
    pub fn axis_at(&self, camera_view: &Mat4, width: u32, height: u32, point: Vec2) -> Option<AxisId> {
        if !self.enabled {
            return None;
        }
        let viewport = self.viewport(width, height);
        if !viewport.contains(point.x, point.y) {
            return None;
        }
        let size = viewport.width as f32;
        let local = Vec2::new(
            (point.x - viewport.x as f32) / size * 2.0 - 1.0,
            1.0 - (point.y - viewport.y as f32) / size * 2.0,
        ) * EXTENT;

        Self::labels(camera_view)
            .into_iter()
            .filter(|(axis, center)| center.truncate().distance(local) <= label_radius(*axis))
            .max_by(|a, b| a.1.z.total_cmp(&b.1.z))
            .map(|(axis, _)| axis)
    }

    pub fn render(&self, camera_view: &Mat4, renderer: &mut SoftwareRenderer, target: &mut RenderTarget) {
        if !self.enabled {
            return;
        }
        let mut shapes: Vec<(u32, Vec<Vec3>)> = Vec::with_capacity(9);
        for (axis, center) in Self::labels(camera_view) {
            if !axis.is_negative() {
                if let Some(bar) = bar(center * AXIS_LENGTH) {
                    shapes.push((axis.color(), bar.to_vec()));
                }
            }
            shapes.push((axis.color(), label_quad(center, label_radius(axis)).to_vec()));
        }
        const QUAD: [u32; 6] = [0, 1, 2, 0, 2, 3];
        let materials: Vec<Material> = shapes.iter().map(|(c, _)| Material::flat_hex(*c)).collect();
        let draws: Vec<DrawCall<'_>> = shapes
            .iter()
            .zip(&materials)
            .map(|((_, quad), material)| DrawCall::new(quad, &QUAD, Mat4::IDENTITY, material))
            .collect();
        let view = View {
            view: Mat4::from_translation(Vec3::new(0.0, 0.0, -EXTENT)),
            projection: Mat4::orthographic_rh_gl(-EXTENT, EXTENT, -EXTENT, EXTENT, 0.0, 2.0 * EXTENT),
        };

        let previous = renderer.viewport();
        renderer.set_viewport(Some(self.viewport(target.width(), target.height())));
        renderer.clear(target, None, true);
        renderer.render(target, &view, &draws);
        renderer.set_viewport(previous);
    }
}

fn label_radius(axis: AxisId) -> f32 {
    if axis.is_negative() {
        LABEL_RADIUS * NEGATIVE_LABEL_SCALE
    } else {
        LABEL_RADIUS
    }
}

/// Screen-facing bar from the gizmo origin to `tip`. Axes pointing straight
/// at the viewer have no visible bar.
fn bar(tip: Vec3) -> Option<[Vec3; 4]> {
    let dir = tip.truncate().normalize_or_zero();
    if dir == Vec2::ZERO {
        return None;
    }
    let n = dir.perp().extend(0.0) * AXIS_HALF_WIDTH;
    Some([-n, tip - n, tip + n, n])
}

fn label_quad(center: Vec3, half: f32) -> [Vec3; 4] {
    [
        center + Vec3::new(-half, -half, 0.0),
        center + Vec3::new(half, -half, 0.0),
        center + Vec3::new(half, half, 0.0),
        center + Vec3::new(-half, half, 0.0),
    ]
}
