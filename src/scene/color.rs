//! RGBRMO colors and the per-mesh override model.
//!
//! Every source mesh carries three color slots: the *original* color derived
//! once from its authored material, an optional *paint* color set through the
//! coloring commands, and a transient *override* recomputed from the mesh's
//! highlight/selection/isolation flags. The color a mesh is drawn with is
//! `override ?? paint ?? original`.

use super::{SourceMaterial, SourceMesh};
use serde::{Deserialize, Serialize};
use std::cell::OnceCell;
use std::collections::HashMap;

// ========================================================================
// ColorRgbRmo — color + roughness/metalness/opacity
// ========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorRgbRmo {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub roughness: f32,
    pub metalness: f32,
    pub opacity: f32,
}

/// Bit-exact identity of a [`ColorRgbRmo`], used to deduplicate materials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorKey([u32; 6]);

impl ColorRgbRmo {
    pub const fn new(r: f32, g: f32, b: f32, roughness: f32, metalness: f32, opacity: f32) -> Self {
        Self {
            r,
            g,
            b,
            roughness,
            metalness,
            opacity,
        }
    }

    /// `0xRRGGBB` color with explicit roughness, metalness and opacity.
    pub fn from_hex(hex: u32, roughness: f32, metalness: f32, opacity: f32) -> Self {
        let [r, g, b] = hex_to_rgb(hex);
        Self::new(r, g, b, roughness, metalness, opacity)
    }

    pub fn from_bytes(rgb: [u8; 3], rmo: [u8; 3]) -> Self {
        let f = |v: u8| v as f32 / 255.0;
        Self::new(f(rgb[0]), f(rgb[1]), f(rgb[2]), f(rmo[0]), f(rmo[1]), f(rmo[2]))
    }

    /// Derives the baseline color of an authored material. Materials without
    /// roughness/metalness fall back to fully rough, non-metallic.
    pub fn from_material(material: &SourceMaterial) -> Self {
        match *material {
            SourceMaterial::Standard {
                color,
                roughness,
                metalness,
                opacity,
            } => Self::new(color[0], color[1], color[2], roughness, metalness, opacity),
            SourceMaterial::Basic { color, opacity } => {
                Self::new(color[0], color[1], color[2], 1.0, 0.0, opacity)
            }
            SourceMaterial::Unknown { opacity } => Self::new(1.0, 1.0, 1.0, 1.0, 0.0, opacity),
        }
    }

    pub fn rgb(&self) -> [f32; 3] {
        [self.r, self.g, self.b]
    }

    pub fn with_rgb(&self, rgb: [f32; 3]) -> Self {
        Self {
            r: rgb[0],
            g: rgb[1],
            b: rgb[2],
            ..*self
        }
    }

    pub fn with_opacity(&self, opacity: f32) -> Self {
        Self { opacity, ..*self }
    }

    pub fn is_opaque(&self) -> bool {
        self.opacity >= 1.0
    }

    pub fn rgb_bytes(&self) -> [u8; 3] {
        [to_byte(self.r), to_byte(self.g), to_byte(self.b)]
    }

    pub fn rmo_bytes(&self) -> [u8; 3] {
        [
            to_byte(self.roughness),
            to_byte(self.metalness),
            to_byte(self.opacity),
        ]
    }

    pub fn key(&self) -> ColorKey {
        // Adding 0.0 folds -0.0 into 0.0 so equal values share a key.
        let bits = |v: f32| (v + 0.0).to_bits();
        ColorKey([
            bits(self.r),
            bits(self.g),
            bits(self.b),
            bits(self.roughness),
            bits(self.metalness),
            bits(self.opacity),
        ])
    }
}

pub fn hex_to_rgb(hex: u32) -> [f32; 3] {
    [
        ((hex >> 16) & 0xFF) as f32 / 255.0,
        ((hex >> 8) & 0xFF) as f32 / 255.0,
        (hex & 0xFF) as f32 / 255.0,
    ]
}

fn to_byte(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

// ========================================================================
// MeshColors — the three slots attached to every source mesh
// ========================================================================

#[derive(Debug, Clone, Default)]
pub struct MeshColors {
    original: OnceCell<ColorRgbRmo>,
    paint: Option<ColorRgbRmo>,
    override_color: Option<ColorRgbRmo>,
}

impl MeshColors {
    /// Derived from `material` on first access and cached afterwards.
    pub fn original(&self, material: &SourceMaterial) -> &ColorRgbRmo {
        self.original
            .get_or_init(|| ColorRgbRmo::from_material(material))
    }

    pub fn paint(&self) -> Option<&ColorRgbRmo> {
        self.paint.as_ref()
    }

    pub fn override_color(&self) -> Option<&ColorRgbRmo> {
        self.override_color.as_ref()
    }

    pub fn final_color(&self, material: &SourceMaterial) -> &ColorRgbRmo {
        match (&self.override_color, &self.paint) {
            (Some(color), _) => color,
            (None, Some(color)) => color,
            (None, None) => self.original(material),
        }
    }

    pub fn set_paint(&mut self, color: ColorRgbRmo) {
        self.paint = Some(color);
    }

    pub fn clear_paint(&mut self) {
        self.paint = None;
    }

    pub fn set_override(&mut self, color: ColorRgbRmo) {
        self.override_color = Some(color);
    }

    /// Always drops the override; optionally the paint and cached original too.
    pub fn clear(&mut self, also_paint: bool, also_original: bool) {
        self.override_color = None;
        if also_paint {
            self.paint = None;
        }
        if also_original {
            self.original.take();
        }
    }
}

// ========================================================================
// OverridePalette — recomputes overrides from mesh flags
// ========================================================================

/// Colors shared by every mesh: highlight, selection and isolation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommonColors {
    pub highlight: [f32; 3],
    pub selection: [f32; 3],
    pub isolation: [f32; 3],
    pub isolation_opacity: f32,
}

impl CommonColors {
    pub fn from_hex(highlight: u32, selection: u32, isolation: u32, isolation_opacity: f32) -> Self {
        Self {
            highlight: hex_to_rgb(highlight),
            selection: hex_to_rgb(selection),
            isolation: hex_to_rgb(isolation),
            isolation_opacity,
        }
    }
}

impl Default for CommonColors {
    fn default() -> Self {
        Self::from_hex(0xFFFF00, 0xFF0000, 0x555555, 0.2)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefreshResult {
    pub color: ColorRgbRmo,
    /// The mesh crossed the fully-opaque boundary in either direction.
    pub opacity_changed: bool,
}

#[derive(Debug)]
pub struct OverridePalette {
    common: CommonColors,
    isolation_by_opacity: HashMap<u32, ColorRgbRmo>,
}

impl OverridePalette {
    pub fn new(common: CommonColors) -> Self {
        let mut palette = Self {
            common,
            isolation_by_opacity: HashMap::new(),
        };
        palette.seed_isolation();
        palette
    }

    pub fn common(&self) -> &CommonColors {
        &self.common
    }

    pub fn update_common_colors(&mut self, common: CommonColors) {
        self.common = common;
        self.isolation_by_opacity.clear();
        self.seed_isolation();
    }

    fn seed_isolation(&mut self) {
        let [r, g, b] = self.common.isolation;
        let opacity = self.common.isolation_opacity;
        self.isolation_by_opacity
            .insert(opacity.to_bits(), ColorRgbRmo::new(r, g, b, 1.0, 0.0, opacity));
    }

    /// Memoized isolation color for one opacity value.
    fn isolation_color(&mut self, opacity: f32) -> ColorRgbRmo {
        let default_opacity = self.common.isolation_opacity;
        let [r, g, b] = self.common.isolation;
        *self
            .isolation_by_opacity
            .entry(opacity.to_bits())
            .or_insert_with(|| {
                ColorRgbRmo::new(r, g, b, 1.0, 0.0, default_opacity).with_opacity(opacity)
            })
    }

    pub fn isolation_variants(&self) -> usize {
        self.isolation_by_opacity.len()
    }

    /// Recomputes the override slot from the mesh flags.
    ///
    /// Precedence is highlighted > selected > isolated > none. Highlight and
    /// selection swap the rgb and keep the base roughness/metalness/opacity.
    /// `initial_opacity` defaults to the mesh's final opacity before refresh.
    pub fn refresh(&mut self, mesh: &mut SourceMesh, initial_opacity: Option<f32>) -> RefreshResult {
        let initial = initial_opacity.unwrap_or_else(|| mesh.final_color().opacity);
        mesh.colors.clear(false, false);
        let base = *mesh.final_color();
        let flags = mesh.flags;
        let isolation_opacity = base.opacity.min(self.common.isolation_opacity);

        let color = if flags.highlighted {
            let opacity = if flags.isolated {
                isolation_opacity
            } else {
                base.opacity
            };
            base.with_rgb(self.common.highlight).with_opacity(opacity)
        } else if flags.selected {
            base.with_rgb(self.common.selection)
        } else if flags.isolated {
            self.isolation_color(isolation_opacity)
        } else {
            base
        };
        mesh.colors.set_override(color);

        let opacity_changed =
            (color.opacity == 1.0 && initial < 1.0) || (color.opacity < 1.0 && initial == 1.0);
        RefreshResult {
            color,
            opacity_changed,
        }
    }
}

impl Default for OverridePalette {
    fn default() -> Self {
        Self::new(CommonColors::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::test_support::{mesh, quad_geometry};
    use glam::Mat4;

    fn red_paint(opacity: f32) -> ColorRgbRmo {
        ColorRgbRmo::from_hex(0xFF0000, 1.0, 0.0, opacity)
    }

    #[test]
    fn original_is_derived_once_and_cached() {
        let mesh = mesh(1, "g1", "a", quad_geometry(), Mat4::IDENTITY);
        let first = mesh.original_color();
        let second = mesh.original_color();
        assert!(std::ptr::eq(first, second));
    }

    #[test]
    fn final_prefers_override_then_paint_then_original() {
        let mut mesh = mesh(1, "g1", "a", quad_geometry(), Mat4::IDENTITY);
        let original = *mesh.original_color();
        assert_eq!(*mesh.final_color(), original);

        mesh.colors.set_paint(red_paint(0.5));
        assert_eq!(*mesh.final_color(), red_paint(0.5));

        let green = ColorRgbRmo::from_hex(0x00FF00, 0.3, 0.2, 1.0);
        mesh.colors.set_override(green);
        assert_eq!(*mesh.final_color(), green);

        mesh.colors.clear(false, false);
        assert_eq!(*mesh.final_color(), red_paint(0.5));
        mesh.colors.clear(true, false);
        assert_eq!(*mesh.final_color(), original);
    }

    #[test]
    fn basic_material_falls_back_to_rough_dielectric() {
        let color = ColorRgbRmo::from_material(&SourceMaterial::Basic {
            color: [0.2, 0.4, 0.6],
            opacity: 0.7,
        });
        assert_eq!(color, ColorRgbRmo::new(0.2, 0.4, 0.6, 1.0, 0.0, 0.7));
        let unknown = ColorRgbRmo::from_material(&SourceMaterial::Unknown { opacity: 1.0 });
        assert_eq!(unknown, ColorRgbRmo::new(1.0, 1.0, 1.0, 1.0, 0.0, 1.0));
    }

    #[test]
    fn selection_wins_over_isolation() {
        let mut palette = OverridePalette::default();
        let mut mesh = mesh(1, "g1", "a", quad_geometry(), Mat4::IDENTITY);
        mesh.flags.selected = true;
        mesh.flags.isolated = true;
        let result = palette.refresh(&mut mesh, None);
        assert_eq!(result.color.rgb(), palette.common().selection);
        assert_eq!(result.color.opacity, 1.0);
    }

    #[test]
    fn highlight_wins_over_selection() {
        let mut palette = OverridePalette::default();
        let mut mesh = mesh(1, "g1", "a", quad_geometry(), Mat4::IDENTITY);
        mesh.flags.selected = true;
        mesh.flags.highlighted = true;
        let result = palette.refresh(&mut mesh, None);
        assert_eq!(result.color.rgb(), palette.common().highlight);
    }

    #[test]
    fn isolation_opacity_is_capped_by_mesh_opacity() {
        let mut palette = OverridePalette::default();
        let mut faint = mesh(1, "g1", "a", quad_geometry(), Mat4::IDENTITY);
        faint.colors.set_paint(red_paint(0.1));
        faint.flags.isolated = true;
        let result = palette.refresh(&mut faint, None);
        assert!((result.color.opacity - 0.1).abs() < f32::EPSILON);

        let mut solid = mesh(2, "g1", "b", quad_geometry(), Mat4::IDENTITY);
        solid.flags.isolated = true;
        let result = palette.refresh(&mut solid, None);
        assert!((result.color.opacity - 0.2).abs() < f32::EPSILON);
        assert_eq!(result.color.rgb(), palette.common().isolation);
        assert_eq!(palette.isolation_variants(), 2);
    }

    #[test]
    fn refresh_reports_opacity_boundary_crossings() {
        let mut palette = OverridePalette::default();
        let mut mesh = mesh(1, "g1", "a", quad_geometry(), Mat4::IDENTITY);
        mesh.flags.isolated = true;
        assert!(palette.refresh(&mut mesh, None).opacity_changed);
        // Still isolated: 0.2 -> 0.2 is not a crossing.
        assert!(!palette.refresh(&mut mesh, None).opacity_changed);
        mesh.flags.isolated = false;
        assert!(palette.refresh(&mut mesh, None).opacity_changed);
        // Explicit initial opacity takes precedence over the current final color.
        assert!(palette.refresh(&mut mesh, Some(0.5)).opacity_changed);
    }

    #[test]
    fn refresh_keeps_paint_slot() {
        let mut palette = OverridePalette::default();
        let mut mesh = mesh(1, "g1", "a", quad_geometry(), Mat4::IDENTITY);
        mesh.colors.set_paint(red_paint(0.5));
        mesh.flags.selected = true;
        palette.refresh(&mut mesh, None);
        mesh.flags.selected = false;
        let result = palette.refresh(&mut mesh, None);
        assert_eq!(result.color, red_paint(0.5));
        assert_eq!(mesh.colors.paint(), Some(&red_paint(0.5)));
    }

    #[test]
    fn color_key_ignores_negative_zero() {
        let a = ColorRgbRmo::new(0.0, 0.5, 1.0, 1.0, 0.0, 1.0);
        let b = ColorRgbRmo::new(-0.0, 0.5, 1.0, 1.0, -0.0, 1.0);
        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), a.with_opacity(0.5).key());
    }

    #[test]
    fn byte_conversion_rounds() {
        let color = ColorRgbRmo::new(1.0, 0.5, 0.0, 1.0, 0.0, 0.5);
        assert_eq!(color.rgb_bytes(), [255, 128, 0]);
        assert_eq!(color.rmo_bytes(), [255, 0, 128]);
    }
}
