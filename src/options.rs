//! Viewer options. Every field has a default, so a partial JSON document is
//! a valid options file.

use crate::engine::Lights;
use crate::scene::CommonColors;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// How source meshes are batched into draw calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeshMergeType {
    /// One batch for the whole scene.
    #[serde(rename = "scene")]
    Scene,
    /// One batch per model.
    #[serde(rename = "model")]
    Model,
    /// Per model, split into chunks of `merge_chunk_size` meshes.
    #[serde(rename = "model+")]
    ModelPlus,
}

/// Approximate geometry drawn while the camera moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FastRenderType {
    /// Convex hull per mesh.
    #[serde(rename = "ch")]
    ConvexHull,
    #[serde(rename = "aabb")]
    Aabb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AxesPlacement {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

/// Fixed working-coordinate origin. `z_up` points are given in a Z-up frame
/// and converted to the Y-up scene frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasePoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    #[serde(default)]
    pub z_up: bool,
}

impl BasePoint {
    pub fn to_y_up(&self) -> Vec3 {
        if self.z_up {
            Vec3::new(self.x, self.z, -self.y)
        } else {
            Vec3::new(self.x, self.y, self.z)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ViewerOptions {
    pub ambient_light_intensity: f32,
    pub hemi_light_intensity: f32,
    pub dir_light_intensity: f32,
    pub background_color: u32,

    pub highlighting_enabled: bool,
    pub highlight_color: u32,
    pub selection_color: u32,
    pub isolation_color: u32,
    pub isolation_opacity: f32,

    pub mesh_merge_type: Option<MeshMergeType>,
    pub merge_chunk_size: usize,
    pub fast_render_type: Option<FastRenderType>,

    pub axes_helper_enabled: bool,
    pub axes_helper_placement: AxesPlacement,
    pub axes_helper_size: u32,

    pub base_point: Option<BasePoint>,
    pub selection_auto_focus_enabled: bool,
    pub camera_controls_disabled: bool,

    /// Pointer travel in pixels that turns a click into an area drag.
    pub drag_threshold_px: f32,
    pub double_click_ms: u64,
    pub highlight_debounce_ms: u64,
    pub fast_render_delay_ms: u64,
    /// Work budget of one cooperative build slice.
    pub build_slice_ms: u64,
    /// Hit radius of HUD markers, pixels.
    pub sprite_size_px: f32,
}

impl Default for ViewerOptions {
    fn default() -> Self {
        Self {
            ambient_light_intensity: 1.0,
            hemi_light_intensity: 0.4,
            dir_light_intensity: 0.6,
            background_color: 0x000000,
            highlighting_enabled: true,
            highlight_color: 0xFFFF00,
            selection_color: 0xFF0000,
            isolation_color: 0x555555,
            isolation_opacity: 0.2,
            mesh_merge_type: None,
            merge_chunk_size: 1000,
            fast_render_type: None,
            axes_helper_enabled: true,
            axes_helper_placement: AxesPlacement::TopRight,
            axes_helper_size: 128,
            base_point: None,
            selection_auto_focus_enabled: true,
            camera_controls_disabled: false,
            drag_threshold_px: 10.0,
            double_click_ms: 300,
            highlight_debounce_ms: 30,
            fast_render_delay_ms: 300,
            build_slice_ms: 100,
            sprite_size_px: 24.0,
        }
    }
}

impl ViewerOptions {
    pub fn common_colors(&self) -> CommonColors {
        CommonColors::from_hex(
            self.highlight_color,
            self.selection_color,
            self.isolation_color,
            self.isolation_opacity,
        )
    }

    pub fn lights(&self) -> Lights {
        Lights {
            ambient: self.ambient_light_intensity,
            hemisphere: self.hemi_light_intensity,
            directional: self.dir_light_intensity,
            ..Lights::default()
        }
    }

    pub fn colors_differ(&self, other: &ViewerOptions) -> bool {
        self.highlight_color != other.highlight_color
            || self.selection_color != other.selection_color
            || self.isolation_color != other.isolation_color
            || self.isolation_opacity != other.isolation_opacity
    }

    pub fn lights_differ(&self, other: &ViewerOptions) -> bool {
        self.ambient_light_intensity != other.ambient_light_intensity
            || self.hemi_light_intensity != other.hemi_light_intensity
            || self.dir_light_intensity != other.dir_light_intensity
    }

    pub fn scene_layout_differs(&self, other: &ViewerOptions) -> bool {
        self.mesh_merge_type != other.mesh_merge_type
            || self.merge_chunk_size != other.merge_chunk_size
            || self.fast_render_type != other.fast_render_type
    }

    pub fn axes_differ(&self, other: &ViewerOptions) -> bool {
        self.axes_helper_enabled != other.axes_helper_enabled
            || self.axes_helper_placement != other.axes_helper_placement
            || self.axes_helper_size != other.axes_helper_size
    }
}

pub fn load_options(path: &Path) -> Result<ViewerOptions> {
    let json = std::fs::read_to_string(path)?;
    let options: ViewerOptions = serde_json::from_str(&json)?;
    Ok(options)
}

pub fn save_options(options: &ViewerOptions, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(options)?;
    std::fs::write(path, json)?;
    Ok(())
}
