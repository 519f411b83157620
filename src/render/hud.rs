//! Screen-space overlay: annotation markers, vertex snap points and the
//! distance measurer.
//!
//! HUD elements live in world space and are drawn as flat, screen-aligned
//! quads of a fixed pixel size after the main scene, over a cleared depth
//! buffer. Hit testing works in zero-centered canvas coordinates (origin at
//! the canvas center, y up).

use crate::engine::{DrawCall, Material, RenderTarget, SoftwareRenderer, View};
use crate::events::{EventBus, ViewerEvent};
use glam::{Mat4, Vec2, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

const SNAP_SPRITE_PX: f32 = 8.0;
const MEASURER_SPRITE_PX: f32 = 8.0;
const HIGHLIGHTED_MARKER_SCALE: f32 = 1.5;

const SNAP_COLOR: u32 = 0xFF00FF;
const SNAP_SELECTED_COLOR: u32 = 0x8B0000;
const MEASURE_START_COLOR: u32 = 0x391285;
const MEASURE_END_COLOR: u32 = 0x00FFFF;
const MEASURE_X_COLOR: u32 = 0xFF3653;
const MEASURE_Y_COLOR: u32 = 0x8ADB00;
const MEASURE_Z_COLOR: u32 = 0x2C8FFF;
const MEASURE_LINE_COLOR: u32 = 0x0000FF;
const MARKER_COLOR: u32 = 0xFFA500;
const MARKER_SELECTED_COLOR: u32 = 0xFF0000;

// ========================================================================
// Public data
// ========================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerInfo {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Scene (Y-up) position.
    pub position: [f32; 3],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl MarkerInfo {
    pub fn new(id: impl Into<String>, kind: impl Into<String>, position: [f32; 3]) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            position,
            description: None,
        }
    }
}

/// A mesh vertex picked for snapping, in scene (Y-up) coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapPoint {
    pub mesh_id: String,
    pub position: [f32; 3],
}

impl SnapPoint {
    fn key(&self) -> String {
        let [x, y, z] = self.position;
        format!("{}|{}|{}|{}", x, y, z, self.mesh_id)
    }
}

/// Measured segment in Z-up coordinates. `distance` holds the per-axis
/// deltas and the length in its last component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distance {
    pub start: [f32; 3],
    pub end: [f32; 3],
    pub distance: [f32; 4],
}

impl Distance {
    /// Builds the measurement from two Y-up scene points.
    pub fn between(start: Vec3, end: Vec3) -> Self {
        let start = to_z_up(start);
        let end = to_z_up(end);
        let delta = end - start;
        Self {
            start: start.to_array(),
            end: end.to_array(),
            distance: [delta.x, delta.y, delta.z, delta.length()],
        }
    }
}

fn to_z_up(point: Vec3) -> Vec3 {
    Vec3::new(point.x, -point.z, point.y)
}

// ========================================================================
// HudProjection
// ========================================================================

/// World to zero-centered canvas pixels for one camera and buffer size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HudProjection {
    view_proj: Mat4,
    half: Vec2,
}

impl HudProjection {
    pub fn new(view: &View, buffer_width: u32, buffer_height: u32) -> Self {
        Self {
            view_proj: view.view_proj(),
            half: Vec2::new(buffer_width as f32, buffer_height as f32) * 0.5,
        }
    }

    pub fn resolution(&self) -> Vec2 {
        self.half * 2.0
    }

    /// `x`, `y` in zero-centered pixels, `z` in normalized depth. `z > 1`
    /// means the point is behind the camera.
    pub fn project(&self, world: Vec3) -> Vec3 {
        let ndc = self.view_proj.project_point3(world);
        Vec3::new(ndc.x * self.half.x, ndc.y * self.half.y, ndc.z)
    }

    fn to_ndc(&self, pixel: Vec2, z: f32) -> Vec3 {
        Vec3::new(pixel.x / self.half.x, pixel.y / self.half.y, z)
    }
}

// ========================================================================
// Markers
// ========================================================================

#[derive(Debug)]
pub struct Markers {
    markers: Vec<MarkerInfo>,
    selected: BTreeSet<String>,
    highlighted: Option<String>,
    sprite_size: f32,
    events: EventBus,
}

impl Markers {
    pub fn new(sprite_size: f32, events: EventBus) -> Self {
        Self {
            markers: Vec::new(),
            selected: BTreeSet::new(),
            highlighted: None,
            sprite_size,
            events,
        }
    }

    pub fn markers(&self) -> &[MarkerInfo] {
        &self.markers
    }

    pub fn set_sprite_size(&mut self, size: f32) {
        self.sprite_size = size;
    }

    pub fn add_marker(&mut self, marker: MarkerInfo) {
        if self.markers.iter().any(|m| m.id == marker.id) {
            return;
        }
        self.markers.push(marker);
        self.sort();
        self.emit_markers();
    }

    pub fn remove_marker(&mut self, id: &str) {
        self.markers.retain(|m| m.id != id);
        if self.selected.remove(id) {
            self.emit_selected(false);
        }
        if self.highlighted.as_deref() == Some(id) {
            self.highlighted = None;
        }
        self.emit_markers();
    }

    /// Replaces all markers and drops the marker selection.
    pub fn set_markers(&mut self, markers: Vec<MarkerInfo>) {
        if !self.selected.is_empty() {
            self.selected.clear();
            self.emit_selected(false);
        }
        self.highlighted = None;
        let changed = !(markers.is_empty() && self.markers.is_empty());
        self.markers = markers;
        self.sort();
        if changed {
            self.emit_markers();
        }
    }

    pub fn highlight_marker(&mut self, id: Option<&str>) {
        if self.highlighted.as_deref() == id {
            return;
        }
        self.highlighted = id.map(str::to_string);
        let highlighted = self
            .highlighted
            .as_ref()
            .and_then(|id| self.markers.iter().find(|m| &m.id == id))
            .cloned()
            .into_iter()
            .collect();
        self.events
            .emit(ViewerEvent::MarkersHighlighted(highlighted));
    }

    pub fn highlighted(&self) -> Option<&str> {
        self.highlighted.as_deref()
    }

    pub fn add_to_selection(&mut self, id: &str) {
        if self.selected.insert(id.to_string()) {
            self.emit_selected(true);
        }
    }

    pub fn remove_from_selection(&mut self, id: &str) {
        if self.selected.remove(id) {
            self.emit_selected(true);
        }
    }

    /// Programmatic selection (`manual == false`) is silent.
    pub fn set_selected(&mut self, ids: &[String], manual: bool) {
        self.selected = ids.iter().cloned().collect();
        if manual {
            self.emit_selected(true);
        }
    }

    pub fn reset_selected(&mut self) {
        if !self.selected.is_empty() {
            self.selected.clear();
            self.emit_selected(false);
        }
    }

    pub fn selected(&self) -> Vec<MarkerInfo> {
        self.markers
            .iter()
            .filter(|m| self.selected.contains(&m.id))
            .cloned()
            .collect()
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.selected.contains(id)
    }

    /// Topmost marker within half a sprite of `point` (zero-centered canvas
    /// pixels). Markers behind the camera are skipped.
    pub fn marker_at(&self, projection: &HudProjection, point: Vec2) -> Option<&MarkerInfo> {
        let max_distance = self.sprite_size / 2.0;
        self.markers.iter().rev().find(|marker| {
            let projected = projection.project(Vec3::from_array(marker.position));
            projected.z <= 1.0 && projected.truncate().distance(point) < max_distance
        })
    }

    fn sort(&mut self) {
        // Stable: markers of one kind keep their insertion order.
        self.markers.sort_by(|a, b| a.kind.cmp(&b.kind));
    }

    fn emit_markers(&self) {
        self.events
            .emit(ViewerEvent::MarkersChanged(self.markers.clone()));
    }

    fn emit_selected(&self, manual: bool) {
        self.events.emit(ViewerEvent::MarkersSelected {
            markers: self.selected(),
            manual,
        });
    }
}

// ========================================================================
// PointSnap
// ========================================================================

#[derive(Debug)]
pub struct PointSnap {
    current: Option<SnapPoint>,
    selected: BTreeMap<String, SnapPoint>,
    events: EventBus,
}

impl PointSnap {
    pub fn new(events: EventBus) -> Self {
        Self {
            current: None,
            selected: BTreeMap::new(),
            events,
        }
    }

    pub fn current(&self) -> Option<&SnapPoint> {
        self.current.as_ref()
    }

    pub fn set_snap_point(&mut self, point: Option<SnapPoint>) {
        self.current = point;
        self.events.emit(ViewerEvent::SnapPointsHighlighted(
            self.current.iter().cloned().collect(),
        ));
    }

    pub fn add_selected(&mut self, point: SnapPoint) {
        self.selected.insert(point.key(), point);
        self.emit_selected();
    }

    pub fn remove_selected(&mut self, point: &SnapPoint) {
        if self.selected.remove(&point.key()).is_some() {
            self.emit_selected();
        }
    }

    pub fn set_selected(&mut self, points: Vec<SnapPoint>) {
        self.selected = points.into_iter().map(|p| (p.key(), p)).collect();
        self.emit_selected();
    }

    pub fn selected(&self) -> Vec<SnapPoint> {
        self.selected.values().cloned().collect()
    }

    pub fn is_selected(&self, point: &SnapPoint) -> bool {
        self.selected.contains_key(&point.key())
    }

    pub fn reset(&mut self) {
        self.selected.clear();
        self.emit_selected();
        self.set_snap_point(None);
    }

    fn emit_selected(&self) {
        self.events
            .emit(ViewerEvent::SnapPointsSelected(self.selected()));
    }
}

// ========================================================================
// DistanceMeasurer
// ========================================================================

#[derive(Debug)]
pub struct DistanceMeasurer {
    start: Option<Vec3>,
    end: Option<Vec3>,
    events: EventBus,
}

impl DistanceMeasurer {
    pub fn new(events: EventBus) -> Self {
        Self {
            start: None,
            end: None,
            events,
        }
    }

    /// Feeds the next measure point. The previous end becomes the new
    /// start; `None` clears both ends.
    pub fn set_end_marker(&mut self, point: Option<Vec3>) {
        match point {
            None => {
                self.start = None;
                self.end = None;
            }
            Some(point) => {
                if self.end.is_some() {
                    self.start = self.end;
                    self.end = Some(point);
                } else if self.start.is_some() {
                    self.end = Some(point);
                } else {
                    self.start = Some(point);
                }
            }
        }
        self.events
            .emit(ViewerEvent::DistanceMeasured(self.distance()));
    }

    pub fn distance(&self) -> Option<Distance> {
        Some(Distance::between(self.start?, self.end?))
    }

    pub fn ends(&self) -> (Option<Vec3>, Option<Vec3>) {
        (self.start, self.end)
    }

    pub fn reset(&mut self) {
        self.start = None;
        self.end = None;
        self.events.emit(ViewerEvent::DistanceMeasured(None));
    }
}

// ========================================================================
// HudScene
// ========================================================================

#[derive(Debug)]
pub struct HudScene {
    pub markers: Markers,
    pub point_snap: PointSnap,
    pub measurer: DistanceMeasurer,
}

/// Flat quads sharing one color.
#[derive(Debug, Default)]
struct QuadBatch {
    positions: Vec<Vec3>,
    indices: Vec<u32>,
}

impl QuadBatch {
    fn push(&mut self, corners: [Vec3; 4]) {
        let base = self.positions.len() as u32;
        self.positions.extend_from_slice(&corners);
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
}

impl HudScene {
    pub fn new(marker_sprite_size: f32, events: EventBus) -> Self {
        Self {
            markers: Markers::new(marker_sprite_size, events.clone()),
            point_snap: PointSnap::new(events.clone()),
            measurer: DistanceMeasurer::new(events),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.markers.markers().is_empty()
            && self.point_snap.current().is_none()
            && self.point_snap.selected.is_empty()
            && self.measurer.start.is_none()
    }

    /// Draws all HUD elements over `target` after clearing its depth.
    pub fn render(&self, projection: &HudProjection, renderer: &mut SoftwareRenderer, target: &mut RenderTarget) {
        if self.is_empty() {
            return;
        }
        let batches = self.build_batches(projection);
        let materials: Vec<Material> = batches
            .iter()
            .map(|(color, _)| Material::flat_hex(*color))
            .collect();
        let draws: Vec<DrawCall<'_>> = batches
            .iter()
            .zip(&materials)
            .map(|((_, batch), material)| {
                DrawCall::new(&batch.positions, &batch.indices, Mat4::IDENTITY, material)
            })
            .collect();
        let view = View {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
        };
        renderer.clear(target, None, true);
        renderer.render(target, &view, &draws);
    }

    /// Batches are returned bottom layer first. Layer depth follows the
    /// tool: markers under the measurer under the snap points.
    fn build_batches(&self, projection: &HudProjection) -> Vec<(u32, QuadBatch)> {
        let mut out: Vec<(u32, QuadBatch)> = Vec::new();
        let mut batch_for = |color: u32, out: &mut Vec<(u32, QuadBatch)>| -> usize {
            if let Some(i) = out.iter().position(|(c, _)| *c == color) {
                return i;
            }
            out.push((color, QuadBatch::default()));
            out.len() - 1
        };

        let marker_z = -0.1;
        for marker in self.markers.markers() {
            let mut size = self.markers.sprite_size;
            if self.markers.highlighted() == Some(marker.id.as_str()) {
                size *= HIGHLIGHTED_MARKER_SCALE;
            }
            let color = if self.markers.is_selected(&marker.id) {
                MARKER_SELECTED_COLOR
            } else {
                MARKER_COLOR
            };
            if let Some(quad) = sprite(projection, Vec3::from_array(marker.position), size, marker_z) {
                let i = batch_for(color, &mut out);
                out[i].1.push(quad);
            }
        }

        let measure_z = -0.8;
        if let (Some(start), Some(end)) = (self.measurer.start, self.measurer.end) {
            let delta = end - start;
            let x_end = Vec3::new(start.x + delta.x, start.y, start.z);
            let y_end = Vec3::new(x_end.x, x_end.y, x_end.z + delta.z);
            let lines = [
                (MEASURE_X_COLOR, start, x_end, 2.0),
                (MEASURE_Y_COLOR, x_end, y_end, 2.0),
                (MEASURE_Z_COLOR, y_end, end, 2.0),
                (MEASURE_LINE_COLOR, start, end, 4.0),
            ];
            for (color, a, b, width) in lines {
                if let Some(quad) = line(projection, a, b, width, measure_z) {
                    let i = batch_for(color, &mut out);
                    out[i].1.push(quad);
                }
            }
        }
        for (point, color) in [
            (self.measurer.start, MEASURE_START_COLOR),
            (self.measurer.end, MEASURE_END_COLOR),
        ] {
            if let Some(quad) = point.and_then(|p| sprite(projection, p, MEASURER_SPRITE_PX, measure_z - 0.01)) {
                let i = batch_for(color, &mut out);
                out[i].1.push(quad);
            }
        }

        let snap_z = -0.9;
        for point in self.point_snap.selected.values() {
            if let Some(quad) = sprite(projection, Vec3::from_array(point.position), SNAP_SPRITE_PX, snap_z) {
                let i = batch_for(SNAP_SELECTED_COLOR, &mut out);
                out[i].1.push(quad);
            }
        }
        if let Some(point) = self.point_snap.current() {
            if let Some(quad) = sprite(projection, Vec3::from_array(point.position), SNAP_SPRITE_PX, snap_z - 0.01) {
                let i = batch_for(SNAP_COLOR, &mut out);
                out[i].1.push(quad);
            }
        }
        out
    }
}

/// Screen-aligned square of `size` pixels centered on a world point.
fn sprite(projection: &HudProjection, world: Vec3, size: f32, z: f32) -> Option<[Vec3; 4]> {
    let center = projection.project(world);
    if center.z > 1.0 || !center.is_finite() {
        return None;
    }
    let c = center.truncate();
    let h = size / 2.0;
    Some([
        projection.to_ndc(c + Vec2::new(-h, -h), z),
        projection.to_ndc(c + Vec2::new(h, -h), z),
        projection.to_ndc(c + Vec2::new(h, h), z),
        projection.to_ndc(c + Vec2::new(-h, h), z),
    ])
}

/// Segment between two world points drawn `width` pixels wide.
fn line(projection: &HudProjection, a: Vec3, b: Vec3, width: f32, z: f32) -> Option<[Vec3; 4]> {
    let pa = projection.project(a);
    let pb = projection.project(b);
    if pa.z > 1.0 || pb.z > 1.0 || !pa.is_finite() || !pb.is_finite() {
        return None;
    }
    let (pa, pb) = (pa.truncate(), pb.truncate());
    let dir = (pb - pa).normalize_or_zero();
    if dir == Vec2::ZERO {
        return None;
    }
    let normal = dir.perp() * (width / 2.0);
    Some([
        projection.to_ndc(pa - normal, z),
        projection.to_ndc(pb - normal, z),
        projection.to_ndc(pb + normal, z),
        projection.to_ndc(pa + normal, z),
    ])
}
