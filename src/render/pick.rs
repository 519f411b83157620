//! Color-id picking.
//!
//! Every loaded source mesh has a proxy drawn with a unique flat 24-bit
//! color. A pick renders the proxies into a persistent 1×1 target with the
//! camera's view offset narrowed to the requested pixel, reads the pixel
//! back and maps the color to the source mesh. Colors released by removed
//! meshes are reused before new ones are allocated.

use super::hud::SnapPoint;
use crate::engine::{DrawCall, Material, PerspectiveCamera, RenderTarget, SoftwareRenderer};
use crate::scene::{Geometry, MeshHandle, MeshStore, SourceMesh};
use glam::{Mat4, Vec2, Vec3};
use std::collections::HashMap;
use std::sync::Arc;

/// Largest color a proxy can have.
const MAX_PICK_COLOR: u32 = 0xFF_FFFF;

// ========================================================================
// PickingProxy
// ========================================================================

#[derive(Debug, Clone)]
pub struct PickingProxy {
    pub handle: MeshHandle,
    pub mesh_id: String,
    pub geometry: Arc<Geometry>,
    pub world: Mat4,
    pub color: u32,
    material: Material,
    visible: bool,
}

impl PickingProxy {
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Bounding-sphere center in world space.
    pub fn world_center(&self) -> Vec3 {
        self.world
            .transform_point3(self.geometry.bounding_sphere().center)
    }
}

/// Canvas-space rectangle, corners in any order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasRect {
    pub min: Vec2,
    pub max: Vec2,
}

impl CanvasRect {
    pub fn from_corners(a: Vec2, b: Vec2) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    pub fn contains(&self, point: Vec2) -> bool {
        point.x >= self.min.x && point.x <= self.max.x && point.y >= self.min.y && point.y <= self.max.y
    }
}

/// Camera and canvas state a pick runs against. `buffer_size` is the
/// backing-buffer size in pixels; pick points are in the same space.
pub struct PickContext<'a> {
    pub camera: &'a mut PerspectiveCamera,
    pub renderer: &'a mut SoftwareRenderer,
    pub buffer_size: (u32, u32),
}

// ========================================================================
// PickingScene
// ========================================================================

#[derive(Debug)]
pub struct PickingScene {
    target: RenderTarget,
    last_color: u32,
    released_colors: Vec<u32>,
    proxies: Vec<PickingProxy>,
    proxy_by_handle: HashMap<MeshHandle, usize>,
    mesh_by_color: HashMap<u32, MeshHandle>,
}

impl Default for PickingScene {
    fn default() -> Self {
        Self::new()
    }
}

impl PickingScene {
    pub fn new() -> Self {
        Self {
            target: RenderTarget::new(1, 1),
            last_color: 0,
            released_colors: Vec::new(),
            proxies: Vec::new(),
            proxy_by_handle: HashMap::new(),
            mesh_by_color: HashMap::new(),
        }
    }

    fn next_color(&mut self) -> u32 {
        if let Some(color) = self.released_colors.pop() {
            return color;
        }
        if self.last_color == MAX_PICK_COLOR {
            self.last_color = 0;
        }
        self.last_color += 1;
        self.last_color
    }

    pub fn add(&mut self, mesh: &SourceMesh) {
        if self.proxy_by_handle.contains_key(&mesh.handle) {
            return;
        }
        let color = self.next_color();
        self.mesh_by_color.insert(color, mesh.handle);
        self.proxy_by_handle.insert(mesh.handle, self.proxies.len());
        self.proxies.push(PickingProxy {
            handle: mesh.handle,
            mesh_id: mesh.id.clone(),
            geometry: Arc::clone(&mesh.geometry),
            world: mesh.world,
            color,
            material: Material::flat_hex(color),
            visible: true,
        });
    }

    pub fn remove(&mut self, handle: MeshHandle) {
        let Some(slot) = self.proxy_by_handle.remove(&handle) else {
            return;
        };
        let proxy = self.proxies.remove(slot);
        for (i, p) in self.proxies.iter().enumerate().skip(slot) {
            self.proxy_by_handle.insert(p.handle, i);
        }
        self.mesh_by_color.remove(&proxy.color);
        self.released_colors.push(proxy.color);
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn proxy(&self, handle: MeshHandle) -> Option<&PickingProxy> {
        self.proxy_by_handle
            .get(&handle)
            .map(|&i| &self.proxies[i])
    }

    pub fn proxies(&self) -> &[PickingProxy] {
        &self.proxies
    }

    pub fn mesh_by_color(&self, color: u32) -> Option<MeshHandle> {
        self.mesh_by_color.get(&color).copied()
    }

    /// Hides proxies of meshes drawn fully transparent.
    pub fn update_visibility<S: MeshStore + ?Sized>(&mut self, store: &S) {
        for proxy in &mut self.proxies {
            proxy.visible = store
                .mesh(proxy.handle)
                .is_some_and(|mesh| mesh.final_color().opacity != 0.0);
        }
    }

    /// Source mesh under a canvas pixel.
    pub fn pick<S: MeshStore + ?Sized>(&mut self, ctx: &mut PickContext<'_>, store: &S, point: Vec2) -> Option<MeshHandle> {
        self.update_visibility(store);
        let (width, height) = ctx.buffer_size;
        if width == 0 || height == 0 {
            return None;
        }

        let previous_offset = ctx.camera.view_offset();
        let previous_viewport = ctx.renderer.viewport();
        ctx.camera.set_view_offset(
            width as f32,
            height as f32,
            finite_or_zero(point.x),
            finite_or_zero(point.y),
            1.0,
            1.0,
        );
        ctx.renderer.set_viewport(None);

        let view = ctx.camera.view();
        let draws: Vec<DrawCall<'_>> = self
            .proxies
            .iter()
            .filter(|p| p.visible)
            .map(|p| DrawCall::new(p.geometry.positions(), p.geometry.indices(), p.world, &p.material))
            .collect();
        ctx.renderer.clear(&mut self.target, Some([0, 0, 0, 0]), true);
        ctx.renderer.render(&mut self.target, &view, &draws);

        match previous_offset {
            Some(o) => ctx
                .camera
                .set_view_offset(o.full_width, o.full_height, o.x, o.y, o.width, o.height),
            None => ctx.camera.clear_view_offset(),
        }
        ctx.renderer.set_viewport(previous_viewport);

        let [r, g, b, _] = self.target.pixel(0, 0);
        let color = (r as u32) << 16 | (g as u32) << 8 | b as u32;
        let hit = self.mesh_by_color.get(&color).copied();
        log::debug!("Pick at ({:.1}, {:.1}): color {:06x} -> {:?}", point.x, point.y, color, hit);
        hit
    }

    /// Visible meshes whose bounding-sphere center projects into `rect`.
    /// `to_canvas` maps a world point to canvas pixels.
    pub fn pick_area<S, F>(&mut self, store: &S, rect: CanvasRect, to_canvas: F) -> Vec<MeshHandle>
    where
        S: MeshStore + ?Sized,
        F: Fn(Vec3) -> Vec2,
    {
        self.update_visibility(store);
        self.proxies
            .iter()
            .filter(|p| p.visible)
            .filter(|p| rect.contains(to_canvas(p.world_center())))
            .map(|p| p.handle)
            .collect()
    }

    /// Snaps to the vertex of the picked triangle with the largest
    /// barycentric weight. A tie for the largest weight snaps nowhere.
    pub fn pick_vertex<S: MeshStore + ?Sized>(&mut self, ctx: &mut PickContext<'_>, store: &S, point: Vec2) -> Option<SnapPoint> {
        let handle = self.pick(ctx, store, point)?;
        let mesh = store.mesh(handle)?;
        let (width, height) = ctx.buffer_size;
        let ndc = Vec2::new(
            point.x / width as f32 * 2.0 - 1.0,
            point.y / height as f32 * -2.0 + 1.0,
        );
        let ray = ctx.camera.ray_from_ndc(ndc);
        let hit = mesh.raycast(&ray)?;

        let [a, b, c] = hit.triangle;
        let w = hit.barycentric;
        let vertex = if w.x > w.y && w.x > w.z {
            a
        } else if w.y > w.x && w.y > w.z {
            b
        } else if w.z > w.x && w.z > w.y {
            c
        } else {
            return None;
        };
        let position = mesh.world_position(vertex)?;
        Some(SnapPoint {
            mesh_id: mesh.id.clone(),
            position: position.to_array(),
        })
    }
}

fn finite_or_zero(value: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Lights;
    use crate::scene::test_support::{cube_row, mesh, quad_geometry, MeshList};
    use crate::scene::ColorRgbRmo;

    fn camera() -> PerspectiveCamera {
        let mut camera = PerspectiveCamera::new(45.0, 1.0, 0.1, 1000.0);
        camera.look_at(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO);
        camera
    }

    fn scene_with(store: &MeshList) -> PickingScene {
        let mut scene = PickingScene::new();
        for handle in store.mesh_handles() {
            scene.add(store.mesh(*handle).unwrap());
        }
        scene
    }

    fn single_quad() -> MeshList {
        let mut store = MeshList::default();
        store.push(mesh(
            1,
            "g1",
            "quad",
            quad_geometry(),
            Mat4::from_scale(Vec3::splat(4.0)),
        ));
        store
    }

    #[test]
    fn colors_start_at_one_and_are_unique() {
        let mut store = MeshList::default();
        for m in cube_row("g1", 1, 3) {
            store.push(m);
        }
        let scene = scene_with(&store);
        let colors: Vec<u32> = scene.proxies().iter().map(|p| p.color).collect();
        assert_eq!(colors, vec![1, 2, 3]);
    }

    #[test]
    fn released_colors_are_reused_first() {
        let mut store = MeshList::default();
        for m in cube_row("g1", 1, 5) {
            store.push(m);
        }
        let mut scene = scene_with(&store);
        scene.remove(MeshHandle(2));
        scene.remove(MeshHandle(4));
        for m in cube_row("g2", 10, 3) {
            scene.add(&m);
        }
        let mut colors: Vec<u32> = scene.proxies().iter().map(|p| p.color).collect();
        colors.sort_unstable();
        assert_eq!(colors, vec![1, 2, 3, 4, 5, 6]);
        // Last released is handed out first.
        assert_eq!(scene.proxy(MeshHandle(10)).unwrap().color, 4);
        assert_eq!(scene.proxy(MeshHandle(11)).unwrap().color, 2);
        assert_eq!(scene.proxy(MeshHandle(12)).unwrap().color, 6);
    }

    #[test]
    fn counter_wraps_after_max_color() {
        let mut scene = PickingScene::new();
        scene.last_color = MAX_PICK_COLOR;
        assert_eq!(scene.next_color(), 1);
    }

    #[test]
    fn pick_hits_mesh_and_misses_background() {
        let store = single_quad();
        let mut scene = scene_with(&store);
        let mut camera = camera();
        let mut renderer = SoftwareRenderer::new(Lights::default());
        let mut ctx = PickContext {
            camera: &mut camera,
            renderer: &mut renderer,
            buffer_size: (200, 200),
        };
        assert_eq!(scene.pick(&mut ctx, &store, Vec2::new(100.0, 100.0)), Some(MeshHandle(1)));
        assert_eq!(scene.pick(&mut ctx, &store, Vec2::new(2.0, 2.0)), None);
    }

    #[test]
    fn pick_restores_view_offset() {
        let store = single_quad();
        let mut scene = scene_with(&store);
        let mut camera = camera();
        let mut renderer = SoftwareRenderer::default();
        let before = camera.projection_matrix();
        let mut ctx = PickContext {
            camera: &mut camera,
            renderer: &mut renderer,
            buffer_size: (64, 64),
        };
        scene.pick(&mut ctx, &store, Vec2::new(32.0, 32.0));
        assert!(camera.view_offset().is_none());
        assert_eq!(camera.projection_matrix(), before);
    }

    #[test]
    fn invisible_meshes_are_not_pickable() {
        let mut store = single_quad();
        store
            .mesh_mut(MeshHandle(1))
            .unwrap()
            .colors
            .set_paint(ColorRgbRmo::from_hex(0xFFFFFF, 1.0, 0.0, 0.0));
        let mut scene = scene_with(&store);
        let mut camera = camera();
        let mut renderer = SoftwareRenderer::default();
        let mut ctx = PickContext {
            camera: &mut camera,
            renderer: &mut renderer,
            buffer_size: (64, 64),
        };
        assert_eq!(scene.pick(&mut ctx, &store, Vec2::new(32.0, 32.0)), None);
        assert!(!scene.proxy(MeshHandle(1)).unwrap().is_visible());
    }

    #[test]
    fn area_pick_tests_projected_centers() {
        let mut store = MeshList::default();
        for m in cube_row("g1", 1, 4) {
            store.push(m);
        }
        let mut scene = scene_with(&store);
        // Identity "projection": world x/y are canvas pixels.
        let rect = CanvasRect::from_corners(Vec2::new(25.0, 5.0), Vec2::new(-5.0, -5.0));
        let mut found = scene.pick_area(&store, rect, |p| Vec2::new(p.x, p.y));
        found.sort();
        assert_eq!(found, vec![MeshHandle(1), MeshHandle(2), MeshHandle(3)]);
    }

    #[test]
    fn vertex_pick_snaps_to_nearest_corner() {
        let store = single_quad();
        let mut scene = scene_with(&store);
        let mut camera = camera();
        let mut renderer = SoftwareRenderer::default();
        let mut ctx = PickContext {
            camera: &mut camera,
            renderer: &mut renderer,
            buffer_size: (200, 200),
        };
        // Slightly up and right of center, inside the quad's top-right area.
        let corner = ctx.camera.project(Vec3::new(2.0, 2.0, 0.0));
        let px = (corner.x * 0.5 + 0.5) * 200.0 - 3.0;
        let py = (0.5 - corner.y * 0.5) * 200.0 + 3.0;
        let snap = scene
            .pick_vertex(&mut ctx, &store, Vec2::new(px, py))
            .expect("pixel is over the quad");
        assert_eq!(snap.mesh_id, "g1|quad");
        assert_eq!(snap.position, [2.0, 2.0, 0.0]);
    }
}
