//! Cheap stand-in scene drawn while the camera moves.
//!
//! Every loaded mesh is reduced to its convex hull or its world-space
//! bounding box, and all of them go into one gray geometry. The scene is
//! rebuilt when the set of meshes changes and is never recolored.

use super::hull::convex_hull;
use super::jobs::{ChunkedWork, SliceOutcome, TimeSlicer};
use crate::engine::{DrawCall, Material};
use crate::options::FastRenderType;
use crate::scene::{Geometry, MeshHandle, MeshStore};
use glam::{Mat4, Vec3};
use std::collections::HashMap;

const SIMPLE_COLOR: u32 = 0x808080;

/// Triangles of a box whose corners are ordered front face (max z) first:
/// `(min,min)`, `(max,min)`, `(max,max)`, `(min,max)` in x/y, then the same
/// for the back face.
const BOX_INDICES: [u32; 36] = [
    0, 1, 3, 3, 1, 2, //
    1, 5, 2, 2, 5, 6, //
    5, 4, 6, 6, 4, 7, //
    4, 0, 7, 7, 0, 3, //
    3, 2, 7, 7, 2, 6, //
    4, 5, 0, 0, 5, 1,
];

#[derive(Debug)]
pub struct SimplifiedBuild {
    kind: FastRenderType,
    handles: Vec<MeshHandle>,
    next: usize,
    points: Vec<Vec3>,
    indices: Vec<u32>,
    index_by_key: HashMap<[u32; 3], u32>,
}

impl SimplifiedBuild {
    fn new(kind: FastRenderType, handles: Vec<MeshHandle>) -> Self {
        Self {
            kind,
            handles,
            next: 0,
            points: Vec::new(),
            indices: Vec::new(),
            index_by_key: HashMap::new(),
        }
    }

    fn push_hull(&mut self, world_points: &[Vec3]) {
        let Some(triangles) = convex_hull(world_points) else {
            return;
        };
        for point in triangles.into_iter().flatten() {
            let key = point.to_array().map(f32::to_bits);
            let index = match self.index_by_key.get(&key) {
                Some(&index) => index,
                None => {
                    let index = self.points.len() as u32;
                    self.points.push(point);
                    self.index_by_key.insert(key, index);
                    index
                }
            };
            self.indices.push(index);
        }
    }

    fn push_box(&mut self, geometry: &Geometry, world: &Mat4) {
        let bounds = geometry.bounds();
        if bounds.is_empty() {
            return;
        }
        let (lo, hi) = (bounds.min, bounds.max);
        let corners = [
            Vec3::new(lo.x, lo.y, hi.z),
            Vec3::new(hi.x, lo.y, hi.z),
            Vec3::new(hi.x, hi.y, hi.z),
            Vec3::new(lo.x, hi.y, hi.z),
            Vec3::new(lo.x, lo.y, lo.z),
            Vec3::new(hi.x, lo.y, lo.z),
            Vec3::new(hi.x, hi.y, lo.z),
            Vec3::new(lo.x, hi.y, lo.z),
        ];
        let base = self.points.len() as u32;
        self.points
            .extend(corners.iter().map(|c| world.transform_point3(*c)));
        self.indices.extend(BOX_INDICES.iter().map(|i| base + i));
    }

    fn finish(self) -> Option<Geometry> {
        if self.indices.is_empty() {
            return None;
        }
        Some(Geometry::new(self.points, Some(self.indices), None))
    }
}

impl<S: MeshStore + ?Sized> ChunkedWork<S> for SimplifiedBuild {
    fn step(&mut self, store: &S) -> bool {
        let Some(&handle) = self.handles.get(self.next) else {
            return false;
        };
        self.next += 1;
        let Some(mesh) = store.mesh(handle) else {
            return true;
        };
        match self.kind {
            FastRenderType::ConvexHull => {
                let world_points: Vec<Vec3> = mesh
                    .geometry
                    .positions()
                    .iter()
                    .map(|p| mesh.world.transform_point3(*p))
                    .collect();
                self.push_hull(&world_points);
            }
            FastRenderType::Aabb => self.push_box(&mesh.geometry, &mesh.world),
        }
        true
    }
}

#[derive(Debug)]
pub struct SimplifiedScene {
    kind: Option<FastRenderType>,
    geometry: Option<Geometry>,
    build: Option<SimplifiedBuild>,
    rebuild_requested: bool,
    material: Material,
}

impl SimplifiedScene {
    pub fn new(kind: Option<FastRenderType>) -> Self {
        Self {
            kind,
            geometry: None,
            build: None,
            rebuild_requested: false,
            material: Material::standard_hex(SIMPLE_COLOR),
        }
    }

    pub fn kind(&self) -> Option<FastRenderType> {
        self.kind
    }

    /// Switching the kind drops the current geometry; a rebuild must be
    /// requested separately.
    pub fn set_kind(&mut self, kind: Option<FastRenderType>) {
        if self.kind != kind {
            self.kind = kind;
            self.geometry = None;
        }
    }

    pub fn request_rebuild(&mut self) {
        if self.kind.is_some() {
            self.rebuild_requested = true;
        }
    }

    pub fn is_building(&self) -> bool {
        self.build.is_some() || self.rebuild_requested
    }

    /// The scene is ready to stand in for the full one.
    pub fn is_ready(&self) -> bool {
        self.geometry.is_some()
    }

    pub fn geometry(&self) -> Option<&Geometry> {
        self.geometry.as_ref()
    }

    /// Advances the build by one slice. Returns true when a build completed.
    pub fn tick<S: MeshStore + ?Sized>(&mut self, slicer: &TimeSlicer, store: &S) -> bool {
        if self.build.is_none() && self.rebuild_requested {
            self.rebuild_requested = false;
            let Some(kind) = self.kind else {
                return false;
            };
            self.build = Some(SimplifiedBuild::new(kind, store.mesh_handles().to_vec()));
        }
        let Some(build) = self.build.as_mut() else {
            return false;
        };
        if slicer.run_slice(build, store) == SliceOutcome::Yielded {
            return false;
        }
        if let Some(build) = self.build.take() {
            self.geometry = build.finish();
            log::debug!(
                "Simplified scene built: {} points",
                self.geometry.as_ref().map_or(0, |g| g.vertex_count())
            );
        }
        true
    }

    pub fn rebuild_now<S: MeshStore + ?Sized>(&mut self, store: &S) {
        self.request_rebuild();
        while self.is_building() {
            self.tick(&TimeSlicer::new(std::time::Duration::MAX), store);
        }
    }

    pub fn clear(&mut self) {
        self.geometry = None;
    }

    pub fn draw_calls(&self) -> Vec<DrawCall<'_>> {
        self.geometry
            .iter()
            .map(|g| DrawCall::new(g.positions(), g.indices(), Mat4::IDENTITY, &self.material))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::test_support::{cube_row, MeshList};

    fn store(count: usize) -> MeshList {
        let mut store = MeshList::default();
        for mesh in cube_row("g1", 1, count) {
            store.push(mesh);
        }
        store
    }

    #[test]
    fn hull_scene_dedupes_cube_corners() {
        let store = store(1);
        let mut scene = SimplifiedScene::new(Some(FastRenderType::ConvexHull));
        scene.rebuild_now(&store);
        let geometry = scene.geometry().unwrap();
        assert_eq!(geometry.vertex_count(), 8);
        assert_eq!(geometry.index_count(), 36);
    }

    #[test]
    fn box_scene_has_eight_corners_per_mesh() {
        let store = store(3);
        let mut scene = SimplifiedScene::new(Some(FastRenderType::Aabb));
        scene.rebuild_now(&store);
        let geometry = scene.geometry().unwrap();
        assert_eq!(geometry.vertex_count(), 24);
        assert_eq!(geometry.index_count(), 108);
        // Third cube sits at x = 20.
        assert!(geometry.bounds().max.x > 20.0);
        assert_eq!(scene.draw_calls().len(), 1);
    }

    #[test]
    fn no_kind_means_no_scene() {
        let store = store(2);
        let mut scene = SimplifiedScene::new(None);
        scene.rebuild_now(&store);
        assert!(!scene.is_ready());
        assert!(scene.draw_calls().is_empty());
    }

    #[test]
    fn build_yields_between_meshes() {
        let store = store(4);
        let mut scene = SimplifiedScene::new(Some(FastRenderType::Aabb));
        scene.request_rebuild();
        let slicer = TimeSlicer::new(std::time::Duration::ZERO);
        let mut ticks = 1;
        while !scene.tick(&slicer, &store) {
            ticks += 1;
        }
        assert_eq!(ticks, 5);
        assert!(scene.is_ready());
    }
}
