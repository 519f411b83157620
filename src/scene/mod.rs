//! Loaded scene data: source meshes, their geometry and the viewer state
//! attached to each mesh at creation.

pub mod color;

pub use color::{ColorRgbRmo, CommonColors, MeshColors, OverridePalette, RefreshResult};

use glam::{Mat4, Vec3, Vec4Swizzles};
use std::sync::Arc;

/// Opaque key of a loaded source mesh. Unique for the lifetime of a loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshHandle(pub u64);

// ========================================================================
// Bounds
// ========================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Vec3>) -> Self {
        let mut bounds = Self::EMPTY;
        for point in points {
            bounds.expand_by_point(*point);
        }
        bounds
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn expand_by_point(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn center(&self) -> Vec3 {
        if self.is_empty() {
            return Vec3::ZERO;
        }
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        if self.is_empty() {
            return Vec3::ZERO;
        }
        self.max - self.min
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(b.x, b.y, b.z),
            Vec3::new(a.x, b.y, b.z),
        ]
    }

    pub fn transformed(&self, matrix: &Mat4) -> Aabb {
        if self.is_empty() {
            return *self;
        }
        let mut out = Aabb::EMPTY;
        for corner in self.corners() {
            out.expand_by_point(matrix.transform_point3(corner));
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}

// ========================================================================
// Geometry
// ========================================================================

/// Immutable indexed triangle geometry in mesh-local space.
#[derive(Debug, Clone)]
pub struct Geometry {
    positions: Vec<Vec3>,
    indices: Vec<u32>,
    normals: Option<Vec<Vec3>>,
    bounds: Aabb,
    sphere: BoundingSphere,
}

impl Geometry {
    /// Non-indexed input gets a sequential index buffer. Triangles that
    /// reference missing vertices are dropped.
    pub fn new(positions: Vec<Vec3>, indices: Option<Vec<u32>>, normals: Option<Vec<Vec3>>) -> Self {
        let vertex_count = positions.len() as u32;
        let raw = indices.unwrap_or_else(|| (0..vertex_count).collect());
        let mut indices = Vec::with_capacity(raw.len() - raw.len() % 3);
        let mut dropped = 0usize;
        for tri in raw.chunks_exact(3) {
            if tri.iter().all(|&i| i < vertex_count) {
                indices.extend_from_slice(tri);
            } else {
                dropped += 1;
            }
        }
        if dropped > 0 {
            log::warn!("Dropped {} triangles with out-of-range indices", dropped);
        }

        let normals = normals.filter(|n| n.len() == positions.len());
        let bounds = Aabb::from_points(&positions);
        let center = bounds.center();
        let radius = positions
            .iter()
            .map(|p| p.distance_squared(center))
            .fold(0.0f32, f32::max)
            .sqrt();
        Self {
            positions,
            indices,
            normals,
            bounds,
            sphere: BoundingSphere { center, radius },
        }
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn normals(&self) -> Option<&[Vec3]> {
        self.normals.as_deref()
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    pub fn bounding_sphere(&self) -> BoundingSphere {
        self.sphere
    }

    pub fn triangles(&self) -> impl Iterator<Item = [u32; 3]> + '_ {
        self.indices.chunks_exact(3).map(|t| [t[0], t[1], t[2]])
    }
}

// ========================================================================
// Materials as authored in the model file
// ========================================================================

/// Authored material of a source mesh, reduced to what recoloring needs.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceMaterial {
    /// Metallic-roughness PBR material.
    Standard {
        color: [f32; 3],
        roughness: f32,
        metalness: f32,
        opacity: f32,
    },
    /// Unlit or classic-lit material with only a base color.
    Basic { color: [f32; 3], opacity: f32 },
    Unknown { opacity: f32 },
}

impl Default for SourceMaterial {
    fn default() -> Self {
        SourceMaterial::Standard {
            color: [1.0, 1.0, 1.0],
            roughness: 1.0,
            metalness: 0.0,
            opacity: 1.0,
        }
    }
}

// ========================================================================
// Rays
// ========================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize_or_zero(),
        }
    }

    pub fn at(&self, distance: f32) -> Vec3 {
        self.origin + self.direction * distance
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub distance: f32,
    /// World-space intersection point.
    pub point: Vec3,
    /// Vertex indices of the hit triangle.
    pub triangle: [u32; 3],
    /// Barycentric weights for `triangle`, in the same order.
    pub barycentric: Vec3,
}

/// Double-sided Möller–Trumbore test. Returns `(distance, u, v)`.
pub fn intersect_triangle(ray: &Ray, a: Vec3, b: Vec3, c: Vec3) -> Option<(f32, f32, f32)> {
    const EPSILON: f32 = 1e-8;
    let edge1 = b - a;
    let edge2 = c - a;
    let p = ray.direction.cross(edge2);
    let det = edge1.dot(p);
    if det.abs() < EPSILON {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = ray.origin - a;
    let u = s.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(edge1);
    let v = ray.direction.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = edge2.dot(q) * inv_det;
    (t > EPSILON).then_some((t, u, v))
}

// ========================================================================
// SourceMesh
// ========================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeshFlags {
    pub selected: bool,
    pub highlighted: bool,
    pub isolated: bool,
    pub colored: bool,
}

/// One geometry+material leaf of a loaded model.
#[derive(Debug)]
pub struct SourceMesh {
    pub handle: MeshHandle,
    /// `"{model_guid}|{name or uuid}"`.
    pub id: String,
    pub model_guid: String,
    pub name: String,
    pub geometry: Arc<Geometry>,
    pub world: Mat4,
    pub material: SourceMaterial,
    pub flags: MeshFlags,
    pub colors: MeshColors,
}

impl SourceMesh {
    pub fn original_color(&self) -> &ColorRgbRmo {
        self.colors.original(&self.material)
    }

    pub fn final_color(&self) -> &ColorRgbRmo {
        self.colors.final_color(&self.material)
    }

    pub fn world_bounds(&self) -> Aabb {
        self.geometry.bounds().transformed(&self.world)
    }

    pub fn world_sphere_center(&self) -> Vec3 {
        self.world
            .transform_point3(self.geometry.bounding_sphere().center)
    }

    pub fn world_position(&self, index: u32) -> Option<Vec3> {
        self.geometry
            .positions()
            .get(index as usize)
            .map(|p| self.world.transform_point3(*p))
    }

    /// Nearest intersection of a world-space ray with this mesh.
    pub fn raycast(&self, ray: &Ray) -> Option<RayHit> {
        // Intersect in local space, then bring the hit back to world space.
        let inverse = self.world.inverse();
        let local_origin = inverse.transform_point3(ray.origin);
        let local_dir = inverse.transform_vector3(ray.direction);
        let local_ray = Ray::new(local_origin, local_dir);
        if local_ray.direction == Vec3::ZERO {
            return None;
        }

        let positions = self.geometry.positions();
        let mut best: Option<RayHit> = None;
        for tri in self.geometry.triangles() {
            let [a, b, c] = tri.map(|i| positions[i as usize]);
            let Some((t, u, v)) = intersect_triangle(&local_ray, a, b, c) else {
                continue;
            };
            let point = self.world.transform_point3(local_ray.at(t));
            let distance = point.distance(ray.origin);
            if best.map_or(true, |hit| distance < hit.distance) {
                best = Some(RayHit {
                    distance,
                    point,
                    triangle: tri,
                    barycentric: Vec3::new(1.0 - u - v, u, v),
                });
            }
        }
        best
    }
}

/// Read/write access to the loaded source meshes, in load order.
pub trait MeshStore {
    fn mesh(&self, handle: MeshHandle) -> Option<&SourceMesh>;
    fn mesh_mut(&mut self, handle: MeshHandle) -> Option<&mut SourceMesh>;
    fn mesh_handles(&self) -> &[MeshHandle];
}

/// Builds the translation that moves `base_point` to the working origin.
pub fn base_point_transform(base_point: Vec3) -> Mat4 {
    Mat4::from_translation(base_point).inverse()
}

/// World position encoded in the translation column of `matrix`.
pub fn matrix_translation(matrix: &Mat4) -> Vec3 {
    matrix.w_axis.xyz()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Axis-aligned unit quad (two triangles) in the XY plane.
    pub fn quad_geometry() -> Geometry {
        Geometry::new(
            vec![
                Vec3::new(-0.5, -0.5, 0.0),
                Vec3::new(0.5, -0.5, 0.0),
                Vec3::new(0.5, 0.5, 0.0),
                Vec3::new(-0.5, 0.5, 0.0),
            ],
            Some(vec![0, 1, 2, 0, 2, 3]),
            None,
        )
    }

    pub fn cube_geometry(size: f32) -> Geometry {
        let h = size * 0.5;
        let bounds = Aabb::new(Vec3::splat(-h), Vec3::splat(h));
        let positions = bounds.corners().to_vec();
        let indices = vec![
            0, 2, 1, 0, 3, 2, // -z
            4, 5, 6, 4, 6, 7, // +z
            0, 1, 5, 0, 5, 4, // -y
            3, 7, 6, 3, 6, 2, // +y
            0, 4, 7, 0, 7, 3, // -x
            1, 2, 6, 1, 6, 5, // +x
        ];
        Geometry::new(positions, Some(indices), None)
    }

    /// Plain in-memory [`MeshStore`].
    #[derive(Debug, Default)]
    pub struct MeshList {
        meshes: Vec<SourceMesh>,
        handles: Vec<MeshHandle>,
    }

    impl MeshList {
        pub fn push(&mut self, mesh: SourceMesh) -> MeshHandle {
            let handle = mesh.handle;
            self.handles.push(handle);
            self.meshes.push(mesh);
            handle
        }

        pub fn remove(&mut self, handle: MeshHandle) -> Option<SourceMesh> {
            let at = self.handles.iter().position(|h| *h == handle)?;
            self.handles.remove(at);
            Some(self.meshes.remove(at))
        }
    }

    impl MeshStore for MeshList {
        fn mesh(&self, handle: MeshHandle) -> Option<&SourceMesh> {
            self.meshes.iter().find(|m| m.handle == handle)
        }

        fn mesh_mut(&mut self, handle: MeshHandle) -> Option<&mut SourceMesh> {
            self.meshes.iter_mut().find(|m| m.handle == handle)
        }

        fn mesh_handles(&self) -> &[MeshHandle] {
            &self.handles
        }
    }

    /// `count` unit cubes of model `guid`, 10 units apart along +X.
    pub fn cube_row(guid: &str, first_handle: u64, count: usize) -> Vec<SourceMesh> {
        (0..count)
            .map(|i| {
                mesh(
                    first_handle + i as u64,
                    guid,
                    &format!("mesh{}", i),
                    cube_geometry(1.0),
                    Mat4::from_translation(Vec3::new(i as f32 * 10.0, 0.0, 0.0)),
                )
            })
            .collect()
    }

    pub fn mesh(handle: u64, guid: &str, name: &str, geometry: Geometry, world: Mat4) -> SourceMesh {
        SourceMesh {
            handle: MeshHandle(handle),
            id: format!("{}|{}", guid, name),
            model_guid: guid.to_string(),
            name: name.to_string(),
            geometry: Arc::new(geometry),
            world,
            material: SourceMaterial::default(),
            flags: MeshFlags::default(),
            colors: MeshColors::default(),
        }
    }
}
