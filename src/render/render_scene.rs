//! Draw batches built from the loaded source meshes.
//!
//! Without a merge type every source mesh gets its own draw mesh with a
//! material shared by all meshes of the same color. With a merge type the
//! meshes are flattened into a few [`RenderGeometry`] batches that carry the
//! colors per vertex; recoloring rewrites byte slices in place.

use super::jobs::{ChunkedWork, SliceOutcome, TimeSlicer};
use crate::engine::{BufferAttribute, DrawCall, Material, VertexColors};
use crate::options::MeshMergeType;
use crate::scene::color::ColorKey;
use crate::scene::{ColorRgbRmo, CommonColors, Geometry, MeshHandle, MeshStore, OverridePalette};
use glam::{Mat4, Vec3};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

// ========================================================================
// Material cache (unmerged mode)
// ========================================================================

/// One material per distinct color tuple.
#[derive(Debug, Default)]
pub struct MaterialCache {
    materials: HashMap<ColorKey, Arc<Material>>,
}

impl MaterialCache {
    pub fn get(&mut self, color: &ColorRgbRmo) -> Arc<Material> {
        Arc::clone(
            self.materials
                .entry(color.key())
                .or_insert_with(|| Arc::new(Material::Standard(*color))),
        )
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    pub fn clear(&mut self) {
        self.materials.clear();
    }
}

#[derive(Debug, Clone)]
pub struct DrawMesh {
    pub handle: MeshHandle,
    pub geometry: Arc<Geometry>,
    pub world: Mat4,
    pub material: Arc<Material>,
}

// ========================================================================
// RenderGeometry (merged mode)
// ========================================================================

/// Part of a merged batch contributed by one source mesh.
#[derive(Debug, Clone)]
pub struct MeshSlice {
    pub handle: MeshHandle,
    pub first_vertex: usize,
    pub vertex_count: usize,
    /// The mesh's triangles, offset into the batch's vertex range.
    pub indices: Vec<u32>,
    pub opaque: bool,
}

#[derive(Debug)]
pub struct RenderGeometry {
    position: BufferAttribute<Vec3>,
    color: BufferAttribute<u8>,
    rmo: BufferAttribute<u8>,
    index: BufferAttribute<u32>,
    /// Leading part of `index` that is drawn. Shrinks when meshes unload.
    active_indices: usize,
    slices: Vec<MeshSlice>,
    slice_by_handle: HashMap<MeshHandle, usize>,
}

impl RenderGeometry {
    fn with_capacity(vertex_count: usize, index_count: usize) -> Self {
        Self {
            position: BufferAttribute::filled(Vec3::ZERO, vertex_count, 1),
            color: BufferAttribute::filled(0, vertex_count, 3),
            rmo: BufferAttribute::filled(0, vertex_count, 3),
            index: BufferAttribute::filled(0, index_count, 1),
            active_indices: 0,
            slices: Vec::new(),
            slice_by_handle: HashMap::new(),
        }
    }

    /// Appends one mesh: world-space positions, its final color repeated per
    /// vertex and its offset indices.
    fn append(&mut self, handle: MeshHandle, geometry: &Geometry, world: &Mat4, color: &ColorRgbRmo) {
        let first_vertex = self
            .slices
            .last()
            .map_or(0, |s| s.first_vertex + s.vertex_count);
        let rgb = color.rgb_bytes();
        let rmo = color.rmo_bytes();
        for (i, p) in geometry.positions().iter().enumerate() {
            let at = first_vertex + i;
            self.position.set_item(at, &[world.transform_point3(*p)]);
            self.color.set_item(at, &rgb);
            self.rmo.set_item(at, &rmo);
        }

        let offset = first_vertex as u32;
        let indices: Vec<u32> = geometry.indices().iter().map(|i| i + offset).collect();
        let start = self.active_indices;
        self.index.array_mut()[start..start + indices.len()].copy_from_slice(&indices);
        self.active_indices += indices.len();

        self.slice_by_handle.insert(handle, self.slices.len());
        self.slices.push(MeshSlice {
            handle,
            first_vertex,
            vertex_count: geometry.vertex_count(),
            indices,
            opaque: color.opacity == 1.0,
        });
    }

    pub fn positions(&self) -> &BufferAttribute<Vec3> {
        &self.position
    }

    pub fn colors(&self) -> &BufferAttribute<u8> {
        &self.color
    }

    pub fn rmos(&self) -> &BufferAttribute<u8> {
        &self.rmo
    }

    pub fn index(&self) -> &BufferAttribute<u32> {
        &self.index
    }

    /// Indices currently drawn, in draw order.
    pub fn active_indices(&self) -> &[u32] {
        &self.index.array()[..self.active_indices]
    }

    pub fn slices(&self) -> &[MeshSlice] {
        &self.slices
    }

    pub fn slice(&self, handle: MeshHandle) -> Option<&MeshSlice> {
        self.slice_by_handle.get(&handle).map(|&i| &self.slices[i])
    }

    pub fn contains(&self, handle: MeshHandle) -> bool {
        self.slice_by_handle.contains_key(&handle)
    }

    /// Opacity byte currently stored for the mesh, as a fraction.
    fn stored_opacity(&self, slice: &MeshSlice) -> f32 {
        if slice.vertex_count == 0 {
            return if slice.opaque { 1.0 } else { 0.0 };
        }
        self.rmo.item(slice.first_vertex)[2] as f32 / 255.0
    }

    fn write_color(&mut self, slot: usize, color: &ColorRgbRmo) {
        let slice = &mut self.slices[slot];
        slice.opaque = color.opacity == 1.0;
        let rgb = color.rgb_bytes();
        let rmo = color.rmo_bytes();
        for at in slice.first_vertex..slice.first_vertex + slice.vertex_count {
            self.color.set_item(at, &rgb);
            self.rmo.set_item(at, &rmo);
        }
    }

    /// Rewrites the index buffer: opaque meshes first, then transparent
    /// ones, each bucket in slice order.
    fn sort_by_opacity(&mut self) {
        let opaque = self.slices.iter().filter(|s| s.opaque);
        let transparent = self.slices.iter().filter(|s| !s.opaque);
        let array = self.index.array_mut();
        let mut cursor = 0;
        for slice in opaque.chain(transparent) {
            array[cursor..cursor + slice.indices.len()].copy_from_slice(&slice.indices);
            cursor += slice.indices.len();
        }
        self.active_indices = cursor;
        self.index.mark_needs_update();
    }

    fn remove(&mut self, handle: MeshHandle) -> bool {
        let Some(slot) = self.slice_by_handle.remove(&handle) else {
            return false;
        };
        self.slices.remove(slot);
        for (i, slice) in self.slices.iter().enumerate().skip(slot) {
            self.slice_by_handle.insert(slice.handle, i);
        }
        true
    }

    fn sync(&mut self) -> usize {
        [
            self.position.sync(),
            self.color.sync(),
            self.rmo.sync(),
            self.index.sync(),
        ]
        .into_iter()
        .filter(|uploaded| *uploaded)
        .count()
    }
}

// ========================================================================
// Scene build job
// ========================================================================

#[derive(Debug)]
enum BuildPlan {
    Unmerged {
        handles: Vec<MeshHandle>,
        next: usize,
        draw_meshes: Vec<DrawMesh>,
    },
    Merged {
        groups: Vec<Vec<MeshHandle>>,
        group: usize,
        mesh: usize,
        current: Option<RenderGeometry>,
        done: Vec<(RenderGeometry, Vec<MeshHandle>)>,
    },
}

/// Resumable scene build, one source mesh per step. Meshes unloaded while
/// the build runs are skipped.
#[derive(Debug)]
pub struct SceneBuild {
    merge_type: Option<MeshMergeType>,
    plan: BuildPlan,
    materials: MaterialCache,
}

impl SceneBuild {
    fn new<S: MeshStore + ?Sized>(merge_type: Option<MeshMergeType>, chunk_size: usize, store: &S, materials: MaterialCache) -> Self {
        let handles = store.mesh_handles().to_vec();
        let plan = match merge_type {
            None => BuildPlan::Unmerged {
                draw_meshes: Vec::with_capacity(handles.len()),
                handles,
                next: 0,
            },
            Some(kind) => BuildPlan::Merged {
                groups: group_meshes(kind, chunk_size, &handles, store),
                group: 0,
                mesh: 0,
                current: None,
                done: Vec::new(),
            },
        };
        Self {
            merge_type,
            plan,
            materials,
        }
    }
}

impl<S: MeshStore + ?Sized> ChunkedWork<S> for SceneBuild {
    fn step(&mut self, store: &S) -> bool {
        match &mut self.plan {
            BuildPlan::Unmerged {
                handles,
                next,
                draw_meshes,
            } => {
                let Some(&handle) = handles.get(*next) else {
                    return false;
                };
                *next += 1;
                if let Some(mesh) = store.mesh(handle) {
                    draw_meshes.push(DrawMesh {
                        handle,
                        geometry: Arc::clone(&mesh.geometry),
                        world: mesh.world,
                        material: self.materials.get(mesh.final_color()),
                    });
                }
                true
            }
            BuildPlan::Merged {
                groups,
                group,
                mesh,
                current,
                done,
            } => {
                let Some(members) = groups.get(*group) else {
                    return false;
                };
                if current.is_none() {
                    let (vertices, indices) = members
                        .iter()
                        .filter_map(|h| store.mesh(*h))
                        .fold((0, 0), |(v, i), m| {
                            (v + m.geometry.vertex_count(), i + m.geometry.index_count())
                        });
                    if vertices == 0 {
                        *group += 1;
                        return true;
                    }
                    *current = Some(RenderGeometry::with_capacity(vertices, indices));
                    *mesh = 0;
                }

                if let (Some(&handle), Some(geometry)) = (members.get(*mesh), current.as_mut()) {
                    if let Some(source) = store.mesh(handle) {
                        geometry.append(handle, &source.geometry, &source.world, source.final_color());
                    }
                    *mesh += 1;
                }
                if *mesh >= members.len() {
                    if let Some(geometry) = current.take() {
                        done.push((geometry, members.clone()));
                    }
                    *group += 1;
                }
                true
            }
        }
    }
}

/// Splits meshes into merge groups. Empty groups are dropped.
pub fn group_meshes<S: MeshStore + ?Sized>(
    kind: MeshMergeType,
    chunk_size: usize,
    handles: &[MeshHandle],
    store: &S,
) -> Vec<Vec<MeshHandle>> {
    if handles.is_empty() {
        return Vec::new();
    }
    if kind == MeshMergeType::Scene {
        return vec![handles.to_vec()];
    }

    let mut order: Vec<&str> = Vec::new();
    let mut by_model: HashMap<&str, Vec<MeshHandle>> = HashMap::new();
    for handle in handles {
        let Some(mesh) = store.mesh(*handle) else {
            continue;
        };
        let guid = mesh.model_guid.as_str();
        by_model
            .entry(guid)
            .or_insert_with(|| {
                order.push(guid);
                Vec::new()
            })
            .push(*handle);
    }

    let chunk_size = chunk_size.max(1);
    let mut groups = Vec::new();
    for guid in order {
        let Some(meshes) = by_model.remove(guid) else {
            continue;
        };
        match kind {
            MeshMergeType::ModelPlus => groups.extend(meshes.chunks(chunk_size).map(<[_]>::to_vec)),
            _ => groups.push(meshes),
        }
    }
    groups
}

// ========================================================================
// RenderScene
// ========================================================================

#[derive(Debug)]
pub struct RenderScene {
    merge_type: Option<MeshMergeType>,
    chunk_size: usize,
    palette: OverridePalette,
    materials: MaterialCache,
    vertex_material: Material,
    draw_meshes: Vec<DrawMesh>,
    draw_mesh_by_handle: HashMap<MeshHandle, usize>,
    groups: Vec<RenderGeometry>,
    group_by_handle: HashMap<MeshHandle, usize>,
    groups_need_sort: HashSet<usize>,
    build: Option<SceneBuild>,
    rebuild_requested: bool,
    built: bool,
    material_version: u64,
}

impl RenderScene {
    pub fn new(common: CommonColors, merge_type: Option<MeshMergeType>, chunk_size: usize) -> Self {
        Self {
            merge_type,
            chunk_size,
            palette: OverridePalette::new(common),
            materials: MaterialCache::default(),
            vertex_material: Material::VertexColorRmo,
            draw_meshes: Vec::new(),
            draw_mesh_by_handle: HashMap::new(),
            groups: Vec::new(),
            group_by_handle: HashMap::new(),
            groups_need_sort: HashSet::new(),
            build: None,
            rebuild_requested: false,
            built: false,
            material_version: 0,
        }
    }

    pub fn merge_type(&self) -> Option<MeshMergeType> {
        self.merge_type
    }

    /// Takes effect with the next rebuild.
    pub fn set_layout(&mut self, merge_type: Option<MeshMergeType>, chunk_size: usize) {
        self.merge_type = merge_type;
        self.chunk_size = chunk_size;
    }

    pub fn palette(&self) -> &OverridePalette {
        &self.palette
    }

    pub fn update_common_colors(&mut self, common: CommonColors) {
        self.palette.update_common_colors(common);
    }

    /// Schedules a full rebuild. A build already running finishes first.
    pub fn request_rebuild(&mut self) {
        self.rebuild_requested = true;
    }

    pub fn is_building(&self) -> bool {
        self.build.is_some() || self.rebuild_requested
    }

    /// Whether at least one build has completed.
    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Advances the scene build by one slice. Returns true when a build
    /// completed during this call; the new batches replace the old ones and
    /// every mesh is recolored.
    pub fn tick<S: MeshStore + ?Sized>(&mut self, slicer: &TimeSlicer, store: &mut S) -> bool {
        if self.build.is_none() && self.rebuild_requested {
            self.rebuild_requested = false;
            let materials = std::mem::take(&mut self.materials);
            self.build = Some(SceneBuild::new(self.merge_type, self.chunk_size, &*store, materials));
        }
        let Some(build) = self.build.as_mut() else {
            return false;
        };
        if slicer.run_slice(build, &*store) == SliceOutcome::Yielded {
            return false;
        }
        if let Some(build) = self.build.take() {
            self.install(build, store);
        }
        true
    }

    /// Runs any requested rebuild to completion.
    pub fn rebuild_now<S: MeshStore + ?Sized>(&mut self, store: &mut S) {
        self.request_rebuild();
        while !self.tick(&TimeSlicer::new(std::time::Duration::MAX), store) {}
    }

    fn install<S: MeshStore + ?Sized>(&mut self, build: SceneBuild, store: &mut S) {
        self.clear();
        self.materials = build.materials;
        match build.plan {
            BuildPlan::Unmerged { draw_meshes, .. } => {
                for draw_mesh in draw_meshes {
                    if store.mesh(draw_mesh.handle).is_none() {
                        continue;
                    }
                    self.draw_mesh_by_handle
                        .insert(draw_mesh.handle, self.draw_meshes.len());
                    self.draw_meshes.push(draw_mesh);
                }
            }
            BuildPlan::Merged { done, .. } => {
                for (mut geometry, _) in done {
                    let gone: Vec<MeshHandle> = geometry
                        .slices
                        .iter()
                        .map(|s| s.handle)
                        .filter(|h| store.mesh(*h).is_none())
                        .collect();
                    for handle in gone {
                        geometry.remove(handle);
                    }
                    let slot = self.groups.len();
                    for slice in &geometry.slices {
                        self.group_by_handle.insert(slice.handle, slot);
                    }
                    self.groups.push(geometry);
                    self.groups_need_sort.insert(slot);
                }
            }
        }
        self.merge_type = build.merge_type;
        self.built = true;
        log::info!(
            "Render scene built: {} draw meshes, {} merged batches",
            self.draw_meshes.len(),
            self.groups.len()
        );

        let all = store.mesh_handles().to_vec();
        self.update_mesh_colors(all, store);
    }

    fn clear(&mut self) {
        self.draw_meshes.clear();
        self.draw_mesh_by_handle.clear();
        self.groups.clear();
        self.group_by_handle.clear();
        self.groups_need_sort.clear();
    }

    /// Refreshes the override colors of `handles` and writes the results
    /// into the draw data, then re-sorts batches whose opacity mix changed.
    pub fn update_mesh_colors<S, I>(&mut self, handles: I, store: &mut S)
    where
        S: MeshStore + ?Sized,
        I: IntoIterator<Item = MeshHandle>,
    {
        let mut touched = HashSet::new();
        for handle in handles {
            let Some(mesh) = store.mesh_mut(handle) else {
                continue;
            };
            if let Some(&slot) = self.draw_mesh_by_handle.get(&handle) {
                let result = self.palette.refresh(mesh, None);
                self.draw_meshes[slot].material = self.materials.get(&result.color);
            } else if let Some(&group_slot) = self.group_by_handle.get(&handle) {
                let geometry = &mut self.groups[group_slot];
                let Some(&slot) = geometry.slice_by_handle.get(&handle) else {
                    continue;
                };
                let initial = geometry.stored_opacity(&geometry.slices[slot]);
                let result = self.palette.refresh(mesh, Some(initial));
                geometry.write_color(slot, &result.color);
                touched.insert(group_slot);
                if result.opacity_changed {
                    self.groups_need_sort.insert(group_slot);
                }
            } else {
                self.palette.refresh(mesh, None);
            }
        }
        for slot in touched {
            let geometry = &mut self.groups[slot];
            geometry.color.mark_needs_update();
            geometry.rmo.mark_needs_update();
        }
        self.sort_by_opacity();
    }

    fn sort_by_opacity(&mut self) {
        for slot in self.groups_need_sort.drain() {
            if let Some(geometry) = self.groups.get_mut(slot) {
                geometry.sort_by_opacity();
            }
        }
    }

    /// Drops every reference to an unloaded mesh.
    pub fn mesh_unloaded(&mut self, handle: MeshHandle) {
        if let Some(slot) = self.draw_mesh_by_handle.remove(&handle) {
            self.draw_meshes.remove(slot);
            for (i, draw_mesh) in self.draw_meshes.iter().enumerate().skip(slot) {
                self.draw_mesh_by_handle.insert(draw_mesh.handle, i);
            }
        }
        if let Some(slot) = self.group_by_handle.remove(&handle) {
            if let Some(geometry) = self.groups.get_mut(slot) {
                geometry.remove(handle);
                self.groups_need_sort.insert(slot);
            }
            self.sort_by_opacity();
        }
    }

    /// Marks all materials and per-vertex attributes for re-upload after a
    /// lighting or color option change.
    pub fn update_scene_materials(&mut self) {
        self.material_version += 1;
        for geometry in &mut self.groups {
            geometry.color.mark_needs_update();
            geometry.rmo.mark_needs_update();
        }
    }

    pub fn material_version(&self) -> u64 {
        self.material_version
    }

    /// Consumes pending buffer updates. Returns the number of uploads.
    pub fn upload(&mut self) -> usize {
        self.groups.iter_mut().map(RenderGeometry::sync).sum()
    }

    pub fn draw_meshes(&self) -> &[DrawMesh] {
        &self.draw_meshes
    }

    pub fn draw_mesh(&self, handle: MeshHandle) -> Option<&DrawMesh> {
        self.draw_mesh_by_handle
            .get(&handle)
            .map(|&i| &self.draw_meshes[i])
    }

    pub fn groups(&self) -> &[RenderGeometry] {
        &self.groups
    }

    pub fn group_of(&self, handle: MeshHandle) -> Option<&RenderGeometry> {
        self.group_by_handle
            .get(&handle)
            .and_then(|&i| self.groups.get(i))
    }

    pub fn material_cache(&self) -> &MaterialCache {
        &self.materials
    }

    pub fn is_empty(&self) -> bool {
        self.draw_meshes.is_empty() && self.groups.is_empty()
    }

    pub fn draw_calls(&self) -> Vec<DrawCall<'_>> {
        let mut calls: Vec<DrawCall<'_>> = self
            .draw_meshes
            .iter()
            .map(|m| DrawCall::new(m.geometry.positions(), m.geometry.indices(), m.world, &m.material))
            .collect();
        calls.extend(self.groups.iter().map(|g| DrawCall {
            positions: g.position.array(),
            indices: g.active_indices(),
            transform: Mat4::IDENTITY,
            material: &self.vertex_material,
            vertex_colors: Some(VertexColors {
                color: g.color.array(),
                rmo: g.rmo.array(),
            }),
        }));
        calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::test_support::{cube_row, MeshList};

    fn store_with(models: &[(&str, usize)]) -> MeshList {
        let mut store = MeshList::default();
        let mut next = 1;
        for (guid, count) in models {
            for mesh in cube_row(guid, next, *count) {
                store.push(mesh);
            }
            next += *count as u64;
        }
        store
    }

    fn built(merge: Option<MeshMergeType>, store: &mut MeshList) -> RenderScene {
        let mut scene = RenderScene::new(CommonColors::default(), merge, 1000);
        scene.rebuild_now(store);
        scene
    }

    fn paint(store: &mut MeshList, handle: u64, opacity: f32) {
        let mesh = store.mesh_mut(MeshHandle(handle)).unwrap();
        mesh.colors
            .set_paint(ColorRgbRmo::from_hex(0x00FF00, 1.0, 0.0, opacity));
    }

    fn assert_opaque_first(geometry: &RenderGeometry) {
        let transparent_vertex = |index: u32| {
            geometry
                .slices()
                .iter()
                .find(|s| (s.first_vertex..s.first_vertex + s.vertex_count).contains(&(index as usize)))
                .map(|s| !s.opaque)
                .unwrap()
        };
        let flags: Vec<bool> = geometry
            .active_indices()
            .iter()
            .map(|i| transparent_vertex(*i))
            .collect();
        let first_transparent = flags.iter().position(|t| *t).unwrap_or(flags.len());
        assert!(flags[first_transparent..].iter().all(|t| *t));
    }

    #[test]
    fn unmerged_meshes_share_materials_by_color() {
        let mut store = store_with(&[("g1", 4)]);
        let mut scene = built(None, &mut store);
        assert_eq!(scene.draw_meshes().len(), 4);
        assert_eq!(scene.material_cache().len(), 1);

        paint(&mut store, 2, 0.5);
        paint(&mut store, 3, 0.5);
        scene.update_mesh_colors([MeshHandle(2), MeshHandle(3)], &mut store);
        assert_eq!(scene.material_cache().len(), 2);
        let a = &scene.draw_mesh(MeshHandle(2)).unwrap().material;
        let b = &scene.draw_mesh(MeshHandle(3)).unwrap().material;
        assert!(Arc::ptr_eq(a, b));
    }

    #[test]
    fn merged_scene_is_one_batch_with_baked_positions() {
        let mut store = store_with(&[("g1", 3), ("g2", 2)]);
        let scene = built(Some(MeshMergeType::Scene), &mut store);
        assert_eq!(scene.groups().len(), 1);
        let geometry = &scene.groups()[0];
        assert_eq!(geometry.positions().count(), 5 * 8);
        assert_eq!(geometry.active_indices().len(), 5 * 36);
        // Third cube sits at x = 20.
        let slice = geometry.slice(MeshHandle(3)).unwrap();
        let first = geometry.positions().item(slice.first_vertex)[0];
        assert!((first.x - 19.5).abs() < 1e-5);
        assert_eq!(slice.indices[0], slice.first_vertex as u32);
    }

    #[test]
    fn model_grouping_keeps_model_order() {
        let mut store = store_with(&[("g1", 3), ("g2", 2)]);
        let scene = built(Some(MeshMergeType::Model), &mut store);
        assert_eq!(scene.groups().len(), 2);
        assert_eq!(scene.groups()[0].slices().len(), 3);
        assert_eq!(scene.groups()[1].slices().len(), 2);
    }

    #[test]
    fn model_plus_splits_at_chunk_size() {
        let store = store_with(&[("big", 2500), ("small", 3)]);
        let groups = group_meshes(MeshMergeType::ModelPlus, 1000, store.mesh_handles(), &store);
        let sizes: Vec<usize> = groups.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![1000, 1000, 500, 3]);
    }

    #[test]
    fn recolor_rewrites_bytes_in_place() {
        let mut store = store_with(&[("g1", 3)]);
        let mut scene = built(Some(MeshMergeType::Scene), &mut store);
        scene.upload();
        let color_ptr = scene.groups()[0].colors().storage_ptr();
        let version = scene.groups()[0].colors().version();

        paint(&mut store, 2, 1.0);
        scene.update_mesh_colors([MeshHandle(2)], &mut store);
        let geometry = &scene.groups()[0];
        assert_eq!(geometry.colors().storage_ptr(), color_ptr);
        assert!(geometry.colors().version() > version);
        assert!(geometry.colors().needs_update());
        let slice = geometry.slice(MeshHandle(2)).unwrap();
        for v in slice.first_vertex..slice.first_vertex + slice.vertex_count {
            assert_eq!(geometry.colors().item(v), &[0, 255, 0]);
        }
        assert_eq!(scene.upload(), 2);
    }

    #[test]
    fn transparent_meshes_are_drawn_last() {
        let mut store = store_with(&[("g1", 4)]);
        let mut scene = built(Some(MeshMergeType::Scene), &mut store);
        paint(&mut store, 1, 0.5);
        paint(&mut store, 3, 0.25);
        scene.update_mesh_colors([MeshHandle(1), MeshHandle(3)], &mut store);
        let geometry = &scene.groups()[0];
        assert_opaque_first(geometry);
        let first = geometry.active_indices()[0];
        assert_eq!(first, geometry.slice(MeshHandle(2)).unwrap().indices[0]);
    }

    #[test]
    fn selection_and_isolation_drive_override_bytes() {
        let mut store = store_with(&[("g1", 2)]);
        let mut scene = built(Some(MeshMergeType::Scene), &mut store);
        store.mesh_mut(MeshHandle(1)).unwrap().flags.selected = true;
        store.mesh_mut(MeshHandle(2)).unwrap().flags.isolated = true;
        scene.update_mesh_colors([MeshHandle(1), MeshHandle(2)], &mut store);
        let geometry = &scene.groups()[0];
        let selected = geometry.slice(MeshHandle(1)).unwrap();
        assert_eq!(geometry.colors().item(selected.first_vertex), &[255, 0, 0]);
        let isolated = geometry.slice(MeshHandle(2)).unwrap();
        assert_eq!(geometry.rmos().item(isolated.first_vertex)[2], 51);
        assert_opaque_first(geometry);
    }

    #[test]
    fn unloaded_meshes_leave_the_batch() {
        let mut store = store_with(&[("g1", 3)]);
        let mut scene = built(Some(MeshMergeType::Scene), &mut store);
        store.remove(MeshHandle(2));
        scene.mesh_unloaded(MeshHandle(2));
        let geometry = &scene.groups()[0];
        assert!(!geometry.contains(MeshHandle(2)));
        assert_eq!(geometry.active_indices().len(), 2 * 36);
        // Recoloring a removed mesh is a no-op.
        scene.update_mesh_colors([MeshHandle(2)], &mut store);
    }

    #[test]
    fn build_yields_and_resumes() {
        let mut store = store_with(&[("g1", 5)]);
        let mut scene = RenderScene::new(CommonColors::default(), Some(MeshMergeType::Scene), 1000);
        scene.request_rebuild();
        let slicer = TimeSlicer::new(std::time::Duration::ZERO);
        let mut ticks = 1;
        while !scene.tick(&slicer, &mut store) {
            ticks += 1;
        }
        assert!(ticks > 1);
        assert!(scene.is_built());
        assert_eq!(scene.groups()[0].slices().len(), 5);
    }

    #[test]
    fn empty_group_is_skipped() {
        let mut store = MeshList::default();
        store.push(crate::scene::test_support::mesh(
            1,
            "g1",
            "empty",
            Geometry::new(Vec::new(), None, None),
            Mat4::IDENTITY,
        ));
        let scene = built(Some(MeshMergeType::Model), &mut store);
        assert!(scene.groups().is_empty());
    }
}
