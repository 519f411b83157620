use super::ServiceContext;
use crate::scene::MeshHandle;
use glam::Vec2;
use std::collections::BTreeSet;

/// Hover highlight. Only the difference to the current set is recolored.
#[derive(Debug, Default)]
pub struct HighlightService {
    highlighted: BTreeSet<MeshHandle>,
}

impl HighlightService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn highlighted(&self) -> &BTreeSet<MeshHandle> {
        &self.highlighted
    }

    pub fn highlight_in_area(&mut self, ctx: &mut ServiceContext<'_>, start: Vec2, end: Vec2) {
        let found = ctx.meshes_in_area(start, end);
        self.highlight_meshes(ctx, found);
    }

    pub fn highlight_at_point(&mut self, ctx: &mut ServiceContext<'_>, client: Vec2) {
        let found = ctx.mesh_at(client);
        self.highlight_meshes(ctx, found);
    }

    pub fn clear_highlight(&mut self, ctx: &mut ServiceContext<'_>) {
        self.highlight_meshes(ctx, std::iter::empty());
    }

    pub fn highlight_meshes(&mut self, ctx: &mut ServiceContext<'_>, meshes: impl IntoIterator<Item = MeshHandle>) {
        let wanted: BTreeSet<MeshHandle> = meshes.into_iter().collect();
        let removed: Vec<MeshHandle> = self.highlighted.difference(&wanted).copied().collect();
        let added: Vec<MeshHandle> = wanted.difference(&self.highlighted).copied().collect();

        for handle in removed {
            set_highlighted(ctx, handle, false);
            self.highlighted.remove(&handle);
        }
        for handle in added {
            set_highlighted(ctx, handle, true);
            self.highlighted.insert(handle);
        }
        ctx.render.request_render(None, false);
    }

    pub fn mesh_unloaded(&mut self, handle: MeshHandle) {
        self.highlighted.remove(&handle);
    }
}

fn set_highlighted(ctx: &mut ServiceContext<'_>, handle: MeshHandle, value: bool) {
    if let Some(mesh) = ctx.loader.mesh_mut(handle) {
        mesh.flags.highlighted = value;
        ctx.render.enqueue_mesh_for_color_update(handle);
    }
}
