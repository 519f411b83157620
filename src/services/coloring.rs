use super::{SelectionService, ServiceContext};
use crate::events::{EventBus, ViewerEvent};
use crate::scene::{ColorRgbRmo, MeshHandle};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// One paint entry: every mesh with one of `ids` gets `color` at `opacity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColoringInfo {
    /// `0xRRGGBB`.
    pub color: u32,
    pub opacity: f32,
    pub ids: Vec<String>,
}

impl ColoringInfo {
    pub fn new(color: u32, opacity: f32, ids: Vec<String>) -> Self {
        Self { color, opacity, ids }
    }
}

/// Custom paint plus the hidden-id set, which is applied as one more
/// fully transparent coloring.
pub struct ColoringService {
    hidden_ids: BTreeSet<String>,
    queued: Option<Vec<ColoringInfo>>,
    active: Vec<ColoringInfo>,
    colored: Vec<MeshHandle>,
    events: EventBus,
}

impl ColoringService {
    pub fn new(events: EventBus) -> Self {
        Self {
            hidden_ids: BTreeSet::new(),
            queued: None,
            active: Vec::new(),
            colored: Vec::new(),
            events,
        }
    }

    pub fn hidden_ids(&self) -> &BTreeSet<String> {
        &self.hidden_ids
    }

    pub fn active_colorings(&self) -> &[ColoringInfo] {
        &self.active
    }

    pub fn colored_meshes(&self) -> &[MeshHandle] {
        &self.colored
    }

    pub fn has_queued_coloring(&self) -> bool {
        self.queued.is_some()
    }

    pub fn color(&mut self, ctx: &mut ServiceContext<'_>, selection: &mut SelectionService, infos: Vec<ColoringInfo>) {
        if ctx.loader.loading_in_progress() {
            self.queued = Some(infos);
            return;
        }
        self.reset_selection_and_apply(ctx, selection, infos);
    }

    /// Applies the coloring deferred during the last load drain, once.
    pub fn run_queued_coloring(&mut self, ctx: &mut ServiceContext<'_>, selection: &mut SelectionService) {
        if let Some(infos) = self.queued.take() {
            self.reset_selection_and_apply(ctx, selection, infos);
        }
    }

    pub fn hide_selected(&mut self, ctx: &mut ServiceContext<'_>, selection: &mut SelectionService) {
        let mut hidden = self.hidden_ids.clone();
        hidden.extend(selection.selected_ids().iter().cloned());
        self.set_hidden_ids(hidden);
        let active = std::mem::take(&mut self.active);
        self.reset_selection_and_apply(ctx, selection, active);
    }

    pub fn unhide_all(&mut self, ctx: &mut ServiceContext<'_>, selection: &mut SelectionService) {
        self.set_hidden_ids(BTreeSet::new());
        let active = std::mem::take(&mut self.active);
        self.reset_selection_and_apply(ctx, selection, active);
    }

    pub fn mesh_unloaded(&mut self, handle: MeshHandle) {
        self.colored.retain(|h| *h != handle);
    }

    fn set_hidden_ids(&mut self, ids: BTreeSet<String>) {
        self.hidden_ids = ids;
        self.events
            .emit(ViewerEvent::HiddenChanged(self.hidden_ids.clone()));
    }

    fn reset_selection_and_apply(&mut self, ctx: &mut ServiceContext<'_>, selection: &mut SelectionService, infos: Vec<ColoringInfo>) {
        selection.deselect_all(ctx);
        self.clear_meshes_coloring(ctx);
        self.color_meshes(ctx, infos);
    }

    fn clear_meshes_coloring(&mut self, ctx: &mut ServiceContext<'_>) {
        for handle in self.colored.drain(..) {
            if let Some(mesh) = ctx.loader.mesh_mut(handle) {
                mesh.flags.colored = false;
                mesh.colors.clear_paint();
                ctx.render.enqueue_mesh_for_color_update(handle);
            }
        }
        self.active.clear();
    }

    fn color_meshes(&mut self, ctx: &mut ServiceContext<'_>, infos: Vec<ColoringInfo>) {
        let hidden = ColoringInfo::new(0, 0.0, self.hidden_ids.iter().cloned().collect());
        let mut colored = HashSet::new();
        for info in infos.iter().chain(std::iter::once(&hidden)) {
            let paint = ColorRgbRmo::from_hex(info.color, 1.0, 0.0, info.opacity);
            for id in &info.ids {
                for handle in ctx.loader.meshes_by_id(id).to_vec() {
                    let Some(mesh) = ctx.loader.mesh_mut(handle) else {
                        continue;
                    };
                    mesh.flags.colored = true;
                    mesh.colors.set_paint(paint);
                    ctx.render.enqueue_mesh_for_color_update(handle);
                    if colored.insert(handle) {
                        self.colored.push(handle);
                    }
                }
            }
        }
        log::debug!(
            "Applied {} colorings to {} meshes ({} hidden ids)",
            infos.len(),
            self.colored.len(),
            self.hidden_ids.len()
        );
        self.active = infos;
        ctx.render.request_render(None, false);
    }
}
