use super::ServiceContext;
use crate::events::{EventBus, ViewerEvent};
use crate::render::Focus;
use crate::scene::MeshHandle;
use glam::Vec2;
use std::collections::{BTreeSet, HashSet};

/// How an area selection combines with the current selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AreaSelectMode {
    /// Found meshes are added.
    Keep,
    /// Found meshes are removed.
    Subtract,
    /// Found meshes become the selection.
    Replace,
}

/// Selection requested while the load queue was busy.
#[derive(Debug, Clone, PartialEq)]
struct QueuedSelection {
    ids: Vec<String>,
    isolate: bool,
}

pub struct SelectionService {
    selected: Vec<MeshHandle>,
    isolated: Vec<MeshHandle>,
    selected_ids: BTreeSet<String>,
    queued: Option<QueuedSelection>,
    focus_on_programmatic: bool,
    events: EventBus,
}

impl SelectionService {
    pub fn new(events: EventBus) -> Self {
        Self {
            selected: Vec::new(),
            isolated: Vec::new(),
            selected_ids: BTreeSet::new(),
            queued: None,
            focus_on_programmatic: true,
            events,
        }
    }

    /// Programmatic selections refocus the camera on the selected meshes.
    pub fn set_focus_on_programmatic_selection(&mut self, value: bool) {
        self.focus_on_programmatic = value;
    }

    pub fn selected_ids(&self) -> &BTreeSet<String> {
        &self.selected_ids
    }

    pub fn selected_meshes(&self) -> &[MeshHandle] {
        &self.selected
    }

    pub fn isolated_meshes(&self) -> &[MeshHandle] {
        &self.isolated
    }

    pub fn has_queued_selection(&self) -> bool {
        self.queued.is_some()
    }

    pub fn select(&mut self, ctx: &mut ServiceContext<'_>, ids: &[String]) {
        if ctx.loader.loading_in_progress() {
            self.queued = Some(QueuedSelection {
                ids: ids.to_vec(),
                isolate: false,
            });
            return;
        }
        self.find_and_select(ctx, ids, false);
    }

    /// Selects `ids` and isolates everything else. An empty list is ignored.
    pub fn isolate(&mut self, ctx: &mut ServiceContext<'_>, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        if ctx.loader.loading_in_progress() {
            self.queued = Some(QueuedSelection {
                ids: ids.to_vec(),
                isolate: true,
            });
            return;
        }
        self.find_and_select(ctx, ids, true);
    }

    /// Clears selection and isolation right away, also while loading.
    pub fn deselect_all(&mut self, ctx: &mut ServiceContext<'_>) {
        self.apply_selection(ctx, Vec::new(), false, false);
    }

    /// Applies the request deferred during the last load drain, once.
    pub fn run_queued_selection(&mut self, ctx: &mut ServiceContext<'_>) {
        if let Some(QueuedSelection { ids, isolate }) = self.queued.take() {
            self.find_and_select(ctx, &ids, isolate);
        }
    }

    /// Marks every loaded mesh outside the selection as isolated.
    pub fn isolate_selected(&mut self, ctx: &mut ServiceContext<'_>) {
        if self.selected.is_empty() {
            return;
        }
        let handles = ctx.loader.mesh_handles().to_vec();
        for handle in handles {
            let Some(mesh) = ctx.loader.mesh_mut(handle) else {
                continue;
            };
            if mesh.flags.selected {
                continue;
            }
            mesh.flags.isolated = true;
            ctx.render.enqueue_mesh_for_color_update(handle);
            self.isolated.push(handle);
        }
        let focus = self
            .focus_on_programmatic
            .then(|| Focus::Meshes(self.selected.clone()));
        ctx.render.request_render(focus, false);
    }

    /// Click selection. With `keep`, the picked mesh is toggled in the
    /// current selection; otherwise it replaces it. A miss clears it.
    pub fn select_mesh_at_point(&mut self, ctx: &mut ServiceContext<'_>, keep: bool, client: Vec2) {
        let Some(picked) = ctx.mesh_at(client) else {
            self.apply_selection(ctx, Vec::new(), true, false);
            return;
        };
        let meshes = if !keep {
            vec![picked]
        } else if ctx.loader.mesh(picked).is_some_and(|m| m.flags.selected) {
            self.selected.iter().copied().filter(|h| *h != picked).collect()
        } else {
            std::iter::once(picked)
                .chain(self.selected.iter().copied())
                .collect()
        };
        self.apply_selection(ctx, meshes, true, false);
    }

    pub fn select_meshes_in_area(&mut self, ctx: &mut ServiceContext<'_>, mode: AreaSelectMode, start: Vec2, end: Vec2) {
        let found = ctx.meshes_in_area(start, end);
        let meshes: Vec<MeshHandle> = match mode {
            AreaSelectMode::Keep => found
                .iter()
                .chain(self.selected.iter())
                .copied()
                .collect(),
            AreaSelectMode::Subtract => {
                let found_ids: HashSet<&str> = found
                    .iter()
                    .filter_map(|h| ctx.loader.mesh(*h))
                    .map(|m| m.id.as_str())
                    .collect();
                self.selected
                    .iter()
                    .copied()
                    .filter(|h| {
                        ctx.loader
                            .mesh(*h)
                            .map_or(true, |m| !found_ids.contains(m.id.as_str()))
                    })
                    .collect()
            }
            AreaSelectMode::Replace => found,
        };
        self.apply_selection(ctx, meshes, true, false);
    }

    fn find_and_select(&mut self, ctx: &mut ServiceContext<'_>, ids: &[String], isolate: bool) {
        let meshes = if ids.is_empty() {
            Vec::new()
        } else {
            ctx.loader
                .find_meshes_by_ids(ids.iter().map(String::as_str))
                .found
        };
        self.apply_selection(ctx, meshes, false, isolate);
    }

    fn clear_selection(&mut self, ctx: &mut ServiceContext<'_>) {
        for handle in self.selected.drain(..) {
            if let Some(mesh) = ctx.loader.mesh_mut(handle) {
                mesh.flags.selected = false;
                ctx.render.enqueue_mesh_for_color_update(handle);
            }
        }
    }

    fn clear_isolation(&mut self, ctx: &mut ServiceContext<'_>) {
        for handle in self.isolated.drain(..) {
            if let Some(mesh) = ctx.loader.mesh_mut(handle) {
                mesh.flags.isolated = false;
                ctx.render.enqueue_mesh_for_color_update(handle);
            }
        }
    }

    fn apply_selection(&mut self, ctx: &mut ServiceContext<'_>, meshes: Vec<MeshHandle>, manual: bool, isolate: bool) {
        self.clear_selection(ctx);
        self.clear_isolation(ctx);

        let mut seen = HashSet::new();
        for handle in meshes {
            if !seen.insert(handle) {
                continue;
            }
            let Some(mesh) = ctx.loader.mesh_mut(handle) else {
                continue;
            };
            mesh.flags.selected = true;
            ctx.render.enqueue_mesh_for_color_update(handle);
            self.selected.push(handle);
        }

        if isolate && !self.selected.is_empty() {
            self.emit_selection_changed(ctx, manual, false);
            self.isolate_selected(ctx);
        } else {
            self.emit_selection_changed(ctx, manual, true);
        }
    }

    fn emit_selection_changed(&mut self, ctx: &mut ServiceContext<'_>, manual: bool, render: bool) {
        if render {
            let focus = (!manual && self.focus_on_programmatic && !self.selected.is_empty())
                .then(|| Focus::Meshes(self.selected.clone()));
            ctx.render.request_render(focus, false);
        }
        self.selected_ids = self
            .selected
            .iter()
            .filter_map(|h| ctx.loader.mesh(*h))
            .map(|m| m.id.clone())
            .collect();
        log::debug!(
            "Selection changed: {} meshes ({})",
            self.selected.len(),
            if manual { "manual" } else { "programmatic" }
        );
        self.events.emit(ViewerEvent::SelectionChanged {
            ids: self.selected_ids.clone(),
            manual,
        });
    }

    /// Forgets an unloaded mesh. Call [`Self::model_unloaded`] once the
    /// whole model is gone.
    pub fn mesh_unloaded(&mut self, handle: MeshHandle) {
        self.selected.retain(|h| *h != handle);
        self.isolated.retain(|h| *h != handle);
    }

    /// Republishes the selected ids if the unload changed them.
    pub fn model_unloaded(&mut self, guid: &str) {
        let prefix = format!("{}|", guid);
        let before = self.selected_ids.len();
        self.selected_ids.retain(|id| !id.starts_with(&prefix));
        if self.selected_ids.len() != before {
            self.events.emit(ViewerEvent::SelectionChanged {
                ids: self.selected_ids.clone(),
                manual: false,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::ModelOpenInfo;
    use crate::services::test_support::{Fixture, PickingObserver};

    fn center(fx: &Fixture, index: usize) -> Vec2 {
        let handle = fx.loader.mesh_handles()[index];
        let mesh = fx.loader.mesh(handle).unwrap();
        fx.render.world_to_canvas(mesh.world_sphere_center())
    }

    fn selection_events(fx: &Fixture) -> Vec<(BTreeSet<String>, bool)> {
        fx.drain()
            .into_iter()
            .filter_map(|e| match e {
                ViewerEvent::SelectionChanged { ids, manual } => Some((ids, manual)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn programmatic_select_flags_meshes_and_focuses() {
        let mut fx = Fixture::new(3);
        let mut selection = SelectionService::new(fx.events.clone());
        let id = fx.mesh_id(2);
        fx.drain();

        selection.select(&mut fx.ctx(), &[id.clone(), "m1|missing".to_string()]);
        assert_eq!(selection.selected_meshes().len(), 1);
        let handle = selection.selected_meshes()[0];
        assert!(fx.loader.mesh(handle).unwrap().flags.selected);
        assert_eq!(
            selection_events(&fx),
            vec![(BTreeSet::from([id]), false)]
        );

        fx.render.render_now(&mut fx.loader);
        assert!((fx.render.controller().target() - glam::Vec3::new(20.0, 0.0, 0.0)).length() < 1e-4);
    }

    #[test]
    fn isolate_marks_every_other_mesh() {
        let mut fx = Fixture::new(4);
        let mut selection = SelectionService::new(fx.events.clone());
        let ids = vec![fx.mesh_id(0), fx.mesh_id(1)];
        selection.isolate(&mut fx.ctx(), &ids);
        assert_eq!(selection.isolated_meshes().len(), 2);
        for (i, handle) in fx.loader.mesh_handles().iter().enumerate() {
            let flags = fx.loader.mesh(*handle).unwrap().flags;
            assert_eq!(flags.selected, i < 2);
            assert_eq!(flags.isolated, i >= 2);
        }

        selection.select(&mut fx.ctx(), &[]);
        assert!(selection.isolated_meshes().is_empty());
        assert!(fx.loader.meshes().all(|m| !m.flags.isolated && !m.flags.selected));
    }

    #[test]
    fn empty_isolate_is_ignored() {
        let mut fx = Fixture::new(2);
        let mut selection = SelectionService::new(fx.events.clone());
        let ids = vec![fx.mesh_id(0)];
        selection.select(&mut fx.ctx(), &ids);
        fx.drain();
        selection.isolate(&mut fx.ctx(), &[]);
        assert_eq!(selection.selected_meshes().len(), 1);
        assert!(selection_events(&fx).is_empty());
    }

    #[test]
    fn requests_during_loading_apply_once_with_latest_arguments() {
        let mut fx = Fixture::new(3);
        let mut selection = SelectionService::new(fx.events.clone());
        fx.loader.open(&[ModelOpenInfo::new("m2.mem", "m2", "m2")]);
        assert!(fx.loader.loading_in_progress());

        let first = vec![fx.mesh_id(0)];
        selection.select(&mut fx.ctx(), &first);
        selection.isolate(&mut fx.ctx(), &["m2|mesh1".to_string()]);
        assert!(selection.selected_meshes().is_empty());
        assert!(selection.has_queued_selection());

        fx.loader.run_to_idle(&mut PickingObserver(&mut fx.picking));
        fx.drain();
        selection.run_queued_selection(&mut fx.ctx());
        selection.run_queued_selection(&mut fx.ctx());
        assert_eq!(
            selection_events(&fx),
            vec![(BTreeSet::from(["m2|mesh1".to_string()]), false)]
        );
        assert_eq!(selection.isolated_meshes().len(), 5);
        assert!(!selection.has_queued_selection());
    }

    #[test]
    fn click_replaces_and_modifier_toggles() {
        let mut fx = Fixture::new(3);
        let mut selection = SelectionService::new(fx.events.clone());
        let handles = fx.loader.mesh_handles().to_vec();
        let (p0, p1) = (center(&fx, 0), center(&fx, 1));

        selection.select_mesh_at_point(&mut fx.ctx(), false, p0);
        assert_eq!(selection.selected_meshes(), &[handles[0]]);
        selection.select_mesh_at_point(&mut fx.ctx(), true, p1);
        assert_eq!(selection.selected_meshes(), &[handles[1], handles[0]]);
        selection.select_mesh_at_point(&mut fx.ctx(), true, p0);
        assert_eq!(selection.selected_meshes(), &[handles[1]]);
        selection.select_mesh_at_point(&mut fx.ctx(), false, p1);
        assert_eq!(selection.selected_meshes(), &[handles[1]]);

        let events = selection_events(&fx);
        assert_eq!(events.len(), 4);
        assert!(events.iter().all(|(_, manual)| *manual));
    }

    #[test]
    fn click_on_background_clears_the_selection() {
        let mut fx = Fixture::new(3);
        let mut selection = SelectionService::new(fx.events.clone());
        let ids = vec![fx.mesh_id(0)];
        selection.select(&mut fx.ctx(), &ids);
        fx.drain();
        selection.select_mesh_at_point(&mut fx.ctx(), false, Vec2::new(1.0, 1.0));
        assert!(selection.selected_meshes().is_empty());
        assert_eq!(selection_events(&fx), vec![(BTreeSet::new(), true)]);
    }

    #[test]
    fn area_modes_combine_with_previous_selection() {
        let mut fx = Fixture::new(10);
        let mut selection = SelectionService::new(fx.events.clone());
        let margin = Vec2::splat(2.0);
        let (a, b) = (center(&fx, 2), center(&fx, 4));
        let (start, end) = (a.min(b) - margin, a.max(b) + margin);

        selection.select_meshes_in_area(&mut fx.ctx(), AreaSelectMode::Replace, start, end);
        let ids: Vec<String> = (2..=4).map(|i| fx.mesh_id(i)).collect();
        assert_eq!(selection.selected_ids(), &ids.iter().cloned().collect::<BTreeSet<_>>());

        let previous = vec![fx.mesh_id(0), fx.mesh_id(3)];
        selection.select(&mut fx.ctx(), &previous);
        selection.select_meshes_in_area(&mut fx.ctx(), AreaSelectMode::Keep, start, end);
        assert_eq!(selection.selected_ids().len(), 4);

        selection.select_meshes_in_area(&mut fx.ctx(), AreaSelectMode::Subtract, start, end);
        assert_eq!(selection.selected_ids(), &BTreeSet::from([fx.mesh_id(0)]));

        fx.drain();
        selection.select_meshes_in_area(&mut fx.ctx(), AreaSelectMode::Subtract, start, end);
        selection.select_meshes_in_area(&mut fx.ctx(), AreaSelectMode::Replace, Vec2::ZERO, Vec2::splat(1.0));
        assert!(selection.selected_meshes().is_empty());
        let events = selection_events(&fx);
        assert_eq!(events.last(), Some(&(BTreeSet::new(), true)));
    }

    #[test]
    fn unload_drops_meshes_and_republishes_ids() {
        let mut fx = Fixture::new(2);
        let mut selection = SelectionService::new(fx.events.clone());
        let ids = vec![fx.mesh_id(0), fx.mesh_id(1)];
        selection.select(&mut fx.ctx(), &ids);
        fx.drain();
        for handle in fx.loader.mesh_handles().to_vec() {
            selection.mesh_unloaded(handle);
        }
        selection.model_unloaded("m1");
        assert!(selection.selected_meshes().is_empty());
        assert_eq!(selection_events(&fx), vec![(BTreeSet::new(), false)]);
    }
}
