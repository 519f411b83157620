//! The viewer façade: owns the loader, renderer and services, translates
//! pointer gestures into service calls and drives everything from
//! [`Viewer::tick`].

pub mod input;
pub mod timing;

use crate::assets::{
    FormatLoader, LoaderObserver, ModelLoaderService, ModelOpenInfo, ModelOpenResult, OpenedModelInfo, Pending,
    PumpStatus,
};
use crate::events::{EventBus, ViewerEvent};
use crate::options::{ConfigError, ViewerOptions};
use crate::render::{
    Canvas, ClientRect, Focus, MarkerInfo, PickingScene, RenderError, RenderService, SnapPoint,
};
use crate::scene::SourceMesh;
use crate::services::{
    hud, AreaSelectMode, ColoringInfo, ColoringService, HighlightService, SelectionService, ServiceContext,
};
use glam::Vec2;
use input::{InputEvent, PointerInput, BUTTON_MIDDLE, BUTTON_PRIMARY, BUTTON_SECONDARY};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::rc::Rc;
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};
use timing::{Debounce, FrameTiming};

/// Wheel zoom per line.
const DOLLY_STEP: f32 = 0.9;

#[derive(Debug, thiserror::Error)]
pub enum ViewerError {
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, ViewerError>;

/// What a primary click or hover does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionMode {
    #[default]
    SelectMesh,
    SelectVertex,
    SelectSprite,
    MeasureDistance,
}

/// Camera drag started by the middle or secondary button, or by a touch.
#[derive(Debug, Clone, Copy)]
struct CameraDrag {
    button: u8,
    touch: bool,
    last: Vec2,
}

#[derive(Debug)]
struct Gesture {
    /// Where the primary button went down; `None` once released.
    down: Option<Vec2>,
    touch: bool,
    allow_area: bool,
    drag: Option<CameraDrag>,
    hover: Debounce,
    hover_point: Option<Vec2>,
    double_click: Debounce,
}

impl Gesture {
    fn new(options: &ViewerOptions) -> Self {
        Self {
            down: None,
            touch: false,
            allow_area: true,
            drag: None,
            hover: Debounce::from_millis(options.highlight_debounce_ms),
            hover_point: None,
            double_click: Debounce::from_millis(options.double_click_ms),
        }
    }

    fn set_timing(&mut self, options: &ViewerOptions) {
        self.hover
            .set_delay(Duration::from_millis(options.highlight_debounce_ms));
        self.double_click
            .set_delay(Duration::from_millis(options.double_click_ms));
    }
}

/// Routes loader lifecycle callbacks to picking, rendering and the services.
struct SceneObserver<'a> {
    picking: &'a mut PickingScene,
    render: &'a mut RenderService,
    highlight: &'a mut HighlightService,
    selection: &'a mut SelectionService,
    coloring: &'a mut ColoringService,
}

impl LoaderObserver for SceneObserver<'_> {
    fn mesh_loaded(&mut self, mesh: &SourceMesh) {
        self.picking.add(mesh);
    }

    fn mesh_unloaded(&mut self, mesh: &SourceMesh) {
        let handle = mesh.handle;
        self.picking.remove(handle);
        self.render.mesh_unloaded(handle);
        self.highlight.mesh_unloaded(handle);
        self.selection.mesh_unloaded(handle);
        self.coloring.mesh_unloaded(handle);
    }

    fn model_unloaded(&mut self, guid: &str) {
        self.selection.model_unloaded(guid);
    }
}

/// Disjoint borrows of the viewer for one service call.
struct Parts<'a> {
    ctx: ServiceContext<'a>,
    highlight: &'a mut HighlightService,
    selection: &'a mut SelectionService,
    coloring: &'a mut ColoringService,
}

pub struct Viewer {
    options: ViewerOptions,
    events: EventBus,
    loader: ModelLoaderService,
    render: RenderService,
    picking: PickingScene,
    highlight: HighlightService,
    selection: SelectionService,
    coloring: ColoringService,
    mode: InteractionMode,
    gesture: Gesture,
    timing: FrameTiming,
    context_lost: bool,
}

impl Viewer {
    pub fn new(options: ViewerOptions, rect: ClientRect, pixel_ratio: f32) -> Result<Self> {
        let canvas = Canvas::new(rect, pixel_ratio)?;
        let events = EventBus::new();
        let loader = ModelLoaderService::new(events.clone(), options.base_point.map(|b| b.to_y_up()));
        let render = RenderService::new(&options, canvas, events.clone());
        let mut selection = SelectionService::new(events.clone());
        selection.set_focus_on_programmatic_selection(options.selection_auto_focus_enabled);
        let (width, height) = canvas.buffer_size();
        log::info!("Viewer created with a {}x{} canvas", width, height);

        Ok(Self {
            gesture: Gesture::new(&options),
            options,
            loader,
            render,
            picking: PickingScene::new(),
            highlight: HighlightService::new(),
            selection,
            coloring: ColoringService::new(events.clone()),
            events,
            mode: InteractionMode::default(),
            timing: FrameTiming::new(),
            context_lost: false,
        })
    }

    fn parts(&mut self) -> Parts<'_> {
        Parts {
            ctx: ServiceContext::new(&mut self.loader, &mut self.render, &mut self.picking),
            highlight: &mut self.highlight,
            selection: &mut self.selection,
            coloring: &mut self.coloring,
        }
    }

    // ---- accessors ------------------------------------------------------

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> Receiver<ViewerEvent> {
        self.events.subscribe()
    }

    pub fn options(&self) -> &ViewerOptions {
        &self.options
    }

    pub fn loader(&self) -> &ModelLoaderService {
        &self.loader
    }

    pub fn render(&self) -> &RenderService {
        &self.render
    }

    pub fn highlight(&self) -> &HighlightService {
        &self.highlight
    }

    pub fn selection(&self) -> &SelectionService {
        &self.selection
    }

    pub fn coloring(&self) -> &ColoringService {
        &self.coloring
    }

    pub fn interaction_mode(&self) -> InteractionMode {
        self.mode
    }

    pub fn is_loading(&self) -> bool {
        self.loader.loading_in_progress()
    }

    pub fn is_context_lost(&self) -> bool {
        self.context_lost
    }

    pub fn frame_timing(&self) -> &FrameTiming {
        &self.timing
    }

    pub fn register_loader(&mut self, loader: Rc<dyn FormatLoader>) {
        self.loader.register_loader(loader);
    }

    // ---- models ---------------------------------------------------------

    pub fn open_models(&mut self, infos: &[ModelOpenInfo]) -> Vec<Pending<ModelOpenResult>> {
        self.loader.open(infos)
    }

    pub fn close_models(&mut self, guids: &[String]) -> Vec<Pending<String>> {
        self.loader.close(guids)
    }

    pub fn close_all_models(&mut self) -> Vec<Pending<String>> {
        self.loader.close_all()
    }

    pub fn get_opened_models(&self) -> &[OpenedModelInfo] {
        self.loader.opened_models()
    }

    // ---- selection and coloring -----------------------------------------

    pub fn color_items(&mut self, infos: Vec<ColoringInfo>) {
        let Parts {
            mut ctx,
            selection,
            coloring,
            ..
        } = self.parts();
        coloring.color(&mut ctx, selection, infos);
    }

    pub fn select_items(&mut self, ids: &[String]) {
        let Parts { mut ctx, selection, .. } = self.parts();
        selection.select(&mut ctx, ids);
    }

    pub fn isolate_items(&mut self, ids: &[String]) {
        let Parts { mut ctx, selection, .. } = self.parts();
        selection.isolate(&mut ctx, ids);
    }

    /// Frames the meshes with the given ids, or the whole scene if none of
    /// them is loaded.
    pub fn zoom_to_items(&mut self, ids: &[String]) {
        let found = self
            .loader
            .find_meshes_by_ids(ids.iter().map(String::as_str));
        if found.found.is_empty() {
            self.render.render_whole_scene(&self.loader);
        } else {
            self.render
                .request_render(Some(Focus::Meshes(found.found)), false);
        }
    }

    pub fn hide_selected_items(&mut self) {
        let Parts {
            mut ctx,
            selection,
            coloring,
            ..
        } = self.parts();
        coloring.hide_selected(&mut ctx, selection);
    }

    pub fn unhide_all_items(&mut self) {
        let Parts {
            mut ctx,
            selection,
            coloring,
            ..
        } = self.parts();
        coloring.unhide_all(&mut ctx, selection);
    }

    pub fn get_selected_items(&self) -> &BTreeSet<String> {
        self.selection.selected_ids()
    }

    // ---- HUD ------------------------------------------------------------

    pub fn set_markers(&mut self, markers: Vec<MarkerInfo>) {
        self.render.hud_mut().markers.set_markers(markers);
        self.render.request_render(None, false);
    }

    pub fn select_markers(&mut self, ids: &[String], manual: bool) {
        self.render.hud_mut().markers.set_selected(ids, manual);
        self.render.request_render(None, false);
    }

    /// Switching away from a HUD tool clears that tool's state.
    pub fn set_interaction_mode(&mut self, mode: InteractionMode) {
        if mode == self.mode {
            return;
        }
        let hud = self.render.hud_mut();
        match self.mode {
            InteractionMode::SelectMesh => {}
            InteractionMode::SelectVertex => hud.point_snap.reset(),
            InteractionMode::SelectSprite => {
                hud.markers.highlight_marker(None);
                hud.markers.reset_selected();
            }
            InteractionMode::MeasureDistance => {
                hud.point_snap.reset();
                hud.measurer.reset();
            }
        }
        log::debug!("Interaction mode {:?} -> {:?}", self.mode, mode);
        self.mode = mode;
        self.events.emit(ViewerEvent::ModeChanged(mode));
        self.render.request_render(None, false);
    }

    // ---- options and canvas ---------------------------------------------

    pub fn update_options(&mut self, options: ViewerOptions) {
        let old = std::mem::replace(&mut self.options, options);
        let new = &self.options;

        let axes_changed = new.axes_differ(&old);
        let lights_changed = new.lights_differ(&old) || new.background_color != old.background_color;
        let colors_changed = new.colors_differ(&old);
        let layout_changed = new.scene_layout_differs(&old);

        if axes_changed {
            self.render.axes_mut().update_options(
                new.axes_helper_enabled,
                new.axes_helper_placement,
                new.axes_helper_size,
            );
        }
        if lights_changed {
            self.render.set_lights(new);
        }
        if colors_changed {
            self.render
                .render_scene_mut()
                .update_common_colors(new.common_colors());
            // Override colors are resolved per mesh, so flagged meshes need
            // a fresh lookup.
            for &handle in self.loader.mesh_handles() {
                let flagged = self.loader.mesh(handle).is_some_and(|mesh| {
                    let flags = mesh.flags;
                    flags.highlighted || flags.selected || flags.isolated
                });
                if flagged {
                    self.render.enqueue_mesh_for_color_update(handle);
                }
            }
        }
        if lights_changed || colors_changed {
            self.render.update_scene_materials();
            self.render.request_render(None, false);
        }
        if layout_changed {
            self.render.set_layout(new);
            self.render.update_render_scene();
        } else if axes_changed {
            self.render.request_render(None, false);
        }

        self.render.set_timing(new);
        self.render.hud_mut().markers.set_sprite_size(new.sprite_size_px);
        self.gesture.set_timing(new);
        self.render
            .controller_mut()
            .set_enabled(!new.camera_controls_disabled);
        self.selection
            .set_focus_on_programmatic_selection(new.selection_auto_focus_enabled);
        if !new.highlighting_enabled {
            self.gesture.hover.cancel();
        }
    }

    pub fn resize(&mut self, rect: ClientRect, pixel_ratio: f32) -> Result<()> {
        let canvas = Canvas::new(rect, pixel_ratio)?;
        self.render.resize(canvas);
        Ok(())
    }

    /// Call after every camera movement: draws a fast frame when a stand-in
    /// scene is configured and reports the new camera position.
    pub fn camera_changed(&mut self, now: Instant) {
        self.render.render_on_camera_move(now);
        self.events.emit(ViewerEvent::CameraPositionChanged(
            self.render.controller().position().to_array(),
        ));
    }

    // ---- context --------------------------------------------------------

    /// The drawing surface is gone: every model is closed.
    pub fn notify_context_lost(&mut self) {
        if self.context_lost {
            return;
        }
        log::warn!("Rendering context lost, closing all models");
        self.context_lost = true;
        self.events.emit(ViewerEvent::ContextLossChanged(true));
        self.loader.close_all();
    }

    pub fn notify_context_restored(&mut self) {
        if !self.context_lost {
            return;
        }
        log::info!("Rendering context restored");
        self.context_lost = false;
        self.events.emit(ViewerEvent::ContextLossChanged(false));
        self.render.request_render(None, false);
    }

    // ---- input ----------------------------------------------------------

    pub fn handle_input(&mut self, event: InputEvent, now: Instant) {
        match event {
            InputEvent::PointerDown(pointer) => self.pointer_down(pointer),
            InputEvent::PointerMove(pointer) => self.pointer_move(pointer, now),
            InputEvent::PointerUp(pointer) => self.pointer_up(pointer, now),
            InputEvent::PointerLeave(pointer) => self.pointer_leave(pointer, now),
            InputEvent::Wheel { delta, .. } => self.wheel(delta, now),
        }
    }

    pub fn pointer_down(&mut self, pointer: PointerInput) {
        if !pointer.primary {
            return;
        }
        if pointer.button == BUTTON_MIDDLE || pointer.button == BUTTON_SECONDARY || pointer.is_touch() {
            self.gesture.drag = Some(CameraDrag {
                button: pointer.button,
                touch: pointer.is_touch(),
                last: pointer.client,
            });
        }
        if pointer.button != BUTTON_PRIMARY {
            return;
        }
        self.gesture.touch = pointer.is_touch();
        self.gesture.allow_area = !self.gesture.touch || self.options.camera_controls_disabled;
        self.gesture.down = Some(pointer.client);
    }

    pub fn pointer_move(&mut self, pointer: PointerInput, now: Instant) {
        if !pointer.primary {
            return;
        }
        if let Some(drag) = self.gesture.drag.as_mut() {
            let delta = pointer.client - drag.last;
            drag.last = pointer.client;
            let height = self.render.canvas().rect().height.max(1.0);
            let controller = self.render.controller_mut();
            let moved = if drag.button == BUTTON_SECONDARY {
                controller.pan(delta.x / height, delta.y / height)
            } else if drag.button == BUTTON_MIDDLE || (drag.touch && !self.gesture.allow_area) {
                let turn = std::f32::consts::TAU / height;
                controller.orbit(-delta.x * turn, delta.y * turn)
            } else {
                false
            };
            if moved {
                self.camera_changed(now);
            }
        }
        if self.options.highlighting_enabled {
            self.gesture.hover_point = Some(pointer.client);
            self.gesture.hover.arm(now);
        }
    }

    pub fn pointer_up(&mut self, pointer: PointerInput, now: Instant) {
        if !pointer.primary {
            return;
        }
        if self.gesture.drag.is_some_and(|drag| drag.button == pointer.button) {
            self.gesture.drag = None;
        }
        if pointer.button != BUTTON_PRIMARY {
            return;
        }
        self.gesture.hover.cancel();
        {
            let Parts { mut ctx, highlight, .. } = self.parts();
            highlight.clear_highlight(&mut ctx);
        }
        let Some(down) = self.gesture.down.take() else {
            return;
        };

        let travel = (pointer.client - down).abs();
        let threshold = self.options.drag_threshold_px;
        if travel.x > threshold || travel.y > threshold {
            if self.mode == InteractionMode::SelectMesh && self.gesture.allow_area {
                let mode = if pointer.ctrl || self.gesture.touch {
                    AreaSelectMode::Keep
                } else if pointer.alt {
                    AreaSelectMode::Subtract
                } else {
                    AreaSelectMode::Replace
                };
                let Parts { mut ctx, selection, .. } = self.parts();
                selection.select_meshes_in_area(&mut ctx, mode, down, pointer.client);
            }
            return;
        }

        if self.rotate_to_axis_at(pointer.client, now) {
            return;
        }

        let keep = pointer.ctrl || self.gesture.touch;
        match self.mode {
            InteractionMode::SelectMesh => {
                self.gesture.double_click.poll(now);
                if self.gesture.double_click.is_armed() {
                    self.gesture.double_click.cancel();
                    let Parts { mut ctx, selection, .. } = self.parts();
                    selection.isolate_selected(&mut ctx);
                } else {
                    self.gesture.double_click.arm(now);
                    let Parts { mut ctx, selection, .. } = self.parts();
                    selection.select_mesh_at_point(&mut ctx, keep, pointer.client);
                }
            }
            InteractionMode::SelectVertex => {
                hud::select_vertex_at_point(&mut self.parts().ctx, pointer.client);
            }
            InteractionMode::SelectSprite => {
                hud::select_sprite_at_point(&mut self.parts().ctx, pointer.client);
            }
            InteractionMode::MeasureDistance => {
                hud::measure_distance_at_point(&mut self.parts().ctx, pointer.client);
            }
        }
    }

    /// Leaving the canvas ends every gesture like a primary release.
    pub fn pointer_leave(&mut self, pointer: PointerInput, now: Instant) {
        self.gesture.drag = None;
        self.pointer_up(
            PointerInput {
                button: BUTTON_PRIMARY,
                ..pointer
            },
            now,
        );
    }

    fn wheel(&mut self, delta: f32, now: Instant) {
        if self.render.controller_mut().dolly(DOLLY_STEP.powf(delta)) {
            self.camera_changed(now);
        }
    }

    fn rotate_to_axis_at(&mut self, client: Vec2, now: Instant) -> bool {
        let point = self.render.client_to_canvas(client);
        let (width, height) = self.render.canvas().buffer_size();
        let view = self.render.camera().view_matrix();
        let Some(axis) = self.render.axes().axis_at(&view, width, height, point) else {
            return false;
        };
        log::debug!("Rotating camera to face {}", axis.as_str());
        self.render.controller_mut().rotate_to_face(axis);
        self.camera_changed(now);
        true
    }

    fn run_hover_action(&mut self, point: Vec2) {
        let area_start = self.gesture.down.filter(|_| self.gesture.allow_area);
        let mode = self.mode;
        let Parts { mut ctx, highlight, .. } = self.parts();
        match mode {
            InteractionMode::SelectMesh => match area_start {
                Some(start) => highlight.highlight_in_area(&mut ctx, start, point),
                None => highlight.highlight_at_point(&mut ctx, point),
            },
            InteractionMode::SelectVertex => {
                highlight.highlight_at_point(&mut ctx, point);
                hud::set_vertex_snap_at_point(&mut ctx, point);
            }
            InteractionMode::SelectSprite => hud::highlight_sprite_at_point(&mut ctx, point),
            InteractionMode::MeasureDistance => hud::set_vertex_snap_at_point(&mut ctx, point),
        }
    }

    // ---- queries --------------------------------------------------------

    /// Id of the mesh under a client point.
    pub fn pick_mesh_at(&mut self, client: Vec2) -> Option<String> {
        let handle = self.parts().ctx.mesh_at(client)?;
        self.loader.mesh(handle).map(|mesh| mesh.id.clone())
    }

    pub fn snap_point_at(&mut self, client: Vec2) -> Option<SnapPoint> {
        self.parts().ctx.snap_point_at(client)
    }

    // ---- frames ---------------------------------------------------------

    /// One cooperative step: runs one loader task, fires due timers and
    /// draws the pending frame. Returns whether a frame was drawn.
    pub fn tick(&mut self, now: Instant) -> bool {
        let mut observer = SceneObserver {
            picking: &mut self.picking,
            render: &mut self.render,
            highlight: &mut self.highlight,
            selection: &mut self.selection,
            coloring: &mut self.coloring,
        };
        if self.loader.pump(&mut observer) == PumpStatus::Drained {
            self.on_queue_loaded();
            self.loader.complete_drain();
        }

        if self.gesture.hover.poll(now) {
            if let Some(point) = self.gesture.hover_point {
                self.run_hover_action(point);
            }
        }

        let drawn = self.render.tick(now, &mut self.loader);
        if drawn {
            self.timing.set_render_ms(self.render.last_frame_ms());
            self.timing.update(now);
        }
        drawn
    }

    /// Deferred coloring first: it clears the selection that the deferred
    /// selection then sets.
    fn on_queue_loaded(&mut self) {
        let Parts {
            mut ctx,
            selection,
            coloring,
            ..
        } = self.parts();
        coloring.run_queued_coloring(&mut ctx, selection);
        selection.run_queued_selection(&mut ctx);
        ctx.render.update_render_scene();
    }

    /// Ticks until loading, scene builds and frame requests are done.
    pub fn settle(&mut self) {
        loop {
            self.tick(Instant::now());
            if !self.loader.loading_in_progress() && self.render.is_settled() {
                return;
            }
        }
    }

    pub fn render_now(&mut self) {
        self.render.render_now(&mut self.loader);
    }

    pub fn capture_png(&self, path: &Path) -> Result<()> {
        self.render.capture_png(path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::test_support::MemoryLoader;
    use glam::Vec3;

    struct Harness {
        viewer: Viewer,
        rx: Receiver<ViewerEvent>,
        start: Instant,
    }

    impl Harness {
        fn new(mesh_count: usize) -> Self {
            let options = ViewerOptions {
                axes_helper_enabled: false,
                ..ViewerOptions::default()
            };
            let mut viewer = Viewer::new(options, ClientRect::sized(200.0, 200.0), 1.0).unwrap();
            viewer.register_loader(Rc::new(MemoryLoader::new(mesh_count)));
            let rx = viewer.subscribe();
            viewer.open_models(&[ModelOpenInfo::new("m1.mem", "m1", "m1")]);
            viewer.settle();
            Self {
                viewer,
                rx,
                start: Instant::now(),
            }
        }

        fn at(&self, ms: u64) -> Instant {
            self.start + Duration::from_millis(ms)
        }

        fn drain(&self) -> Vec<ViewerEvent> {
            self.rx.try_iter().collect()
        }

        fn handle(&self, index: usize) -> crate::scene::MeshHandle {
            self.viewer.loader().mesh_handles()[index]
        }

        fn id(&self, index: usize) -> String {
            self.viewer.loader().mesh(self.handle(index)).unwrap().id.clone()
        }

        fn center(&self, index: usize) -> Vec2 {
            let mesh = self.viewer.loader().mesh(self.handle(index)).unwrap();
            self.viewer.render().world_to_canvas(mesh.world_sphere_center())
        }

        fn click(&mut self, point: Vec2, ms: u64) {
            let pointer = PointerInput::mouse(point.x, point.y);
            let now = self.at(ms);
            self.viewer.handle_input(InputEvent::PointerDown(pointer), now);
            self.viewer.handle_input(InputEvent::PointerUp(pointer), now);
        }
    }

    #[test]
    fn requests_made_while_loading_apply_after_the_drain() {
        let mut h = Harness::new(3);
        h.viewer
            .open_models(&[ModelOpenInfo::new("m2.mem", "m2", "m2")]);
        assert!(h.viewer.is_loading());

        h.viewer
            .color_items(vec![ColoringInfo::new(0x00FF00, 1.0, vec!["m2|mesh0".into()])]);
        h.viewer.select_items(&["m2|mesh1".to_string()]);
        assert!(h.viewer.get_selected_items().is_empty());

        h.viewer.settle();
        assert_eq!(h.viewer.get_selected_items(), &BTreeSet::from(["m2|mesh1".to_string()]));
        assert_eq!(h.viewer.coloring().colored_meshes().len(), 1);
        assert!(!h.viewer.selection().has_queued_selection());
        assert!(!h.viewer.coloring().has_queued_coloring());
        assert_eq!(h.viewer.get_opened_models().len(), 2);
    }

    #[test]
    fn dragging_selects_meshes_in_the_area() {
        let mut h = Harness::new(10);
        let (a, b) = (h.center(0), h.center(2));
        let margin = Vec2::splat(3.0);
        let (start, end) = (a.min(b) - margin, a.max(b) + margin);

        let now = h.at(0);
        h.viewer
            .handle_input(InputEvent::PointerDown(PointerInput::mouse(start.x, start.y)), now);
        h.viewer
            .handle_input(InputEvent::PointerUp(PointerInput::mouse(end.x, end.y)), now);

        let expected: BTreeSet<String> = (0..3).map(|i| h.id(i)).collect();
        assert_eq!(h.viewer.get_selected_items(), &expected);
    }

    #[test]
    fn clicking_empty_space_clears_the_selection() {
        let mut h = Harness::new(3);
        let ids = vec![h.id(0)];
        h.viewer.select_items(&ids);
        h.drain();

        h.click(Vec2::new(1.0, 1.0), 0);
        assert!(h.viewer.get_selected_items().is_empty());
        let manual_clear = h.drain().into_iter().any(|e| {
            matches!(e, ViewerEvent::SelectionChanged { ref ids, manual: true } if ids.is_empty())
        });
        assert!(manual_clear);
    }

    #[test]
    fn double_click_isolates_the_selection() {
        let mut h = Harness::new(3);
        let point = h.center(1);
        h.click(point, 0);
        assert_eq!(h.viewer.get_selected_items(), &BTreeSet::from([h.id(1)]));
        assert!(h.viewer.selection().isolated_meshes().is_empty());

        h.click(point, 100);
        assert_eq!(h.viewer.selection().isolated_meshes().len(), 2);

        // Past the window a click selects again.
        h.click(point, 1000);
        assert!(h.viewer.selection().isolated_meshes().is_empty());
    }

    #[test]
    fn hover_highlight_is_debounced() {
        let mut h = Harness::new(3);
        let point = h.center(2);
        let (t0, t10, t40) = (h.at(0), h.at(10), h.at(40));
        h.viewer
            .handle_input(InputEvent::PointerMove(PointerInput::mouse(point.x, point.y)), t0);
        h.viewer.tick(t10);
        assert!(h.viewer.highlight().highlighted().is_empty());

        h.viewer.tick(t40);
        let highlighted: Vec<_> = h.viewer.highlight().highlighted().iter().copied().collect();
        assert_eq!(highlighted, vec![h.handle(2)]);
    }

    #[test]
    fn leaving_a_hud_mode_resets_its_state() {
        let mut h = Harness::new(2);
        h.viewer
            .set_interaction_mode(InteractionMode::MeasureDistance);
        let mesh = h.viewer.loader().mesh(h.handle(0)).unwrap();
        let corner = mesh.world.transform_point3(Vec3::new(-0.5, 0.5, 0.5));
        let inside = corner + (mesh.world_sphere_center() - corner) * 0.1;
        let point = h.viewer.render().world_to_canvas(inside);
        h.click(point, 0);
        assert!(h.viewer.render().hud().measurer.ends().0.is_some());

        h.drain();
        h.viewer.set_interaction_mode(InteractionMode::SelectMesh);
        assert_eq!(h.viewer.render().hud().measurer.ends(), (None, None));
        let events = h.drain();
        assert!(events.contains(&ViewerEvent::ModeChanged(InteractionMode::SelectMesh)));

        h.viewer.set_interaction_mode(InteractionMode::SelectMesh);
        assert!(!h.drain().iter().any(|e| matches!(e, ViewerEvent::ModeChanged(_))));
    }

    #[test]
    fn context_loss_closes_all_models() {
        let mut h = Harness::new(2);
        h.viewer.notify_context_lost();
        h.viewer.settle();
        assert!(h.viewer.get_opened_models().is_empty());
        assert!(h.viewer.loader().mesh_handles().is_empty());
        h.viewer.notify_context_restored();
        let events = h.drain();
        assert!(events.contains(&ViewerEvent::ContextLossChanged(true)));
        assert!(events.contains(&ViewerEvent::ContextLossChanged(false)));
    }

    #[test]
    fn option_changes_reach_the_scene() {
        let mut h = Harness::new(2);
        let mut options = h.viewer.options().clone();
        options.camera_controls_disabled = true;
        options.mesh_merge_type = Some(crate::options::MeshMergeType::Model);
        h.viewer.update_options(options);
        assert!(!h.viewer.render().controller().enabled());
        assert!(!h.viewer.render().is_settled());

        h.viewer.settle();
        assert_eq!(h.viewer.render().render_scene().groups().len(), 1);
    }

    #[test]
    fn middle_drag_orbits_and_reports_the_camera() {
        let mut h = Harness::new(1);
        let before = h.viewer.render().controller().position();
        let down = PointerInput::mouse(100.0, 100.0).with_button(BUTTON_MIDDLE);
        let moved = PointerInput::mouse(140.0, 100.0).with_button(BUTTON_MIDDLE);
        let (t0, t5, t10) = (h.at(0), h.at(5), h.at(10));
        h.viewer.handle_input(InputEvent::PointerDown(down), t0);
        h.viewer.handle_input(InputEvent::PointerMove(moved), t5);
        assert_ne!(h.viewer.render().controller().position(), before);
        assert!(h
            .drain()
            .iter()
            .any(|e| matches!(e, ViewerEvent::CameraPositionChanged(_))));
        // Not a selection gesture.
        h.viewer.handle_input(InputEvent::PointerUp(down), t10);
        assert!(h.viewer.get_selected_items().is_empty());
    }
}
