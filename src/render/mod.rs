pub mod axes;
mod camera;
pub mod hud;
pub mod hull;
pub mod jobs;
pub mod pick;
pub mod render_scene;
pub mod simplified;

pub use axes::{AxesGizmo, AxisId};
pub use camera::CameraController;
pub use hud::{Distance, HudProjection, HudScene, MarkerInfo, SnapPoint};
pub use jobs::{ChunkedWork, SliceOutcome, TimeSlicer};
pub use pick::{CanvasRect, PickContext, PickingScene};
pub use render_scene::RenderScene;
pub use simplified::SimplifiedScene;

use crate::app::timing::Debounce;
use crate::engine::{PerspectiveCamera, RenderTarget, SoftwareRenderer};
use crate::events::{EventBus, ViewerEvent};
use crate::options::ViewerOptions;
use crate::scene::color::hex_to_rgb;
use crate::scene::{Aabb, MeshHandle, MeshStore};
use glam::{Vec2, Vec3};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Camera distance factor applied when framing meshes.
const FOCUS_OFFSET: f32 = 1.2;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("canvas size must be non-zero, got {width}x{height}")]
    InvalidCanvasSize { width: f32, height: f32 },
    #[error("failed creating capture directory '{path}': {source}")]
    CaptureDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed writing capture '{path}': {source}")]
    CaptureWrite {
        path: PathBuf,
        source: image::ImageError,
    },
}

pub type Result<T> = std::result::Result<T, RenderError>;

// ========================================================================
// Canvas
// ========================================================================

/// Position and CSS size of the canvas element in client coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClientRect {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl ClientRect {
    pub fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn sized(width: f32, height: f32) -> Self {
        Self::new(0.0, 0.0, width, height)
    }
}

/// Client rectangle plus the device pixel ratio that sizes the backing
/// buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Canvas {
    rect: ClientRect,
    pixel_ratio: f32,
}

impl Canvas {
    pub fn new(rect: ClientRect, pixel_ratio: f32) -> Result<Self> {
        let ratio = if pixel_ratio > 0.0 { pixel_ratio } else { 1.0 };
        if !(rect.width >= 1.0 && rect.height >= 1.0) {
            return Err(RenderError::InvalidCanvasSize {
                width: rect.width,
                height: rect.height,
            });
        }
        Ok(Self {
            rect,
            pixel_ratio: ratio,
        })
    }

    pub fn rect(&self) -> ClientRect {
        self.rect
    }

    pub fn pixel_ratio(&self) -> f32 {
        self.pixel_ratio
    }

    /// Backing buffer size in device pixels.
    pub fn buffer_size(&self) -> (u32, u32) {
        (
            (self.rect.width * self.pixel_ratio).round().max(1.0) as u32,
            (self.rect.height * self.pixel_ratio).round().max(1.0) as u32,
        )
    }

    /// Client point to buffer pixels, top-left origin.
    pub fn client_to_canvas(&self, client: Vec2) -> Vec2 {
        let (w, h) = self.buffer_size();
        Vec2::new(
            (client.x - self.rect.left) * w as f32 / self.rect.width,
            (client.y - self.rect.top) * h as f32 / self.rect.height,
        )
    }

    /// Client point to buffer pixels, origin at the center, y up.
    pub fn client_to_canvas_zero_center(&self, client: Vec2) -> Vec2 {
        let (w, h) = self.buffer_size();
        let canvas = self.client_to_canvas(client);
        Vec2::new(canvas.x - w as f32 / 2.0, h as f32 / 2.0 - canvas.y)
    }

    /// Zero-centered point scaled to [-1, 1] on both axes.
    pub fn client_to_canvas_normalized(&self, client: Vec2) -> Vec2 {
        let (w, h) = self.buffer_size();
        self.client_to_canvas_zero_center(client) / Vec2::new(w as f32 / 2.0, h as f32 / 2.0)
    }
}

// ========================================================================
// Frame scheduling
// ========================================================================

/// What to focus the camera on before a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Focus {
    Meshes(Vec<MeshHandle>),
    /// Every loaded mesh.
    Scene,
}

#[derive(Debug, Clone, PartialEq)]
struct FrameRequest {
    focus: Option<Focus>,
    fast: bool,
}

impl FrameRequest {
    /// Requests made before the next paint share one frame. The frame is
    /// full quality unless every request asked for a fast one; the latest
    /// focus wins.
    fn merge(&mut self, other: FrameRequest) {
        self.fast &= other.fast;
        if other.focus.is_some() {
            self.focus = other.focus;
        }
    }
}

/// Renderer, canvas target and frame composition.
pub struct RenderService {
    renderer: SoftwareRenderer,
    target: RenderTarget,
    canvas: Canvas,
    controller: CameraController,
    render_scene: RenderScene,
    simplified: SimplifiedScene,
    hud: HudScene,
    axes: AxesGizmo,
    background: [u8; 4],
    slicer: TimeSlicer,
    meshes_need_color_update: BTreeSet<MeshHandle>,
    pending_frame: Option<FrameRequest>,
    deferred_render: Debounce,
    render_whole_scene_after_build: bool,
    events: EventBus,
    last_frame_ms: f64,
    frames_rendered: u64,
}

impl RenderService {
    pub fn new(options: &ViewerOptions, canvas: Canvas, events: EventBus) -> Self {
        let (width, height) = canvas.buffer_size();
        let mut camera = PerspectiveCamera::default();
        camera.resize(width, height);
        let [r, g, b] = hex_to_rgb(options.background_color).map(|c| (c * 255.0).round() as u8);
        let mut service = Self {
            renderer: SoftwareRenderer::new(options.lights()),
            target: RenderTarget::new(width, height),
            canvas,
            controller: CameraController::new(camera),
            render_scene: RenderScene::new(
                options.common_colors(),
                options.mesh_merge_type,
                options.merge_chunk_size,
            ),
            simplified: SimplifiedScene::new(options.fast_render_type),
            hud: HudScene::new(options.sprite_size_px, events.clone()),
            axes: AxesGizmo::new(
                options.axes_helper_enabled,
                options.axes_helper_placement,
                options.axes_helper_size,
            ),
            background: [r, g, b, 255],
            slicer: TimeSlicer::from_millis(options.build_slice_ms),
            meshes_need_color_update: BTreeSet::new(),
            pending_frame: None,
            deferred_render: Debounce::from_millis(options.fast_render_delay_ms),
            render_whole_scene_after_build: false,
            events,
            last_frame_ms: 0.0,
            frames_rendered: 0,
        };
        service.controller.set_enabled(!options.camera_controls_disabled);
        service
    }

    // ---- accessors ------------------------------------------------------

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    pub fn target(&self) -> &RenderTarget {
        &self.target
    }

    pub fn renderer(&self) -> &SoftwareRenderer {
        &self.renderer
    }

    pub fn camera(&self) -> &PerspectiveCamera {
        self.controller.camera()
    }

    pub fn controller(&self) -> &CameraController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut CameraController {
        &mut self.controller
    }

    pub fn render_scene(&self) -> &RenderScene {
        &self.render_scene
    }

    pub fn render_scene_mut(&mut self) -> &mut RenderScene {
        &mut self.render_scene
    }

    pub fn simplified_scene(&self) -> &SimplifiedScene {
        &self.simplified
    }

    pub fn hud(&self) -> &HudScene {
        &self.hud
    }

    pub fn hud_mut(&mut self) -> &mut HudScene {
        &mut self.hud
    }

    pub fn axes(&self) -> &AxesGizmo {
        &self.axes
    }

    pub fn axes_mut(&mut self) -> &mut AxesGizmo {
        &mut self.axes
    }

    pub fn last_frame_ms(&self) -> f64 {
        self.last_frame_ms
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn has_pending_frame(&self) -> bool {
        self.pending_frame.is_some()
    }

    pub fn is_fast_render_pending(&self) -> bool {
        self.deferred_render.is_armed()
    }

    // ---- options --------------------------------------------------------

    pub fn set_lights(&mut self, options: &ViewerOptions) {
        self.renderer.set_lights(options.lights());
        let [r, g, b] = hex_to_rgb(options.background_color).map(|c| (c * 255.0).round() as u8);
        self.background = [r, g, b, 255];
    }

    pub fn set_timing(&mut self, options: &ViewerOptions) {
        self.slicer = TimeSlicer::from_millis(options.build_slice_ms);
        self.deferred_render
            .set_delay(Duration::from_millis(options.fast_render_delay_ms));
    }

    pub fn set_layout(&mut self, options: &ViewerOptions) {
        self.render_scene
            .set_layout(options.mesh_merge_type, options.merge_chunk_size);
        self.simplified.set_kind(options.fast_render_type);
    }

    pub fn update_scene_materials(&mut self) {
        self.render_scene.update_scene_materials();
    }

    // ---- canvas ---------------------------------------------------------

    pub fn resize(&mut self, canvas: Canvas) {
        self.canvas = canvas;
        let (width, height) = canvas.buffer_size();
        self.target.resize(width, height);
        self.controller.resize(width, height);
        self.request_render(None, false);
    }

    pub fn client_to_canvas(&self, client: Vec2) -> Vec2 {
        self.canvas.client_to_canvas(client)
    }

    pub fn client_to_canvas_zero_center(&self, client: Vec2) -> Vec2 {
        self.canvas.client_to_canvas_zero_center(client)
    }

    pub fn client_to_canvas_normalized(&self, client: Vec2) -> Vec2 {
        self.canvas.client_to_canvas_normalized(client)
    }

    pub fn world_to_canvas(&self, world: Vec3) -> Vec2 {
        world_to_canvas(self.camera(), self.canvas.buffer_size(), world)
    }

    /// Points behind the camera are mirrored so they land on the side of
    /// the canvas they are turned towards.
    pub fn world_to_canvas_zero_center(&self, world: Vec3) -> Vec2 {
        let (w, h) = self.canvas.buffer_size();
        let mut ndc = self.camera().project(world);
        if ndc.z > 1.0 {
            ndc.x = -ndc.x;
            ndc.y = -ndc.y;
        }
        Vec2::new(ndc.x * w as f32 / 2.0, ndc.y * h as f32 / 2.0)
    }

    pub fn hud_projection(&self) -> HudProjection {
        let (w, h) = self.canvas.buffer_size();
        HudProjection::new(&self.camera().view(), w, h)
    }

    pub fn pick_context(&mut self) -> PickContext<'_> {
        PickContext {
            buffer_size: self.canvas.buffer_size(),
            camera: self.controller.camera_mut(),
            renderer: &mut self.renderer,
        }
    }

    // ---- scene updates --------------------------------------------------

    /// Queues a mesh whose flags changed; its color is refreshed right
    /// before the next frame is drawn.
    pub fn enqueue_mesh_for_color_update(&mut self, handle: MeshHandle) {
        self.meshes_need_color_update.insert(handle);
    }

    pub fn pending_color_updates(&self) -> usize {
        self.meshes_need_color_update.len()
    }

    pub fn mesh_unloaded(&mut self, handle: MeshHandle) {
        self.meshes_need_color_update.remove(&handle);
        self.render_scene.mesh_unloaded(handle);
    }

    /// Rebuilds the render scene and the simplified scene from the loaded
    /// meshes, then renders everything in focus.
    pub fn update_render_scene(&mut self) {
        self.render_scene.request_rebuild();
        if self.simplified.kind().is_some() {
            self.simplified.request_rebuild();
        } else {
            self.simplified.clear();
        }
        self.render_whole_scene_after_build = true;
    }

    pub fn is_building(&self) -> bool {
        self.render_scene.is_building() || self.simplified.is_building()
    }

    /// No build, post-build framing or frame request is outstanding. A
    /// deferred full render after camera movement does not count.
    pub fn is_settled(&self) -> bool {
        !self.is_building() && !self.render_whole_scene_after_build && self.pending_frame.is_none()
    }

    // ---- frames ---------------------------------------------------------

    pub fn request_render(&mut self, focus: Option<Focus>, fast: bool) {
        let request = FrameRequest { focus, fast };
        match self.pending_frame.as_mut() {
            Some(pending) => pending.merge(request),
            None => self.pending_frame = Some(request),
        }
    }

    /// Full frame framing every loaded mesh, or a plain frame if nothing is
    /// loaded.
    pub fn render_whole_scene<S: MeshStore + ?Sized>(&mut self, store: &S) {
        let focus = (!store.mesh_handles().is_empty()).then_some(Focus::Scene);
        self.request_render(focus, false);
    }

    /// Draws the stand-in scene now and schedules one full frame once the
    /// camera has been still for the configured delay.
    pub fn render_on_camera_move(&mut self, now: Instant) {
        if self.simplified.kind().is_some() {
            self.deferred_render.cancel();
            self.request_render(None, true);
            self.deferred_render.arm(now);
        } else {
            self.request_render(None, false);
        }
    }

    /// One cooperative step: advances scene builds, fires the deferred full
    /// render and draws the pending frame. Returns whether a frame was
    /// drawn.
    pub fn tick<S: MeshStore + ?Sized>(&mut self, now: Instant, store: &mut S) -> bool {
        if self.render_scene.is_building() {
            self.render_scene.tick(&self.slicer, store);
        } else if self.simplified.is_building() {
            self.simplified.tick(&self.slicer, &*store);
        } else if self.render_whole_scene_after_build {
            self.render_whole_scene_after_build = false;
            self.render_whole_scene(&*store);
        }
        if self.deferred_render.poll(now) {
            self.request_render(None, false);
        }
        match self.pending_frame.take() {
            Some(frame) => {
                self.compose(store, frame);
                true
            }
            None => false,
        }
    }

    /// Draws the pending frame, or a full frame if none is pending.
    pub fn render_now<S: MeshStore + ?Sized>(&mut self, store: &mut S) {
        let frame = self.pending_frame.take().unwrap_or(FrameRequest {
            focus: None,
            fast: false,
        });
        self.compose(store, frame);
    }

    fn prepare<S: MeshStore + ?Sized>(&mut self, store: &mut S, focus: Option<Focus>) {
        if let Some(focus) = focus {
            let handles: Vec<MeshHandle> = match focus {
                Focus::Meshes(handles) => handles,
                Focus::Scene => store.mesh_handles().to_vec(),
            };
            let boxes: Vec<Aabb> = handles
                .iter()
                .filter_map(|h| store.mesh(*h))
                .map(|m| m.world_bounds())
                .collect();
            if !boxes.is_empty() {
                self.controller.focus_on_boxes(&boxes, FOCUS_OFFSET);
            }
        }
        if !self.meshes_need_color_update.is_empty() {
            let handles = std::mem::take(&mut self.meshes_need_color_update);
            self.render_scene.update_mesh_colors(handles, store);
        }
    }

    fn compose<S: MeshStore + ?Sized>(&mut self, store: &mut S, frame: FrameRequest) {
        self.prepare(store, frame.focus);
        let start = Instant::now();
        self.render_scene.upload();

        self.renderer.reset_stats();
        self.renderer.set_viewport(None);
        self.renderer
            .clear(&mut self.target, Some(self.background), true);
        let view = self.controller.camera().view();
        if frame.fast && self.simplified.is_ready() {
            let draws = self.simplified.draw_calls();
            self.renderer.render(&mut self.target, &view, &draws);
        } else if self.render_scene.is_built() {
            let draws = self.render_scene.draw_calls();
            self.renderer.render(&mut self.target, &view, &draws);
        }
        let projection = self.hud_projection();
        self.hud
            .render(&projection, &mut self.renderer, &mut self.target);
        self.axes.render(
            &self.controller.camera().view_matrix(),
            &mut self.renderer,
            &mut self.target,
        );

        self.last_frame_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.frames_rendered += 1;
        let stats = self.renderer.stats();
        log::debug!(
            "Frame {} ({}): {} draws, {} triangles in {:.2} ms",
            self.frames_rendered,
            if frame.fast { "fast" } else { "full" },
            stats.draw_calls,
            stats.triangles,
            self.last_frame_ms
        );
        self.events
            .emit(ViewerEvent::LastFrameTime(self.last_frame_ms));
    }

    // ---- capture --------------------------------------------------------

    pub fn capture_png(&self, path: &Path) -> Result<()> {
        save_png(
            path,
            self.target.width(),
            self.target.height(),
            self.target.pixels(),
        )
    }
}

/// World point to buffer pixels, top-left origin.
pub fn world_to_canvas(camera: &PerspectiveCamera, buffer_size: (u32, u32), world: Vec3) -> Vec2 {
    let (w, h) = buffer_size;
    let ndc = camera.project(world);
    Vec2::new((ndc.x + 1.0) * w as f32 / 2.0, (ndc.y - 1.0) * h as f32 / -2.0)
}

fn save_png(path: &Path, width: u32, height: u32, pixels: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| RenderError::CaptureDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }

    image::save_buffer_with_format(
        PathBuf::from(path),
        pixels,
        width,
        height,
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .map_err(|source| RenderError::CaptureWrite {
        path: path.to_path_buf(),
        source,
    })
}
