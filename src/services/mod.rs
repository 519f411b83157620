//! Selection, highlight, coloring and HUD interaction on top of the loaded
//! meshes.
//!
//! Services own their mesh sets and flip the per-mesh flags; the render
//! service recolors flagged meshes right before the next frame. Every call
//! borrows the shared viewer state through a [`ServiceContext`].

pub mod coloring;
pub mod highlight;
pub mod hud;
pub mod selection;

pub use coloring::{ColoringInfo, ColoringService};
pub use highlight::HighlightService;
pub use selection::{AreaSelectMode, SelectionService};

use crate::assets::ModelLoaderService;
use crate::render::{CanvasRect, PickingScene, RenderService, SnapPoint};
use crate::scene::MeshHandle;
use glam::Vec2;

pub struct ServiceContext<'a> {
    pub loader: &'a mut ModelLoaderService,
    pub render: &'a mut RenderService,
    pub picking: &'a mut PickingScene,
}

impl<'a> ServiceContext<'a> {
    pub fn new(loader: &'a mut ModelLoaderService, render: &'a mut RenderService, picking: &'a mut PickingScene) -> Self {
        Self {
            loader,
            render,
            picking,
        }
    }

    /// Mesh under a client point.
    pub fn mesh_at(&mut self, client: Vec2) -> Option<MeshHandle> {
        let point = self.render.client_to_canvas(client);
        let mut pick = self.render.pick_context();
        self.picking.pick(&mut pick, &*self.loader, point)
    }

    /// Visible meshes whose centers fall inside the rectangle spanned by two
    /// client points.
    pub fn meshes_in_area(&mut self, start: Vec2, end: Vec2) -> Vec<MeshHandle> {
        let rect = CanvasRect::from_corners(
            self.render.client_to_canvas(start),
            self.render.client_to_canvas(end),
        );
        let render = &*self.render;
        self.picking
            .pick_area(&*self.loader, rect, |world| render.world_to_canvas(world))
    }

    pub fn snap_point_at(&mut self, client: Vec2) -> Option<SnapPoint> {
        let point = self.render.client_to_canvas(client);
        let mut pick = self.render.pick_context();
        self.picking.pick_vertex(&mut pick, &*self.loader, point)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::assets::test_support::loader_with_memory;
    use crate::assets::{ModelLoaderService, ModelOpenInfo};
    use crate::events::{EventBus, ViewerEvent};
    use crate::options::ViewerOptions;
    use crate::render::{Canvas, ClientRect, PickingScene, RenderService};
    use crate::scene::SourceMesh;
    use std::sync::mpsc::Receiver;

    use super::ServiceContext;

    /// Adds every loaded mesh to the picking scene.
    pub struct PickingObserver<'a>(pub &'a mut PickingScene);

    impl crate::assets::LoaderObserver for PickingObserver<'_> {
        fn mesh_loaded(&mut self, mesh: &SourceMesh) {
            self.0.add(mesh);
        }

        fn mesh_unloaded(&mut self, mesh: &SourceMesh) {
            self.0.remove(mesh.handle);
        }
    }

    pub struct Fixture {
        pub loader: ModelLoaderService,
        pub render: RenderService,
        pub picking: PickingScene,
        pub events: EventBus,
        pub rx: Receiver<ViewerEvent>,
    }

    impl Fixture {
        /// One model `m1` with `mesh_count` meshes, rendered into a 200×200
        /// canvas with every mesh in view.
        pub fn new(mesh_count: usize) -> Self {
            let (mut loader, _, events) = loader_with_memory(mesh_count);
            let rx = events.subscribe();
            let mut picking = PickingScene::new();
            loader.open(&[ModelOpenInfo::new("m1.mem", "m1", "m1")]);
            loader.run_to_idle(&mut PickingObserver(&mut picking));
            let canvas = Canvas::new(ClientRect::sized(200.0, 200.0), 1.0).unwrap();
            let mut render = RenderService::new(&ViewerOptions::default(), canvas, events.clone());
            render.update_render_scene();
            while render.is_building() {
                render.tick(std::time::Instant::now(), &mut loader);
            }
            render.tick(std::time::Instant::now(), &mut loader);
            Self {
                loader,
                render,
                picking,
                events,
                rx,
            }
        }

        pub fn ctx(&mut self) -> ServiceContext<'_> {
            ServiceContext::new(&mut self.loader, &mut self.render, &mut self.picking)
        }

        pub fn drain(&self) -> Vec<ViewerEvent> {
            self.rx.try_iter().collect()
        }

        pub fn mesh_id(&self, index: usize) -> String {
            let handle = self.loader.mesh_handles()[index];
            self.loader.mesh(handle).map(|m| m.id.clone()).unwrap_or_default()
        }
    }
}
