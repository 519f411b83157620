//! Model loading queue and the registry of loaded meshes and models.
//!
//! `open`/`close` enqueue tagged tasks and hand back a [`Pending`] result per
//! model. The owner drives the queue with [`ModelLoaderService::pump`], one
//! task per call. When a pump empties the queue it reports
//! [`PumpStatus::Drained`]; the owner runs its queue-loaded hooks and then
//! calls [`ModelLoaderService::complete_drain`], which publishes the roster
//! and picks up anything that was enqueued in the meantime.

pub mod format;
pub mod gltf_loader;

pub use format::{FormatLoader, LoadedNode, LoadedPrimitive};
pub use gltf_loader::GltfLoader;

use crate::events::{EventBus, ViewerEvent};
use crate::scene::{base_point_transform, MeshColors, MeshFlags, MeshHandle, MeshStore, SourceMesh};
use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("Unsupported file format: {name}")]
    UnsupportedFormat { name: String },
    #[error("{format} loader is not initialized")]
    LoaderNotInitialized { format: String },
    #[error("failed to read model at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse model {path}: {message}")]
    Parse { path: String, message: String },
}

pub type Result<T> = std::result::Result<T, AssetError>;

/// Formats the loader knows about, whether or not a handler is registered.
const KNOWN_FORMATS: &[&str] = &["glb", "gltf", "ifc"];

// ========================================================================
// Public data
// ========================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelOpenInfo {
    pub url: String,
    pub guid: String,
    #[serde(default)]
    pub name: String,
}

impl ModelOpenInfo {
    pub fn new(url: impl Into<String>, guid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            guid: guid.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelOpenResult {
    pub url: String,
    pub guid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Roster entry published after every drain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenedModelInfo {
    pub guid: String,
    pub name: String,
    pub handles: Vec<String>,
    pub mesh_count: usize,
    pub vertex_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueProgress {
    pub actions_done: usize,
    pub actions_left: usize,
}

#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub guid: String,
    pub name: String,
    pub meshes: Vec<MeshHandle>,
    pub handles: BTreeSet<String>,
    pub vertex_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderTask {
    Load(ModelOpenInfo),
    Unload { guid: String },
}

/// Result of one queued task, available once the task has run.
#[derive(Debug)]
pub struct Pending<T> {
    rx: Receiver<T>,
    value: Option<T>,
}

impl<T> Pending<T> {
    fn channel() -> (Sender<T>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self { rx, value: None })
    }

    fn ready(value: T) -> Self {
        let (tx, mut pending) = Self::channel();
        drop(tx);
        pending.value = Some(value);
        pending
    }

    pub fn poll(&mut self) -> Option<&T> {
        if self.value.is_none() {
            self.value = self.rx.try_recv().ok();
        }
        self.value.as_ref()
    }

    pub fn is_ready(&mut self) -> bool {
        self.poll().is_some()
    }

    pub fn take(mut self) -> Option<T> {
        self.poll();
        self.value
    }
}

/// Meshes resolved from a set of ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FoundMeshes {
    pub found: Vec<MeshHandle>,
    pub not_found: BTreeSet<String>,
}

/// Lifecycle callbacks, invoked synchronously while a task runs.
/// `mesh_unloaded` fires before the mesh's geometry is released.
pub trait LoaderObserver {
    fn mesh_loaded(&mut self, _mesh: &SourceMesh) {}
    fn mesh_unloaded(&mut self, _mesh: &SourceMesh) {}
    fn model_loaded(&mut self, _guid: &str) {}
    fn model_unloaded(&mut self, _guid: &str) {}
}

impl LoaderObserver for () {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpStatus {
    /// Nothing queued and no drain running.
    Idle,
    /// A task ran and more are queued.
    Working,
    /// The queue is empty; call `complete_drain` after the queue-loaded hooks.
    Drained,
}

enum Reply {
    Opened(Sender<ModelOpenResult>),
    Closed(Sender<String>),
}

struct QueuedTask {
    task: LoaderTask,
    reply: Reply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainState {
    Idle,
    Running { actions_done: usize },
    Drained,
}

// ========================================================================
// ModelLoaderService
// ========================================================================

pub struct ModelLoaderService {
    queue: VecDeque<QueuedTask>,
    drain: DrainState,
    loaders: HashMap<&'static str, Rc<dyn FormatLoader>>,
    base_transform: Mat4,
    meshes: HashMap<MeshHandle, SourceMesh>,
    mesh_order: Vec<MeshHandle>,
    meshes_by_id: HashMap<String, Vec<MeshHandle>>,
    models: HashMap<String, ModelInfo>,
    model_order: Vec<String>,
    opened: Vec<OpenedModelInfo>,
    next_handle: u64,
    disposed: usize,
    events: EventBus,
}

impl ModelLoaderService {
    /// `base_point` is the working-coordinate origin in the Y-up scene frame.
    pub fn new(events: EventBus, base_point: Option<Vec3>) -> Self {
        let mut service = Self {
            queue: VecDeque::new(),
            drain: DrainState::Idle,
            loaders: HashMap::new(),
            base_transform: base_point.map_or(Mat4::IDENTITY, base_point_transform),
            meshes: HashMap::new(),
            mesh_order: Vec::new(),
            meshes_by_id: HashMap::new(),
            models: HashMap::new(),
            model_order: Vec::new(),
            opened: Vec::new(),
            next_handle: 1,
            disposed: 0,
            events,
        };
        service.register_loader(Rc::new(GltfLoader::new()));
        service
    }

    /// Registers a handler for every extension it reports, replacing any
    /// previous handler for those extensions.
    pub fn register_loader(&mut self, loader: Rc<dyn FormatLoader>) {
        for ext in loader.extensions() {
            self.loaders.insert(*ext, Rc::clone(&loader));
        }
    }

    pub fn unregister_loader(&mut self, extension: &str) {
        self.loaders.remove(extension);
    }

    pub fn loading_in_progress(&self) -> bool {
        self.drain != DrainState::Idle
    }

    pub fn queued_tasks(&self) -> Vec<LoaderTask> {
        self.queue.iter().map(|queued| queued.task.clone()).collect()
    }

    pub fn open(&mut self, infos: &[ModelOpenInfo]) -> Vec<Pending<ModelOpenResult>> {
        let mut seen = HashSet::new();
        let mut results = Vec::new();
        for info in infos {
            if !seen.insert(info) {
                continue;
            }
            if self.models.contains_key(&info.guid) {
                results.push(Pending::ready(ModelOpenResult {
                    url: info.url.clone(),
                    guid: info.guid.clone(),
                    error: None,
                }));
                continue;
            }
            let (tx, pending) = Pending::channel();
            self.queue.push_back(QueuedTask {
                task: LoaderTask::Load(info.clone()),
                reply: Reply::Opened(tx),
            });
            results.push(pending);
        }
        self.start_drain();
        results
    }

    pub fn close(&mut self, guids: &[String]) -> Vec<Pending<String>> {
        let mut results = Vec::with_capacity(guids.len());
        for guid in guids {
            let (tx, pending) = Pending::channel();
            self.queue.push_back(QueuedTask {
                task: LoaderTask::Unload { guid: guid.clone() },
                reply: Reply::Closed(tx),
            });
            results.push(pending);
        }
        self.start_drain();
        results
    }

    pub fn close_all(&mut self) -> Vec<Pending<String>> {
        let guids = self.model_order.clone();
        self.close(&guids)
    }

    fn start_drain(&mut self) {
        if self.drain != DrainState::Idle || self.queue.is_empty() {
            return;
        }
        self.drain = DrainState::Running { actions_done: 0 };
        self.events.emit(ViewerEvent::LoadingStateChanged(true));
    }

    /// Runs at most one queued task.
    pub fn pump(&mut self, observer: &mut dyn LoaderObserver) -> PumpStatus {
        let actions_done = match self.drain {
            DrainState::Idle => return PumpStatus::Idle,
            DrainState::Drained => return PumpStatus::Drained,
            DrainState::Running { actions_done } => actions_done,
        };

        if let Some(queued) = self.queue.pop_front() {
            self.events
                .emit(ViewerEvent::LoadingQueueChanged(Some(QueueProgress {
                    actions_done,
                    actions_left: self.queue.len() + 1,
                })));
            self.run_task(queued, observer);
            self.drain = DrainState::Running {
                actions_done: actions_done + 1,
            };
        }

        if self.queue.is_empty() {
            self.events.emit(ViewerEvent::LoadingQueueChanged(None));
            self.drain = DrainState::Drained;
            PumpStatus::Drained
        } else {
            PumpStatus::Working
        }
    }

    /// Publishes the roster, ends the drain and restarts it if tasks arrived
    /// while the queue-loaded hooks ran.
    pub fn complete_drain(&mut self) {
        if self.drain != DrainState::Drained {
            return;
        }
        self.opened = self.build_roster();
        self.events
            .emit(ViewerEvent::OpenedModelsChanged(self.opened.clone()));
        self.events.emit(ViewerEvent::LoadingStateChanged(false));
        self.drain = DrainState::Idle;
        self.start_drain();
    }

    /// Pumps until the queue is idle, completing every drain on the way.
    pub fn run_to_idle(&mut self, observer: &mut dyn LoaderObserver) {
        loop {
            match self.pump(observer) {
                PumpStatus::Idle => return,
                PumpStatus::Working => {}
                PumpStatus::Drained => self.complete_drain(),
            }
        }
    }

    fn run_task(&mut self, queued: QueuedTask, observer: &mut dyn LoaderObserver) {
        match (queued.task, queued.reply) {
            (LoaderTask::Load(info), Reply::Opened(tx)) => {
                let result = if self.models.contains_key(&info.guid) {
                    ModelOpenResult {
                        url: info.url,
                        guid: info.guid,
                        error: None,
                    }
                } else {
                    self.load_model(&info, observer)
                };
                let _ = tx.send(result);
            }
            (LoaderTask::Unload { guid }, Reply::Closed(tx)) => {
                self.remove_model(&guid, observer);
                let _ = tx.send(guid);
            }
            (task, _) => log::warn!("Loader task {:?} has a mismatched reply", task),
        }
    }

    fn load_model(&mut self, info: &ModelOpenInfo, observer: &mut dyn LoaderObserver) -> ModelOpenResult {
        self.events.emit(ViewerEvent::ModelLoadingStarted {
            url: info.url.clone(),
            guid: info.guid.clone(),
        });

        let error = match self.decode(info) {
            Ok(root) => {
                self.add_model(root, info, observer);
                None
            }
            Err(err) => {
                log::warn!("Failed to load model {} ({}): {}", info.guid, info.url, err);
                Some(err.to_string())
            }
        };

        let result = ModelOpenResult {
            url: info.url.clone(),
            guid: info.guid.clone(),
            error,
        };
        self.events.emit(ViewerEvent::ModelLoadingProgress {
            url: info.url.clone(),
            guid: info.guid.clone(),
            progress: 0,
        });
        self.events.emit(ViewerEvent::ModelLoadingEnded(result.clone()));
        result
    }

    fn decode(&self, info: &ModelOpenInfo) -> Result<LoadedNode> {
        let display = if info.name.is_empty() { &info.url } else { &info.name };
        let ext = format::extension_of(display)
            .filter(|ext| self.loaders.contains_key(ext.as_str()) || KNOWN_FORMATS.contains(&ext.as_str()))
            .or_else(|| format::extension_of(&info.url))
            .unwrap_or_default();
        let Some(loader) = self.loaders.get(ext.as_str()) else {
            return Err(if KNOWN_FORMATS.contains(&ext.as_str()) {
                AssetError::LoaderNotInitialized {
                    format: ext.to_ascii_uppercase(),
                }
            } else {
                AssetError::UnsupportedFormat {
                    name: display.clone(),
                }
            });
        };

        let events = self.events.clone();
        let (url, guid) = (info.url.clone(), info.guid.clone());
        let mut progress = |loaded: u64, total: u64| {
            let percent = if total == 0 {
                0
            } else {
                ((loaded as f64 / total as f64) * 100.0).round().clamp(0.0, 100.0) as u8
            };
            events.emit(ViewerEvent::ModelLoadingProgress {
                url: url.clone(),
                guid: guid.clone(),
                progress: percent,
            });
        };
        loader.load(&info.url, &mut progress)
    }

    fn add_model(&mut self, root: LoadedNode, info: &ModelOpenInfo, observer: &mut dyn LoaderObserver) {
        let name = if info.name.is_empty() {
            info.guid.clone()
        } else {
            info.name.clone()
        };
        let mut model = ModelInfo {
            guid: info.guid.clone(),
            name,
            meshes: Vec::new(),
            handles: BTreeSet::new(),
            vertex_count: 0,
        };

        let root_world = self.base_transform * root.local;
        self.add_node(&root, root_world, &mut model, observer);

        log::info!(
            "Loaded model {} ({} meshes, {} vertices)",
            model.guid,
            model.meshes.len(),
            model.vertex_count
        );
        self.model_order.push(model.guid.clone());
        self.models.insert(model.guid.clone(), model);
        observer.model_loaded(&info.guid);
    }

    fn add_node(&mut self, node: &LoadedNode, world: Mat4, model: &mut ModelInfo, observer: &mut dyn LoaderObserver) {
        let split = node.primitives.len() > 1;
        for (i, primitive) in node.primitives.iter().enumerate() {
            let handle = MeshHandle(self.next_handle);
            self.next_handle += 1;
            let mesh_name = match (node.name.is_empty(), split) {
                (true, _) => format!("mesh-{}", handle.0),
                (false, true) => format!("{}_{}", node.name, i),
                (false, false) => node.name.clone(),
            };
            let mesh = SourceMesh {
                handle,
                id: format!("{}|{}", model.guid, mesh_name),
                model_guid: model.guid.clone(),
                name: mesh_name.clone(),
                geometry: Arc::new(primitive.geometry.clone()),
                world,
                material: primitive.material.clone(),
                flags: MeshFlags::default(),
                colors: MeshColors::default(),
            };

            model.vertex_count += mesh.geometry.vertex_count();
            model.meshes.push(handle);
            model.handles.insert(mesh_name);
            self.meshes_by_id
                .entry(mesh.id.clone())
                .or_default()
                .push(handle);
            self.mesh_order.push(handle);
            observer.mesh_loaded(&mesh);
            self.meshes.insert(handle, mesh);
        }
        for child in &node.children {
            self.add_node(child, world * child.local, model, observer);
        }
    }

    fn remove_model(&mut self, guid: &str, observer: &mut dyn LoaderObserver) {
        let Some(model) = self.models.remove(guid) else {
            return;
        };
        self.model_order.retain(|g| g != guid);
        let removed: HashSet<MeshHandle> = model.meshes.iter().copied().collect();
        self.mesh_order.retain(|handle| !removed.contains(handle));

        for handle in &model.meshes {
            let Some(mesh) = self.meshes.remove(handle) else {
                continue;
            };
            self.meshes_by_id.remove(&mesh.id);
            observer.mesh_unloaded(&mesh);
            drop(mesh);
            self.disposed += 1;
        }
        log::info!("Unloaded model {} ({} meshes)", guid, model.meshes.len());
        observer.model_unloaded(guid);
    }

    fn build_roster(&self) -> Vec<OpenedModelInfo> {
        self.model_order
            .iter()
            .filter_map(|guid| self.models.get(guid))
            .map(|model| OpenedModelInfo {
                guid: model.guid.clone(),
                name: model.name.clone(),
                handles: model.handles.iter().cloned().collect(),
                mesh_count: model.meshes.len(),
                vertex_count: model.vertex_count,
            })
            .collect()
    }

    // ====================================================================
    // Lookups
    // ====================================================================

    /// Roster as of the last completed drain.
    pub fn opened_models(&self) -> &[OpenedModelInfo] {
        &self.opened
    }

    pub fn model(&self, guid: &str) -> Option<&ModelInfo> {
        self.models.get(guid)
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelInfo> + '_ {
        self.model_order.iter().filter_map(|guid| self.models.get(guid))
    }

    pub fn mesh(&self, handle: MeshHandle) -> Option<&SourceMesh> {
        self.meshes.get(&handle)
    }

    pub fn mesh_mut(&mut self, handle: MeshHandle) -> Option<&mut SourceMesh> {
        self.meshes.get_mut(&handle)
    }

    /// Handles of every loaded mesh, in load order.
    pub fn mesh_handles(&self) -> &[MeshHandle] {
        &self.mesh_order
    }

    pub fn meshes(&self) -> impl Iterator<Item = &SourceMesh> + '_ {
        self.mesh_order.iter().filter_map(|h| self.meshes.get(h))
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn meshes_by_id(&self, id: &str) -> &[MeshHandle] {
        self.meshes_by_id.get(id).map_or(&[], Vec::as_slice)
    }

    pub fn find_meshes_by_ids<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> FoundMeshes {
        let mut result = FoundMeshes::default();
        for id in ids {
            match self.meshes_by_id.get(id) {
                Some(handles) if !handles.is_empty() => result.found.extend_from_slice(handles),
                _ => {
                    result.not_found.insert(id.to_string());
                }
            }
        }
        result
    }

    /// Meshes released by unloads so far.
    pub fn disposed_count(&self) -> usize {
        self.disposed
    }
}

impl MeshStore for ModelLoaderService {
    fn mesh(&self, handle: MeshHandle) -> Option<&SourceMesh> {
        self.meshes.get(&handle)
    }

    fn mesh_mut(&mut self, handle: MeshHandle) -> Option<&mut SourceMesh> {
        self.meshes.get_mut(&handle)
    }

    fn mesh_handles(&self) -> &[MeshHandle] {
        &self.mesh_order
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::scene::test_support::{cube_geometry, quad_geometry};
    use crate::scene::SourceMaterial;
    use std::cell::Cell;

    /// In-memory handler: every `.mem` file is a model with `mesh_count`
    /// unit cubes named `mesh0`, `mesh1`, … laid out along +X, 10 units apart.
    pub struct MemoryLoader {
        pub mesh_count: usize,
        pub calls: Rc<Cell<usize>>,
    }

    impl MemoryLoader {
        pub fn new(mesh_count: usize) -> Self {
            Self {
                mesh_count,
                calls: Rc::new(Cell::new(0)),
            }
        }
    }

    impl FormatLoader for MemoryLoader {
        fn extensions(&self) -> &[&'static str] {
            &["mem"]
        }

        fn load(&self, url: &str, progress: &mut dyn FnMut(u64, u64)) -> Result<LoadedNode> {
            self.calls.set(self.calls.get() + 1);
            if url.contains("broken") {
                return Err(AssetError::Parse {
                    path: url.to_string(),
                    message: "corrupt".to_string(),
                });
            }
            progress(1, 2);
            progress(2, 2);
            let children = (0..self.mesh_count)
                .map(|i| {
                    LoadedNode::mesh(
                        format!("mesh{}", i),
                        Mat4::from_translation(Vec3::new(i as f32 * 10.0, 0.0, 0.0)),
                        vec![LoadedPrimitive {
                            geometry: cube_geometry(1.0),
                            material: SourceMaterial::default(),
                        }],
                    )
                })
                .collect();
            Ok(LoadedNode::group("root", children))
        }
    }

    pub fn quad_model() -> LoadedNode {
        LoadedNode::mesh(
            "quad",
            Mat4::IDENTITY,
            vec![LoadedPrimitive {
                geometry: quad_geometry(),
                material: SourceMaterial::default(),
            }],
        )
    }

    pub fn loader_with_memory(mesh_count: usize) -> (ModelLoaderService, Rc<Cell<usize>>, EventBus) {
        let events = EventBus::new();
        let mut loader = ModelLoaderService::new(events.clone(), None);
        let memory = MemoryLoader::new(mesh_count);
        let calls = Rc::clone(&memory.calls);
        loader.register_loader(Rc::new(memory));
        (loader, calls, events)
    }
}
