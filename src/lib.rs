//! Model viewer core: a cooperative loading queue, merged render batches
//! drawn by a software rasterizer, color-id picking, and the selection,
//! highlight and coloring state on top of them.

pub mod app;
pub mod assets;
pub mod engine;
pub mod events;
pub mod options;
pub mod render;
pub mod scene;
pub mod services;

pub use app::{InteractionMode, Viewer, ViewerError};
pub use events::{EventBus, ViewerEvent};
pub use options::ViewerOptions;
