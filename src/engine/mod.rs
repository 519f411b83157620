//! Minimal retained rendering backend: buffer attributes, materials,
//! render targets with readback, a perspective camera with view offsets and
//! a software rasterizer.

pub mod buffers;
pub mod camera;
pub mod material;
pub mod raster;
pub mod target;

pub use buffers::BufferAttribute;
pub use camera::{PerspectiveCamera, ViewOffset};
pub use material::Material;
pub use raster::{DrawCall, Lights, RenderStats, SoftwareRenderer, VertexColors, View};
pub use target::{RenderTarget, Viewport};
