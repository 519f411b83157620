//! Format handler seam. A handler turns a file into a node hierarchy; the
//! loader service takes it from there.

use super::AssetError;
use crate::scene::{Geometry, SourceMaterial};
use glam::Mat4;

/// One geometry+material pair of a node.
#[derive(Debug, Clone)]
pub struct LoadedPrimitive {
    pub geometry: Geometry,
    pub material: SourceMaterial,
}

/// Node of a decoded model. `local` is relative to the parent node.
#[derive(Debug, Clone)]
pub struct LoadedNode {
    pub name: String,
    pub local: Mat4,
    pub primitives: Vec<LoadedPrimitive>,
    pub children: Vec<LoadedNode>,
}

impl LoadedNode {
    pub fn group(name: impl Into<String>, children: Vec<LoadedNode>) -> Self {
        Self {
            name: name.into(),
            local: Mat4::IDENTITY,
            primitives: Vec::new(),
            children,
        }
    }

    pub fn mesh(name: impl Into<String>, local: Mat4, primitives: Vec<LoadedPrimitive>) -> Self {
        Self {
            name: name.into(),
            local,
            primitives,
            children: Vec::new(),
        }
    }

    pub fn primitive_count(&self) -> usize {
        self.primitives.len()
            + self
                .children
                .iter()
                .map(LoadedNode::primitive_count)
                .sum::<usize>()
    }
}

/// Decodes one file format. `progress` receives `(loaded, total)` byte
/// counts and may be called any number of times.
pub trait FormatLoader {
    /// Lowercase file extensions handled, without the dot.
    fn extensions(&self) -> &[&'static str];

    fn load(&self, url: &str, progress: &mut dyn FnMut(u64, u64)) -> Result<LoadedNode, AssetError>;
}

/// Lowercase extension of a file name or URL, ignoring any query string.
pub fn extension_of(name: &str) -> Option<String> {
    let name = name.split(['?', '#']).next().unwrap_or(name);
    let file = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let (_, ext) = file.rsplit_once('.')?;
    (!ext.is_empty()).then(|| ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_ignores_case_and_query() {
        assert_eq!(extension_of("Tower.GLB").as_deref(), Some("glb"));
        assert_eq!(extension_of("models/a.b/house.ifc?v=2").as_deref(), Some("ifc"));
        assert_eq!(extension_of("README"), None);
        assert_eq!(extension_of("dir.d/file"), None);
    }

    #[test]
    fn primitive_count_is_recursive() {
        let quad = LoadedPrimitive {
            geometry: crate::scene::test_support::quad_geometry(),
            material: SourceMaterial::default(),
        };
        let node = LoadedNode::group(
            "root",
            vec![
                LoadedNode::mesh("a", Mat4::IDENTITY, vec![quad.clone(), quad.clone()]),
                LoadedNode::group("g", vec![LoadedNode::mesh("b", Mat4::IDENTITY, vec![quad])]),
            ],
        );
        assert_eq!(node.primitive_count(), 3);
    }
}
