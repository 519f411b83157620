//! Built-in glTF / GLB handler on top of the `gltf` crate.

use super::format::{FormatLoader, LoadedNode, LoadedPrimitive};
use super::AssetError;
use crate::scene::{Geometry, SourceMaterial};
use glam::{Mat4, Vec3};

#[derive(Debug, Default, Clone, Copy)]
pub struct GltfLoader;

impl GltfLoader {
    pub fn new() -> Self {
        Self
    }
}

impl FormatLoader for GltfLoader {
    fn extensions(&self) -> &[&'static str] {
        &["glb", "gltf"]
    }

    fn load(&self, url: &str, progress: &mut dyn FnMut(u64, u64)) -> Result<LoadedNode, AssetError> {
        let total = std::fs::metadata(url)
            .map_err(|source| AssetError::Read {
                path: url.to_string(),
                source,
            })?
            .len();
        progress(0, total);

        let (document, buffers, _images) = gltf::import(url).map_err(|err| AssetError::Parse {
            path: url.to_string(),
            message: err.to_string(),
        })?;
        progress(total, total);

        let scene = document
            .default_scene()
            .or_else(|| document.scenes().next())
            .ok_or_else(|| AssetError::Parse {
                path: url.to_string(),
                message: "document has no scenes".to_string(),
            })?;

        let children = scene
            .nodes()
            .map(|node| convert_node(&node, &buffers))
            .collect();
        let name = scene.name().unwrap_or_default();
        Ok(LoadedNode::group(name, children))
    }
}

fn convert_node(node: &gltf::Node<'_>, buffers: &[gltf::buffer::Data]) -> LoadedNode {
    let local = Mat4::from_cols_array_2d(&node.transform().matrix());
    let mut primitives = Vec::new();
    let mut name = node.name().unwrap_or_default().to_string();

    if let Some(mesh) = node.mesh() {
        if name.is_empty() {
            name = mesh.name().unwrap_or_default().to_string();
        }
        for primitive in mesh.primitives() {
            if primitive.mode() != gltf::mesh::Mode::Triangles {
                log::debug!("Skipping non-triangle primitive in mesh {:?}", mesh.name());
                continue;
            }
            let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|data| &data[..]));
            let Some(positions) = reader.read_positions() else {
                continue;
            };
            let positions: Vec<Vec3> = positions.map(Vec3::from).collect();
            let indices = reader
                .read_indices()
                .map(|indices| indices.into_u32().collect());
            let normals = reader
                .read_normals()
                .map(|normals| normals.map(Vec3::from).collect());
            primitives.push(LoadedPrimitive {
                geometry: Geometry::new(positions, indices, normals),
                material: convert_material(&primitive.material()),
            });
        }
    }

    let children = node
        .children()
        .map(|child| convert_node(&child, buffers))
        .collect();
    LoadedNode {
        name,
        local,
        primitives,
        children,
    }
}

fn convert_material(material: &gltf::Material<'_>) -> SourceMaterial {
    let pbr = material.pbr_metallic_roughness();
    let [r, g, b, a] = pbr.base_color_factor();
    let opacity = if material.alpha_mode() == gltf::material::AlphaMode::Blend {
        a
    } else {
        1.0
    };
    SourceMaterial::Standard {
        color: [r, g, b],
        roughness: pbr.roughness_factor(),
        metalness: pbr.metallic_factor(),
        opacity,
    }
}
