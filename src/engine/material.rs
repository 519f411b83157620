use crate::scene::color::hex_to_rgb;
use crate::scene::ColorRgbRmo;

/// Surface description consumed by the rasterizer.
#[derive(Debug, Clone, PartialEq)]
pub enum Material {
    /// Lit surface with one uniform color.
    Standard(ColorRgbRmo),
    /// Lit surface reading color and roughness/metalness/opacity per vertex
    /// from the draw's `color` and `rmo` byte attributes.
    VertexColorRmo,
    /// Unlit solid color, written to the target unchanged.
    Flat { rgb: [u8; 3], opacity: f32 },
}

impl Material {
    pub fn flat_hex(hex: u32) -> Self {
        Material::Flat {
            rgb: [(hex >> 16) as u8, (hex >> 8) as u8, hex as u8],
            opacity: 1.0,
        }
    }

    pub fn flat_rgb(rgb: [f32; 3], opacity: f32) -> Self {
        let byte = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        Material::Flat {
            rgb: [byte(rgb[0]), byte(rgb[1]), byte(rgb[2])],
            opacity,
        }
    }

    pub fn standard_hex(hex: u32) -> Self {
        let [r, g, b] = hex_to_rgb(hex);
        Material::Standard(ColorRgbRmo::new(r, g, b, 1.0, 0.0, 1.0))
    }

    /// Drawn in the blended pass. Vertex-colored surfaces always are, the
    /// index order inside the draw decides what blends over what.
    pub fn is_transparent(&self) -> bool {
        match self {
            Material::Standard(color) => !color.is_opaque(),
            Material::VertexColorRmo => true,
            Material::Flat { opacity, .. } => *opacity < 1.0,
        }
    }

    pub fn is_lit(&self) -> bool {
        !matches!(self, Material::Flat { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::Material;

    #[test]
    fn flat_hex_splits_channels() {
        assert_eq!(
            Material::flat_hex(0x123456),
            Material::Flat {
                rgb: [0x12, 0x34, 0x56],
                opacity: 1.0
            }
        );
    }
}
