//! Scanline-free triangle rasterizer.
//!
//! Triangles are clipped against the near plane, mapped into the active
//! viewport and filled with edge functions at pixel centers. Depth is
//! interpolated from the three screen-space vertices. Opaque triangles write
//! depth; blended triangles only test it, so draw order decides blending.

use super::material::Material;
use super::target::{RenderTarget, Viewport};
use glam::{Mat4, Vec3, Vec4};

/// View and projection of one pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct View {
    pub view: Mat4,
    pub projection: Mat4,
}

impl View {
    pub fn view_proj(&self) -> Mat4 {
        self.projection * self.view
    }
}

/// Per-vertex byte attributes read by [`Material::VertexColorRmo`].
#[derive(Debug, Clone, Copy)]
pub struct VertexColors<'a> {
    pub color: &'a [u8],
    pub rmo: &'a [u8],
}

#[derive(Debug, Clone, Copy)]
pub struct DrawCall<'a> {
    pub positions: &'a [Vec3],
    pub indices: &'a [u32],
    pub transform: Mat4,
    pub material: &'a Material,
    pub vertex_colors: Option<VertexColors<'a>>,
}

impl<'a> DrawCall<'a> {
    pub fn new(positions: &'a [Vec3], indices: &'a [u32], transform: Mat4, material: &'a Material) -> Self {
        Self {
            positions,
            indices,
            transform,
            material,
            vertex_colors: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lights {
    pub ambient: f32,
    pub hemisphere: f32,
    pub directional: f32,
    /// Direction the directional light travels, world space.
    pub direction: Vec3,
    pub sky_up: Vec3,
}

impl Default for Lights {
    fn default() -> Self {
        Self {
            ambient: 1.0,
            hemisphere: 0.4,
            directional: 0.6,
            direction: Vec3::new(-1.0, -2.0, -1.5).normalize(),
            sky_up: Vec3::Y,
        }
    }
}

impl Lights {
    fn shade(&self, normal: Vec3, rgb: [f32; 3], roughness: f32, metalness: f32) -> [f32; 3] {
        let hemi = 0.5 + 0.5 * normal.dot(self.sky_up);
        let diffuse = normal.dot(-self.direction).max(0.0);
        let light = 0.35 * self.ambient + self.hemisphere * hemi + self.directional * diffuse;
        let albedo = 1.0 - 0.5 * metalness.clamp(0.0, 1.0);
        let sheen = (1.0 - roughness.clamp(0.0, 1.0)) * 0.15 * diffuse.powi(8) * self.directional;
        rgb.map(|c| c * albedo * light + sheen)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub draw_calls: usize,
    pub triangles: usize,
}

#[derive(Debug, Clone, Copy)]
struct Surface {
    rgb: [f32; 3],
    opacity: f32,
    exact: Option<[u8; 3]>,
}

#[derive(Debug, Clone, Copy)]
struct ScreenVertex {
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Debug, Default)]
pub struct SoftwareRenderer {
    lights: Lights,
    viewport: Option<Viewport>,
    stats: RenderStats,
}

impl SoftwareRenderer {
    pub fn new(lights: Lights) -> Self {
        Self {
            lights,
            viewport: None,
            stats: RenderStats::default(),
        }
    }

    pub fn lights(&self) -> &Lights {
        &self.lights
    }

    pub fn set_lights(&mut self, lights: Lights) {
        self.lights = lights;
    }

    /// Restricts drawing and clearing to a sub-rectangle; `None` means the
    /// whole target.
    pub fn set_viewport(&mut self, viewport: Option<Viewport>) {
        self.viewport = viewport;
    }

    pub fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }

    pub fn stats(&self) -> RenderStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = RenderStats::default();
    }

    pub fn clear(&mut self, target: &mut RenderTarget, rgba: Option<[u8; 4]>, depth: bool) {
        if let Some(rgba) = rgba {
            target.clear_color(rgba, self.viewport);
        }
        if depth {
            target.clear_depth(self.viewport);
        }
    }

    /// Draws opaque materials first, then blended ones, each in list order.
    pub fn render(&mut self, target: &mut RenderTarget, view: &View, draws: &[DrawCall<'_>]) {
        let viewport = self
            .viewport
            .unwrap_or(Viewport::full(target.width(), target.height()))
            .clamped(target.width(), target.height());
        if viewport.width == 0 || viewport.height == 0 {
            return;
        }
        let opaque = draws.iter().filter(|d| !d.material.is_transparent());
        let blended = draws.iter().filter(|d| d.material.is_transparent());
        for draw in opaque.chain(blended) {
            self.draw(target, view, viewport, draw);
        }
    }

    fn draw(&mut self, target: &mut RenderTarget, view: &View, viewport: Viewport, draw: &DrawCall<'_>) {
        self.stats.draw_calls += 1;
        let model_view = view.view * draw.transform;
        let mvp = view.projection * model_view;
        let positions = draw.positions;

        for tri in draw.indices.chunks_exact(3) {
            let idx = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
            if idx.iter().any(|&i| i >= positions.len()) {
                continue;
            }
            let Some(surface) = self.surface(draw, idx[0]) else {
                continue;
            };
            let local = idx.map(|i| positions[i]);

            let surface = if draw.material.is_lit() {
                let world = local.map(|p| draw.transform.transform_point3(p));
                let mut normal = (world[1] - world[0]).cross(world[2] - world[0]).normalize_or_zero();
                // Face the normal toward the eye for two-sided lighting.
                let view_pos = model_view.transform_point3(local[0]);
                let view_normal = model_view.transform_vector3(
                    (local[1] - local[0]).cross(local[2] - local[0]),
                );
                if view_normal.dot(view_pos) > 0.0 {
                    normal = -normal;
                }
                let (roughness, metalness) = self.roughness_metalness(draw, idx[0]);
                Surface {
                    rgb: self
                        .lights
                        .shade(normal, surface.rgb, roughness, metalness),
                    ..surface
                }
            } else {
                surface
            };

            let clip = local.map(|p| mvp * p.extend(1.0));
            self.stats.triangles += 1;
            let polygon = clip_near(&clip);
            for i in 1..polygon.len().saturating_sub(1) {
                let verts = [polygon[0], polygon[i], polygon[i + 1]];
                fill_triangle(target, viewport, verts.map(|v| to_screen(v, viewport)), surface);
            }
        }
    }

    fn surface(&self, draw: &DrawCall<'_>, vertex: usize) -> Option<Surface> {
        let surface = match draw.material {
            Material::Standard(color) => Surface {
                rgb: color.rgb(),
                opacity: color.opacity,
                exact: None,
            },
            Material::Flat { rgb, opacity } => Surface {
                rgb: rgb.map(|c| c as f32 / 255.0),
                opacity: *opacity,
                exact: (*opacity >= 1.0).then_some(*rgb),
            },
            Material::VertexColorRmo => {
                let colors = draw.vertex_colors?;
                let at = vertex * 3;
                let rgb = colors.color.get(at..at + 3)?;
                let opacity = *colors.rmo.get(at + 2)?;
                Surface {
                    rgb: [rgb[0], rgb[1], rgb[2]].map(|c| c as f32 / 255.0),
                    opacity: opacity as f32 / 255.0,
                    exact: None,
                }
            }
        };
        // Fully transparent surfaces contribute nothing.
        (surface.opacity > 0.0).then_some(surface)
    }

    fn roughness_metalness(&self, draw: &DrawCall<'_>, vertex: usize) -> (f32, f32) {
        match draw.material {
            Material::Standard(color) => (color.roughness, color.metalness),
            Material::VertexColorRmo => draw
                .vertex_colors
                .and_then(|c| c.rmo.get(vertex * 3..vertex * 3 + 2))
                .map(|rm| (rm[0] as f32 / 255.0, rm[1] as f32 / 255.0))
                .unwrap_or((1.0, 0.0)),
            Material::Flat { .. } => (1.0, 0.0),
        }
    }
}

/// Clips a clip-space triangle against `z >= -w`. An empty polygon means
/// the triangle is entirely behind the near plane.
fn clip_near(tri: &[Vec4; 3]) -> Vec<Vec4> {
    let inside = |v: &Vec4| v.z >= -v.w;
    if tri.iter().all(inside) {
        return tri.to_vec();
    }
    let mut out = Vec::with_capacity(4);
    for i in 0..3 {
        let a = tri[i];
        let b = tri[(i + 1) % 3];
        let (a_in, b_in) = (inside(&a), inside(&b));
        if a_in {
            out.push(a);
        }
        if a_in != b_in {
            let da = a.z + a.w;
            let db = b.z + b.w;
            let t = da / (da - db);
            out.push(a + (b - a) * t);
        }
    }
    if out.len() < 3 {
        out.clear();
    }
    out
}

fn to_screen(clip: Vec4, viewport: Viewport) -> ScreenVertex {
    let ndc = clip.truncate() / clip.w;
    ScreenVertex {
        x: viewport.x as f32 + (ndc.x * 0.5 + 0.5) * viewport.width as f32,
        y: viewport.y as f32 + (0.5 - ndc.y * 0.5) * viewport.height as f32,
        z: ndc.z * 0.5 + 0.5,
    }
}

fn edge(a: &ScreenVertex, b: &ScreenVertex, px: f32, py: f32) -> f32 {
    (b.x - a.x) * (py - a.y) - (b.y - a.y) * (px - a.x)
}

fn fill_triangle(target: &mut RenderTarget, viewport: Viewport, v: [ScreenVertex; 3], surface: Surface) {
    let area = edge(&v[0], &v[1], v[2].x, v[2].y);
    if area.abs() < 1e-12 || !area.is_finite() {
        return;
    }

    let min_x = v.iter().map(|p| p.x).fold(f32::INFINITY, f32::min).floor();
    let max_x = v.iter().map(|p| p.x).fold(f32::NEG_INFINITY, f32::max).ceil();
    let min_y = v.iter().map(|p| p.y).fold(f32::INFINITY, f32::min).floor();
    let max_y = v.iter().map(|p| p.y).fold(f32::NEG_INFINITY, f32::max).ceil();

    let x0 = min_x.max(viewport.x as f32) as u32;
    let y0 = min_y.max(viewport.y as f32) as u32;
    let x1 = max_x.min((viewport.x + viewport.width) as f32);
    let y1 = max_y.min((viewport.y + viewport.height) as f32);
    if x1 <= x0 as f32 || y1 <= y0 as f32 {
        return;
    }
    let (x1, y1) = (x1 as u32, y1 as u32);

    let sign = area.signum();
    for y in y0..y1 {
        let py = y as f32 + 0.5;
        for x in x0..x1 {
            let px = x as f32 + 0.5;
            let w0 = edge(&v[1], &v[2], px, py) * sign;
            let w1 = edge(&v[2], &v[0], px, py) * sign;
            let w2 = edge(&v[0], &v[1], px, py) * sign;
            if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                continue;
            }
            let z = (w0 * v[0].z + w1 * v[1].z + w2 * v[2].z) / (area * sign);
            if !(0.0..=1.0).contains(&z) || z >= target.depth_at(x, y) {
                continue;
            }
            if let Some(rgb) = surface.exact {
                target.write_exact(x, y, rgb);
                target.set_depth(x, y, z);
            } else if surface.opacity >= 1.0 {
                target.write_color(x, y, surface.rgb, 1.0);
                target.set_depth(x, y, z);
            } else {
                target.write_color(x, y, surface.rgb, surface.opacity);
            }
        }
    }
}
