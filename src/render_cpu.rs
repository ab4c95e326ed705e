//! Reference software backend. Slow and simple: premultiplied f32
//! framebuffer, barycentric rasterization at pixel centers, nearest-neighbor
//! sampling. Exists for headless hosts and for pinning down compositing
//! semantics that GPU backends must reproduce.

use glam::Vec2;

use crate::{
    core::{Projection, Viewport},
    error::{PuppetryError, PuppetryResult},
    render::{BlendMode, DrawState, Mesh, RenderBackend},
};

/// Straight-alpha RGBA8 texture.
#[derive(Clone, Debug)]
pub struct Texture {
    pub width: usize,
    pub height: usize,
    pub rgba: Vec<u8>,
}

impl Texture {
    pub fn solid(width: usize, height: usize, rgba: [u8; 4]) -> Self {
        Self {
            width,
            height,
            rgba: rgba.repeat(width * height),
        }
    }

    /// Nearest sample, clamped; (0,0) is the bottom-left corner.
    fn sample(&self, uv: Vec2) -> [f32; 4] {
        if self.width == 0 || self.height == 0 {
            return [0.0; 4];
        }
        let tx = ((uv.x * self.width as f32) as isize).clamp(0, self.width as isize - 1) as usize;
        let ty = (((1.0 - uv.y) * self.height as f32) as isize)
            .clamp(0, self.height as isize - 1) as usize;
        let at = (ty * self.width + tx) * 4;
        [
            self.rgba[at] as f32 / 255.0,
            self.rgba[at + 1] as f32 / 255.0,
            self.rgba[at + 2] as f32 / 255.0,
            self.rgba[at + 3] as f32 / 255.0,
        ]
    }
}

#[derive(Clone, Debug, Default)]
pub struct CpuBackend {
    textures: Vec<Texture>,
    viewport: Viewport,
    /// Premultiplied RGBA, row 0 at the top.
    frame: Vec<[f32; 4]>,
    mask: Vec<f32>,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_texture(&mut self, texture: Texture) -> usize {
        self.textures.push(texture);
        self.textures.len() - 1
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Premultiplied pixel at (x, y), y down from the top-left.
    pub fn pixel(&self, x: usize, y: usize) -> [f32; 4] {
        self.frame[y * self.viewport.width as usize + x]
    }

    pub fn mask_value(&self, x: usize, y: usize) -> f32 {
        self.mask[y * self.viewport.width as usize + x]
    }

    fn texture(&self, index: usize) -> PuppetryResult<&Texture> {
        self.textures
            .get(index)
            .ok_or_else(|| PuppetryError::render(format!("no texture in slot {index}")))
    }

    fn to_pixel(&self, projection: Projection, p: Vec2) -> Vec2 {
        let ndc = projection.apply(p);
        Vec2::new(
            (ndc.x * 0.5 + 0.5) * self.viewport.width as f32,
            (1.0 - (ndc.y * 0.5 + 0.5)) * self.viewport.height as f32,
        )
    }
}

struct Fragment {
    x: usize,
    y: usize,
    uv: Vec2,
}

/// Walks every covered pixel center of one triangle. `cull_backfaces`
/// rejects triangles wound clockwise in NDC (the pixel-space cross flips
/// sign because y points down).
fn rasterize(
    viewport: Viewport,
    a: Vec2,
    b: Vec2,
    c: Vec2,
    uv_a: Vec2,
    uv_b: Vec2,
    uv_c: Vec2,
    cull_backfaces: bool,
    mut emit: impl FnMut(Fragment),
) {
    let area = (b - a).perp_dot(c - a);
    if area == 0.0 {
        return;
    }
    if cull_backfaces && area > 0.0 {
        return;
    }

    let min_x = a.x.min(b.x).min(c.x).floor().max(0.0) as usize;
    let min_y = a.y.min(b.y).min(c.y).floor().max(0.0) as usize;
    let max_x = (a.x.max(b.x).max(c.x).ceil() as usize).min(viewport.width as usize);
    let max_y = (a.y.max(b.y).max(c.y).ceil() as usize).min(viewport.height as usize);

    for y in min_y..max_y {
        for x in min_x..max_x {
            let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
            let w0 = (b - p).perp_dot(c - p) / area;
            let w1 = (c - p).perp_dot(a - p) / area;
            let w2 = (a - p).perp_dot(b - p) / area;
            if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                continue;
            }
            emit(Fragment {
                x,
                y,
                uv: uv_a * w0 + uv_b * w1 + uv_c * w2,
            });
        }
    }
}

impl RenderBackend for CpuBackend {
    fn begin_frame(&mut self, viewport: Viewport) -> PuppetryResult<()> {
        if viewport.is_empty() {
            return Err(PuppetryError::render("empty viewport"));
        }
        self.viewport = viewport;
        let pixels = viewport.width as usize * viewport.height as usize;
        self.frame.clear();
        self.frame.resize(pixels, [0.0; 4]);
        self.mask.clear();
        self.mask.resize(pixels, 0.0);
        Ok(())
    }

    fn begin_mask(&mut self) -> PuppetryResult<()> {
        self.mask.fill(0.0);
        Ok(())
    }

    fn draw_mask(
        &mut self,
        mesh: Mesh<'_>,
        opacity: f32,
        projection: Projection,
    ) -> PuppetryResult<()> {
        let texture = self.texture(mesh.texture)?.clone();
        let viewport = self.viewport;
        let width = viewport.width as usize;
        let vertex_count = mesh.positions.len().min(mesh.uvs.len());

        for tri in mesh.indices.chunks_exact(3) {
            let [i0, i1, i2] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
            if i0 >= vertex_count || i1 >= vertex_count || i2 >= vertex_count {
                tracing::debug!(i0, i1, i2, vertex_count, "index out of range, triangle skipped");
                continue;
            }
            rasterize(
                viewport,
                self.to_pixel(projection, mesh.positions[i0]),
                self.to_pixel(projection, mesh.positions[i1]),
                self.to_pixel(projection, mesh.positions[i2]),
                mesh.uvs[i0],
                mesh.uvs[i1],
                mesh.uvs[i2],
                false,
                |frag| {
                    let alpha = texture.sample(frag.uv)[3] * opacity;
                    let at = frag.y * width + frag.x;
                    self.mask[at] = (self.mask[at] + alpha).min(1.0);
                },
            );
        }
        Ok(())
    }

    fn end_mask(&mut self) -> PuppetryResult<()> {
        Ok(())
    }

    fn draw_mesh(&mut self, mesh: Mesh<'_>, state: DrawState) -> PuppetryResult<()> {
        let texture = self.texture(mesh.texture)?.clone();
        let viewport = self.viewport;
        let width = viewport.width as usize;
        let mc = state.multiply_color;
        let sc = state.screen_color;
        let vertex_count = mesh.positions.len().min(mesh.uvs.len());

        for tri in mesh.indices.chunks_exact(3) {
            let [i0, i1, i2] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
            if i0 >= vertex_count || i1 >= vertex_count || i2 >= vertex_count {
                tracing::debug!(i0, i1, i2, vertex_count, "index out of range, triangle skipped");
                continue;
            }
            rasterize(
                viewport,
                self.to_pixel(state.projection, mesh.positions[i0]),
                self.to_pixel(state.projection, mesh.positions[i1]),
                self.to_pixel(state.projection, mesh.positions[i2]),
                mesh.uvs[i0],
                mesh.uvs[i1],
                mesh.uvs[i2],
                !state.double_sided,
                |frag| {
                    let sample = texture.sample(frag.uv);
                    // Premultiply, then clip, tint and fade.
                    let mut c = [
                        sample[0] * sample[3],
                        sample[1] * sample[3],
                        sample[2] * sample[3],
                        sample[3],
                    ];
                    let at = frag.y * width + frag.x;
                    if state.masked {
                        let m = self.mask[at];
                        for ch in &mut c {
                            *ch *= m;
                        }
                    }
                    for ch in 0..3 {
                        c[ch] *= mc[ch];
                        c[ch] = (c[ch] + sc[ch] * c[3] - c[ch] * sc[ch]).clamp(0.0, 1.0);
                    }
                    for ch in &mut c {
                        *ch *= state.opacity;
                    }

                    let dst = &mut self.frame[at];
                    match state.blend {
                        BlendMode::Normal => {
                            let inv = 1.0 - c[3];
                            for ch in 0..4 {
                                dst[ch] = c[ch] + dst[ch] * inv;
                            }
                        }
                        BlendMode::Additive => {
                            for ch in 0..3 {
                                dst[ch] = (dst[ch] + c[ch]).min(1.0);
                            }
                        }
                        BlendMode::Multiplicative => {
                            let inv = 1.0 - c[3];
                            for ch in 0..3 {
                                dst[ch] = dst[ch] * c[ch] + dst[ch] * inv;
                            }
                        }
                    }
                },
            );
        }
        Ok(())
    }

    fn end_frame(&mut self) -> PuppetryResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> (Vec<Vec2>, Vec<Vec2>, Vec<u16>) {
        // Full NDC quad, CCW winding.
        let positions = vec![
            Vec2::new(-1.0, -1.0),
            Vec2::new(1.0, -1.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(-1.0, 1.0),
        ];
        let uvs = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(0.0, 1.0),
        ];
        (positions, uvs, vec![0, 1, 2, 0, 2, 3])
    }

    fn state() -> DrawState {
        DrawState {
            projection: Projection::default(),
            opacity: 1.0,
            multiply_color: [1.0; 4],
            screen_color: [0.0; 4],
            blend: BlendMode::Normal,
            double_sided: false,
            masked: false,
        }
    }

    fn draw_full_quad(backend: &mut CpuBackend, texture: usize, state: DrawState) {
        let (positions, uvs, indices) = quad();
        backend
            .draw_mesh(
                Mesh {
                    positions: &positions,
                    uvs: &uvs,
                    indices: &indices,
                    texture,
                },
                state,
            )
            .unwrap();
    }

    #[test]
    fn opaque_quad_covers_the_frame() {
        let mut backend = CpuBackend::new();
        let tex = backend.add_texture(Texture::solid(2, 2, [255, 0, 0, 255]));
        backend.begin_frame(Viewport::new(8, 8)).unwrap();
        draw_full_quad(&mut backend, tex, state());

        for y in 0..8 {
            for x in 0..8 {
                assert_eq!(backend.pixel(x, y), [1.0, 0.0, 0.0, 1.0]);
            }
        }
    }

    #[test]
    fn clockwise_triangles_are_culled_unless_double_sided() {
        let positions = vec![Vec2::new(-1.0, 1.0), Vec2::new(1.0, 1.0), Vec2::new(-1.0, -1.0)];
        let uvs = vec![Vec2::ZERO; 3];
        let indices = vec![0, 1, 2]; // CW in NDC
        let mesh = |texture| Mesh {
            positions: &positions,
            uvs: &uvs,
            indices: &indices,
            texture,
        };

        let mut backend = CpuBackend::new();
        let tex = backend.add_texture(Texture::solid(1, 1, [255, 255, 255, 255]));
        backend.begin_frame(Viewport::new(4, 4)).unwrap();
        backend.draw_mesh(mesh(tex), state()).unwrap();
        assert_eq!(backend.pixel(0, 0)[3], 0.0);

        let mut two_sided = state();
        two_sided.double_sided = true;
        backend.draw_mesh(mesh(tex), two_sided).unwrap();
        assert_eq!(backend.pixel(0, 0)[3], 1.0);
    }

    #[test]
    fn normal_blend_is_source_over() {
        let mut backend = CpuBackend::new();
        let red = backend.add_texture(Texture::solid(1, 1, [255, 0, 0, 255]));
        let half_green = backend.add_texture(Texture::solid(1, 1, [0, 255, 0, 128]));
        backend.begin_frame(Viewport::new(2, 2)).unwrap();
        draw_full_quad(&mut backend, red, state());
        draw_full_quad(&mut backend, half_green, state());

        let a = 128.0 / 255.0;
        let px = backend.pixel(0, 0);
        assert!((px[0] - (1.0 - a)).abs() < 1e-3);
        assert!((px[1] - a).abs() < 1e-3);
        assert!((px[3] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn additive_blend_sums_and_keeps_alpha() {
        let mut backend = CpuBackend::new();
        let dim = backend.add_texture(Texture::solid(1, 1, [64, 64, 64, 255]));
        backend.begin_frame(Viewport::new(2, 2)).unwrap();
        draw_full_quad(&mut backend, dim, state());
        let mut additive = state();
        additive.blend = BlendMode::Additive;
        draw_full_quad(&mut backend, dim, additive);

        let px = backend.pixel(0, 0);
        assert!((px[0] - 2.0 * 64.0 / 255.0).abs() < 1e-3);
        assert!((px[3] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn multiplicative_blend_darkens() {
        let mut backend = CpuBackend::new();
        let white = backend.add_texture(Texture::solid(1, 1, [255, 255, 255, 255]));
        let half = backend.add_texture(Texture::solid(1, 1, [128, 128, 128, 255]));
        backend.begin_frame(Viewport::new(2, 2)).unwrap();
        draw_full_quad(&mut backend, white, state());
        let mut multiply = state();
        multiply.blend = BlendMode::Multiplicative;
        draw_full_quad(&mut backend, half, multiply);

        let px = backend.pixel(0, 0);
        assert!((px[0] - 128.0 / 255.0).abs() < 1e-3);
    }

    #[test]
    fn screen_color_brightens_toward_white() {
        let mut backend = CpuBackend::new();
        let red = backend.add_texture(Texture::solid(1, 1, [255, 0, 0, 255]));
        backend.begin_frame(Viewport::new(2, 2)).unwrap();
        let mut screened = state();
        screened.screen_color = [0.0, 1.0, 0.0, 1.0];
        draw_full_quad(&mut backend, red, screened);

        // red screened with green: both channels saturate.
        let px = backend.pixel(0, 0);
        assert!((px[0] - 1.0).abs() < 1e-6);
        assert!((px[1] - 1.0).abs() < 1e-6);
        assert_eq!(px[2], 0.0);
    }

    #[test]
    fn mask_accumulates_and_saturates() {
        let mut backend = CpuBackend::new();
        let half = backend.add_texture(Texture::solid(1, 1, [255, 255, 255, 160]));
        backend.begin_frame(Viewport::new(4, 4)).unwrap();
        backend.begin_mask().unwrap();

        let (positions, uvs, indices) = quad();
        let mesh = Mesh {
            positions: &positions,
            uvs: &uvs,
            indices: &indices,
            texture: half,
        };
        backend.draw_mask(mesh, 1.0, Projection::default()).unwrap();
        assert!((backend.mask_value(1, 1) - 160.0 / 255.0).abs() < 1e-3);
        backend.draw_mask(mesh, 1.0, Projection::default()).unwrap();
        assert_eq!(backend.mask_value(1, 1), 1.0);
        backend.end_mask().unwrap();
    }

    #[test]
    fn masked_draw_clips_to_mask_coverage() {
        let mut backend = CpuBackend::new();
        let white = backend.add_texture(Texture::solid(1, 1, [255, 255, 255, 255]));
        backend.begin_frame(Viewport::new(4, 4)).unwrap();

        // Left half mask.
        backend.begin_mask().unwrap();
        let positions = vec![
            Vec2::new(-1.0, -1.0),
            Vec2::new(0.0, -1.0),
            Vec2::new(0.0, 1.0),
            Vec2::new(-1.0, 1.0),
        ];
        let uvs = vec![Vec2::ZERO; 4];
        let indices = vec![0u16, 1, 2, 0, 2, 3];
        backend
            .draw_mask(
                Mesh {
                    positions: &positions,
                    uvs: &uvs,
                    indices: &indices,
                    texture: white,
                },
                1.0,
                Projection::default(),
            )
            .unwrap();
        backend.end_mask().unwrap();

        let mut masked = state();
        masked.masked = true;
        draw_full_quad(&mut backend, white, masked);

        assert_eq!(backend.pixel(0, 1)[3], 1.0);
        assert_eq!(backend.pixel(3, 1)[3], 0.0);
    }

    #[test]
    fn out_of_range_indices_skip_the_triangle() {
        let mut backend = CpuBackend::new();
        let tex = backend.add_texture(Texture::solid(1, 1, [255, 255, 255, 255]));
        backend.begin_frame(Viewport::new(4, 4)).unwrap();

        let (positions, uvs, _) = quad();
        // Second triangle references a vertex that does not exist.
        let indices = vec![0u16, 1, 2, 0, 2, 9];
        let mesh = Mesh {
            positions: &positions,
            uvs: &uvs,
            indices: &indices,
            texture: tex,
        };
        backend.draw_mesh(mesh, state()).unwrap();
        backend.begin_mask().unwrap();
        backend.draw_mask(mesh, 1.0, Projection::default()).unwrap();

        // The valid lower-right triangle still lands.
        assert_eq!(backend.pixel(3, 3)[3], 1.0);
        assert_eq!(backend.mask_value(3, 3), 1.0);
    }

    #[test]
    fn missing_texture_slot_is_an_error() {
        let mut backend = CpuBackend::new();
        backend.begin_frame(Viewport::new(2, 2)).unwrap();
        let (positions, uvs, indices) = quad();
        let err = backend
            .draw_mesh(
                Mesh {
                    positions: &positions,
                    uvs: &uvs,
                    indices: &indices,
                    texture: 0,
                },
                state(),
            )
            .unwrap_err();
        assert!(err.to_string().contains("render error:"));
    }
}
