use crate::{
    binding::{Drawable, ModelBinding},
    core::{Projection, Viewport},
    error::PuppetryResult,
};

const OPACITY_EPSILON: f32 = 1e-3;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlendMode {
    #[default]
    Normal,
    Additive,
    Multiplicative,
}

/// Borrowed triangle-list geometry handed to the backend.
#[derive(Clone, Copy, Debug)]
pub struct Mesh<'a> {
    pub positions: &'a [glam::Vec2],
    pub uvs: &'a [glam::Vec2],
    pub indices: &'a [u16],
    pub texture: usize,
}

/// Everything a backend needs to shade one drawable.
#[derive(Clone, Copy, Debug)]
pub struct DrawState {
    pub projection: Projection,
    pub opacity: f32,
    pub multiply_color: [f32; 4],
    pub screen_color: [f32; 4],
    pub blend: BlendMode,
    pub double_sided: bool,
    /// When set, the backend multiplies coverage by the mask accumulated
    /// since the last `begin_mask`/`end_mask` pair.
    pub masked: bool,
}

/// Drawing protocol the compositor speaks. Mask geometry is accumulated
/// between `begin_mask` and `end_mask` and consumed by the next masked
/// `draw_mesh`; backends own the mask surface.
pub trait RenderBackend {
    fn begin_frame(&mut self, viewport: Viewport) -> PuppetryResult<()>;
    fn begin_mask(&mut self) -> PuppetryResult<()>;
    fn draw_mask(&mut self, mesh: Mesh<'_>, opacity: f32, projection: Projection)
    -> PuppetryResult<()>;
    fn end_mask(&mut self) -> PuppetryResult<()>;
    fn draw_mesh(&mut self, mesh: Mesh<'_>, state: DrawState) -> PuppetryResult<()>;
    fn end_frame(&mut self) -> PuppetryResult<()>;
}

/// Walks the binding's drawables in paint order and issues backend calls,
/// regenerating the mask surface before every masked drawable.
#[derive(Clone, Copy, Debug, Default)]
pub struct Renderer;

impl Renderer {
    pub fn render(
        binding: &dyn ModelBinding,
        projection: Projection,
        viewport: Viewport,
        backend: &mut dyn RenderBackend,
    ) -> PuppetryResult<()> {
        let drawables = binding.drawables();
        let texture_count = binding.texture_count();

        // Paint order is render_order ascending; equal orders keep the
        // binding's drawable order.
        let mut order: Vec<usize> = (0..drawables.len()).collect();
        order.sort_by_key(|&i| (drawables[i].render_order, i));

        backend.begin_frame(viewport)?;

        for &i in &order {
            let drawable = &drawables[i];
            if !drawable.visible || drawable.opacity <= OPACITY_EPSILON {
                continue;
            }
            if !drawable.has_geometry() {
                tracing::debug!(id = %drawable.id, "drawable has no geometry");
                continue;
            }
            if drawable.texture >= texture_count {
                tracing::debug!(
                    id = %drawable.id,
                    texture = drawable.texture,
                    "drawable references missing texture"
                );
                continue;
            }

            let masked = !drawable.masks.is_empty();
            if masked {
                render_mask(drawable, drawables, texture_count, projection, backend)?;
            }

            backend.draw_mesh(
                Mesh {
                    positions: &drawable.positions,
                    uvs: &drawable.uvs,
                    indices: &drawable.indices,
                    texture: drawable.texture,
                },
                DrawState {
                    projection,
                    opacity: drawable.opacity,
                    multiply_color: drawable.multiply_color,
                    screen_color: drawable.screen_color,
                    blend: drawable.flags.blend,
                    double_sided: drawable.flags.double_sided,
                    masked,
                },
            )?;
        }

        backend.end_frame()
    }
}

/// Accumulates the drawable's mask sources into a fresh mask surface.
/// Invalid sources are skipped one by one; a fully invalid list still leaves
/// a valid (empty) mask so the masked drawable clips to nothing.
fn render_mask(
    drawable: &Drawable,
    drawables: &[Drawable],
    texture_count: usize,
    projection: Projection,
    backend: &mut dyn RenderBackend,
) -> PuppetryResult<()> {
    backend.begin_mask()?;
    for &source in &drawable.masks {
        let Some(mask) = drawables.get(source) else {
            tracing::debug!(id = %drawable.id, source, "mask source out of range");
            continue;
        };
        if !mask.has_geometry() || mask.texture >= texture_count {
            continue;
        }
        backend.draw_mask(
            Mesh {
                positions: &mask.positions,
                uvs: &mask.uvs,
                indices: &mask.indices,
                texture: mask.texture,
            },
            mask.opacity,
            projection,
        )?;
    }
    backend.end_mask()
}
