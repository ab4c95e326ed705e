use std::collections::BTreeMap;

use glam::Vec2;

use crate::{
    core::{CanvasInfo, ParamHandle},
    render::BlendMode,
};

/// One renderable mesh piece, recomputed by the binding's `update` step.
#[derive(Clone, Debug)]
pub struct Drawable {
    pub id: String,
    pub render_order: i32,
    pub texture: usize,
    pub positions: Vec<Vec2>,
    pub uvs: Vec<Vec2>,
    pub indices: Vec<u16>,
    pub opacity: f32,
    pub multiply_color: [f32; 4],
    pub screen_color: [f32; 4],
    pub visible: bool,
    pub flags: ConstantFlags,
    /// Indices of drawables whose alpha clips this one.
    pub masks: Vec<usize>,
}

impl Drawable {
    pub fn has_geometry(&self) -> bool {
        !self.positions.is_empty() && !self.indices.is_empty()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConstantFlags {
    pub double_sided: bool,
    pub blend: BlendMode,
}

/// Split mutable borrow of the parameter arrays for the per-frame path.
pub struct ParamsMut<'a> {
    pub values: &'a mut [f32],
    pub defaults: &'a [f32],
    pub minimums: &'a [f32],
    pub maximums: &'a [f32],
}

/// Boundary to the rigged-model runtime that owns parameter, part and
/// drawable storage. The animation pipeline only ever holds handles into
/// these arrays; it never owns them.
pub trait ModelBinding {
    fn canvas_info(&self) -> CanvasInfo;

    fn param_count(&self) -> usize;
    fn param_index(&self, name: &str) -> Option<ParamHandle>;
    fn param_values(&self) -> &[f32];
    fn param_values_mut(&mut self) -> &mut [f32];
    fn param_defaults(&self) -> &[f32];
    fn param_minimums(&self) -> &[f32];
    fn param_maximums(&self) -> &[f32];
    fn params_mut(&mut self) -> ParamsMut<'_>;

    fn part_index(&self, name: &str) -> Option<usize>;
    fn part_opacities_mut(&mut self) -> &mut [f32];

    fn drawables(&self) -> &[Drawable];
    fn texture_count(&self) -> usize;

    /// Recompute drawable geometry/opacity/order from current parameters.
    fn update(&mut self);

    /// Clear one-shot per-drawable dynamic flags raised by `update`.
    fn reset_dynamic_flags(&mut self);
}

/// In-memory `ModelBinding` for tests and headless hosts. Geometry is static;
/// `update` only republishes what was stored.
#[derive(Clone, Debug, Default)]
pub struct MemoryModel {
    canvas: CanvasInfo,
    param_names: BTreeMap<String, usize>,
    values: Vec<f32>,
    defaults: Vec<f32>,
    minimums: Vec<f32>,
    maximums: Vec<f32>,
    part_names: BTreeMap<String, usize>,
    part_opacities: Vec<f32>,
    drawables: Vec<Drawable>,
    texture_count: usize,
}

impl MemoryModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_canvas(mut self, canvas: CanvasInfo) -> Self {
        self.canvas = canvas;
        self
    }

    pub fn add_param(&mut self, name: &str, default: f32, min: f32, max: f32) -> ParamHandle {
        let idx = self.values.len();
        self.param_names.insert(name.to_string(), idx);
        self.values.push(default);
        self.defaults.push(default);
        self.minimums.push(min);
        self.maximums.push(max);
        ParamHandle(idx)
    }

    pub fn add_part(&mut self, name: &str) -> usize {
        let idx = self.part_opacities.len();
        self.part_names.insert(name.to_string(), idx);
        self.part_opacities.push(1.0);
        idx
    }

    pub fn add_drawable(&mut self, drawable: Drawable) -> usize {
        self.texture_count = self.texture_count.max(drawable.texture + 1);
        self.drawables.push(drawable);
        self.drawables.len() - 1
    }

    pub fn part_opacity(&self, index: usize) -> f32 {
        self.part_opacities[index]
    }

    pub fn set_drawable_opacity(&mut self, index: usize, opacity: f32) {
        self.drawables[index].opacity = opacity;
    }
}

impl ModelBinding for MemoryModel {
    fn canvas_info(&self) -> CanvasInfo {
        self.canvas
    }

    fn param_count(&self) -> usize {
        self.values.len()
    }

    fn param_index(&self, name: &str) -> Option<ParamHandle> {
        self.param_names.get(name).copied().map(ParamHandle)
    }

    fn param_values(&self) -> &[f32] {
        &self.values
    }

    fn param_values_mut(&mut self) -> &mut [f32] {
        &mut self.values
    }

    fn param_defaults(&self) -> &[f32] {
        &self.defaults
    }

    fn param_minimums(&self) -> &[f32] {
        &self.minimums
    }

    fn param_maximums(&self) -> &[f32] {
        &self.maximums
    }

    fn params_mut(&mut self) -> ParamsMut<'_> {
        ParamsMut {
            values: &mut self.values,
            defaults: &self.defaults,
            minimums: &self.minimums,
            maximums: &self.maximums,
        }
    }

    fn part_index(&self, name: &str) -> Option<usize> {
        self.part_names.get(name).copied()
    }

    fn part_opacities_mut(&mut self) -> &mut [f32] {
        &mut self.part_opacities
    }

    fn drawables(&self) -> &[Drawable] {
        &self.drawables
    }

    fn texture_count(&self) -> usize {
        self.texture_count
    }

    fn update(&mut self) {}

    fn reset_dynamic_flags(&mut self) {}
}
