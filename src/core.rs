use glam::Vec2;

/// Index into the binding's parameter arrays, resolved once per load.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ParamHandle(pub usize);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Host-controlled zoom and pan, offsets in NDC (-1..1).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UserTransform {
    pub scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl Default for UserTransform {
    fn default() -> Self {
        Self {
            scale: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
        }
    }
}

/// Model canvas metadata reported by the binding (model units are
/// pixels / pixels_per_unit).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CanvasInfo {
    pub width: f32,
    pub height: f32,
    pub origin_x: f32,
    pub origin_y: f32,
    pub pixels_per_unit: f32,
}

impl Default for CanvasInfo {
    fn default() -> Self {
        Self {
            width: 2.0,
            height: 2.0,
            origin_x: 1.0,
            origin_y: 1.0,
            pixels_per_unit: 1.0,
        }
    }
}

/// 2D scale + translate mapping model space to NDC.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Projection {
    pub scale: Vec2,
    pub translate: Vec2,
}

impl Default for Projection {
    fn default() -> Self {
        Self {
            scale: Vec2::ONE,
            translate: Vec2::ZERO,
        }
    }
}

impl Projection {
    /// Fits the model canvas into the viewport preserving aspect, recenters
    /// on the canvas origin, then applies the user zoom/pan.
    pub fn fit(canvas: CanvasInfo, viewport: Viewport, user: UserTransform) -> Self {
        if viewport.is_empty() || canvas.pixels_per_unit <= 0.0 {
            return Self::default();
        }

        let model_w = canvas.width / canvas.pixels_per_unit;
        let model_h = canvas.height / canvas.pixels_per_unit;
        if model_w <= 0.0 || model_h <= 0.0 {
            return Self::default();
        }

        let view_w = viewport.width as f32;
        let view_h = viewport.height as f32;
        let model_aspect = model_w / model_h;
        let view_aspect = view_w / view_h;

        let (mut sx, mut sy) = if view_aspect > model_aspect {
            let sy = 2.0 / model_h;
            (sy * (view_h / view_w), sy)
        } else {
            let sx = 2.0 / model_w;
            (sx, sx * (view_w / view_h))
        };

        let center_x = (canvas.width / 2.0 - canvas.origin_x) / canvas.pixels_per_unit;
        let center_y = (canvas.origin_y - canvas.height / 2.0) / canvas.pixels_per_unit;
        let mut tx = -center_x * sx;
        let mut ty = -center_y * sy;

        sx *= user.scale;
        sy *= user.scale;
        tx = tx * user.scale + user.offset_x;
        ty = ty * user.scale + user.offset_y;

        Self {
            scale: Vec2::new(sx, sy),
            translate: Vec2::new(tx, ty),
        }
    }

    pub fn apply(self, p: Vec2) -> Vec2 {
        p * self.scale + self.translate
    }
}
