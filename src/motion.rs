use crate::{binding::ModelBinding, core::ParamHandle};

#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Keyframe {
    pub time: f32,
    pub value: f32,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct MotionCurve {
    pub param: String,
    keys: Vec<Keyframe>,
}

impl MotionCurve {
    /// Keys are sorted by time on construction; out-of-order descriptor
    /// data is tolerated, never trusted.
    pub fn new(param: impl Into<String>, mut keys: Vec<Keyframe>) -> Self {
        keys.sort_by(|a, b| a.time.total_cmp(&b.time));
        Self {
            param: param.into(),
            keys,
        }
    }

    pub fn keys(&self) -> &[Keyframe] {
        &self.keys
    }

    /// Flat extrapolation outside the key range, linear interpolation inside.
    pub fn evaluate(&self, t: f32) -> f32 {
        let Some(first) = self.keys.first() else {
            return 0.0;
        };
        let last = self.keys[self.keys.len() - 1];
        if t <= first.time {
            return first.value;
        }
        if t >= last.time {
            return last.value;
        }
        for i in 1..self.keys.len() {
            let k1 = self.keys[i];
            if t <= k1.time {
                let k0 = self.keys[i - 1];
                let span = k1.time - k0.time;
                let frac = if span > 0.0 { (t - k0.time) / span } else { 0.0 };
                return k0.value + (k1.value - k0.value) * frac;
            }
        }
        last.value
    }
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct MotionClip {
    pub duration: f32,
    pub loop_playback: bool,
    pub fade_in: f32,
    pub fade_out: f32,
    pub curves: Vec<MotionCurve>,
}

const FADE_EPSILON: f32 = 1e-3;

/// Clip bound to the current model: parameter handles resolved once, so the
/// per-frame path never touches names.
#[derive(Clone, Debug)]
struct BoundClip {
    clip: MotionClip,
    handles: Vec<Option<ParamHandle>>,
    playhead: f32,
}

impl BoundClip {
    fn bind(clip: MotionClip, binding: &dyn ModelBinding) -> Self {
        let handles = clip
            .curves
            .iter()
            .map(|c| {
                let handle = binding.param_index(&c.param);
                if handle.is_none() {
                    tracing::debug!(param = %c.param, "motion curve targets unknown parameter");
                }
                handle
            })
            .collect();
        Self {
            clip,
            handles,
            playhead: 0.0,
        }
    }
}

/// Idle motion establishes the per-frame baseline; one optional active motion
/// blends over it with a fade envelope and a priority gate.
#[derive(Clone, Debug, Default)]
pub struct MotionLayer {
    idle: Option<BoundClip>,
    active: Option<BoundClip>,
    active_priority: i32,
}

impl MotionLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.idle = None;
        self.active = None;
        self.active_priority = 0;
    }

    pub fn set_idle(&mut self, clip: MotionClip, binding: &dyn ModelBinding) {
        self.idle = Some(BoundClip::bind(clip, binding));
    }

    pub fn has_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_priority(&self) -> i32 {
        self.active_priority
    }

    /// Rejected (returns false) while a strictly higher-priority motion is
    /// still playing; otherwise replaces it and rewinds to zero.
    pub fn start(&mut self, clip: MotionClip, priority: i32, binding: &dyn ModelBinding) -> bool {
        if self.active.is_some() && priority < self.active_priority {
            tracing::debug!(
                priority,
                current = self.active_priority,
                "motion rejected by priority"
            );
            return false;
        }
        self.active = Some(BoundClip::bind(clip, binding));
        self.active_priority = priority;
        true
    }

    pub fn advance(&mut self, dt: f32, binding: &mut dyn ModelBinding) {
        self.advance_idle(dt, binding);
        self.advance_active(dt, binding);
    }

    fn advance_idle(&mut self, dt: f32, binding: &mut dyn ModelBinding) {
        let Some(idle) = &mut self.idle else { return };
        idle.playhead += dt;
        if idle.clip.loop_playback && idle.playhead >= idle.clip.duration && idle.clip.duration > 0.0
        {
            idle.playhead %= idle.clip.duration;
        }

        let params = binding.params_mut();
        for (curve, handle) in idle.clip.curves.iter().zip(&idle.handles) {
            let Some(ParamHandle(idx)) = *handle else {
                continue;
            };
            params.values[idx] = curve
                .evaluate(idle.playhead)
                .clamp(params.minimums[idx], params.maximums[idx]);
        }
    }

    fn advance_active(&mut self, dt: f32, binding: &mut dyn ModelBinding) {
        let Some(active) = &mut self.active else { return };
        active.playhead += dt;

        let clip = &active.clip;
        let mut weight = 1.0f32;
        if active.playhead < clip.fade_in && clip.fade_in > FADE_EPSILON {
            weight = active.playhead / clip.fade_in;
        } else if !clip.loop_playback
            && active.playhead > clip.duration - clip.fade_out
            && clip.fade_out > FADE_EPSILON
        {
            weight = ((clip.duration - active.playhead) / clip.fade_out).max(0.0);
        }

        if !clip.loop_playback && active.playhead >= clip.duration {
            self.active = None;
            self.active_priority = 0;
            return;
        }

        let playhead = active.playhead;
        let params = binding.params_mut();
        for (curve, handle) in clip.curves.iter().zip(&active.handles) {
            let Some(ParamHandle(idx)) = *handle else {
                continue;
            };
            let target = curve
                .evaluate(playhead)
                .clamp(params.minimums[idx], params.maximums[idx]);
            params.values[idx] = params.values[idx] * (1.0 - weight) + target * weight;
        }
    }
}
