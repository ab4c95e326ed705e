use crate::binding::ModelBinding;

/// Opacity change per second during a crossfade.
const FADE_SPEED: f32 = 5.0;

#[derive(Clone, Debug)]
pub struct PosePart {
    pub part: usize,
    /// Parts that mirror this one's opacity without joining dominance
    /// selection.
    pub links: Vec<usize>,
}

/// Mutually exclusive parts; at most one member is heading toward opaque at
/// any instant, the rest fade out.
#[derive(Clone, Debug)]
pub struct PoseGroup {
    pub parts: Vec<PosePart>,
}

#[derive(Clone, Debug, Default)]
pub struct PoseLayer {
    groups: Vec<PoseGroup>,
}

impl PoseLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.groups.clear();
    }

    /// Installs the groups and seats the initial pose: first member of each
    /// group opaque, all others hidden.
    pub fn load(&mut self, groups: Vec<PoseGroup>, binding: &mut dyn ModelBinding) {
        self.groups = groups;
        let opacities = binding.part_opacities_mut();
        for group in &self.groups {
            for (i, part) in group.parts.iter().enumerate() {
                if part.part >= opacities.len() {
                    continue;
                }
                opacities[part.part] = if i == 0 { 1.0 } else { 0.0 };
            }
        }
    }

    pub fn advance(&mut self, dt: f32, binding: &mut dyn ModelBinding) {
        let opacities = binding.part_opacities_mut();
        for group in &self.groups {
            // Dominance is re-derived from current opacities every frame;
            // ties keep the first index.
            let mut dominant = 0usize;
            let mut max_opacity = 0.0f32;
            for (i, part) in group.parts.iter().enumerate() {
                if part.part >= opacities.len() {
                    continue;
                }
                let op = opacities[part.part];
                if op > max_opacity {
                    max_opacity = op;
                    dominant = i;
                }
            }

            for (i, part) in group.parts.iter().enumerate() {
                if part.part >= opacities.len() {
                    continue;
                }
                let opacity = &mut opacities[part.part];
                if i == dominant {
                    *opacity = (*opacity + dt * FADE_SPEED).min(1.0);
                } else {
                    *opacity = (*opacity - dt * FADE_SPEED).max(0.0);
                }
                let mirrored = *opacity;
                for &link in &part.links {
                    if link < opacities.len() {
                        opacities[link] = mirrored;
                    }
                }
            }
        }
    }
}
