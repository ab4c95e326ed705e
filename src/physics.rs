use glam::Vec2;

use crate::{binding::ModelBinding, core::ParamHandle};

/// Divisor applied to the gravity-direction delta before rotating a chain arm.
const AIR_RESISTANCE: f32 = 5.0;
/// Physics time is authored against a 30 fps reference clock.
const DELAY_FACTOR: f32 = 30.0;
/// Horizontal positions below this are snapped to exactly zero.
const MOVEMENT_THRESHOLD: f32 = 1e-3;
const EPSILON: f32 = 1e-4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum InputAxis {
    Linear,
    Angular,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct PhysicsInput {
    pub source: String,
    /// 0-100.
    pub weight: f32,
    pub axis: InputAxis,
    pub reflect: bool,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct PhysicsOutput {
    pub dest: String,
    /// Index into the particle chain; 0 (the root) never produces output.
    pub particle: usize,
    pub scale: f32,
    /// 0-100.
    pub weight: f32,
    pub reflect: bool,
}

#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct Particle {
    pub position: Vec2,
    pub last_position: Vec2,
    pub velocity: Vec2,
    pub force: Vec2,
    pub last_gravity: Vec2,
    pub mobility: f32,
    pub delay: f32,
    pub acceleration: f32,
    pub radius: f32,
}

impl Default for Particle {
    fn default() -> Self {
        Self {
            position: Vec2::ZERO,
            last_position: Vec2::ZERO,
            velocity: Vec2::ZERO,
            force: Vec2::ZERO,
            last_gravity: Vec2::new(0.0, 1.0),
            mobility: 1.0,
            delay: 1.0,
            acceleration: 1.0,
            radius: 0.0,
        }
    }
}

#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct NormRange {
    pub minimum: f32,
    pub default: f32,
    pub maximum: f32,
}

impl Default for NormRange {
    fn default() -> Self {
        Self {
            minimum: -10.0,
            default: 0.0,
            maximum: 10.0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Normalization {
    pub position: NormRange,
    pub angle: NormRange,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct PhysicsSubRig {
    pub inputs: Vec<PhysicsInput>,
    pub outputs: Vec<PhysicsOutput>,
    /// Ordered chain, index 0 = root.
    pub particles: Vec<Particle>,
    pub normalization: Normalization,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct PhysicsRig {
    pub sub_rigs: Vec<PhysicsSubRig>,
    pub gravity: Vec2,
    pub wind: Vec2,
    pub fps: f32,
}

impl Default for PhysicsRig {
    fn default() -> Self {
        Self {
            sub_rigs: Vec::new(),
            gravity: Vec2::new(0.0, -1.0),
            wind: Vec2::ZERO,
            fps: 60.0,
        }
    }
}

#[derive(Clone, Debug, Default)]
struct BoundSubRig {
    inputs: Vec<Option<ParamHandle>>,
    outputs: Vec<Option<ParamHandle>>,
}

/// Spring-chain simulator: blended parameters force each chain, simulated
/// swing angles are written back into other parameters.
#[derive(Clone, Debug, Default)]
pub struct PhysicsLayer {
    rig: PhysicsRig,
    bound: Vec<BoundSubRig>,
}

impl PhysicsLayer {
    /// Resolves input/output parameter names once and seats every chain at
    /// rest, hanging in the +Y reference direction.
    pub fn new(mut rig: PhysicsRig, binding: &dyn ModelBinding) -> Self {
        let bound = rig
            .sub_rigs
            .iter()
            .map(|sub| BoundSubRig {
                inputs: sub
                    .inputs
                    .iter()
                    .map(|i| {
                        let handle = binding.param_index(&i.source);
                        if handle.is_none() {
                            tracing::debug!(param = %i.source, "physics input targets unknown parameter");
                        }
                        handle
                    })
                    .collect(),
                outputs: sub
                    .outputs
                    .iter()
                    .map(|o| {
                        let handle = binding.param_index(&o.dest);
                        if handle.is_none() {
                            tracing::debug!(param = %o.dest, "physics output targets unknown parameter");
                        }
                        handle
                    })
                    .collect(),
            })
            .collect();

        for sub in &mut rig.sub_rigs {
            let mut y = 0.0;
            for (i, particle) in sub.particles.iter_mut().enumerate() {
                if i > 0 {
                    y += particle.radius;
                }
                particle.position = Vec2::new(0.0, y);
                particle.last_position = particle.position;
                particle.velocity = Vec2::ZERO;
                particle.force = Vec2::ZERO;
                particle.last_gravity = Vec2::new(0.0, 1.0);
            }
        }

        Self { rig, bound }
    }

    pub fn rig(&self) -> &PhysicsRig {
        &self.rig
    }

    pub fn simulate(&mut self, dt: f32, binding: &mut dyn ModelBinding) {
        let wind = self.rig.wind;
        let params = binding.params_mut();

        for (sub, bound) in self.rig.sub_rigs.iter_mut().zip(&self.bound) {
            // 1. Aggregate forcing inputs into a linear and an angular total.
            let mut total_angle = 0.0f32;
            let mut total_x = 0.0f32;
            for (input, handle) in sub.inputs.iter().zip(&bound.inputs) {
                let Some(ParamHandle(idx)) = *handle else {
                    continue;
                };
                let range = match input.axis {
                    InputAxis::Angular => sub.normalization.angle,
                    InputAxis::Linear => sub.normalization.position,
                };
                let mut normalized = normalize_input(
                    params.values[idx],
                    params.minimums[idx],
                    params.maximums[idx],
                    params.defaults[idx],
                    range,
                );
                if input.reflect {
                    normalized = -normalized;
                }
                let w = input.weight / 100.0;
                match input.axis {
                    InputAxis::Angular => total_angle += normalized * w,
                    InputAxis::Linear => total_x += normalized * w,
                }
            }

            if sub.particles.is_empty() {
                continue;
            }

            // 2. Drive the root and integrate the chain outward.
            sub.particles[0].position.x = total_x;
            let rad = total_angle.to_radians();
            let gravity = Vec2::new(rad.sin(), rad.cos());

            for i in 1..sub.particles.len() {
                let (head, tail) = sub.particles.split_at_mut(i);
                let prev = head[i - 1];
                let particle = &mut tail[0];

                particle.force = gravity * particle.acceleration + wind;
                let saved = particle.position;
                let delay = particle.delay * dt * DELAY_FACTOR;

                // Rotate the arm by the gravity-direction change, attenuated.
                let mut direction = particle.position - prev.position;
                let angle =
                    direction_to_radian(particle.last_gravity, gravity) / AIR_RESISTANCE;
                direction = rotate(direction, angle);

                particle.position = prev.position + direction;
                particle.position += particle.velocity * delay + particle.force * delay * delay;

                // Re-project onto the configured radius from the parent.
                let offset = particle.position - prev.position;
                let distance = offset.length();
                if distance > EPSILON {
                    particle.position = prev.position + offset / distance * particle.radius;
                }
                if particle.position.x.abs() < MOVEMENT_THRESHOLD {
                    particle.position.x = 0.0;
                }

                if delay > EPSILON {
                    particle.velocity = (particle.position - saved) / delay * particle.mobility;
                }
                particle.last_position = saved;
                particle.last_gravity = gravity;
            }

            // 3. Translate segment angles back into destination parameters.
            for (output, handle) in sub.outputs.iter().zip(&bound.outputs) {
                let Some(ParamHandle(idx)) = *handle else {
                    continue;
                };
                let vi = output.particle;
                if vi < 1 || vi >= sub.particles.len() {
                    continue;
                }

                let parent_direction = if vi >= 2 {
                    sub.particles[vi - 1].position - sub.particles[vi - 2].position
                } else {
                    Vec2::new(0.0, 1.0)
                };
                let current_direction =
                    sub.particles[vi].position - sub.particles[vi - 1].position;

                let mut angle = direction_to_radian(parent_direction, current_direction);
                if output.reflect {
                    angle = -angle;
                }

                let value = angle * output.scale;
                let w = output.weight / 100.0;
                let blended = params.values[idx] * (1.0 - w) + value * w;
                params.values[idx] = blended.clamp(params.minimums[idx], params.maximums[idx]);
            }
        }
    }
}

/// Piecewise-linear remap of a parameter value into a sub-rig range,
/// symmetric around the defaults. Degenerate source ranges fall back to the
/// range boundary instead of dividing by zero.
fn normalize_input(value: f32, min: f32, max: f32, default: f32, range: NormRange) -> f32 {
    let diff = value - default;
    if diff > EPSILON {
        let src = max - default;
        let dst = range.maximum - range.default;
        if src > EPSILON {
            range.default + diff / src * dst
        } else {
            range.maximum
        }
    } else if diff < -EPSILON {
        let src = default - min;
        let dst = range.default - range.minimum;
        if src > EPSILON {
            range.default + diff / src * dst
        } else {
            range.minimum
        }
    } else {
        range.default
    }
}

/// Signed angle from one direction to another, wrapped to [-pi, pi].
fn direction_to_radian(from: Vec2, to: Vec2) -> f32 {
    let mut r = to.y.atan2(to.x) - from.y.atan2(from.x);
    while r < -std::f32::consts::PI {
        r += 2.0 * std::f32::consts::PI;
    }
    while r > std::f32::consts::PI {
        r -= 2.0 * std::f32::consts::PI;
    }
    r
}

fn rotate(v: Vec2, radians: f32) -> Vec2 {
    let (sin, cos) = radians.sin_cos();
    Vec2::new(cos * v.x - sin * v.y, sin * v.x + cos * v.y)
}
