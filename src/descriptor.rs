//! Typed parsers for the model/motion/expression/physics/pose descriptor
//! JSON formats. Descriptors are parsed once at load time into the immutable
//! data records the layers run on; nothing here is touched per frame.

use std::collections::BTreeMap;

use glam::Vec2;

use crate::{
    error::{PuppetryError, PuppetryResult},
    expression::{Blend, Expression, ExpressionParam},
    motion::{Keyframe, MotionClip, MotionCurve},
    physics::{
        InputAxis, Normalization, NormRange, Particle, PhysicsInput, PhysicsOutput, PhysicsRig,
        PhysicsSubRig,
    },
};

// ---- model3 ----

/// File references of one model: where the moc, textures and auxiliary
/// descriptors live, relative to the model file itself.
#[derive(Clone, Debug, Default)]
pub struct ModelDescriptor {
    pub moc: Option<String>,
    pub textures: Vec<String>,
    pub physics: Option<String>,
    pub pose: Option<String>,
    /// (name, file) pairs.
    pub expressions: Vec<(String, String)>,
    /// Motion group name -> motion file references, in descriptor order.
    pub motions: BTreeMap<String, Vec<String>>,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Model3 {
    file_references: FileReferences3,
}

#[derive(serde::Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct FileReferences3 {
    moc: Option<String>,
    textures: Vec<String>,
    physics: Option<String>,
    pose: Option<String>,
    expressions: Vec<ExpressionRef3>,
    motions: BTreeMap<String, Vec<MotionRef3>>,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ExpressionRef3 {
    name: String,
    file: String,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MotionRef3 {
    file: String,
}

pub fn parse_model3(json: &str) -> PuppetryResult<ModelDescriptor> {
    let model: Model3 = serde_json::from_str(json)
        .map_err(|e| PuppetryError::descriptor(format!("model3: {e}")))?;
    let refs = model.file_references;

    let mut motions = BTreeMap::new();
    for (group, entries) in refs.motions {
        let files: Vec<String> = entries.into_iter().map(|m| m.file).collect();
        if files.is_empty() {
            continue;
        }
        // An unnamed group is addressable as "Default".
        let name = if group.is_empty() {
            "Default".to_string()
        } else {
            group
        };
        motions.insert(name, files);
    }

    Ok(ModelDescriptor {
        moc: refs.moc,
        textures: refs.textures,
        physics: refs.physics,
        pose: refs.pose,
        expressions: refs
            .expressions
            .into_iter()
            .map(|e| (e.name, e.file))
            .collect(),
        motions,
    })
}

// ---- motion3 ----

#[derive(serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Motion3 {
    meta: MotionMeta3,
    #[serde(default)]
    curves: Vec<Curve3>,
}

#[derive(serde::Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct MotionMeta3 {
    duration: Option<f32>,
    #[serde(rename = "Loop")]
    loop_playback: Option<bool>,
    fade_in_time: Option<f32>,
    fade_out_time: Option<f32>,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Curve3 {
    target: String,
    id: String,
    #[serde(default)]
    segments: Vec<f32>,
}

pub fn parse_motion3(json: &str) -> PuppetryResult<MotionClip> {
    let motion: Motion3 = serde_json::from_str(json)
        .map_err(|e| PuppetryError::descriptor(format!("motion3: {e}")))?;

    let mut curves = Vec::new();
    for curve in motion.curves {
        if curve.target != "Parameter" {
            continue;
        }
        let keys = flatten_segments(&curve.segments);
        if keys.is_empty() {
            continue;
        }
        curves.push(MotionCurve::new(curve.id, keys));
    }

    Ok(MotionClip {
        duration: motion.meta.duration.unwrap_or(4.0),
        loop_playback: motion.meta.loop_playback.unwrap_or(true),
        fade_in: motion.meta.fade_in_time.unwrap_or(0.5),
        fade_out: motion.meta.fade_out_time.unwrap_or(0.5),
        curves,
    })
}

/// Segment lists are flat number streams: a leading (time, value) pair, then
/// typed runs. Linear/stepped/inverse-stepped segments carry one more pair;
/// bezier segments carry three, of which only the endpoint survives here.
/// Control-point interiors are flattened away and curves play back linearly.
fn flatten_segments(segments: &[f32]) -> Vec<Keyframe> {
    let mut keys = Vec::new();
    if segments.len() < 2 {
        return keys;
    }
    keys.push(Keyframe {
        time: segments[0],
        value: segments[1],
    });

    let mut i = 2;
    while i < segments.len() {
        let kind = segments[i] as i32;
        if kind == 1 && i + 6 < segments.len() {
            keys.push(Keyframe {
                time: segments[i + 5],
                value: segments[i + 6],
            });
            i += 7;
        } else if i + 2 < segments.len() {
            keys.push(Keyframe {
                time: segments[i + 1],
                value: segments[i + 2],
            });
            i += 3;
        } else {
            break;
        }
    }
    keys
}

// ---- exp3 ----

#[derive(serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Exp3 {
    #[serde(default)]
    parameters: Vec<ExpParam3>,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ExpParam3 {
    id: String,
    #[serde(default)]
    value: f32,
    #[serde(default)]
    blend: Option<String>,
}

pub fn parse_exp3(json: &str, name: &str) -> PuppetryResult<Expression> {
    let exp: Exp3 =
        serde_json::from_str(json).map_err(|e| PuppetryError::descriptor(format!("exp3: {e}")))?;
    let params = exp
        .parameters
        .into_iter()
        .map(|p| ExpressionParam {
            param: p.id,
            value: p.value,
            blend: match p.blend.as_deref() {
                Some("Multiply") => Blend::Multiply,
                Some("Overwrite") => Blend::Overwrite,
                _ => Blend::Add,
            },
        })
        .collect();
    Ok(Expression {
        name: name.to_string(),
        params,
    })
}

// ---- physics3 ----

#[derive(serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Physics3 {
    #[serde(default)]
    meta: PhysicsMeta3,
    #[serde(default)]
    physics_settings: Vec<PhysicsSetting3>,
}

#[derive(serde::Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct PhysicsMeta3 {
    fps: Option<f32>,
    effective_forces: Option<Forces3>,
}

#[derive(serde::Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct Forces3 {
    gravity: Option<Vec2Json>,
    wind: Option<Vec2Json>,
}

#[derive(serde::Deserialize, Clone, Copy, Default)]
#[serde(rename_all = "PascalCase", default)]
struct Vec2Json {
    x: f32,
    y: f32,
}

impl From<Vec2Json> for Vec2 {
    fn from(v: Vec2Json) -> Self {
        Vec2::new(v.x, v.y)
    }
}

#[derive(serde::Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct PhysicsSetting3 {
    input: Vec<PhysicsInput3>,
    output: Vec<PhysicsOutput3>,
    vertices: Vec<PhysicsVertex3>,
    normalization: Option<Normalization3>,
}

#[derive(serde::Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct PhysicsInput3 {
    source: Option<IdRef3>,
    weight: f32,
    #[serde(rename = "Type")]
    kind: String,
    reflect: bool,
}

#[derive(serde::Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct IdRef3 {
    id: String,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct PhysicsOutput3 {
    destination: Option<IdRef3>,
    vertex_index: usize,
    scale: f32,
    weight: f32,
    reflect: bool,
}

impl Default for PhysicsOutput3 {
    fn default() -> Self {
        Self {
            destination: None,
            vertex_index: 0,
            scale: 1.0,
            weight: 100.0,
            reflect: false,
        }
    }
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct PhysicsVertex3 {
    position: Option<Vec2Json>,
    mobility: f32,
    delay: f32,
    acceleration: f32,
    radius: f32,
}

impl Default for PhysicsVertex3 {
    fn default() -> Self {
        Self {
            position: None,
            mobility: 1.0,
            delay: 1.0,
            acceleration: 1.0,
            radius: 0.0,
        }
    }
}

#[derive(serde::Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct Normalization3 {
    position: Range3,
    angle: Range3,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct Range3 {
    minimum: f32,
    default: f32,
    maximum: f32,
}

impl Default for Range3 {
    fn default() -> Self {
        Self {
            minimum: -10.0,
            default: 0.0,
            maximum: 10.0,
        }
    }
}

impl From<Range3> for NormRange {
    fn from(r: Range3) -> Self {
        Self {
            minimum: r.minimum,
            default: r.default,
            maximum: r.maximum,
        }
    }
}

pub fn parse_physics3(json: &str) -> PuppetryResult<PhysicsRig> {
    let physics: Physics3 = serde_json::from_str(json)
        .map_err(|e| PuppetryError::descriptor(format!("physics3: {e}")))?;

    let forces = physics.meta.effective_forces.unwrap_or_default();
    let mut rig = PhysicsRig {
        gravity: forces.gravity.map_or(Vec2::new(0.0, -1.0), Vec2::from),
        wind: forces.wind.map_or(Vec2::ZERO, Vec2::from),
        fps: physics.meta.fps.unwrap_or(60.0),
        sub_rigs: Vec::new(),
    };

    for setting in physics.physics_settings {
        let normalization = setting.normalization.map_or_else(Normalization::default, |n| {
            Normalization {
                position: n.position.into(),
                angle: n.angle.into(),
            }
        });

        let inputs = setting
            .input
            .into_iter()
            .filter_map(|i| {
                let source = i.source?;
                Some(PhysicsInput {
                    source: source.id,
                    weight: i.weight,
                    axis: if i.kind == "Angle" {
                        InputAxis::Angular
                    } else {
                        InputAxis::Linear
                    },
                    reflect: i.reflect,
                })
            })
            .collect();

        let outputs = setting
            .output
            .into_iter()
            .filter_map(|o| {
                let destination = o.destination?;
                Some(PhysicsOutput {
                    dest: destination.id,
                    particle: o.vertex_index,
                    scale: o.scale,
                    weight: o.weight,
                    reflect: o.reflect,
                })
            })
            .collect();

        let particles = setting
            .vertices
            .into_iter()
            .map(|v| Particle {
                position: v.position.map_or(Vec2::ZERO, Vec2::from),
                mobility: v.mobility,
                delay: v.delay,
                acceleration: v.acceleration,
                radius: v.radius,
                ..Particle::default()
            })
            .collect();

        rig.sub_rigs.push(PhysicsSubRig {
            inputs,
            outputs,
            particles,
            normalization,
        });
    }

    Ok(rig)
}

// ---- pose3 ----

/// Pose groups by part id; resolution to part indices happens at bind time.
#[derive(Clone, Debug, Default)]
pub struct PoseDescriptor {
    pub groups: Vec<Vec<PosePartRef>>,
}

#[derive(Clone, Debug)]
pub struct PosePartRef {
    pub id: String,
    pub links: Vec<String>,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Pose3 {
    #[serde(default)]
    groups: Vec<Vec<PosePart3>>,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PosePart3 {
    id: String,
    #[serde(default)]
    link: Vec<String>,
}

pub fn parse_pose3(json: &str) -> PuppetryResult<PoseDescriptor> {
    let pose: Pose3 =
        serde_json::from_str(json).map_err(|e| PuppetryError::descriptor(format!("pose3: {e}")))?;

    let groups = pose
        .groups
        .into_iter()
        .filter_map(|group| {
            let parts: Vec<PosePartRef> = group
                .into_iter()
                .filter(|p| !p.id.is_empty())
                .map(|p| PosePartRef {
                    id: p.id,
                    links: p.link,
                })
                .collect();
            // A pose group needs at least two mutually exclusive members.
            (parts.len() >= 2).then_some(parts)
        })
        .collect();

    Ok(PoseDescriptor { groups })
}
