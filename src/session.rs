use std::collections::BTreeMap;

use crate::{
    assets::{resolve_relative, AssetSource},
    binding::ModelBinding,
    core::{Projection, UserTransform, Viewport},
    descriptor,
    error::PuppetryResult,
    expression::ExpressionLayer,
    motion::MotionLayer,
    overrides::OverrideChannel,
    physics::PhysicsLayer,
    pose::{PoseGroup, PoseLayer, PosePart},
    render::{RenderBackend, Renderer},
};

/// Frames longer than this are clamped so a background/resume hiccup does not
/// catapult the simulation.
const MAX_FRAME_DT: f32 = 0.1;

/// One rigged character: the bound model plus every animation layer and the
/// fixed per-frame pipeline over them. `advance` runs
/// motion -> expression -> physics -> overrides -> pose, then asks the
/// binding to recompute geometry; `render` composites the result.
pub struct AvatarSession<B: ModelBinding> {
    binding: B,
    motion: MotionLayer,
    expression: ExpressionLayer,
    pose: PoseLayer,
    physics: Option<PhysicsLayer>,
    overrides: OverrideChannel,
    motion_groups: BTreeMap<String, Vec<String>>,
    model_path: Option<String>,
    user: UserTransform,
    viewport: Viewport,
    loaded: bool,
}

impl<B: ModelBinding> AvatarSession<B> {
    pub fn new(binding: B) -> Self {
        Self {
            binding,
            motion: MotionLayer::new(),
            expression: ExpressionLayer::new(),
            pose: PoseLayer::new(),
            physics: None,
            overrides: OverrideChannel::new(),
            motion_groups: BTreeMap::new(),
            model_path: None,
            user: UserTransform::default(),
            viewport: Viewport::new(0, 0),
            loaded: false,
        }
    }

    pub fn binding(&self) -> &B {
        &self.binding
    }

    pub fn binding_mut(&mut self) -> &mut B {
        &mut self.binding
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn set_user_transform(&mut self, user: UserTransform) {
        self.user = user;
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    /// Fresh lightweight handle onto the override channel; safe to hand to
    /// another thread.
    pub fn override_channel(&self) -> OverrideChannel {
        self.overrides.clone()
    }

    pub fn unload(&mut self) {
        self.motion.reset();
        self.expression.reset();
        self.pose.reset();
        self.physics = None;
        self.overrides.clear();
        self.motion_groups.clear();
        self.model_path = None;
        self.loaded = false;
    }

    /// Loads a model descriptor and every auxiliary descriptor it references.
    /// A failure leaves the session unloaded rather than half-wired.
    #[tracing::instrument(skip(self, assets), err)]
    pub fn load_model(&mut self, assets: &dyn AssetSource, path: &str) -> PuppetryResult<()> {
        self.unload();
        if let Err(e) = self.load_model_inner(assets, path) {
            self.unload();
            return Err(e);
        }
        self.loaded = true;
        tracing::info!(path, "model loaded");
        Ok(())
    }

    fn load_model_inner(&mut self, assets: &dyn AssetSource, path: &str) -> PuppetryResult<()> {
        let model = descriptor::parse_model3(&assets.read_string(path)?)?;
        self.model_path = Some(path.to_string());
        self.motion_groups = model.motions.clone();

        if let Some(files) = model.motions.get("Idle") {
            if let Some(file) = files.first() {
                let json = assets.read_string(&resolve_relative(path, file))?;
                let clip = descriptor::parse_motion3(&json)?;
                self.motion.set_idle(clip, &self.binding);
            }
        }

        let mut expressions = Vec::new();
        for (name, file) in &model.expressions {
            let json = assets.read_string(&resolve_relative(path, file))?;
            expressions.push(descriptor::parse_exp3(&json, name)?);
        }
        self.expression.load(expressions, &self.binding);

        if let Some(file) = &model.physics {
            let json = assets.read_string(&resolve_relative(path, file))?;
            let rig = descriptor::parse_physics3(&json)?;
            self.physics = Some(PhysicsLayer::new(rig, &self.binding));
        }

        if let Some(file) = &model.pose {
            let json = assets.read_string(&resolve_relative(path, file))?;
            let pose = descriptor::parse_pose3(&json)?;
            let groups = self.resolve_pose_groups(pose);
            self.pose.load(groups, &mut self.binding);
        }

        Ok(())
    }

    fn resolve_pose_groups(&self, pose: descriptor::PoseDescriptor) -> Vec<PoseGroup> {
        let mut groups = Vec::new();
        for group in pose.groups {
            let parts: Vec<PosePart> = group
                .iter()
                .filter_map(|part| {
                    let Some(index) = self.binding.part_index(&part.id) else {
                        tracing::debug!(part = %part.id, "pose references unknown part");
                        return None;
                    };
                    Some(PosePart {
                        part: index,
                        links: part
                            .links
                            .iter()
                            .filter_map(|link| self.binding.part_index(link))
                            .collect(),
                    })
                })
                .collect();
            if parts.len() >= 2 {
                groups.push(PoseGroup { parts });
            }
        }
        groups
    }

    /// Starts a motion from a loaded group, gated on priority before the
    /// file is even read. Unknown groups, bad indices and unreadable or
    /// empty motion files are logged no-ops.
    pub fn start_motion(
        &mut self,
        assets: &dyn AssetSource,
        group: &str,
        index: usize,
        priority: i32,
    ) -> bool {
        if !self.loaded {
            return false;
        }
        if self.motion.has_active() && priority < self.motion.active_priority() {
            tracing::debug!(group, index, priority, "motion rejected by priority");
            return false;
        }
        let Some(file) = self
            .motion_groups
            .get(group)
            .and_then(|files| files.get(index))
        else {
            tracing::debug!(group, index, "no such motion");
            return false;
        };
        let Some(model_path) = &self.model_path else {
            return false;
        };

        let full_path = resolve_relative(model_path, file);
        let clip = match assets
            .read_string(&full_path)
            .and_then(|json| descriptor::parse_motion3(&json))
        {
            Ok(clip) => clip,
            Err(e) => {
                tracing::warn!(path = %full_path, error = %e, "motion failed to load");
                return false;
            }
        };
        if clip.curves.is_empty() {
            tracing::debug!(path = %full_path, "motion has no parameter curves");
            return false;
        }
        self.motion.start(clip, priority, &self.binding)
    }

    /// Empty id fades the current expression out.
    pub fn set_expression(&mut self, id: &str) {
        self.expression.set(id);
    }

    /// Weighted external parameter override (lip sync and similar). Weight
    /// below the removal threshold drops the override; unknown names are
    /// ignored.
    pub fn set_parameter_override(&mut self, name: &str, value: f32, weight: f32) {
        if let Some(handle) = self.binding.param_index(name) {
            self.overrides.set(handle, value, weight);
        }
    }

    pub fn parameter_value(&self, name: &str) -> Option<f32> {
        let handle = self.binding.param_index(name)?;
        Some(self.binding.param_values()[handle.0])
    }

    pub fn parameter_range(&self, name: &str) -> Option<f32> {
        let handle = self.binding.param_index(name)?;
        Some(self.binding.param_maximums()[handle.0] - self.binding.param_minimums()[handle.0])
    }

    pub fn advance(&mut self, dt: f32) {
        if !self.loaded {
            return;
        }
        let dt = dt.clamp(0.0, MAX_FRAME_DT);
        let snapshot = self.overrides.snapshot();

        {
            let params = self.binding.params_mut();
            params.values.copy_from_slice(params.defaults);
        }

        self.motion.advance(dt, &mut self.binding);
        self.expression.advance(dt, &mut self.binding);
        if let Some(physics) = &mut self.physics {
            physics.simulate(dt, &mut self.binding);
        }
        snapshot.apply(&mut self.binding);
        self.pose.advance(dt, &mut self.binding);

        self.binding.update();
    }

    pub fn render(&mut self, backend: &mut dyn RenderBackend) -> PuppetryResult<()> {
        if !self.loaded {
            return Ok(());
        }
        let projection = Projection::fit(self.binding.canvas_info(), self.viewport, self.user);
        Renderer::render(&self.binding, projection, self.viewport, backend)?;
        self.binding.reset_dynamic_flags();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assets::MemoryAssets, binding::MemoryModel};

    fn model3_json() -> &'static str {
        r#"{
            "Version": 3,
            "FileReferences": {
                "Moc": "avatar.moc3",
                "Textures": ["avatar.png"],
                "Motions": {
                    "Idle": [{"File": "idle.motion3.json"}],
                    "Tap": [{"File": "tap.motion3.json"}]
                },
                "Expressions": [{"Name": "smile", "File": "smile.exp3.json"}]
            }
        }"#
    }

    fn idle_json() -> &'static str {
        // P ramps 0 -> 1 over a 2s loop.
        r#"{
            "Version": 3,
            "Meta": {"Duration": 2.0, "Loop": true, "FadeInTime": 0.0, "FadeOutTime": 0.0},
            "Curves": [
                {"Target": "Parameter", "Id": "P", "Segments": [0, 0, 0, 2.0, 1.0]}
            ]
        }"#
    }

    fn tap_json() -> &'static str {
        r#"{
            "Version": 3,
            "Meta": {"Duration": 1.0, "Loop": false, "FadeInTime": 0.0, "FadeOutTime": 0.0},
            "Curves": [
                {"Target": "Parameter", "Id": "P", "Segments": [0, 1.0]}
            ]
        }"#
    }

    fn smile_json() -> &'static str {
        r#"{
            "Type": "Live2D Expression",
            "Parameters": [{"Id": "P", "Value": 1.0, "Blend": "Overwrite"}]
        }"#
    }

    fn assets() -> MemoryAssets {
        let mut assets = MemoryAssets::new();
        assets.insert("avatar.model3.json", model3_json());
        assets.insert("idle.motion3.json", idle_json());
        assets.insert("tap.motion3.json", tap_json());
        assets.insert("smile.exp3.json", smile_json());
        assets
    }

    fn loaded_session() -> AvatarSession<MemoryModel> {
        let mut model = MemoryModel::new();
        model.add_param("P", 0.0, 0.0, 1.0);
        let mut session = AvatarSession::new(model);
        session
            .load_model(&assets(), "avatar.model3.json")
            .unwrap();
        session
    }

    #[test]
    fn load_failure_leaves_the_session_unloaded() {
        let mut session = AvatarSession::new(MemoryModel::new());
        assert!(session.load_model(&assets(), "missing.model3.json").is_err());
        assert!(!session.is_loaded());
    }

    #[test]
    fn advance_is_a_no_op_before_load() {
        let mut model = MemoryModel::new();
        model.add_param("P", 0.25, 0.0, 1.0);
        let mut session = AvatarSession::new(model);
        session.advance(1.0);
        assert_eq!(session.parameter_value("P"), Some(0.25));
    }

    #[test]
    fn idle_motion_drives_parameters_from_load() {
        let mut session = loaded_session();
        session.advance(0.1);
        let p = session.parameter_value("P").unwrap_or(f32::NAN);
        assert!((p - 0.05).abs() < 1e-6, "got {p}");
    }

    #[test]
    fn long_frames_are_clamped() {
        let mut session = loaded_session();
        // A 5s stall advances the clock by at most 0.1s.
        session.advance(5.0);
        let p = session.parameter_value("P").unwrap_or(f32::NAN);
        assert!((p - 0.05).abs() < 1e-6, "got {p}");
    }

    #[test]
    fn overrides_win_over_motion() {
        let mut session = loaded_session();
        session.set_parameter_override("P", 0.9, 1.0);
        session.advance(0.1);
        assert_eq!(session.parameter_value("P"), Some(0.9));

        // Dropping the override hands the parameter back to the idle motion.
        session.set_parameter_override("P", 0.9, 0.0);
        session.advance(0.1);
        let p = session.parameter_value("P").unwrap_or(f32::NAN);
        assert!((p - 0.1).abs() < 1e-6, "got {p}");
    }

    #[test]
    fn start_motion_rejects_unknown_references() {
        let mut session = loaded_session();
        let assets = assets();
        assert!(!session.start_motion(&assets, "Nope", 0, 1));
        assert!(!session.start_motion(&assets, "Tap", 7, 1));
        assert!(session.start_motion(&assets, "Tap", 0, 1));
    }

    #[test]
    fn parameter_range_is_max_minus_min() {
        let mut model = MemoryModel::new();
        model.add_param("Wide", 0.0, -30.0, 30.0);
        let session = AvatarSession::new(model);
        assert_eq!(session.parameter_range("Wide"), Some(60.0));
        assert_eq!(session.parameter_range("Missing"), None);
    }

    #[test]
    fn unload_clears_pending_overrides() {
        let mut session = loaded_session();
        session.set_parameter_override("P", 0.9, 1.0);
        session.unload();
        assert!(session.override_channel().snapshot().is_empty());
    }
}
