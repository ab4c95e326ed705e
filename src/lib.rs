#![forbid(unsafe_code)]

pub mod assets;
pub mod binding;
pub mod core;
pub mod descriptor;
pub mod error;
pub mod expression;
pub mod motion;
pub mod overrides;
pub mod physics;
pub mod pose;
pub mod render;
pub mod render_cpu;
pub mod session;

pub use assets::{AssetSource, MemoryAssets};
pub use binding::{ConstantFlags, Drawable, MemoryModel, ModelBinding};
pub use core::{CanvasInfo, ParamHandle, Projection, UserTransform, Viewport};
pub use error::{PuppetryError, PuppetryResult};
pub use expression::{Blend, Expression, ExpressionLayer, ExpressionParam};
pub use motion::{Keyframe, MotionClip, MotionCurve, MotionLayer};
pub use overrides::OverrideChannel;
pub use physics::{PhysicsLayer, PhysicsRig};
pub use pose::{PoseGroup, PoseLayer, PosePart};
pub use render::{BlendMode, DrawState, Mesh, RenderBackend, Renderer};
pub use render_cpu::{CpuBackend, Texture};
pub use session::AvatarSession;
