//! Effect composition per camera.
//!
//! - [`RenderEffect`]: a named unit of post-processing built from passes.
//! - [`RenderPipeline`]: an effect catalogue, a catalogue of display-only
//!   passes and the cameras they are bound to.
//! - [`RenderPipelineManager`]: the named pipelines of a scene plus the
//!   camera ownership table used by `force_unique` attachment.

mod effect;
mod manager;
#[allow(clippy::module_inception)]
mod pipeline;
mod registry;

pub use effect::{PostProcessFactory, RenderEffect};
pub use manager::{RenderPipelineManager, SharedPipeline};
pub use pipeline::{CameraChain, EffectState, EffectToggle, PipelineId, RenderPipeline};
pub use registry::{CameraRegistry, SharedRegistry};
