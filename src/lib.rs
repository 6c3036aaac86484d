//! # Postchain
//!
//! **Post-processing pipelines composed per camera.**
//!
//! A [`RenderPipeline`] holds a catalogue of named [`RenderEffect`]s and binds
//! them to cameras. Effects can be toggled per camera, and a display-only
//! pass can take over a camera's output entirely (for debug views).
//! [`MultiRenderTarget`] bundles several color attachments drawn in one pass,
//! and [`create_resized_copy`] produces a rescaled copy of a render target
//! once its copy shader has compiled.
//!
//! Shader compilation is asynchronous. Work that needs a program is queued
//! with [`Engine::execute_when_compiled`] and runs on a later
//! [`Engine::tick`], in completion order.
//!
//! ## Quick Start
//!
//! ```
//! use postchain::{
//!     Camera, Engine, HeadlessBackend, PostProcess, RenderEffect, RenderOutput, RenderPipeline,
//!     RenderPipelineManager, SamplingMode,
//! };
//!
//! let engine = Engine::new(HeadlessBackend::default());
//! let mut manager = RenderPipelineManager::new(&engine);
//!
//! let mut pipeline = RenderPipeline::new(&engine, "standard").unwrap();
//! pipeline.add_effect(RenderEffect::new(&engine, "copy", true, |engine, _camera| {
//!     vec![PostProcess::pass_through(engine, "copy", SamplingMode::Bilinear)]
//! }));
//! manager.add_pipeline(pipeline).unwrap();
//!
//! let camera = Camera::new("main");
//! manager.attach_cameras_to_render_pipeline("standard", &[camera.clone()], false);
//!
//! // Programs finish compiling on the next tick.
//! engine.tick();
//! manager.update();
//! let stats = manager.render_camera(camera.id, None, RenderOutput::Screen);
//! assert_eq!(stats.executed, 1);
//! ```
//!
//! ## Backends
//!
//! Device access goes through the [`GpuBackend`] trait. [`WgpuBackend`]
//! renders with `wgpu`; [`HeadlessBackend`] does no GPU work and is what the
//! tests run against.

mod camera;
mod config;
mod engine;
mod error;
pub mod gpu;
mod logging;
pub mod pipeline;
pub mod post_process;
mod program;
pub mod render_target;
mod texture;
mod texture_tools;

pub use camera::{Camera, CameraId};
pub use config::{EngineConfig, MultiRenderTargetOptions, RenderTargetOptions};
pub use engine::Engine;
pub use error::{BackendError, PipelineError, Result};
pub use gpu::{
    CompletedDraw, FramebufferDescriptor, FramebufferId, FullscreenDraw, GpuBackend, GpuContext,
    GpuFeatures, GpuLimits, HeadlessBackend, HeadlessConfig, PassUniforms, ProgramDescriptor,
    ProgramId, RenderOutput, TextureId, WgpuBackend,
};
pub use logging::{LoggingConfig, init_logging};
pub use pipeline::{
    CameraChain, EffectState, EffectToggle, PipelineId, PostProcessFactory, RenderEffect,
    RenderPipeline, RenderPipelineManager, SharedPipeline,
};
pub use post_process::{
    PASS_THROUGH_SHADER, PostProcess, PostProcessManager, RenderStats, SharedPostProcess,
};
pub use program::ProgramState;
pub use render_target::{MultiRenderTarget, RenderTarget, SharedRenderTarget};
pub use texture::{
    InternalTexture, SamplerBinding, SamplingMode, Size, TextureDescriptor, TextureFormat,
    TextureUsage, WrapMode,
};
pub use texture_tools::create_resized_copy;
