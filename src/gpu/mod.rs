//! The GPU backend seam.
//!
//! Everything the pipeline asks of the graphics device goes through the
//! [`GpuBackend`] trait: texture and framebuffer allocation, framebuffer
//! binding, feature queries, program compilation with deferred completion,
//! and full-screen draws.
//!
//! Two backends ship with the crate:
//!
//! - [`WgpuBackend`]: renders with `wgpu`, on top of a [`GpuContext`].
//! - [`HeadlessBackend`]: no GPU at all. It records every call, completes
//!   compilations on demand and can simulate context loss, which makes it the
//!   backend used by the test suite.

mod context;
mod headless;
mod wgpu_backend;

use bitflags::bitflags;

use crate::error::BackendError;
use crate::texture::{SamplerBinding, TextureDescriptor};

pub use context::GpuContext;
pub use headless::{CompletedDraw, HeadlessBackend, HeadlessConfig};
pub use wgpu_backend::WgpuBackend;

/// Handle to a backend texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub(crate) u64);

/// Handle to a backend framebuffer (a set of attachments drawn together).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FramebufferId(pub(crate) u64);

/// Handle to a shader program. Allocated by the [`Engine`](crate::Engine).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub(crate) u64);

impl TextureId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl FramebufferId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl ProgramId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

bitflags! {
    /// Optional device capabilities effects and targets may depend on.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct GpuFeatures: u32 {
        /// More than one color attachment per framebuffer.
        const MULTIPLE_RENDER_TARGETS = 1 << 0;
        /// Multisampled color attachments.
        const MULTISAMPLE_RENDER_TARGETS = 1 << 1;
        /// Renderable 32-bit float textures.
        const FLOAT_TEXTURES = 1 << 2;
        /// Renderable 16-bit float textures.
        const HALF_FLOAT_TEXTURES = 1 << 3;
        /// Depth attachments that can be sampled afterwards.
        const DEPTH_TEXTURES = 1 << 4;
    }
}

/// Numeric device limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GpuLimits {
    pub max_color_attachments: u32,
    pub max_samples: u32,
    pub max_texture_size: u32,
}

impl Default for GpuLimits {
    fn default() -> Self {
        Self {
            max_color_attachments: 8,
            max_samples: 4,
            max_texture_size: 8192,
        }
    }
}

/// Attachments drawn to together.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FramebufferDescriptor {
    pub label: String,
    pub color: Vec<TextureId>,
    pub depth: Option<TextureId>,
}

/// Where draws land.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RenderOutput {
    /// The presentation surface (backbuffer).
    Screen,
    /// An off-screen framebuffer.
    Framebuffer(FramebufferId),
}

/// Source and interface of a full-screen program.
///
/// The WGSL source must provide `vs` and `fs` entry points. Group 0 holds
/// the [`PassUniforms`] at binding 0, followed by one texture/sampler pair per
/// input at bindings `1 + 2i` and `2 + 2i`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgramDescriptor {
    pub label: String,
    pub source: String,
    pub input_count: u32,
}

impl ProgramDescriptor {
    pub fn new(label: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            source: source.into(),
            input_count: 1,
        }
    }

    pub fn with_inputs(mut self, input_count: u32) -> Self {
        self.input_count = input_count;
        self
    }
}

/// Result of one finished compilation, as reported by
/// [`GpuBackend::poll_compiled`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompileStatus {
    pub program: ProgramId,
    pub result: Result<(), BackendError>,
}

/// Uniforms every full-screen program receives.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PassUniforms {
    pub resolution: [f32; 2],
    pub time: f32,
    pub _padding: f32,
}

/// One full-screen triangle draw into the currently bound output.
#[derive(Clone, Debug, PartialEq)]
pub struct FullscreenDraw {
    pub program: ProgramId,
    pub inputs: Vec<SamplerBinding>,
    pub time: f32,
}

/// The device operations the pipeline is built on.
///
/// Compilation is asynchronous: [`compile_program`](Self::compile_program)
/// only submits the source, and completion is reported later, in completion
/// order, by [`poll_compiled`](Self::poll_compiled). The engine polls once per
/// frame tick.
pub trait GpuBackend {
    /// Human-readable backend name.
    fn name(&self) -> &str;

    fn features(&self) -> GpuFeatures;

    fn limits(&self) -> GpuLimits;

    fn create_texture(&mut self, descriptor: &TextureDescriptor)
    -> Result<TextureId, BackendError>;

    fn destroy_texture(&mut self, texture: TextureId);

    fn create_framebuffer(
        &mut self,
        descriptor: &FramebufferDescriptor,
    ) -> Result<FramebufferId, BackendError>;

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferId);

    /// Makes `output` the target of subsequent draws.
    fn bind_framebuffer(&mut self, output: RenderOutput) -> Result<(), BackendError>;

    /// Finishes drawing into the bound output and unbinds it.
    fn unbind_framebuffer(&mut self);

    /// Submits a program for compilation.
    fn compile_program(&mut self, program: ProgramId, descriptor: &ProgramDescriptor);

    /// Reports the compilations that finished since the last poll.
    fn poll_compiled(&mut self) -> Vec<CompileStatus>;

    fn destroy_program(&mut self, program: ProgramId);

    /// Draws a full-screen triangle with a compiled program.
    fn draw_fullscreen(&mut self, draw: &FullscreenDraw) -> Result<(), BackendError>;

    /// Presents the screen output of the current frame, if any was drawn.
    fn present(&mut self) {}

    /// Resizes the screen output.
    fn resize_surface(&mut self, _width: u32, _height: u32) {}

    /// Drops every resource after a context loss. Previously issued handles
    /// become invalid; new handles must not collide with them.
    fn reset(&mut self);
}
