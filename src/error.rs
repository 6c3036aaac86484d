//! Error types.
//!
//! Only construction-time failures surface as [`PipelineError`]. Runtime
//! misuse (unknown effect names, unattached cameras, double dispose) is logged
//! and absorbed, and capability problems are exposed through `is_supported`
//! queries and ready flags instead.

use thiserror::Error;

/// Errors reported by a [`GpuBackend`](crate::GpuBackend).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// No suitable GPU adapter was found.
    #[error("no suitable GPU adapter found")]
    NoAdapter,

    /// Requesting the logical device failed.
    #[error("GPU device request failed: {0}")]
    DeviceRequest(String),

    /// Creating or configuring the presentation surface failed.
    #[error("surface error: {0}")]
    Surface(String),

    /// A texture or framebuffer could not be allocated.
    #[error("resource creation failed: {0}")]
    ResourceCreation(String),

    /// The texture id does not name a live texture.
    #[error("unknown texture {0}")]
    UnknownTexture(u64),

    /// The framebuffer id does not name a live framebuffer.
    #[error("unknown framebuffer {0}")]
    UnknownFramebuffer(u64),

    /// The program id does not name a live, compiled program.
    #[error("unknown or uncompiled program {0}")]
    UnknownProgram(u64),

    /// The shader source was rejected.
    #[error("shader compilation failed: {0}")]
    ShaderCompile(String),
}

/// Construction-time errors for pipelines, targets and the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// Names must be non-empty.
    #[error("invalid name: names must not be empty")]
    InvalidName,

    /// Render targets need a non-zero width and height.
    #[error("invalid size {width}x{height}: dimensions must be non-zero")]
    InvalidSize { width: u32, height: u32 },

    /// A multi render target needs at least one color attachment.
    #[error("invalid attachment count {0}: at least one attachment is required")]
    InvalidAttachmentCount(usize),

    /// The GPU context is lost and has not been restored yet.
    #[error("GPU context is lost")]
    ContextLost,

    /// A pipeline with this name is already registered with the manager.
    #[error("a pipeline named '{0}' already exists")]
    DuplicatePipeline(String),

    /// The backend failed while creating a resource.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Result type for construction-time operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
