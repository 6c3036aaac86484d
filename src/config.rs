//! Configuration builders.
//!
//! All configuration types follow the same shape: `Default` gives working
//! values and chained methods override single fields.
//!
//! ```
//! use postchain::{EngineConfig, MultiRenderTargetOptions, TextureFormat};
//!
//! let engine = EngineConfig::new().label("editor").max_continuations_per_tick(8);
//! let gbuffer = MultiRenderTargetOptions::new()
//!     .types(vec![TextureFormat::Rgba16Float, TextureFormat::Rgba8Unorm])
//!     .depth_texture(true);
//! # let _ = (engine, gbuffer);
//! ```

use crate::texture::{SamplingMode, TextureFormat, WrapMode};

/// Engine-wide settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Name used in log output.
    pub label: String,
    /// Upper bound on "when compiled" continuations run per
    /// [`Engine::tick`](crate::Engine::tick). Continuations over the cap stay
    /// queued, in order, for the next tick. `None` runs them all.
    pub max_continuations_per_tick: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            label: "postchain".to_string(),
            max_continuations_per_tick: None,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn max_continuations_per_tick(mut self, max: usize) -> Self {
        self.max_continuations_per_tick = Some(max.max(1));
        self
    }
}

/// Options for a single-attachment [`RenderTarget`](crate::RenderTarget).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderTargetOptions {
    pub format: TextureFormat,
    pub sampling: SamplingMode,
    pub wrap_u: WrapMode,
    pub wrap_v: WrapMode,
    pub generate_depth_buffer: bool,
    pub generate_stencil_buffer: bool,
    pub generate_mip_maps: bool,
    pub samples: u32,
}

impl Default for RenderTargetOptions {
    fn default() -> Self {
        Self {
            format: TextureFormat::Rgba8Unorm,
            sampling: SamplingMode::Bilinear,
            wrap_u: WrapMode::ClampToEdge,
            wrap_v: WrapMode::ClampToEdge,
            generate_depth_buffer: false,
            generate_stencil_buffer: false,
            generate_mip_maps: false,
            samples: 1,
        }
    }
}

impl RenderTargetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn format(mut self, format: TextureFormat) -> Self {
        self.format = format;
        self
    }

    pub fn sampling(mut self, sampling: SamplingMode) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn wrap(mut self, wrap_u: WrapMode, wrap_v: WrapMode) -> Self {
        self.wrap_u = wrap_u;
        self.wrap_v = wrap_v;
        self
    }

    pub fn depth(mut self, depth: bool, stencil: bool) -> Self {
        self.generate_depth_buffer = depth || stencil;
        self.generate_stencil_buffer = stencil;
        self
    }

    pub fn mip_maps(mut self, enabled: bool) -> Self {
        self.generate_mip_maps = enabled;
        self
    }

    pub fn samples(mut self, samples: u32) -> Self {
        self.samples = samples.max(1);
        self
    }
}

/// Options for a [`MultiRenderTarget`](crate::MultiRenderTarget).
///
/// `types` and `sampling_modes` are per attachment; attachments past the end
/// of either list use `default_type` and bilinear sampling.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultiRenderTargetOptions {
    pub types: Vec<TextureFormat>,
    pub sampling_modes: Vec<SamplingMode>,
    pub default_type: TextureFormat,
    pub generate_mip_maps: bool,
    pub generate_depth_buffer: bool,
    pub generate_stencil_buffer: bool,
    /// Allocate the depth attachment as a sampleable texture.
    pub generate_depth_texture: bool,
    pub samples: u32,
    /// Defer attachment creation until first use.
    pub lazy: bool,
}

impl Default for MultiRenderTargetOptions {
    fn default() -> Self {
        Self {
            types: Vec::new(),
            sampling_modes: Vec::new(),
            default_type: TextureFormat::Rgba8Unorm,
            generate_mip_maps: false,
            generate_depth_buffer: true,
            generate_stencil_buffer: false,
            generate_depth_texture: false,
            samples: 1,
            lazy: false,
        }
    }
}

impl MultiRenderTargetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn types(mut self, types: Vec<TextureFormat>) -> Self {
        self.types = types;
        self
    }

    pub fn sampling_modes(mut self, modes: Vec<SamplingMode>) -> Self {
        self.sampling_modes = modes;
        self
    }

    pub fn default_type(mut self, format: TextureFormat) -> Self {
        self.default_type = format;
        self
    }

    pub fn mip_maps(mut self, enabled: bool) -> Self {
        self.generate_mip_maps = enabled;
        self
    }

    pub fn depth_buffer(mut self, enabled: bool) -> Self {
        self.generate_depth_buffer = enabled;
        self
    }

    pub fn stencil_buffer(mut self, enabled: bool) -> Self {
        self.generate_stencil_buffer = enabled;
        self
    }

    pub fn depth_texture(mut self, enabled: bool) -> Self {
        self.generate_depth_texture = enabled;
        self
    }

    pub fn samples(mut self, samples: u32) -> Self {
        self.samples = samples.max(1);
        self
    }

    pub fn lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    /// Format of attachment `index`.
    pub fn type_for(&self, index: usize) -> TextureFormat {
        self.types.get(index).copied().unwrap_or(self.default_type)
    }

    /// Sampling mode of attachment `index`.
    pub fn sampling_for(&self, index: usize) -> SamplingMode {
        self.sampling_modes
            .get(index)
            .copied()
            .unwrap_or(SamplingMode::Bilinear)
    }

    pub(crate) fn wants_depth(&self) -> bool {
        self.generate_depth_buffer || self.generate_stencil_buffer || self.generate_depth_texture
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_attachment_fallbacks() {
        let options = MultiRenderTargetOptions::new()
            .types(vec![TextureFormat::Rgba16Float])
            .default_type(TextureFormat::Rgba32Float)
            .sampling_modes(vec![SamplingMode::Nearest]);

        assert_eq!(options.type_for(0), TextureFormat::Rgba16Float);
        assert_eq!(options.type_for(2), TextureFormat::Rgba32Float);
        assert_eq!(options.sampling_for(0), SamplingMode::Nearest);
        assert_eq!(options.sampling_for(1), SamplingMode::Bilinear);
    }

    #[test]
    fn test_continuation_cap_is_at_least_one() {
        let config = EngineConfig::new().max_continuations_per_tick(0);
        assert_eq!(config.max_continuations_per_tick, Some(1));
    }
}
