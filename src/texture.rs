//! Logical texture state shared by render targets and post-processes.
//!
//! A GPU texture is referenced by a [`TextureId`] handed out by the backend.
//! Everything needed to recreate it after a context loss lives next to that
//! id in [`InternalTexture`]: the allocation [`TextureDescriptor`] plus the
//! sampler state (wrap and filtering modes) and the `is_ready` flag.

use bitflags::bitflags;

use crate::gpu::TextureId;

/// Width and height of a surface in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A square size.
    pub const fn square(side: u32) -> Self {
        Self::new(side, side)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height as f32
    }

    /// Number of mip levels of a full chain for this size.
    pub fn mip_level_count(&self) -> u32 {
        32 - self.width.max(self.height).max(1).leading_zeros()
    }
}

impl From<(u32, u32)> for Size {
    fn from((width, height): (u32, u32)) -> Self {
        Self::new(width, height)
    }
}

/// Texture addressing mode outside the `[0, 1]` range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum WrapMode {
    #[default]
    Repeat,
    ClampToEdge,
    MirrorRepeat,
}

/// Texture filtering used when sampling.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SamplingMode {
    Nearest,
    #[default]
    Bilinear,
    Trilinear,
}

/// Pixel formats the pipeline allocates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    #[default]
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8UnormSrgb,
    Rgba16Float,
    Rgba32Float,
    Depth32Float,
    Depth24PlusStencil8,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(self, Self::Depth32Float | Self::Depth24PlusStencil8)
    }

    pub fn has_stencil(&self) -> bool {
        matches!(self, Self::Depth24PlusStencil8)
    }
}

bitflags! {
    /// How a texture may be used once allocated.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const RENDER_ATTACHMENT = 1 << 0;
        const SAMPLED = 1 << 1;
        const COPY_SRC = 1 << 2;
        const COPY_DST = 1 << 3;
    }
}

/// Everything the backend needs to allocate a texture.
#[derive(Clone, Debug, PartialEq)]
pub struct TextureDescriptor {
    pub label: String,
    pub size: Size,
    pub format: TextureFormat,
    pub samples: u32,
    pub mip_level_count: u32,
    pub usage: TextureUsage,
}

impl TextureDescriptor {
    /// A sampleable color attachment.
    pub fn color(label: impl Into<String>, size: Size, format: TextureFormat) -> Self {
        Self {
            label: label.into(),
            size,
            format,
            samples: 1,
            mip_level_count: 1,
            usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::SAMPLED,
        }
    }

    /// A depth (or depth/stencil) attachment.
    pub fn depth(label: impl Into<String>, size: Size, stencil: bool, sampled: bool) -> Self {
        let mut usage = TextureUsage::RENDER_ATTACHMENT;
        if sampled {
            usage |= TextureUsage::SAMPLED;
        }
        Self {
            label: label.into(),
            size,
            format: if stencil {
                TextureFormat::Depth24PlusStencil8
            } else {
                TextureFormat::Depth32Float
            },
            samples: 1,
            mip_level_count: 1,
            usage,
        }
    }

    pub fn with_samples(mut self, samples: u32) -> Self {
        self.samples = samples.max(1);
        self
    }

    pub fn with_mipmaps(mut self, enabled: bool) -> Self {
        self.mip_level_count = if enabled {
            self.size.mip_level_count()
        } else {
            1
        };
        self
    }
}

/// What a draw needs to sample a texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SamplerBinding {
    pub texture: TextureId,
    pub wrap_u: WrapMode,
    pub wrap_v: WrapMode,
    pub sampling: SamplingMode,
}

/// A GPU texture together with the logical state needed to rebuild it.
#[derive(Clone, Debug)]
pub struct InternalTexture {
    id: TextureId,
    descriptor: TextureDescriptor,
    pub wrap_u: WrapMode,
    pub wrap_v: WrapMode,
    pub sampling: SamplingMode,
    /// False while the contents are still being produced (e.g. by a pass
    /// waiting on shader compilation). Consumers must not sample until true.
    pub is_ready: bool,
}

impl InternalTexture {
    pub(crate) fn new(id: TextureId, descriptor: TextureDescriptor) -> Self {
        Self {
            id,
            descriptor,
            wrap_u: WrapMode::ClampToEdge,
            wrap_v: WrapMode::ClampToEdge,
            sampling: SamplingMode::Bilinear,
            is_ready: true,
        }
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }

    pub fn size(&self) -> Size {
        self.descriptor.size
    }

    pub fn samples(&self) -> u32 {
        self.descriptor.samples
    }

    pub fn format(&self) -> TextureFormat {
        self.descriptor.format
    }

    pub fn sampler_binding(&self) -> SamplerBinding {
        SamplerBinding {
            texture: self.id,
            wrap_u: self.wrap_u,
            wrap_v: self.wrap_v,
            sampling: self.sampling,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_level_count() {
        assert_eq!(Size::new(1, 1).mip_level_count(), 1);
        assert_eq!(Size::new(256, 256).mip_level_count(), 9);
        assert_eq!(Size::new(300, 17).mip_level_count(), 9);
    }

    #[test]
    fn test_empty_size() {
        assert!(Size::new(0, 10).is_empty());
        assert!(!Size::square(4).is_empty());
    }

    #[test]
    fn test_depth_descriptor_format() {
        let desc = TextureDescriptor::depth("depth", Size::square(8), true, false);
        assert!(desc.format.has_stencil());
        assert!(!desc.usage.contains(TextureUsage::SAMPLED));
    }
}
