use std::rc::Rc;

use crate::config::MultiRenderTargetOptions;
use crate::engine::Engine;
use crate::error::{BackendError, PipelineError, Result};
use crate::gpu::{FramebufferDescriptor, FramebufferId, GpuFeatures, RenderOutput};
use crate::texture::{InternalTexture, Size, TextureDescriptor, WrapMode};

use super::{allocate_or_rollback, release_textures, validate_size};

/// `count` color attachments written together, plus an optional shared
/// depth attachment.
///
/// Attachment `i` receives shader output `i`. All attachments share the
/// target's size, sample count and wrap modes, and are always regenerated as
/// a complete set.
///
/// When the device cannot draw `count` attachments at once the target is
/// still constructed, but [`is_supported`](Self::is_supported) is false and
/// no attachment is ever allocated.
pub struct MultiRenderTarget {
    engine: Rc<Engine>,
    name: String,
    size: Size,
    count: usize,
    samples: u32,
    options: MultiRenderTargetOptions,
    wrap_u: WrapMode,
    wrap_v: WrapMode,
    textures: Vec<InternalTexture>,
    depth: Option<InternalTexture>,
    framebuffer: Option<FramebufferId>,
    /// Attachments were allocated at least once (lazy targets rebuild only
    /// after that).
    created: bool,
    disposed: bool,
}

impl MultiRenderTarget {
    pub fn new(
        engine: &Rc<Engine>,
        name: impl Into<String>,
        size: Size,
        count: usize,
        options: MultiRenderTargetOptions,
    ) -> Result<Self> {
        validate_size(size)?;
        if count == 0 {
            return Err(PipelineError::InvalidAttachmentCount(count));
        }
        if engine.is_context_lost() {
            return Err(PipelineError::ContextLost);
        }

        let samples = options.samples.clamp(1, engine.limits().max_samples.max(1));
        let mut target = Self {
            engine: engine.clone(),
            name: name.into(),
            size,
            count,
            samples,
            options,
            wrap_u: WrapMode::ClampToEdge,
            wrap_v: WrapMode::ClampToEdge,
            textures: Vec::new(),
            depth: None,
            framebuffer: None,
            created: false,
            disposed: false,
        };

        if !target.is_supported() {
            log::warn!(
                "MultiRenderTarget '{}': {} attachments not supported by the {} backend",
                target.name,
                count,
                engine.backend_name()
            );
        } else if !target.options.lazy {
            target.create_internal_textures()?;
        }

        log::debug!(
            "MultiRenderTarget '{}' created ({}x{}, {} attachments, {} samples)",
            target.name,
            size.width,
            size.height,
            count,
            samples
        );
        Ok(target)
    }

    /// True when the device can draw all attachments in one pass.
    pub fn is_supported(&self) -> bool {
        let limits = self.engine.limits();
        let multiple =
            self.count == 1 || self.engine.supports(GpuFeatures::MULTIPLE_RENDER_TARGETS);
        multiple && self.count as u32 <= limits.max_color_attachments
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    pub fn options(&self) -> &MultiRenderTargetOptions {
        &self.options
    }

    /// The color attachments in shader output order. Empty while not
    /// allocated (lazy, released, unsupported or disposed).
    pub fn textures(&self) -> &[InternalTexture] {
        &self.textures
    }

    pub fn texture(&self, index: usize) -> Option<&InternalTexture> {
        self.textures.get(index)
    }

    pub fn depth_texture(&self) -> Option<&InternalTexture> {
        self.depth.as_ref()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// True when the full set of attachments exists and is ready.
    pub fn is_ready(&self) -> bool {
        self.textures.len() == self.count && self.textures.iter().all(|t| t.is_ready)
    }

    /// Allocates the attachments if they are not allocated yet.
    pub fn ensure_textures(&mut self) -> Result<()> {
        if self.textures.is_empty() {
            self.create_internal_textures()?;
        }
        Ok(())
    }

    fn create_internal_textures(&mut self) -> Result<()> {
        if self.disposed {
            return Err(BackendError::ResourceCreation(format!(
                "multi render target '{}' is disposed",
                self.name
            ))
            .into());
        }
        if !self.is_supported() {
            return Ok(());
        }

        let (textures, depth) = self.allocate_set(self.size, self.samples)?;
        self.swap_in(textures, depth);
        Ok(())
    }

    /// Allocates a complete set. Either every attachment is created or none
    /// is left behind.
    fn allocate_set(
        &self,
        size: Size,
        samples: u32,
    ) -> Result<(Vec<InternalTexture>, Option<InternalTexture>)> {
        let mut created: Vec<InternalTexture> = Vec::with_capacity(self.count + 1);

        for index in 0..self.count {
            let descriptor = TextureDescriptor::color(
                format!("{}_{}", self.name, index),
                size,
                self.options.type_for(index),
            )
            .with_samples(samples)
            .with_mipmaps(self.options.generate_mip_maps && samples == 1);

            let mut texture = allocate_or_rollback(&self.engine, descriptor, &mut created)?;
            texture.sampling = self.options.sampling_for(index);
            texture.wrap_u = self.wrap_u;
            texture.wrap_v = self.wrap_v;
            created.push(texture);
        }

        let depth = if self.options.wants_depth() {
            let descriptor = TextureDescriptor::depth(
                format!("{}_depth", self.name),
                size,
                self.options.generate_stencil_buffer,
                self.options.generate_depth_texture,
            )
            .with_samples(samples);
            Some(allocate_or_rollback(&self.engine, descriptor, &mut created)?)
        } else {
            None
        };

        Ok((created, depth))
    }

    /// Replaces the current set with a fully allocated one.
    fn swap_in(&mut self, textures: Vec<InternalTexture>, depth: Option<InternalTexture>) {
        self.release_internal_textures();
        self.textures = textures;
        self.depth = depth;
        self.created = true;
    }

    /// Resizes every attachment.
    ///
    /// Attachments not allocated yet only take the new size. Otherwise a new
    /// set is allocated before the old one is released; on failure the old
    /// set and size stay in place.
    pub fn resize(&mut self, size: Size) -> Result<()> {
        validate_size(size)?;
        if size == self.size && !self.textures.is_empty() {
            return Ok(());
        }

        if self.textures.is_empty() {
            self.size = size;
            return Ok(());
        }

        let (textures, depth) = self.allocate_set(size, self.samples)?;
        self.swap_in(textures, depth);
        self.size = size;
        log::debug!(
            "MultiRenderTarget '{}' resized to {}x{}",
            self.name,
            size.width,
            size.height
        );
        Ok(())
    }

    /// Changes the MSAA sample count, clamped to the device maximum.
    ///
    /// Returns the effective count. Same regeneration rules as
    /// [`resize`](Self::resize); an unchanged count is a no-op.
    pub fn set_samples(&mut self, samples: u32) -> Result<u32> {
        let samples = samples.clamp(1, self.engine.limits().max_samples.max(1));
        if samples == self.samples {
            return Ok(self.samples);
        }

        if !self.textures.is_empty() {
            let (textures, depth) = self.allocate_set(self.size, samples)?;
            self.swap_in(textures, depth);
        }
        self.samples = samples;
        log::debug!(
            "MultiRenderTarget '{}' now uses {} samples",
            self.name,
            samples
        );
        Ok(samples)
    }

    pub fn wrap_u(&self) -> WrapMode {
        self.wrap_u
    }

    pub fn wrap_v(&self) -> WrapMode {
        self.wrap_v
    }

    /// Sets the horizontal wrap mode of every attachment.
    pub fn set_wrap_u(&mut self, wrap: WrapMode) {
        self.wrap_u = wrap;
        for texture in &mut self.textures {
            texture.wrap_u = wrap;
        }
    }

    /// Sets the vertical wrap mode of every attachment.
    pub fn set_wrap_v(&mut self, wrap: WrapMode) {
        self.wrap_v = wrap;
        for texture in &mut self.textures {
            texture.wrap_v = wrap;
        }
    }

    /// The framebuffer binding every attachment, allocating lazily.
    pub fn framebuffer(&mut self) -> Result<FramebufferId> {
        if let Some(framebuffer) = self.framebuffer {
            return Ok(framebuffer);
        }
        self.ensure_textures()?;
        if self.textures.is_empty() {
            return Err(BackendError::ResourceCreation(format!(
                "multi render target '{}' has no attachments",
                self.name
            ))
            .into());
        }

        let descriptor = FramebufferDescriptor {
            label: self.name.clone(),
            color: self.textures.iter().map(InternalTexture::id).collect(),
            depth: self.depth.as_ref().map(InternalTexture::id),
        };
        let framebuffer = self.engine.create_framebuffer(&descriptor)?;
        self.framebuffer = Some(framebuffer);
        Ok(framebuffer)
    }

    pub fn output(&mut self) -> Result<RenderOutput> {
        Ok(RenderOutput::Framebuffer(self.framebuffer()?))
    }

    pub fn dispose_framebuffer_objects(&mut self) {
        if let Some(framebuffer) = self.framebuffer.take() {
            self.engine.release_framebuffer(framebuffer);
        }
    }

    /// Frees the attachments. The target stays usable and reallocates on
    /// the next [`rebuild`](Self::rebuild), [`framebuffer`](Self::framebuffer)
    /// or [`ensure_textures`](Self::ensure_textures).
    pub fn release_internal_textures(&mut self) {
        self.dispose_framebuffer_objects();
        let textures = std::mem::take(&mut self.textures);
        release_textures(&self.engine, textures.into_iter().chain(self.depth.take()));
    }

    /// Recreates every attachment from size, count, samples and options
    /// after a context loss. Previous handles are dropped, not released.
    pub fn rebuild(&mut self) -> Result<()> {
        if self.disposed {
            return Ok(());
        }
        self.framebuffer = None;
        self.textures.clear();
        self.depth = None;

        if self.options.lazy && !self.created {
            return Ok(());
        }
        self.create_internal_textures()?;
        log::debug!("MultiRenderTarget '{}' rebuilt", self.name);
        Ok(())
    }

    /// Releases the target. Safe to call more than once.
    ///
    /// With `do_not_recurse` the color attachments are not destroyed but
    /// handed back to the caller, who becomes responsible for releasing
    /// them. The framebuffer and depth attachment are always released.
    pub fn dispose(&mut self, do_not_recurse: bool) -> Vec<InternalTexture> {
        if self.disposed {
            return Vec::new();
        }
        let kept = if do_not_recurse {
            std::mem::take(&mut self.textures)
        } else {
            Vec::new()
        };
        self.release_internal_textures();
        self.disposed = true;
        log::debug!("MultiRenderTarget '{}' disposed", self.name);
        kept
    }
}

impl Drop for MultiRenderTarget {
    fn drop(&mut self) {
        self.dispose(false);
    }
}

impl std::fmt::Debug for MultiRenderTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiRenderTarget")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("count", &self.count)
            .field("samples", &self.samples)
            .field("allocated", &self.textures.len())
            .field("disposed", &self.disposed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{GpuLimits, HeadlessBackend, HeadlessConfig};

    #[test]
    fn test_zero_count_is_fatal() {
        let engine = Engine::new(HeadlessBackend::default());
        let result =
            MultiRenderTarget::new(&engine, "mrt", Size::square(4), 0, Default::default());
        assert!(matches!(
            result,
            Err(PipelineError::InvalidAttachmentCount(0))
        ));
    }

    #[test]
    fn test_lazy_target_allocates_on_framebuffer() {
        let backend = HeadlessBackend::default();
        let engine = Engine::new(backend.clone());
        let mut mrt = MultiRenderTarget::new(
            &engine,
            "lazy",
            Size::square(16),
            2,
            MultiRenderTargetOptions::new().lazy(true).depth_buffer(false),
        )
        .unwrap();
        assert!(mrt.textures().is_empty());

        mrt.framebuffer().unwrap();
        assert_eq!(mrt.textures().len(), 2);
        assert_eq!(backend.live_texture_count(), 2);
    }

    #[test]
    fn test_failed_resize_keeps_old_set() {
        let limits = GpuLimits {
            max_texture_size: 128,
            ..Default::default()
        };
        let backend = HeadlessBackend::new(HeadlessConfig::new().limits(limits));
        let engine = Engine::new(backend.clone());
        let mut mrt = MultiRenderTarget::new(
            &engine,
            "gbuffer",
            Size::square(64),
            3,
            MultiRenderTargetOptions::default(),
        )
        .unwrap();
        let before: Vec<_> = mrt.textures().iter().map(|t| t.id()).collect();

        assert!(mrt.resize(Size::square(256)).is_err());
        let after: Vec<_> = mrt.textures().iter().map(|t| t.id()).collect();
        assert_eq!(before, after);
        assert_eq!(mrt.size(), Size::square(64));
        // Three colors plus depth, nothing leaked by the failed attempt.
        assert_eq!(backend.live_texture_count(), 4);
    }

    #[test]
    fn test_dispose_without_recursion_hands_back_textures() {
        let backend = HeadlessBackend::default();
        let engine = Engine::new(backend.clone());
        let mut mrt = MultiRenderTarget::new(
            &engine,
            "mrt",
            Size::square(8),
            2,
            MultiRenderTargetOptions::default(),
        )
        .unwrap();

        let kept = mrt.dispose(true);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|t| backend.is_live_texture(t.id())));
        assert!(mrt.dispose(true).is_empty());
    }
}
