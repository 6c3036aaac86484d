use std::cell::RefCell;
use std::rc::Rc;

use crate::config::RenderTargetOptions;
use crate::engine::Engine;
use crate::error::{BackendError, Result};
use crate::gpu::{FramebufferDescriptor, FramebufferId, RenderOutput};
use crate::texture::{
    InternalTexture, SamplerBinding, SamplingMode, Size, TextureDescriptor, WrapMode,
};

use super::{allocate_or_rollback, release_textures, validate_size};

/// Render targets are shared between their creator and deferred work
/// (continuations hold weak references to them).
pub type SharedRenderTarget = Rc<RefCell<RenderTarget>>;

/// An off-screen color surface, optionally with a depth attachment.
///
/// The color attachment is written by a draw pass and later sampled as a
/// texture. Consumers must check [`is_ready`](Self::is_ready) before sampling
/// a target whose contents are produced asynchronously.
pub struct RenderTarget {
    engine: Rc<Engine>,
    name: String,
    size: Size,
    options: RenderTargetOptions,
    ready: bool,
    texture: Option<InternalTexture>,
    depth: Option<InternalTexture>,
    framebuffer: Option<FramebufferId>,
    /// Outstanding clamp holds and the wrap modes from before the first one.
    clamp_holds: u32,
    held_wrap: Option<(WrapMode, WrapMode)>,
    /// Contents are written once and are gone after a rebuild.
    one_shot: bool,
    disposed: bool,
}

impl RenderTarget {
    /// Allocates a target. Fails on a zero size or a lost context.
    pub fn new(
        engine: &Rc<Engine>,
        name: impl Into<String>,
        size: Size,
        options: RenderTargetOptions,
    ) -> Result<Self> {
        validate_size(size)?;
        let name = name.into();
        let mut options = options;
        options.samples = options.samples.clamp(1, engine.limits().max_samples.max(1));

        let (texture, depth) = Self::allocate(engine, &name, size, &options)?;
        log::debug!(
            "RenderTarget '{}' created ({}x{})",
            name,
            size.width,
            size.height
        );

        Ok(Self {
            engine: engine.clone(),
            name,
            size,
            options,
            ready: true,
            texture: Some(texture),
            depth,
            framebuffer: None,
            clamp_holds: 0,
            held_wrap: None,
            one_shot: false,
            disposed: false,
        })
    }

    /// Same as [`new`](Self::new), wrapped for sharing.
    pub fn new_shared(
        engine: &Rc<Engine>,
        name: impl Into<String>,
        size: Size,
        options: RenderTargetOptions,
    ) -> Result<SharedRenderTarget> {
        Ok(Rc::new(RefCell::new(Self::new(engine, name, size, options)?)))
    }

    fn allocate(
        engine: &Rc<Engine>,
        name: &str,
        size: Size,
        options: &RenderTargetOptions,
    ) -> Result<(InternalTexture, Option<InternalTexture>)> {
        let mut created = Vec::with_capacity(2);

        let descriptor = TextureDescriptor::color(name, size, options.format)
            .with_samples(options.samples)
            .with_mipmaps(options.generate_mip_maps && options.samples == 1);
        let mut color = allocate_or_rollback(engine, descriptor, &mut created)?;
        color.wrap_u = options.wrap_u;
        color.wrap_v = options.wrap_v;
        color.sampling = options.sampling;

        let depth = if options.generate_depth_buffer {
            created.push(color.clone());
            let descriptor = TextureDescriptor::depth(
                format!("{name}_depth"),
                size,
                options.generate_stencil_buffer,
                false,
            )
            .with_samples(options.samples);
            Some(allocate_or_rollback(engine, descriptor, &mut created)?)
        } else {
            None
        };

        Ok((color, depth))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn engine(&self) -> &Rc<Engine> {
        &self.engine
    }

    pub fn options(&self) -> &RenderTargetOptions {
        &self.options
    }

    /// The color attachment, absent once released or disposed.
    pub fn texture(&self) -> Option<&InternalTexture> {
        self.texture.as_ref()
    }

    pub fn depth_texture(&self) -> Option<&InternalTexture> {
        self.depth.as_ref()
    }

    pub fn sampler_binding(&self) -> Option<SamplerBinding> {
        self.texture.as_ref().map(InternalTexture::sampler_binding)
    }

    /// True when the color attachment exists and its contents may be sampled.
    pub fn is_ready(&self) -> bool {
        self.ready && self.texture.is_some()
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
        if let Some(texture) = &mut self.texture {
            texture.is_ready = ready;
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn wrap_u(&self) -> WrapMode {
        self.options.wrap_u
    }

    pub fn wrap_v(&self) -> WrapMode {
        self.options.wrap_v
    }

    pub fn set_wrap_u(&mut self, wrap: WrapMode) {
        self.options.wrap_u = wrap;
        if let Some(texture) = &mut self.texture {
            texture.wrap_u = wrap;
        }
    }

    pub fn set_wrap_v(&mut self, wrap: WrapMode) {
        self.options.wrap_v = wrap;
        if let Some(texture) = &mut self.texture {
            texture.wrap_v = wrap;
        }
    }

    /// Switches the target to clamp addressing until every hold is released.
    /// The wrap modes in place before the first hold come back with the last
    /// release.
    pub(crate) fn hold_clamp(&mut self) {
        if self.clamp_holds == 0 {
            self.held_wrap = Some((self.options.wrap_u, self.options.wrap_v));
        }
        self.clamp_holds += 1;
        self.set_wrap_u(WrapMode::ClampToEdge);
        self.set_wrap_v(WrapMode::ClampToEdge);
    }

    pub(crate) fn release_clamp(&mut self) {
        self.clamp_holds = self.clamp_holds.saturating_sub(1);
        if self.clamp_holds > 0 {
            return;
        }
        if let Some((wrap_u, wrap_v)) = self.held_wrap.take() {
            self.set_wrap_u(wrap_u);
            self.set_wrap_v(wrap_v);
        }
    }

    /// Marks the contents as produced by a single pass: a rebuild leaves the
    /// target not ready until that pass runs again.
    pub(crate) fn set_one_shot(&mut self, one_shot: bool) {
        self.one_shot = one_shot;
    }

    pub fn sampling_mode(&self) -> SamplingMode {
        self.options.sampling
    }

    pub fn set_sampling_mode(&mut self, sampling: SamplingMode) {
        self.options.sampling = sampling;
        if let Some(texture) = &mut self.texture {
            texture.sampling = sampling;
        }
    }

    /// Reallocates the attachments at `size`.
    ///
    /// The new attachments are allocated before the old ones are released;
    /// on failure the target keeps its previous attachments and size.
    pub fn resize(&mut self, size: Size) -> Result<()> {
        validate_size(size)?;
        self.ensure_live()?;
        if size == self.size && self.texture.is_some() {
            return Ok(());
        }

        let (texture, depth) = Self::allocate(&self.engine, &self.name, size, &self.options)?;
        self.release_internal_texture();
        self.install(texture, depth);
        self.size = size;
        log::debug!(
            "RenderTarget '{}' resized to {}x{}",
            self.name,
            size.width,
            size.height
        );
        Ok(())
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed {
            return Err(BackendError::ResourceCreation(format!(
                "render target '{}' is disposed",
                self.name
            ))
            .into());
        }
        Ok(())
    }

    fn install(&mut self, mut texture: InternalTexture, depth: Option<InternalTexture>) {
        texture.is_ready = self.ready;
        self.texture = Some(texture);
        self.depth = depth;
    }

    /// The framebuffer drawing into this target, created on first use.
    pub fn framebuffer(&mut self) -> Result<FramebufferId> {
        if let Some(framebuffer) = self.framebuffer {
            return Ok(framebuffer);
        }
        self.ensure_live()?;
        if self.texture.is_none() {
            self.resize(self.size)?;
        }

        let descriptor = FramebufferDescriptor {
            label: self.name.clone(),
            color: self.texture.iter().map(InternalTexture::id).collect(),
            depth: self.depth.as_ref().map(InternalTexture::id),
        };
        let framebuffer = self.engine.create_framebuffer(&descriptor)?;
        self.framebuffer = Some(framebuffer);
        Ok(framebuffer)
    }

    pub fn output(&mut self) -> Result<RenderOutput> {
        Ok(RenderOutput::Framebuffer(self.framebuffer()?))
    }

    /// Releases the framebuffer, keeping the attachments.
    pub fn dispose_framebuffer_objects(&mut self) {
        if let Some(framebuffer) = self.framebuffer.take() {
            self.engine.release_framebuffer(framebuffer);
        }
    }

    /// Releases the GPU attachments. The target stays usable: the next
    /// [`resize`](Self::resize), [`rebuild`](Self::rebuild) or
    /// [`framebuffer`](Self::framebuffer) reallocates them.
    pub fn release_internal_texture(&mut self) {
        self.dispose_framebuffer_objects();
        release_textures(
            &self.engine,
            self.texture.take().into_iter().chain(self.depth.take()),
        );
    }

    /// Recreates the attachments from logical state after a context loss.
    ///
    /// The previous handles are assumed invalid and are not released. A
    /// target filled by a one-shot pass (such as a resized copy) comes back
    /// not ready.
    pub fn rebuild(&mut self) -> Result<()> {
        if self.disposed {
            return Ok(());
        }
        self.framebuffer = None;
        self.texture = None;
        self.depth = None;
        if self.one_shot {
            self.ready = false;
        }

        let (texture, depth) = Self::allocate(&self.engine, &self.name, self.size, &self.options)?;
        self.install(texture, depth);
        log::debug!("RenderTarget '{}' rebuilt", self.name);
        Ok(())
    }

    /// Releases everything. Safe to call more than once.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.release_internal_texture();
        self.disposed = true;
        log::debug!("RenderTarget '{}' disposed", self.name);
    }
}

impl Drop for RenderTarget {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for RenderTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTarget")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("ready", &self.ready)
            .field("texture", &self.texture.as_ref().map(InternalTexture::id))
            .field("disposed", &self.disposed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::gpu::HeadlessBackend;

    #[test]
    fn test_zero_size_is_fatal() {
        let engine = Engine::new(HeadlessBackend::default());
        let result = RenderTarget::new(
            &engine,
            "empty",
            Size::new(0, 4),
            RenderTargetOptions::default(),
        );
        assert!(matches!(result, Err(PipelineError::InvalidSize { .. })));
    }

    #[test]
    fn test_resize_swaps_attachments() {
        let backend = HeadlessBackend::default();
        let engine = Engine::new(backend.clone());
        let mut target = RenderTarget::new(
            &engine,
            "rt",
            Size::square(32),
            RenderTargetOptions::new().depth(true, false),
        )
        .unwrap();
        let old = target.texture().unwrap().id();
        assert_eq!(backend.live_texture_count(), 2);

        target.resize(Size::new(64, 16)).unwrap();
        assert!(!backend.is_live_texture(old));
        assert_eq!(backend.live_texture_count(), 2);
        assert_eq!(target.texture().unwrap().size(), Size::new(64, 16));
        assert_eq!(target.depth_texture().unwrap().size(), Size::new(64, 16));
    }

    #[test]
    fn test_framebuffer_created_on_demand() {
        let backend = HeadlessBackend::default();
        let engine = Engine::new(backend.clone());
        let mut target =
            RenderTarget::new(&engine, "rt", Size::square(8), RenderTargetOptions::default())
                .unwrap();
        assert_eq!(backend.live_framebuffer_count(), 0);

        let first = target.framebuffer().unwrap();
        assert_eq!(target.framebuffer().unwrap(), first);
        target.dispose_framebuffer_objects();
        assert_eq!(backend.live_framebuffer_count(), 0);
    }

    #[test]
    fn test_nested_clamp_holds_restore_original_wrap() {
        let engine = Engine::new(HeadlessBackend::default());
        let mut target = RenderTarget::new(
            &engine,
            "rt",
            Size::square(8),
            RenderTargetOptions::new().wrap(WrapMode::Repeat, WrapMode::MirrorRepeat),
        )
        .unwrap();

        target.hold_clamp();
        target.hold_clamp();
        target.release_clamp();
        assert_eq!(target.wrap_u(), WrapMode::ClampToEdge);

        target.release_clamp();
        assert_eq!(target.wrap_u(), WrapMode::Repeat);
        assert_eq!(target.wrap_v(), WrapMode::MirrorRepeat);
        assert_eq!(target.texture().unwrap().wrap_v, WrapMode::MirrorRepeat);
    }

    #[test]
    fn test_dispose_is_idempotent_and_releases() {
        let backend = HeadlessBackend::default();
        let engine = Engine::new(backend.clone());
        let mut target =
            RenderTarget::new(&engine, "rt", Size::square(8), RenderTargetOptions::default())
                .unwrap();
        target.framebuffer().unwrap();
        target.dispose();
        target.dispose();
        assert_eq!(backend.live_texture_count(), 0);
        assert_eq!(backend.live_framebuffer_count(), 0);
        assert!(!target.is_ready());
    }
}
