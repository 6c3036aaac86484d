//! Off-screen render targets.
//!
//! A [`RenderTarget`] owns one color attachment (plus an optional depth
//! attachment); a [`MultiRenderTarget`] owns `count` color attachments drawn
//! in a single pass. Both keep enough logical state (size, formats, sampler
//! modes, ready flag) to recreate their attachments after a context loss via
//! `rebuild`, and both regenerate their attachments as a unit: a new set is
//! allocated in full before the old one is released, so readers only ever see
//! one complete set.

mod multi;
mod target;

pub use multi::MultiRenderTarget;
pub use target::{RenderTarget, SharedRenderTarget};

use std::rc::Rc;

use crate::engine::Engine;
use crate::error::{PipelineError, Result};
use crate::texture::{InternalTexture, Size, TextureDescriptor};

pub(crate) fn validate_size(size: Size) -> Result<()> {
    if size.is_empty() {
        return Err(PipelineError::InvalidSize {
            width: size.width,
            height: size.height,
        });
    }
    Ok(())
}

/// Allocates one attachment, releasing `partial` if it fails.
pub(crate) fn allocate_or_rollback(
    engine: &Rc<Engine>,
    descriptor: TextureDescriptor,
    partial: &mut Vec<InternalTexture>,
) -> Result<InternalTexture> {
    match engine.create_texture(&descriptor) {
        Ok(id) => Ok(InternalTexture::new(id, descriptor)),
        Err(error) => {
            log::warn!(
                "Failed to allocate attachment '{}': {}",
                descriptor.label,
                error
            );
            release_textures(engine, partial.drain(..));
            Err(error)
        }
    }
}

pub(crate) fn release_textures(
    engine: &Engine,
    textures: impl IntoIterator<Item = InternalTexture>,
) {
    for texture in textures {
        engine.release_texture(texture.id());
    }
}
