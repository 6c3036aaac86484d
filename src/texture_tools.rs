//! Texture utilities built on the readiness protocol.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::config::RenderTargetOptions;
use crate::engine::Engine;
use crate::error::Result;
use crate::post_process::PostProcess;
use crate::render_target::{RenderTarget, SharedRenderTarget};
use crate::texture::{SamplerBinding, SamplingMode, Size, WrapMode};

/// Copies `source` into a new target of `width` x `height`.
///
/// The destination is returned right away but stays not ready until the copy
/// has run, which happens once the copy program is compiled (on a later
/// [`Engine::tick`], or immediately if compilation is already done). Do not
/// sample it before [`RenderTarget::is_ready`] reports true.
///
/// The destination clamps at its edges and takes the source's sampling
/// mode. While copies are pending the source is switched to clamp
/// addressing; its previous wrap modes come back once the last pending copy
/// of that source has run or been cancelled. If the destination is dropped
/// before the copy runs, the copy is skipped. A copy whose draw fails leaves
/// the destination not ready.
pub fn create_resized_copy(
    engine: &Rc<Engine>,
    source: &SharedRenderTarget,
    width: u32,
    height: u32,
    use_bilinear: bool,
) -> Result<SharedRenderTarget> {
    let (name, sampling) = {
        let source = source.borrow();
        (source.name().to_string(), source.sampling_mode())
    };

    let options = RenderTargetOptions::new()
        .sampling(sampling)
        .wrap(WrapMode::ClampToEdge, WrapMode::ClampToEdge);
    let destination = RenderTarget::new_shared(
        engine,
        format!("resized{name}"),
        Size::new(width, height),
        options,
    )?;
    {
        let mut destination = destination.borrow_mut();
        destination.set_ready(false);
        destination.set_one_shot(true);
    }

    let filter = if use_bilinear {
        SamplingMode::Bilinear
    } else {
        SamplingMode::Nearest
    };
    let pass = PostProcess::pass_through(engine, format!("resize_{name}"), filter);

    let hold = ClampHold::new(source);
    let weak_destination = Rc::downgrade(&destination);
    let copy_pass = pass.clone();
    pass.execute_when_compiled(move |engine| {
        let source = hold.target.upgrade();
        let destination = weak_destination.upgrade();

        match (&source, &destination) {
            (Some(source), Some(destination)) => {
                let binding = source.borrow().sampler_binding();
                let mut destination = destination.borrow_mut();
                if copy_into(engine, &copy_pass, binding, &mut destination) {
                    destination.set_ready(true);
                }
                destination.dispose_framebuffer_objects();
            }
            (None, Some(destination)) => log::warn!(
                "Resized copy '{}': source dropped before the copy ran",
                destination.borrow().name()
            ),
            (_, None) => log::debug!("Resized copy target dropped before its copy ran"),
        }

        drop(source);
        copy_pass.dispose();
        drop(hold);
    });

    Ok(destination)
}

/// Draws `binding` into `destination`. Returns whether the draw went through.
fn copy_into(
    engine: &Engine,
    pass: &PostProcess,
    binding: Option<SamplerBinding>,
    destination: &mut RenderTarget,
) -> bool {
    let Some(binding) = binding else {
        log::warn!(
            "Resized copy '{}': source has no texture, skipping",
            destination.name()
        );
        return false;
    };
    let output = match destination.output() {
        Ok(output) => output,
        Err(error) => {
            log::error!(
                "Resized copy '{}': no framebuffer: {}",
                destination.name(),
                error
            );
            return false;
        }
    };

    let drawn = engine
        .bind_framebuffer(output)
        .and_then(|()| pass.apply(&[binding], 0.0));
    engine.unbind_framebuffer();
    match drawn {
        Ok(()) => true,
        Err(error) => {
            log::error!("Resized copy '{}' failed: {}", destination.name(), error);
            false
        }
    }
}

/// Keeps the source clamped while a copy is pending. Released when the copy
/// is done or cancelled (failed compile, released program); the source gets
/// its own wrap modes back once no copy holds it anymore.
struct ClampHold {
    target: Weak<RefCell<RenderTarget>>,
}

impl ClampHold {
    fn new(target: &SharedRenderTarget) -> Self {
        target.borrow_mut().hold_clamp();
        Self {
            target: Rc::downgrade(target),
        }
    }
}

impl Drop for ClampHold {
    fn drop(&mut self) {
        let Some(target) = self.target.upgrade() else {
            return;
        };
        match target.try_borrow_mut() {
            Ok(mut target) => target.release_clamp(),
            Err(_) => log::warn!("Resized copy: source is busy, clamp hold not released"),
        }
    }
}
