//! The shared engine handle.
//!
//! [`Engine`] wraps a [`GpuBackend`] and owns the program table. Pipelines,
//! targets and passes hold an `Rc<Engine>` and go through it for every GPU
//! call. The frame loop calls [`Engine::tick`] once per frame: it polls the
//! backend for finished compilations and runs the continuations that were
//! waiting on them.
//!
//! ```
//! use postchain::{Engine, HeadlessBackend, ProgramDescriptor, ProgramState};
//!
//! let engine = Engine::new(HeadlessBackend::default());
//! let program = engine.create_program(ProgramDescriptor::new("blit", "..."));
//! assert_eq!(engine.program_state(program), Some(ProgramState::Compiling));
//!
//! engine.execute_when_compiled(program, |_| println!("ready"));
//! engine.tick();
//! assert_eq!(engine.program_state(program), Some(ProgramState::Ready));
//! ```

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::config::EngineConfig;
use crate::error::{PipelineError, Result};
use crate::gpu::{
    FramebufferDescriptor, FramebufferId, FullscreenDraw, GpuBackend, GpuFeatures, GpuLimits,
    ProgramDescriptor, ProgramId, RenderOutput, TextureId,
};
use crate::program::{Continuation, ProgramState, ProgramTable};
use crate::texture::TextureDescriptor;

pub struct Engine {
    config: EngineConfig,
    backend: RefCell<Box<dyn GpuBackend>>,
    programs: RefCell<ProgramTable>,
    next_program: Cell<u64>,
    context_lost: Cell<bool>,
    frame: Cell<u64>,
}

impl Engine {
    pub fn new(backend: impl GpuBackend + 'static) -> Rc<Self> {
        Self::with_config(backend, EngineConfig::default())
    }

    pub fn with_config(backend: impl GpuBackend + 'static, config: EngineConfig) -> Rc<Self> {
        log::info!(
            "Engine '{}' created on {} backend",
            config.label,
            backend.name()
        );
        Rc::new(Self {
            config,
            backend: RefCell::new(Box::new(backend)),
            programs: RefCell::new(ProgramTable::new()),
            next_program: Cell::new(0),
            context_lost: Cell::new(false),
            frame: Cell::new(0),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn backend_name(&self) -> String {
        self.backend.borrow().name().to_string()
    }

    pub fn features(&self) -> GpuFeatures {
        self.backend.borrow().features()
    }

    pub fn limits(&self) -> GpuLimits {
        self.backend.borrow().limits()
    }

    /// True when the backend provides every feature in `features`.
    pub fn supports(&self, features: GpuFeatures) -> bool {
        self.features().contains(features)
    }

    /// Number of completed [`tick`](Self::tick) calls.
    pub fn frame(&self) -> u64 {
        self.frame.get()
    }

    fn ensure_context(&self) -> Result<()> {
        if self.context_lost.get() {
            Err(PipelineError::ContextLost)
        } else {
            Ok(())
        }
    }

    // Resources

    pub fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<TextureId> {
        self.ensure_context()?;
        Ok(self.backend.borrow_mut().create_texture(descriptor)?)
    }

    pub fn release_texture(&self, texture: TextureId) {
        self.backend.borrow_mut().destroy_texture(texture);
    }

    pub fn create_framebuffer(&self, descriptor: &FramebufferDescriptor) -> Result<FramebufferId> {
        self.ensure_context()?;
        Ok(self.backend.borrow_mut().create_framebuffer(descriptor)?)
    }

    pub fn release_framebuffer(&self, framebuffer: FramebufferId) {
        self.backend.borrow_mut().destroy_framebuffer(framebuffer);
    }

    pub fn bind_framebuffer(&self, output: RenderOutput) -> Result<()> {
        self.ensure_context()?;
        Ok(self.backend.borrow_mut().bind_framebuffer(output)?)
    }

    pub fn unbind_framebuffer(&self) {
        self.backend.borrow_mut().unbind_framebuffer();
    }

    pub fn draw_fullscreen(&self, draw: &FullscreenDraw) -> Result<()> {
        self.ensure_context()?;
        Ok(self.backend.borrow_mut().draw_fullscreen(draw)?)
    }

    pub fn present(&self) {
        if !self.context_lost.get() {
            self.backend.borrow_mut().present();
        }
    }

    pub fn resize_surface(&self, width: u32, height: u32) {
        self.backend.borrow_mut().resize_surface(width, height);
    }

    // Programs

    /// Creates a program and submits it for compilation.
    ///
    /// The program is never `Ready` before the next [`tick`](Self::tick).
    /// While the context is lost it stays `Uncompiled` until
    /// [`restore_context`](Self::restore_context).
    pub fn create_program(&self, descriptor: ProgramDescriptor) -> ProgramId {
        let id = ProgramId(self.next_program.get() + 1);
        self.next_program.set(id.0);

        log::debug!("Engine: creating program {:?} '{}'", id, descriptor.label);

        let submit = !self.context_lost.get();
        if submit {
            self.backend.borrow_mut().compile_program(id, &descriptor);
        }

        let mut programs = self.programs.borrow_mut();
        programs.insert(id, descriptor);
        if submit {
            programs.set_compiling(id);
        }
        id
    }

    pub fn program_state(&self, program: ProgramId) -> Option<ProgramState> {
        self.programs.borrow().state(program)
    }

    /// The compile error of a failed program.
    pub fn program_error(&self, program: ProgramId) -> Option<String> {
        self.programs
            .borrow()
            .error(program)
            .map(|error| error.to_string())
    }

    pub fn live_program_count(&self) -> usize {
        self.programs.borrow().len()
    }

    /// Continuations waiting in the ready queue for a later tick.
    pub fn queued_continuations(&self) -> usize {
        self.programs.borrow().queued_len()
    }

    /// Runs `continuation` once `program` is ready.
    ///
    /// A ready program runs it immediately, unless earlier continuations of
    /// the same program are still queued, in which case it queues behind
    /// them. A compiling program queues it for a later tick. Continuations
    /// for failed or released programs are dropped without running.
    pub fn execute_when_compiled(
        &self,
        program: ProgramId,
        continuation: impl FnOnce(&Engine) + 'static,
    ) {
        let run_now = {
            let programs = self.programs.borrow();
            programs.state(program) == Some(ProgramState::Ready) && !programs.has_queued(program)
        };
        if run_now {
            continuation(self);
            return;
        }

        let rejected = self
            .programs
            .borrow_mut()
            .enqueue(program, Box::new(continuation));
        if let Err(continuation) = rejected {
            log::warn!(
                "Engine: program {:?} is failed or released, dropping continuation",
                program
            );
            drop(continuation);
        }
    }

    /// Releases a program. Its pending continuations are cancelled.
    pub fn release_program(&self, program: ProgramId) {
        let cancelled = self.programs.borrow_mut().remove(program);
        if !cancelled.is_empty() {
            log::debug!(
                "Engine: releasing program {:?}, cancelling {} continuations",
                program,
                cancelled.len()
            );
        }
        self.backend.borrow_mut().destroy_program(program);
        drop(cancelled);
    }

    /// Advances one frame.
    ///
    /// Polls the backend for finished compilations, then runs ready
    /// continuations in completion order (up to the configured cap).
    /// Returns how many continuations ran.
    pub fn tick(&self) -> usize {
        self.frame.set(self.frame.get() + 1);
        if self.context_lost.get() {
            return 0;
        }

        let finished = self.backend.borrow_mut().poll_compiled();

        let mut cancelled: Vec<Continuation> = Vec::new();
        {
            let mut programs = self.programs.borrow_mut();
            for status in finished {
                match status.result {
                    Ok(()) => {
                        let queued = programs.mark_ready(status.program);
                        log::trace!(
                            "Engine: program {:?} ready, {} continuations queued",
                            status.program,
                            queued
                        );
                    }
                    Err(error) => {
                        let label = programs
                            .descriptor(status.program)
                            .map(|d| d.label.clone())
                            .unwrap_or_default();
                        log::error!("Program '{}' failed to compile: {}", label, error);
                        cancelled.extend(programs.mark_failed(status.program, error));
                    }
                }
            }
        }
        drop(cancelled);

        let budget = self.config.max_continuations_per_tick.unwrap_or(usize::MAX);
        let mut ran = 0;
        while ran < budget {
            let next = self.programs.borrow_mut().pop_ready();
            let Some((program, continuation)) = next else {
                break;
            };
            if self.program_state(program) != Some(ProgramState::Ready) {
                drop(continuation);
                continue;
            }
            continuation(self);
            ran += 1;
        }

        if ran > 0 {
            log::trace!("Engine: frame {} ran {} continuations", self.frame(), ran);
        }
        ran
    }

    // Context loss

    /// Marks the GPU context as lost. Every handle issued so far is invalid
    /// from now on.
    pub fn notify_context_lost(&self) {
        if !self.context_lost.replace(true) {
            log::warn!("Engine '{}': GPU context lost", self.config.label);
        }
    }

    pub fn is_context_lost(&self) -> bool {
        self.context_lost.get()
    }

    /// Resets the backend and resubmits every live program.
    ///
    /// Targets still hold handles from before the loss and must be rebuilt
    /// afterwards. Returns how many programs were resubmitted.
    pub fn restore_context(&self) -> usize {
        self.backend.borrow_mut().reset();
        self.context_lost.set(false);

        let resubmit = self.programs.borrow_mut().prepare_resubmit();
        {
            let mut backend = self.backend.borrow_mut();
            for (id, descriptor) in &resubmit {
                backend.compile_program(*id, descriptor);
            }
        }

        log::info!(
            "Engine '{}': context restored, {} programs resubmitted",
            self.config.label,
            resubmit.len()
        );
        resubmit.len()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("label", &self.config.label)
            .field("frame", &self.frame.get())
            .field("context_lost", &self.context_lost.get())
            .finish()
    }
}
