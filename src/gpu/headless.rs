//! A backend that performs no GPU work.
//!
//! [`HeadlessBackend`] keeps the same bookkeeping a real device would (live
//! textures, framebuffers, compiled programs, the bound output) and records
//! every draw. Compilation finishes on the next poll by default; with
//! [`HeadlessConfig::manual_compile`] the caller decides when, and in which
//! order, programs finish via [`HeadlessBackend::complete_program`] and
//! [`HeadlessBackend::fail_program`].
//!
//! The backend is a cheap handle over shared state: keep a clone to inspect
//! it after handing the original to an [`Engine`](crate::Engine).

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use crate::error::BackendError;
use crate::texture::{SamplerBinding, Size, TextureDescriptor};

use super::{
    CompileStatus, FramebufferDescriptor, FramebufferId, FullscreenDraw, GpuBackend, GpuFeatures,
    GpuLimits, ProgramDescriptor, ProgramId, RenderOutput, TextureId,
};

/// Capabilities and compile behavior of a [`HeadlessBackend`].
#[derive(Clone, Debug)]
pub struct HeadlessConfig {
    pub features: GpuFeatures,
    pub limits: GpuLimits,
    /// Size reported for [`RenderOutput::Screen`].
    pub screen_size: Size,
    /// Finish every submitted compilation on the next poll.
    pub auto_compile: bool,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            features: GpuFeatures::all(),
            limits: GpuLimits::default(),
            screen_size: Size::new(800, 600),
            auto_compile: true,
        }
    }
}

impl HeadlessConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn features(mut self, features: GpuFeatures) -> Self {
        self.features = features;
        self
    }

    pub fn limits(mut self, limits: GpuLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn screen_size(mut self, width: u32, height: u32) -> Self {
        self.screen_size = Size::new(width, height);
        self
    }

    /// Leave compilations pending until completed explicitly.
    pub fn manual_compile(mut self) -> Self {
        self.auto_compile = false;
        self
    }
}

/// A draw recorded by the headless backend.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletedDraw {
    pub output: RenderOutput,
    pub output_size: Size,
    pub program: ProgramId,
    pub inputs: Vec<SamplerBinding>,
}

#[derive(Debug)]
struct HeadlessState {
    config: HeadlessConfig,
    next_id: u64,
    textures: HashMap<TextureId, TextureDescriptor>,
    framebuffers: HashMap<FramebufferId, FramebufferDescriptor>,
    programs: HashMap<ProgramId, ProgramDescriptor>,
    submitted: Vec<ProgramId>,
    finished: VecDeque<CompileStatus>,
    compiled: HashSet<ProgramId>,
    bound: Option<RenderOutput>,
    draws: Vec<CompletedDraw>,
    presents: u32,
    resets: u32,
}

impl HeadlessState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn output_size(&self, output: RenderOutput) -> Option<Size> {
        match output {
            RenderOutput::Screen => Some(self.config.screen_size),
            RenderOutput::Framebuffer(id) => {
                let framebuffer = self.framebuffers.get(&id)?;
                let first = framebuffer.color.first().or(framebuffer.depth.as_ref())?;
                self.textures.get(first).map(|desc| desc.size)
            }
        }
    }
}

/// GPU-less backend. See the module docs.
#[derive(Clone, Debug)]
pub struct HeadlessBackend {
    state: Rc<RefCell<HeadlessState>>,
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new(HeadlessConfig::default())
    }
}

impl HeadlessBackend {
    pub fn new(config: HeadlessConfig) -> Self {
        Self {
            state: Rc::new(RefCell::new(HeadlessState {
                config,
                next_id: 0,
                textures: HashMap::new(),
                framebuffers: HashMap::new(),
                programs: HashMap::new(),
                submitted: Vec::new(),
                finished: VecDeque::new(),
                compiled: HashSet::new(),
                bound: None,
                draws: Vec::new(),
                presents: 0,
                resets: 0,
            })),
        }
    }

    /// Finish a pending compilation successfully. It is reported on the next
    /// poll, after any compilation finished before it.
    pub fn complete_program(&self, program: ProgramId) -> bool {
        self.finish(program, Ok(()))
    }

    /// Finish a pending compilation with an error.
    pub fn fail_program(&self, program: ProgramId, reason: impl Into<String>) -> bool {
        self.finish(program, Err(BackendError::ShaderCompile(reason.into())))
    }

    fn finish(&self, program: ProgramId, result: Result<(), BackendError>) -> bool {
        let mut state = self.state.borrow_mut();
        let Some(index) = state.submitted.iter().position(|p| *p == program) else {
            return false;
        };
        state.submitted.remove(index);
        state.finished.push_back(CompileStatus { program, result });
        true
    }

    /// Programs submitted but not finished yet, in submission order.
    pub fn pending_programs(&self) -> Vec<ProgramId> {
        self.state.borrow().submitted.clone()
    }

    pub fn is_compiled(&self, program: ProgramId) -> bool {
        self.state.borrow().compiled.contains(&program)
    }

    pub fn live_program_count(&self) -> usize {
        self.state.borrow().programs.len()
    }

    pub fn texture(&self, texture: TextureId) -> Option<TextureDescriptor> {
        self.state.borrow().textures.get(&texture).cloned()
    }

    pub fn is_live_texture(&self, texture: TextureId) -> bool {
        self.state.borrow().textures.contains_key(&texture)
    }

    pub fn live_texture_count(&self) -> usize {
        self.state.borrow().textures.len()
    }

    pub fn framebuffer(&self, framebuffer: FramebufferId) -> Option<FramebufferDescriptor> {
        self.state.borrow().framebuffers.get(&framebuffer).cloned()
    }

    pub fn live_framebuffer_count(&self) -> usize {
        self.state.borrow().framebuffers.len()
    }

    pub fn bound_output(&self) -> Option<RenderOutput> {
        self.state.borrow().bound
    }

    pub fn draws(&self) -> Vec<CompletedDraw> {
        self.state.borrow().draws.clone()
    }

    pub fn clear_draws(&self) {
        self.state.borrow_mut().draws.clear();
    }

    pub fn present_count(&self) -> u32 {
        self.state.borrow().presents
    }

    pub fn reset_count(&self) -> u32 {
        self.state.borrow().resets
    }
}

impl GpuBackend for HeadlessBackend {
    fn name(&self) -> &str {
        "Headless"
    }

    fn features(&self) -> GpuFeatures {
        self.state.borrow().config.features
    }

    fn limits(&self) -> GpuLimits {
        self.state.borrow().config.limits
    }

    fn create_texture(
        &mut self,
        descriptor: &TextureDescriptor,
    ) -> Result<TextureId, BackendError> {
        let mut state = self.state.borrow_mut();
        let max = state.config.limits.max_texture_size;
        if descriptor.size.is_empty() || descriptor.size.width > max || descriptor.size.height > max
        {
            return Err(BackendError::ResourceCreation(format!(
                "texture '{}' has unsupported size {}x{}",
                descriptor.label, descriptor.size.width, descriptor.size.height
            )));
        }
        if descriptor.samples > state.config.limits.max_samples {
            return Err(BackendError::ResourceCreation(format!(
                "texture '{}' requests {} samples",
                descriptor.label, descriptor.samples
            )));
        }

        let id = TextureId(state.allocate_id());
        log::trace!(
            "HeadlessBackend: creating texture {:?} '{}' ({}x{}, {} samples)",
            id,
            descriptor.label,
            descriptor.size.width,
            descriptor.size.height,
            descriptor.samples
        );
        state.textures.insert(id, descriptor.clone());
        Ok(id)
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        log::trace!("HeadlessBackend: destroying texture {:?}", texture);
        self.state.borrow_mut().textures.remove(&texture);
    }

    fn create_framebuffer(
        &mut self,
        descriptor: &FramebufferDescriptor,
    ) -> Result<FramebufferId, BackendError> {
        let mut state = self.state.borrow_mut();
        for texture in descriptor.color.iter().chain(descriptor.depth.iter()) {
            if !state.textures.contains_key(texture) {
                return Err(BackendError::UnknownTexture(texture.0));
            }
        }
        let id = FramebufferId(state.allocate_id());
        log::trace!(
            "HeadlessBackend: creating framebuffer {:?} '{}' ({} color)",
            id,
            descriptor.label,
            descriptor.color.len()
        );
        state.framebuffers.insert(id, descriptor.clone());
        Ok(id)
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferId) {
        let mut state = self.state.borrow_mut();
        state.framebuffers.remove(&framebuffer);
        if state.bound == Some(RenderOutput::Framebuffer(framebuffer)) {
            state.bound = None;
        }
    }

    fn bind_framebuffer(&mut self, output: RenderOutput) -> Result<(), BackendError> {
        let mut state = self.state.borrow_mut();
        if let RenderOutput::Framebuffer(id) = output {
            if !state.framebuffers.contains_key(&id) {
                return Err(BackendError::UnknownFramebuffer(id.0));
            }
        }
        state.bound = Some(output);
        Ok(())
    }

    fn unbind_framebuffer(&mut self) {
        self.state.borrow_mut().bound = None;
    }

    fn compile_program(&mut self, program: ProgramId, descriptor: &ProgramDescriptor) {
        let mut state = self.state.borrow_mut();
        log::trace!(
            "HeadlessBackend: compiling program {:?} '{}'",
            program,
            descriptor.label
        );
        state.compiled.remove(&program);
        state.programs.insert(program, descriptor.clone());
        if !state.submitted.contains(&program) {
            state.submitted.push(program);
        }
    }

    fn poll_compiled(&mut self) -> Vec<CompileStatus> {
        let mut state = self.state.borrow_mut();
        if state.config.auto_compile {
            let submitted = std::mem::take(&mut state.submitted);
            state
                .finished
                .extend(submitted.into_iter().map(|program| CompileStatus {
                    program,
                    result: Ok(()),
                }));
        }

        let finished: Vec<CompileStatus> = state.finished.drain(..).collect();
        for status in &finished {
            if status.result.is_ok() && state.programs.contains_key(&status.program) {
                state.compiled.insert(status.program);
            }
        }
        finished
            .into_iter()
            .filter(|status| state.programs.contains_key(&status.program))
            .collect()
    }

    fn destroy_program(&mut self, program: ProgramId) {
        let mut state = self.state.borrow_mut();
        state.programs.remove(&program);
        state.compiled.remove(&program);
        state.submitted.retain(|p| *p != program);
        state.finished.retain(|s| s.program != program);
    }

    fn draw_fullscreen(&mut self, draw: &FullscreenDraw) -> Result<(), BackendError> {
        let mut state = self.state.borrow_mut();
        if !state.compiled.contains(&draw.program) {
            return Err(BackendError::UnknownProgram(draw.program.0));
        }
        for input in &draw.inputs {
            if !state.textures.contains_key(&input.texture) {
                return Err(BackendError::UnknownTexture(input.texture.0));
            }
        }
        let output = state
            .bound
            .ok_or_else(|| BackendError::ResourceCreation("no output bound for draw".into()))?;
        let output_size = state.output_size(output).unwrap_or_default();

        state.draws.push(CompletedDraw {
            output,
            output_size,
            program: draw.program,
            inputs: draw.inputs.clone(),
        });
        Ok(())
    }

    fn present(&mut self) {
        self.state.borrow_mut().presents += 1;
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.state.borrow_mut().config.screen_size = Size::new(width, height);
        }
    }

    fn reset(&mut self) {
        let mut state = self.state.borrow_mut();
        log::debug!(
            "HeadlessBackend: reset, dropping {} textures, {} framebuffers, {} programs",
            state.textures.len(),
            state.framebuffers.len(),
            state.programs.len()
        );
        state.textures.clear();
        state.framebuffers.clear();
        state.programs.clear();
        state.submitted.clear();
        state.finished.clear();
        state.compiled.clear();
        state.bound = None;
        state.resets += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::texture::TextureFormat;

    #[test]
    fn test_manual_compile_reports_in_completion_order() {
        let mut backend = HeadlessBackend::new(HeadlessConfig::new().manual_compile());
        let a = ProgramId(100);
        let b = ProgramId(101);
        backend.compile_program(a, &ProgramDescriptor::new("a", ""));
        backend.compile_program(b, &ProgramDescriptor::new("b", ""));
        assert!(backend.poll_compiled().is_empty());

        assert!(backend.complete_program(b));
        assert!(backend.complete_program(a));
        let order: Vec<ProgramId> = backend
            .poll_compiled()
            .into_iter()
            .map(|s| s.program)
            .collect();
        assert_eq!(order, vec![b, a]);
    }

    #[test]
    fn test_reset_invalidates_handles() {
        let mut backend = HeadlessBackend::default();
        let desc = TextureDescriptor::color("t", Size::square(4), TextureFormat::Rgba8Unorm);
        let first = backend.create_texture(&desc).unwrap();
        backend.reset();
        assert!(!backend.is_live_texture(first));

        let second = backend.create_texture(&desc).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_draw_requires_compiled_program_and_bound_output() {
        let mut backend = HeadlessBackend::default();
        let program = ProgramId(1);
        backend.compile_program(program, &ProgramDescriptor::new("p", ""));
        let draw = FullscreenDraw {
            program,
            inputs: Vec::new(),
            time: 0.0,
        };
        assert!(backend.draw_fullscreen(&draw).is_err());

        backend.poll_compiled();
        assert!(backend.draw_fullscreen(&draw).is_err());

        backend.bind_framebuffer(RenderOutput::Screen).unwrap();
        backend.draw_fullscreen(&draw).unwrap();
        assert_eq!(backend.draws()[0].output_size, Size::new(800, 600));
    }
}
