use std::cell::Cell;
use std::rc::Rc;

use crate::engine::Engine;
use crate::error::Result;
use crate::gpu::{FullscreenDraw, ProgramDescriptor, ProgramId};
use crate::program::ProgramState;
use crate::texture::{SamplerBinding, SamplingMode};

/// Passes are shared between the effect that created them and the chains
/// built from it.
pub type SharedPostProcess = Rc<PostProcess>;

/// Copies its single input to the output.
pub const PASS_THROUGH_SHADER: &str = r#"
struct Uniforms {
    resolution: vec2f,
    time: f32,
    _padding: f32,
}

@group(0) @binding(0) var<uniform> u: Uniforms;
@group(0) @binding(1) var input_texture: texture_2d<f32>;
@group(0) @binding(2) var input_sampler: sampler;

@vertex
fn vs(@builtin(vertex_index) vi: u32) -> @builtin(position) vec4f {
    // Fullscreen triangle
    let x = f32(i32(vi & 1u) * 4 - 1);
    let y = f32(i32(vi >> 1u) * 4 - 1);
    return vec4f(x, y, 0.0, 1.0);
}

@fragment
fn fs(@builtin(position) pos: vec4f) -> @location(0) vec4f {
    let uv = pos.xy / u.resolution;
    return textureSample(input_texture, input_sampler, uv);
}
"#;

/// One full-screen pass: a program plus the sampling mode applied to its
/// primary input.
///
/// The program is compiled asynchronously. Until it is ready the pass
/// reports `is_ready() == false` and chains skip it. Dropping or disposing
/// the pass releases the program, which cancels any continuation still
/// waiting on it.
pub struct PostProcess {
    name: String,
    engine: Rc<Engine>,
    program: Cell<Option<ProgramId>>,
    sampling: SamplingMode,
}

impl PostProcess {
    pub fn new(
        engine: &Rc<Engine>,
        name: impl Into<String>,
        descriptor: ProgramDescriptor,
        sampling: SamplingMode,
    ) -> SharedPostProcess {
        let name = name.into();
        let program = engine.create_program(descriptor);
        log::debug!("PostProcess '{}' created with program {:?}", name, program);
        Rc::new(Self {
            name,
            engine: engine.clone(),
            program: Cell::new(Some(program)),
            sampling,
        })
    }

    /// A pass-through pass. `Nearest` or `Bilinear` decides how the input is
    /// resampled when the output size differs.
    pub fn pass_through(
        engine: &Rc<Engine>,
        name: impl Into<String>,
        sampling: SamplingMode,
    ) -> SharedPostProcess {
        let name = name.into();
        let descriptor = ProgramDescriptor::new(name.clone(), PASS_THROUGH_SHADER);
        Self::new(engine, name, descriptor, sampling)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sampling(&self) -> SamplingMode {
        self.sampling
    }

    /// The program id, `None` once disposed.
    pub fn program(&self) -> Option<ProgramId> {
        self.program.get()
    }

    pub fn state(&self) -> Option<ProgramState> {
        self.program
            .get()
            .and_then(|program| self.engine.program_state(program))
    }

    pub fn is_ready(&self) -> bool {
        self.state() == Some(ProgramState::Ready)
    }

    pub fn is_failed(&self) -> bool {
        self.state() == Some(ProgramState::Failed)
    }

    pub fn is_disposed(&self) -> bool {
        self.program.get().is_none()
    }

    /// Runs `continuation` once the program is ready (immediately if it
    /// already is). Dropped if the pass is disposed first.
    pub fn execute_when_compiled(&self, continuation: impl FnOnce(&Engine) + 'static) {
        match self.program.get() {
            Some(program) => self.engine.execute_when_compiled(program, continuation),
            None => log::warn!(
                "PostProcess '{}' is disposed, dropping continuation",
                self.name
            ),
        }
    }

    /// Draws into the currently bound output.
    ///
    /// The pass's sampling mode replaces the one of the primary input.
    pub fn apply(&self, inputs: &[SamplerBinding], time: f32) -> Result<()> {
        let Some(program) = self.program.get() else {
            log::warn!("PostProcess '{}' applied after dispose", self.name);
            return Ok(());
        };

        let mut inputs = inputs.to_vec();
        if let Some(primary) = inputs.first_mut() {
            primary.sampling = self.sampling;
        }
        self.engine.draw_fullscreen(&FullscreenDraw {
            program,
            inputs,
            time,
        })
    }

    /// Releases the program. Safe to call more than once.
    pub fn dispose(&self) {
        if let Some(program) = self.program.take() {
            log::debug!("PostProcess '{}' disposed", self.name);
            self.engine.release_program(program);
        }
    }
}

impl Drop for PostProcess {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for PostProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostProcess")
            .field("name", &self.name)
            .field("program", &self.program.get())
            .field("sampling", &self.sampling)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HeadlessBackend;

    #[test]
    fn test_ready_after_tick() {
        let engine = Engine::new(HeadlessBackend::default());
        let pass = PostProcess::pass_through(&engine, "copy", SamplingMode::Nearest);
        assert!(!pass.is_ready());
        engine.tick();
        assert!(pass.is_ready());
    }

    #[test]
    fn test_drop_releases_program() {
        let backend = HeadlessBackend::default();
        let engine = Engine::new(backend.clone());
        let pass = PostProcess::pass_through(&engine, "copy", SamplingMode::Bilinear);
        engine.tick();
        assert_eq!(engine.live_program_count(), 1);

        drop(pass);
        assert_eq!(engine.live_program_count(), 0);
        assert_eq!(backend.live_program_count(), 0);
    }
}
