use std::rc::Rc;

use crate::config::RenderTargetOptions;
use crate::engine::Engine;
use crate::error::Result;
use crate::gpu::RenderOutput;
use crate::render_target::RenderTarget;
use crate::texture::{SamplerBinding, Size, TextureFormat};

use super::SharedPostProcess;

/// What one [`PostProcessManager::direct_render`] call did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderStats {
    /// Passes drawn.
    pub executed: usize,
    /// Passes skipped because their program is not ready yet.
    pub deferred: usize,
}

impl RenderStats {
    pub fn merge(&mut self, other: RenderStats) {
        self.executed += other.executed;
        self.deferred += other.deferred;
    }
}

/// Executes chains of passes.
///
/// Intermediate results go through two ping-pong targets, allocated on
/// first need and resized to the requested size at the start of each
/// render; the last ready pass writes to the requested output.
///
/// ```text
/// Pass 0: source   -> Target A
/// Pass 1: Target A -> Target B
/// Pass 2: Target B -> output
/// ```
pub struct PostProcessManager {
    engine: Rc<Engine>,
    format: TextureFormat,
    target_a: Option<RenderTarget>,
    target_b: Option<RenderTarget>,
    time: f32,
}

impl PostProcessManager {
    pub fn new(engine: &Rc<Engine>) -> Self {
        Self {
            engine: engine.clone(),
            format: TextureFormat::Rgba8Unorm,
            target_a: None,
            target_b: None,
            time: 0.0,
        }
    }

    /// Format of the intermediate targets.
    pub fn with_format(mut self, format: TextureFormat) -> Self {
        self.format = format;
        self
    }

    /// Time in seconds handed to every pass.
    pub fn set_time(&mut self, seconds: f32) {
        self.time = seconds;
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    /// Size of the intermediate targets, if allocated.
    pub fn intermediate_size(&self) -> Option<Size> {
        self.target_a.as_ref().map(RenderTarget::size)
    }

    fn ensure_target(
        engine: &Rc<Engine>,
        slot: &mut Option<RenderTarget>,
        label: &str,
        size: Size,
        format: TextureFormat,
    ) -> Result<()> {
        match slot {
            Some(target) => target.resize(size),
            None => {
                let options = RenderTargetOptions::new().format(format);
                *slot = Some(RenderTarget::new(engine, label, size, options)?);
                Ok(())
            }
        }
    }

    /// Runs `passes` in order into `output` for one frame.
    ///
    /// Passes whose program is not ready are skipped and counted as deferred;
    /// the remaining passes still chain into each other. `source` feeds the
    /// first executed pass. Nothing is drawn when no pass is ready.
    pub fn direct_render(
        &mut self,
        passes: &[SharedPostProcess],
        source: Option<SamplerBinding>,
        output: RenderOutput,
        size: Size,
    ) -> Result<RenderStats> {
        let mut stats = RenderStats::default();
        let mut ready: Vec<&SharedPostProcess> = Vec::with_capacity(passes.len());
        for pass in passes {
            if pass.is_ready() {
                ready.push(pass);
            } else {
                log::trace!("PostProcessManager: deferring '{}'", pass.name());
                stats.deferred += 1;
            }
        }

        if ready.is_empty() {
            return Ok(stats);
        }

        if ready.len() > 1 {
            Self::ensure_target(
                &self.engine,
                &mut self.target_a,
                "PostProcess Target A",
                size,
                self.format,
            )?;
        }
        if ready.len() > 2 {
            Self::ensure_target(
                &self.engine,
                &mut self.target_b,
                "PostProcess Target B",
                size,
                self.format,
            )?;
        }

        let last = ready.len() - 1;
        let mut input = source;
        for (i, pass) in ready.into_iter().enumerate() {
            let target = if i == last {
                None
            } else if i % 2 == 0 {
                self.target_a.as_mut()
            } else {
                self.target_b.as_mut()
            };

            let (pass_output, pass_result) = match target {
                Some(target) => (target.output()?, target.sampler_binding()),
                None => (output, None),
            };

            self.engine.bind_framebuffer(pass_output)?;
            let inputs: Vec<SamplerBinding> = input.into_iter().collect();
            let drawn = pass.apply(&inputs, self.time);
            self.engine.unbind_framebuffer();
            drawn?;

            stats.executed += 1;
            input = pass_result;
        }

        Ok(stats)
    }

    /// Recreates the intermediate targets after a context loss.
    pub fn rebuild(&mut self) -> Result<()> {
        for target in [&mut self.target_a, &mut self.target_b].into_iter().flatten() {
            target.rebuild()?;
        }
        Ok(())
    }

    /// Releases the intermediate targets; they are reallocated on demand.
    pub fn dispose(&mut self) {
        self.target_a = None;
        self.target_b = None;
    }
}
