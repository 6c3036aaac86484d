use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::camera::{Camera, CameraId};
use crate::engine::Engine;
use crate::error::{PipelineError, Result};
use crate::gpu::RenderOutput;
use crate::post_process::{PostProcessManager, RenderStats};
use crate::texture::SamplerBinding;

use super::pipeline::{EffectToggle, RenderPipeline};
use super::registry::{CameraRegistry, SharedRegistry};

pub type SharedPipeline = Rc<RefCell<RenderPipeline>>;

/// Owns the named pipelines of a scene and the camera ownership table they
/// share.
///
/// The `*_in_pipeline` and `*_render_pipeline` methods forward to the named
/// pipeline; unknown names are logged and ignored (they return `None` or
/// zero).
pub struct RenderPipelineManager {
    engine: Rc<Engine>,
    pipelines: HashMap<String, SharedPipeline>,
    order: Vec<String>,
    registry: SharedRegistry,
    post_processes: PostProcessManager,
}

impl RenderPipelineManager {
    pub fn new(engine: &Rc<Engine>) -> Self {
        Self {
            engine: engine.clone(),
            pipelines: HashMap::new(),
            order: Vec::new(),
            registry: Rc::new(RefCell::new(CameraRegistry::new())),
            post_processes: PostProcessManager::new(engine),
        }
    }

    pub fn engine(&self) -> &Rc<Engine> {
        &self.engine
    }

    pub fn post_process_manager(&mut self) -> &mut PostProcessManager {
        &mut self.post_processes
    }

    /// Takes ownership of `pipeline`. Names must be unique.
    pub fn add_pipeline(&mut self, mut pipeline: RenderPipeline) -> Result<SharedPipeline> {
        let name = pipeline.name().to_string();
        if self.pipelines.contains_key(&name) {
            return Err(PipelineError::DuplicatePipeline(name));
        }

        let id = pipeline.id();
        pipeline.set_registry(self.registry.clone());
        let shared = Rc::new(RefCell::new(pipeline));
        self.registry.borrow_mut().register(id, &shared);
        self.pipelines.insert(name.clone(), shared.clone());
        self.order.push(name.clone());
        log::debug!("RenderPipelineManager: added pipeline '{}'", name);
        Ok(shared)
    }

    pub fn pipeline(&self, name: &str) -> Option<SharedPipeline> {
        self.pipelines.get(name).cloned()
    }

    /// Pipeline names in the order they were added.
    pub fn pipeline_names(&self) -> &[String] {
        &self.order
    }

    /// Names of the pipelines whose effects are all supported.
    pub fn supported_pipelines(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|name| {
                self.pipelines
                    .get(name.as_str())
                    .is_some_and(|pipeline| pipeline.borrow().is_supported())
            })
            .cloned()
            .collect()
    }

    /// Removes a pipeline without disposing it. Its cameras stay attached
    /// but leave the ownership table.
    pub fn remove_pipeline(&mut self, name: &str) -> Option<SharedPipeline> {
        let pipeline = self.pipelines.remove(name)?;
        self.order.retain(|n| n != name);
        let id = pipeline.borrow().id();
        self.registry.borrow_mut().unregister(id);
        pipeline.borrow_mut().clear_registry();
        Some(pipeline)
    }

    fn lookup(&self, name: &str) -> Option<&SharedPipeline> {
        let pipeline = self.pipelines.get(name);
        if pipeline.is_none() {
            log::warn!("RenderPipelineManager: unknown pipeline '{}'", name);
        }
        pipeline
    }

    pub fn attach_cameras_to_render_pipeline(
        &self,
        name: &str,
        cameras: &[Camera],
        unique: bool,
    ) -> usize {
        self.lookup(name)
            .map(|pipeline| pipeline.borrow_mut().attach_cameras(cameras, unique))
            .unwrap_or(0)
    }

    pub fn detach_cameras_from_render_pipeline(&self, name: &str, cameras: &[CameraId]) -> usize {
        self.lookup(name)
            .map(|pipeline| pipeline.borrow_mut().detach_cameras(cameras))
            .unwrap_or(0)
    }

    pub fn enable_effect_in_pipeline(
        &self,
        name: &str,
        effect: &str,
        cameras: &[CameraId],
    ) -> Option<EffectToggle> {
        self.lookup(name)
            .map(|pipeline| pipeline.borrow_mut().enable_effect(effect, cameras))
    }

    pub fn disable_effect_in_pipeline(
        &self,
        name: &str,
        effect: &str,
        cameras: &[CameraId],
    ) -> Option<EffectToggle> {
        self.lookup(name)
            .map(|pipeline| pipeline.borrow_mut().disable_effect(effect, cameras))
    }

    pub fn enable_display_only_pass_in_pipeline(
        &self,
        name: &str,
        pass: &str,
        cameras: &[CameraId],
    ) -> Option<EffectToggle> {
        self.lookup(name)
            .map(|pipeline| pipeline.borrow_mut().enable_display_only_pass(pass, cameras))
    }

    pub fn disable_display_only_pass_in_pipeline(
        &self,
        name: &str,
        pass: &str,
        cameras: &[CameraId],
    ) -> Option<EffectToggle> {
        self.lookup(name)
            .map(|pipeline| pipeline.borrow_mut().disable_display_only_pass(pass, cameras))
    }

    /// Name of the first pipeline `camera` is attached to.
    pub fn owner_of(&self, camera: CameraId) -> Option<String> {
        self.owners_of(camera).into_iter().next()
    }

    /// Names of every pipeline `camera` is attached to, in attach order.
    pub fn owners_of(&self, camera: CameraId) -> Vec<String> {
        let registry = self.registry.borrow();
        registry
            .owners(camera)
            .iter()
            .filter_map(|id| registry.pipeline(*id))
            .map(|pipeline| pipeline.borrow().name().to_string())
            .collect()
    }

    /// Propagates a camera's new viewport to every pipeline driving it.
    pub fn update_camera(&self, camera: &Camera) {
        for pipeline in self.pipelines.values() {
            pipeline.borrow_mut().update_camera(camera);
        }
    }

    pub fn update(&self) {
        for name in &self.order {
            if let Some(pipeline) = self.pipelines.get(name) {
                pipeline.borrow_mut().update();
            }
        }
    }

    /// Rebuilds intermediate targets and chains after a context restore.
    pub fn rebuild(&mut self) -> Result<()> {
        self.post_processes.rebuild()?;
        for name in &self.order {
            if let Some(pipeline) = self.pipelines.get(name) {
                pipeline.borrow_mut().rebuild();
            }
        }
        Ok(())
    }

    /// Renders `camera` through every pipeline it is attached to, in the
    /// order the pipelines were added. Failures are logged.
    pub fn render_camera(
        &mut self,
        camera: CameraId,
        source: Option<SamplerBinding>,
        output: RenderOutput,
    ) -> RenderStats {
        let mut stats = RenderStats::default();
        for name in &self.order {
            let Some(pipeline) = self.pipelines.get(name) else {
                continue;
            };
            let pipeline = pipeline.borrow();
            if !pipeline.is_attached(camera) {
                continue;
            }
            match pipeline.render(camera, &mut self.post_processes, source, output) {
                Ok(rendered) => stats.merge(rendered),
                Err(error) => log::error!(
                    "RenderPipelineManager: pipeline '{}' failed to render: {}",
                    name,
                    error
                ),
            }
        }
        stats
    }

    /// Disposes every pipeline and the intermediate targets.
    pub fn dispose(&mut self) {
        let pipelines: Vec<SharedPipeline> = self
            .order
            .drain(..)
            .filter_map(|name| self.pipelines.remove(&name))
            .collect();
        for pipeline in pipelines {
            let id = pipeline.borrow().id();
            pipeline.borrow_mut().dispose(false);
            self.registry.borrow_mut().unregister(id);
        }
        self.pipelines.clear();
        self.post_processes.dispose();
    }
}

impl Drop for RenderPipelineManager {
    fn drop(&mut self) {
        self.dispose();
    }
}
