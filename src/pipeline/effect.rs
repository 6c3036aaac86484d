use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::camera::{Camera, CameraId};
use crate::engine::Engine;
use crate::gpu::GpuFeatures;
use crate::post_process::SharedPostProcess;

/// Builds the passes of an effect. Called once for single-instance effects
/// (with no camera) and once per attached camera otherwise.
pub type PostProcessFactory =
    Box<dyn Fn(&Rc<Engine>, Option<&Camera>) -> Vec<SharedPostProcess>>;

/// A named, independently toggleable unit of post-processing.
///
/// An effect is attached to cameras by its pipeline. Attaching creates (or,
/// for single-instance effects, shares) the effect's passes for that camera
/// and makes the effect active for it. Enabling and disabling then only
/// toggles whether the attached passes contribute to the camera's chain.
///
/// ```
/// use postchain::{Engine, HeadlessBackend, PostProcess, RenderEffect, SamplingMode};
///
/// let engine = Engine::new(HeadlessBackend::default());
/// let copy = RenderEffect::new(&engine, "copy", true, |engine, _camera| {
///     vec![PostProcess::pass_through(engine, "copy", SamplingMode::Bilinear)]
/// });
/// assert!(copy.is_supported());
/// ```
pub struct RenderEffect {
    name: String,
    engine: Rc<Engine>,
    factory: PostProcessFactory,
    single_instance: bool,
    required_features: GpuFeatures,
    shared: Vec<SharedPostProcess>,
    attached: HashMap<CameraId, Vec<SharedPostProcess>>,
    /// Per-camera passes of cameras unbound without disposing them.
    parked: Vec<SharedPostProcess>,
    active_cameras: HashSet<CameraId>,
}

impl RenderEffect {
    pub fn new<F>(
        engine: &Rc<Engine>,
        name: impl Into<String>,
        single_instance: bool,
        factory: F,
    ) -> Self
    where
        F: Fn(&Rc<Engine>, Option<&Camera>) -> Vec<SharedPostProcess> + 'static,
    {
        Self {
            name: name.into(),
            engine: engine.clone(),
            factory: Box::new(factory),
            single_instance,
            required_features: GpuFeatures::empty(),
            shared: Vec::new(),
            attached: HashMap::new(),
            parked: Vec::new(),
            active_cameras: HashSet::new(),
        }
    }

    /// Features the device must provide for the effect to be supported.
    pub fn with_required_features(mut self, features: GpuFeatures) -> Self {
        self.required_features = features;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_single_instance(&self) -> bool {
        self.single_instance
    }

    pub fn required_features(&self) -> GpuFeatures {
        self.required_features
    }

    /// False when the device lacks a required feature or one of the
    /// effect's programs failed to compile.
    pub fn is_supported(&self) -> bool {
        if !self.engine.supports(self.required_features) {
            return false;
        }
        self.shared
            .iter()
            .chain(self.attached.values().flatten())
            .all(|pass| !pass.is_failed())
    }

    /// Cameras the effect currently contributes to.
    pub fn active_cameras(&self) -> &HashSet<CameraId> {
        &self.active_cameras
    }

    pub fn is_active_for(&self, camera: CameraId) -> bool {
        self.active_cameras.contains(&camera)
    }

    pub fn is_attached(&self, camera: CameraId) -> bool {
        self.attached.contains_key(&camera)
    }

    pub fn attached_cameras(&self) -> impl Iterator<Item = CameraId> + '_ {
        self.attached.keys().copied()
    }

    /// The passes bound to `camera`, in execution order.
    pub fn post_processes(&self, camera: CameraId) -> Option<&[SharedPostProcess]> {
        self.attached.get(&camera).map(Vec::as_slice)
    }

    /// True when every pass bound anywhere is ready to draw.
    pub fn is_ready(&self) -> bool {
        self.shared
            .iter()
            .chain(self.attached.values().flatten())
            .all(|pass| pass.is_ready())
    }

    /// Binds the effect to cameras it is not attached to yet. Newly attached
    /// cameras start active. Returns how many were attached.
    pub(crate) fn attach_cameras(&mut self, cameras: &[Camera]) -> usize {
        let mut attached = 0;
        for camera in cameras {
            if self.attached.contains_key(&camera.id) {
                continue;
            }
            let passes = if self.single_instance {
                if self.shared.is_empty() {
                    self.shared = (self.factory)(&self.engine, None);
                }
                self.shared.clone()
            } else {
                (self.factory)(&self.engine, Some(camera))
            };
            self.attached.insert(camera.id, passes);
            self.active_cameras.insert(camera.id);
            attached += 1;
        }
        if attached > 0 {
            log::debug!("RenderEffect '{}': attached {} cameras", self.name, attached);
        }
        attached
    }

    /// Unbinds cameras. Per-camera passes are disposed; shared passes are
    /// disposed once no camera uses them anymore.
    pub(crate) fn detach_cameras(&mut self, cameras: &[CameraId]) -> usize {
        self.unbind(cameras, true)
    }

    /// Unbinds cameras but keeps every pass alive until
    /// [`dispose_post_processes`](Self::dispose_post_processes).
    pub(crate) fn unbind_cameras(&mut self, cameras: &[CameraId]) -> usize {
        self.unbind(cameras, false)
    }

    fn unbind(&mut self, cameras: &[CameraId], dispose: bool) -> usize {
        let mut detached = 0;
        for camera in cameras {
            self.active_cameras.remove(camera);
            let Some(passes) = self.attached.remove(camera) else {
                continue;
            };
            if !self.single_instance {
                if dispose {
                    for pass in &passes {
                        pass.dispose();
                    }
                } else {
                    self.parked.extend(passes);
                }
            }
            detached += 1;
        }

        if dispose && self.single_instance && self.attached.is_empty() && !self.shared.is_empty()
        {
            for pass in self.shared.drain(..) {
                pass.dispose();
            }
        }
        if detached > 0 {
            log::debug!("RenderEffect '{}': detached {} cameras", self.name, detached);
        }
        detached
    }

    /// Activates the effect for the attached cameras among `cameras`.
    /// Returns how many attached cameras were addressed.
    pub(crate) fn enable(&mut self, cameras: &[CameraId]) -> usize {
        let mut applied = 0;
        for camera in cameras {
            if self.attached.contains_key(camera) {
                self.active_cameras.insert(*camera);
                applied += 1;
            }
        }
        applied
    }

    pub(crate) fn disable(&mut self, cameras: &[CameraId]) -> usize {
        let mut applied = 0;
        for camera in cameras {
            if self.attached.contains_key(camera) {
                self.active_cameras.remove(camera);
                applied += 1;
            }
        }
        applied
    }

    /// Detaches every camera and disposes every pass.
    pub(crate) fn dispose_post_processes(&mut self) {
        for pass in self.shared.drain(..).chain(self.parked.drain(..)) {
            pass.dispose();
        }
        for (_, passes) in self.attached.drain() {
            for pass in passes {
                pass.dispose();
            }
        }
        self.active_cameras.clear();
    }
}

impl std::fmt::Debug for RenderEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderEffect")
            .field("name", &self.name)
            .field("single_instance", &self.single_instance)
            .field("attached", &self.attached.len())
            .field("active", &self.active_cameras.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{HeadlessBackend, HeadlessConfig};
    use crate::post_process::PostProcess;
    use crate::texture::SamplingMode;

    fn copy_effect(engine: &Rc<Engine>, single_instance: bool) -> RenderEffect {
        RenderEffect::new(engine, "copy", single_instance, |engine, _| {
            vec![PostProcess::pass_through(engine, "copy", SamplingMode::Bilinear)]
        })
    }

    #[test]
    fn test_single_instance_shares_passes() {
        let engine = Engine::new(HeadlessBackend::default());
        let mut effect = copy_effect(&engine, true);
        let a = Camera::new("a");
        let b = Camera::new("b");
        effect.attach_cameras(&[a.clone(), b.clone()]);

        let pa = &effect.post_processes(a.id).unwrap()[0];
        let pb = &effect.post_processes(b.id).unwrap()[0];
        assert!(Rc::ptr_eq(pa, pb));
        assert_eq!(engine.live_program_count(), 1);

        effect.detach_cameras(&[a.id]);
        assert_eq!(engine.live_program_count(), 1);
        effect.detach_cameras(&[b.id]);
        assert_eq!(engine.live_program_count(), 0);
    }

    #[test]
    fn test_per_camera_passes_disposed_on_detach() {
        let engine = Engine::new(HeadlessBackend::default());
        let mut effect = copy_effect(&engine, false);
        let a = Camera::new("a");
        let b = Camera::new("b");
        effect.attach_cameras(&[a.clone(), b.clone()]);
        assert_eq!(engine.live_program_count(), 2);

        effect.detach_cameras(&[a.id]);
        assert_eq!(engine.live_program_count(), 1);
        assert!(!effect.is_active_for(a.id));
        assert!(effect.is_active_for(b.id));
    }

    #[test]
    fn test_unbind_keeps_passes_until_disposed() {
        let engine = Engine::new(HeadlessBackend::default());
        let mut shared = copy_effect(&engine, true);
        let mut per_camera = copy_effect(&engine, false);
        let camera = Camera::new("main");
        shared.attach_cameras(std::slice::from_ref(&camera));
        per_camera.attach_cameras(std::slice::from_ref(&camera));

        shared.unbind_cameras(&[camera.id]);
        per_camera.unbind_cameras(&[camera.id]);
        assert!(!per_camera.is_attached(camera.id));
        assert_eq!(engine.live_program_count(), 2);

        shared.dispose_post_processes();
        per_camera.dispose_post_processes();
        assert_eq!(engine.live_program_count(), 0);
    }

    #[test]
    fn test_failed_program_makes_effect_unsupported() {
        let backend = HeadlessBackend::new(HeadlessConfig::new().manual_compile());
        let engine = Engine::new(backend.clone());
        let mut effect = copy_effect(&engine, true);
        let camera = Camera::new("main");
        effect.attach_cameras(std::slice::from_ref(&camera));
        assert!(effect.is_supported());

        let program = effect.post_processes(camera.id).unwrap()[0].program().unwrap();
        backend.fail_program(program, "bad source");
        engine.tick();
        assert!(!effect.is_supported());
    }

    #[test]
    fn test_missing_feature_makes_effect_unsupported() {
        let backend = HeadlessBackend::new(HeadlessConfig::new().features(GpuFeatures::empty()));
        let engine = Engine::new(backend);
        let effect =
            copy_effect(&engine, true).with_required_features(GpuFeatures::FLOAT_TEXTURES);
        assert!(!effect.is_supported());
    }
}
