use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::camera::{Camera, CameraId};
use crate::engine::Engine;
use crate::error::{PipelineError, Result};
use crate::gpu::RenderOutput;
use crate::post_process::{PostProcessManager, RenderStats, SharedPostProcess};
use crate::texture::SamplerBinding;

use super::effect::RenderEffect;
use super::registry::SharedRegistry;

static NEXT_PIPELINE_ID: AtomicU32 = AtomicU32::new(1);

/// Process-unique pipeline identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineId(pub u32);

/// Outcome of enabling or disabling an effect or display-only pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EffectToggle {
    /// Applied to this many attached cameras (unattached ones are ignored).
    Applied(usize),
    /// No effect with that name in the catalogue.
    UnknownEffect,
    /// The effect is not supported on this device; nothing changed.
    Unsupported,
}

/// Where an effect stands for one camera.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EffectState {
    Unknown,
    /// Not supported on this device, so never enabled.
    Unsupported,
    /// The camera is not attached to the effect.
    Detached,
    /// Attached, but disabled.
    Inactive,
    Active,
}

/// The passes a camera renders through, derived by
/// [`RenderPipeline::update`].
#[derive(Clone, Debug, Default)]
pub struct CameraChain {
    /// Contributing effects, in registration order.
    pub effects: Vec<String>,
    pub passes: Vec<SharedPostProcess>,
    /// Set when a display-only pass replaces the normal chain.
    pub display_only: Option<String>,
}

/// An ordered set of effects driven by a set of cameras.
///
/// Effects are registered once and attached to every camera the pipeline
/// drives. Toggling an effect by name changes which attached effects feed a
/// camera's chain; a display-only pass temporarily replaces the whole chain
/// of a camera with a single isolated effect rendered straight to the
/// screen.
///
/// Runtime misuse (unknown names, unattached cameras, repeated dispose) is
/// logged and ignored. Only construction can fail.
pub struct RenderPipeline {
    id: PipelineId,
    name: String,
    engine: Rc<Engine>,
    cameras: HashMap<CameraId, Camera>,
    effects: HashMap<String, RenderEffect>,
    effect_order: Vec<String>,
    isolated_effects: HashMap<String, RenderEffect>,
    display_only: HashMap<CameraId, String>,
    chains: HashMap<CameraId, CameraChain>,
    registry: Option<SharedRegistry>,
    disposed: bool,
}

impl RenderPipeline {
    pub fn new(engine: &Rc<Engine>, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(PipelineError::InvalidName);
        }
        if engine.is_context_lost() {
            return Err(PipelineError::ContextLost);
        }

        let id = PipelineId(NEXT_PIPELINE_ID.fetch_add(1, Ordering::Relaxed));
        log::debug!("RenderPipeline '{}' created ({:?})", name, id);
        Ok(Self {
            id,
            name,
            engine: engine.clone(),
            cameras: HashMap::new(),
            effects: HashMap::new(),
            effect_order: Vec::new(),
            isolated_effects: HashMap::new(),
            display_only: HashMap::new(),
            chains: HashMap::new(),
            registry: None,
            disposed: false,
        })
    }

    pub fn id(&self) -> PipelineId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn engine(&self) -> &Rc<Engine> {
        &self.engine
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Hooks the pipeline into a manager's ownership table, recording the
    /// cameras it already drives.
    pub(crate) fn set_registry(&mut self, registry: SharedRegistry) {
        {
            let mut table = registry.borrow_mut();
            for camera in self.cameras.keys() {
                table.claim(*camera, self.id);
            }
        }
        self.registry = Some(registry);
    }

    pub(crate) fn clear_registry(&mut self) {
        if let Some(registry) = self.registry.take() {
            if let Ok(mut table) = registry.try_borrow_mut() {
                table.release_all(self.id);
            }
        }
    }

    // Catalogues

    /// Registers an effect under its name. A duplicate name is ignored and
    /// returns false. Cameras already attached get the new effect.
    pub fn add_effect(&mut self, mut effect: RenderEffect) -> bool {
        let name = effect.name().to_string();
        if self.effects.contains_key(&name) {
            log::warn!(
                "RenderPipeline '{}': effect '{}' already registered",
                self.name,
                name
            );
            return false;
        }

        if !self.cameras.is_empty() && effect.is_supported() {
            let cameras: Vec<Camera> = self.cameras.values().cloned().collect();
            effect.attach_cameras(&cameras);
        }
        self.effects.insert(name.clone(), effect);
        self.effect_order.push(name);
        self.update();
        true
    }

    /// Registers an effect usable as a display-only pass. Same naming rules
    /// as [`add_effect`](Self::add_effect), in a separate catalogue.
    pub fn add_isolated_effect(&mut self, effect: RenderEffect) -> bool {
        let name = effect.name().to_string();
        if self.isolated_effects.contains_key(&name) {
            log::warn!(
                "RenderPipeline '{}': isolated pass '{}' already registered",
                self.name,
                name
            );
            return false;
        }
        self.isolated_effects.insert(name, effect);
        true
    }

    pub fn effect(&self, name: &str) -> Option<&RenderEffect> {
        self.effects.get(name)
    }

    pub fn isolated_effect(&self, name: &str) -> Option<&RenderEffect> {
        self.isolated_effects.get(name)
    }

    /// Effect names in chain order.
    pub fn effect_names(&self) -> &[String] {
        &self.effect_order
    }

    /// True only if every registered effect is supported.
    pub fn is_supported(&self) -> bool {
        self.effects.values().all(RenderEffect::is_supported)
    }

    // Cameras

    pub fn cameras(&self) -> impl Iterator<Item = &Camera> {
        self.cameras.values()
    }

    pub fn camera_count(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_attached(&self, camera: CameraId) -> bool {
        self.cameras.contains_key(&camera)
    }

    /// Refreshes the stored viewport of an attached camera. Returns false if
    /// the camera is not attached.
    pub fn update_camera(&mut self, camera: &Camera) -> bool {
        match self.cameras.get_mut(&camera.id) {
            Some(stored) => {
                *stored = camera.clone();
                true
            }
            None => false,
        }
    }

    /// Attaches cameras and binds every supported effect to them.
    ///
    /// With `force_unique`, each camera is first detached from every other
    /// pipeline of the same manager. Cameras already attached here are not
    /// attached twice. Returns how many cameras were newly attached.
    pub fn attach_cameras(&mut self, cameras: &[Camera], force_unique: bool) -> usize {
        if force_unique {
            self.evict_from_other_pipelines(cameras);
        }

        let mut added: Vec<Camera> = Vec::new();
        for camera in cameras {
            if self.cameras.contains_key(&camera.id) || added.iter().any(|c| c.id == camera.id) {
                continue;
            }
            added.push(camera.clone());
        }
        if added.is_empty() {
            return 0;
        }

        for camera in &added {
            self.cameras.insert(camera.id, camera.clone());
        }
        if let Some(registry) = &self.registry {
            let mut table = registry.borrow_mut();
            for camera in &added {
                table.claim(camera.id, self.id);
            }
        }

        for name in &self.effect_order {
            if let Some(effect) = self.effects.get_mut(name) {
                if effect.is_supported() {
                    effect.attach_cameras(&added);
                } else {
                    log::debug!(
                        "RenderPipeline '{}': skipping unsupported effect '{}'",
                        self.name,
                        name
                    );
                }
            }
        }

        log::debug!(
            "RenderPipeline '{}': attached {} cameras",
            self.name,
            added.len()
        );
        self.update();
        added.len()
    }

    fn evict_from_other_pipelines(&self, cameras: &[Camera]) {
        let Some(registry) = &self.registry else {
            return;
        };
        let ids: Vec<CameraId> = cameras.iter().map(|camera| camera.id).collect();
        let evicted = registry.borrow_mut().claim_exclusive(&ids, self.id);

        for (owner, pipeline, lost) in evicted {
            match pipeline.try_borrow_mut() {
                Ok(mut other) => {
                    log::debug!(
                        "RenderPipeline '{}': taking {} cameras from '{}'",
                        self.name,
                        lost.len(),
                        other.name
                    );
                    other.detach_cameras(&lost);
                }
                Err(_) => {
                    log::warn!(
                        "RenderPipeline '{}': previous owner is busy, cameras stay attached there",
                        self.name
                    );
                    let mut table = registry.borrow_mut();
                    for camera in &lost {
                        table.claim(*camera, owner);
                    }
                }
            }
        }
    }

    /// Detaches cameras from the pipeline, every effect and any display-only
    /// pass. Unattached cameras are ignored. Returns how many were detached.
    pub fn detach_cameras(&mut self, cameras: &[CameraId]) -> usize {
        let detached: Vec<CameraId> = cameras
            .iter()
            .copied()
            .filter(|id| self.cameras.contains_key(id))
            .collect();
        if detached.is_empty() {
            return 0;
        }

        for effect in self.effects.values_mut() {
            effect.detach_cameras(&detached);
        }
        for effect in self.isolated_effects.values_mut() {
            effect.detach_cameras(&detached);
        }
        for camera in &detached {
            self.cameras.remove(camera);
            self.display_only.remove(camera);
            self.chains.remove(camera);
        }
        if let Some(registry) = &self.registry {
            if let Ok(mut table) = registry.try_borrow_mut() {
                for camera in &detached {
                    table.release(*camera, self.id);
                }
            }
        }

        log::debug!(
            "RenderPipeline '{}': detached {} cameras",
            self.name,
            detached.len()
        );
        detached.len()
    }

    // Toggles

    fn attached_among(&self, cameras: &[CameraId]) -> Vec<CameraId> {
        cameras
            .iter()
            .copied()
            .filter(|id| self.cameras.contains_key(id))
            .collect()
    }

    /// Activates `name` for the given attached cameras.
    pub fn enable_effect(&mut self, name: &str, cameras: &[CameraId]) -> EffectToggle {
        self.toggle_effect(name, cameras, true)
    }

    /// Deactivates `name` for the given attached cameras.
    pub fn disable_effect(&mut self, name: &str, cameras: &[CameraId]) -> EffectToggle {
        self.toggle_effect(name, cameras, false)
    }

    fn toggle_effect(&mut self, name: &str, cameras: &[CameraId], enable: bool) -> EffectToggle {
        let attached = self.attached_among(cameras);
        let Some(effect) = self.effects.get_mut(name) else {
            log::warn!("RenderPipeline '{}': unknown effect '{}'", self.name, name);
            return EffectToggle::UnknownEffect;
        };
        if !effect.is_supported() {
            log::debug!(
                "RenderPipeline '{}': effect '{}' unsupported, ignoring toggle",
                self.name,
                name
            );
            return EffectToggle::Unsupported;
        }

        let applied = if enable {
            effect.enable(&attached)
        } else {
            effect.disable(&attached)
        };
        self.update();
        EffectToggle::Applied(applied)
    }

    /// Routes each given camera's output to the isolated pass `pass` alone,
    /// replacing any other display-only pass active for it.
    pub fn enable_display_only_pass(&mut self, pass: &str, cameras: &[CameraId]) -> EffectToggle {
        let attached = self.attached_among(cameras);
        match self.isolated_effects.get(pass) {
            None => {
                log::warn!(
                    "RenderPipeline '{}': unknown isolated pass '{}'",
                    self.name,
                    pass
                );
                return EffectToggle::UnknownEffect;
            }
            Some(effect) if !effect.is_supported() => return EffectToggle::Unsupported,
            Some(_) => {}
        }

        for camera in &attached {
            let previous = self.display_only.insert(*camera, pass.to_string());
            if let Some(previous) = previous.filter(|previous| previous != pass) {
                if let Some(effect) = self.isolated_effects.get_mut(&previous) {
                    effect.detach_cameras(&[*camera]);
                }
            }
            let Some(camera) = self.cameras.get(camera).cloned() else {
                continue;
            };
            if let Some(effect) = self.isolated_effects.get_mut(pass) {
                effect.attach_cameras(&[camera]);
            }
        }

        self.update();
        EffectToggle::Applied(attached.len())
    }

    /// Restores the normal chain for cameras whose display-only pass is
    /// `pass`. Cameras showing another pass are left alone.
    pub fn disable_display_only_pass(&mut self, pass: &str, cameras: &[CameraId]) -> EffectToggle {
        let attached = self.attached_among(cameras);
        match self.isolated_effects.get(pass) {
            None => {
                log::warn!(
                    "RenderPipeline '{}': unknown isolated pass '{}'",
                    self.name,
                    pass
                );
                return EffectToggle::UnknownEffect;
            }
            Some(effect) if !effect.is_supported() => return EffectToggle::Unsupported,
            Some(_) => {}
        }

        let showing: Vec<CameraId> = attached
            .into_iter()
            .filter(|camera| self.display_only.get(camera).map(String::as_str) == Some(pass))
            .collect();
        for camera in &showing {
            self.display_only.remove(camera);
        }
        if let Some(effect) = self.isolated_effects.get_mut(pass) {
            effect.detach_cameras(&showing);
        }

        self.update();
        EffectToggle::Applied(showing.len())
    }

    /// The display-only pass currently shown for `camera`.
    pub fn active_display_only_pass(&self, camera: CameraId) -> Option<&str> {
        self.display_only.get(&camera).map(String::as_str)
    }

    pub fn effect_state(&self, name: &str, camera: CameraId) -> EffectState {
        let Some(effect) = self.effects.get(name) else {
            return EffectState::Unknown;
        };
        if !effect.is_supported() {
            EffectState::Unsupported
        } else if !effect.is_attached(camera) {
            EffectState::Detached
        } else if effect.is_active_for(camera) {
            EffectState::Active
        } else {
            EffectState::Inactive
        }
    }

    // Chains

    /// Re-derives every attached camera's chain.
    pub fn update(&mut self) {
        let mut chains = HashMap::with_capacity(self.cameras.len());
        for camera in self.cameras.keys() {
            let chain = match self.display_only.get(camera) {
                Some(pass) => CameraChain {
                    effects: vec![pass.clone()],
                    passes: self
                        .isolated_effects
                        .get(pass)
                        .and_then(|effect| effect.post_processes(*camera))
                        .map(<[SharedPostProcess]>::to_vec)
                        .unwrap_or_default(),
                    display_only: Some(pass.clone()),
                },
                None => {
                    let mut chain = CameraChain::default();
                    for name in &self.effect_order {
                        let Some(effect) = self.effects.get(name) else {
                            continue;
                        };
                        if !effect.is_active_for(*camera) {
                            continue;
                        }
                        if let Some(passes) = effect.post_processes(*camera) {
                            chain.effects.push(name.clone());
                            chain.passes.extend(passes.iter().cloned());
                        }
                    }
                    chain
                }
            };
            chains.insert(*camera, chain);
        }
        self.chains = chains;
    }

    pub fn chain(&self, camera: CameraId) -> Option<&CameraChain> {
        self.chains.get(&camera)
    }

    /// Renders `camera`'s chain through `manager`.
    ///
    /// The chain reads `source` and ends in `output`, or on the screen while
    /// a display-only pass is active. The camera's viewport sizes the
    /// intermediate targets.
    pub fn render(
        &self,
        camera: CameraId,
        manager: &mut PostProcessManager,
        source: Option<SamplerBinding>,
        output: RenderOutput,
    ) -> Result<RenderStats> {
        let (Some(chain), Some(view)) = (self.chains.get(&camera), self.cameras.get(&camera)) else {
            log::trace!(
                "RenderPipeline '{}': camera {:?} not attached, nothing to render",
                self.name,
                camera
            );
            return Ok(RenderStats::default());
        };

        let output = if chain.display_only.is_some() {
            RenderOutput::Screen
        } else {
            output
        };
        manager.direct_render(&chain.passes, source, output, view.size())
    }

    // Lifecycle

    /// Recomputes chains after a context restore. Passes keep their
    /// programs, which the engine resubmits itself.
    pub fn rebuild(&mut self) {
        log::debug!("RenderPipeline '{}': rebuild", self.name);
        self.update();
    }

    /// Clears all per-camera state (attached cameras, effect bindings,
    /// display-only passes, chains, ownership entries). Both catalogues are
    /// kept.
    pub fn reset(&mut self) {
        self.clear_cameras(true);
    }

    fn clear_cameras(&mut self, dispose_passes: bool) {
        let cameras: Vec<CameraId> = self.cameras.keys().copied().collect();
        for effect in self
            .effects
            .values_mut()
            .chain(self.isolated_effects.values_mut())
        {
            if dispose_passes {
                effect.detach_cameras(&cameras);
            } else {
                effect.unbind_cameras(&cameras);
            }
        }
        self.cameras.clear();
        self.display_only.clear();
        self.chains.clear();
        if let Some(registry) = &self.registry {
            if let Ok(mut table) = registry.try_borrow_mut() {
                table.release_all(self.id);
            }
        }
    }

    /// Detaches every camera. Unless `do_not_recurse`, also disposes every
    /// effect's passes and empties both catalogues; with it, the effects
    /// keep their passes alive. Safe to call repeatedly.
    pub fn dispose(&mut self, do_not_recurse: bool) {
        self.clear_cameras(!do_not_recurse);
        if !do_not_recurse {
            for effect in self
                .effects
                .values_mut()
                .chain(self.isolated_effects.values_mut())
            {
                effect.dispose_post_processes();
            }
            self.effects.clear();
            self.effect_order.clear();
            self.isolated_effects.clear();
        }
        if !self.disposed {
            log::debug!("RenderPipeline '{}' disposed", self.name);
        }
        self.disposed = true;
    }
}

impl Drop for RenderPipeline {
    fn drop(&mut self) {
        self.clear_registry();
    }
}

impl std::fmt::Debug for RenderPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPipeline")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("cameras", &self.cameras.len())
            .field("effects", &self.effect_order)
            .field("isolated", &self.isolated_effects.len())
            .finish()
    }
}
