use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use crate::camera::CameraId;

use super::{PipelineId, RenderPipeline, SharedPipeline};

pub type SharedRegistry = Rc<RefCell<CameraRegistry>>;

/// Which pipelines each camera is attached to.
///
/// Owned by a [`RenderPipelineManager`](super::RenderPipelineManager) and
/// shared with its pipelines, which keep it current as cameras attach and
/// detach. Attaching with `force_unique` goes through
/// [`claim_exclusive`](Self::claim_exclusive) instead of scanning pipelines.
#[derive(Default)]
pub struct CameraRegistry {
    pipelines: HashMap<PipelineId, Weak<RefCell<RenderPipeline>>>,
    owners: HashMap<CameraId, Vec<PipelineId>>,
}

impl CameraRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&mut self, id: PipelineId, pipeline: &SharedPipeline) {
        self.pipelines.insert(id, Rc::downgrade(pipeline));
    }

    /// Forgets a pipeline and every ownership entry pointing at it.
    pub(crate) fn unregister(&mut self, id: PipelineId) {
        self.pipelines.remove(&id);
        self.release_all(id);
    }

    /// Records that `pipeline` drives `camera`, next to any other owner.
    pub(crate) fn claim(&mut self, camera: CameraId, pipeline: PipelineId) {
        let owners = self.owners.entry(camera).or_default();
        if !owners.contains(&pipeline) {
            owners.push(pipeline);
        }
    }

    /// Makes `pipeline` the only owner of `cameras`.
    ///
    /// Returns the previous owners that must detach, with the cameras each
    /// one loses, in the order the cameras were given. An owner that cannot
    /// detach must be claimed back. Owners that no longer exist are dropped
    /// from the table.
    pub(crate) fn claim_exclusive(
        &mut self,
        cameras: &[CameraId],
        pipeline: PipelineId,
    ) -> Vec<(PipelineId, SharedPipeline, Vec<CameraId>)> {
        let mut evicted: Vec<(PipelineId, Vec<CameraId>)> = Vec::new();
        for camera in cameras {
            let Some(owners) = self.owners.get_mut(camera) else {
                continue;
            };
            for owner in owners.iter().filter(|owner| **owner != pipeline) {
                match evicted.iter_mut().find(|(id, _)| id == owner) {
                    Some((_, lost)) => lost.push(*camera),
                    None => evicted.push((*owner, vec![*camera])),
                }
            }
            owners.retain(|owner| *owner == pipeline);
            if owners.is_empty() {
                self.owners.remove(camera);
            }
        }

        evicted
            .into_iter()
            .filter_map(|(id, lost)| {
                let pipeline = self.pipelines.get(&id)?.upgrade()?;
                Some((id, pipeline, lost))
            })
            .collect()
    }

    pub(crate) fn release(&mut self, camera: CameraId, pipeline: PipelineId) {
        if let Some(owners) = self.owners.get_mut(&camera) {
            owners.retain(|owner| *owner != pipeline);
            if owners.is_empty() {
                self.owners.remove(&camera);
            }
        }
    }

    pub(crate) fn release_all(&mut self, pipeline: PipelineId) {
        self.owners.retain(|_, owners| {
            owners.retain(|owner| *owner != pipeline);
            !owners.is_empty()
        });
    }

    /// Pipelines `camera` is attached to, in attach order.
    pub fn owners(&self, camera: CameraId) -> &[PipelineId] {
        self.owners.get(&camera).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn pipeline(&self, id: PipelineId) -> Option<SharedPipeline> {
        self.pipelines.get(&id).and_then(Weak::upgrade)
    }
}
