use std::sync::atomic::{AtomicU32, Ordering};

use crate::texture::Size;

static NEXT_CAMERA_ID: AtomicU32 = AtomicU32::new(1);

/// Stable identity of a camera. Pipelines key all per-camera state by it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CameraId(pub u32);

/// A camera as seen by the pipeline layer.
///
/// Only the identity and the viewport size are used here: the size drives
/// the dimensions of the intermediate targets a camera's chain renders
/// through.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Camera {
    pub id: CameraId,
    pub name: String,
    pub width: u32,
    pub height: u32,
}

impl Camera {
    /// A camera with a fresh process-unique id and an 800x600 viewport.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(CameraId(NEXT_CAMERA_ID.fetch_add(1, Ordering::Relaxed)), name)
    }

    pub fn with_id(id: CameraId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            width: 800,
            height: 600,
        }
    }

    pub fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}
