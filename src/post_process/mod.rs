//! Full-screen passes and the chain executor.
//!
//! A [`PostProcess`] is one full-screen program; the [`PostProcessManager`]
//! runs an ordered list of them into an output for one frame, routing
//! intermediate results through two ping-pong targets.

mod manager;
mod pass;

pub use manager::{PostProcessManager, RenderStats};
pub use pass::{PASS_THROUGH_SHADER, PostProcess, SharedPostProcess};
