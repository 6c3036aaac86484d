//! Shared helpers for the integration tests.
//!
//! Every test runs against the [`HeadlessBackend`], keeping a clone of it to
//! inspect allocations, compilations and recorded draws.

#![allow(dead_code)]

use std::rc::Rc;

use postchain::{
    Engine, GpuFeatures, GpuLimits, HeadlessBackend, HeadlessConfig, LoggingConfig, PostProcess,
    RenderEffect, SamplingMode, init_logging,
};

/// Device capabilities a test runs under.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Profile {
    /// Every optional feature.
    Full,
    /// No multiple render targets, no float textures.
    Basic,
    /// Multiple render targets, but at most two color attachments.
    NarrowMrt,
}

impl Profile {
    pub fn config(self) -> HeadlessConfig {
        match self {
            Profile::Full => HeadlessConfig::new(),
            Profile::Basic => HeadlessConfig::new().features(GpuFeatures::DEPTH_TEXTURES),
            Profile::NarrowMrt => HeadlessConfig::new().limits(GpuLimits {
                max_color_attachments: 2,
                ..Default::default()
            }),
        }
    }
}

pub struct TestContext {
    pub engine: Rc<Engine>,
    pub backend: HeadlessBackend,
}

impl TestContext {
    pub fn new(profile: Profile) -> Self {
        Self::with_config(profile.config())
    }

    /// Compilations stay pending until completed through the backend.
    pub fn manual(profile: Profile) -> Self {
        Self::with_config(profile.config().manual_compile())
    }

    pub fn with_config(config: HeadlessConfig) -> Self {
        init_logging(LoggingConfig::new().for_tests().filter("postchain=debug"));
        let backend = HeadlessBackend::new(config);
        let engine = Engine::new(backend.clone());
        Self { engine, backend }
    }

    /// An effect made of one pass-through pass named after it.
    pub fn copy_effect(&self, name: &'static str, single_instance: bool) -> RenderEffect {
        RenderEffect::new(&self.engine, name, single_instance, move |engine, _| {
            vec![PostProcess::pass_through(engine, name, SamplingMode::Bilinear)]
        })
    }

    /// An effect made of `passes` pass-through passes.
    pub fn chained_effect(&self, name: &'static str, passes: usize) -> RenderEffect {
        RenderEffect::new(&self.engine, name, false, move |engine, _| {
            (0..passes)
                .map(|i| {
                    PostProcess::pass_through(engine, format!("{name}{i}"), SamplingMode::Bilinear)
                })
                .collect()
        })
    }
}
