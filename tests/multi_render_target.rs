//! Integration tests for multi render targets.

mod common;

use rstest::rstest;

use common::{Profile, TestContext};
use postchain::{
    MultiRenderTarget, MultiRenderTargetOptions, PipelineError, SamplingMode, Size,
    TextureFormat, TextureId, WrapMode,
};

fn ids(target: &MultiRenderTarget) -> Vec<TextureId> {
    target.textures().iter().map(|texture| texture.id()).collect()
}

#[test]
fn test_set_samples_regenerates_every_attachment() {
    let ctx = TestContext::new(Profile::Full);
    let mut mrt = MultiRenderTarget::new(
        &ctx.engine,
        "gbuffer",
        Size::square(256),
        3,
        MultiRenderTargetOptions::default(),
    )
    .unwrap();

    assert_eq!(mrt.set_samples(4).unwrap(), 4);
    assert_eq!(mrt.textures().len(), 3);
    for texture in mrt.textures() {
        assert_eq!(texture.samples(), 4);
        assert!(ctx.backend.is_live_texture(texture.id()));
    }
    assert_eq!(mrt.depth_texture().unwrap().samples(), 4);
    // Three colors plus depth; the single-sampled set is gone.
    assert_eq!(ctx.backend.live_texture_count(), 4);
}

#[test]
fn test_set_samples_clamps_to_device_limit() {
    let ctx = TestContext::new(Profile::Full);
    let mut mrt = MultiRenderTarget::new(
        &ctx.engine,
        "gbuffer",
        Size::square(64),
        2,
        MultiRenderTargetOptions::default(),
    )
    .unwrap();
    let before = ids(&mrt);

    assert_eq!(mrt.set_samples(16).unwrap(), 4);
    assert_ne!(ids(&mrt), before);

    // Unchanged count keeps the current set.
    let current = ids(&mrt);
    assert_eq!(mrt.set_samples(4).unwrap(), 4);
    assert_eq!(ids(&mrt), current);
}

#[rstest]
#[case::single(1)]
#[case::pair(2)]
#[case::gbuffer(4)]
fn test_resize_replaces_the_whole_set(#[case] count: usize) {
    let ctx = TestContext::new(Profile::Full);
    let mut mrt = MultiRenderTarget::new(
        &ctx.engine,
        "mrt",
        Size::new(128, 64),
        count,
        MultiRenderTargetOptions::new().depth_buffer(false),
    )
    .unwrap();
    let old = ids(&mrt);

    mrt.resize(Size::new(300, 200)).unwrap();

    assert_eq!(mrt.size(), Size::new(300, 200));
    assert_eq!(mrt.textures().len(), count);
    for texture in mrt.textures() {
        assert_eq!(texture.size(), Size::new(300, 200));
        assert!(ctx.backend.is_live_texture(texture.id()));
    }
    assert!(old.iter().all(|id| !ctx.backend.is_live_texture(*id)));
    assert_eq!(ctx.backend.live_texture_count(), count);
}

#[rstest]
#[case::no_mrt_feature(Profile::Basic, 3)]
#[case::too_many_attachments(Profile::NarrowMrt, 3)]
fn test_unsupported_target_allocates_nothing(#[case] profile: Profile, #[case] count: usize) {
    let ctx = TestContext::new(profile);
    let mut mrt = MultiRenderTarget::new(
        &ctx.engine,
        "mrt",
        Size::square(32),
        count,
        MultiRenderTargetOptions::default(),
    )
    .unwrap();

    assert!(!mrt.is_supported());
    assert!(mrt.textures().is_empty());
    assert!(mrt.framebuffer().is_err());
    mrt.resize(Size::square(64)).unwrap();
    assert!(mrt.textures().is_empty());
    assert_eq!(ctx.backend.live_texture_count(), 0);
}

#[test]
fn test_single_attachment_needs_no_mrt_feature() {
    let ctx = TestContext::new(Profile::Basic);
    let mut mrt = MultiRenderTarget::new(
        &ctx.engine,
        "single",
        Size::square(32),
        1,
        MultiRenderTargetOptions::default(),
    )
    .unwrap();
    assert!(mrt.is_supported());
    assert!(mrt.framebuffer().is_ok());
}

#[test]
fn test_invalid_construction_is_fatal() {
    let ctx = TestContext::new(Profile::Full);
    let options = MultiRenderTargetOptions::default;
    assert!(matches!(
        MultiRenderTarget::new(&ctx.engine, "mrt", Size::new(0, 16), 2, options()),
        Err(PipelineError::InvalidSize { width: 0, .. })
    ));
    assert!(matches!(
        MultiRenderTarget::new(&ctx.engine, "mrt", Size::square(16), 0, options()),
        Err(PipelineError::InvalidAttachmentCount(0))
    ));

    ctx.engine.notify_context_lost();
    assert!(matches!(
        MultiRenderTarget::new(&ctx.engine, "mrt", Size::square(16), 2, options()),
        Err(PipelineError::ContextLost)
    ));
}

#[test]
fn test_per_attachment_types_and_shared_wrap() {
    let ctx = TestContext::new(Profile::Full);
    let mut mrt = MultiRenderTarget::new(
        &ctx.engine,
        "gbuffer",
        Size::square(64),
        3,
        MultiRenderTargetOptions::new()
            .types(vec![TextureFormat::Rgba16Float, TextureFormat::Rgba32Float])
            .sampling_modes(vec![SamplingMode::Nearest])
            .default_type(TextureFormat::Rgba8Unorm),
    )
    .unwrap();

    let formats: Vec<_> = mrt.textures().iter().map(|t| t.format()).collect();
    assert_eq!(
        formats,
        vec![
            TextureFormat::Rgba16Float,
            TextureFormat::Rgba32Float,
            TextureFormat::Rgba8Unorm
        ]
    );
    assert_eq!(mrt.texture(0).unwrap().sampling, SamplingMode::Nearest);

    mrt.set_wrap_u(WrapMode::Repeat);
    mrt.set_wrap_v(WrapMode::MirrorRepeat);
    assert!(mrt.textures().iter().all(|t| t.wrap_u == WrapMode::Repeat));
    assert!(mrt.textures().iter().all(|t| t.wrap_v == WrapMode::MirrorRepeat));

    // Wrap modes survive regeneration.
    mrt.resize(Size::square(32)).unwrap();
    assert!(mrt.textures().iter().all(|t| t.wrap_u == WrapMode::Repeat));
}

#[test]
fn test_release_keeps_logical_state() {
    let ctx = TestContext::new(Profile::Full);
    let mut mrt = MultiRenderTarget::new(
        &ctx.engine,
        "mrt",
        Size::square(64),
        2,
        MultiRenderTargetOptions::default(),
    )
    .unwrap();
    mrt.framebuffer().unwrap();

    mrt.release_internal_textures();
    assert!(mrt.textures().is_empty());
    assert!(!mrt.is_ready());
    assert_eq!(ctx.backend.live_texture_count(), 0);
    assert_eq!(ctx.backend.live_framebuffer_count(), 0);

    mrt.resize(Size::square(128)).unwrap();
    mrt.ensure_textures().unwrap();
    assert_eq!(mrt.textures().len(), 2);
    assert!(mrt.textures().iter().all(|t| t.size() == Size::square(128)));
}

#[test]
fn test_rebuild_after_context_loss() {
    let ctx = TestContext::new(Profile::Full);
    let mut mrt = MultiRenderTarget::new(
        &ctx.engine,
        "gbuffer",
        Size::new(200, 100),
        3,
        MultiRenderTargetOptions::default().samples(2),
    )
    .unwrap();
    mrt.framebuffer().unwrap();
    let old = ids(&mrt);

    ctx.engine.notify_context_lost();
    ctx.engine.restore_context();
    assert_eq!(ctx.backend.live_texture_count(), 0);

    mrt.rebuild().unwrap();
    assert_eq!(mrt.textures().len(), 3);
    assert!(mrt.depth_texture().is_some());
    for texture in mrt.textures() {
        assert!(!old.contains(&texture.id()));
        assert!(ctx.backend.is_live_texture(texture.id()));
        assert_eq!(texture.size(), Size::new(200, 100));
        assert_eq!(texture.samples(), 2);
    }
    assert!(mrt.framebuffer().is_ok());
}

#[test]
fn test_lazy_target_stays_deferred_through_rebuild() {
    let ctx = TestContext::new(Profile::Full);
    let mut mrt = MultiRenderTarget::new(
        &ctx.engine,
        "lazy",
        Size::square(16),
        2,
        MultiRenderTargetOptions::new().lazy(true),
    )
    .unwrap();

    mrt.rebuild().unwrap();
    assert!(mrt.textures().is_empty());
    mrt.ensure_textures().unwrap();
    assert_eq!(mrt.textures().len(), 2);
}

#[test]
fn test_dispose_is_idempotent() {
    let ctx = TestContext::new(Profile::Full);
    let mut mrt = MultiRenderTarget::new(
        &ctx.engine,
        "mrt",
        Size::square(16),
        2,
        MultiRenderTargetOptions::default(),
    )
    .unwrap();

    assert!(mrt.dispose(false).is_empty());
    assert!(mrt.is_disposed());
    assert!(mrt.dispose(false).is_empty());
    assert_eq!(ctx.backend.live_texture_count(), 0);
    assert!(mrt.ensure_textures().is_err());
}
