//! Integration tests for pipelines, effects and the pipeline manager.

mod common;

use std::cell::Cell;
use std::rc::Rc;

use rstest::rstest;

use common::{Profile, TestContext};
use postchain::{
    Camera, EffectState, EffectToggle, GpuFeatures, RenderOutput, RenderPipeline,
    RenderPipelineManager, RenderStats, RenderTarget, RenderTargetOptions, Size,
};

// ============================================================================
// Effect toggles
// ============================================================================

#[test]
fn test_enable_then_disable_leaves_no_active_camera() {
    let ctx = TestContext::new(Profile::Full);
    let mut pipeline = RenderPipeline::new(&ctx.engine, "main").unwrap();
    pipeline.add_effect(ctx.copy_effect("bloom", false));
    let cam_a = Camera::new("camA");
    pipeline.attach_cameras(std::slice::from_ref(&cam_a), false);

    assert_eq!(
        pipeline.enable_effect("bloom", &[cam_a.id]),
        EffectToggle::Applied(1)
    );
    assert_eq!(
        pipeline.disable_effect("bloom", &[cam_a.id]),
        EffectToggle::Applied(1)
    );
    assert!(pipeline.effect("bloom").unwrap().active_cameras().is_empty());
    assert!(pipeline.chain(cam_a.id).unwrap().passes.is_empty());
}

#[test]
fn test_unsupported_effect_toggle_is_a_no_op() {
    let ctx = TestContext::new(Profile::Basic);
    let mut pipeline = RenderPipeline::new(&ctx.engine, "main").unwrap();
    pipeline.add_effect(
        ctx.copy_effect("hdr", true)
            .with_required_features(GpuFeatures::FLOAT_TEXTURES),
    );
    pipeline.add_effect(ctx.copy_effect("fxaa", true));
    let camera = Camera::new("main");
    pipeline.attach_cameras(std::slice::from_ref(&camera), false);

    let before = pipeline.effect("hdr").unwrap().active_cameras().clone();
    assert_eq!(
        pipeline.enable_effect("hdr", &[camera.id]),
        EffectToggle::Unsupported
    );
    assert_eq!(pipeline.effect("hdr").unwrap().active_cameras(), &before);
    assert!(!pipeline.is_supported());

    // Unsupported and merely disabled are told apart.
    pipeline.disable_effect("fxaa", &[camera.id]);
    assert_eq!(
        pipeline.effect_state("hdr", camera.id),
        EffectState::Unsupported
    );
    assert_eq!(
        pipeline.effect_state("fxaa", camera.id),
        EffectState::Inactive
    );
}

#[test]
fn test_unknown_names_and_cameras_are_tolerated() {
    let ctx = TestContext::new(Profile::Full);
    let mut pipeline = RenderPipeline::new(&ctx.engine, "main").unwrap();
    pipeline.add_effect(ctx.copy_effect("bloom", true));
    let attached = Camera::new("attached");
    let stranger = Camera::new("stranger");
    pipeline.attach_cameras(std::slice::from_ref(&attached), false);

    assert_eq!(
        pipeline.enable_effect("missing", &[attached.id]),
        EffectToggle::UnknownEffect
    );
    assert_eq!(
        pipeline.disable_effect("bloom", &[stranger.id]),
        EffectToggle::Applied(0)
    );
    assert_eq!(pipeline.detach_cameras(&[stranger.id]), 0);
    assert_eq!(
        pipeline.enable_display_only_pass("missing", &[attached.id]),
        EffectToggle::UnknownEffect
    );
    assert_eq!(
        pipeline.effect_state("bloom", attached.id),
        EffectState::Active
    );
    assert_eq!(
        pipeline.effect_state("bloom", stranger.id),
        EffectState::Detached
    );
}

// ============================================================================
// Camera attachment
// ============================================================================

#[rstest]
#[case::shared_one_camera(true, 1)]
#[case::shared_three_cameras(true, 3)]
#[case::per_camera_one_camera(false, 1)]
#[case::per_camera_three_cameras(false, 3)]
fn test_attach_detach_round_trip(#[case] single_instance: bool, #[case] cameras: usize) {
    let ctx = TestContext::new(Profile::Full);
    let mut pipeline = RenderPipeline::new(&ctx.engine, "main").unwrap();
    pipeline.add_effect(ctx.copy_effect("bloom", single_instance));
    pipeline.add_effect(ctx.chained_effect("blur", 2));

    let cameras: Vec<Camera> = (0..cameras)
        .map(|i| Camera::new(format!("cam{i}")))
        .collect();
    let ids: Vec<_> = cameras.iter().map(|camera| camera.id).collect();

    assert_eq!(pipeline.attach_cameras(&cameras, false), cameras.len());
    assert_eq!(pipeline.attach_cameras(&cameras, false), 0);
    assert!(ctx.engine.live_program_count() > 0);

    assert_eq!(pipeline.detach_cameras(&ids), cameras.len());
    assert_eq!(pipeline.camera_count(), 0);
    for name in ["bloom", "blur"] {
        assert!(pipeline.effect(name).unwrap().active_cameras().is_empty());
    }
    assert_eq!(ctx.engine.live_program_count(), 0);
}

#[test]
fn test_force_unique_moves_camera_between_pipelines() {
    let ctx = TestContext::new(Profile::Full);
    let mut manager = RenderPipelineManager::new(&ctx.engine);
    for name in ["first", "second", "third"] {
        let mut pipeline = RenderPipeline::new(&ctx.engine, name).unwrap();
        pipeline.add_effect(ctx.copy_effect("copy", false));
        manager.add_pipeline(pipeline).unwrap();
    }
    let camera = Camera::new("main");
    let cameras = std::slice::from_ref(&camera);

    manager.attach_cameras_to_render_pipeline("first", cameras, false);
    manager.attach_cameras_to_render_pipeline("second", cameras, false);
    assert_eq!(manager.owners_of(camera.id), vec!["first", "second"]);

    manager.attach_cameras_to_render_pipeline("third", cameras, true);
    assert_eq!(manager.owners_of(camera.id), vec!["third"]);
    assert_eq!(manager.owner_of(camera.id).as_deref(), Some("third"));

    let first = manager.pipeline("first").unwrap();
    assert!(!first.borrow().is_attached(camera.id));
    assert!(first.borrow().effect("copy").unwrap().active_cameras().is_empty());
    assert!(manager.pipeline("third").unwrap().borrow().is_attached(camera.id));
    // Only the owning pipeline keeps a pass for the camera.
    assert_eq!(ctx.engine.live_program_count(), 1);
}

#[test]
fn test_busy_previous_owner_keeps_its_ownership_entry() {
    let ctx = TestContext::new(Profile::Full);
    let mut manager = RenderPipelineManager::new(&ctx.engine);
    for name in ["first", "second"] {
        let mut pipeline = RenderPipeline::new(&ctx.engine, name).unwrap();
        pipeline.add_effect(ctx.copy_effect("copy", false));
        manager.add_pipeline(pipeline).unwrap();
    }
    let camera = Camera::new("main");
    let cameras = std::slice::from_ref(&camera);
    manager.attach_cameras_to_render_pipeline("first", cameras, false);

    let first = manager.pipeline("first").unwrap();
    let held = first.borrow();
    manager.attach_cameras_to_render_pipeline("second", cameras, true);

    // The first pipeline could not detach, so the table still lists it.
    assert!(held.is_attached(camera.id));
    assert_eq!(manager.owners_of(camera.id), vec!["first", "second"]);
    drop(held);

    manager.attach_cameras_to_render_pipeline("second", cameras, true);
    assert!(!first.borrow().is_attached(camera.id));
    assert_eq!(manager.owners_of(camera.id), vec!["second"]);
}

#[test]
fn test_duplicate_pipeline_name_rejected() {
    let ctx = TestContext::new(Profile::Full);
    let mut manager = RenderPipelineManager::new(&ctx.engine);
    manager
        .add_pipeline(RenderPipeline::new(&ctx.engine, "main").unwrap())
        .unwrap();
    assert!(
        manager
            .add_pipeline(RenderPipeline::new(&ctx.engine, "main").unwrap())
            .is_err()
    );
    assert_eq!(manager.pipeline_names(), &["main".to_string()]);
}

// ============================================================================
// Display-only passes
// ============================================================================

#[test]
fn test_display_only_pass_supersedes_previous_one() {
    let ctx = TestContext::new(Profile::Full);
    let mut pipeline = RenderPipeline::new(&ctx.engine, "main").unwrap();
    pipeline.add_effect(ctx.copy_effect("bloom", true));
    pipeline.add_isolated_effect(ctx.copy_effect("passA", false));
    pipeline.add_isolated_effect(ctx.copy_effect("passB", false));
    let cam_a = Camera::new("camA");
    pipeline.attach_cameras(std::slice::from_ref(&cam_a), false);

    pipeline.enable_display_only_pass("passA", &[cam_a.id]);
    pipeline.enable_display_only_pass("passB", &[cam_a.id]);

    assert_eq!(pipeline.active_display_only_pass(cam_a.id), Some("passB"));
    assert!(!pipeline.isolated_effect("passA").unwrap().is_attached(cam_a.id));
    assert!(pipeline.isolated_effect("passB").unwrap().is_attached(cam_a.id));
    let chain = pipeline.chain(cam_a.id).unwrap();
    assert_eq!(chain.display_only.as_deref(), Some("passB"));
    assert_eq!(chain.effects, vec!["passB"]);

    // Disabling a pass that is not shown leaves the camera alone.
    assert_eq!(
        pipeline.disable_display_only_pass("passA", &[cam_a.id]),
        EffectToggle::Applied(0)
    );
    assert_eq!(pipeline.active_display_only_pass(cam_a.id), Some("passB"));

    pipeline.disable_display_only_pass("passB", &[cam_a.id]);
    assert_eq!(pipeline.active_display_only_pass(cam_a.id), None);
    assert_eq!(pipeline.chain(cam_a.id).unwrap().effects, vec!["bloom"]);
}

#[test]
fn test_display_only_pass_renders_to_screen_alone() {
    let ctx = TestContext::new(Profile::Full);
    let mut manager = RenderPipelineManager::new(&ctx.engine);
    let mut pipeline = RenderPipeline::new(&ctx.engine, "main").unwrap();
    pipeline.add_effect(ctx.chained_effect("blur", 2));
    pipeline.add_isolated_effect(ctx.copy_effect("depth", true));
    manager.add_pipeline(pipeline).unwrap();

    let camera = Camera::new("main").with_viewport(320, 200);
    manager.attach_cameras_to_render_pipeline("main", std::slice::from_ref(&camera), false);
    manager.enable_display_only_pass_in_pipeline("main", "depth", &[camera.id]);
    ctx.engine.tick();

    let mut target =
        RenderTarget::new(&ctx.engine, "scene", Size::new(320, 200), Default::default())
            .unwrap();
    let offscreen = target.output().unwrap();
    let stats = manager.render_camera(camera.id, target.sampler_binding(), offscreen);

    assert_eq!(stats, RenderStats { executed: 1, deferred: 0 });
    let draws = ctx.backend.draws();
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].output, RenderOutput::Screen);
}

// ============================================================================
// Rendering
// ============================================================================

#[test]
fn test_chain_renders_in_effect_order_through_intermediates() {
    let ctx = TestContext::new(Profile::Full);
    let mut manager = RenderPipelineManager::new(&ctx.engine);
    let mut pipeline = RenderPipeline::new(&ctx.engine, "main").unwrap();
    pipeline.add_effect(ctx.chained_effect("blur", 2));
    pipeline.add_effect(ctx.copy_effect("tonemap", true));
    manager.add_pipeline(pipeline).unwrap();

    let camera = Camera::new("main").with_viewport(640, 360);
    manager.attach_cameras_to_render_pipeline("main", std::slice::from_ref(&camera), false);
    ctx.engine.tick();

    let scene = RenderTarget::new(
        &ctx.engine,
        "scene",
        Size::new(640, 360),
        RenderTargetOptions::new(),
    )
    .unwrap();
    let source = scene.sampler_binding();
    let stats = manager.render_camera(camera.id, source, RenderOutput::Screen);
    assert_eq!(stats, RenderStats { executed: 3, deferred: 0 });

    let draws = ctx.backend.draws();
    let source_id = scene.texture().unwrap().id();
    assert_eq!(draws[0].inputs[0].texture, source_id);
    assert_ne!(draws[1].inputs[0].texture, source_id);
    assert_eq!(draws[0].output_size, Size::new(640, 360));
    assert_eq!(draws[2].output, RenderOutput::Screen);
    assert_eq!(
        manager.post_process_manager().intermediate_size(),
        Some(Size::new(640, 360))
    );
}

#[test]
fn test_passes_wait_for_compilation() {
    let ctx = TestContext::manual(Profile::Full);
    let mut manager = RenderPipelineManager::new(&ctx.engine);
    let mut pipeline = RenderPipeline::new(&ctx.engine, "main").unwrap();
    pipeline.add_effect(ctx.copy_effect("a", true));
    pipeline.add_effect(ctx.copy_effect("b", true));
    manager.add_pipeline(pipeline).unwrap();

    let camera = Camera::new("main");
    manager.attach_cameras_to_render_pipeline("main", std::slice::from_ref(&camera), false);

    ctx.engine.tick();
    let stats = manager.render_camera(camera.id, None, RenderOutput::Screen);
    assert_eq!(stats, RenderStats { executed: 0, deferred: 2 });
    assert!(ctx.backend.draws().is_empty());

    let pending = ctx.backend.pending_programs();
    ctx.backend.complete_program(pending[1]);
    ctx.engine.tick();
    let stats = manager.render_camera(camera.id, None, RenderOutput::Screen);
    assert_eq!(stats, RenderStats { executed: 1, deferred: 1 });
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_dispose_twice_leaves_pipeline_empty() {
    let ctx = TestContext::new(Profile::Full);
    let mut pipeline = RenderPipeline::new(&ctx.engine, "main").unwrap();
    pipeline.add_effect(ctx.copy_effect("bloom", false));
    pipeline.add_isolated_effect(ctx.copy_effect("normals", true));
    let cameras = [Camera::new("a"), Camera::new("b")];
    pipeline.attach_cameras(&cameras, false);

    for _ in 0..2 {
        pipeline.dispose(false);
        assert!(pipeline.is_disposed());
        assert_eq!(pipeline.camera_count(), 0);
        assert!(pipeline.effect_names().is_empty());
        assert!(pipeline.effect("bloom").is_none());
        assert_eq!(ctx.engine.live_program_count(), 0);
    }
}

#[test]
fn test_dispose_without_recursion_keeps_passes() {
    let ctx = TestContext::new(Profile::Full);
    let mut pipeline = RenderPipeline::new(&ctx.engine, "main").unwrap();
    pipeline.add_effect(ctx.copy_effect("bloom", false));
    pipeline.add_effect(ctx.copy_effect("tonemap", true));
    let camera = Camera::new("main");
    pipeline.attach_cameras(std::slice::from_ref(&camera), false);
    assert_eq!(ctx.engine.live_program_count(), 2);

    pipeline.dispose(true);
    assert!(pipeline.is_disposed());
    assert_eq!(pipeline.camera_count(), 0);
    assert!(pipeline.chain(camera.id).is_none());
    assert_eq!(pipeline.effect_names(), &["bloom", "tonemap"]);
    assert!(!pipeline.effect("bloom").unwrap().is_attached(camera.id));
    assert_eq!(ctx.engine.live_program_count(), 2);

    pipeline.dispose(false);
    assert!(pipeline.effect_names().is_empty());
    assert_eq!(ctx.engine.live_program_count(), 0);
}

#[test]
fn test_dispose_cancels_pending_continuations() {
    let ctx = TestContext::manual(Profile::Full);
    let mut pipeline = RenderPipeline::new(&ctx.engine, "main").unwrap();
    pipeline.add_effect(ctx.copy_effect("bloom", false));
    let camera = Camera::new("main");
    pipeline.attach_cameras(std::slice::from_ref(&camera), false);

    let pass = pipeline.effect("bloom").unwrap().post_processes(camera.id).unwrap()[0].clone();
    let program = pass.program().unwrap();
    let ran = Rc::new(Cell::new(false));
    let flag = ran.clone();
    pass.execute_when_compiled(move |_| flag.set(true));
    drop(pass);

    pipeline.dispose(false);
    assert!(!ctx.backend.complete_program(program));
    ctx.engine.tick();
    assert!(!ran.get());
    assert_eq!(ctx.engine.queued_continuations(), 0);
}

#[test]
fn test_rebuild_after_context_loss() {
    let ctx = TestContext::new(Profile::Full);
    let mut manager = RenderPipelineManager::new(&ctx.engine);
    let mut pipeline = RenderPipeline::new(&ctx.engine, "main").unwrap();
    pipeline.add_effect(ctx.chained_effect("blur", 2));
    manager.add_pipeline(pipeline).unwrap();
    let camera = Camera::new("main");
    manager.attach_cameras_to_render_pipeline("main", std::slice::from_ref(&camera), false);
    ctx.engine.tick();
    manager.render_camera(camera.id, None, RenderOutput::Screen);

    ctx.engine.notify_context_lost();
    assert!(RenderPipeline::new(&ctx.engine, "late").is_err());
    assert_eq!(ctx.engine.restore_context(), 2);
    manager.rebuild().unwrap();

    ctx.engine.tick();
    ctx.backend.clear_draws();
    let stats = manager.render_camera(camera.id, None, RenderOutput::Screen);
    assert_eq!(stats.executed, 2);
}
