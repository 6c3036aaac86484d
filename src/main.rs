use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use winit::application::ApplicationHandler;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowAttributes, WindowId};

use postchain::{
    Camera, Engine, EngineConfig, EffectToggle, GpuContext, LoggingConfig, PostProcess,
    ProgramDescriptor, RenderEffect, RenderOutput, RenderPipeline, RenderPipelineManager,
    RenderTarget, RenderTargetOptions, SamplingMode, SharedPostProcess, Size, WgpuBackend,
    init_logging,
};

const PIPELINE: &str = "demo";
const VIGNETTE: &str = "vignette";
const LUMA: &str = "luma";

struct DemoConfig {
    title: String,
    width: u32,
    height: u32,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            title: "postchain".to_string(),
            width: 1024,
            height: 768,
        }
    }
}

/// Everything that needs a live window.
struct DemoState {
    window: Arc<Window>,
    engine: Rc<Engine>,
    scene: RenderTarget,
    scene_pass: SharedPostProcess,
    manager: RenderPipelineManager,
    camera: Camera,
    vignette: bool,
    luma: bool,
}

impl DemoState {
    fn new(window: Arc<Window>) -> postchain::Result<Self> {
        let size = window.inner_size();
        let size = Size::new(size.width.max(1), size.height.max(1));

        let gpu = GpuContext::new(window.clone())?;
        let engine = Engine::with_config(WgpuBackend::new(gpu), EngineConfig::new().label("demo"));

        let scene = RenderTarget::new(&engine, "scene", size, RenderTargetOptions::new())?;
        let scene_pass = PostProcess::new(
            &engine,
            "gradient",
            ProgramDescriptor::new("gradient", include_str!("shaders/gradient.wgsl"))
                .with_inputs(0),
            SamplingMode::Bilinear,
        );

        let mut pipeline = RenderPipeline::new(&engine, PIPELINE)?;
        pipeline.add_effect(RenderEffect::new(&engine, VIGNETTE, true, |engine, _| {
            vec![PostProcess::new(
                engine,
                VIGNETTE,
                ProgramDescriptor::new(VIGNETTE, include_str!("shaders/vignette.wgsl")),
                SamplingMode::Bilinear,
            )]
        }));
        pipeline.add_effect(RenderEffect::new(&engine, "copy", true, |engine, _| {
            vec![PostProcess::pass_through(engine, "copy", SamplingMode::Nearest)]
        }));
        pipeline.add_isolated_effect(RenderEffect::new(&engine, LUMA, true, |engine, _| {
            vec![PostProcess::new(
                engine,
                LUMA,
                ProgramDescriptor::new(LUMA, include_str!("shaders/luma.wgsl")),
                SamplingMode::Bilinear,
            )]
        }));

        let mut manager = RenderPipelineManager::new(&engine);
        manager.add_pipeline(pipeline)?;

        let camera = Camera::new("main").with_viewport(size.width, size.height);
        manager.attach_cameras_to_render_pipeline(PIPELINE, std::slice::from_ref(&camera), true);

        Ok(Self {
            window,
            engine,
            scene,
            scene_pass,
            manager,
            camera,
            vignette: true,
            luma: false,
        })
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.engine.resize_surface(width, height);
        if let Err(error) = self.scene.resize(Size::new(width, height)) {
            log::error!("Failed to resize the scene target: {}", error);
        }
        self.camera = self.camera.clone().with_viewport(width, height);
        self.manager.update_camera(&self.camera);
    }

    fn toggle(&mut self, key: KeyCode) {
        let cameras = [self.camera.id];
        let result = match key {
            KeyCode::KeyV => {
                self.vignette = !self.vignette;
                if self.vignette {
                    self.manager
                        .enable_effect_in_pipeline(PIPELINE, VIGNETTE, &cameras)
                } else {
                    self.manager
                        .disable_effect_in_pipeline(PIPELINE, VIGNETTE, &cameras)
                }
            }
            KeyCode::KeyL => {
                self.luma = !self.luma;
                if self.luma {
                    self.manager
                        .enable_display_only_pass_in_pipeline(PIPELINE, LUMA, &cameras)
                } else {
                    self.manager
                        .disable_display_only_pass_in_pipeline(PIPELINE, LUMA, &cameras)
                }
            }
            _ => return,
        };
        if result == Some(EffectToggle::Unsupported) {
            log::warn!("{:?} toggled an unsupported effect", key);
        }
    }

    fn frame(&mut self, time: f32) {
        self.engine.tick();

        if self.scene_pass.is_ready() {
            let drawn = self
                .scene
                .output()
                .and_then(|output| self.engine.bind_framebuffer(output))
                .and_then(|()| self.scene_pass.apply(&[], time));
            self.engine.unbind_framebuffer();
            if let Err(error) = drawn {
                log::error!("Scene pass failed: {}", error);
            }
        }

        self.manager.post_process_manager().set_time(time);
        let source = self.scene.sampler_binding();
        self.manager
            .render_camera(self.camera.id, source, RenderOutput::Screen);
        self.engine.present();
    }
}

#[derive(Default)]
struct Demo {
    config: DemoConfig,
    state: Option<DemoState>,
    start_time: Option<Instant>,
}

impl ApplicationHandler for Demo {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        let attributes = WindowAttributes::default()
            .with_title(&self.config.title)
            .with_inner_size(winit::dpi::LogicalSize::new(
                self.config.width,
                self.config.height,
            ));
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(error) => {
                log::error!("Failed to create window: {}", error);
                event_loop.exit();
                return;
            }
        };

        match DemoState::new(window) {
            Ok(state) => {
                log::info!("Press V to toggle the vignette, L for the luma view");
                self.state = Some(state);
                self.start_time = Some(Instant::now());
            }
            Err(error) => {
                log::error!("Failed to set up the demo: {}", error);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(state) = &mut self.state else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                state.resize(size.width, size.height);
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state != ElementState::Pressed || event.repeat {
                    return;
                }
                match event.physical_key {
                    PhysicalKey::Code(KeyCode::Escape) => event_loop.exit(),
                    PhysicalKey::Code(key) => state.toggle(key),
                    PhysicalKey::Unidentified(_) => {}
                }
            }
            WindowEvent::RedrawRequested => {
                let time = self
                    .start_time
                    .map(|start| start.elapsed().as_secs_f32())
                    .unwrap_or_default();
                state.frame(time);
                state.window.request_redraw();
            }
            _ => (),
        }
    }
}

fn main() -> Result<(), winit::error::EventLoopError> {
    init_logging(LoggingConfig::new().filter("info,postchain=debug,wgpu_core=warn"));

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut demo = Demo::default();
    event_loop.run_app(&mut demo)
}
