//! Device, queue and optional presentation surface.
//!
//! [`GpuContext`] holds the `wgpu` objects the [`WgpuBackend`](super::WgpuBackend)
//! renders with. It can be created for a window (with a surface to present
//! to) or headless, for off-screen work only.

use std::sync::Arc;

use winit::window::Window;

use crate::error::BackendError;

/// Core `wgpu` objects.
///
/// Fields are public to allow direct access to `wgpu` when needed.
pub struct GpuContext {
    /// Presentation surface, absent for headless contexts.
    pub surface: Option<wgpu::Surface<'static>>,
    /// The logical GPU device.
    pub device: wgpu::Device,
    /// The command queue.
    pub queue: wgpu::Queue,
    /// Current surface configuration. Headless contexts keep one too, so
    /// screen-sized outputs have a format and size.
    pub config: wgpu::SurfaceConfiguration,
    /// Features the adapter granted.
    pub features: wgpu::Features,
    /// Limits the adapter granted.
    pub limits: wgpu::Limits,
}

impl GpuContext {
    /// Create a context presenting to a winit window.
    ///
    /// Picks an sRGB surface format and Fifo presentation.
    pub fn new(window: Arc<Window>) -> Result<Self, BackendError> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let surface = instance
            .create_surface(window)
            .map_err(|e| BackendError::Surface(e.to_string()))?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .map_err(|_| BackendError::NoAdapter)?;

        let (device, queue) = Self::request_device(&adapter)?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| BackendError::Surface("surface reports no formats".into()))?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        log::info!(
            "GPU context ready: {} ({:?}), surface {:?} {}x{}",
            adapter.get_info().name,
            adapter.get_info().backend,
            config.format,
            config.width,
            config.height
        );

        Ok(Self {
            surface: Some(surface),
            features: device.features(),
            limits: device.limits(),
            device,
            queue,
            config,
        })
    }

    /// Create a context without a surface.
    ///
    /// `width`/`height` size the (never presented) screen output.
    pub fn headless(width: u32, height: u32) -> Result<Self, BackendError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|_| BackendError::NoAdapter)?;

        let (device, queue) = Self::request_device(&adapter)?;

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            width: width.max(1),
            height: height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: wgpu::CompositeAlphaMode::Auto,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };

        log::info!("headless GPU context ready: {}", adapter.get_info().name);

        Ok(Self {
            surface: None,
            features: device.features(),
            limits: device.limits(),
            device,
            queue,
            config,
        })
    }

    fn request_device(
        adapter: &wgpu::Adapter,
    ) -> Result<(wgpu::Device, wgpu::Queue), BackendError> {
        pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Postchain Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: Default::default(),
            trace: Default::default(),
            experimental_features: Default::default(),
        }))
        .map_err(|e| BackendError::DeviceRequest(e.to_string()))
    }

    /// Resize the surface.
    ///
    /// Zero-sized dimensions (minimized windows) are ignored.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.config.width = width;
            self.config.height = height;
            if let Some(surface) = &self.surface {
                surface.configure(&self.device, &self.config);
            }
        }
    }

    pub fn width(&self) -> u32 {
        self.config.width
    }

    pub fn height(&self) -> u32 {
        self.config.height
    }

    pub fn aspect(&self) -> f32 {
        self.config.width as f32 / self.config.height as f32
    }
}
