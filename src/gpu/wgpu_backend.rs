//! `wgpu` implementation of [`GpuBackend`].
//!
//! Compilation is split the way the pipeline expects: submitting a program
//! only queues its WGSL source, and the shader module is created (inside a
//! validation error scope) when the engine next polls. Render pipelines are
//! built lazily per output layout (color formats, depth format, sample
//! count) the first time a program draws into that layout.

use std::collections::HashMap;

use crate::error::BackendError;
use crate::texture::{
    SamplingMode, Size, TextureDescriptor, TextureFormat, TextureUsage, WrapMode,
};

use super::{
    CompileStatus, FramebufferDescriptor, FramebufferId, FullscreenDraw, GpuBackend, GpuContext,
    GpuFeatures, GpuLimits, PassUniforms, ProgramDescriptor, ProgramId, RenderOutput, TextureId,
};

struct WgpuTexture {
    #[allow(dead_code)]
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    descriptor: TextureDescriptor,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct PipelineKey {
    color: Vec<wgpu::TextureFormat>,
    depth: Option<wgpu::TextureFormat>,
    samples: u32,
}

struct WgpuProgram {
    label: String,
    module: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    input_count: u32,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
}

/// Views and layout of the output a draw renders into.
struct OutputTarget {
    color: Vec<wgpu::TextureView>,
    depth: Option<(wgpu::TextureView, TextureFormat)>,
    key: PipelineKey,
    size: Size,
}

/// Renders with `wgpu`. See the module docs.
pub struct WgpuBackend {
    gpu: GpuContext,
    next_id: u64,
    textures: HashMap<TextureId, WgpuTexture>,
    framebuffers: HashMap<FramebufferId, FramebufferDescriptor>,
    programs: HashMap<ProgramId, WgpuProgram>,
    pending: Vec<(ProgramId, ProgramDescriptor)>,
    samplers: HashMap<(WrapMode, WrapMode, SamplingMode), wgpu::Sampler>,
    uniform_buffer: wgpu::Buffer,
    bound: Option<RenderOutput>,
    needs_clear: bool,
    frame: Option<wgpu::SurfaceTexture>,
}

impl WgpuBackend {
    pub fn new(gpu: GpuContext) -> Self {
        let uniform_buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Pass Uniforms"),
            size: std::mem::size_of::<PassUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            gpu,
            next_id: 0,
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            programs: HashMap::new(),
            pending: Vec::new(),
            samplers: HashMap::new(),
            uniform_buffer,
            bound: None,
            needs_clear: false,
            frame: None,
        }
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn compile(&self, descriptor: &ProgramDescriptor) -> Result<WgpuProgram, BackendError> {
        let device = &self.gpu.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&descriptor.label),
            source: wgpu::ShaderSource::Wgsl(descriptor.source.as_str().into()),
        });

        let mut entries = vec![
            // Uniforms
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        ];
        for input in 0..descriptor.input_count {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: 1 + input * 2,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: 2 + input * 2,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            });
        }

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&format!("{} Bind Group Layout", descriptor.label)),
            entries: &entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{} Pipeline Layout", descriptor.label)),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(BackendError::ShaderCompile(error.to_string()));
        }

        Ok(WgpuProgram {
            label: descriptor.label.clone(),
            module,
            bind_group_layout,
            pipeline_layout,
            input_count: descriptor.input_count,
            pipelines: HashMap::new(),
        })
    }

    fn build_pipeline(
        device: &wgpu::Device,
        program: &WgpuProgram,
        key: &PipelineKey,
    ) -> wgpu::RenderPipeline {
        let targets: Vec<Option<wgpu::ColorTargetState>> = key
            .color
            .iter()
            .map(|format| {
                Some(wgpu::ColorTargetState {
                    format: *format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();

        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&format!("{} Pipeline", program.label)),
            layout: Some(&program.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &program.module,
                entry_point: Some("vs"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &program.module,
                entry_point: Some("fs"),
                targets: &targets,
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: key.depth.map(|format| wgpu::DepthStencilState {
                format,
                depth_write_enabled: false,
                depth_compare: wgpu::CompareFunction::Always,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState {
                count: key.samples,
                ..Default::default()
            },
            multiview: None,
            cache: None,
        })
    }

    fn resolve_output(&mut self, output: RenderOutput) -> Result<OutputTarget, BackendError> {
        match output {
            RenderOutput::Screen => {
                if self.frame.is_none() {
                    let surface = self.gpu.surface.as_ref().ok_or_else(|| {
                        BackendError::Surface("headless context has no screen".into())
                    })?;
                    let frame = surface
                        .get_current_texture()
                        .map_err(|e| BackendError::Surface(e.to_string()))?;
                    self.frame = Some(frame);
                }
                let frame = self
                    .frame
                    .as_ref()
                    .ok_or_else(|| BackendError::Surface("no surface texture".into()))?;
                let view = frame
                    .texture
                    .create_view(&wgpu::TextureViewDescriptor::default());
                Ok(OutputTarget {
                    color: vec![view],
                    depth: None,
                    key: PipelineKey {
                        color: vec![self.gpu.config.format],
                        depth: None,
                        samples: 1,
                    },
                    size: Size::new(self.gpu.width(), self.gpu.height()),
                })
            }
            RenderOutput::Framebuffer(id) => {
                let framebuffer = self
                    .framebuffers
                    .get(&id)
                    .ok_or(BackendError::UnknownFramebuffer(id.0))?;

                let mut color = Vec::with_capacity(framebuffer.color.len());
                let mut formats = Vec::with_capacity(framebuffer.color.len());
                let mut samples = 1;
                let mut size = Size::default();
                for texture_id in &framebuffer.color {
                    let texture = self
                        .textures
                        .get(texture_id)
                        .ok_or(BackendError::UnknownTexture(texture_id.0))?;
                    color.push(texture.view.clone());
                    formats.push(to_wgpu_format(texture.descriptor.format));
                    samples = texture.descriptor.samples;
                    size = texture.descriptor.size;
                }

                let depth = match framebuffer.depth {
                    Some(texture_id) => {
                        let texture = self
                            .textures
                            .get(&texture_id)
                            .ok_or(BackendError::UnknownTexture(texture_id.0))?;
                        Some((texture.view.clone(), texture.descriptor.format))
                    }
                    None => None,
                };

                Ok(OutputTarget {
                    color,
                    key: PipelineKey {
                        color: formats,
                        depth: depth.as_ref().map(|(_, format)| to_wgpu_format(*format)),
                        samples,
                    },
                    depth,
                    size,
                })
            }
        }
    }
}

impl GpuBackend for WgpuBackend {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn features(&self) -> GpuFeatures {
        let mut features = GpuFeatures::MULTISAMPLE_RENDER_TARGETS
            | GpuFeatures::HALF_FLOAT_TEXTURES
            | GpuFeatures::DEPTH_TEXTURES;
        if self.gpu.limits.max_color_attachments > 1 {
            features |= GpuFeatures::MULTIPLE_RENDER_TARGETS;
        }
        if self.gpu.features.contains(wgpu::Features::FLOAT32_FILTERABLE) {
            features |= GpuFeatures::FLOAT_TEXTURES;
        }
        features
    }

    fn limits(&self) -> GpuLimits {
        GpuLimits {
            max_color_attachments: self.gpu.limits.max_color_attachments,
            max_samples: 4,
            max_texture_size: self.gpu.limits.max_texture_dimension_2d,
        }
    }

    fn create_texture(
        &mut self,
        descriptor: &TextureDescriptor,
    ) -> Result<TextureId, BackendError> {
        if descriptor.size.is_empty() {
            return Err(BackendError::ResourceCreation(format!(
                "texture '{}' has zero size",
                descriptor.label
            )));
        }

        let texture = self.gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&descriptor.label),
            size: wgpu::Extent3d {
                width: descriptor.size.width,
                height: descriptor.size.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: descriptor.mip_level_count,
            sample_count: descriptor.samples,
            dimension: wgpu::TextureDimension::D2,
            format: to_wgpu_format(descriptor.format),
            usage: to_wgpu_usage(descriptor.usage),
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let id = TextureId(self.allocate_id());
        log::trace!("WgpuBackend: created texture {:?} '{}'", id, descriptor.label);
        self.textures.insert(
            id,
            WgpuTexture {
                texture,
                view,
                descriptor: descriptor.clone(),
            },
        );
        Ok(id)
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        if let Some(entry) = self.textures.remove(&texture) {
            entry.texture.destroy();
        }
    }

    fn create_framebuffer(
        &mut self,
        descriptor: &FramebufferDescriptor,
    ) -> Result<FramebufferId, BackendError> {
        for texture in descriptor.color.iter().chain(descriptor.depth.iter()) {
            if !self.textures.contains_key(texture) {
                return Err(BackendError::UnknownTexture(texture.0));
            }
        }
        let id = FramebufferId(self.allocate_id());
        self.framebuffers.insert(id, descriptor.clone());
        Ok(id)
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.framebuffers.remove(&framebuffer);
        if self.bound == Some(RenderOutput::Framebuffer(framebuffer)) {
            self.bound = None;
        }
    }

    fn bind_framebuffer(&mut self, output: RenderOutput) -> Result<(), BackendError> {
        if let RenderOutput::Framebuffer(id) = output {
            if !self.framebuffers.contains_key(&id) {
                return Err(BackendError::UnknownFramebuffer(id.0));
            }
        }
        self.bound = Some(output);
        self.needs_clear = true;
        Ok(())
    }

    fn unbind_framebuffer(&mut self) {
        self.bound = None;
    }

    fn compile_program(&mut self, program: ProgramId, descriptor: &ProgramDescriptor) {
        self.programs.remove(&program);
        self.pending.retain(|(id, _)| *id != program);
        self.pending.push((program, descriptor.clone()));
    }

    fn poll_compiled(&mut self) -> Vec<CompileStatus> {
        let pending = std::mem::take(&mut self.pending);
        let mut finished = Vec::with_capacity(pending.len());
        for (id, descriptor) in pending {
            let result = match self.compile(&descriptor) {
                Ok(program) => {
                    self.programs.insert(id, program);
                    Ok(())
                }
                Err(error) => Err(error),
            };
            finished.push(CompileStatus {
                program: id,
                result,
            });
        }
        finished
    }

    fn destroy_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
        self.pending.retain(|(id, _)| *id != program);
    }

    fn draw_fullscreen(&mut self, draw: &FullscreenDraw) -> Result<(), BackendError> {
        let output = self
            .bound
            .ok_or_else(|| BackendError::ResourceCreation("no output bound for draw".into()))?;
        let target = self.resolve_output(output)?;

        for input in &draw.inputs {
            if !self.textures.contains_key(&input.texture) {
                return Err(BackendError::UnknownTexture(input.texture.0));
            }
            let device = &self.gpu.device;
            self.samplers
                .entry((input.wrap_u, input.wrap_v, input.sampling))
                .or_insert_with(|| {
                    create_sampler(device, input.wrap_u, input.wrap_v, input.sampling)
                });
        }

        {
            let program = self
                .programs
                .get_mut(&draw.program)
                .ok_or(BackendError::UnknownProgram(draw.program.0))?;
            if (draw.inputs.len() as u32) < program.input_count {
                return Err(BackendError::ResourceCreation(format!(
                    "program '{}' expects {} inputs, got {}",
                    program.label,
                    program.input_count,
                    draw.inputs.len()
                )));
            }
            if !program.pipelines.contains_key(&target.key) {
                let pipeline = Self::build_pipeline(&self.gpu.device, program, &target.key);
                program.pipelines.insert(target.key.clone(), pipeline);
            }
        }

        let uniforms = PassUniforms {
            resolution: [target.size.width as f32, target.size.height as f32],
            time: draw.time,
            _padding: 0.0,
        };
        self.gpu
            .queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::cast_slice(&[uniforms]));

        let program = self
            .programs
            .get(&draw.program)
            .ok_or(BackendError::UnknownProgram(draw.program.0))?;
        let pipeline = program
            .pipelines
            .get(&target.key)
            .ok_or(BackendError::UnknownProgram(draw.program.0))?;

        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: self.uniform_buffer.as_entire_binding(),
        }];
        for (index, input) in draw
            .inputs
            .iter()
            .take(program.input_count as usize)
            .enumerate()
        {
            let texture = self
                .textures
                .get(&input.texture)
                .ok_or(BackendError::UnknownTexture(input.texture.0))?;
            let sampler = self
                .samplers
                .get(&(input.wrap_u, input.wrap_v, input.sampling))
                .ok_or(BackendError::UnknownTexture(input.texture.0))?;
            let index = index as u32;
            entries.push(wgpu::BindGroupEntry {
                binding: 1 + index * 2,
                resource: wgpu::BindingResource::TextureView(&texture.view),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: 2 + index * 2,
                resource: wgpu::BindingResource::Sampler(sampler),
            });
        }

        let bind_group = self
            .gpu
            .device
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&format!("{} Bind Group", program.label)),
                layout: &program.bind_group_layout,
                entries: &entries,
            });

        let load = if self.needs_clear {
            wgpu::LoadOp::Clear(wgpu::Color::BLACK)
        } else {
            wgpu::LoadOp::Load
        };

        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = target
            .color
            .iter()
            .map(|view| {
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })
            })
            .collect();

        let depth_stencil_attachment =
            target
                .depth
                .as_ref()
                .map(|(view, format)| wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: format.has_stencil().then_some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                });

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Fullscreen Pass Encoder"),
            });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(&program.label),
                color_attachments: &color_attachments,
                depth_stencil_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            render_pass.set_pipeline(pipeline);
            render_pass.set_bind_group(0, &bind_group, &[]);
            render_pass.draw(0..3, 0..1);
        }
        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        self.needs_clear = false;
        Ok(())
    }

    fn present(&mut self) {
        if let Some(frame) = self.frame.take() {
            frame.present();
        }
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        self.frame = None;
        self.gpu.resize(width, height);
    }

    fn reset(&mut self) {
        log::debug!(
            "WgpuBackend: reset, dropping {} textures and {} programs",
            self.textures.len(),
            self.programs.len()
        );
        self.textures.clear();
        self.framebuffers.clear();
        self.programs.clear();
        self.pending.clear();
        self.samplers.clear();
        self.bound = None;
        self.frame = None;
    }
}

fn to_wgpu_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        TextureFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
        TextureFormat::Depth24PlusStencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
    }
}

fn to_wgpu_usage(usage: TextureUsage) -> wgpu::TextureUsages {
    let mut out = wgpu::TextureUsages::empty();
    if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
        out |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
    if usage.contains(TextureUsage::SAMPLED) {
        out |= wgpu::TextureUsages::TEXTURE_BINDING;
    }
    if usage.contains(TextureUsage::COPY_SRC) {
        out |= wgpu::TextureUsages::COPY_SRC;
    }
    if usage.contains(TextureUsage::COPY_DST) {
        out |= wgpu::TextureUsages::COPY_DST;
    }
    out
}

fn address_mode(wrap: WrapMode) -> wgpu::AddressMode {
    match wrap {
        WrapMode::Repeat => wgpu::AddressMode::Repeat,
        WrapMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        WrapMode::MirrorRepeat => wgpu::AddressMode::MirrorRepeat,
    }
}

fn create_sampler(
    device: &wgpu::Device,
    wrap_u: WrapMode,
    wrap_v: WrapMode,
    sampling: SamplingMode,
) -> wgpu::Sampler {
    let (filter, mipmap_filter) = match sampling {
        SamplingMode::Nearest => (wgpu::FilterMode::Nearest, wgpu::FilterMode::Nearest),
        SamplingMode::Bilinear => (wgpu::FilterMode::Linear, wgpu::FilterMode::Nearest),
        SamplingMode::Trilinear => (wgpu::FilterMode::Linear, wgpu::FilterMode::Linear),
    };

    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("Pass Sampler"),
        address_mode_u: address_mode(wrap_u),
        address_mode_v: address_mode(wrap_v),
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter,
        ..Default::default()
    })
}
