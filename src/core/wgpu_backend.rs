//! [`RenderBackend`] on top of wgpu, presenting to a winit window.
//!
//! The immediate-mode calls made by the compositor are recorded as draw
//! commands; `present` encodes them into a single render pass. Per-draw
//! uniforms live in one buffer addressed with dynamic offsets.

use std::collections::HashMap;
use std::sync::Arc;

use glam::{Mat4, Vec4};
use log::{debug, error, info, warn};
use wgpu::util::DeviceExt;
use winit::window::Window;

use crate::error::{CompositorError, Result};
use crate::math::Color;
use crate::traits::{
    uniform_block_slot, BufferId, ParamHandle, ProgramDesc, ProgramId, RenderBackend, TextureId,
    MATRIX_SLOT, PARAMS_SLOT, SAMPLER_SLOT, TEXTURE_MATRIX_SLOT,
};

const LAYER_TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const INITIAL_UNIFORM_SLOTS: u64 = 16;

/// Uniform block shared by every effect program
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct DrawUniforms {
    matrix: [[f32; 4]; 4],
    texture_matrix: [[f32; 4]; 4],
    params: [f32; 4],
}

impl Default for DrawUniforms {
    fn default() -> Self {
        Self {
            matrix: Mat4::IDENTITY.to_cols_array_2d(),
            texture_matrix: Mat4::IDENTITY.to_cols_array_2d(),
            params: [0.0; 4],
        }
    }
}

struct GpuTexture {
    texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
    width: u32,
    height: u32,
}

struct GpuProgram {
    pipeline: wgpu::RenderPipeline,
    uniforms: DrawUniforms,
    sampler_unit: u32,
}

struct DrawCommand {
    program: ProgramId,
    texture: TextureId,
    buffer: BufferId,
    vertex_count: u32,
    uniforms: DrawUniforms,
}

fn backend_error(context: &str, err: impl std::fmt::Debug) -> CompositorError {
    CompositorError::Backend(format!("{}: {:?}", context, err))
}

fn align_to(size: u64, alignment: u64) -> u64 {
    size.div_ceil(alignment) * alignment
}

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface: Option<wgpu::Surface<'static>>,
    config: wgpu::SurfaceConfiguration,
    shader: wgpu::ShaderModule,
    pipeline_layout: wgpu::PipelineLayout,
    uniform_layout: wgpu::BindGroupLayout,
    texture_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    uniform_stride: u64,
    uniform_slots: u64,
    textures: HashMap<TextureId, GpuTexture>,
    buffers: HashMap<BufferId, wgpu::Buffer>,
    programs: HashMap<ProgramId, GpuProgram>,
    units: HashMap<u32, TextureId>,
    current_program: Option<ProgramId>,
    clear_color: wgpu::Color,
    viewport: (u32, u32),
    draws: Vec<DrawCommand>,
    next_id: u32,
    released: bool,
}

impl WgpuBackend {
    /// Create a device and a surface bound to `window`. Call on the render thread.
    pub fn new(window: Arc<Window>) -> Result<Self> {
        let size = window.inner_size();
        let (width, height) = (size.width.max(1), size.height.max(1));

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        let surface = instance
            .create_surface(window)
            .map_err(|e| backend_error("failed to create surface", e))?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .map_err(|e| backend_error("failed to find appropriate adapter", e))?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Overlay Compositor Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: Default::default(),
            experimental_features: Default::default(),
            trace: Default::default(),
        }))
        .map_err(|e| backend_error("failed to create device", e))?;

        let surface_caps = surface.get_capabilities(&adapter);
        let format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .ok_or_else(|| CompositorError::Backend("surface reports no formats".into()))?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width,
            height,
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Overlay Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/overlay.wgsl").into()),
        });

        let uniform_size = std::mem::size_of::<DrawUniforms>() as u64;
        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Draw Uniform Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: wgpu::BufferSize::new(uniform_size),
                },
                count: None,
            }],
        });

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Layer Texture Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Overlay Pipeline Layout"),
            bind_group_layouts: &[&uniform_layout, &texture_layout],
            push_constant_ranges: &[],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Layer Texture Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let alignment = u64::from(device.limits().min_uniform_buffer_offset_alignment);
        let uniform_stride = align_to(uniform_size, alignment);
        let (uniform_buffer, uniform_bind_group) =
            Self::create_uniform_storage(&device, &uniform_layout, uniform_stride, INITIAL_UNIFORM_SLOTS);

        info!(
            "wgpu backend ready: {}x{} {:?} on {}",
            width,
            height,
            format,
            adapter.get_info().name
        );

        Ok(Self {
            device,
            queue,
            surface: Some(surface),
            config,
            shader,
            pipeline_layout,
            uniform_layout,
            texture_layout,
            sampler,
            uniform_buffer,
            uniform_bind_group,
            uniform_stride,
            uniform_slots: INITIAL_UNIFORM_SLOTS,
            textures: HashMap::new(),
            buffers: HashMap::new(),
            programs: HashMap::new(),
            units: HashMap::new(),
            current_program: None,
            clear_color: wgpu::Color::BLACK,
            viewport: (width, height),
            draws: Vec::new(),
            next_id: 1,
            released: false,
        })
    }

    fn create_uniform_storage(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        stride: u64,
        slots: u64,
    ) -> (wgpu::Buffer, wgpu::BindGroup) {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Draw Uniform Buffer"),
            size: stride * slots,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Draw Uniform Bind Group"),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(std::mem::size_of::<DrawUniforms>() as u64),
                }),
            }],
        });
        (buffer, bind_group)
    }

    fn create_layer_texture(&self, width: u32, height: u32) -> GpuTexture {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Layer Texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: LAYER_TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Layer Texture Bind Group"),
            layout: &self.texture_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });
        GpuTexture {
            texture,
            bind_group,
            width,
            height,
        }
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn current_program_mut(&mut self) -> Option<&mut GpuProgram> {
        let program = self.current_program?;
        self.programs.get_mut(&program)
    }

    /// Write every recorded draw's uniforms, growing the buffer when needed
    fn upload_draw_uniforms(&mut self) {
        let needed = self.draws.len() as u64;
        if needed > self.uniform_slots {
            let slots = needed.next_power_of_two();
            let (buffer, bind_group) =
                Self::create_uniform_storage(&self.device, &self.uniform_layout, self.uniform_stride, slots);
            self.uniform_buffer = buffer;
            self.uniform_bind_group = bind_group;
            self.uniform_slots = slots;
            debug!("draw uniform buffer grown to {} slots", slots);
        }

        let stride = self.uniform_stride as usize;
        let mut bytes = vec![0u8; stride * self.draws.len()];
        for (i, draw) in self.draws.iter().enumerate() {
            let block = bytemuck::bytes_of(&draw.uniforms);
            bytes[i * stride..i * stride + block.len()].copy_from_slice(block);
        }
        if !bytes.is_empty() {
            self.queue.write_buffer(&self.uniform_buffer, 0, &bytes);
        }
    }
}

impl RenderBackend for WgpuBackend {
    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureId> {
        if width == 0 || height == 0 {
            return Err(CompositorError::InvalidSize { width, height });
        }
        let id = TextureId(self.allocate_id());
        let texture = self.create_layer_texture(width, height);
        self.textures.insert(id, texture);
        Ok(id)
    }

    fn update_texture(&mut self, texture: TextureId, width: u32, height: u32, pixels: &[u8]) -> Result<()> {
        let expected = (width as usize) * (height as usize) * 4;
        if pixels.len() != expected {
            return Err(CompositorError::BufferSizeMismatch {
                expected,
                actual: pixels.len(),
            });
        }

        let needs_realloc = match self.textures.get(&texture) {
            Some(existing) => existing.width != width || existing.height != height,
            None => return Err(CompositorError::Backend(format!("unknown texture {}", texture.0))),
        };
        if needs_realloc {
            let replacement = self.create_layer_texture(width, height);
            self.textures.insert(texture, replacement);
        }

        let Some(target) = self.textures.get(&texture) else {
            return Err(CompositorError::Backend(format!("unknown texture {}", texture.0)));
        };
        self.queue.write_texture(
            target.texture.as_image_copy(),
            pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if let Some(removed) = self.textures.remove(&texture) {
            removed.texture.destroy();
        }
        self.units.retain(|_, bound| *bound != texture);
    }

    fn create_vertex_buffer(&mut self, vertices: &[f32]) -> Result<BufferId> {
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Quad Vertex Buffer"),
            contents: bytemuck::cast_slice(vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let id = BufferId(self.allocate_id());
        self.buffers.insert(id, buffer);
        Ok(id)
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        if let Some(removed) = self.buffers.remove(&buffer) {
            removed.destroy();
        }
    }

    fn create_program(&mut self, desc: &ProgramDesc) -> Result<ProgramId> {
        let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(desc.label),
            layout: Some(&self.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &self.shader,
                entry_point: Some("vs_main"),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: (2 * std::mem::size_of::<f32>()) as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &wgpu::vertex_attr_array![0 => Float32x2],
                }],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &self.shader,
                entry_point: Some(desc.fragment_entry),
                targets: &[Some(wgpu::ColorTargetState {
                    format: self.config.format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let id = ProgramId(self.allocate_id());
        self.programs.insert(
            id,
            GpuProgram {
                pipeline,
                uniforms: DrawUniforms::default(),
                sampler_unit: 0,
            },
        );
        debug!("created pipeline '{}' ({})", desc.label, desc.fragment_entry);
        Ok(id)
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
        if self.current_program == Some(program) {
            self.current_program = None;
        }
    }

    fn use_program(&mut self, program: ProgramId) {
        self.current_program = Some(program);
    }

    fn parameter_location(&self, program: ProgramId, name: &str) -> Option<ParamHandle> {
        if !self.programs.contains_key(&program) {
            return None;
        }
        uniform_block_slot(name)
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureId) {
        self.units.insert(unit, texture);
    }

    fn set_sampler(&mut self, handle: ParamHandle, unit: u32) {
        if handle == SAMPLER_SLOT {
            if let Some(program) = self.current_program_mut() {
                program.sampler_unit = unit;
            }
        }
    }

    fn set_matrix(&mut self, handle: ParamHandle, matrix: &Mat4) {
        if let Some(program) = self.current_program_mut() {
            match handle {
                MATRIX_SLOT => program.uniforms.matrix = matrix.to_cols_array_2d(),
                TEXTURE_MATRIX_SLOT => program.uniforms.texture_matrix = matrix.to_cols_array_2d(),
                _ => {}
            }
        }
    }

    fn set_vec4(&mut self, handle: ParamHandle, value: Vec4) {
        if handle == PARAMS_SLOT {
            if let Some(program) = self.current_program_mut() {
                program.uniforms.params = value.to_array();
            }
        }
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
    }

    fn clear(&mut self, color: Color) {
        self.clear_color = wgpu::Color {
            r: f64::from(color.r),
            g: f64::from(color.g),
            b: f64::from(color.b),
            a: f64::from(color.a),
        };
        self.draws.clear();
    }

    fn draw_triangle_strip(&mut self, buffer: BufferId, _position: ParamHandle, _components: u32, vertex_count: u32) {
        let Some(program_id) = self.current_program else {
            warn!("draw without a program");
            return;
        };
        let Some(program) = self.programs.get(&program_id) else {
            return;
        };
        let Some(&texture) = self.units.get(&program.sampler_unit) else {
            return;
        };
        self.draws.push(DrawCommand {
            program: program_id,
            texture,
            buffer,
            vertex_count,
            uniforms: program.uniforms,
        });
    }

    fn resize_surface(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(CompositorError::InvalidSize { width, height });
        }
        self.config.width = width;
        self.config.height = height;
        if let Some(surface) = self.surface.as_ref() {
            surface.configure(&self.device, &self.config);
        }
        self.viewport = (width, height);
        Ok(())
    }

    fn present(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.upload_draw_uniforms();

        let Some(surface) = self.surface.as_ref() else {
            return false;
        };
        let frame = match surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Timeout) | Err(wgpu::SurfaceError::Outdated) => {
                warn!("surface texture unavailable; reconfiguring and skipping frame");
                surface.configure(&self.device, &self.config);
                self.draws.clear();
                return true;
            }
            Err(err) => {
                error!("failed to acquire surface texture: {:?}", err);
                return false;
            }
        };

        let view = frame.texture.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Overlay Compose Encoder"),
            });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Overlay Compose Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.clear_color),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            let viewport_w = self.viewport.0.min(self.config.width) as f32;
            let viewport_h = self.viewport.1.min(self.config.height) as f32;
            render_pass.set_viewport(0.0, 0.0, viewport_w, viewport_h, 0.0, 1.0);

            for (i, draw) in self.draws.iter().enumerate() {
                let (Some(program), Some(texture), Some(buffer)) = (
                    self.programs.get(&draw.program),
                    self.textures.get(&draw.texture),
                    self.buffers.get(&draw.buffer),
                ) else {
                    continue;
                };
                let offset = (i as u64 * self.uniform_stride) as wgpu::DynamicOffset;
                render_pass.set_pipeline(&program.pipeline);
                render_pass.set_bind_group(0, &self.uniform_bind_group, &[offset]);
                render_pass.set_bind_group(1, &texture.bind_group, &[]);
                render_pass.set_vertex_buffer(0, buffer.slice(..));
                render_pass.draw(0..draw.vertex_count, 0..1);
            }
        }

        self.queue.submit(Some(encoder.finish()));
        frame.present();
        self.draws.clear();
        true
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.draws.clear();
        self.units.clear();
        self.programs.clear();
        for (_, buffer) in self.buffers.drain() {
            buffer.destroy();
        }
        for (_, texture) in self.textures.drain() {
            texture.texture.destroy();
        }
        self.surface = None;
        debug!("wgpu backend released");
    }
}
