//! wgpu backend.
//!
//! Layer programs share one bind group layout:
//!   0 frame uniform, 1 layer params, 2 layer texture, 3 sampler, 4 normal map.
//! The blend program has its own layout (source, destination, uniforms) and
//! fetches texels exactly with `textureLoad`.
//!
//! Uniform buffers are shared across draws, so every operation is encoded and
//! submitted on its own; queue ordering keeps `write_buffer` updates and
//! passes in sequence.

use std::borrow::Cow;
use std::sync::mpsc;

use image::RgbaImage;
use slotmap::SlotMap;
use wgpu::util::DeviceExt;

use super::{
    BlendUniforms, DrawCall, FrameUniforms, MeshId, ProgramDesc, ProgramId, RenderBackend,
    ResourceCounts, ShaderKind, TargetId, TextureId, TextureSource, MAX_PARAMS_BYTES,
};
use crate::error::RenderError;
use crate::geometry::{MeshData, Vertex};

const LAYER_COMMON_WGSL: &str = include_str!("../../shaders/wgsl/layer_common.wgsl");
const BASE_WGSL: &str = include_str!("../../shaders/wgsl/base.wgsl");
const DIRECTIONAL_LIGHT_WGSL: &str = include_str!("../../shaders/wgsl/directional_light.wgsl");
const SPOT_LIGHT_WGSL: &str = include_str!("../../shaders/wgsl/spot_light.wgsl");
const FRESNEL_WGSL: &str = include_str!("../../shaders/wgsl/fresnel.wgsl");
const NOISE_WGSL: &str = include_str!("../../shaders/wgsl/noise.wgsl");
const IMAGE_WGSL: &str = include_str!("../../shaders/wgsl/image.wgsl");
const COLOR_ADJUST_WGSL: &str = include_str!("../../shaders/wgsl/color_adjust.wgsl");
const BLEND_WGSL: &str = include_str!("../../shaders/wgsl/blend.wgsl");

const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Full WGSL module for a layer program: shared prelude plus the kind's body.
pub fn layer_shader_source(kind: ShaderKind) -> String {
    let body = match kind {
        ShaderKind::Base => BASE_WGSL,
        ShaderKind::DirectionalLight => DIRECTIONAL_LIGHT_WGSL,
        ShaderKind::SpotLight => SPOT_LIGHT_WGSL,
        ShaderKind::Fresnel => FRESNEL_WGSL,
        ShaderKind::Noise => NOISE_WGSL,
        ShaderKind::Image => IMAGE_WGSL,
        ShaderKind::ColorAdjust => COLOR_ADJUST_WGSL,
    };
    format!("{LAYER_COMMON_WGSL}\n{body}")
}

pub fn blend_shader_source() -> &'static str {
    BLEND_WGSL
}

struct GpuTarget {
    width: u32,
    height: u32,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    depth_view: wgpu::TextureView,
}

struct GpuProgram {
    kind: ShaderKind,
    pipeline: wgpu::RenderPipeline,
}

struct GpuMesh {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
}

struct GpuTexture {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

pub struct GpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    max_dimension: u32,
    layer_bind_group_layout: wgpu::BindGroupLayout,
    layer_pipeline_layout: wgpu::PipelineLayout,
    blend_bind_group_layout: wgpu::BindGroupLayout,
    blend_pipeline: wgpu::RenderPipeline,
    frame_buffer: wgpu::Buffer,
    params_buffer: wgpu::Buffer,
    blend_buffer: wgpu::Buffer,
    sampler: wgpu::Sampler,
    white_texture: GpuTexture,
    flat_normal_texture: GpuTexture,
    targets: SlotMap<TargetId, GpuTarget>,
    programs: SlotMap<ProgramId, GpuProgram>,
    meshes: SlotMap<MeshId, GpuMesh>,
    textures: SlotMap<TextureId, GpuTexture>,
}

impl GpuBackend {
    pub async fn new() -> Result<Self, RenderError> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or(RenderError::AdapterUnavailable)?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("matcap-device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|err| RenderError::Device(err.to_string()))?;

        let info = adapter.get_info();
        tracing::info!(adapter = %info.name, backend = ?info.backend, "wgpu device ready");
        let max_dimension = device.limits().max_texture_dimension_2d;

        let uniform_entry = |binding: u32, visibility: wgpu::ShaderStages| wgpu::BindGroupLayoutEntry {
            binding,
            visibility,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let texture_entry = |binding: u32, filterable: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };

        let layer_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("matcap-layer-bgl"),
                entries: &[
                    uniform_entry(0, wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT),
                    uniform_entry(1, wgpu::ShaderStages::FRAGMENT),
                    texture_entry(2, true),
                    wgpu::BindGroupLayoutEntry {
                        binding: 3,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                    texture_entry(4, true),
                ],
            });
        let layer_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("matcap-layer-pipeline-layout"),
            bind_group_layouts: &[&layer_bind_group_layout],
            push_constant_ranges: &[],
        });

        let blend_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("matcap-blend-bgl"),
                entries: &[
                    texture_entry(0, false),
                    texture_entry(1, false),
                    uniform_entry(2, wgpu::ShaderStages::FRAGMENT),
                ],
            });
        let blend_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("matcap-blend-pipeline-layout"),
            bind_group_layouts: &[&blend_bind_group_layout],
            push_constant_ranges: &[],
        });
        let blend_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("matcap-blend-shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(BLEND_WGSL)),
        });
        let blend_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("matcap-blend-pipeline"),
            layout: Some(&blend_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &blend_shader,
                entry_point: "vs_main",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                buffers: &[], // full-screen triangle from vertex_index
            },
            fragment: Some(wgpu::FragmentState {
                module: &blend_shader,
                entry_point: "fs_main",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: COLOR_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });

        let frame_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("matcap-frame-uniforms"),
            contents: bytemuck::bytes_of(&FrameUniforms::default()),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("matcap-layer-params"),
            size: MAX_PARAMS_BYTES,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let blend_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("matcap-blend-uniforms"),
            size: std::mem::size_of::<BlendUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("matcap-layer-sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let white_texture = upload_texture(&device, &queue, "matcap-white", 1, 1, &[255, 255, 255, 255]);
        let flat_normal_texture =
            upload_texture(&device, &queue, "matcap-flat-normal", 1, 1, &[128, 128, 255, 255]);

        Ok(Self {
            device,
            queue,
            max_dimension,
            layer_bind_group_layout,
            layer_pipeline_layout,
            blend_bind_group_layout,
            blend_pipeline,
            frame_buffer,
            params_buffer,
            blend_buffer,
            sampler,
            white_texture,
            flat_normal_texture,
            targets: SlotMap::with_key(),
            programs: SlotMap::with_key(),
            meshes: SlotMap::with_key(),
            textures: SlotMap::with_key(),
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    fn build_layer_pipeline(&self, desc: &ProgramDesc) -> wgpu::RenderPipeline {
        let source = layer_shader_source(desc.kind);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(desc.label),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(source)),
        });

        let vertex_layout = [wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &wgpu::vertex_attr_array![
                0 => Float32x3,
                1 => Float32x3,
                2 => Float32x2,
                3 => Float32x3
            ],
        }];
        let fullscreen = desc.kind.is_fullscreen();
        let buffers: &[wgpu::VertexBufferLayout] = if fullscreen { &[] } else { &vertex_layout };

        self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(desc.label),
            layout: Some(&self.layer_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: if fullscreen { "vs_fullscreen" } else { "vs_main" },
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                buffers,
            },
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: "fs_main",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: COLOR_FORMAT,
                    blend: None, // layers are isolated; the blend program composites
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: if fullscreen {
                None
            } else {
                Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: true,
                    depth_compare: wgpu::CompareFunction::Less,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                })
            },
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        })
    }

    fn texture_view(&self, source: TextureSource) -> Result<&wgpu::TextureView, RenderError> {
        match source {
            TextureSource::None => Ok(&self.white_texture.view),
            TextureSource::Texture(id) => self
                .textures
                .get(id)
                .map(|t| &t.view)
                .ok_or(RenderError::UnknownHandle("texture")),
            TextureSource::Target(id) => self
                .targets
                .get(id)
                .map(|t| &t.view)
                .ok_or(RenderError::UnknownHandle("target")),
        }
    }

    fn target(&self, id: TargetId) -> Result<&GpuTarget, RenderError> {
        self.targets.get(id).ok_or(RenderError::UnknownHandle("target"))
    }
}

impl RenderBackend for GpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    fn create_target(&mut self, label: &str, width: u32, height: u32) -> Result<TargetId, RenderError> {
        if width == 0 || height == 0 {
            return Err(RenderError::DegenerateSize { width, height });
        }
        if width > self.max_dimension || height > self.max_dimension {
            return Err(RenderError::allocation(
                "render target",
                width,
                height,
                format!("exceeds max_texture_dimension_2d {}", self.max_dimension),
            ));
        }

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: COLOR_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let depth = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&format!("{label}-depth")),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(RenderError::allocation("render target", width, height, error.to_string()));
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());
        let id = self.targets.insert(GpuTarget {
            width,
            height,
            texture,
            view,
            depth_view,
        });
        self.clear_target(id)?;
        Ok(id)
    }

    fn release_target(&mut self, target: TargetId) {
        if let Some(target) = self.targets.remove(target) {
            target.texture.destroy();
        }
    }

    fn target_size(&self, target: TargetId) -> Option<(u32, u32)> {
        self.targets.get(target).map(|t| (t.width, t.height))
    }

    fn create_program(&mut self, desc: &ProgramDesc) -> Result<ProgramId, RenderError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self.build_layer_pipeline(desc);
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(RenderError::ShaderCompile {
                label: desc.label.to_owned(),
                message: error.to_string(),
            });
        }
        tracing::debug!(program = desc.label, "compiled layer program");
        Ok(self.programs.insert(GpuProgram {
            kind: desc.kind,
            pipeline,
        }))
    }

    fn release_program(&mut self, program: ProgramId) {
        self.programs.remove(program);
    }

    fn create_mesh(&mut self, label: &str, mesh: &MeshData) -> Result<MeshId, RenderError> {
        if mesh.vertices.is_empty() || mesh.indices.is_empty() {
            return Err(RenderError::allocation("mesh", 0, 0, "empty mesh"));
        }
        let vertex_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label}-vertices")),
            contents: bytemuck::cast_slice(&mesh.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label}-indices")),
            contents: bytemuck::cast_slice(&mesh.indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        Ok(self.meshes.insert(GpuMesh {
            vertex_buffer,
            index_buffer,
            index_count: mesh.indices.len() as u32,
        }))
    }

    fn release_mesh(&mut self, mesh: MeshId) {
        if let Some(mesh) = self.meshes.remove(mesh) {
            mesh.vertex_buffer.destroy();
            mesh.index_buffer.destroy();
        }
    }

    fn create_texture(
        &mut self,
        label: &str,
        width: u32,
        height: u32,
        rgba: &[u8],
    ) -> Result<TextureId, RenderError> {
        if width == 0 || height == 0 {
            return Err(RenderError::DegenerateSize { width, height });
        }
        if width > self.max_dimension || height > self.max_dimension {
            return Err(RenderError::allocation(
                "texture",
                width,
                height,
                format!("exceeds max_texture_dimension_2d {}", self.max_dimension),
            ));
        }
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            return Err(RenderError::SizeMismatch(format!(
                "texture data is {} bytes, expected {expected}",
                rgba.len()
            )));
        }
        let texture = upload_texture(&self.device, &self.queue, label, width, height, rgba);
        Ok(self.textures.insert(texture))
    }

    fn release_texture(&mut self, texture: TextureId) {
        self.textures.remove(texture);
    }

    fn clear_target(&mut self, target: TargetId) -> Result<(), RenderError> {
        let view = &self.target(target)?.view;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("matcap-clear-encoder"),
            });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("matcap-clear-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn copy_target(&mut self, src: TargetId, dst: TargetId) -> Result<(), RenderError> {
        if src == dst {
            return Ok(());
        }
        let source = self.target(src)?;
        let dest = self.target(dst)?;
        if (source.width, source.height) != (dest.width, dest.height) {
            return Err(RenderError::SizeMismatch(format!(
                "copy {}x{} into {}x{}",
                source.width, source.height, dest.width, dest.height
            )));
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("matcap-copy-encoder"),
            });
        encoder.copy_texture_to_texture(
            source.texture.as_image_copy(),
            dest.texture.as_image_copy(),
            wgpu::Extent3d {
                width: source.width,
                height: source.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall) -> Result<(), RenderError> {
        if call.texture == TextureSource::Target(call.target) {
            return Err(RenderError::SizeMismatch(
                "draw cannot sample its own target".to_owned(),
            ));
        }
        let program = self
            .programs
            .get(call.program)
            .ok_or(RenderError::UnknownHandle("program"))?;
        let target = self.target(call.target)?;
        let layer_view = self.texture_view(call.texture)?;
        let normal_view = match call.normal_map {
            Some(id) => self
                .textures
                .get(id)
                .map(|t| &t.view)
                .ok_or(RenderError::UnknownHandle("texture"))?,
            None => &self.flat_normal_texture.view,
        };
        let mesh = if program.kind.is_fullscreen() {
            None
        } else {
            let id = call.mesh.ok_or(RenderError::UnknownHandle("mesh"))?;
            Some(self.meshes.get(id).ok_or(RenderError::UnknownHandle("mesh"))?)
        };

        self.queue
            .write_buffer(&self.frame_buffer, 0, bytemuck::bytes_of(&call.frame));
        self.queue
            .write_buffer(&self.params_buffer, 0, call.params.as_bytes());

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("matcap-layer-bg"),
            layout: &self.layer_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.frame_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(layer_view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::TextureView(normal_view),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(program.kind.label()),
            });
        {
            let depth_attachment = mesh.map(|_| wgpu::RenderPassDepthStencilAttachment {
                view: &target.depth_view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Discard,
                }),
                stencil_ops: None,
            });
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("matcap-layer-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: depth_attachment,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(&program.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            match mesh {
                Some(mesh) => {
                    pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
                    pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                    pass.draw_indexed(0..mesh.index_count, 0, 0..1);
                }
                None => pass.draw(0..3, 0..1), // full-screen triangle
            }
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn composite(
        &mut self,
        src: TargetId,
        dst: TargetId,
        out: TargetId,
        uniforms: BlendUniforms,
    ) -> Result<(), RenderError> {
        if out == src || out == dst {
            return Err(RenderError::SizeMismatch(
                "composite output must differ from its inputs".to_owned(),
            ));
        }
        let source = self.target(src)?;
        let dest = self.target(dst)?;
        let output = self.target(out)?;

        self.queue
            .write_buffer(&self.blend_buffer, 0, bytemuck::bytes_of(&uniforms));
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("matcap-blend-bg"),
            layout: &self.blend_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&source.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&dest.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.blend_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("matcap-blend-encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("matcap-blend-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &output.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.blend_pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn read_target(&mut self, target: TargetId) -> Result<RgbaImage, RenderError> {
        let target = self.target(target)?;
        let (width, height) = (target.width, target.height);
        let unpadded_bytes_per_row = width
            .checked_mul(4)
            .ok_or_else(|| RenderError::Readback("row size overflow".to_owned()))?;
        let padded_bytes_per_row = align_to(unpadded_bytes_per_row, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);

        let readback_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("matcap-readback-buffer"),
            size: u64::from(padded_bytes_per_row) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("matcap-readback-encoder"),
            });
        encoder.copy_texture_to_buffer(
            target.texture.as_image_copy(),
            wgpu::ImageCopyBuffer {
                buffer: &readback_buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let buffer_slice = readback_buffer.slice(..);
        let (sender, receiver) = mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);

        receiver
            .recv()
            .map_err(|_| RenderError::Readback("failed receiving GPU map callback".to_owned()))?
            .map_err(|err| RenderError::Readback(err.to_string()))?;

        let mapped = buffer_slice.get_mapped_range();
        let mut pixels = vec![0_u8; (unpadded_bytes_per_row * height) as usize];
        for (row_index, chunk) in mapped
            .chunks(padded_bytes_per_row as usize)
            .take(height as usize)
            .enumerate()
        {
            let dst_start = row_index * unpadded_bytes_per_row as usize;
            let dst_end = dst_start + unpadded_bytes_per_row as usize;
            pixels[dst_start..dst_end].copy_from_slice(&chunk[..unpadded_bytes_per_row as usize]);
        }
        drop(mapped);
        readback_buffer.unmap();

        RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| RenderError::Readback("pixel buffer size mismatch".to_owned()))
    }

    fn resource_counts(&self) -> ResourceCounts {
        ResourceCounts {
            targets: self.targets.len(),
            programs: self.programs.len(),
            meshes: self.meshes.len(),
            textures: self.textures.len(),
        }
    }
}

fn upload_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    width: u32,
    height: u32,
    rgba: &[u8],
) -> GpuTexture {
    let size = wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: COLOR_FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    queue.write_texture(
        wgpu::ImageCopyTexture {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        rgba,
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(4 * width),
            rows_per_image: Some(height),
        },
        size,
    );
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    GpuTexture {
        _texture: texture,
        view,
    }
}

fn align_to(value: u32, alignment: u32) -> u32 {
    let mask = alignment - 1;
    (value + mask) & !mask
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_sources_include_prelude_and_entry_points() {
        for kind in [
            ShaderKind::Base,
            ShaderKind::DirectionalLight,
            ShaderKind::SpotLight,
            ShaderKind::Fresnel,
            ShaderKind::Noise,
            ShaderKind::Image,
            ShaderKind::ColorAdjust,
        ] {
            let source = layer_shader_source(kind);
            assert!(source.contains("struct FrameUniforms"), "{kind:?}");
            assert!(source.contains("fn fs_main"), "{kind:?}");
        }
        assert!(layer_shader_source(ShaderKind::ColorAdjust).contains("fn vs_fullscreen"));
    }

    #[test]
    fn wgsl_params_structs_match_rust_names() {
        assert!(BASE_WGSL.contains("struct BaseUniforms"));
        assert!(DIRECTIONAL_LIGHT_WGSL.contains("struct LightUniforms"));
        assert!(SPOT_LIGHT_WGSL.contains("struct SpotUniforms"));
        assert!(FRESNEL_WGSL.contains("struct FresnelUniforms"));
        assert!(NOISE_WGSL.contains("struct NoiseUniforms"));
        assert!(IMAGE_WGSL.contains("struct ImageUniforms"));
        assert!(COLOR_ADJUST_WGSL.contains("struct AdjustUniforms"));
        assert!(blend_shader_source().contains("struct BlendUniforms"));
    }

    #[test]
    fn blend_shader_covers_every_mode_id() {
        for id in 1..12 {
            assert!(
                BLEND_WGSL.contains(&format!("case {id}u")),
                "blend.wgsl missing mode {id}"
            );
        }
    }

    #[test]
    fn align_to_rounds_up_to_copy_alignment() {
        assert_eq!(align_to(4, 256), 256);
        assert_eq!(align_to(256, 256), 256);
        assert_eq!(align_to(1028, 256), 1280);
    }
}
