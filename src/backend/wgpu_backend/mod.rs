//! wgpu backend implementation
//!
//! Renders off-screen. Commands recorded between `begin_*_pass` and
//! `end_*_pass` are buffered and replayed into a lazily created command
//! encoder, which is submitted on [`GraphicsBackend::submit`] or before any
//! readback.

use crate::backend::handle::{kind, ResourceTable};
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::{BackendType, EngineConfig, PowerPreference};
use parking_lot::Mutex;
use std::sync::Arc;
use wgpu::util::DeviceExt;

mod convert;

/// Buffered render pass command
#[derive(Clone)]
enum RenderCommand {
    SetPipeline(RenderPipelineHandle),
    SetBindGroup { index: u32, bind_group: BindGroupHandle },
    SetVertexBuffer { slot: u32, buffer: BufferHandle, offset: u64 },
    SetIndexBuffer { buffer: BufferHandle, offset: u64, format: IndexFormat },
    SetViewport { x: f32, y: f32, width: f32, height: f32, min_depth: f32, max_depth: f32 },
    Draw { vertices: std::ops::Range<u32>, instances: std::ops::Range<u32> },
    DrawIndexed { indices: std::ops::Range<u32>, base_vertex: i32, instances: std::ops::Range<u32> },
}

/// Buffered compute pass command
#[derive(Clone)]
enum ComputeCommand {
    SetPipeline(ComputePipelineHandle),
    SetBindGroup { index: u32, bind_group: BindGroupHandle },
    Dispatch { x: u32, y: u32, z: u32 },
}

/// Pending render pass with buffered commands
struct PendingRenderPass {
    descriptor: RenderPassDescriptor,
    commands: Vec<RenderCommand>,
}

/// Pending compute pass with buffered commands
struct PendingComputePass {
    label: Option<String>,
    commands: Vec<ComputeCommand>,
}

struct WgpuTexture {
    texture: wgpu::Texture,
    format: TextureFormat,
}

/// wgpu backend implementation
pub struct WgpuBackend {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    backend_type: BackendType,
    errors: Arc<Mutex<Vec<String>>>,

    // Resource storage
    buffers: ResourceTable<kind::Buffer, wgpu::Buffer>,
    textures: ResourceTable<kind::Texture, WgpuTexture>,
    texture_views: ResourceTable<kind::TextureView, wgpu::TextureView>,
    samplers: ResourceTable<kind::Sampler, wgpu::Sampler>,
    bind_group_layouts: ResourceTable<kind::BindGroupLayout, wgpu::BindGroupLayout>,
    bind_groups: ResourceTable<kind::BindGroup, wgpu::BindGroup>,
    render_pipelines: ResourceTable<kind::RenderPipeline, wgpu::RenderPipeline>,
    compute_pipelines: ResourceTable<kind::ComputePipeline, wgpu::ComputePipeline>,

    // Command encoding
    encoder: Option<wgpu::CommandEncoder>,

    // Pending passes - commands are buffered here and executed on end_*_pass
    pending_render_pass: Option<PendingRenderPass>,
    pending_compute_pass: Option<PendingComputePass>,
}

impl WgpuBackend {
    fn backends_for(backend: BackendType) -> wgpu::Backends {
        match backend {
            BackendType::OpenGl => wgpu::Backends::GL,
            BackendType::D3D12 => wgpu::Backends::DX12,
            BackendType::Metal => wgpu::Backends::METAL,
            BackendType::Vulkan => wgpu::Backends::VULKAN,
        }
    }

    fn backend_type_of(backend: wgpu::Backend) -> BackendType {
        match backend {
            wgpu::Backend::Dx12 => BackendType::D3D12,
            wgpu::Backend::Metal => BackendType::Metal,
            wgpu::Backend::Gl => BackendType::OpenGl,
            _ => BackendType::Vulkan,
        }
    }
}

impl WgpuBackend {
    /// Create an off-screen device for the backend named in `config`
    pub fn new(config: &EngineConfig) -> BackendResult<Self> {
        pollster::block_on(Self::new_async(config))
    }

    pub async fn new_async(config: &EngineConfig) -> BackendResult<Self> {
        // WGPU_BACKEND wins over the configured backend
        let backends = wgpu::util::backend_bits_from_env()
            .unwrap_or_else(|| Self::backends_for(config.backend));

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: match config.power_preference {
                    PowerPreference::LowPower => wgpu::PowerPreference::LowPower,
                    PowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
                },
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| {
                BackendError::InitializationFailed(format!("No {:?} adapter found", backends))
            })?;

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?} backend)",
            adapter_info.name,
            adapter_info.backend
        );

        // Block-compressed uploads, and Rgba32Float bound as a filterable texture_2d<f32>
        let optional = wgpu::Features::TEXTURE_COMPRESSION_BC | wgpu::Features::FLOAT32_FILTERABLE;
        let required_features = adapter.features() & optional;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Graphics Device"),
                    required_features,
                    required_limits: adapter.limits(),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;

        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        device.on_uncaptured_error(Box::new(move |error| {
            sink.lock().push(error.to_string());
        }));

        Ok(Self {
            instance,
            backend_type: Self::backend_type_of(adapter_info.backend),
            adapter,
            device,
            queue,
            errors,
            buffers: ResourceTable::new(),
            textures: ResourceTable::new(),
            texture_views: ResourceTable::new(),
            samplers: ResourceTable::new(),
            bind_group_layouts: ResourceTable::new(),
            bind_groups: ResourceTable::new(),
            render_pipelines: ResourceTable::new(),
            compute_pipelines: ResourceTable::new(),
            encoder: None,
            pending_render_pass: None,
            pending_compute_pass: None,
        })
    }

    /// Get reference to the wgpu device
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Get reference to the wgpu queue
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn adapter_info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }

    fn take_encoder(&mut self) -> wgpu::CommandEncoder {
        self.encoder.take().unwrap_or_else(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Frame Encoder"),
                })
        })
    }

    fn flush(&mut self) {
        if self.pending_render_pass.is_some() {
            self.end_render_pass();
        }
        if self.pending_compute_pass.is_some() {
            self.end_compute_pass();
        }
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
    }

    fn check_error_scope(&self, what: &str) -> BackendResult<()> {
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => Err(BackendError::PipelineCreationFailed(format!("{}: {}", what, error))),
            None => Ok(()),
        }
    }

    fn create_module(&self, label: Option<&str>, source: &str) -> wgpu::ShaderModule {
        self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label,
            source: wgpu::ShaderSource::Wgsl(source.into()),
        })
    }
}

/// Copy `size` bytes from the GPU into a mapped staging buffer and return them
fn read_back(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    size: u64,
    record: impl FnOnce(&mut wgpu::CommandEncoder, &wgpu::Buffer),
) -> BackendResult<Vec<u8>> {
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Readback Staging"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Readback Encoder"),
    });
    record(&mut encoder, &staging);
    queue.submit(std::iter::once(encoder.finish()));

    let (sender, receiver) = std::sync::mpsc::channel();
    let slice = staging.slice(..);
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    device.poll(wgpu::Maintain::Wait);

    receiver
        .recv()
        .map_err(|e| BackendError::ReadbackFailed(e.to_string()))?
        .map_err(|e| BackendError::ReadbackFailed(e.to_string()))?;

    let data = slice.get_mapped_range().to_vec();
    staging.unmap();
    Ok(data)
}

impl GraphicsBackend for WgpuBackend {
    fn name(&self) -> &str {
        "wgpu Backend"
    }

    fn backend_type(&self) -> BackendType {
        self.backend_type
    }

    fn supports_format(&self, format: TextureFormat) -> bool {
        if format.is_compressed() {
            self.device
                .features()
                .contains(wgpu::Features::TEXTURE_COMPRESSION_BC)
        } else {
            true
        }
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: desc.label.as_deref(),
            size: desc.size,
            usage: convert::buffer_usages(desc.usage),
            mapped_at_creation: desc.mapped_at_creation,
        });

        Ok(self.buffers.insert(buffer))
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: desc.label.as_deref(),
            contents: data,
            usage: convert::buffer_usages(desc.usage),
        });

        Ok(self.buffers.insert(buffer))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        if let Some(buf) = self.buffers.get(buffer) {
            self.queue.write_buffer(buf, offset, data);
        }
    }

    fn read_buffer(&mut self, buffer: BufferHandle) -> BackendResult<Vec<u8>> {
        self.flush();
        let source = self
            .buffers
            .get(buffer)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", buffer)))?;
        let size = source.size();
        read_back(&self.device, &self.queue, size, |encoder, staging| {
            encoder.copy_buffer_to_buffer(source, 0, staging, 0, size);
        })
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.format.is_compressed() && !self.supports_format(desc.format) {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?} is not supported by this adapter",
                desc.format
            )));
        }

        let view_formats: Vec<wgpu::TextureFormat> = desc
            .view_formats
            .iter()
            .map(|f| convert::texture_format(*f))
            .collect();

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label.as_deref(),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: desc.layer_count(),
            },
            mip_level_count: desc.mip_levels,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: convert::texture_format(desc.format),
            usage: convert::texture_usages(desc.usage),
            view_formats: &view_formats,
        });

        Ok(self.textures.insert(WgpuTexture {
            texture,
            format: desc.format,
        }))
    }

    fn create_texture_view(
        &mut self,
        texture: TextureHandle,
        desc: &TextureViewDescriptor,
    ) -> BackendResult<TextureViewHandle> {
        let tex = self
            .textures
            .get(texture)
            .ok_or_else(|| BackendError::TextureCreationFailed("Texture not found".into()))?;

        let view = tex.texture.create_view(&wgpu::TextureViewDescriptor {
            label: desc.label.as_deref(),
            format: desc.format.map(convert::texture_format),
            dimension: Some(match desc.dimension {
                TextureDimension::D2 => wgpu::TextureViewDimension::D2,
                TextureDimension::Cube => wgpu::TextureViewDimension::Cube,
            }),
            aspect: if tex.format.is_depth() {
                wgpu::TextureAspect::DepthOnly
            } else {
                wgpu::TextureAspect::All
            },
            base_mip_level: desc.base_mip_level,
            mip_level_count: desc.mip_level_count,
            base_array_layer: 0,
            array_layer_count: None,
        });

        Ok(self.texture_views.insert(view))
    }

    fn write_texture(
        &mut self,
        texture: TextureHandle,
        mip_level: u32,
        layer: u32,
        data: &[u8],
        width: u32,
        height: u32,
    ) {
        let Some(tex) = self.textures.get(texture) else {
            return;
        };

        // Block-compressed copies cover whole blocks
        let (copy_width, copy_height) = if tex.format.is_compressed() {
            (width.div_ceil(4) * 4, height.div_ceil(4) * 4)
        } else {
            (width, height)
        };

        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &tex.texture,
                mip_level,
                origin: wgpu::Origin3d { x: 0, y: 0, z: layer },
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(tex.format.row_pitch(width)),
                rows_per_image: Some(tex.format.row_count(height)),
            },
            wgpu::Extent3d {
                width: copy_width,
                height: copy_height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn read_texture(&mut self, texture: TextureHandle, mip_level: u32) -> BackendResult<Vec<u8>> {
        self.flush();
        let tex = self
            .textures
            .get(texture)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", texture)))?;
        if tex.format.is_compressed() {
            return Err(BackendError::ReadbackFailed(format!(
                "readback of {:?} is not supported",
                tex.format
            )));
        }

        let width = (tex.texture.width() >> mip_level).max(1);
        let height = (tex.texture.height() >> mip_level).max(1);
        let row = tex.format.row_pitch(width);
        let padded_row = row.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let aspect = if tex.format.is_depth() {
            wgpu::TextureAspect::DepthOnly
        } else {
            wgpu::TextureAspect::All
        };

        let padded = read_back(
            &self.device,
            &self.queue,
            padded_row as u64 * height as u64,
            |encoder, staging| {
                encoder.copy_texture_to_buffer(
                    wgpu::ImageCopyTexture {
                        texture: &tex.texture,
                        mip_level,
                        origin: wgpu::Origin3d::ZERO,
                        aspect,
                    },
                    wgpu::ImageCopyBuffer {
                        buffer: staging,
                        layout: wgpu::ImageDataLayout {
                            offset: 0,
                            bytes_per_row: Some(padded_row),
                            rows_per_image: Some(height),
                        },
                    },
                    wgpu::Extent3d {
                        width,
                        height,
                        depth_or_array_layers: 1,
                    },
                );
            },
        )?;

        let mut pixels = Vec::with_capacity((row * height) as usize);
        for chunk in padded.chunks(padded_row as usize).take(height as usize) {
            pixels.extend_from_slice(&chunk[..row as usize]);
        }
        Ok(pixels)
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: desc.label.as_deref(),
            address_mode_u: convert::address_mode(desc.address_mode_u),
            address_mode_v: convert::address_mode(desc.address_mode_v),
            address_mode_w: convert::address_mode(desc.address_mode_w),
            mag_filter: convert::filter_mode(desc.mag_filter),
            min_filter: convert::filter_mode(desc.min_filter),
            mipmap_filter: convert::filter_mode(desc.mipmap_filter),
            lod_min_clamp: 0.0,
            lod_max_clamp: 32.0,
            compare: None,
            anisotropy_clamp: desc.anisotropy_clamp.clamp(1, 16),
            border_color: None,
        });

        Ok(self.samplers.insert(sampler))
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let vertex_module = self.create_module(desc.label.as_deref(), &desc.vertex_shader);
        let fragment_module = desc
            .fragment_shader
            .as_ref()
            .map(|source| self.create_module(desc.label.as_deref(), source));

        // Build vertex buffer layouts with proper lifetimes
        let vertex_attrs: Vec<Vec<wgpu::VertexAttribute>> = desc
            .vertex_layouts
            .iter()
            .map(|layout| {
                layout
                    .attributes
                    .iter()
                    .map(|a| wgpu::VertexAttribute {
                        format: convert::vertex_format(a.format),
                        offset: a.offset,
                        shader_location: a.location,
                    })
                    .collect()
            })
            .collect();

        let vertex_buffers: Vec<wgpu::VertexBufferLayout> = desc
            .vertex_layouts
            .iter()
            .zip(vertex_attrs.iter())
            .map(|(layout, attrs)| wgpu::VertexBufferLayout {
                array_stride: layout.array_stride,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: attrs,
            })
            .collect();

        let color_targets: Vec<Option<wgpu::ColorTargetState>> = desc
            .color_targets
            .iter()
            .map(|target| {
                Some(wgpu::ColorTargetState {
                    format: convert::texture_format(target.format),
                    blend: target.blend.as_ref().map(convert::blend_state),
                    write_mask: wgpu::ColorWrites::from_bits_truncate(target.write_mask.bits()),
                })
            })
            .collect();

        let primitive = wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: convert::cull_mode(desc.cull_mode),
            ..Default::default()
        };

        let depth_stencil = desc.depth_stencil.as_ref().map(|ds| wgpu::DepthStencilState {
            format: convert::texture_format(ds.format),
            depth_write_enabled: ds.depth_write_enabled,
            depth_compare: convert::compare_function(ds.depth_compare),
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState {
                constant: ds.depth_bias,
                slope_scale: ds.depth_bias_slope_scale,
                clamp: 0.0,
            },
        });

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: desc.label.as_deref(),
                // Bind group layouts are derived from the shaders
                layout: None,
                vertex: wgpu::VertexState {
                    module: &vertex_module,
                    entry_point: &desc.vertex_entry,
                    buffers: &vertex_buffers,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: fragment_module.as_ref().map(|module| wgpu::FragmentState {
                    module,
                    entry_point: &desc.fragment_entry,
                    targets: &color_targets,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive,
                depth_stencil,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            });

        self.check_error_scope("render pipeline")?;
        Ok(self.render_pipelines.insert(pipeline))
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<ComputePipelineHandle> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = self.create_module(desc.label.as_deref(), &desc.shader);
        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: desc.label.as_deref(),
                layout: None,
                module: &shader,
                entry_point: &desc.entry_point,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            });

        self.check_error_scope("compute pipeline")?;
        Ok(self.compute_pipelines.insert(pipeline))
    }

    fn render_pipeline_bind_group_layout(
        &mut self,
        pipeline: RenderPipelineHandle,
        group: u32,
    ) -> BackendResult<BindGroupLayoutHandle> {
        let layout = self
            .render_pipelines
            .get(pipeline)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", pipeline)))?
            .get_bind_group_layout(group);
        Ok(self.bind_group_layouts.insert(layout))
    }

    fn compute_pipeline_bind_group_layout(
        &mut self,
        pipeline: ComputePipelineHandle,
        group: u32,
    ) -> BackendResult<BindGroupLayoutHandle> {
        let layout = self
            .compute_pipelines
            .get(pipeline)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", pipeline)))?
            .get_bind_group_layout(group);
        Ok(self.bind_group_layouts.insert(layout))
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        let layout_ref = self
            .bind_group_layouts
            .get(layout)
            .ok_or_else(|| BackendError::BindGroupCreationFailed("Layout not found".into()))?;

        let wgpu_entries: Vec<wgpu::BindGroupEntry> = entries
            .iter()
            .filter_map(|(binding, entry)| {
                let resource = match entry {
                    BindGroupEntry::Buffer { buffer, offset, size } => {
                        let buf = self.buffers.get(*buffer)?;
                        wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer: buf,
                            offset: *offset,
                            size: size.and_then(std::num::NonZeroU64::new),
                        })
                    }
                    BindGroupEntry::Texture(view) | BindGroupEntry::StorageTexture(view) => {
                        wgpu::BindingResource::TextureView(self.texture_views.get(*view)?)
                    }
                    BindGroupEntry::Sampler(sampler) => {
                        wgpu::BindingResource::Sampler(self.samplers.get(*sampler)?)
                    }
                };

                Some(wgpu::BindGroupEntry {
                    binding: *binding,
                    resource,
                })
            })
            .collect();

        if wgpu_entries.len() != entries.len() {
            return Err(BackendError::BindGroupCreationFailed(
                "bind group references a released resource".into(),
            ));
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: layout_ref,
            entries: &wgpu_entries,
        });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(BackendError::BindGroupCreationFailed(error.to_string()));
        }

        Ok(self.bind_groups.insert(bind_group))
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        // Store the descriptor for later execution
        self.pending_render_pass = Some(PendingRenderPass {
            descriptor: desc.clone(),
            commands: Vec::new(),
        });
    }

    fn end_render_pass(&mut self) {
        let Some(pending) = self.pending_render_pass.take() else {
            return;
        };

        let mut encoder = self.take_encoder();

        {
            let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = pending
                .descriptor
                .color_attachments
                .iter()
                .filter_map(|att| {
                    let view = self.texture_views.get(att.view)?;
                    Some(Some(wgpu::RenderPassColorAttachment {
                        view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: convert::load_op(&att.load_op, |c| wgpu::Color {
                                r: c[0] as f64,
                                g: c[1] as f64,
                                b: c[2] as f64,
                                a: c[3] as f64,
                            }),
                            store: convert::store_op(att.store_op),
                        },
                    }))
                })
                .collect();

            let depth_attachment = pending
                .descriptor
                .depth_stencil_attachment
                .as_ref()
                .and_then(|att| {
                    let view = self.texture_views.get(att.view)?;
                    Some(wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(wgpu::Operations {
                            load: convert::load_op(&att.depth_load_op, |_| att.depth_clear_value),
                            store: convert::store_op(att.depth_store_op),
                        }),
                        stencil_ops: None,
                    })
                });

            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: pending.descriptor.label.as_deref(),
                color_attachments: &color_attachments,
                depth_stencil_attachment: depth_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            for cmd in &pending.commands {
                match cmd {
                    RenderCommand::SetPipeline(handle) => {
                        if let Some(pipeline) = self.render_pipelines.get(*handle) {
                            render_pass.set_pipeline(pipeline);
                        }
                    }
                    RenderCommand::SetBindGroup { index, bind_group } => {
                        if let Some(bg) = self.bind_groups.get(*bind_group) {
                            render_pass.set_bind_group(*index, bg, &[]);
                        }
                    }
                    RenderCommand::SetVertexBuffer { slot, buffer, offset } => {
                        if let Some(buf) = self.buffers.get(*buffer) {
                            render_pass.set_vertex_buffer(*slot, buf.slice(*offset..));
                        }
                    }
                    RenderCommand::SetIndexBuffer { buffer, offset, format } => {
                        if let Some(buf) = self.buffers.get(*buffer) {
                            let wgpu_format = match format {
                                IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
                                IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
                            };
                            render_pass.set_index_buffer(buf.slice(*offset..), wgpu_format);
                        }
                    }
                    RenderCommand::SetViewport { x, y, width, height, min_depth, max_depth } => {
                        render_pass.set_viewport(*x, *y, *width, *height, *min_depth, *max_depth);
                    }
                    RenderCommand::Draw { vertices, instances } => {
                        render_pass.draw(vertices.clone(), instances.clone());
                    }
                    RenderCommand::DrawIndexed { indices, base_vertex, instances } => {
                        render_pass.draw_indexed(indices.clone(), *base_vertex, instances.clone());
                    }
                }
            }
        }

        self.encoder = Some(encoder);
    }

    fn begin_compute_pass(&mut self, label: Option<&str>) {
        self.pending_compute_pass = Some(PendingComputePass {
            label: label.map(|s| s.to_string()),
            commands: Vec::new(),
        });
    }

    fn end_compute_pass(&mut self) {
        let Some(pending) = self.pending_compute_pass.take() else {
            return;
        };

        let mut encoder = self.take_encoder();

        {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: pending.label.as_deref(),
                timestamp_writes: None,
            });

            for cmd in &pending.commands {
                match cmd {
                    ComputeCommand::SetPipeline(handle) => {
                        if let Some(pipeline) = self.compute_pipelines.get(*handle) {
                            compute_pass.set_pipeline(pipeline);
                        }
                    }
                    ComputeCommand::SetBindGroup { index, bind_group } => {
                        if let Some(bg) = self.bind_groups.get(*bind_group) {
                            compute_pass.set_bind_group(*index, bg, &[]);
                        }
                    }
                    ComputeCommand::Dispatch { x, y, z } => {
                        compute_pass.dispatch_workgroups(*x, *y, *z);
                    }
                }
            }
        }

        self.encoder = Some(encoder);
    }

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        if let Some(ref mut pending) = self.pending_render_pass {
            pending.commands.push(RenderCommand::SetPipeline(pipeline));
        }
    }

    fn set_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        if let Some(ref mut pending) = self.pending_compute_pass {
            pending.commands.push(ComputeCommand::SetPipeline(pipeline));
        }
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle) {
        if let Some(ref mut pending) = self.pending_render_pass {
            pending.commands.push(RenderCommand::SetBindGroup { index, bind_group });
        } else if let Some(ref mut pending) = self.pending_compute_pass {
            pending.commands.push(ComputeCommand::SetBindGroup { index, bind_group });
        }
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64) {
        if let Some(ref mut pending) = self.pending_render_pass {
            pending.commands.push(RenderCommand::SetVertexBuffer { slot, buffer, offset });
        }
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, offset: u64, format: IndexFormat) {
        if let Some(ref mut pending) = self.pending_render_pass {
            pending.commands.push(RenderCommand::SetIndexBuffer { buffer, offset, format });
        }
    }

    fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32, min_depth: f32, max_depth: f32) {
        if let Some(ref mut pending) = self.pending_render_pass {
            pending.commands.push(RenderCommand::SetViewport { x, y, width, height, min_depth, max_depth });
        }
    }

    fn draw(&mut self, vertices: std::ops::Range<u32>, instances: std::ops::Range<u32>) {
        if let Some(ref mut pending) = self.pending_render_pass {
            pending.commands.push(RenderCommand::Draw { vertices, instances });
        }
    }

    fn draw_indexed(
        &mut self,
        indices: std::ops::Range<u32>,
        base_vertex: i32,
        instances: std::ops::Range<u32>,
    ) {
        if let Some(ref mut pending) = self.pending_render_pass {
            pending.commands.push(RenderCommand::DrawIndexed { indices, base_vertex, instances });
        }
    }

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) {
        if let Some(ref mut pending) = self.pending_compute_pass {
            pending.commands.push(ComputeCommand::Dispatch { x, y, z });
        }
    }

    fn transition_buffer(&mut self, _buffer: BufferHandle, _state: ResourceState) {
        // wgpu tracks buffer usage and inserts barriers itself
    }

    fn submit(&mut self) {
        self.flush();
    }

    fn take_errors(&mut self) -> Vec<String> {
        std::mem::take(&mut *self.errors.lock())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(buffer);
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(texture);
    }

    fn destroy_texture_view(&mut self, view: TextureViewHandle) {
        self.texture_views.remove(view);
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        self.samplers.remove(sampler);
    }

    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle) {
        self.bind_groups.remove(bind_group);
    }

    fn destroy_bind_group_layout(&mut self, layout: BindGroupLayoutHandle) {
        self.bind_group_layouts.remove(layout);
    }

    fn destroy_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        self.render_pipelines.remove(pipeline);
    }

    fn destroy_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        self.compute_pipelines.remove(pipeline);
    }
}
