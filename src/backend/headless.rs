//! Headless GPU backend
//!
//! Keeps every resource in CPU memory and records the command stream instead of
//! talking to a driver. Compute dispatches whose entry point has a registered
//! [`CpuKernel`] are executed on the CPU against the bound resources, which is
//! how the light culler and the mip generator run without a GPU.

use crate::backend::handle::{kind, ResourceTable};
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::pipeline::{light_culling, mip_generation};
use crate::BackendType;
use std::collections::{BTreeMap, HashMap, HashSet};

/// CPU implementation of a compute entry point. Receives the workgroup counts.
pub type CpuKernel = fn(&mut KernelContext, [u32; 3]);

/// One mip level of a texture as seen by a CPU kernel
#[derive(Debug, Clone)]
pub struct KernelTexture {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub data: Vec<u8>,
}

impl KernelTexture {
    /// First channel of an `Rgba32Float` or `Depth32Float` texel
    pub fn load_red_f32(&self, x: u32, y: u32) -> f32 {
        let offset = ((y * self.width + x) * self.format.bytes_per_pixel()) as usize;
        self.data
            .get(offset..offset + 4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .unwrap_or(0.0)
    }

    /// RGBA8 texel
    pub fn load_rgba8(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = ((y * self.width + x) * 4) as usize;
        let mut texel = [0; 4];
        if let Some(bytes) = self.data.get(offset..offset + 4) {
            texel.copy_from_slice(bytes);
        }
        texel
    }

    pub fn store_rgba8(&mut self, x: u32, y: u32, texel: [u8; 4]) {
        let offset = ((y * self.width + x) * 4) as usize;
        if let Some(bytes) = self.data.get_mut(offset..offset + 4) {
            bytes.copy_from_slice(&texel);
        }
    }
}

/// Resources bound to a dispatch, keyed by `(group, binding)`
#[derive(Debug, Default)]
pub struct KernelContext {
    buffers: HashMap<(u32, u32), Vec<u8>>,
    textures: HashMap<(u32, u32), KernelTexture>,
}

impl KernelContext {
    pub fn insert_buffer(&mut self, group: u32, binding: u32, data: Vec<u8>) {
        self.buffers.insert((group, binding), data);
    }

    pub fn insert_texture(&mut self, group: u32, binding: u32, texture: KernelTexture) {
        self.textures.insert((group, binding), texture);
    }

    pub fn buffer(&self, group: u32, binding: u32) -> Option<&[u8]> {
        self.buffers.get(&(group, binding)).map(Vec::as_slice)
    }

    pub fn buffer_mut(&mut self, group: u32, binding: u32) -> Option<&mut [u8]> {
        self.buffers.get_mut(&(group, binding)).map(Vec::as_mut_slice)
    }

    pub fn texture(&self, group: u32, binding: u32) -> Option<&KernelTexture> {
        self.textures.get(&(group, binding))
    }

    pub fn texture_mut(&mut self, group: u32, binding: u32) -> Option<&mut KernelTexture> {
        self.textures.get_mut(&(group, binding))
    }

    /// Take both a read-only source and a writable destination texture
    pub fn texture_pair_mut(
        &mut self,
        source: (u32, u32),
        destination: (u32, u32),
    ) -> Option<(KernelTexture, &mut KernelTexture)> {
        let src = self.textures.get(&source)?.clone();
        let dst = self.textures.get_mut(&destination)?;
        Some((src, dst))
    }
}

/// Command as recorded by the headless backend
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    BeginRenderPass { label: Option<String>, clears: bool },
    EndRenderPass,
    BeginComputePass { label: Option<String> },
    EndComputePass,
    Draw { vertex_count: u32, instance_count: u32 },
    DrawIndexed { index_count: u32, instance_count: u32 },
    Dispatch { entry_point: String, groups: [u32; 3] },
    WriteBuffer { buffer: BufferHandle, size: u64 },
    Transition { buffer: BufferHandle, from: ResourceState, to: ResourceState },
    Submit,
}

struct HeadlessBuffer {
    desc: BufferDescriptor,
    data: Vec<u8>,
}

struct HeadlessTexture {
    desc: TextureDescriptor,
    /// `[layer][mip]`
    levels: Vec<Vec<Vec<u8>>>,
}

impl HeadlessTexture {
    fn mip_size(&self, mip: u32) -> (u32, u32) {
        ((self.desc.width >> mip).max(1), (self.desc.height >> mip).max(1))
    }
}

struct HeadlessView {
    texture: TextureHandle,
    desc: TextureViewDescriptor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassState {
    None,
    Render,
    Compute,
}

enum Writeback {
    Buffer { key: (u32, u32), buffer: BufferHandle, offset: usize },
    Texture { key: (u32, u32), texture: TextureHandle, mip: u32 },
}

/// Headless backend implementation
pub struct HeadlessBackend {
    backend_type: BackendType,
    buffers: ResourceTable<kind::Buffer, HeadlessBuffer>,
    textures: ResourceTable<kind::Texture, HeadlessTexture>,
    views: ResourceTable<kind::TextureView, HeadlessView>,
    samplers: ResourceTable<kind::Sampler, SamplerDescriptor>,
    layouts: ResourceTable<kind::BindGroupLayout, u32>,
    bind_groups: ResourceTable<kind::BindGroup, Vec<(u32, BindGroupEntry)>>,
    render_pipelines: ResourceTable<kind::RenderPipeline, Option<String>>,
    compute_pipelines: ResourceTable<kind::ComputePipeline, String>,
    kernels: HashMap<String, CpuKernel>,
    unsupported_formats: HashSet<TextureFormat>,
    pass: PassState,
    compute_pipeline: Option<ComputePipelineHandle>,
    bound_groups: BTreeMap<u32, BindGroupHandle>,
    buffer_states: HashMap<BufferHandle, ResourceState>,
    commands: Vec<RecordedCommand>,
    errors: Vec<String>,
}

impl HeadlessBackend {
    /// Create a headless backend with the engine's compute kernels registered
    pub fn new() -> Self {
        let mut backend = Self {
            backend_type: BackendType::Vulkan,
            buffers: ResourceTable::new(),
            textures: ResourceTable::new(),
            views: ResourceTable::new(),
            samplers: ResourceTable::new(),
            layouts: ResourceTable::new(),
            bind_groups: ResourceTable::new(),
            render_pipelines: ResourceTable::new(),
            compute_pipelines: ResourceTable::new(),
            kernels: HashMap::new(),
            unsupported_formats: HashSet::new(),
            pass: PassState::None,
            compute_pipeline: None,
            bound_groups: BTreeMap::new(),
            buffer_states: HashMap::new(),
            commands: Vec::new(),
            errors: Vec::new(),
        };
        backend.register_kernel(light_culling::CULL_LIGHTS_ENTRY, light_culling::cull_lights_kernel);
        backend.register_kernel(mip_generation::DOWNSAMPLE_ENTRY, mip_generation::downsample_kernel);
        backend
    }

    /// Report a different API family so shader source selection can be exercised
    pub fn with_backend_type(mut self, backend_type: BackendType) -> Self {
        self.backend_type = backend_type;
        self
    }

    /// Refuse textures of `format`, like an adapter without the matching feature
    pub fn without_format(mut self, format: TextureFormat) -> Self {
        self.unsupported_formats.insert(format);
        self
    }

    /// Run `kernel` whenever a pipeline with this entry point is dispatched
    pub fn register_kernel(&mut self, entry_point: &str, kernel: CpuKernel) {
        self.kernels.insert(entry_point.to_string(), kernel);
    }

    /// Commands recorded since creation or the last [`Self::clear_commands`]
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Current tracked state of a buffer
    pub fn buffer_state(&self, buffer: BufferHandle) -> Option<ResourceState> {
        self.buffer_states.get(&buffer).copied()
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    fn report(&mut self, message: String) {
        log::warn!("HeadlessBackend: {}", message);
        self.errors.push(message);
    }

    fn run_kernel(&mut self, entry_point: &str, groups: [u32; 3]) {
        let Some(kernel) = self.kernels.get(entry_point).copied() else {
            log::trace!("HeadlessBackend: no CPU kernel for '{}', dispatch recorded only", entry_point);
            return;
        };

        let mut ctx = KernelContext::default();
        let mut writebacks = Vec::new();

        for (&group, &bind_group) in &self.bound_groups {
            let Some(entries) = self.bind_groups.get(bind_group) else {
                continue;
            };
            for (binding, entry) in entries {
                let key = (group, *binding);
                match entry {
                    BindGroupEntry::Buffer { buffer, offset, size } => {
                        let Some(buf) = self.buffers.get(*buffer) else {
                            continue;
                        };
                        let start = (*offset as usize).min(buf.data.len());
                        let end = size
                            .map(|s| start + s as usize)
                            .unwrap_or(buf.data.len())
                            .min(buf.data.len());
                        ctx.buffers.insert(key, buf.data[start..end].to_vec());
                        writebacks.push(Writeback::Buffer { key, buffer: *buffer, offset: start });
                    }
                    BindGroupEntry::Texture(view) | BindGroupEntry::StorageTexture(view) => {
                        let Some(view_info) = self.views.get(*view) else {
                            continue;
                        };
                        let Some(texture) = self.textures.get(view_info.texture) else {
                            continue;
                        };
                        let mip = view_info.desc.base_mip_level;
                        let (width, height) = texture.mip_size(mip);
                        let data = texture.levels[0]
                            .get(mip as usize)
                            .cloned()
                            .unwrap_or_default();
                        ctx.textures.insert(
                            key,
                            KernelTexture {
                                width,
                                height,
                                format: view_info.desc.format.unwrap_or(texture.desc.format),
                                data,
                            },
                        );
                        if matches!(entry, BindGroupEntry::StorageTexture(_)) {
                            writebacks.push(Writeback::Texture { key, texture: view_info.texture, mip });
                        }
                    }
                    BindGroupEntry::Sampler(_) => {}
                }
            }
        }

        kernel(&mut ctx, groups);

        for writeback in writebacks {
            match writeback {
                Writeback::Buffer { key, buffer, offset } => {
                    if let (Some(data), Some(buf)) = (ctx.buffers.get(&key), self.buffers.get_mut(buffer)) {
                        buf.data[offset..offset + data.len()].copy_from_slice(data);
                    }
                }
                Writeback::Texture { key, texture, mip } => {
                    if let (Some(tex), Some(target)) = (ctx.textures.remove(&key), self.textures.get_mut(texture)) {
                        if let Some(level) = target.levels[0].get_mut(mip as usize) {
                            *level = tex.data;
                        }
                    }
                }
            }
        }
    }

    fn clear_view(&mut self, view: TextureViewHandle, color: [f32; 4]) {
        let Some(view_info) = self.views.get(view) else {
            return;
        };
        let texture_handle = view_info.texture;
        let mip = view_info.desc.base_mip_level as usize;
        let Some(texture) = self.textures.get_mut(texture_handle) else {
            return;
        };
        let texel = encode_texel(texture.desc.format, color);
        if texel.is_empty() {
            return;
        }
        for layer in &mut texture.levels {
            if let Some(level) = layer.get_mut(mip) {
                for chunk in level.chunks_exact_mut(texel.len()) {
                    chunk.copy_from_slice(&texel);
                }
            }
        }
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a clear value in the texture's memory layout. Empty for compressed formats.
fn encode_texel(format: TextureFormat, color: [f32; 4]) -> Vec<u8> {
    let unorm = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    match format {
        TextureFormat::Rgba8Unorm | TextureFormat::Rgba8UnormSrgb => color.iter().map(|&c| unorm(c)).collect(),
        TextureFormat::Rgba32Float => color.iter().flat_map(|c| c.to_le_bytes()).collect(),
        TextureFormat::Depth32Float => color[0].to_le_bytes().to_vec(),
        TextureFormat::Bc1RgbaUnorm | TextureFormat::Bc2RgbaUnorm | TextureFormat::Bc3RgbaUnorm => Vec::new(),
    }
}

impl GraphicsBackend for HeadlessBackend {
    fn name(&self) -> &str {
        "Headless Backend"
    }

    fn backend_type(&self) -> BackendType {
        self.backend_type
    }

    fn supports_format(&self, format: TextureFormat) -> bool {
        !self.unsupported_formats.contains(&format)
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        log::trace!("HeadlessBackend: creating buffer {:?} (size: {})", desc.label, desc.size);
        if desc.size == 0 {
            return Err(BackendError::BufferCreationFailed(format!(
                "{:?} has zero size",
                desc.label
            )));
        }
        Ok(self.buffers.insert(HeadlessBuffer {
            desc: desc.clone(),
            data: vec![0; desc.size as usize],
        }))
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        let desc = BufferDescriptor {
            size: desc.size.max(data.len() as u64),
            ..desc.clone()
        };
        let handle = self.create_buffer(&desc)?;
        if let Some(buf) = self.buffers.get_mut(handle) {
            buf.data[..data.len()].copy_from_slice(data);
        }
        Ok(handle)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        if let Some(state) = self.buffer_states.get(&buffer) {
            if *state != ResourceState::CopyDest {
                let message = format!("write to {:?} in state {:?}", buffer, state);
                self.report(message);
            }
        }
        let Some(buf) = self.buffers.get_mut(buffer) else {
            self.report(format!("write to released buffer {:?}", buffer));
            return;
        };
        let start = offset as usize;
        let end = start + data.len();
        if end > buf.data.len() {
            let message = format!(
                "write of {} bytes at {} overflows {:?} ({} bytes)",
                data.len(),
                offset,
                buf.desc.label,
                buf.data.len()
            );
            self.report(message);
            return;
        }
        buf.data[start..end].copy_from_slice(data);
        self.commands.push(RecordedCommand::WriteBuffer { buffer, size: data.len() as u64 });
    }

    fn read_buffer(&mut self, buffer: BufferHandle) -> BackendResult<Vec<u8>> {
        self.buffers
            .get(buffer)
            .map(|buf| buf.data.clone())
            .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", buffer)))
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        log::trace!(
            "HeadlessBackend: creating texture {:?} ({}x{}, {} mips)",
            desc.label,
            desc.width,
            desc.height,
            desc.mip_levels
        );
        if desc.width == 0 || desc.height == 0 || desc.mip_levels == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?} has an empty extent",
                desc.label
            )));
        }
        if self.unsupported_formats.contains(&desc.format) {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?} uses unsupported format {:?}",
                desc.label, desc.format
            )));
        }
        let levels = (0..desc.layer_count())
            .map(|_| {
                (0..desc.mip_levels)
                    .map(|mip| {
                        let w = (desc.width >> mip).max(1);
                        let h = (desc.height >> mip).max(1);
                        vec![0; desc.format.image_size(w, h) as usize]
                    })
                    .collect()
            })
            .collect();
        Ok(self.textures.insert(HeadlessTexture {
            desc: desc.clone(),
            levels,
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
            .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", texture)))?;
        if desc.base_mip_level >= tex.desc.mip_levels {
            return Err(BackendError::TextureCreationFailed(format!(
                "view mip {} out of range for {:?}",
                desc.base_mip_level, tex.desc.label
            )));
        }
        Ok(self.views.insert(HeadlessView {
            texture,
            desc: desc.clone(),
        }))
    }

    fn write_texture(
        &mut self,
        texture: TextureHandle,
        mip_level: u32,
        layer: u32,
        data: &[u8],
        _width: u32,
        _height: u32,
    ) {
        let Some(tex) = self.textures.get_mut(texture) else {
            self.report(format!("write to released texture {:?}", texture));
            return;
        };
        let Some(level) = tex
            .levels
            .get_mut(layer as usize)
            .and_then(|mips| mips.get_mut(mip_level as usize))
        else {
            self.report(format!("texture write outside {:?} (mip {}, layer {})", texture, mip_level, layer));
            return;
        };
        let len = level.len().min(data.len());
        level[..len].copy_from_slice(&data[..len]);
    }

    fn read_texture(&mut self, texture: TextureHandle, mip_level: u32) -> BackendResult<Vec<u8>> {
        self.textures
            .get(texture)
            .and_then(|tex| tex.levels[0].get(mip_level as usize).cloned())
            .ok_or_else(|| BackendError::InvalidHandle(format!("{:?} mip {}", texture, mip_level)))
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        Ok(self.samplers.insert(desc.clone()))
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle> {
        log::trace!("HeadlessBackend: creating render pipeline {:?}", desc.label);
        Ok(self.render_pipelines.insert(desc.label.clone()))
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<ComputePipelineHandle> {
        log::trace!(
            "HeadlessBackend: creating compute pipeline {:?} ({})",
            desc.label,
            desc.entry_point
        );
        Ok(self.compute_pipelines.insert(desc.entry_point.clone()))
    }

    fn render_pipeline_bind_group_layout(
        &mut self,
        pipeline: RenderPipelineHandle,
        group: u32,
    ) -> BackendResult<BindGroupLayoutHandle> {
        if !self.render_pipelines.contains(pipeline) {
            return Err(BackendError::InvalidHandle(format!("{:?}", pipeline)));
        }
        Ok(self.layouts.insert(group))
    }

    fn compute_pipeline_bind_group_layout(
        &mut self,
        pipeline: ComputePipelineHandle,
        group: u32,
    ) -> BackendResult<BindGroupLayoutHandle> {
        if !self.compute_pipelines.contains(pipeline) {
            return Err(BackendError::InvalidHandle(format!("{:?}", pipeline)));
        }
        Ok(self.layouts.insert(group))
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        if !self.layouts.contains(layout) {
            return Err(BackendError::BindGroupCreationFailed("Layout not found".into()));
        }
        Ok(self.bind_groups.insert(entries.to_vec()))
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        if self.pass != PassState::None {
            self.report("render pass begun while another pass is open".into());
        }
        self.pass = PassState::Render;
        self.bound_groups.clear();

        let mut clears = false;
        for attachment in &desc.color_attachments {
            if let LoadOp::Clear(color) = attachment.load_op {
                self.clear_view(attachment.view, color);
                clears = true;
            }
        }
        if let Some(depth) = &desc.depth_stencil_attachment {
            if let LoadOp::Clear(_) = depth.depth_load_op {
                self.clear_view(depth.view, [depth.depth_clear_value; 4]);
                clears = true;
            }
        }
        self.commands.push(RecordedCommand::BeginRenderPass {
            label: desc.label.clone(),
            clears,
        });
    }

    fn end_render_pass(&mut self) {
        if self.pass == PassState::Render {
            self.pass = PassState::None;
            self.commands.push(RecordedCommand::EndRenderPass);
        }
    }

    fn begin_compute_pass(&mut self, label: Option<&str>) {
        if self.pass != PassState::None {
            self.report("compute pass begun while another pass is open".into());
        }
        self.pass = PassState::Compute;
        self.bound_groups.clear();
        self.compute_pipeline = None;
        self.commands.push(RecordedCommand::BeginComputePass {
            label: label.map(str::to_string),
        });
    }

    fn end_compute_pass(&mut self) {
        if self.pass == PassState::Compute {
            self.pass = PassState::None;
            self.commands.push(RecordedCommand::EndComputePass);
        }
    }

    fn set_render_pipeline(&mut self, _pipeline: RenderPipelineHandle) {}

    fn set_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        self.compute_pipeline = Some(pipeline);
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle) {
        self.bound_groups.insert(index, bind_group);
    }

    fn set_vertex_buffer(&mut self, _slot: u32, _buffer: BufferHandle, _offset: u64) {}

    fn set_index_buffer(&mut self, _buffer: BufferHandle, _offset: u64, _format: IndexFormat) {}

    fn set_viewport(&mut self, _x: f32, _y: f32, _width: f32, _height: f32, _min_depth: f32, _max_depth: f32) {}

    fn draw(&mut self, vertices: std::ops::Range<u32>, instances: std::ops::Range<u32>) {
        self.commands.push(RecordedCommand::Draw {
            vertex_count: vertices.len() as u32,
            instance_count: instances.len() as u32,
        });
    }

    fn draw_indexed(
        &mut self,
        indices: std::ops::Range<u32>,
        _base_vertex: i32,
        instances: std::ops::Range<u32>,
    ) {
        self.commands.push(RecordedCommand::DrawIndexed {
            index_count: indices.len() as u32,
            instance_count: instances.len() as u32,
        });
    }

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) {
        if self.pass != PassState::Compute {
            self.report("dispatch outside of a compute pass".into());
            return;
        }
        let Some(entry_point) = self
            .compute_pipeline
            .and_then(|p| self.compute_pipelines.get(p))
            .cloned()
        else {
            self.report("dispatch without a compute pipeline".into());
            return;
        };
        self.commands.push(RecordedCommand::Dispatch {
            entry_point: entry_point.clone(),
            groups: [x, y, z],
        });
        self.run_kernel(&entry_point, [x, y, z]);
    }

    fn transition_buffer(&mut self, buffer: BufferHandle, state: ResourceState) {
        let from = self
            .buffer_states
            .insert(buffer, state)
            .unwrap_or(ResourceState::Common);
        if from != state {
            self.commands.push(RecordedCommand::Transition { buffer, from, to: state });
        }
    }

    fn submit(&mut self) {
        if self.pass != PassState::None {
            self.report("submit with an open pass".into());
            self.pass = PassState::None;
        }
        self.commands.push(RecordedCommand::Submit);
    }

    fn take_errors(&mut self) -> Vec<String> {
        std::mem::take(&mut self.errors)
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffer_states.remove(&buffer);
        self.buffers.remove(buffer);
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(texture);
    }

    fn destroy_texture_view(&mut self, view: TextureViewHandle) {
        self.views.remove(view);
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        self.samplers.remove(sampler);
    }

    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle) {
        self.bind_groups.remove(bind_group);
    }

    fn destroy_bind_group_layout(&mut self, layout: BindGroupLayoutHandle) {
        self.layouts.remove(layout);
    }

    fn destroy_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        self.render_pipelines.remove(pipeline);
    }

    fn destroy_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        self.compute_pipelines.remove(pipeline);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_desc(size: u64) -> BufferDescriptor {
        BufferDescriptor {
            label: Some("test".into()),
            size,
            usage: BufferUsage::STORAGE | BufferUsage::COPY_DST,
            mapped_at_creation: false,
        }
    }

    #[test]
    fn buffer_write_and_readback() {
        let mut backend = HeadlessBackend::new();
        let buffer = backend.create_buffer(&buffer_desc(8)).unwrap();
        backend.write_buffer(buffer, 4, &[1, 2, 3, 4]);
        assert_eq!(backend.read_buffer(buffer).unwrap(), vec![0, 0, 0, 0, 1, 2, 3, 4]);

        backend.destroy_buffer(buffer);
        assert!(backend.read_buffer(buffer).is_err());
        // Releasing twice is harmless
        backend.destroy_buffer(buffer);
    }

    #[test]
    fn overflowing_write_is_rejected() {
        let mut backend = HeadlessBackend::new();
        let buffer = backend.create_buffer(&buffer_desc(4)).unwrap();
        backend.write_buffer(buffer, 2, &[9; 4]);
        assert_eq!(backend.read_buffer(buffer).unwrap(), vec![0; 4]);
        assert_eq!(backend.take_errors().len(), 1);
    }

    #[test]
    fn write_outside_copy_dest_is_reported() {
        let mut backend = HeadlessBackend::new();
        let buffer = backend.create_buffer(&buffer_desc(4)).unwrap();
        backend.transition_buffer(buffer, ResourceState::GenericRead);
        backend.write_buffer(buffer, 0, &[1; 4]);
        assert_eq!(backend.take_errors().len(), 1);

        backend.transition_buffer(buffer, ResourceState::CopyDest);
        backend.write_buffer(buffer, 0, &[1; 4]);
        assert!(backend.take_errors().is_empty());
    }

    #[test]
    fn clear_fills_render_target() {
        let mut backend = HeadlessBackend::new();
        let texture = backend
            .create_texture(&TextureDescriptor {
                width: 2,
                height: 2,
                format: TextureFormat::Rgba8Unorm,
                usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_SRC,
                ..Default::default()
            })
            .unwrap();
        let view = backend
            .create_texture_view(texture, &TextureViewDescriptor::default())
            .unwrap();
        backend.begin_render_pass(&RenderPassDescriptor {
            label: None,
            color_attachments: vec![ColorAttachment {
                view,
                load_op: LoadOp::Clear([1.0, 0.0, 0.0, 1.0]),
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: None,
        });
        backend.end_render_pass();

        let pixels = backend.read_texture(texture, 0).unwrap();
        assert_eq!(&pixels[..4], &[255, 0, 0, 255]);
        assert_eq!(&pixels[12..], &[255, 0, 0, 255]);
    }
}
