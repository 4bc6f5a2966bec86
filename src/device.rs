//! Graphics device: frame lifecycle, fixed-function state and draw submission
//!
//! The device owns the injected [`GraphicsBackend`] and an off-screen back
//! buffer. Draws go to the back buffer or to the bound [`RenderTexture`].

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::backend::{HeadlessBackend, WgpuBackend};
use crate::resources::{RenderTexture, VertexBuffer};
use crate::shader::{PipelineKey, Shader};
use crate::EngineConfig;
use glam::Vec4;

/// Frame lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    FrameBegun,
    FramePresented,
}

/// Which attachments `clear_screen` clears
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearFlags(u32);

impl ClearFlags {
    pub const COLOR: Self = Self(1 << 0);
    pub const DEPTH: Self = Self(1 << 1);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for ClearFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    AlphaBlend,
    Additive,
    #[default]
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DepthFunc {
    LessOrEqualWriteOff,
    #[default]
    LessOrEqualWriteOn,
}

/// Counters accumulated until [`GfxDevice::reset_frame_statistics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStatistics {
    pub draw_calls: u32,
    pub vertex_buffer_binds: u32,
    pub texture_binds: u32,
}

/// Per-draw objects released after the next submit
#[derive(Debug, Clone, Copy)]
pub(crate) enum TransientResource {
    Buffer(BufferHandle),
    BindGroup(BindGroupHandle),
    BindGroupLayout(BindGroupLayoutHandle),
}

#[derive(Debug, Clone, Copy)]
struct TargetBinding {
    color_view: TextureViewHandle,
    color_format: TextureFormat,
    depth_view: Option<TextureViewHandle>,
    depth_format: Option<TextureFormat>,
    width: u32,
    height: u32,
}

impl TargetBinding {
    fn of(target: &RenderTexture) -> Self {
        Self {
            color_view: target.color_view(),
            color_format: target.format(),
            depth_view: target.depth_view(),
            depth_format: target.depth_format(),
            width: target.width(),
            height: target.height(),
        }
    }
}

pub const BACK_BUFFER_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// Graphics device
pub struct GfxDevice {
    backend: Box<dyn GraphicsBackend>,
    width: u32,
    height: u32,
    back_buffer: Option<RenderTexture>,
    frame_state: FrameState,
    clear_color: Vec4,
    /// `None` draws to the back buffer
    render_target: Option<TargetBinding>,
    render_pass_open: bool,
    back_face_culling: bool,
    multisampling: bool,
    blend_mode: BlendMode,
    depth_func: DepthFunc,
    depth_bias: i32,
    depth_bias_slope: f32,
    active_program: Option<u64>,
    global_render_texture: Option<(TextureViewHandle, SamplerHandle)>,
    statistics: FrameStatistics,
    transient: Vec<TransientResource>,
}

impl GfxDevice {
    /// Wrap `backend` and create a `width` x `height` back buffer
    pub fn new(mut backend: Box<dyn GraphicsBackend>, width: u32, height: u32) -> BackendResult<Self> {
        let back_buffer = Self::create_back_buffer(backend.as_mut(), width, height)?;
        log::info!("GfxDevice: {} ({}x{})", backend.name(), width, height);

        Ok(Self {
            backend,
            width,
            height,
            back_buffer: Some(back_buffer),
            frame_state: FrameState::Idle,
            clear_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
            render_target: None,
            render_pass_open: false,
            back_face_culling: true,
            multisampling: false,
            blend_mode: BlendMode::default(),
            depth_func: DepthFunc::default(),
            depth_bias: 0,
            depth_bias_slope: 0.0,
            active_program: None,
            global_render_texture: None,
            statistics: FrameStatistics::default(),
            transient: Vec::new(),
        })
    }

    /// Device on the CPU-resident [`HeadlessBackend`]
    pub fn headless(width: u32, height: u32) -> BackendResult<Self> {
        Self::new(Box::new(HeadlessBackend::new()), width, height)
    }

    /// Device on a GPU selected by `config`
    pub fn from_config(config: &EngineConfig) -> BackendResult<Self> {
        let backend = WgpuBackend::new(config)?;
        Self::new(Box::new(backend), config.width, config.height)
    }

    fn create_back_buffer(
        backend: &mut dyn GraphicsBackend,
        width: u32,
        height: u32,
    ) -> BackendResult<RenderTexture> {
        RenderTexture::create(backend, "Back Buffer", width, height, BACK_BUFFER_FORMAT, true)
            .map_err(|e| BackendError::TextureCreationFailed(e.to_string()))
    }

    pub fn backend(&self) -> &dyn GraphicsBackend {
        self.backend.as_ref()
    }

    pub fn backend_mut(&mut self) -> &mut dyn GraphicsBackend {
        self.backend.as_mut()
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn frame_state(&self) -> FrameState {
        self.frame_state
    }

    pub fn back_buffer(&self) -> Option<&RenderTexture> {
        self.back_buffer.as_ref()
    }

    pub fn begin_frame(&mut self) {
        if self.frame_state == FrameState::FrameBegun {
            log::warn!("begin_frame called twice without present, ignoring");
            return;
        }

        if self.back_buffer.is_none() {
            match Self::create_back_buffer(self.backend.as_mut(), self.width, self.height) {
                Ok(back_buffer) => self.back_buffer = Some(back_buffer),
                Err(e) => log::error!("Failed to recreate back buffer: {}", e),
            }
        }

        self.render_target = None;
        self.frame_state = FrameState::FrameBegun;
    }

    /// Submit the frame
    pub fn present(&mut self) {
        if self.frame_state != FrameState::FrameBegun {
            log::warn!("present called without begin_frame");
        }
        self.submit();
        self.frame_state = FrameState::FramePresented;
    }

    /// Submit recorded work and release last draw's transient objects
    pub fn submit(&mut self) {
        self.close_render_pass();
        self.backend.submit();
        for resource in self.transient.drain(..) {
            match resource {
                TransientResource::Buffer(buffer) => self.backend.destroy_buffer(buffer),
                TransientResource::BindGroup(group) => self.backend.destroy_bind_group(group),
                TransientResource::BindGroupLayout(layout) => self.backend.destroy_bind_group_layout(layout),
            }
        }
    }

    pub(crate) fn defer_release(&mut self, resource: TransientResource) {
        self.transient.push(resource);
    }

    pub fn set_clear_color(&mut self, color: Vec4) {
        self.clear_color = color;
    }

    /// Clear the current render target
    pub fn clear_screen(&mut self, flags: ClearFlags) {
        self.close_render_pass();
        let Some(target) = self.current_target() else {
            log::warn!("clear_screen without a render target");
            return;
        };
        self.open_render_pass(target, flags);
    }

    /// Draw to `target`, or to the back buffer for `None`
    pub fn set_render_target(&mut self, target: Option<&RenderTexture>) {
        self.close_render_pass();
        self.render_target = target.map(TargetBinding::of);
    }

    pub fn set_back_face_culling(&mut self, enabled: bool) {
        self.back_face_culling = enabled;
    }

    /// Off-screen targets are single-sampled; the flag is kept for callers that query it
    pub fn set_multisampling(&mut self, enabled: bool) {
        if enabled && !self.multisampling {
            log::debug!("Multisampling requested; render targets stay single-sampled");
        }
        self.multisampling = enabled;
    }

    pub fn multisampling(&self) -> bool {
        self.multisampling
    }

    pub fn set_blend_mode(&mut self, mode: BlendMode) {
        self.blend_mode = mode;
    }

    pub fn set_depth_func(&mut self, func: DepthFunc) {
        self.depth_func = func;
    }

    /// Constant and slope-scaled depth bias for following draws
    pub fn set_polygon_offset(&mut self, units: i32, factor: f32) {
        self.depth_bias = units;
        self.depth_bias_slope = factor;
    }

    /// Render texture every material binds in place of its own render texture slot 0
    pub fn set_global_render_texture(&mut self, texture: Option<&RenderTexture>) {
        self.global_render_texture = texture.map(|t| (t.color_view(), t.sampler()));
    }

    pub(crate) fn global_render_texture(&self) -> Option<(TextureViewHandle, SamplerHandle)> {
        self.global_render_texture
    }

    pub(crate) fn set_active_program(&mut self, id: u64) {
        self.active_program = Some(id);
    }

    pub fn active_program(&self) -> Option<u64> {
        self.active_program
    }

    /// Draw `element_count` vertices (or indices) starting at `index_offset`
    pub fn draw_vertex_buffer(
        &mut self,
        shader: &mut Shader,
        vertex_buffer: &VertexBuffer,
        element_count: u32,
        index_offset: u32,
    ) {
        if !shader.is_valid() {
            shader.report_invalid("draw");
            return;
        }
        if self.active_program != Some(shader.id()) {
            shader.use_program(self);
        }

        let Some(target) = self.current_target() else {
            log::warn!("draw without a render target");
            return;
        };

        let key = PipelineKey {
            blend: self.blend_mode,
            depth: self.depth_func,
            cull: if self.back_face_culling {
                CullMode::Back
            } else {
                CullMode::None
            },
            color_format: target.color_format,
            depth_format: target.depth_format,
            depth_bias: self.depth_bias,
            depth_bias_slope: self.depth_bias_slope.to_bits(),
            vertex_layout: vertex_buffer.layout().clone(),
        };

        let pipeline = match shader.pipeline(self, &key) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                log::error!("Shader '{}': pipeline creation failed: {}", shader.label(), e);
                return;
            }
        };

        if !self.render_pass_open {
            self.open_render_pass(target, ClearFlags(0));
        }
        self.backend.set_render_pipeline(pipeline);
        self.backend
            .set_viewport(0.0, 0.0, target.width as f32, target.height as f32, 0.0, 1.0);

        let texture_binds = match shader.apply(self, pipeline) {
            Ok(count) => count,
            Err(e) => {
                log::warn!("Shader '{}': draw skipped: {}", shader.label(), e);
                return;
            }
        };

        self.backend.set_vertex_buffer(0, vertex_buffer.buffer(), 0);
        let range = index_offset..index_offset + element_count;
        match vertex_buffer.index_buffer() {
            Some((buffer, format)) => {
                self.backend.set_index_buffer(buffer, 0, format);
                self.backend.draw_indexed(range, 0, 0..1);
            }
            None => self.backend.draw(range, 0..1),
        }

        self.statistics.draw_calls += 1;
        self.statistics.vertex_buffer_binds += 1;
        self.statistics.texture_binds += texture_binds;
    }

    pub fn statistics(&self) -> FrameStatistics {
        self.statistics
    }

    pub fn reset_frame_statistics(&mut self) {
        self.statistics = FrameStatistics::default();
    }

    /// Log every error the backend reported since the last check. Returns whether there were any.
    pub fn error_check(&mut self, info: &str) -> bool {
        let errors = self.backend.take_errors();
        for error in &errors {
            log::error!("{}: {}", info, error);
        }
        !errors.is_empty()
    }

    /// Flush outstanding work and release device-owned objects
    pub fn release_gpu_objects(&mut self) {
        self.submit();
        if let Some(mut back_buffer) = self.back_buffer.take() {
            back_buffer.destroy_with(self.backend.as_mut());
        }
        self.render_target = None;
        self.active_program = None;
        self.global_render_texture = None;
        self.frame_state = FrameState::Idle;
    }

    /// Order the next use of `buffer`; see [`ResourceState`]
    pub fn transition_buffer(&mut self, buffer: BufferHandle, state: ResourceState) {
        self.close_render_pass();
        self.backend.transition_buffer(buffer, state);
    }

    pub(crate) fn begin_compute_pass(&mut self, label: Option<&str>) {
        self.close_render_pass();
        self.backend.begin_compute_pass(label);
    }

    pub(crate) fn end_compute_pass(&mut self) {
        self.backend.end_compute_pass();
    }

    fn current_target(&self) -> Option<TargetBinding> {
        self.render_target
            .or_else(|| self.back_buffer.as_ref().map(TargetBinding::of))
    }

    fn open_render_pass(&mut self, target: TargetBinding, clear: ClearFlags) {
        let color = self.clear_color;
        self.backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("GfxDevice Pass".into()),
            color_attachments: vec![ColorAttachment {
                view: target.color_view,
                load_op: if clear.contains(ClearFlags::COLOR) {
                    LoadOp::Clear(color.to_array())
                } else {
                    LoadOp::Load
                },
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: target.depth_view.map(|view| DepthStencilAttachment {
                view,
                depth_load_op: if clear.contains(ClearFlags::DEPTH) {
                    LoadOp::Clear([1.0; 4])
                } else {
                    LoadOp::Load
                },
                depth_store_op: StoreOp::Store,
                depth_clear_value: 1.0,
            }),
        });
        self.render_pass_open = true;
    }

    fn close_render_pass(&mut self) {
        if self.render_pass_open {
            self.backend.end_render_pass();
            self.render_pass_open = false;
        }
    }
}

impl Drop for GfxDevice {
    fn drop(&mut self) {
        self.close_render_pass();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_frame_twice_is_ignored() {
        let mut device = GfxDevice::headless(64, 32).unwrap();
        assert_eq!(device.frame_state(), FrameState::Idle);
        device.begin_frame();
        device.begin_frame();
        assert_eq!(device.frame_state(), FrameState::FrameBegun);
        device.present();
        assert_eq!(device.frame_state(), FrameState::FramePresented);
        device.begin_frame();
        assert_eq!(device.frame_state(), FrameState::FrameBegun);
    }

    #[test]
    fn clear_screen_fills_back_buffer() {
        let mut device = GfxDevice::headless(4, 4).unwrap();
        device.begin_frame();
        device.set_clear_color(Vec4::new(0.0, 1.0, 0.0, 1.0));
        device.clear_screen(ClearFlags::COLOR | ClearFlags::DEPTH);
        device.present();

        let texture = device.back_buffer().unwrap().color_texture();
        let pixels = device.backend_mut().read_texture(texture, 0).unwrap();
        assert_eq!(pixels.len(), 4 * 4 * 4);
        assert!(pixels.chunks(4).all(|p| p == [0, 255, 0, 255]));
    }

    #[test]
    fn release_gpu_objects_then_new_frame() {
        let mut device = GfxDevice::headless(8, 8).unwrap();
        device.begin_frame();
        device.present();
        device.release_gpu_objects();
        assert!(device.back_buffer().is_none());
        device.begin_frame();
        assert!(device.back_buffer().is_some());
    }
}
