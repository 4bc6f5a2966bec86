//! Materials: texture slots plus the fixed-function state a mesh is drawn with

use super::{RenderTexture, Texture2D, TextureCube, VertexBuffer};
use crate::backend::traits::{SamplerHandle, TextureViewHandle};
use crate::device::{BlendMode, DepthFunc, GfxDevice};
use crate::shader::Shader;

/// Texture slots per kind
pub const TEXTURE_SLOT_COUNT: usize = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlotBinding {
    view: TextureViewHandle,
    sampler: SamplerHandle,
}

/// Shader uniform a 2D texture slot binds to
pub fn texture_slot_name(slot: usize) -> String {
    format!("texture_{}", slot)
}

/// Shader uniform a cube texture slot binds to
pub fn cube_texture_slot_name(slot: usize) -> String {
    format!("cube_texture_{}", slot)
}

/// Shader uniform a render texture slot binds to
pub fn render_texture_slot_name(slot: usize) -> String {
    format!("render_texture_{}", slot)
}

/// Draw state for one mesh.
///
/// Slot textures are recorded as view/sampler pairs; the material does not own
/// them and they must outlive its draws.
#[derive(Debug, Clone)]
pub struct Material {
    textures: [Option<SlotBinding>; TEXTURE_SLOT_COUNT],
    cube_textures: [Option<SlotBinding>; TEXTURE_SLOT_COUNT],
    render_textures: [Option<SlotBinding>; TEXTURE_SLOT_COUNT],
    blending: BlendMode,
    depth_func: DepthFunc,
    depth_offset: f32,
    depth_slope: f32,
    cull_back_faces: bool,
    f0: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            textures: [None; TEXTURE_SLOT_COUNT],
            cube_textures: [None; TEXTURE_SLOT_COUNT],
            render_textures: [None; TEXTURE_SLOT_COUNT],
            blending: BlendMode::Off,
            depth_func: DepthFunc::LessOrEqualWriteOn,
            depth_offset: 0.0,
            depth_slope: 0.0,
            cull_back_faces: true,
            f0: 0.5,
        }
    }
}

impl Material {
    pub fn new() -> Self {
        Self::default()
    }

    /// Panics when `slot >= TEXTURE_SLOT_COUNT`
    pub fn set_texture(&mut self, texture: &Texture2D, slot: usize) {
        assert!(slot < TEXTURE_SLOT_COUNT, "texture slot {} out of range", slot);
        self.textures[slot] = Some(SlotBinding {
            view: texture.view(),
            sampler: texture.sampler(),
        });
    }

    pub fn set_texture_cube(&mut self, texture: &TextureCube, slot: usize) {
        assert!(slot < TEXTURE_SLOT_COUNT, "cube texture slot {} out of range", slot);
        self.cube_textures[slot] = Some(SlotBinding {
            view: texture.view(),
            sampler: texture.sampler(),
        });
    }

    pub fn set_render_texture(&mut self, texture: &RenderTexture, slot: usize) {
        assert!(slot < TEXTURE_SLOT_COUNT, "render texture slot {} out of range", slot);
        self.render_textures[slot] = Some(SlotBinding {
            view: texture.color_view(),
            sampler: texture.sampler(),
        });
    }

    pub fn blending(&self) -> BlendMode {
        self.blending
    }

    pub fn set_blending(&mut self, mode: BlendMode) {
        self.blending = mode;
    }

    pub fn depth_function(&self) -> DepthFunc {
        self.depth_func
    }

    pub fn set_depth_function(&mut self, func: DepthFunc) {
        self.depth_func = func;
    }

    pub fn set_depth_offset(&mut self, offset: f32, slope: f32) {
        self.depth_offset = offset;
        self.depth_slope = slope;
    }

    pub fn is_back_face_culled(&self) -> bool {
        self.cull_back_faces
    }

    pub fn set_back_face_culling(&mut self, enable: bool) {
        self.cull_back_faces = enable;
    }

    pub fn f0(&self) -> f32 {
        self.f0
    }

    /// Reflectance at normal incidence, written to the `f0` uniform
    pub fn set_f0(&mut self, f0: f32) {
        self.f0 = f0;
    }

    /// Push the material's state into `device` and its textures and `f0` into `shader`
    pub fn apply(&self, device: &mut GfxDevice, shader: &mut Shader) {
        device.set_blend_mode(self.blending);
        device.set_depth_func(self.depth_func);
        device.set_back_face_culling(self.cull_back_faces);
        device.set_polygon_offset(self.depth_offset as i32, self.depth_slope);

        if !shader.is_valid() {
            return;
        }

        shader.set_float("f0", self.f0);
        let slots = [
            (&self.textures, texture_slot_name as fn(usize) -> String),
            (&self.cube_textures, cube_texture_slot_name),
            (&self.render_textures, render_texture_slot_name),
        ];
        for (bindings, slot_name) in slots {
            for (slot, binding) in bindings.iter().enumerate() {
                if let Some(binding) = binding {
                    bind_slot(shader, &slot_name(slot), *binding);
                }
            }
        }

        if let Some((view, sampler)) = device.global_render_texture() {
            bind_slot(shader, &render_texture_slot_name(0), SlotBinding { view, sampler });
        }
    }

    /// [`Self::apply`] then draw `element_count` elements of `vertex_buffer`
    pub fn draw(
        &self,
        device: &mut GfxDevice,
        shader: &mut Shader,
        vertex_buffer: &VertexBuffer,
        element_count: u32,
        index_offset: u32,
    ) {
        self.apply(device, shader);
        device.draw_vertex_buffer(shader, vertex_buffer, element_count, index_offset);
    }
}

fn bind_slot(shader: &mut Shader, name: &str, binding: SlotBinding) {
    shader.set_texture_view(name, binding.view);
    shader.set_sampler(&format!("{}_sampler", name), binding.sampler);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let material = Material::new();
        assert_eq!(material.blending(), BlendMode::Off);
        assert_eq!(material.depth_function(), DepthFunc::LessOrEqualWriteOn);
        assert!(material.is_back_face_culled());
        assert_eq!(material.f0(), 0.5);
    }

    #[test]
    #[should_panic]
    fn slot_out_of_range_panics() {
        let mut device = GfxDevice::headless(4, 4).unwrap();
        let target = RenderTexture::new(&mut device, "rt", 4, 4, crate::backend::types::TextureFormat::Rgba8Unorm, false)
            .unwrap();
        Material::new().set_render_texture(&target, TEXTURE_SLOT_COUNT);
    }
}
