//! Mip chain generation with a compute downsample pass

use crate::backend::headless::KernelContext;
use crate::device::GfxDevice;
use crate::resources::Texture2D;
use crate::shader::{ComputeShader, ShaderSource};

/// Entry point of [`DOWNSAMPLE_SHADER`]
pub const DOWNSAMPLE_ENTRY: &str = "downsample";

const WORKGROUP_SIZE: u32 = 8;

/// 2x2 box filter from one mip level into the next
pub const DOWNSAMPLE_SHADER: &str = r#"
@group(0) @binding(0) var source_mip: texture_2d<f32>;
@group(0) @binding(1) var destination_mip: texture_storage_2d<rgba8unorm, write>;

@compute @workgroup_size(8, 8, 1)
fn downsample(@builtin(global_invocation_id) id: vec3<u32>) {
    let dst_size = textureDimensions(destination_mip);
    if (id.x >= dst_size.x || id.y >= dst_size.y) {
        return;
    }

    let src_max = vec2<i32>(textureDimensions(source_mip)) - vec2<i32>(1, 1);
    let base = vec2<i32>(id.xy) * 2;
    var sum = vec4<f32>(0.0);
    for (var dy = 0; dy < 2; dy = dy + 1) {
        for (var dx = 0; dx < 2; dx = dx + 1) {
            sum = sum + textureLoad(source_mip, min(base + vec2<i32>(dx, dy), src_max), 0);
        }
    }

    textureStore(destination_mip, vec2<i32>(id.xy), sum * 0.25);
}
"#;

/// Fills mip levels `1..` of textures loaded with [`crate::resources::Mipmaps::Generate`]
pub struct MipGenerator {
    shader: ComputeShader,
}

impl MipGenerator {
    pub fn new(device: &mut GfxDevice) -> Self {
        Self {
            shader: ComputeShader::load(device, "Mip Downsample", &ShaderSource::Wgsl(DOWNSAMPLE_SHADER.into())),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.shader.is_valid()
    }

    /// Downsample level by level, reading one single-mip view and writing the next.
    /// Returns `false` when the texture has no per-level views or the shader failed to load.
    pub fn generate(&mut self, device: &mut GfxDevice, texture: &Texture2D) -> bool {
        let views = texture.mip_views();
        if views.len() < 2 || !self.shader.is_valid() {
            return false;
        }

        for level in 1..views.len() {
            let width = (texture.width() >> level).max(1);
            let height = (texture.height() >> level).max(1);

            self.shader.set_texture_view("source_mip", views[level - 1]);
            self.shader.set_storage_texture("destination_mip", views[level]);
            self.shader.dispatch(
                device,
                width.div_ceil(WORKGROUP_SIZE),
                height.div_ceil(WORKGROUP_SIZE),
                1,
            );
        }
        self.shader.clear_bindings();

        log::trace!("Generated {} mips for '{}'", views.len(), texture.path());
        true
    }

    pub fn destroy(&mut self, device: &mut GfxDevice) {
        self.shader.destroy(device);
    }
}

/// CPU version of [`DOWNSAMPLE_SHADER`], run by the headless backend
pub fn downsample_kernel(ctx: &mut KernelContext, groups: [u32; 3]) {
    let Some((source, destination)) = ctx.texture_pair_mut((0, 0), (0, 1)) else {
        log::warn!("downsample: source or destination mip not bound");
        return;
    };
    if source.width == 0 || source.height == 0 {
        return;
    }

    let width = destination.width.min(groups[0] * WORKGROUP_SIZE);
    let height = destination.height.min(groups[1] * WORKGROUP_SIZE);
    for y in 0..height {
        for x in 0..width {
            let mut sum = [0u32; 4];
            for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                let sx = (x * 2 + dx).min(source.width - 1);
                let sy = (y * 2 + dy).min(source.height - 1);
                let texel = source.load_rgba8(sx, sy);
                for (channel, value) in sum.iter_mut().zip(texel) {
                    *channel += value as u32;
                }
            }
            destination.store_rgba8(x, y, sum.map(|channel| ((channel + 2) / 4) as u8));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{TextureData, TextureParams};

    #[test]
    fn two_by_two_averages_into_one_texel() {
        let mut device = GfxDevice::headless(4, 4).unwrap();
        let data = TextureData::from_rgba(
            2,
            2,
            vec![
                0, 40, 200, 255, //
                100, 40, 0, 255, //
                0, 40, 0, 255, //
                100, 80, 0, 255,
            ],
        );
        let texture =
            Texture2D::from_data(&mut device, "quad", &data, TextureParams::default().with_mipmaps()).unwrap();

        let mut generator = MipGenerator::new(&mut device);
        assert!(generator.is_valid());
        assert!(generator.generate(&mut device, &texture));
        device.submit();

        let mip = device.backend_mut().read_texture(texture.texture(), 1).unwrap();
        assert_eq!(mip, vec![50, 50, 50, 255]);
    }

    #[test]
    fn single_level_texture_is_skipped() {
        let mut device = GfxDevice::headless(4, 4).unwrap();
        let data = TextureData::checkerboard(8, [255; 4], [0; 4]);
        let texture = Texture2D::from_data(&mut device, "flat", &data, TextureParams::default()).unwrap();
        let mut generator = MipGenerator::new(&mut device);
        assert!(!generator.generate(&mut device, &texture));
    }

    #[test]
    fn odd_sizes_clamp_to_the_edge() {
        let mut ctx = KernelContext::default();
        let source = crate::backend::headless::KernelTexture {
            width: 3,
            height: 1,
            format: crate::backend::types::TextureFormat::Rgba8Unorm,
            data: vec![0, 0, 0, 0, 8, 8, 8, 8, 100, 100, 100, 100],
        };
        let destination = crate::backend::headless::KernelTexture {
            width: 1,
            height: 1,
            format: crate::backend::types::TextureFormat::Rgba8Unorm,
            data: vec![0; 4],
        };
        ctx.insert_texture(0, 0, source);
        ctx.insert_texture(0, 1, destination);
        downsample_kernel(&mut ctx, [1, 1, 1]);
        assert_eq!(ctx.texture(0, 1).unwrap().data, vec![4, 4, 4, 4]);
    }
}
