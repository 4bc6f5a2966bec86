//! Off-screen render targets

use super::texture::MAX_TEXTURE_DIMENSION;
use super::TextureError;
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::device::GfxDevice;

/// Format of the optional depth attachment
pub const RENDER_TEXTURE_DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

/// Colour target with an optional depth attachment, usable as a draw target and
/// as a shader input.
#[derive(Debug)]
pub struct RenderTexture {
    label: String,
    width: u32,
    height: u32,
    format: TextureFormat,
    color: TextureHandle,
    color_view: TextureViewHandle,
    sampler: SamplerHandle,
    depth: Option<(TextureHandle, TextureViewHandle)>,
}

impl RenderTexture {
    /// Create a `width` x `height` target. Invalid dimensions are logged and returned as `Err`.
    pub fn new(
        device: &mut GfxDevice,
        label: &str,
        width: u32,
        height: u32,
        format: TextureFormat,
        with_depth: bool,
    ) -> Result<Self, TextureError> {
        Self::create(device.backend_mut(), label, width, height, format, with_depth)
    }

    pub(crate) fn create(
        backend: &mut dyn GraphicsBackend,
        label: &str,
        width: u32,
        height: u32,
        format: TextureFormat,
        with_depth: bool,
    ) -> Result<Self, TextureError> {
        if width == 0 || height == 0 || width > MAX_TEXTURE_DIMENSION || height > MAX_TEXTURE_DIMENSION {
            log::error!("Render texture '{}' has invalid dimensions {}x{}", label, width, height);
            return Err(TextureError::InvalidDimensions { width, height });
        }
        if format.is_depth() || format.is_compressed() {
            log::error!("Render texture '{}' cannot use {:?} as colour format", label, format);
            return Err(TextureError::UnsupportedFormat(format));
        }

        let color = backend.create_texture(&TextureDescriptor {
            label: Some(label.to_string()),
            width,
            height,
            format,
            usage: TextureUsage::RENDER_ATTACHMENT
                | TextureUsage::TEXTURE_BINDING
                | TextureUsage::COPY_SRC
                | TextureUsage::COPY_DST,
            ..Default::default()
        })?;
        let color_view = backend.create_texture_view(color, &TextureViewDescriptor::default())?;
        let sampler = backend.create_sampler(&SamplerDescriptor {
            label: Some(format!("{} Sampler", label)),
            mag_filter: FilterMode::Nearest,
            min_filter: FilterMode::Nearest,
            mipmap_filter: FilterMode::Nearest,
            ..Default::default()
        })?;

        let depth = if with_depth {
            let texture = backend.create_texture(&TextureDescriptor {
                label: Some(format!("{} Depth", label)),
                width,
                height,
                format: RENDER_TEXTURE_DEPTH_FORMAT,
                usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_SRC,
                ..Default::default()
            })?;
            let view = backend.create_texture_view(texture, &TextureViewDescriptor::default())?;
            Some((texture, view))
        } else {
            None
        };

        log::trace!("Created render texture '{}' {}x{} {:?}", label, width, height, format);
        Ok(Self {
            label: label.to_string(),
            width,
            height,
            format,
            color,
            color_view,
            sampler,
            depth,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn color_texture(&self) -> TextureHandle {
        self.color
    }

    pub fn color_view(&self) -> TextureViewHandle {
        self.color_view
    }

    pub fn sampler(&self) -> SamplerHandle {
        self.sampler
    }

    pub fn depth_view(&self) -> Option<TextureViewHandle> {
        self.depth.map(|(_, view)| view)
    }

    pub fn depth_format(&self) -> Option<TextureFormat> {
        self.depth.map(|_| RENDER_TEXTURE_DEPTH_FORMAT)
    }

    /// Replace the colour contents, e.g. to feed a compute pass from the CPU
    pub fn write_pixels(&self, device: &mut GfxDevice, data: &[u8]) {
        device
            .backend_mut()
            .write_texture(self.color, 0, 0, data, self.width, self.height);
    }

    /// Tightly packed colour contents. Flushes pending work.
    pub fn read_pixels(&self, device: &mut GfxDevice) -> BackendResult<Vec<u8>> {
        device.submit();
        device.backend_mut().read_texture(self.color, 0)
    }

    pub fn destroy(&mut self, device: &mut GfxDevice) {
        self.destroy_with(device.backend_mut());
    }

    pub(crate) fn destroy_with(&mut self, backend: &mut dyn GraphicsBackend) {
        backend.destroy_texture_view(self.color_view);
        backend.destroy_sampler(self.sampler);
        backend.destroy_texture(self.color);
        if let Some((texture, view)) = self.depth.take() {
            backend.destroy_texture_view(view);
            backend.destroy_texture(texture);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_dimensions_are_rejected() {
        let mut device = GfxDevice::headless(4, 4).unwrap();
        let result = RenderTexture::new(&mut device, "zero", 0, 16, TextureFormat::Rgba8Unorm, false);
        assert!(matches!(result, Err(TextureError::InvalidDimensions { width: 0, height: 16 })));
        let result = RenderTexture::new(&mut device, "depth", 4, 4, TextureFormat::Depth32Float, false);
        assert!(result.is_err());
    }

    #[test]
    fn pixels_round_trip_through_write_and_read() {
        let mut device = GfxDevice::headless(4, 4).unwrap();
        let mut target = RenderTexture::new(&mut device, "target", 2, 1, TextureFormat::Rgba32Float, true).unwrap();
        assert_eq!(target.depth_format(), Some(TextureFormat::Depth32Float));

        let texels: [f32; 8] = [1.5, 0.0, 0.0, 0.0, 7.0, 0.0, 0.0, 0.0];
        target.write_pixels(&mut device, bytemuck::cast_slice(&texels));
        let read = target.read_pixels(&mut device).unwrap();
        assert_eq!(read, bytemuck::cast_slice::<f32, u8>(&texels));

        target.destroy(&mut device);
        assert!(target.depth_view().is_none());
    }
}
