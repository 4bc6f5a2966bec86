//! 2D and cube textures

use super::dds::DdsImage;
use super::TextureError;
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::device::GfxDevice;
use image::{DynamicImage, GenericImageView};

/// Largest width or height accepted for any texture
pub const MAX_TEXTURE_DIMENSION: u32 = 16384;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureWrap {
    #[default]
    Repeat,
    Clamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureFilter {
    Nearest,
    #[default]
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Mipmaps {
    #[default]
    None,
    Generate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColorSpace {
    Linear,
    #[default]
    Srgb,
}

/// Sampling and storage parameters chosen at load time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureParams {
    pub wrap: TextureWrap,
    pub filter: TextureFilter,
    pub mipmaps: Mipmaps,
    pub color_space: ColorSpace,
    /// `1.0` disables anisotropic filtering
    pub anisotropy: f32,
}

impl Default for TextureParams {
    fn default() -> Self {
        Self {
            wrap: TextureWrap::default(),
            filter: TextureFilter::default(),
            mipmaps: Mipmaps::default(),
            color_space: ColorSpace::default(),
            anisotropy: 1.0,
        }
    }
}

impl TextureParams {
    pub fn with_mipmaps(mut self) -> Self {
        self.mipmaps = Mipmaps::Generate;
        self
    }

    fn sampler_descriptor(&self, label: &str) -> SamplerDescriptor {
        let address = match self.wrap {
            TextureWrap::Repeat => AddressMode::Repeat,
            TextureWrap::Clamp => AddressMode::ClampToEdge,
        };
        let filter = match self.filter {
            TextureFilter::Nearest => FilterMode::Nearest,
            TextureFilter::Linear => FilterMode::Linear,
        };
        // Anisotropy requires linear filtering everywhere
        let anisotropy_clamp = match self.filter {
            TextureFilter::Linear => self.anisotropy.round().clamp(1.0, 16.0) as u16,
            TextureFilter::Nearest => 1,
        };

        SamplerDescriptor {
            label: Some(format!("{} Sampler", label)),
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter: filter,
            address_mode_u: address,
            address_mode_v: address,
            address_mode_w: address,
            anisotropy_clamp,
        }
    }

    /// Format of the sampled view for 8-bit colour data
    fn view_format(&self) -> TextureFormat {
        match self.color_space {
            ColorSpace::Srgb => TextureFormat::Rgba8UnormSrgb,
            ColorSpace::Linear => TextureFormat::Rgba8Unorm,
        }
    }
}

/// `floor(log2(max(width, height))) + 1`
pub fn mipmap_count(width: u32, height: u32) -> u32 {
    u32::BITS - width.max(height).max(1).leading_zeros()
}

/// Decoded RGBA8 pixels
#[derive(Debug, Clone)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    /// Every alpha value is 255
    pub opaque: bool,
}

impl TextureData {
    /// Decode any raster format the `image` crate understands
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TextureError> {
        let img = image::load_from_memory(bytes)?;
        Ok(Self::from_image(img))
    }

    fn from_image(img: DynamicImage) -> Self {
        let (width, height) = img.dimensions();
        let data = img.to_rgba8().into_raw();
        Self::from_rgba(width, height, data)
    }

    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Self {
        let opaque = data.chunks_exact(4).all(|texel| texel[3] == 255);
        Self {
            width,
            height,
            data,
            opaque,
        }
    }

    /// Checkerboard of 8x8 pixel cells
    pub fn checkerboard(size: u32, color1: [u8; 4], color2: [u8; 4]) -> Self {
        let mut data = Vec::with_capacity((size * size * 4) as usize);

        for y in 0..size {
            for x in 0..size {
                let is_even = ((x / 8) + (y / 8)) % 2 == 0;
                let color = if is_even { color1 } else { color2 };
                data.extend_from_slice(&color);
            }
        }

        Self::from_rgba(size, size, data)
    }
}

fn check_dimensions(width: u32, height: u32) -> Result<(), TextureError> {
    if width == 0 || height == 0 || width > MAX_TEXTURE_DIMENSION || height > MAX_TEXTURE_DIMENSION {
        return Err(TextureError::InvalidDimensions { width, height });
    }
    Ok(())
}

/// Sampled 2D texture with its sampler and, when mips are generated, one view per level
#[derive(Debug)]
pub struct Texture2D {
    path: String,
    width: u32,
    height: u32,
    format: TextureFormat,
    mip_count: u32,
    params: TextureParams,
    opaque: bool,
    texture: TextureHandle,
    view: TextureViewHandle,
    sampler: SamplerHandle,
    mip_views: Vec<TextureViewHandle>,
}

impl Texture2D {
    /// Upload RGBA8 pixels. With [`Mipmaps::Generate`] the texture gets a full
    /// chain of storage-capable levels; filling them is up to
    /// [`crate::pipeline::MipGenerator`].
    pub fn from_data(
        device: &mut GfxDevice,
        path: &str,
        data: &TextureData,
        params: TextureParams,
    ) -> Result<Self, TextureError> {
        check_dimensions(data.width, data.height)?;
        let expected = TextureFormat::Rgba8Unorm.image_size(data.width, data.height) as usize;
        if data.data.len() != expected {
            return Err(TextureError::SizeMismatch {
                expected,
                actual: data.data.len(),
            });
        }

        let generate = params.mipmaps == Mipmaps::Generate;
        let mip_count = if generate {
            mipmap_count(data.width, data.height)
        } else {
            1
        };
        let view_format = params.view_format();

        let mut usage = TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST | TextureUsage::COPY_SRC;
        if generate {
            usage = usage | TextureUsage::STORAGE_BINDING;
        }

        let backend = device.backend_mut();
        let texture = backend.create_texture(&TextureDescriptor {
            label: Some(path.to_string()),
            width: data.width,
            height: data.height,
            mip_levels: mip_count,
            format: TextureFormat::Rgba8Unorm,
            usage,
            view_formats: if view_format != TextureFormat::Rgba8Unorm {
                vec![view_format]
            } else {
                Vec::new()
            },
            ..Default::default()
        })?;
        backend.write_texture(texture, 0, 0, &data.data, data.width, data.height);

        let view = backend.create_texture_view(
            texture,
            &TextureViewDescriptor {
                label: Some(path.to_string()),
                format: Some(view_format),
                ..Default::default()
            },
        )?;

        let mut mip_views = Vec::new();
        if generate {
            for level in 0..mip_count {
                mip_views.push(backend.create_texture_view(texture, &TextureViewDescriptor::single_mip(level))?);
            }
        }

        let sampler = backend.create_sampler(&params.sampler_descriptor(path))?;

        Ok(Self {
            path: path.to_string(),
            width: data.width,
            height: data.height,
            format: view_format,
            mip_count,
            params,
            opaque: data.opaque,
            texture,
            view,
            sampler,
            mip_views,
        })
    }

    /// Upload a block-compressed DDS image with the mips it carries
    pub fn from_dds(
        device: &mut GfxDevice,
        path: &str,
        image: &DdsImage,
        params: TextureParams,
    ) -> Result<Self, TextureError> {
        check_dimensions(image.width, image.height)?;
        let backend = device.backend_mut();
        if !backend.supports_format(image.format) {
            return Err(TextureError::UnsupportedFormat(image.format));
        }

        if params.mipmaps == Mipmaps::Generate && image.mip_count() == 1 {
            log::debug!("'{}': compressed textures keep the mips stored in the file", path);
        }

        let mip_levels = image.mip_count().clamp(1, mipmap_count(image.width, image.height));
        let texture = backend.create_texture(&TextureDescriptor {
            label: Some(path.to_string()),
            width: image.width,
            height: image.height,
            mip_levels,
            format: image.format,
            ..Default::default()
        })?;
        for level in 0..mip_levels {
            let width = (image.width >> level).max(1);
            let height = (image.height >> level).max(1);
            backend.write_texture(texture, level, 0, image.mip_data(level), width, height);
        }

        let view = backend.create_texture_view(
            texture,
            &TextureViewDescriptor {
                label: Some(path.to_string()),
                ..Default::default()
            },
        )?;
        let sampler = backend.create_sampler(&params.sampler_descriptor(path))?;

        Ok(Self {
            path: path.to_string(),
            width: image.width,
            height: image.height,
            format: image.format,
            mip_count: mip_levels,
            params,
            opaque: image.opaque,
            texture,
            view,
            sampler,
            mip_views: Vec::new(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Format of the sampled view
    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn mip_count(&self) -> u32 {
        self.mip_count
    }

    pub fn params(&self) -> TextureParams {
        self.params
    }

    pub fn is_opaque(&self) -> bool {
        self.opaque
    }

    pub fn texture(&self) -> TextureHandle {
        self.texture
    }

    pub fn view(&self) -> TextureViewHandle {
        self.view
    }

    pub fn sampler(&self) -> SamplerHandle {
        self.sampler
    }

    /// Single-level views, empty unless mips were requested
    pub fn mip_views(&self) -> &[TextureViewHandle] {
        &self.mip_views
    }

    /// GPU bytes of every level
    pub fn memory_bytes(&self) -> u64 {
        (0..self.mip_count)
            .map(|level| {
                self.format
                    .image_size((self.width >> level).max(1), (self.height >> level).max(1))
            })
            .sum()
    }

    /// Release the GPU objects. Handles are generation-checked, so releasing twice is harmless.
    pub fn destroy(&self, device: &mut GfxDevice) {
        let backend = device.backend_mut();
        for view in &self.mip_views {
            backend.destroy_texture_view(*view);
        }
        backend.destroy_texture_view(self.view);
        backend.destroy_sampler(self.sampler);
        backend.destroy_texture(self.texture);
    }
}

/// Six-faced cube texture. Face order is +X, -X, +Y, -Y, +Z, -Z.
#[derive(Debug)]
pub struct TextureCube {
    width: u32,
    height: u32,
    format: TextureFormat,
    params: TextureParams,
    opaque: bool,
    texture: TextureHandle,
    view: TextureViewHandle,
    sampler: SamplerHandle,
}

/// Pixels of one cube face
pub enum CubeFace<'a> {
    Rgba(&'a TextureData),
    Dds(&'a DdsImage),
}

impl CubeFace<'_> {
    fn size(&self) -> (u32, u32) {
        match self {
            CubeFace::Rgba(data) => (data.width, data.height),
            CubeFace::Dds(image) => (image.width, image.height),
        }
    }

    fn format(&self, params: &TextureParams) -> TextureFormat {
        match self {
            CubeFace::Rgba(_) => params.view_format(),
            CubeFace::Dds(image) => image.format,
        }
    }

    fn mip_count(&self) -> u32 {
        match self {
            CubeFace::Rgba(_) => 1,
            CubeFace::Dds(image) => image.mip_count(),
        }
    }

    fn opaque(&self) -> bool {
        match self {
            CubeFace::Rgba(data) => data.opaque,
            CubeFace::Dds(image) => image.opaque,
        }
    }
}

impl TextureCube {
    /// Upload six square faces of equal size and format
    pub fn from_faces(
        device: &mut GfxDevice,
        label: &str,
        faces: &[CubeFace; 6],
        params: TextureParams,
    ) -> Result<Self, TextureError> {
        let (width, height) = faces[0].size();
        check_dimensions(width, height)?;
        let format = faces[0].format(&params);
        let mip_count = faces.iter().map(CubeFace::mip_count).min().unwrap_or(1);

        for face in faces.iter() {
            if face.size() != (width, height) || width != height || face.format(&params) != format {
                let (w, h) = face.size();
                return Err(TextureError::InvalidDimensions { width: w, height: h });
            }
        }

        let backend = device.backend_mut();
        if !backend.supports_format(format) {
            return Err(TextureError::UnsupportedFormat(format));
        }

        let texture = backend.create_texture(&TextureDescriptor {
            label: Some(label.to_string()),
            width,
            height,
            mip_levels: mip_count,
            dimension: TextureDimension::Cube,
            format,
            ..Default::default()
        })?;

        for (layer, face) in faces.iter().enumerate() {
            match face {
                CubeFace::Rgba(data) => {
                    backend.write_texture(texture, 0, layer as u32, &data.data, width, height);
                }
                CubeFace::Dds(image) => {
                    for level in 0..mip_count {
                        let w = (width >> level).max(1);
                        let h = (height >> level).max(1);
                        backend.write_texture(texture, level, layer as u32, image.mip_data(level), w, h);
                    }
                }
            }
        }

        let view = backend.create_texture_view(
            texture,
            &TextureViewDescriptor {
                label: Some(label.to_string()),
                dimension: TextureDimension::Cube,
                ..Default::default()
            },
        )?;
        let sampler = backend.create_sampler(&params.sampler_descriptor(label))?;

        Ok(Self {
            width,
            height,
            format,
            params,
            opaque: faces.iter().all(CubeFace::opaque),
            texture,
            view,
            sampler,
        })
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

    pub fn params(&self) -> TextureParams {
        self.params
    }

    pub fn is_opaque(&self) -> bool {
        self.opaque
    }

    pub fn view(&self) -> TextureViewHandle {
        self.view
    }

    pub fn sampler(&self) -> SamplerHandle {
        self.sampler
    }

    pub fn memory_bytes(&self) -> u64 {
        self.format.image_size(self.width, self.height) * 6
    }

    pub fn destroy(&self, device: &mut GfxDevice) {
        let backend = device.backend_mut();
        backend.destroy_texture_view(self.view);
        backend.destroy_sampler(self.sampler);
        backend.destroy_texture(self.texture);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_counts() {
        assert_eq!(mipmap_count(1, 1), 1);
        assert_eq!(mipmap_count(2, 2), 2);
        assert_eq!(mipmap_count(256, 16), 9);
        assert_eq!(mipmap_count(300, 200), 9);
        assert_eq!(mipmap_count(0, 0), 1);
    }

    #[test]
    fn checkerboard_cells() {
        let data = TextureData::checkerboard(32, [255; 4], [0, 0, 0, 255]);
        assert_eq!(data.data.len(), 32 * 32 * 4);
        assert!(data.opaque);
        assert_eq!(&data.data[0..4], &[255; 4]);
        // Pixel (8, 0) is in the second cell
        assert_eq!(&data.data[32..36], &[0, 0, 0, 255]);
    }

    #[test]
    fn upload_with_mip_views() {
        let mut device = GfxDevice::headless(4, 4).unwrap();
        let data = TextureData::checkerboard(16, [255; 4], [0; 4]);
        let texture = Texture2D::from_data(&mut device, "checker", &data, TextureParams::default().with_mipmaps())
            .unwrap();
        assert_eq!(texture.mip_count(), 5);
        assert_eq!(texture.mip_views().len(), 5);
        assert!(!texture.is_opaque());
        assert_eq!(texture.memory_bytes(), (256 + 64 + 16 + 4 + 1) * 4);
        texture.destroy(&mut device);
        texture.destroy(&mut device);
    }

    #[test]
    fn zero_sized_texture_is_rejected() {
        let mut device = GfxDevice::headless(4, 4).unwrap();
        let data = TextureData::from_rgba(0, 4, Vec::new());
        assert!(matches!(
            Texture2D::from_data(&mut device, "empty", &data, TextureParams::default()),
            Err(TextureError::InvalidDimensions { width: 0, height: 4 })
        ));
    }
}
