//! Path-keyed texture cache

use super::dds;
use super::file::FileContents;
use super::texture::{CubeFace, Mipmaps, Texture2D, TextureCube, TextureData, TextureParams};
use super::TextureError;
use crate::device::GfxDevice;
use crate::pipeline::MipGenerator;
use std::collections::HashMap;
use std::sync::Arc;

/// Side of the checkerboard returned for textures that fail to load
pub const DEFAULT_TEXTURE_SIZE: u32 = 32;

const RASTER_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tga", "bmp", "gif", "psd", "hdr", "pic"];

/// Decoded textures keyed by path.
///
/// Loading a path twice returns the same instance, whatever parameters the
/// second call passes. Entries live until [`TextureCache::destroy_textures`].
pub struct TextureCache {
    default_texture: Arc<Texture2D>,
    textures: HashMap<String, Arc<Texture2D>>,
    cubes: HashMap<String, Arc<TextureCube>>,
    /// Instances replaced by `reload` that callers may still reference
    retired: Vec<Arc<Texture2D>>,
    mip_generator: MipGenerator,
}

impl TextureCache {
    /// Create the cache and its default texture
    pub fn new(device: &mut GfxDevice) -> Result<Self, TextureError> {
        let data = TextureData::checkerboard(DEFAULT_TEXTURE_SIZE, [255, 0, 255, 255], [32, 32, 32, 255]);
        let default_texture = Texture2D::from_data(device, "default", &data, TextureParams::default())?;

        Ok(Self {
            default_texture: Arc::new(default_texture),
            textures: HashMap::new(),
            cubes: HashMap::new(),
            retired: Vec::new(),
            mip_generator: MipGenerator::new(device),
        })
    }

    pub fn default_texture(&self) -> Arc<Texture2D> {
        self.default_texture.clone()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.textures.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    /// Cached texture for `contents.path`, decoding it on first use.
    ///
    /// Unreadable files, unknown extensions and decode failures are logged and
    /// yield the default texture, which is not cached under the path.
    pub fn load(&mut self, device: &mut GfxDevice, contents: &FileContents, params: TextureParams) -> Arc<Texture2D> {
        if !contents.is_loaded {
            log::warn!("Texture '{}' was not loaded, using default texture", contents.path);
            return self.default_texture();
        }
        if let Some(texture) = self.textures.get(&contents.path) {
            return texture.clone();
        }

        match self.decode(device, contents, params) {
            Ok(texture) => {
                let texture = Arc::new(texture);
                self.textures.insert(contents.path.clone(), texture.clone());
                texture
            }
            Err(e) => {
                log::error!("Failed to load texture '{}': {}", contents.path, e);
                self.default_texture()
            }
        }
    }

    /// Re-decode an already cached path with its original parameters and
    /// replace the cached instance. Returns `None` when the path is not cached
    /// or the new contents fail to decode, in which case the old instance stays.
    pub fn reload(&mut self, device: &mut GfxDevice, contents: &FileContents) -> Option<Arc<Texture2D>> {
        let Some(previous) = self.textures.get(&contents.path).cloned() else {
            log::warn!("Cannot reload '{}': not in the texture cache", contents.path);
            return None;
        };
        if !contents.is_loaded {
            log::warn!("Cannot reload '{}': file was not loaded", contents.path);
            return None;
        }

        match self.decode(device, contents, previous.params()) {
            Ok(texture) => {
                let texture = Arc::new(texture);
                self.textures.insert(contents.path.clone(), texture.clone());
                self.retired.push(previous);
                log::info!("Reloaded texture '{}'", contents.path);
                Some(texture)
            }
            Err(e) => {
                log::error!("Failed to reload texture '{}': {}", contents.path, e);
                None
            }
        }
    }

    /// Cube map from six files in +X, -X, +Y, -Y, +Z, -Z order, cached under the joined paths
    pub fn load_cube(
        &mut self,
        device: &mut GfxDevice,
        faces: &[FileContents; 6],
        params: TextureParams,
    ) -> Result<Arc<TextureCube>, TextureError> {
        let key = faces.iter().map(|face| face.path.as_str()).collect::<Vec<_>>().join("|");
        if let Some(cube) = self.cubes.get(&key) {
            return Ok(cube.clone());
        }

        let cube = if faces.iter().all(|face| face.extension().as_deref() == Some("dds")) {
            let images = faces
                .iter()
                .map(|face| dds::load(face, 0))
                .collect::<Result<Vec<_>, _>>()?;
            let faces = [0, 1, 2, 3, 4, 5].map(|i| CubeFace::Dds(&images[i]));
            TextureCube::from_faces(device, &key, &faces, params)?
        } else {
            let mut decoded = Vec::with_capacity(6);
            for face in faces {
                if !face.is_loaded {
                    return Err(TextureError::NotLoaded(face.path.clone()));
                }
                decoded.push(TextureData::from_bytes(&face.data)?);
            }
            let faces = [0, 1, 2, 3, 4, 5].map(|i| CubeFace::Rgba(&decoded[i]));
            TextureCube::from_faces(device, &key, &faces, params)?
        };

        let cube = Arc::new(cube);
        self.cubes.insert(key, cube.clone());
        Ok(cube)
    }

    fn decode(
        &mut self,
        device: &mut GfxDevice,
        contents: &FileContents,
        params: TextureParams,
    ) -> Result<Texture2D, TextureError> {
        let extension = contents.extension().unwrap_or_default();

        if extension == "dds" {
            let image = dds::load(contents, 0)?;
            return Texture2D::from_dds(device, &contents.path, &image, params);
        }
        if !RASTER_EXTENSIONS.contains(&extension.as_str()) {
            return Err(TextureError::UnsupportedExtension(extension));
        }

        let data = TextureData::from_bytes(&contents.data)?;
        let texture = Texture2D::from_data(device, &contents.path, &data, params)?;
        if params.mipmaps == Mipmaps::Generate && !self.mip_generator.generate(device, &texture) {
            log::warn!("Mip generation failed for '{}', only level 0 is filled", contents.path);
        }
        Ok(texture)
    }

    /// GPU bytes per cached path, sorted by path
    pub fn memory_usage(&self) -> Vec<(String, u64)> {
        let mut usage: Vec<(String, u64)> = self
            .textures
            .iter()
            .map(|(path, texture)| (path.clone(), texture.memory_bytes()))
            .chain(self.cubes.iter().map(|(path, cube)| (path.clone(), cube.memory_bytes())))
            .collect();
        usage.sort();
        usage
    }

    pub fn total_memory_usage(&self) -> u64 {
        self.memory_usage().iter().map(|(_, bytes)| bytes).sum()
    }

    pub fn log_memory_usage(&self) {
        let usage = self.memory_usage();
        log::info!(
            "Texture memory: {} KiB in {} textures",
            usage.iter().map(|(_, bytes)| bytes).sum::<u64>() / 1024,
            usage.len()
        );
        for (path, bytes) in usage {
            log::info!("  {}: {} KiB", path, bytes / 1024);
        }
    }

    /// Release every texture, including the default one and replaced instances
    pub fn destroy_textures(mut self, device: &mut GfxDevice) {
        for (_, texture) in self.textures.drain() {
            texture.destroy(device);
        }
        for (_, cube) in self.cubes.drain() {
            cube.destroy(device);
        }
        for texture in self.retired.drain(..) {
            texture.destroy(device);
        }
        self.default_texture.destroy(device);
        self.mip_generator.destroy(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = image::RgbaImage::from_pixel(width, height, image::Rgba([10, 20, 30, 255]));
        let mut bytes = std::io::Cursor::new(Vec::new());
        image
            .write_to(&mut bytes, image::ImageOutputFormat::Png)
            .unwrap();
        bytes.into_inner()
    }

    #[test]
    fn unknown_extension_falls_back_uncached() {
        let mut device = GfxDevice::headless(4, 4).unwrap();
        let mut cache = TextureCache::new(&mut device).unwrap();
        let contents = FileContents::from_bytes("notes.txt", b"hello".to_vec());
        let texture = cache.load(&mut device, &contents, TextureParams::default());
        assert!(Arc::ptr_eq(&texture, &cache.default_texture()));
        assert!(!cache.contains("notes.txt"));
    }

    #[test]
    fn reload_replaces_cached_instance() {
        let mut device = GfxDevice::headless(4, 4).unwrap();
        let mut cache = TextureCache::new(&mut device).unwrap();
        let first = cache.load(
            &mut device,
            &FileContents::from_bytes("a.png", png_bytes(4, 4)),
            TextureParams::default().with_mipmaps(),
        );
        let second = cache
            .reload(&mut device, &FileContents::from_bytes("a.png", png_bytes(8, 8)))
            .unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.width(), 8);
        assert_eq!(second.mip_count(), 4);
        assert!(Arc::ptr_eq(
            &second,
            &cache.load(&mut device, &FileContents::from_bytes("a.png", Vec::new()), TextureParams::default())
        ));
        assert!(cache.reload(&mut device, &FileContents::not_loaded("b.png")).is_none());
    }

    #[test]
    fn memory_usage_counts_every_level() {
        let mut device = GfxDevice::headless(4, 4).unwrap();
        let mut cache = TextureCache::new(&mut device).unwrap();
        cache.load(&mut device, &FileContents::from_bytes("b.png", png_bytes(4, 4)), TextureParams::default());
        cache.load(
            &mut device,
            &FileContents::from_bytes("a.png", png_bytes(4, 4)),
            TextureParams::default().with_mipmaps(),
        );

        assert_eq!(
            cache.memory_usage(),
            vec![("a.png".to_string(), (16 + 4 + 1) * 4), ("b.png".to_string(), 16 * 4)]
        );
        assert_eq!(cache.total_memory_usage(), 148);
    }
}
