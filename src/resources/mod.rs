//! Resource management
//!
//! Textures, render targets, vertex buffers and materials, plus the texture
//! cache and the DDS container parser.

pub mod dds;
mod file;
mod material;
mod render_texture;
mod texture;
mod texture_cache;
mod vertex_buffer;

pub use dds::{DdsError, DdsImage};
pub use file::*;
pub use material::*;
pub use render_texture::*;
pub use texture::*;
pub use texture_cache::*;
pub use vertex_buffer::*;

use crate::backend::traits::BackendError;
use crate::backend::types::TextureFormat;
use thiserror::Error;

/// Texture loading and creation errors
#[derive(Error, Debug)]
pub enum TextureError {
    #[error("Invalid texture dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("Texture data is {actual} bytes, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("File '{0}' was not loaded")]
    NotLoaded(String),
    #[error("Unsupported texture extension '{0}'")]
    UnsupportedExtension(String),
    #[error("Format {0:?} is not supported here")]
    UnsupportedFormat(TextureFormat),
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error(transparent)]
    Dds(#[from] DdsError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}
