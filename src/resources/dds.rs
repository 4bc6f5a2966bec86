//! DirectDraw Surface container parsing
//!
//! Only the container is parsed. BC1-BC3 payloads are handed to the GPU as-is.

use super::file::FileContents;
use super::texture::{mipmap_count, MAX_TEXTURE_DIMENSION};
use crate::backend::types::TextureFormat;
use thiserror::Error;

const MAGIC: &[u8; 4] = b"DDS ";
const HEADER_SIZE: usize = 124;
const DATA_START: usize = 4 + HEADER_SIZE;

const DDSD_MIPMAPCOUNT: u32 = 0x0002_0000;
const DDPF_ALPHAPIXELS: u32 = 0x0000_0001;
const DDPF_FOURCC: u32 = 0x0000_0004;
const DDSCAPS2_CUBEMAP: u32 = 0x0000_0200;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DdsError {
    #[error("DDS file not found: {0}")]
    FileNotFound(String),
    #[error("Unknown DDS pixel format")]
    UnknownPixelFormat,
    #[error("DDS data is truncated")]
    Truncated,
    #[error("Cube map face {0} requested from a DDS that has no such face")]
    InvalidFace(u32),
    #[error("Invalid DDS dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
}

/// Parsed DDS payload for one 2D image or one cube map face
#[derive(Debug, Clone)]
pub struct DdsImage {
    pub width: u32,
    pub height: u32,
    /// No alpha channel is present
    pub opaque: bool,
    pub format: TextureFormat,
    /// Every mip level, largest first
    pub image_data: Vec<u8>,
    /// Start of each mip level in `image_data`
    pub data_offsets: Vec<usize>,
}

impl DdsImage {
    pub fn mip_count(&self) -> u32 {
        self.data_offsets.len() as u32
    }

    /// Bytes of mip `level`
    pub fn mip_data(&self, level: u32) -> &[u8] {
        let level = level as usize;
        let start = self.data_offsets.get(level).copied().unwrap_or(self.image_data.len());
        let end = self
            .data_offsets
            .get(level + 1)
            .copied()
            .unwrap_or(self.image_data.len());
        &self.image_data[start..end]
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
}

/// Parse `contents`. `cube_map_face` is `0` for 2D textures and `1..=6` for a cube face.
pub fn load(contents: &FileContents, cube_map_face: u32) -> Result<DdsImage, DdsError> {
    if !contents.is_loaded {
        return Err(DdsError::FileNotFound(contents.path.clone()));
    }
    parse(&contents.data, cube_map_face)
}

pub fn parse(bytes: &[u8], cube_map_face: u32) -> Result<DdsImage, DdsError> {
    if bytes.len() < DATA_START {
        return Err(DdsError::Truncated);
    }
    if &bytes[0..4] != MAGIC {
        return Err(DdsError::UnknownPixelFormat);
    }

    let flags = read_u32(bytes, 8);
    let height = read_u32(bytes, 12);
    let width = read_u32(bytes, 16);
    let mip_map_count = read_u32(bytes, 28);
    let pixel_flags = read_u32(bytes, 80);
    let four_cc = &bytes[84..88];
    let caps2 = read_u32(bytes, 112);

    if pixel_flags & DDPF_FOURCC == 0 {
        return Err(DdsError::UnknownPixelFormat);
    }
    let format = match four_cc {
        b"DXT1" => TextureFormat::Bc1RgbaUnorm,
        b"DXT3" => TextureFormat::Bc2RgbaUnorm,
        b"DXT5" => TextureFormat::Bc3RgbaUnorm,
        _ => return Err(DdsError::UnknownPixelFormat),
    };
    let opaque = format == TextureFormat::Bc1RgbaUnorm && pixel_flags & DDPF_ALPHAPIXELS == 0;

    if width == 0 || height == 0 || width > MAX_TEXTURE_DIMENSION || height > MAX_TEXTURE_DIMENSION {
        return Err(DdsError::InvalidDimensions { width, height });
    }

    // Files may claim more levels than the chain has
    let mip_count = if flags & DDSD_MIPMAPCOUNT != 0 {
        mip_map_count.clamp(1, mipmap_count(width, height))
    } else {
        1
    };

    let mut data_offsets = Vec::with_capacity(mip_count as usize);
    let mut face_size = 0usize;
    for level in 0..mip_count {
        data_offsets.push(face_size);
        face_size += format.image_size((width >> level).max(1), (height >> level).max(1)) as usize;
    }

    let is_cube = caps2 & DDSCAPS2_CUBEMAP != 0;
    let face_index = match (cube_map_face, is_cube) {
        (0, _) => 0,
        (face @ 1..=6, true) => face as usize - 1,
        (face, _) => return Err(DdsError::InvalidFace(face)),
    };

    let start = face_index
        .checked_mul(face_size)
        .and_then(|offset| offset.checked_add(DATA_START))
        .ok_or(DdsError::Truncated)?;
    let end = start.checked_add(face_size).ok_or(DdsError::Truncated)?;
    if bytes.len() < end {
        return Err(DdsError::Truncated);
    }

    Ok(DdsImage {
        width,
        height,
        opaque,
        format,
        image_data: bytes[start..end].to_vec(),
        data_offsets,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal DDS with `mips` levels of zeroed blocks, `faces` faces
    pub(crate) fn build_dds(four_cc: &[u8; 4], width: u32, height: u32, mips: u32, faces: u32) -> Vec<u8> {
        let mut bytes = vec![0u8; DATA_START];
        bytes[0..4].copy_from_slice(MAGIC);
        bytes[4..8].copy_from_slice(&(HEADER_SIZE as u32).to_le_bytes());
        bytes[8..12].copy_from_slice(&DDSD_MIPMAPCOUNT.to_le_bytes());
        bytes[12..16].copy_from_slice(&height.to_le_bytes());
        bytes[16..20].copy_from_slice(&width.to_le_bytes());
        bytes[28..32].copy_from_slice(&mips.to_le_bytes());
        bytes[76..80].copy_from_slice(&32u32.to_le_bytes());
        bytes[80..84].copy_from_slice(&DDPF_FOURCC.to_le_bytes());
        bytes[84..88].copy_from_slice(four_cc);
        if faces == 6 {
            bytes[112..116].copy_from_slice(&DDSCAPS2_CUBEMAP.to_le_bytes());
        }

        let block = if four_cc == b"DXT1" { 8 } else { 16 };
        for face in 0..faces {
            for level in 0..mips {
                let w = (width >> level).max(1).div_ceil(4) as usize;
                let h = (height >> level).max(1).div_ceil(4) as usize;
                bytes.extend(std::iter::repeat(face as u8).take(w * h * block));
            }
        }
        bytes
    }

    #[test]
    fn dxt1_mip_offsets() {
        let image = parse(&build_dds(b"DXT1", 16, 8, 5, 1), 0).unwrap();
        assert_eq!(image.format, TextureFormat::Bc1RgbaUnorm);
        assert_eq!((image.width, image.height), (16, 8));
        assert!(image.opaque);
        // 16x8 -> 4x2 blocks, 8x4 -> 2x1, 4x2 -> 1x1, 2x1 -> 1x1, 1x1 -> 1x1
        assert_eq!(image.data_offsets, vec![0, 64, 80, 88, 96]);
        assert_eq!(image.image_data.len(), 104);
        assert_eq!(image.mip_data(1).len(), 16);
    }

    #[test]
    fn dxt5_is_bc3() {
        let image = parse(&build_dds(b"DXT5", 8, 8, 1, 1), 0).unwrap();
        assert_eq!(image.format, TextureFormat::Bc3RgbaUnorm);
        assert!(!image.opaque);
        assert_eq!(image.mip_count(), 1);
    }

    #[test]
    fn cube_face_selection() {
        let bytes = build_dds(b"DXT3", 4, 4, 1, 6);
        let face = parse(&bytes, 3).unwrap();
        assert!(face.image_data.iter().all(|b| *b == 2));
        assert_eq!(parse(&bytes, 7).unwrap_err(), DdsError::InvalidFace(7));

        let flat = build_dds(b"DXT3", 4, 4, 1, 1);
        assert_eq!(parse(&flat, 1).unwrap_err(), DdsError::InvalidFace(1));
    }

    #[test]
    fn rejects_unknown_and_truncated() {
        assert_eq!(
            parse(&build_dds(b"ATI2", 4, 4, 1, 1), 0).unwrap_err(),
            DdsError::UnknownPixelFormat
        );
        let mut short = build_dds(b"DXT1", 8, 8, 1, 1);
        short.truncate(short.len() - 1);
        assert_eq!(parse(&short, 0).unwrap_err(), DdsError::Truncated);

        let missing = FileContents::not_loaded("missing.dds");
        assert!(matches!(load(&missing, 0), Err(DdsError::FileNotFound(_))));
    }

    #[test]
    fn mip_count_is_clamped_to_chain_length() {
        let mut bytes = build_dds(b"DXT1", 16, 16, 5, 1);
        bytes[28..32].copy_from_slice(&40u32.to_le_bytes());
        let image = parse(&bytes, 0).unwrap();
        assert_eq!(image.mip_count(), 5);
        assert_eq!(image.image_data.len(), 128 + 32 + 8 + 8 + 8);

        let mut huge = build_dds(b"DXT1", 16, 16, 1, 1);
        huge[28..32].copy_from_slice(&u32::MAX.to_le_bytes());
        assert_eq!(parse(&huge, 0).unwrap_err(), DdsError::Truncated);
    }

    #[test]
    fn rejects_out_of_range_dimensions() {
        let mut wide = build_dds(b"DXT1", 4, 4, 1, 1);
        wide[16..20].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(parse(&wide, 0), Err(DdsError::InvalidDimensions { .. })));

        let mut empty = build_dds(b"DXT1", 4, 4, 1, 1);
        empty[12..16].copy_from_slice(&0u32.to_le_bytes());
        assert!(matches!(parse(&empty, 0), Err(DdsError::InvalidDimensions { .. })));
    }
}
