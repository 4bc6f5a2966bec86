//! Texture cache integration tests.

mod common;

use common::{png_bytes, Backend, TestContext};
use forward_plus::backend::types::TextureFormat;
use forward_plus::backend::HeadlessBackend;
use forward_plus::resources::{FileContents, TextureCache, TextureParams, DEFAULT_TEXTURE_SIZE};
use forward_plus::GfxDevice;
use rstest::rstest;
use std::sync::Arc;

/// Minimal DXT1 file with a full mip chain, every block filled with `fill`
fn dxt1_bytes(width: u32, height: u32, fill: u8) -> Vec<u8> {
    let mips = forward_plus::resources::mipmap_count(width, height);
    let mut bytes = vec![0u8; 128];
    bytes[0..4].copy_from_slice(b"DDS ");
    bytes[4..8].copy_from_slice(&124u32.to_le_bytes());
    bytes[8..12].copy_from_slice(&0x2_0000u32.to_le_bytes());
    bytes[12..16].copy_from_slice(&height.to_le_bytes());
    bytes[16..20].copy_from_slice(&width.to_le_bytes());
    bytes[28..32].copy_from_slice(&mips.to_le_bytes());
    bytes[76..80].copy_from_slice(&32u32.to_le_bytes());
    bytes[80..84].copy_from_slice(&0x4u32.to_le_bytes());
    bytes[84..88].copy_from_slice(b"DXT1");
    for level in 0..mips {
        let blocks_x = (width >> level).max(1).div_ceil(4);
        let blocks_y = (height >> level).max(1).div_ceil(4);
        bytes.extend(std::iter::repeat(fill).take((blocks_x * blocks_y * 8) as usize));
    }
    bytes
}

#[rstest]
#[case::headless(Backend::Headless)]
#[case::wgpu(Backend::Wgpu)]
fn same_path_returns_same_instance(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend, 16, 16) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let mut cache = TextureCache::new(&mut ctx.device).unwrap();

    let contents = FileContents::from_bytes("textures/brick.png", png_bytes(8, 4, [200, 100, 50, 255]));
    let first = cache.load(&mut ctx.device, &contents, TextureParams::default());
    let second = cache.load(&mut ctx.device, &contents, TextureParams::default().with_mipmaps());

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!((first.width(), first.height()), (8, 4));
    assert_eq!(first.mip_count(), 1, "parameters of the first load win");
    assert!(first.is_opaque());
    assert_eq!(cache.len(), 1);

    cache.destroy_textures(&mut ctx.device);
    assert!(!ctx.device.error_check("destroy_textures"));
}

#[rstest]
#[case::headless(Backend::Headless)]
#[case::wgpu(Backend::Wgpu)]
fn missing_file_yields_default_texture(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend, 16, 16) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let mut cache = TextureCache::new(&mut ctx.device).unwrap();

    let texture = cache.load(
        &mut ctx.device,
        &FileContents::not_loaded("textures/missing.png"),
        TextureParams::default(),
    );
    assert!(Arc::ptr_eq(&texture, &cache.default_texture()));
    assert_eq!((texture.width(), texture.height()), (DEFAULT_TEXTURE_SIZE, DEFAULT_TEXTURE_SIZE));
    assert!(cache.is_empty());

    // Corrupt data falls back the same way
    let corrupt = cache.load(
        &mut ctx.device,
        &FileContents::from_bytes("textures/corrupt.png", vec![1, 2, 3]),
        TextureParams::default(),
    );
    assert!(Arc::ptr_eq(&corrupt, &cache.default_texture()));
}

#[rstest]
#[case::headless(Backend::Headless)]
#[case::wgpu(Backend::Wgpu)]
fn generated_mips_average_the_level_above(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend, 16, 16) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let mut cache = TextureCache::new(&mut ctx.device).unwrap();

    // Columns alternate between black and white
    let mut image = image::RgbaImage::new(4, 4);
    for (x, _, pixel) in image.enumerate_pixels_mut() {
        *pixel = if x % 2 == 0 { image::Rgba([0, 0, 0, 255]) } else { image::Rgba([200, 100, 40, 255]) };
    }
    let mut bytes = std::io::Cursor::new(Vec::new());
    image.write_to(&mut bytes, image::ImageOutputFormat::Png).unwrap();

    let params = TextureParams {
        color_space: forward_plus::resources::ColorSpace::Linear,
        ..TextureParams::default().with_mipmaps()
    };
    let texture = cache.load(
        &mut ctx.device,
        &FileContents::from_bytes("stripes.png", bytes.into_inner()),
        params,
    );
    assert_eq!(texture.mip_count(), 3);

    ctx.device.submit();
    let level1 = ctx.device.backend_mut().read_texture(texture.texture(), 1).unwrap();
    let level2 = ctx.device.backend_mut().read_texture(texture.texture(), 2).unwrap();
    assert_eq!(level1.len(), 2 * 2 * 4);
    for texel in level1.chunks_exact(4).chain(level2.chunks_exact(4)) {
        for (actual, expected) in texel.iter().zip([100u8, 50, 20, 255]) {
            assert!(actual.abs_diff(expected) <= 1, "{:?}", texel);
        }
    }
}

#[rstest]
#[case::headless(Backend::Headless)]
#[case::wgpu(Backend::Wgpu)]
fn dds_keeps_stored_mips(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend, 16, 16) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let mut cache = TextureCache::new(&mut ctx.device).unwrap();

    let texture = cache.load(
        &mut ctx.device,
        &FileContents::from_bytes("textures/rock.DDS", dxt1_bytes(16, 8, 0x55)),
        TextureParams::default(),
    );

    if !ctx.device.backend().supports_format(TextureFormat::Bc1RgbaUnorm) {
        assert!(Arc::ptr_eq(&texture, &cache.default_texture()));
        return;
    }
    assert_eq!(texture.format(), TextureFormat::Bc1RgbaUnorm);
    assert_eq!(texture.mip_count(), 5);
    assert!(texture.is_opaque());
    // 64 + 16 + 8 + 8 + 8
    assert_eq!(cache.total_memory_usage(), 104);
}

/// `dxt1_bytes` with the header field at `offset` overwritten
fn patched_dxt1(offset: usize, value: u32) -> Vec<u8> {
    let mut bytes = dxt1_bytes(16, 16, 0x11);
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    bytes
}

#[rstest]
#[case::headless_mip_count(Backend::Headless, patched_dxt1(28, 40))]
#[case::wgpu_mip_count(Backend::Wgpu, patched_dxt1(28, 40))]
#[case::headless_huge_mip_count(Backend::Headless, patched_dxt1(28, u32::MAX))]
#[case::wgpu_huge_mip_count(Backend::Wgpu, patched_dxt1(28, u32::MAX))]
#[case::headless_huge_width(Backend::Headless, patched_dxt1(16, u32::MAX))]
#[case::wgpu_huge_width(Backend::Wgpu, patched_dxt1(16, u32::MAX))]
#[case::headless_zero_height(Backend::Headless, patched_dxt1(12, 0))]
fn malformed_dds_yields_default_texture(#[case] backend: Backend, #[case] bytes: Vec<u8>) {
    let Some(mut ctx) = TestContext::new(backend, 16, 16) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let mut cache = TextureCache::new(&mut ctx.device).unwrap();

    // 40 levels clamp to the 5 a 16x16 chain has, which the file stores
    let expect_loaded = bytes[28..32] == 40u32.to_le_bytes()
        && ctx.device.backend().supports_format(TextureFormat::Bc1RgbaUnorm);

    let texture = cache.load(&mut ctx.device, &FileContents::from_bytes("bad.dds", bytes), TextureParams::default());
    if expect_loaded {
        assert_eq!(texture.mip_count(), 5);
    } else {
        assert!(Arc::ptr_eq(&texture, &cache.default_texture()));
        assert!(!cache.contains("bad.dds"));
    }
}

#[test]
fn truncated_chain_yields_default_texture() {
    let mut ctx = TestContext::new(Backend::Headless, 16, 16).unwrap();
    let mut cache = TextureCache::new(&mut ctx.device).unwrap();

    // Header claims 40 levels but only level 0 is stored
    let mut bytes = dxt1_bytes(16, 16, 0x11);
    bytes.truncate(128 + 4 * 4 * 8);
    bytes[28..32].copy_from_slice(&40u32.to_le_bytes());

    let texture = cache.load(&mut ctx.device, &FileContents::from_bytes("bad.dds", bytes), TextureParams::default());
    assert!(Arc::ptr_eq(&texture, &cache.default_texture()));
}

#[test]
fn unsupported_block_format_yields_default_texture() {
    let backend = HeadlessBackend::new().without_format(TextureFormat::Bc1RgbaUnorm);
    let mut device = GfxDevice::new(Box::new(backend), 16, 16).unwrap();
    let mut cache = TextureCache::new(&mut device).unwrap();

    let texture = cache.load(
        &mut device,
        &FileContents::from_bytes("textures/rock.dds", dxt1_bytes(16, 8, 0x55)),
        TextureParams::default(),
    );
    assert!(Arc::ptr_eq(&texture, &cache.default_texture()));
    assert!(cache.is_empty());
}

#[test]
fn cube_faces_must_match() {
    let mut ctx = TestContext::new(Backend::Headless, 16, 16).unwrap();
    let mut cache = TextureCache::new(&mut ctx.device).unwrap();

    let face = |name: &str, size: u32| FileContents::from_bytes(name, png_bytes(size, size, [1, 2, 3, 255]));
    let faces = [
        face("px.png", 4),
        face("nx.png", 4),
        face("py.png", 4),
        face("ny.png", 4),
        face("pz.png", 4),
        face("nz.png", 4),
    ];
    let cube = cache.load_cube(&mut ctx.device, &faces, TextureParams::default()).unwrap();
    assert_eq!(cube.width(), 4);
    assert!(Arc::ptr_eq(
        &cube,
        &cache.load_cube(&mut ctx.device, &faces, TextureParams::default()).unwrap()
    ));
    assert_eq!(cube.memory_bytes(), 6 * 16 * 4);

    let mismatched = [
        face("px.png", 4),
        face("nx.png", 4),
        face("py.png", 4),
        face("ny.png", 4),
        face("pz.png", 4),
        face("nz_large.png", 8),
    ];
    assert!(cache.load_cube(&mut ctx.device, &mismatched, TextureParams::default()).is_err());
}
