//! Common utilities for integration tests.
//!
//! Tests are parameterized over [`Backend`] with `rstest`. GPU cases return
//! `None` from [`TestContext::new`] when no adapter is present and skip.

#![allow(dead_code)]

use forward_plus::resources::RenderTexture;
use forward_plus::scene::Camera;
use forward_plus::{EngineConfig, GfxDevice};
use forward_plus::backend::types::TextureFormat;
use glam::Vec3;

// ============================================================================
// Backend Enumeration
// ============================================================================

/// Backends the integration tests run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// CPU-resident backend, always available.
    Headless,
    /// wgpu on whatever native API the machine offers.
    Wgpu,
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Headless => "headless",
            Backend::Wgpu => "wgpu",
        }
    }
}

// ============================================================================
// Test Context
// ============================================================================

/// Device plus the backend it was created for.
pub struct TestContext {
    pub backend: Backend,
    pub device: GfxDevice,
}

impl TestContext {
    /// Create a `width` x `height` device. Returns `None` if the backend is not available.
    pub fn new(backend: Backend, width: u32, height: u32) -> Option<Self> {
        forward_plus::init_logging();
        let device = match backend {
            Backend::Headless => GfxDevice::headless(width, height).ok()?,
            Backend::Wgpu => {
                let config = EngineConfig {
                    width,
                    height,
                    ..Default::default()
                }
                .with_env_overrides();
                GfxDevice::from_config(&config).ok()?
            }
        };
        Some(Self { backend, device })
    }

    /// `Rgba32Float` target whose red channel is `depth(x, y)`
    pub fn depth_target(&mut self, width: u32, height: u32, depth: impl Fn(u32, u32) -> f32) -> RenderTexture {
        let target = RenderTexture::new(
            &mut self.device,
            "Depth Normals",
            width,
            height,
            TextureFormat::Rgba32Float,
            false,
        )
        .expect("Failed to create depth target");

        let mut texels = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            for x in 0..width {
                texels.extend_from_slice(&[depth(x, y), 0.0, 0.0, 1.0]);
            }
        }
        target.write_pixels(&mut self.device, bytemuck::cast_slice(&texels));
        target
    }
}

/// Camera at the origin looking down -Z
pub fn test_camera(width: u32, height: u32) -> Camera {
    Camera::new(Vec3::ZERO, Vec3::NEG_Z).with_viewport(width, height)
}

/// Encode a PNG in memory
pub fn png_bytes(width: u32, height: u32, pixel: [u8; 4]) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba(pixel));
    let mut bytes = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, image::ImageOutputFormat::Png)
        .expect("Failed to encode PNG");
    bytes.into_inner()
}
