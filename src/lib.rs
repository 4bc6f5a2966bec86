//! Forward+ - tiled light culling on a backend-agnostic GPU layer
//!
//! The crate partitions the screen into 16x16 pixel tiles and builds a list of
//! the lights touching each tile with a compute pass, so the shading pass only
//! has to walk the lights that matter for its pixels.
//!
//! It ships two backends behind [`backend::GraphicsBackend`]:
//! - **wgpu**: Vulkan, Metal, Direct3D 12 or OpenGL, picked by [`BackendType`]
//! - **headless**: CPU-resident resources that run the engine's own compute
//!   kernels on the CPU, used by tests and GPU-less machines
//!
//! # Features
//! - Forward+ light culler ([`pipeline::LightTiler`])
//! - Shader programs with reflected uniform lookup by name
//! - Path-keyed texture cache with compute-based mip generation
//! - Frame lifecycle and fixed-function state through [`device::GfxDevice`]

pub mod backend;
pub mod device;
pub mod pipeline;
pub mod resources;
pub mod scene;
pub mod shader;

pub use backend::{HeadlessBackend, WgpuBackend};
pub use device::GfxDevice;
pub use pipeline::LightTiler;

/// Native graphics API used by the GPU backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendType {
    OpenGl,
    D3D12,
    Metal,
    /// Vulkan - default on every platform that has it
    #[default]
    Vulkan,
}

impl BackendType {
    /// Parse a backend name as accepted on the command line and in `WGPU_BACKEND`
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "gl" | "opengl" | "gles" => Some(BackendType::OpenGl),
            "dx12" | "d3d12" => Some(BackendType::D3D12),
            "metal" | "mtl" => Some(BackendType::Metal),
            "vulkan" | "vk" => Some(BackendType::Vulkan),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BackendType::OpenGl => "OpenGL",
            BackendType::D3D12 => "Direct3D 12",
            BackendType::Metal => "Metal",
            BackendType::Vulkan => "Vulkan",
        }
    }
}

/// GPU preference when more than one adapter is present
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerPreference {
    LowPower,
    #[default]
    HighPerformance,
}

/// Configuration for initializing the renderer
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Back buffer width
    pub width: u32,
    /// Back buffer height
    pub height: u32,
    /// Which native API the GPU backend should use
    pub backend: BackendType,
    /// Adapter selection preference
    pub power_preference: PowerPreference,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            backend: BackendType::Vulkan,
            power_preference: PowerPreference::HighPerformance,
        }
    }
}

impl EngineConfig {
    /// Apply the `WGPU_BACKEND` environment override, if present and known
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(value) = std::env::var("WGPU_BACKEND") {
            match BackendType::from_name(&value) {
                Some(backend) => self.backend = backend,
                None => log::warn!("Ignoring unknown WGPU_BACKEND value '{}'", value),
            }
        }
        self
    }
}

/// Install the process-wide logger. Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names_parse() {
        assert_eq!(BackendType::from_name("VK"), Some(BackendType::Vulkan));
        assert_eq!(BackendType::from_name("dx12"), Some(BackendType::D3D12));
        assert_eq!(BackendType::from_name("metal"), Some(BackendType::Metal));
        assert_eq!(BackendType::from_name("gl"), Some(BackendType::OpenGl));
        assert_eq!(BackendType::from_name("glide"), None);
    }

    #[test]
    fn default_config() {
        let config = EngineConfig::default();
        assert_eq!((config.width, config.height), (1280, 720));
        assert_eq!(config.backend, BackendType::Vulkan);
    }
}
