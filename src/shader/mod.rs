//! Shader programs
//!
//! Sources are parsed and validated with naga, then reflected so uniforms,
//! buffers and textures can be set by name. [`Shader`] wraps a vertex and
//! fragment stage, [`ComputeShader`] a single compute entry point.

mod compute;
mod graphics;
mod program;
mod reflect;

pub use compute::ComputeShader;
pub use graphics::Shader;
pub use program::ShaderProgram;
pub(crate) use graphics::PipelineKey;
pub(crate) use program::PipelineRef;

use crate::backend::traits::BackendError;
use crate::backend::types::ShaderStage;
use crate::BackendType;
use thiserror::Error;

/// Shader error type
#[derive(Error, Debug)]
pub enum ShaderError {
    #[error("Failed to parse shader: {0}")]
    Parse(String),
    #[error("Shader validation failed: {0}")]
    Validation(String),
    #[error("Failed to translate shader to WGSL: {0}")]
    Translation(String),
    #[error("No {0:?} entry point")]
    MissingEntryPoint(ShaderStage),
    #[error("Fragment input @location({0}) is not written by the vertex stage")]
    InterfaceMismatch(u32),
    #[error("No shader source for the {0:?} backend")]
    NoSource(BackendType),
    #[error("Resource '{0}' used by the shader is not bound")]
    Unbound(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Source of one shader stage
#[derive(Debug, Clone)]
pub enum ShaderSource {
    Wgsl(String),
    Glsl { stage: ShaderStage, source: String },
    SpirV(Vec<u32>),
}

/// Per-API variants of one stage; the active backend picks one
#[derive(Debug, Clone, Default)]
pub struct ShaderSourceSet {
    pub wgsl: Option<String>,
    pub glsl: Option<String>,
    pub spirv: Option<Vec<u32>>,
}

#[derive(Clone, Copy)]
enum SourceKind {
    Wgsl,
    Glsl,
    SpirV,
}

impl ShaderSourceSet {
    pub fn wgsl(source: impl Into<String>) -> Self {
        Self {
            wgsl: Some(source.into()),
            ..Default::default()
        }
    }

    pub fn with_glsl(mut self, source: impl Into<String>) -> Self {
        self.glsl = Some(source.into());
        self
    }

    pub fn with_spirv(mut self, words: Vec<u32>) -> Self {
        self.spirv = Some(words);
        self
    }

    /// Pick the variant native to `backend`, falling back to any present one
    pub fn select(&self, backend: BackendType, stage: ShaderStage) -> Option<ShaderSource> {
        let order = match backend {
            BackendType::Vulkan => [SourceKind::SpirV, SourceKind::Wgsl, SourceKind::Glsl],
            BackendType::OpenGl => [SourceKind::Glsl, SourceKind::Wgsl, SourceKind::SpirV],
            BackendType::D3D12 | BackendType::Metal => {
                [SourceKind::Wgsl, SourceKind::SpirV, SourceKind::Glsl]
            }
        };

        order.iter().find_map(|kind| match kind {
            SourceKind::Wgsl => self.wgsl.clone().map(ShaderSource::Wgsl),
            SourceKind::Glsl => self.glsl.clone().map(|source| ShaderSource::Glsl { stage, source }),
            SourceKind::SpirV => self.spirv.clone().map(ShaderSource::SpirV),
        })
    }
}

/// Where a named uniform lives in a program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformLocation {
    /// A whole resource binding (buffer, texture, sampler)
    Binding { group: u32, binding: u32 },
    /// A member of a uniform struct
    Member {
        group: u32,
        binding: u32,
        offset: u32,
        size: u32,
    },
    /// The program has no uniform with this name
    Missing,
}

impl UniformLocation {
    pub fn is_missing(&self) -> bool {
        matches!(self, UniformLocation::Missing)
    }

    /// Binding slot or byte offset, `-1` when missing
    pub fn index(&self) -> i32 {
        match self {
            UniformLocation::Binding { binding, .. } => *binding as i32,
            UniformLocation::Member { offset, .. } => *offset as i32,
            UniformLocation::Missing => -1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_selection_prefers_native_variant() {
        let set = ShaderSourceSet::wgsl("// wgsl")
            .with_glsl("// glsl")
            .with_spirv(vec![0x0723_0203]);

        assert!(matches!(
            set.select(BackendType::Vulkan, ShaderStage::Vertex),
            Some(ShaderSource::SpirV(_))
        ));
        assert!(matches!(
            set.select(BackendType::OpenGl, ShaderStage::Vertex),
            Some(ShaderSource::Glsl { stage: ShaderStage::Vertex, .. })
        ));
        assert!(matches!(
            set.select(BackendType::Metal, ShaderStage::Vertex),
            Some(ShaderSource::Wgsl(_))
        ));
    }

    #[test]
    fn source_selection_falls_back() {
        let set = ShaderSourceSet::wgsl("// wgsl");
        assert!(matches!(
            set.select(BackendType::Vulkan, ShaderStage::Fragment),
            Some(ShaderSource::Wgsl(_))
        ));
        assert!(ShaderSourceSet::default()
            .select(BackendType::D3D12, ShaderStage::Fragment)
            .is_none());
    }

    #[test]
    fn missing_location_reports_minus_one() {
        assert_eq!(UniformLocation::Missing.index(), -1);
        assert!(UniformLocation::Missing.is_missing());
        let member = UniformLocation::Member {
            group: 0,
            binding: 0,
            offset: 64,
            size: 16,
        };
        assert_eq!(member.index(), 64);
    }
}
