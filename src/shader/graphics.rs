//! Vertex + fragment shaders

use super::program::{PipelineRef, ShaderProgram};
use super::{reflect, ShaderError, ShaderSource, ShaderSourceSet};
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::device::{BlendMode, DepthFunc, GfxDevice};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SHADER_ID: AtomicU64 = AtomicU64::new(1);

/// Fixed-function state a render pipeline is specialised for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct PipelineKey {
    pub blend: BlendMode,
    pub depth: DepthFunc,
    pub cull: CullMode,
    pub color_format: TextureFormat,
    pub depth_format: Option<TextureFormat>,
    pub depth_bias: i32,
    /// `f32::to_bits` of the slope-scaled bias
    pub depth_bias_slope: u32,
    pub vertex_layout: VertexBufferLayout,
}

/// Graphics shader: one vertex and one fragment stage.
///
/// Pipelines are created on first use for each combination of device state
/// and vertex layout and cached in the shader.
pub struct Shader {
    id: u64,
    program: ShaderProgram,
    pipelines: HashMap<PipelineKey, RenderPipelineHandle>,
}

impl Shader {
    /// Compile both stages. Failures are logged and produce an invalid shader.
    pub fn load(label: &str, vertex: &ShaderSource, fragment: &ShaderSource) -> Self {
        Self::try_load(label, vertex, fragment).unwrap_or_else(|e| {
            log::error!("Failed to load shader '{}': {}", label, e);
            Self::invalid(label)
        })
    }

    /// Like [`Self::load`] but picks the variants matching the device's backend
    pub fn load_set(
        device: &GfxDevice,
        label: &str,
        vertex: &ShaderSourceSet,
        fragment: &ShaderSourceSet,
    ) -> Self {
        let backend_type = device.backend().backend_type();
        match (
            vertex.select(backend_type, ShaderStage::Vertex),
            fragment.select(backend_type, ShaderStage::Fragment),
        ) {
            (Some(vs), Some(fs)) => Self::load(label, &vs, &fs),
            _ => {
                log::error!("Shader '{}': {}", label, ShaderError::NoSource(backend_type));
                Self::invalid(label)
            }
        }
    }

    /// Compile both stages and check that the vertex stage writes every
    /// location the fragment stage reads
    pub fn try_load(label: &str, vertex: &ShaderSource, fragment: &ShaderSource) -> Result<Self, ShaderError> {
        let vs = reflect::compile(vertex, ShaderStage::Vertex)?;
        let fs = reflect::compile(fragment, ShaderStage::Fragment)?;
        if let Some(location) = fs.inputs.iter().find(|location| !vs.outputs.contains(location)) {
            return Err(ShaderError::InterfaceMismatch(*location));
        }
        log::debug!("Loaded shader '{}' ({} / {})", label, vs.entry_point, fs.entry_point);

        Ok(Self {
            id: NEXT_SHADER_ID.fetch_add(1, Ordering::Relaxed),
            program: ShaderProgram::new(label, vec![vs, fs]),
            pipelines: HashMap::new(),
        })
    }

    fn invalid(label: &str) -> Self {
        Self {
            id: NEXT_SHADER_ID.fetch_add(1, Ordering::Relaxed),
            program: ShaderProgram::invalid(label),
            pipelines: HashMap::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Make this the device's active program
    pub fn use_program(&mut self, device: &mut GfxDevice) {
        if !self.program.is_valid() {
            self.program.report_invalid("use_program");
            return;
        }
        device.set_active_program(self.id);
    }

    pub(crate) fn pipeline(
        &mut self,
        device: &mut GfxDevice,
        key: &PipelineKey,
    ) -> Result<RenderPipelineHandle, ShaderError> {
        if let Some(pipeline) = self.pipelines.get(key) {
            return Ok(*pipeline);
        }

        let [vs, fs] = self.program.stages() else {
            return Err(ShaderError::MissingEntryPoint(ShaderStage::Vertex));
        };

        let (blend, depth_write, depth_compare) = (
            match key.blend {
                BlendMode::AlphaBlend => Some(BlendState::alpha_blending()),
                BlendMode::Additive => Some(BlendState::additive()),
                BlendMode::Off => None,
            },
            key.depth == DepthFunc::LessOrEqualWriteOn,
            CompareFunction::LessEqual,
        );

        let desc = RenderPipelineDescriptor {
            label: Some(self.program.label().to_string()),
            vertex_shader: vs.wgsl.clone(),
            vertex_entry: vs.entry_point.clone(),
            fragment_shader: Some(fs.wgsl.clone()),
            fragment_entry: fs.entry_point.clone(),
            vertex_layouts: vec![key.vertex_layout.clone()],
            cull_mode: key.cull,
            depth_stencil: key.depth_format.map(|format| DepthStencilState {
                format,
                depth_write_enabled: depth_write,
                depth_compare,
                depth_bias: key.depth_bias,
                depth_bias_slope_scale: f32::from_bits(key.depth_bias_slope),
            }),
            color_targets: vec![ColorTargetState {
                format: key.color_format,
                blend,
                write_mask: ColorWrites::ALL,
            }],
        };

        let pipeline = device.backend_mut().create_render_pipeline(&desc)?;
        self.pipelines.insert(key.clone(), pipeline);
        Ok(pipeline)
    }

    /// Bind recorded resources against `pipeline`; returns the number of textures bound
    pub(crate) fn apply(&self, device: &mut GfxDevice, pipeline: RenderPipelineHandle) -> Result<u32, ShaderError> {
        self.program.apply(device, PipelineRef::Render(pipeline))
    }

    /// Release every cached pipeline; the shader becomes invalid
    pub fn destroy(&mut self, device: &mut GfxDevice) {
        for (_, pipeline) in self.pipelines.drain() {
            device.backend_mut().destroy_render_pipeline(pipeline);
        }
        self.program = ShaderProgram::invalid(self.program.label());
    }
}

impl Deref for Shader {
    type Target = ShaderProgram;

    fn deref(&self) -> &ShaderProgram {
        &self.program
    }
}

impl DerefMut for Shader {
    fn deref_mut(&mut self) -> &mut ShaderProgram {
        &mut self.program
    }
}
