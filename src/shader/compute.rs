//! Compute shaders

use super::program::{PipelineRef, ShaderProgram};
use super::{reflect, ShaderError, ShaderSource, ShaderSourceSet};
use crate::backend::traits::*;
use crate::backend::types::ShaderStage;
use crate::device::GfxDevice;
use std::ops::{Deref, DerefMut};

/// Single compute entry point with name-addressed resources
pub struct ComputeShader {
    program: ShaderProgram,
    pipeline: Option<ComputePipelineHandle>,
}

impl ComputeShader {
    /// Compile `source` and create its pipeline.
    ///
    /// Failures are logged and produce an invalid shader whose setters and
    /// dispatches do nothing.
    pub fn load(device: &mut GfxDevice, label: &str, source: &ShaderSource) -> Self {
        Self::try_load(device, label, source).unwrap_or_else(|e| {
            log::error!("Failed to load compute shader '{}': {}", label, e);
            Self {
                program: ShaderProgram::invalid(label),
                pipeline: None,
            }
        })
    }

    /// Like [`Self::load`] but picks the variant matching the device's backend
    pub fn load_set(device: &mut GfxDevice, label: &str, sources: &ShaderSourceSet) -> Self {
        let backend_type = device.backend().backend_type();
        match sources.select(backend_type, ShaderStage::Compute) {
            Some(source) => Self::load(device, label, &source),
            None => {
                log::error!("Compute shader '{}': {}", label, ShaderError::NoSource(backend_type));
                Self {
                    program: ShaderProgram::invalid(label),
                    pipeline: None,
                }
            }
        }
    }

    pub fn try_load(device: &mut GfxDevice, label: &str, source: &ShaderSource) -> Result<Self, ShaderError> {
        let stage = reflect::compile(source, ShaderStage::Compute)?;
        let pipeline = device
            .backend_mut()
            .create_compute_pipeline(&ComputePipelineDescriptor {
                label: Some(label.to_string()),
                shader: stage.wgsl.clone(),
                entry_point: stage.entry_point.clone(),
            })?;

        log::debug!("Loaded compute shader '{}' ({})", label, stage.entry_point);
        Ok(Self {
            program: ShaderProgram::new(label, vec![stage]),
            pipeline: Some(pipeline),
        })
    }

    pub fn entry_point(&self) -> Option<&str> {
        self.program.stages().first().map(|stage| stage.entry_point.as_str())
    }

    /// Bind the recorded resources and dispatch `x * y * z` workgroups.
    ///
    /// Skipped with a warning when a resource the kernel uses is unbound.
    pub fn dispatch(&mut self, device: &mut GfxDevice, x: u32, y: u32, z: u32) {
        let Some(pipeline) = self.pipeline.filter(|_| self.program.is_valid()) else {
            self.program.report_invalid("dispatch");
            return;
        };

        device.begin_compute_pass(Some(self.program.label()));
        device.backend_mut().set_compute_pipeline(pipeline);
        match self.program.apply(device, PipelineRef::Compute(pipeline)) {
            Ok(_) => device.backend_mut().dispatch_compute(x, y, z),
            Err(e) => log::warn!("Shader '{}': dispatch skipped: {}", self.program.label(), e),
        }
        device.end_compute_pass();
    }

    /// Release the pipeline; the shader becomes invalid
    pub fn destroy(&mut self, device: &mut GfxDevice) {
        if let Some(pipeline) = self.pipeline.take() {
            device.backend_mut().destroy_compute_pipeline(pipeline);
        }
        self.program = ShaderProgram::invalid(self.program.label());
    }
}

impl Deref for ComputeShader {
    type Target = ShaderProgram;

    fn deref(&self) -> &ShaderProgram {
        &self.program
    }
}

impl DerefMut for ComputeShader {
    fn deref_mut(&mut self) -> &mut ShaderProgram {
        &mut self.program
    }
}
