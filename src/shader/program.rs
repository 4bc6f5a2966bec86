//! Reflected program state shared by graphics and compute shaders

use super::reflect::{GlobalKind, ReflectedGlobal, ReflectedStage};
use super::{ShaderError, UniformLocation};
use crate::backend::traits::*;
use crate::backend::types::{BufferDescriptor, BufferUsage};
use crate::device::{GfxDevice, TransientResource};
use crate::resources::{RenderTexture, Texture2D, TextureCube};
use glam::{Mat4, Vec3, Vec4};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Pipeline whose derived bind group layouts the program binds against
#[derive(Debug, Clone, Copy)]
pub(crate) enum PipelineRef {
    Render(RenderPipelineHandle),
    Compute(ComputePipelineHandle),
}

#[derive(Debug, Clone, Copy)]
enum BoundResource {
    Buffer(BufferHandle),
    Texture(TextureViewHandle),
    StorageTexture(TextureViewHandle),
    Sampler(SamplerHandle),
}

impl BoundResource {
    fn fits(&self, kind: GlobalKind) -> bool {
        matches!(
            (self, kind),
            (
                BoundResource::Buffer(_),
                GlobalKind::UniformBuffer | GlobalKind::StorageBuffer { .. }
            ) | (BoundResource::Texture(_), GlobalKind::Texture { .. })
                | (BoundResource::StorageTexture(_), GlobalKind::StorageTexture)
                | (BoundResource::Sampler(_), GlobalKind::Sampler)
        )
    }
}

/// Compiled stages plus the resources and uniform values recorded by name.
///
/// Names resolve lazily against the reflection of every stage and are cached.
/// Setting a name the program does not use is a silent no-op. Values are
/// recorded on the CPU and turned into bind groups when the program is applied
/// to a draw or dispatch.
pub struct ShaderProgram {
    label: String,
    stages: Vec<ReflectedStage>,
    locations: HashMap<String, UniformLocation>,
    bound: BTreeMap<(u32, u32), BoundResource>,
    /// Staging bytes of uniform structs that have no explicitly bound buffer
    blocks: BTreeMap<(u32, u32), Vec<u8>>,
    warned: HashSet<String>,
    reported_invalid: bool,
}

impl ShaderProgram {
    pub(crate) fn new(label: &str, stages: Vec<ReflectedStage>) -> Self {
        let blocks = stages
            .iter()
            .flat_map(|stage| stage.globals.iter())
            .filter(|global| global.kind == GlobalKind::UniformBuffer)
            .map(|global| ((global.group, global.binding), vec![0; global.size as usize]))
            .collect();

        Self {
            label: label.to_string(),
            stages,
            locations: HashMap::new(),
            bound: BTreeMap::new(),
            blocks,
            warned: HashSet::new(),
            reported_invalid: false,
        }
    }

    /// Program that failed to compile; every operation on it is a no-op
    pub(crate) fn invalid(label: &str) -> Self {
        Self::new(label, Vec::new())
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_valid(&self) -> bool {
        !self.stages.is_empty()
    }

    pub(crate) fn stages(&self) -> &[ReflectedStage] {
        &self.stages
    }

    /// Log once that `operation` was attempted on an invalid program
    pub(crate) fn report_invalid(&mut self, operation: &str) {
        if !self.reported_invalid {
            log::warn!("Shader '{}': {} ignored, program is invalid", self.label, operation);
            self.reported_invalid = true;
        }
    }

    fn warn_once(&mut self, key: &str, message: std::fmt::Arguments) {
        if self.warned.insert(key.to_string()) {
            log::warn!("Shader '{}': {}", self.label, message);
        }
    }

    fn globals(&self) -> BTreeMap<(u32, u32), &ReflectedGlobal> {
        self.stages
            .iter()
            .flat_map(|stage| stage.globals.iter())
            .map(|global| ((global.group, global.binding), global))
            .collect()
    }

    fn global_at(&self, group: u32, binding: u32) -> Option<&ReflectedGlobal> {
        self.stages
            .iter()
            .flat_map(|stage| stage.globals.iter())
            .find(|global| global.group == group && global.binding == binding)
    }

    /// Resolve a global resource or uniform struct member by name
    pub fn uniform_location(&mut self, name: &str) -> UniformLocation {
        if let Some(location) = self.locations.get(name) {
            return *location;
        }

        let mut location = UniformLocation::Missing;
        'search: for global in self.stages.iter().flat_map(|stage| stage.globals.iter()) {
            if global.name == name {
                location = UniformLocation::Binding {
                    group: global.group,
                    binding: global.binding,
                };
                break;
            }
            for member in &global.members {
                if member.name == name {
                    location = UniformLocation::Member {
                        group: global.group,
                        binding: global.binding,
                        offset: member.offset,
                        size: member.size,
                    };
                    break 'search;
                }
            }
        }

        if self.is_valid() {
            self.locations.insert(name.to_string(), location);
        }
        location
    }

    fn set_data(&mut self, name: &str, bytes: &[u8]) {
        if !self.is_valid() {
            self.report_invalid("uniform update");
            return;
        }

        match self.uniform_location(name) {
            UniformLocation::Member {
                group,
                binding,
                offset,
                size,
            } => self.write_block(name, (group, binding), offset, size, bytes),
            UniformLocation::Binding { group, binding } => {
                // A bare `var<uniform>` value is its own block
                let size = self
                    .global_at(group, binding)
                    .filter(|global| global.kind == GlobalKind::UniformBuffer)
                    .map(|global| global.size);
                match size {
                    Some(size) => self.write_block(name, (group, binding), 0, size, bytes),
                    None => {
                        self.warn_once(name, format_args!("'{}' is a resource, not a value", name));
                    }
                }
            }
            UniformLocation::Missing => {}
        }
    }

    fn write_block(&mut self, name: &str, key: (u32, u32), offset: u32, size: u32, bytes: &[u8]) {
        if size as usize != bytes.len() {
            self.warn_once(
                name,
                format_args!("'{}' is {} bytes, got {}", name, size, bytes.len()),
            );
        }
        if let Some(block) = self.blocks.get_mut(&key) {
            let start = offset as usize;
            let len = bytes.len().min(size as usize).min(block.len().saturating_sub(start));
            block[start..start + len].copy_from_slice(&bytes[..len]);
        }
    }

    fn bind(&mut self, name: &str, resource: BoundResource) {
        if !self.is_valid() {
            self.report_invalid("resource binding");
            return;
        }

        match self.uniform_location(name) {
            UniformLocation::Binding { group, binding } => {
                let kind = self.global_at(group, binding).map(|global| global.kind);
                match kind {
                    Some(kind) if resource.fits(kind) => {
                        self.bound.insert((group, binding), resource);
                    }
                    _ => self.warn_once(
                        name,
                        format_args!("'{}' cannot be bound to {:?}", name, resource),
                    ),
                }
            }
            UniformLocation::Member { .. } => {
                self.warn_once(name, format_args!("'{}' is a uniform value, not a resource", name));
            }
            UniformLocation::Missing => {}
        }
    }

    fn bind_sampler_for(&mut self, name: &str, sampler: SamplerHandle) {
        let sampler_name = format!("{}_sampler", name);
        if let UniformLocation::Binding { .. } = self.uniform_location(&sampler_name) {
            self.bind(&sampler_name, BoundResource::Sampler(sampler));
        }
    }

    pub fn set_matrix(&mut self, name: &str, value: &Mat4) {
        self.set_data(name, bytemuck::cast_slice(&value.to_cols_array()));
    }

    pub fn set_int(&mut self, name: &str, value: i32) {
        self.set_data(name, bytemuck::bytes_of(&value));
    }

    pub fn set_uint(&mut self, name: &str, value: u32) {
        self.set_data(name, bytemuck::bytes_of(&value));
    }

    pub fn set_float(&mut self, name: &str, value: f32) {
        self.set_data(name, bytemuck::bytes_of(&value));
    }

    pub fn set_vector3(&mut self, name: &str, value: Vec3) {
        self.set_data(name, bytemuck::cast_slice(&value.to_array()));
    }

    pub fn set_vector4(&mut self, name: &str, value: Vec4) {
        self.set_data(name, bytemuck::cast_slice(&value.to_array()));
    }

    /// Bind a uniform or storage buffer; overrides the staged values of a uniform struct
    pub fn set_buffer(&mut self, name: &str, buffer: BufferHandle) {
        self.bind(name, BoundResource::Buffer(buffer));
    }

    /// Bind a 2D texture and, if the program declares `{name}_sampler`, its sampler
    pub fn set_texture(&mut self, name: &str, texture: &Texture2D) {
        self.bind(name, BoundResource::Texture(texture.view()));
        self.bind_sampler_for(name, texture.sampler());
    }

    pub fn set_texture_cube(&mut self, name: &str, texture: &TextureCube) {
        self.bind(name, BoundResource::Texture(texture.view()));
        self.bind_sampler_for(name, texture.sampler());
    }

    pub fn set_render_texture(&mut self, name: &str, target: &RenderTexture) {
        self.bind(name, BoundResource::Texture(target.color_view()));
        self.bind_sampler_for(name, target.sampler());
    }

    /// Bind a raw sampled view, e.g. one mip level of a texture
    pub fn set_texture_view(&mut self, name: &str, view: TextureViewHandle) {
        self.bind(name, BoundResource::Texture(view));
    }

    pub fn set_sampler(&mut self, name: &str, sampler: SamplerHandle) {
        self.bind(name, BoundResource::Sampler(sampler));
    }

    /// Bind a view as a writable storage texture
    pub fn set_storage_texture(&mut self, name: &str, view: TextureViewHandle) {
        self.bind(name, BoundResource::StorageTexture(view));
    }

    /// Create and set the bind groups for the current pass.
    ///
    /// Returns the number of textures bound. Uniform structs without a bound
    /// buffer are uploaded into transient buffers released after the next submit.
    pub(crate) fn apply(&self, device: &mut GfxDevice, pipeline: PipelineRef) -> Result<u32, ShaderError> {
        let mut groups: BTreeMap<u32, Vec<&ReflectedGlobal>> = BTreeMap::new();
        for global in self.globals().into_values() {
            groups.entry(global.group).or_default().push(global);
        }

        let mut texture_binds = 0;
        for (group, globals) in groups {
            let mut entries = Vec::with_capacity(globals.len());
            for global in globals {
                let key = (global.group, global.binding);
                let entry = match (self.bound.get(&key), self.blocks.get(&key)) {
                    (Some(BoundResource::Buffer(buffer)), _) => BindGroupEntry::Buffer {
                        buffer: *buffer,
                        offset: 0,
                        size: None,
                    },
                    (Some(BoundResource::Texture(view)), _) => {
                        texture_binds += 1;
                        BindGroupEntry::Texture(*view)
                    }
                    (Some(BoundResource::StorageTexture(view)), _) => BindGroupEntry::StorageTexture(*view),
                    (Some(BoundResource::Sampler(sampler)), _) => BindGroupEntry::Sampler(*sampler),
                    (None, Some(block)) => {
                        let buffer = device.backend_mut().create_buffer_init(
                            &BufferDescriptor {
                                label: Some(format!("{} {}", self.label, global.name)),
                                size: block.len() as u64,
                                usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
                                mapped_at_creation: false,
                            },
                            block,
                        )?;
                        device.defer_release(TransientResource::Buffer(buffer));
                        BindGroupEntry::Buffer {
                            buffer,
                            offset: 0,
                            size: None,
                        }
                    }
                    (None, None) => return Err(ShaderError::Unbound(global.name.clone())),
                };
                entries.push((global.binding, entry));
            }

            let backend = device.backend_mut();
            let layout = match pipeline {
                PipelineRef::Render(p) => backend.render_pipeline_bind_group_layout(p, group)?,
                PipelineRef::Compute(p) => backend.compute_pipeline_bind_group_layout(p, group)?,
            };
            let bind_group = backend.create_bind_group(layout, &entries);
            device.defer_release(TransientResource::BindGroupLayout(layout));
            let bind_group = bind_group?;
            device.backend_mut().set_bind_group(group, bind_group);
            device.defer_release(TransientResource::BindGroup(bind_group));
        }

        Ok(texture_binds)
    }

    /// Forget every recorded resource binding
    pub fn clear_bindings(&mut self) {
        self.bound.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::types::ShaderStage;
    use crate::shader::{reflect, ShaderSource};

    const SHADER: &str = r#"
struct Params {
    tint: vec4<f32>,
    count: u32,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read_write> values: array<vec4<f32>>;

@compute @workgroup_size(1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x < params.count) {
        values[id.x] = params.tint;
    }
}
"#;

    fn program() -> ShaderProgram {
        let stage = reflect::compile(&ShaderSource::Wgsl(SHADER.into()), ShaderStage::Compute).unwrap();
        ShaderProgram::new("test", vec![stage])
    }

    #[test]
    fn locations_resolve_and_cache() {
        let mut program = program();
        assert_eq!(
            program.uniform_location("values"),
            UniformLocation::Binding { group: 0, binding: 1 }
        );
        assert_eq!(
            program.uniform_location("count"),
            UniformLocation::Member {
                group: 0,
                binding: 0,
                offset: 16,
                size: 4
            }
        );
        assert_eq!(program.uniform_location("nope").index(), -1);
        assert_eq!(program.locations.len(), 3);
    }

    #[test]
    fn member_writes_land_in_staging_block() {
        let mut program = program();
        program.set_uint("count", 7);
        program.set_vector4("tint", Vec4::new(1.0, 2.0, 3.0, 4.0));
        // Absent names are ignored
        program.set_float("missing", 1.0);

        let block = &program.blocks[&(0, 0)];
        assert_eq!(&block[16..20], &7u32.to_le_bytes());
        assert_eq!(&block[0..4], &1.0f32.to_le_bytes());
        assert_eq!(&block[12..16], &4.0f32.to_le_bytes());
    }

    #[test]
    fn bare_uniform_value_is_written_whole() {
        const MATRIX_SHADER: &str = r#"
@group(0) @binding(0) var<uniform> mvp: mat4x4<f32>;
@group(0) @binding(1) var<storage, read_write> transformed: array<vec4<f32>>;

@compute @workgroup_size(1)
fn main() {
    transformed[0] = mvp * vec4<f32>(1.0);
}
"#;
        let stage = reflect::compile(&ShaderSource::Wgsl(MATRIX_SHADER.into()), ShaderStage::Compute).unwrap();
        let mut program = ShaderProgram::new("matrix", vec![stage]);
        assert_eq!(program.uniform_location("mvp"), UniformLocation::Binding { group: 0, binding: 0 });

        let matrix = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        program.set_matrix("mvp", &matrix);
        assert_eq!(program.blocks[&(0, 0)], bytemuck::bytes_of(&matrix.to_cols_array()));

        // Resources still refuse values
        program.set_float("transformed", 1.0);
        assert!(program.warned.contains("transformed"));
    }

    #[test]
    fn invalid_program_ignores_everything() {
        let mut program = ShaderProgram::invalid("broken");
        assert!(!program.is_valid());
        assert!(program.uniform_location("anything").is_missing());
        program.set_int("anything", 1);
        assert!(program.reported_invalid);
        assert!(program.locations.is_empty());
    }
}
