//! naga front-ends, validation and resource reflection

use super::{ShaderError, ShaderSource};
use crate::backend::types::ShaderStage;
use naga::valid::{Capabilities, ModuleInfo, ValidationFlags, Validator};

/// What kind of resource a global variable binds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GlobalKind {
    UniformBuffer,
    StorageBuffer { read_only: bool },
    Texture { cube: bool },
    StorageTexture,
    Sampler,
}

/// Named member of a uniform struct
#[derive(Debug, Clone)]
pub(crate) struct ReflectedMember {
    pub name: String,
    pub offset: u32,
    pub size: u32,
}

/// Global resource used by the reflected entry point
#[derive(Debug, Clone)]
pub(crate) struct ReflectedGlobal {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    pub kind: GlobalKind,
    /// Byte size of the bound type; 0 for runtime-sized and opaque types
    pub size: u32,
    pub members: Vec<ReflectedMember>,
}

/// One compiled stage: WGSL handed to the backend plus its reflection
#[derive(Debug, Clone)]
pub(crate) struct ReflectedStage {
    pub wgsl: String,
    pub entry_point: String,
    pub globals: Vec<ReflectedGlobal>,
    /// User `@location`s the entry point reads
    pub inputs: Vec<u32>,
    /// User `@location`s the entry point writes
    pub outputs: Vec<u32>,
}

fn naga_stage(stage: ShaderStage) -> naga::ShaderStage {
    match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
        ShaderStage::Compute => naga::ShaderStage::Compute,
    }
}

fn parse(source: &ShaderSource) -> Result<naga::Module, ShaderError> {
    match source {
        ShaderSource::Wgsl(text) => naga::front::wgsl::parse_str(text)
            .map_err(|e| ShaderError::Parse(e.emit_to_string(text))),
        ShaderSource::Glsl { stage, source } => naga::front::glsl::Frontend::default()
            .parse(&naga::front::glsl::Options::from(naga_stage(*stage)), source)
            .map_err(|e| ShaderError::Parse(format!("{:?}", e))),
        ShaderSource::SpirV(words) => naga::front::spv::parse_u8_slice(
            bytemuck::cast_slice(words),
            &naga::front::spv::Options::default(),
        )
        .map_err(|e| ShaderError::Parse(e.to_string())),
    }
}

/// Parse, validate and reflect one stage of `source`
pub(crate) fn compile(source: &ShaderSource, stage: ShaderStage) -> Result<ReflectedStage, ShaderError> {
    let module = parse(source)?;

    let info = Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|e| {
            let text = match source {
                ShaderSource::Wgsl(text) => text.as_str(),
                _ => "",
            };
            ShaderError::Validation(e.emit_to_string(text))
        })?;

    let wgsl = match source {
        ShaderSource::Wgsl(text) => text.clone(),
        _ => naga::back::wgsl::write_string(&module, &info, naga::back::wgsl::WriterFlags::empty())
            .map_err(|e| ShaderError::Translation(e.to_string()))?,
    };

    let (index, entry) = module
        .entry_points
        .iter()
        .enumerate()
        .find(|(_, ep)| ep.stage == naga_stage(stage))
        .ok_or(ShaderError::MissingEntryPoint(stage))?;

    let mut inputs = Vec::new();
    for argument in &entry.function.arguments {
        collect_locations(&module, argument.ty, argument.binding.as_ref(), &mut inputs);
    }
    let mut outputs = Vec::new();
    if let Some(result) = &entry.function.result {
        collect_locations(&module, result.ty, result.binding.as_ref(), &mut outputs);
    }

    Ok(ReflectedStage {
        wgsl,
        entry_point: entry.name.clone(),
        globals: reflect_globals(&module, &info, index),
        inputs,
        outputs,
    })
}

fn collect_locations(
    module: &naga::Module,
    ty: naga::Handle<naga::Type>,
    binding: Option<&naga::Binding>,
    out: &mut Vec<u32>,
) {
    match binding {
        Some(naga::Binding::Location { location, .. }) => out.push(*location),
        Some(naga::Binding::BuiltIn(_)) => {}
        None => {
            if let naga::TypeInner::Struct { members, .. } = &module.types[ty].inner {
                for member in members {
                    collect_locations(module, member.ty, member.binding.as_ref(), out);
                }
            }
        }
    }
}

fn reflect_globals(module: &naga::Module, info: &ModuleInfo, entry_index: usize) -> Vec<ReflectedGlobal> {
    let usage = info.get_entry_point(entry_index);
    let ctx = module.to_ctx();
    let mut globals = Vec::new();

    for (handle, var) in module.global_variables.iter() {
        if usage[handle].is_empty() {
            continue;
        }
        let (Some(binding), Some(name)) = (&var.binding, &var.name) else {
            continue;
        };

        let inner = &module.types[var.ty].inner;
        let kind = match var.space {
            naga::AddressSpace::Uniform => GlobalKind::UniformBuffer,
            naga::AddressSpace::Storage { access } => GlobalKind::StorageBuffer {
                read_only: !access.contains(naga::StorageAccess::STORE),
            },
            naga::AddressSpace::Handle => match inner {
                naga::TypeInner::Image { class: naga::ImageClass::Storage { .. }, .. } => {
                    GlobalKind::StorageTexture
                }
                naga::TypeInner::Image { dim, .. } => GlobalKind::Texture {
                    cube: *dim == naga::ImageDimension::Cube,
                },
                naga::TypeInner::Sampler { .. } => GlobalKind::Sampler,
                _ => continue,
            },
            _ => continue,
        };

        let members = match inner {
            naga::TypeInner::Struct { members, .. } if kind == GlobalKind::UniformBuffer => members
                .iter()
                .filter_map(|member| {
                    Some(ReflectedMember {
                        name: member.name.clone()?,
                        offset: member.offset,
                        size: module.types[member.ty].inner.size(ctx),
                    })
                })
                .collect(),
            _ => Vec::new(),
        };

        let size = match kind {
            GlobalKind::UniformBuffer | GlobalKind::StorageBuffer { .. } => inner.size(ctx),
            _ => 0,
        };

        globals.push(ReflectedGlobal {
            name: name.clone(),
            group: binding.group,
            binding: binding.binding,
            kind,
            size,
            members,
        });
    }

    globals
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHADER: &str = r#"
struct Params {
    scale: f32,
    offset: vec3<f32>,
    transform: mat4x4<f32>,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read_write> output: array<f32>;
@group(0) @binding(2) var<storage, read> unused: array<f32>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    output[id.x] = params.scale * params.transform[0].x + params.offset.y;
}
"#;

    #[test]
    fn reflects_members_and_skips_unused_globals() {
        let stage = compile(&ShaderSource::Wgsl(SHADER.into()), ShaderStage::Compute).unwrap();
        assert_eq!(stage.entry_point, "main");
        assert_eq!(stage.globals.len(), 2);

        let params = stage.globals.iter().find(|g| g.name == "params").unwrap();
        assert_eq!(params.kind, GlobalKind::UniformBuffer);
        assert_eq!(params.size, 96);
        let offsets: Vec<_> = params.members.iter().map(|m| (m.name.as_str(), m.offset, m.size)).collect();
        assert_eq!(offsets, vec![("scale", 0, 4), ("offset", 16, 12), ("transform", 32, 64)]);

        let output = stage.globals.iter().find(|g| g.name == "output").unwrap();
        assert_eq!(output.kind, GlobalKind::StorageBuffer { read_only: false });
        assert!(stage.globals.iter().all(|g| g.name != "unused"));
    }

    #[test]
    fn missing_stage_is_an_error() {
        let result = compile(&ShaderSource::Wgsl(SHADER.into()), ShaderStage::Vertex);
        assert!(matches!(result, Err(ShaderError::MissingEntryPoint(ShaderStage::Vertex))));
    }

    #[test]
    fn glsl_is_translated_to_wgsl() {
        let glsl = r#"
#version 450
layout(set = 0, binding = 0) uniform Globals { vec4 tint; } globals;
layout(location = 0) out vec4 color;
void main() { color = globals.tint; }
"#;
        let stage = compile(
            &ShaderSource::Glsl {
                stage: ShaderStage::Fragment,
                source: glsl.into(),
            },
            ShaderStage::Fragment,
        )
        .unwrap();
        assert!(stage.wgsl.contains("@fragment"));
        assert_eq!(stage.globals.len(), 1);
        assert_eq!(stage.globals[0].kind, GlobalKind::UniformBuffer);
    }
}
