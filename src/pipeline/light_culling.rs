//! Forward+ light culling kernel
//!
//! One 16x16 workgroup per screen tile. Each workgroup reduces the tile's
//! linear depth to a `[min_z, max_z]` range, builds the four side planes of the
//! tile's sub-frustum and tests every light's bounding sphere against them.
//! Survivors are written to the per-tile index buffer as
//! `[count, index_0, .., index_{count-1}]`, point lights first, spot lights
//! after with [`SPOT_LIGHT_BIT`] set.

use crate::backend::headless::KernelContext;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4, Vec4Swizzles};

/// Tile edge in pixels
pub const TILE_RES: u32 = 16;
/// Capacity of each light buffer
pub const MAX_LIGHTS: u32 = 2048;
/// Capacity of one tile's index list
pub const MAX_LIGHTS_PER_TILE: u32 = 544;
/// Set on spot light indices in the per-tile lists
pub const SPOT_LIGHT_BIT: u32 = 0x8000_0000;

/// Entry point of [`LIGHT_CULLING_SHADER`]
pub const CULL_LIGHTS_ENTRY: &str = "cull_lights";

/// Words one tile occupies in the index buffer
pub const TILE_STRIDE: u32 = MAX_LIGHTS_PER_TILE + 1;

/// Uniform block of the culling kernel
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CullerUniforms {
    pub inv_projection: Mat4,
    pub view: Mat4,
    pub window_width: u32,
    pub window_height: u32,
    pub point_light_count: u32,
    pub spot_light_count: u32,
}

pub const LIGHT_CULLING_SHADER: &str = r#"
const TILE_RES: u32 = 16u;
const NUM_THREADS: u32 = 256u;
const MAX_LIGHTS_PER_TILE: u32 = 544u;
const SPOT_LIGHT_BIT: u32 = 0x80000000u;

struct CullerUniforms {
    inv_projection: mat4x4<f32>,
    view: mat4x4<f32>,
    window_width: u32,
    window_height: u32,
    point_light_count: u32,
    spot_light_count: u32,
}

@group(0) @binding(0) var<uniform> culler_uniforms: CullerUniforms;
@group(0) @binding(1) var<storage, read> point_light_center_and_radius: array<vec4<f32>>;
@group(0) @binding(2) var<storage, read> spot_light_center_and_radius: array<vec4<f32>>;
@group(0) @binding(3) var depth_normals: texture_2d<f32>;
@group(0) @binding(4) var<storage, read_write> per_tile_light_indices: array<u32>;

var<workgroup> lds_z_min: atomic<u32>;
var<workgroup> lds_z_max: atomic<u32>;
var<workgroup> lds_light_count: atomic<u32>;
var<workgroup> lds_light_idx: array<u32, 544>;

// Point on the far plane under pixel `px`, in view space
fn unproject(px: vec2<f32>) -> vec3<f32> {
    let ndc = vec4<f32>(
        px.x / f32(culler_uniforms.window_width) * 2.0 - 1.0,
        1.0 - px.y / f32(culler_uniforms.window_height) * 2.0,
        1.0,
        1.0,
    );
    let p = culler_uniforms.inv_projection * ndc;
    return p.xyz / p.w;
}

// Plane through the eye and `a`, `b`, facing `inside`
fn side_plane(a: vec3<f32>, b: vec3<f32>, inside: vec3<f32>) -> vec3<f32> {
    let n = normalize(cross(a, b));
    return select(-n, n, dot(n, inside) >= 0.0);
}

fn sphere_in_tile(
    light: vec4<f32>,
    p0: vec3<f32>,
    p1: vec3<f32>,
    p2: vec3<f32>,
    p3: vec3<f32>,
    min_z: f32,
    max_z: f32,
) -> bool {
    let center = (culler_uniforms.view * vec4<f32>(light.xyz, 1.0)).xyz;
    let radius = light.w;
    let in_sides = dot(p0, center) >= -radius
        && dot(p1, center) >= -radius
        && dot(p2, center) >= -radius
        && dot(p3, center) >= -radius;
    let depth = -center.z;
    return in_sides && depth + radius >= min_z && depth - radius <= max_z;
}

@compute @workgroup_size(16, 16, 1)
fn cull_lights(
    @builtin(global_invocation_id) global_id: vec3<u32>,
    @builtin(local_invocation_index) local_idx: u32,
    @builtin(workgroup_id) group_id: vec3<u32>,
    @builtin(num_workgroups) num_groups: vec3<u32>,
) {
    if (local_idx == 0u) {
        atomicStore(&lds_z_min, 0x7f7fffffu);
        atomicStore(&lds_z_max, 0u);
        atomicStore(&lds_light_count, 0u);
    }
    workgroupBarrier();

    if (global_id.x < culler_uniforms.window_width && global_id.y < culler_uniforms.window_height) {
        let depth = textureLoad(depth_normals, vec2<i32>(global_id.xy), 0).x;
        if (depth > 0.0) {
            let bits = bitcast<u32>(depth);
            atomicMin(&lds_z_min, bits);
            atomicMax(&lds_z_max, bits);
        }
    }
    workgroupBarrier();

    // An empty tile keeps min > max and rejects every light
    let min_z = bitcast<f32>(atomicLoad(&lds_z_min));
    let max_z = bitcast<f32>(atomicLoad(&lds_z_max));

    let origin = vec2<f32>(group_id.xy * TILE_RES);
    let size = f32(TILE_RES);
    let top_left = unproject(origin);
    let top_right = unproject(origin + vec2<f32>(size, 0.0));
    let bottom_right = unproject(origin + vec2<f32>(size, size));
    let bottom_left = unproject(origin + vec2<f32>(0.0, size));
    let center = unproject(origin + vec2<f32>(size * 0.5, size * 0.5));

    let p0 = side_plane(top_left, top_right, center);
    let p1 = side_plane(top_right, bottom_right, center);
    let p2 = side_plane(bottom_right, bottom_left, center);
    let p3 = side_plane(bottom_left, top_left, center);

    for (var i = local_idx; i < culler_uniforms.point_light_count; i = i + NUM_THREADS) {
        if (sphere_in_tile(point_light_center_and_radius[i], p0, p1, p2, p3, min_z, max_z)) {
            let slot = atomicAdd(&lds_light_count, 1u);
            if (slot < MAX_LIGHTS_PER_TILE) {
                lds_light_idx[slot] = i;
            }
        }
    }
    workgroupBarrier();

    for (var i = local_idx; i < culler_uniforms.spot_light_count; i = i + NUM_THREADS) {
        if (sphere_in_tile(spot_light_center_and_radius[i], p0, p1, p2, p3, min_z, max_z)) {
            let slot = atomicAdd(&lds_light_count, 1u);
            if (slot < MAX_LIGHTS_PER_TILE) {
                lds_light_idx[slot] = i | SPOT_LIGHT_BIT;
            }
        }
    }
    workgroupBarrier();

    let tile_index = group_id.x + group_id.y * num_groups.x;
    let start = tile_index * (MAX_LIGHTS_PER_TILE + 1u);
    let count = min(atomicLoad(&lds_light_count), MAX_LIGHTS_PER_TILE);
    for (var i = local_idx; i < count; i = i + NUM_THREADS) {
        per_tile_light_indices[start + 1u + i] = lds_light_idx[i];
    }
    if (local_idx == 0u) {
        per_tile_light_indices[start] = count;
    }
}
"#;

/// Side planes and depth range of one tile, in view space
#[derive(Debug, Clone, Copy)]
pub struct TileFrustum {
    planes: [Vec3; 4],
    min_z: f32,
    max_z: f32,
}

impl TileFrustum {
    /// Frustum of tile `(tile_x, tile_y)` with linear depth range `[min_z, max_z]`
    pub fn new(uniforms: &CullerUniforms, tile_x: u32, tile_y: u32, min_z: f32, max_z: f32) -> Self {
        let unproject = |px: Vec2| {
            let ndc = Vec4::new(
                px.x / uniforms.window_width as f32 * 2.0 - 1.0,
                1.0 - px.y / uniforms.window_height as f32 * 2.0,
                1.0,
                1.0,
            );
            let p = uniforms.inv_projection * ndc;
            p.xyz() / p.w
        };
        let side_plane = |a: Vec3, b: Vec3, inside: Vec3| {
            let n = a.cross(b).normalize_or_zero();
            if n.dot(inside) >= 0.0 {
                n
            } else {
                -n
            }
        };

        let size = TILE_RES as f32;
        let origin = Vec2::new((tile_x * TILE_RES) as f32, (tile_y * TILE_RES) as f32);
        let top_left = unproject(origin);
        let top_right = unproject(origin + Vec2::new(size, 0.0));
        let bottom_right = unproject(origin + Vec2::new(size, size));
        let bottom_left = unproject(origin + Vec2::new(0.0, size));
        let center = unproject(origin + Vec2::splat(size * 0.5));

        Self {
            planes: [
                side_plane(top_left, top_right, center),
                side_plane(top_right, bottom_right, center),
                side_plane(bottom_right, bottom_left, center),
                side_plane(bottom_left, top_left, center),
            ],
            min_z,
            max_z,
        }
    }

    /// Whether a sphere at `view_center` (view space) touches the tile
    pub fn intersects_sphere(&self, view_center: Vec3, radius: f32) -> bool {
        let in_sides = self.planes.iter().all(|plane| plane.dot(view_center) >= -radius);
        let depth = -view_center.z;
        in_sides && depth + radius >= self.min_z && depth - radius <= self.max_z
    }
}

fn read_lights(bytes: Option<&[u8]>, count: u32) -> Vec<Vec4> {
    let Some(bytes) = bytes else {
        return Vec::new();
    };
    bytes
        .chunks_exact(16)
        .take(count as usize)
        .map(|chunk| Vec4::from_array(bytemuck::pod_read_unaligned::<[f32; 4]>(chunk)))
        .collect()
}

/// CPU version of [`LIGHT_CULLING_SHADER`], run by the headless backend.
///
/// Produces the same per-tile sets as the GPU; within each kind indices are ascending.
pub fn cull_lights_kernel(ctx: &mut KernelContext, groups: [u32; 3]) {
    let size = std::mem::size_of::<CullerUniforms>();
    let Some(uniforms) = ctx
        .buffer(0, 0)
        .and_then(|bytes| bytes.get(..size))
        .map(bytemuck::pod_read_unaligned::<CullerUniforms>)
    else {
        log::warn!("cull_lights: culler_uniforms not bound");
        return;
    };
    let point_lights = read_lights(ctx.buffer(0, 1), uniforms.point_light_count);
    let spot_lights = read_lights(ctx.buffer(0, 2), uniforms.spot_light_count);
    let Some(depth) = ctx.texture(0, 3) else {
        log::warn!("cull_lights: depth_normals not bound");
        return;
    };

    let view_space = |light: &Vec4| (uniforms.view.transform_point3(light.xyz()), light.w);
    let point_lights: Vec<(Vec3, f32)> = point_lights.iter().map(view_space).collect();
    let spot_lights: Vec<(Vec3, f32)> = spot_lights.iter().map(view_space).collect();

    let mut tiles = Vec::with_capacity((groups[0] * groups[1]) as usize);
    for tile_y in 0..groups[1] {
        for tile_x in 0..groups[0] {
            let (mut min_z, mut max_z) = (f32::MAX, 0.0f32);
            for y in tile_y * TILE_RES..((tile_y + 1) * TILE_RES).min(uniforms.window_height.min(depth.height)) {
                for x in tile_x * TILE_RES..((tile_x + 1) * TILE_RES).min(uniforms.window_width.min(depth.width)) {
                    let z = depth.load_red_f32(x, y);
                    if z > 0.0 {
                        min_z = min_z.min(z);
                        max_z = max_z.max(z);
                    }
                }
            }

            let frustum = TileFrustum::new(&uniforms, tile_x, tile_y, min_z, max_z);
            let visible = |(center, radius): &(Vec3, f32)| frustum.intersects_sphere(*center, *radius);
            let list: Vec<u32> = (0u32..)
                .zip(point_lights.iter())
                .filter(|(_, light)| visible(*light))
                .map(|(index, _)| index)
                .chain(
                    (0u32..)
                        .zip(spot_lights.iter())
                        .filter(|(_, light)| visible(*light))
                        .map(|(index, _)| index | SPOT_LIGHT_BIT),
                )
                .take(MAX_LIGHTS_PER_TILE as usize)
                .collect();
            tiles.push(list);
        }
    }

    let Some(output) = ctx.buffer_mut(0, 4) else {
        log::warn!("cull_lights: per_tile_light_indices not bound");
        return;
    };
    for (tile_index, list) in tiles.iter().enumerate() {
        let start = tile_index * TILE_STRIDE as usize;
        let words = std::iter::once(list.len() as u32).chain(list.iter().copied());
        for (i, word) in words.enumerate() {
            let offset = (start + i) * 4;
            if let Some(bytes) = output.get_mut(offset..offset + 4) {
                bytes.copy_from_slice(&word.to_le_bytes());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::KernelTexture;
    use crate::backend::types::TextureFormat;

    fn uniforms(width: u32, height: u32, points: u32, spots: u32) -> CullerUniforms {
        let projection = Mat4::perspective_rh(60f32.to_radians(), width as f32 / height as f32, 0.1, 100.0);
        CullerUniforms {
            inv_projection: projection.inverse(),
            view: Mat4::IDENTITY,
            window_width: width,
            window_height: height,
            point_light_count: points,
            spot_light_count: spots,
        }
    }

    fn context(uniforms: &CullerUniforms, points: &[Vec4], spots: &[Vec4], depth: f32, tiles: u32) -> KernelContext {
        let (width, height) = (uniforms.window_width, uniforms.window_height);
        let mut ctx = KernelContext::default();
        ctx.insert_buffer(0, 0, bytemuck::bytes_of(uniforms).to_vec());
        ctx.insert_buffer(0, 1, bytemuck::cast_slice(points).to_vec());
        ctx.insert_buffer(0, 2, bytemuck::cast_slice(spots).to_vec());
        let texel = [depth, 0.0, 0.0, 0.0];
        let data = (0..width * height).flat_map(|_| texel).collect::<Vec<f32>>();
        ctx.insert_texture(
            0,
            3,
            KernelTexture {
                width,
                height,
                format: TextureFormat::Rgba32Float,
                data: bytemuck::cast_slice(&data).to_vec(),
            },
        );
        ctx.insert_buffer(0, 4, vec![0; (tiles * TILE_STRIDE * 4) as usize]);
        ctx
    }

    fn tile(ctx: &KernelContext, index: u32) -> Vec<u32> {
        let words: Vec<u32> = bytemuck::pod_collect_to_vec(ctx.buffer(0, 4).unwrap());
        let start = (index * TILE_STRIDE) as usize;
        words[start + 1..start + 1 + words[start] as usize].to_vec()
    }

    #[test]
    fn uniform_block_is_144_bytes() {
        assert_eq!(std::mem::size_of::<CullerUniforms>(), 144);
    }

    #[test]
    fn centered_light_hits_only_nearby_tiles() {
        // 64x64 window, 4x4 tiles, geometry at depth 10
        let u = uniforms(64, 64, 1, 1);
        let point = Vec4::new(0.0, 0.0, -10.0, 0.5);
        let far_spot = Vec4::new(0.0, 0.0, -50.0, 1.0);
        let mut ctx = context(&u, &[point], &[far_spot], 10.0, 16);
        cull_lights_kernel(&mut ctx, [4, 4, 1]);

        // The four tiles around the screen centre see the point light
        for index in [5, 6, 9, 10] {
            assert_eq!(tile(&ctx, index), vec![0], "tile {}", index);
        }
        // Corners see nothing, the spot light is behind the geometry
        for index in [0, 3, 12, 15] {
            assert!(tile(&ctx, index).is_empty(), "tile {}", index);
        }
    }

    #[test]
    fn spot_indices_follow_points_with_high_bit() {
        let u = uniforms(16, 16, 2, 2);
        let big = |z: f32| Vec4::new(0.0, 0.0, z, 100.0);
        let mut ctx = context(&u, &[big(-5.0), big(-6.0)], &[big(-7.0), big(-8.0)], 5.0, 1);
        cull_lights_kernel(&mut ctx, [1, 1, 1]);
        assert_eq!(tile(&ctx, 0), vec![0, 1, SPOT_LIGHT_BIT, 1 | SPOT_LIGHT_BIT]);
    }

    #[test]
    fn empty_tiles_reject_everything() {
        let u = uniforms(16, 16, 1, 0);
        let mut ctx = context(&u, &[Vec4::new(0.0, 0.0, -5.0, 100.0)], &[], 0.0, 1);
        cull_lights_kernel(&mut ctx, [1, 1, 1]);
        assert!(tile(&ctx, 0).is_empty());
    }

    #[test]
    fn overflow_is_truncated() {
        let n = MAX_LIGHTS_PER_TILE + 10;
        let u = uniforms(16, 16, n, 0);
        let lights: Vec<Vec4> = (0..n).map(|_| Vec4::new(0.0, 0.0, -5.0, 10.0)).collect();
        let mut ctx = context(&u, &lights, &[], 5.0, 1);
        cull_lights_kernel(&mut ctx, [1, 1, 1]);
        let list = tile(&ctx, 0);
        assert_eq!(list.len(), MAX_LIGHTS_PER_TILE as usize);
        assert_eq!(list.last(), Some(&(MAX_LIGHTS_PER_TILE - 1)));
    }
}
