//! Forward+ light tiler
//!
//! Owns the light buffers and the per-tile index buffer and drives the culling
//! kernel in [`super::light_culling`].

use super::light_culling::*;
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::device::GfxDevice;
use crate::resources::RenderTexture;
use crate::scene::{Light, LightKind};
use crate::shader::{ComputeShader, ShaderSource};
use glam::{Mat4, Vec3, Vec4};

/// Tiles covering a `width` x `height` target
pub fn tile_count(width: u32, height: u32) -> (u32, u32) {
    (width.div_ceil(TILE_RES), height.div_ceil(TILE_RES))
}

/// Splits the screen into [`TILE_RES`] sized tiles and finds the lights touching each one.
///
/// Per frame: set light positions, [`LightTiler::update_light_buffers`], then
/// [`LightTiler::cull_lights`] after the depth/normal pass. The shading pass
/// reads [`LightTiler::per_tile_light_index_buffer`].
pub struct LightTiler {
    uniform_buffer: Option<BufferHandle>,
    point_light_buffer: Option<BufferHandle>,
    spot_light_buffer: Option<BufferHandle>,
    per_tile_light_index_buffer: Option<BufferHandle>,
    point_light_center_and_radius: Vec<Vec4>,
    spot_light_center_and_radius: Vec<Vec4>,
    active_point_lights: u32,
    active_spot_lights: u32,
    num_tiles_x: u32,
    num_tiles_y: u32,
    culler_uniforms_created: bool,
}

impl Default for LightTiler {
    fn default() -> Self {
        Self::new()
    }
}

impl LightTiler {
    pub fn new() -> Self {
        Self {
            uniform_buffer: None,
            point_light_buffer: None,
            spot_light_buffer: None,
            per_tile_light_index_buffer: None,
            point_light_center_and_radius: vec![Vec4::ZERO; MAX_LIGHTS as usize],
            spot_light_center_and_radius: vec![Vec4::ZERO; MAX_LIGHTS as usize],
            active_point_lights: 0,
            active_spot_lights: 0,
            num_tiles_x: 0,
            num_tiles_y: 0,
            culler_uniforms_created: false,
        }
    }

    /// Compile the culling kernel for `device`
    pub fn load_shader(device: &mut GfxDevice) -> ComputeShader {
        ComputeShader::load(device, "Light Culler", &ShaderSource::Wgsl(LIGHT_CULLING_SHADER.into()))
    }

    /// Create the GPU buffers sized for the device's back buffer. Does nothing while they exist.
    pub fn init(&mut self, device: &mut GfxDevice) -> BackendResult<()> {
        if self.culler_uniforms_created {
            return Ok(());
        }

        let (width, height) = device.size();
        let (tiles_x, tiles_y) = tile_count(width, height);
        match self.create_buffers(device, tiles_x, tiles_y) {
            Ok(()) => {
                self.culler_uniforms_created = true;
                log::debug!("LightTiler: {}x{} tiles", tiles_x, tiles_y);
                Ok(())
            }
            Err(e) => {
                log::error!("LightTiler: failed to create buffers: {}", e);
                self.destroy_buffers(device);
                Err(e)
            }
        }
    }

    fn create_buffers(&mut self, device: &mut GfxDevice, tiles_x: u32, tiles_y: u32) -> BackendResult<()> {
        let backend = device.backend_mut();
        let light_buffer_size = MAX_LIGHTS as u64 * std::mem::size_of::<Vec4>() as u64;

        self.uniform_buffer = Some(backend.create_buffer(&BufferDescriptor {
            label: Some("Culler Uniforms".into()),
            size: std::mem::size_of::<CullerUniforms>() as u64,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
            mapped_at_creation: false,
        })?);
        self.point_light_buffer = Some(backend.create_buffer(&BufferDescriptor {
            label: Some("Point Light Center And Radius".into()),
            size: light_buffer_size,
            usage: BufferUsage::STORAGE | BufferUsage::COPY_DST,
            mapped_at_creation: false,
        })?);
        self.spot_light_buffer = Some(backend.create_buffer(&BufferDescriptor {
            label: Some("Spot Light Center And Radius".into()),
            size: light_buffer_size,
            usage: BufferUsage::STORAGE | BufferUsage::COPY_DST,
            mapped_at_creation: false,
        })?);
        self.create_index_buffer(device, tiles_x, tiles_y)
    }

    fn create_index_buffer(&mut self, device: &mut GfxDevice, tiles_x: u32, tiles_y: u32) -> BackendResult<()> {
        let size = tiles_x as u64 * tiles_y as u64 * TILE_STRIDE as u64 * 4;
        self.per_tile_light_index_buffer = Some(device.backend_mut().create_buffer(&BufferDescriptor {
            label: Some("Per Tile Light Indices".into()),
            size,
            usage: BufferUsage::STORAGE | BufferUsage::COPY_SRC,
            mapped_at_creation: false,
        })?);
        self.num_tiles_x = tiles_x;
        self.num_tiles_y = tiles_y;
        Ok(())
    }

    /// Stage point light `index`. Panics when `index >= MAX_LIGHTS`.
    pub fn set_point_light_position_and_radius(&mut self, index: usize, position: Vec3, radius: f32) {
        assert!(
            index < MAX_LIGHTS as usize,
            "point light index {} exceeds MAX_LIGHTS ({})",
            index,
            MAX_LIGHTS
        );
        self.point_light_center_and_radius[index] = position.extend(radius);
        self.active_point_lights = self.active_point_lights.max(index as u32 + 1);
    }

    /// Stage spot light `index`. Panics when `index >= MAX_LIGHTS`.
    pub fn set_spot_light_position_and_radius(&mut self, index: usize, position: Vec3, radius: f32) {
        assert!(
            index < MAX_LIGHTS as usize,
            "spot light index {} exceeds MAX_LIGHTS ({})",
            index,
            MAX_LIGHTS
        );
        self.spot_light_center_and_radius[index] = position.extend(radius);
        self.active_spot_lights = self.active_spot_lights.max(index as u32 + 1);
    }

    /// Forget every staged light, e.g. at the start of a frame
    pub fn reset_lights(&mut self) {
        self.active_point_lights = 0;
        self.active_spot_lights = 0;
    }

    /// Replace the staged lights. Lights past [`MAX_LIGHTS`] of a kind are dropped with a warning.
    pub fn set_lights(&mut self, lights: &[Light]) {
        self.reset_lights();
        let mut dropped = 0;
        for light in lights {
            let (count, slots) = match light.kind {
                LightKind::Point => (&mut self.active_point_lights, &mut self.point_light_center_and_radius),
                LightKind::Spot => (&mut self.active_spot_lights, &mut self.spot_light_center_and_radius),
            };
            if *count >= MAX_LIGHTS {
                dropped += 1;
                continue;
            }
            slots[*count as usize] = light.center_and_radius();
            *count += 1;
        }
        if dropped > 0 {
            log::warn!("LightTiler: {} lights over the {} per kind limit were dropped", dropped, MAX_LIGHTS);
        }
    }

    /// Upload the staged lights
    pub fn update_light_buffers(&mut self, device: &mut GfxDevice) {
        let (Some(point_buffer), Some(spot_buffer)) = (self.point_light_buffer, self.spot_light_buffer) else {
            log::warn!("LightTiler: update_light_buffers before init");
            return;
        };

        device.transition_buffer(point_buffer, ResourceState::CopyDest);
        device.transition_buffer(spot_buffer, ResourceState::CopyDest);

        let backend = device.backend_mut();
        if self.active_point_lights > 0 {
            let lights = &self.point_light_center_and_radius[..self.active_point_lights as usize];
            backend.write_buffer(point_buffer, 0, bytemuck::cast_slice(lights));
        }
        if self.active_spot_lights > 0 {
            let lights = &self.spot_light_center_and_radius[..self.active_spot_lights as usize];
            backend.write_buffer(spot_buffer, 0, bytemuck::cast_slice(lights));
        }

        device.transition_buffer(point_buffer, ResourceState::GenericRead);
        device.transition_buffer(spot_buffer, ResourceState::GenericRead);
    }

    /// Run the culling kernel against `depth_normal_target`, whose red channel
    /// holds linear view depth (`0` where nothing was drawn).
    ///
    /// The index buffer is re-created when the target's tile count changed since `init`.
    pub fn cull_lights(
        &mut self,
        device: &mut GfxDevice,
        shader: &mut ComputeShader,
        projection: &Mat4,
        view: &Mat4,
        depth_normal_target: &RenderTexture,
    ) {
        let (Some(uniform_buffer), Some(point_buffer), Some(spot_buffer)) =
            (self.uniform_buffer, self.point_light_buffer, self.spot_light_buffer)
        else {
            log::warn!("LightTiler: cull_lights before init");
            return;
        };

        let (width, height) = (depth_normal_target.width(), depth_normal_target.height());
        let (tiles_x, tiles_y) = tile_count(width, height);
        if (tiles_x, tiles_y) != (self.num_tiles_x, self.num_tiles_y) {
            if let Some(buffer) = self.per_tile_light_index_buffer.take() {
                device.backend_mut().destroy_buffer(buffer);
            }
            if let Err(e) = self.create_index_buffer(device, tiles_x, tiles_y) {
                log::error!("LightTiler: failed to resize index buffer: {}", e);
                return;
            }
        }
        let Some(index_buffer) = self.per_tile_light_index_buffer else {
            return;
        };

        let uniforms = CullerUniforms {
            inv_projection: projection.inverse(),
            view: *view,
            window_width: width,
            window_height: height,
            point_light_count: self.active_point_lights,
            spot_light_count: self.active_spot_lights,
        };
        device
            .backend_mut()
            .write_buffer(uniform_buffer, 0, bytemuck::bytes_of(&uniforms));

        shader.set_buffer("culler_uniforms", uniform_buffer);
        shader.set_buffer("point_light_center_and_radius", point_buffer);
        shader.set_buffer("spot_light_center_and_radius", spot_buffer);
        shader.set_render_texture("depth_normals", depth_normal_target);
        shader.set_buffer("per_tile_light_indices", index_buffer);

        device.transition_buffer(index_buffer, ResourceState::UnorderedAccess);
        shader.dispatch(device, tiles_x, tiles_y, 1);
        device.transition_buffer(index_buffer, ResourceState::ShaderResource);
    }

    /// Copy the index buffer back and decode it into one list per tile, row-major
    pub fn read_tile_light_lists(&self, device: &mut GfxDevice) -> BackendResult<Vec<Vec<u32>>> {
        let buffer = self
            .per_tile_light_index_buffer
            .ok_or_else(|| BackendError::ReadbackFailed("light tiler is not initialized".into()))?;

        device.submit();
        let bytes = device.backend_mut().read_buffer(buffer)?;
        let words: Vec<u32> = bytemuck::pod_collect_to_vec(&bytes);

        Ok(words
            .chunks_exact(TILE_STRIDE as usize)
            .map(|tile| {
                let count = (tile[0] as usize).min(MAX_LIGHTS_PER_TILE as usize);
                tile[1..=count].to_vec()
            })
            .collect())
    }

    /// Release every buffer. Safe before `init` and when called repeatedly.
    pub fn destroy_buffers(&mut self, device: &mut GfxDevice) {
        let buffers = [
            self.uniform_buffer.take(),
            self.point_light_buffer.take(),
            self.spot_light_buffer.take(),
            self.per_tile_light_index_buffer.take(),
        ];
        for buffer in buffers.into_iter().flatten() {
            device.backend_mut().destroy_buffer(buffer);
        }
        self.culler_uniforms_created = false;
    }

    pub fn point_light_count(&self) -> u32 {
        self.active_point_lights
    }

    pub fn spot_light_count(&self) -> u32 {
        self.active_spot_lights
    }

    pub fn max_num_lights_per_tile(&self) -> u32 {
        MAX_LIGHTS_PER_TILE
    }

    pub fn num_tiles_x(&self) -> u32 {
        self.num_tiles_x
    }

    pub fn num_tiles_y(&self) -> u32 {
        self.num_tiles_y
    }

    pub fn culler_uniforms_created(&self) -> bool {
        self.culler_uniforms_created
    }

    pub fn uniform_buffer(&self) -> Option<BufferHandle> {
        self.uniform_buffer
    }

    pub fn point_light_buffer(&self) -> Option<BufferHandle> {
        self.point_light_buffer
    }

    pub fn spot_light_buffer(&self) -> Option<BufferHandle> {
        self.spot_light_buffer
    }

    pub fn per_tile_light_index_buffer(&self) -> Option<BufferHandle> {
        self.per_tile_light_index_buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_counts_round_up() {
        assert_eq!(tile_count(1920, 1080), (120, 68));
        assert_eq!(tile_count(16, 16), (1, 1));
        assert_eq!(tile_count(17, 1), (2, 1));
    }

    #[test]
    fn active_count_tracks_highest_index() {
        let mut tiler = LightTiler::new();
        tiler.set_point_light_position_and_radius(4, Vec3::ZERO, 1.0);
        tiler.set_point_light_position_and_radius(1, Vec3::ZERO, 1.0);
        assert_eq!(tiler.point_light_count(), 5);
        assert_eq!(tiler.spot_light_count(), 0);
        tiler.reset_lights();
        assert_eq!(tiler.point_light_count(), 0);
    }

    #[test]
    #[should_panic]
    fn index_at_capacity_panics() {
        LightTiler::new().set_spot_light_position_and_radius(MAX_LIGHTS as usize, Vec3::ZERO, 1.0);
    }

    #[test]
    fn set_lights_truncates_per_kind() {
        let mut tiler = LightTiler::new();
        let mut lights = vec![Light::point(Vec3::ZERO, 1.0); MAX_LIGHTS as usize + 3];
        lights.push(Light::spot(Vec3::ONE, 2.0));
        tiler.set_lights(&lights);
        assert_eq!(tiler.point_light_count(), MAX_LIGHTS);
        assert_eq!(tiler.spot_light_count(), 1);
        assert_eq!(tiler.spot_light_center_and_radius[0], Vec4::new(1.0, 1.0, 1.0, 2.0));
    }

    #[test]
    fn destroy_is_idempotent() {
        let mut device = GfxDevice::headless(64, 64).unwrap();
        let mut tiler = LightTiler::new();
        tiler.destroy_buffers(&mut device);
        tiler.init(&mut device).unwrap();
        assert!(tiler.culler_uniforms_created());
        assert_eq!((tiler.num_tiles_x(), tiler.num_tiles_y()), (4, 4));
        tiler.destroy_buffers(&mut device);
        tiler.destroy_buffers(&mut device);
        assert!(!tiler.culler_uniforms_created());
        assert!(tiler.per_tile_light_index_buffer().is_none());
        tiler.init(&mut device).unwrap();
        assert!(tiler.culler_uniforms_created());
    }
}
