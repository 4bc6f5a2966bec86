//! Perspective camera

use glam::{Mat4, Vec3};

/// Right-handed perspective camera looking from `position` at `target`
#[derive(Debug, Clone, Copy)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            target: Vec3::NEG_Z,
            up: Vec3::Y,
            fov_y: std::f32::consts::FRAC_PI_4,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Camera {
    pub fn new(position: Vec3, target: Vec3) -> Self {
        Self {
            position,
            target,
            ..Default::default()
        }
    }

    pub fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.set_viewport(width, height);
        self
    }

    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.aspect = width.max(1) as f32 / height.max(1) as f32;
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    /// Projection to `[0, 1]` clip depth
    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }

    /// Distance along the view direction, the value the culler expects in its depth target
    pub fn linear_depth(&self, world_position: Vec3) -> f32 {
        -self.view_matrix().transform_point3(world_position).z
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_depth_is_distance_along_view() {
        let camera = Camera::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO);
        assert!((camera.linear_depth(Vec3::ZERO) - 5.0).abs() < 1e-5);
        assert!((camera.linear_depth(Vec3::new(3.0, 1.0, -2.0)) - 7.0).abs() < 1e-5);
    }

    #[test]
    fn aspect_from_viewport() {
        let camera = Camera::default().with_viewport(1920, 1080);
        assert!((camera.aspect - 1920.0 / 1080.0).abs() < 1e-6);
    }
}
