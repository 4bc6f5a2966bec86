//! Light sources fed to the tiled culler

use glam::{Vec3, Vec4};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LightKind {
    #[default]
    Point,
    Spot,
}

/// Light as seen by the culler: a bounding sphere in world space.
///
/// Rebuilt every frame and referenced by its index in the submitted list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub position: Vec3,
    pub radius: f32,
    pub kind: LightKind,
}

impl Light {
    pub fn point(position: Vec3, radius: f32) -> Self {
        Self {
            position,
            radius,
            kind: LightKind::Point,
        }
    }

    pub fn spot(position: Vec3, radius: f32) -> Self {
        Self {
            position,
            radius,
            kind: LightKind::Spot,
        }
    }

    /// `vec4(center.xyz, radius)` as stored in the light buffers
    pub fn center_and_radius(&self) -> Vec4 {
        self.position.extend(self.radius)
    }
}
