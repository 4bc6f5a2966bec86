//! Compute passes
//!
//! - [`LightTiler`]: Forward+ per-tile light lists
//! - [`MipGenerator`]: mip chains for loaded textures

pub mod light_culling;
pub mod light_tiler;
pub mod mip_generation;

pub use light_culling::{CullerUniforms, MAX_LIGHTS, MAX_LIGHTS_PER_TILE, SPOT_LIGHT_BIT, TILE_RES};
pub use light_tiler::{tile_count, LightTiler};
pub use mip_generation::MipGenerator;
