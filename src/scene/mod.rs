//! Scene data the renderer consumes

mod camera;
mod light;

pub use camera::*;
pub use light::*;
