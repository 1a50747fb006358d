//! Scene data shared with the GPU.
//!
//! Lights in their uploaded layout, cube face conventions and the shadow
//! camera math built on them.

pub mod light;

pub use light::{
    CubeFace, DirectionalLight, LightUniforms, MAX_DIRECTIONAL_LIGHTS, MAX_POINT_LIGHTS,
    PointLight, SceneBounds,
};
