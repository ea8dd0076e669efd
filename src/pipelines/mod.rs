//! Render pipelines and the GPU resources bound next to them.
//!
//! - `basic` builds the physically based main pipeline
//! - `environment` prefilters equirectangular panoramas into cube maps
//! - `light` packs scene lights into the light uniform
//! - `shadow` owns the shadow map and its depth-only pipeline

pub mod basic;
pub mod environment;
pub mod light;
pub mod shadow;
