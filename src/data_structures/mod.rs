//! Engine data structures: models, textures, scene graphs, instances and clips.
//!
//! - `animation` holds clips, channels and keyframe sampling
//! - `instance` holds node transforms and their GPU layout
//! - `model` contains GPU meshes, materials and the draw helpers
//! - `scene_graph` enables hierarchical scene organization
//! - `texture` contains GPU texture wrapper and creation utilities

pub mod animation;
pub mod instance;
pub mod model;
pub mod scene_graph;
pub mod texture;
