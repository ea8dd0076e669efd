//! foot-viewer
//!
//! A small cross-platform viewer for one animated glTF model lit by an HDR
//! environment. It runs natively and in the browser (WebGL2 through wgpu).
//! The model gets shadows by a name heuristic, every embedded animation clip
//! plays, and a throttled render loop keeps the frame rate at a fixed cap.
//!
//! High-level modules
//! - `camera`: camera, projection, orbit controller and their uniforms
//! - `config`: viewer configuration and command line parsing
//! - `context`: GPU context that owns device/queue/pipelines and per-window resources
//! - `data_structures`: scene graph, meshes, materials, instances, textures and clips
//! - `flow`: the winit event loop driving the viewer
//! - `frame`: frame throttle, resize watcher and the cancellable render loop
//! - `mixer`: plays animation clips on the scene graph
//! - `pipelines`: the render pipelines (PBR, shadow, environment prefilter)
//! - `render`: GPU mirror of the loaded scene and frame drawing
//! - `resources`: loading of glTF files and environment images
//! - `shadows`: shadow and colour-space post-processing of loaded scenes
//! - `viewer`: the viewer lifecycle: construct, load, run, tear down
//!

pub mod camera;
pub mod config;
pub mod context;
pub mod data_structures;
pub mod flow;
pub mod frame;
pub mod mixer;
pub mod pipelines;
pub mod render;
pub mod resources;
pub mod shadows;
pub mod viewer;

pub use config::{AssetSource, DecoderPaths, ViewerConfig};
pub use viewer::{LoadState, Viewer};

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

/// Browser entry point: runs the viewer with the default configuration.
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen(start)]
pub fn start() -> Result<(), JsValue> {
    flow::run(ViewerConfig::default()).map_err(|e| JsValue::from_str(&format!("{e:#}")))
}
