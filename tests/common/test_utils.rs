#![allow(dead_code)]

use foot_viewer::{
    ViewerConfig, Viewer,
    frame::{ManualClock, RenderLoop},
    resources::{ExternalFiles, LoadedAsset, LoaderCapabilities, parse_gltf},
};

/// One textured foot, a `noShadow` sole, a `sun_shadow` directional light, a
/// point fill light and two clips (`Walk` moves the body, `Sway` turns the foot).
pub const FOOT_MIN: &[u8] = include_bytes!("../fixtures/foot_min.gltf");

pub fn load_fixture() -> LoadedAsset {
    parse_gltf(FOOT_MIN, &ExternalFiles::new(), &LoaderCapabilities::default())
        .expect("fixture should parse")
}

pub const FRAMERATE: u32 = 30;

/// A viewer whose render loop and animations only move when told to.
pub fn manual_viewer(config: ViewerConfig) -> Viewer<ManualClock> {
    Viewer::with_clocks(
        config,
        (800, 600),
        RenderLoop::with_clock(FRAMERATE, ManualClock::new()),
        ManualClock::new(),
    )
}

/// Emulates one host refresh `seconds` after the previous one.
pub fn refresh(
    viewer: &mut Viewer<ManualClock>,
    seconds: f64,
    drawable: (u32, u32),
) -> Option<foot_viewer::viewer::FramePlan> {
    viewer.render_loop_mut().clock_mut().advance(seconds);
    viewer.animation_clock_mut().advance(seconds);
    viewer.frame(drawable)
}

/// A device without a window, or `None` on machines without a usable adapter.
#[cfg(feature = "integration-tests")]
pub fn headless_device() -> Option<(wgpu::Device, wgpu::Queue)> {
    futures::executor::block_on(async {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..wgpu::InstanceDescriptor::new_without_display_handle()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok()?;
        adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("test device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                ..Default::default()
            })
            .await
            .ok()
    })
}
