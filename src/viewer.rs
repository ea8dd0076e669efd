//! The viewer's CPU-side lifecycle: construct, load, run, tear down.
//!
//! [`Viewer`] owns the scene graph, the load state, the animation mixer and
//! the render loop. It never touches the GPU. Each host refresh it decides
//! through [`Viewer::frame`] whether and what to draw, and the caller carries
//! out the resulting [`FramePlan`] on a [`crate::context::Context`].

use cgmath::Deg;
use log::{debug, error, info, warn};

use crate::{
    camera::Projection,
    config::{ViewerConfig, hex_to_rgb},
    data_structures::{
        animation::AnimationClip,
        scene_graph::{LightKind, LightNode, NodeKind, SceneNode},
    },
    frame::{Clock, RenderLoop, SurfaceWatcher, SystemClock, TickOutcome},
    mixer::AnimationMixer,
    resources::{LoadedAsset, mesh::MeshData, texture::ImageData},
    shadows::{ShadowReport, apply_shadow_policy},
};

pub const SCENE_NAME: &str = "Scene";
pub const HEMISPHERE_LIGHT_NAME: &str = "HemisphereLight";

/// Whether the model has arrived. Nothing is animated or drawn before `Ready`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadState {
    Loading,
    Ready,
    Failed(String),
}

/// What a rendered frame shows.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FrameContent {
    /// The loaded scene, after the camera advanced by `dt` seconds.
    Scene { dt: f32 },
    /// Only a clear colour: still loading, or loading failed.
    Clear(wgpu::Color),
}

/// Work the caller has to do for a frame that passed the throttle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FramePlan {
    /// The drawable size changed: reconfigure surface and depth buffer. The
    /// viewer's projection already follows it.
    pub resized: Option<(u32, u32)>,
    pub content: FrameContent,
}

/// Geometry and images of a freshly inserted model, waiting for upload.
#[derive(Debug)]
pub struct PendingUpload {
    pub meshes: Vec<MeshData>,
    pub images: Vec<ImageData>,
}

#[derive(Debug)]
pub struct Viewer<C: Clock = SystemClock> {
    config: ViewerConfig,
    scene: SceneNode,
    load_state: LoadState,
    /// Index of the model's subtree among the scene root's children.
    model: Option<usize>,
    clips: Vec<AnimationClip>,
    mixer: Option<AnimationMixer>,
    shadow_report: Option<ShadowReport>,
    render_loop: RenderLoop<C>,
    animation_clock: C,
    surface: SurfaceWatcher,
    projection: Projection,
}

impl Viewer<SystemClock> {
    pub fn new(config: ViewerConfig, width: u32, height: u32) -> Self {
        let framerate = config.framerate;
        Self::with_clocks(
            config,
            (width, height),
            RenderLoop::new(framerate),
            SystemClock::new(),
        )
    }
}

impl<C: Clock> Viewer<C> {
    /// A viewer with explicit clocks for the render loop and the animations.
    pub fn with_clocks(
        config: ViewerConfig,
        (width, height): (u32, u32),
        render_loop: RenderLoop<C>,
        animation_clock: C,
    ) -> Self {
        let mut scene = SceneNode::group(SCENE_NAME);
        let hemisphere = &config.hemisphere;
        scene.add_child(SceneNode::new(
            HEMISPHERE_LIGHT_NAME,
            NodeKind::Light(LightNode::new(
                LightKind::Hemisphere {
                    ground: hex_to_rgb(hemisphere.ground),
                },
                hex_to_rgb(hemisphere.sky),
                hemisphere.intensity,
            )),
        ));
        scene.update_world_transform_all();
        let camera = &config.camera;
        let projection = Projection::new(width, height, Deg(camera.fovy), camera.znear, camera.zfar);
        Self {
            config,
            scene,
            load_state: LoadState::Loading,
            model: None,
            clips: Vec::new(),
            mixer: None,
            shadow_report: None,
            render_loop,
            animation_clock,
            surface: SurfaceWatcher::new(width, height),
            projection,
        }
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn scene(&self) -> &SceneNode {
        &self.scene
    }

    pub fn load_state(&self) -> &LoadState {
        &self.load_state
    }

    /// The loaded model's subtree.
    pub fn model(&self) -> Option<&SceneNode> {
        self.scene.children.get(self.model?)
    }

    pub fn clips(&self) -> &[AnimationClip] {
        &self.clips
    }

    pub fn mixer(&self) -> Option<&AnimationMixer> {
        self.mixer.as_ref()
    }

    pub fn shadow_report(&self) -> Option<&ShadowReport> {
        self.shadow_report.as_ref()
    }

    /// The camera projection, its aspect matching the last observed drawable.
    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn render_loop(&self) -> &RenderLoop<C> {
        &self.render_loop
    }

    pub fn render_loop_mut(&mut self) -> &mut RenderLoop<C> {
        &mut self.render_loop
    }

    pub fn animation_clock_mut(&mut self) -> &mut C {
        &mut self.animation_clock
    }

    pub fn is_torn_down(&self) -> bool {
        self.render_loop.is_cancelled()
    }

    /// Post-processes the model, hangs it under the scene root and starts
    /// every clip. Returns what still has to be uploaded, or `None` when the
    /// result arrives too late.
    pub fn on_model_loaded(&mut self, asset: LoadedAsset) -> Option<PendingUpload> {
        if self.is_torn_down() || self.load_state != LoadState::Loading {
            debug!("ignoring a model that arrived after loading ended");
            return None;
        }
        let LoadedAsset {
            mut scene,
            meshes,
            images,
            clips,
            extensions_used,
        } = asset;
        if !extensions_used.is_empty() {
            debug!("model uses {}", extensions_used.join(", "));
        }

        let report = apply_shadow_policy(&mut scene, self.config.use_shadows);
        for name in &report.shadow_lights {
            let point = scene
                .find_by_name(name)
                .and_then(SceneNode::light)
                .is_some_and(|light| matches!(light.kind, LightKind::Point { .. }));
            if point {
                warn!("{name} is a point light, point light shadows are not rendered");
            }
        }

        self.scene.add_child(scene);
        let index = self.scene.children.len() - 1;
        self.scene.update_world_transform_all();

        let mut mixer = AnimationMixer::new(&self.scene.children[index]);
        for clip in &clips {
            mixer.clip_action(clip).play();
        }
        if !clips.is_empty() {
            let names: Vec<&str> = clips.iter().map(|clip| clip.name.as_str()).collect();
            info!("playing {} clips: {}", clips.len(), names.join(", "));
        }
        // time spent loading is not animation time
        self.animation_clock.delta();

        self.model = Some(index);
        self.clips = clips;
        self.mixer = Some(mixer);
        self.shadow_report = Some(report);
        self.load_state = LoadState::Ready;
        Some(PendingUpload { meshes, images })
    }

    pub fn on_model_failed(&mut self, err: &anyhow::Error) {
        error!("could not load {}: {err:#}", self.config.model.url);
        if self.load_state == LoadState::Loading {
            self.load_state = LoadState::Failed(format!("{err:#}"));
        }
    }

    pub fn window_title(&self) -> String {
        match &self.load_state {
            LoadState::Loading => format!("foot-viewer: loading {}", self.config.model.url),
            LoadState::Ready => format!("foot-viewer: {}", self.config.model.url),
            LoadState::Failed(_) => format!("foot-viewer: failed to load {}", self.config.model.url),
        }
    }

    /// Called on every host refresh with the window's drawable size.
    ///
    /// Returns `None` for refreshes the throttle skips. Otherwise a changed
    /// drawable size is reported once and applied to the projection, and with
    /// the model ready the animations advance by the animation clock.
    pub fn frame(&mut self, drawable: (u32, u32)) -> Option<FramePlan> {
        if self.render_loop.tick() == TickOutcome::Skip {
            return None;
        }
        let resized = self.surface.observe(drawable.0, drawable.1);
        if let Some((width, height)) = resized {
            self.projection.resize(width, height);
        }
        let content = match &self.load_state {
            LoadState::Ready => {
                let dt = self.animation_clock.delta() as f32;
                if let (Some(mixer), Some(index)) = (self.mixer.as_mut(), self.model) {
                    mixer.update(dt, &mut self.scene.children[index]);
                }
                self.scene.update_world_transform_all();
                FrameContent::Scene { dt }
            }
            LoadState::Loading => FrameContent::Clear(self.config.clear_colour),
            LoadState::Failed(_) => FrameContent::Clear(self.config.error_colour),
        };
        Some(FramePlan { resized, content })
    }

    /// Stops the render loop and every animation. GPU resources are released
    /// by their owners.
    pub fn teardown(&mut self) {
        self.render_loop.cancel();
        if let Some(mixer) = self.mixer.as_mut() {
            mixer.stop_all();
        }
        info!("viewer stopped after {} frames", self.render_loop.rendered());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data_structures::{
            animation::{Channel, Interpolation, Keyframes},
            scene_graph::{Material, MeshNode},
        },
        frame::ManualClock,
    };

    fn viewer() -> Viewer<ManualClock> {
        Viewer::with_clocks(
            ViewerConfig::default(),
            (800, 600),
            RenderLoop::with_clock(30, ManualClock::new()),
            ManualClock::new(),
        )
    }

    fn asset() -> LoadedAsset {
        let mut scene = SceneNode::group("foot");
        let mut mesh = SceneNode::new(
            "Foot",
            NodeKind::Mesh(MeshNode {
                mesh: 0,
                material: Material::default(),
            }),
        );
        mesh.source_index = Some(0);
        scene.add_child(mesh);
        let clip = AnimationClip::new(
            "Walk",
            vec![Channel {
                target: 0,
                interpolation: Interpolation::Linear,
                timestamps: vec![0.0, 1.0],
                keyframes: Keyframes::Translation(vec![
                    cgmath::Vector3::new(0.0, 0.0, 0.0),
                    cgmath::Vector3::new(2.0, 0.0, 0.0),
                ]),
            }],
        );
        LoadedAsset {
            scene,
            meshes: Vec::new(),
            images: Vec::new(),
            clips: vec![clip],
            extensions_used: Vec::new(),
        }
    }

    fn render_tick(viewer: &mut Viewer<ManualClock>, size: (u32, u32)) -> Option<FramePlan> {
        viewer.render_loop_mut().clock_mut().advance(1.0 / 30.0 + 1e-6);
        viewer.frame(size)
    }

    #[test]
    fn the_scene_starts_with_a_hemisphere_light() {
        let viewer = viewer();
        assert_eq!(viewer.scene().name, SCENE_NAME);
        let light = viewer
            .scene()
            .find_by_name(HEMISPHERE_LIGHT_NAME)
            .and_then(SceneNode::light)
            .unwrap();
        assert_eq!(light.intensity, 4.0);
        assert_eq!(light.color, hex_to_rgb(0xf0d0d0));
        assert_eq!(
            light.kind,
            LightKind::Hemisphere {
                ground: hex_to_rgb(0x101030)
            }
        );
        assert_eq!(*viewer.load_state(), LoadState::Loading);
    }

    #[test]
    fn nothing_animates_before_the_model_arrives() {
        let mut viewer = viewer();
        let plan = render_tick(&mut viewer, (800, 600)).unwrap();
        assert_eq!(plan.content, FrameContent::Clear(wgpu::Color::BLACK));
        assert!(viewer.mixer().is_none());
    }

    #[test]
    fn loading_starts_every_clip_and_animates() {
        let mut viewer = viewer();
        assert!(viewer.on_model_loaded(asset()).is_some());
        assert_eq!(*viewer.load_state(), LoadState::Ready);
        assert!(viewer.mixer().unwrap().actions().iter().all(|a| a.is_running()));

        viewer.animation_clock_mut().advance(0.5);
        let plan = render_tick(&mut viewer, (800, 600)).unwrap();
        assert_eq!(plan.content, FrameContent::Scene { dt: 0.5 });
        let foot = viewer.model().unwrap().find_by_name("Foot").unwrap();
        assert!((foot.world.position.x - 1.0).abs() < 1e-5);
    }

    #[test]
    fn a_failed_load_shows_the_error_colour() {
        let mut viewer = viewer();
        viewer.on_model_failed(&anyhow::anyhow!("404"));
        assert!(matches!(viewer.load_state(), LoadState::Failed(reason) if reason == "404"));
        assert!(viewer.window_title().contains("failed"));
        let plan = render_tick(&mut viewer, (800, 600)).unwrap();
        assert_eq!(
            plan.content,
            FrameContent::Clear(ViewerConfig::default().error_colour)
        );
        // a late model does not revive the viewer
        assert!(viewer.on_model_loaded(asset()).is_none());
    }

    #[test]
    fn teardown_stops_frames_and_ignores_late_results() {
        let mut viewer = viewer();
        viewer.teardown();
        assert!(render_tick(&mut viewer, (800, 600)).is_none());
        assert!(viewer.on_model_loaded(asset()).is_none());
        assert_eq!(*viewer.load_state(), LoadState::Loading);
    }
}
