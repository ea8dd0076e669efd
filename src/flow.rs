//! Application event loop.
//!
//! [`App`] is the winit [`ApplicationHandler`]. It creates the window and the
//! GPU [`Context`], starts the two asset loads and drives the [`Viewer`] from
//! the host's redraw callbacks.
//!
//! # Lifecycle
//!
//! 1. `resumed` creates the window and the context, then the viewer
//! 2. model and environment load concurrently, their results come back as
//!    [`ViewerEvent`]s through the event loop proxy
//! 3. every `RedrawRequested` asks the viewer for a [`crate::viewer::FramePlan`]
//!    and carries it out
//! 4. closing the window or leaving the event loop tears everything down

use std::sync::Arc;

use log::{debug, error, info, warn};
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop, EventLoopProxy},
    window::Window,
};

use crate::{
    config::ViewerConfig,
    context::Context,
    render::{self, FrameStatus, SceneGpu},
    resources::{LoadedAsset, environment::EquirectImage, environment::load_equirect, load_gltf_asset},
    viewer::{FrameContent, Viewer},
};

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

/// Results of asynchronous work, delivered on the event loop thread.
pub enum ViewerEvent {
    /// The GPU context, created asynchronously on the web.
    #[allow(dead_code)]
    Initialized(anyhow::Result<Box<Context>>),
    ModelLoaded(anyhow::Result<LoadedAsset>),
    EnvironmentLoaded(anyhow::Result<EquirectImage>),
}

impl std::fmt::Debug for ViewerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initialized(result) => f
                .debug_tuple("Initialized")
                .field(&result.is_ok())
                .finish(),
            Self::ModelLoaded(result) => f
                .debug_tuple("ModelLoaded")
                .field(&result.is_ok())
                .finish(),
            Self::EnvironmentLoaded(result) => f
                .debug_tuple("EnvironmentLoaded")
                .field(&result.is_ok())
                .finish(),
        }
    }
}

pub struct App {
    #[cfg(not(target_arch = "wasm32"))]
    async_runtime: tokio::runtime::Runtime,
    proxy: EventLoopProxy<ViewerEvent>,
    config: ViewerConfig,
    ctx: Option<Context>,
    viewer: Option<Viewer>,
    scene_gpu: Option<SceneGpu>,
    /// Set when the window or the GPU could not be set up.
    fatal: Option<anyhow::Error>,
}

impl App {
    pub fn new(event_loop: &EventLoop<ViewerEvent>, config: ViewerConfig) -> anyhow::Result<Self> {
        let proxy = event_loop.create_proxy();
        #[cfg(not(target_arch = "wasm32"))]
        let async_runtime = tokio::runtime::Runtime::new()?;
        Ok(Self {
            #[cfg(not(target_arch = "wasm32"))]
            async_runtime,
            proxy,
            config,
            ctx: None,
            viewer: None,
            scene_gpu: None,
            fatal: None,
        })
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn spawn(&self, task: impl Future<Output = ViewerEvent> + Send + 'static) {
        let proxy = self.proxy.clone();
        self.async_runtime.spawn(async move {
            if proxy.send_event(task.await).is_err() {
                debug!("event loop closed before a load finished");
            }
        });
    }

    #[cfg(target_arch = "wasm32")]
    fn spawn(&self, task: impl Future<Output = ViewerEvent> + 'static) {
        let proxy = self.proxy.clone();
        wasm_bindgen_futures::spawn_local(async move {
            if proxy.send_event(task.await).is_err() {
                debug!("event loop closed before a load finished");
            }
        });
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{err:#}");
        self.fatal = Some(err);
        event_loop.exit();
    }

    /// Builds the viewer on a ready context and starts both loads.
    fn start(&mut self, ctx: Context) {
        let (width, height) = (ctx.config.width, ctx.config.height);
        let viewer = Viewer::new(self.config.clone(), width, height);
        ctx.window.set_title(&viewer.window_title());
        ctx.window.request_redraw();

        let source = self.config.model.clone();
        self.spawn(async move { ViewerEvent::ModelLoaded(load_gltf_asset(&source).await) });
        if let Some(url) = self.config.environment_url.clone() {
            self.spawn(async move { ViewerEvent::EnvironmentLoaded(load_equirect(&url).await) });
        }

        self.ctx = Some(ctx);
        self.viewer = Some(viewer);
    }

    fn on_model_loaded(&mut self, result: anyhow::Result<LoadedAsset>) {
        let (Some(ctx), Some(viewer)) = (self.ctx.as_ref(), self.viewer.as_mut()) else {
            return;
        };
        match result {
            Ok(asset) => {
                info!("loaded {}", self.config.model.url);
                let Some(upload) = viewer.on_model_loaded(asset) else {
                    return;
                };
                if let Some(model) = viewer.model() {
                    self.scene_gpu = Some(SceneGpu::upload(ctx, model, &upload.meshes, &upload.images));
                }
            }
            Err(err) => viewer.on_model_failed(&err),
        }
        ctx.window.set_title(&viewer.window_title());
    }

    fn on_environment_loaded(&mut self, result: anyhow::Result<EquirectImage>) {
        let (Some(ctx), Some(viewer)) = (self.ctx.as_mut(), self.viewer.as_ref()) else {
            return;
        };
        if viewer.is_torn_down() {
            debug!("ignoring an environment that arrived after teardown");
            return;
        }
        match result {
            Ok(image) => ctx.assign_environment(&image),
            Err(err) => warn!("{err:#}, keeping the neutral environment"),
        }
    }

    fn redraw(&mut self) {
        let (Some(ctx), Some(viewer)) = (self.ctx.as_mut(), self.viewer.as_mut()) else {
            return;
        };
        if viewer.is_torn_down() {
            return;
        }
        // keep the refresh callbacks coming, the viewer throttles them
        ctx.window.request_redraw();

        let Some(plan) = viewer.frame(ctx.drawable_size()) else {
            return;
        };
        if let Some((width, height)) = plan.resized {
            ctx.resize(width, height);
        }
        let result = match plan.content {
            FrameContent::Scene { dt } => {
                ctx.camera.update(&ctx.queue, viewer.projection(), dt);
                let shadow_pass = render::write_lights(ctx, viewer.scene());
                if let (Some(scene_gpu), Some(model)) = (self.scene_gpu.as_ref(), viewer.model()) {
                    scene_gpu.write_instances(&ctx.queue, model);
                }
                render::render(ctx, self.scene_gpu.as_ref(), shadow_pass, ctx.clear_colour)
            }
            FrameContent::Clear(colour) => render::render(ctx, None, false, colour),
        };
        match result {
            Ok(FrameStatus::Presented | FrameStatus::Skipped) => (),
            // Reconfigure the surface if it's lost, outdated or suboptimal
            Ok(FrameStatus::Reconfigure) => {
                let (width, height) = ctx.drawable_size();
                ctx.resize(width, height);
            }
            Err(e) => error!("Unable to render {e:#}"),
        }
    }

    /// Cancels the render loop and releases every GPU resource. Runs once.
    fn teardown(&mut self) {
        let Some(viewer) = self.viewer.as_mut() else {
            return;
        };
        if viewer.is_torn_down() {
            return;
        }
        viewer.teardown();
        if let Some(scene_gpu) = self.scene_gpu.take() {
            scene_gpu.destroy();
        }
        if let Some(ctx) = &self.ctx {
            ctx.destroy();
        }
    }

    /// The error that ended the event loop early, if any.
    pub fn take_fatal(&mut self) -> Option<anyhow::Error> {
        self.fatal.take()
    }
}

impl ApplicationHandler<ViewerEvent> for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.ctx.is_some() || self.viewer.is_some() {
            return;
        }
        #[allow(unused_mut)]
        let mut window_attributes = Window::default_attributes().with_title("foot-viewer");

        #[cfg(target_arch = "wasm32")]
        {
            use wasm_bindgen::JsCast;
            use winit::platform::web::WindowAttributesExtWebSys;

            const CANVAS_ID: &str = "canvas";

            let canvas = web_sys::window()
                .and_then(|window| window.document())
                .and_then(|document| document.get_element_by_id(CANVAS_ID));
            let Some(canvas) = canvas else {
                self.fail(event_loop, anyhow::anyhow!("no element with id {CANVAS_ID}"));
                return;
            };
            window_attributes = window_attributes.with_canvas(Some(canvas.unchecked_into()));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                self.fail(event_loop, err.into());
                return;
            }
        };

        #[cfg(not(target_arch = "wasm32"))]
        {
            let config = self.config.clone();
            match self.async_runtime.block_on(Context::new(window, &config)) {
                Ok(ctx) => self.start(ctx),
                Err(err) => self.fail(event_loop, err),
            }
        }

        #[cfg(target_arch = "wasm32")]
        {
            let config = self.config.clone();
            self.spawn(async move {
                ViewerEvent::Initialized(Context::new(window, &config).await.map(Box::new))
            });
        }
    }

    fn user_event(&mut self, event_loop: &ActiveEventLoop, event: ViewerEvent) {
        debug!("{event:?}");
        match event {
            ViewerEvent::Initialized(Ok(ctx)) => self.start(*ctx),
            ViewerEvent::Initialized(Err(err)) => self.fail(event_loop, err),
            ViewerEvent::ModelLoaded(result) => self.on_model_loaded(result),
            ViewerEvent::EnvironmentLoaded(result) => self.on_environment_loaded(result),
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        if let Some(ctx) = self.ctx.as_mut() {
            ctx.camera.controller.handle_window_event(&event);
        }
        match event {
            WindowEvent::CloseRequested => {
                self.teardown();
                event_loop.exit();
            }
            // picked up by the surface watcher on the next rendered frame
            WindowEvent::Resized(_) => {
                if let Some(ctx) = &self.ctx {
                    ctx.window.request_redraw();
                }
            }
            WindowEvent::RedrawRequested => self.redraw(),
            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.teardown();
    }
}

/// Opens the viewer window and runs until it is closed.
pub fn run(config: ViewerConfig) -> anyhow::Result<()> {
    #[cfg(not(target_arch = "wasm32"))]
    {
        if let Err(e) = env_logger::try_init() {
            println!("Warning: Could not initialize logger: {}", e);
        };
    }

    #[cfg(target_arch = "wasm32")]
    {
        console_log::init_with_level(log::Level::Info).unwrap_throw();
    }

    config.validate()?;
    let event_loop: EventLoop<ViewerEvent> = EventLoop::with_user_event().build()?;
    let mut app = App::new(&event_loop, config)?;
    event_loop.run_app(&mut app)?;

    match app.take_fatal() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
