//! The GPU side of the viewer.
//!
//! [`Context`] owns the surface, device and queue together with everything
//! that lives as long as the window: depth buffer, camera, lights, shadow map,
//! environment and the pipelines that draw with them.

use std::sync::Arc;

use anyhow::Context as _;
use cgmath::Deg;
use log::info;
use winit::window::Window;

use crate::{
    camera::{Camera, CameraResources, OrbitController, Projection},
    config::ViewerConfig,
    data_structures::texture::{self, Texture},
    pipelines::{
        basic::mk_pbr_pipeline,
        environment::{EnvironmentPrefilter, EnvironmentResources},
        light::LightResources,
        shadow::ShadowResources,
    },
    resources::{environment::EquirectImage, texture::material_layout},
};

#[derive(Debug)]
pub struct Pipelines {
    pub pbr: wgpu::RenderPipeline,
    /// Same as `pbr` without back-face culling.
    pub pbr_double_sided: wgpu::RenderPipeline,
}

impl Pipelines {
    pub fn for_material(&self, double_sided: bool) -> &wgpu::RenderPipeline {
        if double_sided {
            &self.pbr_double_sided
        } else {
            &self.pbr
        }
    }
}

#[derive(Debug)]
pub struct Context {
    pub(crate) window: Arc<Window>,
    pub(crate) depth_texture: Texture,
    pub surface: wgpu::Surface<'static>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub config: wgpu::SurfaceConfiguration,
    pub camera: CameraResources,
    pub lights: LightResources,
    pub use_shadows: bool,
    pub shadow: ShadowResources,
    pub environment: EnvironmentResources,
    /// Compiled up front and released once the environment is assigned.
    pub prefilter: Option<EnvironmentPrefilter>,
    pub material_layout: wgpu::BindGroupLayout,
    pub pipelines: Pipelines,
    /// Sampled by materials without a usable base colour image.
    pub neutral_texture: Texture,
    pub sampler: wgpu::Sampler,
    pub clear_colour: wgpu::Color,
}

impl Context {
    pub async fn new(window: Arc<Window>, viewer: &ViewerConfig) -> anyhow::Result<Self> {
        let size = window.inner_size();

        // BackendBit::PRIMARY => Vulkan + Metal + DX12 + Browser WebGPU
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            #[cfg(not(target_arch = "wasm32"))]
            backends: wgpu::Backends::PRIMARY,
            #[cfg(target_arch = "wasm32")]
            backends: wgpu::Backends::GL,
            ..wgpu::InstanceDescriptor::new_without_display_handle()
        });

        let surface = instance
            .create_surface(window.clone())
            .context("creating the window surface")?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("no GPU adapter can present to this window")?;
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: None,
                required_features: wgpu::Features::empty(),
                // WebGL doesn't support all of wgpu's features, so if
                // we're building for the web we'll have to disable some.
                required_limits: if cfg!(target_arch = "wasm32") {
                    wgpu::Limits::downlevel_webgl2_defaults()
                } else {
                    wgpu::Limits::default()
                },
                ..Default::default()
            })
            .await
            .context("requesting the GPU device")?;

        let surface_caps = surface.get_capabilities(&adapter);
        // Colours are written in linear space and encoded by an sRGB surface.
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .context("the surface reports no texture formats")?;
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: surface_caps
                .present_modes
                .first()
                .copied()
                .unwrap_or(wgpu::PresentMode::Fifo),
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let settings = &viewer.camera;
        let projection = Projection::new(
            config.width,
            config.height,
            Deg(settings.fovy),
            settings.znear,
            settings.zfar,
        );
        let mut controller = OrbitController::from_settings(settings);
        controller.set_viewport(config.width, config.height);
        let camera = CameraResources::new(
            &device,
            Camera::new(settings.position, settings.target),
            controller,
            &projection,
        );

        let depth_texture =
            Texture::create_depth_texture(&device, [config.width, config.height], "depth_texture");

        // sized for real once a light casts shadows
        let shadow = ShadowResources::new(&device, &camera.bind_group_layout, [1, 1]);
        let lights = LightResources::new(&device, &shadow.map, &shadow.sampler);
        let environment = EnvironmentResources::new(&device, &queue);
        let prefilter = Some(EnvironmentPrefilter::new(&device));

        let material_layout = material_layout(&device);
        let pipelines = Pipelines {
            pbr: mk_pbr_pipeline(
                &device,
                &config,
                false,
                &material_layout,
                &camera.bind_group_layout,
                &lights.bind_group_layout,
                &environment.bind_group_layout,
            ),
            pbr_double_sided: mk_pbr_pipeline(
                &device,
                &config,
                true,
                &material_layout,
                &camera.bind_group_layout,
                &lights.bind_group_layout,
                &environment.bind_group_layout,
            ),
        };

        let neutral_texture = Texture::create_neutral(&device, &queue);
        let sampler = texture::create_default_sampler(&device);

        info!(
            "renderer ready: {}x{} {:?} on {}",
            config.width,
            config.height,
            config.format,
            adapter.get_info().name
        );

        Ok(Self {
            window,
            depth_texture,
            surface,
            device,
            queue,
            config,
            camera,
            lights,
            use_shadows: viewer.use_shadows,
            shadow,
            environment,
            prefilter,
            material_layout,
            pipelines,
            neutral_texture,
            sampler,
            clear_colour: viewer.clear_colour,
        })
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    /// Current drawable size of the window.
    pub fn drawable_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.camera.controller.set_viewport(width, height);
        self.surface.configure(&self.device, &self.config);
        self.depth_texture.destroy();
        self.depth_texture = Texture::create_depth_texture(&self.device, [width, height], "depth_texture");
    }

    /// Prefilters `image` and makes it the scene environment. The conversion
    /// pipeline is released afterwards.
    pub fn assign_environment(&mut self, image: &EquirectImage) {
        let prefilter = self
            .prefilter
            .take()
            .unwrap_or_else(|| EnvironmentPrefilter::new(&self.device));
        let map = prefilter.from_equirectangular(&self.device, &self.queue, image);
        self.environment.assign(&self.device, &self.queue, map);
        prefilter.dispose();
        info!("environment assigned");
    }

    /// Sizes the shadow map, rebinding the lights when it was recreated.
    pub fn ensure_shadow_map(&mut self, size: [u32; 2]) {
        if self.shadow.ensure_size(&self.device, size) {
            self.lights
                .rebind(&self.device, &self.shadow.map, &self.shadow.sampler);
        }
    }

    pub fn destroy(&self) {
        self.depth_texture.destroy();
        self.neutral_texture.destroy();
        self.camera.destroy();
        self.lights.destroy();
        self.shadow.destroy();
        self.environment.destroy();
    }
}
