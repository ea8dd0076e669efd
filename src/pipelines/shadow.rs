use crate::{
    camera::{CameraBinding, CameraUniform},
    data_structures::{
        instance::InstanceRaw,
        model::{ModelVertex, Vertex},
        texture::Texture,
    },
};

/// Depth-only pipeline rendering casters into the shadow map.
pub fn mk_shadow_pipeline(
    device: &wgpu::Device,
    light_camera_layout: &wgpu::BindGroupLayout,
) -> wgpu::RenderPipeline {
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("Shadow Pipeline Layout"),
        bind_group_layouts: &[Some(light_camera_layout)],
        immediate_size: 0,
    });
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("Shadow Shader"),
        source: wgpu::ShaderSource::Wgsl(include_str!("shadow.wgsl").into()),
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        cache: None,
        label: Some("Shadow Pipeline"),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: Some("vs_main"),
            buffers: &[ModelVertex::desc(), InstanceRaw::desc()],
            compilation_options: Default::default(),
        },
        fragment: None,
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: Some(wgpu::Face::Back),
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: Texture::DEPTH_FORMAT,
            depth_write_enabled: Some(true),
            depth_compare: Some(wgpu::CompareFunction::LessEqual),
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState {
                constant: 2,
                slope_scale: 2.0,
                clamp: 0.0,
            },
        }),
        multisample: wgpu::MultisampleState {
            count: 1,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        multiview_mask: None,
    })
}

/// The shadow map, its sampler and the light camera it is rendered with.
#[derive(Debug)]
pub struct ShadowResources {
    pub map: Texture,
    pub sampler: wgpu::Sampler,
    pub size: [u32; 2],
    pub light_camera: CameraBinding,
    pub pipeline: wgpu::RenderPipeline,
}

impl ShadowResources {
    pub fn new(device: &wgpu::Device, camera_layout: &wgpu::BindGroupLayout, size: [u32; 2]) -> Self {
        Self {
            map: Texture::create_shadow_map(device, size),
            sampler: Texture::create_shadow_sampler(device),
            size,
            light_camera: CameraBinding::new(
                device,
                camera_layout,
                CameraUniform::new(),
                "light_camera_bind_group",
            ),
            pipeline: mk_shadow_pipeline(device, camera_layout),
        }
    }

    /// Recreates the map at `size`. Returns whether anything changed, in which
    /// case bind groups sampling the map must be rebuilt.
    pub fn ensure_size(&mut self, device: &wgpu::Device, size: [u32; 2]) -> bool {
        if size == self.size {
            return false;
        }
        self.map.destroy();
        self.map = Texture::create_shadow_map(device, size);
        self.size = size;
        true
    }

    pub fn destroy(&self) {
        self.map.destroy();
        self.light_camera.buffer.destroy();
    }
}
