//! Image based lighting.
//!
//! An equirectangular panorama is turned into a mip-mapped cube map once, on
//! load. Mip 0 holds the panorama itself, each further mip a GGX convolution
//! for a rougher surface, so the main shader picks a mip by roughness.

use log::{debug, info, warn};
use wgpu::util::DeviceExt;

use crate::{pipelines::basic::mk_render_pipeline, resources::environment::EquirectImage};

/// Edge length of mip 0 of the environment cube.
pub const CUBE_SIZE: u32 = 256;
/// Samples per texel of the convolved mips.
pub const PREFILTER_SAMPLES: u32 = 64;
pub const ENVIRONMENT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

/// Mip levels from `size` down to 8x8.
pub fn mip_levels(size: u32) -> u32 {
    size.max(8).ilog2().saturating_sub(2).max(1)
}

/// Roughness a mip is convolved for, rising linearly to 1 at the last mip.
pub fn mip_roughness(mip: u32, mip_count: u32) -> f32 {
    if mip_count <= 1 {
        return 0.0;
    }
    mip as f32 / (mip_count - 1) as f32
}

/// A prefiltered environment cube.
#[derive(Debug)]
pub struct EnvironmentMap {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub mip_level_count: u32,
}

impl EnvironmentMap {
    /// A black 1x1 cube used until a real environment is assigned.
    pub fn neutral(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let size = wgpu::Extent3d {
            width: 1,
            height: 1,
            depth_or_array_layers: 6,
        };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("neutral environment"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                aspect: wgpu::TextureAspect::All,
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
            },
            &[0u8, 0, 0, 255].repeat(6),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            size,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            dimension: Some(wgpu::TextureViewDimension::Cube),
            ..Default::default()
        });
        Self {
            texture,
            view,
            mip_level_count: 1,
        }
    }

    pub fn destroy(&self) {
        self.texture.destroy();
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct PrefilterUniform {
    // face, roughness, sample count, unused
    values: [f32; 4],
}

/// Converts equirectangular panoramas into [`EnvironmentMap`]s.
#[derive(Debug)]
pub struct EnvironmentPrefilter {
    pipeline: wgpu::RenderPipeline,
    source_layout: wgpu::BindGroupLayout,
}

impl EnvironmentPrefilter {
    pub fn new(device: &wgpu::Device) -> Self {
        let source_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
            label: Some("prefilter_source_layout"),
        });
        let pipeline = Self::compile_equirectangular_shader(device, &source_layout);
        Self {
            pipeline,
            source_layout,
        }
    }

    /// Builds the conversion pipeline, so the first conversion does not stall
    /// on shader compilation.
    pub fn compile_equirectangular_shader(
        device: &wgpu::Device,
        source_layout: &wgpu::BindGroupLayout,
    ) -> wgpu::RenderPipeline {
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Prefilter Pipeline Layout"),
            bind_group_layouts: &[Some(source_layout)],
            immediate_size: 0,
        });
        let shader = wgpu::ShaderModuleDescriptor {
            label: Some("Prefilter Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("prefilter.wgsl").into()),
        };
        mk_render_pipeline(
            device,
            &layout,
            ENVIRONMENT_FORMAT,
            None,
            None,
            &[],
            None,
            shader,
        )
    }

    fn upload_source(&self, device: &wgpu::Device, queue: &wgpu::Queue, image: &EquirectImage) -> wgpu::Texture {
        let size = wgpu::Extent3d {
            width: image.width,
            height: image.height,
            depth_or_array_layers: 1,
        };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("equirectangular source"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba32Float,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                aspect: wgpu::TextureAspect::All,
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
            },
            bytemuck::cast_slice(&image.data),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(16 * image.width),
                rows_per_image: Some(image.height),
            },
            size,
        );
        texture
    }

    /// Renders `image` into a new prefiltered cube map. The uploaded source is
    /// destroyed before returning.
    pub fn from_equirectangular(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        image: &EquirectImage,
    ) -> EnvironmentMap {
        let max_dimension = device.limits().max_texture_dimension_2d;
        let downsampled = image.downsampled(max_dimension);
        if downsampled.is_some() {
            warn!(
                "environment of {}x{} exceeds the texture limit of {max_dimension}, downsampling",
                image.width, image.height
            );
        }
        let image = downsampled.as_ref().unwrap_or(image);
        let source = self.upload_source(device, queue, image);
        let source_view = source.create_view(&wgpu::TextureViewDescriptor::default());

        let mip_level_count = mip_levels(CUBE_SIZE);
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("environment cube"),
            size: wgpu::Extent3d {
                width: CUBE_SIZE,
                height: CUBE_SIZE,
                depth_or_array_layers: 6,
            },
            mip_level_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: ENVIRONMENT_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Prefilter Encoder"),
        });
        // every draw needs its own uniform as all of them run in one submission
        let mut uniforms = Vec::new();
        for mip in 0..mip_level_count {
            let roughness = mip_roughness(mip, mip_level_count);
            for face in 0..6u32 {
                let uniform = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Prefilter Uniform"),
                    contents: bytemuck::cast_slice(&[PrefilterUniform {
                        values: [face as f32, roughness, PREFILTER_SAMPLES as f32, 0.0],
                    }]),
                    usage: wgpu::BufferUsages::UNIFORM,
                });
                let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                    layout: &self.source_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::TextureView(&source_view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: uniform.as_entire_binding(),
                        },
                    ],
                    label: Some("prefilter_bind_group"),
                });
                let target = texture.create_view(&wgpu::TextureViewDescriptor {
                    label: Some("environment face"),
                    dimension: Some(wgpu::TextureViewDimension::D2),
                    base_mip_level: mip,
                    mip_level_count: Some(1),
                    base_array_layer: face,
                    array_layer_count: Some(1),
                    ..Default::default()
                });
                {
                    let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                        label: Some("Prefilter Pass"),
                        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                            view: &target,
                            resolve_target: None,
                            ops: wgpu::Operations {
                                load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                                store: wgpu::StoreOp::Store,
                            },
                            depth_slice: None,
                        })],
                        depth_stencil_attachment: None,
                        occlusion_query_set: None,
                        timestamp_writes: None,
                        multiview_mask: None,
                    });
                    render_pass.set_pipeline(&self.pipeline);
                    render_pass.set_bind_group(0, &bind_group, &[]);
                    render_pass.draw(0..3, 0..1);
                }
                uniforms.push(uniform);
            }
        }
        queue.submit(std::iter::once(encoder.finish()));
        source.destroy();
        for uniform in uniforms {
            uniform.destroy();
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("environment cube view"),
            dimension: Some(wgpu::TextureViewDimension::Cube),
            ..Default::default()
        });
        info!(
            "prefiltered {}x{} environment into {} mips",
            image.width, image.height, mip_level_count
        );
        EnvironmentMap {
            texture,
            view,
            mip_level_count,
        }
    }

    /// Releases the conversion pipeline and its layout. Maps created earlier
    /// stay valid.
    pub fn dispose(self) {
        let Self {
            pipeline,
            source_layout,
        } = self;
        drop(pipeline);
        drop(source_layout);
        debug!("environment prefilter released");
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct EnvironmentUniform {
    // intensity, highest mip level, enabled, unused
    params: [f32; 4],
}

impl EnvironmentUniform {
    pub fn new(map: &EnvironmentMap, enabled: bool, intensity: f32) -> Self {
        Self {
            params: [
                intensity,
                map.mip_level_count.saturating_sub(1) as f32,
                if enabled { 1.0 } else { 0.0 },
                0.0,
            ],
        }
    }

    pub fn enabled(&self) -> bool {
        self.params[2] > 0.5
    }
}

pub fn mk_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    multisampled: false,
                    view_dimension: wgpu::TextureViewDimension::Cube,
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        ],
        label: Some("environment_bind_group_layout"),
    })
}

/// The scene environment: the current map and what binds it.
#[derive(Debug)]
pub struct EnvironmentResources {
    pub map: EnvironmentMap,
    pub sampler: wgpu::Sampler,
    pub uniform: EnvironmentUniform,
    pub buffer: wgpu::Buffer,
    pub bind_group: wgpu::BindGroup,
    pub bind_group_layout: wgpu::BindGroupLayout,
}

impl EnvironmentResources {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let map = EnvironmentMap::neutral(device, queue);
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("environment_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::MipmapFilterMode::Linear,
            ..Default::default()
        });
        let uniform = EnvironmentUniform::new(&map, false, 1.0);
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Environment Buffer"),
            contents: bytemuck::cast_slice(&[uniform]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let bind_group_layout = mk_bind_group_layout(device);
        let bind_group = Self::mk_bind_group(device, &bind_group_layout, &map, &sampler, &buffer);
        Self {
            map,
            sampler,
            uniform,
            buffer,
            bind_group,
            bind_group_layout,
        }
    }

    fn mk_bind_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        map: &EnvironmentMap,
        sampler: &wgpu::Sampler,
        buffer: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&map.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: buffer.as_entire_binding(),
                },
            ],
            label: Some("environment_bind_group"),
        })
    }

    /// Makes `map` the scene environment, releasing the previous one.
    pub fn assign(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, map: EnvironmentMap) {
        self.map.destroy();
        self.map = map;
        self.uniform = EnvironmentUniform::new(&self.map, true, 1.0);
        queue.write_buffer(&self.buffer, 0, bytemuck::cast_slice(&[self.uniform]));
        self.bind_group = Self::mk_bind_group(
            device,
            &self.bind_group_layout,
            &self.map,
            &self.sampler,
            &self.buffer,
        );
    }

    pub fn destroy(&self) {
        self.map.destroy();
        self.buffer.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_mips_stop_at_eight_texels() {
        assert_eq!(mip_levels(256), 6);
        assert_eq!(mip_levels(8), 1);
        assert_eq!(mip_levels(1), 1);
    }

    #[test]
    fn roughness_rises_linearly_across_mips() {
        let count = mip_levels(CUBE_SIZE);
        let roughness: Vec<f32> = (0..count).map(|mip| mip_roughness(mip, count)).collect();
        assert_eq!(roughness, [0.0, 0.2, 0.4, 0.6, 0.8, 1.0]);
        assert_eq!(mip_roughness(0, 1), 0.0);
    }
}
