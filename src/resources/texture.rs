use log::warn;

use crate::{
    data_structures::texture::Texture,
    resources::ktx::{KTX2_MIME_TYPE, decode_ktx2, is_ktx2},
};

/// Decoded texels of a glTF image, or why they are missing.
#[derive(Clone, Debug)]
pub enum ImageData {
    Decoded(image::RgbaImage),
    Unsupported { reason: String },
}

impl ImageData {
    pub fn decoded(&self) -> Option<&image::RgbaImage> {
        match self {
            ImageData::Decoded(rgba) => Some(rgba),
            ImageData::Unsupported { .. } => None,
        }
    }
}

/// Decodes one glTF image. Formats that cannot be read are recorded as
/// unsupported so the material falls back to the neutral texture.
pub fn decode_image(name: &str, bytes: &[u8], mime_type: Option<&str>) -> ImageData {
    if mime_type == Some(KTX2_MIME_TYPE) || is_ktx2(bytes) {
        return match decode_ktx2(bytes) {
            Ok(rgba) => ImageData::Decoded(rgba),
            Err(e) => {
                warn!("{name}: {e:#}, using a neutral texture");
                ImageData::Unsupported {
                    reason: format!("{e:#}"),
                }
            }
        };
    }
    let format = mime_type
        .and_then(|mime| mime.split('/').last())
        .and_then(image::ImageFormat::from_extension);
    let decoded = match format {
        Some(format) => image::load_from_memory_with_format(bytes, format),
        None => image::load_from_memory(bytes),
    };
    match decoded {
        Ok(img) => ImageData::Decoded(img.to_rgba8()),
        Err(e) => {
            warn!("{name}: could not decode image ({e}), using a neutral texture");
            ImageData::Unsupported {
                reason: e.to_string(),
            }
        }
    }
}

/// Bind group layout of [`crate::data_structures::model::GpuMaterial`]:
/// base colour texture, its sampler and the material factors.
pub fn material_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    multisampled: false,
                    view_dimension: wgpu::TextureViewDimension::D2,
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
        label: Some("material_bind_group_layout"),
    })
}

/// Uploads an image, or returns `None` when it has no texels.
pub fn upload_image(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    image: &ImageData,
    label: &str,
    encoding: crate::data_structures::scene_graph::ColorEncoding,
) -> Option<Texture> {
    image
        .decoded()
        .map(|rgba| Texture::from_image(device, queue, rgba, Some(label), encoding))
}
