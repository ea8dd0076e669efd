//! Native decoding of `KHR_draco_mesh_compression` primitives.

use anyhow::{Context, Result, bail};
use draco_decoder::{AttributeDataType, MeshDecodeConfig, decode_mesh};
use gltf::mesh::Semantic;

use crate::resources::{DRACO_EXTENSION, mesh::{MeshData, build_mesh_data}};

fn data_type(accessor: &gltf::Accessor) -> AttributeDataType {
    match accessor.data_type() {
        gltf::accessor::DataType::F32 => AttributeDataType::Float32,
        gltf::accessor::DataType::U16 => AttributeDataType::UInt16,
        gltf::accessor::DataType::U8 => AttributeDataType::UInt8,
        gltf::accessor::DataType::I16 => AttributeDataType::Int16,
        gltf::accessor::DataType::I8 => AttributeDataType::Int8,
        gltf::accessor::DataType::U32 => AttributeDataType::UInt32,
    }
}

fn dimensions(accessor: &gltf::Accessor) -> usize {
    match accessor.dimensions() {
        gltf::accessor::Dimensions::Scalar => 1,
        gltf::accessor::Dimensions::Vec2 => 2,
        gltf::accessor::Dimensions::Vec3 => 3,
        gltf::accessor::Dimensions::Vec4 => 4,
        _ => 3,
    }
}

fn read_f32s<const N: usize>(bytes: &[u8], dim: usize) -> Vec<[f32; N]> {
    bytes
        .chunks_exact(4 * dim)
        .map(|chunk| {
            let mut out = [0.0; N];
            for (i, value) in out.iter_mut().enumerate().take(dim) {
                let at = i * 4;
                *value = f32::from_le_bytes([chunk[at], chunk[at + 1], chunk[at + 2], chunk[at + 3]]);
            }
            out
        })
        .collect()
}

/// Decodes a Draco-compressed primitive into positions, normals, texture
/// coordinates and indices.
pub fn decode_primitive(
    name: &str,
    document: &gltf::Document,
    buffers: &[Vec<u8>],
    primitive: &gltf::Primitive,
) -> Result<MeshData> {
    let extension = primitive
        .extension_value(DRACO_EXTENSION)
        .context("primitive is not Draco compressed")?;
    let extension = extension.as_object().context("draco extension is not an object")?;
    let view_index = extension
        .get("bufferView")
        .and_then(|v| v.as_u64())
        .context("draco bufferView missing")? as usize;
    let attribute_ids = extension
        .get("attributes")
        .and_then(|v| v.as_object())
        .context("draco attributes missing")?;

    let view = document
        .views()
        .nth(view_index)
        .context("draco bufferView index out of range")?;
    let data = buffers
        .get(view.buffer().index())
        .context("draco buffer was not loaded")?;
    let compressed = data
        .get(view.offset()..view.offset() + view.length())
        .context("draco bufferView exceeds its buffer")?;

    let vertex_count = primitive
        .get(&Semantic::Positions)
        .context("POSITION accessor missing")?
        .count() as u32;
    let index_count = primitive.indices().map(|a| a.count() as u32).unwrap_or(0);

    // the decoder emits attributes in Draco attribute id order
    let mut mapped: Vec<(u64, Semantic)> = attribute_ids
        .iter()
        .filter_map(|(key, id)| {
            let semantic = match key.as_str() {
                "POSITION" => Semantic::Positions,
                "NORMAL" => Semantic::Normals,
                "TEXCOORD_0" => Semantic::TexCoords(0),
                _ => return None,
            };
            Some((id.as_u64()?, semantic))
        })
        .collect();
    mapped.sort_by_key(|(id, _)| *id);

    let mut config = MeshDecodeConfig::new(vertex_count, index_count);
    let mut layout = Vec::with_capacity(mapped.len());
    for (_, semantic) in &mapped {
        let accessor = primitive
            .get(semantic)
            .with_context(|| format!("accessor for {semantic:?} missing"))?;
        let dim = dimensions(&accessor);
        config.add_attribute(dim as u32, data_type(&accessor));
        layout.push((semantic.clone(), dim, data_type(&accessor)));
    }

    let decoded = pollster::block_on(decode_mesh(compressed, &config))
        .with_context(|| format!("draco decode of {name} failed"))?;

    let mut offset = 0usize;
    let mut indices = Vec::with_capacity(index_count as usize);
    let wide = index_count > u16::MAX as u32;
    let index_bytes = index_count as usize * if wide { 4 } else { 2 };
    let index_slice = decoded
        .get(offset..offset + index_bytes)
        .context("draco output too short for indices")?;
    offset += index_bytes;
    if wide {
        indices.extend(
            index_slice
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])),
        );
    } else {
        indices.extend(
            index_slice
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]) as u32),
        );
    }

    let mut positions = None;
    let mut normals = None;
    let mut tex_coords = None;
    for (semantic, dim, ty) in layout {
        let length = dim * vertex_count as usize * ty.size_in_bytes();
        let bytes = decoded
            .get(offset..offset + length)
            .context("draco output too short for attributes")?;
        offset += length;
        if !matches!(ty, AttributeDataType::Float32) {
            log::warn!("{name}: quantized {semantic:?} is not supported, ignoring it");
            continue;
        }
        match semantic {
            Semantic::Positions => positions = Some(read_f32s::<3>(bytes, dim)),
            Semantic::Normals => normals = Some(read_f32s::<3>(bytes, dim)),
            Semantic::TexCoords(0) => tex_coords = Some(read_f32s::<2>(bytes, dim)),
            _ => (),
        }
    }

    let Some(positions) = positions else {
        bail!("{name}: draco output has no float positions");
    };
    let indices = (index_count > 0).then_some(indices);
    build_mesh_data(name, positions, normals, tex_coords, indices)
}
