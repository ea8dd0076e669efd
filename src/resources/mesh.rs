use anyhow::{Context, bail};
use cgmath::InnerSpace;

use crate::data_structures::model::ModelVertex;

/// Vertices and indices of one glTF primitive, ready for upload.
#[derive(Clone, Debug, PartialEq)]
pub struct MeshData {
    pub name: String,
    pub vertices: Vec<ModelVertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// Reads an uncompressed triangle primitive.
pub fn read_primitive(
    name: &str,
    primitive: &gltf::Primitive,
    buffers: &[Vec<u8>],
) -> anyhow::Result<MeshData> {
    let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(Vec::as_slice));
    let positions: Vec<[f32; 3]> = reader
        .read_positions()
        .with_context(|| format!("primitive of {name} has no readable positions"))?
        .collect();
    let normals = reader.read_normals().map(|normals| normals.collect());
    let tex_coords = reader
        .read_tex_coords(0)
        .map(|tex_coords| tex_coords.into_f32().collect());
    let indices = reader
        .read_indices()
        .map(|indices| indices.into_u32().collect());
    build_mesh_data(name, positions, normals, tex_coords, indices)
}

/**
 * Interleaves the attribute streams of a primitive.
 *
 * Primitives without normals are flat shaded: every triangle gets its own three
 * vertices carrying the face normal.
 */
pub fn build_mesh_data(
    name: &str,
    positions: Vec<[f32; 3]>,
    normals: Option<Vec<[f32; 3]>>,
    tex_coords: Option<Vec<[f32; 2]>>,
    indices: Option<Vec<u32>>,
) -> anyhow::Result<MeshData> {
    let count = positions.len();
    let mut indices = indices.unwrap_or_else(|| (0..count as u32).collect());
    if let Some(bad) = indices.iter().find(|&&i| i as usize >= count) {
        bail!("{name}: index {bad} out of range for {count} vertices");
    }
    if indices.len() % 3 != 0 {
        log::warn!("{name}: dropping a trailing incomplete triangle");
        indices.truncate(indices.len() - indices.len() % 3);
    }
    let tex_coord = |i: usize| {
        tex_coords
            .as_ref()
            .and_then(|t| t.get(i).copied())
            .unwrap_or([0.0; 2])
    };

    match normals {
        Some(normals) if normals.len() == count => {
            let vertices = (0..count)
                .map(|i| ModelVertex {
                    position: positions[i],
                    tex_coords: tex_coord(i),
                    normal: normals[i],
                })
                .collect();
            Ok(MeshData {
                name: name.to_string(),
                vertices,
                indices,
            })
        }
        _ => {
            let mut vertices = Vec::with_capacity(indices.len());
            for triangle in indices.chunks_exact(3) {
                let [a, b, c] = [triangle[0], triangle[1], triangle[2]].map(|i| i as usize);
                let pa: cgmath::Vector3<f32> = positions[a].into();
                let pb: cgmath::Vector3<f32> = positions[b].into();
                let pc: cgmath::Vector3<f32> = positions[c].into();
                let face = (pb - pa).cross(pc - pa);
                // degenerate triangles still need a unit normal
                let normal = if face.magnitude2() > 0.0 {
                    face.normalize()
                } else {
                    cgmath::Vector3::unit_y()
                };
                for i in [a, b, c] {
                    vertices.push(ModelVertex {
                        position: positions[i],
                        tex_coords: tex_coord(i),
                        normal: normal.into(),
                    });
                }
            }
            let indices = (0..vertices.len() as u32).collect();
            Ok(MeshData {
                name: name.to_string(),
                vertices,
                indices,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_normals_are_flat() {
        let mesh = build_mesh_data(
            "tri",
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            None,
            None,
            Some(vec![0, 1, 2]),
        )
        .unwrap();
        assert_eq!(mesh.vertices.len(), 3);
        assert!(mesh.vertices.iter().all(|v| v.normal == [0.0, 0.0, 1.0]));
        assert_eq!(mesh.indices, [0, 1, 2]);
    }

    #[test]
    fn flat_shading_splits_shared_vertices() {
        let mesh = build_mesh_data(
            "quad",
            vec![[0.0; 3], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]],
            None,
            Some(vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]),
            Some(vec![0, 1, 2, 0, 2, 3]),
        )
        .unwrap();
        assert_eq!(mesh.vertices.len(), 6);
        assert_eq!(mesh.triangle_count(), 2);
        assert_eq!(mesh.vertices[5].tex_coords, [0.0, 1.0]);
    }

    #[test]
    fn given_normals_are_kept_and_unindexed_meshes_get_indices() {
        let mesh = build_mesh_data(
            "tri",
            vec![[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            Some(vec![[0.0, 1.0, 0.0]; 3]),
            None,
            None,
        )
        .unwrap();
        assert_eq!(mesh.indices, [0, 1, 2]);
        assert_eq!(mesh.vertices[1].normal, [0.0, 1.0, 0.0]);
    }

    #[test]
    fn out_of_range_indices_are_rejected() {
        let result = build_mesh_data("broken", vec![[0.0; 3]; 3], None, None, Some(vec![0, 1, 7]));
        assert!(result.is_err());
    }
}
