//! Node transforms and their GPU representation.
//!
//! Every scene node keeps a local and a world [`Instance`]. Mesh nodes upload
//! their world transform as an [`InstanceRaw`] into a one-element instance
//! buffer that is bound next to the vertex buffer.

use std::ops::Mul;

use cgmath::{InnerSpace, One, SquareMatrix};

use crate::data_structures::model;

/// Translation, rotation (as quaternion) and scale of a node.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Instance {
    pub position: cgmath::Vector3<f32>,
    pub rotation: cgmath::Quaternion<f32>,
    pub scale: cgmath::Vector3<f32>,
}

impl Instance {
    /// Identity transformation (no move, rotate, or scale).
    pub fn new() -> Self {
        Self {
            position: cgmath::Vector3::new(0.0, 0.0, 0.0),
            // `Quaternion::one()` is the identity quaternion (no rotation)
            rotation: cgmath::Quaternion::one(),
            scale: cgmath::Vector3::new(1.0, 1.0, 1.0),
        }
    }

    pub fn to_matrix(&self) -> cgmath::Matrix4<f32> {
        cgmath::Matrix4::from_translation(self.position)
            * cgmath::Matrix4::from(self.rotation)
            * cgmath::Matrix4::from_nonuniform_scale(self.scale.x, self.scale.y, self.scale.z)
    }

    /// Direction the node looks at. Cameras and lights in glTF point down -Z.
    pub fn forward(&self) -> cgmath::Vector3<f32> {
        (self.rotation * -cgmath::Vector3::unit_z()).normalize()
    }

    pub fn to_raw(&self, receive_shadow: bool) -> InstanceRaw {
        let world_matrix = self.to_matrix();
        // Non-uniform scale needs the inverse transpose for correct normals
        let normal = cgmath::Matrix3::new(
            world_matrix.x.x,
            world_matrix.x.y,
            world_matrix.x.z,
            world_matrix.y.x,
            world_matrix.y.y,
            world_matrix.y.z,
            world_matrix.z.x,
            world_matrix.z.y,
            world_matrix.z.z,
        );
        let normal = normal
            .invert()
            .map(|inverse| cgmath::Matrix::transpose(&inverse))
            .unwrap_or(cgmath::Matrix3::from(self.rotation));
        InstanceRaw {
            model: world_matrix.into(),
            normal: normal.into(),
            receive_shadow: if receive_shadow { 1.0 } else { 0.0 },
        }
    }
}

impl From<([f32; 3], [f32; 4], [f32; 3])> for Instance {
    /// Builds an instance from a decomposed glTF transform (xyzw quaternion).
    fn from((t, r, s): ([f32; 3], [f32; 4], [f32; 3])) -> Self {
        Instance {
            position: t.into(),
            rotation: cgmath::Quaternion::new(r[3], r[0], r[1], r[2]),
            scale: s.into(),
        }
    }
}

impl Mul<Instance> for Instance {
    type Output = Self;

    fn mul(self, rhs: Instance) -> Self::Output {
        &self * &rhs
    }
}

impl<'a, 'b> Mul<&'b Instance> for &'a Instance {
    type Output = Instance;

    fn mul(self, rhs: &'b Instance) -> Self::Output {
        let new_rotation = self.rotation * rhs.rotation;

        let new_scale = cgmath::Vector3::new(
            self.scale.x * rhs.scale.x,
            self.scale.y * rhs.scale.y,
            self.scale.z * rhs.scale.z,
        );
        let scaled_rhs_pos = cgmath::Vector3::new(
            self.scale.x * rhs.position.x,
            self.scale.y * rhs.position.y,
            self.scale.z * rhs.position.z,
        );
        let new_position = self.position + (self.rotation * scaled_rhs_pos);

        Instance {
            position: new_position,
            rotation: new_rotation,
            scale: new_scale,
        }
    }
}

impl From<cgmath::Vector3<f32>> for Instance {
    fn from(position: cgmath::Vector3<f32>) -> Self {
        Instance {
            position,
            ..Default::default()
        }
    }
}

impl Default for Instance {
    fn default() -> Self {
        Self::new()
    }
}

/**
 * The raw instance is the actual data stored on the GPU
 */
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct InstanceRaw {
    model: [[f32; 4]; 4],
    normal: [[f32; 3]; 3],
    receive_shadow: f32,
}

/**
 * As we store vertex data directly in the GPU memory we need to tell what the bytes refer to:
 *
 * Stride layout here: world transform as 4x4 matrix (hence the four 4d vectors), followed by
 * the 3x3 normal matrix and the shadow receiver flag.
 */
impl model::Vertex for InstanceRaw {
    fn desc() -> wgpu::VertexBufferLayout<'static> {
        use std::mem;
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<InstanceRaw>() as wgpu::BufferAddress,
            // Shaders only advance to the next element once a new instance starts
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 5,
                    format: wgpu::VertexFormat::Float32x4,
                },
                // A mat4 takes up 4 vertex slots as it is technically 4 vec4s.
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 4]>() as wgpu::BufferAddress,
                    shader_location: 6,
                    format: wgpu::VertexFormat::Float32x4,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 8]>() as wgpu::BufferAddress,
                    shader_location: 7,
                    format: wgpu::VertexFormat::Float32x4,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 12]>() as wgpu::BufferAddress,
                    shader_location: 8,
                    format: wgpu::VertexFormat::Float32x4,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 16]>() as wgpu::BufferAddress,
                    shader_location: 9,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 19]>() as wgpu::BufferAddress,
                    shader_location: 10,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 22]>() as wgpu::BufferAddress,
                    shader_location: 11,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 25]>() as wgpu::BufferAddress,
                    shader_location: 12,
                    format: wgpu::VertexFormat::Float32,
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cgmath::Rotation3;

    #[test]
    fn parent_transform_applies_to_child() {
        let parent = Instance {
            position: [1.0, 0.0, 0.0].into(),
            rotation: cgmath::Quaternion::from_angle_y(cgmath::Deg(90.0)),
            scale: [2.0, 2.0, 2.0].into(),
        };
        let child = Instance::from(cgmath::Vector3::new(0.0, 0.0, 1.0));
        let world = parent * child;
        // (0,0,1) scaled to (0,0,2), rotated 90° around y to (2,0,0), then moved by 1
        assert_relative_eq!(world.position.x, 3.0, epsilon = 1e-5);
        assert_relative_eq!(world.position.y, 0.0, epsilon = 1e-5);
        assert_relative_eq!(world.position.z, 0.0, epsilon = 1e-5);
        assert_relative_eq!(world.scale.x, 2.0);
    }

    #[test]
    fn gltf_quaternions_are_xyzw() {
        let half = std::f32::consts::FRAC_1_SQRT_2;
        let instance = Instance::from(([0.0; 3], [0.0, half, 0.0, half], [1.0; 3]));
        assert_relative_eq!(instance.rotation.s, half);
        assert_relative_eq!(instance.rotation.v.y, half);
    }

    #[test]
    fn lights_point_down_negative_z_by_default() {
        let forward = Instance::new().forward();
        assert_relative_eq!(forward.z, -1.0);
    }
}
