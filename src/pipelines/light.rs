//! Scene lights as seen by the shaders.
//!
//! Lights live in the scene graph. Every frame they are gathered into a
//! [`SceneLights`] snapshot, packed into one [`LightUniform`] and bound next to
//! the shadow map and its comparison sampler.

use cgmath::{EuclideanSpace, Matrix4, Point3, Rad, Vector3};
use log::warn;
use wgpu::util::DeviceExt;

use crate::{
    camera::OPENGL_TO_WGPU_MATRIX,
    data_structures::{
        instance::Instance,
        scene_graph::{LightKind, LightNode, NodeKind, SceneNode},
        texture::Texture,
    },
};

/// The number of punctual lights the main shader evaluates.
pub const MAX_LIGHTS: usize = 4;

/// A punctual light with its world transform.
#[derive(Clone, Debug, PartialEq)]
pub struct PlacedLight {
    pub name: String,
    pub light: LightNode,
    pub world: Instance,
    pub cast_shadow: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SceneLights {
    /// Sky and ground colour premultiplied by intensity.
    pub hemisphere: Option<([f32; 3], [f32; 3])>,
    pub punctual: Vec<PlacedLight>,
}

impl SceneLights {
    /// Collects the lights of a scene in traversal order. Hemisphere lights add
    /// up, punctual lights past [`MAX_LIGHTS`] are dropped.
    pub fn gather(root: &SceneNode) -> Self {
        let mut lights = SceneLights::default();
        let mut dropped = 0;
        root.traverse(&mut |node| {
            let NodeKind::Light(light) = &node.kind else {
                return;
            };
            match light.kind {
                LightKind::Hemisphere { ground } => {
                    let (sky_sum, ground_sum) = lights.hemisphere.get_or_insert(([0.0; 3], [0.0; 3]));
                    for i in 0..3 {
                        sky_sum[i] += light.color[i] * light.intensity;
                        ground_sum[i] += ground[i] * light.intensity;
                    }
                }
                _ if lights.punctual.len() < MAX_LIGHTS => lights.punctual.push(PlacedLight {
                    name: node.name.clone(),
                    light: light.clone(),
                    world: node.world,
                    cast_shadow: node.cast_shadow,
                }),
                _ => dropped += 1,
            }
        });
        if dropped > 0 {
            warn!("{dropped} lights exceed the limit of {MAX_LIGHTS} and are ignored");
        }
        lights
    }

    /// Index of the light that renders the shadow map: the first caster that
    /// can have one.
    pub fn shadow_caster(&self) -> Option<usize> {
        self.punctual
            .iter()
            .position(|placed| placed.cast_shadow && placed.light.supports_shadow())
    }

    /// Shadow parameters of the caster, if it has a frustum.
    pub fn shadow_params(&self) -> Option<ShadowParams> {
        let light_index = self.shadow_caster()?;
        let placed = &self.punctual[light_index];
        let view_proj = shadow_view_proj(&placed.light, &placed.world)?;
        Some(ShadowParams {
            light_index,
            view_proj,
            bias: placed.light.shadow.bias,
            map_size: placed.light.shadow.map_size,
        })
    }
}

/// View projection of a light's shadow frustum. Point lights would need a
/// cube map and have none.
pub fn shadow_view_proj(light: &LightNode, world: &Instance) -> Option<Matrix4<f32>> {
    let eye = Point3::from_vec(world.position);
    let forward = world.forward();
    let up = if forward.y.abs() > 0.99 {
        Vector3::unit_z()
    } else {
        Vector3::unit_y()
    };
    let view = Matrix4::look_to_rh(eye, forward, up);
    let shadow = &light.shadow;
    let proj = match light.kind {
        LightKind::Directional => cgmath::ortho(
            -shadow.extent,
            shadow.extent,
            -shadow.extent,
            shadow.extent,
            shadow.near,
            shadow.far,
        ),
        LightKind::Spot {
            range, outer_cone, ..
        } => cgmath::perspective(
            Rad((2.0 * outer_cone).clamp(0.01, 3.1)),
            1.0,
            shadow.near,
            range.filter(|r| *r > shadow.near).unwrap_or(shadow.far),
        ),
        LightKind::Point { .. } | LightKind::Hemisphere { .. } => return None,
    };
    Some(OPENGL_TO_WGPU_MATRIX * proj * view)
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PunctualLightRaw {
    position: [f32; 4],
    direction: [f32; 4],
    color: [f32; 4],
    cone: [f32; 4],
}

impl PunctualLightRaw {
    fn new(placed: &PlacedLight) -> Self {
        let light = &placed.light;
        let (kind, range, cone) = match light.kind {
            LightKind::Directional | LightKind::Hemisphere { .. } => (0.0, 0.0, [0.0; 4]),
            LightKind::Point { range } => (1.0, range.unwrap_or(0.0), [0.0; 4]),
            LightKind::Spot {
                range,
                inner_cone,
                outer_cone,
            } => (
                2.0,
                range.unwrap_or(0.0),
                [inner_cone.cos(), outer_cone.cos(), 0.0, 0.0],
            ),
        };
        let p = placed.world.position;
        let d = placed.world.forward();
        let c = light.color.map(|c| c * light.intensity);
        Self {
            position: [p.x, p.y, p.z, kind],
            direction: [d.x, d.y, d.z, range],
            color: [c[0], c[1], c[2], 1.0],
            cone,
        }
    }
}

/// Shadow parameters of the frame's caster.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShadowParams {
    pub light_index: usize,
    pub view_proj: Matrix4<f32>,
    pub bias: f32,
    pub map_size: [u32; 2],
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightUniform {
    sky: [f32; 4],
    ground: [f32; 4],
    shadow_view_proj: [[f32; 4]; 4],
    // bias, enabled, light index, texel size
    shadow: [f32; 4],
    counts: [f32; 4],
    lights: [PunctualLightRaw; MAX_LIGHTS],
}

impl LightUniform {
    pub fn new(lights: &SceneLights, shadow: Option<&ShadowParams>) -> Self {
        let (sky, ground) = lights.hemisphere.unwrap_or(([0.0; 3], [0.0; 3]));
        let mut raw = [PunctualLightRaw::default(); MAX_LIGHTS];
        for (slot, placed) in raw.iter_mut().zip(&lights.punctual) {
            *slot = PunctualLightRaw::new(placed);
        }
        let (shadow_view_proj, shadow) = match shadow {
            Some(params) => (
                params.view_proj.into(),
                [
                    params.bias,
                    1.0,
                    params.light_index as f32,
                    1.0 / params.map_size[0].max(1) as f32,
                ],
            ),
            None => (
                <Matrix4<f32> as cgmath::SquareMatrix>::identity().into(),
                [0.0, 0.0, -1.0, 0.0],
            ),
        };
        Self {
            sky: [sky[0], sky[1], sky[2], 1.0],
            ground: [ground[0], ground[1], ground[2], 1.0],
            shadow_view_proj,
            shadow,
            counts: [lights.punctual.len().min(MAX_LIGHTS) as f32, 0.0, 0.0, 0.0],
            lights: raw,
        }
    }

    pub fn light_count(&self) -> usize {
        self.counts[0] as usize
    }

    pub fn shadow_enabled(&self) -> bool {
        self.shadow[1] > 0.5
    }
}

pub fn mk_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    multisampled: false,
                    view_dimension: wgpu::TextureViewDimension::D2,
                    sample_type: wgpu::TextureSampleType::Depth,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison),
                count: None,
            },
        ],
        label: Some("light_bind_group_layout"),
    })
}

fn mk_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    buffer: &wgpu::Buffer,
    shadow_map: &Texture,
    shadow_sampler: &wgpu::Sampler,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::TextureView(&shadow_map.view),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: wgpu::BindingResource::Sampler(shadow_sampler),
            },
        ],
        label: Some("light_bind_group"),
    })
}

#[derive(Debug)]
pub struct LightResources {
    pub uniform: LightUniform,
    pub buffer: wgpu::Buffer,
    pub bind_group: wgpu::BindGroup,
    pub bind_group_layout: wgpu::BindGroupLayout,
}

impl LightResources {
    pub fn new(device: &wgpu::Device, shadow_map: &Texture, shadow_sampler: &wgpu::Sampler) -> Self {
        let uniform = LightUniform::new(&SceneLights::default(), None);
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Light Buffer"),
            contents: bytemuck::cast_slice(&[uniform]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let bind_group_layout = mk_bind_group_layout(device);
        let bind_group = mk_bind_group(device, &bind_group_layout, &buffer, shadow_map, shadow_sampler);
        Self {
            uniform,
            buffer,
            bind_group,
            bind_group_layout,
        }
    }

    /// Points the bind group at a new shadow map.
    pub fn rebind(&mut self, device: &wgpu::Device, shadow_map: &Texture, shadow_sampler: &wgpu::Sampler) {
        self.bind_group = mk_bind_group(
            device,
            &self.bind_group_layout,
            &self.buffer,
            shadow_map,
            shadow_sampler,
        );
    }

    pub fn write(&mut self, queue: &wgpu::Queue, uniform: LightUniform) {
        self.uniform = uniform;
        queue.write_buffer(&self.buffer, 0, bytemuck::cast_slice(&[uniform]));
    }

    pub fn destroy(&self) {
        self.buffer.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cgmath::{Rotation3, Transform};

    fn light_node(name: &str, light: LightNode, world: Instance) -> SceneNode {
        let mut node = SceneNode::new(name, NodeKind::Light(light));
        node.local = world;
        node
    }

    #[test]
    fn lights_are_gathered_and_capped() {
        let mut root = SceneNode::group("scene");
        root.add_child(light_node(
            "hemi",
            LightNode::new(LightKind::Hemisphere { ground: [0.5; 3] }, [1.0; 3], 4.0),
            Instance::default(),
        ));
        for i in 0..6 {
            root.add_child(light_node(
                &format!("point {i}"),
                LightNode::new(LightKind::Point { range: None }, [1.0; 3], 1.0),
                Instance::default(),
            ));
        }
        root.update_world_transform_all();

        let lights = SceneLights::gather(&root);
        assert_eq!(lights.hemisphere, Some(([4.0; 3], [2.0; 3])));
        assert_eq!(lights.punctual.len(), MAX_LIGHTS);
        assert_eq!(lights.punctual[3].name, "point 3");
        assert_eq!(LightUniform::new(&lights, None).light_count(), MAX_LIGHTS);
    }

    #[test]
    fn the_first_capable_caster_owns_the_shadow_map() {
        let mut root = SceneNode::group("scene");
        let mut point = light_node(
            "point_shadow",
            LightNode::new(LightKind::Point { range: None }, [1.0; 3], 1.0),
            Instance::default(),
        );
        point.cast_shadow = true;
        let mut sun = light_node(
            "sun_shadow",
            LightNode::new(LightKind::Directional, [1.0; 3], 3.0),
            Instance::default(),
        );
        sun.cast_shadow = true;
        root.add_child(light_node(
            "fill",
            LightNode::new(LightKind::Directional, [1.0; 3], 1.0),
            Instance::default(),
        ));
        root.add_child(point);
        root.add_child(sun);
        root.update_world_transform_all();

        let lights = SceneLights::gather(&root);
        // point lights are shadow capable but have no 2D frustum
        assert_eq!(lights.shadow_caster(), Some(1));
        let point = &lights.punctual[1];
        assert!(shadow_view_proj(&point.light, &point.world).is_none());
        let sun = &lights.punctual[2];
        assert!(shadow_view_proj(&sun.light, &sun.world).is_some());
        // and so the frame renders no shadow map
        assert!(lights.shadow_params().is_none());
    }

    #[test]
    fn shadow_params_come_from_the_caster() {
        let mut root = SceneNode::group("scene");
        let mut sun = LightNode::new(LightKind::Directional, [1.0; 3], 3.0);
        sun.shadow.map_size = [1024, 1024];
        let mut sun = light_node("sun_shadow", sun, Instance::default());
        sun.cast_shadow = true;
        root.add_child(light_node(
            "fill",
            LightNode::new(LightKind::Point { range: None }, [1.0; 3], 1.0),
            Instance::default(),
        ));
        root.add_child(sun);
        root.update_world_transform_all();

        let lights = SceneLights::gather(&root);
        let params = lights.shadow_params().unwrap();
        assert_eq!(params.light_index, 1);
        assert_eq!(params.map_size, [1024, 1024]);
        let uniform = LightUniform::new(&lights, Some(&params));
        assert!(uniform.shadow_enabled());
        assert_eq!(uniform.light_count(), 2);
    }

    #[test]
    fn directional_frustum_contains_what_the_light_faces() {
        // pointing straight down from y = 10
        let world = Instance {
            position: Vector3::new(0.0, 10.0, 0.0),
            rotation: cgmath::Quaternion::from_angle_x(cgmath::Deg(-90.0)),
            scale: Vector3::new(1.0, 1.0, 1.0),
        };
        let light = LightNode::new(LightKind::Directional, [1.0; 3], 1.0);
        let view_proj = shadow_view_proj(&light, &world).unwrap();

        let below = view_proj.transform_point(Point3::new(1.0, 0.0, 1.0));
        assert!(below.x.abs() <= 1.0 && below.y.abs() <= 1.0);
        assert!(below.z > 0.0 && below.z < 1.0);
        let behind = view_proj.transform_point(Point3::new(0.0, 20.0, 0.0));
        assert!(behind.z < 0.0);
    }

    #[test]
    fn uniform_packs_kind_range_and_cones() {
        let lights = SceneLights {
            hemisphere: None,
            punctual: vec![PlacedLight {
                name: "spot".to_string(),
                light: LightNode::new(
                    LightKind::Spot {
                        range: Some(8.0),
                        inner_cone: 0.0,
                        outer_cone: std::f32::consts::FRAC_PI_4,
                    },
                    [1.0, 0.5, 0.0],
                    2.0,
                ),
                world: Instance::default(),
                cast_shadow: false,
            }],
        };
        let uniform = LightUniform::new(&lights, None);
        let spot = uniform.lights[0];
        assert_eq!(spot.position[3], 2.0);
        assert_eq!(spot.direction, [0.0, 0.0, -1.0, 8.0]);
        assert_eq!(spot.color, [2.0, 1.0, 0.0, 1.0]);
        assert_relative_eq!(spot.cone[1], std::f32::consts::FRAC_1_SQRT_2, epsilon = 1e-6);
        assert!(!uniform.shadow_enabled());
    }
}
