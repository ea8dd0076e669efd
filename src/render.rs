//! Drawing the scene.
//!
//! [`SceneGpu`] mirrors the mesh nodes of a loaded asset on the GPU: one
//! [`Drawable`] per mesh node with its material bind group and a one-element
//! instance buffer holding the node's world transform. [`render`] draws a
//! frame: the shadow pass of the caster light (if any), then the main pass.

use std::collections::HashMap;

use cgmath::EuclideanSpace;
use log::{debug, info, warn};
use wgpu::util::DeviceExt;

use crate::{
    camera::CameraUniform,
    context::Context,
    data_structures::{
        model::{DrawModel, GpuMaterial, Mesh},
        scene_graph::{ColorEncoding, NodeId, NodeKind, SceneNode},
        texture::Texture,
    },
    pipelines::light::{LightUniform, SceneLights},
    resources::{
        mesh::MeshData,
        texture::{ImageData, upload_image},
    },
};

/// A mesh node as uploaded to the GPU.
#[derive(Debug)]
pub struct Drawable {
    pub node: NodeId,
    pub name: String,
    /// Index into [`SceneGpu`]'s meshes.
    pub mesh: usize,
    pub material: GpuMaterial,
    pub instances: wgpu::Buffer,
    pub cast_shadow: bool,
    pub double_sided: bool,
}

#[derive(Debug, Default)]
pub struct SceneGpu {
    meshes: Vec<Option<Mesh>>,
    textures: HashMap<(usize, ColorEncoding), Texture>,
    drawables: Vec<Drawable>,
}

impl SceneGpu {
    /// Uploads every mesh node below `root`. Textures are created with the
    /// encoding of the material slot that uses them.
    pub fn upload(ctx: &Context, root: &SceneNode, meshes: &[MeshData], images: &[ImageData]) -> Self {
        let gpu_meshes: Vec<Option<Mesh>> = meshes
            .iter()
            .map(|data| {
                if data.indices.is_empty() {
                    debug!("{} has no triangles and is not uploaded", data.name);
                    return None;
                }
                Some(Mesh::new(&ctx.device, &data.name, &data.vertices, &data.indices))
            })
            .collect();

        let mut textures: HashMap<(usize, ColorEncoding), Texture> = HashMap::new();
        let mut drawables = Vec::new();
        root.traverse(&mut |node| {
            let NodeKind::Mesh(mesh_node) = &node.kind else {
                return;
            };
            if gpu_meshes.get(mesh_node.mesh).is_none_or(Option::is_none) {
                return;
            }
            let material = &mesh_node.material;

            let texture_key = material.base_color_texture.and_then(|slot| {
                let key = (slot.image, slot.encoding);
                if textures.contains_key(&key) {
                    return Some(key);
                }
                let Some(image) = images.get(slot.image) else {
                    warn!("{}: image {} does not exist", material.name, slot.image);
                    return None;
                };
                let label = format!("image {}", slot.image);
                let texture = upload_image(&ctx.device, &ctx.queue, image, &label, slot.encoding)?;
                textures.insert(key, texture);
                Some(key)
            });
            let (base_color, has_texture) = match texture_key.and_then(|key| textures.get(&key)) {
                Some(texture) => (texture, true),
                None => (&ctx.neutral_texture, false),
            };

            let gpu_material = GpuMaterial::new(
                &ctx.device,
                material,
                base_color,
                &ctx.sampler,
                has_texture,
                &ctx.material_layout,
            );
            let instances = ctx
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(&format!("{} Instance Buffer", node.name)),
                    contents: bytemuck::cast_slice(&[node.world.to_raw(node.receive_shadow)]),
                    usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                });
            drawables.push(Drawable {
                node: node.id,
                name: node.name.clone(),
                mesh: mesh_node.mesh,
                material: gpu_material,
                instances,
                cast_shadow: node.cast_shadow,
                double_sided: material.double_sided,
            });
        });

        info!(
            "uploaded {} drawables, {} meshes, {} textures",
            drawables.len(),
            gpu_meshes.iter().flatten().count(),
            textures.len()
        );
        Self {
            meshes: gpu_meshes,
            textures,
            drawables,
        }
    }

    pub fn drawables(&self) -> &[Drawable] {
        &self.drawables
    }

    fn mesh(&self, drawable: &Drawable) -> Option<&Mesh> {
        self.meshes.get(drawable.mesh)?.as_ref()
    }

    /// Writes the current world transforms of the mesh nodes below `root`.
    pub fn write_instances(&self, queue: &wgpu::Queue, root: &SceneNode) {
        let mut raw = HashMap::new();
        root.traverse(&mut |node| {
            if matches!(node.kind, NodeKind::Mesh(_)) {
                raw.insert(node.id, node.world.to_raw(node.receive_shadow));
            }
        });
        for drawable in &self.drawables {
            if let Some(instance) = raw.get(&drawable.node) {
                queue.write_buffer(&drawable.instances, 0, bytemuck::cast_slice(&[*instance]));
            }
        }
    }

    pub fn destroy(&self) {
        self.meshes.iter().flatten().for_each(Mesh::destroy);
        self.textures.values().for_each(Texture::destroy);
        for drawable in &self.drawables {
            drawable.material.uniform.destroy();
            drawable.instances.destroy();
        }
    }
}

/// Gathers the lights of `root` and uploads them. Returns whether a shadow
/// pass has to run this frame.
pub fn write_lights(ctx: &mut Context, root: &SceneNode) -> bool {
    let lights = SceneLights::gather(root);
    let shadow = if ctx.use_shadows {
        lights.shadow_params()
    } else {
        None
    };
    if let Some(params) = &shadow {
        ctx.ensure_shadow_map(params.map_size);
        let eye = lights.punctual[params.light_index].world.position;
        let uniform = CameraUniform::from_matrix(cgmath::Point3::from_vec(eye), params.view_proj);
        ctx.shadow.light_camera.write(&ctx.queue, &uniform);
    }
    ctx.lights
        .write(&ctx.queue, LightUniform::new(&lights, shadow.as_ref()));
    shadow.is_some()
}

/// What happened to a frame after asking the surface for a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    /// The surface had no texture to give this time.
    Skipped,
    /// The surface configuration no longer matches and must be redone.
    Reconfigure,
}

/// Draws one frame. Without a scene only the clear colour is presented.
pub fn render(
    ctx: &Context,
    scene: Option<&SceneGpu>,
    shadow_pass: bool,
    clear_colour: wgpu::Color,
) -> anyhow::Result<FrameStatus> {
    let (output, status) = match ctx.surface.get_current_texture() {
        wgpu::CurrentSurfaceTexture::Success(output) => (output, FrameStatus::Presented),
        wgpu::CurrentSurfaceTexture::Suboptimal(output) => (output, FrameStatus::Reconfigure),
        wgpu::CurrentSurfaceTexture::Timeout | wgpu::CurrentSurfaceTexture::Occluded => {
            return Ok(FrameStatus::Skipped);
        }
        wgpu::CurrentSurfaceTexture::Outdated | wgpu::CurrentSurfaceTexture::Lost => {
            return Ok(FrameStatus::Reconfigure);
        }
        wgpu::CurrentSurfaceTexture::Validation => {
            anyhow::bail!("the surface texture failed validation")
        }
    };
    let view = output
        .texture
        .create_view(&wgpu::TextureViewDescriptor::default());

    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Render Encoder"),
        });

    if let (Some(scene), true) = (scene, shadow_pass) {
        let mut depth_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Shadow Pass"),
            color_attachments: &[],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &ctx.shadow.map.view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            occlusion_query_set: None,
            timestamp_writes: None,
            multiview_mask: None,
        });
        depth_pass.set_pipeline(&ctx.shadow.pipeline);
        for drawable in scene.drawables.iter().filter(|d| d.cast_shadow) {
            let Some(mesh) = scene.mesh(drawable) else {
                continue;
            };
            depth_pass.set_vertex_buffer(1, drawable.instances.slice(..));
            depth_pass.draw_mesh_depth(mesh, 0..1, &ctx.shadow.light_camera.bind_group);
        }
    }

    {
        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Render Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(clear_colour),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &ctx.depth_texture.view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            occlusion_query_set: None,
            timestamp_writes: None,
            multiview_mask: None,
        });

        if let Some(scene) = scene {
            let mut double_sided = None;
            for drawable in &scene.drawables {
                let Some(mesh) = scene.mesh(drawable) else {
                    continue;
                };
                if double_sided != Some(drawable.double_sided) {
                    render_pass.set_pipeline(ctx.pipelines.for_material(drawable.double_sided));
                    double_sided = Some(drawable.double_sided);
                }
                render_pass.set_vertex_buffer(1, drawable.instances.slice(..));
                render_pass.draw_mesh_instanced(
                    mesh,
                    &drawable.material,
                    0..1,
                    &ctx.camera.binding.bind_group,
                    &ctx.lights.bind_group,
                    &ctx.environment.bind_group,
                );
            }
        }
    }

    ctx.queue.submit(std::iter::once(encoder.finish()));
    output.present();
    Ok(status)
}
