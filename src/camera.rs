//! Camera, projection and the orbit controller driving them.
//!
//! The camera always looks at a target point. [`OrbitController`] moves the
//! camera on a sphere around that target: it spins slowly on its own when
//! auto-rotation is on, rotates on left-drag and dollies on the mouse wheel.

use std::f32::consts::{PI, TAU};

use cgmath::{InnerSpace, Matrix4, Point3, Rad, Vector3, perspective};
use wgpu::util::DeviceExt;
use winit::event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent};

use crate::config::CameraSettings;

#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: Matrix4<f32> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

const MIN_POLAR_EPS: f32 = 1e-6;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub position: Point3<f32>,
    pub target: Point3<f32>,
}

impl Camera {
    pub fn new<P: Into<Point3<f32>>>(position: P, target: P) -> Self {
        Self {
            position: position.into(),
            target: target.into(),
        }
    }

    pub fn calc_matrix(&self) -> Matrix4<f32> {
        Matrix4::look_at_rh(self.position, self.target, Vector3::unit_y())
    }

    pub fn distance(&self) -> f32 {
        (self.position - self.target).magnitude()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Projection {
    pub aspect: f32,
    pub fovy: Rad<f32>,
    pub znear: f32,
    pub zfar: f32,
}

impl Projection {
    pub fn new<F: Into<Rad<f32>>>(width: u32, height: u32, fovy: F, znear: f32, zfar: f32) -> Self {
        Self {
            aspect: width as f32 / height.max(1) as f32,
            fovy: fovy.into(),
            znear,
            zfar,
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.aspect = width as f32 / height.max(1) as f32;
    }

    pub fn calc_matrix(&self) -> Matrix4<f32> {
        OPENGL_TO_WGPU_MATRIX * perspective(self.fovy, self.aspect, self.znear, self.zfar)
    }
}

/// Orbits the camera around its target.
#[derive(Debug)]
pub struct OrbitController {
    pub auto_rotate: bool,
    /// Full turns per minute.
    pub auto_rotate_speed: f32,
    pub enable_pan: bool,
    pub enable_zoom: bool,
    pub rotate_speed: f32,
    pub zoom_speed: f32,
    pub min_distance: f32,
    pub max_distance: f32,
    pub min_polar_angle: f32,
    pub max_polar_angle: f32,
    theta_delta: f32,
    phi_delta: f32,
    scale: f32,
    pan_pixels: (f32, f32),
    rotating: bool,
    panning: bool,
    cursor: Option<(f64, f64)>,
    viewport: (u32, u32),
}

impl OrbitController {
    pub fn new(auto_rotate: bool, enable_pan: bool) -> Self {
        Self {
            auto_rotate,
            auto_rotate_speed: 2.0,
            enable_pan,
            enable_zoom: true,
            rotate_speed: 1.0,
            zoom_speed: 1.0,
            min_distance: 0.0,
            max_distance: f32::INFINITY,
            min_polar_angle: 0.0,
            max_polar_angle: PI,
            theta_delta: 0.0,
            phi_delta: 0.0,
            scale: 1.0,
            pan_pixels: (0.0, 0.0),
            rotating: false,
            panning: false,
            cursor: None,
            viewport: (1, 1),
        }
    }

    pub fn from_settings(settings: &CameraSettings) -> Self {
        Self::new(settings.auto_rotate, settings.enable_pan)
    }

    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.viewport = (width.max(1), height.max(1));
    }

    /// Angle auto-rotation advances by in `dt` seconds.
    pub fn auto_rotation_angle(&self, dt: f32) -> f32 {
        TAU / 60.0 * self.auto_rotate_speed * dt
    }

    pub fn rotate_left(&mut self, angle: f32) {
        self.theta_delta -= angle;
    }

    pub fn rotate_up(&mut self, angle: f32) {
        self.phi_delta -= angle;
    }

    pub fn dolly_in(&mut self, factor: f32) {
        if self.enable_zoom {
            self.scale *= factor;
        }
    }

    pub fn dolly_out(&mut self, factor: f32) {
        if self.enable_zoom {
            self.scale /= factor;
        }
    }

    fn zoom_factor(&self) -> f32 {
        0.95_f32.powf(self.zoom_speed)
    }

    /// Feeds a window event. Returns whether the controller consumed it.
    pub fn handle_window_event(&mut self, event: &WindowEvent) -> bool {
        match event {
            WindowEvent::MouseInput { state, button, .. } => {
                let pressed = *state == ElementState::Pressed;
                match button {
                    MouseButton::Left => {
                        self.rotating = pressed;
                        true
                    }
                    MouseButton::Right if self.enable_pan => {
                        self.panning = pressed;
                        true
                    }
                    _ => false,
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                let previous = self.cursor.replace((position.x, position.y));
                let Some((x, y)) = previous else {
                    return false;
                };
                let dx = (position.x - x) as f32;
                let dy = (position.y - y) as f32;
                let height = self.viewport.1 as f32;
                if self.rotating {
                    self.rotate_left(TAU * dx / height * self.rotate_speed);
                    self.rotate_up(TAU * dy / height * self.rotate_speed);
                    true
                } else if self.panning {
                    self.pan_pixels.0 += dx;
                    self.pan_pixels.1 += dy;
                    true
                } else {
                    false
                }
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let scroll = match delta {
                    MouseScrollDelta::LineDelta(_, y) => *y,
                    MouseScrollDelta::PixelDelta(position) => position.y as f32,
                };
                let factor = self.zoom_factor();
                if scroll > 0.0 {
                    self.dolly_in(factor);
                } else if scroll < 0.0 {
                    self.dolly_out(factor);
                }
                scroll != 0.0
            }
            WindowEvent::CursorLeft { .. } => {
                self.cursor = None;
                self.rotating = false;
                self.panning = false;
                false
            }
            _ => false,
        }
    }

    /// Applies pending input and auto-rotation to `camera`.
    pub fn update(&mut self, camera: &mut Camera, projection: &Projection, dt: f32) {
        let offset = camera.position - camera.target;
        let mut radius = offset.magnitude();
        if radius <= f32::EPSILON {
            return;
        }
        let mut theta = offset.x.atan2(offset.z);
        let mut phi = (offset.y / radius).clamp(-1.0, 1.0).acos();

        if self.auto_rotate && !self.rotating {
            self.rotate_left(self.auto_rotation_angle(dt));
        }

        theta += self.theta_delta;
        phi += self.phi_delta;
        phi = phi
            .clamp(self.min_polar_angle, self.max_polar_angle)
            .clamp(MIN_POLAR_EPS, PI - MIN_POLAR_EPS);
        radius = (radius * self.scale).clamp(self.min_distance, self.max_distance);

        if self.enable_pan && self.pan_pixels != (0.0, 0.0) {
            // world units per pixel at the target's depth
            let per_pixel = 2.0 * radius * (projection.fovy.0 / 2.0).tan() / self.viewport.1 as f32;
            let forward = (camera.target - camera.position).normalize();
            let right = forward.cross(Vector3::unit_y()).normalize();
            let up = right.cross(forward);
            let pan = right * (-self.pan_pixels.0 * per_pixel) + up * (self.pan_pixels.1 * per_pixel);
            camera.target += pan;
        }

        let (sin_phi, cos_phi) = phi.sin_cos();
        let (sin_theta, cos_theta) = theta.sin_cos();
        camera.position = camera.target
            + Vector3::new(
                radius * sin_phi * sin_theta,
                radius * cos_phi,
                radius * sin_phi * cos_theta,
            );

        self.theta_delta = 0.0;
        self.phi_delta = 0.0;
        self.scale = 1.0;
        self.pan_pixels = (0.0, 0.0);
    }
}

/// Camera data as laid out in the shaders' `CameraUniform`.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniform {
    pub view_position: [f32; 4],
    pub view_proj: [[f32; 4]; 4],
}

impl CameraUniform {
    pub fn new() -> Self {
        use cgmath::SquareMatrix;
        Self {
            view_position: [0.0; 4],
            view_proj: cgmath::Matrix4::identity().into(),
        }
    }

    pub fn update_view_proj(&mut self, camera: &Camera, projection: &Projection) {
        self.view_position = camera.position.to_homogeneous().into();
        self.view_proj = (projection.calc_matrix() * camera.calc_matrix()).into();
    }

    /// For cameras that are not a [`Camera`], e.g. a light's shadow frustum.
    pub fn from_matrix(position: Point3<f32>, view_proj: Matrix4<f32>) -> Self {
        Self {
            view_position: position.to_homogeneous().into(),
            view_proj: view_proj.into(),
        }
    }
}

impl Default for CameraUniform {
    fn default() -> Self {
        Self::new()
    }
}

pub fn mk_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }],
        label: Some("camera_bind_group_layout"),
    })
}

/// A camera uniform buffer and its bind group.
#[derive(Debug)]
pub struct CameraBinding {
    pub buffer: wgpu::Buffer,
    pub bind_group: wgpu::BindGroup,
}

impl CameraBinding {
    pub fn new(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        uniform: CameraUniform,
        label: &str,
    ) -> Self {
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(&[uniform]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
            label: Some(label),
        });
        Self { buffer, bind_group }
    }

    pub fn write(&self, queue: &wgpu::Queue, uniform: &CameraUniform) {
        queue.write_buffer(&self.buffer, 0, bytemuck::cast_slice(&[*uniform]));
    }
}

/// The viewer camera with its controller and GPU binding.
#[derive(Debug)]
pub struct CameraResources {
    pub camera: Camera,
    pub controller: OrbitController,
    pub uniform: CameraUniform,
    pub binding: CameraBinding,
    pub bind_group_layout: wgpu::BindGroupLayout,
}

impl CameraResources {
    pub fn new(
        device: &wgpu::Device,
        camera: Camera,
        controller: OrbitController,
        projection: &Projection,
    ) -> Self {
        let mut uniform = CameraUniform::new();
        uniform.update_view_proj(&camera, projection);
        let bind_group_layout = mk_bind_group_layout(device);
        let binding = CameraBinding::new(device, &bind_group_layout, uniform, "camera_bind_group");
        Self {
            camera,
            controller,
            uniform,
            binding,
            bind_group_layout,
        }
    }

    /// Advances the controller and uploads the new view projection.
    pub fn update(&mut self, queue: &wgpu::Queue, projection: &Projection, dt: f32) {
        self.controller.update(&mut self.camera, projection, dt);
        self.uniform.update_view_proj(&self.camera, projection);
        self.binding.write(queue, &self.uniform);
    }

    pub fn destroy(&self) {
        self.binding.buffer.destroy();
    }
}
