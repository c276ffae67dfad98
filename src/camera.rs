//! Orbit camera, projection, and the GPU uniform they feed.

use cgmath::{Deg, InnerSpace, Matrix4, Point3, Rad, SquareMatrix, Vector3, perspective};
use wgpu::util::DeviceExt;

#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: Matrix4<f32> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

/// Look-at camera. The capture service swaps eye/target for its fixed
/// poses and restores them afterward.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub eye: Point3<f32>,
    pub target: Point3<f32>,
    pub up: Vector3<f32>,
}

impl Camera {
    /// Default viewing pose: slightly above and to the side, aimed at the
    /// origin where the asset sits.
    pub fn initial() -> Self {
        Self {
            eye: Point3::new(0.6, 0.1, 0.0),
            target: Point3::new(0.0, 0.0, 0.0),
            up: Vector3::unit_y(),
        }
    }

    pub fn view_matrix(&self) -> Matrix4<f32> {
        Matrix4::look_at_rh(self.eye, self.target, self.up)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Projection {
    pub aspect: f32,
    pub fovy: Deg<f32>,
    pub znear: f32,
    pub zfar: f32,
}

impl Projection {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            aspect: width as f32 / height.max(1) as f32,
            fovy: Deg(45.0),
            znear: 0.01,
            zfar: 100.0,
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.aspect = width as f32 / height.max(1) as f32;
    }

    pub fn matrix(&self) -> Matrix4<f32> {
        OPENGL_TO_WGPU_MATRIX * perspective(self.fovy, self.aspect, self.znear, self.zfar)
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniform {
    view_proj: [[f32; 4]; 4],
    view_pos: [f32; 4],
}

impl CameraUniform {
    pub fn new() -> Self {
        Self {
            view_proj: Matrix4::identity().into(),
            view_pos: [0.0; 4],
        }
    }

    pub fn update_view_proj(&mut self, camera: &Camera, projection: &Projection) {
        self.view_proj = (projection.matrix() * camera.view_matrix()).into();
        self.view_pos = [camera.eye.x, camera.eye.y, camera.eye.z, 1.0];
    }
}

impl Default for CameraUniform {
    fn default() -> Self {
        Self::new()
    }
}

/// Mouse-driven orbit around the camera target, with an optional slow
/// auto-rotate drift.
#[derive(Debug)]
pub struct OrbitController {
    yaw: Rad<f32>,
    pitch: Rad<f32>,
    distance: f32,
    rotate_speed: f32,
    zoom_speed: f32,
    pub auto_rotate: bool,
    auto_rotate_speed: f32,
}

impl OrbitController {
    const MIN_PITCH: f32 = -1.4;
    const MAX_PITCH: f32 = 1.4;
    const MIN_DISTANCE: f32 = 0.1;
    const MAX_DISTANCE: f32 = 5.0;

    pub fn new(camera: &Camera) -> Self {
        let offset = camera.eye - camera.target;
        let distance = offset.magnitude().max(Self::MIN_DISTANCE);
        Self {
            yaw: Rad(offset.z.atan2(offset.x)),
            pitch: Rad((offset.y / distance).asin()),
            distance,
            rotate_speed: 0.005,
            zoom_speed: 0.1,
            auto_rotate: false,
            auto_rotate_speed: 0.5,
        }
    }

    /// Apply a mouse drag delta in physical pixels.
    pub fn rotate(&mut self, dx: f32, dy: f32) {
        self.yaw += Rad(dx * self.rotate_speed);
        self.pitch += Rad(dy * self.rotate_speed);
        self.pitch.0 = self.pitch.0.clamp(Self::MIN_PITCH, Self::MAX_PITCH);
    }

    pub fn zoom(&mut self, scroll: f32) {
        self.distance = (self.distance - scroll * self.zoom_speed)
            .clamp(Self::MIN_DISTANCE, Self::MAX_DISTANCE);
    }

    /// Advance auto-rotation and write the resulting pose into `camera`.
    pub fn update(&mut self, camera: &mut Camera, dt: f32) {
        if self.auto_rotate {
            self.yaw += Rad(self.auto_rotate_speed * dt);
        }
        let cos_pitch = self.pitch.0.cos();
        camera.eye = camera.target
            + Vector3::new(
                self.yaw.0.cos() * cos_pitch,
                self.pitch.0.sin(),
                self.yaw.0.sin() * cos_pitch,
            ) * self.distance;
    }

    /// Re-derive yaw/pitch/distance from the camera pose, used after the
    /// capture service restores a saved pose.
    pub fn sync_from(&mut self, camera: &Camera) {
        let offset = camera.eye - camera.target;
        self.distance = offset.magnitude().max(Self::MIN_DISTANCE);
        self.yaw = Rad(offset.z.atan2(offset.x));
        self.pitch = Rad((offset.y / self.distance).asin());
    }
}

/// Camera state bundled with its GPU-side uniform resources.
pub struct CameraResources {
    pub camera: Camera,
    pub controller: OrbitController,
    pub uniform: CameraUniform,
    pub buffer: wgpu::Buffer,
    pub bind_group: wgpu::BindGroup,
    pub bind_group_layout: wgpu::BindGroupLayout,
}

impl CameraResources {
    pub fn new(device: &wgpu::Device, config: &wgpu::SurfaceConfiguration) -> Self {
        let camera = Camera::initial();
        let controller = OrbitController::new(&camera);
        let projection = Projection::new(config.width, config.height);

        let mut uniform = CameraUniform::new();
        uniform.update_view_proj(&camera, &projection);

        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Camera Buffer"),
            contents: bytemuck::cast_slice(&[uniform]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let bind_group_layout =
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
            });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
            label: Some("camera_bind_group"),
        });

        Self {
            camera,
            controller,
            uniform,
            buffer,
            bind_group,
            bind_group_layout,
        }
    }

    /// Push the current pose to the GPU. Called once per frame and by each
    /// capture pass after it swaps the pose.
    pub fn upload(&mut self, queue: &wgpu::Queue, projection: &Projection) {
        self.uniform.update_view_proj(&self.camera, projection);
        queue.write_buffer(&self.buffer, 0, bytemuck::cast_slice(&[self.uniform]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orbit_preserves_distance() {
        let mut camera = Camera::initial();
        let mut controller = OrbitController::new(&camera);
        let before = (camera.eye - camera.target).magnitude();
        controller.rotate(120.0, -40.0);
        controller.update(&mut camera, 1.0 / 60.0);
        let after = (camera.eye - camera.target).magnitude();
        assert!((before - after).abs() < 1e-4);
    }

    #[test]
    fn pitch_is_clamped() {
        let mut camera = Camera::initial();
        let mut controller = OrbitController::new(&camera);
        controller.rotate(0.0, 1e6);
        controller.update(&mut camera, 0.0);
        assert!(camera.eye.y.is_finite());
        assert!((camera.eye - camera.target).magnitude() > 0.0);
    }

    #[test]
    fn sync_from_round_trips_the_pose() {
        let mut camera = Camera::initial();
        let mut controller = OrbitController::new(&camera);
        controller.rotate(300.0, 75.0);
        controller.zoom(-2.0);
        controller.update(&mut camera, 0.0);

        let mut resynced = OrbitController::new(&Camera::initial());
        resynced.sync_from(&camera);
        let mut replayed = camera;
        resynced.update(&mut replayed, 0.0);
        assert!((replayed.eye - camera.eye).magnitude() < 1e-4);
    }
}
