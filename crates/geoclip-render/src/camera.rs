//! Orbit camera driving the streaming origin.

use geoclip_core::SampleCoord;
use glam::{Mat4, Vec2, Vec3};
use std::f32::consts::FRAC_PI_2;

/// Smallest angle between the view direction and the poles.
const PITCH_MARGIN: f32 = 0.01;

/// Camera orbiting a ground target. Y is up, the terrain lies in XZ.
#[derive(Debug, Clone, PartialEq)]
pub struct OrbitCamera {
    pub target: Vec3,
    /// Rotation around the Y axis in radians.
    pub yaw: f32,
    /// Elevation above the horizon in radians.
    pub pitch: f32,
    pub distance: f32,
    pub min_distance: f32,
    pub max_distance: f32,
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self {
            target: Vec3::ZERO,
            yaw: 0.0,
            pitch: 0.5,
            distance: 120.0,
            min_distance: 2.0,
            max_distance: 4000.0,
            fov: std::f32::consts::FRAC_PI_4,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 10_000.0,
        }
    }
}

impl OrbitCamera {
    /// Camera looking at `target` from `distance`.
    pub fn new(target: Vec3, distance: f32) -> Self {
        let mut camera = Self {
            target,
            ..Self::default()
        };
        camera.distance = camera.clamp_distance(distance);
        camera
    }

    pub fn with_distance_limits(mut self, min_distance: f32, max_distance: f32) -> Self {
        self.min_distance = min_distance;
        self.max_distance = max_distance.max(min_distance);
        self.distance = self.clamp_distance(self.distance);
        self
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        self.aspect = aspect;
    }

    /// Rotate around the target. Pitch stays clear of the poles.
    pub fn orbit(&mut self, delta_yaw: f32, delta_pitch: f32) {
        self.yaw = (self.yaw + delta_yaw).rem_euclid(std::f32::consts::TAU);
        let limit = FRAC_PI_2 - PITCH_MARGIN;
        self.pitch = (self.pitch + delta_pitch).clamp(-limit, limit);
    }

    /// Scale the orbit distance; factors below one move closer.
    pub fn zoom(&mut self, factor: f32) {
        if factor.is_finite() && factor > 0.0 {
            self.distance = self.clamp_distance(self.distance * factor);
        }
    }

    /// Move the target in the ground plane, relative to the view heading.
    ///
    /// `delta.x` moves right, `delta.y` moves forward.
    pub fn pan(&mut self, delta: Vec2) {
        let forward = Vec3::new(-self.yaw.sin(), 0.0, -self.yaw.cos());
        let right = Vec3::new(self.yaw.cos(), 0.0, -self.yaw.sin());
        self.target += right * delta.x + forward * delta.y;
    }

    /// Eye position.
    pub fn position(&self) -> Vec3 {
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        self.target + Vec3::new(sin_yaw * cos_pitch, sin_pitch, cos_yaw * cos_pitch) * self.distance
    }

    pub fn direction(&self) -> Vec3 {
        (self.target - self.position()).normalize_or_zero()
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position(), self.target, Vec3::Y)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov, self.aspect, self.near, self.far)
    }

    /// Get the view-projection matrix.
    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Get camera uniforms for GPU.
    pub fn uniforms(&self) -> CameraUniforms {
        CameraUniforms::from(self)
    }

    /// Level-0 sample under the eye; the streaming engine centres on it.
    pub fn sample_position(&self, sample_world_size: f32) -> SampleCoord {
        let eye = self.position();
        SampleCoord::from_world(Vec2::new(eye.x, eye.z), sample_world_size)
    }

    fn clamp_distance(&self, distance: f32) -> f32 {
        distance.clamp(self.min_distance, self.max_distance)
    }
}

/// Camera uniform buffer data for GPU.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniforms {
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub view_projection: [[f32; 4]; 4],
    pub position: [f32; 4],
    pub direction: [f32; 4],
}

impl From<&OrbitCamera> for CameraUniforms {
    fn from(camera: &OrbitCamera) -> Self {
        let position = camera.position();
        let direction = camera.direction();
        Self {
            view: camera.view_matrix().to_cols_array_2d(),
            projection: camera.projection_matrix().to_cols_array_2d(),
            view_projection: camera.view_projection_matrix().to_cols_array_2d(),
            position: [position.x, position.y, position.z, 1.0],
            direction: [direction.x, direction.y, direction.z, 0.0],
        }
    }
}
