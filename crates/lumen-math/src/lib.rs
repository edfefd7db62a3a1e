// SPDX-License-Identifier: CEPL-1.0
//! Per-frame model transform: a constant-rate spin about +Z with the
//! window's aspect ratio folded in so shapes keep their proportions.

use glam::{Mat4, Vec3};
use std::f32::consts::TAU;

/// Rotation that advances at a fixed angular speed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Spin {
    angle: f32,
    speed: f32,
}

impl Spin {
    /// `speed` is in radians per second.
    pub fn new(speed: f32) -> Self {
        Self { angle: 0.0, speed }
    }

    pub fn angle(&self) -> f32 {
        self.angle
    }

    /// Steps the angle by `dt` seconds, kept within `[0, TAU)`.
    pub fn advance(&mut self, dt: f32) -> f32 {
        self.angle = (self.angle + self.speed * dt).rem_euclid(TAU);
        self.angle
    }

    pub fn transform(&self, aspect: f32) -> Mat4 {
        model_transform(self.angle, aspect)
    }
}

/// Aspect correction applied after a rotation of `angle` radians about +Z.
pub fn model_transform(angle: f32, aspect: f32) -> Mat4 {
    aspect_correction(aspect) * Mat4::from_rotation_z(angle)
}

/// Squashes x by the aspect ratio; a non-positive or non-finite aspect is
/// treated as square.
pub fn aspect_correction(aspect: f32) -> Mat4 {
    let aspect = if aspect.is_finite() && aspect > 0.0 {
        aspect
    } else {
        1.0
    };
    Mat4::from_scale(Vec3::new(1.0 / aspect, 1.0, 1.0))
}

/// Push-constant block consumed by the vertex stage.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PushTransform {
    pub transform: Mat4,
}

impl PushTransform {
    pub const SIZE: u32 = std::mem::size_of::<Self>() as u32;

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}
