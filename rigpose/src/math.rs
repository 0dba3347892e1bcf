//! Translation/rotation/scale transforms used by every slot of the hierarchy.

use glam::{Quat, Vec3};
use std::ops::Mul;

const SMALL_NUMBER: f32 = 1.0e-8;

/// A decomposed affine transform (no shear).
///
/// Composition follows the `parent * child` convention: `parent * local`
/// yields the child's global transform.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn new(translation: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self {
            translation,
            rotation,
            scale,
        }
    }

    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Self::IDENTITY
        }
    }

    pub fn from_xyz(x: f32, y: f32, z: f32) -> Self {
        Self::from_translation(Vec3::new(x, y, z))
    }

    pub fn from_rotation(rotation: Quat) -> Self {
        Self {
            rotation,
            ..Self::IDENTITY
        }
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    /// Returns a copy with a unit-length rotation.
    ///
    /// Degenerate rotations (zero length or non-finite) collapse to identity.
    pub fn normalized(mut self) -> Self {
        self.rotation = normalize_rotation(self.rotation);
        self
    }

    pub fn is_rotation_normalized(&self) -> bool {
        self.rotation.is_normalized()
    }

    /// Expresses `self` (a global transform) relative to `parent`.
    ///
    /// This is the exact inverse of `parent * local` for non-zero parent scale.
    pub fn relative_to(&self, parent: &Transform) -> Transform {
        let inverse_rotation = parent.rotation.conjugate();
        let reciprocal_scale = safe_reciprocal(parent.scale);
        Transform {
            translation: (inverse_rotation * (self.translation - parent.translation))
                * reciprocal_scale,
            rotation: inverse_rotation * self.rotation,
            scale: self.scale * reciprocal_scale,
        }
    }

    pub fn inverse(&self) -> Transform {
        Transform::IDENTITY.relative_to(self)
    }

    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.translation + self.rotation * (self.scale * point)
    }

    /// Component-wise comparison: translation and scale within `tolerance`,
    /// rotations equal up to sign with `|dot| > 1 - tolerance`.
    pub fn approx_eq(&self, other: &Transform, tolerance: f32) -> bool {
        self.translation.abs_diff_eq(other.translation, tolerance)
            && self.scale.abs_diff_eq(other.scale, tolerance)
            && self.rotation.dot(other.rotation).abs() > 1.0 - tolerance
    }
}

impl Mul<Transform> for Transform {
    type Output = Transform;

    fn mul(self, child: Transform) -> Transform {
        Transform {
            translation: self.transform_point(child.translation),
            rotation: self.rotation * child.rotation,
            scale: self.scale * child.scale,
        }
    }
}

pub(crate) fn normalize_rotation(rotation: Quat) -> Quat {
    let length_squared = rotation.length_squared();
    if !length_squared.is_finite() || length_squared <= SMALL_NUMBER {
        return Quat::IDENTITY;
    }
    rotation * length_squared.sqrt().recip()
}

fn safe_reciprocal(v: Vec3) -> Vec3 {
    fn recip(x: f32) -> f32 {
        if x.abs() <= SMALL_NUMBER { 0.0 } else { 1.0 / x }
    }
    Vec3::new(recip(v.x), recip(v.y), recip(v.z))
}
