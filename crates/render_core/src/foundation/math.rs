//! Math utilities and types
//!
//! Thin aliases over `nalgebra` plus the handful of view-space helpers the
//! renderer needs. View space is right-handed with the camera looking down -Z.

pub use nalgebra::{
    Vector2, Vector3, Vector4,
    Matrix3, Matrix4,
    Quaternion,
    Unit,
};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 3x3 matrix type
pub type Mat3 = Matrix3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// Double-precision 4D vector for camera math
pub type DVec4 = Vector4<f64>;

/// Double-precision 4x4 matrix for camera math
///
/// Projection terms such as `(far + near) / (far - near)` cancel badly in
/// f32; view and projection state is kept in f64 and narrowed per draw.
pub type DMat4 = Matrix4<f64>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Quaternion type for rotations
pub type Quat = Unit<Quaternion<f32>>;

/// Transform representing position, rotation, and scale
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    /// Position in 3D space
    pub position: Vec3,

    /// Rotation quaternion
    pub rotation: Quat,

    /// Scale factors
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            rotation: Quat::identity(),
            scale: Vec3::new(1.0, 1.0, 1.0),
        }
    }
}

impl Transform {
    /// Create a new identity transform
    pub fn identity() -> Self {
        Self::default()
    }

    /// Create a transform with only position
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Create a transform with position, rotation and scale
    pub fn new(position: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self { position, rotation, scale }
    }

    /// Convert to a transformation matrix (scale, then rotate, then translate)
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::new_translation(&self.position)
            * self.rotation.to_homogeneous()
            * Mat4::new_nonuniform_scaling(&self.scale)
    }
}

/// Math constants
pub mod constants {
    /// Pi constant
    pub const PI: f32 = std::f32::consts::PI;

    /// Degrees to radians conversion factor
    pub const DEG_TO_RAD: f32 = PI / 180.0;
}

/// Math utility functions
pub mod utils {
    use super::constants;

    /// Convert degrees to radians
    pub fn deg_to_rad(degrees: f32) -> f32 {
        degrees * constants::DEG_TO_RAD
    }
}

/// Extension trait for Mat4 with view-matrix constructors
pub trait Mat4Ext {
    /// Create a right-handed look-at view matrix
    fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Mat4;

    /// Create a view matrix from an orthonormal camera basis
    ///
    /// `look` is the viewing direction; it ends up on -Z in view space.
    fn from_camera_basis(right: Vec3, up: Vec3, look: Vec3, position: Vec3) -> Mat4;
}

impl Mat4Ext for Mat4 {
    fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Mat4 {
        let forward = (target - eye).normalize();
        let right = forward.cross(&up).normalize();
        let camera_up = right.cross(&forward);

        Self::from_camera_basis(right, camera_up, forward, eye)
    }

    fn from_camera_basis(right: Vec3, up: Vec3, look: Vec3, position: Vec3) -> Mat4 {
        let translation = Mat4::new(
            1.0, 0.0, 0.0, -position.x,
            0.0, 1.0, 0.0, -position.y,
            0.0, 0.0, 1.0, -position.z,
            0.0, 0.0, 0.0, 1.0,
        );

        let rotation = Mat4::new(
            right.x, right.y, right.z, 0.0,
            up.x, up.y, up.z, 0.0,
            -look.x, -look.y, -look.z, 0.0,  // Negative look for right-handed
            0.0, 0.0, 0.0, 1.0,
        );

        rotation * translation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_look_at_puts_target_on_negative_z() {
        let view = Mat4::look_at(
            Vec3::new(0.0, 0.0, 5.0),
            Vec3::zeros(),
            Vec3::new(0.0, 1.0, 0.0),
        );

        let target_in_view = view.transform_point(&Point3::origin());
        assert_relative_eq!(target_in_view.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(target_in_view.y, 0.0, epsilon = 1e-5);
        assert_relative_eq!(target_in_view.z, -5.0, epsilon = 1e-5);
    }

    #[test]
    fn test_transform_to_matrix_applies_scale_before_translation() {
        let transform = Transform::new(
            Vec3::new(1.0, 2.0, 3.0),
            Quat::identity(),
            Vec3::new(2.0, 2.0, 2.0),
        );

        let p = transform.to_matrix().transform_point(&Point3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(p.x, 3.0, epsilon = 1e-6);
        assert_relative_eq!(p.y, 2.0, epsilon = 1e-6);
        assert_relative_eq!(p.z, 3.0, epsilon = 1e-6);
    }
}
