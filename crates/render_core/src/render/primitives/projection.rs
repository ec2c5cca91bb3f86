//! Projection matrix construction for the clip-space conventions backends use

use super::ClipDepth;
use crate::foundation::math::DMat4;

/// Clip-space convention of a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipConvention {
    /// Depth range after the perspective divide
    pub depth: ClipDepth,
    /// Clip-space Y grows downwards (Vulkan)
    pub y_down: bool,
}

impl ClipConvention {
    /// OpenGL style: depth in [-1, 1], Y up
    pub const OPENGL: Self = Self { depth: ClipDepth::NegativeOneToOne, y_down: false };

    /// Vulkan style: depth in [0, 1], Y down
    pub const VULKAN: Self = Self { depth: ClipDepth::ZeroToOne, y_down: true };

    fn y_sign(self) -> f64 {
        if self.y_down { -1.0 } else { 1.0 }
    }

    /// Off-center perspective projection for a right-handed view space
    pub fn perspective(self, left: f64, right: f64, bottom: f64, top: f64, near: f64, far: f64) -> DMat4 {
        let (rl, tb, fnr) = (right - left, top - bottom, far - near);
        let y = self.y_sign();

        let (zz, zw) = match self.depth {
            ClipDepth::NegativeOneToOne => (-(far + near) / fnr, -2.0 * far * near / fnr),
            ClipDepth::ZeroToOne => (far / (near - far), near * far / (near - far)),
        };

        DMat4::new(
            2.0 * near / rl, 0.0, (right + left) / rl, 0.0,
            0.0, y * 2.0 * near / tb, y * (top + bottom) / tb, 0.0,
            0.0, 0.0, zz, zw,
            0.0, 0.0, -1.0, 0.0,
        )
    }

    /// Off-center orthographic projection for a right-handed view space
    pub fn orthographic(self, left: f64, right: f64, bottom: f64, top: f64, near: f64, far: f64) -> DMat4 {
        let (rl, tb, fnr) = (right - left, top - bottom, far - near);
        let y = self.y_sign();

        let (zz, zw) = match self.depth {
            ClipDepth::NegativeOneToOne => (-2.0 / fnr, -(far + near) / fnr),
            ClipDepth::ZeroToOne => (-1.0 / fnr, -near / fnr),
        };

        DMat4::new(
            2.0 / rl, 0.0, 0.0, -(right + left) / rl,
            0.0, y * 2.0 / tb, 0.0, -y * (top + bottom) / tb,
            0.0, 0.0, zz, zw,
            0.0, 0.0, 0.0, 1.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::DVec4;
    use approx::assert_relative_eq;

    fn ndc_depth(m: &DMat4, view_z: f64) -> f64 {
        let clip = m * DVec4::new(0.0, 0.0, view_z, 1.0);
        clip.z / clip.w
    }

    #[test]
    fn test_perspective_depth_ranges() {
        let gl = ClipConvention::OPENGL.perspective(-1.0, 1.0, -1.0, 1.0, 1.0, 10.0);
        assert_relative_eq!(ndc_depth(&gl, -1.0), -1.0, epsilon = 1e-5);
        assert_relative_eq!(ndc_depth(&gl, -10.0), 1.0, epsilon = 1e-5);

        let vk = ClipConvention::VULKAN.perspective(-1.0, 1.0, -1.0, 1.0, 1.0, 10.0);
        assert_relative_eq!(ndc_depth(&vk, -1.0), 0.0, epsilon = 1e-5);
        assert_relative_eq!(ndc_depth(&vk, -10.0), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_orthographic_depth_ranges() {
        let gl = ClipConvention::OPENGL.orthographic(0.0, 800.0, 0.0, 600.0, 0.0, 1.0);
        assert_relative_eq!(ndc_depth(&gl, 0.0), -1.0, epsilon = 1e-5);
        assert_relative_eq!(ndc_depth(&gl, -1.0), 1.0, epsilon = 1e-5);

        let vk = ClipConvention::VULKAN.orthographic(0.0, 800.0, 0.0, 600.0, 0.0, 1.0);
        assert_relative_eq!(ndc_depth(&vk, 0.0), 0.0, epsilon = 1e-5);
        assert_relative_eq!(ndc_depth(&vk, -1.0), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_far_plane_survives_large_ratio() {
        let gl = ClipConvention::OPENGL.perspective(-0.5, 0.5, -0.5, 0.5, 0.5, 100.0);
        assert_relative_eq!(ndc_depth(&gl, -100.0), 1.0, epsilon = 1e-12);
        assert_relative_eq!(ndc_depth(&gl, -0.5), -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_vulkan_flips_y() {
        let vk = ClipConvention::VULKAN.orthographic(-1.0, 1.0, -1.0, 1.0, 0.0, 1.0);
        let top = vk * DVec4::new(0.0, 1.0, 0.0, 1.0);
        assert_relative_eq!(top.y, -1.0, epsilon = 1e-6);
    }
}
