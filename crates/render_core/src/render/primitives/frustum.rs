//! Bounding volumes and view frustum planes

use crate::foundation::math::{DMat4, DVec4, Mat4, Point3, Vec3};

/// Axis-Aligned Bounding Box used for visibility culling
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    /// Minimum corner of the bounding box
    pub min: Vec3,
    /// Maximum corner of the bounding box
    pub max: Vec3,
}

impl Aabb {
    /// Create a new AABB from min and max points
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Create an AABB centered at a point with given extents
    pub fn from_center_extents(center: Vec3, extents: Vec3) -> Self {
        Self {
            min: center - extents,
            max: center + extents,
        }
    }

    /// Smallest box enclosing every point; `None` for an empty slice
    pub fn from_points(points: &[Vec3]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        Some(rest.iter().fold(Self::new(*first, *first), |acc, p| Self {
            min: acc.min.inf(p),
            max: acc.max.sup(p),
        }))
    }

    /// Get the center of the AABB
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get the extents (half-size) of the AABB
    pub fn extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// Check if this AABB contains a point
    pub fn contains_point(&self, point: Vec3) -> bool {
        point.x >= self.min.x && point.x <= self.max.x &&
        point.y >= self.min.y && point.y <= self.max.y &&
        point.z >= self.min.z && point.z <= self.max.z
    }

    /// The eight corners
    pub fn corners(&self) -> [Vec3; 8] {
        let (lo, hi) = (self.min, self.max);
        [
            Vec3::new(lo.x, lo.y, lo.z),
            Vec3::new(hi.x, lo.y, lo.z),
            Vec3::new(lo.x, hi.y, lo.z),
            Vec3::new(hi.x, hi.y, lo.z),
            Vec3::new(lo.x, lo.y, hi.z),
            Vec3::new(hi.x, lo.y, hi.z),
            Vec3::new(lo.x, hi.y, hi.z),
            Vec3::new(hi.x, hi.y, hi.z),
        ]
    }

    /// Axis-aligned box enclosing this box after an affine transform
    pub fn transformed(&self, matrix: &Mat4) -> Self {
        let corners = self.corners().map(|c| matrix.transform_point(&Point3::from(c)).coords);
        let mut out = Self::new(corners[0], corners[0]);
        for c in &corners[1..] {
            out.min = out.min.inf(c);
            out.max = out.max.sup(c);
        }
        out
    }
}

/// Plane `normal · p + distance = 0`; positive half-space is inside
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    /// Unit normal pointing into the frustum
    pub normal: Vec3,
    /// Signed distance term
    pub distance: f32,
}

impl Plane {
    /// Create a new plane from normal and distance
    pub fn new(normal: Vec3, distance: f32) -> Self {
        Self { normal: normal.normalize(), distance }
    }

    /// Build a normalized plane from raw `(a, b, c, d)` coefficients
    ///
    /// Normalization runs in f64; only the result is narrowed.
    pub fn from_coefficients(v: DVec4) -> Self {
        let normal = v.xyz();
        let length = normal.norm();
        if length <= f64::EPSILON {
            return Self { normal: Vec3::zeros(), distance: v.w as f32 };
        }
        Self {
            normal: (normal / length).cast::<f32>(),
            distance: (v.w / length) as f32,
        }
    }

    /// Calculate signed distance from plane to point
    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        self.normal.dot(&point) + self.distance
    }
}

/// Clip-space depth convention of a backend's projection matrices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipDepth {
    /// Depth in [-1, 1] (OpenGL convention)
    NegativeOneToOne,
    /// Depth in [0, 1] (Vulkan/Direct3D convention)
    ZeroToOne,
}

/// Index of each plane inside [`Frustum::planes`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrustumSide {
    /// x >= -w
    Left = 0,
    /// x <= w
    Right = 1,
    /// y >= -w
    Bottom = 2,
    /// y <= w
    Top = 3,
    /// Near clip plane
    Near = 4,
    /// Far clip plane
    Far = 5,
}

/// Six-plane view volume for visibility culling
#[derive(Debug, Clone, PartialEq)]
pub struct Frustum {
    /// Planes in [`FrustumSide`] order, normals pointing inwards
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Create a frustum from six planes
    pub fn new(planes: [Plane; 6]) -> Self {
        Self { planes }
    }

    /// Extract normalized planes from a view-projection matrix
    ///
    /// Gribb-Hartmann row combination. With `ZeroToOne` depth the near plane
    /// is the third row alone instead of `row3 + row2`.
    pub fn from_view_projection(m: &DMat4, depth: ClipDepth) -> Self {
        let row = |i: usize| -> DVec4 { m.row(i).transpose() };
        let (r0, r1, r2, r3) = (row(0), row(1), row(2), row(3));

        let near = match depth {
            ClipDepth::NegativeOneToOne => r3 + r2,
            ClipDepth::ZeroToOne => r2,
        };

        Self {
            planes: [
                Plane::from_coefficients(r3 + r0),
                Plane::from_coefficients(r3 - r0),
                Plane::from_coefficients(r3 + r1),
                Plane::from_coefficients(r3 - r1),
                Plane::from_coefficients(near),
                Plane::from_coefficients(r3 - r2),
            ],
        }
    }

    /// Plane on a given side
    pub fn plane(&self, side: FrustumSide) -> &Plane {
        &self.planes[side as usize]
    }

    /// Check if an AABB is inside or intersects the frustum
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        for plane in &self.planes {
            // Corner furthest along the plane normal
            let mut p = aabb.min;
            if plane.normal.x >= 0.0 { p.x = aabb.max.x; }
            if plane.normal.y >= 0.0 { p.y = aabb.max.y; }
            if plane.normal.z >= 0.0 { p.z = aabb.max.z; }

            if plane.distance_to_point(p) < 0.0 {
                return false;
            }
        }
        true
    }

    /// Check if a point lies inside all six planes
    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes.iter().all(|p| p.distance_to_point(point) >= 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn gl_perspective(n: f64, f: f64) -> DMat4 {
        DMat4::new(
            1.0, 0.0, 0.0, 0.0,
            0.0, 1.0, 0.0, 0.0,
            0.0, 0.0, -(f + n) / (f - n), -2.0 * f * n / (f - n),
            0.0, 0.0, -1.0, 0.0,
        )
    }

    fn vk_perspective(n: f64, f: f64) -> DMat4 {
        DMat4::new(
            1.0, 0.0, 0.0, 0.0,
            0.0, -1.0, 0.0, 0.0,
            0.0, 0.0, f / (n - f), n * f / (n - f),
            0.0, 0.0, -1.0, 0.0,
        )
    }

    #[test]
    fn test_aabb_contains_point() {
        let aabb = Aabb::new(
            Vec3::new(-1.0, -1.0, -1.0),
            Vec3::new(1.0, 1.0, 1.0),
        );

        assert!(aabb.contains_point(Vec3::zeros()));
        assert!(aabb.contains_point(Vec3::new(0.5, 0.5, 0.5)));
        assert!(!aabb.contains_point(Vec3::new(2.0, 0.0, 0.0)));
    }

    #[test]
    fn test_aabb_transformed_by_translation() {
        let aabb = Aabb::from_center_extents(Vec3::zeros(), Vec3::new(1.0, 1.0, 1.0));
        let moved = aabb.transformed(&Mat4::new_translation(&Vec3::new(0.0, 0.0, -10.0)));

        assert_relative_eq!(moved.min.z, -11.0, epsilon = 1e-6);
        assert_relative_eq!(moved.max.z, -9.0, epsilon = 1e-6);
    }

    #[test]
    fn test_near_far_distances_negative_one_to_one() {
        let frustum = Frustum::from_view_projection(&gl_perspective(0.5, 100.0), ClipDepth::NegativeOneToOne);

        let near = frustum.plane(FrustumSide::Near);
        let far = frustum.plane(FrustumSide::Far);
        assert_relative_eq!(near.normal.z, -1.0, epsilon = 1e-5);
        assert_relative_eq!(near.distance.abs(), 0.5, epsilon = 1e-4);
        assert_relative_eq!(far.normal.z, 1.0, epsilon = 1e-5);
        assert_relative_eq!(far.distance.abs(), 100.0, epsilon = 1e-4);
    }

    #[test]
    fn test_near_far_distances_zero_to_one() {
        let frustum = Frustum::from_view_projection(&vk_perspective(0.1, 50.0), ClipDepth::ZeroToOne);

        assert_relative_eq!(frustum.plane(FrustumSide::Near).distance.abs(), 0.1, epsilon = 1e-4);
        assert_relative_eq!(frustum.plane(FrustumSide::Far).distance.abs(), 50.0, epsilon = 1e-4);
    }

    #[test]
    fn test_culling_boxes_around_camera() {
        let frustum = Frustum::from_view_projection(&gl_perspective(1.0, 100.0), ClipDepth::NegativeOneToOne);

        let in_front = Aabb::from_center_extents(Vec3::new(0.0, 0.0, -10.0), Vec3::new(1.0, 1.0, 1.0));
        let behind = Aabb::from_center_extents(Vec3::new(0.0, 0.0, 10.0), Vec3::new(1.0, 1.0, 1.0));
        let beyond_far = Aabb::from_center_extents(Vec3::new(0.0, 0.0, -200.0), Vec3::new(1.0, 1.0, 1.0));
        let straddling_near = Aabb::from_center_extents(Vec3::new(0.0, 0.0, -1.0), Vec3::new(0.5, 0.5, 0.5));

        assert!(frustum.intersects_aabb(&in_front));
        assert!(!frustum.intersects_aabb(&behind));
        assert!(!frustum.intersects_aabb(&beyond_far));
        assert!(frustum.intersects_aabb(&straddling_near));
        assert!(frustum.contains_point(Vec3::new(0.0, 0.0, -10.0)));
    }
}
