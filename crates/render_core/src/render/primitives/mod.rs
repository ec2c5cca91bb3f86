//! Geometric primitives shared by culling and the backends

mod frustum;
mod projection;

pub use frustum::{Aabb, Plane, Frustum, FrustumSide, ClipDepth};
pub use projection::ClipConvention;
