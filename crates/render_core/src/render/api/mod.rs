//! Public rendering API
//!
//! The backend trait every native driver implements and the value types
//! that cross it.

pub mod render_backend;
pub mod states;

pub use render_backend::{
    RenderBackend, ClearFlags, DeviceCapabilities, Viewport, WindowTarget, DrawCall, DriverStats,
};
pub use states::{
    PipelineState, StateCategory, DepthFunc, CullMethod, FillMode, BlendEquation, BlendFactor,
};
