//! Backend abstraction trait for the rendering system
//!
//! Every native driver implements [`RenderBackend`]. The renderer facade owns
//! exactly one boxed backend, chosen at initialization, and routes all driver
//! traffic through it after the state and texture caches have filtered out
//! redundant calls.

use std::rc::Rc;

use crate::config::{BackendKind, RenderParameters};
use crate::foundation::math::{DMat4, Mat4};
use crate::render::primitives::{ClipConvention, Frustum};
use crate::render::resources::{Buffer, ResourceCreator, Shader, Texture2D};
use crate::render::RenderResult;
use super::PipelineState;

bitflags::bitflags! {
    /// Buffers affected by a clear
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClearFlags: u32 {
        /// Color buffer
        const COLOR = 1 << 0;
        /// Depth buffer
        const DEPTH = 1 << 1;
    }
}

/// Hardware limits, queried once at initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// Texture units usable by a single draw
    pub max_active_textures: usize,
    /// Color attachments usable at once
    pub max_render_targets: usize,
}

/// Pixel rectangle the clip-space square maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    /// Left edge in pixels
    pub x: u32,
    /// Top edge in pixels
    pub y: u32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Viewport {
    /// Viewport covering a whole surface
    pub fn full(width: u32, height: u32) -> Self {
        Self { x: 0, y: 0, width, height }
    }
}

/// Surface the windowing layer hands to the renderer
///
/// Presentation to an on-screen surface belongs to the window layer; the
/// core only needs the surface dimensions and mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowTarget {
    /// Surface width in pixels
    pub width: u32,
    /// Surface height in pixels
    pub height: u32,
    /// Windowed (true) or fullscreen (false)
    pub windowed: bool,
}

impl WindowTarget {
    /// Windowed surface of the given size
    pub fn windowed(width: u32, height: u32) -> Self {
        Self { width, height, windowed: true }
    }
}

/// One draw submitted to the driver
#[derive(Debug, Clone, Copy)]
pub struct DrawCall<'a> {
    /// Vertex data
    pub vertex_buffer: &'a Buffer,
    /// Index data; non-indexed draw when absent
    pub index_buffer: Option<&'a Buffer>,
    /// Object to clip space transform
    pub model_view_projection: Mat4,
    /// Texture units holding the material's textures, in material order
    pub texture_units: &'a [usize],
    /// Material tint
    pub color: [f32; 4],
}

/// Driver-level call counters
///
/// Only calls that reach the driver are counted; calls absorbed by the
/// state or texture caches never show up here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    /// Pipeline state changes
    pub state_changes: u64,
    /// Texture binds to a unit
    pub texture_binds: u64,
    /// Texture unbinds (evictions)
    pub texture_unbinds: u64,
    /// Shader program binds and unbinds
    pub shader_binds: u64,
    /// Draw calls
    pub draw_calls: u64,
    /// Clears
    pub clears: u64,
    /// Presented frames
    pub frames_presented: u64,
    /// Native objects created
    pub resources_created: u64,
    /// Native objects destroyed
    pub resources_released: u64,
}

impl DriverStats {
    /// Sum of every counted driver call
    pub fn total_calls(&self) -> u64 {
        self.state_changes
            + self.texture_binds
            + self.texture_unbinds
            + self.shader_binds
            + self.draw_calls
            + self.clears
            + self.frames_presented
    }
}

/// Main rendering backend trait
///
/// Implementations own the device, the resource arena and the built-in text
/// shader. All methods are called from the single rendering thread.
pub trait RenderBackend {
    /// Which driver this is
    fn kind(&self) -> BackendKind;

    /// Create the device and default frame target
    ///
    /// Calls [`RenderBackend::query_device_capabilities`] exactly once and
    /// builds the text shader.
    fn initialize(&mut self, params: &RenderParameters) -> RenderResult<()>;

    /// Ask the driver for its limits
    fn query_device_capabilities(&mut self) -> RenderResult<DeviceCapabilities>;

    /// Limits captured at initialization
    fn capabilities(&self) -> DeviceCapabilities;

    /// Clip-space convention of this driver's projection matrices
    fn clip_convention(&self) -> ClipConvention;

    /// Set the color used by [`RenderBackend::clear`]
    fn set_clear_color(&mut self, color: [f32; 4]);

    /// Clear the selected buffers of the current frame target
    fn clear(&mut self, flags: ClearFlags) -> RenderResult<()>;

    /// Begin recording a frame
    fn start_render(&mut self) -> RenderResult<()>;

    /// Finish recording the frame
    fn end_render(&mut self) -> RenderResult<()>;

    /// Submit the finished frame and process deferred releases
    fn present_frame(&mut self) -> RenderResult<()>;

    /// Set the pixel rectangle draws land in
    fn set_viewport(&mut self, viewport: Viewport) -> RenderResult<()>;

    /// Build an orthographic projection in this driver's convention
    fn orthographic_projection(&self, left: f64, right: f64, bottom: f64, top: f64, near: f64, far: f64) -> DMat4 {
        self.clip_convention().orthographic(left, right, bottom, top, near, far)
    }

    /// Build a perspective projection in this driver's convention
    fn perspective_projection(&self, left: f64, right: f64, bottom: f64, top: f64, near: f64, far: f64) -> DMat4 {
        self.clip_convention().perspective(left, right, bottom, top, near, far)
    }

    /// Derive the six normalized culling planes of a view-projection matrix
    fn extract_view_frustum_planes(&self, view_projection: &DMat4) -> Frustum {
        Frustum::from_view_projection(view_projection, self.clip_convention().depth)
    }

    /// Factory for this driver's resources
    fn resource_creator(&mut self) -> &mut dyn ResourceCreator;

    /// Bind a shader program; `None` unbinds the current one
    fn bind_shader(&mut self, shader: Option<&Shader>) -> RenderResult<()>;

    /// Bind a texture to a unit (texture binding cache only)
    fn bind_texture(&mut self, texture: &Texture2D, unit: usize) -> RenderResult<()>;

    /// Clear a texture unit (texture binding cache only)
    fn unbind_texture(&mut self, unit: usize) -> RenderResult<()>;

    /// Commit one pipeline state value (state cache only)
    fn apply_state(&mut self, state: PipelineState) -> RenderResult<()>;

    /// Draw with the bound shader, units and pipeline state
    fn draw(&mut self, call: &DrawCall<'_>) -> RenderResult<()>;

    /// Build the built-in text shader
    ///
    /// Returns `None` when the driver has no text shader available.
    fn create_text_shader(&mut self) -> RenderResult<Option<Rc<Shader>>>;

    /// Text shader created at initialization
    fn text_shader(&self) -> Option<Rc<Shader>>;

    /// Driver call counters since initialization
    fn stats(&self) -> &DriverStats;

    /// Destroy every native object; the backend is unusable afterwards
    fn shutdown(&mut self);
}
