//! # Render Core
//!
//! Backend-agnostic real-time rendering core.
//!
//! ## Features
//!
//! - **Renderer facade**: frame state machine, camera and projection state
//! - **Render queue**: opaque front-to-back, transparent back-to-front
//! - **Driver call filtering**: pipeline state and LRU texture binding caches
//! - **Backends**: native Vulkan and a headless software reference driver
//! - **Scene graph**: named node tree traversed into the render queue
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use render_core::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut renderer = Renderer::new();
//!     let window = WindowTarget::windowed(800, 600);
//!     let params = RenderParameters::new(BackendKind::Headless).with_size(800, 600);
//!     renderer.initialize(BackendKind::Headless, &window, params)?;
//!
//!     let scene = SceneTree::new();
//!     renderer.start_render()?;
//!     renderer.clear(ClearFlags::COLOR | ClearFlags::DEPTH)?;
//!     renderer.render(&scene)?;
//!     renderer.end_render()?;
//!     renderer.present_frame()?;
//!
//!     renderer.shutdown();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod foundation;
pub mod config;
pub mod render;
pub mod scene;

/// Common imports for renderer users
pub mod prelude {
    pub use crate::{
        config::{BackendKind, Config, DepthStencilBits, RenderParameters, RendererConfig},
        foundation::math::{Mat4, Transform, Vec2, Vec3},
        render::{
            resources::{
                BufferDescriptor, IndexFormat, ResourceCreator, ResourceUsage, ShaderDescriptor,
                TextureDescriptor, TextureFormat, TextureRegion, VertexFormat,
            },
            ClearFlags, FrameState, Material, Mesh, RenderError, RenderResult, Renderer, WindowTarget,
        },
        scene::{NodeId, SceneTree},
    };
}
