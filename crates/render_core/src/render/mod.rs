//! # Rendering System
//!
//! Backend-agnostic rendering core. Client code talks to the [`Renderer`]
//! facade; the facade filters driver traffic through the pipeline state and
//! texture binding caches and forwards what is left to the active
//! [`RenderBackend`].
//!
//! ## Architecture
//!
//! - **Renderer**: frame state machine, camera state and scene submission
//! - **Render Queue**: per-frame opaque/transparent buckets with fixed ordering
//! - **Caches**: pipeline state de-duplication and LRU texture unit binding
//! - **Backends**: Vulkan (native) and Headless (software reference driver)
//! - **Resources**: `Rc`-shared GPU objects identified by backend-tagged tokens

pub mod api;
pub mod primitives;
pub mod resources;
pub mod cache;
pub mod queue;
pub mod backends;

mod renderer;

#[cfg(test)]
mod renderer_tests;

pub use api::{
    RenderBackend, ClearFlags, DeviceCapabilities, Viewport, WindowTarget, DrawCall, DriverStats,
    PipelineState, StateCategory, DepthFunc, CullMethod, FillMode, BlendEquation, BlendFactor,
};
pub use primitives::{Aabb, Frustum, Plane, ClipConvention};
pub use resources::{Mesh, Material, ResourceToken};
pub use queue::{RenderQueue, RenderQueueItem, QueueBucket};
pub use renderer::{Renderer, FrameState, FrameStats};

use crate::config::ConfigError;

/// Errors that can occur during rendering operations
#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    /// Render parameters or backend selection are unusable
    ///
    /// Fatal at initialization; the renderer stays uninitialized.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The driver refused to create a resource
    ///
    /// Recoverable: only the failed resource is affected.
    #[error("Failed to {operation} {resource}: {reason}")]
    ResourceCreation {
        /// What was being attempted
        operation: &'static str,
        /// Which resource
        resource: String,
        /// Driver or validation detail
        reason: String,
    },

    /// An update violated the resource's usage contract
    #[error("Rejected update of {resource}: {reason}")]
    ResourceUpdate {
        /// Which resource
        resource: String,
        /// Rule that was violated
        reason: String,
    },

    /// Operation called out of sequence or with a disallowed argument
    #[error("{operation} rejected: {reason}")]
    State {
        /// The offending call
        operation: &'static str,
        /// Current state or rule that forbids it
        reason: String,
    },

    /// Backend-specific failure
    ///
    /// Wraps driver errors (Vulkan result codes and the like) in a generic
    /// form.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl From<ConfigError> for RenderError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

/// Result type for rendering operations
pub type RenderResult<T> = Result<T, RenderError>;
