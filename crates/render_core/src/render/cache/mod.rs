//! Driver call filters
//!
//! Both caches sit between the renderer facade and the backend and only let
//! calls through that change driver state.

mod state_cache;
mod texture_cache;

pub use state_cache::PipelineStateCache;
pub use texture_cache::{TextureBindingCache, TextureCacheStats};
