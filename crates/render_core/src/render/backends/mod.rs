//! Graphics backend implementations
//!
//! One [`RenderBackend`] implementation per native driver. The renderer
//! picks one through [`create_backend`] at initialization and keeps it for
//! its whole lifetime.

pub mod headless;

#[cfg(feature = "vulkan")]
pub mod vulkan;

use crate::config::BackendKind;
use crate::render::api::RenderBackend;
use crate::render::RenderResult;

/// Construct an uninitialized backend of the requested kind
pub fn create_backend(kind: BackendKind) -> RenderResult<Box<dyn RenderBackend>> {
    match kind {
        BackendKind::Headless => Ok(Box::new(headless::HeadlessBackend::new())),
        #[cfg(feature = "vulkan")]
        BackendKind::Vulkan => Ok(Box::new(vulkan::VulkanBackend::new())),
        #[cfg(not(feature = "vulkan"))]
        BackendKind::Vulkan => Err(crate::render::RenderError::Configuration(
            "the Vulkan backend was not compiled in (enable the `vulkan` feature)".to_string(),
        )),
    }
}

/// Backends compiled into this build
pub fn available_backends() -> Vec<BackendKind> {
    let mut kinds = Vec::new();
    if cfg!(feature = "vulkan") {
        kinds.push(BackendKind::Vulkan);
    }
    kinds.push(BackendKind::Headless);
    kinds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headless_is_always_available() {
        assert!(available_backends().contains(&BackendKind::Headless));
        let backend = create_backend(BackendKind::Headless).unwrap();
        assert_eq!(backend.kind(), BackendKind::Headless);
    }
}
