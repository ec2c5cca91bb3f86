//! Backend resource factory interface

use std::rc::Rc;

use super::{
    Buffer, BufferDescriptor, DepthStencilTarget, IndexFormat, RenderTarget, SamplerDescriptor,
    SamplerState, Shader, ShaderDescriptor, Texture2D, TextureDescriptor, TextureFormat,
    TextureRegion, ResourceUsage, VertexFormat,
};
use crate::config::DepthStencilBits;
use crate::render::{RenderError, RenderResult};

/// Factory for GPU resources, owned by a backend
///
/// Every resource it returns is shared through `Rc`; the native object lives
/// until the last clone drops and the owning backend reaches a frame
/// boundary.
pub trait ResourceCreator {
    /// Create a vertex buffer; `size` must be a multiple of the vertex stride
    fn create_vertex_buffer(&mut self, desc: &BufferDescriptor<'_>, format: VertexFormat) -> RenderResult<Rc<Buffer>>;

    /// Create an index buffer; `size` must be a multiple of the index width
    fn create_index_buffer(&mut self, desc: &BufferDescriptor<'_>, format: IndexFormat) -> RenderResult<Rc<Buffer>>;

    /// Create a shader constant buffer
    fn create_constant_buffer(&mut self, desc: &BufferDescriptor<'_>) -> RenderResult<Rc<Buffer>>;

    /// Create a sampled 2D texture
    fn create_texture_2d(&mut self, desc: &TextureDescriptor<'_>) -> RenderResult<Rc<Texture2D>>;

    /// Create an off-screen color target
    fn create_render_target(&mut self, width: u32, height: u32, format: TextureFormat) -> RenderResult<Rc<RenderTarget>>;

    /// Create an off-screen depth/stencil target
    fn create_depth_stencil_target(&mut self, width: u32, height: u32, bits: DepthStencilBits) -> RenderResult<Rc<DepthStencilTarget>>;

    /// Create a sampler state object
    fn create_sampler_state(&mut self, desc: &SamplerDescriptor) -> RenderResult<Rc<SamplerState>>;

    /// Compile and link a shader program
    fn create_shader(&mut self, desc: &ShaderDescriptor<'_>) -> RenderResult<Rc<Shader>>;

    /// Overwrite part of a buffer, subject to its usage contract
    fn update_buffer(&mut self, buffer: &Buffer, offset: usize, data: &[u8]) -> RenderResult<()>;

    /// Overwrite a texel rectangle, or the whole texture when `region` is
    /// `None`, subject to its usage contract
    ///
    /// `data` holds the region's rows tightly packed.
    fn update_texture(&mut self, texture: &Texture2D, region: Option<TextureRegion>, data: &[u8]) -> RenderResult<()>;

    /// Number of native objects currently alive
    fn live_resources(&self) -> usize;
}

fn creation_error(resource: &str, reason: impl Into<String>) -> RenderError {
    RenderError::ResourceCreation {
        operation: "create",
        resource: resource.to_string(),
        reason: reason.into(),
    }
}

/// Check a buffer request against the usage rules shared by all backends
///
/// `element_size` is the vertex stride or index width, 1 for constant
/// buffers. Returns the element count.
pub fn validate_buffer_descriptor(resource: &str, desc: &BufferDescriptor<'_>, element_size: usize) -> RenderResult<usize> {
    if desc.size == 0 {
        return Err(creation_error(resource, "size must be non-zero"));
    }
    match desc.initial_data {
        Some(data) if data.len() != desc.size => {
            return Err(creation_error(
                resource,
                format!("initial data is {} bytes but size is {}", data.len(), desc.size),
            ));
        }
        None if desc.usage == ResourceUsage::Immutable => {
            return Err(creation_error(resource, "immutable buffers need initial data"));
        }
        _ => {}
    }
    if desc.size % element_size != 0 {
        return Err(creation_error(
            resource,
            format!("size {} is not a multiple of the {element_size} byte element", desc.size),
        ));
    }
    Ok(desc.size / element_size)
}

/// Check a texture request against the usage rules shared by all backends
pub fn validate_texture_descriptor(desc: &TextureDescriptor<'_>) -> RenderResult<()> {
    if desc.width == 0 || desc.height == 0 {
        return Err(creation_error("texture", format!("invalid size {}x{}", desc.width, desc.height)));
    }
    match desc.initial_data {
        Some(data) if data.len() != desc.byte_size() => Err(creation_error(
            "texture",
            format!("initial data is {} bytes, expected {}", data.len(), desc.byte_size()),
        )),
        None if desc.usage == ResourceUsage::Immutable => {
            Err(creation_error("texture", "immutable textures need initial data"))
        }
        _ => Ok(()),
    }
}

/// Check a texture update against the usage rules shared by all backends
///
/// Returns the rectangle to write, the whole texture for `None`.
pub fn validate_texture_update(texture: &Texture2D, region: Option<TextureRegion>, data: &[u8]) -> RenderResult<TextureRegion> {
    let update_error = |reason: String| RenderError::ResourceUpdate { resource: "texture".to_string(), reason };
    let (width, height) = (texture.width(), texture.height());
    let region = region.unwrap_or_else(|| TextureRegion::whole(width, height));

    let inside = region.width > 0
        && region.height > 0
        && region.x.checked_add(region.width).is_some_and(|right| right <= width)
        && region.y.checked_add(region.height).is_some_and(|bottom| bottom <= height);
    if !inside {
        return Err(update_error(format!(
            "region {}x{} at ({}, {}) does not fit the {width}x{height} texture",
            region.width, region.height, region.x, region.y
        )));
    }

    let texel = texture.format().bytes_per_texel();
    let offset = (region.y as usize * width as usize + region.x as usize) * texel;
    texture.usage().check_update(texture.byte_size(), offset, data.len()).map_err(update_error)?;

    let expected = region.texel_count() * texel;
    if data.len() != expected {
        return Err(update_error(format!("expected {expected} bytes, got {}", data.len())));
    }
    Ok(region)
}

/// Check that both shader stages carry code
pub fn validate_shader_descriptor(desc: &ShaderDescriptor<'_>) -> RenderResult<()> {
    if desc.vertex_code.is_empty() || desc.fragment_code.is_empty() {
        return Err(RenderError::ResourceCreation {
            operation: "compile",
            resource: format!("shader '{}'", desc.name),
            reason: "both vertex and fragment code are required".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;
    use crate::render::resources::{ReleaseQueue, ResourceKey, ResourceToken};

    #[test]
    fn test_immutable_buffer_requires_data() {
        let desc = BufferDescriptor {
            initial_data: None,
            size: 64,
            usage: ResourceUsage::Immutable,
        };
        assert!(validate_buffer_descriptor("vertex buffer", &desc, 12).is_err());
    }

    #[test]
    fn test_vertex_count_from_stride() {
        let data = [0u8; 60];
        let desc = BufferDescriptor::immutable(&data);
        assert_eq!(validate_buffer_descriptor("vertex buffer", &desc, 12).ok(), Some(5));
        assert!(validate_buffer_descriptor("vertex buffer", &desc, 32).is_err());
    }

    fn texture(width: u32, height: u32, usage: ResourceUsage) -> Texture2D {
        let queue = ReleaseQueue::new();
        let token = ResourceToken::new(BackendKind::Headless, ResourceKey::default());
        Texture2D::new(queue.lease(token), width, height, TextureFormat::Rgba8, usage)
    }

    #[test]
    fn test_texture_update_resolves_region() {
        let dynamic = texture(4, 2, ResourceUsage::Dynamic);

        let whole = validate_texture_update(&dynamic, None, &[0; 32]).unwrap();
        assert_eq!(whole, TextureRegion::whole(4, 2));

        let corner = TextureRegion::new(3, 1, 1, 1);
        assert_eq!(validate_texture_update(&dynamic, Some(corner), &[0; 4]).ok(), Some(corner));
        assert!(validate_texture_update(&dynamic, Some(corner), &[0; 8]).is_err());
        assert!(validate_texture_update(&dynamic, Some(TextureRegion::new(3, 0, 2, 1)), &[0; 8]).is_err());
        assert!(validate_texture_update(&dynamic, Some(TextureRegion::new(0, 0, 0, 1)), &[]).is_err());
        assert!(validate_texture_update(&dynamic, Some(TextureRegion::new(u32::MAX, 0, 1, 1)), &[0; 4]).is_err());
    }

    #[test]
    fn test_default_texture_update_must_cover_everything() {
        let whole_only = texture(2, 2, ResourceUsage::Default);

        let err = validate_texture_update(&whole_only, Some(TextureRegion::new(0, 0, 2, 1)), &[0; 8]).unwrap_err();
        assert!(matches!(err, RenderError::ResourceUpdate { .. }));
        assert!(validate_texture_update(&whole_only, None, &[0; 16]).is_ok());
    }

    #[test]
    fn test_texture_data_must_match_size() {
        let data = [0u8; 15];
        let desc = TextureDescriptor::immutable(2, 2, TextureFormat::Rgba8, &data);
        assert!(validate_texture_descriptor(&desc).is_err());
    }
}
