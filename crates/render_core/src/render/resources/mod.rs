//! GPU resource handles and ownership
//!
//! Backends keep their native objects in a generation-checked arena and hand
//! out `Rc`-shared resource objects that carry an opaque [`ResourceToken`].
//! When the last `Rc` drops, the token is pushed onto the owning backend's
//! [`ReleaseQueue`] and the native object is destroyed at the next frame
//! boundary. Backends never give up ownership of the native object itself,
//! and callers never see it.

mod creator;
mod descriptors;
mod mesh;

pub use creator::{
    ResourceCreator, validate_buffer_descriptor, validate_texture_descriptor, validate_texture_update,
    validate_shader_descriptor,
};
pub use descriptors::{
    BufferDescriptor, TextureDescriptor, ShaderDescriptor, SamplerDescriptor,
    ResourceUsage, VertexFormat, VertexAttribute, AttributeFormat, IndexFormat,
    TextureFormat, TextureRegion, FilterMode, AddressMode,
};
pub use mesh::{Mesh, Material};

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::config::{BackendKind, DepthStencilBits};
use crate::render::{RenderError, RenderResult};

slotmap::new_key_type! {
    /// Generation-checked key into a backend's native object arena
    pub struct ResourceKey;
}

/// Opaque backend-tagged identity of a GPU resource
///
/// Tokens are only meaningful to the backend that issued them. Equality and
/// ordering are stable for the lifetime of the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceToken {
    backend: BackendKind,
    key: ResourceKey,
}

impl ResourceToken {
    /// Build a token for a freshly allocated arena slot
    pub fn new(backend: BackendKind, key: ResourceKey) -> Self {
        Self { backend, key }
    }

    /// Backend that issued this token
    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Arena key inside the issuing backend
    pub fn key(&self) -> ResourceKey {
        self.key
    }
}

type PendingReleases = RefCell<Vec<ResourceToken>>;

/// Queue of resources whose last owner has let go
///
/// Owned by a backend. Leases hold only a weak reference, so resources that
/// outlive their backend release into nothing.
#[derive(Debug, Default)]
pub struct ReleaseQueue {
    pending: Rc<PendingReleases>,
}

impl ReleaseQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Tie a freshly created native object to this queue
    pub fn lease(&self, token: ResourceToken) -> ResourceLease {
        ResourceLease {
            token,
            queue: Rc::downgrade(&self.pending),
        }
    }

    /// Take every token released since the last drain
    pub fn drain(&self) -> Vec<ResourceToken> {
        std::mem::take(&mut *self.pending.borrow_mut())
    }

    /// Number of releases waiting to be processed
    pub fn len(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Whether nothing is waiting to be released
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn issued(&self, lease: &ResourceLease) -> bool {
        Weak::as_ptr(&lease.queue) == Rc::as_ptr(&self.pending)
    }

    /// Check that `lease` was issued by this queue's backend
    pub fn check_owner(&self, lease: &ResourceLease, operation: &'static str) -> RenderResult<ResourceToken> {
        if self.issued(lease) {
            Ok(lease.token)
        } else {
            Err(RenderError::State {
                operation,
                reason: format!(
                    "resource was created by another {} backend instance",
                    lease.token.backend
                ),
            })
        }
    }
}

/// Ownership stub embedded in every resource object
///
/// Dropping it schedules the native object for destruction.
#[derive(Debug)]
pub struct ResourceLease {
    token: ResourceToken,
    queue: Weak<PendingReleases>,
}

impl ResourceLease {
    /// Token of the leased object
    pub fn token(&self) -> ResourceToken {
        self.token
    }
}

impl Drop for ResourceLease {
    fn drop(&mut self) {
        if let Some(queue) = self.queue.upgrade() {
            queue.borrow_mut().push(self.token);
        }
    }
}

/// Kind-specific buffer layout information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Vertex data in a fixed layout
    Vertex {
        /// Per-vertex layout
        format: VertexFormat,
        /// Number of vertices
        count: usize,
    },
    /// Index data
    Index {
        /// Index width
        format: IndexFormat,
        /// Number of indices
        count: usize,
    },
    /// Shader constants
    Constant,
}

/// GPU buffer (vertex, index or constant)
#[derive(Debug)]
pub struct Buffer {
    lease: ResourceLease,
    kind: BufferKind,
    usage: ResourceUsage,
    size: usize,
}

impl Buffer {
    /// Wrap a backend allocation
    pub fn new(lease: ResourceLease, kind: BufferKind, usage: ResourceUsage, size: usize) -> Self {
        Self { lease, kind, usage, size }
    }

    /// Backend identity of this buffer
    pub fn token(&self) -> ResourceToken {
        self.lease.token
    }

    /// Ownership lease (for backend ownership checks)
    pub fn lease(&self) -> &ResourceLease {
        &self.lease
    }

    /// Layout information
    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    /// Mutability contract chosen at creation
    pub fn usage(&self) -> ResourceUsage {
        self.usage
    }

    /// Size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of vertices or indices; zero for constant buffers
    pub fn element_count(&self) -> usize {
        match self.kind {
            BufferKind::Vertex { count, .. } | BufferKind::Index { count, .. } => count,
            BufferKind::Constant => 0,
        }
    }

    /// Vertex layout, if this is a vertex buffer
    pub fn vertex_format(&self) -> Option<VertexFormat> {
        match self.kind {
            BufferKind::Vertex { format, .. } => Some(format),
            _ => None,
        }
    }
}

/// Sampled 2D texture
#[derive(Debug)]
pub struct Texture2D {
    lease: ResourceLease,
    width: u32,
    height: u32,
    format: TextureFormat,
    usage: ResourceUsage,
}

impl Texture2D {
    /// Wrap a backend allocation
    pub fn new(lease: ResourceLease, width: u32, height: u32, format: TextureFormat, usage: ResourceUsage) -> Self {
        Self { lease, width, height, format, usage }
    }

    /// Backend identity; also the key of the texture binding cache
    pub fn token(&self) -> ResourceToken {
        self.lease.token
    }

    /// Ownership lease (for backend ownership checks)
    pub fn lease(&self) -> &ResourceLease {
        &self.lease
    }

    /// Width in texels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in texels
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Texel format
    pub fn format(&self) -> TextureFormat {
        self.format
    }

    /// Mutability contract chosen at creation
    pub fn usage(&self) -> ResourceUsage {
        self.usage
    }

    /// Size of a full upload in bytes
    pub fn byte_size(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_texel()
    }
}

/// Off-screen color destination
#[derive(Debug)]
pub struct RenderTarget {
    lease: ResourceLease,
    width: u32,
    height: u32,
    format: TextureFormat,
}

impl RenderTarget {
    /// Wrap a backend allocation
    pub fn new(lease: ResourceLease, width: u32, height: u32, format: TextureFormat) -> Self {
        Self { lease, width, height, format }
    }

    /// Backend identity
    pub fn token(&self) -> ResourceToken {
        self.lease.token
    }

    /// Width in pixels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Color format
    pub fn format(&self) -> TextureFormat {
        self.format
    }
}

/// Off-screen depth/stencil destination
#[derive(Debug)]
pub struct DepthStencilTarget {
    lease: ResourceLease,
    width: u32,
    height: u32,
    bits: DepthStencilBits,
}

impl DepthStencilTarget {
    /// Wrap a backend allocation
    pub fn new(lease: ResourceLease, width: u32, height: u32, bits: DepthStencilBits) -> Self {
        Self { lease, width, height, bits }
    }

    /// Backend identity
    pub fn token(&self) -> ResourceToken {
        self.lease.token
    }

    /// Width in pixels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Depth/stencil layout
    pub fn bits(&self) -> DepthStencilBits {
        self.bits
    }
}

/// Texture sampling configuration object
#[derive(Debug)]
pub struct SamplerState {
    lease: ResourceLease,
    descriptor: SamplerDescriptor,
}

impl SamplerState {
    /// Wrap a backend allocation
    pub fn new(lease: ResourceLease, descriptor: SamplerDescriptor) -> Self {
        Self { lease, descriptor }
    }

    /// Backend identity
    pub fn token(&self) -> ResourceToken {
        self.lease.token
    }

    /// Sampling configuration
    pub fn descriptor(&self) -> &SamplerDescriptor {
        &self.descriptor
    }
}

/// Linked vertex + fragment shader program
#[derive(Debug)]
pub struct Shader {
    lease: ResourceLease,
    name: String,
}

impl Shader {
    /// Wrap a backend allocation
    pub fn new(lease: ResourceLease, name: impl Into<String>) -> Self {
        Self { lease, name: name.into() }
    }

    /// Backend identity; render queues group opaque draws by it
    pub fn token(&self) -> ResourceToken {
        self.lease.token
    }

    /// Ownership lease (for backend ownership checks)
    pub fn lease(&self) -> &ResourceLease {
        &self.lease
    }

    /// Debug name
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn test_dropping_last_owner_queues_release() {
        let queue = ReleaseQueue::new();
        let mut arena: SlotMap<ResourceKey, ()> = SlotMap::with_key();
        let token = ResourceToken::new(BackendKind::Headless, arena.insert(()));

        let shader = Rc::new(Shader::new(queue.lease(token), "lit"));
        let material_ref = Rc::clone(&shader);

        drop(shader);
        assert!(queue.is_empty(), "a second owner still holds the shader");

        drop(material_ref);
        assert_eq!(queue.drain(), vec![token]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_lease_outliving_queue_is_harmless() {
        let queue = ReleaseQueue::new();
        let mut arena: SlotMap<ResourceKey, ()> = SlotMap::with_key();
        let lease = queue.lease(ResourceToken::new(BackendKind::Headless, arena.insert(())));

        drop(queue);
        drop(lease);
    }

    #[test]
    fn test_foreign_lease_is_rejected() {
        let ours = ReleaseQueue::new();
        let theirs = ReleaseQueue::new();
        let mut arena: SlotMap<ResourceKey, ()> = SlotMap::with_key();
        let lease = theirs.lease(ResourceToken::new(BackendKind::Headless, arena.insert(())));

        assert!(ours.check_owner(&lease, "bind").is_err());
        assert!(theirs.check_owner(&lease, "bind").is_ok());
    }
}
