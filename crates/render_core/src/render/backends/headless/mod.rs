//! Headless software reference driver
//!
//! Behaves like a GPU driver without touching one: every call is validated
//! the way a native driver would, resource contents live in host memory,
//! and each driver-level call is counted and appended to an ordered
//! [`DriverCall`] log. Clip space follows the OpenGL convention.

use std::cell::RefCell;
use std::rc::Rc;

use slotmap::SlotMap;

use crate::config::{BackendKind, DepthStencilBits, RenderParameters};
use crate::render::api::{
    ClearFlags, DeviceCapabilities, DrawCall, DriverStats, PipelineState, RenderBackend, Viewport,
};
use crate::render::primitives::ClipConvention;
use crate::render::resources::{
    validate_buffer_descriptor, validate_shader_descriptor, validate_texture_descriptor,
    validate_texture_update, Buffer, BufferDescriptor, BufferKind, DepthStencilTarget, IndexFormat,
    ReleaseQueue, RenderTarget, ResourceCreator, ResourceKey, ResourceLease, ResourceToken,
    SamplerDescriptor, SamplerState, Shader, ShaderDescriptor, Texture2D, TextureDescriptor,
    TextureFormat, TextureRegion, VertexFormat,
};
use crate::render::{RenderError, RenderResult};

const TEXT_VERTEX_STAGE: &[u8] = b"headless:text.vert";
const TEXT_FRAGMENT_STAGE: &[u8] = b"headless:text.frag";

/// One driver-level call, in submission order
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    /// Clear of the selected buffers
    Clear(ClearFlags),
    /// Frame recording started
    StartRender,
    /// Frame recording finished
    EndRender,
    /// Frame presented
    Present,
    /// Viewport changed
    SetViewport(Viewport),
    /// Shader bound (`None` unbinds)
    BindShader(Option<ResourceToken>),
    /// Texture placed in a unit
    BindTexture {
        /// Texture unit
        unit: usize,
        /// Texture placed there
        texture: ResourceToken,
    },
    /// Unit emptied
    UnbindTexture {
        /// Texture unit
        unit: usize,
    },
    /// Pipeline state committed
    ApplyState(PipelineState),
    /// Draw submitted
    Draw {
        /// Shader in use
        shader: ResourceToken,
        /// Vertex data
        vertex_buffer: ResourceToken,
        /// Index data
        index_buffer: Option<ResourceToken>,
        /// Vertices or indices drawn
        element_count: usize,
    },
}

/// Shared, append-only record of driver calls
///
/// Cloning yields another handle to the same log, so a test can keep
/// reading it after the backend has been handed to a renderer.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Rc<RefCell<Vec<DriverCall>>>);

impl CallLog {
    fn push(&self, call: DriverCall) {
        self.0.borrow_mut().push(call);
    }

    /// Copy of every call so far, oldest first
    pub fn snapshot(&self) -> Vec<DriverCall> {
        self.0.borrow().clone()
    }

    /// Number of calls so far
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    /// Whether no call has been made
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Only the draw calls, oldest first
    pub fn draws(&self) -> Vec<DriverCall> {
        self.0
            .borrow()
            .iter()
            .filter(|call| matches!(call, DriverCall::Draw { .. }))
            .cloned()
            .collect()
    }
}

#[derive(Debug)]
enum StoredObject {
    Buffer(Vec<u8>),
    Texture(Vec<u8>),
    RenderTarget,
    DepthStencilTarget,
    Sampler,
    Shader,
}

/// Software reference backend
#[derive(Debug)]
pub struct HeadlessBackend {
    capabilities: DeviceCapabilities,
    capability_queries: u32,
    initialized: bool,
    recording: bool,
    size: (u32, u32),
    clear_color: [f32; 4],
    viewport: Viewport,
    bound_shader: Option<ResourceToken>,
    units: Vec<Option<ResourceToken>>,
    text_shader: Option<Rc<Shader>>,
    objects: SlotMap<ResourceKey, StoredObject>,
    releases: ReleaseQueue,
    calls: CallLog,
    stats: DriverStats,
}

impl HeadlessBackend {
    /// Backend with the default limits (16 texture units, 8 render targets)
    pub fn new() -> Self {
        Self::with_capabilities(DeviceCapabilities {
            max_active_textures: 16,
            max_render_targets: 8,
        })
    }

    /// Backend reporting the given limits
    pub fn with_capabilities(capabilities: DeviceCapabilities) -> Self {
        Self {
            capabilities,
            capability_queries: 0,
            initialized: false,
            recording: false,
            size: (0, 0),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            viewport: Viewport::full(0, 0),
            bound_shader: None,
            units: Vec::new(),
            text_shader: None,
            objects: SlotMap::with_key(),
            releases: ReleaseQueue::new(),
            calls: CallLog::default(),
            stats: DriverStats::default(),
        }
    }

    /// Every driver call since construction, oldest first
    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.snapshot()
    }

    /// Shared handle to the driver call log
    pub fn call_log(&self) -> CallLog {
        self.calls.clone()
    }

    /// How often the device limits were queried
    pub fn capability_queries(&self) -> u32 {
        self.capability_queries
    }

    /// Back buffer size chosen at initialization
    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    /// Current viewport
    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Current clear color
    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    /// Bytes currently stored for a buffer
    pub fn buffer_contents(&self, buffer: &Buffer) -> Option<&[u8]> {
        match self.objects.get(buffer.token().key()) {
            Some(StoredObject::Buffer(bytes)) => Some(bytes),
            _ => None,
        }
    }

    /// Bytes currently stored for a texture
    pub fn texture_contents(&self, texture: &Texture2D) -> Option<&[u8]> {
        match self.objects.get(texture.token().key()) {
            Some(StoredObject::Texture(bytes)) => Some(bytes),
            _ => None,
        }
    }

    fn require_initialized(&self, operation: &'static str) -> RenderResult<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(RenderError::State {
                operation,
                reason: "headless device is not initialized".to_string(),
            })
        }
    }

    fn require_recording(&self, operation: &'static str) -> RenderResult<()> {
        self.require_initialized(operation)?;
        if self.recording {
            Ok(())
        } else {
            Err(RenderError::State {
                operation,
                reason: "no frame is being recorded".to_string(),
            })
        }
    }

    fn allocate(&mut self, object: StoredObject) -> ResourceLease {
        let key = self.objects.insert(object);
        self.stats.resources_created += 1;
        self.releases.lease(ResourceToken::new(BackendKind::Headless, key))
    }

    fn resolve(&self, lease: &ResourceLease, operation: &'static str) -> RenderResult<ResourceKey> {
        let token = self.releases.check_owner(lease, operation)?;
        if self.objects.contains_key(token.key()) {
            Ok(token.key())
        } else {
            Err(RenderError::State {
                operation,
                reason: "resource has already been destroyed".to_string(),
            })
        }
    }

    fn process_releases(&mut self) {
        for token in self.releases.drain() {
            if self.objects.remove(token.key()).is_some() {
                self.stats.resources_released += 1;
            }
            for unit in self.units.iter_mut().filter(|u| **u == Some(token)) {
                *unit = None;
            }
            if self.bound_shader == Some(token) {
                self.bound_shader = None;
            }
        }
    }

    fn create_buffer(&mut self, resource: &str, desc: &BufferDescriptor<'_>, element_size: usize, kind: impl FnOnce(usize) -> BufferKind) -> RenderResult<Rc<Buffer>> {
        self.require_initialized("create_buffer")?;
        let count = validate_buffer_descriptor(resource, desc, element_size).map_err(|e| {
            log::error!("{e}");
            e
        })?;

        let bytes = desc.initial_data.map_or_else(|| vec![0; desc.size], <[u8]>::to_vec);
        let lease = self.allocate(StoredObject::Buffer(bytes));
        log::debug!("Created {resource} ({} bytes, {:?})", desc.size, desc.usage);
        Ok(Rc::new(Buffer::new(lease, kind(count), desc.usage, desc.size)))
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceCreator for HeadlessBackend {
    fn create_vertex_buffer(&mut self, desc: &BufferDescriptor<'_>, format: VertexFormat) -> RenderResult<Rc<Buffer>> {
        self.create_buffer("vertex buffer", desc, format.stride() as usize, |count| BufferKind::Vertex { format, count })
    }

    fn create_index_buffer(&mut self, desc: &BufferDescriptor<'_>, format: IndexFormat) -> RenderResult<Rc<Buffer>> {
        self.create_buffer("index buffer", desc, format.size(), |count| BufferKind::Index { format, count })
    }

    fn create_constant_buffer(&mut self, desc: &BufferDescriptor<'_>) -> RenderResult<Rc<Buffer>> {
        self.create_buffer("constant buffer", desc, 1, |_| BufferKind::Constant)
    }

    fn create_texture_2d(&mut self, desc: &TextureDescriptor<'_>) -> RenderResult<Rc<Texture2D>> {
        self.require_initialized("create_texture_2d")?;
        validate_texture_descriptor(desc)?;

        let bytes = desc.initial_data.map_or_else(|| vec![0; desc.byte_size()], <[u8]>::to_vec);
        let lease = self.allocate(StoredObject::Texture(bytes));
        log::debug!("Created {}x{} {:?} texture", desc.width, desc.height, desc.format);
        Ok(Rc::new(Texture2D::new(lease, desc.width, desc.height, desc.format, desc.usage)))
    }

    fn create_render_target(&mut self, width: u32, height: u32, format: TextureFormat) -> RenderResult<Rc<RenderTarget>> {
        self.require_initialized("create_render_target")?;
        if width == 0 || height == 0 {
            return Err(RenderError::ResourceCreation {
                operation: "create",
                resource: "render target".to_string(),
                reason: format!("invalid size {width}x{height}"),
            });
        }
        let lease = self.allocate(StoredObject::RenderTarget);
        Ok(Rc::new(RenderTarget::new(lease, width, height, format)))
    }

    fn create_depth_stencil_target(&mut self, width: u32, height: u32, bits: DepthStencilBits) -> RenderResult<Rc<DepthStencilTarget>> {
        self.require_initialized("create_depth_stencil_target")?;
        if width == 0 || height == 0 {
            return Err(RenderError::ResourceCreation {
                operation: "create",
                resource: "depth-stencil target".to_string(),
                reason: format!("invalid size {width}x{height}"),
            });
        }
        let lease = self.allocate(StoredObject::DepthStencilTarget);
        Ok(Rc::new(DepthStencilTarget::new(lease, width, height, bits)))
    }

    fn create_sampler_state(&mut self, desc: &SamplerDescriptor) -> RenderResult<Rc<SamplerState>> {
        self.require_initialized("create_sampler_state")?;
        if !(1.0..=16.0).contains(&desc.max_anisotropy) {
            return Err(RenderError::ResourceCreation {
                operation: "create",
                resource: "sampler state".to_string(),
                reason: format!("anisotropy {} outside 1..=16", desc.max_anisotropy),
            });
        }
        let lease = self.allocate(StoredObject::Sampler);
        Ok(Rc::new(SamplerState::new(lease, *desc)))
    }

    fn create_shader(&mut self, desc: &ShaderDescriptor<'_>) -> RenderResult<Rc<Shader>> {
        self.require_initialized("create_shader")?;
        validate_shader_descriptor(desc).map_err(|e| {
            log::error!("{e}");
            e
        })?;
        let lease = self.allocate(StoredObject::Shader);
        log::debug!("Created shader '{}'", desc.name);
        Ok(Rc::new(Shader::new(lease, desc.name)))
    }

    fn update_buffer(&mut self, buffer: &Buffer, offset: usize, data: &[u8]) -> RenderResult<()> {
        let key = self.resolve(buffer.lease(), "update_buffer")?;
        buffer
            .usage()
            .check_update(buffer.size(), offset, data.len())
            .map_err(|reason| RenderError::ResourceUpdate { resource: "buffer".to_string(), reason })?;

        if let Some(StoredObject::Buffer(bytes)) = self.objects.get_mut(key) {
            bytes[offset..offset + data.len()].copy_from_slice(data);
        }
        Ok(())
    }

    fn update_texture(&mut self, texture: &Texture2D, region: Option<TextureRegion>, data: &[u8]) -> RenderResult<()> {
        let key = self.resolve(texture.lease(), "update_texture")?;
        let region = validate_texture_update(texture, region, data)?;

        if let Some(StoredObject::Texture(bytes)) = self.objects.get_mut(key) {
            let texel = texture.format().bytes_per_texel();
            let pitch = texture.width() as usize * texel;
            let row = region.width as usize * texel;
            for (i, src) in data.chunks_exact(row).enumerate() {
                let start = (region.y as usize + i) * pitch + region.x as usize * texel;
                bytes[start..start + row].copy_from_slice(src);
            }
        }
        Ok(())
    }

    fn live_resources(&self) -> usize {
        self.objects.len()
    }
}

impl RenderBackend for HeadlessBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Headless
    }

    fn initialize(&mut self, params: &RenderParameters) -> RenderResult<()> {
        params.validate()?;
        if self.initialized {
            return Err(RenderError::State {
                operation: "initialize",
                reason: "headless device is already initialized".to_string(),
            });
        }

        self.capabilities = self.query_device_capabilities()?;
        self.units = vec![None; self.capabilities.max_active_textures];
        self.size = (params.width, params.height);
        self.viewport = Viewport::full(params.width, params.height);
        self.initialized = true;

        self.text_shader = self.create_text_shader()?;

        log::info!(
            "Headless device initialized: {}x{}, {} texture units",
            params.width, params.height, self.capabilities.max_active_textures
        );
        Ok(())
    }

    fn query_device_capabilities(&mut self) -> RenderResult<DeviceCapabilities> {
        self.capability_queries += 1;
        Ok(self.capabilities)
    }

    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    fn clip_convention(&self) -> ClipConvention {
        ClipConvention::OPENGL
    }

    fn set_clear_color(&mut self, color: [f32; 4]) {
        self.clear_color = color;
    }

    fn clear(&mut self, flags: ClearFlags) -> RenderResult<()> {
        self.require_recording("clear")?;
        self.calls.push(DriverCall::Clear(flags));
        self.stats.clears += 1;
        Ok(())
    }

    fn start_render(&mut self) -> RenderResult<()> {
        self.require_initialized("start_render")?;
        if self.recording {
            return Err(RenderError::State {
                operation: "start_render",
                reason: "a frame is already being recorded".to_string(),
            });
        }
        self.recording = true;
        self.calls.push(DriverCall::StartRender);
        Ok(())
    }

    fn end_render(&mut self) -> RenderResult<()> {
        self.require_recording("end_render")?;
        self.recording = false;
        self.calls.push(DriverCall::EndRender);
        Ok(())
    }

    fn present_frame(&mut self) -> RenderResult<()> {
        self.require_initialized("present_frame")?;
        if self.recording {
            return Err(RenderError::State {
                operation: "present_frame",
                reason: "frame recording has not ended".to_string(),
            });
        }
        self.calls.push(DriverCall::Present);
        self.stats.frames_presented += 1;
        self.process_releases();
        Ok(())
    }

    fn set_viewport(&mut self, viewport: Viewport) -> RenderResult<()> {
        self.require_initialized("set_viewport")?;
        if viewport.width == 0 || viewport.height == 0 {
            return Err(RenderError::State {
                operation: "set_viewport",
                reason: format!("empty viewport {}x{}", viewport.width, viewport.height),
            });
        }
        self.viewport = viewport;
        self.calls.push(DriverCall::SetViewport(viewport));
        Ok(())
    }

    fn resource_creator(&mut self) -> &mut dyn ResourceCreator {
        self
    }

    fn bind_shader(&mut self, shader: Option<&Shader>) -> RenderResult<()> {
        self.require_initialized("bind_shader")?;
        let token = match shader {
            Some(shader) => {
                self.resolve(shader.lease(), "bind_shader")?;
                Some(shader.token())
            }
            None => None,
        };
        self.bound_shader = token;
        self.calls.push(DriverCall::BindShader(token));
        self.stats.shader_binds += 1;
        Ok(())
    }

    fn bind_texture(&mut self, texture: &Texture2D, unit: usize) -> RenderResult<()> {
        self.require_initialized("bind_texture")?;
        self.resolve(texture.lease(), "bind_texture")?;
        let slot = self.units.get_mut(unit).ok_or_else(|| RenderError::State {
            operation: "bind_texture",
            reason: format!("texture unit {unit} out of range"),
        })?;
        *slot = Some(texture.token());
        self.calls.push(DriverCall::BindTexture { unit, texture: texture.token() });
        self.stats.texture_binds += 1;
        Ok(())
    }

    fn unbind_texture(&mut self, unit: usize) -> RenderResult<()> {
        self.require_initialized("unbind_texture")?;
        let slot = self.units.get_mut(unit).ok_or_else(|| RenderError::State {
            operation: "unbind_texture",
            reason: format!("texture unit {unit} out of range"),
        })?;
        *slot = None;
        self.calls.push(DriverCall::UnbindTexture { unit });
        self.stats.texture_unbinds += 1;
        Ok(())
    }

    fn apply_state(&mut self, state: PipelineState) -> RenderResult<()> {
        self.require_initialized("apply_state")?;
        self.calls.push(DriverCall::ApplyState(state));
        self.stats.state_changes += 1;
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> RenderResult<()> {
        self.require_recording("draw")?;
        let shader = self.bound_shader.ok_or_else(|| RenderError::State {
            operation: "draw",
            reason: "no shader is bound".to_string(),
        })?;

        self.resolve(call.vertex_buffer.lease(), "draw")?;
        if call.vertex_buffer.vertex_format().is_none() {
            return Err(RenderError::State {
                operation: "draw",
                reason: "vertex slot holds a non-vertex buffer".to_string(),
            });
        }
        let element_count = match call.index_buffer {
            Some(indices) => {
                self.resolve(indices.lease(), "draw")?;
                indices.element_count()
            }
            None => call.vertex_buffer.element_count(),
        };
        for &unit in call.texture_units {
            if self.units.get(unit).copied().flatten().is_none() {
                return Err(RenderError::State {
                    operation: "draw",
                    reason: format!("texture unit {unit} is empty"),
                });
            }
        }

        self.calls.push(DriverCall::Draw {
            shader,
            vertex_buffer: call.vertex_buffer.token(),
            index_buffer: call.index_buffer.map(Buffer::token),
            element_count,
        });
        self.stats.draw_calls += 1;
        log::trace!("Headless draw: {element_count} elements");
        Ok(())
    }

    fn create_text_shader(&mut self) -> RenderResult<Option<Rc<Shader>>> {
        let shader = self.create_shader(&ShaderDescriptor {
            name: "text",
            vertex_code: TEXT_VERTEX_STAGE,
            fragment_code: TEXT_FRAGMENT_STAGE,
        })?;
        Ok(Some(shader))
    }

    fn text_shader(&self) -> Option<Rc<Shader>> {
        self.text_shader.clone()
    }

    fn stats(&self) -> &DriverStats {
        &self.stats
    }

    fn shutdown(&mut self) {
        self.text_shader = None;
        self.process_releases();
        let leaked = self.objects.len();
        if leaked > 0 {
            log::debug!("Headless shutdown destroying {leaked} resources still referenced");
            self.stats.resources_released += leaked as u64;
            self.objects.clear();
        }
        self.units.clear();
        self.bound_shader = None;
        self.recording = false;
        self.initialized = false;
        log::info!("Headless device shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::resources::ResourceUsage;

    fn initialized() -> HeadlessBackend {
        let mut backend = HeadlessBackend::new();
        backend
            .initialize(&RenderParameters::new(BackendKind::Headless).with_size(320, 240))
            .expect("headless init");
        backend
    }

    #[test]
    fn test_initialize_queries_capabilities_once() {
        let backend = initialized();
        assert_eq!(backend.capability_queries(), 1);
        assert_eq!(backend.size(), (320, 240));
        assert!(backend.text_shader().is_some());
    }

    #[test]
    fn test_immutable_buffer_rejects_update() {
        let mut backend = initialized();
        let data = [1u8; 24];
        let buffer = backend
            .create_vertex_buffer(&BufferDescriptor::immutable(&data), VertexFormat::Position)
            .unwrap();

        assert_eq!(buffer.element_count(), 2);
        let result = backend.update_buffer(&buffer, 0, &[0u8; 24]);
        assert!(matches!(result, Err(RenderError::ResourceUpdate { .. })));
        assert_eq!(backend.buffer_contents(&buffer), Some(&data[..]));
    }

    #[test]
    fn test_dynamic_buffer_accepts_partial_update() {
        let mut backend = initialized();
        let buffer = backend.create_constant_buffer(&BufferDescriptor::dynamic(8)).unwrap();

        backend.update_buffer(&buffer, 4, &[9, 9, 9, 9]).unwrap();
        assert_eq!(backend.buffer_contents(&buffer), Some(&[0, 0, 0, 0, 9, 9, 9, 9][..]));
    }

    #[test]
    fn test_default_buffer_requires_full_replacement() {
        let mut backend = initialized();
        let data = [0u8; 8];
        let buffer = backend
            .create_constant_buffer(&BufferDescriptor::with_data(&data, ResourceUsage::Default))
            .unwrap();

        assert!(backend.update_buffer(&buffer, 0, &[1u8; 4]).is_err());
        assert!(backend.update_buffer(&buffer, 0, &[1u8; 8]).is_ok());
    }

    #[test]
    fn test_dynamic_texture_accepts_partial_update() {
        let mut backend = initialized();
        let texture = backend
            .create_texture_2d(&TextureDescriptor::dynamic(2, 2, TextureFormat::Rgba8))
            .unwrap();

        // Right column: one texel per row
        backend
            .update_texture(&texture, Some(TextureRegion::new(1, 0, 1, 2)), &[7, 7, 7, 7, 9, 9, 9, 9])
            .unwrap();
        assert_eq!(
            backend.texture_contents(&texture),
            Some(&[0, 0, 0, 0, 7, 7, 7, 7, 0, 0, 0, 0, 9, 9, 9, 9][..])
        );

        backend.update_texture(&texture, None, &[1; 16]).unwrap();
        assert_eq!(backend.texture_contents(&texture), Some(&[1; 16][..]));
    }

    #[test]
    fn test_texture_update_rules() {
        let mut backend = initialized();
        let pixels = [0u8; 16];
        let fixed = backend
            .create_texture_2d(&TextureDescriptor::immutable(2, 2, TextureFormat::Rgba8, &pixels))
            .unwrap();
        let whole_only = backend
            .create_texture_2d(&TextureDescriptor {
                usage: ResourceUsage::Default,
                ..TextureDescriptor::immutable(2, 2, TextureFormat::Rgba8, &pixels)
            })
            .unwrap();
        let dynamic = backend
            .create_texture_2d(&TextureDescriptor::dynamic(2, 2, TextureFormat::R8))
            .unwrap();

        assert!(backend.update_texture(&fixed, None, &pixels).is_err());
        assert!(backend.update_texture(&whole_only, Some(TextureRegion::new(0, 0, 1, 1)), &[1; 4]).is_err());
        assert!(backend.update_texture(&whole_only, None, &[1; 16]).is_ok());
        assert!(backend.update_texture(&dynamic, Some(TextureRegion::new(1, 1, 2, 1)), &[1, 1]).is_err());
        assert!(backend.update_texture(&dynamic, Some(TextureRegion::new(1, 1, 1, 1)), &[1, 1]).is_err());
        assert!(backend.update_texture(&dynamic, Some(TextureRegion::new(1, 1, 1, 1)), &[5]).is_ok());
        assert_eq!(backend.texture_contents(&dynamic), Some(&[0, 0, 0, 5][..]));
    }

    #[test]
    fn test_released_resources_are_destroyed_at_present() {
        let mut backend = initialized();
        let baseline = backend.live_resources();
        let buffer = backend.create_constant_buffer(&BufferDescriptor::dynamic(16)).unwrap();
        let shared = Rc::clone(&buffer);
        assert_eq!(backend.live_resources(), baseline + 1);

        drop(buffer);
        drop(shared);
        assert_eq!(backend.live_resources(), baseline + 1, "destruction is deferred");

        backend.start_render().unwrap();
        backend.end_render().unwrap();
        backend.present_frame().unwrap();
        assert_eq!(backend.live_resources(), baseline);
        assert_eq!(backend.stats().resources_released, 1);
    }

    #[test]
    fn test_draw_without_shader_is_state_error() {
        let mut backend = initialized();
        let buffer = backend
            .create_vertex_buffer(&BufferDescriptor::dynamic(12), VertexFormat::Position)
            .unwrap();
        backend.start_render().unwrap();

        let call = DrawCall {
            vertex_buffer: &buffer,
            index_buffer: None,
            model_view_projection: crate::foundation::math::Mat4::identity(),
            texture_units: &[],
            color: [1.0; 4],
        };
        assert!(matches!(backend.draw(&call), Err(RenderError::State { .. })));
        assert_eq!(backend.stats().draw_calls, 0);
    }

    #[test]
    fn test_foreign_resource_is_rejected() {
        let mut ours = initialized();
        let mut theirs = initialized();
        let texel = [0u8; 4];
        let texture = theirs
            .create_texture_2d(&TextureDescriptor::immutable(1, 1, TextureFormat::Rgba8, &texel))
            .unwrap();

        assert!(ours.bind_texture(&texture, 0).is_err());
    }

    #[test]
    fn test_empty_shader_code_fails_creation() {
        let mut backend = initialized();
        let result = backend.create_shader(&ShaderDescriptor {
            name: "broken",
            vertex_code: &[],
            fragment_code: b"x",
        });
        assert!(matches!(result, Err(RenderError::ResourceCreation { .. })));
    }
}
