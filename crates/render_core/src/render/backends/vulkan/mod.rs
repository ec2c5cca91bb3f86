//! Vulkan backend implementation
//!
//! Renders into an offscreen frame target with a single frame in flight.
//! Pipeline state values are folded into a [`pipeline::PipelineDesc`] and
//! baked into pipelines on first use; texture units map onto one combined
//! image sampler array; per-draw data travels as push constants.

/// Instance, physical and logical device
pub mod context;

/// Host-visible buffers
pub mod memory;

/// Images, textures and samplers
pub mod image;

/// Command recording and the offscreen frame target
pub mod frame;

/// Shader programs, descriptor sets and pipelines
pub mod pipeline;

use std::path::{Path, PathBuf};
use std::rc::Rc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
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

use context::VulkanContext;
use frame::{CommandContext, FrameTarget};
use image::{depth_aspect, depth_format, texture_format, GpuImage, GpuSampler, GpuTexture};
use memory::GpuBuffer;
use pipeline::{PipelineCache, PipelineDesc, PipelineKey, ShaderProgram, TextureBindings, TEXTURE_UNITS};

/// Vulkan-specific errors
#[derive(thiserror::Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Memory allocation failed
    #[error("Out of memory: {requested} bytes")]
    OutOfMemory {
        /// Number of bytes that were requested
        requested: u64,
    },

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No memory type satisfies the requested properties
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

impl From<VulkanError> for RenderError {
    fn from(err: VulkanError) -> Self {
        Self::Backend(err.to_string())
    }
}

fn creation_failed(resource: impl Into<String>) -> impl FnOnce(VulkanError) -> RenderError {
    let resource = resource.into();
    move |err| {
        log::error!("Failed to create {resource}: {err}");
        RenderError::ResourceCreation {
            operation: "create",
            resource,
            reason: err.to_string(),
        }
    }
}

/// Per-draw data pushed to both shader stages
///
/// Matches the push constant block of the built-in shaders: `mat4`,
/// `uvec4 texture_units`, `vec4 color`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct DrawConstants {
    /// Column-major model-view-projection matrix
    pub mvp: [[f32; 4]; 4],
    /// First four texture units of the material
    pub texture_units: [u32; 4],
    /// Material tint
    pub color: [f32; 4],
}

impl DrawConstants {
    fn from_call(call: &DrawCall<'_>) -> Self {
        let mut texture_units = [0u32; 4];
        for (slot, &unit) in texture_units.iter_mut().zip(call.texture_units) {
            *slot = u32::try_from(unit).unwrap_or(0);
        }
        Self {
            mvp: call.model_view_projection.into(),
            texture_units,
            color: call.color,
        }
    }
}

// Targets and samplers are never bound; they are held until their release
// so that dropping the variant destroys the native object.
enum NativeObject {
    Buffer(GpuBuffer),
    Texture(GpuTexture),
    RenderTarget { _image: GpuImage },
    DepthStencilTarget { _image: GpuImage },
    Sampler { _sampler: GpuSampler },
    Shader(ShaderProgram),
}

/// Everything that exists only between `initialize` and `shutdown`
///
/// Fields drop in declaration order: native objects first, the context last.
struct DeviceState {
    objects: SlotMap<ResourceKey, NativeObject>,
    pipelines: PipelineCache,
    bindings: TextureBindings,
    placeholder: GpuTexture,
    frame: FrameTarget,
    commands: CommandContext,
    context: VulkanContext,
}

impl DeviceState {
    fn new(params: &RenderParameters) -> VulkanResult<Self> {
        let context = VulkanContext::new("render_core")?;
        let device = context.raw_device().clone();
        let physical = &context.physical_device;

        let commands = CommandContext::new(&device, context.graphics_queue(), context.graphics_queue_family())?;
        let frame = FrameTarget::new(
            &device,
            physical,
            vk::Extent2D { width: params.width, height: params.height },
            params.depth_stencil_bits,
        )?;
        let placeholder = GpuTexture::white(&device, physical, &commands)?;
        let bindings = TextureBindings::new(&device)?;
        let pipelines = PipelineCache::new(
            &device,
            bindings.layout(),
            physical.features.fill_mode_non_solid == vk::TRUE,
        )?;

        Ok(Self {
            objects: SlotMap::with_key(),
            pipelines,
            bindings,
            placeholder,
            frame,
            commands,
            context,
        })
    }

    fn device(&self) -> &ash::Device {
        self.context.raw_device()
    }
}

impl Drop for DeviceState {
    fn drop(&mut self) {
        unsafe {
            let _ = self.context.raw_device().device_wait_idle();
        }
    }
}

/// Native Vulkan backend
///
/// Construction is free; the device is created by
/// [`RenderBackend::initialize`] and destroyed by
/// [`RenderBackend::shutdown`].
pub struct VulkanBackend {
    state: Option<DeviceState>,
    capabilities: DeviceCapabilities,
    capability_queries: u32,
    recording: bool,
    frame_recorded: bool,
    command_buffer: vk::CommandBuffer,
    bound_pipeline: vk::Pipeline,
    clear_color: [f32; 4],
    viewport: Viewport,
    pipeline_desc: PipelineDesc,
    bound_shader: Option<ResourceToken>,
    text_shader: Option<Rc<Shader>>,
    releases: ReleaseQueue,
    stats: DriverStats,
}

impl VulkanBackend {
    /// Uninitialized backend
    pub fn new() -> Self {
        Self {
            state: None,
            capabilities: DeviceCapabilities { max_active_textures: 0, max_render_targets: 0 },
            capability_queries: 0,
            recording: false,
            frame_recorded: false,
            command_buffer: vk::CommandBuffer::null(),
            bound_pipeline: vk::Pipeline::null(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            viewport: Viewport::full(0, 0),
            pipeline_desc: PipelineDesc::default(),
            bound_shader: None,
            text_shader: None,
            releases: ReleaseQueue::new(),
            stats: DriverStats::default(),
        }
    }

    /// How often the device limits were queried
    pub fn capability_queries(&self) -> u32 {
        self.capability_queries
    }

    /// Name of the selected GPU
    pub fn device_name(&self) -> Option<String> {
        self.state.as_ref().map(|state| state.context.physical_device.name())
    }

    /// Color image of the frame target, in `TRANSFER_SRC_OPTIMAL` after present
    pub fn frame_color_image(&self) -> Option<vk::Image> {
        self.state.as_ref().map(|state| state.frame.color_image())
    }

    /// Number of graphics pipelines built so far
    pub fn pipeline_count(&self) -> usize {
        self.state.as_ref().map_or(0, |state| state.pipelines.len())
    }

    fn device_state(&self, operation: &'static str) -> RenderResult<&DeviceState> {
        self.state.as_ref().ok_or_else(|| not_initialized(operation))
    }

    fn device_state_mut(&mut self, operation: &'static str) -> RenderResult<&mut DeviceState> {
        self.state.as_mut().ok_or_else(|| not_initialized(operation))
    }

    fn require_recording(&self, operation: &'static str) -> RenderResult<&DeviceState> {
        let state = self.device_state(operation)?;
        if self.recording {
            Ok(state)
        } else {
            Err(RenderError::State {
                operation,
                reason: "no frame is being recorded".to_string(),
            })
        }
    }

    fn allocate(&mut self, object: NativeObject) -> RenderResult<ResourceLease> {
        let state = self.device_state_mut("create")?;
        let key = state.objects.insert(object);
        self.stats.resources_created += 1;
        Ok(self.releases.lease(ResourceToken::new(BackendKind::Vulkan, key)))
    }

    fn resolve(&self, lease: &ResourceLease, operation: &'static str) -> RenderResult<ResourceKey> {
        let token = self.releases.check_owner(lease, operation)?;
        let state = self.device_state(operation)?;
        if state.objects.contains_key(token.key()) {
            Ok(token.key())
        } else {
            Err(RenderError::State {
                operation,
                reason: "resource has already been destroyed".to_string(),
            })
        }
    }

    fn process_releases(&mut self) {
        let released = self.releases.drain();
        let Some(state) = self.state.as_mut() else {
            return;
        };
        for token in released {
            match state.objects.remove(token.key()) {
                Some(NativeObject::Shader(_)) => state.pipelines.evict_shader(token.key()),
                Some(NativeObject::Texture(_)) => state.bindings.forget(token),
                Some(_) => {}
                None => continue,
            }
            self.stats.resources_released += 1;
            if self.bound_shader == Some(token) {
                self.bound_shader = None;
            }
        }
    }

    fn apply_viewport(&self, state: &DeviceState) {
        let viewport = vk::Viewport {
            x: self.viewport.x as f32,
            y: self.viewport.y as f32,
            width: self.viewport.width as f32,
            height: self.viewport.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D {
                x: i32::try_from(self.viewport.x).unwrap_or(i32::MAX),
                y: i32::try_from(self.viewport.y).unwrap_or(i32::MAX),
            },
            extent: vk::Extent2D { width: self.viewport.width, height: self.viewport.height },
        };
        unsafe {
            state.device().cmd_set_viewport(self.command_buffer, 0, &[viewport]);
            state.device().cmd_set_scissor(self.command_buffer, 0, &[scissor]);
        }
    }

    fn create_buffer(
        &mut self,
        resource: &str,
        desc: &BufferDescriptor<'_>,
        element_size: usize,
        usage: vk::BufferUsageFlags,
        kind: impl FnOnce(usize) -> BufferKind,
    ) -> RenderResult<Rc<Buffer>> {
        let state = self.device_state("create_buffer")?;
        let count = validate_buffer_descriptor(resource, desc, element_size).map_err(|e| {
            log::error!("{e}");
            e
        })?;

        let zeroed;
        let bytes = match desc.initial_data {
            Some(data) => data,
            None => {
                zeroed = vec![0u8; desc.size];
                &zeroed
            }
        };
        let buffer = GpuBuffer::with_data(state.device(), &state.context.physical_device, bytes, usage)
            .map_err(creation_failed(resource))?;

        let lease = self.allocate(NativeObject::Buffer(buffer))?;
        log::debug!("Created {resource} ({} bytes, {:?})", desc.size, desc.usage);
        Ok(Rc::new(Buffer::new(lease, kind(count), desc.usage, desc.size)))
    }

    fn check_target_size(resource: &str, width: u32, height: u32) -> RenderResult<()> {
        if width == 0 || height == 0 {
            return Err(RenderError::ResourceCreation {
                operation: "create",
                resource: resource.to_string(),
                reason: format!("invalid size {width}x{height}"),
            });
        }
        Ok(())
    }

    fn text_shader_dirs() -> [PathBuf; 2] {
        [
            PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/../../target/shaders")),
            PathBuf::from("target/shaders"),
        ]
    }

    fn read_text_shader() -> Option<(Vec<u8>, Vec<u8>)> {
        Self::text_shader_dirs().iter().find_map(|dir| {
            let read = |name: &str| std::fs::read(Path::new(dir).join(name)).ok();
            Some((read("text_vert.spv")?, read("text_frag.spv")?))
        })
    }
}

impl Default for VulkanBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn not_initialized(operation: &'static str) -> RenderError {
    RenderError::State {
        operation,
        reason: "Vulkan device is not initialized".to_string(),
    }
}

impl ResourceCreator for VulkanBackend {
    fn create_vertex_buffer(&mut self, desc: &BufferDescriptor<'_>, format: VertexFormat) -> RenderResult<Rc<Buffer>> {
        self.create_buffer(
            "vertex buffer",
            desc,
            format.stride() as usize,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            |count| BufferKind::Vertex { format, count },
        )
    }

    fn create_index_buffer(&mut self, desc: &BufferDescriptor<'_>, format: IndexFormat) -> RenderResult<Rc<Buffer>> {
        self.create_buffer(
            "index buffer",
            desc,
            format.size(),
            vk::BufferUsageFlags::INDEX_BUFFER,
            |count| BufferKind::Index { format, count },
        )
    }

    fn create_constant_buffer(&mut self, desc: &BufferDescriptor<'_>) -> RenderResult<Rc<Buffer>> {
        self.create_buffer("constant buffer", desc, 1, vk::BufferUsageFlags::UNIFORM_BUFFER, |_| BufferKind::Constant)
    }

    fn create_texture_2d(&mut self, desc: &TextureDescriptor<'_>) -> RenderResult<Rc<Texture2D>> {
        let state = self.device_state("create_texture_2d")?;
        validate_texture_descriptor(desc)?;

        let zeroed;
        let pixels = match desc.initial_data {
            Some(data) => data,
            None => {
                zeroed = vec![0u8; desc.byte_size()];
                &zeroed
            }
        };
        let texture = GpuTexture::new(
            state.device(),
            &state.context.physical_device,
            &state.commands,
            vk::Extent2D { width: desc.width, height: desc.height },
            desc.format,
            pixels,
        )
        .map_err(creation_failed("texture"))?;

        let lease = self.allocate(NativeObject::Texture(texture))?;
        log::debug!("Created {}x{} {:?} texture", desc.width, desc.height, desc.format);
        Ok(Rc::new(Texture2D::new(lease, desc.width, desc.height, desc.format, desc.usage)))
    }

    fn create_render_target(&mut self, width: u32, height: u32, format: TextureFormat) -> RenderResult<Rc<RenderTarget>> {
        let state = self.device_state("create_render_target")?;
        Self::check_target_size("render target", width, height)?;

        let image = GpuImage::new(
            state.device(),
            &state.context.physical_device,
            vk::Extent2D { width, height },
            texture_format(format),
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_SRC,
            vk::ImageAspectFlags::COLOR,
        )
        .map_err(creation_failed("render target"))?;

        let lease = self.allocate(NativeObject::RenderTarget { _image: image })?;
        Ok(Rc::new(RenderTarget::new(lease, width, height, format)))
    }

    fn create_depth_stencil_target(&mut self, width: u32, height: u32, bits: DepthStencilBits) -> RenderResult<Rc<DepthStencilTarget>> {
        let state = self.device_state("create_depth_stencil_target")?;
        Self::check_target_size("depth-stencil target", width, height)?;

        let image = GpuImage::new(
            state.device(),
            &state.context.physical_device,
            vk::Extent2D { width, height },
            depth_format(bits),
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            depth_aspect(bits),
        )
        .map_err(creation_failed("depth-stencil target"))?;

        let lease = self.allocate(NativeObject::DepthStencilTarget { _image: image })?;
        Ok(Rc::new(DepthStencilTarget::new(lease, width, height, bits)))
    }

    fn create_sampler_state(&mut self, desc: &SamplerDescriptor) -> RenderResult<Rc<SamplerState>> {
        let state = self.device_state("create_sampler_state")?;
        if !(1.0..=16.0).contains(&desc.max_anisotropy) {
            return Err(RenderError::ResourceCreation {
                operation: "create",
                resource: "sampler state".to_string(),
                reason: format!("anisotropy {} outside 1..=16", desc.max_anisotropy),
            });
        }
        let sampler = GpuSampler::new(state.device(), &state.context.physical_device, desc)
            .map_err(creation_failed("sampler state"))?;

        let lease = self.allocate(NativeObject::Sampler { _sampler: sampler })?;
        Ok(Rc::new(SamplerState::new(lease, *desc)))
    }

    fn create_shader(&mut self, desc: &ShaderDescriptor<'_>) -> RenderResult<Rc<Shader>> {
        let state = self.device_state("create_shader")?;
        validate_shader_descriptor(desc).map_err(|e| {
            log::error!("{e}");
            e
        })?;
        let program = ShaderProgram::new(state.device(), desc.vertex_code, desc.fragment_code).map_err(|e| {
            log::error!("Failed to compile shader '{}': {e}", desc.name);
            RenderError::ResourceCreation {
                operation: "compile",
                resource: format!("shader '{}'", desc.name),
                reason: e.to_string(),
            }
        })?;

        let lease = self.allocate(NativeObject::Shader(program))?;
        log::debug!("Created shader '{}'", desc.name);
        Ok(Rc::new(Shader::new(lease, desc.name)))
    }

    fn update_buffer(&mut self, buffer: &Buffer, offset: usize, data: &[u8]) -> RenderResult<()> {
        let key = self.resolve(buffer.lease(), "update_buffer")?;
        buffer
            .usage()
            .check_update(buffer.size(), offset, data.len())
            .map_err(|reason| RenderError::ResourceUpdate { resource: "buffer".to_string(), reason })?;

        let state = self.device_state("update_buffer")?;
        match state.objects.get(key) {
            Some(NativeObject::Buffer(native)) => Ok(native.write(offset as vk::DeviceSize, data)?),
            _ => Err(RenderError::State {
                operation: "update_buffer",
                reason: "token does not name a buffer".to_string(),
            }),
        }
    }

    fn update_texture(&mut self, texture: &Texture2D, region: Option<TextureRegion>, data: &[u8]) -> RenderResult<()> {
        let key = self.resolve(texture.lease(), "update_texture")?;
        let region = validate_texture_update(texture, region, data)?;

        let state = self.device_state("update_texture")?;
        match state.objects.get(key) {
            Some(NativeObject::Texture(native)) => {
                native.update(state.device(), &state.context.physical_device, &state.commands, region, data)?;
                Ok(())
            }
            _ => Err(RenderError::State {
                operation: "update_texture",
                reason: "token does not name a texture".to_string(),
            }),
        }
    }

    fn live_resources(&self) -> usize {
        self.state.as_ref().map_or(0, |state| state.objects.len())
    }
}

impl RenderBackend for VulkanBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Vulkan
    }

    fn initialize(&mut self, params: &RenderParameters) -> RenderResult<()> {
        params.validate()?;
        if self.state.is_some() {
            return Err(RenderError::State {
                operation: "initialize",
                reason: "Vulkan device is already initialized".to_string(),
            });
        }

        let state = DeviceState::new(params).map_err(|e| {
            log::error!("Vulkan initialization failed: {e}");
            RenderError::from(e)
        })?;
        self.state = Some(state);

        self.capabilities = self.query_device_capabilities()?;
        self.viewport = Viewport::full(params.width, params.height);
        self.pipeline_desc = PipelineDesc::default();
        self.text_shader = self.create_text_shader()?;

        log::info!(
            "Vulkan device initialized: {}x{}, {} texture units, {} render targets",
            params.width, params.height, self.capabilities.max_active_textures, self.capabilities.max_render_targets
        );
        Ok(())
    }

    fn query_device_capabilities(&mut self) -> RenderResult<DeviceCapabilities> {
        let state = self.device_state("query_device_capabilities")?;
        let limits = state.context.limits();
        let sampled = limits
            .max_per_stage_descriptor_sampled_images
            .min(limits.max_per_stage_descriptor_samplers) as usize;

        let capabilities = DeviceCapabilities {
            max_active_textures: sampled.min(TEXTURE_UNITS),
            max_render_targets: limits.max_color_attachments as usize,
        };
        self.capability_queries += 1;
        Ok(capabilities)
    }

    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    fn clip_convention(&self) -> ClipConvention {
        ClipConvention::VULKAN
    }

    fn set_clear_color(&mut self, color: [f32; 4]) {
        self.clear_color = color;
    }

    fn clear(&mut self, flags: ClearFlags) -> RenderResult<()> {
        let state = self.require_recording("clear")?;

        let mut attachments = Vec::with_capacity(2);
        if flags.contains(ClearFlags::COLOR) {
            attachments.push(vk::ClearAttachment {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                color_attachment: 0,
                clear_value: vk::ClearValue { color: vk::ClearColorValue { float32: self.clear_color } },
            });
        }
        if flags.contains(ClearFlags::DEPTH) {
            attachments.push(vk::ClearAttachment {
                aspect_mask: state.frame.depth_aspect(),
                color_attachment: 0,
                clear_value: vk::ClearValue { depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 } },
            });
        }

        if !attachments.is_empty() {
            let rect = vk::ClearRect {
                rect: vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent: state.frame.extent() },
                base_array_layer: 0,
                layer_count: 1,
            };
            unsafe {
                state.device().cmd_clear_attachments(self.command_buffer, &attachments, &[rect]);
            }
        }
        self.stats.clears += 1;
        Ok(())
    }

    fn start_render(&mut self) -> RenderResult<()> {
        if self.recording {
            return Err(RenderError::State {
                operation: "start_render",
                reason: "a frame is already being recorded".to_string(),
            });
        }
        let clear_color = self.clear_color;
        let state = self.device_state_mut("start_render")?;

        let command_buffer = state.commands.begin_frame()?;
        state.bindings.begin_frame()?;
        state.frame.begin(command_buffer, clear_color);

        self.command_buffer = command_buffer;
        self.bound_pipeline = vk::Pipeline::null();
        self.recording = true;
        let state = self.device_state("start_render")?;
        self.apply_viewport(state);
        Ok(())
    }

    fn end_render(&mut self) -> RenderResult<()> {
        let state = self.require_recording("end_render")?;
        state.frame.end(self.command_buffer);
        state.commands.end_frame()?;
        self.recording = false;
        self.frame_recorded = true;
        Ok(())
    }

    fn present_frame(&mut self) -> RenderResult<()> {
        let state = self.device_state("present_frame")?;
        if self.recording {
            return Err(RenderError::State {
                operation: "present_frame",
                reason: "frame recording has not ended".to_string(),
            });
        }
        if self.frame_recorded {
            state.commands.submit_frame_and_wait()?;
            self.frame_recorded = false;
        }
        self.stats.frames_presented += 1;
        self.process_releases();
        Ok(())
    }

    fn set_viewport(&mut self, viewport: Viewport) -> RenderResult<()> {
        self.device_state("set_viewport")?;
        if viewport.width == 0 || viewport.height == 0 {
            return Err(RenderError::State {
                operation: "set_viewport",
                reason: format!("empty viewport {}x{}", viewport.width, viewport.height),
            });
        }
        self.viewport = viewport;
        if self.recording {
            let state = self.device_state("set_viewport")?;
            self.apply_viewport(state);
        }
        Ok(())
    }

    fn resource_creator(&mut self) -> &mut dyn ResourceCreator {
        self
    }

    fn bind_shader(&mut self, shader: Option<&Shader>) -> RenderResult<()> {
        self.device_state("bind_shader")?;
        self.bound_shader = match shader {
            Some(shader) => {
                self.resolve(shader.lease(), "bind_shader")?;
                Some(shader.token())
            }
            None => None,
        };
        self.stats.shader_binds += 1;
        Ok(())
    }

    fn bind_texture(&mut self, texture: &Texture2D, unit: usize) -> RenderResult<()> {
        let key = self.resolve(texture.lease(), "bind_texture")?;
        if unit >= self.capabilities.max_active_textures {
            return Err(RenderError::State {
                operation: "bind_texture",
                reason: format!("texture unit {unit} out of range"),
            });
        }
        let state = self.device_state_mut("bind_texture")?;
        let (view, sampler) = match state.objects.get(key) {
            Some(NativeObject::Texture(native)) => (native.view(), native.sampler()),
            _ => {
                return Err(RenderError::State {
                    operation: "bind_texture",
                    reason: "token does not name a texture".to_string(),
                })
            }
        };
        state.bindings.bind(unit, texture.token(), view, sampler);
        self.stats.texture_binds += 1;
        Ok(())
    }

    fn unbind_texture(&mut self, unit: usize) -> RenderResult<()> {
        let max_units = self.capabilities.max_active_textures;
        let state = self.device_state_mut("unbind_texture")?;
        if unit >= max_units {
            return Err(RenderError::State {
                operation: "unbind_texture",
                reason: format!("texture unit {unit} out of range"),
            });
        }
        state.bindings.unbind(unit);
        self.stats.texture_unbinds += 1;
        Ok(())
    }

    fn apply_state(&mut self, state: PipelineState) -> RenderResult<()> {
        self.device_state("apply_state")?;
        self.pipeline_desc.apply(state);
        self.stats.state_changes += 1;
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> RenderResult<()> {
        self.require_recording("draw")?;
        let shader = self.bound_shader.ok_or_else(|| RenderError::State {
            operation: "draw",
            reason: "no shader is bound".to_string(),
        })?;

        let vertex_key = self.resolve(call.vertex_buffer.lease(), "draw")?;
        let Some(vertex_format) = call.vertex_buffer.vertex_format() else {
            return Err(RenderError::State {
                operation: "draw",
                reason: "vertex slot holds a non-vertex buffer".to_string(),
            });
        };
        let index = match call.index_buffer {
            Some(indices) => {
                let key = self.resolve(indices.lease(), "draw")?;
                let BufferKind::Index { format, count } = indices.kind() else {
                    return Err(RenderError::State {
                        operation: "draw",
                        reason: "index slot holds a non-index buffer".to_string(),
                    });
                };
                Some((key, format, count))
            }
            None => None,
        };

        let command_buffer = self.command_buffer;
        let bound_pipeline = self.bound_pipeline;
        let key = PipelineKey { shader: shader.key(), vertex_format, desc: self.pipeline_desc };
        let state = self.device_state_mut("draw")?;

        for &unit in call.texture_units {
            if !state.bindings.is_bound(unit) {
                return Err(RenderError::State {
                    operation: "draw",
                    reason: format!("texture unit {unit} is empty"),
                });
            }
        }

        let DeviceState { objects, pipelines, bindings, placeholder, frame, context, .. } = state;
        let Some(NativeObject::Shader(program)) = objects.get(shader.key()) else {
            return Err(RenderError::State {
                operation: "draw",
                reason: "bound shader has been destroyed".to_string(),
            });
        };
        let pipeline = pipelines.get_or_create(key, program, frame.render_pass())?;
        let descriptor_set = bindings.current_set((placeholder.view(), placeholder.sampler()))?;

        let buffer_handle = |key: ResourceKey| match objects.get(key) {
            Some(NativeObject::Buffer(buffer)) => Ok(buffer.handle()),
            _ => Err(RenderError::State {
                operation: "draw",
                reason: "token does not name a buffer".to_string(),
            }),
        };
        let vertex_buffer = buffer_handle(vertex_key)?;
        let index_buffer = index
            .map(|(key, format, count)| buffer_handle(key).map(|handle| (handle, format, count)))
            .transpose()?;

        let constants = DrawConstants::from_call(call);
        let device = context.raw_device();
        let element_count = unsafe {
            if pipeline != bound_pipeline {
                device.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, pipeline);
            }
            device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipelines.layout(),
                0,
                &[descriptor_set],
                &[],
            );
            device.cmd_push_constants(
                command_buffer,
                pipelines.layout(),
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                0,
                bytemuck::bytes_of(&constants),
            );
            device.cmd_bind_vertex_buffers(command_buffer, 0, &[vertex_buffer], &[0]);

            match index_buffer {
                Some((handle, format, count)) => {
                    let index_type = match format {
                        IndexFormat::U16 => vk::IndexType::UINT16,
                        IndexFormat::U32 => vk::IndexType::UINT32,
                    };
                    device.cmd_bind_index_buffer(command_buffer, handle, 0, index_type);
                    device.cmd_draw_indexed(command_buffer, u32::try_from(count).unwrap_or(u32::MAX), 1, 0, 0, 0);
                    count
                }
                None => {
                    let count = call.vertex_buffer.element_count();
                    device.cmd_draw(command_buffer, u32::try_from(count).unwrap_or(u32::MAX), 1, 0, 0);
                    count
                }
            }
        };

        self.bound_pipeline = pipeline;
        self.stats.draw_calls += 1;
        log::trace!("Vulkan draw: {element_count} elements");
        Ok(())
    }

    fn create_text_shader(&mut self) -> RenderResult<Option<Rc<Shader>>> {
        let Some((vertex_code, fragment_code)) = Self::read_text_shader() else {
            log::warn!("Text shader SPIR-V not found; text drawing is unavailable on Vulkan");
            return Ok(None);
        };
        let shader = self.create_shader(&ShaderDescriptor {
            name: "text",
            vertex_code: &vertex_code,
            fragment_code: &fragment_code,
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
        if let Some(state) = self.state.take() {
            let leaked = state.objects.len();
            if leaked > 0 {
                log::debug!("Vulkan shutdown destroying {leaked} resources still referenced");
                self.stats.resources_released += leaked as u64;
            }
            drop(state);
        }
        self.bound_shader = None;
        self.bound_pipeline = vk::Pipeline::null();
        self.command_buffer = vk::CommandBuffer::null();
        self.recording = false;
        self.frame_recorded = false;
        log::info!("Vulkan device shut down");
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        if self.state.is_some() {
            self.shutdown();
        }
    }
}
