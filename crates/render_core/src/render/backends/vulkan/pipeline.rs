//! Shader programs, texture unit descriptors and graphics pipelines
//!
//! Vulkan bakes most of the renderer's pipeline state values into immutable
//! pipeline objects. [`PipelineDesc`] accumulates the values committed by
//! `apply_state`; the first draw with a new (shader, vertex format, desc)
//! combination builds a pipeline and every later draw reuses it.

use std::collections::HashMap;
use std::ffi::CStr;
use std::io::Cursor;

use ash::{vk, Device};

use super::image::compare_op;
use super::{VulkanError, VulkanResult};
use crate::render::api::{BlendEquation, BlendFactor, CullMethod, DepthFunc, FillMode, PipelineState};
use crate::render::resources::{AttributeFormat, ResourceKey, ResourceToken, VertexFormat};

const ENTRY_POINT: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

/// Texture units exposed to shaders as `textures[16]` at set 0, binding 0
pub const TEXTURE_UNITS: usize = 16;

/// Size of [`super::DrawConstants`] as declared by the shaders
pub const PUSH_CONSTANT_SIZE: u32 = 96;

/// Descriptor sets one frame may allocate before the pool runs dry
const MAX_SETS_PER_FRAME: u32 = 1024;

/// SPIR-V shader module wrapper with automatic resource management
pub struct ShaderModule {
    device: Device,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create a module from SPIR-V bytes
    ///
    /// The bytes need not be aligned. `read_spv` checks the word count and
    /// magic number (swapping big-endian input) before the driver sees them.
    pub fn from_spirv(device: &Device, bytes: &[u8]) -> VulkanResult<Self> {
        let words = ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|e| VulkanError::InvalidOperation {
            reason: format!("malformed SPIR-V: {e}"),
        })?;

        let create_info = vk::ShaderModuleCreateInfo::builder().code(&words);
        let module = unsafe {
            device.create_shader_module(&create_info, None).map_err(|e| {
                log::error!("vkCreateShaderModule failed: {e:?}");
                VulkanError::Api(e)
            })?
        };
        log::debug!("Shader module created from {} words", words.len());
        Ok(Self { device: device.clone(), module })
    }

    fn stage_info(&self, stage: vk::ShaderStageFlags) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(stage)
            .module(self.module)
            .name(ENTRY_POINT)
            .build()
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

/// Vertex + fragment module pair behind a `Shader` resource
pub struct ShaderProgram {
    vertex: ShaderModule,
    fragment: ShaderModule,
}

impl ShaderProgram {
    /// Build both stages
    pub fn new(device: &Device, vertex_code: &[u8], fragment_code: &[u8]) -> VulkanResult<Self> {
        Ok(Self {
            vertex: ShaderModule::from_spirv(device, vertex_code)?,
            fragment: ShaderModule::from_spirv(device, fragment_code)?,
        })
    }

    fn stages(&self) -> [vk::PipelineShaderStageCreateInfo; 2] {
        [
            self.vertex.stage_info(vk::ShaderStageFlags::VERTEX),
            self.fragment.stage_info(vk::ShaderStageFlags::FRAGMENT),
        ]
    }
}

/// Fixed-function state baked into a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineDesc {
    /// Depth test on/off
    pub depth_test: bool,
    /// Depth writes on/off
    pub depth_write: bool,
    /// Color writes on/off
    pub color_write: bool,
    /// Depth comparison
    pub depth_func: DepthFunc,
    /// Culled faces; `None` culls nothing
    pub cull: Option<CullMethod>,
    /// Rasterization mode
    pub fill: FillMode,
    /// Blending on/off
    pub blending: bool,
    /// Blend equation
    pub blend_equation: BlendEquation,
    /// Source blend factor
    pub src_factor: BlendFactor,
    /// Destination blend factor
    pub dst_factor: BlendFactor,
}

impl Default for PipelineDesc {
    fn default() -> Self {
        Self {
            depth_test: true,
            depth_write: true,
            color_write: true,
            depth_func: DepthFunc::Less,
            cull: None,
            fill: FillMode::Fill,
            blending: false,
            blend_equation: BlendEquation::Add,
            src_factor: BlendFactor::One,
            dst_factor: BlendFactor::Zero,
        }
    }
}

impl PipelineDesc {
    /// Fold one committed state value into the description
    pub fn apply(&mut self, state: PipelineState) {
        match state {
            PipelineState::DepthTest(on) => self.depth_test = on,
            PipelineState::DepthWrite(on) => self.depth_write = on,
            PipelineState::ColorWrite(on) => self.color_write = on,
            PipelineState::DepthFunc(func) => self.depth_func = func,
            PipelineState::CullMethod(method) => self.cull = Some(method),
            PipelineState::FillMode(mode) => self.fill = mode,
            PipelineState::Blending(on) => self.blending = on,
            PipelineState::BlendEquation(equation) => self.blend_equation = equation,
            PipelineState::BlendFactor { src, dst } => {
                self.src_factor = src;
                self.dst_factor = dst;
            }
        }
    }
}

fn attribute_format(format: AttributeFormat) -> vk::Format {
    match format {
        AttributeFormat::Float2 => vk::Format::R32G32_SFLOAT,
        AttributeFormat::Float3 => vk::Format::R32G32B32_SFLOAT,
        AttributeFormat::Float4 => vk::Format::R32G32B32A32_SFLOAT,
    }
}

fn polygon_mode(mode: FillMode) -> vk::PolygonMode {
    match mode {
        FillMode::Fill => vk::PolygonMode::FILL,
        FillMode::Wireframe => vk::PolygonMode::LINE,
        FillMode::Point => vk::PolygonMode::POINT,
    }
}

fn cull_mode(method: Option<CullMethod>) -> vk::CullModeFlags {
    match method {
        None => vk::CullModeFlags::NONE,
        Some(CullMethod::Front) => vk::CullModeFlags::FRONT,
        Some(CullMethod::Back) => vk::CullModeFlags::BACK,
    }
}

fn blend_op(equation: BlendEquation) -> vk::BlendOp {
    match equation {
        BlendEquation::Add => vk::BlendOp::ADD,
        BlendEquation::Subtract => vk::BlendOp::SUBTRACT,
        BlendEquation::ReverseSubtract => vk::BlendOp::REVERSE_SUBTRACT,
        BlendEquation::Min => vk::BlendOp::MIN,
        BlendEquation::Max => vk::BlendOp::MAX,
    }
}

fn blend_factor(factor: BlendFactor) -> vk::BlendFactor {
    match factor {
        BlendFactor::Zero => vk::BlendFactor::ZERO,
        BlendFactor::One => vk::BlendFactor::ONE,
        BlendFactor::SrcColor => vk::BlendFactor::SRC_COLOR,
        BlendFactor::OneMinusSrcColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
        BlendFactor::DstColor => vk::BlendFactor::DST_COLOR,
        BlendFactor::OneMinusDstColor => vk::BlendFactor::ONE_MINUS_DST_COLOR,
        BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DstAlpha => vk::BlendFactor::DST_ALPHA,
        BlendFactor::OneMinusDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
        BlendFactor::SrcAlphaSaturate => vk::BlendFactor::SRC_ALPHA_SATURATE,
    }
}

/// Texture units as seen by the shaders
///
/// Unused units point at a placeholder texture so every descriptor in the
/// array stays valid. A fresh set is written whenever a unit changed since
/// the last draw; the pool is reset at the start of every frame.
pub struct TextureBindings {
    device: Device,
    layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    units: [Option<(ResourceToken, vk::ImageView, vk::Sampler)>; TEXTURE_UNITS],
    current: vk::DescriptorSet,
    dirty: bool,
}

impl TextureBindings {
    /// Create the set layout and the per-frame pool
    pub fn new(device: &Device) -> VulkanResult<Self> {
        let bindings = [vk::DescriptorSetLayoutBinding::builder()
            .binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(TEXTURE_UNITS as u32)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)
            .build()];
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        let layout = unsafe { device.create_descriptor_set_layout(&layout_info, None).map_err(VulkanError::Api)? };

        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: MAX_SETS_PER_FRAME * TEXTURE_UNITS as u32,
        }];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(MAX_SETS_PER_FRAME)
            .pool_sizes(&pool_sizes);
        let pool = match unsafe { device.create_descriptor_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { device.destroy_descriptor_set_layout(layout, None) };
                return Err(VulkanError::Api(e));
            }
        };

        Ok(Self {
            device: device.clone(),
            layout,
            pool,
            units: [None; TEXTURE_UNITS],
            current: vk::DescriptorSet::null(),
            dirty: true,
        })
    }

    /// Set layout for the pipeline layout
    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Place a texture in a unit
    pub fn bind(&mut self, unit: usize, token: ResourceToken, view: vk::ImageView, sampler: vk::Sampler) {
        self.units[unit] = Some((token, view, sampler));
        self.dirty = true;
    }

    /// Empty a unit
    pub fn unbind(&mut self, unit: usize) {
        self.units[unit] = None;
        self.dirty = true;
    }

    /// Whether a unit currently holds a texture
    pub fn is_bound(&self, unit: usize) -> bool {
        self.units.get(unit).copied().flatten().is_some()
    }

    /// Empty every unit holding `token`
    pub fn forget(&mut self, token: ResourceToken) {
        for unit in self.units.iter_mut().filter(|u| matches!(u, Some((t, _, _)) if *t == token)) {
            *unit = None;
            self.dirty = true;
        }
    }

    /// Empty every unit
    pub fn clear(&mut self) {
        self.units = [None; TEXTURE_UNITS];
        self.dirty = true;
    }

    /// Recycle every set of the previous frame
    pub fn begin_frame(&mut self) -> VulkanResult<()> {
        unsafe {
            self.device
                .reset_descriptor_pool(self.pool, vk::DescriptorPoolResetFlags::empty())
                .map_err(VulkanError::Api)?;
        }
        self.current = vk::DescriptorSet::null();
        self.dirty = true;
        Ok(())
    }

    /// Set describing the current units, written on demand
    pub fn current_set(&mut self, placeholder: (vk::ImageView, vk::Sampler)) -> VulkanResult<vk::DescriptorSet> {
        if !self.dirty {
            return Ok(self.current);
        }

        let layouts = [self.layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);
        let set = unsafe {
            self.device.allocate_descriptor_sets(&alloc_info).map_err(|e| {
                if e == vk::Result::ERROR_OUT_OF_POOL_MEMORY {
                    VulkanError::InvalidOperation {
                        reason: format!("more than {MAX_SETS_PER_FRAME} texture unit changes in one frame"),
                    }
                } else {
                    VulkanError::Api(e)
                }
            })?
        }
        .into_iter()
        .next()
        .ok_or_else(|| VulkanError::InvalidOperation { reason: "no descriptor set allocated".to_string() })?;

        let image_infos: Vec<vk::DescriptorImageInfo> = self
            .units
            .iter()
            .map(|unit| {
                let (view, sampler) = unit.map_or(placeholder, |(_, view, sampler)| (view, sampler));
                vk::DescriptorImageInfo {
                    sampler,
                    image_view: view,
                    image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                }
            })
            .collect();
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(0)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_infos)
            .build();
        unsafe {
            self.device.update_descriptor_sets(&[write], &[]);
        }

        self.current = set;
        self.dirty = false;
        Ok(set)
    }
}

impl Drop for TextureBindings {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Identity of a built pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    /// Shader the pipeline runs
    pub shader: ResourceKey,
    /// Vertex layout it reads
    pub vertex_format: VertexFormat,
    /// Baked fixed-function state
    pub desc: PipelineDesc,
}

/// Shared pipeline layout plus every pipeline built so far
pub struct PipelineCache {
    device: Device,
    layout: vk::PipelineLayout,
    pipelines: HashMap<PipelineKey, vk::Pipeline>,
    non_solid_fill: bool,
}

impl PipelineCache {
    /// Create the pipeline layout: one texture set and the draw constants
    pub fn new(device: &Device, set_layout: vk::DescriptorSetLayout, non_solid_fill: bool) -> VulkanResult<Self> {
        let push_constant_ranges = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            offset: 0,
            size: PUSH_CONSTANT_SIZE,
        }];
        let set_layouts = [set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constant_ranges);
        let layout = unsafe { device.create_pipeline_layout(&layout_info, None).map_err(VulkanError::Api)? };

        Ok(Self {
            device: device.clone(),
            layout,
            pipelines: HashMap::new(),
            non_solid_fill,
        })
    }

    /// Layout shared by every pipeline
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// Number of pipelines built
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    /// Whether no pipeline has been built yet
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Pipeline for `key`, building it on first use
    pub fn get_or_create(
        &mut self,
        key: PipelineKey,
        program: &ShaderProgram,
        render_pass: vk::RenderPass,
    ) -> VulkanResult<vk::Pipeline> {
        if let Some(&pipeline) = self.pipelines.get(&key) {
            return Ok(pipeline);
        }
        if key.desc.fill != FillMode::Fill && !self.non_solid_fill {
            return Err(VulkanError::InvalidOperation {
                reason: format!("{:?} fill mode needs the fillModeNonSolid device feature", key.desc.fill),
            });
        }

        let pipeline = self.build(&key, program, render_pass)?;
        log::debug!("Built pipeline #{} for {:?}", self.pipelines.len() + 1, key.vertex_format);
        self.pipelines.insert(key, pipeline);
        Ok(pipeline)
    }

    fn build(&self, key: &PipelineKey, program: &ShaderProgram, render_pass: vk::RenderPass) -> VulkanResult<vk::Pipeline> {
        let stages = program.stages();
        let desc = &key.desc;

        let binding_descriptions = [vk::VertexInputBindingDescription {
            binding: 0,
            stride: key.vertex_format.stride(),
            input_rate: vk::VertexInputRate::VERTEX,
        }];
        let attribute_descriptions: Vec<vk::VertexInputAttributeDescription> = key
            .vertex_format
            .attributes()
            .iter()
            .map(|attribute| vk::VertexInputAttributeDescription {
                location: attribute.location,
                binding: 0,
                format: attribute_format(attribute.format),
                offset: attribute.offset,
            })
            .collect();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&binding_descriptions)
            .vertex_attribute_descriptions(&attribute_descriptions);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Viewport and scissor are set per frame
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(polygon_mode(desc.fill))
            .line_width(1.0)
            .cull_mode(cull_mode(desc.cull))
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(desc.depth_test)
            .depth_write_enable(desc.depth_write)
            .depth_compare_op(compare_op(desc.depth_func))
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(if desc.color_write {
                vk::ColorComponentFlags::RGBA
            } else {
                vk::ColorComponentFlags::empty()
            })
            .blend_enable(desc.blending)
            .src_color_blend_factor(blend_factor(desc.src_factor))
            .dst_color_blend_factor(blend_factor(desc.dst_factor))
            .color_blend_op(blend_op(desc.blend_equation))
            .src_alpha_blend_factor(blend_factor(desc.src_factor))
            .dst_alpha_blend_factor(blend_factor(desc.dst_factor))
            .alpha_blend_op(blend_op(desc.blend_equation))
            .build()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(self.layout)
            .render_pass(render_pass)
            .subpass(0)
            .build();

        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, err)| VulkanError::Api(err))?
        };
        pipelines
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::InvalidOperation { reason: "no pipeline created".to_string() })
    }

    /// Destroy every pipeline built for `shader`
    ///
    /// Only call once the GPU is done with the pipelines.
    pub fn evict_shader(&mut self, shader: ResourceKey) {
        let device = &self.device;
        self.pipelines.retain(|key, pipeline| {
            if key.shader == shader {
                unsafe { device.destroy_pipeline(*pipeline, None) };
                false
            } else {
                true
            }
        });
    }
}

impl Drop for PipelineCache {
    fn drop(&mut self) {
        unsafe {
            for (_, pipeline) in self.pipelines.drain() {
                self.device.destroy_pipeline(pipeline, None);
            }
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desc_folds_committed_states() {
        let mut desc = PipelineDesc::default();
        desc.apply(PipelineState::Blending(true));
        desc.apply(PipelineState::BlendFactor { src: BlendFactor::SrcAlpha, dst: BlendFactor::OneMinusSrcAlpha });
        desc.apply(PipelineState::CullMethod(CullMethod::Back));

        assert!(desc.blending);
        assert_eq!(desc.src_factor, BlendFactor::SrcAlpha);
        assert_eq!(desc.dst_factor, BlendFactor::OneMinusSrcAlpha);
        assert_eq!(cull_mode(desc.cull), vk::CullModeFlags::BACK);
        assert_ne!(desc, PipelineDesc::default());
    }

    #[test]
    fn test_vertex_attribute_formats() {
        let formats: Vec<vk::Format> = VertexFormat::PositionNormalTexcoord
            .attributes()
            .iter()
            .map(|a| attribute_format(a.format))
            .collect();
        assert_eq!(
            formats,
            [vk::Format::R32G32B32_SFLOAT, vk::Format::R32G32B32_SFLOAT, vk::Format::R32G32_SFLOAT]
        );
    }

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn test_spirv_words_require_magic() {
        assert!(ash::util::read_spv(&mut Cursor::new(&[0u8; 8][..])).is_err());

        let words = ash::util::read_spv(&mut Cursor::new(&SPIRV_MAGIC.to_le_bytes()[..])).unwrap();
        assert_eq!(words, [SPIRV_MAGIC]);

        let swapped = ash::util::read_spv(&mut Cursor::new(&SPIRV_MAGIC.to_be_bytes()[..])).unwrap();
        assert_eq!(swapped, [SPIRV_MAGIC]);
    }
}
