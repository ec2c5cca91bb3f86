//! Vulkan images, textures and samplers
//!
//! Sampled textures live in device-local memory and are filled through a
//! staging buffer and a one-time command buffer. Between uploads they stay
//! in `SHADER_READ_ONLY_OPTIMAL`.

use ash::{vk, Device};

use super::context::PhysicalDeviceInfo;
use super::frame::CommandContext;
use super::memory::GpuBuffer;
use super::{VulkanError, VulkanResult};
use crate::config::DepthStencilBits;
use crate::render::api::DepthFunc;
use crate::render::resources::{AddressMode, FilterMode, SamplerDescriptor, TextureFormat, TextureRegion};

/// Native format of a texture format
pub fn texture_format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::R8 => vk::Format::R8_UNORM,
        TextureFormat::Rgba8 => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
        TextureFormat::Rgba32F => vk::Format::R32G32B32A32_SFLOAT,
    }
}

/// Native format of a depth-stencil layout
pub fn depth_format(bits: DepthStencilBits) -> vk::Format {
    match bits {
        DepthStencilBits::D16 => vk::Format::D16_UNORM,
        DepthStencilBits::D24S8 => vk::Format::D24_UNORM_S8_UINT,
        DepthStencilBits::D32 => vk::Format::D32_SFLOAT,
    }
}

/// Aspects present in a depth-stencil layout
pub fn depth_aspect(bits: DepthStencilBits) -> vk::ImageAspectFlags {
    match bits {
        DepthStencilBits::D24S8 => vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
        DepthStencilBits::D16 | DepthStencilBits::D32 => vk::ImageAspectFlags::DEPTH,
    }
}

/// Native comparison operator
pub fn compare_op(func: DepthFunc) -> vk::CompareOp {
    match func {
        DepthFunc::Never => vk::CompareOp::NEVER,
        DepthFunc::Always => vk::CompareOp::ALWAYS,
        DepthFunc::Less => vk::CompareOp::LESS,
        DepthFunc::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
        DepthFunc::Equal => vk::CompareOp::EQUAL,
        DepthFunc::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
        DepthFunc::Greater => vk::CompareOp::GREATER,
        DepthFunc::NotEqual => vk::CompareOp::NOT_EQUAL,
    }
}

fn filter(mode: FilterMode) -> vk::Filter {
    match mode {
        FilterMode::Nearest => vk::Filter::NEAREST,
        FilterMode::Linear => vk::Filter::LINEAR,
    }
}

fn address_mode(mode: AddressMode) -> vk::SamplerAddressMode {
    match mode {
        AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        AddressMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
        AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        AddressMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
    }
}

/// Image, its memory and a view of all of it
pub struct GpuImage {
    device: Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    extent: vk::Extent2D,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
}

impl GpuImage {
    /// Create a device-local 2D image with a view
    pub fn new(
        device: &Device,
        physical: &PhysicalDeviceInfo,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> VulkanResult<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D { width: extent.width, height: extent.height, depth: 1 })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);

        let image = unsafe { device.create_image(&image_info, None).map_err(VulkanError::Api)? };

        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let allocated = physical
            .find_memory_type(requirements.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)
            .and_then(|memory_type_index| {
                let alloc_info = vk::MemoryAllocateInfo::builder()
                    .allocation_size(requirements.size)
                    .memory_type_index(memory_type_index);
                unsafe { device.allocate_memory(&alloc_info, None) }.map_err(VulkanError::Api)
            });
        let memory = match allocated {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let mut gpu_image = Self {
            device: device.clone(),
            image,
            memory,
            view: vk::ImageView::null(),
            extent,
            format,
            aspect,
        };

        unsafe {
            device.bind_image_memory(image, memory, 0).map_err(VulkanError::Api)?;
        }

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(gpu_image.subresource_range());
        gpu_image.view = unsafe { device.create_image_view(&view_info, None).map_err(VulkanError::Api)? };

        Ok(gpu_image)
    }

    fn subresource_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        }
    }

    /// Record a layout transition barrier
    pub fn record_transition(
        &self,
        command_buffer: vk::CommandBuffer,
        (old_layout, src_access, src_stage): (vk::ImageLayout, vk::AccessFlags, vk::PipelineStageFlags),
        (new_layout, dst_access, dst_stage): (vk::ImageLayout, vk::AccessFlags, vk::PipelineStageFlags),
    ) {
        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(self.subresource_range())
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .build();

        unsafe {
            self.device.cmd_pipeline_barrier(
                command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    /// Image handle
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// View over the whole image
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Size in texels
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Native format
    pub fn format(&self) -> vk::Format {
        self.format
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.destroy_image_view(self.view, None);
            }
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Sampler wrapper with RAII cleanup
pub struct GpuSampler {
    device: Device,
    sampler: vk::Sampler,
}

impl GpuSampler {
    /// Create a sampler from a descriptor
    ///
    /// Anisotropy is clamped to the device limit and disabled when the
    /// device lacks the feature.
    pub fn new(device: &Device, physical: &PhysicalDeviceInfo, desc: &SamplerDescriptor) -> VulkanResult<Self> {
        let anisotropy_supported = physical.features.sampler_anisotropy == vk::TRUE;
        let max_anisotropy = desc
            .max_anisotropy
            .min(physical.properties.limits.max_sampler_anisotropy)
            .max(1.0);

        let info = vk::SamplerCreateInfo::builder()
            .mag_filter(filter(desc.mag_filter))
            .min_filter(filter(desc.min_filter))
            .address_mode_u(address_mode(desc.address_u))
            .address_mode_v(address_mode(desc.address_v))
            .address_mode_w(address_mode(desc.address_w))
            .anisotropy_enable(anisotropy_supported && max_anisotropy > 1.0)
            .max_anisotropy(max_anisotropy)
            .border_color(vk::BorderColor::FLOAT_TRANSPARENT_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(desc.comparison.is_some())
            .compare_op(desc.comparison.map_or(vk::CompareOp::ALWAYS, compare_op))
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR);

        let sampler = unsafe { device.create_sampler(&info, None).map_err(VulkanError::Api)? };
        Ok(Self { device: device.clone(), sampler })
    }

    /// Sampler handle
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for GpuSampler {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
        }
    }
}

/// Sampled 2D texture with its default sampler
pub struct GpuTexture {
    image: GpuImage,
    sampler: GpuSampler,
}

impl GpuTexture {
    /// Create a texture and upload `pixels` (exactly width * height texels)
    pub fn new(
        device: &Device,
        physical: &PhysicalDeviceInfo,
        commands: &CommandContext,
        extent: vk::Extent2D,
        format: TextureFormat,
        pixels: &[u8],
    ) -> VulkanResult<Self> {
        let image = GpuImage::new(
            device,
            physical,
            extent,
            texture_format(format),
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            vk::ImageAspectFlags::COLOR,
        )?;
        let sampler = GpuSampler::new(device, physical, &SamplerDescriptor::default())?;
        let texture = Self { image, sampler };
        let whole = TextureRegion::whole(extent.width, extent.height);
        texture.upload(device, physical, commands, whole, pixels, vk::ImageLayout::UNDEFINED)?;
        Ok(texture)
    }

    /// 1x1 opaque white texture that fills unused texture units
    pub fn white(device: &Device, physical: &PhysicalDeviceInfo, commands: &CommandContext) -> VulkanResult<Self> {
        Self::new(
            device,
            physical,
            commands,
            vk::Extent2D { width: 1, height: 1 },
            TextureFormat::Rgba8,
            &[255, 255, 255, 255],
        )
    }

    /// Replace a texel rectangle; `pixels` holds its rows tightly packed
    pub fn update(
        &self,
        device: &Device,
        physical: &PhysicalDeviceInfo,
        commands: &CommandContext,
        region: TextureRegion,
        pixels: &[u8],
    ) -> VulkanResult<()> {
        self.upload(device, physical, commands, region, pixels, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
    }

    fn upload(
        &self,
        device: &Device,
        physical: &PhysicalDeviceInfo,
        commands: &CommandContext,
        region: TextureRegion,
        pixels: &[u8],
        current_layout: vk::ImageLayout,
    ) -> VulkanResult<()> {
        let staging = GpuBuffer::with_data(device, physical, pixels, vk::BufferUsageFlags::TRANSFER_SRC)?;
        let offset = vk::Offset3D {
            x: i32::try_from(region.x).map_err(|_| VulkanError::InvalidOperation {
                reason: format!("texel column {} out of range", region.x),
            })?,
            y: i32::try_from(region.y).map_err(|_| VulkanError::InvalidOperation {
                reason: format!("texel row {} out of range", region.y),
            })?,
            z: 0,
        };

        let source = if current_layout == vk::ImageLayout::UNDEFINED {
            (current_layout, vk::AccessFlags::empty(), vk::PipelineStageFlags::TOP_OF_PIPE)
        } else {
            (current_layout, vk::AccessFlags::SHADER_READ, vk::PipelineStageFlags::FRAGMENT_SHADER)
        };

        commands.submit_once(|command_buffer| {
            self.image.record_transition(
                command_buffer,
                source,
                (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::AccessFlags::TRANSFER_WRITE, vk::PipelineStageFlags::TRANSFER),
            );

            let copy = vk::BufferImageCopy::builder()
                .buffer_offset(0)
                .buffer_row_length(0)
                .buffer_image_height(0)
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_offset(offset)
                .image_extent(vk::Extent3D { width: region.width, height: region.height, depth: 1 })
                .build();

            unsafe {
                device.cmd_copy_buffer_to_image(
                    command_buffer,
                    staging.handle(),
                    self.image.handle(),
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[copy],
                );
            }

            self.image.record_transition(
                command_buffer,
                (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::AccessFlags::TRANSFER_WRITE, vk::PipelineStageFlags::TRANSFER),
                (vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, vk::AccessFlags::SHADER_READ, vk::PipelineStageFlags::FRAGMENT_SHADER),
            );
        })
    }

    /// View for descriptor writes
    pub fn view(&self) -> vk::ImageView {
        self.image.view()
    }

    /// Default sampler for descriptor writes
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler.handle()
    }
}
