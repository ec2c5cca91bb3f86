//! Frame recording resources
//!
//! One command pool, one primary command buffer and one fence: a single
//! frame in flight. The frame is rendered into an offscreen color + depth
//! target; after `present_frame` the color image sits in
//! `TRANSFER_SRC_OPTIMAL` for the window layer to copy out.

use ash::{vk, Device};

use super::context::PhysicalDeviceInfo;
use super::image::{depth_aspect, depth_format, GpuImage};
use super::{VulkanError, VulkanResult};
use crate::config::DepthStencilBits;

/// Color format of the frame target
pub const FRAME_COLOR_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Command pool, frame command buffer and frame fence
pub struct CommandContext {
    device: Device,
    queue: vk::Queue,
    pool: vk::CommandPool,
    frame_commands: vk::CommandBuffer,
    frame_fence: vk::Fence,
}

impl CommandContext {
    /// Create the pool and the per-frame objects
    pub fn new(device: &Device, queue: vk::Queue, queue_family_index: u32) -> VulkanResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);
        let pool = unsafe { device.create_command_pool(&pool_info, None).map_err(VulkanError::Api)? };

        let mut context = Self {
            device: device.clone(),
            queue,
            pool,
            frame_commands: vk::CommandBuffer::null(),
            frame_fence: vk::Fence::null(),
        };
        context.frame_commands = context.allocate()?;
        context.frame_fence = unsafe {
            device
                .create_fence(&vk::FenceCreateInfo::builder(), None)
                .map_err(VulkanError::Api)?
        };
        Ok(context)
    }

    fn allocate(&self) -> VulkanResult<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.device.allocate_command_buffers(&alloc_info).map_err(VulkanError::Api)? };
        buffers
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::InvalidOperation { reason: "no command buffer allocated".to_string() })
    }

    /// Record, submit and wait for a one-time command buffer
    pub fn submit_once<F>(&self, record: F) -> VulkanResult<()>
    where
        F: FnOnce(vk::CommandBuffer),
    {
        let command_buffer = self.allocate()?;
        let result = self.record_and_wait(command_buffer, record);
        unsafe {
            self.device.free_command_buffers(self.pool, &[command_buffer]);
        }
        result
    }

    fn record_and_wait<F>(&self, command_buffer: vk::CommandBuffer, record: F) -> VulkanResult<()>
    where
        F: FnOnce(vk::CommandBuffer),
    {
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(VulkanError::Api)?;
        }

        record(command_buffer);

        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers).build();
        unsafe {
            self.device.end_command_buffer(command_buffer).map_err(VulkanError::Api)?;
            self.device
                .queue_submit(self.queue, &[submit_info], vk::Fence::null())
                .map_err(VulkanError::Api)?;
            self.device.queue_wait_idle(self.queue).map_err(VulkanError::Api)
        }
    }

    /// Reset and begin the frame command buffer
    pub fn begin_frame(&self) -> VulkanResult<vk::CommandBuffer> {
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .reset_command_buffer(self.frame_commands, vk::CommandBufferResetFlags::empty())
                .map_err(VulkanError::Api)?;
            self.device
                .begin_command_buffer(self.frame_commands, &begin_info)
                .map_err(VulkanError::Api)?;
        }
        Ok(self.frame_commands)
    }

    /// Finish recording the frame command buffer
    pub fn end_frame(&self) -> VulkanResult<()> {
        unsafe { self.device.end_command_buffer(self.frame_commands).map_err(VulkanError::Api) }
    }

    /// Submit the recorded frame and block until the GPU finished it
    pub fn submit_frame_and_wait(&self) -> VulkanResult<()> {
        let command_buffers = [self.frame_commands];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers).build();
        unsafe {
            self.device.reset_fences(&[self.frame_fence]).map_err(VulkanError::Api)?;
            self.device
                .queue_submit(self.queue, &[submit_info], self.frame_fence)
                .map_err(VulkanError::Api)?;
            self.device
                .wait_for_fences(&[self.frame_fence], true, u64::MAX)
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for CommandContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            if self.frame_fence != vk::Fence::null() {
                self.device.destroy_fence(self.frame_fence, None);
            }
            // Frees every command buffer allocated from it
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}

/// Render pass wrapper with RAII cleanup
pub struct RenderPass {
    device: Device,
    render_pass: vk::RenderPass,
}

impl RenderPass {
    /// Single-subpass forward pass: cleared color + depth
    pub fn new_offscreen(device: &Device, color_format: vk::Format, depth_bits: DepthStencilBits) -> VulkanResult<Self> {
        let color_attachment = vk::AttachmentDescription::builder()
            .format(color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .build();

        let has_stencil = depth_bits == DepthStencilBits::D24S8;
        let depth_attachment = vk::AttachmentDescription::builder()
            .format(depth_format(depth_bits))
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(if has_stencil { vk::AttachmentLoadOp::CLEAR } else { vk::AttachmentLoadOp::DONT_CARE })
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .build();

        let attachments = [color_attachment, depth_attachment];

        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };

        let subpasses = [vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .depth_stencil_attachment(&depth_ref)
            .build()];

        let dependencies = [
            vk::SubpassDependency::builder()
                .src_subpass(vk::SUBPASS_EXTERNAL)
                .dst_subpass(0)
                .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS)
                .src_access_mask(vk::AccessFlags::empty())
                .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS)
                .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
                .build(),
            vk::SubpassDependency::builder()
                .src_subpass(0)
                .dst_subpass(vk::SUBPASS_EXTERNAL)
                .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                .dst_stage_mask(vk::PipelineStageFlags::TRANSFER)
                .dst_access_mask(vk::AccessFlags::TRANSFER_READ)
                .build(),
        ];

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = unsafe { device.create_render_pass(&create_info, None).map_err(VulkanError::Api)? };
        Ok(Self { device: device.clone(), render_pass })
    }

    /// Render pass handle
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_render_pass(self.render_pass, None);
        }
    }
}

/// Offscreen color + depth images, render pass and framebuffer
///
/// Fields drop in declaration order: framebuffer before the images it
/// references.
pub struct FrameTarget {
    device: Device,
    framebuffer: vk::Framebuffer,
    render_pass: RenderPass,
    color: GpuImage,
    depth: GpuImage,
    depth_bits: DepthStencilBits,
}

impl FrameTarget {
    /// Create a target of `extent` pixels
    pub fn new(
        device: &Device,
        physical: &PhysicalDeviceInfo,
        extent: vk::Extent2D,
        depth_bits: DepthStencilBits,
    ) -> VulkanResult<Self> {
        let color = GpuImage::new(
            device,
            physical,
            extent,
            FRAME_COLOR_FORMAT,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
            vk::ImageAspectFlags::COLOR,
        )?;
        let depth = GpuImage::new(
            device,
            physical,
            extent,
            depth_format(depth_bits),
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            depth_aspect(depth_bits),
        )?;
        let render_pass = RenderPass::new_offscreen(device, FRAME_COLOR_FORMAT, depth_bits)?;

        let attachments = [color.view(), depth.view()];
        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass.handle())
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        let framebuffer = unsafe { device.create_framebuffer(&framebuffer_info, None).map_err(VulkanError::Api)? };

        Ok(Self {
            device: device.clone(),
            framebuffer,
            render_pass,
            color,
            depth,
            depth_bits,
        })
    }

    /// Begin the render pass, clearing to `clear_color` and far depth
    pub fn begin(&self, command_buffer: vk::CommandBuffer, clear_color: [f32; 4]) {
        let clear_values = [
            vk::ClearValue { color: vk::ClearColorValue { float32: clear_color } },
            vk::ClearValue { depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 } },
        ];
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.render_pass.handle())
            .framebuffer(self.framebuffer)
            .render_area(vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent: self.extent() })
            .clear_values(&clear_values);

        unsafe {
            self.device
                .cmd_begin_render_pass(command_buffer, &begin_info, vk::SubpassContents::INLINE);
        }
    }

    /// End the render pass
    pub fn end(&self, command_buffer: vk::CommandBuffer) {
        unsafe {
            self.device.cmd_end_render_pass(command_buffer);
        }
    }

    /// Render pass the pipelines are built against
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass.handle()
    }

    /// Size in pixels
    pub fn extent(&self) -> vk::Extent2D {
        self.color.extent()
    }

    /// Color image holding the last presented frame
    pub fn color_image(&self) -> vk::Image {
        self.color.handle()
    }

    /// Aspects of the depth attachment
    pub fn depth_aspect(&self) -> vk::ImageAspectFlags {
        depth_aspect(self.depth_bits)
    }

    /// Depth image format
    pub fn depth_format(&self) -> vk::Format {
        self.depth.format()
    }
}

impl Drop for FrameTarget {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_framebuffer(self.framebuffer, None);
        }
    }
}
