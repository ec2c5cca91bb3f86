//! Buffer memory management
//!
//! Host-visible, coherent buffers: writes land through a mapping and need no
//! explicit flush. Used for vertex, index and constant buffers and as the
//! staging source of texture uploads.

use ash::{vk, Device};

use super::context::PhysicalDeviceInfo;
use super::{VulkanError, VulkanResult};

/// Buffer wrapper with memory management
pub struct GpuBuffer {
    device: Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl GpuBuffer {
    /// Create a host-visible buffer of `size` bytes
    pub fn new(
        device: &Device,
        physical: &PhysicalDeviceInfo,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> VulkanResult<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&buffer_info, None).map_err(VulkanError::Api)? };

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let memory_type_index = match physical.find_memory_type(
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ) {
            Ok(index) => index,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(if e == vk::Result::ERROR_OUT_OF_DEVICE_MEMORY || e == vk::Result::ERROR_OUT_OF_HOST_MEMORY {
                    VulkanError::OutOfMemory { requested: size }
                } else {
                    VulkanError::Api(e)
                });
            }
        };

        let buffer = Self {
            device: device.clone(),
            buffer,
            memory,
            size,
        };
        unsafe {
            device
                .bind_buffer_memory(buffer.buffer, buffer.memory, 0)
                .map_err(VulkanError::Api)?;
        }
        Ok(buffer)
    }

    /// Create a buffer and fill it with `data`
    pub fn with_data(
        device: &Device,
        physical: &PhysicalDeviceInfo,
        data: &[u8],
        usage: vk::BufferUsageFlags,
    ) -> VulkanResult<Self> {
        let buffer = Self::new(device, physical, data.len() as vk::DeviceSize, usage)?;
        buffer.write(0, data)?;
        Ok(buffer)
    }

    /// Copy `data` into the buffer at byte `offset`
    pub fn write(&self, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()> {
        let len = data.len() as vk::DeviceSize;
        if offset + len > self.size {
            return Err(VulkanError::InvalidOperation {
                reason: format!("write of {len} bytes at {offset} overruns {} byte buffer", self.size),
            });
        }
        if data.is_empty() {
            return Ok(());
        }

        unsafe {
            let ptr = self
                .device
                .map_memory(self.memory, offset, len, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::Api)?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.cast::<u8>(), data.len());
            self.device.unmap_memory(self.memory);
        }
        Ok(())
    }

    /// Buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}
