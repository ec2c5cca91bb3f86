//! Vulkan context management
//!
//! Instance, physical device selection and logical device, each with RAII
//! cleanup. No surface is created: the backend renders into an offscreen
//! frame target and leaves presentation to the window layer.

#[cfg(debug_assertions)]
use ash::extensions::ext::DebugUtils;
use ash::vk;
use ash::{Device, Entry, Instance};
use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use super::{VulkanError, VulkanResult};

const VALIDATION_LAYER: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_LAYER_KHRONOS_validation\0") };

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    #[cfg(debug_assertions)]
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    /// Load the Vulkan library and create an instance
    ///
    /// The validation layer is enabled in debug builds when it is installed.
    pub fn new(app_name: &str) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {e}")))?;

        let app_name_cstr = CString::new(app_name)
            .map_err(|e| VulkanError::InitializationFailed(format!("Invalid application name: {e}")))?;
        let engine_name_cstr = CString::new("render_core")
            .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&engine_name_cstr)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_0);

        let validation = cfg!(debug_assertions) && Self::validation_layer_available(&entry);
        let layer_names: Vec<*const c_char> = if validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        #[allow(unused_mut)]
        let mut extensions: Vec<*const c_char> = Vec::new();
        #[cfg(debug_assertions)]
        if validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None).map_err(VulkanError::Api)? };
        log::debug!("Vulkan instance created (validation: {validation})");

        #[cfg(debug_assertions)]
        let debug_utils = if validation {
            let loader = DebugUtils::new(&entry, &instance);
            match Self::setup_debug_messenger(&loader) {
                Ok(messenger) => Some((loader, messenger)),
                Err(e) => {
                    log::warn!("Debug messenger unavailable: {e}");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            entry,
            instance,
            #[cfg(debug_assertions)]
            debug_utils,
        })
    }

    fn validation_layer_available(entry: &Entry) -> bool {
        entry
            .enumerate_instance_layer_properties()
            .map(|layers| {
                layers.iter().any(|layer| {
                    let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
                    name == VALIDATION_LAYER
                })
            })
            .unwrap_or(false)
    }

    #[cfg(debug_assertions)]
    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe {
            debug_utils
                .create_debug_utils_messenger(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            #[cfg(debug_assertions)]
            if let Some((loader, messenger)) = self.debug_utils.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Debug callback for validation layers
#[cfg(debug_assertions)]
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {message_type:?} - {message}");
    } else {
        log::warn!("[Vulkan] {message_type:?} - {message}");
    }

    vk::FALSE
}

/// Selected physical device and what it offers
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Supported device features
    pub features: vk::PhysicalDeviceFeatures,
    /// Memory heaps and types
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Index of the graphics queue family
    pub graphics_family: u32,
}

impl PhysicalDeviceInfo {
    /// First device exposing a graphics queue
    pub fn select(instance: &Instance) -> VulkanResult<Self> {
        let devices = unsafe { instance.enumerate_physical_devices().map_err(VulkanError::Api)? };

        for device in devices {
            if let Some(info) = Self::evaluate_device(instance, device) {
                log::info!("Selected GPU: {}", info.name());
                return Ok(info);
            }
        }

        Err(VulkanError::InitializationFailed("No GPU with a graphics queue found".to_string()))
    }

    fn evaluate_device(instance: &Instance, device: vk::PhysicalDevice) -> Option<Self> {
        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };
        let graphics_family = queue_families
            .iter()
            .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))?;

        unsafe {
            Some(Self {
                device,
                properties: instance.get_physical_device_properties(device),
                features: instance.get_physical_device_features(device),
                memory_properties: instance.get_physical_device_memory_properties(device),
                graphics_family: u32::try_from(graphics_family).ok()?,
            })
        }
    }

    /// Human readable device name
    pub fn name(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }

    /// Find memory type with required properties
    pub fn find_memory_type(&self, type_filter: u32, properties: vk::MemoryPropertyFlags) -> VulkanResult<u32> {
        (0..self.memory_properties.memory_type_count)
            .find(|&i| {
                type_filter & (1 << i) != 0
                    && self.memory_properties.memory_types[i as usize]
                        .property_flags
                        .contains(properties)
            })
            .ok_or(VulkanError::NoSuitableMemoryType)
    }
}

/// Logical device wrapper with RAII cleanup
pub struct LogicalDevice {
    /// Vulkan logical device handle
    pub device: Device,
    /// Graphics operations queue
    pub graphics_queue: vk::Queue,
}

impl LogicalDevice {
    /// Create a logical device with one graphics queue
    ///
    /// Anisotropic filtering and non-solid fill modes are enabled when the
    /// device supports them.
    pub fn new(instance: &Instance, physical: &PhysicalDeviceInfo) -> VulkanResult<Self> {
        let priorities = [1.0];
        let queue_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(physical.graphics_family)
            .queue_priorities(&priorities)
            .build()];

        let features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(physical.features.sampler_anisotropy == vk::TRUE)
            .fill_mode_non_solid(physical.features.fill_mode_non_solid == vk::TRUE)
            .build();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .create_device(physical.device, &create_info, None)
                .map_err(VulkanError::Api)?
        };
        let graphics_queue = unsafe { device.get_device_queue(physical.graphics_family, 0) };

        Ok(Self { device, graphics_queue })
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

/// Instance, physical device and logical device
///
/// Fields drop in declaration order: the device goes before the instance.
pub struct VulkanContext {
    /// Logical device
    pub device: LogicalDevice,
    /// Selected physical device
    pub physical_device: PhysicalDeviceInfo,
    /// Vulkan instance
    pub instance: VulkanInstance,
}

impl VulkanContext {
    /// Create everything up to the logical device
    pub fn new(app_name: &str) -> VulkanResult<Self> {
        let instance = VulkanInstance::new(app_name)?;
        let physical_device = PhysicalDeviceInfo::select(&instance.instance)?;
        let device = LogicalDevice::new(&instance.instance, &physical_device)?;

        Ok(Self {
            device,
            physical_device,
            instance,
        })
    }

    /// Raw device handle
    pub fn raw_device(&self) -> &Device {
        &self.device.device
    }

    /// Graphics queue
    pub fn graphics_queue(&self) -> vk::Queue {
        self.device.graphics_queue
    }

    /// Graphics queue family index
    pub fn graphics_queue_family(&self) -> u32 {
        self.physical_device.graphics_family
    }

    /// Device limits
    pub fn limits(&self) -> &vk::PhysicalDeviceLimits {
        &self.physical_device.properties.limits
    }
}
