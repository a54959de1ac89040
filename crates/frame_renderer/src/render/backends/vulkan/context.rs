//! Vulkan context and backend errors
//!
//! Instance, device and queue creation happen outside this crate. The
//! application hands the finished objects over in a [`VulkanContextDesc`] and
//! the context owns them from then on.

use ash::extensions::ext::DebugUtils;
use ash::{vk, Device, Entry, Instance};
use std::ffi::{c_void, CStr};
use thiserror::Error;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Resource with specified ID could not be found
    #[error("Resource not found: {id}")]
    ResourceNotFound {
        /// The raw handle value that was looked up
        id: u64,
    },

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

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,
}

impl VulkanError {
    /// Classify an allocator failure for a request of `requested` bytes
    pub fn from_allocation(result: vk::Result, requested: u64) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
                Self::OutOfMemory { requested }
            }
            vk::Result::ERROR_FEATURE_NOT_PRESENT => Self::NoSuitableMemoryType,
            other => Self::Api(other),
        }
    }
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Externally created Vulkan objects
pub struct VulkanContextDesc {
    /// Loaded entry points
    pub entry: Entry,
    /// Instance
    pub instance: Instance,
    /// Physical device `device` was created from
    pub physical_device: vk::PhysicalDevice,
    /// Logical device
    pub device: Device,
    /// Family of the queue used for graphics, transfer and present
    pub queue_family_index: u32,
    /// Whether the instance was created with `VK_EXT_debug_utils`
    pub debug_utils_enabled: bool,
}

/// Validation messenger that forwards into `log`
pub struct DebugMessenger {
    loader: DebugUtils,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    fn new(loader: DebugUtils) -> VulkanResult<Self> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe {
            loader
                .create_debug_utils_messenger(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        Ok(Self { loader, messenger })
    }
}

impl Drop for DebugMessenger {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_debug_utils_messenger(self.messenger, None);
        }
    }
}

/// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {message_type:?} - {message}");
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {message_type:?} - {message}");
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::INFO {
        log::debug!("[Vulkan] {message_type:?} - {message}");
    } else {
        log::trace!("[Vulkan] {message_type:?} - {message}");
    }

    vk::FALSE
}

/// Owns the instance, device and graphics queue
pub struct VulkanContext {
    entry: Entry,
    instance: Instance,
    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    features: vk::PhysicalDeviceFeatures,
    device: Device,
    queue: vk::Queue,
    queue_family_index: u32,
    debug_utils: Option<DebugUtils>,
    messenger: Option<DebugMessenger>,
}

impl VulkanContext {
    /// Take ownership of externally created objects
    ///
    /// # Safety
    /// `desc.device` must have been created from `desc.physical_device` of
    /// `desc.instance` with at least one queue in `desc.queue_family_index`
    /// that supports graphics and presentation. Neither the device nor the
    /// instance may be destroyed elsewhere; the context destroys both on drop.
    pub unsafe fn new(desc: VulkanContextDesc) -> Self {
        let properties = desc.instance.get_physical_device_properties(desc.physical_device);
        let features = desc.instance.get_physical_device_features(desc.physical_device);
        let queue = desc.device.get_device_queue(desc.queue_family_index, 0);
        let debug_utils = desc
            .debug_utils_enabled
            .then(|| DebugUtils::new(&desc.entry, &desc.instance));

        log::info!(
            "Vulkan context on {}",
            CStr::from_ptr(properties.device_name.as_ptr()).to_string_lossy()
        );

        Self {
            entry: desc.entry,
            instance: desc.instance,
            physical_device: desc.physical_device,
            properties,
            features,
            device: desc.device,
            queue,
            queue_family_index: desc.queue_family_index,
            debug_utils,
            messenger: None,
        }
    }

    /// Route validation messages into `log`
    ///
    /// Needs `VK_EXT_debug_utils`; without it this logs a warning and does nothing.
    pub fn install_debug_messenger(&mut self) -> VulkanResult<()> {
        if self.messenger.is_some() {
            return Ok(());
        }
        let Some(loader) = &self.debug_utils else {
            log::warn!("Validation requested but VK_EXT_debug_utils is not enabled on the instance");
            return Ok(());
        };
        self.messenger = Some(DebugMessenger::new(loader.clone())?);
        log::debug!("Vulkan debug messenger installed");
        Ok(())
    }

    /// Entry points
    pub const fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Instance
    pub const fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Logical device
    pub const fn device(&self) -> &Device {
        &self.device
    }

    /// Physical device
    pub const fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Physical device properties and limits
    pub const fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    /// Supported physical device features
    pub const fn features(&self) -> &vk::PhysicalDeviceFeatures {
        &self.features
    }

    /// Graphics queue
    pub const fn queue(&self) -> vk::Queue {
        self.queue
    }

    /// Graphics queue family
    pub const fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Debug utils loader, present when the extension is enabled
    pub const fn debug_utils(&self) -> Option<&DebugUtils> {
        self.debug_utils.as_ref()
    }

    /// First of `candidates` usable as an optimally tiled attachment with `features`
    pub fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        features: vk::FormatFeatureFlags,
    ) -> VulkanResult<vk::Format> {
        candidates
            .iter()
            .copied()
            .find(|&format| {
                let properties = unsafe {
                    self.instance
                        .get_physical_device_format_properties(self.physical_device, format)
                };
                properties.optimal_tiling_features.contains(features)
            })
            .ok_or_else(|| VulkanError::InitializationFailed(format!("none of {candidates:?} supports {features:?}")))
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            if let Err(err) = self.device.device_wait_idle() {
                log::error!("device_wait_idle failed during context teardown: {err:?}");
            }
            self.messenger = None;
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}
