//! Presentation surface and swapchain

use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::vk;

use super::context::{VulkanContext, VulkanError, VulkanResult};

/// Externally created surface plus the window's current framebuffer size
pub struct SurfaceBinding {
    surface: vk::SurfaceKHR,
    loader: Surface,
    window_extent: vk::Extent2D,
}

impl SurfaceBinding {
    /// Take ownership of `surface`
    ///
    /// # Safety
    /// `surface` must belong to `context`'s instance and must not be destroyed
    /// elsewhere; the binding destroys it on drop.
    pub unsafe fn new(context: &VulkanContext, surface: vk::SurfaceKHR, window_extent: vk::Extent2D) -> Self {
        Self {
            surface,
            loader: Surface::new(context.entry(), context.instance()),
            window_extent,
        }
    }

    /// Surface handle
    pub const fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Window framebuffer size used when the surface leaves the extent open
    pub const fn window_extent(&self) -> vk::Extent2D {
        self.window_extent
    }

    /// Record a new window framebuffer size
    pub fn set_window_extent(&mut self, extent: vk::Extent2D) {
        self.window_extent = extent;
    }

    fn supports_present(&self, context: &VulkanContext) -> VulkanResult<bool> {
        unsafe {
            self.loader
                .get_physical_device_surface_support(
                    context.physical_device(),
                    context.queue_family_index(),
                    self.surface,
                )
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for SurfaceBinding {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.surface, None);
        }
    }
}

/// Swapchain images and their views
pub struct Swapchain {
    device: ash::Device,
    loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a swapchain, retiring `old` when it is not null
    pub fn new(context: &VulkanContext, surface: &SurfaceBinding, old: vk::SwapchainKHR) -> VulkanResult<Self> {
        if !surface.supports_present(context)? {
            return Err(VulkanError::InitializationFailed(
                "graphics queue family cannot present to the surface".to_string(),
            ));
        }

        let physical_device = context.physical_device();
        let surface_caps = unsafe {
            surface
                .loader
                .get_physical_device_surface_capabilities(physical_device, surface.surface)
                .map_err(VulkanError::Api)?
        };
        let surface_formats = unsafe {
            surface
                .loader
                .get_physical_device_surface_formats(physical_device, surface.surface)
                .map_err(VulkanError::Api)?
        };
        let format = surface_formats
            .iter()
            .find(|sf| sf.format == vk::Format::B8G8R8A8_SRGB && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .or_else(|| surface_formats.first())
            .copied()
            .ok_or_else(|| VulkanError::InitializationFailed("surface reports no formats".to_string()))?;

        let present_modes = unsafe {
            surface
                .loader
                .get_physical_device_surface_present_modes(physical_device, surface.surface)
                .map_err(VulkanError::Api)?
        };
        let present_mode = present_modes
            .iter()
            .copied()
            .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
            .unwrap_or(vk::PresentModeKHR::FIFO);

        let extent = if surface_caps.current_extent.width == u32::MAX {
            let window = surface.window_extent;
            vk::Extent2D {
                width: window
                    .width
                    .clamp(surface_caps.min_image_extent.width, surface_caps.max_image_extent.width)
                    .max(1),
                height: window
                    .height
                    .clamp(surface_caps.min_image_extent.height, surface_caps.max_image_extent.height)
                    .max(1),
            }
        } else {
            surface_caps.current_extent
        };

        let image_count = if surface_caps.max_image_count > 0 {
            (surface_caps.min_image_count + 1).min(surface_caps.max_image_count)
        } else {
            surface_caps.min_image_count + 1
        };

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old);

        let device = context.device().clone();
        let loader = SwapchainLoader::new(context.instance(), &device);
        let swapchain = unsafe {
            loader
                .create_swapchain(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        let images = unsafe { loader.get_swapchain_images(swapchain).map_err(VulkanError::Api)? };

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format.format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            let view = unsafe { device.create_image_view(&create_info, None) };
            match view {
                Ok(view) => image_views.push(view),
                Err(err) => {
                    unsafe {
                        for view in image_views {
                            device.destroy_image_view(view, None);
                        }
                        loader.destroy_swapchain(swapchain, None);
                    }
                    return Err(VulkanError::Api(err));
                }
            }
        }

        log::debug!(
            "Swapchain created: {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            images.len(),
            format.format,
            present_mode
        );

        Ok(Self {
            device,
            loader,
            swapchain,
            images,
            image_views,
            format,
            extent,
        })
    }

    /// Acquire the next image, signaling `semaphore`
    ///
    /// Returns `None` when the swapchain is out of date.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> VulkanResult<Option<(u32, bool)>> {
        let result = unsafe {
            self.loader
                .acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
        };
        match result {
            Ok((index, suboptimal)) => Ok(Some((index, suboptimal))),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(None),
            Err(err) => Err(VulkanError::Api(err)),
        }
    }

    /// Present `image_index` after `wait`
    ///
    /// Returns `true` when the swapchain is suboptimal or out of date.
    pub fn present(&self, queue: vk::Queue, wait: vk::Semaphore, image_index: u32) -> VulkanResult<bool> {
        let wait_semaphores = [wait];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.loader.queue_present(queue, &present_info) } {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(err) => Err(VulkanError::Api(err)),
        }
    }

    /// Swapchain handle
    pub const fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Image count
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Image at `index`
    pub fn image(&self, index: u32) -> VulkanResult<vk::Image> {
        self.images
            .get(index as usize)
            .copied()
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!("swapchain image {index} out of range"),
            })
    }

    /// One view per image
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// Image format
    pub const fn format(&self) -> vk::Format {
        self.format.format
    }

    /// Image size
    pub const fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}
