//! Buffer and image memory through `vk-mem`
//!
//! Host-visible buffers are mapped once at creation and stay mapped until
//! they are destroyed.

use ash::vk::{self, Handle};
use std::collections::HashMap;
use std::ptr::NonNull;
use vk_mem::{Alloc, AllocationCreateFlags, AllocationCreateInfo, Allocator, AllocatorCreateInfo, MemoryUsage};

use super::context::{VulkanContext, VulkanError, VulkanResult};
use crate::render::api::{
    BufferDesc, BufferHandle, GpuImage, ImageDesc, ImageHandle, ImageKind, ImageViewHandle, MemoryLocation,
};

struct BufferEntry {
    buffer: vk::Buffer,
    allocation: vk_mem::Allocation,
    size: u64,
    mapped: Option<NonNull<u8>>,
}

struct ImageEntry {
    image: vk::Image,
    view: vk::ImageView,
    allocation: vk_mem::Allocation,
}

/// Allocator plus every live buffer and image
pub struct GpuMemory {
    device: ash::Device,
    allocator: Allocator,
    buffers: HashMap<BufferHandle, BufferEntry>,
    images: HashMap<ImageHandle, ImageEntry>,
}

impl GpuMemory {
    /// Create the allocator for `context`'s device
    pub fn new(context: &VulkanContext) -> VulkanResult<Self> {
        let create_info = AllocatorCreateInfo::new(context.instance(), context.device(), context.physical_device());
        let allocator = unsafe { Allocator::new(create_info).map_err(VulkanError::Api)? };
        Ok(Self {
            device: context.device().clone(),
            allocator,
            buffers: HashMap::new(),
            images: HashMap::new(),
        })
    }

    /// Create a buffer; host-visible buffers come back mapped
    pub fn create_buffer(&mut self, desc: &BufferDesc) -> VulkanResult<BufferHandle> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(desc.size.max(1))
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .build();
        let allocation_info = match desc.location {
            MemoryLocation::DeviceLocal => AllocationCreateInfo {
                usage: MemoryUsage::AutoPreferDevice,
                ..Default::default()
            },
            MemoryLocation::HostVisible => AllocationCreateInfo {
                usage: MemoryUsage::AutoPreferHost,
                flags: AllocationCreateFlags::HOST_ACCESS_RANDOM,
                required_flags: vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                ..Default::default()
            },
        };

        let (buffer, mut allocation) = unsafe {
            self.allocator
                .create_buffer(&buffer_info, &allocation_info)
                .map_err(|err| VulkanError::from_allocation(err, desc.size))?
        };

        let mapped = match desc.location {
            MemoryLocation::DeviceLocal => None,
            MemoryLocation::HostVisible => {
                let ptr = unsafe { self.allocator.map_memory(&mut allocation) };
                match ptr.map(NonNull::new) {
                    Ok(Some(ptr)) => Some(ptr),
                    Ok(None) | Err(_) => {
                        unsafe { self.allocator.destroy_buffer(buffer, &mut allocation) };
                        return Err(VulkanError::InvalidOperation {
                            reason: format!("mapping a {} byte host-visible buffer failed", desc.size),
                        });
                    }
                }
            }
        };

        let handle = BufferHandle(buffer.as_raw());
        self.buffers.insert(
            handle,
            BufferEntry {
                buffer,
                allocation,
                size: desc.size,
                mapped,
            },
        );
        Ok(handle)
    }

    /// Mapped pointer and size of a host-visible buffer
    pub fn mapping(&self, handle: BufferHandle) -> VulkanResult<(NonNull<u8>, u64)> {
        let entry = self
            .buffers
            .get(&handle)
            .ok_or(VulkanError::ResourceNotFound { id: handle.0 })?;
        let ptr = entry.mapped.ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("buffer {:#x} is not host visible", handle.0),
        })?;
        Ok((ptr, entry.size))
    }

    /// Raw buffer for `handle`
    pub fn buffer(&self, handle: BufferHandle) -> VulkanResult<vk::Buffer> {
        self.buffers
            .get(&handle)
            .map(|entry| entry.buffer)
            .ok_or(VulkanError::ResourceNotFound { id: handle.0 })
    }

    /// Destroy a buffer; unknown handles are ignored
    pub fn destroy_buffer(&mut self, handle: BufferHandle) {
        let Some(mut entry) = self.buffers.remove(&handle) else {
            log::warn!("destroy_buffer on unknown buffer {:#x}", handle.0);
            return;
        };
        unsafe {
            if entry.mapped.is_some() {
                self.allocator.unmap_memory(&mut entry.allocation);
            }
            self.allocator.destroy_buffer(entry.buffer, &mut entry.allocation);
        }
    }

    /// Create a device-local image and its default view
    pub fn create_image(&mut self, desc: &ImageDesc) -> VulkanResult<GpuImage> {
        let flags = match desc.kind {
            ImageKind::Cube => vk::ImageCreateFlags::CUBE_COMPATIBLE,
            ImageKind::Texture2d | ImageKind::Texture2dArray => vk::ImageCreateFlags::empty(),
        };
        let image_info = vk::ImageCreateInfo::builder()
            .flags(flags)
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .build();
        let allocation_info = AllocationCreateInfo {
            usage: MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };

        let requested = u64::from(desc.width) * u64::from(desc.height) * u64::from(desc.array_layers) * 4;
        let (image, mut allocation) = unsafe {
            self.allocator
                .create_image(&image_info, &allocation_info)
                .map_err(|err| VulkanError::from_allocation(err, requested))?
        };

        let view_type = match desc.kind {
            ImageKind::Texture2d => vk::ImageViewType::TYPE_2D,
            ImageKind::Texture2dArray => vk::ImageViewType::TYPE_2D_ARRAY,
            ImageKind::Cube => vk::ImageViewType::CUBE,
        };
        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(view_type)
            .format(desc.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: desc.aspect,
                base_mip_level: 0,
                level_count: desc.mip_levels,
                base_array_layer: 0,
                layer_count: desc.array_layers,
            });
        let view = match unsafe { self.device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(err) => {
                unsafe { self.allocator.destroy_image(image, &mut allocation) };
                return Err(VulkanError::Api(err));
            }
        };

        let handle = ImageHandle(image.as_raw());
        self.images.insert(
            handle,
            ImageEntry {
                image,
                view,
                allocation,
            },
        );
        Ok(GpuImage {
            image: handle,
            view: ImageViewHandle(view.as_raw()),
            format: desc.format,
            extent: vk::Extent2D {
                width: desc.width,
                height: desc.height,
            },
            array_layers: desc.array_layers,
            mip_levels: desc.mip_levels,
            aspect: desc.aspect,
        })
    }

    /// Raw image for `handle`
    pub fn image(&self, handle: ImageHandle) -> VulkanResult<vk::Image> {
        self.images
            .get(&handle)
            .map(|entry| entry.image)
            .ok_or(VulkanError::ResourceNotFound { id: handle.0 })
    }

    /// Destroy an image and its view; unknown handles are ignored
    pub fn destroy_image(&mut self, handle: ImageHandle) {
        let Some(mut entry) = self.images.remove(&handle) else {
            log::warn!("destroy_image on unknown image {:#x}", handle.0);
            return;
        };
        unsafe {
            self.device.destroy_image_view(entry.view, None);
            self.allocator.destroy_image(entry.image, &mut entry.allocation);
        }
    }

    /// Live buffer and image counts
    pub fn live_counts(&self) -> (usize, usize) {
        (self.buffers.len(), self.images.len())
    }

    /// Destroy everything still alive
    pub fn destroy_all(&mut self) {
        let buffers: Vec<BufferHandle> = self.buffers.keys().copied().collect();
        for handle in buffers {
            self.destroy_buffer(handle);
        }
        let images: Vec<ImageHandle> = self.images.keys().copied().collect();
        for handle in images {
            self.destroy_image(handle);
        }
    }
}
