//! Descriptor set layouts, growable pools and descriptor writes

use ash::vk::{self, Handle};
use ash::Device;

use super::context::{VulkanError, VulkanResult};
use crate::render::api::{DescriptorBinding, DescriptorSetHandle, DescriptorSetLayoutHandle, DescriptorWrite};

const SETS_PER_POOL: u32 = 256;

const POOL_RATIOS: [(vk::DescriptorType, u32); 6] = [
    (vk::DescriptorType::UNIFORM_BUFFER, 2),
    (vk::DescriptorType::STORAGE_BUFFER, 2),
    (vk::DescriptorType::STORAGE_BUFFER_DYNAMIC, 4),
    (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 6),
    (vk::DescriptorType::INPUT_ATTACHMENT, 4),
    (vk::DescriptorType::SAMPLED_IMAGE, 1),
];

/// Owns every descriptor set layout and pool the device creates
///
/// Sets are never freed individually; a full pool is left in place and a new
/// one is created next to it.
pub struct DescriptorAllocator {
    device: Device,
    layouts: Vec<vk::DescriptorSetLayout>,
    pools: Vec<vk::DescriptorPool>,
}

impl DescriptorAllocator {
    /// Create the allocator with one pool
    pub fn new(device: Device) -> VulkanResult<Self> {
        let mut allocator = Self {
            device,
            layouts: Vec::new(),
            pools: Vec::new(),
        };
        allocator.grow()?;
        Ok(allocator)
    }

    fn grow(&mut self) -> VulkanResult<vk::DescriptorPool> {
        let pool_sizes: Vec<vk::DescriptorPoolSize> = POOL_RATIOS
            .iter()
            .map(|&(ty, ratio)| vk::DescriptorPoolSize {
                ty,
                descriptor_count: SETS_PER_POOL * ratio,
            })
            .collect();
        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(SETS_PER_POOL)
            .pool_sizes(&pool_sizes);

        let pool = unsafe {
            self.device
                .create_descriptor_pool(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        self.pools.push(pool);
        log::debug!("Descriptor pool {} created", self.pools.len());
        Ok(pool)
    }

    /// Create a layout with one descriptor per binding
    pub fn create_layout(&mut self, bindings: &[DescriptorBinding]) -> VulkanResult<DescriptorSetLayoutHandle> {
        let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(binding.binding)
                    .descriptor_type(binding.kind)
                    .descriptor_count(1)
                    .stage_flags(binding.stages)
                    .build()
            })
            .collect();
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&vk_bindings);

        let layout = unsafe {
            self.device
                .create_descriptor_set_layout(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        self.layouts.push(layout);
        Ok(DescriptorSetLayoutHandle(layout.as_raw()))
    }

    /// Allocate one set, growing the pool list when the current pool is full
    pub fn allocate(&mut self, layout: DescriptorSetLayoutHandle) -> VulkanResult<DescriptorSetHandle> {
        let layouts = [vk::DescriptorSetLayout::from_raw(layout.0)];
        let current = match self.pools.last() {
            Some(&pool) => pool,
            None => self.grow()?,
        };

        match self.try_allocate(current, &layouts) {
            Ok(set) => Ok(set),
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {
                let pool = self.grow()?;
                self.try_allocate(pool, &layouts).map_err(VulkanError::Api)
            }
            Err(err) => Err(VulkanError::Api(err)),
        }
    }

    fn try_allocate(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> Result<DescriptorSetHandle, vk::Result> {
        let allocate_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(layouts);
        let sets = unsafe { self.device.allocate_descriptor_sets(&allocate_info)? };
        sets.first()
            .map(|set| DescriptorSetHandle(set.as_raw()))
            .ok_or(vk::Result::ERROR_OUT_OF_POOL_MEMORY)
    }

    /// Apply `writes` to `set`
    pub fn update(&self, set: DescriptorSetHandle, writes: &[DescriptorWrite]) {
        let dst_set = vk::DescriptorSet::from_raw(set.0);

        // Infos must stay put while the write structs point at them.
        let buffer_infos: Vec<vk::DescriptorBufferInfo> = writes
            .iter()
            .map(|write| match *write {
                DescriptorWrite::Buffer {
                    buffer, offset, range, ..
                } => vk::DescriptorBufferInfo {
                    buffer: vk::Buffer::from_raw(buffer.0),
                    offset,
                    range,
                },
                DescriptorWrite::Image { .. } => vk::DescriptorBufferInfo::default(),
            })
            .collect();
        let image_infos: Vec<vk::DescriptorImageInfo> = writes
            .iter()
            .map(|write| match *write {
                DescriptorWrite::Image {
                    view, sampler, layout, ..
                } => vk::DescriptorImageInfo {
                    sampler: sampler.map_or_else(vk::Sampler::null, |s| vk::Sampler::from_raw(s.0)),
                    image_view: vk::ImageView::from_raw(view.0),
                    image_layout: layout,
                },
                DescriptorWrite::Buffer { .. } => vk::DescriptorImageInfo::default(),
            })
            .collect();

        let vk_writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .enumerate()
            .map(|(i, write)| match *write {
                DescriptorWrite::Buffer { binding, kind, .. } => vk::WriteDescriptorSet::builder()
                    .dst_set(dst_set)
                    .dst_binding(binding)
                    .descriptor_type(kind)
                    .buffer_info(std::slice::from_ref(&buffer_infos[i]))
                    .build(),
                DescriptorWrite::Image { binding, kind, .. } => vk::WriteDescriptorSet::builder()
                    .dst_set(dst_set)
                    .dst_binding(binding)
                    .descriptor_type(kind)
                    .image_info(std::slice::from_ref(&image_infos[i]))
                    .build(),
            })
            .collect();

        unsafe {
            self.device.update_descriptor_sets(&vk_writes, &[]);
        }
    }
}

impl Drop for DescriptorAllocator {
    fn drop(&mut self) {
        unsafe {
            for &pool in &self.pools {
                self.device.destroy_descriptor_pool(pool, None);
            }
            for &layout in &self.layouts {
                self.device.destroy_descriptor_set_layout(layout, None);
            }
        }
    }
}
