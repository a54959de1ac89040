//! Command pools

use ash::{vk, Device};

use super::context::{VulkanError, VulkanResult};

/// Command pool with RAII cleanup
pub struct CommandPool {
    device: Device,
    pool: vk::CommandPool,
}

impl CommandPool {
    /// Create a pool on `queue_family_index`
    pub fn new(device: Device, queue_family_index: u32, flags: vk::CommandPoolCreateFlags) -> VulkanResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family_index)
            .flags(flags);

        let pool = unsafe {
            device
                .create_command_pool(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        Ok(Self { device, pool })
    }

    /// Allocate one primary command buffer
    pub fn allocate_primary(&self) -> VulkanResult<vk::CommandBuffer> {
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe {
            self.device
                .allocate_command_buffers(&allocate_info)
                .map_err(VulkanError::Api)?
        };
        buffers.into_iter().next().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "command buffer allocation returned nothing".to_string(),
        })
    }

    /// Return a command buffer to the pool
    pub fn free(&self, command_buffer: vk::CommandBuffer) {
        unsafe {
            self.device.free_command_buffers(self.pool, &[command_buffer]);
        }
    }

    /// Reset every buffer allocated from the pool
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe {
            self.device
                .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())
                .map_err(VulkanError::Api)
        }
    }

    /// Get the pool handle
    pub const fn handle(&self) -> vk::CommandPool {
        self.pool
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}

/// Command pool, command buffer and sync objects of one frame slot
pub struct FrameSlot {
    /// Pool reset once per frame
    pub pool: CommandPool,
    /// The slot's primary command buffer
    pub command_buffer: vk::CommandBuffer,
    /// Slot semaphores and fence
    pub sync: super::sync::FrameSync,
}

impl FrameSlot {
    /// Create a slot on `queue_family_index`
    pub fn new(device: &Device, queue_family_index: u32) -> VulkanResult<Self> {
        let pool = CommandPool::new(device.clone(), queue_family_index, vk::CommandPoolCreateFlags::empty())?;
        let command_buffer = pool.allocate_primary()?;
        Ok(Self {
            pool,
            command_buffer,
            sync: super::sync::FrameSync::new(device)?,
        })
    }
}
