//! Vulkan backend
//!
//! [`VulkanDevice`] implements [`crate::render::api::RenderDevice`] over an
//! externally created instance, device and surface. Memory comes from
//! `vk-mem`; the remaining objects are raw `ash` handles whose values double
//! as the frontend's opaque handle ids.

pub mod commands;
pub mod context;
pub mod descriptors;
pub mod device;
pub mod memory;
pub mod pipeline;
pub mod swapchain;
pub mod sync;

pub use context::{DebugMessenger, VulkanContext, VulkanContextDesc, VulkanError, VulkanResult};
pub use device::VulkanDevice;
pub use pipeline::ShaderSet;
pub use swapchain::{SurfaceBinding, Swapchain};
pub use sync::{Fence, FrameSync, Semaphore};
