//! [`RenderDevice`] over a real Vulkan device
//!
//! Handle values handed to the passes are the raw Vulkan handles. Everything
//! the device creates is tracked here and released when it drops, so the
//! passes only destroy what they rebuild on resize.

use ash::vk::{self, Handle};
use std::ffi::CString;

use super::commands::{CommandPool, FrameSlot};
use super::context::{VulkanContext, VulkanError};
use super::descriptors::DescriptorAllocator;
use super::memory::GpuMemory;
use super::pipeline::{self, ShaderSet};
use super::swapchain::{SurfaceBinding, Swapchain};
use crate::render::api::{
    BufferDesc, BufferHandle, ClearValue, DescriptorBinding, DescriptorSetHandle, DescriptorSetLayoutHandle,
    DescriptorWrite, DeviceLimits, FrameStatus, FramebufferDesc, FramebufferHandle, GpuImage, GraphicsPipelineDesc,
    HostMapping, ImageBarrier, ImageDesc, ImageViewHandle, Pipeline, PipelineHandle, PipelineLayoutHandle,
    RenderDevice, RenderError, RenderPassDesc, RenderPassHandle, RenderResult, SamplerDesc, SamplerHandle,
    SwapchainInfo,
};
use crate::render::config::RendererConfig;

const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Vulkan implementation of the device seam
///
/// Field order matters: everything holding a cloned `ash::Device` drops
/// before the context destroys the device.
pub struct VulkanDevice {
    memory: GpuMemory,
    descriptors: DescriptorAllocator,
    shaders: ShaderSet,
    frames: Vec<FrameSlot>,
    transfer_pool: CommandPool,
    swapchain: Option<Swapchain>,
    surface: SurfaceBinding,
    samplers: Vec<vk::Sampler>,
    render_passes: Vec<vk::RenderPass>,
    framebuffers: Vec<vk::Framebuffer>,
    pipelines: Vec<(vk::Pipeline, vk::PipelineLayout)>,
    depth_format: vk::Format,
    frame_index: usize,
    image_index: u32,
    recording: vk::CommandBuffer,
    single_time: Option<(vk::CommandBuffer, vk::CommandBuffer)>,
    window_resized: bool,
    context: VulkanContext,
}

impl VulkanDevice {
    /// Create the allocator, frame slots, swapchain and shader set
    pub fn new(mut context: VulkanContext, surface: SurfaceBinding, config: &RendererConfig) -> RenderResult<Self> {
        if config.validation_enabled() {
            context.install_debug_messenger()?;
        }

        let device = context.device().clone();
        let memory = GpuMemory::new(&context)?;
        let descriptors = DescriptorAllocator::new(device.clone())?;
        let shaders = ShaderSet::new(device.clone(), &config.shader_directory);

        let frame_count = config.max_frames_in_flight.max(1);
        let mut frames = Vec::with_capacity(frame_count);
        for _ in 0..frame_count {
            frames.push(FrameSlot::new(&device, context.queue_family_index())?);
        }
        let transfer_pool = CommandPool::new(
            device,
            context.queue_family_index(),
            vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )?;

        let depth_format = context.find_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )?;
        let swapchain = Swapchain::new(&context, &surface, vk::SwapchainKHR::null())?;

        log::info!(
            "Vulkan device ready: {} frames in flight, depth {:?}, swapchain {}x{}",
            frame_count,
            depth_format,
            swapchain.extent().width,
            swapchain.extent().height
        );

        Ok(Self {
            memory,
            descriptors,
            shaders,
            frames,
            transfer_pool,
            swapchain: Some(swapchain),
            surface,
            samplers: Vec::new(),
            render_passes: Vec::new(),
            framebuffers: Vec::new(),
            pipelines: Vec::new(),
            depth_format,
            frame_index: 0,
            image_index: 0,
            recording: vk::CommandBuffer::null(),
            single_time: None,
            window_resized: false,
            context,
        })
    }

    /// Report a new window framebuffer size
    ///
    /// The swapchain is rebuilt at the next `begin_frame` or `submit_frame`,
    /// which then return [`FrameStatus::SwapchainRecreated`].
    pub fn notify_window_resized(&mut self, extent: vk::Extent2D) {
        self.surface.set_window_extent(extent);
        self.window_resized = true;
    }

    /// Bundled instance, device and queue
    pub const fn context(&self) -> &VulkanContext {
        &self.context
    }

    /// Live buffer and image counts
    pub fn live_resource_counts(&self) -> (usize, usize) {
        self.memory.live_counts()
    }

    fn device(&self) -> &ash::Device {
        self.context.device()
    }

    fn swapchain(&self) -> RenderResult<&Swapchain> {
        self.swapchain
            .as_ref()
            .ok_or_else(|| RenderError::InvalidOperation("swapchain missing".to_string()))
    }

    fn frame(&self) -> &FrameSlot {
        &self.frames[self.frame_index]
    }

    fn recreate_swapchain(&mut self) -> RenderResult<()> {
        unsafe { self.device().device_wait_idle().map_err(VulkanError::Api)? };
        let old = self.swapchain.take();
        let old_handle = old.as_ref().map_or_else(vk::SwapchainKHR::null, Swapchain::handle);
        let swapchain = Swapchain::new(&self.context, &self.surface, old_handle);
        drop(old);
        self.swapchain = Some(swapchain?);
        self.window_resized = false;
        Ok(())
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RenderResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device()
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(VulkanError::Api)?;
        }
        Ok(())
    }

    fn submit(
        &self,
        command_buffer: vk::CommandBuffer,
        wait: Option<vk::Semaphore>,
        signal: Option<vk::Semaphore>,
        fence: vk::Fence,
    ) -> RenderResult<()> {
        let command_buffers = [command_buffer];
        let wait_semaphores: Vec<vk::Semaphore> = wait.into_iter().collect();
        let wait_stages: Vec<vk::PipelineStageFlags> = wait
            .map(|_| vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .into_iter()
            .collect();
        let signal_semaphores: Vec<vk::Semaphore> = signal.into_iter().collect();
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            self.device()
                .end_command_buffer(command_buffer)
                .map_err(VulkanError::Api)?;
            self.device()
                .queue_submit(self.context.queue(), &[submit_info], fence)
                .map_err(VulkanError::Api)?;
        }
        Ok(())
    }

    fn advance_frame(&mut self) {
        self.frame_index = (self.frame_index + 1) % self.frames.len();
        self.recording = vk::CommandBuffer::null();
    }

    /// Run `record` in a transient command buffer and wait for the queue
    fn immediate(&mut self, record: impl FnOnce(&ash::Device, vk::CommandBuffer)) -> RenderResult<()> {
        self.begin_single_time_commands()?;
        record(self.context.device(), self.recording);
        self.end_single_time_commands()
    }

    fn subresource_range(image: &GpuImage) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: image.aspect,
            base_mip_level: 0,
            level_count: image.mip_levels,
            base_array_layer: 0,
            layer_count: image.array_layers,
        }
    }
}

fn layout_barrier(
    device: &ash::Device,
    command_buffer: vk::CommandBuffer,
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    (old_layout, src_access, src_stage): (vk::ImageLayout, vk::AccessFlags, vk::PipelineStageFlags),
    (new_layout, dst_access, dst_stage): (vk::ImageLayout, vk::AccessFlags, vk::PipelineStageFlags),
) {
    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(range)
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .build();
    unsafe {
        device.cmd_pipeline_barrier(
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

/// Blit mip `i - 1` into mip `i` for every mip, leaving all mips shader-readable
///
/// Expects every mip in `TRANSFER_DST_OPTIMAL`.
fn generate_mipmaps(device: &ash::Device, command_buffer: vk::CommandBuffer, image: vk::Image, target: &GpuImage) {
    let mip_range = |level: u32| vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: level,
        level_count: 1,
        base_array_layer: 0,
        layer_count: target.array_layers,
    };
    let to_shader_read = (
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        vk::AccessFlags::SHADER_READ,
        vk::PipelineStageFlags::FRAGMENT_SHADER,
    );

    let mut mip_width = target.extent.width as i32;
    let mut mip_height = target.extent.height as i32;
    for level in 1..target.mip_levels {
        layout_barrier(
            device,
            command_buffer,
            image,
            mip_range(level - 1),
            (
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::AccessFlags::TRANSFER_WRITE,
                vk::PipelineStageFlags::TRANSFER,
            ),
            (
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk::AccessFlags::TRANSFER_READ,
                vk::PipelineStageFlags::TRANSFER,
            ),
        );

        let next_width = (mip_width / 2).max(1);
        let next_height = (mip_height / 2).max(1);
        let blit = vk::ImageBlit::builder()
            .src_offsets([
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: mip_width,
                    y: mip_height,
                    z: 1,
                },
            ])
            .src_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: level - 1,
                base_array_layer: 0,
                layer_count: target.array_layers,
            })
            .dst_offsets([
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: next_width,
                    y: next_height,
                    z: 1,
                },
            ])
            .dst_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: level,
                base_array_layer: 0,
                layer_count: target.array_layers,
            })
            .build();
        unsafe {
            device.cmd_blit_image(
                command_buffer,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::LINEAR,
            );
        }

        layout_barrier(
            device,
            command_buffer,
            image,
            mip_range(level - 1),
            (
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk::AccessFlags::TRANSFER_READ,
                vk::PipelineStageFlags::TRANSFER,
            ),
            to_shader_read,
        );

        mip_width = next_width;
        mip_height = next_height;
    }

    layout_barrier(
        device,
        command_buffer,
        image,
        mip_range(target.mip_levels - 1),
        (
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        to_shader_read,
    );
}

fn to_vk_clear_value(value: &ClearValue) -> vk::ClearValue {
    match *value {
        ClearValue::Color(float32) => vk::ClearValue {
            color: vk::ClearColorValue { float32 },
        },
        ClearValue::ColorUint(uint32) => vk::ClearValue {
            color: vk::ClearColorValue { uint32 },
        },
        ClearValue::DepthStencil { depth, stencil } => vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
        },
    }
}

impl RenderDevice for VulkanDevice {
    fn limits(&self) -> DeviceLimits {
        let limits = &self.context.properties().limits;
        DeviceLimits {
            min_uniform_buffer_offset_alignment: limits.min_uniform_buffer_offset_alignment,
            min_storage_buffer_offset_alignment: limits.min_storage_buffer_offset_alignment,
            max_storage_buffer_range: u64::from(limits.max_storage_buffer_range),
            non_coherent_atom_size: limits.non_coherent_atom_size,
        }
    }

    fn max_frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    fn current_frame_index(&self) -> usize {
        self.frame_index
    }

    fn swapchain_info(&self) -> SwapchainInfo {
        let Some(swapchain) = &self.swapchain else {
            return SwapchainInfo::default();
        };
        let extent = swapchain.extent();
        let (viewport, scissor) = SwapchainInfo::full_extent(extent);
        SwapchainInfo {
            extent,
            format: swapchain.format(),
            image_views: swapchain
                .image_views()
                .iter()
                .map(|view| ImageViewHandle(view.as_raw()))
                .collect(),
            viewport,
            scissor,
        }
    }

    fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> RenderResult<BufferHandle> {
        Ok(self.memory.create_buffer(desc)?)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> RenderResult<()> {
        let (ptr, size) = self.memory.mapping(buffer)?;
        let end = offset.checked_add(data.len() as u64).filter(|&end| end <= size);
        if end.is_none() {
            return Err(VulkanError::InvalidOperation {
                reason: format!("write of {} bytes at {offset} overruns a {size} byte buffer", data.len()),
            }
            .into());
        }
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr().add(offset as usize), data.len());
        }
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferHandle, offset: u64, len: usize) -> RenderResult<Vec<u8>> {
        let (ptr, size) = self.memory.mapping(buffer)?;
        if offset.saturating_add(len as u64) > size {
            return Err(VulkanError::InvalidOperation {
                reason: format!("read of {len} bytes at {offset} overruns a {size} byte buffer"),
            }
            .into());
        }
        let mut bytes = vec![0_u8; len];
        unsafe {
            std::ptr::copy_nonoverlapping(ptr.as_ptr().add(offset as usize), bytes.as_mut_ptr(), len);
        }
        Ok(bytes)
    }

    fn map_persistent(&mut self, buffer: BufferHandle) -> RenderResult<HostMapping> {
        let (ptr, size) = self.memory.mapping(buffer)?;
        Ok(unsafe { HostMapping::new(ptr, size as usize) })
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.memory.destroy_buffer(buffer);
    }

    fn create_image(&mut self, desc: &ImageDesc) -> RenderResult<GpuImage> {
        Ok(self.memory.create_image(desc)?)
    }

    fn destroy_image(&mut self, image: &GpuImage) {
        self.memory.destroy_image(image.image);
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> RenderResult<SamplerHandle> {
        let anisotropy = desc.anisotropy && self.context.features().sampler_anisotropy == vk::TRUE;
        let create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(desc.filter)
            .min_filter(desc.filter)
            .mipmap_mode(desc.mipmap_mode)
            .address_mode_u(desc.address_mode)
            .address_mode_v(desc.address_mode)
            .address_mode_w(desc.address_mode)
            .anisotropy_enable(anisotropy)
            .max_anisotropy(if anisotropy {
                self.context.properties().limits.max_sampler_anisotropy
            } else {
                1.0
            })
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .min_lod(0.0)
            .max_lod(desc.max_lod);

        let sampler = unsafe {
            self.device()
                .create_sampler(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        self.samplers.push(sampler);
        Ok(SamplerHandle(sampler.as_raw()))
    }

    fn copy_buffer(&mut self, src: BufferHandle, dst: BufferHandle, size: u64) -> RenderResult<()> {
        let src = self.memory.buffer(src)?;
        let dst = self.memory.buffer(dst)?;
        self.immediate(|device, command_buffer| unsafe {
            device.cmd_copy_buffer(
                command_buffer,
                src,
                dst,
                &[vk::BufferCopy {
                    src_offset: 0,
                    dst_offset: 0,
                    size,
                }],
            );
        })
    }

    fn copy_buffer_to_image(&mut self, src: BufferHandle, image: &GpuImage, generate_mips: bool) -> RenderResult<()> {
        let src = self.memory.buffer(src)?;
        let vk_image = self.memory.image(image.image)?;
        let target = *image;
        let blit_mips = generate_mips && target.mip_levels > 1;

        self.immediate(|device, command_buffer| {
            layout_barrier(
                device,
                command_buffer,
                vk_image,
                Self::subresource_range(&target),
                (
                    vk::ImageLayout::UNDEFINED,
                    vk::AccessFlags::empty(),
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                ),
                (
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::AccessFlags::TRANSFER_WRITE,
                    vk::PipelineStageFlags::TRANSFER,
                ),
            );

            let region = vk::BufferImageCopy {
                buffer_offset: 0,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: target.aspect,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: target.array_layers,
                },
                image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
                image_extent: vk::Extent3D {
                    width: target.extent.width,
                    height: target.extent.height,
                    depth: 1,
                },
            };
            unsafe {
                device.cmd_copy_buffer_to_image(
                    command_buffer,
                    src,
                    vk_image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }

            if blit_mips {
                generate_mipmaps(device, command_buffer, vk_image, &target);
            } else {
                layout_barrier(
                    device,
                    command_buffer,
                    vk_image,
                    Self::subresource_range(&target),
                    (
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        vk::AccessFlags::TRANSFER_WRITE,
                        vk::PipelineStageFlags::TRANSFER,
                    ),
                    (
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                        vk::AccessFlags::SHADER_READ,
                        vk::PipelineStageFlags::FRAGMENT_SHADER,
                    ),
                );
            }
        })
    }

    fn create_descriptor_set_layout(&mut self, bindings: &[DescriptorBinding]) -> RenderResult<DescriptorSetLayoutHandle> {
        Ok(self.descriptors.create_layout(bindings)?)
    }

    fn allocate_descriptor_set(&mut self, layout: DescriptorSetLayoutHandle) -> RenderResult<DescriptorSetHandle> {
        Ok(self.descriptors.allocate(layout)?)
    }

    fn update_descriptor_set(&mut self, set: DescriptorSetHandle, writes: &[DescriptorWrite]) {
        self.descriptors.update(set, writes);
    }

    fn create_render_pass(&mut self, desc: &RenderPassDesc) -> RenderResult<RenderPassHandle> {
        let render_pass = pipeline::create_render_pass(self.context.device(), desc)?;
        self.render_passes.push(render_pass);
        log::debug!(
            "Render pass created: {} attachments, {} subpasses",
            desc.attachments.len(),
            desc.subpasses.len()
        );
        Ok(RenderPassHandle(render_pass.as_raw()))
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> RenderResult<FramebufferHandle> {
        let attachments: Vec<vk::ImageView> = desc
            .attachments
            .iter()
            .map(|view| vk::ImageView::from_raw(view.0))
            .collect();
        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(vk::RenderPass::from_raw(desc.render_pass.0))
            .attachments(&attachments)
            .width(desc.width)
            .height(desc.height)
            .layers(desc.layers);

        let framebuffer = unsafe {
            self.device()
                .create_framebuffer(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        self.framebuffers.push(framebuffer);
        Ok(FramebufferHandle(framebuffer.as_raw()))
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        let raw = vk::Framebuffer::from_raw(framebuffer.0);
        let Some(position) = self.framebuffers.iter().position(|&fb| fb == raw) else {
            log::warn!("destroy_framebuffer on unknown framebuffer {:#x}", framebuffer.0);
            return;
        };
        self.framebuffers.swap_remove(position);
        unsafe { self.device().destroy_framebuffer(raw, None) };
    }

    fn create_graphics_pipeline(&mut self, desc: &GraphicsPipelineDesc) -> RenderResult<Pipeline> {
        let (pipeline, layout) = pipeline::create_graphics_pipeline(self.context.device(), &mut self.shaders, desc)?;
        self.pipelines.push((pipeline, layout));
        Ok(Pipeline {
            pipeline: PipelineHandle(pipeline.as_raw()),
            layout: PipelineLayoutHandle(layout.as_raw()),
        })
    }

    fn wait_for_current_frame(&mut self) -> RenderResult<()> {
        Ok(self.frame().sync.in_flight.wait()?)
    }

    fn wait_for_all_frames(&mut self) -> RenderResult<()> {
        for frame in &self.frames {
            frame.sync.in_flight.wait()?;
        }
        Ok(())
    }

    fn reset_command_pool(&mut self) -> RenderResult<()> {
        Ok(self.frame().pool.reset()?)
    }

    fn begin_frame(&mut self) -> RenderResult<FrameStatus> {
        if self.window_resized {
            self.recreate_swapchain()?;
            return Ok(FrameStatus::SwapchainRecreated);
        }

        let image_available = self.frame().sync.image_available.handle();
        let Some((image_index, _suboptimal)) = self.swapchain()?.acquire_next_image(image_available)? else {
            log::warn!("Swapchain out of date on acquire");
            self.recreate_swapchain()?;
            return Ok(FrameStatus::SwapchainRecreated);
        };

        self.frame().sync.in_flight.reset()?;
        let command_buffer = self.frame().command_buffer;
        self.begin_command_buffer(command_buffer)?;
        self.recording = command_buffer;
        self.image_index = image_index;
        Ok(FrameStatus::Ready { image_index })
    }

    fn submit_frame(&mut self) -> RenderResult<FrameStatus> {
        let frame = self.frame();
        let (command_buffer, image_available, render_finished, fence) = (
            frame.command_buffer,
            frame.sync.image_available.handle(),
            frame.sync.render_finished.handle(),
            frame.sync.in_flight.handle(),
        );
        self.submit(command_buffer, Some(image_available), Some(render_finished), fence)?;

        let out_of_date = self
            .swapchain()?
            .present(self.context.queue(), render_finished, self.image_index)?;
        self.advance_frame();

        if out_of_date || self.window_resized {
            log::debug!("Swapchain stale after present");
            self.recreate_swapchain()?;
            return Ok(FrameStatus::SwapchainRecreated);
        }
        Ok(FrameStatus::Ready {
            image_index: self.image_index,
        })
    }

    fn abandon_frame(&mut self) -> RenderResult<FrameStatus> {
        if self.recording != self.frame().command_buffer {
            return Err(RenderError::InvalidOperation(
                "abandon_frame without a frame being recorded".to_string(),
            ));
        }

        // Rerecord the slot's buffer with only the transition present needs
        self.frame().pool.reset()?;
        let command_buffer = self.frame().command_buffer;
        self.begin_command_buffer(command_buffer)?;
        let image = self.swapchain()?.image(self.image_index)?;
        layout_barrier(
            self.device(),
            command_buffer,
            image,
            vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            (
                vk::ImageLayout::UNDEFINED,
                vk::AccessFlags::empty(),
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            ),
            (
                vk::ImageLayout::PRESENT_SRC_KHR,
                vk::AccessFlags::empty(),
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            ),
        );
        log::warn!("Frame {} abandoned, presenting image {} as is", self.frame_index, self.image_index);
        self.submit_frame()
    }

    fn begin_offscreen(&mut self) -> RenderResult<()> {
        self.frame().sync.in_flight.reset()?;
        let command_buffer = self.frame().command_buffer;
        self.begin_command_buffer(command_buffer)?;
        self.recording = command_buffer;
        Ok(())
    }

    fn submit_offscreen(&mut self) -> RenderResult<()> {
        let frame = self.frame();
        let (command_buffer, fence) = (frame.command_buffer, frame.sync.in_flight.handle());
        self.submit(command_buffer, None, None, fence)?;
        self.advance_frame();
        Ok(())
    }

    fn begin_single_time_commands(&mut self) -> RenderResult<()> {
        if self.single_time.is_some() {
            return Err(RenderError::InvalidOperation(
                "single-time commands are already being recorded".to_string(),
            ));
        }
        let command_buffer = self.transfer_pool.allocate_primary()?;
        self.begin_command_buffer(command_buffer)?;
        self.single_time = Some((command_buffer, self.recording));
        self.recording = command_buffer;
        Ok(())
    }

    fn end_single_time_commands(&mut self) -> RenderResult<()> {
        let Some((command_buffer, previous)) = self.single_time.take() else {
            return Err(RenderError::InvalidOperation(
                "end_single_time_commands without a matching begin".to_string(),
            ));
        };
        self.recording = previous;

        let submitted = self.submit(command_buffer, None, None, vk::Fence::null()).and_then(|()| unsafe {
            self.device()
                .queue_wait_idle(self.context.queue())
                .map_err(|err| VulkanError::Api(err).into())
        });
        self.transfer_pool.free(command_buffer);
        submitted
    }

    fn wait_idle(&mut self) -> RenderResult<()> {
        unsafe { self.device().device_wait_idle().map_err(VulkanError::Api)? };
        Ok(())
    }

    fn cmd_begin_render_pass(
        &mut self,
        render_pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
        extent: vk::Extent2D,
        clear_values: &[ClearValue],
    ) {
        let clear_values: Vec<vk::ClearValue> = clear_values.iter().map(to_vk_clear_value).collect();
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(vk::RenderPass::from_raw(render_pass.0))
            .framebuffer(vk::Framebuffer::from_raw(framebuffer.0))
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);
        unsafe {
            self.device()
                .cmd_begin_render_pass(self.recording, &begin_info, vk::SubpassContents::INLINE);
        }
    }

    fn cmd_next_subpass(&mut self) {
        unsafe {
            self.device()
                .cmd_next_subpass(self.recording, vk::SubpassContents::INLINE);
        }
    }

    fn cmd_end_render_pass(&mut self) {
        unsafe { self.device().cmd_end_render_pass(self.recording) };
    }

    fn cmd_bind_pipeline(&mut self, pipeline: &Pipeline) {
        unsafe {
            self.device().cmd_bind_pipeline(
                self.recording,
                vk::PipelineBindPoint::GRAPHICS,
                vk::Pipeline::from_raw(pipeline.pipeline.0),
            );
        }
    }

    fn cmd_set_viewport(&mut self, viewport: vk::Viewport, scissor: vk::Rect2D) {
        unsafe {
            self.device().cmd_set_viewport(self.recording, 0, &[viewport]);
            self.device().cmd_set_scissor(self.recording, 0, &[scissor]);
        }
    }

    fn cmd_bind_descriptor_sets(
        &mut self,
        layout: PipelineLayoutHandle,
        first_set: u32,
        sets: &[DescriptorSetHandle],
        dynamic_offsets: &[u32],
    ) {
        let sets: Vec<vk::DescriptorSet> = sets.iter().map(|set| vk::DescriptorSet::from_raw(set.0)).collect();
        unsafe {
            self.device().cmd_bind_descriptor_sets(
                self.recording,
                vk::PipelineBindPoint::GRAPHICS,
                vk::PipelineLayout::from_raw(layout.0),
                first_set,
                &sets,
                dynamic_offsets,
            );
        }
    }

    fn cmd_bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[BufferHandle]) {
        let raw: Vec<vk::Buffer> = buffers.iter().map(|b| vk::Buffer::from_raw(b.0)).collect();
        let offsets = vec![0; raw.len()];
        unsafe {
            self.device()
                .cmd_bind_vertex_buffers(self.recording, first_binding, &raw, &offsets);
        }
    }

    fn cmd_bind_index_buffer(&mut self, buffer: BufferHandle) {
        unsafe {
            self.device().cmd_bind_index_buffer(
                self.recording,
                vk::Buffer::from_raw(buffer.0),
                0,
                vk::IndexType::UINT16,
            );
        }
    }

    fn cmd_draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe {
            self.device()
                .cmd_draw(self.recording, vertex_count, instance_count, first_vertex, first_instance);
        }
    }

    fn cmd_draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device().cmd_draw_indexed(
                self.recording,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    fn cmd_clear_color_attachment(&mut self, attachment: u32, color: [f32; 4], extent: vk::Extent2D) {
        let clear = vk::ClearAttachment {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            color_attachment: attachment,
            clear_value: vk::ClearValue {
                color: vk::ClearColorValue { float32: color },
            },
        };
        let rect = vk::ClearRect {
            rect: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
            base_array_layer: 0,
            layer_count: 1,
        };
        unsafe {
            self.device()
                .cmd_clear_attachments(self.recording, &[clear], &[rect]);
        }
    }

    fn cmd_image_barrier(&mut self, barrier: &ImageBarrier) {
        let range = vk::ImageSubresourceRange {
            aspect_mask: barrier.aspect,
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        };
        layout_barrier(
            self.context.device(),
            self.recording,
            vk::Image::from_raw(barrier.image.0),
            range,
            (barrier.old_layout, barrier.src_access, barrier.src_stage),
            (barrier.new_layout, barrier.dst_access, barrier.dst_stage),
        );
    }

    fn cmd_copy_image_to_buffer(&mut self, image: &GpuImage, layout: vk::ImageLayout, buffer: BufferHandle) {
        let Ok(dst) = self.memory.buffer(buffer) else {
            log::error!("cmd_copy_image_to_buffer into unknown buffer {:#x}", buffer.0);
            return;
        };
        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: image.aspect,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D {
                width: image.extent.width,
                height: image.extent.height,
                depth: 1,
            },
        };
        unsafe {
            self.device().cmd_copy_image_to_buffer(
                self.recording,
                vk::Image::from_raw(image.image.0),
                layout,
                dst,
                &[region],
            );
        }
    }

    fn cmd_push_label(&mut self, name: &str) {
        let Some(debug_utils) = self.context.debug_utils() else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            return;
        };
        let label = vk::DebugUtilsLabelEXT::builder().label_name(&name);
        unsafe { debug_utils.cmd_begin_debug_utils_label(self.recording, &label) };
    }

    fn cmd_pop_label(&mut self) {
        if let Some(debug_utils) = self.context.debug_utils() {
            unsafe { debug_utils.cmd_end_debug_utils_label(self.recording) };
        }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::debug!("Destroying Vulkan device resources");
        let device = self.context.device().clone();
        unsafe {
            if let Err(err) = device.device_wait_idle() {
                log::error!("device_wait_idle failed during teardown: {err:?}");
            }
            for &(pipeline, layout) in &self.pipelines {
                device.destroy_pipeline(pipeline, None);
                device.destroy_pipeline_layout(layout, None);
            }
            for &framebuffer in &self.framebuffers {
                device.destroy_framebuffer(framebuffer, None);
            }
            for &render_pass in &self.render_passes {
                device.destroy_render_pass(render_pass, None);
            }
            for &sampler in &self.samplers {
                device.destroy_sampler(sampler, None);
            }
        }
        self.memory.destroy_all();
    }
}
