//! Host-memory [`RenderDevice`] for tests
//!
//! Buffers live in host memory and stay readable after the fact, commands are
//! appended to a log, and an optional raster hook stands in for the fragment
//! stage so readback paths can be exercised end to end.

use std::collections::{BTreeMap, HashMap};
use std::ptr::NonNull;

use ash::vk;
use bytemuck::Pod;

use super::device::*;
use super::{RenderError, RenderResult};
use crate::render::backends::vulkan::VulkanError;

/// One recorded call
#[derive(Debug, Clone)]
pub enum Command {
    /// `wait_for_current_frame`
    WaitForFrame,
    /// `wait_for_all_frames`
    WaitForAllFrames,
    /// `reset_command_pool`
    ResetCommandPool,
    /// `begin_frame`
    BeginFrame,
    /// `submit_frame`
    SubmitFrame,
    /// `abandon_frame`
    AbandonFrame,
    /// `begin_offscreen`
    BeginOffscreen,
    /// `submit_offscreen`
    SubmitOffscreen,
    /// `begin_single_time_commands`
    BeginSingleTimeCommands,
    /// `end_single_time_commands`
    EndSingleTimeCommands,
    /// `wait_idle`
    WaitIdle,
    /// `cmd_begin_render_pass`
    BeginRenderPass {
        /// Render pass
        render_pass: RenderPassHandle,
        /// Framebuffer
        framebuffer: FramebufferHandle,
        /// Render area
        extent: vk::Extent2D,
        /// Clear values in attachment order
        clear_values: Vec<ClearValue>,
    },
    /// `cmd_next_subpass`
    NextSubpass,
    /// `cmd_end_render_pass`
    EndRenderPass,
    /// `cmd_bind_pipeline`
    BindPipeline(Pipeline),
    /// `cmd_set_viewport`
    SetViewport {
        /// Viewport
        viewport: vk::Viewport,
        /// Scissor
        scissor: vk::Rect2D,
    },
    /// `cmd_bind_descriptor_sets`
    BindDescriptorSets {
        /// Pipeline layout
        layout: PipelineLayoutHandle,
        /// First set index
        first_set: u32,
        /// Sets
        sets: Vec<DescriptorSetHandle>,
        /// Dynamic offsets
        dynamic_offsets: Vec<u32>,
    },
    /// `cmd_bind_vertex_buffers`
    BindVertexBuffers {
        /// First binding
        first_binding: u32,
        /// Buffers
        buffers: Vec<BufferHandle>,
    },
    /// `cmd_bind_index_buffer`
    BindIndexBuffer(BufferHandle),
    /// `cmd_draw`
    Draw {
        /// Vertices
        vertex_count: u32,
        /// Instances
        instance_count: u32,
        /// First vertex
        first_vertex: u32,
        /// First instance
        first_instance: u32,
    },
    /// `cmd_draw_indexed`
    DrawIndexed {
        /// Indices
        index_count: u32,
        /// Instances
        instance_count: u32,
        /// First index
        first_index: u32,
        /// Vertex offset
        vertex_offset: i32,
        /// First instance
        first_instance: u32,
    },
    /// `cmd_clear_color_attachment`
    ClearColorAttachment {
        /// Attachment within the subpass
        attachment: u32,
        /// Clear colour
        color: [f32; 4],
        /// Cleared area
        extent: vk::Extent2D,
    },
    /// `cmd_image_barrier`
    ImageBarrier(ImageBarrier),
    /// `cmd_copy_image_to_buffer`
    CopyImageToBuffer {
        /// Source image
        image: ImageHandle,
        /// Source layout
        layout: vk::ImageLayout,
        /// Destination buffer
        buffer: BufferHandle,
    },
    /// `cmd_push_label`
    PushLabel(String),
    /// `cmd_pop_label`
    PopLabel,
}

struct BufferStore {
    words: Box<[u64]>,
    len: usize,
    location: MemoryLocation,
}

impl BufferStore {
    fn bytes(&self) -> &[u8] {
        &bytemuck::cast_slice(&self.words[..])[..self.len]
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut(&mut self.words[..])[..self.len]
    }
}

struct ImageStore {
    image: GpuImage,
    texels: Vec<u8>,
}

fn texel_size(format: vk::Format) -> usize {
    match format {
        vk::Format::R16G16B16A16_SFLOAT => 8,
        vk::Format::R32G32B32A32_SFLOAT => 16,
        _ => 4,
    }
}

/// What the raster hook sees for one indexed draw
pub struct RasterInput<'a> {
    device: &'a RecordingDevice,
    set: Option<DescriptorSetHandle>,
    /// Instances in the draw
    pub instance_count: u32,
    /// Dynamic offsets bound with set 0
    pub dynamic_offsets: Vec<u32>,
}

impl RasterInput<'_> {
    /// Read `count` objects from a dynamic buffer binding of set 0
    ///
    /// Every binding of the set is assumed dynamic, so the offset index equals
    /// the binding index.
    pub fn read_binding<T: Pod>(&self, binding: u32, count: usize) -> Vec<T> {
        let set = self.set.expect("no descriptor set bound at set 0");
        let Some(DescriptorWrite::Buffer { buffer, offset, .. }) =
            self.device.writes.get(&set).and_then(|w| w.get(&binding)).copied()
        else {
            panic!("binding {binding} of set {set:?} holds no buffer");
        };
        let dynamic = self.dynamic_offsets.get(binding as usize).copied().unwrap_or(0);
        self.device.read_mapped(buffer, offset + u64::from(dynamic), count)
    }
}

type RasterHook = Box<dyn FnMut(&RasterInput<'_>) -> Option<u32>>;

/// Device that records instead of rendering
pub struct RecordingDevice {
    next_handle: u64,
    frames_in_flight: usize,
    frame_index: usize,
    acquired: u64,
    recreate_pending: bool,
    fences_signalled: Vec<bool>,
    frame_open: bool,
    render_pass_open: bool,
    single_time_open: bool,
    allocations_before_failure: Option<usize>,
    swapchain: SwapchainInfo,
    buffers: HashMap<BufferHandle, BufferStore>,
    images: HashMap<ImageHandle, ImageStore>,
    views: HashMap<ImageViewHandle, ImageHandle>,
    writes: HashMap<DescriptorSetHandle, BTreeMap<u32, DescriptorWrite>>,
    framebuffer_handles: Vec<FramebufferHandle>,
    framebuffers: Vec<FramebufferDesc>,
    render_passes: Vec<RenderPassDesc>,
    pipelines: Vec<GraphicsPipelineDesc>,
    commands: Vec<Command>,
    upload_count: usize,
    current_framebuffer: Option<FramebufferHandle>,
    bound_set: Option<DescriptorSetHandle>,
    bound_offsets: Vec<u32>,
    raster_hook: Option<RasterHook>,
}

impl Default for RecordingDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingDevice {
    /// 800x600 swapchain with three images and two frames in flight
    pub fn new() -> Self {
        let mut device = Self {
            next_handle: 1,
            frames_in_flight: 2,
            frame_index: 0,
            acquired: 0,
            recreate_pending: false,
            fences_signalled: vec![true; 2],
            frame_open: false,
            render_pass_open: false,
            single_time_open: false,
            allocations_before_failure: None,
            swapchain: SwapchainInfo::default(),
            buffers: HashMap::new(),
            images: HashMap::new(),
            views: HashMap::new(),
            writes: HashMap::new(),
            framebuffer_handles: Vec::new(),
            framebuffers: Vec::new(),
            render_passes: Vec::new(),
            pipelines: Vec::new(),
            commands: Vec::new(),
            upload_count: 0,
            current_framebuffer: None,
            bound_set: None,
            bound_offsets: Vec::new(),
            raster_hook: None,
        };
        device.resize(vk::Extent2D {
            width: 800,
            height: 600,
        });
        device
    }

    /// Set the number of frame slots
    #[must_use]
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames.max(1);
        self.fences_signalled = vec![true; self.frames_in_flight];
        self
    }

    fn handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    /// Rebuild the swapchain at `extent` with fresh image views
    pub fn resize(&mut self, extent: vk::Extent2D) {
        let image_views = (0..3).map(|_| ImageViewHandle(self.handle())).collect();
        let (viewport, scissor) = SwapchainInfo::full_extent(extent);
        self.swapchain = SwapchainInfo {
            extent,
            format: vk::Format::B8G8R8A8_SRGB,
            image_views,
            viewport,
            scissor,
        };
    }

    /// Make the next `begin_frame` report a recreated swapchain
    pub fn force_swapchain_recreated(&mut self) {
        self.recreate_pending = true;
    }

    /// Let `successes` more buffer or image creations through, then fail the next
    /// one with an out-of-memory error
    pub fn fail_allocation_after(&mut self, successes: usize) {
        self.allocations_before_failure = Some(successes);
    }

    /// Images not yet destroyed
    pub fn live_image_count(&self) -> usize {
        self.images.len()
    }

    /// Whether a render pass was begun and not yet ended
    pub const fn is_render_pass_open(&self) -> bool {
        self.render_pass_open
    }

    fn allocate(&mut self, requested: u64) -> RenderResult<()> {
        match self.allocations_before_failure {
            Some(0) => {
                self.allocations_before_failure = None;
                Err(VulkanError::OutOfMemory { requested }.into())
            }
            Some(n) => {
                self.allocations_before_failure = Some(n - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Reset the slot fence and open the slot's command buffer
    fn open_frame(&mut self) -> RenderResult<()> {
        if self.frame_open {
            return Err(RenderError::InvalidOperation("a frame is already being recorded".to_string()));
        }
        self.fences_signalled[self.frame_index] = false;
        self.frame_open = true;
        Ok(())
    }

    /// Close the slot's command buffer, signal its fence and advance
    fn close_frame(&mut self) -> RenderResult<()> {
        if !self.frame_open {
            return Err(RenderError::InvalidOperation("no frame is being recorded".to_string()));
        }
        if self.render_pass_open {
            return Err(RenderError::InvalidOperation("render pass still open at submit".to_string()));
        }
        self.fences_signalled[self.frame_index] = true;
        self.frame_open = false;
        self.frame_index = (self.frame_index + 1) % self.frames_in_flight;
        Ok(())
    }

    /// Install the stand-in fragment stage for indexed draws
    ///
    /// A returned value fills colour attachment 0 of the current framebuffer.
    pub fn set_raster_hook(&mut self, hook: impl FnMut(&RasterInput<'_>) -> Option<u32> + 'static) {
        self.raster_hook = Some(Box::new(hook));
    }

    /// Recorded calls
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Forget recorded calls
    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Instance counts of every indexed draw, in order
    pub fn draw_indexed_instances(&self) -> Vec<u32> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                Command::DrawIndexed { instance_count, .. } => Some(*instance_count),
                _ => None,
            })
            .collect()
    }

    /// Every framebuffer ever created, in creation order
    pub fn framebuffers(&self) -> &[FramebufferDesc] {
        &self.framebuffers
    }

    /// Every render pass created, in creation order
    pub fn render_passes(&self) -> &[RenderPassDesc] {
        &self.render_passes
    }

    /// Every pipeline created, in creation order
    pub fn pipelines(&self) -> &[GraphicsPipelineDesc] {
        &self.pipelines
    }

    /// Staged copies performed
    pub const fn upload_count(&self) -> usize {
        self.upload_count
    }

    /// Buffers not yet destroyed
    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Contents of a buffer
    pub fn buffer_bytes(&self, buffer: BufferHandle) -> &[u8] {
        self.buffers.get(&buffer).map_or(&[], BufferStore::bytes)
    }

    /// Contents of mip 0 of an image; empty until something writes it
    pub fn image_texels(&self, image: &GpuImage) -> &[u8] {
        self.images.get(&image.image).map_or(&[], |store| store.texels.as_slice())
    }

    /// Buffer last written to `binding` of `set`
    pub fn bound_buffer(&self, set: DescriptorSetHandle, binding: u32) -> Option<BufferHandle> {
        match self.writes.get(&set)?.get(&binding)? {
            DescriptorWrite::Buffer { buffer, .. } => Some(*buffer),
            DescriptorWrite::Image { .. } => None,
        }
    }

    /// Image view last written to `binding` of `set`
    pub fn bound_view(&self, set: DescriptorSetHandle, binding: u32) -> Option<ImageViewHandle> {
        match self.writes.get(&set)?.get(&binding)? {
            DescriptorWrite::Image { view, .. } => Some(*view),
            DescriptorWrite::Buffer { .. } => None,
        }
    }

    /// Read `count` objects of `T` at `offset`
    pub fn read_mapped<T: Pod>(&self, buffer: BufferHandle, offset: u64, count: usize) -> Vec<T> {
        let size = std::mem::size_of::<T>();
        let start = offset as usize;
        let bytes = &self.buffer_bytes(buffer)[start..start + size * count];
        bytes.chunks_exact(size).map(bytemuck::pod_read_unaligned).collect()
    }

    fn store(&self, buffer: BufferHandle) -> RenderResult<&BufferStore> {
        self.buffers
            .get(&buffer)
            .ok_or_else(|| RenderError::MissingResource(format!("buffer {buffer:?}")))
    }

    fn store_mut(&mut self, buffer: BufferHandle) -> RenderResult<&mut BufferStore> {
        self.buffers
            .get_mut(&buffer)
            .ok_or_else(|| RenderError::MissingResource(format!("buffer {buffer:?}")))
    }

    fn fill_color_attachment(&mut self, value: u32) {
        let Some(framebuffer) = self.current_framebuffer else {
            return;
        };
        let Some(index) = self.framebuffer_handles.iter().position(|&f| f == framebuffer) else {
            return;
        };
        let Some(image) = self.framebuffers[index]
            .attachments
            .first()
            .and_then(|view| self.views.get(view))
            .copied()
        else {
            return;
        };
        if let Some(store) = self.images.get_mut(&image) {
            let extent = store.image.extent;
            let texels = extent.width as usize * extent.height as usize;
            store.texels = value.to_ne_bytes().repeat(texels);
        }
    }
}

impl RenderDevice for RecordingDevice {
    fn limits(&self) -> DeviceLimits {
        DeviceLimits::default()
    }

    fn max_frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    fn current_frame_index(&self) -> usize {
        self.frame_index
    }

    fn swapchain_info(&self) -> SwapchainInfo {
        self.swapchain.clone()
    }

    fn depth_format(&self) -> vk::Format {
        vk::Format::D32_SFLOAT
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> RenderResult<BufferHandle> {
        self.allocate(desc.size)?;
        let handle = BufferHandle(self.handle());
        let len = desc.size as usize;
        self.buffers.insert(
            handle,
            BufferStore {
                words: vec![0u64; len.div_ceil(8)].into_boxed_slice(),
                len,
                location: desc.location,
            },
        );
        Ok(handle)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> RenderResult<()> {
        let store = self.store_mut(buffer)?;
        let start = offset as usize;
        let Some(target) = store.bytes_mut().get_mut(start..start + data.len()) else {
            return Err(RenderError::InvalidOperation(format!("write past the end of {buffer:?}")));
        };
        target.copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferHandle, offset: u64, len: usize) -> RenderResult<Vec<u8>> {
        let start = offset as usize;
        self.store(buffer)?
            .bytes()
            .get(start..start + len)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| RenderError::InvalidOperation(format!("read past the end of {buffer:?}")))
    }

    fn map_persistent(&mut self, buffer: BufferHandle) -> RenderResult<HostMapping> {
        let store = self.store_mut(buffer)?;
        if store.location != MemoryLocation::HostVisible {
            return Err(RenderError::InvalidOperation(format!("{buffer:?} is not host visible")));
        }
        let len = store.len;
        let ptr = NonNull::new(store.words.as_mut_ptr().cast::<u8>())
            .ok_or_else(|| RenderError::InvalidOperation("null mapping".to_string()))?;
        // Safety: the boxed words never move while the buffer lives.
        Ok(unsafe { HostMapping::new(ptr, len) })
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer);
    }

    fn create_image(&mut self, desc: &ImageDesc) -> RenderResult<GpuImage> {
        self.allocate(u64::from(desc.width) * u64::from(desc.height) * u64::from(desc.array_layers) * 4)?;
        let image = GpuImage {
            image: ImageHandle(self.handle()),
            view: ImageViewHandle(self.handle()),
            format: desc.format,
            extent: vk::Extent2D {
                width: desc.width,
                height: desc.height,
            },
            array_layers: desc.array_layers,
            mip_levels: desc.mip_levels,
            aspect: desc.aspect,
        };
        self.views.insert(image.view, image.image);
        self.images.insert(
            image.image,
            ImageStore {
                image,
                texels: Vec::new(),
            },
        );
        Ok(image)
    }

    fn destroy_image(&mut self, image: &GpuImage) {
        self.images.remove(&image.image);
        self.views.remove(&image.view);
    }

    fn create_sampler(&mut self, _desc: &SamplerDesc) -> RenderResult<SamplerHandle> {
        Ok(SamplerHandle(self.handle()))
    }

    fn copy_buffer(&mut self, src: BufferHandle, dst: BufferHandle, size: u64) -> RenderResult<()> {
        let bytes = self.store(src)?.bytes()[..size as usize].to_vec();
        self.write_buffer(dst, 0, &bytes)?;
        self.upload_count += 1;
        Ok(())
    }

    fn copy_buffer_to_image(&mut self, src: BufferHandle, image: &GpuImage, _generate_mipmaps: bool) -> RenderResult<()> {
        let texels = image.extent.width as usize
            * image.extent.height as usize
            * image.array_layers as usize
            * texel_size(image.format);
        let bytes = self.store(src)?.bytes();
        let bytes = bytes[..texels.min(bytes.len())].to_vec();
        let store = self
            .images
            .get_mut(&image.image)
            .ok_or_else(|| RenderError::MissingResource(format!("image {:?}", image.image)))?;
        store.texels = bytes;
        self.upload_count += 1;
        Ok(())
    }

    fn create_descriptor_set_layout(&mut self, _bindings: &[DescriptorBinding]) -> RenderResult<DescriptorSetLayoutHandle> {
        Ok(DescriptorSetLayoutHandle(self.handle()))
    }

    fn allocate_descriptor_set(&mut self, _layout: DescriptorSetLayoutHandle) -> RenderResult<DescriptorSetHandle> {
        Ok(DescriptorSetHandle(self.handle()))
    }

    fn update_descriptor_set(&mut self, set: DescriptorSetHandle, writes: &[DescriptorWrite]) {
        let bindings = self.writes.entry(set).or_default();
        for write in writes {
            let binding = match write {
                DescriptorWrite::Buffer { binding, .. } | DescriptorWrite::Image { binding, .. } => *binding,
            };
            bindings.insert(binding, *write);
        }
    }

    fn create_render_pass(&mut self, desc: &RenderPassDesc) -> RenderResult<RenderPassHandle> {
        self.render_passes.push(desc.clone());
        Ok(RenderPassHandle(self.handle()))
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> RenderResult<FramebufferHandle> {
        let handle = FramebufferHandle(self.handle());
        self.framebuffer_handles.push(handle);
        self.framebuffers.push(desc.clone());
        Ok(handle)
    }

    fn destroy_framebuffer(&mut self, _framebuffer: FramebufferHandle) {}

    fn create_graphics_pipeline(&mut self, desc: &GraphicsPipelineDesc) -> RenderResult<Pipeline> {
        self.pipelines.push(desc.clone());
        Ok(Pipeline {
            pipeline: PipelineHandle(self.handle()),
            layout: PipelineLayoutHandle(self.handle()),
        })
    }

    fn wait_for_current_frame(&mut self) -> RenderResult<()> {
        self.commands.push(Command::WaitForFrame);
        if self.fences_signalled[self.frame_index] {
            Ok(())
        } else {
            Err(RenderError::InvalidOperation(format!(
                "fence of frame slot {} is never signalled",
                self.frame_index
            )))
        }
    }

    fn wait_for_all_frames(&mut self) -> RenderResult<()> {
        self.commands.push(Command::WaitForAllFrames);
        match self.fences_signalled.iter().position(|signalled| !signalled) {
            Some(slot) => Err(RenderError::InvalidOperation(format!(
                "fence of frame slot {slot} is never signalled"
            ))),
            None => Ok(()),
        }
    }

    fn reset_command_pool(&mut self) -> RenderResult<()> {
        self.commands.push(Command::ResetCommandPool);
        Ok(())
    }

    fn begin_frame(&mut self) -> RenderResult<FrameStatus> {
        if std::mem::take(&mut self.recreate_pending) {
            return Ok(FrameStatus::SwapchainRecreated);
        }
        self.open_frame()?;
        self.commands.push(Command::BeginFrame);
        let image_index = (self.acquired % self.swapchain.image_views.len() as u64) as u32;
        self.acquired += 1;
        Ok(FrameStatus::Ready { image_index })
    }

    fn submit_frame(&mut self) -> RenderResult<FrameStatus> {
        self.commands.push(Command::SubmitFrame);
        self.close_frame()?;
        let image_index = (self.acquired.saturating_sub(1) % self.swapchain.image_views.len() as u64) as u32;
        Ok(FrameStatus::Ready { image_index })
    }

    fn abandon_frame(&mut self) -> RenderResult<FrameStatus> {
        self.commands.push(Command::AbandonFrame);
        self.render_pass_open = false;
        self.current_framebuffer = None;
        self.close_frame()?;
        let image_index = (self.acquired.saturating_sub(1) % self.swapchain.image_views.len() as u64) as u32;
        Ok(FrameStatus::Ready { image_index })
    }

    fn begin_offscreen(&mut self) -> RenderResult<()> {
        self.open_frame()?;
        self.commands.push(Command::BeginOffscreen);
        Ok(())
    }

    fn submit_offscreen(&mut self) -> RenderResult<()> {
        self.commands.push(Command::SubmitOffscreen);
        self.close_frame()
    }

    fn begin_single_time_commands(&mut self) -> RenderResult<()> {
        if self.single_time_open {
            return Err(RenderError::InvalidOperation(
                "single-time commands are already being recorded".to_string(),
            ));
        }
        self.single_time_open = true;
        self.commands.push(Command::BeginSingleTimeCommands);
        Ok(())
    }

    fn end_single_time_commands(&mut self) -> RenderResult<()> {
        if !std::mem::take(&mut self.single_time_open) {
            return Err(RenderError::InvalidOperation(
                "end_single_time_commands without a matching begin".to_string(),
            ));
        }
        self.commands.push(Command::EndSingleTimeCommands);
        Ok(())
    }

    fn wait_idle(&mut self) -> RenderResult<()> {
        self.commands.push(Command::WaitIdle);
        Ok(())
    }

    fn cmd_begin_render_pass(
        &mut self,
        render_pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
        extent: vk::Extent2D,
        clear_values: &[ClearValue],
    ) {
        self.current_framebuffer = Some(framebuffer);
        self.render_pass_open = true;
        self.commands.push(Command::BeginRenderPass {
            render_pass,
            framebuffer,
            extent,
            clear_values: clear_values.to_vec(),
        });
    }

    fn cmd_next_subpass(&mut self) {
        self.commands.push(Command::NextSubpass);
    }

    fn cmd_end_render_pass(&mut self) {
        self.current_framebuffer = None;
        self.render_pass_open = false;
        self.commands.push(Command::EndRenderPass);
    }

    fn cmd_bind_pipeline(&mut self, pipeline: &Pipeline) {
        self.commands.push(Command::BindPipeline(*pipeline));
    }

    fn cmd_set_viewport(&mut self, viewport: vk::Viewport, scissor: vk::Rect2D) {
        self.commands.push(Command::SetViewport { viewport, scissor });
    }

    fn cmd_bind_descriptor_sets(
        &mut self,
        layout: PipelineLayoutHandle,
        first_set: u32,
        sets: &[DescriptorSetHandle],
        dynamic_offsets: &[u32],
    ) {
        if first_set == 0 {
            self.bound_set = sets.first().copied();
            self.bound_offsets = dynamic_offsets.to_vec();
        }
        self.commands.push(Command::BindDescriptorSets {
            layout,
            first_set,
            sets: sets.to_vec(),
            dynamic_offsets: dynamic_offsets.to_vec(),
        });
    }

    fn cmd_bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[BufferHandle]) {
        self.commands.push(Command::BindVertexBuffers {
            first_binding,
            buffers: buffers.to_vec(),
        });
    }

    fn cmd_bind_index_buffer(&mut self, buffer: BufferHandle) {
        self.commands.push(Command::BindIndexBuffer(buffer));
    }

    fn cmd_draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.commands.push(Command::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
    }

    fn cmd_draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.commands.push(Command::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        });

        if let Some(mut hook) = self.raster_hook.take() {
            let value = hook(&RasterInput {
                device: self,
                set: self.bound_set,
                instance_count,
                dynamic_offsets: self.bound_offsets.clone(),
            });
            self.raster_hook = Some(hook);
            if let Some(value) = value {
                self.fill_color_attachment(value);
            }
        }
    }

    fn cmd_clear_color_attachment(&mut self, attachment: u32, color: [f32; 4], extent: vk::Extent2D) {
        self.commands.push(Command::ClearColorAttachment {
            attachment,
            color,
            extent,
        });
    }

    fn cmd_image_barrier(&mut self, barrier: &ImageBarrier) {
        self.commands.push(Command::ImageBarrier(*barrier));
    }

    fn cmd_copy_image_to_buffer(&mut self, image: &GpuImage, layout: vk::ImageLayout, buffer: BufferHandle) {
        self.commands.push(Command::CopyImageToBuffer {
            image: image.image,
            layout,
            buffer,
        });
        let texels = self.image_texels(image).to_vec();
        if let Ok(store) = self.store_mut(buffer) {
            let target = store.bytes_mut();
            let len = texels.len().min(target.len());
            target[..len].copy_from_slice(&texels[..len]);
        }
    }

    fn cmd_push_label(&mut self, name: &str) {
        self.commands.push(Command::PushLabel(name.to_string()));
    }

    fn cmd_pop_label(&mut self) {
        self.commands.push(Command::PopLabel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_is_visible_to_readback() {
        let mut device = RecordingDevice::new();
        let buffer = device
            .create_buffer(&BufferDesc {
                size: 16,
                usage: vk::BufferUsageFlags::STORAGE_BUFFER,
                location: MemoryLocation::HostVisible,
            })
            .unwrap();
        let mapping = device.map_persistent(buffer).unwrap();
        unsafe { mapping.as_ptr().add(4).cast::<u32>().write_unaligned(77) };
        assert_eq!(device.read_mapped::<u32>(buffer, 4, 1), vec![77]);
    }

    #[test]
    fn test_device_local_cannot_be_mapped() {
        let mut device = RecordingDevice::new();
        let buffer = device
            .create_buffer(&BufferDesc::device_local(8, vk::BufferUsageFlags::VERTEX_BUFFER))
            .unwrap();
        assert!(device.map_persistent(buffer).is_err());
    }

    #[test]
    fn test_frame_slots_rotate() {
        let mut device = RecordingDevice::new().with_frames_in_flight(3);
        let slots: Vec<usize> = (0..4)
            .map(|_| {
                let slot = device.current_frame_index();
                device.begin_frame().unwrap();
                device.submit_frame().unwrap();
                slot
            })
            .collect();
        assert_eq!(slots, vec![0, 1, 2, 0]);
    }

    #[test]
    fn test_forced_recreate_applies_once() {
        let mut device = RecordingDevice::new();
        device.force_swapchain_recreated();
        assert_eq!(device.begin_frame().unwrap(), FrameStatus::SwapchainRecreated);
        assert!(matches!(device.begin_frame().unwrap(), FrameStatus::Ready { .. }));
    }
}
