//! Device abstraction for the render passes
//!
//! Passes never touch `ash` device functions directly. They describe GPU
//! objects with plain data (reusing `ash::vk` enums and flag types) and record
//! commands through [`RenderDevice`]. The Vulkan backend implements the trait
//! over a real device; tests implement it in host memory.
//!
//! Commands are recorded into the *active* command buffer: the current frame
//! slot's buffer between `begin_frame`/`submit_frame` (or
//! `begin_offscreen`/`submit_offscreen`), and a transient buffer between
//! `begin_single_time_commands`/`end_single_time_commands`.

use ash::vk;
use std::ptr::NonNull;

use super::RenderResult;

macro_rules! device_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name(pub u64);

        impl $name {
            /// The null handle
            pub const NULL: Self = Self(0);

            /// Whether this handle refers to nothing
            pub const fn is_null(self) -> bool {
                self.0 == 0
            }
        }
    };
}

device_handle!(
    /// Handle to a GPU buffer
    BufferHandle
);
device_handle!(
    /// Handle to a GPU image
    ImageHandle
);
device_handle!(
    /// Handle to an image view
    ImageViewHandle
);
device_handle!(
    /// Handle to a sampler
    SamplerHandle
);
device_handle!(
    /// Handle to a descriptor set layout
    DescriptorSetLayoutHandle
);
device_handle!(
    /// Handle to an allocated descriptor set
    DescriptorSetHandle
);
device_handle!(
    /// Handle to a render pass object
    RenderPassHandle
);
device_handle!(
    /// Handle to a framebuffer
    FramebufferHandle
);
device_handle!(
    /// Handle to a graphics pipeline
    PipelineHandle
);
device_handle!(
    /// Handle to a pipeline layout
    PipelineLayoutHandle
);

/// Device limits the allocator and batcher depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// `minUniformBufferOffsetAlignment`
    pub min_uniform_buffer_offset_alignment: u64,
    /// `minStorageBufferOffsetAlignment`
    pub min_storage_buffer_offset_alignment: u64,
    /// `maxStorageBufferRange`
    pub max_storage_buffer_range: u64,
    /// `nonCoherentAtomSize`
    pub non_coherent_atom_size: u64,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            min_uniform_buffer_offset_alignment: 256,
            min_storage_buffer_offset_alignment: 256,
            max_storage_buffer_range: 1 << 27,
            non_coherent_atom_size: 256,
        }
    }
}

/// Where a buffer's memory lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLocation {
    /// Device-local, not host visible
    DeviceLocal,
    /// Host-visible and coherent
    HostVisible,
}

/// Buffer creation parameters
#[derive(Debug, Clone, Copy)]
pub struct BufferDesc {
    /// Size in bytes
    pub size: u64,
    /// Usage flags
    pub usage: vk::BufferUsageFlags,
    /// Memory placement
    pub location: MemoryLocation,
}

impl BufferDesc {
    /// Host-visible transfer source used for staged uploads
    pub const fn staging(size: u64) -> Self {
        Self {
            size,
            usage: vk::BufferUsageFlags::TRANSFER_SRC,
            location: MemoryLocation::HostVisible,
        }
    }

    /// Device-local buffer that receives a staged copy
    pub fn device_local(size: u64, usage: vk::BufferUsageFlags) -> Self {
        Self {
            size,
            usage: usage | vk::BufferUsageFlags::TRANSFER_DST,
            location: MemoryLocation::DeviceLocal,
        }
    }
}

/// Shape of an image and its default view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// Single 2D layer
    Texture2d,
    /// 2D array with `array_layers` layers
    Texture2dArray,
    /// Six-face cube map
    Cube,
}

/// Image creation parameters
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    /// Width in texels
    pub width: u32,
    /// Height in texels
    pub height: u32,
    /// Texel format
    pub format: vk::Format,
    /// Usage flags
    pub usage: vk::ImageUsageFlags,
    /// View aspect
    pub aspect: vk::ImageAspectFlags,
    /// Layers (6 for cube maps)
    pub array_layers: u32,
    /// Mip levels
    pub mip_levels: u32,
    /// Image and view shape
    pub kind: ImageKind,
}

impl ImageDesc {
    /// Single-mip 2D render target
    pub const fn attachment(
        width: u32,
        height: u32,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> Self {
        Self {
            width,
            height,
            format,
            usage,
            aspect,
            array_layers: 1,
            mip_levels: 1,
            kind: ImageKind::Texture2d,
        }
    }

    /// Sampled 2D texture filled by a staged upload
    pub fn texture(width: u32, height: u32, format: vk::Format, mip_levels: u32) -> Self {
        let mut usage = vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST;
        if mip_levels > 1 {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        Self {
            width,
            height,
            format,
            usage,
            aspect: vk::ImageAspectFlags::COLOR,
            array_layers: 1,
            mip_levels,
            kind: ImageKind::Texture2d,
        }
    }
}

/// Image plus its default view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuImage {
    /// Image handle
    pub image: ImageHandle,
    /// View covering every layer and mip
    pub view: ImageViewHandle,
    /// Texel format
    pub format: vk::Format,
    /// Size of mip 0
    pub extent: vk::Extent2D,
    /// Layer count
    pub array_layers: u32,
    /// Mip count
    pub mip_levels: u32,
    /// View aspect
    pub aspect: vk::ImageAspectFlags,
}

/// Sampler creation parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerDesc {
    /// Min/mag filter
    pub filter: vk::Filter,
    /// Mipmap filter
    pub mipmap_mode: vk::SamplerMipmapMode,
    /// Address mode on all axes
    pub address_mode: vk::SamplerAddressMode,
    /// Highest sampled lod
    pub max_lod: f32,
    /// Use the device's max anisotropy
    pub anisotropy: bool,
}

impl SamplerDesc {
    /// Linear filtering over `mip_levels` mips, clamped to edge
    pub fn linear_clamp(mip_levels: u32) -> Self {
        Self {
            filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            max_lod: mip_levels.saturating_sub(1) as f32,
            anisotropy: true,
        }
    }

    /// Linear filtering with repeat addressing
    pub const fn linear_repeat() -> Self {
        Self {
            filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
            max_lod: 0.0,
            anisotropy: true,
        }
    }

    /// Point sampling, clamped to edge
    pub const fn nearest() -> Self {
        Self {
            filter: vk::Filter::NEAREST,
            mipmap_mode: vk::SamplerMipmapMode::NEAREST,
            address_mode: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            max_lod: 0.0,
            anisotropy: false,
        }
    }
}

/// One binding of a descriptor set layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBinding {
    /// Binding index
    pub binding: u32,
    /// Descriptor type
    pub kind: vk::DescriptorType,
    /// Stages that read it
    pub stages: vk::ShaderStageFlags,
}

impl DescriptorBinding {
    /// Shorthand constructor
    pub const fn new(binding: u32, kind: vk::DescriptorType, stages: vk::ShaderStageFlags) -> Self {
        Self { binding, kind, stages }
    }
}

/// Descriptor update
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DescriptorWrite {
    /// Uniform or storage buffer range
    Buffer {
        /// Binding index
        binding: u32,
        /// Descriptor type
        kind: vk::DescriptorType,
        /// Buffer
        buffer: BufferHandle,
        /// Byte offset
        offset: u64,
        /// Byte range
        range: u64,
    },
    /// Sampled image or input attachment
    Image {
        /// Binding index
        binding: u32,
        /// Descriptor type
        kind: vk::DescriptorType,
        /// View
        view: ImageViewHandle,
        /// Sampler (ignored for input attachments)
        sampler: Option<SamplerHandle>,
        /// Layout the image is in while bound
        layout: vk::ImageLayout,
    },
}

impl DescriptorWrite {
    /// Combined image sampler in `SHADER_READ_ONLY_OPTIMAL`
    pub const fn sampled(binding: u32, view: ImageViewHandle, sampler: SamplerHandle) -> Self {
        Self::Image {
            binding,
            kind: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            view,
            sampler: Some(sampler),
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    /// Input attachment in `SHADER_READ_ONLY_OPTIMAL`
    pub const fn input_attachment(binding: u32, view: ImageViewHandle) -> Self {
        Self::Image {
            binding,
            kind: vk::DescriptorType::INPUT_ATTACHMENT,
            view,
            sampler: None,
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }
}

/// Attachment usage within one subpass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubpassDesc {
    /// Input attachments
    pub inputs: Vec<(u32, vk::ImageLayout)>,
    /// Color attachments
    pub colors: Vec<(u32, vk::ImageLayout)>,
    /// Depth attachment
    pub depth: Option<(u32, vk::ImageLayout)>,
    /// Attachments whose contents must survive this subpass
    pub preserve: Vec<u32>,
}

/// Render pass creation parameters
#[derive(Debug, Clone, Default)]
pub struct RenderPassDesc {
    /// Attachment descriptions
    pub attachments: Vec<vk::AttachmentDescription>,
    /// Subpasses in execution order
    pub subpasses: Vec<SubpassDesc>,
    /// Execution and memory dependencies
    pub dependencies: Vec<vk::SubpassDependency>,
}

/// Framebuffer creation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramebufferDesc {
    /// Compatible render pass
    pub render_pass: RenderPassHandle,
    /// Views in attachment order
    pub attachments: Vec<ImageViewHandle>,
    /// Width
    pub width: u32,
    /// Height
    pub height: u32,
    /// Layers
    pub layers: u32,
}

/// Vertex input layout
#[derive(Debug, Clone, Default)]
pub struct VertexLayout {
    /// Bindings
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    /// Attributes
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

/// One shader stage, loaded from a SPIR-V file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderStageDesc {
    /// Pipeline stage
    pub stage: vk::ShaderStageFlags,
    /// File name relative to the shader directory
    pub file: &'static str,
}

impl ShaderStageDesc {
    /// Vertex stage
    pub const fn vertex(file: &'static str) -> Self {
        Self { stage: vk::ShaderStageFlags::VERTEX, file }
    }

    /// Geometry stage
    pub const fn geometry(file: &'static str) -> Self {
        Self { stage: vk::ShaderStageFlags::GEOMETRY, file }
    }

    /// Fragment stage
    pub const fn fragment(file: &'static str) -> Self {
        Self { stage: vk::ShaderStageFlags::FRAGMENT, file }
    }
}

/// Graphics pipeline creation parameters
#[derive(Debug, Clone)]
pub struct GraphicsPipelineDesc {
    /// Debug name
    pub name: &'static str,
    /// Shader stages
    pub shaders: Vec<ShaderStageDesc>,
    /// Vertex input
    pub vertex_layout: VertexLayout,
    /// Descriptor set layouts, in set order
    pub set_layouts: Vec<DescriptorSetLayoutHandle>,
    /// Render pass the pipeline is used in
    pub render_pass: RenderPassHandle,
    /// Subpass index
    pub subpass: u32,
    /// Color attachments written by the subpass
    pub color_attachment_count: u32,
    /// Enable alpha blending on every color attachment
    pub blend: bool,
    /// Face culling
    pub cull_mode: vk::CullModeFlags,
    /// Depth testing
    pub depth_test: bool,
    /// Depth writes
    pub depth_write: bool,
    /// Depth compare op
    pub depth_compare: vk::CompareOp,
    /// Primitive topology
    pub topology: vk::PrimitiveTopology,
    /// Fixed viewport size; `None` makes viewport and scissor dynamic
    pub fixed_extent: Option<vk::Extent2D>,
}

impl GraphicsPipelineDesc {
    /// Opaque triangle-list pipeline with depth test and write enabled
    pub fn new(
        name: &'static str,
        render_pass: RenderPassHandle,
        subpass: u32,
        shaders: Vec<ShaderStageDesc>,
        set_layouts: Vec<DescriptorSetLayoutHandle>,
    ) -> Self {
        Self {
            name,
            shaders,
            vertex_layout: VertexLayout::default(),
            set_layouts,
            render_pass,
            subpass,
            color_attachment_count: 1,
            blend: false,
            cull_mode: vk::CullModeFlags::BACK,
            depth_test: true,
            depth_write: true,
            depth_compare: vk::CompareOp::LESS,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            fixed_extent: None,
        }
    }

    /// Full-screen pass: no vertex input, no culling, no depth
    pub fn fullscreen(
        name: &'static str,
        render_pass: RenderPassHandle,
        subpass: u32,
        shaders: Vec<ShaderStageDesc>,
        set_layouts: Vec<DescriptorSetLayoutHandle>,
    ) -> Self {
        Self {
            cull_mode: vk::CullModeFlags::NONE,
            depth_test: false,
            depth_write: false,
            depth_compare: vk::CompareOp::ALWAYS,
            ..Self::new(name, render_pass, subpass, shaders, set_layouts)
        }
    }
}

/// Pipeline and its layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pipeline {
    /// Pipeline handle
    pub pipeline: PipelineHandle,
    /// Layout handle
    pub layout: PipelineLayoutHandle,
}

/// Clear value for one attachment
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    /// Float color
    Color([f32; 4]),
    /// Unsigned integer color
    ColorUint([u32; 4]),
    /// Depth and stencil
    DepthStencil {
        /// Depth
        depth: f32,
        /// Stencil
        stencil: u32,
    },
}

/// Single-subresource image layout transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBarrier {
    /// Image
    pub image: ImageHandle,
    /// Aspect
    pub aspect: vk::ImageAspectFlags,
    /// Layout before
    pub old_layout: vk::ImageLayout,
    /// Layout after
    pub new_layout: vk::ImageLayout,
    /// Access before
    pub src_access: vk::AccessFlags,
    /// Access after
    pub dst_access: vk::AccessFlags,
    /// Stage before
    pub src_stage: vk::PipelineStageFlags,
    /// Stage after
    pub dst_stage: vk::PipelineStageFlags,
}

/// Presentable image state
#[derive(Debug, Clone, Default)]
pub struct SwapchainInfo {
    /// Image size
    pub extent: vk::Extent2D,
    /// Image format
    pub format: vk::Format,
    /// One view per swapchain image
    pub image_views: Vec<ImageViewHandle>,
    /// Viewport used by screen-space passes
    pub viewport: vk::Viewport,
    /// Scissor used by screen-space passes
    pub scissor: vk::Rect2D,
}

impl SwapchainInfo {
    /// Full-extent viewport and scissor for `extent`
    pub fn full_extent(extent: vk::Extent2D) -> (vk::Viewport, vk::Rect2D) {
        (
            vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            },
            vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
        )
    }
}

/// Outcome of acquiring or presenting a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// Recording may proceed into swapchain image `image_index`
    Ready {
        /// Acquired swapchain image
        image_index: u32,
    },
    /// The swapchain was rebuilt; size-dependent pass resources must follow
    SwapchainRecreated,
}

/// Persistently mapped host memory
///
/// The mapping stays valid until the owning buffer is destroyed.
#[derive(Debug, Clone, Copy)]
pub struct HostMapping {
    ptr: NonNull<u8>,
    len: usize,
}

impl HostMapping {
    /// Wrap a mapped pointer
    ///
    /// # Safety
    /// `ptr` must be valid for reads and writes of `len` bytes for as long as
    /// the mapping is used, and nothing else may create references into it.
    pub const unsafe fn new(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len }
    }

    /// Mapped length in bytes
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the mapping is empty
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Base pointer
    pub const fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

/// Device operations the render passes are written against
pub trait RenderDevice {
    /// Alignment and range limits
    fn limits(&self) -> DeviceLimits;
    /// Number of frame slots
    fn max_frames_in_flight(&self) -> usize;
    /// Frame slot currently recording
    fn current_frame_index(&self) -> usize;
    /// Swapchain extent, format and views
    fn swapchain_info(&self) -> SwapchainInfo;
    /// Format used for depth attachments
    fn depth_format(&self) -> vk::Format;

    /// Create a buffer
    fn create_buffer(&mut self, desc: &BufferDesc) -> RenderResult<BufferHandle>;
    /// Write bytes into a host-visible buffer
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> RenderResult<()>;
    /// Map a host-visible buffer, copy `len` bytes out and unmap
    fn read_buffer(&mut self, buffer: BufferHandle, offset: u64, len: usize) -> RenderResult<Vec<u8>>;
    /// Map a host-visible buffer for its whole lifetime
    fn map_persistent(&mut self, buffer: BufferHandle) -> RenderResult<HostMapping>;
    /// Destroy a buffer
    fn destroy_buffer(&mut self, buffer: BufferHandle);
    /// Create an image and its default view
    fn create_image(&mut self, desc: &ImageDesc) -> RenderResult<GpuImage>;
    /// Destroy an image and its view
    fn destroy_image(&mut self, image: &GpuImage);
    /// Create a sampler
    fn create_sampler(&mut self, desc: &SamplerDesc) -> RenderResult<SamplerHandle>;
    /// Copy `size` bytes between buffers and wait for completion
    fn copy_buffer(&mut self, src: BufferHandle, dst: BufferHandle, size: u64) -> RenderResult<()>;
    /// Copy tightly packed layers from `src` into mip 0 of every layer of `image`,
    /// optionally blit the remaining mips, and leave it shader-readable
    fn copy_buffer_to_image(&mut self, src: BufferHandle, image: &GpuImage, generate_mipmaps: bool) -> RenderResult<()>;

    /// Create a descriptor set layout
    fn create_descriptor_set_layout(&mut self, bindings: &[DescriptorBinding]) -> RenderResult<DescriptorSetLayoutHandle>;
    /// Allocate one descriptor set
    fn allocate_descriptor_set(&mut self, layout: DescriptorSetLayoutHandle) -> RenderResult<DescriptorSetHandle>;
    /// Apply descriptor writes
    fn update_descriptor_set(&mut self, set: DescriptorSetHandle, writes: &[DescriptorWrite]);
    /// Create a render pass
    fn create_render_pass(&mut self, desc: &RenderPassDesc) -> RenderResult<RenderPassHandle>;
    /// Create a framebuffer
    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> RenderResult<FramebufferHandle>;
    /// Destroy a framebuffer
    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle);
    /// Create a graphics pipeline and its layout
    fn create_graphics_pipeline(&mut self, desc: &GraphicsPipelineDesc) -> RenderResult<Pipeline>;

    /// Block until the current frame slot's previous submission finished
    fn wait_for_current_frame(&mut self) -> RenderResult<()>;
    /// Block until every frame slot's submission finished
    fn wait_for_all_frames(&mut self) -> RenderResult<()>;
    /// Reset the current slot's command pool
    fn reset_command_pool(&mut self) -> RenderResult<()>;
    /// Acquire a swapchain image and begin the slot's command buffer
    fn begin_frame(&mut self) -> RenderResult<FrameStatus>;
    /// End, submit and present, then advance the frame slot
    fn submit_frame(&mut self) -> RenderResult<FrameStatus>;
    /// Drop whatever was recorded since `begin_frame` and hand the acquired
    /// image back to presentation
    ///
    /// The slot's fence and semaphores are signalled as by a regular submit,
    /// so the next wait on this slot returns. The image contents are undefined.
    fn abandon_frame(&mut self) -> RenderResult<FrameStatus>;
    /// Begin the slot's command buffer without acquiring an image
    fn begin_offscreen(&mut self) -> RenderResult<()>;
    /// End and submit without presenting, then advance the frame slot
    fn submit_offscreen(&mut self) -> RenderResult<()>;
    /// Redirect recording into a transient command buffer
    fn begin_single_time_commands(&mut self) -> RenderResult<()>;
    /// Submit the transient command buffer and wait for the queue
    fn end_single_time_commands(&mut self) -> RenderResult<()>;
    /// Block until the device is idle
    fn wait_idle(&mut self) -> RenderResult<()>;

    /// Begin a render pass with inline subpass contents
    fn cmd_begin_render_pass(
        &mut self,
        render_pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
        extent: vk::Extent2D,
        clear_values: &[ClearValue],
    );
    /// Advance to the next subpass
    fn cmd_next_subpass(&mut self);
    /// End the render pass
    fn cmd_end_render_pass(&mut self);
    /// Bind a graphics pipeline
    fn cmd_bind_pipeline(&mut self, pipeline: &Pipeline);
    /// Set viewport and scissor
    fn cmd_set_viewport(&mut self, viewport: vk::Viewport, scissor: vk::Rect2D);
    /// Bind descriptor sets with dynamic offsets
    fn cmd_bind_descriptor_sets(
        &mut self,
        layout: PipelineLayoutHandle,
        first_set: u32,
        sets: &[DescriptorSetHandle],
        dynamic_offsets: &[u32],
    );
    /// Bind vertex buffers at offset 0
    fn cmd_bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[BufferHandle]);
    /// Bind a 16-bit index buffer at offset 0
    fn cmd_bind_index_buffer(&mut self, buffer: BufferHandle);
    /// Non-indexed draw
    fn cmd_draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32);
    /// Indexed draw
    fn cmd_draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
    /// Clear a color attachment of the current subpass
    fn cmd_clear_color_attachment(&mut self, attachment: u32, color: [f32; 4], extent: vk::Extent2D);
    /// Record an image layout transition
    fn cmd_image_barrier(&mut self, barrier: &ImageBarrier);
    /// Copy mip 0 layer 0 of `image` into `buffer`
    fn cmd_copy_image_to_buffer(&mut self, image: &GpuImage, layout: vk::ImageLayout, buffer: BufferHandle);
    /// Open a debug label region
    fn cmd_push_label(&mut self, name: &str);
    /// Close the innermost debug label region
    fn cmd_pop_label(&mut self);
}
