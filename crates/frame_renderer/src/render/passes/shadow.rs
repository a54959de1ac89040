//! Shared machinery of the shadow passes
//!
//! Both shadow passes render depth-only geometry into an `R32_SFLOAT` colour
//! target that the main camera pass samples. They differ only in size, layer
//! count, shader stages and the per-frame object they bind, so the setup steps
//! and the draw loop live here in [`ShadowPassCore`].
//!
//! Setup runs as a strict sequence tracked by [`ShadowPassState`]; each step
//! checks that its predecessor ran.

use ash::vk;
use bytemuck::Pod;

use crate::foundation::math::GpuMat4;
use crate::render::api::{
    ClearValue, DescriptorBinding, DescriptorSetHandle, DescriptorSetLayoutHandle, DescriptorWrite,
    FramebufferDesc, FramebufferHandle, GpuImage, GraphicsPipelineDesc, ImageDesc, ImageKind, ImageViewHandle,
    Pipeline, RenderDevice, RenderError, RenderPassDesc, RenderPassHandle, RenderResult, ShaderStageDesc,
    SubpassDesc,
};
use crate::render::batching::{push_perframe, record_mesh_batches, MeshBatchBinding};
use crate::render::common::{
    MeshInstance, MESH_PER_DRAWCALL_MAX_INSTANCE_COUNT, MESH_VERTEX_BLENDING_MAX_JOINT_COUNT, SHADOW_CLEAR_VALUE,
};
use crate::render::resources::mesh::mesh_position_layout;
use crate::render::resources::{SharedLayouts, TransientArena};
use crate::render::scene::VisibleInstance;

use super::PassContext;

/// Format of the shadow colour target
pub const SHADOW_MAP_FORMAT: vk::Format = vk::Format::R32_SFLOAT;

/// Setup progress of a shadow pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ShadowPassState {
    /// Nothing created
    #[default]
    Uninitialized,
    /// Colour and depth images exist
    AttachmentsReady,
    /// Render pass object exists
    RenderPassReady,
    /// Framebuffer exists
    FramebufferReady,
    /// Pipeline and its global set layout exist
    PipelineReady,
    /// Global descriptor set written
    DescriptorsReady,
    /// Ready to record every frame
    Drawable,
}

impl ShadowPassState {
    /// State the next setup step leads to
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Uninitialized => Some(Self::AttachmentsReady),
            Self::AttachmentsReady => Some(Self::RenderPassReady),
            Self::RenderPassReady => Some(Self::FramebufferReady),
            Self::FramebufferReady => Some(Self::PipelineReady),
            Self::PipelineReady => Some(Self::DescriptorsReady),
            Self::DescriptorsReady => Some(Self::Drawable),
            Self::Drawable => None,
        }
    }

    /// Move to `to`, which must directly follow the current state
    pub fn transition(&mut self, to: Self) -> RenderResult<()> {
        if self.next() != Some(to) {
            return Err(RenderError::InvalidOperation(format!(
                "shadow pass cannot move from {self:?} to {to:?}"
            )));
        }
        *self = to;
        Ok(())
    }

    /// Fail unless the current state is `expected`
    pub fn require(self, expected: Self, action: &str) -> RenderResult<()> {
        if self == expected {
            Ok(())
        } else {
            Err(RenderError::InvalidOperation(format!(
                "{action} requires shadow pass state {expected:?}, found {self:?}"
            )))
        }
    }
}

/// Render pass shared by both shadow passes
///
/// Colour is stored and left shader-readable for the main pass; depth only
/// lives for the pass.
pub fn shadow_render_pass_desc(depth_format: vk::Format) -> RenderPassDesc {
    let color = vk::AttachmentDescription {
        format: SHADOW_MAP_FORMAT,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ..Default::default()
    };
    let depth = vk::AttachmentDescription {
        format: depth_format,
        store_op: vk::AttachmentStoreOp::DONT_CARE,
        final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ..color
    };

    RenderPassDesc {
        attachments: vec![color, depth],
        subpasses: vec![SubpassDesc {
            colors: vec![(0, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)],
            depth: Some((1, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)),
            ..SubpassDesc::default()
        }],
        dependencies: vec![vk::SubpassDependency {
            src_subpass: 0,
            dst_subpass: vk::SUBPASS_EXTERNAL,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage_mask: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            src_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            dst_access_mask: vk::AccessFlags::empty(),
            dependency_flags: vk::DependencyFlags::empty(),
        }],
    }
}

/// Attachments, pipeline and descriptor state of one shadow pass
#[derive(Debug)]
pub struct ShadowPassCore {
    label: &'static str,
    dimension: u32,
    layers: u32,
    state: ShadowPassState,
    color: Option<GpuImage>,
    depth: Option<GpuImage>,
    render_pass: RenderPassHandle,
    framebuffer: FramebufferHandle,
    global_layout: DescriptorSetLayoutHandle,
    pipeline: Pipeline,
    global_set: DescriptorSetHandle,
}

impl ShadowPassCore {
    /// Square target of `dimension` texels with `layers` layers
    pub fn new(label: &'static str, dimension: u32, layers: u32) -> Self {
        Self {
            label,
            dimension,
            layers,
            state: ShadowPassState::Uninitialized,
            color: None,
            depth: None,
            render_pass: RenderPassHandle::NULL,
            framebuffer: FramebufferHandle::NULL,
            global_layout: DescriptorSetLayoutHandle::NULL,
            pipeline: Pipeline::default(),
            global_set: DescriptorSetHandle::NULL,
        }
    }

    /// Setup progress
    pub const fn state(&self) -> ShadowPassState {
        self.state
    }

    /// Target extent
    pub const fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.dimension,
            height: self.dimension,
        }
    }

    /// Shadow map view sampled by the main camera pass
    pub fn color_view(&self) -> Option<ImageViewHandle> {
        self.color.map(|image| image.view)
    }

    /// Shadow map image
    pub const fn color_image(&self) -> Option<&GpuImage> {
        self.color.as_ref()
    }

    /// Create the colour and depth images
    pub fn setup_attachments(&mut self, device: &mut dyn RenderDevice) -> RenderResult<()> {
        self.state.require(ShadowPassState::Uninitialized, "setup_attachments")?;

        let kind = if self.layers > 1 {
            ImageKind::Texture2dArray
        } else {
            ImageKind::Texture2d
        };
        let color = device.create_image(&ImageDesc {
            array_layers: self.layers,
            kind,
            ..ImageDesc::attachment(
                self.dimension,
                self.dimension,
                SHADOW_MAP_FORMAT,
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
                vk::ImageAspectFlags::COLOR,
            )
        })?;
        let depth = device.create_image(&ImageDesc {
            array_layers: self.layers,
            kind,
            ..ImageDesc::attachment(
                self.dimension,
                self.dimension,
                device.depth_format(),
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT,
                vk::ImageAspectFlags::DEPTH,
            )
        })?;
        self.color = Some(color);
        self.depth = Some(depth);
        self.state.transition(ShadowPassState::AttachmentsReady)
    }

    /// Create the single-subpass render pass
    pub fn setup_render_pass(&mut self, device: &mut dyn RenderDevice) -> RenderResult<()> {
        self.state.require(ShadowPassState::AttachmentsReady, "setup_render_pass")?;
        let depth_format = device.depth_format();
        self.render_pass = device.create_render_pass(&shadow_render_pass_desc(depth_format))?;
        self.state.transition(ShadowPassState::RenderPassReady)
    }

    /// Create the framebuffer over every layer
    pub fn setup_framebuffer(&mut self, device: &mut dyn RenderDevice) -> RenderResult<()> {
        self.state.require(ShadowPassState::RenderPassReady, "setup_framebuffer")?;
        let (Some(color), Some(depth)) = (self.color, self.depth) else {
            return Err(RenderError::MissingResource(format!("{} attachments", self.label)));
        };
        self.framebuffer = device.create_framebuffer(&FramebufferDesc {
            render_pass: self.render_pass,
            attachments: vec![color.view, depth.view],
            width: self.dimension,
            height: self.dimension,
            layers: self.layers,
        })?;
        self.state.transition(ShadowPassState::FramebufferReady)
    }

    /// Create the global set layout and the depth-only pipeline
    ///
    /// `perframe_stages` are the stages reading binding 0; the per-drawcall and
    /// joint matrix bindings are read by the vertex stage.
    pub fn setup_pipeline(
        &mut self,
        device: &mut dyn RenderDevice,
        layouts: &SharedLayouts,
        shaders: Vec<ShaderStageDesc>,
        perframe_stages: vk::ShaderStageFlags,
    ) -> RenderResult<()> {
        self.state.require(ShadowPassState::FramebufferReady, "setup_pipeline")?;

        let dynamic_storage = vk::DescriptorType::STORAGE_BUFFER_DYNAMIC;
        self.global_layout = device.create_descriptor_set_layout(&[
            DescriptorBinding::new(0, dynamic_storage, perframe_stages),
            DescriptorBinding::new(1, dynamic_storage, vk::ShaderStageFlags::VERTEX),
            DescriptorBinding::new(2, dynamic_storage, vk::ShaderStageFlags::VERTEX),
        ])?;

        self.pipeline = device.create_graphics_pipeline(&GraphicsPipelineDesc {
            vertex_layout: mesh_position_layout(),
            fixed_extent: Some(self.extent()),
            ..GraphicsPipelineDesc::new(
                self.label,
                self.render_pass,
                0,
                shaders,
                vec![self.global_layout, layouts.per_mesh],
            )
        })?;
        log::debug!("{} pipeline created", self.label);
        self.state.transition(ShadowPassState::PipelineReady)
    }

    /// Allocate and write the global set against the transient ring
    pub fn setup_descriptor_set<T: Pod>(
        &mut self,
        device: &mut dyn RenderDevice,
        arena: &TransientArena,
    ) -> RenderResult<()> {
        self.state.require(ShadowPassState::PipelineReady, "setup_descriptor_set")?;

        self.global_set = device.allocate_descriptor_set(self.global_layout)?;
        let dynamic_storage = vk::DescriptorType::STORAGE_BUFFER_DYNAMIC;
        let ranges = [
            std::mem::size_of::<T>(),
            std::mem::size_of::<MeshInstance>() * MESH_PER_DRAWCALL_MAX_INSTANCE_COUNT,
            std::mem::size_of::<GpuMat4>() * MESH_PER_DRAWCALL_MAX_INSTANCE_COUNT * MESH_VERTEX_BLENDING_MAX_JOINT_COUNT,
        ];
        let writes: Vec<DescriptorWrite> = ranges
            .iter()
            .zip(0u32..)
            .map(|(&range, binding)| DescriptorWrite::Buffer {
                binding,
                kind: dynamic_storage,
                buffer: arena.buffer(),
                offset: 0,
                range: arena.binding_range(range as u64),
            })
            .collect();
        device.update_descriptor_set(self.global_set, &writes);
        self.state.transition(ShadowPassState::DescriptorsReady)
    }

    /// Finish setup
    pub fn mark_drawable(&mut self) -> RenderResult<()> {
        self.state.transition(ShadowPassState::Drawable)?;
        log::debug!(
            "{} ready: {}x{} x {} layers",
            self.label,
            self.dimension,
            self.dimension,
            self.layers
        );
        Ok(())
    }

    /// Record the pass, returning the number of mesh draws
    ///
    /// The render pass always runs so the shadow map is cleared to
    /// [`SHADOW_CLEAR_VALUE`]; mesh draws are skipped when `draw_meshes` is false.
    pub fn record<T: Pod>(
        &self,
        ctx: &mut PassContext<'_>,
        instances: &[VisibleInstance],
        perframe: &T,
        draw_meshes: bool,
    ) -> RenderResult<usize> {
        self.state.require(ShadowPassState::Drawable, self.label)?;

        ctx.device.cmd_push_label(self.label);
        ctx.device.cmd_begin_render_pass(
            self.render_pass,
            self.framebuffer,
            self.extent(),
            &[
                ClearValue::Color([SHADOW_CLEAR_VALUE; 4]),
                ClearValue::DepthStencil {
                    depth: SHADOW_CLEAR_VALUE,
                    stencil: 0,
                },
            ],
        );

        let mut draw_count = 0;
        if draw_meshes {
            ctx.device.cmd_push_label("Mesh");
            ctx.device.cmd_bind_pipeline(&self.pipeline);

            let perframe_offset = push_perframe(&mut ctx.global.transient, ctx.frame_slot, perframe);
            let binding = MeshBatchBinding {
                pipeline: self.pipeline,
                global_set: self.global_set,
                perframe_offset,
                bind_material: false,
                full_vertex_streams: false,
            };
            let result = record_mesh_batches(&mut ctx.batch_target(), instances, &binding);
            ctx.device.cmd_pop_label();
            draw_count = result?;
        }

        ctx.device.cmd_end_render_pass();
        ctx.device.cmd_pop_label();
        Ok(draw_count)
    }
}
