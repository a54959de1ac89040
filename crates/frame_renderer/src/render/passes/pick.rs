//! Object id pick pass
//!
//! Renders the main camera's visible instances into an `R32_UINT` target
//! holding each instance's node id, then reads back the texel under a
//! normalized screen coordinate. Nothing is recorded during regular frames;
//! [`PickPass::pick`] runs its own offscreen submission and waits for it, so a
//! pick stalls the GPU and is only meant for editor clicks.

use ash::vk;
use bytemuck::Zeroable;

use crate::foundation::math::{to_gpu_mat4, GpuMat4, Vec2};
use crate::render::api::{
    BufferDesc, ClearValue, DescriptorBinding, DescriptorSetHandle, DescriptorSetLayoutHandle, DescriptorWrite,
    FramebufferDesc, FramebufferHandle, GpuImage, GraphicsPipelineDesc, ImageBarrier, ImageDesc, MemoryLocation,
    Pipeline, RenderDevice, RenderError, RenderPassDesc, RenderPassHandle, RenderResult, ShaderStageDesc,
    SubpassDesc,
};
use crate::render::batching::{cached_mesh, group_instances, push_perframe, write_joint_matrices};
use crate::render::common::{
    MeshInefficientPickPerdrawcallStorageBufferObject, MeshInefficientPickPerframeStorageBufferObject,
    MESH_PER_DRAWCALL_MAX_INSTANCE_COUNT, MESH_VERTEX_BLENDING_MAX_JOINT_COUNT,
};
use crate::render::resources::mesh::mesh_position_layout;
use crate::render::scene::FrameSnapshot;

use super::{PassContext, RenderPass, SetupContext};

/// Format of the id target
pub const PICK_FORMAT: vk::Format = vk::Format::R32_UINT;

const VERTEX_SHADER: &str = "mesh_inefficient_pick.vert.spv";
const FRAGMENT_SHADER: &str = "mesh_inefficient_pick.frag.spv";

/// Layout of the per-mesh set the pick pipeline binds at set 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PickPassInitInfo {
    /// Shared per-mesh joint binding layout
    pub per_mesh_layout: DescriptorSetLayoutHandle,
}

/// Render pass writing node ids, readable by a transfer afterwards
pub fn pick_render_pass_desc(depth_format: vk::Format) -> RenderPassDesc {
    let color = vk::AttachmentDescription {
        format: PICK_FORMAT,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
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
            dst_stage_mask: vk::PipelineStageFlags::TRANSFER,
            src_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            dst_access_mask: vk::AccessFlags::TRANSFER_READ,
            dependency_flags: vk::DependencyFlags::empty(),
        }],
    }
}

/// Node id readback pass
#[derive(Debug)]
pub struct PickPass {
    per_mesh_layout: DescriptorSetLayoutHandle,
    render_pass: RenderPassHandle,
    color: Option<GpuImage>,
    depth: Option<GpuImage>,
    framebuffer: FramebufferHandle,
    extent: vk::Extent2D,
    viewport: vk::Viewport,
    scissor: vk::Rect2D,
    global_layout: DescriptorSetLayoutHandle,
    global_set: DescriptorSetHandle,
    pipeline: Option<Pipeline>,
    perframe: MeshInefficientPickPerframeStorageBufferObject,
}

impl Default for PickPass {
    fn default() -> Self {
        Self::new()
    }
}

impl PickPass {
    /// Uninitialized pass
    pub fn new() -> Self {
        Self {
            per_mesh_layout: DescriptorSetLayoutHandle::NULL,
            render_pass: RenderPassHandle::NULL,
            color: None,
            depth: None,
            framebuffer: FramebufferHandle::NULL,
            extent: vk::Extent2D::default(),
            viewport: vk::Viewport::default(),
            scissor: vk::Rect2D::default(),
            global_layout: DescriptorSetLayoutHandle::NULL,
            global_set: DescriptorSetHandle::NULL,
            pipeline: None,
            perframe: MeshInefficientPickPerframeStorageBufferObject::default(),
        }
    }

    /// Size of the id target
    pub const fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Rebuild the id target and framebuffer at the swapchain size
    pub fn recreate_framebuffer(&mut self, device: &mut dyn RenderDevice) -> RenderResult<()> {
        if self.render_pass.is_null() {
            return Err(RenderError::InvalidOperation(
                "pick framebuffer recreated before initialize".to_string(),
            ));
        }
        self.destroy_framebuffer(device);
        self.create_framebuffer(device)
    }

    fn create_framebuffer(&mut self, device: &mut dyn RenderDevice) -> RenderResult<()> {
        let swapchain = device.swapchain_info();
        let extent = swapchain.extent;
        let color = device.create_image(&ImageDesc::attachment(
            extent.width,
            extent.height,
            PICK_FORMAT,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
            vk::ImageAspectFlags::COLOR,
        ))?;
        let depth = device.create_image(&ImageDesc::attachment(
            extent.width,
            extent.height,
            device.depth_format(),
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
        ))?;
        self.framebuffer = device.create_framebuffer(&FramebufferDesc {
            render_pass: self.render_pass,
            attachments: vec![color.view, depth.view],
            width: extent.width,
            height: extent.height,
            layers: 1,
        })?;
        self.color = Some(color);
        self.depth = Some(depth);
        self.extent = extent;
        self.viewport = swapchain.viewport;
        self.scissor = swapchain.scissor;
        Ok(())
    }

    fn destroy_framebuffer(&mut self, device: &mut dyn RenderDevice) {
        if !self.framebuffer.is_null() {
            device.destroy_framebuffer(self.framebuffer);
            self.framebuffer = FramebufferHandle::NULL;
        }
        for image in [self.color.take(), self.depth.take()].into_iter().flatten() {
            device.destroy_image(&image);
        }
    }

    /// Texel under a normalized coordinate, `None` when outside the target
    pub fn pixel_at(&self, uv: Vec2) -> Option<(u32, u32)> {
        if !(0.0..=1.0).contains(&uv.x) || !(0.0..=1.0).contains(&uv.y) {
            return None;
        }
        let x = (uv.x * self.viewport.width + self.viewport.x).floor();
        let y = (uv.y * self.viewport.height + self.viewport.y).floor();
        if x.is_nan() || y.is_nan() || x < 0.0 || y < 0.0 {
            return None;
        }
        let (x, y) = (x as u32, y as u32);
        (x < self.extent.width && y < self.extent.height).then_some((x, y))
    }

    /// Node id of the instance under `uv`, 0 for background or outside the target
    ///
    /// Renders `ctx.visible.main_camera` offscreen and blocks until the id is
    /// read back.
    pub fn pick(&mut self, ctx: &mut PassContext<'_>, uv: Vec2) -> RenderResult<u32> {
        let Some((x, y)) = self.pixel_at(uv) else {
            return Ok(0);
        };
        let (Some(pipeline), Some(color)) = (self.pipeline, self.color) else {
            return Err(RenderError::InvalidOperation("pick before post_initialize".to_string()));
        };

        ctx.global.transient.reset(ctx.frame_slot);
        ctx.device.wait_for_current_frame()?;
        ctx.device.reset_command_pool()?;
        ctx.device.begin_offscreen()?;

        ctx.device.cmd_image_barrier(&ImageBarrier {
            image: color.image,
            aspect: vk::ImageAspectFlags::COLOR,
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            src_stage: vk::PipelineStageFlags::ALL_COMMANDS,
            dst_stage: vk::PipelineStageFlags::ALL_COMMANDS,
        });
        ctx.device.cmd_set_viewport(self.viewport, self.scissor);
        ctx.device.cmd_begin_render_pass(
            self.render_pass,
            self.framebuffer,
            self.extent,
            &[
                ClearValue::ColorUint([0; 4]),
                ClearValue::DepthStencil { depth: 1.0, stencil: 0 },
            ],
        );

        ctx.device.cmd_push_label("Mesh Inefficient Pick");
        let recorded = self.record_instances(ctx, pipeline);
        ctx.device.cmd_pop_label();
        ctx.device.cmd_end_render_pass();
        ctx.device.submit_offscreen()?;
        recorded?;
        ctx.device.wait_for_all_frames()?;

        self.read_texel(ctx.device, &color, x, y)
    }

    fn record_instances(&self, ctx: &mut PassContext<'_>, pipeline: Pipeline) -> RenderResult<()> {
        let visible = ctx.visible;
        let cache = ctx.cache;
        let slot = ctx.frame_slot;

        ctx.device.cmd_bind_pipeline(&pipeline);
        ctx.device.cmd_set_viewport(self.viewport, self.scissor);
        let perframe_offset = push_perframe(&mut ctx.global.transient, slot, &self.perframe);

        for material_group in group_instances(&visible.main_camera) {
            for mesh_group in &material_group.meshes {
                let mesh = cached_mesh(cache, mesh_group.mesh)?;
                ctx.device
                    .cmd_bind_descriptor_sets(pipeline.layout, 1, &[mesh.descriptor_set], &[]);
                ctx.device.cmd_bind_vertex_buffers(0, &[mesh.vertex_position_buffer]);
                ctx.device.cmd_bind_index_buffer(mesh.index_buffer);

                for batch in mesh_group.sub_batches() {
                    let arena = &mut ctx.global.transient;
                    let slice = arena.allocate_typed::<MeshInefficientPickPerdrawcallStorageBufferObject>(slot, 1);
                    let perdrawcall = &mut slice.data[0];
                    *perdrawcall = MeshInefficientPickPerdrawcallStorageBufferObject::zeroed();
                    for (i, instance) in batch.iter().enumerate() {
                        perdrawcall.model_matrices[i] = to_gpu_mat4(&instance.model_matrix);
                        perdrawcall.node_ids[i] = instance.node_id;
                        perdrawcall.enable_vertex_blendings[i] = if instance.is_skinned() { 1.0 } else { -1.0 };
                    }
                    let perdrawcall_offset = slice.dynamic_offset();
                    let joints_offset = write_joint_matrices(arena, slot, batch);

                    ctx.device.cmd_bind_descriptor_sets(
                        pipeline.layout,
                        0,
                        &[self.global_set],
                        &[perframe_offset, perdrawcall_offset, joints_offset],
                    );
                    ctx.device
                        .cmd_draw_indexed(mesh.index_count, batch.len() as u32, 0, 0, 0);
                }
            }
        }
        Ok(())
    }

    fn read_texel(&self, device: &mut dyn RenderDevice, color: &GpuImage, x: u32, y: u32) -> RenderResult<u32> {
        let width = u64::from(self.extent.width);
        let size = width * u64::from(self.extent.height) * 4;

        let buffer = device.create_buffer(&BufferDesc {
            size,
            usage: vk::BufferUsageFlags::TRANSFER_DST,
            location: MemoryLocation::HostVisible,
        })?;
        if let Err(err) = device.begin_single_time_commands() {
            device.destroy_buffer(buffer);
            return Err(err);
        }
        device.cmd_image_barrier(&ImageBarrier {
            image: color.image,
            aspect: vk::ImageAspectFlags::COLOR,
            old_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            new_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            src_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            dst_access: vk::AccessFlags::TRANSFER_READ,
            src_stage: vk::PipelineStageFlags::ALL_COMMANDS,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        });
        device.cmd_copy_image_to_buffer(color, vk::ImageLayout::TRANSFER_SRC_OPTIMAL, buffer);

        let texel = device
            .end_single_time_commands()
            .and_then(|()| device.read_buffer(buffer, (width * u64::from(y) + u64::from(x)) * 4, 4));
        device.destroy_buffer(buffer);

        let bytes: [u8; 4] = texel?
            .as_slice()
            .try_into()
            .map_err(|_| RenderError::InvalidOperation("short pick readback".to_string()))?;
        let node_id = u32::from_ne_bytes(bytes);
        log::debug!("Picked node {node_id} at ({x}, {y})");
        Ok(node_id)
    }
}

impl RenderPass for PickPass {
    type InitInfo = PickPassInitInfo;

    fn initialize(&mut self, ctx: &mut SetupContext<'_>, info: PickPassInitInfo) -> RenderResult<()> {
        self.per_mesh_layout = info.per_mesh_layout;
        let depth_format = ctx.device.depth_format();
        self.render_pass = ctx.device.create_render_pass(&pick_render_pass_desc(depth_format))?;
        self.create_framebuffer(ctx.device)
    }

    fn post_initialize(&mut self, ctx: &mut SetupContext<'_>) -> RenderResult<()> {
        if self.render_pass.is_null() {
            return Err(RenderError::InvalidOperation(
                "pick post_initialize before initialize".to_string(),
            ));
        }

        let dynamic_storage = vk::DescriptorType::STORAGE_BUFFER_DYNAMIC;
        let vertex = vk::ShaderStageFlags::VERTEX;
        self.global_layout = ctx.device.create_descriptor_set_layout(&[
            DescriptorBinding::new(0, dynamic_storage, vertex),
            DescriptorBinding::new(1, dynamic_storage, vertex),
            DescriptorBinding::new(2, dynamic_storage, vertex),
        ])?;

        self.pipeline = Some(ctx.device.create_graphics_pipeline(&GraphicsPipelineDesc {
            vertex_layout: mesh_position_layout(),
            ..GraphicsPipelineDesc::new(
                "Mesh Inefficient Pick",
                self.render_pass,
                0,
                vec![ShaderStageDesc::vertex(VERTEX_SHADER), ShaderStageDesc::fragment(FRAGMENT_SHADER)],
                vec![self.global_layout, self.per_mesh_layout],
            )
        })?);

        self.global_set = ctx.device.allocate_descriptor_set(self.global_layout)?;
        let arena = &ctx.global.transient;
        let ranges = [
            std::mem::size_of::<MeshInefficientPickPerframeStorageBufferObject>(),
            std::mem::size_of::<MeshInefficientPickPerdrawcallStorageBufferObject>(),
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
        ctx.device.update_descriptor_set(self.global_set, &writes);
        Ok(())
    }

    fn prepare_pass_data(&mut self, snapshot: &FrameSnapshot) {
        self.perframe = snapshot.pick_perframe;
    }

    fn draw(&mut self, _ctx: &mut PassContext<'_>) -> RenderResult<()> {
        Ok(())
    }

    fn update_after_resize(&mut self, ctx: &mut SetupContext<'_>) -> RenderResult<()> {
        self.recreate_framebuffer(ctx.device)
    }
}
