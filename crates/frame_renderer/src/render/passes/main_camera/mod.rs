//! Main camera pass
//!
//! One render pass with eight subpasses, recorded every frame into the
//! framebuffer of the acquired swapchain image:
//!
//! ```text
//! BasePass → DeferredLighting → ForwardLighting → ToneMapping
//!          → ColorGrading → Fxaa → Ui → CombineUi
//! ```
//!
//! The forward render path leaves the first two subpasses empty and lights
//! meshes directly in the forward subpass. Particles and UI widgets are drawn
//! by external [`StageHook`]s.

pub mod attachments;
pub mod post_process;

pub use attachments::{MainCameraAttachment, MainCameraAttachmentGraph, MainCameraSubpass, MainCameraTargets};
pub use post_process::{FullscreenStage, PostProcessChain};

use ash::vk;

use crate::foundation::math::GpuMat4;
use crate::render::api::{
    DescriptorBinding, DescriptorSetHandle, DescriptorSetLayoutHandle, DescriptorWrite, FramebufferHandle,
    GraphicsPipelineDesc, ImageViewHandle, Pipeline, RenderDevice, RenderError, RenderPassHandle, RenderResult,
    ShaderStageDesc, SwapchainInfo,
};
use crate::render::batching::{cached_mesh, push_perframe, record_mesh_batches, MeshBatchBinding};
use crate::render::common::{
    AxisStorageBufferObject, MeshInstance, MeshPerframeStorageBufferObject, MESH_PER_DRAWCALL_MAX_INSTANCE_COUNT,
    MESH_VERTEX_BLENDING_MAX_JOINT_COUNT,
};
use crate::render::config::{RenderFeatures, RenderPath};
use crate::render::resources::mesh::mesh_vertex_layout;
use crate::render::resources::{GlobalRenderResources, SharedLayouts, TransientArena};
use crate::render::scene::FrameSnapshot;

use super::{PassContext, RenderPass, SetupContext, StageHook};

const MESH_VERTEX_SHADER: &str = "mesh.vert.spv";
const MESH_GBUFFER_FRAGMENT_SHADER: &str = "mesh_gbuffer.frag.spv";
const MESH_LIGHTING_FRAGMENT_SHADER: &str = "mesh.frag.spv";
const DEFERRED_LIGHTING_VERTEX_SHADER: &str = "deferred_lighting.vert.spv";
const DEFERRED_LIGHTING_FRAGMENT_SHADER: &str = "deferred_lighting.frag.spv";
const SKYBOX_VERTEX_SHADER: &str = "skybox.vert.spv";
const SKYBOX_FRAGMENT_SHADER: &str = "skybox.frag.spv";
const AXIS_VERTEX_SHADER: &str = "axis.vert.spv";
const AXIS_FRAGMENT_SHADER: &str = "axis.frag.spv";

/// Unit cube drawn without vertex buffers
const SKYBOX_VERTEX_COUNT: u32 = 36;

/// `selected_axis` value meaning "nothing highlighted"
pub const NO_SELECTED_AXIS: u32 = 3;

/// Shadow maps sampled by the lighting shaders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MainCameraPassInitInfo {
    /// Directional light shadow map
    pub directional_shadow_view: ImageViewHandle,
    /// Layered point light shadow map
    pub point_shadow_view: ImageViewHandle,
}

#[derive(Debug, Clone, Copy)]
struct MainCameraPipelines {
    gbuffer: Pipeline,
    deferred_lighting: Pipeline,
    mesh_lighting: Pipeline,
    skybox: Pipeline,
    axis: Pipeline,
}

#[derive(Debug, Clone, Copy)]
struct MainCameraLayouts {
    gbuffer_input: DescriptorSetLayoutHandle,
    skybox: DescriptorSetLayoutHandle,
    axis: DescriptorSetLayoutHandle,
}

impl MainCameraLayouts {
    fn new(device: &mut dyn RenderDevice) -> RenderResult<Self> {
        let dynamic_storage = vk::DescriptorType::STORAGE_BUFFER_DYNAMIC;
        let vertex = vk::ShaderStageFlags::VERTEX;
        let fragment = vk::ShaderStageFlags::FRAGMENT;

        let gbuffer_bindings: Vec<DescriptorBinding> = (0..4)
            .map(|binding| DescriptorBinding::new(binding, vk::DescriptorType::INPUT_ATTACHMENT, fragment))
            .collect();
        Ok(Self {
            gbuffer_input: device.create_descriptor_set_layout(&gbuffer_bindings)?,
            skybox: device.create_descriptor_set_layout(&[
                DescriptorBinding::new(0, dynamic_storage, vertex),
                DescriptorBinding::new(1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, fragment),
            ])?,
            axis: device.create_descriptor_set_layout(&[
                DescriptorBinding::new(0, dynamic_storage, vertex),
                DescriptorBinding::new(1, dynamic_storage, vertex | fragment),
            ])?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct MainCameraSets {
    mesh_global: DescriptorSetHandle,
    gbuffer_input: DescriptorSetHandle,
    skybox: DescriptorSetHandle,
    axis: DescriptorSetHandle,
}

fn ring_write(arena: &TransientArena, binding: u32, object_size: usize) -> DescriptorWrite {
    DescriptorWrite::Buffer {
        binding,
        kind: vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
        buffer: arena.buffer(),
        offset: 0,
        range: arena.binding_range(object_size as u64),
    }
}

fn mesh_batch_binding(pipeline: Pipeline, sets: &MainCameraSets, perframe_offset: u32) -> MeshBatchBinding {
    MeshBatchBinding {
        pipeline,
        global_set: sets.mesh_global,
        perframe_offset,
        bind_material: true,
        full_vertex_streams: true,
    }
}

/// Main colour pass
pub struct MainCameraPass {
    graph: MainCameraAttachmentGraph,
    render_path: RenderPath,
    features: RenderFeatures,
    shadow_maps: Option<MainCameraPassInitInfo>,
    render_pass: RenderPassHandle,
    targets: Option<MainCameraTargets>,
    framebuffers: Vec<FramebufferHandle>,
    viewport: vk::Viewport,
    scissor: vk::Rect2D,
    pipelines: Option<MainCameraPipelines>,
    sets: Option<MainCameraSets>,
    post_process: Option<PostProcessChain>,
    perframe: MeshPerframeStorageBufferObject,
    axis: AxisStorageBufferObject,
    selected_axis: u32,
    particle_hook: Option<Box<dyn StageHook>>,
    ui_hook: Option<Box<dyn StageHook>>,
}

impl std::fmt::Debug for MainCameraPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainCameraPass")
            .field("render_path", &self.render_path)
            .field("features", &self.features)
            .field("render_pass", &self.render_pass)
            .field("framebuffers", &self.framebuffers.len())
            .field("particle_hook", &self.particle_hook.is_some())
            .field("ui_hook", &self.ui_hook.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for MainCameraPass {
    fn default() -> Self {
        Self::new()
    }
}

impl MainCameraPass {
    /// Uninitialized pass
    pub fn new() -> Self {
        Self {
            graph: MainCameraAttachmentGraph::new(false),
            render_path: RenderPath::Deferred,
            features: RenderFeatures::empty(),
            shadow_maps: None,
            render_pass: RenderPassHandle::NULL,
            targets: None,
            framebuffers: Vec::new(),
            viewport: vk::Viewport::default(),
            scissor: vk::Rect2D::default(),
            pipelines: None,
            sets: None,
            post_process: None,
            perframe: MeshPerframeStorageBufferObject::default(),
            axis: AxisStorageBufferObject::default(),
            selected_axis: NO_SELECTED_AXIS,
            particle_hook: None,
            ui_hook: None,
        }
    }

    /// Resolved subpass wiring
    pub const fn graph(&self) -> &MainCameraAttachmentGraph {
        &self.graph
    }

    /// Lighting path being recorded
    pub const fn render_path(&self) -> RenderPath {
        self.render_path
    }

    /// Render pass object, null before `initialize`
    pub const fn render_pass(&self) -> RenderPassHandle {
        self.render_pass
    }

    /// Framebuffer per swapchain image
    pub fn framebuffers(&self) -> &[FramebufferHandle] {
        &self.framebuffers
    }

    /// Swapchain-sized attachments
    pub const fn targets(&self) -> Option<&MainCameraTargets> {
        self.targets.as_ref()
    }

    /// Whether the axis gizmo is drawn
    pub const fn is_axis_visible(&self) -> bool {
        self.features.contains(RenderFeatures::AXIS)
    }

    /// Show or hide the axis gizmo
    pub fn set_axis_visible(&mut self, visible: bool) {
        self.features.set(RenderFeatures::AXIS, visible);
    }

    /// Highlight axis 0, 1 or 2; anything else clears the highlight
    pub fn set_selected_axis(&mut self, axis: usize) {
        self.selected_axis = match axis {
            0..=2 => axis as u32,
            _ => NO_SELECTED_AXIS,
        };
    }

    /// Install the recorder for the forward lighting subpass
    pub fn set_particle_hook(
        &mut self,
        device: &mut dyn RenderDevice,
        mut hook: Box<dyn StageHook>,
    ) -> RenderResult<()> {
        if !self.render_pass.is_null() {
            hook.initialize(device, self.render_pass, MainCameraSubpass::ForwardLighting.index())?;
        }
        self.particle_hook = Some(hook);
        Ok(())
    }

    /// Install the recorder for the UI subpass
    pub fn set_ui_hook(&mut self, device: &mut dyn RenderDevice, mut hook: Box<dyn StageHook>) -> RenderResult<()> {
        if !self.render_pass.is_null() {
            hook.initialize(device, self.render_pass, MainCameraSubpass::Ui.index())?;
        }
        self.ui_hook = Some(hook);
        Ok(())
    }

    /// Rewrite every binding that samples a global texture
    ///
    /// Call after [`GlobalRenderResources::upload_global_render_resource`].
    pub fn refresh_global_descriptors(
        &self,
        device: &mut dyn RenderDevice,
        global: &GlobalRenderResources,
    ) -> RenderResult<()> {
        let (Some(sets), Some(shadow_maps)) = (self.sets, self.shadow_maps) else {
            return Err(RenderError::InvalidOperation(
                "main camera descriptors refreshed before post_initialize".to_string(),
            ));
        };
        let samplers = &global.samplers;
        device.update_descriptor_set(
            sets.mesh_global,
            &[
                DescriptorWrite::sampled(3, global.ibl.brdf_lut.view, samplers.linear_clamp),
                DescriptorWrite::sampled(4, global.ibl.irradiance.view, samplers.irradiance),
                DescriptorWrite::sampled(5, global.ibl.specular.view, samplers.specular),
                DescriptorWrite::sampled(6, shadow_maps.point_shadow_view, samplers.linear_clamp),
                DescriptorWrite::sampled(7, shadow_maps.directional_shadow_view, samplers.linear_clamp),
            ],
        );
        device.update_descriptor_set(
            sets.skybox,
            &[DescriptorWrite::sampled(1, global.ibl.specular.view, samplers.specular)],
        );
        self.write_attachment_descriptors(device, global);
        Ok(())
    }

    fn create_framebuffers(&mut self, device: &mut dyn RenderDevice, swapchain: &SwapchainInfo) -> RenderResult<()> {
        let targets = MainCameraTargets::create(device, swapchain.extent)?;
        self.framebuffers = targets.create_framebuffers(device, self.render_pass, &swapchain.image_views)?;
        self.targets = Some(targets);
        self.viewport = swapchain.viewport;
        self.scissor = swapchain.scissor;
        Ok(())
    }

    fn destroy_framebuffers(&mut self, device: &mut dyn RenderDevice) {
        for framebuffer in self.framebuffers.drain(..) {
            device.destroy_framebuffer(framebuffer);
        }
        if let Some(targets) = self.targets.take() {
            targets.destroy(device);
        }
    }

    fn create_pipelines(
        &self,
        device: &mut dyn RenderDevice,
        shared: &SharedLayouts,
        layouts: &MainCameraLayouts,
    ) -> RenderResult<MainCameraPipelines> {
        let mesh_layouts = vec![shared.mesh_global, shared.per_mesh, shared.per_material];
        let rp = self.render_pass;

        let gbuffer = device.create_graphics_pipeline(&GraphicsPipelineDesc {
            vertex_layout: mesh_vertex_layout(),
            color_attachment_count: 3,
            ..GraphicsPipelineDesc::new(
                "Mesh GBuffer",
                rp,
                MainCameraSubpass::BasePass.index(),
                vec![
                    ShaderStageDesc::vertex(MESH_VERTEX_SHADER),
                    ShaderStageDesc::fragment(MESH_GBUFFER_FRAGMENT_SHADER),
                ],
                mesh_layouts.clone(),
            )
        })?;

        let deferred_lighting = device.create_graphics_pipeline(&GraphicsPipelineDesc::fullscreen(
            "Deferred Lighting",
            rp,
            MainCameraSubpass::DeferredLighting.index(),
            vec![
                ShaderStageDesc::vertex(DEFERRED_LIGHTING_VERTEX_SHADER),
                ShaderStageDesc::fragment(DEFERRED_LIGHTING_FRAGMENT_SHADER),
            ],
            vec![shared.mesh_global, layouts.gbuffer_input, layouts.skybox],
        ))?;

        let mesh_lighting = device.create_graphics_pipeline(&GraphicsPipelineDesc {
            vertex_layout: mesh_vertex_layout(),
            ..GraphicsPipelineDesc::new(
                "Mesh Lighting",
                rp,
                MainCameraSubpass::ForwardLighting.index(),
                vec![
                    ShaderStageDesc::vertex(MESH_VERTEX_SHADER),
                    ShaderStageDesc::fragment(MESH_LIGHTING_FRAGMENT_SHADER),
                ],
                mesh_layouts,
            )
        })?;

        // Drawn at the far plane behind everything already in the depth buffer
        let skybox = device.create_graphics_pipeline(&GraphicsPipelineDesc {
            cull_mode: vk::CullModeFlags::NONE,
            depth_write: false,
            depth_compare: vk::CompareOp::LESS_OR_EQUAL,
            ..GraphicsPipelineDesc::new(
                "Skybox",
                rp,
                MainCameraSubpass::ForwardLighting.index(),
                vec![
                    ShaderStageDesc::vertex(SKYBOX_VERTEX_SHADER),
                    ShaderStageDesc::fragment(SKYBOX_FRAGMENT_SHADER),
                ],
                vec![layouts.skybox],
            )
        })?;

        let axis = device.create_graphics_pipeline(&GraphicsPipelineDesc {
            vertex_layout: mesh_vertex_layout(),
            blend: true,
            cull_mode: vk::CullModeFlags::NONE,
            depth_test: false,
            depth_write: false,
            depth_compare: vk::CompareOp::ALWAYS,
            ..GraphicsPipelineDesc::new(
                "Axis",
                rp,
                MainCameraSubpass::Ui.index(),
                vec![
                    ShaderStageDesc::vertex(AXIS_VERTEX_SHADER),
                    ShaderStageDesc::fragment(AXIS_FRAGMENT_SHADER),
                ],
                vec![layouts.axis],
            )
        })?;

        Ok(MainCameraPipelines {
            gbuffer,
            deferred_lighting,
            mesh_lighting,
            skybox,
            axis,
        })
    }

    fn create_descriptor_sets(
        device: &mut dyn RenderDevice,
        global: &GlobalRenderResources,
        layouts: &MainCameraLayouts,
    ) -> RenderResult<MainCameraSets> {
        let sets = MainCameraSets {
            mesh_global: device.allocate_descriptor_set(global.layouts.mesh_global)?,
            gbuffer_input: device.allocate_descriptor_set(layouts.gbuffer_input)?,
            skybox: device.allocate_descriptor_set(layouts.skybox)?,
            axis: device.allocate_descriptor_set(layouts.axis)?,
        };

        let arena = &global.transient;
        let perframe_size = std::mem::size_of::<MeshPerframeStorageBufferObject>();
        device.update_descriptor_set(
            sets.mesh_global,
            &[
                ring_write(arena, 0, perframe_size),
                ring_write(
                    arena,
                    1,
                    std::mem::size_of::<MeshInstance>() * MESH_PER_DRAWCALL_MAX_INSTANCE_COUNT,
                ),
                ring_write(
                    arena,
                    2,
                    std::mem::size_of::<GpuMat4>()
                        * MESH_PER_DRAWCALL_MAX_INSTANCE_COUNT
                        * MESH_VERTEX_BLENDING_MAX_JOINT_COUNT,
                ),
            ],
        );
        device.update_descriptor_set(sets.skybox, &[ring_write(arena, 0, perframe_size)]);
        device.update_descriptor_set(
            sets.axis,
            &[
                ring_write(arena, 0, perframe_size),
                ring_write(arena, 1, std::mem::size_of::<AxisStorageBufferObject>()),
            ],
        );
        Ok(sets)
    }

    fn write_attachment_descriptors(&self, device: &mut dyn RenderDevice, global: &GlobalRenderResources) {
        let (Some(sets), Some(targets)) = (self.sets, self.targets.as_ref()) else {
            return;
        };
        let writes: Vec<DescriptorWrite> = self
            .graph
            .subpass(MainCameraSubpass::DeferredLighting)
            .inputs
            .iter()
            .zip(0u32..)
            .map(|(&attachment, binding)| DescriptorWrite::input_attachment(binding, targets.view(attachment)))
            .collect();
        device.update_descriptor_set(sets.gbuffer_input, &writes);

        if let Some(post_process) = &self.post_process {
            post_process.write_descriptors(device, targets, global);
        }
    }

    fn post_process(&self) -> RenderResult<&PostProcessChain> {
        self.post_process.as_ref().ok_or_else(|| {
            RenderError::InvalidOperation("main camera pass drawn before post_initialize".to_string())
        })
    }

    /// Every subpass between begin and end of the render pass
    ///
    /// Each labelled stage pops its label before an error is returned, so the
    /// caller only has to close the render pass.
    fn record_subpasses(
        &mut self,
        ctx: &mut PassContext<'_>,
        pipelines: &MainCameraPipelines,
        sets: &MainCameraSets,
        perframe_offset: u32,
    ) -> RenderResult<()> {
        let (viewport, scissor) = (self.viewport, self.scissor);

        if self.render_path == RenderPath::Deferred {
            ctx.device.cmd_push_label(MainCameraSubpass::BasePass.label());
            ctx.device.cmd_bind_pipeline(&pipelines.gbuffer);
            ctx.device.cmd_set_viewport(viewport, scissor);
            let visible = ctx.visible;
            let drawn = record_mesh_batches(
                &mut ctx.batch_target(),
                &visible.main_camera,
                &mesh_batch_binding(pipelines.gbuffer, sets, perframe_offset),
            );
            ctx.device.cmd_pop_label();
            drawn?;
            ctx.device.cmd_next_subpass();

            ctx.device.cmd_push_label(MainCameraSubpass::DeferredLighting.label());
            ctx.device.cmd_bind_pipeline(&pipelines.deferred_lighting);
            ctx.device.cmd_set_viewport(viewport, scissor);
            ctx.device.cmd_bind_descriptor_sets(
                pipelines.deferred_lighting.layout,
                0,
                &[sets.mesh_global, sets.gbuffer_input, sets.skybox],
                &[perframe_offset, perframe_offset, 0, 0],
            );
            ctx.device.cmd_draw(3, 1, 0, 0);
            ctx.device.cmd_pop_label();
            ctx.device.cmd_next_subpass();
        } else {
            ctx.device.cmd_next_subpass();
            ctx.device.cmd_next_subpass();
        }

        ctx.device.cmd_push_label(MainCameraSubpass::ForwardLighting.label());
        let forward = self.record_forward_lighting(ctx, pipelines, sets, perframe_offset);
        ctx.device.cmd_pop_label();
        forward?;
        ctx.device.cmd_next_subpass();

        let post_process = self.post_process()?;
        post_process.tone_mapping().record(ctx.device, viewport, scissor);
        ctx.device.cmd_next_subpass();

        post_process.color_grading().record(ctx.device, viewport, scissor);
        ctx.device.cmd_next_subpass();

        if let Some(fxaa) = post_process.fxaa() {
            fxaa.record(ctx.device, viewport, scissor);
        }
        ctx.device.cmd_next_subpass();

        ctx.device.cmd_push_label(MainCameraSubpass::Ui.label());
        ctx.device.cmd_clear_color_attachment(0, [0.0; 4], scissor.extent);
        let ui = self.record_ui(ctx, pipelines, sets, perframe_offset);
        ctx.device.cmd_pop_label();
        ui?;
        ctx.device.cmd_next_subpass();

        self.post_process()?.combine_ui().record(ctx.device, viewport, scissor);
        Ok(())
    }

    /// Forward-lit meshes (forward path only), the skybox, then particles
    fn record_forward_lighting(
        &mut self,
        ctx: &mut PassContext<'_>,
        pipelines: &MainCameraPipelines,
        sets: &MainCameraSets,
        perframe_offset: u32,
    ) -> RenderResult<()> {
        let (viewport, scissor) = (self.viewport, self.scissor);

        if self.render_path == RenderPath::Forward {
            ctx.device.cmd_bind_pipeline(&pipelines.mesh_lighting);
            ctx.device.cmd_set_viewport(viewport, scissor);
            let visible = ctx.visible;
            record_mesh_batches(
                &mut ctx.batch_target(),
                &visible.main_camera,
                &mesh_batch_binding(pipelines.mesh_lighting, sets, perframe_offset),
            )?;
        }

        ctx.device.cmd_push_label("Skybox");
        ctx.device.cmd_bind_pipeline(&pipelines.skybox);
        ctx.device.cmd_set_viewport(viewport, scissor);
        ctx.device
            .cmd_bind_descriptor_sets(pipelines.skybox.layout, 0, &[sets.skybox], &[perframe_offset]);
        ctx.device.cmd_draw(SKYBOX_VERTEX_COUNT, 1, 0, 0);
        ctx.device.cmd_pop_label();

        match self.particle_hook.as_mut() {
            Some(hook) => hook.record(ctx),
            None => Ok(()),
        }
    }

    /// Axis gizmo when visible, then UI widgets
    fn record_ui(
        &mut self,
        ctx: &mut PassContext<'_>,
        pipelines: &MainCameraPipelines,
        sets: &MainCameraSets,
        perframe_offset: u32,
    ) -> RenderResult<()> {
        if let (true, Some(axis_mesh)) = (self.features.contains(RenderFeatures::AXIS), ctx.visible.axis) {
            let mesh = cached_mesh(ctx.cache, axis_mesh)?;
            let mut axis = self.axis;
            axis.selected_axis = self.selected_axis;
            let axis_offset = push_perframe(&mut ctx.global.transient, ctx.frame_slot, &axis);

            ctx.device.cmd_push_label("Axis");
            ctx.device.cmd_bind_pipeline(&pipelines.axis);
            ctx.device.cmd_set_viewport(self.viewport, self.scissor);
            ctx.device
                .cmd_bind_descriptor_sets(pipelines.axis.layout, 0, &[sets.axis], &[perframe_offset, axis_offset]);
            ctx.device.cmd_bind_vertex_buffers(0, &mesh.vertex_buffers());
            ctx.device.cmd_bind_index_buffer(mesh.index_buffer);
            ctx.device.cmd_draw_indexed(mesh.index_count, 1, 0, 0, 0);
            ctx.device.cmd_pop_label();
        }

        match self.ui_hook.as_mut() {
            Some(hook) => hook.record(ctx),
            None => Ok(()),
        }
    }
}

impl RenderPass for MainCameraPass {
    type InitInfo = MainCameraPassInitInfo;

    fn initialize(&mut self, ctx: &mut SetupContext<'_>, info: MainCameraPassInitInfo) -> RenderResult<()> {
        self.graph = MainCameraAttachmentGraph::new(ctx.config.enable_fxaa);
        self.render_path = ctx.config.render_path;
        self.features = ctx.config.features();
        self.shadow_maps = Some(info);

        let swapchain = ctx.device.swapchain_info();
        let depth_format = ctx.device.depth_format();
        self.render_pass = ctx
            .device
            .create_render_pass(&self.graph.render_pass_desc(depth_format, swapchain.format))?;
        self.create_framebuffers(ctx.device, &swapchain)?;

        log::debug!(
            "Main camera pass: {:?} path, fxaa {}, {}x{}, {} framebuffers",
            self.render_path,
            self.graph.fxaa_enabled(),
            swapchain.extent.width,
            swapchain.extent.height,
            self.framebuffers.len()
        );
        Ok(())
    }

    fn post_initialize(&mut self, ctx: &mut SetupContext<'_>) -> RenderResult<()> {
        if self.render_pass.is_null() {
            return Err(RenderError::InvalidOperation(
                "main camera post_initialize before initialize".to_string(),
            ));
        }

        let layouts = MainCameraLayouts::new(ctx.device)?;
        self.pipelines = Some(self.create_pipelines(ctx.device, &ctx.global.layouts, &layouts)?);
        self.sets = Some(Self::create_descriptor_sets(ctx.device, ctx.global, &layouts)?);
        self.post_process = Some(PostProcessChain::new(ctx.device, self.render_pass, &self.graph)?);
        self.refresh_global_descriptors(ctx.device, ctx.global)?;

        let render_pass = self.render_pass;
        if let Some(hook) = self.particle_hook.as_mut() {
            hook.initialize(ctx.device, render_pass, MainCameraSubpass::ForwardLighting.index())?;
        }
        if let Some(hook) = self.ui_hook.as_mut() {
            hook.initialize(ctx.device, render_pass, MainCameraSubpass::Ui.index())?;
        }
        Ok(())
    }

    fn prepare_pass_data(&mut self, snapshot: &FrameSnapshot) {
        self.perframe = snapshot.mesh_perframe;
        self.axis = snapshot.axis;
    }

    fn draw(&mut self, ctx: &mut PassContext<'_>) -> RenderResult<()> {
        let (Some(pipelines), Some(sets), true) = (self.pipelines, self.sets, self.post_process.is_some()) else {
            return Err(RenderError::InvalidOperation(
                "main camera pass drawn before post_initialize".to_string(),
            ));
        };
        let framebuffer = *self
            .framebuffers
            .get(ctx.swapchain_image_index as usize)
            .ok_or_else(|| {
                RenderError::MissingResource(format!("main camera framebuffer {}", ctx.swapchain_image_index))
            })?;
        let perframe_offset = push_perframe(&mut ctx.global.transient, ctx.frame_slot, &self.perframe);

        ctx.device.cmd_begin_render_pass(
            self.render_pass,
            framebuffer,
            self.scissor.extent,
            &MainCameraAttachmentGraph::clear_values(),
        );
        let recorded = self.record_subpasses(ctx, &pipelines, &sets, perframe_offset);
        ctx.device.cmd_end_render_pass();
        recorded
    }

    fn update_after_resize(&mut self, ctx: &mut SetupContext<'_>) -> RenderResult<()> {
        if self.render_pass.is_null() {
            return Err(RenderError::InvalidOperation(
                "main camera resized before initialize".to_string(),
            ));
        }
        self.destroy_framebuffers(ctx.device);
        let swapchain = ctx.device.swapchain_info();
        self.create_framebuffers(ctx.device, &swapchain)?;
        self.write_attachment_descriptors(ctx.device, ctx.global);

        if let Some(hook) = self.particle_hook.as_mut() {
            hook.update_after_resize(ctx.device)?;
        }
        if let Some(hook) = self.ui_hook.as_mut() {
            hook.update_after_resize(ctx.device)?;
        }
        log::debug!(
            "Main camera attachments rebuilt at {}x{}",
            swapchain.extent.width,
            swapchain.extent.height
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::foundation::math::Mat4;
    use crate::render::api::recording::Command;
    use crate::render::api::ClearValue;
    use crate::render::config::RendererConfig;
    use crate::render::scene::{VisibleInstance, VisibleNodes};
    use crate::render::test_support::TestRenderer;

    fn shadow_maps() -> MainCameraPassInitInfo {
        MainCameraPassInitInfo {
            directional_shadow_view: ImageViewHandle(9001),
            point_shadow_view: ImageViewHandle(9002),
        }
    }

    fn ready_pass(renderer: &mut TestRenderer) -> MainCameraPass {
        let mut pass = MainCameraPass::new();
        pass.initialize(&mut renderer.setup(), shadow_maps()).unwrap();
        pass.post_initialize(&mut renderer.setup()).unwrap();
        pass
    }

    fn scene(renderer: &mut TestRenderer, count: u32) -> VisibleNodes {
        let mesh = renderer.mesh(1, false);
        let material = renderer.material(1);
        VisibleNodes {
            main_camera: (0..count)
                .map(|i| VisibleInstance::new(mesh, material, Mat4::identity(), i + 1))
                .collect(),
            ..VisibleNodes::default()
        }
    }

    fn labels(commands: &[Command]) -> Vec<&str> {
        commands
            .iter()
            .filter_map(|c| match c {
                Command::PushLabel(label) => Some(label.as_str()),
                _ => None,
            })
            .collect()
    }

    fn count(commands: &[Command], pred: impl Fn(&Command) -> bool) -> usize {
        commands.iter().filter(|c| pred(c)).count()
    }

    #[test]
    fn test_deferred_sequence() {
        let mut renderer = TestRenderer::new();
        let visible = scene(&mut renderer, 3);
        let mut pass = ready_pass(&mut renderer);

        renderer.device.clear_commands();
        pass.draw(&mut renderer.frame(&visible)).unwrap();
        let commands = renderer.device.commands();

        let Some(Command::BeginRenderPass { clear_values, .. }) = commands.first() else {
            panic!("expected the pass to begin first");
        };
        assert_eq!(clear_values.len(), 9);
        assert_eq!(clear_values[7], ClearValue::DepthStencil { depth: 1.0, stencil: 0 });
        assert!(matches!(commands.last(), Some(Command::EndRenderPass)));
        assert_eq!(count(commands, |c| matches!(c, Command::NextSubpass)), 7);

        assert_eq!(
            labels(commands),
            vec!["BasePass", "Deferred Lighting", "Forward Lighting", "Skybox", "Tone Map", "Color Grading", "UI", "Combine UI"]
        );
        assert_eq!(renderer.device.draw_indexed_instances(), vec![3]);

        let draws: Vec<u32> = commands
            .iter()
            .filter_map(|c| match c {
                Command::Draw { vertex_count, .. } => Some(*vertex_count),
                _ => None,
            })
            .collect();
        assert_eq!(draws, vec![3, 36, 3, 3, 3]);

        let deferred_offsets = commands.iter().find_map(|c| match c {
            Command::BindDescriptorSets { sets, dynamic_offsets, .. } if sets.len() == 3 => Some(dynamic_offsets.clone()),
            _ => None,
        });
        let offsets = deferred_offsets.unwrap();
        assert_eq!(offsets.len(), 4);
        assert_eq!(offsets[0], offsets[1]);

        assert_eq!(count(commands, |c| matches!(c, Command::ClearColorAttachment { attachment: 0, .. })), 1);
    }

    #[test]
    fn test_fxaa_adds_a_stage() {
        let mut renderer = TestRenderer::with_config(RendererConfig::default().with_fxaa(true));
        let visible = VisibleNodes::default();
        let mut pass = ready_pass(&mut renderer);
        assert_eq!(pass.graph().color_grading_output(), MainCameraAttachment::PostProcessOdd);

        renderer.device.clear_commands();
        pass.draw(&mut renderer.frame(&visible)).unwrap();
        let commands = renderer.device.commands();
        assert!(labels(commands).contains(&"FXAA"));
        assert_eq!(count(commands, |c| matches!(c, Command::NextSubpass)), 7);
        assert_eq!(count(commands, |c| matches!(c, Command::Draw { .. })), 6);
    }

    #[test]
    fn test_forward_path_lights_meshes_in_forward_subpass() {
        let mut renderer =
            TestRenderer::with_config(RendererConfig::default().with_render_path(RenderPath::Forward));
        let visible = scene(&mut renderer, 2);
        let mut pass = ready_pass(&mut renderer);

        renderer.device.clear_commands();
        pass.draw(&mut renderer.frame(&visible)).unwrap();
        let commands = renderer.device.commands();

        let found = labels(commands);
        assert!(!found.contains(&"BasePass"));
        assert!(!found.contains(&"Deferred Lighting"));
        assert_eq!(found[0], "Forward Lighting");

        let subpass_of_draw = commands
            .iter()
            .take_while(|c| !matches!(c, Command::DrawIndexed { .. }))
            .filter(|c| matches!(c, Command::NextSubpass))
            .count();
        assert_eq!(subpass_of_draw, MainCameraSubpass::ForwardLighting.index() as usize);
        assert_eq!(count(commands, |c| matches!(c, Command::NextSubpass)), 7);
    }

    #[test]
    fn test_axis_drawn_only_when_visible() {
        let mut renderer = TestRenderer::new();
        let axis_mesh = renderer.mesh(50, false);
        let visible = VisibleNodes {
            axis: Some(axis_mesh),
            ..VisibleNodes::default()
        };
        let mut pass = ready_pass(&mut renderer);

        renderer.device.clear_commands();
        pass.draw(&mut renderer.frame(&visible)).unwrap();
        assert!(!labels(renderer.device.commands()).contains(&"Axis"));

        pass.set_axis_visible(true);
        pass.set_selected_axis(1);
        renderer.device.clear_commands();
        pass.draw(&mut renderer.frame(&visible)).unwrap();
        let commands = renderer.device.commands();
        assert!(labels(commands).contains(&"Axis"));
        assert_eq!(renderer.device.draw_indexed_instances(), vec![1]);

        let axis_offset = commands
            .iter()
            .find_map(|c| match c {
                Command::BindDescriptorSets { dynamic_offsets, .. } if dynamic_offsets.len() == 2 => {
                    Some(dynamic_offsets[1])
                }
                _ => None,
            })
            .unwrap();
        let ring = renderer.global.transient.buffer();
        let axis: Vec<AxisStorageBufferObject> = renderer.device.read_mapped(ring, u64::from(axis_offset), 1);
        assert_eq!(axis[0].selected_axis, 1);

        pass.set_selected_axis(7);
        assert_eq!(pass.selected_axis, NO_SELECTED_AXIS);
    }

    #[test]
    fn test_resize_rebuilds_attachments() {
        let mut renderer = TestRenderer::new();
        let mut pass = ready_pass(&mut renderer);
        let old_view = pass.targets().unwrap().view(MainCameraAttachment::GbufferA);
        let framebuffer_count = pass.framebuffers().len();

        renderer.device.resize(vk::Extent2D { width: 1024, height: 768 });
        pass.update_after_resize(&mut renderer.setup()).unwrap();

        let targets = pass.targets().unwrap();
        assert_eq!(targets.extent().width, 1024);
        assert_ne!(targets.view(MainCameraAttachment::GbufferA), old_view);
        assert_eq!(pass.framebuffers().len(), framebuffer_count);
        assert_eq!(renderer.device.framebuffers().last().unwrap().height, 768);

        let sets = pass.sets.unwrap();
        assert_eq!(
            renderer.device.bound_view(sets.gbuffer_input, 0),
            Some(targets.view(MainCameraAttachment::GbufferA))
        );
    }

    #[test]
    fn test_global_samplers_bound() {
        let mut renderer = TestRenderer::new();
        let pass = ready_pass(&mut renderer);
        let sets = pass.sets.unwrap();
        assert_eq!(renderer.device.bound_view(sets.mesh_global, 6), Some(ImageViewHandle(9002)));
        assert_eq!(renderer.device.bound_view(sets.mesh_global, 7), Some(ImageViewHandle(9001)));
        assert_eq!(
            renderer.device.bound_view(sets.skybox, 1),
            Some(renderer.global.ibl.specular.view)
        );
    }

    #[test]
    fn test_draw_before_post_initialize() {
        let mut renderer = TestRenderer::new();
        let mut pass = MainCameraPass::new();
        pass.initialize(&mut renderer.setup(), shadow_maps()).unwrap();
        let visible = VisibleNodes::default();
        assert!(matches!(
            pass.draw(&mut renderer.frame(&visible)),
            Err(RenderError::InvalidOperation(_))
        ));
    }

    /// Keys minted by another cache, so nothing in the scene resolves
    fn unresolvable_scene() -> VisibleNodes {
        let mut other = TestRenderer::new();
        let mesh = other.mesh(1, false);
        let material = other.material(1);
        VisibleNodes {
            main_camera: vec![VisibleInstance::new(mesh, material, Mat4::identity(), 1)],
            axis: Some(mesh),
            ..VisibleNodes::default()
        }
    }

    fn assert_closed_cleanly(renderer: &TestRenderer) {
        let commands = renderer.device.commands();
        assert_eq!(count(commands, |c| matches!(c, Command::BeginRenderPass { .. })), 1);
        assert_eq!(count(commands, |c| matches!(c, Command::EndRenderPass)), 1);
        assert!(matches!(commands.last(), Some(Command::EndRenderPass)));
        assert_eq!(
            count(commands, |c| matches!(c, Command::PushLabel(_))),
            count(commands, |c| matches!(c, Command::PopLabel))
        );
        assert!(!renderer.device.is_render_pass_open());
    }

    #[test]
    fn test_missing_mesh_still_ends_pass() {
        for path in [RenderPath::Deferred, RenderPath::Forward] {
            let mut renderer = TestRenderer::with_config(RendererConfig::default().with_render_path(path));
            let visible = unresolvable_scene();
            let mut pass = ready_pass(&mut renderer);

            renderer.device.clear_commands();
            let result = pass.draw(&mut renderer.frame(&visible));
            assert!(matches!(result, Err(RenderError::MissingResource(_))), "{path:?}: {result:?}");
            assert_closed_cleanly(&renderer);
        }
    }

    #[test]
    fn test_missing_axis_mesh_still_ends_pass() {
        let mut renderer = TestRenderer::new();
        let visible = VisibleNodes {
            main_camera: Vec::new(),
            ..unresolvable_scene()
        };
        let mut pass = ready_pass(&mut renderer);
        pass.set_axis_visible(true);

        renderer.device.clear_commands();
        let result = pass.draw(&mut renderer.frame(&visible));
        assert!(matches!(result, Err(RenderError::MissingResource(_))));
        assert!(labels(renderer.device.commands()).contains(&"UI"));
        assert_closed_cleanly(&renderer);
    }

    struct FailingHook;

    impl StageHook for FailingHook {
        fn initialize(&mut self, _device: &mut dyn RenderDevice, _rp: RenderPassHandle, _subpass: u32) -> RenderResult<()> {
            Ok(())
        }

        fn record(&mut self, ctx: &mut PassContext<'_>) -> RenderResult<()> {
            ctx.device.cmd_push_label("atlas");
            ctx.device.cmd_pop_label();
            Err(RenderError::MissingResource("glyph atlas".to_string()))
        }
    }

    #[test]
    fn test_failing_hooks_still_end_pass() {
        for particles in [true, false] {
            let mut renderer = TestRenderer::new();
            let mut pass = ready_pass(&mut renderer);
            if particles {
                pass.set_particle_hook(&mut renderer.device, Box::new(FailingHook)).unwrap();
            } else {
                pass.set_ui_hook(&mut renderer.device, Box::new(FailingHook)).unwrap();
            }

            let visible = VisibleNodes::default();
            renderer.device.clear_commands();
            let result = pass.draw(&mut renderer.frame(&visible));
            assert!(matches!(result, Err(RenderError::MissingResource(_))));
            assert_closed_cleanly(&renderer);

            let subpasses = count(renderer.device.commands(), |c| matches!(c, Command::NextSubpass));
            let expected = if particles {
                MainCameraSubpass::ForwardLighting.index()
            } else {
                MainCameraSubpass::Ui.index()
            };
            assert_eq!(subpasses, expected as usize);
        }
    }

    struct CountingHook {
        calls: Rc<RefCell<Vec<String>>>,
        name: &'static str,
    }

    impl StageHook for CountingHook {
        fn initialize(&mut self, _device: &mut dyn RenderDevice, _rp: RenderPassHandle, subpass: u32) -> RenderResult<()> {
            self.calls.borrow_mut().push(format!("{} init {subpass}", self.name));
            Ok(())
        }

        fn record(&mut self, ctx: &mut PassContext<'_>) -> RenderResult<()> {
            ctx.device.cmd_push_label(self.name);
            ctx.device.cmd_pop_label();
            self.calls.borrow_mut().push(format!("{} record", self.name));
            Ok(())
        }
    }

    #[test]
    fn test_hooks_record_in_their_subpasses() {
        let mut renderer = TestRenderer::new();
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut pass = MainCameraPass::new();
        pass.set_particle_hook(
            &mut renderer.device,
            Box::new(CountingHook {
                calls: Rc::clone(&calls),
                name: "particles",
            }),
        )
        .unwrap();
        pass.initialize(&mut renderer.setup(), shadow_maps()).unwrap();
        pass.post_initialize(&mut renderer.setup()).unwrap();
        pass.set_ui_hook(
            &mut renderer.device,
            Box::new(CountingHook {
                calls: Rc::clone(&calls),
                name: "widgets",
            }),
        )
        .unwrap();

        let visible = VisibleNodes::default();
        renderer.device.clear_commands();
        pass.draw(&mut renderer.frame(&visible)).unwrap();

        assert_eq!(
            *calls.borrow(),
            vec!["particles init 2", "widgets init 6", "particles record", "widgets record"]
        );
        let found = labels(renderer.device.commands());
        let particles = found.iter().position(|l| *l == "particles").unwrap();
        let widgets = found.iter().position(|l| *l == "widgets").unwrap();
        assert!(found[..particles].contains(&"Forward Lighting"));
        assert_eq!(found[widgets - 1], "UI");
    }
}
