//! Full-screen post-process stages of the main camera pass
//!
//! Tone mapping, colour grading, FXAA and the UI composite each draw one
//! full-screen triangle reading the previous stage's output. Their descriptor
//! sets point at swapchain-sized attachments and are rewritten after a resize.

use ash::vk;

use crate::render::api::{
    DescriptorBinding, DescriptorSetHandle, DescriptorSetLayoutHandle, DescriptorWrite, GraphicsPipelineDesc,
    Pipeline, RenderDevice, RenderPassHandle, RenderResult, ShaderStageDesc,
};
use crate::render::resources::GlobalRenderResources;

use super::attachments::{MainCameraAttachment, MainCameraAttachmentGraph, MainCameraSubpass, MainCameraTargets};

const POST_PROCESS_VERTEX_SHADER: &str = "post_process.vert.spv";
const TONE_MAPPING_SHADER: &str = "tone_mapping.frag.spv";
const COLOR_GRADING_SHADER: &str = "color_grading.frag.spv";
const FXAA_VERTEX_SHADER: &str = "fxaa.vert.spv";
const FXAA_FRAGMENT_SHADER: &str = "fxaa.frag.spv";
const COMBINE_UI_SHADER: &str = "combine_ui.frag.spv";

/// One full-screen draw with its own descriptor set
#[derive(Debug, Clone, Copy)]
pub struct FullscreenStage {
    subpass: MainCameraSubpass,
    layout: DescriptorSetLayoutHandle,
    set: DescriptorSetHandle,
    pipeline: Pipeline,
}

impl FullscreenStage {
    fn new(
        device: &mut dyn RenderDevice,
        render_pass: RenderPassHandle,
        subpass: MainCameraSubpass,
        bindings: &[DescriptorBinding],
        shaders: Vec<ShaderStageDesc>,
    ) -> RenderResult<Self> {
        let layout = device.create_descriptor_set_layout(bindings)?;
        let pipeline = device.create_graphics_pipeline(&GraphicsPipelineDesc::fullscreen(
            subpass.label(),
            render_pass,
            subpass.index(),
            shaders,
            vec![layout],
        ))?;
        let set = device.allocate_descriptor_set(layout)?;
        Ok(Self {
            subpass,
            layout,
            set,
            pipeline,
        })
    }

    /// Subpass the stage draws in
    pub const fn subpass(&self) -> MainCameraSubpass {
        self.subpass
    }

    /// Descriptor set read by the stage
    pub const fn descriptor_set(&self) -> DescriptorSetHandle {
        self.set
    }

    /// Record the full-screen triangle
    pub fn record(&self, device: &mut dyn RenderDevice, viewport: vk::Viewport, scissor: vk::Rect2D) {
        device.cmd_push_label(self.subpass.label());
        device.cmd_bind_pipeline(&self.pipeline);
        device.cmd_set_viewport(viewport, scissor);
        device.cmd_bind_descriptor_sets(self.pipeline.layout, 0, &[self.set], &[]);
        device.cmd_draw(3, 1, 0, 0);
        device.cmd_pop_label();
    }
}

/// Post-process stages in subpass order
#[derive(Debug, Clone)]
pub struct PostProcessChain {
    graph: MainCameraAttachmentGraph,
    tone_mapping: FullscreenStage,
    color_grading: FullscreenStage,
    fxaa: Option<FullscreenStage>,
    combine_ui: FullscreenStage,
}

impl PostProcessChain {
    /// Create layouts, pipelines and sets; the FXAA stage only exists when enabled
    pub fn new(
        device: &mut dyn RenderDevice,
        render_pass: RenderPassHandle,
        graph: &MainCameraAttachmentGraph,
    ) -> RenderResult<Self> {
        let input = vk::DescriptorType::INPUT_ATTACHMENT;
        let sampler = vk::DescriptorType::COMBINED_IMAGE_SAMPLER;
        let fragment = vk::ShaderStageFlags::FRAGMENT;
        let fullscreen = |fragment_shader| {
            vec![
                ShaderStageDesc::vertex(POST_PROCESS_VERTEX_SHADER),
                ShaderStageDesc::fragment(fragment_shader),
            ]
        };

        let tone_mapping = FullscreenStage::new(
            device,
            render_pass,
            MainCameraSubpass::ToneMapping,
            &[DescriptorBinding::new(0, input, fragment)],
            fullscreen(TONE_MAPPING_SHADER),
        )?;
        let color_grading = FullscreenStage::new(
            device,
            render_pass,
            MainCameraSubpass::ColorGrading,
            &[
                DescriptorBinding::new(0, input, fragment),
                DescriptorBinding::new(1, sampler, fragment),
            ],
            fullscreen(COLOR_GRADING_SHADER),
        )?;
        let fxaa = if graph.fxaa_enabled() {
            Some(FullscreenStage::new(
                device,
                render_pass,
                MainCameraSubpass::Fxaa,
                &[DescriptorBinding::new(0, sampler, fragment)],
                vec![
                    ShaderStageDesc::vertex(FXAA_VERTEX_SHADER),
                    ShaderStageDesc::fragment(FXAA_FRAGMENT_SHADER),
                ],
            )?)
        } else {
            None
        };
        let combine_ui = FullscreenStage::new(
            device,
            render_pass,
            MainCameraSubpass::CombineUi,
            &[
                DescriptorBinding::new(0, input, fragment),
                DescriptorBinding::new(1, input, fragment),
            ],
            fullscreen(COMBINE_UI_SHADER),
        )?;

        log::debug!("Post-process chain created (fxaa: {})", graph.fxaa_enabled());
        Ok(Self {
            graph: graph.clone(),
            tone_mapping,
            color_grading,
            fxaa,
            combine_ui,
        })
    }

    /// Point every stage at the current attachments
    pub fn write_descriptors(
        &self,
        device: &mut dyn RenderDevice,
        targets: &MainCameraTargets,
        global: &GlobalRenderResources,
    ) {
        let tone_input = self.graph.subpass(MainCameraSubpass::ToneMapping).inputs[0];
        device.update_descriptor_set(
            self.tone_mapping.set,
            &[DescriptorWrite::input_attachment(0, targets.view(tone_input))],
        );

        let grading_input = self.graph.subpass(MainCameraSubpass::ColorGrading).inputs[0];
        device.update_descriptor_set(
            self.color_grading.set,
            &[
                DescriptorWrite::input_attachment(0, targets.view(grading_input)),
                DescriptorWrite::sampled(1, global.color_grading_lut.view, global.samplers.linear_clamp),
            ],
        );

        if let Some(fxaa) = &self.fxaa {
            device.update_descriptor_set(
                fxaa.set,
                &[DescriptorWrite::sampled(
                    0,
                    targets.view(self.graph.fxaa_input()),
                    global.samplers.linear_clamp,
                )],
            );
        }

        device.update_descriptor_set(
            self.combine_ui.set,
            &[
                DescriptorWrite::input_attachment(0, targets.view(MainCameraAttachment::BackupOdd)),
                DescriptorWrite::input_attachment(1, targets.view(MainCameraAttachment::BackupEven)),
            ],
        );
    }

    /// Tone mapping stage
    pub const fn tone_mapping(&self) -> &FullscreenStage {
        &self.tone_mapping
    }

    /// Colour grading stage
    pub const fn color_grading(&self) -> &FullscreenStage {
        &self.color_grading
    }

    /// FXAA stage, when enabled
    pub const fn fxaa(&self) -> Option<&FullscreenStage> {
        self.fxaa.as_ref()
    }

    /// UI composite stage
    pub const fn combine_ui(&self) -> &FullscreenStage {
        &self.combine_ui
    }
}
