//! Attachment and subpass graph of the main camera pass
//!
//! Attachments and subpasses are named enums. The only configuration-dependent
//! wiring, where colour grading writes and where FXAA reads, is resolved once
//! into a [`MainCameraAttachmentGraph`] when the pass is set up.

use ash::vk;

use crate::render::api::{
    ClearValue, FramebufferDesc, FramebufferHandle, GpuImage, ImageDesc, ImageViewHandle, RenderDevice, RenderError, RenderPassDesc,
    RenderPassHandle, RenderResult, SubpassDesc,
};

/// Attachments of the main camera render pass, in attachment index order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MainCameraAttachment {
    /// Normal
    GbufferA,
    /// Metallic, roughness, shading model
    GbufferB,
    /// Albedo
    GbufferC,
    /// HDR ping buffer
    BackupOdd,
    /// HDR pong buffer
    BackupEven,
    /// Post-process ping buffer
    PostProcessOdd,
    /// Post-process pong buffer
    PostProcessEven,
    /// Scene depth
    Depth,
    /// Presented image
    SwapchainImage,
}

impl MainCameraAttachment {
    /// Every attachment in index order
    pub const ALL: [Self; 9] = [
        Self::GbufferA,
        Self::GbufferB,
        Self::GbufferC,
        Self::BackupOdd,
        Self::BackupEven,
        Self::PostProcessOdd,
        Self::PostProcessEven,
        Self::Depth,
        Self::SwapchainImage,
    ];

    /// Attachments the pass allocates itself (everything but the swapchain image)
    pub const OWNED: [Self; 8] = [
        Self::GbufferA,
        Self::GbufferB,
        Self::GbufferC,
        Self::BackupOdd,
        Self::BackupEven,
        Self::PostProcessOdd,
        Self::PostProcessEven,
        Self::Depth,
    ];

    /// Attachment index in the render pass
    pub const fn index(self) -> u32 {
        self as u32
    }

    /// Fixed format of the colour targets; depth and swapchain come from the device
    pub const fn color_format(self) -> Option<vk::Format> {
        match self {
            Self::GbufferA | Self::GbufferB => Some(vk::Format::R8G8B8A8_UNORM),
            Self::GbufferC => Some(vk::Format::R8G8B8A8_SRGB),
            Self::BackupOdd | Self::BackupEven | Self::PostProcessOdd | Self::PostProcessEven => {
                Some(vk::Format::R16G16B16A16_SFLOAT)
            }
            Self::Depth | Self::SwapchainImage => None,
        }
    }

    /// Image usage of owned attachments
    pub fn usage(self) -> vk::ImageUsageFlags {
        use vk::ImageUsageFlags as U;
        match self {
            Self::GbufferA => U::COLOR_ATTACHMENT | U::INPUT_ATTACHMENT | U::TRANSFER_SRC,
            Self::GbufferB | Self::GbufferC | Self::BackupOdd | Self::BackupEven => {
                U::COLOR_ATTACHMENT | U::INPUT_ATTACHMENT | U::TRANSIENT_ATTACHMENT
            }
            Self::PostProcessOdd | Self::PostProcessEven => U::COLOR_ATTACHMENT | U::INPUT_ATTACHMENT | U::SAMPLED,
            Self::Depth => U::DEPTH_STENCIL_ATTACHMENT | U::INPUT_ATTACHMENT | U::TRANSFER_SRC,
            Self::SwapchainImage => U::COLOR_ATTACHMENT,
        }
    }

    /// Store op; only the normal buffer, depth and the presented image survive the pass
    pub const fn store_op(self) -> vk::AttachmentStoreOp {
        match self {
            Self::GbufferA | Self::Depth | Self::SwapchainImage => vk::AttachmentStoreOp::STORE,
            _ => vk::AttachmentStoreOp::DONT_CARE,
        }
    }

    /// Layout left behind at the end of the pass
    pub const fn final_layout(self) -> vk::ImageLayout {
        match self {
            Self::Depth => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            Self::SwapchainImage => vk::ImageLayout::PRESENT_SRC_KHR,
            _ => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    /// Clear value at the start of the pass
    pub const fn clear_value(self) -> ClearValue {
        match self {
            Self::GbufferA | Self::GbufferB | Self::GbufferC => ClearValue::Color([0.0, 0.0, 0.0, 0.0]),
            Self::Depth => ClearValue::DepthStencil { depth: 1.0, stencil: 0 },
            _ => ClearValue::Color([0.0, 0.0, 0.0, 1.0]),
        }
    }
}

/// Subpasses of the main camera render pass, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MainCameraSubpass {
    /// G-buffer fill
    BasePass,
    /// Full-screen lighting from the G-buffer
    DeferredLighting,
    /// Skybox, particles and forward-lit meshes
    ForwardLighting,
    /// HDR to LDR
    ToneMapping,
    /// LUT colour grading
    ColorGrading,
    /// Anti-aliasing
    Fxaa,
    /// Debug axis and UI widgets
    Ui,
    /// Composite UI over the scene into the swapchain image
    CombineUi,
}

impl MainCameraSubpass {
    /// Every subpass in execution order
    pub const ALL: [Self; 8] = [
        Self::BasePass,
        Self::DeferredLighting,
        Self::ForwardLighting,
        Self::ToneMapping,
        Self::ColorGrading,
        Self::Fxaa,
        Self::Ui,
        Self::CombineUi,
    ];

    /// Subpass index
    pub const fn index(self) -> u32 {
        self as u32
    }

    /// Debug label
    pub const fn label(self) -> &'static str {
        match self {
            Self::BasePass => "BasePass",
            Self::DeferredLighting => "Deferred Lighting",
            Self::ForwardLighting => "Forward Lighting",
            Self::ToneMapping => "Tone Map",
            Self::ColorGrading => "Color Grading",
            Self::Fxaa => "FXAA",
            Self::Ui => "UI",
            Self::CombineUi => "Combine UI",
        }
    }
}

/// Attachments one subpass reads, writes and keeps alive
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubpassAttachments {
    /// Input attachments
    pub inputs: Vec<MainCameraAttachment>,
    /// Colour outputs
    pub colors: Vec<MainCameraAttachment>,
    /// Depth attachment
    pub depth: Option<MainCameraAttachment>,
    /// Attachments preserved through the subpass
    pub preserve: Vec<MainCameraAttachment>,
}

impl SubpassAttachments {
    fn to_desc(&self) -> SubpassDesc {
        SubpassDesc {
            inputs: self
                .inputs
                .iter()
                .map(|a| (a.index(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL))
                .collect(),
            colors: self
                .colors
                .iter()
                .map(|a| (a.index(), vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL))
                .collect(),
            depth: self
                .depth
                .map(|a| (a.index(), vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)),
            preserve: self.preserve.iter().map(|a| a.index()).collect(),
        }
    }
}

/// Subpass wiring with the FXAA indirection resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MainCameraAttachmentGraph {
    fxaa: bool,
    subpasses: Vec<SubpassAttachments>,
}

impl MainCameraAttachmentGraph {
    /// Resolve the graph for the given FXAA setting
    pub fn new(fxaa: bool) -> Self {
        use MainCameraAttachment as A;

        let (grading_output, fxaa_input) = if fxaa {
            (A::PostProcessOdd, A::PostProcessOdd)
        } else {
            (A::BackupOdd, A::BackupEven)
        };

        let subpasses = vec![
            SubpassAttachments {
                colors: vec![A::GbufferA, A::GbufferB, A::GbufferC],
                depth: Some(A::Depth),
                ..SubpassAttachments::default()
            },
            SubpassAttachments {
                inputs: vec![A::GbufferA, A::GbufferB, A::GbufferC, A::Depth],
                colors: vec![A::BackupOdd],
                ..SubpassAttachments::default()
            },
            SubpassAttachments {
                colors: vec![A::BackupOdd],
                depth: Some(A::Depth),
                ..SubpassAttachments::default()
            },
            SubpassAttachments {
                inputs: vec![A::BackupOdd],
                colors: vec![A::BackupEven],
                ..SubpassAttachments::default()
            },
            SubpassAttachments {
                inputs: vec![A::BackupEven],
                colors: vec![grading_output],
                ..SubpassAttachments::default()
            },
            SubpassAttachments {
                inputs: vec![fxaa_input],
                colors: vec![A::BackupOdd],
                ..SubpassAttachments::default()
            },
            SubpassAttachments {
                colors: vec![A::BackupEven],
                preserve: vec![A::BackupOdd],
                ..SubpassAttachments::default()
            },
            SubpassAttachments {
                inputs: vec![A::BackupOdd, A::BackupEven],
                colors: vec![A::SwapchainImage],
                ..SubpassAttachments::default()
            },
        ];

        Self { fxaa, subpasses }
    }

    /// Whether the FXAA subpass draws
    pub const fn fxaa_enabled(&self) -> bool {
        self.fxaa
    }

    /// Wiring of one subpass
    pub fn subpass(&self, subpass: MainCameraSubpass) -> &SubpassAttachments {
        &self.subpasses[subpass.index() as usize]
    }

    /// Where colour grading writes
    pub fn color_grading_output(&self) -> MainCameraAttachment {
        self.subpass(MainCameraSubpass::ColorGrading).colors[0]
    }

    /// What the FXAA subpass reads
    pub fn fxaa_input(&self) -> MainCameraAttachment {
        self.subpass(MainCameraSubpass::Fxaa).inputs[0]
    }

    /// Render pass description over the device's depth and swapchain formats
    pub fn render_pass_desc(&self, depth_format: vk::Format, swapchain_format: vk::Format) -> RenderPassDesc {
        let attachments = MainCameraAttachment::ALL
            .iter()
            .map(|&attachment| {
                let format = match attachment {
                    MainCameraAttachment::Depth => depth_format,
                    MainCameraAttachment::SwapchainImage => swapchain_format,
                    other => other.color_format().unwrap_or(vk::Format::UNDEFINED),
                };
                vk::AttachmentDescription {
                    format,
                    samples: vk::SampleCountFlags::TYPE_1,
                    load_op: vk::AttachmentLoadOp::CLEAR,
                    store_op: attachment.store_op(),
                    stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                    stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                    initial_layout: vk::ImageLayout::UNDEFINED,
                    final_layout: attachment.final_layout(),
                    ..Default::default()
                }
            })
            .collect();

        RenderPassDesc {
            attachments,
            subpasses: self.subpasses.iter().map(SubpassAttachments::to_desc).collect(),
            dependencies: subpass_dependencies(),
        }
    }

    /// Clear values in attachment order
    pub fn clear_values() -> Vec<ClearValue> {
        MainCameraAttachment::ALL.iter().map(|a| a.clear_value()).collect()
    }
}

/// External → DeferredLighting, then one dependency per consecutive subpass pair
pub fn subpass_dependencies() -> Vec<vk::SubpassDependency> {
    let stages = vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
    let src_access = vk::AccessFlags::SHADER_WRITE | vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
    let dst_access = vk::AccessFlags::SHADER_READ | vk::AccessFlags::COLOR_ATTACHMENT_READ;

    let mut dependencies = vec![vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: MainCameraSubpass::DeferredLighting.index(),
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
        src_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        dst_access_mask: vk::AccessFlags::SHADER_READ,
        dependency_flags: vk::DependencyFlags::empty(),
    }];

    dependencies.extend(MainCameraSubpass::ALL.windows(2).map(|pair| {
        let (src, dst) = (pair[0], pair[1]);
        let dependency_flags = if dst == MainCameraSubpass::Fxaa {
            vk::DependencyFlags::empty()
        } else {
            vk::DependencyFlags::BY_REGION
        };
        vk::SubpassDependency {
            src_subpass: src.index(),
            dst_subpass: dst.index(),
            src_stage_mask: stages,
            dst_stage_mask: stages,
            src_access_mask: src_access,
            dst_access_mask: dst_access,
            dependency_flags,
        }
    }));
    dependencies
}

/// Swapchain-sized images owned by the main camera pass
#[derive(Debug, Clone)]
pub struct MainCameraTargets {
    images: Vec<GpuImage>,
    extent: vk::Extent2D,
}

impl MainCameraTargets {
    /// Allocate every owned attachment at `extent`
    pub fn create(device: &mut dyn RenderDevice, extent: vk::Extent2D) -> RenderResult<Self> {
        let depth_format = device.depth_format();
        let mut images = Vec::with_capacity(MainCameraAttachment::OWNED.len());
        for attachment in MainCameraAttachment::OWNED {
            let (format, aspect) = match attachment.color_format() {
                Some(format) => (format, vk::ImageAspectFlags::COLOR),
                None => (depth_format, vk::ImageAspectFlags::DEPTH),
            };
            images.push(device.create_image(&ImageDesc::attachment(
                extent.width,
                extent.height,
                format,
                attachment.usage(),
                aspect,
            ))?);
        }
        Ok(Self { images, extent })
    }

    /// Image behind an owned attachment
    ///
    /// # Panics
    /// For [`MainCameraAttachment::SwapchainImage`], which the device owns.
    pub fn image(&self, attachment: MainCameraAttachment) -> &GpuImage {
        assert_ne!(attachment, MainCameraAttachment::SwapchainImage, "swapchain images belong to the device");
        &self.images[attachment.index() as usize]
    }

    /// View of an owned attachment
    pub fn view(&self, attachment: MainCameraAttachment) -> ImageViewHandle {
        self.image(attachment).view
    }

    /// Size every image was created at
    pub const fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// One framebuffer per swapchain image
    pub fn create_framebuffers(
        &self,
        device: &mut dyn RenderDevice,
        render_pass: RenderPassHandle,
        swapchain_views: &[ImageViewHandle],
    ) -> RenderResult<Vec<FramebufferHandle>> {
        if swapchain_views.is_empty() {
            return Err(RenderError::MissingResource("swapchain image views".to_string()));
        }
        swapchain_views
            .iter()
            .map(|&swapchain_view| {
                let mut attachments: Vec<ImageViewHandle> = self.images.iter().map(|image| image.view).collect();
                attachments.push(swapchain_view);
                device.create_framebuffer(&FramebufferDesc {
                    render_pass,
                    attachments,
                    width: self.extent.width,
                    height: self.extent.height,
                    layers: 1,
                })
            })
            .collect()
    }

    /// Release every image
    pub fn destroy(&self, device: &mut dyn RenderDevice) {
        for image in &self.images {
            device.destroy_image(image);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use MainCameraAttachment as A;
    use MainCameraSubpass as S;

    #[test]
    fn test_fxaa_toggle_rewires_grading_and_fxaa() {
        let off = MainCameraAttachmentGraph::new(false);
        assert_eq!(off.color_grading_output(), A::BackupOdd);
        assert_eq!(off.fxaa_input(), A::BackupEven);

        let on = MainCameraAttachmentGraph::new(true);
        assert!(on.fxaa_enabled());
        assert_eq!(on.color_grading_output(), A::PostProcessOdd);
        assert_eq!(on.fxaa_input(), A::PostProcessOdd);

        for subpass in S::ALL {
            if !matches!(subpass, S::ColorGrading | S::Fxaa) {
                assert_eq!(on.subpass(subpass), off.subpass(subpass), "{subpass:?}");
            }
        }
    }

    #[test]
    fn test_subpass_wiring() {
        let graph = MainCameraAttachmentGraph::new(false);
        assert_eq!(graph.subpass(S::DeferredLighting).inputs, vec![A::GbufferA, A::GbufferB, A::GbufferC, A::Depth]);
        assert_eq!(graph.subpass(S::ForwardLighting).depth, Some(A::Depth));
        assert_eq!(graph.subpass(S::Ui).colors, vec![A::BackupEven]);
        assert_eq!(graph.subpass(S::Ui).preserve, vec![A::BackupOdd]);
        assert_eq!(graph.subpass(S::CombineUi).colors, vec![A::SwapchainImage]);
    }

    #[test]
    fn test_dependency_table() {
        let dependencies = subpass_dependencies();
        assert_eq!(dependencies.len(), 8);

        let external = dependencies[0];
        assert_eq!(external.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(external.dst_subpass, S::DeferredLighting.index());
        assert_eq!(external.src_stage_mask, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(external.dst_access_mask, vk::AccessFlags::SHADER_READ);
        assert!(external.dependency_flags.is_empty());

        for (i, dependency) in dependencies[1..].iter().enumerate() {
            assert_eq!(dependency.src_subpass, i as u32);
            assert_eq!(dependency.dst_subpass, i as u32 + 1);
            assert!(dependency
                .src_access_mask
                .contains(vk::AccessFlags::SHADER_WRITE | vk::AccessFlags::COLOR_ATTACHMENT_WRITE));
            let by_region = dependency.dependency_flags.contains(vk::DependencyFlags::BY_REGION);
            assert_eq!(by_region, dependency.dst_subpass != S::Fxaa.index());
        }
    }

    #[test]
    fn test_render_pass_attachments() {
        let desc = MainCameraAttachmentGraph::new(true).render_pass_desc(vk::Format::D32_SFLOAT, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(desc.attachments.len(), 9);
        assert_eq!(desc.subpasses.len(), 8);
        assert!(desc.attachments.iter().all(|a| a.load_op == vk::AttachmentLoadOp::CLEAR));

        let gbuffer_c = desc.attachments[A::GbufferC.index() as usize];
        assert_eq!(gbuffer_c.format, vk::Format::R8G8B8A8_SRGB);
        assert_eq!(gbuffer_c.store_op, vk::AttachmentStoreOp::DONT_CARE);

        let depth = desc.attachments[A::Depth.index() as usize];
        assert_eq!(depth.format, vk::Format::D32_SFLOAT);
        assert_eq!(depth.final_layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

        let swapchain = desc.attachments[A::SwapchainImage.index() as usize];
        assert_eq!(swapchain.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(swapchain.store_op, vk::AttachmentStoreOp::STORE);

        assert_eq!(desc.subpasses[S::Ui.index() as usize].preserve, vec![A::BackupOdd.index()]);
    }

    #[test]
    fn test_clear_values() {
        let clears = MainCameraAttachmentGraph::clear_values();
        assert_eq!(clears.len(), 9);
        assert_eq!(clears[0], ClearValue::Color([0.0; 4]));
        assert_eq!(clears[A::BackupOdd.index() as usize], ClearValue::Color([0.0, 0.0, 0.0, 1.0]));
        assert_eq!(clears[A::Depth.index() as usize], ClearValue::DepthStencil { depth: 1.0, stencil: 0 });
    }
}
