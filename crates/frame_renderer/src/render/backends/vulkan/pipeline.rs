//! Shader modules, render pass objects and graphics pipelines

use ash::vk::{self, Handle};
use ash::Device;
use std::collections::HashMap;
use std::ffi::CStr;
use std::fs::File;
use std::path::{Path, PathBuf};

use super::context::VulkanError;
use crate::render::api::{GraphicsPipelineDesc, RenderError, RenderPassDesc, RenderResult};

const ENTRY_POINT: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

/// SPIR-V modules loaded from the shader directory, one per file name
///
/// Modules are loaded on first use and kept until the set is dropped, so
/// pipelines sharing a stage share the module.
pub struct ShaderSet {
    device: Device,
    directory: PathBuf,
    modules: HashMap<&'static str, vk::ShaderModule>,
}

impl ShaderSet {
    /// Resolve file names against `directory`
    pub fn new(device: Device, directory: impl Into<PathBuf>) -> Self {
        Self {
            device,
            directory: directory.into(),
            modules: HashMap::new(),
        }
    }

    /// Directory the set loads from
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Module for `file`, loading it on first use
    pub fn module(&mut self, file: &'static str) -> RenderResult<vk::ShaderModule> {
        if let Some(&module) = self.modules.get(file) {
            return Ok(module);
        }

        let path = self.directory.join(file);
        let code = File::open(&path)
            .and_then(|mut spv| ash::util::read_spv(&mut spv))
            .map_err(|source| RenderError::Shader {
                path: path.display().to_string(),
                source,
            })?;
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);
        let module = unsafe {
            self.device
                .create_shader_module(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        log::debug!("Loaded shader {}", path.display());
        self.modules.insert(file, module);
        Ok(module)
    }
}

impl Drop for ShaderSet {
    fn drop(&mut self) {
        unsafe {
            for &module in self.modules.values() {
                self.device.destroy_shader_module(module, None);
            }
        }
    }
}

/// Create a render pass from its plain description
pub fn create_render_pass(device: &Device, desc: &RenderPassDesc) -> RenderResult<vk::RenderPass> {
    let reference = |&(attachment, layout): &(u32, vk::ImageLayout)| vk::AttachmentReference { attachment, layout };

    let inputs: Vec<Vec<vk::AttachmentReference>> = desc
        .subpasses
        .iter()
        .map(|subpass| subpass.inputs.iter().map(reference).collect())
        .collect();
    let colors: Vec<Vec<vk::AttachmentReference>> = desc
        .subpasses
        .iter()
        .map(|subpass| subpass.colors.iter().map(reference).collect())
        .collect();
    let depths: Vec<Option<vk::AttachmentReference>> = desc
        .subpasses
        .iter()
        .map(|subpass| subpass.depth.as_ref().map(reference))
        .collect();

    let subpasses: Vec<vk::SubpassDescription> = desc
        .subpasses
        .iter()
        .enumerate()
        .map(|(i, subpass)| {
            let mut builder = vk::SubpassDescription::builder()
                .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                .input_attachments(&inputs[i])
                .color_attachments(&colors[i])
                .preserve_attachments(&subpass.preserve);
            if let Some(depth) = &depths[i] {
                builder = builder.depth_stencil_attachment(depth);
            }
            builder.build()
        })
        .collect();

    let create_info = vk::RenderPassCreateInfo::builder()
        .attachments(&desc.attachments)
        .subpasses(&subpasses)
        .dependencies(&desc.dependencies);

    let render_pass = unsafe {
        device
            .create_render_pass(&create_info, None)
            .map_err(VulkanError::Api)?
    };
    Ok(render_pass)
}

/// Create a graphics pipeline and its layout
pub fn create_graphics_pipeline(
    device: &Device,
    shaders: &mut ShaderSet,
    desc: &GraphicsPipelineDesc,
) -> RenderResult<(vk::Pipeline, vk::PipelineLayout)> {
    let mut stages = Vec::with_capacity(desc.shaders.len());
    for stage in &desc.shaders {
        stages.push(
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(stage.stage)
                .module(shaders.module(stage.file)?)
                .name(ENTRY_POINT)
                .build(),
        );
    }

    let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&desc.vertex_layout.bindings)
        .vertex_attribute_descriptions(&desc.vertex_layout.attributes);
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(desc.topology)
        .primitive_restart_enable(false);

    let (viewports, scissors) = match desc.fixed_extent {
        Some(extent) => {
            let (viewport, scissor) = crate::render::api::SwapchainInfo::full_extent(extent);
            (vec![viewport], vec![scissor])
        }
        None => (vec![vk::Viewport::default()], vec![vk::Rect2D::default()]),
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewports(&viewports)
        .scissors(&scissors);
    let dynamic_states = if desc.fixed_extent.is_some() {
        Vec::new()
    } else {
        vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR]
    };
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

    let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(desc.cull_mode)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .depth_bias_enable(false);
    let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(desc.depth_test)
        .depth_write_enable(desc.depth_write)
        .depth_compare_op(desc.depth_compare)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let blend_attachment = if desc.blend {
        vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
            .build()
    } else {
        vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build()
    };
    let blend_attachments = vec![blend_attachment; desc.color_attachment_count as usize];
    let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .attachments(&blend_attachments);

    let set_layouts: Vec<vk::DescriptorSetLayout> = desc
        .set_layouts
        .iter()
        .map(|layout| vk::DescriptorSetLayout::from_raw(layout.0))
        .collect();
    let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
    let layout = unsafe {
        device
            .create_pipeline_layout(&layout_info, None)
            .map_err(VulkanError::Api)?
    };

    let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blending)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(vk::RenderPass::from_raw(desc.render_pass.0))
        .subpass(desc.subpass);

    let created = unsafe {
        device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
    };
    match created {
        Ok(pipelines) => match pipelines.first() {
            Some(&pipeline) => {
                log::debug!("Pipeline '{}' created for subpass {}", desc.name, desc.subpass);
                Ok((pipeline, layout))
            }
            None => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                Err(RenderError::InvalidOperation(format!("pipeline '{}' was not created", desc.name)))
            }
        },
        Err((_, err)) => {
            log::error!("Pipeline '{}' creation failed: {err:?}", desc.name);
            unsafe { device.destroy_pipeline_layout(layout, None) };
            Err(VulkanError::Api(err).into())
        }
    }
}
