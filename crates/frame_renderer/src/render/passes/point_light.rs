//! Point light shadow pass
//!
//! One 2048² layered target holds two layers per light. The geometry stage
//! fans each draw out to the layers of every active light, so the caster list
//! is batched once for all lights.

use ash::vk;

use crate::render::api::{ImageViewHandle, RenderResult, ShaderStageDesc};
use crate::render::common::{
    MeshPointLightShadowPerframeStorageBufferObject, MAX_POINT_LIGHT_COUNT, POINT_LIGHT_SHADOW_MAP_DIMENSION,
};
use crate::render::config::RenderFeatures;
use crate::render::scene::FrameSnapshot;

use super::shadow::{ShadowPassCore, ShadowPassState};
use super::{PassContext, RenderPass, SetupContext};

/// Layers of the point shadow target
pub const POINT_LIGHT_SHADOW_LAYERS: u32 = 2 * MAX_POINT_LIGHT_COUNT as u32;

const VERTEX_SHADER: &str = "mesh_point_light_shadow.vert.spv";
const GEOMETRY_SHADER: &str = "mesh_point_light_shadow.geom.spv";
const FRAGMENT_SHADER: &str = "mesh_point_light_shadow.frag.spv";

/// Point light shadow map pass
#[derive(Debug)]
pub struct PointLightShadowPass {
    core: ShadowPassCore,
    perframe: MeshPointLightShadowPerframeStorageBufferObject,
    enabled: bool,
}

impl PointLightShadowPass {
    /// Uninitialized pass
    pub fn new() -> Self {
        Self {
            core: ShadowPassCore::new(
                "Point Light Shadow",
                POINT_LIGHT_SHADOW_MAP_DIMENSION,
                POINT_LIGHT_SHADOW_LAYERS,
            ),
            perframe: MeshPointLightShadowPerframeStorageBufferObject::default(),
            enabled: true,
        }
    }

    /// Setup progress
    pub const fn state(&self) -> ShadowPassState {
        self.core.state()
    }

    /// Layered shadow map sampled by the main camera pass
    pub fn shadow_map_view(&self) -> Option<ImageViewHandle> {
        self.core.color_view()
    }

    /// Whether mesh draws are recorded
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Toggle mesh draws; the map is still cleared while disabled
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

impl Default for PointLightShadowPass {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderPass for PointLightShadowPass {
    type InitInfo = ();

    fn initialize(&mut self, ctx: &mut SetupContext<'_>, _info: ()) -> RenderResult<()> {
        self.enabled = ctx.config.features().contains(RenderFeatures::POINT_LIGHT_SHADOW);
        self.core.setup_attachments(ctx.device)?;
        self.core.setup_render_pass(ctx.device)?;
        self.core.setup_framebuffer(ctx.device)
    }

    fn post_initialize(&mut self, ctx: &mut SetupContext<'_>) -> RenderResult<()> {
        self.core.setup_pipeline(
            ctx.device,
            &ctx.global.layouts,
            vec![
                ShaderStageDesc::vertex(VERTEX_SHADER),
                ShaderStageDesc::geometry(GEOMETRY_SHADER),
                ShaderStageDesc::fragment(FRAGMENT_SHADER),
            ],
            vk::ShaderStageFlags::GEOMETRY | vk::ShaderStageFlags::FRAGMENT,
        )?;
        self.core
            .setup_descriptor_set::<MeshPointLightShadowPerframeStorageBufferObject>(ctx.device, &ctx.global.transient)?;
        self.core.mark_drawable()
    }

    fn prepare_pass_data(&mut self, snapshot: &FrameSnapshot) {
        self.perframe = snapshot.point_light_shadow_perframe;
    }

    fn draw(&mut self, ctx: &mut PassContext<'_>) -> RenderResult<()> {
        let visible = ctx.visible;
        self.core
            .record(ctx, &visible.point_lights, &self.perframe, self.enabled)
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Mat4;
    use crate::render::api::recording::Command;
    use crate::render::config::RendererConfig;
    use crate::render::scene::{VisibleInstance, VisibleNodes};
    use crate::render::test_support::TestRenderer;

    fn ready_pass(renderer: &mut TestRenderer) -> PointLightShadowPass {
        let mut pass = PointLightShadowPass::new();
        pass.initialize(&mut renderer.setup(), ()).unwrap();
        pass.post_initialize(&mut renderer.setup()).unwrap();
        pass
    }

    fn casters(renderer: &mut TestRenderer, count: u32) -> VisibleNodes {
        let mesh = renderer.mesh(1, false);
        let skinned = renderer.mesh(2, true);
        let material = renderer.material(1);
        let mut point_lights: Vec<_> = (0..count)
            .map(|i| VisibleInstance::new(mesh, material, Mat4::identity(), i + 1))
            .collect();
        point_lights.push(VisibleInstance::new(skinned, material, Mat4::identity(), 99).with_joints(vec![Mat4::identity()]));
        VisibleNodes {
            point_lights,
            ..VisibleNodes::default()
        }
    }

    #[test]
    fn test_layered_target() {
        let mut renderer = TestRenderer::new();
        let pass = ready_pass(&mut renderer);
        assert_eq!(pass.state(), ShadowPassState::Drawable);

        let framebuffer = renderer.device.framebuffers().last().cloned().unwrap();
        assert_eq!(framebuffer.layers, 30);
        assert_eq!(framebuffer.width, POINT_LIGHT_SHADOW_MAP_DIMENSION);

        let pipeline = renderer.device.pipelines().last().cloned().unwrap();
        let stages: Vec<_> = pipeline.shaders.iter().map(|s| s.stage).collect();
        assert_eq!(
            stages,
            vec![vk::ShaderStageFlags::VERTEX, vk::ShaderStageFlags::GEOMETRY, vk::ShaderStageFlags::FRAGMENT]
        );
        assert_eq!(pipeline.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(pipeline.depth_compare, vk::CompareOp::LESS);
    }

    #[test]
    fn test_draws_split_by_mesh_and_capacity() {
        let mut renderer = TestRenderer::new();
        let visible = casters(&mut renderer, 70);
        let mut pass = ready_pass(&mut renderer);

        renderer.device.clear_commands();
        pass.draw(&mut renderer.frame(&visible)).unwrap();
        assert_eq!(renderer.device.draw_indexed_instances(), vec![64, 6, 1]);

        let offsets: Vec<Vec<u32>> = renderer
            .device
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::BindDescriptorSets { first_set: 0, dynamic_offsets, .. } => Some(dynamic_offsets.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(offsets.len(), 3);
        assert_eq!(offsets[0][2], 0);
        assert_eq!(offsets[1][2], 0);
        assert_ne!(offsets[2][2], 0);
        assert!(offsets.iter().all(|o| o[0] == offsets[0][0]));
    }

    #[test]
    fn test_disabled_pass_still_clears() {
        let mut renderer = TestRenderer::with_config(RendererConfig::default().with_point_light_shadow(false));
        let visible = casters(&mut renderer, 4);
        let mut pass = ready_pass(&mut renderer);
        assert!(!pass.is_enabled());

        renderer.device.clear_commands();
        pass.draw(&mut renderer.frame(&visible)).unwrap();
        let commands = renderer.device.commands();
        assert!(commands.iter().any(|c| matches!(c, Command::BeginRenderPass { .. })));
        assert!(commands.iter().any(|c| matches!(c, Command::EndRenderPass)));
        assert!(renderer.device.draw_indexed_instances().is_empty());
    }
}
