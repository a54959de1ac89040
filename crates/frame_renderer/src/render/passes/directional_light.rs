//! Directional light shadow pass
//!
//! Renders the directional shadow caster list into a single 4096² map using
//! the light's `proj_view`.

use ash::vk;

use crate::render::api::{ImageViewHandle, RenderResult, ShaderStageDesc};
use crate::render::common::{MeshDirectionalLightShadowPerframeStorageBufferObject, DIRECTIONAL_LIGHT_SHADOW_MAP_DIMENSION};
use crate::render::scene::FrameSnapshot;

use super::shadow::{ShadowPassCore, ShadowPassState};
use super::{PassContext, RenderPass, SetupContext};

const VERTEX_SHADER: &str = "mesh_directional_light_shadow.vert.spv";
const FRAGMENT_SHADER: &str = "mesh_directional_light_shadow.frag.spv";

/// Directional light shadow map pass
#[derive(Debug)]
pub struct DirectionalLightShadowPass {
    core: ShadowPassCore,
    perframe: MeshDirectionalLightShadowPerframeStorageBufferObject,
}

impl DirectionalLightShadowPass {
    /// Uninitialized pass
    pub fn new() -> Self {
        Self {
            core: ShadowPassCore::new("Directional Light Shadow", DIRECTIONAL_LIGHT_SHADOW_MAP_DIMENSION, 1),
            perframe: MeshDirectionalLightShadowPerframeStorageBufferObject::default(),
        }
    }

    /// Setup progress
    pub const fn state(&self) -> ShadowPassState {
        self.core.state()
    }

    /// Shadow map sampled by the main camera pass
    pub fn shadow_map_view(&self) -> Option<ImageViewHandle> {
        self.core.color_view()
    }
}

impl Default for DirectionalLightShadowPass {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderPass for DirectionalLightShadowPass {
    type InitInfo = ();

    fn initialize(&mut self, ctx: &mut SetupContext<'_>, _info: ()) -> RenderResult<()> {
        self.core.setup_attachments(ctx.device)?;
        self.core.setup_render_pass(ctx.device)?;
        self.core.setup_framebuffer(ctx.device)
    }

    fn post_initialize(&mut self, ctx: &mut SetupContext<'_>) -> RenderResult<()> {
        self.core.setup_pipeline(
            ctx.device,
            &ctx.global.layouts,
            vec![ShaderStageDesc::vertex(VERTEX_SHADER), ShaderStageDesc::fragment(FRAGMENT_SHADER)],
            vk::ShaderStageFlags::VERTEX,
        )?;
        self.core
            .setup_descriptor_set::<MeshDirectionalLightShadowPerframeStorageBufferObject>(
                ctx.device,
                &ctx.global.transient,
            )?;
        self.core.mark_drawable()
    }

    fn prepare_pass_data(&mut self, snapshot: &FrameSnapshot) {
        self.perframe = snapshot.directional_light_shadow_perframe;
    }

    fn draw(&mut self, ctx: &mut PassContext<'_>) -> RenderResult<()> {
        let visible = ctx.visible;
        self.core
            .record(ctx, &visible.directional_light, &self.perframe, true)
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{Mat4, Vec3};
    use crate::render::api::recording::Command;
    use crate::render::api::{ClearValue, RenderError};
    use crate::render::scene::{VisibleInstance, VisibleNodes};
    use crate::render::test_support::TestRenderer;

    fn ready_pass(renderer: &mut TestRenderer) -> DirectionalLightShadowPass {
        let mut pass = DirectionalLightShadowPass::new();
        pass.initialize(&mut renderer.setup(), ()).unwrap();
        assert_eq!(pass.state(), ShadowPassState::FramebufferReady);
        pass.post_initialize(&mut renderer.setup()).unwrap();
        pass
    }

    #[test]
    fn test_setup_reaches_drawable() {
        let mut renderer = TestRenderer::new();
        let pass = ready_pass(&mut renderer);
        assert_eq!(pass.state(), ShadowPassState::Drawable);
        assert!(pass.shadow_map_view().is_some());
    }

    #[test]
    fn test_draw_before_setup_is_rejected() {
        let mut renderer = TestRenderer::new();
        let mut pass = DirectionalLightShadowPass::new();
        let visible = VisibleNodes::default();
        let err = pass.draw(&mut renderer.frame(&visible)).unwrap_err();
        assert!(matches!(err, RenderError::InvalidOperation(_)));
    }

    #[test]
    fn test_post_initialize_needs_initialize() {
        let mut renderer = TestRenderer::new();
        let mut pass = DirectionalLightShadowPass::new();
        assert!(pass.post_initialize(&mut renderer.setup()).is_err());
        assert_eq!(pass.state(), ShadowPassState::Uninitialized);
    }

    #[test]
    fn test_draw_binds_positions_only() {
        let mut renderer = TestRenderer::new();
        let mesh = renderer.mesh(1, false);
        let material = renderer.material(1);
        let mut pass = ready_pass(&mut renderer);

        let mut snapshot = FrameSnapshot::default();
        snapshot.directional_light_shadow_perframe.light_proj_view[0][0] = 2.0;
        pass.prepare_pass_data(&snapshot);

        let visible = VisibleNodes {
            directional_light: (0..3)
                .map(|i| VisibleInstance::new(mesh, material, Mat4::new_translation(&Vec3::new(i as f32, 0.0, 0.0)), i))
                .collect(),
            ..VisibleNodes::default()
        };
        renderer.device.clear_commands();
        pass.draw(&mut renderer.frame(&visible)).unwrap();

        let commands = renderer.device.commands();
        let Some(Command::BeginRenderPass { extent, clear_values, .. }) =
            commands.iter().find(|c| matches!(c, Command::BeginRenderPass { .. }))
        else {
            panic!("render pass not begun");
        };
        assert_eq!(extent.width, DIRECTIONAL_LIGHT_SHADOW_MAP_DIMENSION);
        assert_eq!(clear_values[0], ClearValue::Color([1.0; 4]));

        let vertex_binds: Vec<_> = commands
            .iter()
            .filter_map(|c| match c {
                Command::BindVertexBuffers { buffers, .. } => Some(buffers.len()),
                _ => None,
            })
            .collect();
        assert_eq!(vertex_binds, vec![1]);
        assert!(!commands
            .iter()
            .any(|c| matches!(c, Command::BindDescriptorSets { first_set: 2, .. })));
        assert_eq!(renderer.device.draw_indexed_instances(), vec![3]);
        assert!(matches!(commands.last(), Some(Command::PopLabel)));
    }
}
