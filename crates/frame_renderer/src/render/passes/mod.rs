//! Render passes
//!
//! Every pass follows the same lifecycle:
//!
//! 1. `initialize`: attachments, render pass object and framebuffers
//! 2. `post_initialize`: pipelines and descriptor sets that need resources
//!    other passes create during their own `initialize`
//! 3. `prepare_pass_data`: copy this frame's per-frame objects out of the snapshot
//! 4. `draw`: record commands into the current frame's command buffer
//!
//! Passes with swapchain-sized attachments also rebuild them in
//! `update_after_resize` without being reconstructed.
//!
//! [`RenderPass`] has an associated init type, so the orchestrator dispatches
//! the per-frame hooks through the [`RenderPassMut`] sum type instead of trait
//! objects.

pub mod directional_light;
pub mod main_camera;
pub mod pick;
pub mod point_light;
pub mod shadow;

pub use directional_light::DirectionalLightShadowPass;
pub use main_camera::{MainCameraPass, MainCameraPassInitInfo};
pub use pick::{PickPass, PickPassInitInfo};
pub use point_light::PointLightShadowPass;
pub use shadow::ShadowPassState;

use crate::render::api::{RenderDevice, RenderPassHandle, RenderResult};
use crate::render::batching::BatchTarget;
use crate::render::config::RendererConfig;
use crate::render::resources::{GlobalRenderResources, ResourceCache};
use crate::render::scene::{FrameSnapshot, VisibleNodes};

/// Everything a pass may touch while creating GPU objects
pub struct SetupContext<'a> {
    /// Device
    pub device: &'a mut dyn RenderDevice,
    /// Shared layouts, samplers, ring buffer and lighting textures
    pub global: &'a GlobalRenderResources,
    /// Renderer configuration
    pub config: &'a RendererConfig,
}

/// Everything a pass may touch while recording a frame
pub struct PassContext<'a> {
    /// Device
    pub device: &'a mut dyn RenderDevice,
    /// Shared resources; the ring buffer is allocated from here
    pub global: &'a mut GlobalRenderResources,
    /// Cached meshes and materials
    pub cache: &'a ResourceCache,
    /// This frame's visible instances
    pub visible: &'a VisibleNodes,
    /// Frame slot being recorded
    pub frame_slot: usize,
    /// Acquired swapchain image
    pub swapchain_image_index: u32,
}

impl PassContext<'_> {
    /// Split out the state mesh batches are recorded against
    pub fn batch_target(&mut self) -> BatchTarget<'_> {
        BatchTarget {
            device: &mut *self.device,
            arena: &mut self.global.transient,
            cache: self.cache,
            frame_slot: self.frame_slot,
        }
    }
}

/// Pass lifecycle
pub trait RenderPass {
    /// Pass-specific inputs to `initialize`
    type InitInfo;

    /// Create attachments, the render pass object and framebuffers
    fn initialize(&mut self, ctx: &mut SetupContext<'_>, info: Self::InitInfo) -> RenderResult<()>;

    /// Create pipelines and descriptor sets
    fn post_initialize(&mut self, _ctx: &mut SetupContext<'_>) -> RenderResult<()> {
        Ok(())
    }

    /// Take this frame's per-frame objects
    fn prepare_pass_data(&mut self, snapshot: &FrameSnapshot);

    /// Record the pass
    fn draw(&mut self, ctx: &mut PassContext<'_>) -> RenderResult<()>;

    /// Rebuild swapchain-sized attachments, framebuffers and the descriptor sets reading them
    fn update_after_resize(&mut self, _ctx: &mut SetupContext<'_>) -> RenderResult<()> {
        Ok(())
    }
}

/// Mutable reference to one of the concrete passes
pub enum RenderPassMut<'a> {
    /// Directional light shadow map
    DirectionalShadow(&'a mut DirectionalLightShadowPass),
    /// Point light shadow maps
    PointShadow(&'a mut PointLightShadowPass),
    /// Main colour pass
    MainCamera(&'a mut MainCameraPass),
    /// Object id pass
    Pick(&'a mut PickPass),
}

impl RenderPassMut<'_> {
    /// Debug name
    pub const fn name(&self) -> &'static str {
        match self {
            Self::DirectionalShadow(_) => "directional light shadow",
            Self::PointShadow(_) => "point light shadow",
            Self::MainCamera(_) => "main camera",
            Self::Pick(_) => "pick",
        }
    }

    /// Forward to [`RenderPass::prepare_pass_data`]
    pub fn prepare_pass_data(&mut self, snapshot: &FrameSnapshot) {
        match self {
            Self::DirectionalShadow(pass) => pass.prepare_pass_data(snapshot),
            Self::PointShadow(pass) => pass.prepare_pass_data(snapshot),
            Self::MainCamera(pass) => pass.prepare_pass_data(snapshot),
            Self::Pick(pass) => pass.prepare_pass_data(snapshot),
        }
    }

    /// Forward to [`RenderPass::draw`]
    pub fn draw(&mut self, ctx: &mut PassContext<'_>) -> RenderResult<()> {
        match self {
            Self::DirectionalShadow(pass) => pass.draw(ctx),
            Self::PointShadow(pass) => pass.draw(ctx),
            Self::MainCamera(pass) => pass.draw(ctx),
            Self::Pick(pass) => pass.draw(ctx),
        }
    }

    /// Forward to [`RenderPass::update_after_resize`]
    pub fn update_after_resize(&mut self, ctx: &mut SetupContext<'_>) -> RenderResult<()> {
        match self {
            Self::DirectionalShadow(pass) => pass.update_after_resize(ctx),
            Self::PointShadow(pass) => pass.update_after_resize(ctx),
            Self::MainCamera(pass) => pass.update_after_resize(ctx),
            Self::Pick(pass) => pass.update_after_resize(ctx),
        }
    }
}

/// Recorder plugged into a main camera subpass
///
/// Particles record inside the forward lighting subpass and UI widgets inside
/// the UI subpass. Both renderers live outside this crate.
pub trait StageHook {
    /// Create pipelines against the main camera render pass
    fn initialize(
        &mut self,
        _device: &mut dyn RenderDevice,
        _render_pass: RenderPassHandle,
        _subpass: u32,
    ) -> RenderResult<()> {
        Ok(())
    }

    /// Record commands into the active subpass
    fn record(&mut self, ctx: &mut PassContext<'_>) -> RenderResult<()>;

    /// The swapchain was recreated
    fn update_after_resize(&mut self, _device: &mut dyn RenderDevice) -> RenderResult<()> {
        Ok(())
    }
}
