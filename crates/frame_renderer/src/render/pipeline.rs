//! Frame orchestration
//!
//! [`FrameOrchestrator`] owns the device, the shared resources, the resource
//! cache and the four passes, and drives them in a fixed order:
//!
//! ```text
//! wait slot fence → reset slot ring region → reset slot command pool
//!   → prepare_pass_data (all passes)
//!   → begin_frame
//!   → directional shadow → point shadow → main camera
//!   → submit_frame
//! ```
//!
//! Picking runs out of band through [`FrameOrchestrator::pick`] and stalls the
//! whole device while it reads back one texel.

use crate::config::ConfigError;
use crate::foundation::math::Vec2;
use crate::render::api::{FrameStatus, RenderDevice, RenderError, RenderResult};
use crate::render::config::{RenderFeatures, RendererConfig};
use crate::render::passes::{
    DirectionalLightShadowPass, MainCameraPass, MainCameraPassInitInfo, PassContext, PickPass, PickPassInitInfo,
    PointLightShadowPass, RenderPass, RenderPassMut, SetupContext, StageHook,
};
use crate::render::resources::{
    GlobalRenderResources, GlobalResourceSources, MaterialAssetId, MaterialKey, MaterialSource, MeshAssetId, MeshKey,
    MeshSource, ResourceCache,
};
use crate::render::scene::{FrameSnapshot, VisibleNodes};

/// Drives one device through shadow, main camera and pick passes
pub struct FrameOrchestrator<D: RenderDevice> {
    device: D,
    config: RendererConfig,
    features: RenderFeatures,
    global: GlobalRenderResources,
    cache: ResourceCache,
    directional: DirectionalLightShadowPass,
    point: PointLightShadowPass,
    main: MainCameraPass,
    pick: PickPass,
}

impl<D: RenderDevice> FrameOrchestrator<D> {
    /// Create shared resources and set up every pass
    ///
    /// All passes are initialized before any is post-initialized, so the main
    /// camera pass can bind the shadow maps the shadow passes created.
    pub fn new(mut device: D, config: RendererConfig) -> RenderResult<Self> {
        config
            .validate()
            .map_err(|reason| RenderError::Config(ConfigError::Invalid(reason)))?;

        let global = GlobalRenderResources::new(&mut device, &config)?;
        let cache = ResourceCache::new(global.layouts, global.null_descriptor, global.samplers.material);
        let features = config.features();

        let mut orchestrator = Self {
            device,
            config,
            features,
            global,
            cache,
            directional: DirectionalLightShadowPass::new(),
            point: PointLightShadowPass::new(),
            main: MainCameraPass::new(),
            pick: PickPass::new(),
        };
        if let Err(err) = orchestrator.setup_passes() {
            log::error!("Renderer setup failed: {err}");
            return Err(err);
        }
        orchestrator.main.set_axis_visible(features.contains(RenderFeatures::AXIS));

        log::info!(
            "Frame orchestrator ready: {:?} path, {} frames in flight, features {:?}",
            orchestrator.config.render_path,
            orchestrator.device.max_frames_in_flight(),
            features
        );
        Ok(orchestrator)
    }

    fn setup_passes(&mut self) -> RenderResult<()> {
        let mut ctx = SetupContext {
            device: &mut self.device,
            global: &self.global,
            config: &self.config,
        };

        self.directional.initialize(&mut ctx, ())?;
        self.point.initialize(&mut ctx, ())?;
        let (Some(directional_shadow_view), Some(point_shadow_view)) =
            (self.directional.shadow_map_view(), self.point.shadow_map_view())
        else {
            return Err(RenderError::MissingResource(
                "shadow maps missing after shadow pass initialization".to_string(),
            ));
        };
        self.main.initialize(
            &mut ctx,
            MainCameraPassInitInfo {
                directional_shadow_view,
                point_shadow_view,
            },
        )?;
        self.pick.initialize(
            &mut ctx,
            PickPassInitInfo {
                per_mesh_layout: self.global.layouts.per_mesh,
            },
        )?;

        self.directional.post_initialize(&mut ctx)?;
        self.point.post_initialize(&mut ctx)?;
        self.main.post_initialize(&mut ctx)?;
        self.pick.post_initialize(&mut ctx)
    }

    /// Record and present one frame
    ///
    /// Returns [`FrameStatus::SwapchainRecreated`] when the swapchain was
    /// rebuilt on acquire or present; size-dependent pass resources have
    /// already followed it by then. On acquire the frame is skipped.
    ///
    /// When a pass fails to record, the frame is abandoned through
    /// [`RenderDevice::abandon_frame`] before the error is returned, so the
    /// slot's fence is signalled and the next call does not block on it.
    pub fn render_frame(&mut self, snapshot: &FrameSnapshot, visible: &VisibleNodes) -> RenderResult<FrameStatus> {
        let frame_slot = self.device.current_frame_index();
        self.device.wait_for_current_frame()?;
        self.global.transient.reset(frame_slot);
        self.device.reset_command_pool()?;

        for mut pass in self.passes() {
            pass.prepare_pass_data(snapshot);
        }

        let image_index = match self.device.begin_frame()? {
            FrameStatus::Ready { image_index } => image_index,
            FrameStatus::SwapchainRecreated => {
                self.on_swapchain_recreated()?;
                return Ok(FrameStatus::SwapchainRecreated);
            }
        };

        let recorded = self.draw_passes(visible, frame_slot, image_index);
        let status = match recorded {
            Ok(()) => self.device.submit_frame()?,
            Err(err) => {
                log::error!("Frame recording failed, abandoning the frame: {err}");
                if self.device.abandon_frame()? == FrameStatus::SwapchainRecreated {
                    self.on_swapchain_recreated()?;
                }
                return Err(err);
            }
        };
        if status == FrameStatus::SwapchainRecreated {
            self.on_swapchain_recreated()?;
        }
        Ok(status)
    }

    fn draw_passes(&mut self, visible: &VisibleNodes, frame_slot: usize, image_index: u32) -> RenderResult<()> {
        let mut ctx = PassContext {
            device: &mut self.device,
            global: &mut self.global,
            cache: &self.cache,
            visible,
            frame_slot,
            swapchain_image_index: image_index,
        };
        for mut pass in [
            RenderPassMut::DirectionalShadow(&mut self.directional),
            RenderPassMut::PointShadow(&mut self.point),
            RenderPassMut::MainCamera(&mut self.main),
        ] {
            log::trace!("Recording {} pass", pass.name());
            pass.draw(&mut ctx)?;
        }
        Ok(())
    }

    fn passes(&mut self) -> [RenderPassMut<'_>; 4] {
        [
            RenderPassMut::DirectionalShadow(&mut self.directional),
            RenderPassMut::PointShadow(&mut self.point),
            RenderPassMut::MainCamera(&mut self.main),
            RenderPassMut::Pick(&mut self.pick),
        ]
    }

    /// Rebuild everything sized to the swapchain
    pub fn on_swapchain_recreated(&mut self) -> RenderResult<()> {
        let mut ctx = SetupContext {
            device: &mut self.device,
            global: &self.global,
            config: &self.config,
        };
        RenderPassMut::MainCamera(&mut self.main).update_after_resize(&mut ctx)?;
        self.pick.recreate_framebuffer(&mut self.device)?;

        let extent = self.device.swapchain_info().extent;
        log::info!("Swapchain recreated at {}x{}", extent.width, extent.height);
        Ok(())
    }

    /// Object id under `uv`, or 0 when nothing is there
    ///
    /// Renders `visible.main_camera` into the id target with the camera from
    /// the last prepared snapshot, then waits for every frame slot to finish.
    pub fn pick(&mut self, uv: Vec2, visible: &VisibleNodes) -> RenderResult<u32> {
        let frame_slot = self.device.current_frame_index();
        let mut ctx = PassContext {
            device: &mut self.device,
            global: &mut self.global,
            cache: &self.cache,
            visible,
            frame_slot,
            swapchain_image_index: 0,
        };
        self.pick.pick(&mut ctx, uv)
    }

    /// Show or hide the axis gizmo
    pub fn set_axis_visible(&mut self, visible: bool) {
        self.features.set(RenderFeatures::AXIS, visible);
        self.main.set_axis_visible(visible);
    }

    /// Highlight axis 0, 1 or 2; anything else clears the highlight
    pub fn set_selected_axis(&mut self, axis: usize) {
        self.main.set_selected_axis(axis);
    }

    /// Toggle point light shadow casting
    pub fn set_point_light_shadow_enabled(&mut self, enabled: bool) {
        self.features.set(RenderFeatures::POINT_LIGHT_SHADOW, enabled);
        self.point.set_enabled(enabled);
    }

    /// Cached mesh for `asset_id`, uploading `source` on first use
    pub fn get_or_create_mesh(&mut self, asset_id: MeshAssetId, source: &MeshSource) -> RenderResult<MeshKey> {
        self.cache.get_or_create_mesh(&mut self.device, asset_id, source)
    }

    /// Cached material for `asset_id`, uploading `source` on first use
    pub fn get_or_create_material(
        &mut self,
        asset_id: MaterialAssetId,
        source: &MaterialSource,
    ) -> RenderResult<MaterialKey> {
        self.cache.get_or_create_material(&mut self.device, asset_id, source)
    }

    /// Replace the IBL and colour-grading textures and rebind them
    pub fn upload_global_render_resource(&mut self, sources: &GlobalResourceSources) -> RenderResult<()> {
        self.global.upload_global_render_resource(&mut self.device, sources)?;
        self.main.refresh_global_descriptors(&mut self.device, &self.global)
    }

    /// Install the recorder for the forward lighting subpass
    pub fn set_particle_hook(&mut self, hook: Box<dyn StageHook>) -> RenderResult<()> {
        self.main.set_particle_hook(&mut self.device, hook)
    }

    /// Install the recorder for the UI subpass
    pub fn set_ui_hook(&mut self, hook: Box<dyn StageHook>) -> RenderResult<()> {
        self.main.set_ui_hook(&mut self.device, hook)
    }

    /// Features currently enabled
    pub const fn features(&self) -> RenderFeatures {
        self.features
    }

    /// Renderer configuration
    pub const fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Device
    pub const fn device(&self) -> &D {
        &self.device
    }

    /// Device, mutably
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Mesh and material cache
    pub const fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    /// Main camera pass
    pub const fn main_camera_pass(&self) -> &MainCameraPass {
        &self.main
    }
}

impl<D: RenderDevice> Drop for FrameOrchestrator<D> {
    fn drop(&mut self) {
        if let Err(err) = self.device.wait_idle() {
            log::error!("Device did not go idle before teardown: {err}");
        }
        self.cache.destroy(&mut self.device);
        self.global.destroy(&mut self.device);
        log::debug!("Frame orchestrator destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{Mat4, Vec3};
    use crate::render::api::recording::{Command, RecordingDevice};
    use crate::render::common::MeshInefficientPickPerdrawcallStorageBufferObject;
    use crate::render::resources::{MeshJointBinding, MeshVertex};
    use crate::render::scene::VisibleInstance;
    use ash::vk;
    use slotmap::SlotMap;

    fn test_config() -> RendererConfig {
        RendererConfig::default().with_transient_ring_size(16 * 1024 * 1024)
    }

    fn orchestrator() -> FrameOrchestrator<RecordingDevice> {
        FrameOrchestrator::new(RecordingDevice::new(), test_config()).unwrap()
    }

    fn triangle() -> MeshSource {
        MeshSource {
            vertices: vec![MeshVertex::default(); 3],
            indices: vec![0, 1, 2],
            joint_bindings: None,
        }
    }

    fn scene(renderer: &mut FrameOrchestrator<RecordingDevice>) -> VisibleNodes {
        let mesh = renderer.get_or_create_mesh(MeshAssetId(1), &triangle()).unwrap();
        let material = renderer
            .get_or_create_material(MaterialAssetId(1), &MaterialSource::default())
            .unwrap();
        let instance = |x: f32, id: u32| {
            VisibleInstance::new(mesh, material, Mat4::new_translation(&Vec3::new(x, 0.0, 0.0)), id)
        };
        VisibleNodes {
            main_camera: vec![instance(1.0, 7), instance(2.0, 8)],
            directional_light: vec![instance(1.0, 7)],
            point_lights: vec![instance(2.0, 8)],
            axis: None,
        }
    }

    fn lifecycle(commands: &[Command]) -> Vec<&'static str> {
        commands
            .iter()
            .filter_map(|c| match c {
                Command::WaitForFrame => Some("wait"),
                Command::ResetCommandPool => Some("reset"),
                Command::BeginFrame => Some("begin"),
                Command::PushLabel(label) if label == "Directional Light Shadow" => Some("directional"),
                Command::PushLabel(label) if label == "Point Light Shadow" => Some("point"),
                Command::PushLabel(label) if label == "BasePass" => Some("main"),
                Command::SubmitFrame => Some("submit"),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_frame_order() {
        let mut renderer = orchestrator();
        let visible = scene(&mut renderer);
        renderer.device_mut().clear_commands();

        let status = renderer.render_frame(&FrameSnapshot::default(), &visible).unwrap();
        assert!(matches!(status, FrameStatus::Ready { .. }));
        assert_eq!(
            lifecycle(renderer.device().commands()),
            vec!["wait", "reset", "begin", "directional", "point", "main", "submit"]
        );
    }

    #[test]
    fn test_frame_slots_rotate() {
        let mut renderer = orchestrator();
        let visible = scene(&mut renderer);
        let snapshot = FrameSnapshot::default();
        assert_eq!(renderer.device().current_frame_index(), 0);
        renderer.render_frame(&snapshot, &visible).unwrap();
        assert_eq!(renderer.device().current_frame_index(), 1);
        renderer.render_frame(&snapshot, &visible).unwrap();
        assert_eq!(renderer.device().current_frame_index(), 0);
    }

    #[test]
    fn test_slot_region_reset_each_frame() {
        let mut renderer = orchestrator();
        let visible = scene(&mut renderer);
        let snapshot = FrameSnapshot::default();

        renderer.render_frame(&snapshot, &visible).unwrap();
        let used = renderer.global.transient.region(0);
        assert!(used.end > used.begin);
        renderer.render_frame(&snapshot, &visible).unwrap();
        renderer.render_frame(&snapshot, &visible).unwrap();
        assert_eq!(renderer.global.transient.region(0), used);
    }

    #[test]
    fn test_recreated_on_acquire_skips_frame() {
        let mut renderer = orchestrator();
        let visible = scene(&mut renderer);
        renderer.device_mut().resize(vk::Extent2D { width: 1024, height: 768 });
        renderer.device_mut().force_swapchain_recreated();
        renderer.device_mut().clear_commands();

        let status = renderer.render_frame(&FrameSnapshot::default(), &visible).unwrap();
        assert_eq!(status, FrameStatus::SwapchainRecreated);
        assert!(!renderer
            .device()
            .commands()
            .iter()
            .any(|c| matches!(c, Command::BeginRenderPass { .. } | Command::SubmitFrame)));
        assert_eq!(renderer.main_camera_pass().targets().unwrap().extent().width, 1024);
        assert_eq!(renderer.pick.extent(), vk::Extent2D { width: 1024, height: 768 });

        let status = renderer.render_frame(&FrameSnapshot::default(), &visible).unwrap();
        assert!(matches!(status, FrameStatus::Ready { .. }));
    }

    #[test]
    fn test_pick_through_orchestrator() {
        let mut renderer = orchestrator();
        let visible = scene(&mut renderer);
        renderer.render_frame(&FrameSnapshot::default(), &visible).unwrap();
        renderer.device_mut().set_raster_hook(|input| {
            let perdrawcall = input.read_binding::<MeshInefficientPickPerdrawcallStorageBufferObject>(1, 1)[0];
            (0..input.instance_count as usize)
                .find(|&i| perdrawcall.model_matrices[i][3][0] == 2.0)
                .map(|i| perdrawcall.node_ids[i])
        });

        assert_eq!(renderer.pick(Vec2::new(0.5, 0.5), &visible).unwrap(), 8);
        assert_eq!(renderer.pick(Vec2::new(2.0, 0.5), &visible).unwrap(), 0);
    }

    /// A mesh key this renderer's cache never handed out
    fn unknown_mesh_key() -> MeshKey {
        let mut keys: SlotMap<MeshKey, ()> = SlotMap::with_key();
        keys.insert(());
        keys.insert(())
    }

    #[test]
    fn test_failed_frame_does_not_wedge_the_next() {
        let mut renderer = orchestrator();
        let good = scene(&mut renderer);
        let mut bad = good.clone();
        bad.main_camera[0].mesh = unknown_mesh_key();
        assert!(renderer.cache().mesh(bad.main_camera[0].mesh).is_none());

        renderer.device_mut().clear_commands();
        let snapshot = FrameSnapshot::default();
        let result = renderer.render_frame(&snapshot, &bad);
        assert!(matches!(result, Err(RenderError::MissingResource(_))));
        assert!(!renderer.device().is_render_pass_open());
        assert!(matches!(renderer.device().commands().last(), Some(Command::AbandonFrame)));
        assert!(!renderer
            .device()
            .commands()
            .iter()
            .any(|c| matches!(c, Command::SubmitFrame)));
        assert_eq!(renderer.device().current_frame_index(), 1);

        for _ in 0..3 {
            let status = renderer.render_frame(&snapshot, &good).unwrap();
            assert!(matches!(status, FrameStatus::Ready { .. }));
        }
    }

    #[test]
    fn test_mesh_upload_cached() {
        let mut renderer = orchestrator();
        let source = MeshSource {
            joint_bindings: Some(vec![
                MeshJointBinding {
                    indices: [0; 4],
                    weights: [1.0, 0.0, 0.0, 0.0],
                };
                3
            ]),
            ..triangle()
        };
        let first = renderer.get_or_create_mesh(MeshAssetId(9), &source).unwrap();
        let uploads = renderer.device().upload_count();
        let second = renderer.get_or_create_mesh(MeshAssetId(9), &source).unwrap();
        assert_eq!(first, second);
        assert_eq!(renderer.device().upload_count(), uploads);
        assert!(renderer.cache().mesh(first).unwrap().enable_vertex_blending);
    }

    #[test]
    fn test_axis_toggle_updates_features() {
        let mut renderer = orchestrator();
        assert!(!renderer.features().contains(RenderFeatures::AXIS));
        renderer.set_axis_visible(true);
        assert!(renderer.features().contains(RenderFeatures::AXIS));
        assert!(renderer.main_camera_pass().is_axis_visible());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = RendererConfig::default().with_transient_ring_size(1024);
        let result = FrameOrchestrator::new(RecordingDevice::new(), config);
        assert!(matches!(result, Err(RenderError::Config(ConfigError::Invalid(_)))));
    }

    #[test]
    fn test_global_upload_rebinds_descriptors() {
        let mut renderer = orchestrator();
        renderer
            .upload_global_render_resource(&GlobalResourceSources::default())
            .unwrap();
        assert!(renderer
            .device()
            .commands()
            .iter()
            .any(|c| matches!(c, Command::WaitIdle)));
    }
}
