//! Shared fixtures for pass tests

use crate::render::api::recording::RecordingDevice;
use crate::render::api::RenderDevice;
use crate::render::config::RendererConfig;
use crate::render::passes::{PassContext, SetupContext};
use crate::render::resources::{
    GlobalRenderResources, MaterialAssetId, MaterialKey, MaterialSource, MeshAssetId, MeshJointBinding, MeshKey,
    MeshSource, MeshVertex, ResourceCache,
};
use crate::render::scene::VisibleNodes;

const TEST_RING_SIZE: u64 = 16 * 1024 * 1024;

/// Recording device plus the shared resources every pass needs
pub struct TestRenderer {
    pub device: RecordingDevice,
    pub config: RendererConfig,
    pub global: GlobalRenderResources,
    pub cache: ResourceCache,
}

impl TestRenderer {
    pub fn new() -> Self {
        Self::with_config(RendererConfig::default())
    }

    pub fn with_config(config: RendererConfig) -> Self {
        let config = config.with_transient_ring_size(TEST_RING_SIZE);
        let mut device = RecordingDevice::new();
        let global = GlobalRenderResources::new(&mut device, &config).unwrap();
        let cache = ResourceCache::new(global.layouts, global.null_descriptor, global.samplers.material);
        Self {
            device,
            config,
            global,
            cache,
        }
    }

    pub fn setup(&mut self) -> SetupContext<'_> {
        SetupContext {
            device: &mut self.device,
            global: &self.global,
            config: &self.config,
        }
    }

    /// Context for the current frame slot, recording into swapchain image 0
    pub fn frame<'a>(&'a mut self, visible: &'a VisibleNodes) -> PassContext<'a> {
        let frame_slot = self.device.current_frame_index();
        PassContext {
            device: &mut self.device,
            global: &mut self.global,
            cache: &self.cache,
            visible,
            frame_slot,
            swapchain_image_index: 0,
        }
    }

    /// One-triangle mesh
    pub fn mesh(&mut self, id: u64, skinned: bool) -> MeshKey {
        let source = MeshSource {
            vertices: vec![MeshVertex::default(); 3],
            indices: vec![0, 1, 2],
            joint_bindings: skinned.then(|| {
                vec![
                    MeshJointBinding {
                        indices: [0, 0, 0, 0],
                        weights: [1.0, 0.0, 0.0, 0.0],
                    };
                    3
                ]
            }),
        };
        self.cache
            .get_or_create_mesh(&mut self.device, MeshAssetId(id), &source)
            .unwrap()
    }

    /// Material with placeholder textures
    pub fn material(&mut self, id: u64) -> MaterialKey {
        self.cache
            .get_or_create_material(&mut self.device, MaterialAssetId(id), &MaterialSource::default())
            .unwrap()
    }
}
