//! Mesh and material cache keyed by asset id
//!
//! Records are uploaded once on first request and live until the cache is
//! torn down. Draw lists refer to them through slot-map keys.

use std::collections::HashMap;

use slotmap::SlotMap;

use crate::render::api::{BufferHandle, RenderDevice, RenderResult, SamplerHandle};

use super::global::SharedLayouts;
use super::material::{MaterialRecord, MaterialSource};
use super::mesh::{MeshRecord, MeshSource};

slotmap::new_key_type! {
    /// Key of a cached mesh
    pub struct MeshKey;
    /// Key of a cached material
    pub struct MaterialKey;
}

/// Asset-layer identity of a mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshAssetId(pub u64);

/// Asset-layer identity of a material
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialAssetId(pub u64);

/// Upload counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Meshes uploaded
    pub mesh_uploads: usize,
    /// Materials uploaded
    pub material_uploads: usize,
}

/// Cache of device-resident meshes and materials
#[derive(Debug)]
pub struct ResourceCache {
    meshes: SlotMap<MeshKey, MeshRecord>,
    mesh_ids: HashMap<MeshAssetId, MeshKey>,
    materials: SlotMap<MaterialKey, MaterialRecord>,
    material_ids: HashMap<MaterialAssetId, MaterialKey>,
    layouts: SharedLayouts,
    null_descriptor: BufferHandle,
    material_sampler: SamplerHandle,
    stats: CacheStats,
}

impl ResourceCache {
    /// Empty cache building descriptor sets from the shared layouts
    pub fn new(layouts: SharedLayouts, null_descriptor: BufferHandle, material_sampler: SamplerHandle) -> Self {
        Self {
            meshes: SlotMap::with_key(),
            mesh_ids: HashMap::new(),
            materials: SlotMap::with_key(),
            material_ids: HashMap::new(),
            layouts,
            null_descriptor,
            material_sampler,
            stats: CacheStats::default(),
        }
    }

    /// Key of the mesh for `asset_id`, uploading `source` on first request
    pub fn get_or_create_mesh(
        &mut self,
        device: &mut dyn RenderDevice,
        asset_id: MeshAssetId,
        source: &MeshSource,
    ) -> RenderResult<MeshKey> {
        if let Some(&key) = self.mesh_ids.get(&asset_id) {
            return Ok(key);
        }

        let record = MeshRecord::upload(device, source, self.layouts.per_mesh, self.null_descriptor)?;
        log::debug!(
            "Uploaded mesh {:?}: {} vertices, {} indices, skinned: {}",
            asset_id,
            record.vertex_count,
            record.index_count,
            record.enable_vertex_blending
        );
        let key = self.meshes.insert(record);
        self.mesh_ids.insert(asset_id, key);
        self.stats.mesh_uploads += 1;
        Ok(key)
    }

    /// Key of the material for `asset_id`, uploading `source` on first request
    pub fn get_or_create_material(
        &mut self,
        device: &mut dyn RenderDevice,
        asset_id: MaterialAssetId,
        source: &MaterialSource,
    ) -> RenderResult<MaterialKey> {
        if let Some(&key) = self.material_ids.get(&asset_id) {
            return Ok(key);
        }

        let record = MaterialRecord::upload(device, source, self.layouts.per_material, self.material_sampler)?;
        log::debug!("Uploaded material {:?} (blend: {})", asset_id, record.is_blend);
        let key = self.materials.insert(record);
        self.material_ids.insert(asset_id, key);
        self.stats.material_uploads += 1;
        Ok(key)
    }

    /// Cached mesh
    pub fn mesh(&self, key: MeshKey) -> Option<&MeshRecord> {
        self.meshes.get(key)
    }

    /// Cached material
    pub fn material(&self, key: MaterialKey) -> Option<&MaterialRecord> {
        self.materials.get(key)
    }

    /// Key previously assigned to a mesh asset
    pub fn mesh_key(&self, asset_id: MeshAssetId) -> Option<MeshKey> {
        self.mesh_ids.get(&asset_id).copied()
    }

    /// Key previously assigned to a material asset
    pub fn material_key(&self, asset_id: MaterialAssetId) -> Option<MaterialKey> {
        self.material_ids.get(&asset_id).copied()
    }

    /// Upload counters
    pub const fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Destroy every record
    pub fn destroy(&mut self, device: &mut dyn RenderDevice) {
        for (_, mesh) in self.meshes.drain() {
            mesh.destroy(device);
        }
        for (_, material) in self.materials.drain() {
            material.destroy(device);
        }
        self.mesh_ids.clear();
        self.material_ids.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::api::recording::RecordingDevice;
    use crate::render::config::RendererConfig;
    use crate::render::resources::material::TextureData;
    use crate::render::resources::mesh::{MeshJointBinding, MeshVertex};
    use crate::render::resources::GlobalRenderResources;

    fn setup() -> (RecordingDevice, ResourceCache) {
        let mut device = RecordingDevice::new();
        let config = RendererConfig::default().with_transient_ring_size(4 * 1024 * 1024);
        let global = GlobalRenderResources::new(&mut device, &config).unwrap();
        let cache = ResourceCache::new(global.layouts, global.null_descriptor, global.samplers.material);
        (device, cache)
    }

    fn triangle(skinned: bool) -> MeshSource {
        MeshSource {
            vertices: vec![MeshVertex::default(); 3],
            indices: vec![0, 1, 2],
            joint_bindings: skinned.then(|| vec![MeshJointBinding::default(); 3]),
        }
    }

    #[test]
    fn test_mesh_uploaded_once() {
        let (mut device, mut cache) = setup();
        let first = cache.get_or_create_mesh(&mut device, MeshAssetId(7), &triangle(false)).unwrap();
        let uploads = device.upload_count();
        let second = cache.get_or_create_mesh(&mut device, MeshAssetId(7), &triangle(false)).unwrap();

        assert_eq!(first, second);
        assert_eq!(cache.stats().mesh_uploads, 1);
        assert_eq!(device.upload_count(), uploads);

        let mesh = cache.mesh(first).unwrap();
        assert_eq!(mesh.vertex_count, 3);
        assert_eq!(mesh.index_count, 3);
        assert!(mesh.vertex_joint_binding_buffer.is_none());
    }

    #[test]
    fn test_rigid_mesh_binds_null_descriptor() {
        let (mut device, mut cache) = setup();
        let key = cache.get_or_create_mesh(&mut device, MeshAssetId(1), &triangle(false)).unwrap();
        let set = cache.mesh(key).unwrap().descriptor_set;
        assert_eq!(device.bound_buffer(set, 0), Some(cache.null_descriptor));
    }

    #[test]
    fn test_skinned_mesh_binds_joint_buffer() {
        let (mut device, mut cache) = setup();
        let key = cache.get_or_create_mesh(&mut device, MeshAssetId(2), &triangle(true)).unwrap();
        let mesh = cache.mesh(key).unwrap();
        assert!(mesh.enable_vertex_blending);
        assert_eq!(device.bound_buffer(mesh.descriptor_set, 0), mesh.vertex_joint_binding_buffer);
    }

    #[test]
    fn test_material_uploaded_once_with_placeholders() {
        let (mut device, mut cache) = setup();
        let source = MaterialSource {
            base_color: Some(TextureData::solid([255, 0, 0, 255])),
            ..MaterialSource::default()
        };
        let first = cache.get_or_create_material(&mut device, MaterialAssetId(3), &source).unwrap();
        let second = cache.get_or_create_material(&mut device, MaterialAssetId(3), &source).unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.stats().material_uploads, 1);

        let material = cache.material(first).unwrap();
        assert_eq!(material.textures[0].format, ash::vk::Format::R8G8B8A8_SRGB);
        assert_eq!(device.image_texels(&material.textures[1]), &[128, 128, 128, 128]);
        assert_eq!(device.image_texels(&material.textures[0]), &[255, 0, 0, 255]);
    }

    #[test]
    fn test_distinct_ids_get_distinct_keys() {
        let (mut device, mut cache) = setup();
        let a = cache.get_or_create_mesh(&mut device, MeshAssetId(1), &triangle(false)).unwrap();
        let b = cache.get_or_create_mesh(&mut device, MeshAssetId(2), &triangle(false)).unwrap();
        assert_ne!(a, b);
        assert_eq!(cache.mesh_key(MeshAssetId(2)), Some(b));
        assert_eq!(cache.stats().mesh_uploads, 2);
    }
}
