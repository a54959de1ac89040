//! Draw batching
//!
//! Visible instances are grouped by material, then by mesh, in the order each
//! key is first seen. Every mesh group is split into sub-batches of at most
//! [`MESH_PER_DRAWCALL_MAX_INSTANCE_COUNT`] instances, matching the fixed
//! arrays in the mesh shaders; each sub-batch becomes one instanced draw.

use std::collections::HashMap;

use crate::foundation::math::{to_gpu_mat4, GpuMat4};
use crate::render::api::{DescriptorSetHandle, Pipeline, RenderDevice, RenderError, RenderResult};
use crate::render::common::{
    MeshInstance, MESH_PER_DRAWCALL_MAX_INSTANCE_COUNT, MESH_VERTEX_BLENDING_MAX_JOINT_COUNT,
};
use crate::render::resources::transient::dynamic_offset;
use crate::render::resources::{MaterialKey, MeshKey, MeshRecord, ResourceCache, TransientArena};
use crate::render::scene::VisibleInstance;

/// Instances sharing one mesh
#[derive(Debug, Clone)]
pub struct MeshGroup<'a> {
    /// Mesh key
    pub mesh: MeshKey,
    /// Instances in input order
    pub instances: Vec<&'a VisibleInstance>,
}

impl<'a> MeshGroup<'a> {
    /// Consecutive chunks of at most `MESH_PER_DRAWCALL_MAX_INSTANCE_COUNT` instances
    pub fn sub_batches(&self) -> impl Iterator<Item = &[&'a VisibleInstance]> + '_ {
        self.instances.chunks(MESH_PER_DRAWCALL_MAX_INSTANCE_COUNT)
    }
}

/// Mesh groups sharing one material
#[derive(Debug, Clone)]
pub struct MaterialGroup<'a> {
    /// Material key
    pub material: MaterialKey,
    /// Mesh groups in first-seen order
    pub meshes: Vec<MeshGroup<'a>>,
}

/// Group instances by material, then mesh, preserving first-seen order
pub fn group_instances(instances: &[VisibleInstance]) -> Vec<MaterialGroup<'_>> {
    let mut groups: Vec<MaterialGroup<'_>> = Vec::new();
    let mut material_index: HashMap<MaterialKey, usize> = HashMap::new();
    let mut mesh_index: HashMap<(MaterialKey, MeshKey), usize> = HashMap::new();

    for instance in instances {
        let m = *material_index.entry(instance.material).or_insert_with(|| {
            groups.push(MaterialGroup {
                material: instance.material,
                meshes: Vec::new(),
            });
            groups.len() - 1
        });
        let meshes = &mut groups[m].meshes;
        let n = *mesh_index
            .entry((instance.material, instance.mesh))
            .or_insert_with(|| {
                meshes.push(MeshGroup {
                    mesh: instance.mesh,
                    instances: Vec::new(),
                });
                meshes.len() - 1
            });
        meshes[n].instances.push(instance);
    }
    groups
}

/// Whether any instance in the sub-batch reads joint matrices
pub fn any_skinned(batch: &[&VisibleInstance]) -> bool {
    batch.iter().any(|instance| instance.is_skinned())
}

/// Write the joint palettes of a sub-batch into the transient ring
///
/// Instance `i`'s joint `j` lands at `MESH_VERTEX_BLENDING_MAX_JOINT_COUNT * i + j`.
/// Returns 0 without allocating when nothing in the batch is skinned. The set 0
/// blending binding then resolves to the start of the ring and is never read,
/// since every instance has vertex blending disabled. This is unrelated to the
/// null descriptor buffer, which only stands in for a rigid mesh's joint
/// bindings in set 1.
///
/// # Panics
/// When an instance has more joints than the shaders accept.
pub fn write_joint_matrices(arena: &mut TransientArena, frame_slot: usize, batch: &[&VisibleInstance]) -> u32 {
    if !any_skinned(batch) {
        return 0;
    }
    let slice = arena.allocate_typed::<GpuMat4>(
        frame_slot,
        MESH_PER_DRAWCALL_MAX_INSTANCE_COUNT * MESH_VERTEX_BLENDING_MAX_JOINT_COUNT,
    );
    for (i, instance) in batch.iter().enumerate() {
        let Some(joints) = &instance.joint_matrices else {
            continue;
        };
        assert!(
            joints.len() <= MESH_VERTEX_BLENDING_MAX_JOINT_COUNT,
            "instance has {} joints, at most {MESH_VERTEX_BLENDING_MAX_JOINT_COUNT} supported",
            joints.len()
        );
        let base = MESH_VERTEX_BLENDING_MAX_JOINT_COUNT * i;
        for (j, joint) in joints.iter().enumerate() {
            slice.data[base + j] = to_gpu_mat4(joint);
        }
    }
    slice.dynamic_offset()
}

/// Write the per-instance array of a sub-batch into the transient ring
pub fn write_mesh_instances(arena: &mut TransientArena, frame_slot: usize, batch: &[&VisibleInstance]) -> u32 {
    assert!(batch.len() <= MESH_PER_DRAWCALL_MAX_INSTANCE_COUNT);
    let slice = arena.allocate_typed::<MeshInstance>(frame_slot, MESH_PER_DRAWCALL_MAX_INSTANCE_COUNT);
    for (entry, instance) in slice.data.iter_mut().zip(batch) {
        *entry = MeshInstance {
            enable_vertex_blending: if instance.is_skinned() { 1.0 } else { -1.0 },
            _padding_enable_vertex_blending: [0.0; 3],
            model_matrix: to_gpu_mat4(&instance.model_matrix),
        };
    }
    slice.dynamic_offset()
}

/// Look up a cached mesh referenced by a draw list
pub fn cached_mesh(cache: &ResourceCache, key: MeshKey) -> RenderResult<&MeshRecord> {
    cache
        .mesh(key)
        .ok_or_else(|| RenderError::MissingResource(format!("mesh {key:?} is not in the resource cache")))
}

/// How a pass binds its mesh draws
#[derive(Debug, Clone, Copy)]
pub struct MeshBatchBinding {
    /// Bound pipeline and layout
    pub pipeline: Pipeline,
    /// Set 0 with the perframe, perdrawcall and joint matrix dynamic bindings
    pub global_set: DescriptorSetHandle,
    /// Dynamic offset of this pass's perframe object
    pub perframe_offset: u32,
    /// Bind the material set at set 2
    pub bind_material: bool,
    /// Bind all three vertex streams instead of positions only
    pub full_vertex_streams: bool,
}

/// Frame-scoped state mesh batches are recorded against
pub struct BatchTarget<'a> {
    /// Recording device
    pub device: &'a mut dyn RenderDevice,
    /// Transient ring
    pub arena: &'a mut TransientArena,
    /// Cached meshes and materials
    pub cache: &'a ResourceCache,
    /// Current frame slot
    pub frame_slot: usize,
}

/// Record every sub-batch of `instances`, returning the number of draws
///
/// Per sub-batch: fill a perdrawcall slice and, when any instance is skinned,
/// a joint matrix slice; bind set 0 with `[perframe, perdrawcall, blending]`
/// and issue one instanced indexed draw.
pub fn record_mesh_batches(
    target: &mut BatchTarget<'_>,
    instances: &[VisibleInstance],
    binding: &MeshBatchBinding,
) -> RenderResult<usize> {
    let layout = binding.pipeline.layout;
    let mut draw_count = 0;

    for material_group in group_instances(instances) {
        if binding.bind_material {
            let material = target.cache.material(material_group.material).ok_or_else(|| {
                RenderError::MissingResource(format!(
                    "material {:?} is not in the resource cache",
                    material_group.material
                ))
            })?;
            target
                .device
                .cmd_bind_descriptor_sets(layout, 2, &[material.descriptor_set], &[]);
        }

        for mesh_group in &material_group.meshes {
            let mesh = cached_mesh(target.cache, mesh_group.mesh)?;
            target.device.cmd_bind_descriptor_sets(layout, 1, &[mesh.descriptor_set], &[]);
            if binding.full_vertex_streams {
                target.device.cmd_bind_vertex_buffers(0, &mesh.vertex_buffers());
            } else {
                target.device.cmd_bind_vertex_buffers(0, &[mesh.vertex_position_buffer]);
            }
            target.device.cmd_bind_index_buffer(mesh.index_buffer);

            for batch in mesh_group.sub_batches() {
                let perdrawcall_offset = write_mesh_instances(target.arena, target.frame_slot, batch);
                let blending_offset = write_joint_matrices(target.arena, target.frame_slot, batch);

                target.device.cmd_bind_descriptor_sets(
                    layout,
                    0,
                    &[binding.global_set],
                    &[binding.perframe_offset, perdrawcall_offset, blending_offset],
                );
                target
                    .device
                    .cmd_draw_indexed(mesh.index_count, batch.len() as u32, 0, 0, 0);
                draw_count += 1;
            }
        }
    }
    Ok(draw_count)
}

/// Push a per-frame object and return its dynamic offset
pub fn push_perframe<T: bytemuck::Pod>(arena: &mut TransientArena, frame_slot: usize, value: &T) -> u32 {
    dynamic_offset(arena.push(frame_slot, value))
}
