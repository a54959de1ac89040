//! Mesh source data and GPU mesh records

use ash::vk;

use crate::render::api::{
    BufferHandle, DescriptorSetHandle, DescriptorSetLayoutHandle, DescriptorWrite, RenderDevice, RenderError,
    RenderResult,
};
use crate::render::common::{
    MeshVertexJointBinding, MeshVertexPosition, MeshVertexVarying, MeshVertexVaryingEnableBlending,
    NULL_DESCRIPTOR_BUFFER_SIZE,
};

use super::upload::PartialUpload;

/// Interleaved source vertex
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MeshVertex {
    /// Model-space position
    pub position: [f32; 3],
    /// Unit normal
    pub normal: [f32; 3],
    /// Unit tangent
    pub tangent: [f32; 3],
    /// Texture coordinate
    pub texcoord: [f32; 2],
}

/// Up to four joint influences of one source vertex
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MeshJointBinding {
    /// Joint indices
    pub indices: [i32; 4],
    /// Raw weights, renormalized on upload
    pub weights: [f32; 4],
}

impl MeshJointBinding {
    /// Weights scaled to sum to one; an all-zero set passes through unchanged
    pub fn normalized_weights(&self) -> [f32; 4] {
        let total: f32 = self.weights.iter().sum();
        let inv_total = if total == 0.0 { 1.0 } else { 1.0 / total };
        self.weights.map(|w| w * inv_total)
    }
}

/// Decoded mesh handed over by the asset layer
#[derive(Debug, Clone, Default)]
pub struct MeshSource {
    /// Vertices
    pub vertices: Vec<MeshVertex>,
    /// Triangle list indices
    pub indices: Vec<u16>,
    /// One binding per vertex for skinned meshes
    pub joint_bindings: Option<Vec<MeshJointBinding>>,
}

impl MeshSource {
    /// Whether the mesh is skinned
    pub const fn enable_vertex_blending(&self) -> bool {
        self.joint_bindings.is_some()
    }

    /// Split the interleaved vertices into the three vertex streams
    pub fn split_streams(
        &self,
    ) -> (
        Vec<MeshVertexPosition>,
        Vec<MeshVertexVaryingEnableBlending>,
        Vec<MeshVertexVarying>,
    ) {
        let positions = self
            .vertices
            .iter()
            .map(|v| MeshVertexPosition { position: v.position })
            .collect();
        let varyings_blending = self
            .vertices
            .iter()
            .map(|v| MeshVertexVaryingEnableBlending {
                normal: v.normal,
                tangent: v.tangent,
            })
            .collect();
        let varyings = self
            .vertices
            .iter()
            .map(|v| MeshVertexVarying { texcoord: v.texcoord })
            .collect();
        (positions, varyings_blending, varyings)
    }

    /// Joint records expanded per index, with normalized weights
    pub fn index_joint_bindings(&self) -> RenderResult<Option<Vec<MeshVertexJointBinding>>> {
        let Some(bindings) = &self.joint_bindings else {
            return Ok(None);
        };
        self.indices
            .iter()
            .map(|&index| {
                let binding = bindings.get(usize::from(index)).ok_or_else(|| {
                    RenderError::InvalidOperation(format!(
                        "index {index} has no joint binding ({} bindings)",
                        bindings.len()
                    ))
                })?;
                Ok(MeshVertexJointBinding {
                    indices: binding.indices,
                    weights: binding.normalized_weights(),
                })
            })
            .collect::<RenderResult<Vec<_>>>()
            .map(Some)
    }
}

/// Device-resident mesh
#[derive(Debug, Clone)]
pub struct MeshRecord {
    /// Skinned mesh
    pub enable_vertex_blending: bool,
    /// Vertices per stream
    pub vertex_count: u32,
    /// 16-bit indices
    pub index_count: u32,
    /// Binding 0
    pub vertex_position_buffer: BufferHandle,
    /// Binding 1
    pub vertex_varying_enable_blending_buffer: BufferHandle,
    /// Binding 2
    pub vertex_varying_buffer: BufferHandle,
    /// Per-index joint records; `None` for rigid meshes
    pub vertex_joint_binding_buffer: Option<BufferHandle>,
    /// Index buffer
    pub index_buffer: BufferHandle,
    /// Per-mesh set (set 1) pointing at the joint records or the null buffer
    pub descriptor_set: DescriptorSetHandle,
}

impl MeshRecord {
    /// Upload every stream and build the per-mesh descriptor set
    ///
    /// Buffers already uploaded are destroyed again when a later part fails.
    pub fn upload(
        device: &mut dyn RenderDevice,
        source: &MeshSource,
        per_mesh_layout: DescriptorSetLayoutHandle,
        null_descriptor: BufferHandle,
    ) -> RenderResult<Self> {
        let mut parts = PartialUpload::default();
        Self::upload_parts(device, source, per_mesh_layout, null_descriptor, &mut parts).map_err(|err| {
            parts.release(device);
            err
        })
    }

    fn upload_parts(
        device: &mut dyn RenderDevice,
        source: &MeshSource,
        per_mesh_layout: DescriptorSetLayoutHandle,
        null_descriptor: BufferHandle,
        parts: &mut PartialUpload,
    ) -> RenderResult<Self> {
        let (positions, varyings_blending, varyings) = source.split_streams();
        let joint_bindings = source.index_joint_bindings()?;

        let vertex_usage = vk::BufferUsageFlags::VERTEX_BUFFER;
        let vertex_position_buffer = parts.buffer(device, bytemuck::cast_slice(&positions), vertex_usage)?;
        let vertex_varying_enable_blending_buffer =
            parts.buffer(device, bytemuck::cast_slice(&varyings_blending), vertex_usage)?;
        let vertex_varying_buffer = parts.buffer(device, bytemuck::cast_slice(&varyings), vertex_usage)?;
        let index_buffer = parts.buffer(
            device,
            bytemuck::cast_slice(&source.indices),
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?;

        let vertex_joint_binding_buffer = joint_bindings
            .as_deref()
            .map(|bindings| {
                parts.buffer(
                    device,
                    bytemuck::cast_slice(bindings),
                    vk::BufferUsageFlags::STORAGE_BUFFER,
                )
            })
            .transpose()?;

        let (joint_buffer, joint_range) = match vertex_joint_binding_buffer {
            Some(buffer) => (
                buffer,
                (std::mem::size_of::<MeshVertexJointBinding>() * source.indices.len()) as u64,
            ),
            None => (null_descriptor, NULL_DESCRIPTOR_BUFFER_SIZE),
        };

        let descriptor_set = device.allocate_descriptor_set(per_mesh_layout)?;
        device.update_descriptor_set(
            descriptor_set,
            &[DescriptorWrite::Buffer {
                binding: 0,
                kind: vk::DescriptorType::STORAGE_BUFFER,
                buffer: joint_buffer,
                offset: 0,
                range: joint_range.max(1),
            }],
        );

        Ok(Self {
            enable_vertex_blending: source.enable_vertex_blending(),
            vertex_count: source.vertices.len() as u32,
            index_count: source.indices.len() as u32,
            vertex_position_buffer,
            vertex_varying_enable_blending_buffer,
            vertex_varying_buffer,
            vertex_joint_binding_buffer,
            index_buffer,
            descriptor_set,
        })
    }

    /// Vertex buffers in binding order
    pub const fn vertex_buffers(&self) -> [BufferHandle; 3] {
        [
            self.vertex_position_buffer,
            self.vertex_varying_enable_blending_buffer,
            self.vertex_varying_buffer,
        ]
    }

    /// Release every buffer
    pub fn destroy(&self, device: &mut dyn RenderDevice) {
        for buffer in self.vertex_buffers() {
            device.destroy_buffer(buffer);
        }
        device.destroy_buffer(self.index_buffer);
        if let Some(buffer) = self.vertex_joint_binding_buffer {
            device.destroy_buffer(buffer);
        }
    }
}

/// Vertex input layout of the full mesh pipelines (bindings 0, 1, 2)
pub fn mesh_vertex_layout() -> crate::render::api::VertexLayout {
    use std::mem::size_of;

    let binding = |binding: u32, stride: usize| vk::VertexInputBindingDescription {
        binding,
        stride: stride as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    };
    let attribute = |location: u32, binding: u32, format: vk::Format, offset: u32| vk::VertexInputAttributeDescription {
        location,
        binding,
        format,
        offset,
    };

    crate::render::api::VertexLayout {
        bindings: vec![
            binding(0, size_of::<MeshVertexPosition>()),
            binding(1, size_of::<MeshVertexVaryingEnableBlending>()),
            binding(2, size_of::<MeshVertexVarying>()),
        ],
        attributes: vec![
            attribute(0, 0, vk::Format::R32G32B32_SFLOAT, 0),
            attribute(1, 1, vk::Format::R32G32B32_SFLOAT, 0),
            attribute(2, 1, vk::Format::R32G32B32_SFLOAT, 12),
            attribute(3, 2, vk::Format::R32G32_SFLOAT, 0),
        ],
    }
}

/// Vertex input layout of the position-only pipelines (shadow and pick)
pub fn mesh_position_layout() -> crate::render::api::VertexLayout {
    let mut layout = mesh_vertex_layout();
    layout.bindings.truncate(1);
    layout.attributes.truncate(1);
    layout
}
