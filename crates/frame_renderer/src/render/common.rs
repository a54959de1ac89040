//! GPU-visible data layouts and renderer-wide constants
//!
//! Every struct here is written verbatim into mapped memory, so field order
//! and padding must match the shaders exactly. Matrices are column-major.

use crate::foundation::math::GpuMat4;

/// Instances per draw call; matches the fixed array size in the mesh shaders
pub const MESH_PER_DRAWCALL_MAX_INSTANCE_COUNT: usize = 64;

/// Joint matrices reserved per skinned instance
pub const MESH_VERTEX_BLENDING_MAX_JOINT_COUNT: usize = 1024;

/// Point lights the lighting and shadow shaders accept
pub const MAX_POINT_LIGHT_COUNT: usize = 15;

/// Edge length of each point-light shadow layer
pub const POINT_LIGHT_SHADOW_MAP_DIMENSION: u32 = 2048;

/// Edge length of the directional shadow map
pub const DIRECTIONAL_LIGHT_SHADOW_MAP_DIMENSION: u32 = 4096;

/// Size of the buffer bound wherever a storage binding has nothing to point at
pub const NULL_DESCRIPTOR_BUFFER_SIZE: u64 = 64;

/// Value shadow colour and depth targets are cleared to
pub const SHADOW_CLEAR_VALUE: f32 = 1.0;

/// Per-instance entry of the mesh draw-call arrays
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshInstance {
    /// +1.0 when the instance reads joint matrices, -1.0 otherwise
    pub enable_vertex_blending: f32,
    pub _padding_enable_vertex_blending: [f32; 3],
    /// Object-to-world transform
    pub model_matrix: GpuMat4,
}

/// Point light as seen by the lighting shaders
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScenePointLight {
    /// World-space position
    pub position: [f32; 3],
    /// Attenuation cutoff radius
    pub radius: f32,
    /// Radiant intensity (flux / 4π)
    pub intensity: [f32; 3],
    pub _padding_intensity: f32,
}

/// Directional light as seen by the lighting shaders
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SceneDirectionalLight {
    /// Normalized direction the light travels
    pub direction: [f32; 3],
    pub _padding_direction: f32,
    /// Linear colour
    pub color: [f32; 3],
    pub _padding_color: f32,
}

/// Per-frame data shared by every main-camera subpass
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MeshPerframeStorageBufferObject {
    pub proj_view_matrix: GpuMat4,
    pub camera_position: [f32; 3],
    pub _padding_camera_position: f32,
    pub ambient_light: [f32; 3],
    pub _padding_ambient_light: f32,
    pub point_light_num: u32,
    pub _padding_point_light_num: [u32; 3],
    pub scene_point_lights: [ScenePointLight; MAX_POINT_LIGHT_COUNT],
    pub scene_directional_light: SceneDirectionalLight,
    pub directional_light_proj_view: GpuMat4,
}

/// Per-frame data of the point-light shadow pass
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MeshPointLightShadowPerframeStorageBufferObject {
    pub point_light_num: u32,
    pub _padding_point_light_num: [u32; 3],
    /// xyz position, w radius
    pub point_lights_position_and_radius: [[f32; 4]; MAX_POINT_LIGHT_COUNT],
}

/// Per-frame data of the directional shadow pass
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MeshDirectionalLightShadowPerframeStorageBufferObject {
    pub light_proj_view: GpuMat4,
}

/// Per-frame data of the pick pass
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MeshInefficientPickPerframeStorageBufferObject {
    pub proj_view_matrix: GpuMat4,
    pub rt_width: u32,
    pub rt_height: u32,
    pub _padding_rt: [u32; 2],
}

/// Per-drawcall data of the pick pass
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MeshInefficientPickPerdrawcallStorageBufferObject {
    pub model_matrices: [GpuMat4; MESH_PER_DRAWCALL_MAX_INSTANCE_COUNT],
    pub node_ids: [u32; MESH_PER_DRAWCALL_MAX_INSTANCE_COUNT],
    pub enable_vertex_blendings: [f32; MESH_PER_DRAWCALL_MAX_INSTANCE_COUNT],
}

/// Material factors, bound at set 2 binding 0 of the mesh pipelines
///
/// Layout is fixed; do not reorder.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshPerMaterialUniformBufferObject {
    pub base_color_factor: [f32; 4],
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub normal_scale: f32,
    pub occlusion_strength: f32,
    pub emissive_factor: [f32; 3],
    pub is_blend: u32,
    pub is_double_sided: u32,
}

/// Axis gizmo transform and highlighted axis
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisStorageBufferObject {
    pub model_matrix: GpuMat4,
    /// 0, 1, 2 for x, y, z; 3 for none
    pub selected_axis: u32,
    pub _padding_selected_axis: [u32; 3],
}

impl Default for AxisStorageBufferObject {
    fn default() -> Self {
        Self {
            model_matrix: crate::foundation::math::to_gpu_mat4(&crate::foundation::math::Mat4::identity()),
            selected_axis: 3,
            _padding_selected_axis: [0; 3],
        }
    }
}

/// Position stream, vertex binding 0
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MeshVertexPosition {
    pub position: [f32; 3],
}

/// Normal and tangent stream, vertex binding 1
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MeshVertexVaryingEnableBlending {
    pub normal: [f32; 3],
    pub tangent: [f32; 3],
}

/// Texcoord stream, vertex binding 2
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MeshVertexVarying {
    pub texcoord: [f32; 2],
}

/// Per-index skinning record read from the per-mesh storage buffer
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MeshVertexJointBinding {
    pub indices: [i32; 4],
    pub weights: [f32; 4],
}

// Safety: all of the above are repr(C), contain only f32/u32/i32 and have no
// implicit padding
unsafe impl bytemuck::Zeroable for MeshInstance {}
unsafe impl bytemuck::Pod for MeshInstance {}
unsafe impl bytemuck::Zeroable for ScenePointLight {}
unsafe impl bytemuck::Pod for ScenePointLight {}
unsafe impl bytemuck::Zeroable for SceneDirectionalLight {}
unsafe impl bytemuck::Pod for SceneDirectionalLight {}
unsafe impl bytemuck::Zeroable for MeshPerframeStorageBufferObject {}
unsafe impl bytemuck::Pod for MeshPerframeStorageBufferObject {}
unsafe impl bytemuck::Zeroable for MeshPointLightShadowPerframeStorageBufferObject {}
unsafe impl bytemuck::Pod for MeshPointLightShadowPerframeStorageBufferObject {}
unsafe impl bytemuck::Zeroable for MeshDirectionalLightShadowPerframeStorageBufferObject {}
unsafe impl bytemuck::Pod for MeshDirectionalLightShadowPerframeStorageBufferObject {}
unsafe impl bytemuck::Zeroable for MeshInefficientPickPerframeStorageBufferObject {}
unsafe impl bytemuck::Pod for MeshInefficientPickPerframeStorageBufferObject {}
unsafe impl bytemuck::Zeroable for MeshInefficientPickPerdrawcallStorageBufferObject {}
unsafe impl bytemuck::Pod for MeshInefficientPickPerdrawcallStorageBufferObject {}
unsafe impl bytemuck::Zeroable for MeshPerMaterialUniformBufferObject {}
unsafe impl bytemuck::Pod for MeshPerMaterialUniformBufferObject {}
unsafe impl bytemuck::Zeroable for AxisStorageBufferObject {}
unsafe impl bytemuck::Pod for AxisStorageBufferObject {}
unsafe impl bytemuck::Zeroable for MeshVertexPosition {}
unsafe impl bytemuck::Pod for MeshVertexPosition {}
unsafe impl bytemuck::Zeroable for MeshVertexVaryingEnableBlending {}
unsafe impl bytemuck::Pod for MeshVertexVaryingEnableBlending {}
unsafe impl bytemuck::Zeroable for MeshVertexVarying {}
unsafe impl bytemuck::Pod for MeshVertexVarying {}
unsafe impl bytemuck::Zeroable for MeshVertexJointBinding {}
unsafe impl bytemuck::Pod for MeshVertexJointBinding {}

impl Default for MeshPerframeStorageBufferObject {
    fn default() -> Self {
        bytemuck::Zeroable::zeroed()
    }
}

impl Default for MeshPointLightShadowPerframeStorageBufferObject {
    fn default() -> Self {
        bytemuck::Zeroable::zeroed()
    }
}

impl Default for MeshDirectionalLightShadowPerframeStorageBufferObject {
    fn default() -> Self {
        bytemuck::Zeroable::zeroed()
    }
}

impl Default for MeshInefficientPickPerframeStorageBufferObject {
    fn default() -> Self {
        bytemuck::Zeroable::zeroed()
    }
}
