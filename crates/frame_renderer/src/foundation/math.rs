//! Math types used at the renderer API boundary
//!
//! GPU-facing structs never store these directly; they are converted to
//! column-major arrays with [`to_gpu_mat4`] when written to mapped memory.

pub use nalgebra::{Matrix4, Vector2, Vector3, Vector4};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// Column-major matrix layout as seen by shaders
pub type GpuMat4 = [[f32; 4]; 4];

/// Convert a matrix into the column-major array layout shaders expect
#[inline]
pub fn to_gpu_mat4(m: &Mat4) -> GpuMat4 {
    (*m).into()
}

/// Round `value` up to the next multiple of `alignment`
///
/// An alignment of zero leaves the value unchanged.
#[inline]
pub const fn round_up(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        value
    } else {
        value.div_ceil(alignment) * alignment
    }
}
