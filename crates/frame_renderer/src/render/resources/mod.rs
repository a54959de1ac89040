//! GPU resource management
//!
//! - [`transient`]: per-frame ring buffer
//! - [`cache`]: meshes and materials keyed by asset id
//! - [`global`]: layouts, samplers and lighting textures shared by all passes

pub mod cache;
pub mod global;
pub mod material;
pub mod mesh;
pub mod transient;
pub mod upload;

pub use cache::{CacheStats, MaterialAssetId, MaterialKey, MeshAssetId, MeshKey, ResourceCache};
pub use global::{CubeMapSource, GlobalRenderResources, GlobalResourceSources, SharedLayouts};
pub use material::{MaterialFactors, MaterialRecord, MaterialSource, TextureData};
pub use mesh::{MeshJointBinding, MeshRecord, MeshSource, MeshVertex};
pub use transient::{TransientArena, TransientRegion, TransientSlice};
