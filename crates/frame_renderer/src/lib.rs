//! # Frame Renderer
//!
//! Per-frame GPU rendering orchestration for a deferred Vulkan renderer.
//!
//! ## Features
//!
//! - **Transient ring buffer**: per-frame bump allocation of aligned storage slices
//! - **Resource cache**: staged upload of meshes and PBR materials, keyed by asset id
//! - **Draw batching**: material → mesh grouping split into 64-instance draw calls
//! - **Shadow passes**: directional (4096²) and point-light (2048², 30 layers)
//! - **Main camera pass**: one render pass with eight ordered subpasses
//! - **Pick pass**: object id readback for editor selection
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use frame_renderer::prelude::*;
//!
//! fn run(context: VulkanContext, surface: SurfaceBinding) -> Result<(), RenderError> {
//!     let config = RendererConfig::load_from_file("renderer.toml").unwrap_or_default();
//!     frame_renderer::foundation::logging::init(&config);
//!     let device = VulkanDevice::new(context, surface, &config)?;
//!     let mut renderer = FrameOrchestrator::new(device, config)?;
//!
//!     let visible = VisibleNodes::default();
//!     let snapshot = FrameSnapshot::default();
//!     renderer.render_frame(&snapshot, &visible)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod foundation;
pub mod render;

/// Common imports for renderer users
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigError},
        foundation::math::{Mat4, Vec2, Vec3, Vec4},
        render::{
            api::{RenderDevice, RenderError, RenderResult},
            backends::vulkan::{SurfaceBinding, VulkanContext, VulkanDevice},
            config::{RenderPath, RendererConfig},
            pipeline::FrameOrchestrator,
            resources::{MaterialSource, MeshSource, ResourceCache},
            scene::{CameraState, FrameSnapshot, SceneLighting, VisibleInstance, VisibleNodes},
        },
    };
}
