//! # Rendering
//!
//! Per-frame orchestration of a deferred Vulkan pipeline.
//!
//! ## Architecture
//!
//! - **api**: the [`api::RenderDevice`] seam every pass records through
//! - **resources**: transient ring, mesh/material cache, shared lighting resources
//! - **batching**: material → mesh grouping and instanced draw recording
//! - **passes**: shadow, main camera and pick passes
//! - **pipeline**: the [`pipeline::FrameOrchestrator`] that drives a frame
//! - **backends**: the Vulkan implementation of the device seam

pub mod api;
pub mod backends;
pub mod batching;
pub mod common;
pub mod config;
pub mod passes;
pub mod pipeline;
pub mod resources;
pub mod scene;

#[cfg(test)]
pub(crate) mod test_support;

pub use api::{RenderDevice, RenderError, RenderResult};
pub use config::{RenderFeatures, RenderPath, RendererConfig};
pub use pipeline::FrameOrchestrator;
