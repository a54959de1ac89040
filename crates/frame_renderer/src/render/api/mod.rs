//! Backend-agnostic rendering API
//!
//! The passes, batcher and caches are written against [`RenderDevice`] and
//! never see `ash::Device` directly.

pub mod device;
pub mod error;

#[cfg(test)]
pub mod recording;

pub use device::*;
pub use error::{RenderError, RenderResult};
