//! Renderer-level error types

use crate::config::ConfigError;
use crate::render::backends::vulkan::VulkanError;

/// Errors surfaced by the rendering frontend
///
/// Every variant is fatal for the frame that produced it. Creation failures
/// during setup abort renderer construction. A frame whose recording fails is
/// abandoned before the error is returned, so the next frame can still run.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// Backend API failure
    #[error("Backend error: {0}")]
    Backend(#[from] VulkanError),

    /// A SPIR-V module could not be read
    #[error("Shader '{path}' could not be loaded: {source}")]
    Shader {
        /// Resolved shader path
        path: String,
        /// Underlying IO failure
        source: std::io::Error,
    },

    /// Operation issued in the wrong lifecycle state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// A referenced resource was never created
    #[error("Missing resource: {0}")]
    MissingResource(String),

    /// Configuration rejected
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type for rendering operations
pub type RenderResult<T> = Result<T, RenderError>;
