//! # Renderer Configuration
//!
//! Serializable settings for the frame orchestrator and the Vulkan device:
//! frames in flight, render path, post-process toggles, the transient ring
//! size and where precompiled SPIR-V lives.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::Config;

/// Default size of the transient upload ring (128 MiB)
pub const DEFAULT_TRANSIENT_RING_SIZE: u64 = 1024 * 1024 * 128;

/// Smallest transient region a single frame slot may be given
pub const MIN_TRANSIENT_REGION_SIZE: u64 = 1024 * 1024;

/// Upper bound on frames in flight
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// Which lighting path the main camera pass records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RenderPath {
    /// G-buffer, full-screen deferred lighting, then forward extras
    #[default]
    Deferred,
    /// Forward mesh lighting in the forward subpass; base and deferred subpasses stay empty
    Forward,
}

bitflags! {
    /// Optional features resolved from configuration
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RenderFeatures: u32 {
        /// FXAA subpass writes the anti-aliased target
        const FXAA = 1 << 0;
        /// Point-light shadow pass records draws
        const POINT_LIGHT_SHADOW = 1 << 1;
        /// Editor axis gizmo is drawn in the UI subpass
        const AXIS = 1 << 2;
    }
}

/// Renderer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name used for labels and the Vulkan application info
    pub application_name: String,
    /// Number of frame slots rotating through the ring buffer and command buffers
    pub max_frames_in_flight: usize,
    /// Enable the FXAA subpass
    pub enable_fxaa: bool,
    /// Deferred or forward main pass
    pub render_path: RenderPath,
    /// Record point-light shadow draws
    pub enable_point_light_shadow: bool,
    /// Show the axis gizmo at startup
    pub show_axis: bool,
    /// Total bytes of the transient upload ring, split evenly between frame slots
    pub transient_ring_size: u64,
    /// Whether to enable Vulkan validation layers (auto-detect when `None`)
    pub enable_validation: Option<bool>,
    /// Directory holding precompiled SPIR-V
    pub shader_directory: String,
    /// `env_logger` filter directives used when `RUST_LOG` is unset
    pub log_filter: String,
}

impl RendererConfig {
    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            max_frames_in_flight: 2,
            enable_fxaa: false,
            render_path: RenderPath::Deferred,
            enable_point_light_shadow: true,
            show_axis: false,
            transient_ring_size: DEFAULT_TRANSIENT_RING_SIZE,
            enable_validation: None,
            shader_directory: "target/shaders".to_string(),
            log_filter: "info".to_string(),
        }
    }

    /// Set maximum frames in flight
    #[must_use]
    pub fn with_max_frames_in_flight(mut self, max_frames: usize) -> Self {
        self.max_frames_in_flight = max_frames.clamp(1, MAX_FRAMES_IN_FLIGHT);
        self
    }

    /// Enable or disable FXAA
    #[must_use]
    pub const fn with_fxaa(mut self, enable: bool) -> Self {
        self.enable_fxaa = enable;
        self
    }

    /// Select the render path
    #[must_use]
    pub const fn with_render_path(mut self, path: RenderPath) -> Self {
        self.render_path = path;
        self
    }

    /// Enable or disable point-light shadows
    #[must_use]
    pub const fn with_point_light_shadow(mut self, enable: bool) -> Self {
        self.enable_point_light_shadow = enable;
        self
    }

    /// Set the transient ring size in bytes
    #[must_use]
    pub const fn with_transient_ring_size(mut self, bytes: u64) -> Self {
        self.transient_ring_size = bytes;
        self
    }

    /// Set the SPIR-V directory
    #[must_use]
    pub fn with_shader_directory(mut self, dir: impl Into<String>) -> Self {
        self.shader_directory = dir.into();
        self
    }

    /// Set the default log filter, e.g. `"warn,frame_renderer=debug"`
    #[must_use]
    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }

    /// Enable or disable Vulkan validation layers
    #[must_use]
    pub const fn with_validation(mut self, enable: bool) -> Self {
        self.enable_validation = Some(enable);
        self
    }

    /// Validation layers requested, falling back to debug-build detection
    pub const fn validation_enabled(&self) -> bool {
        match self.enable_validation {
            Some(enabled) => enabled,
            None => cfg!(debug_assertions),
        }
    }

    /// Feature flags implied by this configuration
    pub fn features(&self) -> RenderFeatures {
        let mut features = RenderFeatures::empty();
        features.set(RenderFeatures::FXAA, self.enable_fxaa);
        features.set(RenderFeatures::POINT_LIGHT_SHADOW, self.enable_point_light_shadow);
        features.set(RenderFeatures::AXIS, self.show_axis);
        features
    }

    /// Resolve a SPIR-V file name against the shader directory
    pub fn shader_path(&self, file: &str) -> PathBuf {
        Path::new(&self.shader_directory).join(file)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.max_frames_in_flight == 0 || self.max_frames_in_flight > MAX_FRAMES_IN_FLIGHT {
            return Err(format!(
                "max_frames_in_flight must be within 1..={MAX_FRAMES_IN_FLIGHT}, got {}",
                self.max_frames_in_flight
            ));
        }
        let minimum = MIN_TRANSIENT_REGION_SIZE * self.max_frames_in_flight as u64;
        if self.transient_ring_size < minimum {
            return Err(format!(
                "transient_ring_size {} is below {} bytes for {} frames in flight",
                self.transient_ring_size, minimum, self.max_frames_in_flight
            ));
        }
        if self.shader_directory.is_empty() {
            return Err("shader_directory must not be empty".to_string());
        }
        Ok(())
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::new("Frame Renderer")
    }
}

impl Config for RendererConfig {}
