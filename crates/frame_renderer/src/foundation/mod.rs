//! Foundation module - core utilities shared by the renderer
//!
//! - Math aliases over nalgebra
//! - Logger installation from the renderer configuration

pub mod logging;
pub mod math;
