//! Device backends
//!
//! Only Vulkan is implemented. Tests run the passes against the in-memory
//! recording device instead.

pub mod vulkan;
