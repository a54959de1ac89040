//! Logger installation over `env_logger`
//!
//! The configured filter is the default; directives in `RUST_LOG` are applied
//! on top of it.

use crate::render::config::RendererConfig;

/// Logger builder for `config`, with `env_filters` layered over its filter
fn builder(config: &RendererConfig, env_filters: Option<&str>) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder.parse_filters(&config.log_filter);
    if let Some(filters) = env_filters {
        builder.parse_filters(filters);
    }
    builder
}

/// Install the global logger for `config`
///
/// Returns false when a logger was already installed, which leaves that one in
/// place.
pub fn init(config: &RendererConfig) -> bool {
    let env_filters = std::env::var("RUST_LOG").ok();
    let installed = builder(config, env_filters.as_deref()).try_init().is_ok();
    if installed {
        log::debug!("Logger installed with filter {:?}", config.log_filter);
    }
    installed
}
