//! CLI command implementations.

pub mod config;
pub mod info;
pub mod probe;

use jwsapi_core::ClientConfig;
use std::path::Path;

/// Resolve the effective configuration: an explicit file or the default
/// location, then the `--url` override, then validation.
pub fn resolve_config(path: Option<&Path>, url: Option<&str>) -> anyhow::Result<ClientConfig> {
    let mut config = match path {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::load_or_default(),
    };

    if let Some(url) = url {
        config.url = url.to_string();
    }

    config.validate()?;
    Ok(config)
}
