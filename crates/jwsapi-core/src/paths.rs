//! Path resolution utilities.

use crate::error::ConfigError;
use std::path::PathBuf;

/// Get the jwsapi config directory (`<config dir>/jwsapi`).
pub fn base_dir() -> Result<PathBuf, ConfigError> {
    let config = dirs::config_dir().ok_or_else(|| {
        ConfigError::Validation("Could not determine config directory".to_string())
    })?;
    Ok(config.join("jwsapi"))
}

/// Get the main config file path (`<config dir>/jwsapi/config.json5`).
pub fn config_file() -> Result<PathBuf, ConfigError> {
    Ok(base_dir()?.join("config.json5"))
}
