//! Error types for jwsapi core.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Core result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON5 parse error: {0}")]
    Json5(String),
}

/// An error reported by the gateway itself.
///
/// Produced either from a top-level `{"janus":"error","error":{...}}` reply or
/// from an error nested in a plugin's `plugindata` payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ProtocolError {
    /// Numeric error code, when the gateway supplied one.
    pub code: Option<u64>,

    /// Human-readable reason.
    pub reason: String,
}

impl ProtocolError {
    /// Create a new protocol error.
    pub fn new(code: Option<u64>, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "gateway error {}: {}", code, self.reason),
            None => write!(f, "gateway error: {}", self.reason),
        }
    }
}
