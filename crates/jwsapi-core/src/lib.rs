//! # jwsapi-core
//!
//! Shared building blocks for the Janus WebSocket API client.
//!
//! - **Message**: the schema-less payload used for every request, response and event
//! - **Configuration**: timeouts, queue sizes and gateway address, loaded from JSON5
//! - **Errors**: configuration errors and gateway-reported protocol errors
//! - **Utilities**: transaction id generation and default paths

pub mod config;
pub mod error;
pub mod id;
pub mod message;
pub mod paths;

// Re-exports for convenience
pub use config::ClientConfig;
pub use error::{ConfigError, Error, ProtocolError, Result};
pub use message::{attr, Message, MessageType};
