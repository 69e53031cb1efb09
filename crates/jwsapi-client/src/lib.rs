//! Reconnecting client for the Janus gateway WebSocket API.
//!
//! This crate provides:
//! - [`Connection`]: one WebSocket at a time, redialed until closed, with
//!   request/response correlation by transaction id
//! - [`Session`]: gateway sessions with keepalives and reclaim after reconnect
//! - [`Handle`]: plugin handles with an event stream and notification callbacks
//!
//! ```no_run
//! use jwsapi_client::{ClientConfig, Connection, Message};
//!
//! # async fn demo() -> jwsapi_client::Result<()> {
//! let conn = Connection::open(ClientConfig::default());
//! let session = conn.create().await?;
//! let handle = session.attach("janus.plugin.echotest").await?;
//! let event = handle.message(Message::new().with("audio", true)).await?;
//! println!("{}", event);
//! handle.detach().await?;
//! session.destroy().await?;
//! conn.close();
//! # Ok(())
//! # }
//! ```

pub mod callbacks;
pub mod connection;
pub mod error;
pub mod handle;
pub mod session;
mod transport;

pub use callbacks::{Callback, Callbacks, Notification};
pub use connection::{Connection, LinkState, LinkStatus};
pub use error::ClientError;
pub use handle::{Events, Handle};
pub use session::Session;

pub use jwsapi_core::{attr, ClientConfig, Message, MessageType, ProtocolError};
pub use tokio_util::sync::CancellationToken;

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
