//! Client error types.

use jwsapi_core::ProtocolError;
use thiserror::Error;

/// Errors surfaced by connection, session and handle operations.
///
/// Transport failures are normally recovered by reconnecting and only reach a
/// caller indirectly, as a [`ClientError::Timeout`] on a request that was in
/// flight when the socket went away.
#[derive(Debug, Error)]
pub enum ClientError {
    /// WebSocket dial, read or write failure.
    #[error("WebSocket error: {0}")]
    Transport(String),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The gateway answered with an error payload.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// No correlated reply arrived in time.
    #[error("Timed out after {timeout_ms}ms waiting for {context}")]
    Timeout { timeout_ms: u64, context: String },

    /// The gateway's reply was missing something the client needs.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The connection has been shut down.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The session was destroyed or could not be reclaimed after a reconnect.
    #[error("Session {session_id} destroyed")]
    SessionDestroyed { session_id: u64 },

    /// The handle was detached.
    #[error("Handle {handle_id} detached")]
    Detached { handle_id: u64 },

    /// A caller-supplied transaction id is already in flight.
    #[error("Transaction {0} already in flight")]
    DuplicateTransaction(String),

    /// An administrative queue was full and the task was dropped.
    #[error("Queue full: {0}")]
    Busy(String),
}

impl ClientError {
    /// Whether this is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// The gateway-reported error, if this is one.
    pub fn protocol(&self) -> Option<&ProtocolError> {
        match self {
            Self::Protocol(err) => Some(err),
            _ => None,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
