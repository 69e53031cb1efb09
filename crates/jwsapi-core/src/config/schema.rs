//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Client configuration: where the gateway lives, how long to wait, and how
/// deep the internal queues are.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Gateway WebSocket URL.
    #[serde(default = "default_url")]
    pub url: String,

    /// WebSocket sub-protocol requested at dial time.
    #[serde(default = "default_subprotocol")]
    pub subprotocol: String,

    /// Response budget for one request/response phase.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Session keepalive period.
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,

    /// How long sessions survive a closed transport before local teardown.
    #[serde(default = "default_disconnect_grace_ms")]
    pub disconnect_grace_ms: u64,

    /// WebSocket handshake budget.
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,

    /// Pause between failed dial attempts.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Write deadline per outbound frame.
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Largest inbound frame accepted, in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Queue sizes.
    #[serde(default)]
    pub queues: QueueConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            subprotocol: default_subprotocol(),
            request_timeout_ms: default_request_timeout_ms(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
            disconnect_grace_ms: default_disconnect_grace_ms(),
            dial_timeout_ms: default_dial_timeout_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            max_message_size: default_max_message_size(),
            queues: QueueConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Create a builder starting from defaults.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

fn default_url() -> String {
    "ws://127.0.0.1:8188".to_string()
}

fn default_subprotocol() -> String {
    "janus-protocol".to_string()
}

fn default_request_timeout_ms() -> u64 {
    3_000
}

fn default_keepalive_interval_ms() -> u64 {
    10_000
}

fn default_disconnect_grace_ms() -> u64 {
    10_000
}

fn default_dial_timeout_ms() -> u64 {
    3_000
}

fn default_retry_delay_ms() -> u64 {
    3_000
}

fn default_write_timeout_ms() -> u64 {
    3_000
}

fn default_max_message_size() -> usize {
    1024 * 1024
}

/// Capacities of the internal queues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Connection administrative task queue. Full means the task is dropped.
    #[serde(default = "default_task_capacity")]
    pub tasks: usize,

    /// Read task to demultiplexer queue. Full means the frame is dropped.
    #[serde(default = "default_inbound_capacity")]
    pub inbound: usize,

    /// Outbound frame queue. Full means the sender waits.
    #[serde(default = "default_outbound_capacity")]
    pub outbound: usize,

    /// Per-session task queue.
    #[serde(default = "default_session_capacity")]
    pub session: usize,

    /// Per-handle dispatch queue.
    #[serde(default = "default_handle_capacity")]
    pub handle: usize,

    /// Per-handle caller-visible event stream.
    #[serde(default = "default_event_capacity")]
    pub events: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            tasks: default_task_capacity(),
            inbound: default_inbound_capacity(),
            outbound: default_outbound_capacity(),
            session: default_session_capacity(),
            handle: default_handle_capacity(),
            events: default_event_capacity(),
        }
    }
}

fn default_task_capacity() -> usize {
    1024
}

fn default_inbound_capacity() -> usize {
    1024
}

fn default_outbound_capacity() -> usize {
    1024
}

fn default_session_capacity() -> usize {
    128
}

fn default_handle_capacity() -> usize {
    128
}

fn default_event_capacity() -> usize {
    16
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the gateway URL.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.url = url.into();
        self
    }

    /// Set the requested sub-protocol.
    pub fn subprotocol(mut self, protocol: impl Into<String>) -> Self {
        self.config.subprotocol = protocol.into();
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout_ms = millis(timeout);
        self
    }

    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.config.keepalive_interval_ms = millis(interval);
        self
    }

    pub fn disconnect_grace(mut self, grace: Duration) -> Self {
        self.config.disconnect_grace_ms = millis(grace);
        self
    }

    pub fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.config.dial_timeout_ms = millis(timeout);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay_ms = millis(delay);
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout_ms = millis(timeout);
        self
    }

    pub fn max_message_size(mut self, bytes: usize) -> Self {
        self.config.max_message_size = bytes;
        self
    }

    /// Replace all queue capacities.
    pub fn queues(mut self, queues: QueueConfig) -> Self {
        self.config.queues = queues;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
