//! Configuration loading and persistence.

use super::ClientConfig;
use crate::error::ConfigError;
use crate::paths;
use std::fs;
use std::path::Path;

impl ClientConfig {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = paths::config_file()?;
        Self::load(&path)
    }

    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        json5::from_str(content).map_err(|e| ConfigError::Json5(e.to_string()))
    }

    /// Load from the default path, falling back to defaults if no file exists.
    pub fn load_or_default() -> Self {
        match Self::load_default() {
            Ok(config) => config,
            Err(ConfigError::NotFound(_)) => Self::default(),
            Err(e) => {
                tracing::warn!("Ignoring unreadable config file: {}", e);
                Self::default()
            }
        }
    }

    /// Save configuration to a file path.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = self.to_json5()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write atomically
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &content)?;
        fs::rename(&temp_path, path)?;

        Ok(())
    }

    /// Serialize to JSON5 string.
    pub fn to_json5(&self) -> Result<String, ConfigError> {
        // json5 doesn't have a serializer; plain JSON is valid JSON5
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Validate the configuration, collecting all errors before returning.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        // 1. Gateway URL must be a WebSocket URL
        match url::Url::parse(&self.url) {
            Ok(parsed) => {
                if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
                    errors.push(format!(
                        "Gateway URL '{}' must use ws:// or wss://",
                        self.url
                    ));
                }
            }
            Err(e) => errors.push(format!("Invalid gateway URL '{}': {}", self.url, e)),
        }

        // 2. Sub-protocol is a single HTTP token
        if self.subprotocol.is_empty()
            || self.subprotocol.chars().any(|c| c.is_whitespace() || c == ',')
        {
            errors.push(format!("Invalid sub-protocol '{}'", self.subprotocol));
        }

        // 3. Every timer must be non-zero
        let timers = [
            ("request_timeout_ms", self.request_timeout_ms),
            ("keepalive_interval_ms", self.keepalive_interval_ms),
            ("disconnect_grace_ms", self.disconnect_grace_ms),
            ("dial_timeout_ms", self.dial_timeout_ms),
            ("retry_delay_ms", self.retry_delay_ms),
            ("write_timeout_ms", self.write_timeout_ms),
        ];
        for (name, value) in timers {
            if value == 0 {
                errors.push(format!("{} must be greater than 0", name));
            }
        }

        // 4. Frame limit
        if self.max_message_size == 0 {
            errors.push("max_message_size must be greater than 0".to_string());
        }

        // 5. Queue capacities (tokio channels reject zero)
        let queues = [
            ("queues.tasks", self.queues.tasks),
            ("queues.inbound", self.queues.inbound),
            ("queues.outbound", self.queues.outbound),
            ("queues.session", self.queues.session),
            ("queues.handle", self.queues.handle),
            ("queues.events", self.queues.events),
        ];
        for (name, value) in queues {
            if value == 0 {
                errors.push(format!("{} must be greater than 0", name));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors.join("; ")))
        }
    }
}
