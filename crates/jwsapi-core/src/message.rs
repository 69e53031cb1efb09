//! The Janus message model.
//!
//! Every frame on the wire, in either direction, is a [`Message`]: a JSON
//! object with no fixed schema whose fields are looked up by name. The
//! envelope fields that drive routing (`janus`, `transaction`, `session_id`,
//! `sender`) have dedicated accessors; everything else is reached through the
//! typed getters.
//!
//! Integers are kept as `u64` by `serde_json`, so session and handle ids
//! above 2^53 survive decoding without passing through `f64`.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Attribute names used by the Janus protocol envelope.
pub mod attr {
    pub const JANUS: &str = "janus";
    pub const TRANSACTION: &str = "transaction";
    pub const SESSION_ID: &str = "session_id";
    pub const HANDLE_ID: &str = "handle_id";
    pub const SENDER: &str = "sender";
    pub const BODY: &str = "body";
    pub const JSEP: &str = "jsep";
    pub const PLUGIN: &str = "plugin";
    pub const PLUGIN_DATA: &str = "plugindata";
    pub const DATA: &str = "data";
    pub const ERROR: &str = "error";
    pub const ERROR_CODE: &str = "error_code";
    pub const CODE: &str = "code";
    pub const REASON: &str = "reason";
    pub const CANDIDATE: &str = "candidate";
    pub const CANDIDATES: &str = "candidates";
    pub const OPAQUE_ID: &str = "opaque_id";
    pub const ID: &str = "id";
    /// Plugin request name inside a message body.
    pub const REQUEST: &str = "request";
}

/// Value of the `janus` envelope field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageType {
    // Requests sent by the client.
    Create,
    Attach,
    Destroy,
    Detach,
    Message,
    Trickle,
    Claim,
    Keepalive,
    Info,

    // Replies and notifications sent by the gateway.
    Ack,
    Success,
    Error,
    Event,
    WebrtcUp,
    Media,
    SlowLink,
    Hangup,
    Detached,
    Timeout,
    ServerInfo,

    /// Any type this client does not know about.
    Other(String),
}

impl MessageType {
    /// The wire spelling of this type.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Create => "create",
            Self::Attach => "attach",
            Self::Destroy => "destroy",
            Self::Detach => "detach",
            Self::Message => "message",
            Self::Trickle => "trickle",
            Self::Claim => "claim",
            Self::Keepalive => "keepalive",
            Self::Info => "info",
            Self::Ack => "ack",
            Self::Success => "success",
            Self::Error => "error",
            Self::Event => "event",
            Self::WebrtcUp => "webrtcup",
            Self::Media => "media",
            Self::SlowLink => "slowlink",
            Self::Hangup => "hangup",
            Self::Detached => "detached",
            Self::Timeout => "timeout",
            Self::ServerInfo => "server_info",
            Self::Other(s) => s,
        }
    }

    /// Parse a wire type, ignoring ASCII case.
    pub fn parse(s: &str) -> Self {
        const KNOWN: [MessageType; 20] = [
            MessageType::Create,
            MessageType::Attach,
            MessageType::Destroy,
            MessageType::Detach,
            MessageType::Message,
            MessageType::Trickle,
            MessageType::Claim,
            MessageType::Keepalive,
            MessageType::Info,
            MessageType::Ack,
            MessageType::Success,
            MessageType::Error,
            MessageType::Event,
            MessageType::WebrtcUp,
            MessageType::Media,
            MessageType::SlowLink,
            MessageType::Hangup,
            MessageType::Detached,
            MessageType::Timeout,
            MessageType::ServerInfo,
        ];

        KNOWN
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .unwrap_or_else(|| Self::Other(s.to_string()))
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A Janus message: a JSON object with typed accessors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(Map<String, Value>);

impl Message {
    /// Create an empty message (used for plugin bodies).
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Create a message with its `janus` type set.
    pub fn of(kind: MessageType) -> Self {
        Self::new().with(attr::JANUS, kind.as_str())
    }

    /// Decode a message from a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Encode this message as compact JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Builder-style setter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Set a key, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Remove a key, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Raw value lookup.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over all attributes.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Borrow the underlying JSON object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consume into the underlying JSON object.
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }

    // --- Typed getters ---

    /// String value of `key`.
    pub fn str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Boolean value of `key`.
    pub fn bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    /// Unsigned integer value of `key`. Negative and fractional numbers read as absent.
    pub fn u64(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(Value::as_u64)
    }

    /// Like [`Message::u64`], but absent when the value does not fit in 32 bits.
    pub fn u32(&self, key: &str) -> Option<u32> {
        self.u64(key).and_then(|v| u32::try_from(v).ok())
    }

    /// Like [`Message::u64`], but absent when the value does not fit in 16 bits.
    pub fn u16(&self, key: &str) -> Option<u16> {
        self.u64(key).and_then(|v| u16::try_from(v).ok())
    }

    /// Array value of `key`.
    pub fn array(&self, key: &str) -> Option<&[Value]> {
        self.0.get(key).and_then(Value::as_array).map(Vec::as_slice)
    }

    /// Array of objects under `key`, each as a message. Non-object elements are skipped.
    pub fn messages(&self, key: &str) -> Option<Vec<Message>> {
        self.array(key).map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_object().cloned().map(Message))
                .collect()
        })
    }

    /// Nested object under `key`.
    pub fn sub_message(&self, key: &str) -> Option<Message> {
        self.0.get(key).and_then(Value::as_object).cloned().map(Message)
    }

    // --- Envelope accessors ---

    /// The `janus` type of this message.
    pub fn kind(&self) -> Option<MessageType> {
        self.str(attr::JANUS).map(MessageType::parse)
    }

    pub fn transaction(&self) -> Option<&str> {
        self.str(attr::TRANSACTION)
    }

    pub fn session_id(&self) -> Option<u64> {
        self.u64(attr::SESSION_ID)
    }

    /// Handle id of the plugin instance that produced an inbound message.
    pub fn sender(&self) -> Option<u64> {
        self.u64(attr::SENDER)
    }

    /// The `data` object (e.g. `{"id": ...}` in create/attach replies).
    pub fn data(&self) -> Option<Message> {
        self.sub_message(attr::DATA)
    }

    /// Plugin package name of a `plugindata` envelope.
    pub fn plugin(&self) -> Option<&str> {
        self.str(attr::PLUGIN)
    }

    /// The `plugindata` envelope carried by plugin replies and events.
    pub fn plugin_data(&self) -> Option<Message> {
        self.sub_message(attr::PLUGIN_DATA)
    }

    /// Session description attached to an offer/answer.
    pub fn jsep(&self) -> Option<Message> {
        self.sub_message(attr::JSEP)
    }

    /// Use the existing transaction id or assign a fresh one, returning it.
    pub fn ensure_transaction(&mut self) -> String {
        if let Some(tid) = self.transaction() {
            return tid.to_string();
        }
        if self.contains_key(attr::TRANSACTION) {
            tracing::debug!("replacing non-string transaction id");
        }
        let tid = crate::id::transaction_id();
        self.set(attr::TRANSACTION, tid.clone());
        tid
    }

    // --- Classification ---

    fn is_type(&self, kind: &str) -> bool {
        self.str(attr::JANUS)
            .map(|t| t.eq_ignore_ascii_case(kind))
            .unwrap_or(false)
    }

    pub fn is_ack(&self) -> bool {
        self.is_type("ack")
    }

    pub fn is_success(&self) -> bool {
        self.is_type("success")
    }

    pub fn is_event(&self) -> bool {
        self.is_type("event")
    }

    pub fn is_error(&self) -> bool {
        self.is_type("error")
    }

    /// The error this message reports, if any.
    ///
    /// Covers gateway-level `error` replies as well as plugin errors nested in
    /// `plugindata` or `plugindata.data`.
    pub fn error(&self) -> Option<ProtocolError> {
        if self.is_error() {
            let info = self.sub_message(attr::ERROR).unwrap_or_default();
            let reason = info.str(attr::REASON).unwrap_or("unknown error");
            return Some(ProtocolError::new(info.u64(attr::CODE), reason));
        }
        self.plugin_data()?.plugin_data_error()
    }

    /// Error reported inside a plugin payload, searching nested `data` objects.
    pub fn plugin_data_error(&self) -> Option<ProtocolError> {
        match self.get(attr::ERROR) {
            Some(Value::String(reason)) => {
                Some(ProtocolError::new(self.u64(attr::ERROR_CODE), reason.clone()))
            }
            Some(Value::Object(info)) => {
                let reason = info
                    .get(attr::REASON)
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error");
                let code = info
                    .get(attr::CODE)
                    .and_then(Value::as_u64)
                    .or_else(|| self.u64(attr::ERROR_CODE));
                Some(ProtocolError::new(code, reason))
            }
            Some(_) => Some(ProtocolError::new(self.u64(attr::ERROR_CODE), "unknown error")),
            None => self.data()?.plugin_data_error(),
        }
    }

    /// `Err` when the message reports an error, otherwise the message itself.
    pub fn into_result(self) -> Result<Message, ProtocolError> {
        match self.error() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(&self.0) {
            Ok(json) => f.write_str(&json),
            Err(_) => f.write_str("{}"),
        }
    }
}

impl From<Map<String, Value>> for Message {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Message> for Value {
    fn from(msg: Message) -> Self {
        Value::Object(msg.0)
    }
}

impl TryFrom<Value> for Message {
    type Error = Value;

    /// Fails, handing the value back, when it is not a JSON object.
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(other),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Message {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
