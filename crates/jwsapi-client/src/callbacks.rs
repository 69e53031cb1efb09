//! Per-handle notification callbacks.

use jwsapi_core::{Message, MessageType};
use std::fmt;
use std::sync::Arc;

/// Asynchronous gateway notifications delivered to handle callbacks.
///
/// Plugin `event` messages go to the handle's event stream instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Notification {
    /// PeerConnection is up.
    WebrtcUp,
    /// Media started or stopped flowing.
    Media,
    /// Gateway reports packet loss on the PeerConnection.
    SlowLink,
    /// PeerConnection closed. Also fired locally when the handle is torn down.
    Hangup,
    /// Trickled ICE candidate from the gateway.
    Trickle,
}

impl Notification {
    pub const ALL: [Notification; 5] = [
        Notification::WebrtcUp,
        Notification::Media,
        Notification::SlowLink,
        Notification::Hangup,
        Notification::Trickle,
    ];

    /// The notification carried by a message of this type, if any.
    pub fn from_type(kind: &MessageType) -> Option<Self> {
        match kind {
            MessageType::WebrtcUp => Some(Self::WebrtcUp),
            MessageType::Media => Some(Self::Media),
            MessageType::SlowLink => Some(Self::SlowLink),
            MessageType::Hangup => Some(Self::Hangup),
            MessageType::Trickle => Some(Self::Trickle),
            _ => None,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::WebrtcUp => MessageType::WebrtcUp,
            Self::Media => MessageType::Media,
            Self::SlowLink => MessageType::SlowLink,
            Self::Hangup => MessageType::Hangup,
            Self::Trickle => MessageType::Trickle,
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message_type())
    }
}

/// A notification callback. Runs on the handle's dispatch task, so it should
/// return quickly.
pub type Callback = Arc<dyn Fn(&Message) + Send + Sync>;

/// One optional callback slot per [`Notification`]. Empty slots are no-ops.
#[derive(Clone, Default)]
pub struct Callbacks {
    webrtc_up: Option<Callback>,
    media: Option<Callback>,
    slow_link: Option<Callback>,
    hangup: Option<Callback>,
    trickle: Option<Callback>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, notification: Notification, callback: Callback) {
        *self.slot_mut(notification) = Some(callback);
    }

    pub fn clear(&mut self, notification: Notification) {
        *self.slot_mut(notification) = None;
    }

    pub fn get(&self, notification: Notification) -> Option<Callback> {
        self.slot(notification).clone()
    }

    pub fn is_set(&self, notification: Notification) -> bool {
        self.slot(notification).is_some()
    }

    /// Run the callback for `notification`, if one is set.
    pub fn fire(&self, notification: Notification, msg: &Message) {
        if let Some(callback) = self.slot(notification) {
            callback(msg);
        }
    }

    fn slot(&self, notification: Notification) -> &Option<Callback> {
        match notification {
            Notification::WebrtcUp => &self.webrtc_up,
            Notification::Media => &self.media,
            Notification::SlowLink => &self.slow_link,
            Notification::Hangup => &self.hangup,
            Notification::Trickle => &self.trickle,
        }
    }

    fn slot_mut(&mut self, notification: Notification) -> &mut Option<Callback> {
        match notification {
            Notification::WebrtcUp => &mut self.webrtc_up,
            Notification::Media => &mut self.media,
            Notification::SlowLink => &mut self.slow_link,
            Notification::Hangup => &mut self.hangup,
            Notification::Trickle => &mut self.trickle,
        }
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let set: Vec<Notification> = Notification::ALL
            .into_iter()
            .filter(|n| self.is_set(*n))
            .collect();
        f.debug_struct("Callbacks").field("set", &set).finish()
    }
}
