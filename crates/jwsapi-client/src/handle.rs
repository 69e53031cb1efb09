//! Plugin handles.
//!
//! A handle's dispatch task receives the frames its session routes to it.
//! Plugin `event` messages go to the [`Events`] stream and the other
//! notifications go to the registered [`Callbacks`]. When the handle is
//! detached or its session goes away, the task fires the hangup callback
//! with a synthetic message and then closes the event stream.

use crate::callbacks::{Callbacks, Notification};
use crate::error::ClientError;
use crate::session::Session;
use crate::Result;
use futures::Stream;
use jwsapi_core::{attr, Message, MessageType};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Plugin events delivered to a handle, in arrival order.
///
/// Ends after the handle is torn down.
#[derive(Debug)]
pub struct Events {
    rx: mpsc::Receiver<Message>,
}

impl Events {
    /// Next event, or `None` once the handle is gone.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

impl Stream for Events {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        self.rx.poll_recv(cx)
    }
}

struct HandleShared {
    id: u64,
    label: String,
    session: Session,
    inbox: mpsc::Sender<Message>,
    callbacks: RwLock<Callbacks>,
    events: Mutex<Option<Events>>,
    cancel: CancellationToken,
    detached: AtomicBool,
}

/// A plugin handle attached to a session. Cheap to clone.
#[derive(Clone)]
pub struct Handle {
    inner: Arc<HandleShared>,
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.inner.id)
            .field("session_id", &self.inner.session.id())
            .field("detached", &self.is_detached())
            .field("callbacks", &*self.inner.callbacks.read())
            .finish()
    }
}

impl Handle {
    pub(crate) fn spawn(id: u64, session: Session, cancel: CancellationToken) -> Self {
        let queues = &session.config().queues;
        let (inbox_tx, inbox_rx) = mpsc::channel(queues.handle);
        let (events_tx, events_rx) = mpsc::channel(queues.events);

        let handle = Self {
            inner: Arc::new(HandleShared {
                id,
                label: format!("{} handle {}", session.label(), id),
                session,
                inbox: inbox_tx,
                callbacks: RwLock::new(Callbacks::new()),
                events: Mutex::new(Some(Events { rx: events_rx })),
                cancel,
                detached: AtomicBool::new(false),
            }),
        };

        tokio::spawn(dispatch_loop(handle.clone(), inbox_rx, events_tx));
        handle
    }

    /// Gateway-assigned handle id.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Id of the owning session.
    pub fn session_id(&self) -> u64 {
        self.inner.session.id()
    }

    /// Whether the handle is detached or its session is gone. Terminal.
    pub fn is_detached(&self) -> bool {
        self.inner.detached.load(Ordering::Acquire) || self.inner.cancel.is_cancelled()
    }

    /// Take the plugin event stream. Only the first call gets it.
    pub fn events(&self) -> Option<Events> {
        self.inner.events.lock().take()
    }

    /// Register `callback` for `notification`, replacing any previous one.
    pub fn set_callback<F>(&self, notification: Notification, callback: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.inner
            .callbacks
            .write()
            .set(notification, Arc::new(callback));
    }

    pub fn clear_callback(&self, notification: Notification) {
        self.inner.callbacks.write().clear(notification);
    }

    /// Send a plugin message and wait for the synchronous reply.
    pub async fn request(&self, body: Message) -> Result<Message> {
        self.ensure_attached()?;
        self.inner.session.request(self.envelope(body, None)).await
    }

    /// Send a plugin message and wait for its acknowledgement and event.
    pub async fn message(&self, body: Message) -> Result<Message> {
        self.ensure_attached()?;
        self.inner.session.message(self.envelope(body, None)).await
    }

    /// Like [`Handle::message`], with an SDP offer or answer attached.
    pub async fn jsep_message(&self, body: Message, jsep: Message) -> Result<Message> {
        self.ensure_attached()?;
        self.inner
            .session
            .message(self.envelope(body, Some(jsep)))
            .await
    }

    /// Trickle one ICE candidate.
    pub async fn trickle(&self, candidate: Message) -> Result<()> {
        self.send_trickle(attr::CANDIDATE, candidate.into()).await
    }

    /// Trickle several ICE candidates in one request.
    pub async fn trickle_many(&self, candidates: Vec<Message>) -> Result<()> {
        let candidates = Value::Array(candidates.into_iter().map(Value::from).collect());
        self.send_trickle(attr::CANDIDATES, candidates).await
    }

    /// Signal the end of candidate gathering.
    pub async fn trickle_completed(&self) -> Result<()> {
        let done = Message::new().with("completed", true);
        self.send_trickle(attr::CANDIDATE, done.into()).await
    }

    /// Detach from the plugin. The handle is torn down locally whether or not
    /// the gateway confirms.
    pub async fn detach(&self) -> Result<()> {
        self.ensure_attached()?;
        let msg = Message::of(MessageType::Detach).with(attr::HANDLE_ID, self.inner.id);
        let result = self.inner.session.request(msg).await;
        info!("{} detached", self.inner.label);
        self.teardown();
        result.map(|_| ())
    }

    pub(crate) fn deliver(&self, msg: Message) {
        match self.inner.inbox.try_send(msg) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("{} queue full, dropping message", self.inner.label);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("{} gone, dropping message", self.inner.label);
            }
        }
    }

    async fn send_trickle(&self, key: &str, value: Value) -> Result<()> {
        self.ensure_attached()?;
        let msg = Message::of(MessageType::Trickle)
            .with(attr::HANDLE_ID, self.inner.id)
            .with(key, value);
        self.inner.session.request(msg).await.map(|_| ())
    }

    fn envelope(&self, body: Message, jsep: Option<Message>) -> Message {
        let mut msg = Message::of(MessageType::Message)
            .with(attr::HANDLE_ID, self.inner.id)
            .with(attr::BODY, body);
        if let Some(jsep) = jsep {
            msg.set(attr::JSEP, jsep);
        }
        msg
    }

    fn ensure_attached(&self) -> Result<()> {
        if self.is_detached() {
            return Err(ClientError::Detached {
                handle_id: self.inner.id,
            });
        }
        Ok(())
    }

    fn notify(&self, notification: Notification, msg: &Message) {
        // Clone out of the lock so a callback may replace callbacks.
        let callbacks = self.inner.callbacks.read().clone();
        callbacks.fire(notification, msg);
    }

    fn teardown(&self) {
        self.inner.detached.store(true, Ordering::Release);
        self.inner.session.remove_handle(self.inner.id);
        self.inner.cancel.cancel();
    }
}

async fn dispatch_loop(
    handle: Handle,
    mut inbox: mpsc::Receiver<Message>,
    events: mpsc::Sender<Message>,
) {
    let cancel = handle.inner.cancel.clone();
    let label = handle.inner.label.clone();

    loop {
        let msg = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            msg = inbox.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        match msg.kind() {
            Some(MessageType::Event) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    sent = events.send(msg) => {
                        if sent.is_err() {
                            debug!("{} event stream dropped, discarding event", label);
                        }
                    }
                }
            }
            Some(MessageType::Detached) => {
                debug!("{} gateway reports plugin detached", label);
            }
            Some(kind) => match Notification::from_type(&kind) {
                Some(notification) => handle.notify(notification, &msg),
                None => debug!("{} ignoring {} message", label, kind),
            },
            None => debug!("{} ignoring untyped message: {}", label, msg),
        }
    }

    handle.inner.detached.store(true, Ordering::Release);
    let hangup = Message::of(MessageType::Hangup)
        .with(attr::SESSION_ID, handle.session_id())
        .with(attr::SENDER, handle.id())
        .with(attr::REASON, "cancelled");
    handle.notify(Notification::Hangup, &hangup);
    drop(events);
    debug!("{} exec loop done", label);
}
