//! Gateway sessions.
//!
//! Each session runs its own actor task. The actor owns the handle table,
//! routes frames forwarded by the connection to the right handle, and sends
//! a keepalive every `keepalive_interval`. Cancelling the session token stops
//! the actor and, through child tokens, every handle attached to it.

use crate::connection::{Connection, ConnectionShared};
use crate::error::ClientError;
use crate::handle::Handle;
use crate::Result;
use jwsapi_core::{attr, ClientConfig, Message, MessageType};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub(crate) enum SessionTask {
    AddHandle {
        handle: Handle,
        cancel: CancellationToken,
    },
    RemoveHandle {
        handle_id: u64,
    },
    Dispatch(Message),
    HandleIds(oneshot::Sender<Vec<u64>>),
}

struct SessionShared {
    id: u64,
    label: String,
    connection: Weak<ConnectionShared>,
    config: Arc<ClientConfig>,
    tasks: mpsc::Sender<SessionTask>,
    cancel: CancellationToken,
    destroyed: AtomicBool,
}

/// A gateway session. Cheap to clone.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionShared>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl Session {
    /// Start the actor for a session the gateway has just created.
    pub(crate) fn spawn(id: u64, connection: &Connection, cancel: CancellationToken) -> Self {
        let config = connection.shared_config();
        let (tasks_tx, tasks_rx) = mpsc::channel(config.queues.session);
        let session = Self {
            inner: Arc::new(SessionShared {
                id,
                label: format!("{} session {}", connection.label(), id),
                connection: connection.downgrade(),
                config,
                tasks: tasks_tx,
                cancel,
                destroyed: AtomicBool::new(false),
            }),
        };

        let actor = SessionActor {
            session: session.clone(),
            handles: HashMap::new(),
        };
        tokio::spawn(actor.run(tasks_rx));
        session
    }

    /// Gateway-assigned session id.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Whether the session is gone, locally or on the gateway. Terminal.
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire) || self.inner.cancel.is_cancelled()
    }

    /// Attach a plugin handle.
    pub async fn attach(&self, plugin: &str) -> Result<Handle> {
        self.attach_inner(plugin, None).await
    }

    /// Attach a plugin handle tagged with an opaque id the gateway echoes in its events.
    pub async fn attach_with_opaque_id(&self, plugin: &str, opaque_id: &str) -> Result<Handle> {
        self.attach_inner(plugin, Some(opaque_id)).await
    }

    async fn attach_inner(&self, plugin: &str, opaque_id: Option<&str>) -> Result<Handle> {
        let mut msg = Message::of(MessageType::Attach).with(attr::PLUGIN, plugin);
        if let Some(opaque_id) = opaque_id {
            msg.set(attr::OPAQUE_ID, opaque_id);
        }

        let rsp = self.request(msg).await?;
        let handle_id = rsp
            .data()
            .and_then(|data| data.u64(attr::ID))
            .ok_or_else(|| {
                ClientError::InvalidResponse(format!("attach reply carries no handle id: {}", rsp))
            })?;

        let cancel = self.inner.cancel.child_token();
        let handle = Handle::spawn(handle_id, self.clone(), cancel.clone());
        if let Err(e) = self.submit(SessionTask::AddHandle {
            handle: handle.clone(),
            cancel,
        }) {
            // The gateway already holds the handle; give it back.
            if let Err(detach_err) = handle.detach().await {
                debug!(
                    "{} could not detach untracked handle {}: {}",
                    self.inner.label, handle_id, detach_err
                );
            }
            return Err(e);
        }

        info!("{} attached {} as handle {}", self.inner.label, plugin, handle_id);
        Ok(handle)
    }

    /// Send a session-scoped request and wait for its single reply.
    pub async fn request(&self, mut msg: Message) -> Result<Message> {
        let connection = self.live_connection()?;
        msg.set(attr::SESSION_ID, self.inner.id);
        connection.request(msg).await
    }

    /// Send a session-scoped message and wait for its acknowledgement and event.
    pub async fn message(&self, mut msg: Message) -> Result<Message> {
        let connection = self.live_connection()?;
        msg.set(attr::SESSION_ID, self.inner.id);
        connection.message(msg).await
    }

    /// Destroy the session on the gateway. The session is torn down locally
    /// whether or not the gateway confirms.
    pub async fn destroy(&self) -> Result<()> {
        let result = self.request(Message::of(MessageType::Destroy)).await;
        if !self.is_destroyed() {
            info!("{} destroyed", self.inner.label);
        }
        self.teardown();
        result.map(|_| ())
    }

    /// Ids of the handles currently attached.
    pub async fn handle_ids(&self) -> Result<Vec<u64>> {
        if self.is_destroyed() {
            return Err(self.destroyed_error());
        }
        let (tx, rx) = oneshot::channel();
        self.submit(SessionTask::HandleIds(tx))?;
        rx.await.map_err(|_| self.destroyed_error())
    }

    /// Reclaim the session after the transport was replaced. A session that
    /// cannot be reclaimed is torn down.
    pub(crate) async fn claim(&self) {
        match self.request(Message::of(MessageType::Claim)).await {
            Ok(_) => info!("{} claimed", self.inner.label),
            Err(e) => {
                error!("{} claim failed: {}", self.inner.label, e);
                self.teardown();
            }
        }
    }

    pub(crate) async fn keepalive(&self) -> Result<()> {
        self.request(Message::of(MessageType::Keepalive)).await.map(|_| ())
    }

    /// Hand a frame routed by the connection to the session actor.
    pub(crate) fn deliver(&self, msg: Message) {
        match self.inner.tasks.try_send(SessionTask::Dispatch(msg)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("{} queue full, dropping message", self.inner.label);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("{} gone, dropping message", self.inner.label);
            }
        }
    }

    pub(crate) fn remove_handle(&self, handle_id: u64) {
        if let Err(e) = self.submit(SessionTask::RemoveHandle { handle_id }) {
            debug!(
                "{} could not remove handle {}: {}",
                self.inner.label, handle_id, e
            );
        }
    }

    pub(crate) fn label(&self) -> &str {
        &self.inner.label
    }

    pub(crate) fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    fn live_connection(&self) -> Result<Connection> {
        if self.is_destroyed() {
            return Err(self.destroyed_error());
        }
        Connection::upgrade(&self.inner.connection).ok_or(ClientError::ConnectionClosed)
    }

    fn destroyed_error(&self) -> ClientError {
        ClientError::SessionDestroyed {
            session_id: self.inner.id,
        }
    }

    fn submit(&self, task: SessionTask) -> Result<()> {
        match self.inner.tasks.try_send(task) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("{} task queue full, dropping task", self.inner.label);
                Err(ClientError::Busy(format!("session {} task queue", self.inner.id)))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(self.destroyed_error()),
        }
    }

    /// Mark dead, leave the connection's table and stop the actor. Idempotent.
    fn teardown(&self) {
        self.inner.destroyed.store(true, Ordering::Release);
        if let Some(connection) = Connection::upgrade(&self.inner.connection) {
            connection.remove_session(self.inner.id);
        }
        self.inner.cancel.cancel();
    }
}

struct HandleEntry {
    handle: Handle,
    cancel: CancellationToken,
}

struct SessionActor {
    session: Session,
    handles: HashMap<u64, HandleEntry>,
}

impl SessionActor {
    async fn run(mut self, mut tasks: mpsc::Receiver<SessionTask>) {
        let cancel = self.session.inner.cancel.clone();
        let period = self.session.inner.config.keepalive_interval();
        let mut keepalive = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                Some(task) = tasks.recv() => self.apply(task),

                _ = keepalive.tick() => {
                    let session = self.session.clone();
                    tokio::spawn(async move {
                        if let Err(e) = session.keepalive().await {
                            warn!("{} keepalive failed: {}", session.inner.label, e);
                        }
                    });
                }
            }
        }

        self.session.teardown();
        for (_, entry) in self.handles.drain() {
            entry.cancel.cancel();
        }
        info!("{} exec loop done", self.session.inner.label);
    }

    fn apply(&mut self, task: SessionTask) {
        match task {
            SessionTask::AddHandle { handle, cancel } => {
                self.prune_handles();
                self.handles.insert(handle.id(), HandleEntry { handle, cancel });
            }
            SessionTask::RemoveHandle { handle_id } => {
                if let Some(entry) = self.handles.remove(&handle_id) {
                    entry.cancel.cancel();
                    debug!("{} handle {} removed", self.session.inner.label, handle_id);
                }
            }
            SessionTask::Dispatch(msg) => self.dispatch(msg),
            SessionTask::HandleIds(reply) => {
                self.prune_handles();
                let mut ids: Vec<u64> = self.handles.keys().copied().collect();
                ids.sort_unstable();
                let _ = reply.send(ids);
            }
        }
    }

    /// Forget handles that were detached but whose removal task was dropped.
    fn prune_handles(&mut self) {
        let label = &self.session.inner.label;
        self.handles.retain(|handle_id, entry| {
            let live = !entry.cancel.is_cancelled();
            if !live {
                debug!("{} pruning detached handle {}", label, handle_id);
            }
            live
        });
    }

    fn dispatch(&mut self, msg: Message) {
        let label = &self.session.inner.label;
        match msg.sender() {
            Some(handle_id) => match self.handles.get(&handle_id) {
                Some(entry) if !entry.cancel.is_cancelled() => entry.handle.deliver(msg),
                Some(_) => {
                    debug!("{} handle {} is detached, dropping message", label, handle_id);
                    self.handles.remove(&handle_id);
                }
                None => warn!("{} can't find handle {}: {}", label, handle_id, msg),
            },
            None => match msg.kind() {
                Some(MessageType::Timeout) => warn!("{} expired on the gateway", label),
                _ => debug!("{} ignoring message without sender: {}", label, msg),
            },
        }
    }
}
