//! Gateway connection.
//!
//! A [`Connection`] owns at most one live WebSocket at a time and redials
//! forever until it is closed. All of its mutable state (the transaction
//! table, the session table and the link state) belongs to a single actor
//! task, so there are no locks on the hot path. Callers talk to the actor
//! through three queues:
//!
//! - a lossless, unbounded queue for transaction registration
//! - a bounded administrative queue, where a full queue drops the task
//! - a bounded outbound frame queue, where a full queue makes the sender wait

use crate::error::ClientError;
use crate::session::Session;
use crate::transport::{self, LinkEvent, OutboundQueue};
use crate::Result;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use jwsapi_core::{attr, id, ClientConfig, Message, MessageType, ProtocolError};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

/// Transport state as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// A dial cycle is in progress.
    Connecting,
    /// A socket is up and both pumps are running.
    Connected,
    /// The socket was lost, or the connection was closed for good.
    Closed,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Snapshot of the transport state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkStatus {
    pub state: LinkState,
    /// Number of successful dials so far.
    pub generation: u64,
    pub changed_at: DateTime<Utc>,
}

/// Administrative work for the connection actor.
pub(crate) enum Task {
    AddSession {
        session: Session,
        cancel: CancellationToken,
    },
    RemoveSession {
        session_id: u64,
    },
    SessionIds(oneshot::Sender<Vec<u64>>),
    PendingTransactions(oneshot::Sender<Vec<String>>),
}

enum TransactionOp {
    Register {
        tid: String,
        serial: u64,
        replies: usize,
        tx: mpsc::Sender<Message>,
        ack: oneshot::Sender<bool>,
    },
    Deregister {
        tid: String,
        serial: u64,
    },
}

struct Pending {
    serial: u64,
    tx: mpsc::Sender<Message>,
    remaining: usize,
}

pub(crate) struct ConnectionShared {
    label: String,
    config: Arc<ClientConfig>,
    tasks: mpsc::Sender<Task>,
    transactions: mpsc::UnboundedSender<TransactionOp>,
    outbound: mpsc::Sender<String>,
    status: watch::Receiver<LinkStatus>,
    serial: AtomicU64,
    destroyed: Arc<AtomicBool>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

/// Client connection to a Janus gateway.
///
/// Cheap to clone. The connection shuts down when [`Connection::close`] is
/// called, when the parent cancellation token fires, or when the last clone
/// is dropped.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionShared>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("label", &self.inner.label)
            .field("url", &self.inner.config.url)
            .field("state", &self.inner.status.borrow().state)
            .finish()
    }
}

impl Connection {
    /// Start a connection governed by `parent`. Must be called from within a
    /// tokio runtime; dialing starts immediately in the background.
    pub fn new(config: ClientConfig, parent: &CancellationToken) -> Self {
        let label = format!("[conn {}]", id::short_id());
        let config = Arc::new(config);
        let cancel = parent.child_token();

        let (tasks_tx, tasks_rx) = mpsc::channel(config.queues.tasks);
        let (txn_tx, txn_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::channel(config.queues.outbound);
        let (inbound_tx, inbound_rx) = mpsc::channel(config.queues.inbound);
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(LinkStatus {
            state: LinkState::Connecting,
            generation: 0,
            changed_at: Utc::now(),
        });
        let destroyed = Arc::new(AtomicBool::new(false));

        let actor = ConnectionActor {
            label: label.clone(),
            config: config.clone(),
            cancel: cancel.clone(),
            sessions: HashMap::new(),
            transactions: HashMap::new(),
            state: LinkState::Connecting,
            epoch: 0,
            generation: 0,
            disconnected_since: None,
            socket: None,
            inbound_tx,
            link_tx,
            outbound: Arc::new(Mutex::new(outbound_rx)),
            status: status_tx,
            destroyed: destroyed.clone(),
        };
        tokio::spawn(actor.run(tasks_rx, txn_rx, inbound_rx, link_rx));

        info!("{} opening {}", label, config.url);

        Self {
            inner: Arc::new(ConnectionShared {
                label,
                config,
                tasks: tasks_tx,
                transactions: txn_tx,
                outbound: outbound_tx,
                status: status_rx,
                serial: AtomicU64::new(0),
                destroyed,
                _guard: cancel.clone().drop_guard(),
                cancel,
            }),
        }
    }

    /// Start a connection with its own root cancellation scope.
    pub fn open(config: ClientConfig) -> Self {
        Self::new(config, &CancellationToken::new())
    }

    /// Log label of this connection.
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Current transport state.
    pub fn status(&self) -> LinkStatus {
        self.inner.status.borrow().clone()
    }

    /// Subscribe to transport state changes.
    pub fn watch_status(&self) -> watch::Receiver<LinkStatus> {
        self.inner.status.clone()
    }

    /// Wait until a socket is up, or fail after `budget`.
    pub async fn wait_connected(&self, budget: Duration) -> Result<()> {
        let mut status = self.watch_status();
        let wait = status.wait_for(|s| s.state == LinkState::Connected);
        let result = tokio::time::timeout(budget, wait)
            .await
            .map(|r| r.map(|_| ()));
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => Err(ClientError::Timeout {
                timeout_ms: u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
                context: format!("connection to {}", self.inner.config.url),
            }),
        }
    }

    /// Whether the connection has shut down. Terminal.
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire) || self.inner.cancel.is_cancelled()
    }

    /// Shut the connection down. Every session and handle created from it is
    /// torn down locally; nothing is sent to the gateway.
    pub fn close(&self) {
        if !self.inner.cancel.is_cancelled() {
            info!("{} closing", self.inner.label);
        }
        self.inner.cancel.cancel();
    }

    /// Create a gateway session.
    pub async fn create(&self) -> Result<Session> {
        let rsp = self.request(Message::of(MessageType::Create)).await?;
        let session_id = rsp
            .data()
            .and_then(|data| data.u64(attr::ID))
            .ok_or_else(|| {
                ClientError::InvalidResponse(format!("create reply carries no session id: {}", rsp))
            })?;

        let cancel = self.inner.cancel.child_token();
        let session = Session::spawn(session_id, self, cancel.clone());
        if let Err(e) = self.submit(Task::AddSession {
            session: session.clone(),
            cancel,
        }) {
            // The gateway already holds the session; give it back.
            if let Err(destroy_err) = session.destroy().await {
                debug!(
                    "{} could not destroy untracked session {}: {}",
                    self.inner.label, session_id, destroy_err
                );
            }
            return Err(e);
        }

        info!("{} session {} created", self.inner.label, session_id);
        Ok(session)
    }

    /// Ask the gateway to describe itself.
    pub async fn info(&self) -> Result<Message> {
        self.request(Message::of(MessageType::Info)).await
    }

    /// Send `msg` and wait for a single correlated reply.
    ///
    /// A transaction id is generated unless `msg` already carries a string one.
    pub async fn request(&self, msg: Message) -> Result<Message> {
        let mut replies = self.send_transaction(msg, 1).await?;
        let rsp = replies.next(self.inner.config.request_timeout(), "response").await?;
        Ok(rsp.into_result()?)
    }

    /// Send `msg` and wait for an acknowledgement followed by an event.
    ///
    /// Each phase gets the full request timeout. A first reply that is not an
    /// error is treated as the acknowledgement whatever its type; callers that
    /// expect a synchronous answer use [`Connection::request`].
    pub async fn message(&self, msg: Message) -> Result<Message> {
        let budget = self.inner.config.request_timeout();
        let mut replies = self.send_transaction(msg, 2).await?;

        let ack = replies.next(budget, "acknowledgement").await?;
        if ack.is_error() {
            let err = ack
                .error()
                .unwrap_or_else(|| ProtocolError::new(None, "unspecified error"));
            return Err(err.into());
        }
        if !ack.is_ack() {
            debug!(
                "{} {} reply taken as acknowledgement for {}",
                self.inner.label,
                ack.kind().map(|k| k.to_string()).unwrap_or_default(),
                replies.context
            );
        }

        let event = replies.next(budget, "event").await?;
        Ok(event.into_result()?)
    }

    /// Ids of the sessions currently registered on this connection.
    pub async fn session_ids(&self) -> Result<Vec<u64>> {
        let (tx, rx) = oneshot::channel();
        self.submit(Task::SessionIds(tx))?;
        rx.await.map_err(|_| ClientError::ConnectionClosed)
    }

    /// Transaction ids still awaiting replies.
    pub async fn pending_transactions(&self) -> Result<Vec<String>> {
        let (tx, rx) = oneshot::channel();
        self.submit(Task::PendingTransactions(tx))?;
        rx.await.map_err(|_| ClientError::ConnectionClosed)
    }

    pub(crate) fn remove_session(&self, session_id: u64) {
        if let Err(e) = self.submit(Task::RemoveSession { session_id }) {
            debug!(
                "{} could not remove session {}: {}",
                self.inner.label, session_id, e
            );
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<ConnectionShared> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(shared: &Weak<ConnectionShared>) -> Option<Self> {
        shared.upgrade().map(|inner| Self { inner })
    }

    pub(crate) fn shared_config(&self) -> Arc<ClientConfig> {
        self.inner.config.clone()
    }

    fn submit(&self, task: Task) -> Result<()> {
        match self.inner.tasks.try_send(task) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("{} task queue full, dropping task", self.inner.label);
                Err(ClientError::Busy("connection task queue".to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ClientError::ConnectionClosed),
        }
    }

    async fn send_transaction(&self, mut msg: Message, replies: usize) -> Result<Replies> {
        if self.is_destroyed() {
            return Err(ClientError::ConnectionClosed);
        }

        let tid = msg.ensure_transaction();
        let serial = self.inner.serial.fetch_add(1, Ordering::Relaxed);
        let context = format!(
            "{} (transaction {})",
            msg.str(attr::JANUS).unwrap_or("message"),
            tid
        );
        let frame = msg.to_json()?;

        let (tx, rx) = mpsc::channel(replies);
        let (ack_tx, ack_rx) = oneshot::channel();
        self.inner
            .transactions
            .send(TransactionOp::Register {
                tid: tid.clone(),
                serial,
                replies,
                tx,
                ack: ack_tx,
            })
            .map_err(|_| ClientError::ConnectionClosed)?;
        match ack_rx.await {
            Ok(true) => {}
            Ok(false) => return Err(ClientError::DuplicateTransaction(tid)),
            Err(_) => return Err(ClientError::ConnectionClosed),
        }

        let guard = TransactionGuard {
            tid,
            serial,
            ops: self.inner.transactions.clone(),
        };

        let budget = self.inner.config.request_timeout();
        match tokio::time::timeout(budget, self.inner.outbound.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return Err(ClientError::ConnectionClosed),
            Err(_) => {
                return Err(ClientError::Timeout {
                    timeout_ms: self.inner.config.request_timeout_ms,
                    context: format!("outbound queue for {}", context),
                })
            }
        }

        Ok(Replies {
            rx,
            context,
            _guard: guard,
        })
    }
}

/// Reply stream of one registered transaction.
struct Replies {
    rx: mpsc::Receiver<Message>,
    context: String,
    _guard: TransactionGuard,
}

impl Replies {
    async fn next(&mut self, budget: Duration, phase: &str) -> Result<Message> {
        match tokio::time::timeout(budget, self.rx.recv()).await {
            Ok(Some(msg)) => Ok(msg),
            Ok(None) => Err(ClientError::ConnectionClosed),
            Err(_) => Err(ClientError::Timeout {
                timeout_ms: u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
                context: format!("{} to {}", phase, self.context),
            }),
        }
    }
}

/// Removes the transaction entry when the caller stops waiting, whatever the outcome.
struct TransactionGuard {
    tid: String,
    serial: u64,
    ops: mpsc::UnboundedSender<TransactionOp>,
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        let _ = self.ops.send(TransactionOp::Deregister {
            tid: std::mem::take(&mut self.tid),
            serial: self.serial,
        });
    }
}

struct SessionEntry {
    session: Session,
    cancel: CancellationToken,
}

struct ConnectionActor {
    label: String,
    config: Arc<ClientConfig>,
    cancel: CancellationToken,
    sessions: HashMap<u64, SessionEntry>,
    transactions: HashMap<String, Pending>,
    state: LinkState,
    /// Dial cycle counter; frames and link reports from older cycles are stale.
    epoch: u64,
    generation: u64,
    disconnected_since: Option<Instant>,
    socket: Option<CancellationToken>,
    inbound_tx: mpsc::Sender<(u64, Message)>,
    link_tx: mpsc::UnboundedSender<LinkEvent>,
    outbound: OutboundQueue,
    status: watch::Sender<LinkStatus>,
    destroyed: Arc<AtomicBool>,
}

impl ConnectionActor {
    async fn run(
        mut self,
        mut tasks: mpsc::Receiver<Task>,
        mut txn_ops: mpsc::UnboundedReceiver<TransactionOp>,
        mut inbound: mpsc::Receiver<(u64, Message)>,
        mut link: mpsc::UnboundedReceiver<LinkEvent>,
    ) {
        let period = (self.config.disconnect_grace() / 4).max(Duration::from_millis(10));
        let mut grace_check = tokio::time::interval(period);
        grace_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.start_dial();

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                Some(op) = txn_ops.recv() => self.apply_transaction_op(op),

                Some(event) = link.recv() => self.on_link_event(event),

                Some(task) = tasks.recv() => self.apply_task(task),

                Some((epoch, msg)) = inbound.recv() => self.route(epoch, msg),

                _ = grace_check.tick() => self.check_grace(Instant::now()),
            }
        }

        self.shutdown();
    }

    fn start_dial(&mut self) {
        self.epoch += 1;
        self.set_state(LinkState::Connecting);
        tokio::spawn(transport::dial_loop(
            self.label.clone(),
            self.config.clone(),
            self.epoch,
            self.link_tx.clone(),
            self.cancel.clone(),
        ));
    }

    fn set_state(&mut self, state: LinkState) {
        self.state = state;
        let generation = self.generation;
        self.status.send_replace(LinkStatus {
            state,
            generation,
            changed_at: Utc::now(),
        });
    }

    fn on_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Up { epoch, stream } => {
                if epoch != self.epoch || self.state == LinkState::Connected {
                    debug!("{} discarding stale socket (epoch {})", self.label, epoch);
                    return;
                }

                let socket = self.cancel.child_token();
                let (sink, source) = stream.split();
                tokio::spawn(transport::read_pump(
                    self.label.clone(),
                    source,
                    self.inbound_tx.clone(),
                    self.link_tx.clone(),
                    epoch,
                    socket.clone(),
                ));
                tokio::spawn(transport::write_pump(
                    self.label.clone(),
                    sink,
                    self.outbound.clone(),
                    self.link_tx.clone(),
                    epoch,
                    self.config.write_timeout(),
                    socket.clone(),
                ));
                self.socket = Some(socket);

                self.generation += 1;
                self.disconnected_since = None;
                self.set_state(LinkState::Connected);
                info!(
                    "{} connected (generation {}, {} sessions to claim)",
                    self.label,
                    self.generation,
                    self.sessions.len()
                );

                if self.generation > 1 {
                    self.prune_sessions();
                    for entry in self.sessions.values() {
                        let session = entry.session.clone();
                        tokio::spawn(async move { session.claim().await });
                    }
                }
            }
            LinkEvent::Down { epoch, reason } => {
                if epoch != self.epoch || self.state != LinkState::Connected {
                    return;
                }
                warn!("{} transport lost: {}", self.label, reason);

                if let Some(socket) = self.socket.take() {
                    socket.cancel();
                }
                self.disconnected_since = Some(Instant::now());
                self.set_state(LinkState::Closed);
                self.start_dial();
            }
        }
    }

    fn apply_transaction_op(&mut self, op: TransactionOp) {
        match op {
            TransactionOp::Register {
                tid,
                serial,
                replies,
                tx,
                ack,
            } => {
                if self.transactions.contains_key(&tid) {
                    warn!("{} transaction {} already in flight", self.label, tid);
                    let _ = ack.send(false);
                    return;
                }
                self.transactions.insert(
                    tid,
                    Pending {
                        serial,
                        tx,
                        remaining: replies,
                    },
                );
                let _ = ack.send(true);
            }
            TransactionOp::Deregister { tid, serial } => {
                if self
                    .transactions
                    .get(&tid)
                    .is_some_and(|pending| pending.serial == serial)
                {
                    self.transactions.remove(&tid);
                }
            }
        }
    }

    /// Demultiplex one inbound frame: transaction first, then session.
    fn route(&mut self, epoch: u64, msg: Message) {
        if epoch != self.epoch {
            debug!("{} dropping frame from stale socket: {}", self.label, msg);
            return;
        }

        if let Some(tid) = msg.transaction().map(str::to_owned) {
            if let Some(pending) = self.transactions.get_mut(&tid) {
                pending.remaining = pending.remaining.saturating_sub(1);
                let done = pending.remaining == 0;
                if pending.tx.try_send(msg).is_err() {
                    debug!("{} caller of transaction {} is gone", self.label, tid);
                }
                if done {
                    self.transactions.remove(&tid);
                }
                return;
            }
        }

        match msg.session_id() {
            Some(session_id) => match self.sessions.get(&session_id) {
                Some(entry) => entry.session.deliver(msg),
                None => warn!(
                    "{} no session {} for {} message",
                    self.label,
                    session_id,
                    msg.str(attr::JANUS).unwrap_or("untyped")
                ),
            },
            None => warn!("{} unroutable message: {}", self.label, msg),
        }
    }

    fn apply_task(&mut self, task: Task) {
        match task {
            Task::AddSession { session, cancel } => {
                self.prune_sessions();
                self.sessions
                    .insert(session.id(), SessionEntry { session, cancel });
            }
            Task::RemoveSession { session_id } => {
                if let Some(entry) = self.sessions.remove(&session_id) {
                    entry.cancel.cancel();
                    info!("{} session {} removed", self.label, session_id);
                }
            }
            Task::SessionIds(reply) => {
                self.prune_sessions();
                let mut ids: Vec<u64> = self.sessions.keys().copied().collect();
                ids.sort_unstable();
                let _ = reply.send(ids);
            }
            Task::PendingTransactions(reply) => {
                let _ = reply.send(self.transactions.keys().cloned().collect());
            }
        }
    }

    /// Forget sessions that were torn down but whose removal task was dropped.
    fn prune_sessions(&mut self) {
        let label = &self.label;
        self.sessions.retain(|session_id, entry| {
            let live = !entry.cancel.is_cancelled();
            if !live {
                debug!("{} pruning dead session {}", label, session_id);
            }
            live
        });
    }

    /// Tear down every session once the transport has been down past the grace period.
    fn check_grace(&mut self, now: Instant) {
        if self.state == LinkState::Connected || self.sessions.is_empty() {
            return;
        }
        let Some(since) = self.disconnected_since else {
            return;
        };
        let down = now.saturating_duration_since(since);
        if down < self.config.disconnect_grace() {
            return;
        }

        warn!(
            "{} disconnected for {:?}, dropping {} sessions",
            self.label,
            down,
            self.sessions.len()
        );
        for (session_id, entry) in self.sessions.drain() {
            debug!("{} session {} dropped", self.label, session_id);
            entry.cancel.cancel();
        }
    }

    fn shutdown(&mut self) {
        self.destroyed.store(true, Ordering::Release);
        if let Some(socket) = self.socket.take() {
            socket.cancel();
        }
        for (_, entry) in self.sessions.drain() {
            entry.cancel.cancel();
        }
        // Dropping the senders wakes every waiting caller with ConnectionClosed.
        self.transactions.clear();
        self.set_state(LinkState::Closed);
        info!("{} exec loop done", self.label);
    }
}
