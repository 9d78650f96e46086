//! Lifecycle of the single real-time connection.
//!
//! [`ConnectionManager`] opens the socket through a [`Connector`], keeps it
//! alive with heartbeats, reconnects after unexpected closes and reports
//! everything the application cares about through a notification channel,
//! in the same command/notification style as the rest of the stack.
//!
//! Each open attempt bumps a generation counter.  Reader, heartbeat and
//! reconnect tasks carry the generation they were spawned for and go quiet
//! once it is stale, so a late close from an old socket can never tear down
//! a newer one.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use lendchat_shared::constants::{
    DEFAULT_WS_URL, HEARTBEAT_INTERVAL_SECS, MAX_RECONNECT_ATTEMPTS, QUERY_CLIENT_ID,
    QUERY_TOKEN, RECONNECT_INTERVAL_SECS,
};
use lendchat_shared::{
    now_millis, ConnectedAck, ConnectionStatus, InboundFrame, Message, OutboundFrame,
    ReadReceipt, TypingNotice,
};

use crate::error::{NetError, Result};
use crate::listeners::ListenerRegistry;
use crate::transport::{Connection, Connector, CredentialProvider, FrameSink, SocketEvent};

/// Capacity of the notification channel towards the application.
const NOTIFICATION_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Configuration / notifications
// ---------------------------------------------------------------------------

/// Connection settings.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Base endpoint, e.g. `wss://chat.example.com/ws`.
    pub endpoint: String,
    /// Identifier of this client installation, sent as `clientId`.
    pub client_id: String,
    pub heartbeat_interval: Duration,
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_WS_URL.to_string(),
            client_id: String::new(),
            heartbeat_interval: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
            reconnect_interval: Duration::from_secs(RECONNECT_INTERVAL_SECS),
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl ConnectionConfig {
    /// Endpoint with the credential and client id appended as query
    /// parameters (percent-encoded).
    pub fn connection_uri(&self, credential: &str) -> Result<Url> {
        let mut uri = Url::parse(&self.endpoint)?;
        uri.query_pairs_mut()
            .append_pair(QUERY_TOKEN, credential)
            .append_pair(QUERY_CLIENT_ID, &self.client_id);
        Ok(uri)
    }
}

/// Events sent *from* the connection to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionNotification {
    /// The socket is open, status is `Connected` and frames can be sent.
    Opened,
    /// A chat message arrived.
    Message {
        go_id: Option<String>,
        message: Message,
    },
    /// The peer is typing.
    Typing(TypingNotice),
    /// The peer read some of our messages.
    Read(ReadReceipt),
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

#[derive(Default)]
struct LinkState {
    status: ConnectionStatus,
    sink: Option<Arc<dyn FrameSink>>,
    generation: u64,
    manual_close: bool,
    reconnect_attempts: u32,
    heartbeat: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
}

impl LinkState {
    fn stop_tasks(&mut self) {
        for task in [
            self.heartbeat.take(),
            self.reader.take(),
            self.reconnect_timer.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
    }
}

struct Inner {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialProvider>,
    listeners: Arc<ListenerRegistry>,
    notify_tx: mpsc::Sender<ConnectionNotification>,
    state: Mutex<LinkState>,
}

/// Owner of the one logical real-time connection.
///
/// Cheap to clone; all clones drive the same socket.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Build a manager.
    ///
    /// Returns the manager plus the receiver of [`ConnectionNotification`]s;
    /// the receiver must be drained or inbound frames back up.
    pub fn new(
        config: ConnectionConfig,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialProvider>,
        listeners: Arc<ListenerRegistry>,
    ) -> (Self, mpsc::Receiver<ConnectionNotification>) {
        let (notify_tx, notify_rx) = mpsc::channel(NOTIFICATION_CHANNEL_CAPACITY);
        let inner = Arc::new(Inner {
            config,
            connector,
            credentials,
            listeners,
            notify_tx,
            state: Mutex::new(LinkState::default()),
        });
        (Self { inner }, notify_rx)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.lock().status
    }

    /// `true` only while the socket is open and usable for writes.
    pub fn is_connected(&self) -> bool {
        let state = self.inner.lock();
        state.status == ConnectionStatus::Connected && state.sink.is_some()
    }

    /// Automatic attempts made since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.lock().reconnect_attempts
    }

    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.inner.listeners
    }

    /// Open the connection.
    ///
    /// A no-op while connected or already connecting.  Otherwise clears any
    /// earlier manual disconnect, resets the retry budget and makes one
    /// attempt; failures are reported through the status and retried by the
    /// reconnect policy, never returned.
    pub async fn connect(&self) {
        {
            let mut state = self.inner.lock();
            if matches!(
                state.status,
                ConnectionStatus::Connected | ConnectionStatus::Connecting
            ) {
                debug!(status = ?state.status, "connect ignored");
                return;
            }
            state.manual_close = false;
            state.reconnect_attempts = 0;
            if let Some(timer) = state.reconnect_timer.take() {
                timer.abort();
            }
        }

        self.inner.establish().await;
    }

    /// Close the connection on purpose.  No reconnect follows until the next
    /// [`connect`](Self::connect).
    pub async fn disconnect(&self) {
        let sink = {
            let mut state = self.inner.lock();
            state.manual_close = true;
            state.generation += 1;
            state.stop_tasks();
            state.sink.take()
        };

        if let Some(sink) = sink {
            sink.close().await;
        }
        self.inner.set_status(ConnectionStatus::Disconnected);
        info!("disconnected on request");
    }

    /// Write one frame.  Fails with [`NetError::NotConnected`] while closed.
    pub async fn send_frame(&self, frame: &OutboundFrame) -> Result<()> {
        self.inner.send_frame(frame).await
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, generation: u64) -> bool {
        let state = self.lock();
        state.generation == generation && !state.manual_close
    }

    /// Apply a status change under the lock; `true` if it changed.
    fn apply_status(state: &mut LinkState, to: ConnectionStatus) -> bool {
        if state.status == to {
            return false;
        }
        if !state.status.can_transition_to(to) {
            warn!(from = ?state.status, to = ?to, "ignoring illegal connection status transition");
            return false;
        }
        state.status = to;
        true
    }

    fn set_status(&self, to: ConnectionStatus) {
        let changed = Self::apply_status(&mut self.lock(), to);
        if changed {
            self.broadcast(to);
        }
    }

    fn broadcast(&self, status: ConnectionStatus) {
        info!(status = ?status, "connection status changed");
        self.listeners.notify_status(status);
    }

    async fn send_frame(&self, frame: &OutboundFrame) -> Result<()> {
        let sink = {
            let state = self.lock();
            if state.status != ConnectionStatus::Connected {
                None
            } else {
                state.sink.clone()
            }
        }
        .ok_or(NetError::NotConnected)?;

        let text = frame.to_text()?;
        sink.send_text(text).await?;
        trace!(kind = frame.kind(), "frame sent");
        Ok(())
    }

    async fn notify(&self, notification: ConnectionNotification) {
        if self.notify_tx.send(notification).await.is_err() {
            debug!("notification receiver dropped");
        }
    }

    // ------------------------------------------------------------------
    // Open
    // ------------------------------------------------------------------

    /// One open attempt.  On failure the status becomes `Error` and the
    /// reconnect policy decides what happens next.
    async fn establish(self: &Arc<Self>) {
        let (generation, changed, stale) = {
            let mut state = self.lock();
            state.generation += 1;
            // A socket that reported an error may still be open.  The reconnect
            // timer is left alone: this may be running on it.
            for task in [state.heartbeat.take(), state.reader.take()]
                .into_iter()
                .flatten()
            {
                task.abort();
            }
            let stale = state.sink.take();
            let changed = Self::apply_status(&mut state, ConnectionStatus::Connecting);
            (state.generation, changed, stale)
        };
        if let Some(sink) = stale {
            debug!(generation, "closing previous socket before reopening");
            sink.close().await;
        }
        if changed {
            self.broadcast(ConnectionStatus::Connecting);
        }

        match self.open_transport().await {
            Ok(connection) => self.on_open(generation, connection).await,
            Err(e) => {
                warn!(error = %e, generation, "connection attempt failed");
                if self.is_current(generation) {
                    self.set_status(ConnectionStatus::Error);
                    self.schedule_reconnect();
                }
            }
        }
    }

    async fn open_transport(&self) -> Result<Connection> {
        let credential = self
            .credentials
            .credential()
            .await
            .ok_or(NetError::MissingCredential)?;
        let uri = self.config.connection_uri(&credential)?;

        info!(endpoint = %self.config.endpoint, client_id = %self.config.client_id, "opening connection");
        self.connector.open(&uri).await
    }

    async fn on_open(self: &Arc<Self>, generation: u64, connection: Connection) {
        let Connection { sink, events } = connection;

        let opened = {
            let mut state = self.lock();
            if state.generation != generation || state.manual_close {
                false
            } else {
                state.sink = Some(Arc::clone(&sink));
                state.reconnect_attempts = 0;
                state.heartbeat = Some(self.spawn_heartbeat(generation));
                state.reader = Some(self.spawn_reader(generation, events));
                Self::apply_status(&mut state, ConnectionStatus::Connected)
            }
        };

        if !opened {
            debug!(generation, "socket opened after disconnect, closing it");
            sink.close().await;
            return;
        }

        self.broadcast(ConnectionStatus::Connected);

        let ack = OutboundFrame::ConnectedOk {
            data: ConnectedAck {
                timestamp: now_millis(),
            },
        };
        if let Err(e) = self.send_frame(&ack).await {
            warn!(error = %e, "failed to send connection acknowledgement");
        }

        self.notify(ConnectionNotification::Opened).await;
    }

    // ------------------------------------------------------------------
    // Background tasks
    // ------------------------------------------------------------------

    fn spawn_heartbeat(self: &Arc<Self>, generation: u64) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let period = self.config.heartbeat_interval;

        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if !this.is_current(generation) {
                    break;
                }
                if let Err(e) = this.send_frame(&OutboundFrame::Ping).await {
                    warn!(error = %e, "heartbeat ping failed");
                }
            }
        })
    }

    fn spawn_reader(
        self: &Arc<Self>,
        generation: u64,
        mut events: mpsc::Receiver<SocketEvent>,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if !this.is_current(generation) {
                    return;
                }
                match event {
                    SocketEvent::Text(text) => this.handle_text(&text).await,
                    SocketEvent::Error(reason) => {
                        warn!(reason = %reason, "socket error");
                        this.set_status(ConnectionStatus::Error);
                    }
                    SocketEvent::Closed { reason } => {
                        this.on_close(generation, reason);
                        return;
                    }
                }
            }
            this.on_close(generation, Some("event stream ended".into()));
        })
    }

    async fn handle_text(&self, text: &str) {
        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
                return;
            }
        };

        match frame {
            InboundFrame::Ping => {
                if let Err(e) = self.send_frame(&OutboundFrame::Pong).await {
                    warn!(error = %e, "failed to answer ping");
                }
            }
            InboundFrame::Pong => trace!("pong received"),
            InboundFrame::Message { go_id, data } => {
                self.notify(ConnectionNotification::Message {
                    go_id,
                    message: data,
                })
                .await;
            }
            InboundFrame::Typing { data, .. } => {
                self.notify(ConnectionNotification::Typing(data)).await;
            }
            InboundFrame::Read { data, .. } => {
                self.notify(ConnectionNotification::Read(data)).await;
            }
            InboundFrame::Unknown(kind) => {
                warn!(kind = %kind, "dropping frame of unknown type");
            }
        }
    }

    // ------------------------------------------------------------------
    // Close / reconnect
    // ------------------------------------------------------------------

    fn on_close(self: &Arc<Self>, generation: u64, reason: Option<String>) {
        let changed = {
            let mut state = self.lock();
            if state.generation != generation {
                return;
            }
            state.sink = None;
            if let Some(heartbeat) = state.heartbeat.take() {
                heartbeat.abort();
            }
            // Detach rather than abort: this may be the reader itself.
            state.reader = None;
            Self::apply_status(&mut state, ConnectionStatus::Disconnected)
        };

        info!(reason = ?reason, generation, "connection closed");
        if changed {
            self.broadcast(ConnectionStatus::Disconnected);
        }
        self.schedule_reconnect();
    }

    /// Queue the next automatic attempt, or give up with `Error` once the
    /// budget is spent.
    fn schedule_reconnect(self: &Arc<Self>) {
        let mut state = self.lock();
        if state.manual_close {
            return;
        }

        let max = self.config.max_reconnect_attempts;
        if state.reconnect_attempts >= max {
            let changed = Self::apply_status(&mut state, ConnectionStatus::Error);
            drop(state);
            error!(attempts = max, "reconnect attempts exhausted, giving up");
            if changed {
                self.broadcast(ConnectionStatus::Error);
            }
            return;
        }

        state.reconnect_attempts += 1;
        let attempt = state.reconnect_attempts;
        let generation = state.generation;
        let delay = self.config.reconnect_interval;

        info!(attempt, max, delay_ms = delay.as_millis() as u64, "scheduling reconnect");

        let this = Arc::clone(self);
        state.reconnect_timer = Some(tokio::spawn(async move {
            time::sleep(delay).await;
            if !this.is_current(generation) {
                return;
            }
            this.establish().await;
        }));
    }
}
