//! Transport seams.
//!
//! Sockets are opened through [`Connector`], which hands back a
//! [`Connection`]: a shared [`FrameSink`] for writes and an mpsc receiver of
//! [`SocketEvent`]s for everything the socket reports.  The WebSocket
//! implementation lives in [`crate::ws`]; [`ChannelConnector`] is an
//! in-process one backed by tokio channels.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;
use url::Url;

use crate::error::{NetError, Result};

/// Capacity of the per-connection event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Something the socket reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// A text frame arrived.
    Text(String),
    /// The socket reported an error; a `Closed` usually follows.
    Error(String),
    /// The socket is gone.
    Closed { reason: Option<String> },
}

/// Write half of an open socket.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send_text(&self, text: String) -> Result<()>;

    /// Close the socket.  Must be idempotent.
    async fn close(&self);
}

/// An open socket as handed out by a [`Connector`].
pub struct Connection {
    pub sink: Arc<dyn FrameSink>,
    pub events: mpsc::Receiver<SocketEvent>,
}

/// Opens sockets to a fully built connection URI.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, uri: &Url) -> Result<Connection>;
}

/// Source of the auth credential embedded in the connection URI.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credential(&self) -> Option<String>;
}

/// A fixed credential, for services and tests.
#[derive(Debug, Clone)]
pub struct StaticCredential(pub String);

#[async_trait]
impl CredentialProvider for StaticCredential {
    async fn credential(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

// ---------------------------------------------------------------------------
// In-process transport
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ChannelState {
    refuse: bool,
    opened: Vec<Url>,
    current: Option<mpsc::Sender<SocketEvent>>,
}

/// Connector whose "server" end is driven from the same process.
///
/// Every opened socket shares one outbox of written frames; inbound frames
/// and server-side closes are injected into the most recent socket.
#[derive(Default)]
pub struct ChannelConnector {
    state: Mutex<ChannelState>,
    sent: Arc<Mutex<Vec<String>>>,
    fail_sends: Arc<AtomicBool>,
    closes: Arc<AtomicUsize>,
}

impl ChannelConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every following `open` fail.
    pub fn set_refuse(&self, refuse: bool) {
        self.state().refuse = refuse;
    }

    /// Make every following write on any socket fail.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Number of `open` calls, successful or not.
    pub fn open_count(&self) -> usize {
        self.state().opened.len()
    }

    /// Number of sockets closed from the client side.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn last_uri(&self) -> Option<Url> {
        self.state().opened.last().cloned()
    }

    /// Raw text of every frame written so far.
    pub fn sent_texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Written frames decoded as JSON, optionally filtered by `type`.
    pub fn sent_frames(&self, kind: Option<&str>) -> Vec<serde_json::Value> {
        self.sent_texts()
            .iter()
            .filter_map(|text| serde_json::from_str::<serde_json::Value>(text).ok())
            .filter(|frame| kind.map_or(true, |k| frame["type"] == k))
            .collect()
    }

    pub fn clear_sent(&self) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Deliver a text frame on the current socket.  Returns `false` when no
    /// socket is open.
    pub async fn deliver(&self, text: impl Into<String>) -> bool {
        let current = self.state().current.clone();
        match current {
            Some(tx) => tx.send(SocketEvent::Text(text.into())).await.is_ok(),
            None => false,
        }
    }

    /// Report a socket error on the current socket.
    pub async fn fail_connection(&self, error: impl Into<String>) -> bool {
        let current = self.state().current.clone();
        match current {
            Some(tx) => tx.send(SocketEvent::Error(error.into())).await.is_ok(),
            None => false,
        }
    }

    /// Close the current socket from the server side.
    pub async fn drop_connection(&self) {
        let current = self.state().current.take();
        if let Some(tx) = current {
            let _ = tx
                .send(SocketEvent::Closed {
                    reason: Some("closed by server".into()),
                })
                .await;
        }
    }
}

#[async_trait]
impl Connector for ChannelConnector {
    async fn open(&self, uri: &Url) -> Result<Connection> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        {
            let mut state = self.state();
            state.opened.push(uri.clone());
            if state.refuse {
                return Err(NetError::Transport("connection refused".into()));
            }
            state.current = Some(tx.clone());
        }

        debug!(host = ?uri.host_str(), "in-process socket opened");

        Ok(Connection {
            sink: Arc::new(ChannelSink {
                sent: Arc::clone(&self.sent),
                fail_sends: Arc::clone(&self.fail_sends),
                closes: Arc::clone(&self.closes),
                events: tx,
                closed: AtomicBool::new(false),
            }),
            events: rx,
        })
    }
}

struct ChannelSink {
    sent: Arc<Mutex<Vec<String>>>,
    fail_sends: Arc<AtomicBool>,
    closes: Arc<AtomicUsize>,
    events: mpsc::Sender<SocketEvent>,
    closed: AtomicBool,
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send_text(&self, text: String) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(NetError::Transport("socket closed".into()));
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(NetError::Transport("send refused".into()));
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text);
        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.closes.fetch_add(1, Ordering::SeqCst);
        let _ = self
            .events
            .send(SocketEvent::Closed {
                reason: Some("closed by client".into()),
            })
            .await;
    }
}
