//! WebSocket transport over `tokio-tungstenite`.
//!
//! The stream is split on open: a writer task drains an mpsc channel into
//! the socket, a reader task turns incoming frames into [`SocketEvent`]s.
//! Ping/pong control frames are answered by tungstenite itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};
use url::Url;

use crate::error::{NetError, Result};
use crate::transport::{Connection, Connector, FrameSink, SocketEvent};

const OUTBOUND_CHANNEL_CAPACITY: usize = 64;
const EVENT_CHANNEL_CAPACITY: usize = 256;
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens `ws://` and `wss://` sockets.
#[derive(Debug, Clone)]
pub struct WsConnector {
    handshake_timeout: Duration,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

impl WsConnector {
    pub fn new(handshake_timeout: Duration) -> Self {
        Self { handshake_timeout }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, uri: &Url) -> Result<Connection> {
        if uri.scheme() == "wss" {
            // Fails harmlessly when a provider is already installed.
            let _ = rustls::crypto::ring::default_provider().install_default();
        }

        let handshake = timeout(self.handshake_timeout, connect_async(uri.as_str())).await;
        let (stream, _response) = match handshake {
            Ok(Ok(opened)) => opened,
            Ok(Err(e)) => {
                return Err(NetError::Transport(format!(
                    "websocket handshake failed: {e}"
                )))
            }
            Err(_) => return Err(NetError::Transport("websocket handshake timed out".into())),
        };
        debug!(host = ?uri.host_str(), "websocket opened");

        let (mut ws_sender, mut ws_receiver) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<WsMessage>(OUTBOUND_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let closing = matches!(frame, WsMessage::Close(_));
                match timeout(WRITE_TIMEOUT, ws_sender.send(frame)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(error = %e, "websocket write failed");
                        break;
                    }
                    Err(_) => {
                        warn!("websocket write timed out");
                        continue;
                    }
                }
                if closing {
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        tokio::spawn(async move {
            while let Some(frame) = ws_receiver.next().await {
                let event = match frame {
                    Ok(WsMessage::Text(text)) => SocketEvent::Text(text),
                    Ok(WsMessage::Close(close)) => {
                        let reason = close.map(|c| c.reason.to_string());
                        let _ = events_tx.send(SocketEvent::Closed { reason }).await;
                        return;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = events_tx.send(SocketEvent::Error(e.to_string())).await;
                        let _ = events_tx
                            .send(SocketEvent::Closed {
                                reason: Some("websocket error".into()),
                            })
                            .await;
                        return;
                    }
                };
                if events_tx.send(event).await.is_err() {
                    return;
                }
            }
            let _ = events_tx
                .send(SocketEvent::Closed {
                    reason: Some("stream ended".into()),
                })
                .await;
        });

        Ok(Connection {
            sink: Arc::new(WsSink {
                outbound: outbound_tx,
                closed: AtomicBool::new(false),
            }),
            events: events_rx,
        })
    }
}

struct WsSink {
    outbound: mpsc::Sender<WsMessage>,
    closed: AtomicBool,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&self, text: String) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(NetError::Transport("socket closed".into()));
        }
        self.outbound
            .send(WsMessage::Text(text))
            .await
            .map_err(|_| NetError::Transport("websocket writer stopped".into()))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.outbound.send(WsMessage::Close(None)).await;
    }
}
