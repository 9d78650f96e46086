use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use lendchat_net::ConnectionNotification;

use crate::dispatcher::Dispatcher;

/// Spawn the loop that turns connection notifications into dispatcher work.
pub(crate) fn spawn_bridge(
    dispatcher: Arc<Dispatcher>,
    notif_rx: mpsc::Receiver<ConnectionNotification>,
) -> JoinHandle<()> {
    tokio::spawn(notification_loop(dispatcher, notif_rx))
}

async fn notification_loop(
    dispatcher: Arc<Dispatcher>,
    mut notif_rx: mpsc::Receiver<ConnectionNotification>,
) {
    info!("Connection notification bridge started");

    while let Some(notification) = notif_rx.recv().await {
        match notification {
            // Emitted only once the socket is stored and the status is
            // `Connected`, so the sweep can transmit right away.
            ConnectionNotification::Opened => {
                let report = dispatcher.resend_failed_messages(None).await;
                debug!(?report, "Reconnect sweep done");
            }

            ConnectionNotification::Message { go_id, message } => {
                if let Err(e) = dispatcher.handle_incoming(go_id, message).await {
                    warn!(error = %e, "Inbound message dropped");
                }
            }

            ConnectionNotification::Typing(notice) => {
                dispatcher.listeners().notify_typing(&notice);
            }

            ConnectionNotification::Read(receipt) => {
                debug!(
                    chat_id = %receipt.chat_id,
                    count = receipt.message_ids.len(),
                    "Read receipt received"
                );
                dispatcher.listeners().notify_read(&receipt);
            }
        }
    }

    info!("Connection notification bridge stopped");
}
