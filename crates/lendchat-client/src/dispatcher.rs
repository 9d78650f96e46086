//! Outbound send path, inbound handling and the resend sweep.
//!
//! The dispatcher turns application intent into store writes, frames on the
//! connection and listener notifications.  Storage problems on the send path
//! are logged and never surface to the caller: the message id is returned
//! either way and the status tells the UI what happened.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use lendchat_net::{ConnectionManager, ListenerRegistry};
use lendchat_shared::{
    now_millis, Message, MessageStatus, OutboundFrame, ReadReceipt, Sender, TypingNotice,
};
use lendchat_store::MessageStore;

use crate::error::{ClientError, Result};

/// Post-dispatch processing of inbound messages.
///
/// Hooks run after listeners were notified, in registration order.  A
/// failing hook is logged and does not stop the others.
#[async_trait]
pub trait MessageHook: Send + Sync {
    fn name(&self) -> &'static str;

    async fn on_incoming(&self, message: &Message) -> Result<()>;
}

/// Saves inbound messages into local history.
///
/// Inbound records carry the remote side's addressing, so they are stored
/// with `chat_id/chat_name` and `to_id/to_name` swapped.
pub struct PersistInbound {
    store: MessageStore,
}

impl PersistInbound {
    pub fn new(store: MessageStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MessageHook for PersistInbound {
    fn name(&self) -> &'static str {
        "persist-inbound"
    }

    async fn on_incoming(&self, message: &Message) -> Result<()> {
        if message.sender != Sender::Client {
            return Ok(());
        }
        let local = message.inverted();
        if local.chat_id.is_empty() {
            debug!(message_id = ?message.id, "inbound message has no recipient, not persisted");
            return Ok(());
        }
        self.store.save_message(&local).await?;
        Ok(())
    }
}

/// Outcome of one resend sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResendReport {
    pub attempted: usize,
    pub sent: usize,
    pub failed: usize,
}

pub struct Dispatcher {
    store: MessageStore,
    connection: ConnectionManager,
    listeners: Arc<ListenerRegistry>,
    hooks: RwLock<Vec<Arc<dyn MessageHook>>>,
}

impl Dispatcher {
    pub fn new(
        store: MessageStore,
        connection: ConnectionManager,
        listeners: Arc<ListenerRegistry>,
    ) -> Self {
        Self {
            store,
            connection,
            listeners,
            hooks: RwLock::new(Vec::new()),
        }
    }

    pub fn register_hook(&self, hook: Arc<dyn MessageHook>) {
        info!(hook = hook.name(), "registered inbound hook");
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hook);
    }

    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    /// Send a message authored by the local user.
    ///
    /// The message is saved as `sending` before anything touches the
    /// network, then ends up `sent`, `failed` or (while offline) `pending`.
    /// Returns the message id.
    pub async fn send_message(&self, mut message: Message) -> String {
        let id = message.ensure_id().to_string();
        if message.timestamp == 0 {
            message.timestamp = now_millis();
        }

        advance(&mut message, MessageStatus::Sending);
        if let Err(e) = self.store.save_message(&message).await {
            error!(chat_id = %message.chat_id, message_id = %id, error = %e, "optimistic save failed");
        }

        let status = if self.connection.is_connected() {
            self.transmit(&message).await
        } else {
            debug!(chat_id = %message.chat_id, message_id = %id, "offline, message left pending");
            MessageStatus::Pending
        };

        advance(&mut message, status);
        self.persist_status(&message).await;
        self.listeners.dispatch(message.conversation_key(), &message);

        // The connection may have opened, and its sweep run, while the
        // message was still `sending`.
        if status == MessageStatus::Pending && self.connection.is_connected() {
            debug!(chat_id = %message.chat_id, message_id = %id, "connected meanwhile, resending");
            self.resend_failed_messages(Some(&message.chat_id)).await;
        }

        id
    }

    async fn transmit(&self, message: &Message) -> MessageStatus {
        match self.connection.send_frame(&OutboundFrame::message(message)).await {
            Ok(()) => MessageStatus::Sent,
            Err(e) => {
                warn!(chat_id = %message.chat_id, message_id = ?message.id, error = %e, "transmit failed");
                MessageStatus::Failed
            }
        }
    }

    async fn persist_status(&self, message: &Message) {
        let (Some(id), Some(status)) = (message.id.as_deref(), message.status) else {
            return;
        };
        match self
            .store
            .update_message_status(&message.chat_id, id, status)
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(chat_id = %message.chat_id, message_id = id, "status update found no stored message"),
            Err(e) => error!(chat_id = %message.chat_id, message_id = id, error = %e, "failed to persist status"),
        }
    }

    /// Retry every outgoing message left `failed` or `pending`, oldest first.
    ///
    /// Does nothing while disconnected; the next successful open runs a fresh
    /// sweep.  A failure on one message does not stop the rest.
    pub async fn resend_failed_messages(&self, chat_id: Option<&str>) -> ResendReport {
        let mut report = ResendReport::default();
        if !self.connection.is_connected() {
            error!(chat_id = ?chat_id, "resend skipped: not connected");
            return report;
        }

        let unsent = self.store.unsent_messages(chat_id).await;
        if unsent.is_empty() {
            debug!(chat_id = ?chat_id, "nothing to resend");
            return report;
        }
        info!(chat_id = ?chat_id, count = unsent.len(), "resending unsent messages");

        for mut message in unsent {
            if message.id.is_none() {
                warn!(chat_id = %message.chat_id, "skipping stored message without id");
                continue;
            }
            report.attempted += 1;

            advance(&mut message, MessageStatus::Sending);
            self.persist_status(&message).await;

            let status = self.transmit(&message).await;
            match status {
                MessageStatus::Sent => report.sent += 1,
                _ => report.failed += 1,
            }

            advance(&mut message, status);
            self.persist_status(&message).await;
            self.listeners.dispatch(message.conversation_key(), &message);
        }

        info!(
            attempted = report.attempted,
            sent = report.sent,
            failed = report.failed,
            "resend sweep finished"
        );
        report
    }

    /// Tell the peer the local user is typing.
    pub async fn send_typing(&self, chat_id: &str, go_id: &str) -> Result<()> {
        let frame = OutboundFrame::Typing {
            go_id: go_id.to_string(),
            data: TypingNotice {
                chat_id: chat_id.to_string(),
            },
        };
        self.connection.send_frame(&frame).await?;
        Ok(())
    }

    /// Mark every inbound message of a conversation read, clear its unread
    /// counter and, when online, acknowledge them to the peer.
    ///
    /// Returns the number of messages newly marked read.
    pub async fn mark_conversation_read(&self, chat_id: &str, go_id: &str) -> Result<usize> {
        let ids = self.store.mark_inbound_read(chat_id).await?;
        self.store.clear_unread_count(chat_id).await?;

        if ids.is_empty() {
            return Ok(0);
        }
        let count = ids.len();

        if self.connection.is_connected() {
            let frame = OutboundFrame::Read {
                go_id: go_id.to_string(),
                data: ReadReceipt {
                    chat_id: chat_id.to_string(),
                    message_ids: ids,
                },
            };
            self.connection.send_frame(&frame).await?;
        } else {
            debug!(chat_id, count, "offline, read receipt not sent");
        }
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Process a message received from the connection.
    ///
    /// The envelope `go_id` fills in the record's own when it has none.
    pub async fn handle_incoming(&self, go_id: Option<String>, mut message: Message) -> Result<()> {
        if message.chat_id.is_empty() {
            warn!(message_id = ?message.id, "dropping inbound message without chat id");
            return Err(ClientError::MissingChatId);
        }

        message.sender = Sender::Client;
        message.status = Some(MessageStatus::Delivered);
        if message.go_id.is_none() {
            message.go_id = go_id;
        }

        debug!(chat_id = %message.chat_id, message_id = ?message.id, "inbound message");
        self.listeners.dispatch(message.conversation_key(), &message);

        self.run_hooks(&message).await;
        self.acknowledge(&message).await;
        Ok(())
    }

    async fn run_hooks(&self, message: &Message) {
        let hooks: Vec<Arc<dyn MessageHook>> = self
            .hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for hook in hooks {
            if let Err(e) = hook.on_incoming(message).await {
                error!(hook = hook.name(), message_id = ?message.id, error = %e, "inbound hook failed");
            }
        }
    }

    /// Read receipt for one inbound message, addressed to its sender.
    async fn acknowledge(&self, message: &Message) {
        let Some(id) = message.id.clone() else {
            debug!(chat_id = %message.chat_id, "inbound message without id, no receipt");
            return;
        };

        let frame = OutboundFrame::Read {
            go_id: message.route_id().to_string(),
            data: ReadReceipt {
                chat_id: message.chat_id.clone(),
                message_ids: vec![id],
            },
        };
        if let Err(e) = self.connection.send_frame(&frame).await {
            warn!(chat_id = %message.chat_id, error = %e, "failed to send read receipt");
        }
    }
}

/// Move `message` to `to`, keeping its current status if the state machine
/// forbids the move.
fn advance(message: &mut Message, to: MessageStatus) {
    if let Err(e) = message.set_status(to) {
        warn!(message_id = ?message.id, error = %e, "status not changed");
    }
}
