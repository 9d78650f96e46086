use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::constants::{NOTIFICATION_CHAT_ID, PREVIEW_MAX_CHARS};
use crate::error::SharedError;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generate a client-side message id: `<millis>_<9 base36 chars>`.
pub fn generate_message_id() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("{}_{}", now_millis(), suffix)
}

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// Which side of the conversation authored a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    /// The local user.
    Mobile,
    /// The remote party.
    #[default]
    Client,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
    System,
}

/// Delivery state of a single message.
///
/// Transitions are checked by [`MessageStatus::can_transition`]; `Read` is
/// terminal and nothing moves back to `Sending` once the peer has it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
    Pending,
}

impl MessageStatus {
    /// Whether a message may move from `from` (possibly unset) to `to`.
    /// Writing the current state again is always accepted.
    pub fn can_transition(from: Option<Self>, to: Self) -> bool {
        use MessageStatus::*;

        let Some(from) = from else {
            return true;
        };
        if from == to {
            return true;
        }
        matches!(
            (from, to),
            (Sending, Sent | Failed | Pending)
                | (Pending, Sending | Sent | Failed)
                | (Failed, Sending | Pending | Sent)
                | (Sent, Delivered | Read)
                | (Delivered, Read)
        )
    }

    /// `failed` and `pending` messages are picked up by the resend sweep.
    pub fn is_unsent(self) -> bool {
        matches!(self, MessageStatus::Failed | MessageStatus::Pending)
    }
}

/// State of the single real-time connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    #[default]
    Disconnected,
    Error,
}

impl ConnectionStatus {
    pub fn can_transition_to(self, to: Self) -> bool {
        use ConnectionStatus::*;

        matches!(
            (self, to),
            (Disconnected, Connecting | Error)
                | (Connecting, Connected | Disconnected | Error)
                | (Connected, Disconnected | Error)
                | (Error, Connecting | Disconnected)
        )
    }
}

/// Icon tag rendered next to a conversation in the chat list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatIcon {
    Notification,
    Institution,
}

impl ChatIcon {
    pub fn for_chat(chat_id: &str) -> Self {
        if chat_id == NOTIFICATION_CHAT_ID {
            ChatIcon::Notification
        } else {
            ChatIcon::Institution
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Decode one field, falling back to its default on `null` or a value of
/// the wrong shape instead of rejecting the whole record.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).unwrap_or_default())
}

/// A chat message as stored locally and carried in `message` frames.
///
/// Decoding is field-lenient: peers send `null`s and values this client
/// does not know, and only a missing `chatId` makes a record unusable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Client-generated id; `None` marks a provisional placeholder.
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Counterpart id from the perspective of whoever owns this record.
    #[serde(default, deserialize_with = "lenient")]
    pub chat_id: String,
    #[serde(default, deserialize_with = "lenient")]
    pub chat_name: String,
    #[serde(default, deserialize_with = "lenient")]
    pub sender: Sender,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub to_id: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub to_name: Option<String>,
    /// Server-side routing id of the transport channel.
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub go_id: Option<String>,
    #[serde(rename = "type", default, deserialize_with = "lenient")]
    pub kind: MessageKind,
    #[serde(default, deserialize_with = "lenient")]
    pub content: String,
    /// Milliseconds since epoch; the only ordering key.
    #[serde(default, deserialize_with = "lenient")]
    pub timestamp: i64,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
}

impl Message {
    /// A new outgoing text message authored by the local user.
    pub fn text(chat_id: impl Into<String>, chat_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: None,
            chat_id: chat_id.into(),
            chat_name: chat_name.into(),
            sender: Sender::Mobile,
            to_id: None,
            to_name: None,
            go_id: None,
            kind: MessageKind::Text,
            content: content.into(),
            timestamp: now_millis(),
            status: None,
        }
    }

    /// Routing id used in frame envelopes: `go_id`, else `to_id`, else `chat_id`.
    pub fn route_id(&self) -> &str {
        self.go_id
            .as_deref()
            .or(self.to_id.as_deref())
            .unwrap_or(&self.chat_id)
    }

    /// Conversation a local screen would subscribe under.
    ///
    /// Remote-authored records carry the sender's perspective, so the local
    /// conversation is their `to_id`.
    pub fn conversation_key(&self) -> &str {
        match self.sender {
            Sender::Mobile => &self.chat_id,
            Sender::Client => self.to_id.as_deref().unwrap_or(&self.chat_id),
        }
    }

    /// Copy with `chat_id/chat_name` swapped against `to_id/to_name`.
    pub fn inverted(&self) -> Self {
        let mut flipped = self.clone();
        flipped.chat_id = self.to_id.clone().unwrap_or_default();
        flipped.chat_name = self.to_name.clone().unwrap_or_default();
        flipped.to_id = Some(self.chat_id.clone());
        flipped.to_name = Some(self.chat_name.clone());
        flipped
    }

    /// Assign an id if the message has none and return it.
    pub fn ensure_id(&mut self) -> &str {
        self.id.get_or_insert_with(generate_message_id)
    }

    /// Move to `to`, rejecting transitions the status machine forbids.
    pub fn set_status(&mut self, to: MessageStatus) -> Result<(), SharedError> {
        if !MessageStatus::can_transition(self.status, to) {
            return Err(SharedError::IllegalTransition {
                from: self.status,
                to,
            });
        }
        self.status = Some(to);
        Ok(())
    }

    pub fn preview(&self) -> String {
        preview_for(self.kind, &self.content)
    }
}

/// Chat-list preview text for a message body.
pub fn preview_for(kind: MessageKind, content: &str) -> String {
    match kind {
        MessageKind::Text => {
            if content.chars().count() > PREVIEW_MAX_CHARS {
                let cut: String = content.chars().take(PREVIEW_MAX_CHARS).collect();
                format!("{cut}...")
            } else {
                content.to_string()
            }
        }
        MessageKind::Image => "[Image]".to_string(),
        MessageKind::File => "[File]".to_string(),
        MessageKind::System => "[System]".to_string(),
    }
}

// ---------------------------------------------------------------------------
// ChatItem
// ---------------------------------------------------------------------------

/// Summary row of one conversation in the chat list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatItem {
    pub id: String,
    pub go_id: String,
    pub title: String,
    pub last_message: String,
    pub last_message_time: i64,
    pub unread_count: u32,
    pub icon: ChatIcon,
}

impl ChatItem {
    /// First entry for a conversation that has never been seen.
    pub fn from_message(message: &Message) -> Self {
        Self {
            id: message.chat_id.clone(),
            go_id: message
                .go_id
                .clone()
                .unwrap_or_else(|| message.chat_id.clone()),
            title: message.chat_name.clone(),
            last_message: message.preview(),
            last_message_time: message.timestamp,
            unread_count: u32::from(message.sender == Sender::Client),
            icon: ChatIcon::for_chat(&message.chat_id),
        }
    }

    /// Fold a newer message touching this conversation into the summary.
    pub fn absorb(&mut self, message: &Message) {
        self.last_message = message.preview();
        self.last_message_time = message.timestamp;
        if let Some(go_id) = &message.go_id {
            self.go_id = go_id.clone();
        }
        if !message.chat_name.is_empty() {
            self.title = message.chat_name.clone();
        }
        if message.sender == Sender::Client {
            // Records without an id restart the counter.
            self.unread_count = if message.id.is_some() {
                self.unread_count.saturating_add(1)
            } else {
                1
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound(id: Option<&str>) -> Message {
        Message {
            id: id.map(str::to_string),
            sender: Sender::Client,
            ..Message::text("c1", "Lender", "hi")
        }
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = generate_message_id();
        let b = generate_message_id();
        assert_ne!(a, b);
        let (millis, suffix) = a.split_once('_').unwrap();
        assert!(millis.parse::<i64>().is_ok());
        assert_eq!(suffix.len(), 9);
    }

    #[test]
    fn test_status_transitions() {
        assert!(MessageStatus::can_transition(None, MessageStatus::Delivered));
        assert!(MessageStatus::can_transition(
            Some(MessageStatus::Failed),
            MessageStatus::Sending
        ));
        assert!(MessageStatus::can_transition(
            Some(MessageStatus::Sent),
            MessageStatus::Sent
        ));
        assert!(!MessageStatus::can_transition(
            Some(MessageStatus::Delivered),
            MessageStatus::Sending
        ));
        assert!(!MessageStatus::can_transition(
            Some(MessageStatus::Read),
            MessageStatus::Delivered
        ));

        let mut msg = inbound(Some("m1"));
        msg.set_status(MessageStatus::Delivered).unwrap();
        assert!(msg.set_status(MessageStatus::Sending).is_err());
        assert_eq!(msg.status, Some(MessageStatus::Delivered));
    }

    #[test]
    fn test_connection_transitions() {
        use ConnectionStatus::*;
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Error.can_transition_to(Connecting));
        assert!(!Connected.can_transition_to(Connecting));
        assert!(!Disconnected.can_transition_to(Connected));
    }

    #[test]
    fn test_preview_truncates_long_text() {
        let content = "x".repeat(51);
        let preview = preview_for(MessageKind::Text, &content);
        assert_eq!(preview, format!("{}...", "x".repeat(50)));

        let exact = "y".repeat(50);
        assert_eq!(preview_for(MessageKind::Text, &exact), exact);
        assert_eq!(preview_for(MessageKind::Image, "ignored"), "[Image]");
    }

    #[test]
    fn test_inverted_swaps_addressing() {
        let msg = Message {
            to_id: Some("me".into()),
            to_name: Some("Me".into()),
            ..inbound(Some("m1"))
        };
        let flipped = msg.inverted();
        assert_eq!(flipped.chat_id, "me");
        assert_eq!(flipped.chat_name, "Me");
        assert_eq!(flipped.to_id.as_deref(), Some("c1"));
        assert_eq!(msg.conversation_key(), "me");
    }

    #[test]
    fn test_chat_item_unread_accounting() {
        let mut item = ChatItem::from_message(&inbound(Some("m1")));
        assert_eq!(item.unread_count, 1);
        assert_eq!(item.icon, ChatIcon::Institution);

        item.absorb(&inbound(Some("m2")));
        assert_eq!(item.unread_count, 2);

        item.absorb(&inbound(None));
        assert_eq!(item.unread_count, 1);

        item.absorb(&Message::text("c1", "Lender", "reply"));
        assert_eq!(item.unread_count, 1);
        assert_eq!(item.last_message, "reply");
    }

    #[test]
    fn test_message_json_shape() {
        let mut msg = Message::text("c1", "Lender", "hi");
        msg.id = Some("m1".into());
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["chatId"], "c1");
        assert_eq!(json["type"], "text");
        assert_eq!(json["sender"], "mobile");
        assert!(json.get("status").is_none());
    }
}
