//! Per-conversation message lists.

use tracing::{debug, warn};

use lendchat_shared::constants::{KEY_CHAT_LIST, KEY_DRAFT_PREFIX, KEY_MESSAGES_PREFIX};
use lendchat_shared::{ChatItem, Message, MessageStatus, Sender};

use crate::error::Result;
use crate::store::{draft_key, messages_key, MessageStore};

impl MessageStore {
    // ------------------------------------------------------------------
    // Write
    // ------------------------------------------------------------------

    /// Insert or replace `message` in its conversation, then fold it into the
    /// chat index.
    ///
    /// Matching is by id, so an id-less message replaces the conversation's
    /// previous id-less placeholder instead of piling up next to it.
    pub async fn save_message(&self, message: &Message) -> Result<()> {
        let _guard = self.lock_writes().await;
        let key = messages_key(&message.chat_id);
        let mut list: Vec<Message> = self.load_list(&key).await?;

        upsert_by_id(&mut list, message.clone());
        sort_by_timestamp(&mut list);
        self.write_json(&key, &list).await?;

        debug!(
            chat_id = %message.chat_id,
            message_id = ?message.id,
            count = list.len(),
            "saved message"
        );

        self.touch_chat_item(message).await
    }

    /// Merge a batch into `chat_id`'s list; later entries win on equal ids.
    pub async fn save_messages(&self, chat_id: &str, messages: &[Message]) -> Result<()> {
        let _guard = self.lock_writes().await;
        let key = messages_key(chat_id);
        let mut list: Vec<Message> = self.load_list(&key).await?;

        for message in messages {
            upsert_by_id(&mut list, message.clone());
        }
        sort_by_timestamp(&mut list);
        self.write_json(&key, &list).await?;

        debug!(chat_id, batch = messages.len(), count = list.len(), "saved message batch");

        if let Some(latest) = messages.iter().max_by_key(|m| m.timestamp) {
            let mut latest = latest.clone();
            latest.chat_id = chat_id.to_string();
            self.touch_chat_item(&latest).await?;
        }
        Ok(())
    }

    /// Overwrite one message's status.
    ///
    /// Returns `Ok(false)` when the message is not in the conversation and an
    /// error when the status machine forbids the move.
    pub async fn update_message_status(
        &self,
        chat_id: &str,
        message_id: &str,
        status: MessageStatus,
    ) -> Result<bool> {
        let _guard = self.lock_writes().await;
        let key = messages_key(chat_id);
        let mut list: Vec<Message> = self.load_list(&key).await?;

        let Some(message) = list
            .iter_mut()
            .find(|m| m.id.as_deref() == Some(message_id))
        else {
            debug!(chat_id, message_id, "status update for unknown message ignored");
            return Ok(false);
        };

        message.set_status(status)?;
        self.write_json(&key, &list).await?;
        Ok(true)
    }

    /// Mark every inbound message of a conversation as read and return the
    /// ids that changed, for the outgoing read receipt.
    pub async fn mark_inbound_read(&self, chat_id: &str) -> Result<Vec<String>> {
        let _guard = self.lock_writes().await;
        let key = messages_key(chat_id);
        let mut list: Vec<Message> = self.load_list(&key).await?;

        let mut marked = Vec::new();
        for message in list.iter_mut().filter(|m| m.sender == Sender::Client) {
            if message.status == Some(MessageStatus::Read) {
                continue;
            }
            let Some(id) = message.id.clone() else {
                continue;
            };
            if message.set_status(MessageStatus::Read).is_ok() {
                marked.push(id);
            }
        }

        if !marked.is_empty() {
            self.write_json(&key, &list).await?;
        }
        Ok(marked)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Messages of one conversation, oldest first.  Empty when nothing is
    /// stored or storage cannot be read.
    pub async fn get_messages_by_chat_id(&self, chat_id: &str) -> Vec<Message> {
        self.read_list(&messages_key(chat_id)).await
    }

    /// Outgoing messages still waiting for a successful transmit, oldest
    /// first, from one conversation or from every indexed one.
    pub async fn unsent_messages(&self, chat_id: Option<&str>) -> Vec<Message> {
        let chat_ids: Vec<String> = match chat_id {
            Some(id) => vec![id.to_string()],
            None => self
                .get_chat_list()
                .await
                .into_iter()
                .map(|item| item.id)
                .collect(),
        };

        let mut unsent = Vec::new();
        for id in &chat_ids {
            unsent.extend(
                self.get_messages_by_chat_id(id)
                    .await
                    .into_iter()
                    .filter(|m| m.sender == Sender::Mobile)
                    .filter(|m| m.status.is_some_and(MessageStatus::is_unsent)),
            );
        }
        sort_by_timestamp(&mut unsent);
        unsent
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Drop a conversation's messages and draft.  Its chat-list entry stays;
    /// see [`remove_chat_item`](Self::remove_chat_item).
    pub async fn delete_chat_messages(&self, chat_id: &str) -> Result<()> {
        let _guard = self.lock_writes().await;
        self.kv().remove(&messages_key(chat_id)).await?;
        self.kv().remove(&draft_key(chat_id)).await?;
        debug!(chat_id, "deleted conversation messages");
        Ok(())
    }

    /// Erase every message list, every draft and the chat index.
    pub async fn clear_all(&self) -> Result<()> {
        let _guard = self.lock_writes().await;
        let keys = self.kv().keys().await?;
        let mut removed = 0usize;

        for key in keys.iter().filter(|k| {
            k.starts_with(KEY_MESSAGES_PREFIX) || k.starts_with(KEY_DRAFT_PREFIX)
        }) {
            self.kv().remove(key).await?;
            removed += 1;
        }
        self.kv().remove(KEY_CHAT_LIST).await?;

        warn!(removed, "cleared all local chat data");
        Ok(())
    }

    /// Create or refresh the chat-list entry a saved message touches.
    /// Caller holds the write lock.
    pub(crate) async fn touch_chat_item(&self, message: &Message) -> Result<()> {
        let mut list: Vec<ChatItem> = self.load_list(KEY_CHAT_LIST).await?;

        match list.iter_mut().find(|item| item.id == message.chat_id) {
            Some(item) => item.absorb(message),
            None => list.push(ChatItem::from_message(message)),
        }

        self.write_chat_list(list).await
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn upsert_by_id(list: &mut Vec<Message>, message: Message) {
    match list.iter().position(|m| m.id == message.id) {
        Some(index) => list[index] = message,
        None => list.push(message),
    }
}

/// Stable, so equal timestamps keep insertion order.
fn sort_by_timestamp(list: &mut [Message]) {
    list.sort_by_key(|m| m.timestamp);
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use super::*;
    use crate::kv::KeyValueStore;
    use crate::store::test_support::{memory_store, FlakyKv};
    use crate::{Database, MemoryKv};

    fn msg(id: Option<&str>, chat_id: &str, sender: Sender, timestamp: i64) -> Message {
        Message {
            id: id.map(str::to_string),
            sender,
            timestamp,
            ..Message::text(chat_id, "Lender", format!("body {timestamp}"))
        }
    }

    fn timestamps(list: &[Message]) -> Vec<i64> {
        list.iter().map(|m| m.timestamp).collect()
    }

    #[tokio::test]
    async fn test_messages_sorted_regardless_of_save_order() {
        let store = memory_store();
        for (id, ts) in [("a", 3000), ("b", 1000), ("c", 2000), ("d", 1500)] {
            store
                .save_message(&msg(Some(id), "c1", Sender::Mobile, ts))
                .await
                .unwrap();
        }

        let list = store.get_messages_by_chat_id("c1").await;
        assert_eq!(timestamps(&list), vec![1000, 1500, 2000, 3000]);
    }

    #[tokio::test]
    async fn test_placeholder_is_replaced() {
        let store = memory_store();
        store
            .save_message(&msg(Some("m1"), "c1", Sender::Mobile, 100))
            .await
            .unwrap();
        for ts in [200, 300, 400] {
            store
                .save_message(&msg(None, "c1", Sender::Mobile, ts))
                .await
                .unwrap();
        }

        let list = store.get_messages_by_chat_id("c1").await;
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].id, None);
        assert_eq!(list[1].timestamp, 400);
    }

    #[tokio::test]
    async fn test_save_same_id_replaces() {
        let store = memory_store();
        let mut first = msg(Some("m1"), "c1", Sender::Mobile, 100);
        store.save_message(&first).await.unwrap();

        first.content = "edited".into();
        store.save_message(&first).await.unwrap();

        let list = store.get_messages_by_chat_id("c1").await;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].content, "edited");
    }

    #[tokio::test]
    async fn test_first_inbound_creates_chat_item() {
        let store = memory_store();
        let mut inbound = msg(Some("m1"), "c1", Sender::Client, 1000);
        inbound.content = "hi".into();
        store.save_message(&inbound).await.unwrap();

        let chats = store.get_chat_list().await;
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].id, "c1");
        assert_eq!(chats[0].last_message, "hi");
        assert_eq!(chats[0].unread_count, 1);
    }

    #[tokio::test]
    async fn test_long_text_preview() {
        let store = memory_store();
        let mut long = msg(Some("m1"), "c1", Sender::Mobile, 1);
        long.content = "a".repeat(51);
        store.save_message(&long).await.unwrap();

        let chats = store.get_chat_list().await;
        assert_eq!(chats[0].last_message, format!("{}...", "a".repeat(50)));
    }

    #[tokio::test]
    async fn test_unread_accounting() {
        let store = memory_store();
        store
            .save_message(&msg(Some("m1"), "c1", Sender::Client, 1))
            .await
            .unwrap();
        store
            .save_message(&msg(Some("m2"), "c1", Sender::Client, 2))
            .await
            .unwrap();
        store
            .save_message(&msg(Some("m3"), "c1", Sender::Mobile, 3))
            .await
            .unwrap();
        assert_eq!(store.get_chat_item("c1").await.unwrap().unread_count, 2);

        store
            .save_message(&msg(None, "c1", Sender::Client, 4))
            .await
            .unwrap();
        assert_eq!(store.get_chat_item("c1").await.unwrap().unread_count, 1);
    }

    #[tokio::test]
    async fn test_save_messages_merges_and_indexes_latest() {
        let store = memory_store();
        store
            .save_message(&msg(Some("m1"), "c1", Sender::Mobile, 10))
            .await
            .unwrap();

        let mut replacement = msg(Some("m1"), "c1", Sender::Mobile, 10);
        replacement.content = "v2".into();
        let mut newest = msg(Some("m3"), "c1", Sender::Mobile, 30);
        newest.content = "newest".into();
        let batch = vec![
            msg(Some("m1"), "c1", Sender::Mobile, 10),
            newest,
            msg(Some("m2"), "c1", Sender::Mobile, 20),
            replacement,
        ];
        store.save_messages("c1", &batch).await.unwrap();

        let list = store.get_messages_by_chat_id("c1").await;
        assert_eq!(timestamps(&list), vec![10, 20, 30]);
        assert_eq!(list[0].content, "v2");
        assert_eq!(store.get_chat_item("c1").await.unwrap().last_message, "newest");

        store.save_messages("c2", &[]).await.unwrap();
        assert!(store.get_chat_item("c2").await.is_none());
    }

    #[tokio::test]
    async fn test_update_message_status() {
        let store = memory_store();
        let mut sending = msg(Some("m1"), "c1", Sender::Mobile, 1);
        sending.status = Some(MessageStatus::Sending);
        store.save_message(&sending).await.unwrap();

        assert!(store
            .update_message_status("c1", "m1", MessageStatus::Sent)
            .await
            .unwrap());
        assert!(!store
            .update_message_status("c1", "nope", MessageStatus::Sent)
            .await
            .unwrap());
        assert!(store
            .update_message_status("c1", "m1", MessageStatus::Sending)
            .await
            .is_err());

        let list = store.get_messages_by_chat_id("c1").await;
        assert_eq!(list[0].status, Some(MessageStatus::Sent));
    }

    #[tokio::test]
    async fn test_unsent_messages_across_conversations() {
        let store = memory_store();
        let entries = vec![
            (Some("late"), "c1", Sender::Mobile, 300, Some(MessageStatus::Failed)),
            (Some("early"), "c2", Sender::Mobile, 100, Some(MessageStatus::Pending)),
            (Some("mid"), "c1", Sender::Mobile, 200, Some(MessageStatus::Pending)),
            (Some("ok"), "c1", Sender::Mobile, 150, Some(MessageStatus::Sent)),
            (Some("theirs"), "c2", Sender::Client, 50, Some(MessageStatus::Failed)),
        ];
        for (id, chat, sender, ts, status) in entries {
            let mut m = msg(id, chat, sender, ts);
            m.status = status;
            store.save_message(&m).await.unwrap();
        }

        let all: Vec<_> = store
            .unsent_messages(None)
            .await
            .into_iter()
            .map(|m| m.id.unwrap())
            .collect();
        assert_eq!(all, vec!["early", "mid", "late"]);

        let only_c1 = store.unsent_messages(Some("c1")).await;
        assert_eq!(timestamps(&only_c1), vec![200, 300]);
    }

    #[tokio::test]
    async fn test_mark_inbound_read() {
        let store = memory_store();
        let mut delivered = msg(Some("in1"), "c1", Sender::Client, 1);
        delivered.status = Some(MessageStatus::Delivered);
        store.save_message(&delivered).await.unwrap();
        store
            .save_message(&msg(Some("out1"), "c1", Sender::Mobile, 2))
            .await
            .unwrap();

        assert_eq!(store.mark_inbound_read("c1").await.unwrap(), vec!["in1"]);
        assert!(store.mark_inbound_read("c1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_chat_messages_keeps_index() {
        let store = memory_store();
        store
            .save_message(&msg(Some("m1"), "c1", Sender::Client, 1))
            .await
            .unwrap();
        store.save_draft("c1", "half typed").await.unwrap();

        store.delete_chat_messages("c1").await.unwrap();

        assert!(store.get_messages_by_chat_id("c1").await.is_empty());
        assert_eq!(store.get_draft("c1").await, None);
        assert!(store.get_chat_item("c1").await.is_some());
    }

    #[tokio::test]
    async fn test_clear_all() {
        let kv = Arc::new(MemoryKv::new());
        kv.set("unrelated", "keep").await.unwrap();
        let store = MessageStore::new(kv.clone());
        store
            .save_message(&msg(Some("m1"), "c1", Sender::Client, 1))
            .await
            .unwrap();
        store.save_draft("c2", "draft").await.unwrap();

        store.clear_all().await.unwrap();

        assert!(store.get_chat_list().await.is_empty());
        assert!(store.get_messages_by_chat_id("c1").await.is_empty());
        assert_eq!(store.get_draft("c2").await, None);
        assert_eq!(kv.keys().await.unwrap(), vec!["unrelated"]);
    }

    #[tokio::test]
    async fn test_write_failures_propagate_reads_degrade() {
        let kv = Arc::new(FlakyKv::default());
        let store = MessageStore::new(kv.clone());
        store
            .save_message(&msg(Some("m1"), "c1", Sender::Mobile, 1))
            .await
            .unwrap();

        kv.fail_writes.store(true, Ordering::SeqCst);
        assert!(store
            .save_message(&msg(Some("m2"), "c1", Sender::Mobile, 2))
            .await
            .is_err());
        assert!(store.clear_unread_count("c1").await.is_err());

        kv.fail_reads.store(true, Ordering::SeqCst);
        assert!(store.get_messages_by_chat_id("c1").await.is_empty());
        assert!(store.get_chat_list().await.is_empty());
        assert_eq!(store.get_draft("c1").await, None);
    }

    #[tokio::test]
    async fn test_sqlite_backend_persists_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.db");

        {
            let store = MessageStore::new(Arc::new(Database::open_at(&path).unwrap()));
            store
                .save_message(&msg(Some("m1"), "c1", Sender::Client, 1))
                .await
                .unwrap();
        }

        let store = MessageStore::new(Arc::new(Database::open_at(&path).unwrap()));
        assert_eq!(store.get_messages_by_chat_id("c1").await.len(), 1);
        assert_eq!(store.get_chat_list().await[0].unread_count, 1);
    }
}
