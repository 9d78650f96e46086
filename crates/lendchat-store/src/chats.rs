//! The conversation index (chat list).
//!
//! Stored as one JSON array under `chat_list`, kept sorted newest first by
//! `last_message_time` on every write.

use tracing::debug;

use lendchat_shared::constants::KEY_CHAT_LIST;
use lendchat_shared::ChatItem;

use crate::error::Result;
use crate::store::MessageStore;

impl MessageStore {
    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// All conversations, most recent first.  Empty on first run or when
    /// storage cannot be read.
    pub async fn get_chat_list(&self) -> Vec<ChatItem> {
        self.read_list(KEY_CHAT_LIST).await
    }

    pub async fn get_chat_item(&self, chat_id: &str) -> Option<ChatItem> {
        self.get_chat_list()
            .await
            .into_iter()
            .find(|item| item.id == chat_id)
    }

    /// Sum of unread counters, for app badges.
    pub async fn total_unread_count(&self) -> u32 {
        self.get_chat_list()
            .await
            .iter()
            .fold(0u32, |total, item| total.saturating_add(item.unread_count))
    }

    // ------------------------------------------------------------------
    // Write
    // ------------------------------------------------------------------

    /// Insert or replace an entry by id.
    pub async fn update_chat_item(&self, item: ChatItem) -> Result<()> {
        let _guard = self.lock_writes().await;
        let mut list: Vec<ChatItem> = self.load_list(KEY_CHAT_LIST).await?;

        match list.iter_mut().find(|existing| existing.id == item.id) {
            Some(existing) => *existing = item,
            None => list.push(item),
        }

        self.write_chat_list(list).await
    }

    pub async fn clear_unread_count(&self, chat_id: &str) -> Result<()> {
        let _guard = self.lock_writes().await;
        let mut list: Vec<ChatItem> = self.load_list(KEY_CHAT_LIST).await?;

        if let Some(item) = list.iter_mut().find(|item| item.id == chat_id) {
            item.unread_count = 0;
        }

        debug!(chat_id, "cleared unread count");
        self.write_chat_list(list).await
    }

    pub async fn clear_all_unread_counts(&self) -> Result<()> {
        let _guard = self.lock_writes().await;
        let mut list: Vec<ChatItem> = self.load_list(KEY_CHAT_LIST).await?;

        for item in &mut list {
            item.unread_count = 0;
        }

        debug!(count = list.len(), "cleared all unread counts");
        self.write_chat_list(list).await
    }

    /// Drop a conversation from the index.  Returns `true` if it was present.
    pub async fn remove_chat_item(&self, chat_id: &str) -> Result<bool> {
        let _guard = self.lock_writes().await;
        let mut list: Vec<ChatItem> = self.load_list(KEY_CHAT_LIST).await?;

        let before = list.len();
        list.retain(|item| item.id != chat_id);
        let removed = list.len() != before;

        if removed {
            self.write_chat_list(list).await?;
        }
        Ok(removed)
    }

    /// Caller holds the write lock.
    pub(crate) async fn write_chat_list(&self, mut list: Vec<ChatItem>) -> Result<()> {
        list.sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));
        self.write_json(KEY_CHAT_LIST, &list).await
    }
}

#[cfg(test)]
mod tests {
    use lendchat_shared::{ChatIcon, Message, Sender};

    use crate::store::test_support::memory_store;

    fn inbound(id: &str, chat_id: &str, timestamp: i64) -> Message {
        Message {
            id: Some(id.to_string()),
            sender: Sender::Client,
            timestamp,
            ..Message::text(chat_id, chat_id.to_uppercase(), "hello")
        }
    }

    #[tokio::test]
    async fn test_chat_list_sorted_newest_first() {
        let store = memory_store();
        store.save_message(&inbound("m1", "a", 100)).await.unwrap();
        store.save_message(&inbound("m2", "b", 300)).await.unwrap();
        store.save_message(&inbound("m3", "c", 200)).await.unwrap();

        let ids: Vec<_> = store.get_chat_list().await.into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);

        store.save_message(&inbound("m4", "a", 400)).await.unwrap();
        let ids: Vec<_> = store.get_chat_list().await.into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_notification_icon() {
        let store = memory_store();
        store.save_message(&inbound("m1", "000000", 1)).await.unwrap();
        store.save_message(&inbound("m2", "bank", 2)).await.unwrap();

        assert_eq!(
            store.get_chat_item("000000").await.unwrap().icon,
            ChatIcon::Notification
        );
        assert_eq!(
            store.get_chat_item("bank").await.unwrap().icon,
            ChatIcon::Institution
        );
    }

    #[tokio::test]
    async fn test_clear_unread_counts() {
        let store = memory_store();
        store.save_message(&inbound("m1", "a", 1)).await.unwrap();
        store.save_message(&inbound("m2", "a", 2)).await.unwrap();
        store.save_message(&inbound("m3", "b", 3)).await.unwrap();
        assert_eq!(store.total_unread_count().await, 3);

        store.clear_unread_count("a").await.unwrap();
        assert_eq!(store.get_chat_item("a").await.unwrap().unread_count, 0);
        assert_eq!(store.get_chat_item("b").await.unwrap().unread_count, 1);

        store.clear_all_unread_counts().await.unwrap();
        assert_eq!(store.total_unread_count().await, 0);
    }

    #[tokio::test]
    async fn test_update_and_remove_chat_item() {
        let store = memory_store();
        store.save_message(&inbound("m1", "a", 100)).await.unwrap();
        store.save_message(&inbound("m2", "b", 200)).await.unwrap();

        let mut item = store.get_chat_item("a").await.unwrap();
        item.title = "Renamed".into();
        item.last_message_time = 500;
        store.update_chat_item(item).await.unwrap();

        let list = store.get_chat_list().await;
        assert_eq!(list[0].id, "a");
        assert_eq!(list[0].title, "Renamed");
        assert_eq!(list.len(), 2);

        assert!(store.remove_chat_item("a").await.unwrap());
        assert!(!store.remove_chat_item("a").await.unwrap());
        assert_eq!(store.get_chat_list().await.len(), 1);
    }
}
