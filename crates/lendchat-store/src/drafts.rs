//! Per-conversation drafts: one raw string per chat, last write wins.

use tracing::warn;

use crate::error::Result;
use crate::store::{draft_key, MessageStore};

impl MessageStore {
    pub async fn save_draft(&self, chat_id: &str, text: &str) -> Result<()> {
        self.kv().set(&draft_key(chat_id), text).await
    }

    pub async fn get_draft(&self, chat_id: &str) -> Option<String> {
        self.kv()
            .get(&draft_key(chat_id))
            .await
            .unwrap_or_else(|e| {
                warn!(chat_id, error = %e, "failed to read draft");
                None
            })
    }

    pub async fn clear_draft(&self, chat_id: &str) -> Result<()> {
        self.kv().remove(&draft_key(chat_id)).await
    }
}

#[cfg(test)]
mod tests {
    use crate::store::test_support::memory_store;

    #[tokio::test]
    async fn test_draft_last_write_wins() {
        let store = memory_store();
        assert_eq!(store.get_draft("c1").await, None);

        store.save_draft("c1", "first").await.unwrap();
        store.save_draft("c1", "second").await.unwrap();
        store.save_draft("c2", "other").await.unwrap();
        assert_eq!(store.get_draft("c1").await.as_deref(), Some("second"));

        store.clear_draft("c1").await.unwrap();
        assert_eq!(store.get_draft("c1").await, None);
        assert_eq!(store.get_draft("c2").await.as_deref(), Some("other"));
    }
}
