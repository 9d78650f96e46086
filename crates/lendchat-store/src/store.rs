//! The [`MessageStore`] handle and the JSON helpers shared by its
//! message, chat-list and draft operations.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tracing::warn;

use lendchat_shared::constants::{KEY_DRAFT_PREFIX, KEY_MESSAGES_PREFIX};

use crate::error::Result;
use crate::kv::KeyValueStore;

/// Sole owner of the on-disk chat state.
///
/// Every read-modify-write goes through this type and holds the write lock
/// for its whole duration, so interleaved tasks never lose each other's
/// updates.  Writes report backend failures; the public read paths (`get_*`)
/// log and fall back to empty results instead.
#[derive(Clone)]
pub struct MessageStore {
    kv: Arc<dyn KeyValueStore>,
    write_lock: Arc<Mutex<()>>,
}

impl MessageStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Not reentrant: internal helpers called under it must not take it again.
    pub(crate) async fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    pub(crate) fn kv(&self) -> &dyn KeyValueStore {
        self.kv.as_ref()
    }

    /// Load a JSON list.  A missing or undecodable value is an empty list;
    /// backend failures are returned.
    pub(crate) async fn load_list<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>> {
        let Some(raw) = self.kv.get(key).await? else {
            return Ok(Vec::new());
        };

        match serde_json::from_str(&raw) {
            Ok(list) => Ok(list),
            Err(e) => {
                warn!(key, error = %e, "discarding undecodable stored list");
                Ok(Vec::new())
            }
        }
    }

    /// Read-path variant of [`load_list`](Self::load_list) that never fails.
    pub(crate) async fn read_list<T: DeserializeOwned>(&self, key: &str) -> Vec<T> {
        self.load_list(key).await.unwrap_or_else(|e| {
            warn!(key, error = %e, "storage read failed, returning empty list");
            Vec::new()
        })
    }

    pub(crate) async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let encoded = serde_json::to_string(value)?;
        self.kv.set(key, &encoded).await
    }
}

pub(crate) fn messages_key(chat_id: &str) -> String {
    format!("{KEY_MESSAGES_PREFIX}{chat_id}")
}

pub(crate) fn draft_key(chat_id: &str) -> String {
    format!("{KEY_DRAFT_PREFIX}{chat_id}")
}
