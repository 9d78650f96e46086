//! Subscription fan-out for messages and connection events.
//!
//! Callbacks run synchronously on the caller's task.  Each one is isolated
//! with `catch_unwind`, so a panicking subscriber is logged and skipped
//! without affecting the others or the caller.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error};

use lendchat_shared::{ConnectionStatus, Message, ReadReceipt, TypingNotice};

pub type MessageCallback = Arc<dyn Fn(&Message) + Send + Sync>;
pub type StatusCallback = Arc<dyn Fn(ConnectionStatus) + Send + Sync>;
pub type TypingCallback = Arc<dyn Fn(&TypingNotice) + Send + Sync>;
pub type ReadCallback = Arc<dyn Fn(&ReadReceipt) + Send + Sync>;

/// Who a message subscription listens for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// One conversation, by its local id.
    Conversation(String),
    /// Every message.
    Global,
    /// Every message, for screens that stay mounted in the background.
    AllScreens,
}

/// Handle returned by every `on_*` call, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

type Slot<C> = Vec<(ListenerId, C)>;

#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    messages: Mutex<HashMap<Target, Slot<MessageCallback>>>,
    status: Mutex<Slot<StatusCallback>>,
    typing: Mutex<Slot<TypingCallback>>,
    read: Mutex<Slot<ReadCallback>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    pub fn on_message<F>(&self, target: Target, callback: F) -> ListenerId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let id = self.next_id();
        lock(&self.messages)
            .entry(target)
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Unsubscribe; dropping the last callback of a target removes the
    /// target.  Returns `true` if the listener was registered.
    pub fn off_message(&self, target: &Target, id: ListenerId) -> bool {
        let mut messages = lock(&self.messages);
        let Some(slot) = messages.get_mut(target) else {
            return false;
        };

        let before = slot.len();
        slot.retain(|(existing, _)| *existing != id);
        let removed = slot.len() != before;

        if slot.is_empty() {
            messages.remove(target);
        }
        removed
    }

    /// Whether any callback is registered under `target`.
    pub fn has_message_listeners(&self, target: &Target) -> bool {
        lock(&self.messages).contains_key(target)
    }

    /// Deliver `message` to the conversation `chat_id`, then to the global
    /// and all-screens subscribers.  Returns how many callbacks completed.
    pub fn dispatch(&self, chat_id: &str, message: &Message) -> usize {
        let callbacks: Vec<MessageCallback> = {
            let messages = lock(&self.messages);
            [
                Target::Conversation(chat_id.to_string()),
                Target::Global,
                Target::AllScreens,
            ]
            .iter()
            .filter_map(|target| messages.get(target))
            .flat_map(|slot| slot.iter().map(|(_, cb)| Arc::clone(cb)))
            .collect()
        };

        let delivered = callbacks
            .iter()
            .filter(|cb| guarded("message", || cb(message)))
            .count();

        debug!(chat_id, delivered, total = callbacks.len(), "message dispatched");
        delivered
    }

    // ------------------------------------------------------------------
    // Connection status
    // ------------------------------------------------------------------

    pub fn on_status_change<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(ConnectionStatus) + Send + Sync + 'static,
    {
        let id = self.next_id();
        lock(&self.status).push((id, Arc::new(callback)));
        id
    }

    pub fn off_status_change(&self, id: ListenerId) -> bool {
        remove_from(&self.status, id)
    }

    pub fn notify_status(&self, status: ConnectionStatus) {
        let callbacks = snapshot(&self.status);
        for cb in &callbacks {
            guarded("status", || cb(status));
        }
    }

    // ------------------------------------------------------------------
    // Typing / read receipts
    // ------------------------------------------------------------------

    pub fn on_typing<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&TypingNotice) + Send + Sync + 'static,
    {
        let id = self.next_id();
        lock(&self.typing).push((id, Arc::new(callback)));
        id
    }

    pub fn off_typing(&self, id: ListenerId) -> bool {
        remove_from(&self.typing, id)
    }

    pub fn notify_typing(&self, notice: &TypingNotice) {
        for cb in &snapshot(&self.typing) {
            guarded("typing", || cb(notice));
        }
    }

    pub fn on_read<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&ReadReceipt) + Send + Sync + 'static,
    {
        let id = self.next_id();
        lock(&self.read).push((id, Arc::new(callback)));
        id
    }

    pub fn off_read(&self, id: ListenerId) -> bool {
        remove_from(&self.read, id)
    }

    pub fn notify_read(&self, receipt: &ReadReceipt) {
        for cb in &snapshot(&self.read) {
            guarded("read", || cb(receipt));
        }
    }
}

fn snapshot<C: Clone>(slot: &Mutex<Slot<C>>) -> Vec<C> {
    lock(slot).iter().map(|(_, cb)| cb.clone()).collect()
}

fn remove_from<C>(slot: &Mutex<Slot<C>>, id: ListenerId) -> bool {
    let mut slot = lock(slot);
    let before = slot.len();
    slot.retain(|(existing, _)| *existing != id);
    slot.len() != before
}

/// Run one callback, containing a panic.  Returns `true` if it completed.
fn guarded(kind: &str, f: impl FnOnce()) -> bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(kind, reason = %reason, "listener panicked");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> MessageCallback) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = Arc::clone(&log);
        let make = move |label: &str| -> MessageCallback {
            let log = Arc::clone(&log_clone);
            let label = label.to_string();
            Arc::new(move |m: &Message| {
                log.lock().unwrap().push(format!("{label}:{}", m.content));
            })
        };
        (log, make)
    }

    #[test]
    fn test_dispatch_order() {
        let registry = ListenerRegistry::new();
        let (log, make) = recorder();

        let all = make("all");
        let global = make("global");
        let conv = make("conv");
        let other = make("other");
        registry.on_message(Target::AllScreens, move |m| all(m));
        registry.on_message(Target::Global, move |m| global(m));
        registry.on_message(Target::Conversation("c1".into()), move |m| conv(m));
        registry.on_message(Target::Conversation("c2".into()), move |m| other(m));

        let delivered = registry.dispatch("c1", &Message::text("c1", "L", "x"));

        assert_eq!(delivered, 3);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["conv:x", "global:x", "all:x"]
        );
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let registry = ListenerRegistry::new();
        let (log, make) = recorder();
        let second = make("second");

        registry.on_message(Target::Conversation("c1".into()), |_| panic!("boom"));
        registry.on_message(Target::Conversation("c1".into()), move |m| second(m));

        let delivered = registry.dispatch("c1", &Message::text("c1", "L", "hello"));

        assert_eq!(delivered, 1);
        assert_eq!(*log.lock().unwrap(), vec!["second:hello"]);
    }

    #[test]
    fn test_off_message_removes_empty_target() {
        let registry = ListenerRegistry::new();
        let target = Target::Conversation("c1".into());
        let a = registry.on_message(target.clone(), |_| {});
        let b = registry.on_message(target.clone(), |_| {});

        assert!(registry.off_message(&target, a));
        assert!(registry.has_message_listeners(&target));
        assert!(!registry.off_message(&target, a));

        assert!(registry.off_message(&target, b));
        assert!(!registry.has_message_listeners(&target));
        assert_eq!(registry.dispatch("c1", &Message::text("c1", "L", "x")), 0);
    }

    #[test]
    fn test_status_listeners() {
        let registry = ListenerRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        registry.on_status_change(|_| panic!("bad subscriber"));
        let id = registry.on_status_change(move |s| seen_clone.lock().unwrap().push(s));

        registry.notify_status(ConnectionStatus::Connecting);
        assert!(registry.off_status_change(id));
        registry.notify_status(ConnectionStatus::Connected);

        assert_eq!(*seen.lock().unwrap(), vec![ConnectionStatus::Connecting]);
    }
}
