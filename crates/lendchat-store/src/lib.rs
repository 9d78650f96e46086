//! # lendchat-store
//!
//! Durable local storage for the chat transport.
//!
//! The crate has two layers.  A string key-value backend ([`KeyValueStore`])
//! with a SQLite implementation ([`Database`]) and an in-memory one
//! ([`MemoryKv`]); and the [`MessageStore`] built on top of it, which owns
//! per-conversation message lists, the conversation index and drafts.  No
//! other component touches the backend directly.

pub mod chats;
pub mod database;
pub mod drafts;
pub mod kv;
pub mod messages;
pub mod migrations;
pub mod store;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use kv::{KeyValueStore, MemoryKv};
pub use store::MessageStore;
