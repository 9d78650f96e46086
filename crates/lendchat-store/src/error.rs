use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored value could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A status write the message state machine does not allow.
    #[error(transparent)]
    Shared(#[from] lendchat_shared::SharedError),

    /// The backend's connection lock was poisoned by a panicking writer.
    #[error("Storage lock poisoned")]
    LockPoisoned,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Backend-specific failure reported by a custom [`KeyValueStore`](crate::KeyValueStore).
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
