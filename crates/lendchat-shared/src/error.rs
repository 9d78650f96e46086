use thiserror::Error;

use crate::types::MessageStatus;

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("Illegal message status transition: {from:?} -> {to:?}")]
    IllegalTransition {
        from: Option<MessageStatus>,
        to: MessageStatus,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
