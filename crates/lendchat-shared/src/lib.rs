//! # lendchat-shared
//!
//! Data model and wire format shared by the store, transport and client
//! crates: messages, conversation summaries, the status state machines and
//! the JSON frame envelope.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::SharedError;
pub use protocol::{ConnectedAck, InboundFrame, OutboundFrame, ReadReceipt, TypingNotice};
pub use types::*;
