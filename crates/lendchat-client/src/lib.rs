//! # lendchat-client
//!
//! Application-facing side of the chat transport: the message dispatcher,
//! the bridge from connection notifications to dispatcher work, environment
//! configuration and the [`ChatService`] that wires everything together.

mod bridge;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod service;

use tracing_subscriber::{fmt, EnvFilter};

pub use config::ClientConfig;
pub use dispatcher::{Dispatcher, MessageHook, PersistInbound, ResendReport};
pub use error::{ClientError, Result};
pub use service::ChatService;

/// Install the global tracing subscriber (respects `RUST_LOG`).
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("lendchat_client=debug,lendchat_net=debug,lendchat_store=info,warn")
    });

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
