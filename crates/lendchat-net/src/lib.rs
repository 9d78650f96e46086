// Real-time connection layer: socket lifecycle, heartbeat, reconnect and
// listener fan-out.

pub mod connection;
pub mod error;
pub mod listeners;
pub mod transport;
pub mod ws;

pub use connection::{ConnectionConfig, ConnectionManager, ConnectionNotification};
pub use error::{NetError, Result};
pub use listeners::{
    ListenerId, ListenerRegistry, MessageCallback, ReadCallback, StatusCallback, Target,
    TypingCallback,
};
pub use transport::{
    ChannelConnector, Connection, Connector, CredentialProvider, FrameSink, SocketEvent,
    StaticCredential,
};
pub use ws::WsConnector;
