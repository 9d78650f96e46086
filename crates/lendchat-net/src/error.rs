use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("Not connected")]
    NotConnected,

    #[error("Auth provider returned no credential")]
    MissingCredential,

    #[error("Invalid endpoint URL: {0}")]
    InvalidEndpoint(#[from] url::ParseError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Shared(#[from] lendchat_shared::SharedError),
}

pub type Result<T> = std::result::Result<T, NetError>;
