use thiserror::Error;

use lendchat_net::NetError;
use lendchat_shared::SharedError;
use lendchat_store::StoreError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Inbound message has no chat id")]
    MissingChatId,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Net(#[from] NetError),

    #[error(transparent)]
    Shared(#[from] SharedError),
}

pub type Result<T> = std::result::Result<T, ClientError>;
