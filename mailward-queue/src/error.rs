use thiserror::Error;

use crate::id::MessageId;

pub type Result<T> = std::result::Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The id is not a token this queue will accept or store on disk.
    #[error("invalid message id: {0}")]
    InvalidId(String),

    #[error("no queue entry for {0}")]
    NotFound(MessageId),

    #[error("could not serialize queue entry: {0}")]
    Serialization(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
