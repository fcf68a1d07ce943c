use multifeed_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MuxError {
    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("framing error: {0}")]
    Framing(String),

    #[error("invalid message type: {0}")]
    InvalidMessageType(u8),

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("unexpected {0} message")]
    UnexpectedMessage(&'static str),

    #[error("remote error: code={code}, message={message}")]
    Remote { code: u32, message: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The muxer was closed.
    #[error("muxer shut down")]
    Shutdown,

    /// The session was aborted through its handle.
    #[error("session aborted")]
    Aborted,
}

pub type MuxResult<T> = Result<T, MuxError>;
