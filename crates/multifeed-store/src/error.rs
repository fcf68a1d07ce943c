use std::path::PathBuf;

use multifeed_types::FeedKey;

/// Errors from log store and feed operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Append attempted on a feed without its secret key.
    #[error("feed {0} is not writable")]
    NotWritable(FeedKey),

    /// The feed handle (or the store that produced it) was closed.
    #[error("feed {0} is closed")]
    Closed(FeedKey),

    /// A stored block failed its integrity check.
    #[error("corrupt block {index} in {path}: {reason}")]
    CorruptBlock {
        path: PathBuf,
        index: u64,
        reason: String,
    },

    /// Block payload exceeds what a segment frame can describe.
    #[error("block too large: {size} bytes (max {max})")]
    BlockTooLarge { size: usize, max: usize },

    /// A key file on disk could not be decoded.
    #[error("invalid key file {0}")]
    InvalidKeyFile(PathBuf),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
