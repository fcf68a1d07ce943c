use std::sync::Arc;

use multifeed_mux::MuxError;
use multifeed_store::StoreError;
use multifeed_types::TypeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MultifeedError {
    /// The registry has not finished opening.
    #[error("multifeed is not open yet")]
    NotReady,

    /// The registry is closing or closed.
    #[error("multifeed is closed")]
    Closed,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistError),

    #[error("mux error: {0}")]
    Mux(#[from] MuxError),

    /// A replication session ended with an error.
    #[error("replication session failed: {0}")]
    Session(#[from] Arc<MuxError>),

    #[error("type error: {0}")]
    Type(#[from] TypeError),
}

pub type MultifeedResult<T> = Result<T, MultifeedError>;

/// Errors from roster persistence handlers.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("persistence backend unavailable: {0}")]
    Unavailable(String),
}

pub type PersistResult<T> = Result<T, PersistError>;
