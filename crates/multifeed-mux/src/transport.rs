use tokio::io::{AsyncRead, AsyncWrite};

/// A bidirectional byte stream a replication session can run over.
///
/// Implemented for every `AsyncRead + AsyncWrite` type that can move to
/// another task, including `Box<dyn Transport>`.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}
