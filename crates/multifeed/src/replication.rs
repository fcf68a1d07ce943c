use multifeed_mux::SessionHandle;
use tokio::io::DuplexStream;

use crate::error::{MultifeedError, MultifeedResult};

/// A running replication session with one peer.
///
/// Dropping it leaves the session running until the transport closes or
/// the registry is closed.
#[derive(Debug)]
pub struct Replication {
    session: SessionHandle,
    transport: Option<DuplexStream>,
}

impl Replication {
    pub(crate) fn new(session: SessionHandle, transport: Option<DuplexStream>) -> Self {
        Self { session, transport }
    }

    pub fn session_id(&self) -> u64 {
        self.session.id()
    }

    /// The peer end of the in-process pipe, when no stream was supplied.
    ///
    /// Whatever the caller writes here is read by the session, and the
    /// session's frames can be read from it; pipe it to the remote peer.
    pub fn take_transport(&mut self) -> Option<DuplexStream> {
        self.transport.take()
    }

    pub fn is_finished(&self) -> bool {
        self.session.is_finished()
    }

    /// End the session.
    pub fn abort(&self) {
        self.session.abort();
    }

    /// Wait for the session to end.
    ///
    /// `Ok(())` when the peer hung up or the registry closed.
    pub async fn closed(self) -> MultifeedResult<()> {
        self.session.closed().await.map_err(MultifeedError::Session)
    }
}
