use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use multifeed_store::{Feed, LogStore};
use multifeed_types::{FeedKey, RootKey};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use crate::config::MuxConfig;
use crate::error::{MuxError, MuxResult};
use crate::message::MuxMessage;
use crate::session;
use crate::transport::Transport;

/// Events emitted by the muxer for its owner.
#[derive(Clone, Debug)]
pub enum MuxEvent {
    /// A peer announced a feed this muxer did not carry yet.
    FeedDiscovered(Feed),
    /// A session ended with an error.
    SessionError { session: u64, error: Arc<MuxError> },
}

/// Outcome of a finished session.
pub type SessionResult = Result<(), Arc<MuxError>>;

#[derive(Default)]
struct MuxerState {
    feeds: HashMap<FeedKey, Feed>,
    order: Vec<FeedKey>,
    sessions: HashMap<u64, mpsc::UnboundedSender<MuxMessage>>,
    next_session: u64,
    closed: bool,
}

impl MuxerState {
    fn announce(&self, key: FeedKey, skip: Option<u64>) {
        for (id, control) in &self.sessions {
            if Some(*id) != skip {
                let _ = control.send(MuxMessage::Announce { key });
            }
        }
    }
}

pub(crate) struct MuxerInner {
    pub(crate) discovery_key: [u8; 32],
    pub(crate) store: Arc<dyn LogStore>,
    pub(crate) config: MuxConfig,
    state: Mutex<MuxerState>,
    events: mpsc::UnboundedSender<MuxEvent>,
    shutdown: watch::Sender<bool>,
    active: watch::Sender<usize>,
}

impl MuxerInner {
    pub(crate) fn feed(&self, key: &FeedKey) -> Option<Feed> {
        self.state
            .lock()
            .expect("muxer lock poisoned")
            .feeds
            .get(key)
            .cloned()
    }

    /// Adopt a feed learned from session `from`. Returns the handle the
    /// muxer carries for that key, which may predate this call.
    pub(crate) fn discover(&self, feed: Feed, from: u64) -> MuxResult<Feed> {
        let mut state = self.state.lock().expect("muxer lock poisoned");
        if state.closed {
            return Err(MuxError::Shutdown);
        }
        if let Some(existing) = state.feeds.get(feed.key()) {
            return Ok(existing.clone());
        }
        let key = *feed.key();
        state.feeds.insert(key, feed.clone());
        state.order.push(key);
        state.announce(key, Some(from));
        drop(state);

        debug!(key = %key.short_hex(), session = from, "feed discovered");
        let _ = self.events.send(MuxEvent::FeedDiscovered(feed.clone()));
        Ok(feed)
    }

    /// Register a session for announcements and snapshot the feeds it must
    /// be told about. Both happen under one lock so no feed is missed.
    pub(crate) fn attach(
        self: &Arc<Self>,
        id: u64,
        control: mpsc::UnboundedSender<MuxMessage>,
    ) -> MuxResult<(SessionGuard, Vec<FeedKey>)> {
        let mut state = self.state.lock().expect("muxer lock poisoned");
        if state.closed {
            return Err(MuxError::Shutdown);
        }
        state.sessions.insert(id, control);
        let known = state.order.clone();
        drop(state);
        self.active.send_modify(|n| *n += 1);
        Ok((
            SessionGuard {
                inner: Arc::clone(self),
                id,
            },
            known,
        ))
    }

    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

/// Detaches a session from the muxer when dropped, however the session ends.
pub(crate) struct SessionGuard {
    inner: Arc<MuxerInner>,
    id: u64,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Ok(mut state) = self.inner.state.lock() {
            state.sessions.remove(&self.id);
        }
        self.inner.active.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Multiplexes the replication traffic of every feed over one session per
/// peer.
///
/// Cloning is cheap; clones share the same feed set and sessions.
#[derive(Clone)]
pub struct TopicMuxer {
    inner: Arc<MuxerInner>,
}

impl TopicMuxer {
    /// Create a muxer for the topic of `root`. Only peers using the same root
    /// key complete the handshake.
    pub fn new(
        root: &RootKey,
        store: Arc<dyn LogStore>,
        config: MuxConfig,
    ) -> (Self, mpsc::UnboundedReceiver<MuxEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        let (active, _) = watch::channel(0);
        let muxer = Self {
            inner: Arc::new(MuxerInner {
                discovery_key: root.discovery_key(),
                store,
                config,
                state: Mutex::new(MuxerState::default()),
                events,
                shutdown,
                active,
            }),
        };
        (muxer, rx)
    }

    pub fn discovery_key(&self) -> &[u8; 32] {
        &self.inner.discovery_key
    }

    /// Start carrying `feed` and announce it on every live session.
    ///
    /// Returns `false` if the feed was already carried or the muxer is closed.
    pub fn add_feed(&self, feed: Feed) -> bool {
        let mut state = self.inner.state.lock().expect("muxer lock poisoned");
        if state.closed || state.feeds.contains_key(feed.key()) {
            return false;
        }
        let key = *feed.key();
        state.feeds.insert(key, feed);
        state.order.push(key);
        state.announce(key, None);
        debug!(key = %key.short_hex(), sessions = state.sessions.len(), "feed added");
        true
    }

    pub fn contains(&self, key: &FeedKey) -> bool {
        self.inner
            .state
            .lock()
            .expect("muxer lock poisoned")
            .feeds
            .contains_key(key)
    }

    /// Carried feeds in the order they were added.
    pub fn feeds(&self) -> Vec<Feed> {
        let state = self.inner.state.lock().expect("muxer lock poisoned");
        state
            .order
            .iter()
            .filter_map(|key| state.feeds.get(key).cloned())
            .collect()
    }

    /// Number of sessions past their handshake.
    pub fn session_count(&self) -> usize {
        *self.inner.active.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().expect("muxer lock poisoned").closed
    }

    /// Run a replication session over `transport` on a new task.
    pub fn add_stream<T: Transport>(&self, transport: T, initiator: bool) -> MuxResult<SessionHandle> {
        let id = {
            let mut state = self.inner.state.lock().expect("muxer lock poisoned");
            if state.closed {
                return Err(MuxError::Shutdown);
            }
            state.next_session += 1;
            state.next_session
        };

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(
            async move {
                match session::run(Arc::clone(&inner), id, transport, initiator).await {
                    Ok(()) => {
                        debug!("session ended");
                        Ok(())
                    }
                    Err(e) => {
                        warn!(error = %e, "session failed");
                        let error = Arc::new(e);
                        let _ = inner.events.send(MuxEvent::SessionError {
                            session: id,
                            error: Arc::clone(&error),
                        });
                        Err(error)
                    }
                }
            }
            .instrument(tracing::info_span!("mux_session", session = id, initiator)),
        );
        Ok(SessionHandle { id, task })
    }

    /// End every session and stop accepting feeds and streams.
    ///
    /// Waits until all attached sessions have detached. Closing twice is a no-op.
    pub async fn close(&self) {
        {
            let mut state = self.inner.state.lock().expect("muxer lock poisoned");
            if state.closed {
                return;
            }
            state.closed = true;
            state.feeds.clear();
            state.order.clear();
            state.sessions.clear();
        }
        self.inner.shutdown.send_replace(true);

        let mut active = self.inner.active.subscribe();
        while *active.borrow_and_update() != 0 {
            if active.changed().await.is_err() {
                break;
            }
        }
        info!("topic muxer closed");
    }
}

impl std::fmt::Debug for TopicMuxer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock().expect("muxer lock poisoned");
        f.debug_struct("TopicMuxer")
            .field("feeds", &state.feeds.len())
            .field("sessions", &state.sessions.len())
            .field("closed", &state.closed)
            .finish()
    }
}

/// Handle to a running session.
///
/// Dropping the handle leaves the session running.
#[derive(Debug)]
pub struct SessionHandle {
    id: u64,
    task: JoinHandle<SessionResult>,
}

impl SessionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// End the session immediately.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Wait for the session to end and return its result.
    pub async fn closed(self) -> SessionResult {
        match self.task.await {
            Ok(result) => result,
            Err(_) => Err(Arc::new(MuxError::Aborted)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use multifeed_store::{FeedOptions, InMemoryLogStore, Namespace};
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    struct Peer {
        store: Arc<InMemoryLogStore>,
        muxer: TopicMuxer,
        events: mpsc::UnboundedReceiver<MuxEvent>,
    }

    fn peer(root: &RootKey) -> Peer {
        let store = Arc::new(InMemoryLogStore::new());
        let (muxer, events) = TopicMuxer::new(root, store.clone(), MuxConfig::default());
        Peer { store, muxer, events }
    }

    async fn local_feed(peer: &Peer, root: &RootKey, name: &str) -> Feed {
        let ns = Namespace::root(root).child("writers").child(name);
        let feed = peer.store.default_feed(&ns, &FeedOptions::default()).await.unwrap();
        peer.muxer.add_feed(feed.clone());
        feed
    }

    async fn next_discovered(events: &mut mpsc::UnboundedReceiver<MuxEvent>) -> Feed {
        loop {
            match timeout(WAIT, events.recv()).await.unwrap().unwrap() {
                MuxEvent::FeedDiscovered(feed) => return feed,
                MuxEvent::SessionError { error, .. } => panic!("session error: {error}"),
            }
        }
    }

    async fn session_error(events: &mut mpsc::UnboundedReceiver<MuxEvent>) -> Arc<MuxError> {
        loop {
            if let MuxEvent::SessionError { error, .. } =
                timeout(WAIT, events.recv()).await.unwrap().unwrap()
            {
                return error;
            }
        }
    }

    #[test]
    fn session_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}
        let peer = peer(&RootKey::from_bytes([3; 32]));
        let (transport, _remote) = tokio::io::duplex(64);
        let session = session::run(Arc::clone(&peer.muxer.inner), 1, transport, true);
        assert_send(&session);
    }

    #[tokio::test]
    async fn add_feed_is_idempotent() {
        let root = RootKey::from_bytes([1; 32]);
        let a = peer(&root);
        let feed = local_feed(&a, &root, "x").await;
        assert!(!a.muxer.add_feed(feed.clone()));
        assert_eq!(a.muxer.feeds().len(), 1);
        assert!(a.muxer.contains(feed.key()));
    }

    #[tokio::test]
    async fn replicates_existing_and_later_blocks() {
        let root = RootKey::from_bytes([1; 32]);
        let a = peer(&root);
        let mut b = peer(&root);
        let feed = local_feed(&a, &root, "x").await;
        feed.append(b"before").unwrap();

        let (ta, tb) = tokio::io::duplex(64 * 1024);
        let _ha = a.muxer.add_stream(ta, true).unwrap();
        let _hb = b.muxer.add_stream(tb, false).unwrap();

        let replica = next_discovered(&mut b.events).await;
        assert_eq!(replica.key(), feed.key());
        assert!(!replica.is_writable());
        let block = timeout(WAIT, replica.get_wait(0)).await.unwrap().unwrap();
        assert_eq!(block.as_ref(), b"before");

        feed.append(b"after").unwrap();
        let block = timeout(WAIT, replica.get_wait(1)).await.unwrap().unwrap();
        assert_eq!(block.as_ref(), b"after");
    }

    #[tokio::test]
    async fn feed_added_mid_session_is_announced() {
        let root = RootKey::from_bytes([1; 32]);
        let a = peer(&root);
        let mut b = peer(&root);

        let (ta, tb) = tokio::io::duplex(64 * 1024);
        let _ha = a.muxer.add_stream(ta, true).unwrap();
        let _hb = b.muxer.add_stream(tb, false).unwrap();

        let feed = local_feed(&a, &root, "late").await;
        feed.append(b"hi").unwrap();
        let replica = next_discovered(&mut b.events).await;
        assert_eq!(replica.key(), feed.key());
        let block = timeout(WAIT, replica.get_wait(0)).await.unwrap().unwrap();
        assert_eq!(block.as_ref(), b"hi");
    }

    #[tokio::test]
    async fn mismatched_roots_fail_handshake() {
        let mut a = peer(&RootKey::from_bytes([1; 32]));
        let mut b = peer(&RootKey::from_bytes([2; 32]));

        let (ta, tb) = tokio::io::duplex(64 * 1024);
        let ha = a.muxer.add_stream(ta, true).unwrap();
        let hb = b.muxer.add_stream(tb, false).unwrap();

        assert!(matches!(*ha.closed().await.unwrap_err(), MuxError::Handshake(_)));
        assert!(matches!(*hb.closed().await.unwrap_err(), MuxError::Handshake(_)));
        assert!(matches!(*session_error(&mut a.events).await, MuxError::Handshake(_)));
        assert!(matches!(*session_error(&mut b.events).await, MuxError::Handshake(_)));
    }

    #[tokio::test]
    async fn same_role_fails_handshake() {
        let root = RootKey::from_bytes([1; 32]);
        let a = peer(&root);
        let b = peer(&root);

        let (ta, tb) = tokio::io::duplex(64 * 1024);
        let ha = a.muxer.add_stream(ta, true).unwrap();
        let hb = b.muxer.add_stream(tb, true).unwrap();
        assert!(matches!(*ha.closed().await.unwrap_err(), MuxError::Handshake(_)));
        assert!(matches!(*hb.closed().await.unwrap_err(), MuxError::Handshake(_)));
    }

    #[tokio::test]
    async fn close_ends_sessions() {
        let root = RootKey::from_bytes([1; 32]);
        let a = peer(&root);
        let b = peer(&root);

        let (ta, tb) = tokio::io::duplex(64 * 1024);
        let ha = a.muxer.add_stream(ta, true).unwrap();
        let hb = b.muxer.add_stream(tb, false).unwrap();

        timeout(WAIT, async {
            while a.muxer.session_count() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        timeout(WAIT, a.muxer.close()).await.unwrap();
        assert!(a.muxer.is_closed());
        assert_eq!(a.muxer.session_count(), 0);
        assert!(timeout(WAIT, ha.closed()).await.unwrap().is_ok());
        // The peer sees the transport close.
        assert!(timeout(WAIT, hb.closed()).await.unwrap().is_ok());

        let (tc, _td) = tokio::io::duplex(1024);
        assert!(matches!(a.muxer.add_stream(tc, true), Err(MuxError::Shutdown)));
        assert!(!a.muxer.add_feed(local_feed(&b, &root, "x").await));
    }

    #[tokio::test]
    async fn abort_reports_aborted() {
        let root = RootKey::from_bytes([1; 32]);
        let a = peer(&root);
        let (ta, _tb) = tokio::io::duplex(1024);
        let handle = a.muxer.add_stream(ta, true).unwrap();
        handle.abort();
        assert!(matches!(*handle.closed().await.unwrap_err(), MuxError::Aborted));
    }
}
