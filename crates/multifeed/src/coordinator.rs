use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use multifeed_mux::{MuxEvent, TopicMuxer};
use multifeed_store::{Feed, FeedOptions, LogStore, Namespace};
use multifeed_types::{FeedKey, FeedRecord, RootKey};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::MultifeedConfig;
use crate::error::{MultifeedError, MultifeedResult};
use crate::event::MultifeedEvent;
use crate::options::{FeedLookup, ReplicateOptions, WriterOptions};
use crate::persist::{LogPersistence, PersistenceHandler};
use crate::registry::{Registered, Registry};
use crate::replication::Replication;

/// Namespace segment under which writer feeds are derived.
pub const WRITERS_NAMESPACE: &str = "writers";

/// Buffer size of the in-process pipe created by [`Multifeed::replicate`].
const PIPE_CAPACITY: usize = 64 * 1024;

/// Lifecycle of a [`Multifeed`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Unopened,
    Opening,
    Open,
    Closing,
    Closed,
}

/// Tasks and channels that exist while the registry is open.
struct Runtime {
    muxer: TopicMuxer,
    persist: mpsc::UnboundedSender<FeedRecord>,
    persist_task: JoinHandle<()>,
    discovery_task: JoinHandle<()>,
}

/// A finished bring-up waiting to be installed by `commit`.
struct Staged {
    runtime: Runtime,
    roster: Vec<(Feed, String)>,
}

#[derive(Default)]
struct Shared {
    registry: Registry,
    root_key: Option<RootKey>,
    runtime: Option<Runtime>,
    /// Writer names being created; waiters are woken when the creator finishes.
    inflight: HashMap<String, watch::Receiver<()>>,
}

struct Inner {
    config: MultifeedConfig,
    store: Arc<dyn LogStore>,
    handler: Arc<dyn PersistenceHandler>,
    state: watch::Sender<LifecycleState>,
    /// Serializes `open` and `close`.
    lifecycle: tokio::sync::Mutex<()>,
    /// Set once `close` starts; cancels an open or writers still waiting.
    closing: watch::Sender<bool>,
    shared: Mutex<Shared>,
    events: broadcast::Sender<MultifeedEvent>,
}

/// A named set of append-only feeds replicated with peers that share its
/// root key.
///
/// Local writers and feeds announced by peers are both registered through
/// [`Multifeed::register_feed`], which deduplicates by key, assigns names,
/// records new local feeds in the roster, hands them to the topic muxer and
/// broadcasts a [`MultifeedEvent::Feed`].
///
/// Cloning is cheap; clones share the same registry.
#[derive(Clone)]
pub struct Multifeed {
    inner: Arc<Inner>,
}

enum WriterStep {
    Existing(Feed),
    Wait(watch::Receiver<()>),
    Reserved(Reservation),
}

/// Holds a writer name while its feed is created. Dropping it releases the
/// name and wakes anyone waiting on it.
struct Reservation {
    inner: Arc<Inner>,
    name: String,
    _done: watch::Sender<()>,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if let Ok(mut shared) = self.inner.shared.lock() {
            shared.registry.release(&self.name);
            shared.inflight.remove(&self.name);
        }
    }
}

impl Multifeed {
    /// A registry whose roster is kept in the log store itself.
    pub fn new(store: Arc<dyn LogStore>, config: MultifeedConfig) -> Self {
        let handler = Arc::new(LogPersistence::new(Arc::clone(&store), &config.root_key));
        Self::with_persistence(store, handler, config)
    }

    /// A registry with a custom roster backend.
    pub fn with_persistence(
        store: Arc<dyn LogStore>,
        handler: Arc<dyn PersistenceHandler>,
        config: MultifeedConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (state, _) = watch::channel(LifecycleState::Unopened);
        let shared = Shared {
            root_key: Some(config.root_key.clone()),
            ..Shared::default()
        };
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                handler,
                state,
                lifecycle: tokio::sync::Mutex::new(()),
                closing: watch::channel(false).0,
                shared: Mutex::new(shared),
                events,
            }),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.inner.state.borrow()
    }

    /// The registry's root key, or `None` once closed.
    pub fn root_key(&self) -> Option<RootKey> {
        self.lock().root_key.clone()
    }

    pub fn config(&self) -> &MultifeedConfig {
        &self.inner.config
    }

    /// Receive feed and error notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<MultifeedEvent> {
        self.inner.events.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.inner.shared.lock().expect("registry lock poisoned")
    }

    /// Lock the registry if it is open.
    fn lock_open(&self) -> MultifeedResult<MutexGuard<'_, Shared>> {
        let shared = self.lock();
        match self.state() {
            LifecycleState::Open => Ok(shared),
            LifecycleState::Unopened | LifecycleState::Opening => Err(MultifeedError::NotReady),
            LifecycleState::Closing | LifecycleState::Closed => Err(MultifeedError::Closed),
        }
    }

    // ---- Lifecycle ----

    /// Bring up the store, the roster, the topic muxer and its workers.
    ///
    /// Idempotent. Concurrent callers wait for the first to finish. A failed
    /// open leaves the registry unopened with nothing registered, and it may
    /// be retried. A concurrent [`Multifeed::close`] cancels it.
    pub async fn open(&self) -> MultifeedResult<()> {
        match self.state() {
            LifecycleState::Open => return Ok(()),
            LifecycleState::Closing | LifecycleState::Closed => return Err(MultifeedError::Closed),
            LifecycleState::Unopened | LifecycleState::Opening => {}
        }

        let _lifecycle = self.unless_closing(self.inner.lifecycle.lock()).await?;
        {
            let _shared = self.lock();
            match self.state() {
                LifecycleState::Open => return Ok(()),
                LifecycleState::Closing | LifecycleState::Closed => {
                    return Err(MultifeedError::Closed)
                }
                LifecycleState::Unopened | LifecycleState::Opening => {}
            }
            self.inner.state.send_replace(LifecycleState::Opening);
        }

        match self.unless_closing(self.bring_up()).await.and_then(|staged| staged) {
            Ok(staged) => match self.commit(staged) {
                Ok(feeds) => {
                    info!(feeds, "multifeed open");
                    Ok(())
                }
                Err(runtime) => {
                    shut_down(runtime).await;
                    Err(MultifeedError::Closed)
                }
            },
            Err(e) => {
                warn!(error = %e, "multifeed open failed");
                let _shared = self.lock();
                if self.state() == LifecycleState::Opening {
                    self.inner.state.send_replace(LifecycleState::Unopened);
                }
                Err(e)
            }
        }
    }

    /// Alias of [`Multifeed::open`].
    pub async fn ready(&self) -> MultifeedResult<()> {
        self.open().await
    }

    /// Everything `open` needs, built without touching the registry.
    async fn bring_up(&self) -> MultifeedResult<Staged> {
        self.inner.store.ready().await?;

        let records = self.inner.handler.fetch_feeds().await?;
        debug!(records = records.len(), "reconciling roster");
        let mut roster = Vec::with_capacity(records.len());
        for record in records {
            let feed = self.inner.store.get(&record.key).await?;
            roster.push((feed, record.name));
        }

        let root = self.root_key().ok_or(MultifeedError::Closed)?;
        let (muxer, mux_events) = TopicMuxer::new(
            &root,
            Arc::clone(&self.inner.store),
            self.inner.config.mux.clone(),
        );
        let (persist, records) = mpsc::unbounded_channel();
        let persist_task = tokio::spawn(persist_loop(
            Arc::clone(&self.inner.handler),
            records,
            self.inner.events.clone(),
        ));
        let discovery_task = tokio::spawn(discovery_loop(Arc::downgrade(&self.inner), mux_events));

        Ok(Staged {
            runtime: Runtime {
                muxer,
                persist,
                persist_task,
                discovery_task,
            },
            roster,
        })
    }

    /// Install a staged bring-up and register its roster in one step.
    ///
    /// Hands the runtime back if the registry started closing meanwhile.
    fn commit(&self, staged: Staged) -> Result<usize, Runtime> {
        let Staged { runtime, roster } = staged;
        let mut shared = self.lock();
        if self.state() != LifecycleState::Opening {
            return Err(runtime);
        }
        self.inner.state.send_replace(LifecycleState::Open);
        for (feed, name) in roster {
            self.register_into(&mut shared.registry, &runtime, feed, Some(name), false);
        }
        shared.runtime = Some(runtime);
        Ok(shared.registry.len())
    }

    /// Run `fut` unless the registry starts closing first.
    async fn unless_closing<F: Future>(&self, fut: F) -> MultifeedResult<F::Output> {
        let mut closing = self.inner.closing.subscribe();
        tokio::select! {
            out = fut => Ok(out),
            _ = closing_requested(&mut closing) => Err(MultifeedError::Closed),
        }
    }

    /// Close the registry, its sessions, the roster handler and the store.
    ///
    /// Idempotent, and safe whether or not `open` ever ran. An open still in
    /// progress is cancelled rather than awaited. Later operations fail with
    /// [`MultifeedError::Closed`].
    pub async fn close(&self) -> MultifeedResult<()> {
        {
            let _shared = self.lock();
            if self.state() != LifecycleState::Closed {
                self.inner.state.send_replace(LifecycleState::Closing);
            }
        }
        self.inner.closing.send_replace(true);

        let _lifecycle = self.inner.lifecycle.lock().await;
        if self.state() == LifecycleState::Closed {
            return Ok(());
        }

        let runtime = self.lock().runtime.take();
        if let Some(runtime) = runtime {
            shut_down(runtime).await;
        }
        let (handler_result, store_result) =
            tokio::join!(self.inner.handler.close(), self.inner.store.close());

        {
            let mut shared = self.lock();
            shared.registry.clear();
            shared.inflight.clear();
            shared.root_key = None;
            self.inner.state.send_replace(LifecycleState::Closed);
        }
        info!("multifeed closed");

        handler_result?;
        store_result?;
        Ok(())
    }

    // ---- Registration ----

    /// Register `feed` under `name`, or under the next default name.
    ///
    /// A key that is already registered is left untouched and its existing
    /// registration returned. Otherwise the feed is queued for the roster
    /// when `persist` is set, added to both maps, handed to the topic muxer
    /// and announced with a [`MultifeedEvent::Feed`].
    pub fn register_feed(
        &self,
        feed: Feed,
        name: Option<String>,
        persist: bool,
    ) -> MultifeedResult<Registered> {
        let mut guard = self.lock();
        match self.state() {
            LifecycleState::Closing | LifecycleState::Closed => return Err(MultifeedError::Closed),
            LifecycleState::Unopened | LifecycleState::Opening => return Err(MultifeedError::NotReady),
            LifecycleState::Open => {}
        }
        let shared = &mut *guard;
        let Some(runtime) = shared.runtime.as_ref() else {
            return Err(MultifeedError::NotReady);
        };
        Ok(self.register_into(&mut shared.registry, runtime, feed, name, persist))
    }

    /// Registration proper; the caller holds the registry lock.
    fn register_into(
        &self,
        registry: &mut Registry,
        runtime: &Runtime,
        feed: Feed,
        name: Option<String>,
        persist: bool,
    ) -> Registered {
        let registered = registry.insert(feed, name);
        if let Registered::Added { feed, name } = &registered {
            if persist {
                let record = FeedRecord::new(*feed.key(), name.clone());
                if runtime.persist.send(record).is_err() {
                    warn!(key = %feed.key().short_hex(), "persistence worker gone; record dropped");
                }
            }
            runtime.muxer.add_feed(feed.clone());
            debug!(key = %feed.key().short_hex(), name = %name, persist, "feed registered");
            let _ = self.inner.events.send(MultifeedEvent::Feed {
                feed: feed.clone(),
                name: name.clone(),
            });
        }
        registered
    }

    /// Get or create a local writable feed.
    ///
    /// Opens the registry first if needed. A bound name returns its feed.
    /// Concurrent calls for the same new name create one feed; unnamed calls
    /// each get a distinct default name. Calls still waiting when the
    /// registry closes fail with [`MultifeedError::Closed`].
    pub async fn writer(&self, options: WriterOptions) -> MultifeedResult<Feed> {
        self.open().await?;

        let reservation = loop {
            match self.writer_step(options.name.as_deref())? {
                WriterStep::Existing(feed) => return Ok(feed),
                WriterStep::Wait(mut done) => {
                    let _ = self.unless_closing(done.changed()).await?;
                }
                WriterStep::Reserved(reservation) => break reservation,
            }
        };

        let root = self.root_key().ok_or(MultifeedError::Closed)?;
        let namespace = Namespace::root(&root)
            .child(WRITERS_NAMESPACE)
            .child(&reservation.name);
        let feed_options = FeedOptions {
            key_pair: options.key_pair.clone(),
        };
        let feed = self
            .unless_closing(self.inner.store.default_feed(&namespace, &feed_options))
            .await??;

        let registered = self.register_feed(feed, Some(reservation.name.clone()), true)?;
        if !registered.is_added() {
            debug!(
                requested = %reservation.name,
                existing = %registered.name(),
                "writer key already registered"
            );
        }
        Ok(registered.into_feed())
    }

    fn writer_step(&self, name: Option<&str>) -> MultifeedResult<WriterStep> {
        let mut guard = self.lock_open()?;
        let shared = &mut *guard;
        let name = match name {
            Some(name) => {
                if let Some(feed) = shared.registry.by_name(name) {
                    return Ok(WriterStep::Existing(feed.clone()));
                }
                if let Some(done) = shared.inflight.get(name) {
                    return Ok(WriterStep::Wait(done.clone()));
                }
                shared.registry.reserve(name);
                name.to_string()
            }
            None => shared.registry.reserve_default(),
        };
        let (done, waiter) = watch::channel(());
        shared.inflight.insert(name.clone(), waiter);
        Ok(WriterStep::Reserved(Reservation {
            inner: Arc::clone(&self.inner),
            name,
            _done: done,
        }))
    }

    // ---- Queries ----

    /// Every registered feed, in registration order.
    pub fn feeds(&self) -> MultifeedResult<Vec<Feed>> {
        Ok(self.lock_open()?.registry.feeds())
    }

    /// Look a feed up by key. Malformed or unknown keys yield `Ok(None)`.
    pub fn feed(&self, key: impl Into<FeedLookup>) -> MultifeedResult<Option<Feed>> {
        let lookup = key.into();
        let shared = self.lock_open()?;
        Ok(lookup.key().and_then(|key| shared.registry.get(key).cloned()))
    }

    pub fn feed_by_name(&self, name: &str) -> MultifeedResult<Option<Feed>> {
        Ok(self.lock_open()?.registry.by_name(name).cloned())
    }

    pub fn name_of(&self, key: &FeedKey) -> MultifeedResult<Option<String>> {
        Ok(self.lock_open()?.registry.name_of(key).map(str::to_string))
    }

    /// Number of registered feeds.
    pub fn len(&self) -> MultifeedResult<usize> {
        Ok(self.lock_open()?.registry.len())
    }

    pub fn is_empty(&self) -> MultifeedResult<bool> {
        Ok(self.lock_open()?.registry.is_empty())
    }

    // ---- Replication ----

    /// Start a replication session with a peer.
    ///
    /// Runs over `options.stream` when given; otherwise over an in-process
    /// pipe whose far end is available from [`Replication::take_transport`].
    /// Exactly one side of a pair must be the initiator.
    pub fn replicate(
        &self,
        is_initiator: bool,
        options: ReplicateOptions,
    ) -> MultifeedResult<Replication> {
        let muxer = {
            let shared = self.lock_open()?;
            shared
                .runtime
                .as_ref()
                .map(|runtime| runtime.muxer.clone())
                .ok_or(MultifeedError::Closed)?
        };

        let replication = match options.stream {
            Some(stream) => Replication::new(muxer.add_stream(stream, is_initiator)?, None),
            None => {
                let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
                Replication::new(muxer.add_stream(local, is_initiator)?, Some(remote))
            }
        };
        debug!(session = replication.session_id(), is_initiator, "replication started");
        Ok(replication)
    }
}

impl std::fmt::Debug for Multifeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.lock();
        f.debug_struct("Multifeed")
            .field("state", &self.state())
            .field("registry", &shared.registry)
            .field("root_key", &shared.root_key)
            .finish()
    }
}

/// Stop discovery, end every session and drain pending roster writes.
async fn shut_down(runtime: Runtime) {
    runtime.discovery_task.abort();
    runtime.muxer.close().await;
    drop(runtime.persist);
    if let Err(e) = runtime.persist_task.await {
        warn!(error = %e, "persistence worker did not finish cleanly");
    }
}

/// Resolves once `close` has started. The `wait_for` guard is not `Send`
/// and is dropped before this returns.
async fn closing_requested(closing: &mut watch::Receiver<bool>) {
    let _ = closing.wait_for(|closing| *closing).await;
}

async fn persist_loop(
    handler: Arc<dyn PersistenceHandler>,
    mut records: mpsc::UnboundedReceiver<FeedRecord>,
    events: broadcast::Sender<MultifeedEvent>,
) {
    while let Some(record) = records.recv().await {
        match handler.store_feed(&record).await {
            Ok(()) => debug!(key = %record.key.short_hex(), name = %record.name, "roster record stored"),
            Err(e) => {
                warn!(key = %record.key.short_hex(), error = %e, "failed to store roster record");
                let _ = events.send(MultifeedEvent::Error(Arc::new(e.into())));
            }
        }
    }
}

async fn discovery_loop(inner: Weak<Inner>, mut events: mpsc::UnboundedReceiver<MuxEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let multifeed = Multifeed { inner };
        match event {
            MuxEvent::FeedDiscovered(feed) => {
                let persist = multifeed.inner.config.persist_discovered;
                if let Err(e) = multifeed.register_feed(feed, None, persist) {
                    debug!(error = %e, "discovered feed not registered");
                }
            }
            MuxEvent::SessionError { error, .. } => {
                let error = MultifeedError::Session(error);
                let _ = multifeed.inner.events.send(MultifeedEvent::Error(Arc::new(error)));
            }
        }
    }
}
