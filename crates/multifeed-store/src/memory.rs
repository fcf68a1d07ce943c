use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use multifeed_crypto::{KeyDeriver, KeyPair};
use multifeed_types::FeedKey;

use crate::error::StoreResult;
use crate::feed::{Feed, FeedOptions};
use crate::handles::OpenFeeds;
use crate::namespace::Namespace;
use crate::traits::{BlockStorage, LogStore};

/// Block storage backed by a shared `Vec`.
///
/// Clones share the same blocks, which is how [`MemoryStorage`] keeps data
/// alive after the feed handle using it is closed.
#[derive(Clone, Default)]
pub struct MemoryBlocks {
    blocks: Arc<RwLock<Vec<Bytes>>>,
}

impl BlockStorage for MemoryBlocks {
    fn len(&self) -> u64 {
        self.blocks.read().expect("blocks lock poisoned").len() as u64
    }

    fn read(&self, index: u64) -> StoreResult<Option<Bytes>> {
        let blocks = self.blocks.read().expect("blocks lock poisoned");
        Ok(usize::try_from(index)
            .ok()
            .and_then(|i| blocks.get(i))
            .cloned())
    }

    fn append(&mut self, data: &[u8]) -> StoreResult<u64> {
        let mut blocks = self.blocks.write().expect("blocks lock poisoned");
        blocks.push(Bytes::copy_from_slice(data));
        Ok(blocks.len() as u64 - 1)
    }
}

#[derive(Clone)]
struct StoredFeed {
    secret: Option<[u8; 32]>,
    blocks: MemoryBlocks,
}

struct MemoryStorageInner {
    master_secret: [u8; 32],
    feeds: RwLock<HashMap<FeedKey, StoredFeed>>,
}

/// Shareable in-memory backing storage.
///
/// A storage value outlives the stores built on it: close a store, build a
/// new [`InMemoryLogStore`] over a clone of the same storage, and every feed
/// and block is still there.
#[derive(Clone)]
pub struct MemoryStorage {
    inner: Arc<MemoryStorageInner>,
}

impl MemoryStorage {
    /// Empty storage with a random master secret.
    pub fn new() -> Self {
        let mut secret = [0u8; 32];
        rand::Rng::fill(&mut rand::thread_rng(), &mut secret);
        Self::with_master_secret(secret)
    }

    /// Empty storage with a fixed master secret.
    pub fn with_master_secret(master_secret: [u8; 32]) -> Self {
        Self {
            inner: Arc::new(MemoryStorageInner {
                master_secret,
                feeds: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Number of feeds ever stored.
    pub fn feed_count(&self) -> usize {
        self.inner.feeds.read().expect("storage lock poisoned").len()
    }

    /// Returns `true` if the storage holds data for `key`.
    pub fn contains(&self, key: &FeedKey) -> bool {
        self.inner
            .feeds
            .read()
            .expect("storage lock poisoned")
            .contains_key(key)
    }

    fn master_secret(&self) -> &[u8; 32] {
        &self.inner.master_secret
    }

    fn entry(&self, key: &FeedKey, secret: Option<[u8; 32]>) -> StoredFeed {
        let mut feeds = self.inner.feeds.write().expect("storage lock poisoned");
        let stored = feeds.entry(*key).or_insert_with(|| StoredFeed {
            secret: None,
            blocks: MemoryBlocks::default(),
        });
        if stored.secret.is_none() {
            stored.secret = secret;
        }
        stored.clone()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("feed_count", &self.feed_count())
            .finish()
    }
}

/// [`LogStore`] over a [`MemoryStorage`].
pub struct InMemoryLogStore {
    storage: MemoryStorage,
    open: OpenFeeds,
}

impl InMemoryLogStore {
    /// A store over fresh, private storage.
    pub fn new() -> Self {
        Self::with_storage(MemoryStorage::new())
    }

    /// A store over existing (possibly shared) storage.
    pub fn with_storage(storage: MemoryStorage) -> Self {
        Self {
            storage,
            open: OpenFeeds::default(),
        }
    }

    /// The backing storage.
    pub fn storage(&self) -> &MemoryStorage {
        &self.storage
    }

    /// Number of currently open handles.
    pub fn open_handles(&self) -> usize {
        self.open.len()
    }

    fn open_feed(&self, key: &FeedKey, key_pair: Option<&KeyPair>) -> Feed {
        let stored = self
            .storage
            .entry(key, key_pair.map(|kp| *kp.secret_bytes()));
        let blocks = Box::new(stored.blocks);
        match stored.secret {
            Some(secret) => Feed::writable(KeyPair::from_secret(secret), blocks),
            None => Feed::replica(*key, blocks),
        }
    }
}

impl Default for InMemoryLogStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogStore for InMemoryLogStore {
    async fn ready(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn get(&self, key: &FeedKey) -> StoreResult<Feed> {
        self.open.get_or_open(key, || Ok(self.open_feed(key, None)))
    }

    async fn default_feed(&self, namespace: &Namespace, options: &FeedOptions) -> StoreResult<Feed> {
        let key_pair = match &options.key_pair {
            Some(key_pair) => key_pair.clone(),
            None => KeyPair::from_secret(
                KeyDeriver::FEED_KEYPAIR.derive(self.storage.master_secret(), namespace.segments()),
            ),
        };
        let key = key_pair.public_key();
        self.open
            .get_or_open(&key, || Ok(self.open_feed(&key, Some(&key_pair))))
    }

    async fn close(&self) -> StoreResult<()> {
        self.open.close_all()
    }
}

impl std::fmt::Debug for InMemoryLogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryLogStore")
            .field("storage", &self.storage)
            .field("open_handles", &self.open_handles())
            .finish()
    }
}
