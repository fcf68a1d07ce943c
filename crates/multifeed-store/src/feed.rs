use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use multifeed_crypto::KeyPair;
use multifeed_types::FeedKey;
use tokio::sync::watch;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::traits::BlockStorage;

/// Options for creating a writable feed.
#[derive(Clone, Debug, Default)]
pub struct FeedOptions {
    /// Use this key pair instead of deriving one from the namespace.
    pub key_pair: Option<KeyPair>,
}

impl FeedOptions {
    pub fn with_key_pair(key_pair: KeyPair) -> Self {
        Self {
            key_pair: Some(key_pair),
        }
    }
}

/// Result of importing a block received from a peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImportOutcome {
    /// The block was the next one and has been stored.
    Appended,
    /// The block is already present.
    Duplicate,
    /// The block skips ahead; the feed currently holds `expected` blocks.
    Gap { expected: u64 },
    /// The feed is writable locally and never accepts remote blocks.
    Ignored,
}

struct FeedInner {
    key: FeedKey,
    key_pair: Option<KeyPair>,
    blocks: RwLock<Box<dyn BlockStorage>>,
    length: watch::Sender<u64>,
    closed: AtomicBool,
}

/// Handle to a single append-only feed.
///
/// Cloning is cheap and every clone refers to the same feed. Equality
/// compares feed keys; [`Feed::ptr_eq`] compares handle identity.
#[derive(Clone)]
pub struct Feed {
    inner: Arc<FeedInner>,
}

impl Feed {
    /// A writable feed owned by `key_pair`.
    pub fn writable(key_pair: KeyPair, blocks: Box<dyn BlockStorage>) -> Self {
        Self::build(key_pair.public_key(), Some(key_pair), blocks)
    }

    /// A read-only replica of the feed identified by `key`.
    pub fn replica(key: FeedKey, blocks: Box<dyn BlockStorage>) -> Self {
        Self::build(key, None, blocks)
    }

    fn build(key: FeedKey, key_pair: Option<KeyPair>, blocks: Box<dyn BlockStorage>) -> Self {
        let (length, _) = watch::channel(blocks.len());
        Self {
            inner: Arc::new(FeedInner {
                key,
                key_pair,
                blocks: RwLock::new(blocks),
                length,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn key(&self) -> &FeedKey {
        &self.inner.key
    }

    pub fn is_writable(&self) -> bool {
        self.inner.key_pair.is_some()
    }

    /// Number of blocks currently available locally.
    pub fn len(&self) -> u64 {
        *self.inner.length.borrow()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Returns `true` if both handles are the same live handle.
    pub fn ptr_eq(&self, other: &Feed) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.is_closed() {
            return Err(StoreError::Closed(self.inner.key));
        }
        Ok(())
    }

    /// Append a block and return its index.
    pub fn append(&self, data: impl AsRef<[u8]>) -> StoreResult<u64> {
        self.ensure_open()?;
        if !self.is_writable() {
            return Err(StoreError::NotWritable(self.inner.key));
        }
        let mut blocks = self.inner.blocks.write().expect("feed lock poisoned");
        let index = blocks.append(data.as_ref())?;
        self.inner.length.send_replace(index + 1);
        Ok(index)
    }

    /// Read the block at `index`, or `None` if it is not available yet.
    pub fn get(&self, index: u64) -> StoreResult<Option<Bytes>> {
        self.ensure_open()?;
        let blocks = self.inner.blocks.read().expect("feed lock poisoned");
        blocks.read(index)
    }

    /// Wait until the block at `index` is available and return it.
    ///
    /// Fails with [`StoreError::Closed`] if the feed closes while waiting.
    pub async fn get_wait(&self, index: u64) -> StoreResult<Bytes> {
        let mut length = self.subscribe_len();
        loop {
            if let Some(block) = self.get(index)? {
                return Ok(block);
            }
            if length.changed().await.is_err() {
                return Err(StoreError::Closed(self.inner.key));
            }
        }
    }

    /// Read every block in index order.
    pub fn read_all(&self) -> StoreResult<Vec<Bytes>> {
        self.ensure_open()?;
        let blocks = self.inner.blocks.read().expect("feed lock poisoned");
        let mut out = Vec::with_capacity(blocks.len() as usize);
        for index in 0..blocks.len() {
            if let Some(block) = blocks.read(index)? {
                out.push(block);
            }
        }
        Ok(out)
    }

    /// Store a block received from a peer.
    ///
    /// Only the next contiguous index is accepted; the caller decides how to
    /// recover from a [`ImportOutcome::Gap`].
    pub fn import_block(&self, index: u64, data: &[u8]) -> StoreResult<ImportOutcome> {
        self.ensure_open()?;
        if self.is_writable() {
            return Ok(ImportOutcome::Ignored);
        }
        let mut blocks = self.inner.blocks.write().expect("feed lock poisoned");
        let expected = blocks.len();
        if index < expected {
            return Ok(ImportOutcome::Duplicate);
        }
        if index > expected {
            return Ok(ImportOutcome::Gap { expected });
        }
        blocks.append(data)?;
        self.inner.length.send_replace(expected + 1);
        Ok(ImportOutcome::Appended)
    }

    /// Watch the feed length. Every append or import publishes the new length.
    pub fn subscribe_len(&self) -> watch::Receiver<u64> {
        self.inner.length.subscribe()
    }

    /// Flush and close the handle. Closing twice is a no-op.
    pub fn close(&self) -> StoreResult<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let result = self
            .inner
            .blocks
            .write()
            .expect("feed lock poisoned")
            .flush();
        // Wake `get_wait` callers so they observe the closed state.
        self.inner.length.send_modify(|_| {});
        debug!(key = %self.inner.key.short_hex(), "feed closed");
        result
    }
}

impl PartialEq for Feed {
    fn eq(&self, other: &Self) -> bool {
        self.inner.key == other.inner.key
    }
}

impl Eq for Feed {}

impl fmt::Debug for Feed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Feed")
            .field("key", &self.inner.key)
            .field("len", &self.len())
            .field("writable", &self.is_writable())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBlocks;
    use std::time::Duration;

    fn writable() -> Feed {
        Feed::writable(KeyPair::generate(), Box::new(MemoryBlocks::default()))
    }

    fn replica_of(feed: &Feed) -> Feed {
        Feed::replica(*feed.key(), Box::new(MemoryBlocks::default()))
    }

    #[test]
    fn append_and_get() {
        let feed = writable();
        assert!(feed.is_empty());
        assert_eq!(feed.append(b"first").unwrap(), 0);
        assert_eq!(feed.append(b"second").unwrap(), 1);
        assert_eq!(feed.len(), 2);
        assert_eq!(feed.get(0).unwrap().unwrap(), Bytes::from_static(b"first"));
        assert!(feed.get(2).unwrap().is_none());
    }

    #[test]
    fn replica_rejects_append() {
        let feed = writable();
        let replica = replica_of(&feed);
        assert!(!replica.is_writable());
        assert!(matches!(replica.append(b"x"), Err(StoreError::NotWritable(_))));
    }

    #[test]
    fn import_requires_contiguous_index() {
        let replica = replica_of(&writable());
        assert_eq!(replica.import_block(1, b"b").unwrap(), ImportOutcome::Gap { expected: 0 });
        assert_eq!(replica.import_block(0, b"a").unwrap(), ImportOutcome::Appended);
        assert_eq!(replica.import_block(0, b"a").unwrap(), ImportOutcome::Duplicate);
        assert_eq!(replica.import_block(1, b"b").unwrap(), ImportOutcome::Appended);
        assert_eq!(replica.len(), 2);
    }

    #[test]
    fn writable_feed_ignores_imports() {
        let feed = writable();
        assert_eq!(feed.import_block(0, b"x").unwrap(), ImportOutcome::Ignored);
        assert!(feed.is_empty());
    }

    #[test]
    fn read_all_in_order() {
        let feed = writable();
        for i in 0..5u8 {
            feed.append([i]).unwrap();
        }
        let all = feed.read_all().unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[3].as_ref(), &[3]);
    }

    #[test]
    fn closed_feed_rejects_operations() {
        let feed = writable();
        feed.append(b"x").unwrap();
        feed.close().unwrap();
        feed.close().unwrap();
        assert!(feed.is_closed());
        assert!(matches!(feed.append(b"y"), Err(StoreError::Closed(_))));
        assert!(matches!(feed.get(0), Err(StoreError::Closed(_))));
    }

    #[test]
    fn equality_is_by_key_identity_is_by_handle() {
        let feed = writable();
        let replica = replica_of(&feed);
        assert_eq!(feed, replica);
        assert!(!feed.ptr_eq(&replica));
        assert!(feed.ptr_eq(&feed.clone()));
    }

    #[tokio::test]
    async fn get_wait_resolves_after_import() {
        let replica = replica_of(&writable());
        let waiter = {
            let replica = replica.clone();
            tokio::spawn(async move { replica.get_wait(0).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        replica.import_block(0, b"late").unwrap();
        let block = waiter.await.unwrap().unwrap();
        assert_eq!(block.as_ref(), b"late");
    }

    #[tokio::test]
    async fn get_wait_fails_on_close() {
        let feed = writable();
        let waiter = {
            let feed = feed.clone();
            tokio::spawn(async move { feed.get_wait(0).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        feed.close().unwrap();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(StoreError::Closed(_))));
    }

    #[tokio::test]
    async fn subscribe_len_sees_appends() {
        let feed = writable();
        let mut rx = feed.subscribe_len();
        feed.append(b"a").unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 1);
    }
}
