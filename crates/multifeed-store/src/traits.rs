use async_trait::async_trait;
use bytes::Bytes;
use multifeed_types::FeedKey;

use crate::error::StoreResult;
use crate::feed::{Feed, FeedOptions};
use crate::namespace::Namespace;

/// Backing storage for the blocks of a single feed.
///
/// Blocks are addressed by a dense index starting at zero; `append` always
/// writes at `len()`. Implementations never reorder or drop blocks.
pub trait BlockStorage: Send + Sync {
    /// Number of blocks stored.
    fn len(&self) -> u64;

    /// Returns `true` if no block has been stored yet.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the block at `index`. Returns `Ok(None)` past the end.
    fn read(&self, index: u64) -> StoreResult<Option<Bytes>>;

    /// Append a block and return its index.
    fn append(&mut self, data: &[u8]) -> StoreResult<u64>;

    /// Flush buffered writes to the backing medium.
    fn flush(&mut self) -> StoreResult<()> {
        Ok(())
    }
}

/// Store of append-only feeds.
///
/// All implementations must satisfy these invariants:
/// - `get` and `default_feed` return the same handle for a key until `close`.
/// - `default_feed` is deterministic: the same namespace on the same backing
///   storage always yields the same feed key.
/// - `close` closes every handle it gave out; data stays in the backing
///   storage and a later `ready` makes the store usable again.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Bring the backend up (load or create the master secret).
    async fn ready(&self) -> StoreResult<()>;

    /// Resolve the feed for `key`, creating an empty read-only replica if the
    /// store has never seen it.
    async fn get(&self, key: &FeedKey) -> StoreResult<Feed>;

    /// The writable default feed of `namespace`.
    async fn default_feed(&self, namespace: &Namespace, options: &FeedOptions) -> StoreResult<Feed>;

    /// Close every open handle.
    async fn close(&self) -> StoreResult<()>;
}
