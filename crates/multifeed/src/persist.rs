use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use multifeed_store::{Feed, FeedOptions, LogStore, Namespace};
use multifeed_types::{FeedRecord, RootKey};
use tracing::{debug, warn};

use crate::error::PersistResult;

/// Namespace segment of the roster log under a registry's root.
pub const ROSTER_NAMESPACE: &str = "roster";

/// Durable roster of `{key, name}` records.
#[async_trait]
pub trait PersistenceHandler: Send + Sync {
    /// Every stored record, in the order it was stored.
    async fn fetch_feeds(&self) -> PersistResult<Vec<FeedRecord>>;

    async fn store_feed(&self, record: &FeedRecord) -> PersistResult<()>;

    /// Release resources the handler owns itself.
    async fn close(&self) -> PersistResult<()> {
        Ok(())
    }
}

/// Roster kept as JSON records, one per block, in a reserved feed of the
/// log store.
pub struct LogPersistence {
    store: Arc<dyn LogStore>,
    namespace: Namespace,
}

impl LogPersistence {
    pub fn new(store: Arc<dyn LogStore>, root: &RootKey) -> Self {
        Self {
            store,
            namespace: Namespace::root(root).child(ROSTER_NAMESPACE),
        }
    }

    async fn roster(&self) -> PersistResult<Feed> {
        Ok(self
            .store
            .default_feed(&self.namespace, &FeedOptions::default())
            .await?)
    }
}

#[async_trait]
impl PersistenceHandler for LogPersistence {
    async fn fetch_feeds(&self) -> PersistResult<Vec<FeedRecord>> {
        let roster = self.roster().await?;
        let mut records = Vec::new();
        for (index, block) in roster.read_all()?.into_iter().enumerate() {
            match serde_json::from_slice::<FeedRecord>(&block) {
                Ok(record) => records.push(record),
                Err(e) => warn!(index, error = %e, "skipping undecodable roster record"),
            }
        }
        debug!(records = records.len(), "roster loaded");
        Ok(records)
    }

    async fn store_feed(&self, record: &FeedRecord) -> PersistResult<()> {
        let roster = self.roster().await?;
        roster.append(serde_json::to_vec(record)?)?;
        Ok(())
    }
}

impl std::fmt::Debug for LogPersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogPersistence")
            .field("namespace", &self.namespace)
            .finish()
    }
}

/// Roster held in memory. Clones share the same records.
#[derive(Clone, Debug, Default)]
pub struct MemoryPersistence {
    records: Arc<Mutex<Vec<FeedRecord>>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<FeedRecord> {
        self.records.lock().expect("roster lock poisoned").clone()
    }
}

#[async_trait]
impl PersistenceHandler for MemoryPersistence {
    async fn fetch_feeds(&self) -> PersistResult<Vec<FeedRecord>> {
        Ok(self.records())
    }

    async fn store_feed(&self, record: &FeedRecord) -> PersistResult<()> {
        self.records
            .lock()
            .expect("roster lock poisoned")
            .push(record.clone());
        Ok(())
    }
}
