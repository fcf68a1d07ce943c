use std::collections::HashMap;
use std::sync::Mutex;

use multifeed_types::FeedKey;
use tracing::warn;

use crate::error::StoreResult;
use crate::feed::Feed;

/// Cache of live feed handles, keyed by feed key.
///
/// Guarantees that a key resolves to one handle while the owning store is
/// open. Handles closed individually are reopened on the next lookup.
#[derive(Default)]
pub(crate) struct OpenFeeds {
    feeds: Mutex<HashMap<FeedKey, Feed>>,
}

impl OpenFeeds {
    pub(crate) fn get_or_open<F>(&self, key: &FeedKey, open: F) -> StoreResult<Feed>
    where
        F: FnOnce() -> StoreResult<Feed>,
    {
        let mut feeds = self.feeds.lock().expect("handle cache poisoned");
        if let Some(feed) = feeds.get(key) {
            if !feed.is_closed() {
                return Ok(feed.clone());
            }
        }
        let feed = open()?;
        feeds.insert(*key, feed.clone());
        Ok(feed)
    }

    /// Close and forget every handle. Returns the first close error.
    pub(crate) fn close_all(&self) -> StoreResult<()> {
        let feeds: Vec<Feed> = self
            .feeds
            .lock()
            .expect("handle cache poisoned")
            .drain()
            .map(|(_, feed)| feed)
            .collect();
        let mut first_err = None;
        for feed in feeds {
            if let Err(e) = feed.close() {
                warn!(key = %feed.key().short_hex(), error = %e, "failed to close feed");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    pub(crate) fn len(&self) -> usize {
        self.feeds.lock().expect("handle cache poisoned").len()
    }
}
