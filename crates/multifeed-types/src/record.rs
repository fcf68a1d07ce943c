use serde::{Deserialize, Serialize};

use crate::key::FeedKey;

/// One roster entry: a registered feed and the name it was registered under.
///
/// Persisted as `{"key": "<hex>", "name": "<name>"}`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeedRecord {
    pub key: FeedKey,
    pub name: String,
}

impl FeedRecord {
    pub fn new(key: FeedKey, name: impl Into<String>) -> Self {
        Self {
            key,
            name: name.into(),
        }
    }
}
