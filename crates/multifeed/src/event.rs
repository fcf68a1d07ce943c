use std::sync::Arc;

use multifeed_store::Feed;

use crate::error::MultifeedError;

/// Notifications broadcast by a [`Multifeed`](crate::Multifeed).
#[derive(Clone, Debug)]
pub enum MultifeedEvent {
    /// A feed was registered. Emitted once per key.
    Feed { feed: Feed, name: String },
    /// A failure outside any caller's operation: a roster write or a
    /// replication session.
    Error(Arc<MultifeedError>),
}
