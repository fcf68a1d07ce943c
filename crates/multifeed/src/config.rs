use multifeed_mux::MuxConfig;
use multifeed_types::RootKey;
use serde::{Deserialize, Serialize};

/// Configuration for a [`Multifeed`](crate::Multifeed).
///
/// There is no `Default`: every registry names its root key explicitly.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MultifeedConfig {
    /// Shared identity of the registry; peers must agree on it to replicate.
    pub root_key: RootKey,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
    /// Also write feeds learned from peers to the roster.
    pub persist_discovered: bool,
    pub mux: MuxConfig,
}

impl MultifeedConfig {
    pub fn new(root_key: RootKey) -> Self {
        Self {
            root_key,
            event_capacity: 256,
            persist_discovered: false,
            mux: MuxConfig::default(),
        }
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn with_persist_discovered(mut self, persist: bool) -> Self {
        self.persist_discovered = persist;
        self
    }

    pub fn with_mux(mut self, mux: MuxConfig) -> Self {
        self.mux = mux;
        self
    }
}
