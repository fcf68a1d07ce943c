//! Append-only feed storage for multifeed.
//!
//! A [`LogStore`] hands out [`Feed`] handles: single-writer append-only logs
//! identified by a [`FeedKey`](multifeed_types::FeedKey). Writable feeds are
//! derived deterministically from the store's master secret and a
//! [`Namespace`]; read-only replicas are created on demand for keys learned
//! from peers.
//!
//! # Storage Backends
//!
//! - [`InMemoryLogStore`] -- over a shareable [`MemoryStorage`], for tests and embedding
//! - [`FsLogStore`] -- one CRC-framed segment file per feed under a directory
//!
//! # Design Rules
//!
//! 1. A key resolves to the same handle for as long as the store keeps it open.
//! 2. Only the holder of a feed's key pair appends; replicas import blocks in order.
//! 3. Closing a store closes its handles; the backing storage keeps the data.

pub mod error;
pub mod feed;
pub mod fs;
mod handles;
pub mod memory;
pub mod namespace;
pub mod segment;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use feed::{Feed, FeedOptions, ImportOutcome};
pub use fs::FsLogStore;
pub use memory::{InMemoryLogStore, MemoryBlocks, MemoryStorage};
pub use namespace::Namespace;
pub use segment::{SegmentConfig, SegmentFile, SyncMode};
pub use traits::{BlockStorage, LogStore};
