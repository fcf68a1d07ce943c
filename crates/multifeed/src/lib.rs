//! Multi-writer feed registry and replication coordinator.
//!
//! A [`Multifeed`] groups many single-writer append-only feeds under one
//! root key. Each local writer gets its own feed, addressed by a name;
//! feeds created by peers are discovered during replication and registered
//! alongside the local ones. The names of local feeds are kept in a roster
//! so they come back after a restart.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use multifeed::{InMemoryLogStore, Multifeed, MultifeedConfig, RootKey, WriterOptions};
//!
//! # async fn example() -> multifeed::MultifeedResult<()> {
//! let store = Arc::new(InMemoryLogStore::new());
//! let multi = Multifeed::new(store, MultifeedConfig::new(RootKey::generate()));
//!
//! let local = multi.writer(WriterOptions::named("local")).await?;
//! local.append(b"hello")?;
//!
//! let mut replication = multi.replicate(true, Default::default())?;
//! let _pipe = replication.take_transport();
//! # Ok(())
//! # }
//! ```
//!
//! # Lifecycle
//!
//! `Unopened -> Opening -> Open -> Closing -> Closed`. [`Multifeed::writer`]
//! opens the registry on demand; queries and [`Multifeed::replicate`] fail
//! with [`MultifeedError::NotReady`] until it is open and with
//! [`MultifeedError::Closed`] after [`Multifeed::close`].

pub mod config;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod options;
pub mod persist;
pub mod registry;
pub mod replication;

pub use config::MultifeedConfig;
pub use coordinator::{LifecycleState, Multifeed, WRITERS_NAMESPACE};
pub use error::{MultifeedError, MultifeedResult, PersistError, PersistResult};
pub use event::MultifeedEvent;
pub use options::{FeedLookup, ReplicateOptions, WriterOptions};
pub use persist::{LogPersistence, MemoryPersistence, PersistenceHandler, ROSTER_NAMESPACE};
pub use registry::{Registered, Registry};
pub use replication::Replication;

pub use multifeed_crypto::KeyPair;
pub use multifeed_mux::{MuxConfig, MuxError, Transport};
pub use multifeed_store::{Feed, FsLogStore, InMemoryLogStore, LogStore, MemoryStorage, StoreError};
pub use multifeed_types::{FeedKey, FeedRecord, RootKey};
