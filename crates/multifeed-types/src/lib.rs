//! Foundation types for multifeed.
//!
//! Every other multifeed crate depends on `multifeed-types`.
//!
//! # Key Types
//!
//! - [`FeedKey`] -- 32-byte public key identifying a single append-only feed
//! - [`RootKey`] -- shared root identity scoping a feed set's storage and discovery
//! - [`FeedRecord`] -- durable `{key, name}` roster entry

pub mod error;
pub mod key;
pub mod record;

pub use error::TypeError;
pub use key::{FeedKey, RootKey, KEY_LENGTH};
pub use record::FeedRecord;
