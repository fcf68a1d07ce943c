//! Cryptographic primitives for multifeed.
//!
//! Provides domain-separated BLAKE3 key derivation and Ed25519 key pairs
//! for feeds. All crypto operations wrap established libraries; there is no custom
//! cryptography.

pub mod hasher;
pub mod signer;

pub use hasher::KeyDeriver;
pub use signer::{KeyPair, KeyPairError};
