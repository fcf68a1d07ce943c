use std::fmt;

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::TypeError;

/// Length in bytes of every key handled by multifeed.
pub const KEY_LENGTH: usize = 32;

/// Well-known root key used when no explicit root identity is configured.
///
/// Any two registries using it can discover and replicate each other.
const INSECURE_ROOT_KEY: [u8; KEY_LENGTH] = [
    0xbe, 0xe8, 0x0f, 0xf3, 0xa4, 0xee, 0x5e, 0x72, 0x7d, 0xc4, 0x41, 0x97, 0xcb, 0x9d, 0x25, 0xbf,
    0x8f, 0x19, 0xd5, 0x0b, 0x0f, 0x3a, 0xd2, 0x98, 0x4c, 0xfe, 0x5b, 0x7d, 0x14, 0xe7, 0x5d, 0xe7,
];

const DISCOVERY_CONTEXT: &str = "multifeed 2024 topic discovery key v1";

fn decode_key(s: &str) -> Result<[u8; KEY_LENGTH], TypeError> {
    let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
    key_from_slice(&bytes)
}

fn key_from_slice(bytes: &[u8]) -> Result<[u8; KEY_LENGTH], TypeError> {
    bytes.try_into().map_err(|_| TypeError::InvalidLength {
        expected: KEY_LENGTH,
        actual: bytes.len(),
    })
}

/// Public key identifying a single feed.
///
/// Feed keys are immutable for the life of a feed and are the identity
/// every registry, store and muxer indexes by. Human-readable formats
/// carry the key as lowercase hex; binary formats carry raw bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeedKey([u8; KEY_LENGTH]);

impl FeedKey {
    /// Create from raw public key bytes.
    pub const fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Parse from a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        decode_key(s).map(Self)
    }

    /// The raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    /// Full hex-encoded string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short identifier (first 8 hex characters), for logs.
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Debug for FeedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FeedKey({})", self.short_hex())
    }
}

impl fmt::Display for FeedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; KEY_LENGTH]> for FeedKey {
    fn from(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for FeedKey {
    type Error = TypeError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        key_from_slice(bytes).map(Self)
    }
}

impl std::str::FromStr for FeedKey {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for FeedKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for FeedKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Self::from_hex(&s).map_err(de::Error::custom)
        } else {
            let bytes = Vec::<u8>::deserialize(deserializer)?;
            Self::try_from(bytes.as_slice()).map_err(de::Error::custom)
        }
    }
}

/// Shared root identity of a feed set.
///
/// The root key scopes the storage namespace of every feed in a registry
/// and seeds the discovery key peers must share to replicate. There is no
/// `Default`: the well-known insecure key is only reachable through
/// [`RootKey::insecure_default`].
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RootKey([u8; KEY_LENGTH]);

impl RootKey {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Parse from a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        decode_key(s).map(Self)
    }

    /// Generate a fresh random root key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LENGTH];
        rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
        Self(bytes)
    }

    /// The well-known root key shared by every unconfigured registry.
    ///
    /// Registries built on it interoperate (and collide) with every other
    /// registry built on it.
    pub fn insecure_default() -> Self {
        warn!("using the insecure well-known root key; any peer can discover these feeds");
        Self(INSECURE_ROOT_KEY)
    }

    /// Returns `true` if this is the well-known insecure root key.
    pub fn is_insecure_default(&self) -> bool {
        self.0 == INSECURE_ROOT_KEY
    }

    /// The raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    /// Full hex-encoded string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Discovery key announced during the replication handshake.
    ///
    /// Derived one-way so the root key itself never travels on the wire.
    pub fn discovery_key(&self) -> [u8; KEY_LENGTH] {
        blake3::derive_key(DISCOVERY_CONTEXT, &self.0)
    }
}

impl fmt::Debug for RootKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RootKey({}...)", hex::encode(&self.0[..4]))
    }
}

impl From<[u8; KEY_LENGTH]> for RootKey {
    fn from(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl Serialize for RootKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for RootKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn hex_roundtrip() {
        let key = FeedKey::from_bytes([0xab; 32]);
        let parsed = FeedKey::from_hex(&key.to_hex()).unwrap();
        assert_eq!(key, parsed);
    }

    #[test]
    fn from_hex_rejects_bad_length() {
        let err = FeedKey::from_hex("abcd").unwrap_err();
        assert_eq!(
            err,
            TypeError::InvalidLength {
                expected: 32,
                actual: 2
            }
        );
    }

    #[test]
    fn from_hex_rejects_non_hex() {
        let err = FeedKey::from_hex(&"zz".repeat(32)).unwrap_err();
        assert!(matches!(err, TypeError::InvalidHex(_)));
    }

    #[test]
    fn try_from_slice() {
        let bytes = [7u8; 32];
        assert_eq!(FeedKey::try_from(&bytes[..]).unwrap(), FeedKey::from(bytes));
        assert!(FeedKey::try_from(&bytes[..31]).is_err());
    }

    #[test]
    fn json_uses_hex() {
        let key = FeedKey::from_bytes([1; 32]);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", "01".repeat(32)));
        let parsed: FeedKey = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn bincode_uses_raw_bytes() {
        let key = FeedKey::from_bytes([9; 32]);
        let bytes = bincode::serialize(&key).unwrap();
        // u64 length prefix plus the key itself
        assert_eq!(bytes.len(), 8 + 32);
        let parsed: FeedKey = bincode::deserialize(&bytes).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn debug_is_short() {
        let key = FeedKey::from_bytes([0xff; 32]);
        assert_eq!(format!("{key:?}"), "FeedKey(ffffffff)");
    }

    #[test]
    fn insecure_default_is_flagged() {
        let root = RootKey::insecure_default();
        assert!(root.is_insecure_default());
        assert_eq!(
            root.to_hex(),
            "bee80ff3a4ee5e727dc44197cb9d25bf8f19d50b0f3ad2984cfe5b7d14e75de7"
        );
        assert!(!RootKey::generate().is_insecure_default());
    }

    #[test]
    fn discovery_key_is_deterministic_and_distinct() {
        let a = RootKey::from_bytes([1; 32]);
        let b = RootKey::from_bytes([2; 32]);
        assert_eq!(a.discovery_key(), a.clone().discovery_key());
        assert_ne!(a.discovery_key(), b.discovery_key());
        assert_ne!(&a.discovery_key(), a.as_bytes());
    }

    #[test]
    fn root_key_serde_roundtrip() {
        let root = RootKey::generate();
        let json = serde_json::to_string(&root).unwrap();
        let parsed: RootKey = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, root);
    }

    proptest! {
        #[test]
        fn any_key_survives_hex(bytes in any::<[u8; 32]>()) {
            let key = FeedKey::from_bytes(bytes);
            prop_assert_eq!(FeedKey::from_hex(&key.to_hex()).unwrap(), key);
            prop_assert_eq!(key.to_hex().to_uppercase().parse::<FeedKey>().unwrap(), key);
        }
    }
}
