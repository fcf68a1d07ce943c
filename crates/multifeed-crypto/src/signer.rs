use multifeed_types::FeedKey;

/// Ed25519 key pair owning a writable feed.
///
/// The public half is the feed's [`FeedKey`]; holding the secret half is
/// what makes a feed writable.
#[derive(Clone)]
pub struct KeyPair(ed25519_dalek::SigningKey);

impl KeyPair {
    /// Generate a new random key pair.
    pub fn generate() -> Self {
        let mut csprng = rand::thread_rng();
        Self(ed25519_dalek::SigningKey::generate(&mut csprng))
    }

    /// Create from a raw 32-byte secret (seed).
    pub fn from_secret(bytes: [u8; 32]) -> Self {
        Self(ed25519_dalek::SigningKey::from_bytes(&bytes))
    }

    /// Parse a hex-encoded secret.
    pub fn from_secret_hex(s: &str) -> Result<Self, KeyPairError> {
        let bytes = hex::decode(s.trim()).map_err(|_| KeyPairError::InvalidSecret)?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyPairError::InvalidSecret)?;
        Ok(Self::from_secret(arr))
    }

    /// The public key, which doubles as the feed key.
    pub fn public_key(&self) -> FeedKey {
        FeedKey::from_bytes(self.0.verifying_key().to_bytes())
    }

    /// Raw secret bytes.
    pub fn secret_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// Hex-encoded secret, as written to disk by directory stores.
    pub fn secret_hex(&self) -> String {
        hex::encode(self.0.as_bytes())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair({:?}, <redacted>)", self.public_key())
    }
}

impl PartialEq for KeyPair {
    fn eq(&self, other: &Self) -> bool {
        self.public_key() == other.public_key()
    }
}

impl Eq for KeyPair {}

/// Errors from key pair handling.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum KeyPairError {
    #[error("invalid secret key encoding")]
    InvalidSecret,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::KeyDeriver;

    #[test]
    fn generated_pairs_are_unique() {
        assert_ne!(KeyPair::generate().public_key(), KeyPair::generate().public_key());
    }

    #[test]
    fn from_secret_is_deterministic() {
        let a = KeyPair::from_secret([5; 32]);
        let b = KeyPair::from_secret([5; 32]);
        assert_eq!(a.public_key(), b.public_key());
        assert_eq!(a, b);
    }

    #[test]
    fn secret_hex_roundtrip() {
        let kp = KeyPair::generate();
        let parsed = KeyPair::from_secret_hex(&kp.secret_hex()).unwrap();
        assert_eq!(parsed.public_key(), kp.public_key());
        assert_eq!(parsed.secret_bytes(), kp.secret_bytes());
    }

    #[test]
    fn from_secret_hex_rejects_garbage() {
        assert_eq!(
            KeyPair::from_secret_hex("nope").unwrap_err(),
            KeyPairError::InvalidSecret
        );
        assert!(KeyPair::from_secret_hex("abcd").is_err());
    }

    #[test]
    fn derived_seed_gives_stable_feed_key() {
        let seed = KeyDeriver::FEED_KEYPAIR.derive(&[9; 32], ["root", "writers", "foo"]);
        let a = KeyPair::from_secret(seed).public_key();
        let b = KeyPair::from_secret(seed).public_key();
        assert_eq!(a, b);
    }

    #[test]
    fn debug_redacts_secret() {
        let kp = KeyPair::generate();
        let debug = format!("{kp:?}");
        assert!(debug.contains("redacted"));
        assert!(!debug.contains(&kp.secret_hex()));
    }
}
