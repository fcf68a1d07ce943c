/// Domain-separated BLAKE3 key deriver.
///
/// Each deriver carries a context string (e.g. `"multifeed ... feed keypair
/// seed v1"`) fed to BLAKE3's `derive_key` mode, so material derived for one
/// purpose can never equal material derived for another from the same
/// secret.
pub struct KeyDeriver {
    domain: &'static str,
}

impl KeyDeriver {
    /// Deriver for feed key pair seeds (secret + namespace path).
    pub const FEED_KEYPAIR: Self = Self {
        domain: "multifeed 2024 feed keypair seed v1",
    };

    /// Create a deriver with a custom context string.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Derive 32 bytes from a secret and an ordered path of segments.
    ///
    /// Every segment is length-prefixed, so `["ab", "c"]` and `["a", "bc"]`
    /// derive different outputs.
    pub fn derive<I, S>(&self, secret: &[u8; 32], segments: I) -> [u8; 32]
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let mut hasher = blake3::Hasher::new_derive_key(self.domain);
        hasher.update(secret);
        for segment in segments {
            let segment = segment.as_ref();
            hasher.update(&(segment.len() as u64).to_le_bytes());
            hasher.update(segment);
        }
        *hasher.finalize().as_bytes()
    }

    /// The context string used by this deriver.
    pub fn domain(&self) -> &str {
        self.domain
    }
}
