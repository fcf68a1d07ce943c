use multifeed_crypto::KeyPair;
use multifeed_mux::Transport;
use multifeed_types::FeedKey;

/// Options for [`Multifeed::writer`](crate::Multifeed::writer).
#[derive(Clone, Debug, Default)]
pub struct WriterOptions {
    /// Name of the writer; a default decimal name is assigned when absent.
    pub name: Option<String>,
    /// Key pair for a new feed instead of the namespace-derived one.
    pub key_pair: Option<KeyPair>,
}

impl WriterOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            key_pair: None,
        }
    }

    pub fn with_key_pair(mut self, key_pair: KeyPair) -> Self {
        self.key_pair = Some(key_pair);
        self
    }
}

/// Options for [`Multifeed::replicate`](crate::Multifeed::replicate).
#[derive(Default)]
pub struct ReplicateOptions {
    /// Run the session over this transport instead of an in-process pipe.
    pub stream: Option<Box<dyn Transport>>,
}

impl ReplicateOptions {
    pub fn with_stream(stream: impl Transport) -> Self {
        Self {
            stream: Some(Box::new(stream)),
        }
    }
}

impl std::fmt::Debug for ReplicateOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicateOptions")
            .field("stream", &self.stream.is_some())
            .finish()
    }
}

/// Anything [`Multifeed::feed`](crate::Multifeed::feed) accepts as a key.
///
/// Malformed input converts to [`FeedLookup::Invalid`], which never matches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedLookup {
    Key(FeedKey),
    Invalid,
}

impl FeedLookup {
    pub fn key(&self) -> Option<&FeedKey> {
        match self {
            Self::Key(key) => Some(key),
            Self::Invalid => None,
        }
    }
}

impl From<FeedKey> for FeedLookup {
    fn from(key: FeedKey) -> Self {
        Self::Key(key)
    }
}

impl From<&FeedKey> for FeedLookup {
    fn from(key: &FeedKey) -> Self {
        Self::Key(*key)
    }
}

impl From<[u8; 32]> for FeedLookup {
    fn from(bytes: [u8; 32]) -> Self {
        Self::Key(FeedKey::from_bytes(bytes))
    }
}

impl From<&[u8]> for FeedLookup {
    fn from(bytes: &[u8]) -> Self {
        FeedKey::try_from(bytes).map_or(Self::Invalid, Self::Key)
    }
}

impl From<&str> for FeedLookup {
    fn from(hex: &str) -> Self {
        FeedKey::from_hex(hex).map_or(Self::Invalid, Self::Key)
    }
}

impl From<&String> for FeedLookup {
    fn from(hex: &String) -> Self {
        Self::from(hex.as_str())
    }
}
