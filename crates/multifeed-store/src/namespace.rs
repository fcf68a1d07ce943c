use std::fmt;

use multifeed_types::RootKey;

/// Hierarchical derivation path for writable feeds.
///
/// A namespace starts at a root key and is extended one segment at a time;
/// the full path, together with the store's master secret, determines the
/// key pair of the namespace's default feed.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    segments: Vec<Vec<u8>>,
}

impl Namespace {
    /// Namespace rooted at a registry's root identity.
    pub fn root(root: &RootKey) -> Self {
        Self {
            segments: vec![root.as_bytes().to_vec()],
        }
    }

    /// Build from raw segments.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        Self {
            segments: segments.into_iter().map(|s| s.as_ref().to_vec()).collect(),
        }
    }

    /// A child namespace one segment deeper.
    pub fn child(&self, segment: impl AsRef<[u8]>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.as_ref().to_vec());
        Self { segments }
    }

    /// The ordered path segments.
    pub fn segments(&self) -> &[Vec<u8>] {
        &self.segments
    }

    /// Number of segments.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .segments
            .iter()
            .map(|s| match std::str::from_utf8(s) {
                Ok(text) if !text.is_empty() && text.chars().all(|c| !c.is_control()) => {
                    text.to_string()
                }
                _ => hex::encode(&s[..s.len().min(4)]),
            })
            .collect();
        write!(f, "Namespace({})", parts.join("/"))
    }
}
