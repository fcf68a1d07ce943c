use std::collections::{HashMap, HashSet};

use multifeed_store::Feed;
use multifeed_types::FeedKey;
use tracing::warn;

/// Outcome of [`Registry::insert`].
#[derive(Clone, Debug)]
pub enum Registered {
    /// The feed was new and is now bound to `name`.
    Added { feed: Feed, name: String },
    /// The key was already registered; nothing changed.
    Existing { feed: Feed, name: String },
}

impl Registered {
    pub fn feed(&self) -> &Feed {
        match self {
            Self::Added { feed, .. } | Self::Existing { feed, .. } => feed,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Added { name, .. } | Self::Existing { name, .. } => name,
        }
    }

    pub fn is_added(&self) -> bool {
        matches!(self, Self::Added { .. })
    }

    pub fn into_feed(self) -> Feed {
        match self {
            Self::Added { feed, .. } | Self::Existing { feed, .. } => feed,
        }
    }
}

struct Entry {
    feed: Feed,
    name: String,
}

/// Name and key index over registered feeds.
///
/// Every feed is in both maps or in neither. Names reserved by in-flight
/// writers count as taken when default names are assigned.
#[derive(Default)]
pub struct Registry {
    by_key: HashMap<FeedKey, Entry>,
    order: Vec<FeedKey>,
    by_name: HashMap<String, Feed>,
    reserved: HashSet<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn get(&self, key: &FeedKey) -> Option<&Feed> {
        self.by_key.get(key).map(|entry| &entry.feed)
    }

    pub fn name_of(&self, key: &FeedKey) -> Option<&str> {
        self.by_key.get(key).map(|entry| entry.name.as_str())
    }

    pub fn by_name(&self, name: &str) -> Option<&Feed> {
        self.by_name.get(name)
    }

    /// Registered feeds in registration order.
    pub fn feeds(&self) -> Vec<Feed> {
        self.order
            .iter()
            .filter_map(|key| self.by_key.get(key))
            .map(|entry| entry.feed.clone())
            .collect()
    }

    /// `true` if `name` is bound or reserved.
    pub fn is_taken(&self, name: &str) -> bool {
        self.by_name.contains_key(name) || self.reserved.contains(name)
    }

    /// The default name the next unnamed feed would get: the feed count as a
    /// decimal, or the next free decimal above it.
    pub fn next_default_name(&self) -> String {
        let mut n = self.by_key.len();
        loop {
            let name = n.to_string();
            if !self.is_taken(&name) {
                return name;
            }
            n += 1;
        }
    }

    /// Reserve `name` for a feed being created. Fails if it is taken.
    pub fn reserve(&mut self, name: &str) -> bool {
        if self.is_taken(name) {
            return false;
        }
        self.reserved.insert(name.to_string())
    }

    /// Reserve and return the next free default name.
    pub fn reserve_default(&mut self) -> String {
        let name = self.next_default_name();
        self.reserved.insert(name.clone());
        name
    }

    pub fn release(&mut self, name: &str) {
        self.reserved.remove(name);
    }

    /// Register `feed`, deduplicating by key.
    ///
    /// An explicit name that is already bound to another key is replaced by
    /// the next default name. A reservation for the chosen name is consumed.
    pub fn insert(&mut self, feed: Feed, name: Option<String>) -> Registered {
        if let Some(entry) = self.by_key.get(feed.key()) {
            return Registered::Existing {
                feed: entry.feed.clone(),
                name: entry.name.clone(),
            };
        }

        let name = match name {
            Some(name) if self.by_name.contains_key(&name) => {
                let fallback = self.next_default_name();
                warn!(
                    key = %feed.key().short_hex(),
                    requested = %name,
                    assigned = %fallback,
                    "name already bound to another feed"
                );
                fallback
            }
            Some(name) => name,
            None => self.next_default_name(),
        };

        let key = *feed.key();
        self.reserved.remove(&name);
        self.by_name.insert(name.clone(), feed.clone());
        self.by_key.insert(
            key,
            Entry {
                feed: feed.clone(),
                name: name.clone(),
            },
        );
        self.order.push(key);
        Registered::Added { feed, name }
    }

    pub fn clear(&mut self) {
        self.by_key.clear();
        self.order.clear();
        self.by_name.clear();
        self.reserved.clear();
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("feeds", &self.by_key.len())
            .field("reserved", &self.reserved.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use multifeed_crypto::KeyPair;
    use multifeed_store::MemoryBlocks;
    use proptest::prelude::*;

    fn feed() -> Feed {
        Feed::writable(KeyPair::generate(), Box::new(MemoryBlocks::default()))
    }

    #[test]
    fn default_names_count_up() {
        let mut registry = Registry::new();
        assert_eq!(registry.insert(feed(), None).name(), "0");
        assert_eq!(registry.insert(feed(), None).name(), "1");
        assert_eq!(registry.insert(feed(), Some("x".into())).name(), "x");
        assert_eq!(registry.insert(feed(), None).name(), "3");
    }

    #[test]
    fn same_key_is_registered_once() {
        let mut registry = Registry::new();
        let f = feed();
        assert!(registry.insert(f.clone(), Some("local".into())).is_added());
        let again = registry.insert(f.clone(), None);
        assert!(!again.is_added());
        assert_eq!(again.name(), "local");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.name_of(f.key()), Some("local"));
    }

    #[test]
    fn default_name_skips_explicit_decimals() {
        let mut registry = Registry::new();
        registry.insert(feed(), Some("1".into()));
        assert_eq!(registry.insert(feed(), None).name(), "2");
    }

    #[test]
    fn default_name_skips_reservations() {
        let mut registry = Registry::new();
        assert_eq!(registry.reserve_default(), "0");
        assert_eq!(registry.insert(feed(), None).name(), "1");
        assert!(!registry.reserve("0"));
        assert_eq!(registry.insert(feed(), Some("0".into())).name(), "0");
        assert!(!registry.is_taken("3"));
    }

    #[test]
    fn taken_name_falls_back_to_default() {
        let mut registry = Registry::new();
        let first = feed();
        registry.insert(first.clone(), Some("a".into()));
        let second = registry.insert(feed(), Some("a".into()));
        assert_eq!(second.name(), "1");
        assert_eq!(registry.by_name("a"), Some(&first));
    }

    #[test]
    fn release_frees_reservation() {
        let mut registry = Registry::new();
        assert!(registry.reserve("w"));
        assert!(registry.is_taken("w"));
        registry.release("w");
        assert!(!registry.is_taken("w"));
    }

    #[test]
    fn feeds_keep_registration_order() {
        let mut registry = Registry::new();
        let feeds: Vec<Feed> = (0..5).map(|_| feed()).collect();
        for f in &feeds {
            registry.insert(f.clone(), None);
        }
        assert_eq!(registry.feeds(), feeds);
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.by_name("0").is_none());
    }

    #[derive(Clone, Debug)]
    enum Op {
        Unnamed,
        Named(String),
        Reserve,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Unnamed),
            "[0-9]{1,2}".prop_map(Op::Named),
            "[a-c]".prop_map(Op::Named),
            Just(Op::Reserve),
        ]
    }

    proptest! {
        #[test]
        fn names_stay_unique(ops in proptest::collection::vec(op(), 1..40)) {
            let mut registry = Registry::new();
            let mut reserved = Vec::new();
            for op in ops {
                match op {
                    Op::Unnamed => { registry.insert(feed(), None); }
                    Op::Named(name) => { registry.insert(feed(), Some(name)); }
                    Op::Reserve => reserved.push(registry.reserve_default()),
                }
            }
            let names: HashSet<&str> = registry
                .feeds()
                .iter()
                .map(|f| registry.name_of(f.key()).unwrap())
                .collect();
            prop_assert_eq!(names.len(), registry.len());
            prop_assert_eq!(registry.by_name.len(), registry.by_key.len());
            for name in &reserved {
                if registry.reserved.contains(name) {
                    prop_assert!(registry.by_name(name).is_none());
                }
            }
        }
    }
}
