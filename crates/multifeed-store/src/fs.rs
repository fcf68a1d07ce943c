use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use multifeed_crypto::{KeyDeriver, KeyPair};
use multifeed_types::FeedKey;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::feed::{Feed, FeedOptions};
use crate::handles::OpenFeeds;
use crate::namespace::Namespace;
use crate::segment::{SegmentConfig, SegmentFile};
use crate::traits::LogStore;

const MASTER_KEY_FILE: &str = "master.key";
const FEEDS_DIR: &str = "feeds";
const BLOCKS_FILE: &str = "blocks.log";
const SECRET_FILE: &str = "secret.key";

/// [`LogStore`] persisted under a directory.
///
/// Layout:
/// ```text
/// <root>/master.key              hex master secret
/// <root>/feeds/<key>/blocks.log  segment file
/// <root>/feeds/<key>/secret.key  hex signing secret (writable feeds only)
/// ```
pub struct FsLogStore {
    root: PathBuf,
    config: SegmentConfig,
    master_secret: Mutex<Option<[u8; 32]>>,
    open: OpenFeeds,
}

impl FsLogStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_config(root, SegmentConfig::default())
    }

    pub fn with_config(root: impl Into<PathBuf>, config: SegmentConfig) -> Self {
        Self {
            root: root.into(),
            config,
            master_secret: Mutex::new(None),
            open: OpenFeeds::default(),
        }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn feed_dir(&self, key: &FeedKey) -> PathBuf {
        self.root.join(FEEDS_DIR).join(key.to_hex())
    }

    /// Load the master secret, creating it on first use.
    fn master_secret(&self) -> StoreResult<[u8; 32]> {
        let mut guard = self.master_secret.lock().expect("master secret poisoned");
        if let Some(secret) = *guard {
            return Ok(secret);
        }

        fs::create_dir_all(&self.root)?;
        let path = self.root.join(MASTER_KEY_FILE);
        let secret = match read_key_file(&path)? {
            Some(text) => hex::decode(text.trim())
                .ok()
                .and_then(|bytes| <[u8; 32]>::try_from(bytes).ok())
                .ok_or_else(|| StoreError::InvalidKeyFile(path.clone()))?,
            None => {
                let mut secret = [0u8; 32];
                rand::Rng::fill(&mut rand::thread_rng(), &mut secret);
                fs::write(&path, hex::encode(secret))?;
                info!(root = %self.root.display(), "created store master secret");
                secret
            }
        };
        *guard = Some(secret);
        Ok(secret)
    }

    fn open_feed(&self, key: &FeedKey, key_pair: Option<&KeyPair>) -> StoreResult<Feed> {
        let dir = self.feed_dir(key);
        fs::create_dir_all(&dir)?;

        let secret_path = dir.join(SECRET_FILE);
        let key_pair = match read_key_file(&secret_path)? {
            Some(text) => Some(
                KeyPair::from_secret_hex(&text)
                    .map_err(|_| StoreError::InvalidKeyFile(secret_path.clone()))?,
            ),
            None => match key_pair {
                Some(kp) => {
                    fs::write(&secret_path, kp.secret_hex())?;
                    Some(kp.clone())
                }
                None => None,
            },
        };

        let blocks = Box::new(SegmentFile::open(&dir.join(BLOCKS_FILE), self.config.clone())?);
        debug!(key = %key.short_hex(), writable = key_pair.is_some(), "feed opened");
        Ok(match key_pair {
            Some(key_pair) => Feed::writable(key_pair, blocks),
            None => Feed::replica(*key, blocks),
        })
    }
}

fn read_key_file(path: &Path) -> StoreResult<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl LogStore for FsLogStore {
    async fn ready(&self) -> StoreResult<()> {
        self.master_secret().map(|_| ())
    }

    async fn get(&self, key: &FeedKey) -> StoreResult<Feed> {
        self.open.get_or_open(key, || self.open_feed(key, None))
    }

    async fn default_feed(&self, namespace: &Namespace, options: &FeedOptions) -> StoreResult<Feed> {
        let key_pair = match &options.key_pair {
            Some(key_pair) => key_pair.clone(),
            None => {
                let master = self.master_secret()?;
                KeyPair::from_secret(KeyDeriver::FEED_KEYPAIR.derive(&master, namespace.segments()))
            }
        };
        let key = key_pair.public_key();
        self.open
            .get_or_open(&key, || self.open_feed(&key, Some(&key_pair)))
    }

    async fn close(&self) -> StoreResult<()> {
        self.open.close_all()
    }
}

impl std::fmt::Debug for FsLogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsLogStore")
            .field("root", &self.root)
            .field("open_handles", &self.open.len())
            .finish()
    }
}
