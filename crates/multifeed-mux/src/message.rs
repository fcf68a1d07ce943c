use multifeed_types::FeedKey;
use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

/// Error code sent when the handshake is rejected.
pub const ERR_HANDSHAKE: u32 = 1;

/// All message types exchanged over a replication session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MuxMessage {
    /// First frame on every session, sent by both sides.
    Hello {
        version: u32,
        discovery_key: [u8; 32],
        initiator: bool,
    },
    /// The sender holds this feed.
    Announce { key: FeedKey },
    /// Request blocks of `key` starting at `from`, then every later append.
    Want { key: FeedKey, from: u64 },
    Data { key: FeedKey, index: u64, data: Vec<u8> },
    Error { code: u32, message: String },
}

impl MuxMessage {
    pub fn type_tag(&self) -> u8 {
        match self {
            Self::Hello { .. } => 1,
            Self::Announce { .. } => 2,
            Self::Want { .. } => 3,
            Self::Data { .. } => 4,
            Self::Error { .. } => 255,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "Hello",
            Self::Announce { .. } => "Announce",
            Self::Want { .. } => "Want",
            Self::Data { .. } => "Data",
            Self::Error { .. } => "Error",
        }
    }
}
