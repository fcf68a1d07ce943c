//! Topic muxer for multifeed.
//!
//! Carries the replication traffic of every feed in a registry over a single
//! session per peer. Each session opens with a `Hello` exchange that only
//! completes between peers sharing a discovery key and taking opposite
//! roles; after that, both sides announce the feeds they carry, request the
//! blocks they lack, and stream blocks as they are appended.
//!
//! # Wire Format
//!
//! Every frame is `[4 bytes len (BE)][1 byte tag][bincode payload]`; see
//! [`MuxCodec`].

pub mod codec;
pub mod config;
pub mod error;
pub mod message;
pub mod muxer;
mod session;
pub mod transport;

pub use codec::MuxCodec;
pub use config::MuxConfig;
pub use error::{MuxError, MuxResult};
pub use message::{MuxMessage, ERR_HANDSHAKE, MAX_MESSAGE_SIZE, PROTOCOL_VERSION};
pub use muxer::{MuxEvent, SessionHandle, SessionResult, TopicMuxer};
pub use transport::Transport;
