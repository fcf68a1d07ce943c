use serde::{Deserialize, Serialize};

use crate::message::MAX_MESSAGE_SIZE;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuxConfig {
    /// Largest frame payload accepted or sent.
    pub max_message_size: usize,
    /// Capacity of each session's outgoing data queue.
    pub data_queue: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            max_message_size: MAX_MESSAGE_SIZE,
            data_queue: 64,
        }
    }
}
