//! Message types handed in by producers and handed back to consumers.

use crate::time::Timestamp;
use serde::{Deserialize, Serialize};

/// Per-topic message number. Numbering starts at [`FIRST_MESSAGE_NUMBER`].
pub type MessageNumber = u64;

/// The number assigned to the first message of every topic.
pub const FIRST_MESSAGE_NUMBER: MessageNumber = 0;

/// An opaque payload tagged with its topic. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Topic the producer addressed.
    pub topic: String,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
}

impl Message {
    /// Build a message.
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// The record written to a segment file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// The message as supplied by the producer.
    pub message: Message,
    /// When the store accepted it.
    pub creation_time: Timestamp,
    /// Number assigned by the store.
    pub message_number: MessageNumber,
}

/// Result of a poll.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PollResult {
    /// Messages with number `>= read_from`, in increasing number order.
    pub messages: Vec<Message>,
    /// One past the highest number returned, or the input `read_from` if nothing matched.
    pub new_read_from: MessageNumber,
}
