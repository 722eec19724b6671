//! The storage contract every backend variant satisfies.
//!
//! Callers (a request-handling layer) depend on [`BackingStore`] only, never on a concrete
//! variant. `FileStore` over an `FsDirectory` is the file-backed variant; `FileStore` over a
//! `MemoryDirectory` is the in-memory variant with identical semantics.

use crate::error::StoreResult;
use crate::message::{Message, MessageNumber, PollResult};
use crate::time::Timestamp;
use std::collections::BTreeMap;

/// Removed message numbers, keyed by topic. Topics that lost nothing are absent.
pub type RemovedMessages = BTreeMap<String, Vec<MessageNumber>>;

/// Append, poll and purge over per-topic message sequences.
pub trait BackingStore: Send + Sync {
    /// Durably append `message` to `topic` and return the number assigned to it.
    ///
    /// Numbers per topic start at 0 and increase by one per successful call. A message whose
    /// own `topic` differs from `topic` is rejected.
    fn store(&self, topic: &str, message: Message) -> StoreResult<MessageNumber>;

    /// Remove every message created before `max_age`, across all topics.
    fn remove_old_messages(&self, max_age: Timestamp) -> StoreResult<RemovedMessages>;

    /// Messages of `topic` numbered `>= read_from`, in order, plus the next offset to poll from.
    fn poll(&self, topic: &str, read_from: MessageNumber) -> StoreResult<PollResult>;
}
