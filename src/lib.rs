//! `topicstore`: a persistent, append-only, per-topic message store.
//!
//! Producers append opaque messages to named topics; each topic numbers its messages
//! `0, 1, 2, ...` with no gaps. Consumers poll a topic from any number they like and get
//! back everything at or after it, plus the offset to poll from next. Old messages are
//! purged by creation time.
//!
//! Scope:
//! - directory abstraction (`storage`) with filesystem and in-memory backends
//! - on-disk framing constants (`formats`)
//! - the index (`index`) and its path conventions (`filenamer`)
//! - bounded segment files (`segment`)
//! - the store engine (`filestore`) behind the [`BackingStore`] contract
//!
//! Non-goal: replication, consumer groups, or a network front end.
//!
//! ## Contract (what you can rely on)
//!
//! - A successful [`BackingStore::store`] is visible to every later poll, including after a
//!   restart over the same directory.
//! - A failed `store` never surfaces a half-written message: readers only decode the byte
//!   range the index has committed for each segment.
//! - Every operation holds one store-wide lock, so concurrent callers are serialized and
//!   numbers stay gap-free.
//! - With [`StoreConfig::sync_writes`] on a filesystem backend, segment appends and index
//!   replacements are `fsync`ed before the call returns.
//!
//! ```
//! use std::sync::Arc;
//! use topicstore::{BackingStore, Directory, FileStore, MemoryDirectory, Message, StoreConfig};
//!
//! let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
//! let store = FileStore::open(dir, StoreConfig::default()).unwrap();
//! assert_eq!(store.store("orders", Message::new("orders", b"hello".to_vec())).unwrap(), 0);
//!
//! let polled = store.poll("orders", 0).unwrap();
//! assert_eq!(polled.messages[0].payload, b"hello");
//! assert_eq!(polled.new_read_from, 1);
//! ```

pub mod config;
pub mod contract;
pub mod error;
pub mod filenamer;
pub mod filestore;
pub mod formats;
pub mod index;
pub mod message;
pub mod segment;
pub mod storage;
pub mod time;

pub use config::StoreConfig;
pub use contract::{BackingStore, RemovedMessages};
pub use error::{PersistenceError, PersistenceResult, StoreError, StoreResult};
pub use filestore::{ConsistencyReport, FileStore, SegmentRef};
pub use message::{Message, MessageNumber, PollResult, StoredMessage, FIRST_MESSAGE_NUMBER};
pub use storage::{Directory, DurableDirectory, FsDirectory, MemoryDirectory};
pub use time::{Clock, ManualClock, SystemClock, Timestamp};
