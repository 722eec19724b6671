//! Error types for `topicstore`.
//!
//! Two layers:
//! - [`PersistenceError`]: what the storage medium and the on-disk codecs report.
//! - [`StoreError`]: what the [`BackingStore`](crate::contract::BackingStore) contract reports.
//!   Each variant names *which step* of an operation failed, so a caller can tell
//!   "not committed" apart from "possibly committed but not readable yet".

use std::path::PathBuf;

/// Result type for medium/codec operations.
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by `Directory` backends and by the index/segment codecs.
#[derive(thiserror::Error, Debug)]
pub enum PersistenceError {
    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Format error (corrupt, unexpected, unsupported).
    #[error("format error: {0}")]
    Format(String),

    /// CRC mismatch (data corruption detected).
    #[error("crc mismatch (expected {expected:#010x}, got {actual:#010x})")]
    CrcMismatch {
        /// CRC stored in the file/record header.
        expected: u32,
        /// CRC computed from the bytes that were read.
        actual: u32,
    },

    /// Encoding error.
    #[error("encode error: {0}")]
    Encode(String),

    /// Decoding error.
    #[error("decode error: {0}")]
    Decode(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation not supported by this backend.
    #[error("operation not supported: {0}")]
    NotSupported(String),

    /// Lock acquisition failed.
    #[error("lock failed on {resource}: {reason}")]
    LockFailed {
        /// What we were trying to lock.
        resource: String,
        /// Human-readable reason (poisoned lock, OS error, etc.).
        reason: String,
    },

    /// Resource not found (in-memory backends).
    #[error("not found: {0}")]
    NotFound(String),

    /// Requested path does not exist (filesystem backends).
    #[error("missing path: {0}")]
    MissingPath(PathBuf),
}

impl PersistenceError {
    /// True when the error means "the thing is not there" rather than "the thing is broken".
    pub fn is_not_found(&self) -> bool {
        match self {
            PersistenceError::NotFound(_) | PersistenceError::MissingPath(_) => true,
            PersistenceError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Errors returned by the store operations (`store`, `poll`, `remove_old_messages`).
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// The index file could not be opened or decoded. Nothing was mutated.
    #[error("index unavailable: {source}")]
    IndexUnavailable {
        /// Underlying open/decode failure.
        #[source]
        source: PersistenceError,
    },

    /// A topic directory (or the store root) could not be created. Nothing was mutated.
    #[error("cannot create directory {path:?}: {source}")]
    DirectoryCreateFailure {
        /// Directory being created.
        path: String,
        /// Underlying failure.
        #[source]
        source: PersistenceError,
    },

    /// A segment write failed. The message number was not committed.
    #[error("write to segment {file:?} of topic {topic:?} failed: {source}")]
    WriteFailure {
        /// Topic being written.
        topic: String,
        /// Segment file name.
        file: String,
        /// Underlying failure.
        #[source]
        source: PersistenceError,
    },

    /// Segment bytes may be on disk but the index could not be saved.
    ///
    /// For an append this is the acknowledged inconsistency window: the record exists in
    /// the segment but is not indexed and so is not visible to `poll`. The number was not
    /// consumed, so a retry receives it again.
    #[error("index persist failed (topic {topic:?}): {source}")]
    IndexPersistFailure {
        /// Topic of the append, or `None` for store-wide operations (purge, wipe).
        topic: Option<String>,
        /// Underlying failure.
        #[source]
        source: PersistenceError,
    },

    /// A segment could not be opened or decoded during a read.
    #[error("cannot read segment {file:?} of topic {topic:?}: {source}")]
    SegmentReadFailure {
        /// Topic being read.
        topic: String,
        /// Segment file name.
        file: String,
        /// Underlying failure.
        #[source]
        source: PersistenceError,
    },

    /// Removing store contents failed part way. Some entries may already be gone.
    #[error("cannot remove {path:?}: {source}")]
    WipeFailure {
        /// Entry being removed.
        path: String,
        /// Underlying failure.
        #[source]
        source: PersistenceError,
    },

    /// Listing a directory under the store root failed during a consistency scan.
    #[error("cannot list {path:?}: {source}")]
    ScanFailure {
        /// Directory being listed.
        path: String,
        /// Underlying failure.
        #[source]
        source: PersistenceError,
    },

    /// The topic name cannot be mapped onto a directory.
    #[error("invalid topic {topic:?}: {reason}")]
    InvalidTopic {
        /// Offending topic.
        topic: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The encoded record would not fit even in an empty segment.
    #[error("message for topic {topic:?} is {size} bytes encoded; segment cap is {max}")]
    MessageTooLarge {
        /// Topic being written.
        topic: String,
        /// Segment bytes needed (header + record).
        size: u64,
        /// Configured segment cap.
        max: u64,
    },

    /// Store configuration was rejected.
    #[error("invalid store configuration: {0}")]
    InvalidConfig(String),

    /// The store-wide lock was poisoned by a panicking holder.
    #[error("store lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    /// True if the operation may have left data on disk that is not yet visible.
    ///
    /// Only [`StoreError::IndexPersistFailure`] qualifies; every other error means the
    /// operation did not commit anything.
    pub fn is_possibly_committed(&self) -> bool {
        matches!(self, StoreError::IndexPersistFailure { .. })
    }
}
