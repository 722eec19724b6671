//! Store configuration.
//!
//! - **root**: key prefix inside the [`Directory`](crate::storage::Directory) under which the
//!   index and topic directories live (default: the directory itself)
//! - **max_segment_bytes**: segment size cap, header included (default: 1 MiB)
//! - **sync_writes**: `fsync` segment appends and make index replacement durable (default: on)
//!
//! ```
//! use topicstore::StoreConfig;
//!
//! let config = StoreConfig {
//!     max_segment_bytes: 64 * 1024,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use crate::error::{StoreError, StoreResult};
use crate::formats::{DEFAULT_MAX_SEGMENT_BYTES, RECORD_FRAME_BYTES, SEGMENT_HEADER_BYTES};
use serde::{Deserialize, Serialize};

/// Settings for a [`FileStore`](crate::filestore::FileStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Key prefix for all store files; empty means the directory root.
    #[serde(default)]
    pub root: String,

    /// Segment size cap in bytes (default: 1 MiB).
    #[serde(default = "default_max_segment_bytes")]
    pub max_segment_bytes: u64,

    /// Whether writes carry stable-storage barriers (default: true).
    ///
    /// Only backends that map onto the OS filesystem can honor this; others ignore it.
    #[serde(default = "default_sync_writes")]
    pub sync_writes: bool,
}

fn default_max_segment_bytes() -> u64 {
    DEFAULT_MAX_SEGMENT_BYTES
}

fn default_sync_writes() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: String::new(),
            max_segment_bytes: default_max_segment_bytes(),
            sync_writes: default_sync_writes(),
        }
    }
}

impl StoreConfig {
    /// Reject settings the store cannot work with.
    pub fn validate(&self) -> StoreResult<()> {
        let min = SEGMENT_HEADER_BYTES + RECORD_FRAME_BYTES;
        if self.max_segment_bytes <= min {
            return Err(StoreError::InvalidConfig(format!(
                "max_segment_bytes must exceed {min} (got {})",
                self.max_segment_bytes
            )));
        }
        if self.root.starts_with('/') || self.root.ends_with('/') {
            return Err(StoreError::InvalidConfig(format!(
                "root must be a relative key without leading or trailing '/' (got {:?})",
                self.root
            )));
        }
        if self.root.split('/').any(|p| p == "..") {
            return Err(StoreError::InvalidConfig(format!(
                "root must not contain '..' (got {:?})",
                self.root
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = StoreConfig::default();
        assert_eq!(c.max_segment_bytes, 1_048_576);
        assert!(c.sync_writes);
        assert!(c.root.is_empty());
        assert!(c.validate().is_ok());
    }

    #[test]
    fn rejects_tiny_segments_and_bad_roots() {
        let tiny = StoreConfig {
            max_segment_bytes: SEGMENT_HEADER_BYTES,
            ..Default::default()
        };
        assert!(matches!(tiny.validate(), Err(StoreError::InvalidConfig(_))));

        for root in ["/abs", "trailing/", "a/../b"] {
            let c = StoreConfig {
                root: root.into(),
                ..Default::default()
            };
            assert!(c.validate().is_err(), "{root:?}");
        }
        let nested = StoreConfig {
            root: "data/store".into(),
            ..Default::default()
        };
        assert!(nested.validate().is_ok());
    }
}
