//! Canonical names for everything the store puts on disk.
//!
//! Layout under a store root:
//! - `<root>/index`: the index file
//! - `<root>/<topic>/seg_<seq>.log`: one file per segment
//!
//! All functions are pure. Paths are `/`-separated keys relative to the
//! [`Directory`](crate::storage::Directory) the store runs on; an empty root is the
//! directory itself.

use crate::index::Index;
use crate::storage::join;

/// File name of the index under the store root.
pub const INDEX_FILE_NAME: &str = "index";

const SEGMENT_PREFIX: &str = "seg_";
const SEGMENT_SUFFIX: &str = ".log";

/// Path of the index file.
pub fn index_file(root: &str) -> String {
    join(root, INDEX_FILE_NAME)
}

/// Path of a topic's directory. Callers create it before the first write.
pub fn directory_for_topic(topic: &str, root: &str) -> String {
    join(root, topic)
}

/// Name for the next segment of `topic`.
///
/// Derived from the topic's segment sequence number, which only ever grows, so the name
/// differs from every segment the index has recorded for the topic.
pub fn new_msg_filename_for(topic: &str, index: &Index) -> String {
    let seq = index
        .topic(topic)
        .map(|t| t.segments().next_seq())
        .unwrap_or(0);
    segment_file_name(seq)
}

/// Full path of segment `file_name` of `topic`.
pub fn message_file_path(file_name: &str, topic: &str, root: &str) -> String {
    join(&directory_for_topic(topic, root), file_name)
}

/// Segment file name for sequence number `seq`. Zero-padded so names sort numerically.
pub fn segment_file_name(seq: u64) -> String {
    format!("{SEGMENT_PREFIX}{seq:020}{SEGMENT_SUFFIX}")
}

/// Inverse of [`segment_file_name`].
pub fn parse_segment_seq(file_name: &str) -> Option<u64> {
    let raw = file_name
        .strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(SEGMENT_SUFFIX)?;
    if raw.len() != 20 {
        return None;
    }
    raw.parse().ok()
}

/// Check that `topic` maps onto exactly one directory directly under the root and
/// cannot shadow the index file.
pub fn validate_topic(topic: &str) -> Result<(), &'static str> {
    if topic.is_empty() {
        return Err("topic is empty");
    }
    if topic == "." || topic == ".." {
        return Err("topic is a relative directory reference");
    }
    if topic.contains(|c| matches!(c, '/' | '\\' | '\0')) {
        return Err("topic contains a path separator or NUL");
    }
    if topic == INDEX_FILE_NAME || topic.starts_with(&format!("{INDEX_FILE_NAME}.")) {
        return Err("topic collides with the index file");
    }
    Ok(())
}
