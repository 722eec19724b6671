//! The index: per-topic numbering state and segment layout.
//!
//! The index is the sole source of truth for which message numbers exist and which segment
//! file holds each one. Segment contents are never scanned to recompute numbering.
//!
//! ## On-disk form
//!
//! `[INDEX_MAGIC][FORMAT_VERSION][payload_len:u64][crc32:u32]` followed by the
//! postcard-encoded [`Index`]. Decoding checks magic, version, length cap and CRC, then the
//! structural invariants in [`Index::validate`].

use crate::error::{PersistenceError, PersistenceResult};
use crate::filenamer;
use crate::formats::{FORMAT_VERSION, INDEX_MAGIC, SEGMENT_HEADER_BYTES};
use crate::message::{MessageNumber, FIRST_MESSAGE_NUMBER};
use crate::time::Timestamp;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};

/// Upper bound on index payload size, to refuse absurd allocations from corrupt headers.
pub const MAX_INDEX_PAYLOAD_BYTES: usize = 256 * 1024 * 1024; // 256 MiB

/// Fixed-size header at the start of the index file.
#[derive(Debug, Clone, Copy)]
pub struct IndexHeader {
    /// Payload length in bytes.
    pub payload_len: u64,
    /// CRC32 over the payload bytes.
    pub checksum: u32,
}

impl IndexHeader {
    /// Number of bytes in the serialized header.
    pub const SIZE: usize = 4 + 4 + 8 + 4;

    /// Write the header to a stream.
    pub fn write<W: Write>(&self, w: &mut W) -> PersistenceResult<()> {
        w.write_all(&INDEX_MAGIC)?;
        w.write_u32::<LittleEndian>(FORMAT_VERSION)?;
        w.write_u64::<LittleEndian>(self.payload_len)?;
        w.write_u32::<LittleEndian>(self.checksum)?;
        Ok(())
    }

    /// Read and check the header.
    pub fn read<R: Read + ?Sized>(r: &mut R) -> PersistenceResult<Self> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if magic != INDEX_MAGIC {
            return Err(PersistenceError::Format("invalid index magic".into()));
        }
        let version = r.read_u32::<LittleEndian>()?;
        if version != FORMAT_VERSION {
            return Err(PersistenceError::Format(format!(
                "index version mismatch (got {version}, expected {FORMAT_VERSION})"
            )));
        }
        Ok(Self {
            payload_len: r.read_u64::<LittleEndian>()?,
            checksum: r.read_u32::<LittleEndian>()?,
        })
    }
}

/// What one segment file holds: message numbers, their creation timestamps, and how many
/// bytes of the file are committed.
///
/// Bytes past `byte_len` belong to appends whose index update never landed; readers ignore
/// them and the next append to the segment cuts them off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMeta {
    file_name: String,
    byte_len: u64,
    messages: BTreeMap<MessageNumber, Timestamp>,
}

impl SegmentMeta {
    fn new(file_name: String) -> Self {
        Self {
            file_name,
            byte_len: SEGMENT_HEADER_BYTES,
            messages: BTreeMap::new(),
        }
    }

    /// Segment file name (relative to the topic directory).
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Committed length of the segment file, header included.
    pub fn byte_len(&self) -> u64 {
        self.byte_len
    }

    /// Record that `number`, created at `at`, now lives in this segment as a record of
    /// `record_len` bytes appended at the committed end.
    pub fn register_new_message(
        &mut self,
        number: MessageNumber,
        at: Timestamp,
        record_len: u64,
    ) {
        self.messages.insert(number, at);
        self.byte_len += record_len;
    }

    /// Whether the segment holds `number`.
    pub fn contains(&self, number: MessageNumber) -> bool {
        self.messages.contains_key(&number)
    }

    /// Message numbers in increasing order.
    pub fn message_numbers(&self) -> impl Iterator<Item = MessageNumber> + '_ {
        self.messages.keys().copied()
    }

    /// Creation timestamp of `number`, if held here.
    pub fn timestamp_of(&self, number: MessageNumber) -> Option<Timestamp> {
        self.messages.get(&number).copied()
    }

    /// Lowest message number held, if any.
    pub fn first_number(&self) -> Option<MessageNumber> {
        self.messages.keys().next().copied()
    }

    /// Highest message number held, if any.
    pub fn last_number(&self) -> Option<MessageNumber> {
        self.messages.keys().next_back().copied()
    }

    /// Number of live messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True when no live message remains.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Forget every message created before `cutoff`, returning their numbers in order.
    fn remove_older_than(&mut self, cutoff: Timestamp) -> Vec<MessageNumber> {
        let removed: Vec<MessageNumber> = self
            .messages
            .iter()
            .filter(|(_, at)| **at < cutoff)
            .map(|(n, _)| *n)
            .collect();
        for n in &removed {
            self.messages.remove(n);
        }
        removed
    }
}

/// Outcome of purging one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgedSegment {
    /// Segment file name.
    pub file_name: String,
    /// Numbers that were removed.
    pub removed: Vec<MessageNumber>,
    /// True if nothing live remains, in which case the segment was dropped from the list.
    pub dropped: bool,
}

/// A topic's segments, in creation order. The last one is the active segment.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SegmentList {
    next_seq: u64,
    files: Vec<SegmentMeta>,
}

impl SegmentList {
    /// Sequence number the next segment file will be named after.
    ///
    /// Strictly increases with every registered file and is never rewound, so names are
    /// unique for the lifetime of the topic even after segments are purged.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Append a new, empty segment. It becomes the active segment.
    pub fn register_new_file(&mut self, file_name: impl Into<String>) -> &mut SegmentMeta {
        self.next_seq += 1;
        let idx = self.files.len();
        self.files.push(SegmentMeta::new(file_name.into()));
        &mut self.files[idx]
    }

    /// The active (last) segment.
    pub fn current(&self) -> Option<&SegmentMeta> {
        self.files.last()
    }

    /// Mutable access to the active segment.
    pub fn current_mut(&mut self) -> Option<&mut SegmentMeta> {
        self.files.last_mut()
    }

    /// Point the segment named `file_name` at a rewritten copy `new_name` of `byte_len` bytes.
    ///
    /// Consumes a sequence number, like [`SegmentList::register_new_file`]. Returns false if no
    /// segment has that name.
    pub fn replace_file(
        &mut self,
        file_name: &str,
        new_name: impl Into<String>,
        byte_len: u64,
    ) -> bool {
        let Some(meta) = self.files.iter_mut().find(|m| m.file_name == file_name) else {
            return false;
        };
        meta.file_name = new_name.into();
        meta.byte_len = byte_len;
        self.next_seq += 1;
        true
    }

    /// Look up a segment by file name.
    pub fn meta(&self, file_name: &str) -> Option<&SegmentMeta> {
        self.files.iter().find(|m| m.file_name == file_name)
    }

    /// Mutable lookup by file name.
    pub fn meta_mut(&mut self, file_name: &str) -> Option<&mut SegmentMeta> {
        self.files.iter_mut().find(|m| m.file_name == file_name)
    }

    /// Segments in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &SegmentMeta> {
        self.files.iter()
    }

    /// Segments holding at least one number `>= read_from`, in creation order.
    pub fn segments_from(&self, read_from: MessageNumber) -> impl Iterator<Item = &SegmentMeta> {
        self.files
            .iter()
            .filter(move |m| m.last_number().is_some_and(|last| last >= read_from))
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// True when the topic has no segments.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Remove messages created before `cutoff` and drop segments left empty.
    ///
    /// Only segments that lost at least one message are reported.
    pub fn remove_older_than(&mut self, cutoff: Timestamp) -> Vec<PurgedSegment> {
        let mut out = Vec::new();
        for meta in &mut self.files {
            let removed = meta.remove_older_than(cutoff);
            if !removed.is_empty() {
                out.push(PurgedSegment {
                    file_name: meta.file_name.clone(),
                    removed,
                    dropped: meta.is_empty(),
                });
            }
        }
        self.files.retain(|m| !m.is_empty());
        out
    }
}

/// Numbering state and segment layout for one topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicIndexEntry {
    next_message_number: MessageNumber,
    segments: SegmentList,
}

impl Default for TopicIndexEntry {
    fn default() -> Self {
        Self {
            next_message_number: FIRST_MESSAGE_NUMBER,
            segments: SegmentList::default(),
        }
    }
}

impl TopicIndexEntry {
    /// Number the next append will receive.
    pub fn next_message_number(&self) -> MessageNumber {
        self.next_message_number
    }

    /// The topic's segments.
    pub fn segments(&self) -> &SegmentList {
        &self.segments
    }
}

/// Mapping of topic to [`TopicIndexEntry`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Index {
    topics: BTreeMap<String, TopicIndexEntry>,
}

impl Index {
    /// An empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the next number for `topic` and reserve it.
    ///
    /// The counter advances immediately, so nothing else working on this `Index` value can
    /// observe the same number. The reservation becomes durable only when the index is saved.
    pub fn next_message_number_for(&mut self, topic: &str) -> MessageNumber {
        let entry = self.topics.entry(topic.to_string()).or_default();
        let n = entry.next_message_number;
        entry.next_message_number += 1;
        n
    }

    /// File name of the topic's active segment, or `None` if it has no segments.
    pub fn current_msg_file_name_for(&self, topic: &str) -> Option<&str> {
        self.topics
            .get(topic)
            .and_then(|e| e.segments.current())
            .map(SegmentMeta::file_name)
    }

    /// The topic's segment list, creating the topic entry if absent.
    pub fn get_message_file_list_for(&mut self, topic: &str) -> &mut SegmentList {
        &mut self.topics.entry(topic.to_string()).or_default().segments
    }

    /// Read-only view of a topic.
    pub fn topic(&self, topic: &str) -> Option<&TopicIndexEntry> {
        self.topics.get(topic)
    }

    /// Known topics, sorted.
    pub fn topic_names(&self) -> impl Iterator<Item = &str> {
        self.topics.keys().map(String::as_str)
    }

    /// All topics with mutable segment lists, sorted by name.
    pub fn segment_lists_mut(&mut self) -> impl Iterator<Item = (&str, &mut SegmentList)> {
        self.topics
            .iter_mut()
            .map(|(name, e)| (name.as_str(), &mut e.segments))
    }

    /// Check structural invariants:
    /// - within a topic, segment file names are unique and fewer than `next_seq` segments exist;
    /// - a canonically named segment carries a sequence number below `next_seq`, so the name
    ///   can never be handed out again;
    /// - every committed length covers at least the segment header;
    /// - message numbers increase across segments in list order;
    /// - every recorded number is below the topic's `next_message_number`.
    pub fn validate(&self) -> PersistenceResult<()> {
        for (topic, entry) in &self.topics {
            let list = &entry.segments;
            if (list.files.len() as u64) > list.next_seq {
                return Err(PersistenceError::Format(format!(
                    "topic {topic:?}: {} segments but next_seq is {}",
                    list.files.len(),
                    list.next_seq
                )));
            }
            let mut names = BTreeSet::new();
            let mut prev_last: Option<MessageNumber> = None;
            for meta in &list.files {
                if meta.byte_len < SEGMENT_HEADER_BYTES {
                    return Err(PersistenceError::Format(format!(
                        "topic {topic:?}: segment {:?} shorter than its header",
                        meta.file_name
                    )));
                }
                if let Some(seq) = filenamer::parse_segment_seq(&meta.file_name) {
                    if seq >= list.next_seq {
                        return Err(PersistenceError::Format(format!(
                            "topic {topic:?}: segment {:?} is not below next_seq {}",
                            meta.file_name, list.next_seq
                        )));
                    }
                }
                if !names.insert(meta.file_name.as_str()) {
                    return Err(PersistenceError::Format(format!(
                        "topic {topic:?}: duplicate segment {:?}",
                        meta.file_name
                    )));
                }
                if let (Some(prev), Some(first)) = (prev_last, meta.first_number()) {
                    if first <= prev {
                        return Err(PersistenceError::Format(format!(
                            "topic {topic:?}: segment {:?} starts at {first}, not after {prev}",
                            meta.file_name
                        )));
                    }
                }
                if let Some(last) = meta.last_number() {
                    if last >= entry.next_message_number {
                        return Err(PersistenceError::Format(format!(
                            "topic {topic:?}: number {last} not below next number {}",
                            entry.next_message_number
                        )));
                    }
                    prev_last = Some(last);
                }
            }
        }
        Ok(())
    }

    /// Serialize the index (header + postcard payload) into `w`.
    pub fn encode<W: Write>(&self, w: &mut W) -> PersistenceResult<()> {
        let payload =
            postcard::to_allocvec(self).map_err(|e| PersistenceError::Encode(e.to_string()))?;
        if payload.len() > MAX_INDEX_PAYLOAD_BYTES {
            return Err(PersistenceError::Format(format!(
                "index payload too large: {} bytes (max {})",
                payload.len(),
                MAX_INDEX_PAYLOAD_BYTES
            )));
        }
        IndexHeader {
            payload_len: payload.len() as u64,
            checksum: crc32fast::hash(&payload),
        }
        .write(w)?;
        w.write_all(&payload)?;
        Ok(())
    }

    /// Serialize into a fresh buffer.
    pub fn to_bytes(&self) -> PersistenceResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(IndexHeader::SIZE + 64 * self.topics.len());
        self.encode(&mut buf)?;
        Ok(buf)
    }

    /// Deserialize an index written by [`Index::encode`].
    pub fn decode<R: Read + ?Sized>(r: &mut R) -> PersistenceResult<Self> {
        let h = IndexHeader::read(r)?;
        let len = usize::try_from(h.payload_len)
            .map_err(|_| PersistenceError::Format("payload_len overflow".into()))?;
        if len > MAX_INDEX_PAYLOAD_BYTES {
            return Err(PersistenceError::Format(format!(
                "index payload too large: {len} bytes (max {MAX_INDEX_PAYLOAD_BYTES})"
            )));
        }
        let mut payload = Vec::new();
        (&mut *r).take(h.payload_len).read_to_end(&mut payload)?;
        if payload.len() != len {
            return Err(PersistenceError::Format(format!(
                "index payload truncated: {} of {len} bytes",
                payload.len()
            )));
        }
        let got = crc32fast::hash(&payload);
        if got != h.checksum {
            return Err(PersistenceError::CrcMismatch {
                expected: h.checksum,
                actual: got,
            });
        }
        let index: Index =
            postcard::from_bytes(&payload).map_err(|e| PersistenceError::Decode(e.to_string()))?;
        index.validate()?;
        Ok(index)
    }
}
