//! Segment files: bounded, append-only runs of encoded [`StoredMessage`] records for one topic.
//!
//! ## Public invariants (must not change without a format bump)
//!
//! - **File header**: `[SEGMENT_MAGIC][FORMAT_VERSION]` at byte 0.
//! - **Record framing** (little-endian): `len:u32 | crc32:u32 | postcard(StoredMessage)`.
//! - **Checksum**: `crc32fast` over the payload bytes.
//! - **Committed length**: only the first `byte_len` bytes recorded in the index are
//!   meaningful. Anything after that is an append whose index update never happened.
//!
//! Writers never seek: new records go to the end of the file, and compaction writes a
//! whole new file under a new name.

use crate::error::{PersistenceError, PersistenceResult};
use crate::formats::{FORMAT_VERSION, RECORD_FRAME_BYTES, SEGMENT_HEADER_BYTES, SEGMENT_MAGIC};
use crate::message::StoredMessage;
use crate::storage::{self, Directory, DurableDirectory};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read, Write};
use std::sync::Arc;

/// Hard cap to avoid unbounded allocations on corrupt segments.
const MAX_RECORD_BYTES: u32 = 64 * 1024 * 1024; // 64 MiB

/// Read mode for segment decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentReadMode {
    /// Any corruption or truncation is an error.
    Strict,
    /// A truncated final record (torn write) ends the scan cleanly.
    ///
    /// CRC and decode failures remain errors.
    BestEffort,
}

/// Encode `msg` as one framed record.
pub fn encode_record(msg: &StoredMessage) -> PersistenceResult<Vec<u8>> {
    let payload =
        postcard::to_allocvec(msg).map_err(|e| PersistenceError::Encode(e.to_string()))?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|l| *l <= MAX_RECORD_BYTES)
        .ok_or_else(|| {
            PersistenceError::Format(format!(
                "record payload too large: {} (max {MAX_RECORD_BYTES})",
                payload.len()
            ))
        })?;
    let crc = crc32fast::hash(&payload);
    let mut out = Vec::with_capacity(RECORD_FRAME_BYTES as usize + payload.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

fn header_bytes() -> [u8; SEGMENT_HEADER_BYTES as usize] {
    let mut h = [0u8; SEGMENT_HEADER_BYTES as usize];
    h[..4].copy_from_slice(&SEGMENT_MAGIC);
    h[4..].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
    h
}

fn check_header(r: &mut impl Read) -> PersistenceResult<()> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if magic != SEGMENT_MAGIC {
        return Err(PersistenceError::Format("invalid segment magic".into()));
    }
    let version = r.read_u32::<LittleEndian>()?;
    if version != FORMAT_VERSION {
        return Err(PersistenceError::Format(format!(
            "segment version mismatch (got {version}, expected {FORMAT_VERSION})"
        )));
    }
    Ok(())
}

fn next_record(
    r: &mut Cursor<&[u8]>,
    mode: SegmentReadMode,
) -> PersistenceResult<Option<StoredMessage>> {
    let remaining = r.get_ref().len() as u64 - r.position();
    if remaining == 0 {
        return Ok(None);
    }
    let torn = |e: std::io::Error| -> PersistenceResult<Option<StoredMessage>> {
        match mode {
            SegmentReadMode::Strict => Err(e.into()),
            SegmentReadMode::BestEffort => Ok(None),
        }
    };

    let len = match r.read_u32::<LittleEndian>() {
        Ok(v) => v,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return torn(e),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_RECORD_BYTES {
        return Err(PersistenceError::Format(format!(
            "record length too large: {len} (max {MAX_RECORD_BYTES})"
        )));
    }
    let expected_crc = match r.read_u32::<LittleEndian>() {
        Ok(v) => v,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return torn(e),
        Err(e) => return Err(e.into()),
    };
    let mut payload = vec![0u8; len as usize];
    if let Err(e) = r.read_exact(&mut payload) {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            return torn(e);
        }
        return Err(e.into());
    }
    let got = crc32fast::hash(&payload);
    if got != expected_crc {
        return Err(PersistenceError::CrcMismatch {
            expected: expected_crc,
            actual: got,
        });
    }
    let msg =
        postcard::from_bytes(&payload).map_err(|e| PersistenceError::Decode(e.to_string()))?;
    Ok(Some(msg))
}

/// Decode a whole segment image (header included).
pub fn decode_segment(
    bytes: &[u8],
    mode: SegmentReadMode,
) -> PersistenceResult<Vec<StoredMessage>> {
    let mut cur = Cursor::new(bytes);
    check_header(&mut cur)?;
    read_records(&mut cur, mode)
}

fn read_records(
    cur: &mut Cursor<&[u8]>,
    mode: SegmentReadMode,
) -> PersistenceResult<Vec<StoredMessage>> {
    let mut out = Vec::new();
    while let Some(msg) = next_record(cur, mode)? {
        out.push(msg);
    }
    Ok(out)
}

fn committed_prefix(bytes: &[u8], committed_len: u64) -> PersistenceResult<&[u8]> {
    let end = usize::try_from(committed_len)
        .map_err(|_| PersistenceError::Format("committed length overflows usize".into()))?;
    bytes.get(..end).ok_or_else(|| {
        PersistenceError::Format(format!(
            "segment is {} bytes, shorter than its committed length {committed_len}",
            bytes.len()
        ))
    })
}

/// Appends records to one segment file.
pub struct SegmentWriter {
    dir: Arc<dyn Directory>,
    path: String,
    sync: bool,
}

impl SegmentWriter {
    /// Writer for the segment at `path`. With `sync`, writes are followed by `fsync` on
    /// backends that expose OS paths.
    pub fn new(dir: impl Into<Arc<dyn Directory>>, path: impl Into<String>, sync: bool) -> Self {
        Self {
            dir: dir.into(),
            path: path.into(),
            sync,
        }
    }

    fn durable(&self) -> bool {
        self.sync && self.dir.file_path(&self.path).is_some()
    }

    /// Create (or truncate) the file and write the segment header.
    ///
    /// Returns the committed length of the new, empty segment.
    pub fn create(&self) -> PersistenceResult<u64> {
        let mut w = self.dir.create_file(&self.path)?;
        w.write_all(&header_bytes())?;
        w.flush()?;
        drop(w);
        if self.durable() {
            storage::sync_file(&*self.dir, &self.path)?;
            storage::sync_parent_dir(&*self.dir, &self.path)?;
        }
        Ok(SEGMENT_HEADER_BYTES)
    }

    /// Append one encoded record at the committed end of the file.
    ///
    /// If the file is longer than `committed_len` (an earlier append landed but was never
    /// indexed), the extra bytes are cut off first. A file shorter than `committed_len` has
    /// lost committed data and is an error.
    pub fn append_at(&self, committed_len: u64, record: &[u8]) -> PersistenceResult<()> {
        let actual = self.dir.file_len(&self.path)?;
        if actual < committed_len {
            return Err(PersistenceError::Format(format!(
                "segment {} is {actual} bytes, shorter than its committed length {committed_len}",
                self.path
            )));
        }
        if actual > committed_len {
            tracing::warn!(
                file = %self.path,
                committed = committed_len,
                actual,
                "discarding uncommitted segment tail"
            );
            let bytes = self.dir.read_all(&self.path)?;
            let prefix = committed_prefix(&bytes, committed_len)?;
            self.replace(prefix)?;
        }

        let mut w = self.dir.append_file(&self.path)?;
        w.write_all(record)?;
        w.flush()?;
        drop(w);
        if self.durable() {
            storage::sync_file(&*self.dir, &self.path)?;
        }
        Ok(())
    }

    /// Write a complete segment holding `records`, replacing any file at the path.
    ///
    /// Returns the length of the new file.
    pub fn write_records(&self, records: &[StoredMessage]) -> PersistenceResult<u64> {
        let mut buf = header_bytes().to_vec();
        for r in records {
            buf.extend_from_slice(&encode_record(r)?);
        }
        self.replace(&buf)?;
        Ok(buf.len() as u64)
    }

    fn replace(&self, bytes: &[u8]) -> PersistenceResult<()> {
        if self.durable() {
            self.dir.atomic_write_durable(&self.path, bytes)
        } else {
            self.dir.atomic_write(&self.path, bytes)
        }
    }
}

/// Reads records back from one segment file.
pub struct SegmentReader {
    dir: Arc<dyn Directory>,
    path: String,
}

impl SegmentReader {
    /// Reader for the segment at `path`.
    pub fn new(dir: impl Into<Arc<dyn Directory>>, path: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            path: path.into(),
        }
    }

    /// Decode the committed records (the first `committed_len` bytes), strictly.
    pub fn read_committed(&self, committed_len: u64) -> PersistenceResult<Vec<StoredMessage>> {
        let bytes = self.dir.read_all(&self.path)?;
        decode_segment(committed_prefix(&bytes, committed_len)?, SegmentReadMode::Strict)
    }

    /// Decode the bytes past `committed_len`: appends whose index update never landed.
    ///
    /// A torn final record ends the scan; anything else that does not frame is an error.
    pub fn read_uncommitted(&self, committed_len: u64) -> PersistenceResult<Vec<StoredMessage>> {
        let bytes = self.dir.read_all(&self.path)?;
        let committed = committed_prefix(&bytes, committed_len)?.len();
        let mut cur = Cursor::new(&bytes[committed..]);
        read_records(&mut cur, SegmentReadMode::BestEffort)
    }

    /// Decode every record in the file, including any uncommitted tail.
    pub fn read_all(&self, mode: SegmentReadMode) -> PersistenceResult<Vec<StoredMessage>> {
        let bytes = self.dir.read_all(&self.path)?;
        decode_segment(&bytes, mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::storage::{FsDirectory, MemoryDirectory};
    use crate::time::Timestamp;

    fn stored(n: u64, text: &str) -> StoredMessage {
        StoredMessage {
            message: Message::new("orders", text.as_bytes().to_vec()),
            creation_time: Timestamp::from_micros(1_000 + n),
            message_number: n,
        }
    }

    fn append(w: &SegmentWriter, committed: &mut u64, msg: &StoredMessage) {
        let rec = encode_record(msg).unwrap();
        w.append_at(*committed, &rec).unwrap();
        *committed += rec.len() as u64;
    }

    #[test]
    fn append_then_read_committed() {
        let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
        let w = SegmentWriter::new(dir.clone(), "orders/s.log", false);
        let mut committed = w.create().unwrap();
        let msgs = vec![stored(0, "東京"), stored(1, "Москва"), stored(2, "São Paulo")];
        for m in &msgs {
            append(&w, &mut committed, m);
        }
        assert_eq!(dir.file_len("orders/s.log").unwrap(), committed);

        let r = SegmentReader::new(dir, "orders/s.log");
        assert_eq!(r.read_committed(committed).unwrap(), msgs);
    }

    #[test]
    fn uncommitted_tail_is_ignored_then_cut_on_next_append() {
        let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
        let w = SegmentWriter::new(dir.clone(), "s.log", false);
        let mut committed = w.create().unwrap();
        append(&w, &mut committed, &stored(0, "kept"));

        // An append whose index update never happened.
        let orphan = encode_record(&stored(1, "orphan")).unwrap();
        w.append_at(committed, &orphan).unwrap();

        let r = SegmentReader::new(dir.clone(), "s.log");
        assert_eq!(r.read_committed(committed).unwrap(), vec![stored(0, "kept")]);
        assert_eq!(r.read_all(SegmentReadMode::Strict).unwrap().len(), 2);

        assert_eq!(r.read_uncommitted(committed).unwrap(), vec![stored(1, "orphan")]);

        append(&w, &mut committed, &stored(1, "retry"));
        assert!(r.read_uncommitted(committed).unwrap().is_empty());
        assert_eq!(
            r.read_all(SegmentReadMode::Strict).unwrap(),
            vec![stored(0, "kept"), stored(1, "retry")]
        );
    }

    #[test]
    fn torn_tail_is_eof_only_in_best_effort() {
        let tmp = tempfile::tempdir().unwrap();
        let dir: Arc<dyn Directory> = Arc::new(FsDirectory::new(tmp.path()).unwrap());
        let w = SegmentWriter::new(dir.clone(), "s.log", true);
        let mut committed = w.create().unwrap();
        append(&w, &mut committed, &stored(0, "a"));
        append(&w, &mut committed, &stored(1, "b"));

        let path = dir.file_path("s.log").unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 2);
        std::fs::write(&path, &bytes).unwrap();

        let r = SegmentReader::new(dir, "s.log");
        assert!(r.read_all(SegmentReadMode::Strict).is_err());
        assert_eq!(
            r.read_all(SegmentReadMode::BestEffort).unwrap(),
            vec![stored(0, "a")]
        );
        // The committed length now points past the end of the file.
        assert!(r.read_committed(committed).is_err());
    }

    #[test]
    fn corruption_is_an_error_in_both_modes() {
        let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
        let w = SegmentWriter::new(dir.clone(), "s.log", false);
        let len = w.write_records(&[stored(0, "payload")]).unwrap();
        let mut bytes = dir.read_all("s.log").unwrap();
        *bytes.last_mut().unwrap() ^= 0xFF;
        dir.atomic_write("s.log", &bytes).unwrap();

        let r = SegmentReader::new(dir.clone(), "s.log");
        for mode in [SegmentReadMode::Strict, SegmentReadMode::BestEffort] {
            let err = r.read_all(mode).unwrap_err();
            assert!(matches!(err, PersistenceError::CrcMismatch { .. }));
        }

        bytes[0] = b'X';
        dir.atomic_write("s.log", &bytes).unwrap();
        let err = r.read_committed(len).unwrap_err();
        assert!(err.to_string().contains("invalid segment magic"));
    }

    #[test]
    fn junk_past_committed_length_fails_only_the_tail_scan() {
        let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
        let w = SegmentWriter::new(dir.clone(), "s.log", false);
        let mut committed = w.create().unwrap();
        append(&w, &mut committed, &stored(0, "kept"));
        {
            let mut a = dir.append_file("s.log").unwrap();
            a.write_all(&[0xAB; 13]).unwrap();
        }

        let r = SegmentReader::new(dir, "s.log");
        assert_eq!(r.read_committed(committed).unwrap(), vec![stored(0, "kept")]);
        assert!(r.read_uncommitted(committed).is_err());
    }

    #[test]
    fn append_refuses_a_file_shorter_than_committed() {
        let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
        let w = SegmentWriter::new(dir, "s.log", false);
        let committed = w.create().unwrap();
        let rec = encode_record(&stored(0, "x")).unwrap();
        assert!(w.append_at(committed + 4, &rec).is_err());
    }

    #[test]
    fn write_records_reports_exact_length() {
        let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
        let w = SegmentWriter::new(dir.clone(), "s.log", false);
        let msgs = [stored(4, "x"), stored(5, "yy")];
        let len = w.write_records(&msgs).unwrap();
        let expected: u64 = SEGMENT_HEADER_BYTES
            + msgs
                .iter()
                .map(|m| encode_record(m).unwrap().len() as u64)
                .sum::<u64>();
        assert_eq!(len, expected);
        assert_eq!(dir.file_len("s.log").unwrap(), expected);
        assert!(!dir.exists("s.log.tmp"));
    }
}
