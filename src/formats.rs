//! On-disk format constants.
//!
//! ## Public invariants (must not change without a format bump)
//!
//! - **Index file**: `[INDEX_MAGIC][FORMAT_VERSION][payload_len:u64][crc32:u32]` then a
//!   postcard-encoded `Index` (little-endian integers).
//! - **Segment file**: `[SEGMENT_MAGIC][FORMAT_VERSION]` then records framed as
//!   `len:u32 | crc32:u32 | postcard(StoredMessage)`.
//! - **Checksum**: `crc32fast` over the payload bytes in both cases.

/// Magic bytes for the index file.
pub const INDEX_MAGIC: [u8; 4] = *b"TSIX";
/// Magic bytes for segment files.
pub const SEGMENT_MAGIC: [u8; 4] = *b"TSSG";
/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

/// Bytes taken by a segment file header.
pub const SEGMENT_HEADER_BYTES: u64 = 4 + 4;
/// Bytes taken by the framing in front of each segment record.
pub const RECORD_FRAME_BYTES: u64 = 4 + 4;

/// Default segment size cap (1 MiB).
pub const DEFAULT_MAX_SEGMENT_BYTES: u64 = 1024 * 1024;
