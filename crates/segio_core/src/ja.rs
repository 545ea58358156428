//! Journal-array records.
//!
//! A record is an 8-byte head followed by the value, written and read with
//! positioned file I/O rather than through segment mappings:
//!
//! ```text
//! +------------+-----------+------------------+
//! | size (u32) | key (u32) | value (size)     |
//! +------------+-----------+------------------+
//! ```
//!
//! Records are addressed by segment and offset like mapped data, but may run
//! past the end of a shard; the remainder continues at offset 0 of the
//! following shards.

use crate::error::{IoError, IoResult};
use crate::files::FilePool;
use crate::io::Io;
use crate::layout::Location;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{error, info};

/// Size of a record head.
pub const JA_EHEAD_SIZE: usize = 8;

/// Values up to this size are written together with their head.
pub const JA_INLINE_MAX: usize = 256;

/// Where the caller's index says a record lives.
///
/// Writers update these fields while readers are in flight; a reader compares
/// them before trusting what it read.
#[derive(Debug, Default)]
pub struct JaEntryInfo {
    pos: AtomicU32,
    size: AtomicU32,
}

impl JaEntryInfo {
    /// Creates entry info for a record at `pos` holding `size` bytes.
    pub fn new(pos: u32, size: u32) -> Self {
        Self {
            pos: AtomicU32::new(pos),
            size: AtomicU32::new(size),
        }
    }

    /// Returns the recorded position.
    pub fn pos(&self) -> u32 {
        self.pos.load(Ordering::Acquire)
    }

    /// Returns the recorded value size.
    pub fn size(&self) -> u32 {
        self.size.load(Ordering::Acquire)
    }

    /// Points the entry at a new record.
    pub fn set(&self, pos: u32, size: u32) {
        self.pos.store(pos, Ordering::Release);
        self.size.store(size, Ordering::Release);
    }
}

fn encode_ehead(value_len: u32, key: u32) -> [u8; JA_EHEAD_SIZE] {
    let mut head = [0u8; JA_EHEAD_SIZE];
    head[..4].copy_from_slice(&value_len.to_ne_bytes());
    head[4..].copy_from_slice(&key.to_ne_bytes());
    head
}

fn decode_ehead(head: &[u8]) -> (u32, u32) {
    let mut size = [0u8; 4];
    let mut key = [0u8; 4];
    size.copy_from_slice(&head[..4]);
    key.copy_from_slice(&head[4..JA_EHEAD_SIZE]);
    (u32::from_ne_bytes(size), u32::from_ne_bytes(key))
}

impl Io {
    /// Writes a record for `key` at `segment`/`offset`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` on a temporary object, `InvalidArgument` if
    /// the value is too large or the record would run past the last shard,
    /// and storage errors from the writes.
    pub fn write_ja(&self, key: u32, segment: u32, offset: u32, value: &[u8]) -> IoResult<()> {
        let files = self.ja_files("write_ja")?;
        let value_len = u32::try_from(value.len())
            .map_err(|_| IoError::invalid_argument(format!("value of {} bytes", value.len())))?;
        let head = encode_ehead(value_len, key);
        let loc = self.ja_locate(segment, offset);

        if value.len() <= JA_INLINE_MAX {
            let mut record = Vec::with_capacity(JA_EHEAD_SIZE + value.len());
            record.extend_from_slice(&head);
            record.extend_from_slice(value);
            self.write_span(files, loc, &[&record])?;
        } else {
            self.write_span(files, loc, &[&head, value])?;
        }
        self.stats().record_ja_write((JA_EHEAD_SIZE + value.len()) as u64);
        Ok(())
    }

    /// Writes only the head of a record, leaving its value untouched.
    ///
    /// # Errors
    ///
    /// Same as [`Io::write_ja`].
    pub fn write_ja_ehead(&self, key: u32, segment: u32, offset: u32, value_len: u32) -> IoResult<()> {
        let files = self.ja_files("write_ja_ehead")?;
        let loc = self.ja_locate(segment, offset);
        self.write_span(files, loc, &[&encode_ehead(value_len, key)])?;
        self.stats().record_ja_write(JA_EHEAD_SIZE as u64);
        Ok(())
    }

    /// Reads the record the caller's entry info points at.
    ///
    /// `epos` and `value_len` are what the caller saw in `einfo` before
    /// calling; they are checked again after the head is read.
    ///
    /// # Errors
    ///
    /// - `ConcurrentModification` if `einfo` moved while reading; retry
    /// - `FormatCorruption` if the stored head disagrees with `key` or
    ///   `value_len`
    /// - `NoMemory` if the record buffer cannot be allocated
    /// - `InvalidOperation` on a temporary object
    /// - storage errors from the reads
    pub fn read_ja(
        &self,
        einfo: &JaEntryInfo,
        epos: u32,
        key: u32,
        segment: u32,
        offset: u32,
        value_len: u32,
    ) -> IoResult<Vec<u8>> {
        let files = self.ja_files("read_ja")?;
        let total = JA_EHEAD_SIZE + value_len as usize;
        let mut record = Vec::new();
        record
            .try_reserve_exact(total)
            .map_err(|_| IoError::NoMemory { requested: total })?;
        record.resize(total, 0);

        let loc = self.ja_locate(segment, offset);
        let first_len = self.first_piece_len(loc, total);
        let (first, rest) = record.split_at_mut(first_len);
        self.read_span(files, loc, first)?;

        let current_pos = einfo.pos();
        if current_pos != epos {
            info!(from = epos, to = current_pos, "einfo pos changed");
            return Err(IoError::concurrent_modification(format!(
                "entry moved from {epos:#x} to {current_pos:#x}"
            )));
        }
        let current_size = einfo.size();
        if current_size != value_len {
            info!(from = value_len, to = current_size, "einfo size changed");
            return Err(IoError::concurrent_modification(format!(
                "entry size changed from {value_len} to {current_size}"
            )));
        }

        // A head split across shards is completed before it is decoded.
        if first_len < JA_EHEAD_SIZE {
            self.read_span(files, Location { shard: loc.shard + 1, pos: 0 }, rest)?;
        }
        let (stored_size, stored_key) = decode_ehead(&record[..JA_EHEAD_SIZE]);
        if stored_key != key {
            error!(
                path = %self.display_path(),
                expected = key,
                stored = stored_key,
                "ehead key unmatch"
            );
            return Err(IoError::format_corruption(format!(
                "record key {stored_key:#x} does not match {key:#x}"
            )));
        }
        if stored_size != value_len {
            error!(
                path = %self.display_path(),
                expected = value_len,
                stored = stored_size,
                "ehead size unmatch"
            );
            return Err(IoError::format_corruption(format!(
                "record size {stored_size} does not match {value_len}"
            )));
        }
        if first_len >= JA_EHEAD_SIZE && first_len < total {
            let (_, rest) = record.split_at_mut(first_len);
            self.read_span(files, Location { shard: loc.shard + 1, pos: 0 }, rest)?;
        }

        self.stats().record_ja_read(total as u64);
        record.drain(..JA_EHEAD_SIZE);
        Ok(record)
    }

    fn ja_files(&self, op: &str) -> IoResult<&FilePool> {
        self.files().ok_or_else(|| {
            IoError::invalid_operation(format!("{op} is not supported on a temporary io"))
        })
    }

    /// Resolves a record address, carrying offsets past a shard end over
    /// into the following shards.
    fn ja_locate(&self, segment: u32, offset: u32) -> Location {
        let file_size = self.layout().file_size;
        let mut loc = self.layout().locate(segment, offset);
        while loc.pos >= file_size {
            loc = Location { shard: loc.shard + 1, pos: loc.pos - file_size };
        }
        loc
    }

    /// Bytes of a `len`-byte run starting at `loc` that fit its shard.
    fn first_piece_len(&self, loc: Location, len: usize) -> usize {
        let room = self.layout().file_size.saturating_sub(loc.pos);
        len.min(usize::try_from(room).unwrap_or(usize::MAX))
    }

    /// Writes the concatenation of `parts` starting at `loc`, continuing at
    /// offset 0 of the next shard whenever a shard fills up.
    fn write_span(&self, files: &FilePool, mut loc: Location, parts: &[&[u8]]) -> IoResult<()> {
        for part in parts {
            let mut part: &[u8] = part;
            while !part.is_empty() {
                if loc.pos >= self.layout().file_size {
                    loc = Location { shard: loc.shard + 1, pos: 0 };
                }
                let (shard, _) = files.get_or_open(loc.shard)?;
                let n = self.first_piece_len(loc, part.len());
                shard.write_at(loc.pos, &part[..n])?;
                loc.pos += n as u64;
                part = &part[n..];
            }
        }
        Ok(())
    }

    /// Fills `buf` starting at `loc`, crossing shard boundaries as needed.
    fn read_span(&self, files: &FilePool, mut loc: Location, mut buf: &mut [u8]) -> IoResult<()> {
        while !buf.is_empty() {
            if loc.pos >= self.layout().file_size {
                loc = Location { shard: loc.shard + 1, pos: 0 };
            }
            let (shard, _) = files.get_or_open(loc.shard)?;
            let n = self.first_piece_len(loc, buf.len());
            let (head, tail) = buf.split_at_mut(n);
            shard.read_at(loc.pos, head)?;
            loc.pos += n as u64;
            buf = tail;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IoConfig, IoContext, IoFlags};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn create(dir: &std::path::Path) -> Arc<Io> {
        let ctx = IoContext::new(IoConfig::default());
        Io::create(&ctx, dir.join("ja"), 0, 1 << 16, 64, IoFlags::EXPIRE_SEGMENT).unwrap()
    }

    #[test]
    fn head_layout_is_size_then_key() {
        let head = encode_ehead(5, 0xAABB);
        assert_eq!(&head[..4], &5u32.to_ne_bytes());
        assert_eq!(decode_ehead(&head), (5, 0xAABB));
    }

    #[test]
    fn small_record_round_trip() {
        let dir = tempdir().unwrap();
        let io = create(dir.path());
        let einfo = JaEntryInfo::new(10, 5);

        io.write_ja(42, 0, 128, b"hello").unwrap();
        assert_eq!(io.read_ja(&einfo, 10, 42, 0, 128, 5).unwrap(), b"hello");
        assert_eq!(io.stats().ja_writes(), 1);
        assert_eq!(io.stats().bytes_read(), 13);
    }

    #[test]
    fn large_record_round_trip() {
        let dir = tempdir().unwrap();
        let io = create(dir.path());
        let value: Vec<u8> = (0..70_000u32).map(|i| (i % 253) as u8).collect();
        let einfo = JaEntryInfo::new(1, value.len() as u32);

        io.write_ja(7, 3, 1000, &value).unwrap();
        assert_eq!(io.read_ja(&einfo, 1, 7, 3, 1000, value.len() as u32).unwrap(), value);
    }

    #[test]
    fn moved_entry_is_retryable() {
        let dir = tempdir().unwrap();
        let io = create(dir.path());
        io.write_ja(1, 0, 0, b"abc").unwrap();

        let einfo = JaEntryInfo::new(2, 3);
        let err = io.read_ja(&einfo, 1, 1, 0, 0, 3).unwrap_err();
        assert!(matches!(err, IoError::ConcurrentModification { .. }));
        assert!(err.is_retryable());

        einfo.set(1, 4);
        let err = io.read_ja(&einfo, 1, 1, 0, 0, 3).unwrap_err();
        assert!(matches!(err, IoError::ConcurrentModification { .. }));
    }

    #[test]
    fn mismatched_record_is_corruption() {
        let dir = tempdir().unwrap();
        let io = create(dir.path());
        io.write_ja(1, 0, 0, b"abcd").unwrap();

        let einfo = JaEntryInfo::new(0, 4);
        assert!(matches!(
            io.read_ja(&einfo, 0, 2, 0, 0, 4),
            Err(IoError::FormatCorruption { .. })
        ));

        io.write_ja_ehead(1, 0, 0, 3).unwrap();
        assert!(matches!(
            io.read_ja(&einfo, 0, 1, 0, 0, 4),
            Err(IoError::FormatCorruption { .. })
        ));
    }

    #[test]
    fn temporary_objects_reject_records() {
        let ctx = IoContext::new(IoConfig::default());
        let io = Io::create_temporary(&ctx, 0, 4096, 4, IoFlags::empty()).unwrap();
        assert!(matches!(
            io.write_ja(1, 0, 0, b"x"),
            Err(IoError::InvalidOperation { .. })
        ));
        let einfo = JaEntryInfo::new(0, 1);
        assert!(matches!(
            io.read_ja(&einfo, 0, 1, 0, 0, 1),
            Err(IoError::InvalidOperation { .. })
        ));
    }
}
