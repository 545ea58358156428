//! The fixed 64-byte io header.
//!
//! ```text
//! +----------------+------+---------+-------+-------------+
//! | idstr (16)     | type | version | flags | header_size |
//! +----------------+------+---------+-------+-------------+
//! | segment_size | max_segment | n_arrays | lock |
//! +--------------+-------------+----------+------+
//! | curr_size (8) | segment_tail | last_modified |
//! +---------------+--------------+---------------+
//! ```
//!
//! All integers are stored in native byte order. The header lives at offset 0
//! of the base shard and stays mapped for the lifetime of the io object; its
//! mutable fields are accessed atomically through [`RawHeader`].

use crate::error::{IoError, IoResult};
use crate::layout::IO_HEADER_SIZE;
use segio_storage::Mapping;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Identification string at the start of every io file.
pub const IO_IDSTR: &[u8; 16] = b"GROONGA:IO:00001";

/// In-memory view of the mapped header.
#[repr(C)]
pub(crate) struct RawHeader {
    pub idstr: [u8; 16],
    pub io_type: AtomicU32,
    pub version: AtomicU32,
    pub flags: AtomicU32,
    pub header_size: AtomicU32,
    pub segment_size: AtomicU32,
    pub max_segment: AtomicU32,
    pub n_arrays: AtomicU32,
    pub lock: AtomicU32,
    pub curr_size: AtomicU64,
    pub segment_tail: AtomicU32,
    pub last_modified: AtomicU32,
}

const _: () = assert!(std::mem::size_of::<RawHeader>() == IO_HEADER_SIZE as usize);

/// Decoded copy of an io header.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeaderInfo {
    /// Caller-defined type tag.
    pub io_type: u32,
    /// Format version.
    pub version: u32,
    /// Persisted io flags.
    pub flags: u32,
    /// Caller header size, array tables included.
    pub header_size: u32,
    /// Bytes per segment.
    pub segment_size: u32,
    /// Segment capacity.
    pub max_segment: u32,
    /// Number of arrays laid out in the header.
    pub n_arrays: u32,
    /// Lock word.
    pub lock: u32,
    /// Virtual size of the object.
    pub curr_size: u64,
    /// Next segment to hand out for arrays; 0 when the tail is unknown.
    pub segment_tail: u32,
    /// Caller-maintained modification stamp.
    pub last_modified: u32,
}

impl HeaderInfo {
    /// Decodes a header from its first 64 bytes.
    ///
    /// # Errors
    ///
    /// Returns `IncompatibleFormat` if the buffer is short or the
    /// identification string does not match.
    pub fn decode(bytes: &[u8]) -> IoResult<Self> {
        if bytes.len() < IO_HEADER_SIZE as usize {
            return Err(IoError::incompatible_format(format!(
                "header too short: {} bytes",
                bytes.len()
            )));
        }
        if &bytes[..16] != IO_IDSTR {
            return Err(IoError::incompatible_format(
                "identification string mismatch",
            ));
        }
        let u32_at = |at: usize| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&bytes[at..at + 4]);
            u32::from_ne_bytes(raw)
        };
        let mut curr_size = [0u8; 8];
        curr_size.copy_from_slice(&bytes[48..56]);
        Ok(Self {
            io_type: u32_at(16),
            version: u32_at(20),
            flags: u32_at(24),
            header_size: u32_at(28),
            segment_size: u32_at(32),
            max_segment: u32_at(36),
            n_arrays: u32_at(40),
            lock: u32_at(44),
            curr_size: u64::from_ne_bytes(curr_size),
            segment_tail: u32_at(56),
            last_modified: u32_at(60),
        })
    }

    /// Encodes the header, identification string included.
    #[must_use]
    pub fn encode(&self) -> [u8; IO_HEADER_SIZE as usize] {
        let mut out = [0u8; IO_HEADER_SIZE as usize];
        out[..16].copy_from_slice(IO_IDSTR);
        let words = [
            (16, self.io_type),
            (20, self.version),
            (24, self.flags),
            (28, self.header_size),
            (32, self.segment_size),
            (36, self.max_segment),
            (40, self.n_arrays),
            (44, self.lock),
            (56, self.segment_tail),
            (60, self.last_modified),
        ];
        for (at, value) in words {
            out[at..at + 4].copy_from_slice(&value.to_ne_bytes());
        }
        out[48..56].copy_from_slice(&self.curr_size.to_ne_bytes());
        out
    }
}

/// The mapped header region: fixed header, array tables and caller header.
#[derive(Debug)]
pub(crate) struct HeaderRegion {
    map: Mapping,
}

impl HeaderRegion {
    /// Wraps a mapping of the whole header region.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the mapping cannot hold the fixed header.
    pub fn new(map: Mapping) -> IoResult<Self> {
        if map.len() < IO_HEADER_SIZE as usize {
            return Err(IoError::invalid_argument(format!(
                "header mapping too small: {} bytes",
                map.len()
            )));
        }
        Ok(Self { map })
    }

    /// Returns the atomic header view.
    #[allow(unsafe_code)]
    pub fn raw(&self) -> &RawHeader {
        // SAFETY: the mapping is page aligned, at least 64 bytes long and
        // outlives the returned borrow. RawHeader is repr(C) with only
        // atomic fields apart from idstr, which is never written once mapped.
        unsafe { &*self.map.as_ptr().cast::<RawHeader>() }
    }

    /// Returns the 32-bit word at `offset` bytes into the region.
    ///
    /// # Panics
    ///
    /// Panics if the word is misaligned or outside the region; offsets come
    /// from array tables sized when the region was created.
    #[allow(unsafe_code)]
    pub fn word(&self, offset: usize) -> &AtomicU32 {
        assert!(offset % 4 == 0 && offset + 4 <= self.map.len());
        // SAFETY: checked above; the mapping is page aligned.
        unsafe { &*self.map.as_ptr().add(offset).cast::<AtomicU32>() }
    }

    /// Copies the fixed header out of the mapping.
    pub fn info(&self) -> HeaderInfo {
        let raw = self.raw();
        HeaderInfo {
            io_type: raw.io_type.load(Ordering::Acquire),
            version: raw.version.load(Ordering::Acquire),
            flags: raw.flags.load(Ordering::Acquire),
            header_size: raw.header_size.load(Ordering::Acquire),
            segment_size: raw.segment_size.load(Ordering::Acquire),
            max_segment: raw.max_segment.load(Ordering::Acquire),
            n_arrays: raw.n_arrays.load(Ordering::Acquire),
            lock: raw.lock.load(Ordering::Acquire),
            curr_size: raw.curr_size.load(Ordering::Acquire),
            segment_tail: raw.segment_tail.load(Ordering::Acquire),
            last_modified: raw.last_modified.load(Ordering::Acquire),
        }
    }

    /// Copies `buf.len()` bytes starting at `offset` out of the region.
    #[allow(unsafe_code)]
    pub fn read(&self, offset: usize, buf: &mut [u8]) -> IoResult<()> {
        self.check_range(offset, buf.len())?;
        // SAFETY: range checked against the mapping length.
        unsafe {
            std::ptr::copy_nonoverlapping(self.map.as_ptr().add(offset), buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }

    /// Copies `data` into the region starting at `offset`.
    #[allow(unsafe_code)]
    pub fn write(&self, offset: usize, data: &[u8]) -> IoResult<()> {
        self.check_range(offset, data.len())?;
        // SAFETY: range checked against the mapping length.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.map.as_ptr().add(offset), data.len());
        }
        Ok(())
    }

    /// Returns a raw pointer `offset` bytes into the region.
    pub fn ptr_at(&self, offset: usize) -> *mut u8 {
        self.map.as_ptr().wrapping_add(offset)
    }

    pub fn flush(&self) -> IoResult<()> {
        self.map.flush()?;
        Ok(())
    }

    fn check_range(&self, offset: usize, len: usize) -> IoResult<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.map.len() => Ok(()),
            _ => Err(IoError::invalid_argument(format!(
                "header range {offset}+{len} exceeds {} bytes",
                self.map.len()
            ))),
        }
    }
}
