//! Header and segment placement arithmetic.
//!
//! An io object is a header region followed by `max_segment` fixed-size
//! segments, spread over shard files of a fixed size:
//!
//! ```text
//! shard 0:  | header | user header | pad | seg 0 | seg 1 | ... |
//! shard 1:  | seg k | seg k+1 | ...                             |
//! ```
//!
//! The header region occupies `base` bytes, which is counted as `base_seg`
//! segment slots when segments are assigned to shards. The first segment of
//! shard 0 starts right after the header region; every other shard starts
//! with a segment.

use crate::error::{IoError, IoResult};

/// Size of the fixed io header in bytes.
pub const IO_HEADER_SIZE: u32 = 64;

/// Page size the header region is rounded up to.
///
/// Fixed rather than queried from the host so that files are portable.
pub const PAGE_SIZE: u32 = 4096;

/// Shard size for format version 0.
pub const FILE_SIZE_V0: u64 = 128 * 1024 * 1024;

/// Shard size for format version 1 and later.
pub const FILE_SIZE_V1: u64 = 1024 * 1024 * 1024;

/// Rounds the fixed header plus `header_size` user bytes up to a page boundary.
#[must_use]
pub const fn compute_base(header_size: u32) -> u64 {
    let total = IO_HEADER_SIZE as u64 + header_size as u64;
    let page = PAGE_SIZE as u64;
    (total + page - 1) & !(page - 1)
}

/// Returns the number of segment slots the header region occupies.
#[must_use]
pub const fn compute_base_segment(base: u64, segment_size: u32) -> u32 {
    let segment_size = segment_size as u64;
    ((base + segment_size - 1) / segment_size) as u32
}

/// Returns the shard size for a format version.
#[must_use]
pub const fn file_size_for_version(version: u32) -> u64 {
    if version == 0 {
        FILE_SIZE_V0
    } else {
        FILE_SIZE_V1
    }
}

/// Returns how many shards are needed to hold `max_segment` segments.
#[must_use]
pub const fn compute_max_n_files(
    segment_size: u32,
    max_segment: u32,
    base_segment: u32,
    file_size: u64,
) -> u32 {
    let last_segment_end = segment_size as u64 * (max_segment as u64 + base_segment as u64);
    ((last_segment_end + file_size - 1) / file_size) as u32
}

/// Where a byte of the virtual segment space lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    /// Shard index (0 is the base file).
    pub shard: u32,
    /// Byte offset inside the shard.
    pub pos: u64,
}

/// Derived geometry of one io object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// Caller header bytes following the fixed header.
    pub header_size: u32,
    /// Bytes per segment (a power of two).
    pub segment_size: u32,
    /// Segment capacity.
    pub max_segment: u32,
    /// Format version.
    pub version: u32,
    /// Page-aligned size of the header region.
    pub base: u64,
    /// Segment slots taken by the header region.
    pub base_seg: u32,
    /// Shard size.
    pub file_size: u64,
}

impl Layout {
    /// Computes and validates the geometry of an io object.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the segment size is not a power of two,
    /// is smaller than a page or does not fit in a shard, or if the header
    /// region is larger than a shard.
    pub fn new(
        header_size: u32,
        segment_size: u32,
        max_segment: u32,
        version: u32,
    ) -> IoResult<Self> {
        if segment_size == 0 || !segment_size.is_power_of_two() {
            return Err(IoError::invalid_argument(format!(
                "segment size must be a power of two: {segment_size}"
            )));
        }
        if segment_size < PAGE_SIZE {
            return Err(IoError::invalid_argument(format!(
                "segment size {segment_size} is smaller than a page"
            )));
        }
        if max_segment == 0 {
            return Err(IoError::invalid_argument("max_segment must be positive"));
        }
        let file_size = file_size_for_version(version);
        if u64::from(segment_size) > file_size {
            return Err(IoError::invalid_argument(format!(
                "segment size {segment_size} exceeds shard size {file_size}"
            )));
        }
        let base = compute_base(header_size);
        if base > file_size {
            return Err(IoError::invalid_argument(format!(
                "header region of {base} bytes exceeds shard size {file_size}"
            )));
        }
        Ok(Self {
            header_size,
            segment_size,
            max_segment,
            version,
            base,
            base_seg: compute_base_segment(base, segment_size),
            file_size,
        })
    }

    /// Returns the number of segment slots per shard.
    #[must_use]
    pub fn segments_per_file(&self) -> u32 {
        (self.file_size / u64::from(self.segment_size)) as u32
    }

    /// Returns the number of shards covering every segment.
    #[must_use]
    pub fn max_n_files(&self) -> u32 {
        self.max_n_files_for(self.max_segment)
    }

    /// Returns the number of shards covering the first `max_segment` segments.
    #[must_use]
    pub fn max_n_files_for(&self, max_segment: u32) -> u32 {
        compute_max_n_files(self.segment_size, max_segment, self.base_seg, self.file_size)
    }

    /// Returns the shard holding `segment`.
    #[must_use]
    pub fn shard_of(&self, segment: u32) -> u32 {
        ((u64::from(segment) + u64::from(self.base_seg)) / u64::from(self.segments_per_file()))
            as u32
    }

    /// Resolves a segment-relative offset to a shard and a position within it.
    #[must_use]
    pub fn locate(&self, segment: u32, offset: u32) -> Location {
        let spf = u64::from(self.segments_per_file());
        let segment_size = u64::from(self.segment_size);
        let bseg = u64::from(segment) + u64::from(self.base_seg);
        let shard = (bseg / spf) as u32;
        let mut pos = segment_size * (bseg % spf) + u64::from(offset);
        if shard == 0 {
            pos = pos + self.base - segment_size * u64::from(self.base_seg);
        }
        Location { shard, pos }
    }

    /// Returns the virtual size once `segment` is in use.
    #[must_use]
    pub fn end_of_segment(&self, segment: u32) -> u64 {
        self.base + u64::from(self.segment_size) * (u64::from(segment) + 1)
    }

    /// Returns the number of shards spanned by a virtual size.
    #[must_use]
    pub fn n_files_for_size(&self, curr_size: u64) -> u32 {
        curr_size.div_ceil(self.file_size) as u32
    }
}
