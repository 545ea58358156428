//! Property-based test generators using proptest.
//!
//! Provides strategies for generating io geometry and access patterns that
//! respect the layout rules.

use proptest::prelude::*;
use segio_core::{Layout, FILE_SIZE_V0};

/// Geometry of an io object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Caller header size in bytes.
    pub header_size: u32,
    /// Segment size in bytes (a power of two).
    pub segment_size: u32,
    /// Number of segments.
    pub max_segment: u32,
    /// Format version.
    pub version: u32,
}

impl Geometry {
    /// Builds the layout for this geometry.
    pub fn layout(&self) -> Layout {
        Layout::new(
            self.header_size,
            self.segment_size,
            self.max_segment,
            self.version,
        )
        .expect("Generated geometry must be valid")
    }
}

/// Strategy for generating valid segment sizes (4 KiB to 4 MiB).
pub fn segment_size_strategy() -> impl Strategy<Value = u32> {
    (12u32..=22).prop_map(|shift| 1 << shift)
}

/// Strategy for generating valid io geometry.
pub fn geometry_strategy() -> impl Strategy<Value = Geometry> {
    (
        0u32..=65_536,
        segment_size_strategy(),
        1u32..=100_000,
        0u32..=1,
    )
        .prop_map(|(header_size, segment_size, max_segment, version)| Geometry {
            header_size,
            segment_size,
            max_segment,
            version,
        })
        .prop_filter("header must fit the first shard", |g| {
            segio_core::compute_base(g.header_size) <= FILE_SIZE_V0
        })
}

/// A byte range addressed by segment and offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRange {
    /// First segment.
    pub segment: u32,
    /// Offset inside the first segment.
    pub offset: u32,
    /// Length in bytes.
    pub size: u32,
}

/// Strategy for generating non-empty ranges inside `max_segment` segments.
pub fn segment_range_strategy(
    segment_size: u32,
    max_segment: u32,
) -> impl Strategy<Value = SegmentRange> {
    let total = u64::from(segment_size) * u64::from(max_segment);
    (0..total)
        .prop_flat_map(move |start| {
            let room = (total - start).min(u64::from(segment_size) * 3);
            (Just(start), 1..=room)
        })
        .prop_map(move |(start, size)| SegmentRange {
            segment: (start / u64::from(segment_size)) as u32,
            offset: (start % u64::from(segment_size)) as u32,
            size: size as u32,
        })
}

/// Strategy for generating journal-array values around the inline limit.
pub fn ja_value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 0..=256),
        prop::collection::vec(any::<u8>(), 257..8192),
    ]
}

/// An operation on a segment, for concurrent access tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentOp {
    /// Write bytes at an offset of a segment.
    Write {
        /// Segment number.
        segment: u32,
        /// Offset in the segment.
        offset: u32,
        /// Bytes to write.
        data: Vec<u8>,
    },
    /// Read bytes at an offset of a segment.
    Read {
        /// Segment number.
        segment: u32,
        /// Offset in the segment.
        offset: u32,
        /// Number of bytes.
        len: u32,
    },
    /// Try to unmap a segment.
    Expire {
        /// Segment number.
        segment: u32,
    },
}

/// Strategy for generating segment operations on 4 KiB segments.
pub fn segment_op_strategy(max_segment: u32) -> impl Strategy<Value = SegmentOp> {
    prop_oneof![
        (0..max_segment, 0u32..4000, prop::collection::vec(any::<u8>(), 1..96)).prop_map(
            |(segment, offset, data)| SegmentOp::Write {
                segment,
                offset,
                data
            }
        ),
        (0..max_segment, 0u32..4000, 1u32..96).prop_map(|(segment, offset, len)| {
            SegmentOp::Read {
                segment,
                offset,
                len,
            }
        }),
        (0..max_segment).prop_map(|segment| SegmentOp::Expire { segment }),
    ]
}
