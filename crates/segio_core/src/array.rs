//! Fixed-width element arrays laid over segments.
//!
//! An object created with [`Io::create_with_array`] reserves, at the front of
//! its caller header, one 8-byte spec per array followed by each array's
//! segment table:
//!
//! ```text
//! | spec 0 | spec 1 | ... | table 0 (u32 x max_n_segments) | table 1 | ... | caller header |
//! ```
//!
//! A spec is `(w_of_element, max_n_segments)`: elements are `1 << w_of_element`
//! bytes. Table entry `k` holds the physical segment backing logical segment
//! `k` of that array, plus one; zero means not allocated yet.

use crate::error::{IoError, IoResult};
use crate::header::HeaderRegion;
use crate::io::{Io, IoFlags};
use crate::layout::{Layout, IO_HEADER_SIZE};
use crate::segment::SegmentGuard;
use crate::IoContext;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::debug;

const SPEC_SIZE: usize = 8;

/// Shape of one array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArraySpec {
    /// Log2 of the element size in bytes.
    pub w_of_element: u32,
    /// Segments the array may grow to.
    pub max_n_segments: u32,
}

impl ArraySpec {
    /// Creates a spec for elements of `1 << w_of_element` bytes.
    #[must_use]
    pub const fn new(w_of_element: u32, max_n_segments: u32) -> Self {
        Self {
            w_of_element,
            max_n_segments,
        }
    }

    /// Returns the element size in bytes.
    #[must_use]
    pub const fn element_size(&self) -> u32 {
        1 << self.w_of_element
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ArrayInfo {
    spec: ArraySpec,
    /// Log2 of the elements per segment.
    elements_shift: u32,
    table_offset: usize,
}

impl ArrayInfo {
    fn element_mask(&self) -> u64 {
        (1u64 << self.elements_shift) - 1
    }
}

/// Bytes the specs and segment tables take in the header.
fn tables_size(specs: &[ArraySpec]) -> u64 {
    specs.iter().fold((SPEC_SIZE * specs.len()) as u64, |acc, spec| {
        acc + 4 * u64::from(spec.max_n_segments)
    })
}

/// Stores array specs in a freshly created header and starts the segment tail.
pub(crate) fn write_specs(header: &HeaderRegion, specs: &[ArraySpec]) {
    let mut at = IO_HEADER_SIZE as usize;
    for spec in specs {
        header.word(at).store(spec.w_of_element, Ordering::Release);
        header.word(at + 4).store(spec.max_n_segments, Ordering::Release);
        at += SPEC_SIZE;
    }
    let raw = header.raw();
    raw.n_arrays.store(specs.len() as u32, Ordering::Release);
    raw.segment_tail.store(1, Ordering::Release);
}

/// Reads the array specs of a header.
///
/// Returns the array descriptors and the header bytes they occupy.
pub(crate) fn load_arrays(
    header: &HeaderRegion,
    layout: &Layout,
    n_arrays: u32,
) -> IoResult<(Vec<ArrayInfo>, usize)> {
    if n_arrays == 0 {
        return Ok((Vec::new(), 0));
    }
    let header_size = u64::from(layout.header_size);
    if (SPEC_SIZE as u64) * u64::from(n_arrays) > header_size {
        return Err(IoError::incompatible_format(format!(
            "{n_arrays} array specs do not fit a {header_size} byte header"
        )));
    }
    let segment_shift = layout.segment_size.trailing_zeros();
    let start = IO_HEADER_SIZE as usize;
    let specs: Vec<ArraySpec> = (0..n_arrays as usize)
        .map(|i| {
            let at = start + i * SPEC_SIZE;
            ArraySpec::new(
                header.word(at).load(Ordering::Acquire),
                header.word(at + 4).load(Ordering::Acquire),
            )
        })
        .collect();

    let total = tables_size(&specs);
    if total > header_size {
        return Err(IoError::incompatible_format(format!(
            "array tables of {total} bytes do not fit a {header_size} byte header"
        )));
    }

    let mut table_offset = start + SPEC_SIZE * specs.len();
    let mut arrays = Vec::with_capacity(specs.len());
    for spec in specs {
        if spec.w_of_element > segment_shift {
            return Err(IoError::incompatible_format(format!(
                "element of {} bytes exceeds segment size {}",
                spec.element_size(),
                layout.segment_size
            )));
        }
        arrays.push(ArrayInfo {
            spec,
            elements_shift: segment_shift - spec.w_of_element,
            table_offset,
        });
        table_offset += 4 * spec.max_n_segments as usize;
    }
    Ok((arrays, total as usize))
}

/// One array element, pinned in memory.
#[derive(Debug)]
pub struct ArrayElement<'a> {
    guard: SegmentGuard<'a>,
    offset: usize,
    len: usize,
    added: bool,
}

impl ArrayElement<'_> {
    /// Returns true if this lookup allocated the element's segment.
    pub fn added(&self) -> bool {
        self.added
    }

    /// Returns the physical segment holding the element.
    pub fn segment(&self) -> u32 {
        self.guard.segment()
    }

    /// Returns the element size in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true for a zero-sized element, which specs cannot describe.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the address of the element.
    pub fn as_ptr(&self) -> *mut u8 {
        self.guard.as_ptr().wrapping_add(self.offset)
    }

    /// Copies the start of the element into `buf`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `buf` is larger than the element.
    pub fn read(&self, buf: &mut [u8]) -> IoResult<()> {
        self.check_len(buf.len())?;
        self.guard.read_at(self.offset, buf)
    }

    /// Overwrites the start of the element with `data`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `data` is larger than the element.
    pub fn write(&self, data: &[u8]) -> IoResult<()> {
        self.check_len(data.len())?;
        self.guard.write_at(self.offset, data)
    }

    fn check_len(&self, len: usize) -> IoResult<()> {
        if len > self.len {
            return Err(IoError::invalid_argument(format!(
                "{len} bytes exceed element size {}",
                self.len
            )));
        }
        Ok(())
    }
}

impl Io {
    /// Creates an io object whose segments are handed out to fixed-width
    /// arrays on demand.
    ///
    /// The object gets one segment per array segment in total and expires by
    /// global tick.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when no array is given or a spec does not fit
    /// the segment size, plus every error of [`Io::create`].
    pub fn create_with_array(
        ctx: &Arc<IoContext>,
        path: impl AsRef<Path>,
        header_size: u32,
        segment_size: u32,
        specs: &[ArraySpec],
    ) -> IoResult<Arc<Self>> {
        if specs.is_empty() {
            return Err(IoError::invalid_argument("at least one array is required"));
        }
        let segment_shift = segment_size.trailing_zeros();
        if let Some(spec) = specs.iter().find(|s| s.w_of_element > segment_shift) {
            return Err(IoError::invalid_argument(format!(
                "element of {} bytes exceeds segment size {segment_size}",
                spec.element_size()
            )));
        }
        let n_segments: u64 = specs.iter().map(|s| u64::from(s.max_n_segments)).sum();
        let n_segments = u32::try_from(n_segments)
            .map_err(|_| IoError::invalid_argument("too many array segments"))?;
        let header_size = u32::try_from(u64::from(header_size) + tables_size(specs))
            .map_err(|_| IoError::invalid_argument("array tables do not fit a header"))?;

        Self::create_inner(
            ctx,
            path.as_ref(),
            header_size,
            segment_size,
            n_segments,
            IoFlags::EXPIRE_GTICK,
            specs,
        )
    }

    /// Returns the number of arrays.
    pub fn n_arrays(&self) -> u32 {
        self.arrays().len() as u32
    }

    /// Returns the spec of an array.
    pub fn array_spec(&self, array: u32) -> Option<ArraySpec> {
        self.arrays().get(array as usize).map(|info| info.spec)
    }

    /// Returns the physical segment backing logical segment `lseg` of an
    /// array, if one is allocated.
    pub fn array_segment(&self, array: u32, lseg: u32) -> Option<u32> {
        let info = self.arrays().get(array as usize)?;
        if lseg >= info.spec.max_n_segments {
            return None;
        }
        match self.table_entry(info, lseg).load(Ordering::Acquire) {
            0 => None,
            entry => Some(entry - 1),
        }
    }

    /// Looks up element `index` of an array.
    ///
    /// When the element's segment is not allocated yet, returns `None` unless
    /// `add` is set, in which case a segment is allocated and the element is
    /// reported as [`added`](ArrayElement::added).
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an unknown array or an index beyond the
    /// array, `NoSpace` when every segment is taken, plus every error of
    /// [`Io::segment`].
    pub fn array_at(&self, array: u32, index: u64, add: bool) -> IoResult<Option<ArrayElement<'_>>> {
        let info = self
            .arrays()
            .get(array as usize)
            .ok_or_else(|| IoError::invalid_argument(format!("unknown array {array}")))?;
        let lseg = index >> info.elements_shift;
        let lseg = u32::try_from(lseg)
            .ok()
            .filter(|&lseg| lseg < info.spec.max_n_segments)
            .ok_or_else(|| {
                IoError::invalid_argument(format!("index {index} is beyond array {array}"))
            })?;

        let entry = self.table_entry(info, lseg);
        let mut added = false;
        let mut pseg = entry.load(Ordering::Acquire);
        if pseg == 0 {
            if !add {
                return Ok(None);
            }
            let _alloc = self.alloc_lock.lock();
            pseg = entry.load(Ordering::Acquire);
            if pseg == 0 {
                pseg = self.alloc_segment_locked();
                if pseg == 0 {
                    return Err(IoError::NoSpace {
                        max_segment: self.layout().max_segment,
                    });
                }
                entry.store(pseg, Ordering::Release);
                added = true;
                debug!(array, lseg, segment = pseg - 1, "allocated array segment");
            }
        }

        let guard = self.segment(pseg - 1)?;
        let offset = ((index & info.element_mask()) << info.spec.w_of_element) as usize;
        Ok(Some(ArrayElement {
            guard,
            offset,
            len: info.spec.element_size() as usize,
            added,
        }))
    }

    /// Hands out a free segment number plus one, or 0 when none is left.
    pub fn segment_alloc(&self) -> u32 {
        let _alloc = self.alloc_lock.lock();
        self.alloc_segment_locked()
    }

    fn alloc_segment_locked(&self) -> u32 {
        let raw = self.header().raw();
        let max_segment = raw.max_segment.load(Ordering::Acquire);
        let tail = raw.segment_tail.load(Ordering::Acquire);
        if tail != 0 {
            if tail > max_segment {
                return 0;
            }
            raw.segment_tail.store(tail + 1, Ordering::Release);
            return tail;
        }

        // Tail lost: rebuild it from the tables.
        let mut used = vec![false; max_segment as usize + 1];
        for info in self.arrays() {
            for lseg in 0..info.spec.max_n_segments {
                let entry = self.table_entry(info, lseg).load(Ordering::Acquire) as usize;
                if let Some(slot) = used.get_mut(entry) {
                    *slot = true;
                }
            }
        }
        match (1..=max_segment).find(|&s| !used[s as usize]) {
            Some(s) => {
                raw.segment_tail.store(s + 1, Ordering::Release);
                s
            }
            None => {
                raw.segment_tail.store(max_segment + 1, Ordering::Release);
                0
            }
        }
    }

    fn table_entry(&self, info: &ArrayInfo, lseg: u32) -> &std::sync::atomic::AtomicU32 {
        self.header().word(info.table_offset + 4 * lseg as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IoConfig;
    use tempfile::tempdir;

    fn ctx() -> Arc<IoContext> {
        IoContext::new(IoConfig::default())
    }

    #[test]
    fn header_holds_specs_and_tables() {
        let dir = tempdir().unwrap();
        let specs = [ArraySpec::new(2, 4), ArraySpec::new(4, 2)];
        let io = Io::create_with_array(&ctx(), dir.path().join("arr"), 32, 4096, &specs).unwrap();

        let info = io.header_info();
        assert_eq!(info.n_arrays, 2);
        assert_eq!(info.max_segment, 6);
        assert_eq!(info.segment_tail, 1);
        assert_eq!(info.header_size, 32 + 16 + 24);
        assert!(io.flags().contains(IoFlags::EXPIRE_GTICK));
        assert_eq!(io.user_header_len(), 32);
        assert_eq!(io.array_spec(1), Some(ArraySpec::new(4, 2)));
    }

    #[test]
    fn lookup_without_add_misses() {
        let dir = tempdir().unwrap();
        let io =
            Io::create_with_array(&ctx(), dir.path().join("arr"), 0, 4096, &[ArraySpec::new(3, 2)])
                .unwrap();
        assert!(io.array_at(0, 0, false).unwrap().is_none());
        assert!(io.array_at(1, 0, true).is_err());
        // 512 elements of 8 bytes per segment, two segments.
        assert!(io.array_at(0, 1024, true).is_err());
    }

    #[test]
    fn elements_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("arr");
        let ctx = ctx();
        {
            let io = Io::create_with_array(&ctx, &path, 0, 4096, &[ArraySpec::new(3, 4)]).unwrap();
            let first = io.array_at(0, 7, true).unwrap().unwrap();
            assert!(first.added());
            assert_eq!(first.len(), 8);
            first.write(&7u64.to_le_bytes()).unwrap();
            drop(first);

            let same_segment = io.array_at(0, 8, true).unwrap().unwrap();
            assert!(!same_segment.added());
            let next_segment = io.array_at(0, 512, true).unwrap().unwrap();
            assert!(next_segment.added());
            next_segment.write(&512u64.to_le_bytes()).unwrap();
            assert_eq!(io.array_segment(0, 1), Some(1));
        }

        let io = Io::open(&ctx, &path).unwrap();
        assert_eq!(io.n_arrays(), 1);
        let mut buf = [0u8; 8];
        io.array_at(0, 7, false).unwrap().unwrap().read(&mut buf).unwrap();
        assert_eq!(u64::from_le_bytes(buf), 7);
        io.array_at(0, 512, false).unwrap().unwrap().read(&mut buf).unwrap();
        assert_eq!(u64::from_le_bytes(buf), 512);
        assert!(io.array_at(0, 1024, false).unwrap().is_none());
    }

    #[test]
    fn allocation_stops_at_capacity() {
        let dir = tempdir().unwrap();
        let io = Io::create_with_array(
            &ctx(),
            dir.path().join("arr"),
            0,
            4096,
            &[ArraySpec::new(12, 2), ArraySpec::new(12, 1)],
        )
        .unwrap();
        io.array_at(0, 0, true).unwrap();
        io.array_at(0, 1, true).unwrap();
        io.array_at(1, 0, true).unwrap();
        assert_eq!(io.segment_alloc(), 0);
    }

    #[test]
    fn lost_tail_is_rebuilt_from_tables() {
        let dir = tempdir().unwrap();
        let io =
            Io::create_with_array(&ctx(), dir.path().join("arr"), 0, 4096, &[ArraySpec::new(12, 4)])
                .unwrap();
        io.array_at(0, 0, true).unwrap();
        io.array_at(0, 1, true).unwrap();
        io.header().raw().segment_tail.store(0, Ordering::Release);

        assert_eq!(io.segment_alloc(), 3);
        assert_eq!(io.header_info().segment_tail, 4);
    }

    #[test]
    fn oversized_element_rejected() {
        let dir = tempdir().unwrap();
        assert!(
            Io::create_with_array(&ctx(), dir.path().join("a"), 0, 4096, &[ArraySpec::new(13, 1)])
                .is_err()
        );
        assert!(Io::create_with_array(&ctx(), dir.path().join("b"), 0, 4096, &[]).is_err());
    }
}
