//! Segment slots and the reference protocol.
//!
//! Each segment has a slot holding its mapping, a reference count and the
//! tick of its last use. A reference is taken by incrementing the count:
//!
//! - if the previous count carries the exclusive bit, eviction owns the slot
//!   and the caller backs off
//! - if the slot is mapped, the reference is valid
//! - if the slot is unmapped and the previous count was zero, the caller maps
//!   it; any other caller seeing the slot unmapped backs off until it is done
//!
//! Eviction claims a slot by moving its count from zero to the exclusive bit,
//! so a mapping is never released while a reference is outstanding.

use crate::error::{IoError, IoResult};
use crate::io::Io;
use crate::refcount::{Backoff, RefCount, EXCLUSIVE};
use parking_lot::Mutex;
use segio_storage::Mapping;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};
use tracing::{debug, error};

#[derive(Debug, Default)]
pub(crate) struct SegmentSlot {
    pub ptr: AtomicPtr<u8>,
    pub nref: RefCount,
    pub last_tick: AtomicU32,
    mapping: Mutex<Option<Mapping>>,
}

impl SegmentSlot {
    pub fn is_mapped(&self) -> bool {
        !self.ptr.load(Ordering::Acquire).is_null()
    }

    pub fn flush(&self) -> IoResult<()> {
        if let Some(mapping) = self.mapping.lock().as_ref() {
            mapping.flush()?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct SegmentTable {
    slots: Vec<SegmentSlot>,
}

impl SegmentTable {
    pub fn new(n: u32) -> IoResult<Self> {
        let n = n as usize;
        let mut slots = Vec::new();
        slots.try_reserve_exact(n).map_err(|_| IoError::NoMemory {
            requested: n.saturating_mul(std::mem::size_of::<SegmentSlot>()),
        })?;
        slots.resize_with(n, SegmentSlot::default);
        Ok(Self { slots })
    }

    pub fn get(&self, segno: u32) -> Option<&SegmentSlot> {
        self.slots.get(segno as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SegmentSlot> {
        self.slots.iter()
    }
}

/// A live reference to one mapped segment.
///
/// The segment stays mapped until the guard is dropped. Segment memory is
/// shared with every other reference to the same segment and, for file backed
/// objects, with other processes mapping the same file.
pub struct SegmentGuard<'a> {
    io: &'a Io,
    segment: u32,
    ptr: NonNull<u8>,
    len: usize,
}

impl<'a> SegmentGuard<'a> {
    /// Returns the segment number.
    pub fn segment(&self) -> u32 {
        self.segment
    }

    /// Returns the segment size in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true for a zero-sized segment, which cannot be created.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the start of the segment.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Copies bytes out of the segment.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the range exceeds the segment.
    #[allow(unsafe_code)]
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> IoResult<()> {
        self.check_range(offset, buf.len())?;
        // SAFETY: the range lies inside the mapping, which the guard pins.
        unsafe {
            ptr::copy_nonoverlapping(self.ptr.as_ptr().add(offset), buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }

    /// Copies bytes into the segment.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the range exceeds the segment.
    #[allow(unsafe_code)]
    pub fn write_at(&self, offset: usize, data: &[u8]) -> IoResult<()> {
        self.check_range(offset, data.len())?;
        // SAFETY: the range lies inside the mapping, which the guard pins.
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.as_ptr().add(offset), data.len());
        }
        Ok(())
    }

    /// Borrows the segment as a slice.
    ///
    /// # Safety
    ///
    /// No other reference to this segment may write to it while the slice
    /// is alive.
    #[allow(unsafe_code)]
    pub unsafe fn as_slice(&self) -> &[u8] {
        std::slice::from_raw_parts(self.ptr.as_ptr(), self.len)
    }

    /// Borrows the segment as a mutable slice.
    ///
    /// # Safety
    ///
    /// No other reference to this segment may access it while the slice is
    /// alive.
    #[allow(unsafe_code)]
    pub unsafe fn as_mut_slice(&mut self) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len)
    }

    fn check_range(&self, offset: usize, len: usize) -> IoResult<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(IoError::invalid_argument(format!(
                "range {offset}+{len} exceeds segment size {}",
                self.len
            ))),
        }
    }
}

impl Drop for SegmentGuard<'_> {
    fn drop(&mut self) {
        self.io.segment_unref(self.segment);
    }
}

impl std::fmt::Debug for SegmentGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentGuard")
            .field("segment", &self.segment)
            .field("len", &self.len)
            .finish()
    }
}

impl Io {
    /// Pins a segment, mapping it on first use.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a segment beyond `max_segment`,
    /// `DeadlockAvoided` if the segment stays claimed for the whole retry
    /// budget, and storage errors if the segment cannot be mapped.
    pub fn segment(&self, segno: u32) -> IoResult<SegmentGuard<'_>> {
        let ptr = self.segment_ref(segno)?;
        Ok(SegmentGuard {
            io: self,
            segment: segno,
            ptr,
            len: self.layout().segment_size as usize,
        })
    }

    /// Takes a raw reference to a segment.
    ///
    /// Every successful call must be paired with [`Io::segment_unref`];
    /// prefer [`Io::segment`], which does this on drop.
    ///
    /// # Errors
    ///
    /// See [`Io::segment`].
    pub fn segment_ref(&self, segno: u32) -> IoResult<NonNull<u8>> {
        let slot = self.slot(segno)?;
        let config = self.context().config();
        let mut backoff = Backoff::new(config.max_retry, config.retry_wait);
        loop {
            let prev = slot.nref.increment();
            if !RefCount::is_exclusive(prev) {
                if let Some(ptr) = NonNull::new(slot.ptr.load(Ordering::Acquire)) {
                    self.touch(slot);
                    return Ok(ptr);
                }
                if prev == 0 {
                    return match self.map_segment(segno, slot) {
                        Ok(ptr) => {
                            self.touch(slot);
                            Ok(ptr)
                        }
                        Err(e) => {
                            slot.nref.decrement();
                            Err(e)
                        }
                    };
                }
            }
            slot.nref.decrement();
            if let Err(exhausted) = backoff.wait_or_fail() {
                self.stats().record_deadlock();
                error!(
                    path = %self.display_path(),
                    segment = segno,
                    nref = prev,
                    attempts = exhausted.attempts,
                    "deadlock detected while referencing segment"
                );
                return Err(IoError::deadlock_avoided(format!(
                    "segment {segno} stayed busy for {} attempts",
                    exhausted.attempts
                )));
            }
        }
    }

    /// Releases a reference taken with [`Io::segment_ref`].
    pub fn segment_unref(&self, segno: u32) {
        let Some(slot) = self.segments().get(segno) else {
            return;
        };
        if slot.nref.release_shared() {
            self.stats().record_segment_unref();
        } else {
            error!(
                path = %self.display_path(),
                segment = segno,
                "unbalanced segment release"
            );
        }
    }

    /// Returns the number of references currently held on a segment.
    pub fn segment_nref(&self, segno: u32) -> Option<u32> {
        self.segments()
            .get(segno)
            .map(|slot| slot.nref.get() & !EXCLUSIVE)
    }

    /// Returns true if the segment is currently mapped.
    pub fn is_segment_mapped(&self, segno: u32) -> bool {
        self.segments()
            .get(segno)
            .is_some_and(SegmentSlot::is_mapped)
    }

    pub(crate) fn slot(&self, segno: u32) -> IoResult<&SegmentSlot> {
        self.segments().get(segno).ok_or_else(|| {
            IoError::invalid_argument(format!(
                "segment {segno} is out of range (max {})",
                self.layout().max_segment
            ))
        })
    }

    fn touch(&self, slot: &SegmentSlot) {
        let tick = self.context().tick();
        slot.last_tick.store(tick, Ordering::Relaxed);
        self.last_tick.store(tick, Ordering::Relaxed);
        self.stats().record_segment_ref();
    }

    /// Maps an unmapped segment. The caller holds the only reference.
    fn map_segment(&self, segno: u32, slot: &SegmentSlot) -> IoResult<NonNull<u8>> {
        let layout = *self.layout();
        let segment_size = layout.segment_size as usize;
        let mapping = match self.files() {
            None => self.context().file_system().map_anonymous(segment_size)?,
            Some(files) => {
                let loc = layout.locate(segno, 0);
                let (shard, created) = files.get_or_open(loc.shard)?;
                let mapped = shard
                    .ensure_size(loc.pos + segment_size as u64)
                    .and_then(|()| shard.map(loc.pos, segment_size));
                match mapped {
                    Ok(mapping) => mapping,
                    Err(e) => {
                        drop(shard);
                        if created {
                            files.discard(loc.shard);
                        }
                        return Err(e.into());
                    }
                }
            }
        };
        let ptr = NonNull::new(mapping.as_ptr())
            .ok_or_else(|| IoError::invalid_operation("mapping returned a null address"))?;

        *slot.mapping.lock() = Some(mapping);
        slot.ptr.store(ptr.as_ptr(), Ordering::Release);

        self.nmaps.fetch_add(1, Ordering::AcqRel);
        self.max_map_seg.fetch_max(segno, Ordering::AcqRel);
        self.header()
            .raw()
            .curr_size
            .fetch_max(layout.end_of_segment(segno), Ordering::AcqRel);
        self.stats().record_map();
        debug!(path = %self.display_path(), segment = segno, "mapped segment");
        Ok(ptr)
    }

    /// Unmaps a slot the caller has claimed exclusively.
    ///
    /// Returns false if the slot was not mapped.
    pub(crate) fn unmap_claimed(&self, segno: u32, slot: &SegmentSlot) -> bool {
        debug_assert!(RefCount::is_exclusive(slot.nref.get()));
        let old = slot.ptr.swap(ptr::null_mut(), Ordering::AcqRel);
        if old.is_null() {
            return false;
        }
        drop(slot.mapping.lock().take());
        slot.last_tick.store(self.context().tick(), Ordering::Relaxed);
        self.nmaps.fetch_sub(1, Ordering::AcqRel);
        self.stats().record_unmap();
        debug!(path = %self.display_path(), segment = segno, "unmapped segment");
        true
    }
}
