//! Unmapping idle segments.
//!
//! Eviction never waits for a segment in use: it claims an idle segment by
//! moving its reference count from zero to the exclusive bit, unmaps it and
//! drops the claim. Busy segments are skipped.

use crate::error::{IoError, IoResult};
use crate::io::{Io, IoFlags};
use crate::refcount::Backoff;
use crate::segment::SegmentSlot;
use std::sync::atomic::Ordering;
use tracing::{debug, error};

/// How an io object chooses segments to unmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpirePolicy {
    /// Unmap every idle segment once the whole object has gone unused for
    /// more than the threshold.
    Tick,
    /// Unmap idle segments from the highest mapped one down, up to a limit.
    Segment,
    /// Unmap idle segments individually unused for more than the threshold,
    /// up to a limit.
    TickAndSegment,
}

impl ExpirePolicy {
    /// Returns the policy selected by `flags`, if any.
    pub fn from_flags(flags: IoFlags) -> Option<Self> {
        match (
            flags.contains(IoFlags::EXPIRE_GTICK),
            flags.contains(IoFlags::EXPIRE_SEGMENT),
        ) {
            (true, false) => Some(Self::Tick),
            (false, true) => Some(Self::Segment),
            (true, true) => Some(Self::TickAndSegment),
            (false, false) => None,
        }
    }
}

impl Io {
    /// Unmaps one segment, waiting up to `nretry` attempts for it to go idle.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the segment is out of range or not
    /// mapped, and `DeadlockAvoided` if it stays in use.
    pub fn seg_expire(&self, segno: u32, nretry: u32) -> IoResult<()> {
        let slot = self.slot(segno)?;
        if !slot.is_mapped() {
            return Err(IoError::invalid_argument(format!(
                "segment {segno} is not mapped"
            )));
        }
        let config = self.context().config();
        let mut backoff = Backoff::new(nretry.min(config.max_retry), config.retry_wait);
        loop {
            if slot.nref.try_claim_exclusive() {
                let unmapped = self.unmap_claimed(segno, slot);
                slot.nref.release_exclusive();
                return if unmapped {
                    Ok(())
                } else {
                    Err(IoError::invalid_argument(format!(
                        "segment {segno} is not mapped"
                    )))
                };
            }
            if let Err(exhausted) = backoff.wait_or_fail() {
                if exhausted.attempts >= config.max_retry {
                    error!(
                        path = %self.display_path(),
                        segment = segno,
                        nref = slot.nref.get(),
                        "deadlock detected in seg_expire"
                    );
                }
                return Err(IoError::deadlock_avoided(format!(
                    "segment {segno} stayed in use for {} attempts",
                    exhausted.attempts
                )));
            }
        }
    }

    /// Unmaps idle segments according to the object's expire policy.
    ///
    /// `count_thresh` is the number of ticks a segment (or, for the tick
    /// policy, the whole object) must have gone unused; `limit` caps the
    /// number of segments unmapped by the segment policies. Returns the
    /// number of segments unmapped.
    pub fn expire(&self, count_thresh: u32, limit: u32) -> u32 {
        let Some(policy) = ExpirePolicy::from_flags(self.flags()) else {
            return 0;
        };
        self.stats().record_sweep();
        let before = self.n_mapped_segments();
        let tick = self.context().tick();
        let mut n = 0;
        match policy {
            ExpirePolicy::Tick => {
                let idle = tick.wrapping_sub(self.last_tick.load(Ordering::Relaxed));
                if idle > count_thresh {
                    for segno in 0..=self.max_mapped_segment() {
                        if self.try_evict(segno, |_| true) {
                            n += 1;
                        }
                    }
                }
            }
            ExpirePolicy::Segment => {
                let mut segno = self.max_mapped_segment();
                while n < limit && segno > 0 {
                    if self.try_evict(segno, |_| true) {
                        n += 1;
                    }
                    segno -= 1;
                }
            }
            ExpirePolicy::TickAndSegment => {
                let stale = |slot: &SegmentSlot| {
                    tick.wrapping_sub(slot.last_tick.load(Ordering::Relaxed)) > count_thresh
                };
                let mut segno = 0;
                while n < limit && segno <= self.max_mapped_segment() {
                    if self.try_evict(segno, stale) {
                        n += 1;
                    }
                    segno += 1;
                }
            }
        }
        if n > 0 {
            debug!(
                path = %self.display_path(),
                tick,
                max_mapped = self.max_mapped_segment(),
                expired = n,
                mapped_before = before,
                "expired segments"
            );
        }
        n
    }

    /// Unmaps a segment if it is mapped, idle and passes `eligible`.
    fn try_evict(&self, segno: u32, eligible: impl FnOnce(&SegmentSlot) -> bool) -> bool {
        let Some(slot) = self.segments().get(segno) else {
            return false;
        };
        if !slot.is_mapped() || !eligible(slot) || !slot.nref.try_claim_exclusive() {
            return false;
        }
        let unmapped = self.unmap_claimed(segno, slot);
        slot.nref.release_exclusive();
        unmapped
    }
}
