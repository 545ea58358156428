//! Segment reference counts and bounded retry.
//!
//! A segment's count holds the number of live references in its low bits.
//! The high bit marks an exclusive claim taken by eviction: while it is set
//! nobody may start using the segment, and it can only be set while the count
//! is zero.

use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

/// High bit of a reference count: the segment is being evicted.
pub(crate) const EXCLUSIVE: u32 = 0x8000_0000;

/// Attempts spent yielding before a backoff starts sleeping.
const SPIN_ATTEMPTS: u32 = 8;

#[derive(Debug, Default)]
pub(crate) struct RefCount(AtomicU32);

impl RefCount {
    /// Adds a reference and returns the previous value.
    pub fn increment(&self) -> u32 {
        self.0.fetch_add(1, Ordering::AcqRel)
    }

    /// Drops a reference and returns the previous value.
    pub fn decrement(&self) -> u32 {
        self.0.fetch_sub(1, Ordering::AcqRel)
    }

    /// Drops a reference unless none is held.
    ///
    /// Returns false for an unbalanced release, leaving the count untouched.
    pub fn release_shared(&self) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                (v & !EXCLUSIVE != 0).then(|| v - 1)
            })
            .is_ok()
    }

    /// Claims the segment exclusively if nobody references it.
    pub fn try_claim_exclusive(&self) -> bool {
        self.0
            .compare_exchange(0, EXCLUSIVE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Releases an exclusive claim taken with [`Self::try_claim_exclusive`].
    pub fn release_exclusive(&self) {
        self.0.fetch_sub(EXCLUSIVE, Ordering::AcqRel);
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    /// Returns true if `value` carries an exclusive claim.
    pub const fn is_exclusive(value: u32) -> bool {
        value & EXCLUSIVE != 0
    }
}

/// The retry budget of a [`Backoff`] is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Exhausted {
    pub attempts: u32,
}

/// Bounded wait between attempts at a contended operation.
///
/// The first few waits yield the thread; later ones sleep for `wait`.
#[derive(Debug)]
pub(crate) struct Backoff {
    attempts: u32,
    limit: u32,
    wait: Duration,
}

impl Backoff {
    pub fn new(limit: u32, wait: Duration) -> Self {
        Self {
            attempts: 0,
            limit,
            wait,
        }
    }

    #[cfg(test)]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Waits before the next attempt, or reports that the budget is spent.
    pub fn wait_or_fail(&mut self) -> Result<(), Exhausted> {
        if self.attempts >= self.limit {
            return Err(Exhausted {
                attempts: self.attempts,
            });
        }
        self.attempts += 1;
        if self.attempts <= SPIN_ATTEMPTS {
            thread::yield_now();
        } else {
            thread::sleep(self.wait);
        }
        Ok(())
    }
}
