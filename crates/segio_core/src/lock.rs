//! The header lock.
//!
//! A counter in the mapped header serializes writers of an io object. It
//! lives in the file mapping, so it is shared by every handle and every
//! process that maps the same file.

use crate::error::{IoError, IoResult};
use crate::io::Io;
use std::sync::atomic::Ordering;
use std::thread;
use tracing::{info, warn};

/// Collisions between two contention summaries.
const COLLISION_LOG_INTERVAL: u64 = 1_000_000;

impl Io {
    /// Takes the header lock.
    ///
    /// `timeout` is a retry count: 0 tries once, a positive value retries
    /// that many times sleeping `lock_wait` between attempts, and a negative
    /// value waits without bound.
    ///
    /// # Errors
    ///
    /// Returns `DeadlockAvoided` when the retries run out.
    pub fn lock(&self, timeout: i32) -> IoResult<()> {
        let stats = self.stats();
        let config = self.context().config();
        let lock = &self.header().raw().lock;
        stats.record_lock_call();

        let mut count: u64 = 0;
        loop {
            if lock.fetch_add(1, Ordering::AcqRel) == 0 {
                return Ok(());
            }
            lock.fetch_sub(1, Ordering::AcqRel);

            if count == u64::from(config.lock_log_border) {
                info!(
                    path = %self.display_path(),
                    collisions = stats.lock_collisions(),
                    calls = stats.lock_calls(),
                    "lock failed {count} times"
                );
            }
            if timeout == 0 || (timeout > 0 && count >= timeout as u64) {
                stats.record_lock_timeout();
                warn!(
                    path = %self.display_path(),
                    timeout,
                    collisions = stats.lock_collisions(),
                    calls = stats.lock_calls(),
                    "[DB Locked] time out"
                );
                return Err(IoError::deadlock_avoided(format!(
                    "lock on <{}> timed out after {count} retries",
                    self.display_path()
                )));
            }
            let collisions = stats.record_lock_collision();
            if collisions % COLLISION_LOG_INTERVAL == 0 {
                info!(
                    path = %self.display_path(),
                    collisions,
                    calls = stats.lock_calls(),
                    "lock collisions"
                );
            }
            thread::sleep(config.lock_wait);
            count += 1;
        }
    }

    /// Releases the header lock.
    pub fn unlock(&self) {
        let lock = &self.header().raw().lock;
        let released = lock
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_sub(1))
            .is_ok();
        if !released {
            warn!(path = %self.display_path(), "unlock without lock");
        }
    }

    /// Forces the lock word back to zero, e.g. after a holder crashed.
    pub fn clear_lock(&self) {
        self.header().raw().lock.store(0, Ordering::Release);
    }

    /// Returns the raw lock word; non-zero means held.
    pub fn lock_count(&self) -> u32 {
        self.header().raw().lock.load(Ordering::Acquire)
    }

    /// Returns true if the lock is held.
    pub fn is_locked(&self) -> bool {
        self.lock_count() != 0
    }
}
