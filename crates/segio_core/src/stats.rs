//! Io statistics.
//!
//! Every [`Io`](crate::Io) keeps a set of atomic counters describing mapping
//! churn, segment references, window and journal traffic, and lock contention.
//!
//! # Usage
//!
//! ```rust,ignore
//! let io = Io::create(&ctx, "data.seg", 0, 1 << 16, 64, IoFlags::EXPIRE_SEGMENT)?;
//! let _seg = io.segment(0)?;
//!
//! let stats = io.stats();
//! println!("maps: {}", stats.maps());
//! println!("collisions: {}", stats.lock_collisions());
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Io statistics and metrics.
///
/// All counters are atomic and can be read while operations are in progress.
#[derive(Debug, Default)]
pub struct IoStats {
    // Mapping counters
    /// Segments mapped.
    maps: AtomicU64,
    /// Segments unmapped by eviction.
    unmaps: AtomicU64,
    /// Expiration passes run.
    sweeps: AtomicU64,

    // Reference counters
    /// Successful segment references.
    segment_refs: AtomicU64,
    /// Segment references released.
    segment_unrefs: AtomicU64,
    /// References that gave up after exhausting their retry budget.
    deadlocks: AtomicU64,

    // Window counters
    /// Windows mapped.
    windows: AtomicU64,
    /// Windows that needed a staging buffer.
    staged_windows: AtomicU64,

    // Journal counters
    /// Journal records read.
    ja_reads: AtomicU64,
    /// Journal records written.
    ja_writes: AtomicU64,
    /// Journal bytes read, record heads included.
    bytes_read: AtomicU64,
    /// Journal bytes written, record heads included.
    bytes_written: AtomicU64,

    // Lock counters
    /// Calls to `lock`.
    lock_calls: AtomicU64,
    /// Failed lock attempts.
    lock_collisions: AtomicU64,
    /// Lock calls that timed out.
    lock_timeouts: AtomicU64,
}

impl IoStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    // === Increment methods (internal use) ===

    pub(crate) fn record_map(&self) {
        self.maps.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unmap(&self) {
        self.unmaps.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sweep(&self) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_segment_ref(&self) {
        self.segment_refs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_segment_unref(&self) {
        self.segment_unrefs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_deadlock(&self) {
        self.deadlocks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_window(&self, staged: bool) {
        self.windows.fetch_add(1, Ordering::Relaxed);
        if staged {
            self.staged_windows.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_ja_read(&self, bytes: u64) {
        self.ja_reads.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_ja_write(&self, bytes: u64) {
        self.ja_writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_lock_call(&self) {
        self.lock_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a lock collision and returns the running total.
    pub(crate) fn record_lock_collision(&self) -> u64 {
        self.lock_collisions.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn record_lock_timeout(&self) {
        self.lock_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    // === Getter methods (public API) ===

    /// Returns the number of segments mapped.
    pub fn maps(&self) -> u64 {
        self.maps.load(Ordering::Relaxed)
    }

    /// Returns the number of segments unmapped by eviction.
    pub fn unmaps(&self) -> u64 {
        self.unmaps.load(Ordering::Relaxed)
    }

    /// Returns the number of expiration passes run on this object.
    pub fn sweeps(&self) -> u64 {
        self.sweeps.load(Ordering::Relaxed)
    }

    /// Returns the number of successful segment references.
    pub fn segment_refs(&self) -> u64 {
        self.segment_refs.load(Ordering::Relaxed)
    }

    /// Returns the number of released segment references.
    pub fn segment_unrefs(&self) -> u64 {
        self.segment_unrefs.load(Ordering::Relaxed)
    }

    /// Returns the number of references that reported a deadlock.
    pub fn deadlocks(&self) -> u64 {
        self.deadlocks.load(Ordering::Relaxed)
    }

    /// Returns the number of windows mapped.
    pub fn windows(&self) -> u64 {
        self.windows.load(Ordering::Relaxed)
    }

    /// Returns the number of windows that used a staging buffer.
    pub fn staged_windows(&self) -> u64 {
        self.staged_windows.load(Ordering::Relaxed)
    }

    /// Returns the number of journal records read.
    pub fn ja_reads(&self) -> u64 {
        self.ja_reads.load(Ordering::Relaxed)
    }

    /// Returns the number of journal records written.
    pub fn ja_writes(&self) -> u64 {
        self.ja_writes.load(Ordering::Relaxed)
    }

    /// Returns the journal bytes read.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    /// Returns the journal bytes written.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Returns the number of `lock` calls.
    pub fn lock_calls(&self) -> u64 {
        self.lock_calls.load(Ordering::Relaxed)
    }

    /// Returns the number of failed lock attempts.
    ///
    /// A high ratio of collisions to calls means writers are fighting
    /// over the header lock.
    pub fn lock_collisions(&self) -> u64 {
        self.lock_collisions.load(Ordering::Relaxed)
    }

    /// Returns the number of lock calls that timed out.
    pub fn lock_timeouts(&self) -> u64 {
        self.lock_timeouts.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> IoStatsSnapshot {
        IoStatsSnapshot {
            maps: self.maps(),
            unmaps: self.unmaps(),
            sweeps: self.sweeps(),
            segment_refs: self.segment_refs(),
            segment_unrefs: self.segment_unrefs(),
            deadlocks: self.deadlocks(),
            windows: self.windows(),
            staged_windows: self.staged_windows(),
            ja_reads: self.ja_reads(),
            ja_writes: self.ja_writes(),
            bytes_read: self.bytes_read(),
            bytes_written: self.bytes_written(),
            lock_calls: self.lock_calls(),
            lock_collisions: self.lock_collisions(),
            lock_timeouts: self.lock_timeouts(),
        }
    }
}

/// A point-in-time snapshot of io statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IoStatsSnapshot {
    /// Segments mapped.
    pub maps: u64,
    /// Segments unmapped by eviction.
    pub unmaps: u64,
    /// Expiration passes run.
    pub sweeps: u64,
    /// Successful segment references.
    pub segment_refs: u64,
    /// Segment references released.
    pub segment_unrefs: u64,
    /// References that reported a deadlock.
    pub deadlocks: u64,
    /// Windows mapped.
    pub windows: u64,
    /// Windows that used a staging buffer.
    pub staged_windows: u64,
    /// Journal records read.
    pub ja_reads: u64,
    /// Journal records written.
    pub ja_writes: u64,
    /// Journal bytes read.
    pub bytes_read: u64,
    /// Journal bytes written.
    pub bytes_written: u64,
    /// Calls to `lock`.
    pub lock_calls: u64,
    /// Failed lock attempts.
    pub lock_collisions: u64,
    /// Lock calls that timed out.
    pub lock_timeouts: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        let stats = IoStats::new();
        assert_eq!(stats.maps(), 0);
        assert_eq!(stats.segment_refs(), 0);
        assert_eq!(stats.lock_collisions(), 0);
    }

    #[test]
    fn record_journal_traffic() {
        let stats = IoStats::new();

        stats.record_ja_write(108);
        stats.record_ja_write(8);
        stats.record_ja_read(108);

        assert_eq!(stats.ja_writes(), 2);
        assert_eq!(stats.bytes_written(), 116);
        assert_eq!(stats.ja_reads(), 1);
        assert_eq!(stats.bytes_read(), 108);
    }

    #[test]
    fn collisions_return_running_total() {
        let stats = IoStats::new();
        assert_eq!(stats.record_lock_collision(), 1);
        assert_eq!(stats.record_lock_collision(), 2);
    }

    #[test]
    fn snapshot() {
        let stats = IoStats::new();
        stats.record_map();
        stats.record_window(true);
        stats.record_window(false);

        let snap = stats.snapshot();
        assert_eq!(snap.maps, 1);
        assert_eq!(snap.windows, 2);
        assert_eq!(snap.staged_windows, 1);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(IoStats::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let s = Arc::clone(&stats);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    s.record_segment_ref();
                    s.record_segment_unref();
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(stats.segment_refs(), 1000);
        assert_eq!(stats.segment_unrefs(), 1000);
    }
}
