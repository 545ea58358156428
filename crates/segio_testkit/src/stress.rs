//! Stress tests for SegIO.
//!
//! These drivers hammer segment references, eviction and the header lock
//! from several threads and report what happened.

use segio_core::{Io, IoError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Operations per worker thread.
    pub operations: usize,
    /// Number of worker threads.
    pub threads: usize,
    /// Number of distinct segments touched.
    pub segments: u32,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 2_000,
            threads: 4,
            segments: 8,
        }
    }
}

/// Each worker stamps its own slot in every segment and reads it back.
///
/// A failed operation is either a reference error or a read that did not
/// return what the worker wrote.
pub fn stress_segment_references(io: Arc<Io>, config: &StressConfig) -> StressTestResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let io = Arc::clone(&io);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let config = config.clone();

            thread::spawn(move || {
                for i in 0..config.operations {
                    let segno = (i as u32) % config.segments;
                    let stamp = (i as u64).to_le_bytes();
                    let ok = io.segment(segno).and_then(|seg| {
                        seg.write_at(t * 8, &stamp)?;
                        let mut back = [0u8; 8];
                        seg.read_at(t * 8, &mut back)?;
                        Ok(back == stamp)
                    });
                    match ok {
                        Ok(true) => successful.fetch_add(1, Ordering::Relaxed),
                        _ => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Runs [`stress_segment_references`] while another thread keeps unmapping
/// idle segments. Returns the reference result and the number of unmaps.
pub fn stress_evict_while_referenced(
    io: Arc<Io>,
    config: &StressConfig,
) -> (StressTestResult, usize) {
    let stop = Arc::new(AtomicBool::new(false));
    let evictor = {
        let io = Arc::clone(&io);
        let stop = Arc::clone(&stop);
        let segments = config.segments;
        thread::spawn(move || {
            let mut unmapped = 0usize;
            while !stop.load(Ordering::Relaxed) {
                for segno in 0..segments {
                    match io.seg_expire(segno, 0) {
                        Ok(()) => unmapped += 1,
                        Err(IoError::DeadlockAvoided { .. } | IoError::InvalidArgument { .. }) => {}
                        Err(e) => panic!("unexpected eviction error: {e}"),
                    }
                }
                thread::yield_now();
            }
            unmapped
        })
    };

    let result = stress_segment_references(io, config);
    stop.store(true, Ordering::Relaxed);
    let unmapped = evictor.join().expect("Evictor panicked");
    (result, unmapped)
}

/// Increments a counter under the header lock from every worker.
///
/// Returns the result and the final counter, which equals the successful
/// operation count when the lock excludes properly.
pub fn stress_header_lock(io: Arc<Io>, config: &StressConfig) -> (StressTestResult, usize) {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|_| {
            let io = Arc::clone(&io);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let counter = Arc::clone(&counter);
            let operations = config.operations;

            thread::spawn(move || {
                for _ in 0..operations {
                    if io.lock(-1).is_err() {
                        failed.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                    let v = counter.load(Ordering::Relaxed);
                    thread::yield_now();
                    counter.store(v + 1, Ordering::Relaxed);
                    io.unlock();
                    successful.fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    let result = StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    );
    (result, counter.load(Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestIo;
    use segio_core::{IoConfig, IoFlags};

    fn small_config() -> StressConfig {
        StressConfig {
            operations: 300,
            threads: 4,
            segments: 4,
        }
    }

    #[test]
    fn test_stress_segment_references() {
        let test_io = TestIo::memory();
        let result = stress_segment_references(Arc::clone(&test_io.io), &small_config());
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 1200);
        for segno in 0..4 {
            assert_eq!(test_io.segment_nref(segno), Some(0));
        }
    }

    #[test]
    fn test_stress_evict_while_referenced() {
        let test_io = TestIo::file_with(
            IoConfig::default(),
            0,
            4096,
            8,
            IoFlags::EXPIRE_SEGMENT,
        );
        let (result, _unmapped) =
            stress_evict_while_referenced(Arc::clone(&test_io.io), &small_config());
        assert_eq!(result.failed_ops, 0);
        for segno in 0..4 {
            assert_eq!(test_io.segment_nref(segno), Some(0));
        }
        assert_eq!(test_io.stats().deadlocks(), 0);
    }

    #[test]
    fn test_stress_header_lock() {
        let test_io = TestIo::memory();
        let (result, counter) = stress_header_lock(Arc::clone(&test_io.io), &small_config());
        assert_eq!(result.failed_ops, 0);
        assert_eq!(counter, result.successful_ops);
        assert!(!test_io.is_locked());
    }
}
