//! Benchmark utilities.

use rand::Rng;
use segio_core::{Io, IoConfig, IoContext, IoFlags};
use std::sync::Arc;
use tempfile::TempDir;

/// Generate random data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate random segment numbers below `max_segment`.
pub fn random_segments(count: usize, max_segment: u32) -> Vec<u32> {
    let mut rng = rand::thread_rng();
    (0..count).map(|_| rng.gen_range(0..max_segment)).collect()
}

/// Create a file-backed io in a fresh temporary directory.
///
/// The directory must outlive the io.
pub fn file_io(segment_size: u32, max_segment: u32, flags: IoFlags) -> (TempDir, Arc<Io>) {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let ctx = IoContext::new(IoConfig::default());
    let io = Io::create(&ctx, dir.path().join("bench.seg"), 0, segment_size, max_segment, flags)
        .expect("Failed to create io");
    (dir, io)
}
