//! Test fixtures and io helpers.
//!
//! Provides convenience functions for setting up io objects in temporary
//! directories.

use segio_core::{Io, IoConfig, IoContext, IoFlags};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use tempfile::TempDir;

/// Segment size used by the fixtures.
pub const TEST_SEGMENT_SIZE: u32 = 1 << 16;

/// Segment count used by the fixtures.
pub const TEST_MAX_SEGMENT: u32 = 64;

/// An io object with automatic cleanup.
pub struct TestIo {
    /// The io instance.
    pub io: Arc<Io>,
    /// The context the io belongs to.
    pub ctx: Arc<IoContext>,
    path: Option<PathBuf>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestIo {
    /// Creates a temporary (anonymous memory) io.
    pub fn memory() -> Self {
        let ctx = IoContext::new(IoConfig::default());
        let io = Io::create_temporary(&ctx, 0, TEST_SEGMENT_SIZE, TEST_MAX_SEGMENT, IoFlags::empty())
            .expect("Failed to create temporary io");
        Self {
            io,
            ctx,
            path: None,
            _temp_dir: None,
        }
    }

    /// Creates a file-backed io with default geometry.
    pub fn file() -> Self {
        Self::file_with(
            IoConfig::default(),
            0,
            TEST_SEGMENT_SIZE,
            TEST_MAX_SEGMENT,
            IoFlags::EXPIRE_SEGMENT,
        )
    }

    /// Creates a file-backed io with custom configuration and geometry.
    pub fn file_with(
        config: IoConfig,
        header_size: u32,
        segment_size: u32,
        max_segment: u32,
        flags: IoFlags,
    ) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("test.seg");
        let ctx = IoContext::new(config);
        let io = Io::create(&ctx, &path, header_size, segment_size, max_segment, flags)
            .expect("Failed to create io");
        Self {
            io,
            ctx,
            path: Some(path),
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the base path if file-backed, None if temporary.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Drops the io and opens the file again in the same context.
    pub fn reopen(&mut self) {
        let path = self.path.clone().expect("Temporary io cannot be reopened");
        let placeholder = Io::create_temporary(&self.ctx, 0, 4096, 1, IoFlags::empty())
            .expect("Failed to create placeholder io");
        let old = std::mem::replace(&mut self.io, placeholder);
        old.close().expect("Io still shared at reopen");
        self.io = Io::open(&self.ctx, &path).expect("Failed to reopen io");
    }
}

impl std::ops::Deref for TestIo {
    type Target = Io;

    fn deref(&self) -> &Self::Target {
        &self.io
    }
}

/// Runs a test with a temporary anonymous-memory io.
///
/// # Example
///
/// ```rust,ignore
/// use segio_testkit::with_temp_io;
///
/// #[test]
/// fn my_test() {
///     with_temp_io(|io| {
///         io.segment(0).unwrap();
///     });
/// }
/// ```
pub fn with_temp_io<F, R>(f: F) -> R
where
    F: FnOnce(&Io) -> R,
{
    let test_io = TestIo::memory();
    f(&test_io.io)
}

/// Runs a test with a file-backed io in a temporary directory.
pub fn with_file_io<F, R>(f: F) -> R
where
    F: FnOnce(&Io, &Path) -> R,
{
    let test_io = TestIo::file();
    let path = test_io.path().expect("File io should have a path").to_path_buf();
    f(&test_io.io, &path)
}

/// Installs a test log subscriber honouring `RUST_LOG`. Safe to call often.
pub fn init_test_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_io() {
        with_temp_io(|io| {
            assert!(io.is_temporary());
            io.segment(0).unwrap().write_at(0, b"x").unwrap();
        });
    }

    #[test]
    fn test_file_io() {
        with_file_io(|io, path| {
            assert_eq!(io.path(), Some(path));
            assert!(path.exists());
        });
    }

    #[test]
    fn test_reopen_keeps_data() {
        init_test_logging();
        let mut test_io = TestIo::file();
        test_io.segment(2).unwrap().write_at(10, b"persist").unwrap();
        test_io.reopen();

        let mut buf = [0u8; 7];
        test_io.segment(2).unwrap().read_at(10, &mut buf).unwrap();
        assert_eq!(&buf, b"persist");
    }
}
