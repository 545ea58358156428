//! Fault injection for shard files.
//!
//! [`FaultyFileSystem`] wraps another file system, counts the operations the
//! io layer performs and fails chosen ones on demand. Use it to check that
//! failed mappings release their references and remove the shards they
//! created.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use segio_testkit::faults::FaultyFileSystem;
//!
//! let fs = FaultyFileSystem::os();
//! let ctx = IoContext::with_file_system(IoConfig::default(), fs.clone());
//! fs.fail_maps_after(0);
//! assert!(io.segment(0).is_err());
//! ```

use segio_storage::{
    FileSystem, Mapping, OpenMode, OsFileSystem, ShardBackend, StorageError, StorageResult,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct FaultState {
    opens: AtomicUsize,
    maps: AtomicUsize,
    fail_maps_after: AtomicUsize,
    fail_opens: AtomicBool,
    fail_syncs: AtomicBool,
}

impl FaultState {
    fn injected(op: &'static str, path: &Path) -> StorageError {
        StorageError::file(op, path, io::Error::other("injected fault"))
    }
}

/// A file system wrapper that counts and fails operations.
#[derive(Debug)]
pub struct FaultyFileSystem {
    inner: Arc<dyn FileSystem>,
    state: Arc<FaultState>,
}

impl FaultyFileSystem {
    /// Wraps `inner`.
    pub fn new(inner: Arc<dyn FileSystem>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            state: Arc::new(FaultState {
                opens: AtomicUsize::new(0),
                maps: AtomicUsize::new(0),
                fail_maps_after: AtomicUsize::new(usize::MAX),
                fail_opens: AtomicBool::new(false),
                fail_syncs: AtomicBool::new(false),
            }),
        })
    }

    /// Wraps the operating system's file system.
    pub fn os() -> Arc<Self> {
        Self::new(OsFileSystem::shared())
    }

    /// Makes every file mapping after the next `n` fail.
    pub fn fail_maps_after(&self, n: usize) {
        let done = self.state.maps.load(Ordering::SeqCst);
        self.state
            .fail_maps_after
            .store(done.saturating_add(n), Ordering::SeqCst);
    }

    /// Sets whether opening files fails.
    pub fn set_fail_opens(&self, fail: bool) {
        self.state.fail_opens.store(fail, Ordering::SeqCst);
    }

    /// Sets whether syncing files fails.
    pub fn set_fail_syncs(&self, fail: bool) {
        self.state.fail_syncs.store(fail, Ordering::SeqCst);
    }

    /// Clears every injected fault.
    pub fn reset(&self) {
        self.state.fail_maps_after.store(usize::MAX, Ordering::SeqCst);
        self.state.fail_opens.store(false, Ordering::SeqCst);
        self.state.fail_syncs.store(false, Ordering::SeqCst);
    }

    /// Returns the number of files opened.
    pub fn opens(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    /// Returns the number of file mappings attempted.
    pub fn maps(&self) -> usize {
        self.state.maps.load(Ordering::SeqCst)
    }
}

impl FileSystem for FaultyFileSystem {
    fn open(&self, path: &Path, mode: OpenMode) -> StorageResult<Arc<dyn ShardBackend>> {
        if self.state.fail_opens.load(Ordering::SeqCst) {
            return Err(FaultState::injected("open", path));
        }
        let inner = self.inner.open(path, mode)?;
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FaultyShard {
            inner,
            state: Arc::clone(&self.state),
        }))
    }

    fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path)
    }

    fn file_len(&self, path: &Path) -> StorageResult<u64> {
        self.inner.file_len(path)
    }

    fn remove(&self, path: &Path) -> StorageResult<()> {
        self.inner.remove(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> StorageResult<()> {
        self.inner.rename(from, to)
    }

    fn map_anonymous(&self, len: usize) -> StorageResult<Mapping> {
        self.inner.map_anonymous(len)
    }
}

#[derive(Debug)]
struct FaultyShard {
    inner: Arc<dyn ShardBackend>,
    state: Arc<FaultState>,
}

impl ShardBackend for FaultyShard {
    fn path(&self) -> &Path {
        self.inner.path()
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> StorageResult<()> {
        self.inner.read_at(offset, buf)
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> StorageResult<()> {
        self.inner.write_at(offset, data)
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn ensure_size(&self, size: u64) -> StorageResult<()> {
        self.inner.ensure_size(size)
    }

    fn map(&self, offset: u64, len: usize) -> StorageResult<Mapping> {
        let n = self.state.maps.fetch_add(1, Ordering::SeqCst);
        if n >= self.state.fail_maps_after.load(Ordering::SeqCst) {
            return Err(StorageError::Map {
                path: PathBuf::from(self.inner.path()),
                offset,
                len,
                source: io::Error::other("injected fault"),
            });
        }
        self.inner.map(offset, len)
    }

    fn sync(&self) -> StorageResult<()> {
        if self.state.fail_syncs.load(Ordering::SeqCst) {
            return Err(FaultState::injected("sync", self.inner.path()));
        }
        self.inner.sync()
    }
}
