//! File-based shard backend for persistent storage.

use crate::backend::{FileSystem, OpenMode, ShardBackend};
use crate::error::{StorageError, StorageResult};
use crate::mapping::Mapping;
use memmap2::MmapOptions;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// A file-based shard backend.
///
/// Reads and writes are positioned (`pread`/`pwrite` on Unix, `seek_read` /
/// `seek_write` on Windows), so a single handle can be shared by any number
/// of threads without a cursor lock. Only file growth is serialized, which
/// keeps two concurrent `ensure_size` calls from shrinking each other's
/// mapped tail.
///
/// # Example
///
/// ```no_run
/// use segio_storage::{FileBackend, OpenMode, ShardBackend};
/// use std::path::Path;
///
/// let shard = FileBackend::open(Path::new("data.seg"), OpenMode::OpenOrCreate).unwrap();
/// shard.ensure_size(4096).unwrap();
/// let map = shard.map(0, 4096).unwrap();
/// assert_eq!(map.len(), 4096);
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: File,
    grow: Mutex<()>,
}

impl FileBackend {
    /// Opens a shard file in the given mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path, mode: OpenMode) -> StorageResult<Self> {
        let mut options = OpenOptions::new();
        options.read(true).write(true);
        match mode {
            OpenMode::CreateNew => {
                options.create_new(true);
            }
            OpenMode::OpenOrCreate => {
                options.create(true).truncate(false);
            }
            OpenMode::OpenExisting => {}
        }

        let existed = mode == OpenMode::OpenOrCreate && path.exists();
        let file = options
            .open(path)
            .map_err(|e| StorageError::file("open", path, e))?;

        match mode {
            OpenMode::CreateNew => info!(path = %path.display(), "[io][open] create new file"),
            OpenMode::OpenOrCreate if !existed => {
                info!(path = %path.display(), "[io][open] create new file because it doesn't exist");
            }
            _ => {}
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            grow: Mutex::new(()),
        })
    }
}

impl ShardBackend for FileBackend {
    fn path(&self) -> &Path {
        &self.path
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> StorageResult<()> {
        if buf.is_empty() {
            return Ok(());
        }
        read_exact_at(&self.file, buf, offset).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                StorageError::ShortRead {
                    path: self.path.clone(),
                    offset,
                    len: buf.len(),
                }
            } else {
                StorageError::file("pread", &self.path, e)
            }
        })
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> StorageResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        write_all_at(&self.file, data, offset).map_err(|e| StorageError::file("pwrite", &self.path, e))
    }

    fn size(&self) -> StorageResult<u64> {
        let metadata = self
            .file
            .metadata()
            .map_err(|e| StorageError::file("fstat", &self.path, e))?;
        Ok(metadata.len())
    }

    fn ensure_size(&self, size: u64) -> StorageResult<()> {
        let _guard = self.grow.lock();
        if self.size()? < size {
            self.file
                .set_len(size)
                .map_err(|e| StorageError::file("ftruncate", &self.path, e))?;
        }
        Ok(())
    }

    fn map(&self, offset: u64, len: usize) -> StorageResult<Mapping> {
        // SAFETY: the region lies inside the file (callers grow it first) and
        // the file is only ever extended, never truncated, while open. Other
        // processes sharing the file observe the same bytes, which is the
        // intended shared-memory behavior.
        #[allow(unsafe_code)]
        let mmap = unsafe { MmapOptions::new().offset(offset).len(len).map_mut(&self.file) };
        let mmap = mmap.map_err(|source| StorageError::Map {
            path: self.path.clone(),
            offset,
            len,
            source,
        })?;
        Ok(Mapping::from_mmap(mmap))
    }

    fn sync(&self) -> StorageResult<()> {
        self.file
            .sync_all()
            .map_err(|e| StorageError::file("fsync", &self.path, e))
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(unix)]
fn write_all_at(file: &File, data: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(data, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(windows)]
fn write_all_at(file: &File, mut data: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !data.is_empty() {
        match file.seek_write(data, offset) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => {
                data = &data[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// The operating system file system.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFileSystem;

impl OsFileSystem {
    /// Creates a handle to the OS file system.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Returns a shared handle suitable for injecting into an io context.
    #[must_use]
    pub fn shared() -> Arc<dyn FileSystem> {
        Arc::new(Self)
    }
}

impl FileSystem for OsFileSystem {
    fn open(&self, path: &Path, mode: OpenMode) -> StorageResult<Arc<dyn ShardBackend>> {
        Ok(Arc::new(FileBackend::open(path, mode)?))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn file_len(&self, path: &Path) -> StorageResult<u64> {
        let metadata = fs::metadata(path).map_err(|e| StorageError::file("stat", path, e))?;
        Ok(metadata.len())
    }

    fn remove(&self, path: &Path) -> StorageResult<()> {
        fs::remove_file(path).map_err(|e| StorageError::file("unlink", path, e))
    }

    fn rename(&self, from: &Path, to: &Path) -> StorageResult<()> {
        fs::rename(from, to).map_err(|e| StorageError::file("rename", from, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.seg");

        let shard = FileBackend::open(&path, OpenMode::CreateNew).unwrap();
        assert_eq!(shard.size().unwrap(), 0);
        assert!(path.exists());
        assert_eq!(shard.path(), path);
    }

    #[test]
    fn file_create_new_fails_if_exists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.seg");
        std::fs::write(&path, b"x").unwrap();

        let result = FileBackend::open(&path, OpenMode::CreateNew);
        assert!(matches!(result, Err(StorageError::File { op: "open", .. })));
    }

    #[test]
    fn file_open_existing_fails_if_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.seg");

        let err = FileBackend::open(&path, OpenMode::OpenExisting).unwrap_err();
        assert_eq!(err.kind(), Some(io::ErrorKind::NotFound));
    }

    #[test]
    fn file_write_and_read_at() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.seg");
        let shard = FileBackend::open(&path, OpenMode::OpenOrCreate).unwrap();

        shard.write_at(10, b"hello").unwrap();
        assert_eq!(shard.size().unwrap(), 15);

        let mut buf = [0u8; 5];
        shard.read_at(10, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        let mut hole = [0xFFu8; 10];
        shard.read_at(0, &mut hole).unwrap();
        assert!(hole.iter().all(|&b| b == 0));
    }

    #[test]
    fn file_read_past_end_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.seg");
        let shard = FileBackend::open(&path, OpenMode::OpenOrCreate).unwrap();
        shard.write_at(0, b"hello").unwrap();

        let mut buf = [0u8; 8];
        let result = shard.read_at(2, &mut buf);
        assert!(matches!(result, Err(StorageError::ShortRead { offset: 2, len: 8, .. })));
    }

    #[test]
    fn ensure_size_never_shrinks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.seg");
        let shard = FileBackend::open(&path, OpenMode::OpenOrCreate).unwrap();

        shard.ensure_size(8192).unwrap();
        assert_eq!(shard.size().unwrap(), 8192);
        shard.ensure_size(4096).unwrap();
        assert_eq!(shard.size().unwrap(), 8192);
    }

    #[test]
    fn mapping_aliases_file_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.seg");
        let shard = FileBackend::open(&path, OpenMode::OpenOrCreate).unwrap();
        shard.ensure_size(8192).unwrap();
        shard.write_at(4096 + 3, b"abc").unwrap();

        let map = shard.map(4096, 4096).unwrap();
        #[allow(unsafe_code)]
        let bytes = unsafe { std::slice::from_raw_parts_mut(map.as_ptr(), map.len()) };
        assert_eq!(&bytes[3..6], b"abc");

        bytes[100] = 42;
        map.flush().unwrap();
        let mut buf = [0u8; 1];
        shard.read_at(4096 + 100, &mut buf).unwrap();
        assert_eq!(buf[0], 42);
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.seg");

        {
            let shard = FileBackend::open(&path, OpenMode::CreateNew).unwrap();
            shard.write_at(0, b"persistent data").unwrap();
            shard.sync().unwrap();
        }

        {
            let shard = FileBackend::open(&path, OpenMode::OpenExisting).unwrap();
            let mut buf = [0u8; 15];
            shard.read_at(0, &mut buf).unwrap();
            assert_eq!(&buf, b"persistent data");
        }
    }

    #[test]
    fn os_file_system_remove_and_rename() {
        let dir = tempdir().unwrap();
        let fs = OsFileSystem::new();
        let a = dir.path().join("a.seg");
        let b = dir.path().join("b.seg");

        fs.open(&a, OpenMode::CreateNew).unwrap();
        assert!(fs.exists(&a));
        assert_eq!(fs.file_len(&a).unwrap(), 0);

        fs.rename(&a, &b).unwrap();
        assert!(!fs.exists(&a));
        assert!(fs.exists(&b));

        fs.remove(&b).unwrap();
        assert!(!fs.exists(&b));
        assert!(fs.remove(&b).is_err());
    }

    #[test]
    fn concurrent_positioned_writes() {
        use std::thread;

        let dir = tempdir().unwrap();
        let path = dir.path().join("test.seg");
        let shard: Arc<dyn ShardBackend> =
            Arc::new(FileBackend::open(&path, OpenMode::OpenOrCreate).unwrap());

        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let shard = Arc::clone(&shard);
                thread::spawn(move || {
                    shard.write_at(u64::from(i) * 16, &[i; 16]).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        for i in 0..8u8 {
            let mut buf = [0u8; 16];
            shard.read_at(u64::from(i) * 16, &mut buf).unwrap();
            assert_eq!(buf, [i; 16]);
        }
    }
}
