//! Shard backend and file system trait definitions.

use crate::error::StorageResult;
use crate::mapping::Mapping;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// How a shard file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Create the file; fail if it already exists.
    CreateNew,
    /// Open the file, creating it if it is missing.
    OpenOrCreate,
    /// Open an existing file; fail if it is missing.
    OpenExisting,
}

/// One open backing file ("shard").
///
/// Shards are **opaque byte stores** addressed by absolute offsets. They do
/// not interpret headers, segments or records.
///
/// # Invariants
///
/// - `read_at` either fills the whole buffer or fails
/// - `write_at` either writes every byte or fails, growing the file as needed
/// - `ensure_size` never shrinks the file
/// - A [`Mapping`] returned by `map` aliases the file contents: bytes written
///   through it are visible to `read_at` and vice versa
/// - Implementations must be `Send + Sync`; handles are shared between threads
pub trait ShardBackend: Send + Sync + fmt::Debug {
    /// Returns the path this shard was opened from.
    fn path(&self) -> &Path;

    /// Reads exactly `buf.len()` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the range extends past the end of the file or an
    /// I/O error occurs.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> StorageResult<()>;

    /// Writes all of `data` starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn write_at(&self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Returns the current file size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Grows the file to at least `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be extended.
    fn ensure_size(&self, size: u64) -> StorageResult<()>;

    /// Maps `len` bytes starting at `offset` read-write and shared.
    ///
    /// The caller is responsible for growing the file first.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses the mapping.
    fn map(&self, offset: u64, len: usize) -> StorageResult<Mapping>;

    /// Syncs data and metadata to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&self) -> StorageResult<()>;
}

/// Opens, inspects and removes shard files.
///
/// The io layer never touches `std::fs` directly; tests substitute wrappers
/// that count or fail operations.
pub trait FileSystem: Send + Sync + fmt::Debug {
    /// Opens a shard file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened in the requested mode.
    fn open(&self, path: &Path, mode: OpenMode) -> StorageResult<Arc<dyn ShardBackend>>;

    /// Returns true if a file exists at `path`.
    fn exists(&self, path: &Path) -> bool;

    /// Returns the size of the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be inspected.
    fn file_len(&self, path: &Path) -> StorageResult<u64>;

    /// Removes the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be removed.
    fn remove(&self, path: &Path) -> StorageResult<()>;

    /// Renames a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the rename fails.
    fn rename(&self, from: &Path, to: &Path) -> StorageResult<()>;

    /// Allocates anonymous read-write memory that behaves like a mapping.
    ///
    /// # Errors
    ///
    /// Returns an error if the memory cannot be mapped.
    fn map_anonymous(&self, len: usize) -> StorageResult<Mapping> {
        Mapping::anonymous(len)
    }
}
