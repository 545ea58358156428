//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An I/O error occurred on a specific file.
    #[error("{op} failed on <{}>: {source}", path.display())]
    File {
        /// The operation that failed (`open`, `pread`, `pwrite`, ...).
        op: &'static str,
        /// The file involved.
        path: PathBuf,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Memory-mapping a file region failed.
    #[error("mmap({len}, offset {offset}) failed on <{}>: {source}", path.display())]
    Map {
        /// The mapped file, empty for anonymous memory.
        path: PathBuf,
        /// Offset of the requested region.
        offset: u64,
        /// Length of the requested region.
        len: usize,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Fewer bytes than requested were available.
    #[error("short read on <{}>: offset {offset}, wanted {len} bytes", path.display())]
    ShortRead {
        /// The file that was read.
        path: PathBuf,
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
    },
}

impl StorageError {
    /// Wraps an OS error with the operation and file that produced it.
    pub fn file(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::File {
            op,
            path: path.into(),
            source,
        }
    }

    /// Returns the underlying OS error kind, if any.
    #[must_use]
    pub fn kind(&self) -> Option<io::ErrorKind> {
        match self {
            Self::Io(e) => Some(e.kind()),
            Self::File { source, .. } | Self::Map { source, .. } => Some(source.kind()),
            Self::ShortRead { .. } => Some(io::ErrorKind::UnexpectedEof),
        }
    }
}
