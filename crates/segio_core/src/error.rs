//! Error types for SegIO core.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for io operations.
pub type IoResult<T> = Result<T, IoError>;

/// Errors that can occur in io operations.
#[derive(Debug, Error)]
pub enum IoError {
    /// Storage backend error (open, pread, pwrite, mmap, ...).
    #[error("storage error: {0}")]
    Storage(#[from] segio_storage::StorageError),

    /// A caller-supplied argument is out of range or malformed.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the argument problem.
        message: String,
    },

    /// Operation not permitted on this io object.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// A buffer or table could not be allocated.
    #[error("no memory available: {requested} bytes requested")]
    NoMemory {
        /// The allocation size that failed.
        requested: usize,
    },

    /// Every segment of the io object is already allocated.
    #[error("no free segment: all {max_segment} segments are in use")]
    NoSpace {
        /// The segment capacity of the io object.
        max_segment: u32,
    },

    /// The file is not an io file or uses an unsupported layout.
    #[error("incompatible file format: {message}")]
    IncompatibleFormat {
        /// Description of the format issue.
        message: String,
    },

    /// A stored record does not match what the caller expects.
    #[error("format corruption: {message}")]
    FormatCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Entry metadata changed while a record was being read.
    ///
    /// This is benign: the caller should re-read its metadata and retry.
    #[error("concurrent modification: {message}")]
    ConcurrentModification {
        /// Description of what changed.
        message: String,
    },

    /// A bounded wait (lock, segment reference, eviction) gave up.
    #[error("resource deadlock avoided: {message}")]
    DeadlockAvoided {
        /// Description of the contended resource.
        message: String,
    },

    /// The io object is still shared and cannot be closed.
    #[error("io <{}> is still in use by {holders} other handle(s)", path.display())]
    InUse {
        /// Path of the io object.
        path: PathBuf,
        /// Number of other live handles.
        holders: usize,
    },
}

impl IoError {
    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an incompatible format error.
    pub fn incompatible_format(message: impl Into<String>) -> Self {
        Self::IncompatibleFormat {
            message: message.into(),
        }
    }

    /// Creates a format corruption error.
    pub fn format_corruption(message: impl Into<String>) -> Self {
        Self::FormatCorruption {
            message: message.into(),
        }
    }

    /// Creates a concurrent modification error.
    pub fn concurrent_modification(message: impl Into<String>) -> Self {
        Self::ConcurrentModification {
            message: message.into(),
        }
    }

    /// Creates a deadlock avoided error.
    pub fn deadlock_avoided(message: impl Into<String>) -> Self {
        Self::DeadlockAvoided {
            message: message.into(),
        }
    }

    /// Returns true if retrying the same operation later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrentModification { .. } | Self::DeadlockAvoided { .. }
        )
    }
}
