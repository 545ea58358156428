//! Owned memory-mapped regions.

use crate::error::{StorageError, StorageResult};
use memmap2::MmapMut;
use std::fmt;
use std::path::PathBuf;
use std::ptr::NonNull;

/// A read-write memory region backed by a file or by anonymous memory.
///
/// The region stays mapped until the `Mapping` is dropped. The base pointer is
/// captured once at construction and never changes, so it can be handed out
/// to other threads while the owner keeps the mapping alive.
pub struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
    anonymous: bool,
    inner: MmapMut,
}

// SAFETY: `ptr` points into `inner`, which is itself `Send + Sync`. The
// pointer is only used to address that region and is never freed separately.
#[allow(unsafe_code)]
unsafe impl Send for Mapping {}
#[allow(unsafe_code)]
unsafe impl Sync for Mapping {}

impl Mapping {
    /// Wraps a file-backed mapping.
    #[must_use]
    pub fn from_mmap(mut inner: MmapMut) -> Self {
        let len = inner.len();
        let ptr = NonNull::new(inner.as_mut_ptr()).unwrap_or(NonNull::dangling());
        Self {
            ptr,
            len,
            anonymous: false,
            inner,
        }
    }

    /// Maps `len` bytes of zeroed anonymous memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses the allocation.
    pub fn anonymous(len: usize) -> StorageResult<Self> {
        let mut inner = MmapMut::map_anon(len).map_err(|source| StorageError::Map {
            path: PathBuf::new(),
            offset: 0,
            len,
            source,
        })?;
        let ptr = NonNull::new(inner.as_mut_ptr()).unwrap_or(NonNull::dangling());
        Ok(Self {
            ptr,
            len,
            anonymous: true,
            inner,
        })
    }

    /// Returns the base address of the region.
    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Returns the region length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the region is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns true if the region is not backed by a file.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.anonymous
    }

    /// Flushes modified pages of a file-backed region to disk.
    ///
    /// Anonymous regions have nothing to flush.
    ///
    /// # Errors
    ///
    /// Returns an error if `msync` fails.
    pub fn flush(&self) -> StorageResult<()> {
        if self.anonymous {
            return Ok(());
        }
        self.inner.flush()?;
        Ok(())
    }
}

impl fmt::Debug for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapping")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .field("anonymous", &self.anonymous)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_is_zeroed() {
        let map = Mapping::anonymous(4096).unwrap();
        assert_eq!(map.len(), 4096);
        assert!(map.is_anonymous());

        #[allow(unsafe_code)]
        let bytes = unsafe { std::slice::from_raw_parts(map.as_ptr(), map.len()) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn anonymous_is_writable() {
        let map = Mapping::anonymous(128).unwrap();

        #[allow(unsafe_code)]
        unsafe {
            map.as_ptr().add(7).write(0xAB);
            assert_eq!(map.as_ptr().add(7).read(), 0xAB);
        }
        assert!(map.flush().is_ok());
    }

    #[test]
    fn pointer_is_stable_across_moves() {
        let map = Mapping::anonymous(64).unwrap();
        let before = map.as_ptr();
        let moved = Box::new(map);
        assert_eq!(moved.as_ptr(), before);
    }
}
