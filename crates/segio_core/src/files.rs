//! Lazily opened shard files.

use crate::error::{IoError, IoResult};
use parking_lot::RwLock;
use segio_storage::{FileSystem, OpenMode, ShardBackend};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Returns the path of shard `n`: the base path itself, then `path.001`,
/// `path.002`, ... with three uppercase hex digits.
#[must_use]
pub fn shard_path(path: &Path, n: u32) -> PathBuf {
    if n == 0 {
        path.to_path_buf()
    } else {
        let mut name = path.as_os_str().to_os_string();
        name.push(format!(".{n:03X}"));
        PathBuf::from(name)
    }
}

/// Fixed-size table of shard handles, opened on first use.
#[derive(Debug)]
pub(crate) struct FilePool {
    base: PathBuf,
    fs: Arc<dyn FileSystem>,
    slots: RwLock<Vec<Option<Arc<dyn ShardBackend>>>>,
}

impl FilePool {
    /// Creates a pool of `n` slots whose first slot is already open.
    pub fn with_first(
        base: PathBuf,
        fs: Arc<dyn FileSystem>,
        n: u32,
        first: Arc<dyn ShardBackend>,
    ) -> Self {
        let mut slots = vec![None; n.max(1) as usize];
        slots[0] = Some(first);
        Self {
            base,
            fs,
            slots: RwLock::new(slots),
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> u32 {
        self.slots.read().len() as u32
    }

    /// Returns shard `n` if it is open.
    pub fn get(&self, n: u32) -> Option<Arc<dyn ShardBackend>> {
        self.slots.read().get(n as usize).cloned().flatten()
    }

    /// Returns shard `n`, opening or creating it on first use.
    ///
    /// The flag is true when this call created the file.
    pub fn get_or_open(&self, n: u32) -> IoResult<(Arc<dyn ShardBackend>, bool)> {
        if let Some(shard) = self.get(n) {
            return Ok((shard, false));
        }
        let mut slots = self.slots.write();
        let count = slots.len();
        let slot = slots.get_mut(n as usize).ok_or_else(|| {
            IoError::invalid_argument(format!(
                "shard {n} is beyond the {count} shards of <{}>",
                self.base.display()
            ))
        })?;
        if let Some(shard) = slot {
            return Ok((Arc::clone(shard), false));
        }
        let path = shard_path(&self.base, n);
        let existed = self.fs.exists(&path);
        let shard = self.fs.open(&path, OpenMode::OpenOrCreate)?;
        debug!(path = %path.display(), created = !existed, "opened shard");
        *slot = Some(Arc::clone(&shard));
        Ok((shard, !existed))
    }

    /// Closes shard `n` and removes its file.
    ///
    /// Used when a freshly created shard could not be mapped.
    pub fn discard(&self, n: u32) {
        let path = shard_path(&self.base, n);
        if let Some(slot) = self.slots.write().get_mut(n as usize) {
            *slot = None;
        }
        match self.fs.remove(&path) {
            Ok(()) => info!(path = %path.display(), "[io][map][error] removed shard"),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove shard"),
        }
    }

    /// Syncs every open shard.
    pub fn sync_all(&self) -> IoResult<()> {
        let open: Vec<_> = self.slots.read().iter().flatten().cloned().collect();
        for shard in open {
            shard.sync()?;
        }
        Ok(())
    }
}
