//! Shared state of a family of io objects.
//!
//! An [`IoContext`] carries the configuration, the file system, the global
//! tick and the registry of evictable objects swept by [`IoContext::expire`].

use crate::config::IoConfig;
use crate::io::Io;
use parking_lot::Mutex;
use segio_storage::{FileSystem, OsFileSystem};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

struct Registration {
    io: Weak<Io>,
    /// Tick at registration; a sweep starting at this tick skips the object.
    generation: u32,
}

/// Configuration, file system, clock and registry shared by io objects.
pub struct IoContext {
    config: IoConfig,
    fs: Arc<dyn FileSystem>,
    tick: AtomicU32,
    registry: Mutex<HashMap<PathBuf, Registration>>,
}

impl IoContext {
    /// Creates a context on the operating system's file system.
    pub fn new(config: IoConfig) -> Arc<Self> {
        Self::with_file_system(config, OsFileSystem::shared())
    }

    /// Creates a context on a custom file system.
    pub fn with_file_system(config: IoConfig, fs: Arc<dyn FileSystem>) -> Arc<Self> {
        Arc::new(Self {
            config,
            fs,
            tick: AtomicU32::new(0),
            registry: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &IoConfig {
        &self.config
    }

    /// Returns the file system.
    pub fn file_system(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    /// Returns the global tick.
    pub fn tick(&self) -> u32 {
        self.tick.load(Ordering::Acquire)
    }

    /// Advances the global tick by one and returns the previous value.
    pub fn advance_tick(&self) -> u32 {
        self.tick.fetch_add(1, Ordering::AcqRel)
    }

    /// Returns the number of registered objects, live or not yet pruned.
    pub fn registered(&self) -> usize {
        self.registry.lock().len()
    }

    /// Returns true if an object is registered under `path`.
    pub fn is_registered(&self, path: impl AsRef<Path>) -> bool {
        self.registry.lock().contains_key(path.as_ref())
    }

    /// Sweeps every registered object, unmapping idle segments.
    ///
    /// Advances the tick, then runs [`Io::expire`] on every object registered
    /// before this sweep started. Objects registered since the previous sweep
    /// are left alone once. Returns the number of segments unmapped.
    pub fn expire(&self, count_thresh: u32, limit: u32) -> u32 {
        let generation = self.advance_tick();
        let live: Vec<Arc<Io>> = {
            let mut registry = self.registry.lock();
            registry.retain(|_, reg| reg.io.strong_count() > 0);
            registry
                .values()
                .filter(|reg| reg.generation != generation)
                .filter_map(|reg| reg.io.upgrade())
                .collect()
        };
        let mut n = 0u32;
        for io in &live {
            n = n.saturating_add(io.expire(count_thresh, limit));
        }
        if n > 0 {
            debug!(
                tick = generation.wrapping_add(1),
                swept = live.len(),
                expired = n,
                "expired segments"
            );
        }
        n
    }

    pub(crate) fn register(&self, io: &Arc<Io>) {
        if !io.is_evictable() {
            return;
        }
        let Some(path) = io.path() else {
            return;
        };
        let registration = Registration {
            io: Arc::downgrade(io),
            generation: self.tick(),
        };
        let mut registry = self.registry.lock();
        if let Some(old) = registry.insert(path.to_path_buf(), registration) {
            if old.io.strong_count() > 0 {
                warn!(path = %path.display(), "io registered twice, replacing entry");
            }
        }
    }

    /// Removes the entry for `path` once its object is gone.
    ///
    /// Called while an object is dropped, so a live entry belongs to a newer
    /// object registered under the same path and is kept.
    pub(crate) fn unregister(&self, path: &Path) {
        let mut registry = self.registry.lock();
        if registry
            .get(path)
            .is_some_and(|reg| reg.io.strong_count() == 0)
        {
            registry.remove(path);
        }
    }
}

impl fmt::Debug for IoContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoContext")
            .field("config", &self.config)
            .field("fs", &self.fs)
            .field("tick", &self.tick())
            .field("registered", &self.registered())
            .finish()
    }
}
