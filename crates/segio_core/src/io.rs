//! The io object.
//!
//! An [`Io`] is a named, paged virtual file: a mapped header region followed
//! by up to `max_segment` segments that are mapped on demand from a family of
//! shard files (`path`, `path.001`, `path.002`, ...). Temporary objects keep
//! everything in anonymous memory.

use crate::array::{self, ArrayInfo, ArraySpec};
use crate::context::IoContext;
use crate::error::{IoError, IoResult};
use crate::files::{shard_path, FilePool};
use crate::header::{HeaderInfo, HeaderRegion};
use crate::layout::{Layout, IO_HEADER_SIZE};
use crate::segment::SegmentTable;
use crate::stats::IoStats;
use parking_lot::Mutex;
use segio_storage::{FileSystem, OpenMode, ShardBackend};
use std::fmt;
use std::ops::BitOr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Behaviour flags of an io object, persisted in its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct IoFlags(u32);

impl IoFlags {
    /// Expire by global tick: unmap idle segments of an object unused for a while.
    pub const EXPIRE_GTICK: Self = Self(0x01);
    /// Expire by segment: unmap idle segments from the highest mapped one down.
    pub const EXPIRE_SEGMENT: Self = Self(0x02);
    /// Anonymous memory, no backing file.
    pub const TEMPORARY: Self = Self(0x04);

    /// Returns flags with no bit set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Wraps raw flag bits. Bits unknown to this crate are preserved.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the raw flag bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if any bit of `other` is set.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for IoFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A segment-mapped virtual file.
///
/// Shared between threads behind an [`Arc`]; every operation takes `&self`.
pub struct Io {
    ctx: Arc<IoContext>,
    path: Option<PathBuf>,
    layout: Layout,
    header: HeaderRegion,
    files: Option<FilePool>,
    segments: SegmentTable,
    arrays: Vec<ArrayInfo>,
    user_header_offset: usize,
    flags: IoFlags,
    stats: IoStats,
    pub(crate) alloc_lock: Mutex<()>,
    pub(crate) last_tick: AtomicU32,
    pub(crate) max_map_seg: AtomicU32,
    pub(crate) nmaps: AtomicU32,
}

impl Io {
    /// Creates a new file-backed io object.
    ///
    /// The base file must not exist yet; shard files are created as segments
    /// beyond the first shard are mapped.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty path or bad geometry, and a
    /// storage error if the base file exists or cannot be written. A base file
    /// created by a failed call is removed.
    pub fn create(
        ctx: &Arc<IoContext>,
        path: impl AsRef<Path>,
        header_size: u32,
        segment_size: u32,
        max_segment: u32,
        flags: IoFlags,
    ) -> IoResult<Arc<Self>> {
        Self::create_inner(
            ctx,
            path.as_ref(),
            header_size,
            segment_size,
            max_segment,
            flags,
            &[],
        )
    }

    /// Creates an io object in anonymous memory.
    ///
    /// The object runs with `flags` plus [`IoFlags::TEMPORARY`]. Temporary
    /// objects are never registered for eviction, so an expire policy only
    /// takes effect through direct [`Io::expire`] calls. An unmapped
    /// temporary segment loses its contents. Temporary objects do not support
    /// journal records.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for bad geometry or a storage error if the
    /// header memory cannot be mapped.
    pub fn create_temporary(
        ctx: &Arc<IoContext>,
        header_size: u32,
        segment_size: u32,
        max_segment: u32,
        flags: IoFlags,
    ) -> IoResult<Arc<Self>> {
        let layout = Layout::new(
            header_size,
            segment_size,
            max_segment,
            ctx.config().format_version,
        )?;
        let map = ctx.file_system().map_anonymous(layout.base as usize)?;
        let header = HeaderRegion::new(map)?;
        let flags = flags | IoFlags::TEMPORARY;
        header.write(0, &Self::initial_header(&layout, flags).encode())?;
        let io = Self::assemble(ctx, None, layout, header, None, flags)?;
        debug!(segment_size, max_segment, "created temporary io");
        Ok(Arc::new(io))
    }

    /// Opens an existing io object, reading its geometry from the header.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the file is missing or unreadable, and
    /// `IncompatibleFormat` if it is too small, carries a foreign
    /// identification string or describes an impossible layout.
    pub fn open(ctx: &Arc<IoContext>, path: impl AsRef<Path>) -> IoResult<Arc<Self>> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(IoError::invalid_argument("[io][open] path is missing"));
        }
        let fs = Arc::clone(ctx.file_system());
        let first = fs.open(path, OpenMode::OpenExisting)?;
        let info = Self::read_header(first.as_ref(), path)?;
        if info.segment_size == 0 {
            return Err(IoError::incompatible_format(format!(
                "[io][open] segment size is 0: <{}>",
                path.display()
            )));
        }
        let layout = Layout::new(
            info.header_size,
            info.segment_size,
            info.max_segment,
            info.version,
        )
        .map_err(|e| {
            IoError::incompatible_format(format!("[io][open] <{}>: {e}", path.display()))
        })?;

        first.ensure_size(layout.base)?;
        let header = HeaderRegion::new(first.map(0, layout.base as usize)?)?;
        let files = FilePool::with_first(path.to_path_buf(), fs, layout.max_n_files(), first);
        let io = Arc::new(Self::assemble(
            ctx,
            Some(path.to_path_buf()),
            layout,
            header,
            Some(files),
            IoFlags::from_bits(info.flags),
        )?);
        ctx.register(&io);
        debug!(path = %path.display(), "opened io");
        Ok(io)
    }

    /// Reads the type tag of an io file without opening it.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the file cannot be read and
    /// `IncompatibleFormat` if it is not an io file.
    pub fn detect_type(ctx: &IoContext, path: impl AsRef<Path>) -> IoResult<u32> {
        let path = path.as_ref();
        let shard = ctx.file_system().open(path, OpenMode::OpenExisting)?;
        Ok(Self::read_header(shard.as_ref(), path)?.io_type)
    }

    /// Closes this handle.
    ///
    /// # Errors
    ///
    /// Returns `InUse` if other handles are still alive. The caller's handle
    /// is released either way; the object closes when the last one goes.
    pub fn close(self: Arc<Self>) -> IoResult<()> {
        match Arc::try_unwrap(self) {
            Ok(io) => {
                drop(io);
                Ok(())
            }
            Err(shared) => Err(IoError::InUse {
                path: shared.path.clone().unwrap_or_default(),
                holders: Arc::strong_count(&shared) - 1,
            }),
        }
    }

    /// Removes an io file and every numbered shard after it.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the base file does not exist, or the last
    /// error hit while removing shards.
    pub fn remove(ctx: &IoContext, path: impl AsRef<Path>) -> IoResult<()> {
        let path = path.as_ref();
        let fs = ctx.file_system();
        fs.file_len(path)?;
        Self::remove_family(fs.as_ref(), path)
    }

    /// Like [`Io::remove`], but succeeds when the base file is missing.
    ///
    /// # Errors
    ///
    /// Returns the last error hit while removing files.
    pub fn remove_if_exists(ctx: &IoContext, path: impl AsRef<Path>) -> IoResult<()> {
        let path = path.as_ref();
        let fs = ctx.file_system();
        if fs.exists(path) {
            Self::remove_family(fs.as_ref(), path)
        } else {
            Ok(())
        }
    }

    /// Renames an io file and every numbered shard after it.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the base file cannot be renamed, or the last
    /// error hit while renaming shards.
    pub fn rename(
        ctx: &IoContext,
        old_path: impl AsRef<Path>,
        new_path: impl AsRef<Path>,
    ) -> IoResult<()> {
        let (old_path, new_path) = (old_path.as_ref(), new_path.as_ref());
        let fs = ctx.file_system();
        fs.file_len(old_path)?;
        fs.rename(old_path, new_path)?;

        let mut result = Ok(());
        for n in 1.. {
            let from = shard_path(old_path, n);
            if !fs.exists(&from) {
                break;
            }
            let to = shard_path(new_path, n);
            if let Err(e) = fs.rename(&from, &to) {
                error!(from = %from.display(), to = %to.display(), error = %e, "failed to rename shard");
                result = Err(e.into());
            }
        }
        info!(from = %old_path.display(), to = %new_path.display(), "[io][rename] renamed");
        result
    }

    // === Accessors ===

    /// Returns the base path, or `None` for a temporary object.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the flags this object runs with.
    pub fn flags(&self) -> IoFlags {
        self.flags
    }

    /// Returns true for an anonymous-memory object.
    pub fn is_temporary(&self) -> bool {
        self.flags.contains(IoFlags::TEMPORARY)
    }

    /// Returns the geometry of this object.
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Returns the number of segment slots the header region occupies.
    pub fn base_seg(&self) -> u32 {
        self.layout.base_seg
    }

    /// Returns the bytes per segment.
    pub fn segment_size(&self) -> u32 {
        self.layout.segment_size
    }

    /// Returns the number of segments worth scanning: the array segment tail
    /// when one is kept, otherwise the full capacity.
    pub fn max_segment(&self) -> u32 {
        let raw = self.header.raw();
        match raw.segment_tail.load(Ordering::Acquire) {
            0 => self.layout.max_segment,
            tail => tail.min(self.layout.max_segment),
        }
    }

    /// Returns a copy of the fixed header.
    pub fn header_info(&self) -> HeaderInfo {
        self.header.info()
    }

    /// Returns the caller-defined type tag.
    pub fn io_type(&self) -> u32 {
        self.header.raw().io_type.load(Ordering::Acquire)
    }

    /// Sets the caller-defined type tag.
    pub fn set_type(&self, io_type: u32) {
        self.header.raw().io_type.store(io_type, Ordering::Release);
    }

    /// Returns the caller-maintained modification stamp.
    pub fn last_modified(&self) -> u32 {
        self.header.raw().last_modified.load(Ordering::Acquire)
    }

    /// Sets the modification stamp.
    pub fn set_last_modified(&self, stamp: u32) {
        self.header.raw().last_modified.store(stamp, Ordering::Release);
    }

    /// Returns the virtual size: the header region plus every segment up to
    /// the highest one ever mapped.
    pub fn curr_size(&self) -> u64 {
        self.header.raw().curr_size.load(Ordering::Acquire)
    }

    /// Returns the number of shards spanned by the virtual size.
    pub fn n_files(&self) -> u32 {
        self.layout.n_files_for_size(self.curr_size())
    }

    /// Returns the number of currently mapped segments.
    pub fn n_mapped_segments(&self) -> u32 {
        self.nmaps.load(Ordering::Acquire)
    }

    /// Returns the highest segment number ever mapped.
    pub fn max_mapped_segment(&self) -> u32 {
        self.max_map_seg.load(Ordering::Acquire)
    }

    /// Returns the size of the caller header.
    pub fn user_header_len(&self) -> usize {
        (IO_HEADER_SIZE as usize + self.layout.header_size as usize)
            .saturating_sub(self.user_header_offset)
    }

    /// Copies bytes out of the caller header.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the range exceeds the caller header.
    pub fn read_user_header(&self, offset: usize, buf: &mut [u8]) -> IoResult<()> {
        self.check_user_header(offset, buf.len())?;
        self.header.read(self.user_header_offset + offset, buf)
    }

    /// Copies bytes into the caller header.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the range exceeds the caller header.
    pub fn write_user_header(&self, offset: usize, data: &[u8]) -> IoResult<()> {
        self.check_user_header(offset, data.len())?;
        self.header.write(self.user_header_offset + offset, data)
    }

    /// Returns the start of the caller header inside the header mapping.
    ///
    /// The pointer stays valid for the lifetime of the object.
    pub fn user_header_ptr(&self) -> *mut u8 {
        self.header.ptr_at(self.user_header_offset)
    }

    /// Returns the io statistics.
    pub fn stats(&self) -> &IoStats {
        &self.stats
    }

    /// Returns the context this object belongs to.
    pub fn context(&self) -> &Arc<IoContext> {
        &self.ctx
    }

    // === Durability and accounting ===

    /// Syncs the header, every mapped and unreferenced segment, then the
    /// open shard files.
    ///
    /// Segments that are in use are skipped. Temporary objects have nothing
    /// to flush.
    ///
    /// # Errors
    ///
    /// Returns the first sync error.
    pub fn flush(&self) -> IoResult<()> {
        if self.is_temporary() {
            return Ok(());
        }
        self.header.flush()?;
        for segno in 0..self.max_segment() {
            let Some(slot) = self.segments.get(segno) else {
                break;
            };
            if slot.nref.increment() != 0 {
                slot.nref.decrement();
                continue;
            }
            let result = if slot.is_mapped() { slot.flush() } else { Ok(()) };
            slot.nref.decrement();
            result?;
        }
        match &self.files {
            Some(files) => files.sync_all(),
            None => Ok(()),
        }
    }

    /// Returns the total on-disk size of the shards in use.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a shard cannot be inspected.
    pub fn size(&self) -> IoResult<u64> {
        let Some(base) = self.path.as_deref() else {
            return Ok(0);
        };
        let fs = self.ctx.file_system();
        let mut total = 0;
        for n in 0..self.n_files() {
            total += fs.file_len(&shard_path(base, n))?;
        }
        Ok(total)
    }

    /// Returns the total on-disk size of the shards in use, skipping shards
    /// that cannot be inspected.
    pub fn disk_usage(&self) -> u64 {
        let Some(base) = self.path.as_deref() else {
            return 0;
        };
        let fs = self.ctx.file_system();
        (0..self.n_files())
            .filter_map(|n| fs.file_len(&shard_path(base, n)).ok())
            .sum()
    }

    /// Returns true if a shard the virtual size depends on is missing.
    pub fn is_corrupt(&self) -> bool {
        let Some(base) = self.path.as_deref() else {
            return false;
        };
        let fs = self.ctx.file_system();
        for n in 0..self.n_files() {
            let path = shard_path(base, n);
            if !fs.exists(&path) {
                error!(path = %path.display(), "[io][corrupt] used path doesn't exist");
                return true;
            }
        }
        false
    }

    // === Crate internals ===

    pub(crate) fn header(&self) -> &HeaderRegion {
        &self.header
    }

    pub(crate) fn files(&self) -> Option<&FilePool> {
        self.files.as_ref()
    }

    pub(crate) fn segments(&self) -> &SegmentTable {
        &self.segments
    }

    pub(crate) fn arrays(&self) -> &[ArrayInfo] {
        &self.arrays
    }

    pub(crate) fn display_path(&self) -> std::path::Display<'_> {
        self.path.as_deref().unwrap_or(Path::new("<temporary>")).display()
    }

    /// True if the context should sweep this object.
    pub(crate) fn is_evictable(&self) -> bool {
        !self.is_temporary()
            && self
                .flags
                .intersects(IoFlags::EXPIRE_GTICK | IoFlags::EXPIRE_SEGMENT)
    }

    pub(crate) fn create_inner(
        ctx: &Arc<IoContext>,
        path: &Path,
        header_size: u32,
        segment_size: u32,
        max_segment: u32,
        flags: IoFlags,
        specs: &[ArraySpec],
    ) -> IoResult<Arc<Self>> {
        if path.as_os_str().is_empty() {
            return Err(IoError::invalid_argument("[io][create] path is missing"));
        }
        let layout = Layout::new(
            header_size,
            segment_size,
            max_segment,
            ctx.config().format_version,
        )?;
        let fs = Arc::clone(ctx.file_system());
        let first = fs.open(path, OpenMode::CreateNew)?;

        match Self::init_created(ctx, path, layout, first, flags, specs) {
            Ok(io) => {
                let io = Arc::new(io);
                ctx.register(&io);
                info!(
                    path = %path.display(),
                    segment_size,
                    max_segment,
                    "created io"
                );
                Ok(io)
            }
            Err(e) => {
                match fs.remove(path) {
                    Ok(()) => info!(path = %path.display(), "[io][create][error] removed path"),
                    Err(re) => warn!(
                        path = %path.display(),
                        error = %re,
                        "[io][create][error] failed to remove path"
                    ),
                }
                Err(e)
            }
        }
    }

    fn init_created(
        ctx: &Arc<IoContext>,
        path: &Path,
        layout: Layout,
        first: Arc<dyn ShardBackend>,
        flags: IoFlags,
        specs: &[ArraySpec],
    ) -> IoResult<Self> {
        first.ensure_size(layout.base)?;
        first.write_at(0, &Self::initial_header(&layout, flags).encode())?;
        let header = HeaderRegion::new(first.map(0, layout.base as usize)?)?;
        if !specs.is_empty() {
            array::write_specs(&header, specs);
        }
        header.flush()?;
        let files = FilePool::with_first(
            path.to_path_buf(),
            Arc::clone(ctx.file_system()),
            layout.max_n_files(),
            first,
        );
        Self::assemble(ctx, Some(path.to_path_buf()), layout, header, Some(files), flags)
    }

    fn initial_header(layout: &Layout, flags: IoFlags) -> HeaderInfo {
        HeaderInfo {
            version: layout.version,
            flags: flags.bits(),
            header_size: layout.header_size,
            segment_size: layout.segment_size,
            max_segment: layout.max_segment,
            curr_size: layout.base,
            ..HeaderInfo::default()
        }
    }

    fn assemble(
        ctx: &Arc<IoContext>,
        path: Option<PathBuf>,
        layout: Layout,
        header: HeaderRegion,
        files: Option<FilePool>,
        flags: IoFlags,
    ) -> IoResult<Self> {
        let n_arrays = header.raw().n_arrays.load(Ordering::Acquire);
        let (arrays, arrays_size) = array::load_arrays(&header, &layout, n_arrays)?;
        let segments = SegmentTable::new(layout.max_segment)?;
        Ok(Self {
            ctx: Arc::clone(ctx),
            path,
            layout,
            header,
            files,
            segments,
            arrays,
            user_header_offset: IO_HEADER_SIZE as usize + arrays_size,
            flags,
            stats: IoStats::new(),
            alloc_lock: Mutex::new(()),
            last_tick: AtomicU32::new(ctx.tick()),
            max_map_seg: AtomicU32::new(0),
            nmaps: AtomicU32::new(0),
        })
    }

    fn read_header(shard: &dyn ShardBackend, path: &Path) -> IoResult<HeaderInfo> {
        let size = shard.size()?;
        if size < u64::from(IO_HEADER_SIZE) {
            return Err(IoError::incompatible_format(format!(
                "file size is too small: <{size}>(required: >= {IO_HEADER_SIZE}): <{}>",
                path.display()
            )));
        }
        let mut raw = [0u8; IO_HEADER_SIZE as usize];
        shard.read_at(0, &mut raw)?;
        HeaderInfo::decode(&raw).map_err(|_| {
            IoError::incompatible_format(format!(
                "format ID is different: <{}>",
                path.display()
            ))
        })
    }

    fn remove_family(fs: &dyn FileSystem, path: &Path) -> IoResult<()> {
        fs.remove(path)?;
        info!(path = %path.display(), "[io][remove] removed path");

        let mut result = Ok(());
        for n in 1.. {
            let shard = shard_path(path, n);
            if !fs.exists(&shard) {
                break;
            }
            match fs.remove(&shard) {
                Ok(()) => info!(path = %shard.display(), n, "[io][remove] removed numbered path"),
                Err(e) => {
                    error!(path = %shard.display(), n, error = %e, "[io][remove] failed to remove numbered path");
                    result = Err(e.into());
                }
            }
        }
        result
    }

    fn check_user_header(&self, offset: usize, len: usize) -> IoResult<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.user_header_len() => Ok(()),
            _ => Err(IoError::invalid_argument(format!(
                "user header range {offset}+{len} exceeds {} bytes",
                self.user_header_len()
            ))),
        }
    }
}

impl Drop for Io {
    fn drop(&mut self) {
        if let Some(path) = &self.path {
            if self.is_evictable() {
                self.ctx.unregister(path);
            }
        }
        let busy = self
            .segments
            .iter()
            .filter(|slot| slot.nref.get() != 0)
            .count();
        if busy > 0 {
            warn!(path = %self.display_path(), busy, "closing io with referenced segments");
        }
        debug!(
            path = %self.display_path(),
            mapped = self.nmaps.load(Ordering::Relaxed),
            "closed io"
        );
    }
}

impl fmt::Debug for Io {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Io")
            .field("path", &self.path)
            .field("flags", &self.flags)
            .field("layout", &self.layout)
            .field("n_arrays", &self.arrays.len())
            .field("mapped", &self.nmaps.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
