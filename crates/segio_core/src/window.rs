//! Contiguous views over byte ranges that may cross segments.
//!
//! A range inside one segment is served straight from the segment mapping.
//! A range crossing segment boundaries is staged in a private buffer: read
//! modes fill it from the segments when the window is mapped, write modes
//! copy it back when the window is unmapped.

use crate::error::{IoError, IoResult};
use crate::io::Io;
use crate::segment::SegmentGuard;
use std::ops::Range;
use tracing::warn;

/// Access mode of a [`Window`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RwMode {
    /// The window is read; nothing is written back.
    ReadOnly,
    /// The window is written; a staged buffer starts zeroed.
    WriteOnly,
    /// The window is read and written back.
    ReadWrite,
}

impl RwMode {
    fn reads(self) -> bool {
        matches!(self, Self::ReadOnly | Self::ReadWrite)
    }

    fn writes(self) -> bool {
        matches!(self, Self::WriteOnly | Self::ReadWrite)
    }
}

enum View<'a> {
    /// Zero-copy view into a pinned segment.
    Cached(SegmentGuard<'a>),
    /// Private copy of a multi-segment range.
    Staged(Vec<u8>),
}

/// A mapped byte range of an io object.
///
/// Dropping a window unmaps it; a write-back failure during drop is logged.
/// Call [`Window::unmap`] to observe it instead.
pub struct Window<'a> {
    io: &'a Io,
    segment: u32,
    offset: u32,
    size: u32,
    mode: RwMode,
    view: View<'a>,
    done: bool,
}

impl Io {
    /// Maps `size` bytes starting `offset` bytes into `segment`.
    ///
    /// An offset of a segment size or more is folded into the segment number.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty window or one reaching past
    /// `max_segment`, `NoMemory` if a staging buffer cannot be allocated,
    /// plus every error of [`Io::segment`]. References taken before a
    /// failure are released.
    pub fn win_map(
        &self,
        segment: u32,
        offset: u32,
        size: u32,
        mode: RwMode,
    ) -> IoResult<Window<'_>> {
        let segment_size = u64::from(self.segment_size());
        let mut segment = u64::from(segment);
        let mut offset = u64::from(offset);
        if offset >= segment_size {
            segment += offset / segment_size;
            offset %= segment_size;
        }
        let nseg = (offset + u64::from(size)).div_ceil(segment_size);
        if size == 0 || segment + nseg > u64::from(self.layout().max_segment) {
            return Err(IoError::invalid_argument(format!(
                "window {segment}:{offset}+{size} is outside {} segments",
                self.layout().max_segment
            )));
        }
        // Both fit in u32: segment < max_segment and offset < segment_size.
        let (segment, offset) = (segment as u32, offset as u32);

        let view = if nseg == 1 {
            View::Cached(self.segment(segment)?)
        } else {
            let mut buf = Vec::new();
            buf.try_reserve_exact(size as usize)
                .map_err(|_| IoError::NoMemory {
                    requested: size as usize,
                })?;
            buf.resize(size as usize, 0);
            if mode.reads() {
                for_each_piece(self, segment, offset, size, |seg, at, range| {
                    seg.read_at(at, &mut buf[range])
                })?;
            }
            View::Staged(buf)
        };
        self.stats().record_window(nseg > 1);
        Ok(Window {
            io: self,
            segment,
            offset,
            size,
            mode,
            view,
            done: false,
        })
    }
}

impl Window<'_> {
    /// Returns the first segment of the window.
    pub fn segment(&self) -> u32 {
        self.segment
    }

    /// Returns the offset of the window in its first segment.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Returns the window size in bytes.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Returns the access mode.
    pub fn mode(&self) -> RwMode {
        self.mode
    }

    /// Returns true if the window points straight into a segment mapping.
    pub fn is_zero_copy(&self) -> bool {
        matches!(self.view, View::Cached(_))
    }

    /// Returns the window contents.
    #[allow(unsafe_code)]
    pub fn as_slice(&self) -> &[u8] {
        match &self.view {
            // SAFETY: offset + size lies inside the segment, which the guard
            // pins for as long as the window lives.
            View::Cached(guard) => unsafe {
                std::slice::from_raw_parts(
                    guard.as_ptr().add(self.offset as usize),
                    self.size as usize,
                )
            },
            View::Staged(buf) => buf,
        }
    }

    /// Returns the window contents for writing.
    ///
    /// Writes to a staged read-only window are discarded on unmap.
    #[allow(unsafe_code)]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match &mut self.view {
            // SAFETY: as in as_slice; the window is borrowed mutably.
            View::Cached(guard) => unsafe {
                std::slice::from_raw_parts_mut(
                    guard.as_ptr().add(self.offset as usize),
                    self.size as usize,
                )
            },
            View::Staged(buf) => buf,
        }
    }

    /// Unmaps the window, writing a staged buffer back in write modes.
    ///
    /// # Errors
    ///
    /// Returns the error of the first segment that could not be referenced
    /// during write-back.
    pub fn unmap(mut self) -> IoResult<()> {
        self.done = true;
        self.write_back()
    }

    fn write_back(&mut self) -> IoResult<()> {
        match &self.view {
            View::Staged(buf) if self.mode.writes() => {
                for_each_piece(self.io, self.segment, self.offset, self.size, |seg, at, range| {
                    seg.write_at(at, &buf[range])
                })
            }
            _ => Ok(()),
        }
    }
}

impl Drop for Window<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Err(e) = self.write_back() {
            warn!(
                path = %self.io.display_path(),
                segment = self.segment,
                offset = self.offset,
                size = self.size,
                error = %e,
                "window write-back failed"
            );
        }
    }
}

impl std::fmt::Debug for Window<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Window")
            .field("segment", &self.segment)
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("mode", &self.mode)
            .field("zero_copy", &self.is_zero_copy())
            .finish()
    }
}

/// Walks the segments under a range, holding one reference at a time.
///
/// `f` receives the segment, the offset inside it and the matching range of
/// the window buffer.
fn for_each_piece(
    io: &Io,
    mut segment: u32,
    mut offset: u32,
    size: u32,
    mut f: impl FnMut(&SegmentGuard<'_>, usize, Range<usize>) -> IoResult<()>,
) -> IoResult<()> {
    let segment_size = io.segment_size();
    let mut done = 0usize;
    let mut remaining = size;
    while remaining > 0 {
        let piece = remaining.min(segment_size - offset);
        let seg = io.segment(segment)?;
        f(&seg, offset as usize, done..done + piece as usize)?;
        drop(seg);
        done += piece as usize;
        remaining -= piece;
        segment += 1;
        offset = 0;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IoConfig, IoContext, IoFlags};
    use std::sync::Arc;

    fn temporary() -> Arc<Io> {
        let ctx = IoContext::new(IoConfig::default());
        Io::create_temporary(&ctx, 0, 4096, 4, IoFlags::empty()).unwrap()
    }

    #[test]
    fn single_segment_window_is_zero_copy() {
        let io = temporary();
        let mut win = io.win_map(1, 100, 16, RwMode::ReadWrite).unwrap();
        assert!(win.is_zero_copy());
        win.as_mut_slice().copy_from_slice(b"0123456789abcdef");
        assert_eq!(io.segment_nref(1), Some(1));
        win.unmap().unwrap();
        assert_eq!(io.segment_nref(1), Some(0));

        let mut buf = [0u8; 16];
        io.segment(1).unwrap().read_at(100, &mut buf).unwrap();
        assert_eq!(&buf, b"0123456789abcdef");
    }

    #[test]
    fn large_offset_folds_into_segment() {
        let io = temporary();
        let win = io.win_map(0, 4096 * 2 + 8, 8, RwMode::ReadOnly).unwrap();
        assert_eq!(win.segment(), 2);
        assert_eq!(win.offset(), 8);
    }

    #[test]
    fn spanning_window_round_trips_through_segments() {
        let io = temporary();
        let data: Vec<u8> = (0..6000u32).map(|i| (i % 251) as u8).collect();

        let mut win = io.win_map(0, 3000, 6000, RwMode::WriteOnly).unwrap();
        assert!(!win.is_zero_copy());
        win.as_mut_slice().copy_from_slice(&data);
        win.unmap().unwrap();

        let win = io.win_map(0, 3000, 6000, RwMode::ReadOnly).unwrap();
        assert_eq!(win.as_slice(), &data[..]);
        drop(win);

        for segno in 0..3 {
            assert_eq!(io.segment_nref(segno), Some(0));
        }
        assert_eq!(io.stats().staged_windows(), 2);
    }

    #[test]
    fn dropped_write_window_still_writes_back() {
        let io = temporary();
        {
            let mut win = io.win_map(0, 4000, 200, RwMode::ReadWrite).unwrap();
            win.as_mut_slice().fill(0xAB);
        }
        let win = io.win_map(0, 4000, 200, RwMode::ReadOnly).unwrap();
        assert!(win.as_slice().iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn read_only_staging_is_discarded() {
        let io = temporary();
        {
            let mut win = io.win_map(0, 4000, 200, RwMode::ReadOnly).unwrap();
            win.as_mut_slice().fill(0xFF);
        }
        let win = io.win_map(0, 4000, 200, RwMode::ReadOnly).unwrap();
        assert!(win.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn invalid_windows_rejected() {
        let io = temporary();
        assert!(io.win_map(0, 0, 0, RwMode::ReadOnly).is_err());
        assert!(io.win_map(3, 4000, 200, RwMode::ReadOnly).is_err());
        assert!(io.win_map(4, 0, 1, RwMode::ReadOnly).is_err());
        assert!(io.win_map(3, 0, 4096, RwMode::ReadOnly).is_ok());
    }
}
