//! # SegIO Core
//!
//! Segment-mapped virtual files.
//!
//! An io object is a paged virtual file made of a fixed header region and up
//! to `max_segment` equally sized segments, spread over a family of shard
//! files and mapped into memory on demand.
//!
//! This crate provides:
//! - The on-disk header and layout arithmetic
//! - Reference-counted segment mapping with lock-free eviction
//! - Windows over byte ranges crossing segment boundaries
//! - The journal-array record codec, including records spanning shards
//! - Fixed-element arrays stored in segments
//! - The header lock shared by every process mapping a file
//! - A context holding the global tick and the registry swept by expiration
//!
//! ## Example
//!
//! ```rust,no_run
//! use segio_core::{Io, IoConfig, IoContext, IoFlags};
//!
//! let ctx = IoContext::new(IoConfig::default());
//! let io = Io::create(&ctx, "data.seg", 0, 1 << 16, 64, IoFlags::EXPIRE_SEGMENT).unwrap();
//! io.segment(3).unwrap().write_at(0, b"hello").unwrap();
//!
//! let mut buf = [0u8; 5];
//! io.segment(3).unwrap().read_at(0, &mut buf).unwrap();
//! assert_eq!(&buf, b"hello");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod array;
mod config;
mod context;
mod error;
mod expire;
mod files;
mod header;
mod io;
mod ja;
mod layout;
mod lock;
mod refcount;
mod segment;
mod stats;
mod window;

pub use array::{ArrayElement, ArraySpec};
pub use config::{IoConfig, DEFAULT_FORMAT_VERSION};
pub use context::IoContext;
pub use error::{IoError, IoResult};
pub use expire::ExpirePolicy;
pub use files::shard_path;
pub use header::{HeaderInfo, IO_IDSTR};
pub use io::{Io, IoFlags};
pub use ja::{JaEntryInfo, JA_EHEAD_SIZE, JA_INLINE_MAX};
pub use layout::{
    compute_base, compute_base_segment, compute_max_n_files, file_size_for_version, Layout,
    Location, FILE_SIZE_V0, FILE_SIZE_V1, IO_HEADER_SIZE, PAGE_SIZE,
};
pub use segment::SegmentGuard;
pub use stats::{IoStats, IoStatsSnapshot};
pub use window::{RwMode, Window};
