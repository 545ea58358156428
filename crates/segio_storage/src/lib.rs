//! # SegIO Storage
//!
//! Platform capability layer for SegIO.
//!
//! This crate is the only place that talks to the operating system. It exposes
//! shard files as **positioned byte stores that can also be memory-mapped**;
//! it knows nothing about segments, headers or journal records.
//!
//! ## Design Principles
//!
//! - A shard supports `read_at`, `write_at`, `ensure_size`, `map` and `sync`
//! - Opening, removing and renaming files goes through a [`FileSystem`]
//! - Everything is `Send + Sync`; callers share shard handles across threads
//! - Closing a shard is dropping its last handle
//!
//! ## Available Implementations
//!
//! - [`OsFileSystem`] / [`FileBackend`] - `std::fs` plus `memmap2`
//! - [`Mapping::anonymous`] - anonymous memory for temporary objects
//!
//! ## Example
//!
//! ```rust,no_run
//! use segio_storage::{FileSystem, OpenMode, OsFileSystem};
//! use std::path::Path;
//!
//! let fs = OsFileSystem::new();
//! let shard = fs.open(Path::new("data.seg"), OpenMode::OpenOrCreate).unwrap();
//! shard.write_at(0, b"hello").unwrap();
//! let mut buf = [0u8; 5];
//! shard.read_at(0, &mut buf).unwrap();
//! assert_eq!(&buf, b"hello");
//! ```

#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod mapping;

pub use backend::{FileSystem, OpenMode, ShardBackend};
pub use error::{StorageError, StorageResult};
pub use file::{FileBackend, OsFileSystem};
pub use mapping::Mapping;
