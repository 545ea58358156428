//! # SegIO Testkit
//!
//! Test utilities for SegIO.
//!
//! This crate provides:
//! - Fixtures creating io objects in temporary directories
//! - Property-based test generators using proptest
//! - A file system wrapper that counts and fails operations
//! - Concurrency stress drivers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use segio_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_io() {
//!     with_temp_io(|io| {
//!         io.segment(0).unwrap().write_at(0, b"data").unwrap();
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use faults::*;
pub use fixtures::*;
pub use generators::*;
pub use stress::*;
