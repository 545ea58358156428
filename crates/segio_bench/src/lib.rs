//! Benchmarks for SegIO.

#![warn(missing_docs)]

pub mod utils;
