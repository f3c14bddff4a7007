#![forbid(unsafe_code)]
//! chainfs public API facade.
//!
//! Re-exports `cfs-core` so downstream consumers (the CLI, embedders) have
//! one stable dependency.

pub use cfs_core::*;
