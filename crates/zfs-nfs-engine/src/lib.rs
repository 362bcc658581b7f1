//! zfs-nfs-engine - Storage pool capability used by the volume lifecycle core
//!
//! This crate provides:
//! - The `PoolEngine` trait (dataset lookup, create, snapshot, clone, destroy,
//!   property reads, mountpoint ownership)
//! - `ZfsCliEngine`, backed by the host `zfs` command
//! - `MockPoolEngine`, an in-memory pool for tests
//! - Error types with miette diagnostics

// Allow unused assignments for diagnostic fields - they're used by the thiserror/miette macros
#![allow(unused_assignments)]

pub mod command;
pub mod error;
pub mod pool;

pub use error::{EngineError, Result};
#[cfg(unix)]
pub use pool::ZfsCliEngine;
pub use pool::{
    split_snapshot, Dataset, DatasetKind, EngineCall, MockPoolEngine, PoolEngine, Properties,
};
