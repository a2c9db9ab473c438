//! Object and reference storage for Tably.
//!
//! This crate provides content-addressed storage for commits, tables
//! and blocks, plus reference management with atomic compare-and-swap
//! and reflogs.

mod error;
mod object;
mod refs;
#[cfg(feature = "rocksdb-backend")]
mod rocksdb;
mod store;
mod sum;

pub use error::StorageError;
pub use object::{Commit, ObjectType, Table};
pub use refs::{now_secs, save_ref, Actor, MemoryRefStore, RefStore, Reflog};
#[cfg(feature = "rocksdb-backend")]
pub use self::rocksdb::{RocksDbConfig, RocksDbStore};
pub use store::{MemoryStore, ObjectStore};
pub use sum::Sum;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
