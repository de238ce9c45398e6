//! Local object store for synced records.
//!
//! This module provides a feature-agnostic persistence layer that:
//! - Stores records as JSON keyed by entity type + stable id
//! - Selects records through scopes (predicate + sort order)
//! - Serializes write tasks and saves each one atomically
//! - Notifies observers of the scopes a save touched

mod database;
mod observer;
mod scope;
mod storage;
mod traits;

pub use database::{Database, WriteContext};
pub use observer::{Change, Observers};
pub use scope::{Predicate, Scope, SortKey};
pub use storage::{CacheEntry, RecordStore, SqliteStorage, WriteBatch, WriteOp};
pub use traits::{CacheResult, CacheSource, Record};
