// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Durable chunk storage for logpulse.
//!
//! Records are appended to size-bounded chunk files under one storage root.
//! Exactly one chunk is open for writing; full chunks are sealed with a
//! checksummed trailer and become immutable until retention deletes them.

pub mod error;
pub mod chunk;
pub mod store;
pub mod fixtures;

pub use error::{PersistenceError, Result};
pub use chunk::{ChunkMeta, ChunkReader};
pub use store::{ChunkIter, ChunkStore, StoreOptions};
