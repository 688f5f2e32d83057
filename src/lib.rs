// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.

//! logpulse-kernel: the I/O-free data model of the logpulse ingestion engine.
//!
//! Records, label sets, timestamps, chunk identities, the record codec and
//! retention arithmetic live here. Durable storage is in `logpulse-persistence`,
//! the async service in `logpulse-node`.

pub mod config;
pub mod error;
pub mod types;
pub mod codec;
pub mod retention;

pub use error::{KernelError, KernelResult, ValidationError};
pub use types::id::ChunkId;
pub use types::labels::LabelSet;
pub use types::record::LogRecord;
pub use types::timestamp::{Timestamp, TimestampClock};
pub use retention::RetentionWindow;

#[cfg(test)]
pub mod tests;
