// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Record codec.
//!
//! Records are serialized with bincode's serde mode and the standard config.
//! Framing (length prefix, checksum) is the storage layer's concern.

use crate::error::{KernelError, KernelResult};
use crate::types::record::LogRecord;

pub fn encode_record(record: &LogRecord) -> KernelResult<Vec<u8>> {
    bincode::serde::encode_to_vec(record, bincode::config::standard())
        .map_err(|e| KernelError::Encode(e.to_string()))
}

/// Decode exactly one record; trailing bytes are an error.
pub fn decode_record(bytes: &[u8]) -> KernelResult<LogRecord> {
    let (record, read): (LogRecord, usize) =
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| KernelError::Decode(e.to_string()))?;
    if read != bytes.len() {
        return Err(KernelError::Decode(format!(
            "{} trailing bytes after record",
            bytes.len() - read
        )));
    }
    Ok(record)
}
