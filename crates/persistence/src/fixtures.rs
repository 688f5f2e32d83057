// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Builders for chunk files and records used by tests across the workspace.

use crate::chunk::{self, ChunkHeader, SealTrailer};
use crate::error::{PersistenceError, Result};
use crate::store::chunk_path;
use logpulse_kernel::config::NANOS_PER_DAY;
use logpulse_kernel::{ChunkId, LabelSet, LogRecord, Timestamp};
use std::fs;
use std::path::{Path, PathBuf};

/// A record stamped `base + i` with a `seq` label and a short message.
pub fn sample_record(i: u64) -> LogRecord {
    // Names are distinct, so this never falls back.
    let labels = LabelSet::from_pairs(vec![("app", "fixture".to_string()), ("seq", i.to_string())])
        .unwrap_or_default();
    LogRecord::new(
        Timestamp(1_700_000_000_000_000_000 + i as i64),
        labels,
        format!("fixture line {}", i),
    )
}

/// A record whose frame occupies exactly `target` bytes of a chunk.
pub fn record_with_frame_len(target: u64) -> Result<LogRecord> {
    let build = |len: usize| LogRecord::new(Timestamp(1_700_000_000_000_000_000), LabelSet::new(), vec![b'x'; len]);

    let base = chunk::frame_len(&build(0))?;
    if target < base {
        return Err(PersistenceError::InvalidFormat(format!(
            "smallest frame is {} bytes",
            base
        )));
    }

    // The message length prefix is a varint, so step down until it fits.
    let mut len = (target - base) as usize;
    loop {
        let record = build(len);
        let got = chunk::frame_len(&record)?;
        if got == target {
            return Ok(record);
        }
        if got < target || len == 0 {
            return Err(PersistenceError::InvalidFormat(format!(
                "no record frames to exactly {} bytes",
                target
            )));
        }
        len -= 1;
    }
}

pub fn days_ago(now: Timestamp, days: i64) -> Timestamp {
    Timestamp(now.0 - days * NANOS_PER_DAY)
}

/// Write a chunk file directly, bypassing the store.
pub fn write_chunk(
    root: &Path,
    id: ChunkId,
    created_at: Timestamp,
    records: &[LogRecord],
    sealed: bool,
) -> Result<PathBuf> {
    fs::create_dir_all(root)?;
    let header = ChunkHeader {
        chunk_id: id,
        created_at,
    };

    let mut bytes = header.to_bytes().to_vec();
    let mut data_bytes = 0;
    for record in records {
        let frame = chunk::encode_frame(record)?;
        data_bytes += frame.len() as u64;
        bytes.extend_from_slice(&frame);
    }
    if sealed {
        let trailer = SealTrailer {
            record_count: records.len() as u64,
            data_bytes,
        };
        bytes.extend_from_slice(&trailer.to_bytes());
    }

    let path = chunk_path(root, id);
    fs::write(&path, bytes)?;
    Ok(path)
}
