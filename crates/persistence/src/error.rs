// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use logpulse_kernel::{ChunkId, KernelError};
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Chunk {0} not found")]
    NotFound(ChunkId),
    #[error("Chunk {0} is open for writing")]
    ChunkOpen(ChunkId),
    #[error("Chunk {0} is not sealed")]
    NotSealed(ChunkId),
    #[error("Invalid magic bytes in header")]
    InvalidMagic,
    #[error("Checksum mismatch: expected {expected}, found {found}")]
    ChecksumMismatch {
        expected: u64,
        found: u64,
    },
    #[error("Invalid data format: {0}")]
    InvalidFormat(String),
    #[error("Record codec error: {0}")]
    Codec(#[from] KernelError),
}

impl PersistenceError {
    /// Missing chunk or missing file.
    pub fn is_not_found(&self) -> bool {
        match self {
            PersistenceError::NotFound(_) => true,
            PersistenceError::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PersistenceError>;
