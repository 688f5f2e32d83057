// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Error types.

use thiserror::Error;

/// A record rejected at the ingest boundary. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("record timestamp is missing or not positive: {0}")]
    MissingTimestamp(i64),
    #[error("label name is empty")]
    EmptyLabelName,
    #[error("invalid label name: {0:?}")]
    InvalidLabelName(String),
    #[error("duplicate label: {0:?}")]
    DuplicateLabel(String),
    #[error("too many labels: {count} (max {max})")]
    TooManyLabels { count: usize, max: usize },
    #[error("label {name:?} is too long: {len} bytes (max {max})")]
    LabelTooLong { name: String, len: usize, max: usize },
}

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("record encoding failed: {0}")]
    Encode(String),
    #[error("record decoding failed: {0}")]
    Decode(String),
}

pub type KernelResult<T> = core::result::Result<T, KernelError>;
