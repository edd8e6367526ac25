//! Error types for pagedkv

use thiserror::Error;

/// Result type alias using pagedkv's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for paged KV-cache append operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid KV layout: {0} (expected \"NHD\" or \"HND\")")]
    InvalidLayout(String),

    #[error("Malformed index array `{name}`: {reason}")]
    MalformedIndex { name: &'static str, reason: String },

    #[error(
        "Capacity exceeded for sequence {seq}: appending {append_len} rows \
         but the page table only covers {capacity}"
    )]
    CapacityExceeded {
        seq: usize,
        append_len: usize,
        capacity: usize,
    },

    #[error("Index out of range: {0}")]
    IndexOutOfRange(String),

    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    #[error("Dtype mismatch: expected {expected}, got {got}")]
    DtypeMismatch { expected: String, got: String },

    #[error("Overlapping write: page {page} slot {slot} is targeted by rows {first} and {second}")]
    OverlappingWrite {
        page: usize,
        slot: usize,
        first: usize,
        second: usize,
    },

    #[error("Unknown append kernel: {0}")]
    UnknownKernel(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn malformed(name: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedIndex {
            name,
            reason: reason.into(),
        }
    }
}
