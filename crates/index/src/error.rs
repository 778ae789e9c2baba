use bincode::error::{DecodeError, EncodeError};
use thiserror::Error;

use crate::backend::Table;

/// Failures raised by the storage layer and the in-memory indexes.
///
/// | Variant | Meaning | Recovery |
/// |---|---|---|
/// | `Backend` | storage engine refused an operation | surface; nothing was applied |
/// | `Encode` / `Decode` / `Zstd` | value (de)serialisation failed | surface |
/// | `Corruption` | persisted row unreadable or indexes disagree with tables | rebuild, then retry |
/// | `DimensionMismatch` | embedding has the wrong length | caller fixes input |
/// | `NonFiniteEmbedding` | embedding contains NaN or infinity | caller fixes input |
/// | `SignatureLength` | signature does not match the LSH geometry | caller fixes config |
/// | `NotFound` | no row for the key | surface |
#[derive(Error, Debug, Clone)]
pub enum IndexError {
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Serialization encode error: {0}")]
    Encode(String),
    #[error("Serialization decode error: {0}")]
    Decode(String),
    #[error("Compression error: {0}")]
    Zstd(String),
    #[error("corrupt {table} row {key}: {reason}")]
    Corruption {
        table: Table,
        key: String,
        reason: String,
    },
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("embedding has non-finite components")]
    NonFiniteEmbedding,
    #[error("signature has {got} slots, index expects {expected}")]
    SignatureLength { expected: usize, got: usize },
    #[error("no {table} row for {key}")]
    NotFound { table: Table, key: String },
    #[error("invalid index config: {0}")]
    InvalidConfig(String),
}

impl From<EncodeError> for IndexError {
    fn from(e: EncodeError) -> Self {
        IndexError::Encode(e.to_string())
    }
}

impl From<DecodeError> for IndexError {
    fn from(e: DecodeError) -> Self {
        IndexError::Decode(e.to_string())
    }
}

impl From<std::io::Error> for IndexError {
    fn from(e: std::io::Error) -> Self {
        IndexError::Zstd(e.to_string())
    }
}

impl IndexError {
    pub fn backend<E: std::fmt::Display>(err: E) -> Self {
        Self::Backend(err.to_string())
    }

    pub fn corruption(table: Table, key: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Corruption {
            table,
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    /// True when a rebuild from the persisted tables may clear the error.
    pub fn is_corruption(&self) -> bool {
        matches!(self, IndexError::Corruption { .. })
    }
}
