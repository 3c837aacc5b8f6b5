//! Error types for ledger access and slab storage

use thiserror::Error;

use crate::slab::SlabId;

/// Result type for ledger callbacks
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// Result type for slab storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors reported by a ledger implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Ledger failure: {0}")]
    Failure(String),

    #[error("Ledger callback panicked: {0}")]
    Panic(String),
}

impl LedgerError {
    /// Create a new ledger failure
    pub fn failure<S: Into<String>>(msg: S) -> Self {
        LedgerError::Failure(msg.into())
    }
}

/// Errors raised by the slab storage layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Slab not found: {0}")]
    SlabNotFound(SlabId),

    #[error("Slab {0} is not a {1}")]
    UnexpectedSlab(SlabId, &'static str),

    #[error("Index {index} out of bounds for container of length {length}")]
    IndexOutOfBounds { index: usize, length: usize },

    #[error("Value is not storable: {0}")]
    NonStorable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Slab validation failed: {0}")]
    Validation(String),
}

impl StorageError {
    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        StorageError::Validation(msg.into())
    }

    /// Create a new non-storable value error
    pub fn non_storable<S: Into<String>>(msg: S) -> Self {
        StorageError::NonStorable(msg.into())
    }
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
