//! Error types for common value parsing

use thiserror::Error;

/// Common result type
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors raised while parsing common values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    /// Address text or bytes are malformed
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Path text is malformed
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Path domain identifier is unknown
    #[error("Invalid path domain: {0}")]
    InvalidPathDomain(String),
}

impl CommonError {
    /// Create a new invalid address error
    pub fn invalid_address<S: Into<String>>(msg: S) -> Self {
        CommonError::InvalidAddress(msg.into())
    }

    /// Create a new invalid path error
    pub fn invalid_path<S: Into<String>>(msg: S) -> Self {
        CommonError::InvalidPath(msg.into())
    }
}
