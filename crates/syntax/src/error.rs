//! Front-end errors

use std::fmt;

use ore_common::{Location, Range};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for front-end operations
pub type Result<T> = std::result::Result<T, SyntaxError>;

/// A single structural checking error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckError {
    pub message: String,
    pub range: Range,
}

impl CheckError {
    pub fn new<S: Into<String>>(message: S, range: Range) -> Self {
        Self {
            message: message.into(),
            range,
        }
    }
}

impl fmt::Display for CheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.range.start, self.message)
    }
}

/// Errors produced while parsing and checking a program
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyntaxError {
    #[error("Parse error in {location} at {range}: {message}")]
    Parse {
        location: Location,
        range: Range,
        message: String,
    },

    #[error("Checking {location} failed: {}", .errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Check {
        location: Location,
        errors: Vec<CheckError>,
    },
}

impl SyntaxError {
    /// Source range of the first error
    pub fn range(&self) -> Option<Range> {
        match self {
            SyntaxError::Parse { range, .. } => Some(*range),
            SyntaxError::Check { errors, .. } => errors.first().map(|e| e.range),
        }
    }

    pub fn location(&self) -> &Location {
        match self {
            SyntaxError::Parse { location, .. } | SyntaxError::Check { location, .. } => location,
        }
    }
}
