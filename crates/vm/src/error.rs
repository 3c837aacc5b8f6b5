//! Error types for the interpreter and runtime
//!
//! Every failure is one of three kinds. User errors are caused by the
//! executed program and carry the location and source range of the
//! offending code. Internal errors are engine bugs. External errors come
//! from host collaborators: the ledger and the interface callbacks.

use std::fmt;

use ore_common::{Location, Range};
use ore_storage::{LedgerError, StorageError};
use ore_syntax::SyntaxError;
use thiserror::Error;

/// Result type for VM operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    User(#[from] UserError),

    #[error(transparent)]
    Internal(#[from] InternalError),

    #[error(transparent)]
    External(#[from] ExternalError),
}

/// Why a reference no longer points at a live resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationCause {
    Moved,
    Destroyed,
}

impl fmt::Display for InvalidationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidationCause::Moved => write!(f, "moved"),
            InvalidationCause::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// Pre- or post-condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionKind {
    Pre,
    Post,
}

impl fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionKind::Pre => write!(f, "pre-condition"),
            ConditionKind::Post => write!(f, "post-condition"),
        }
    }
}

/// Program-caused failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UserErrorKind {
    #[error("invalidated resource: `{0}` was moved and cannot be used anymore")]
    InvalidatedResourceUse(String),

    #[error("resource was destroyed and cannot be used anymore")]
    DestroyedResourceUse,

    #[error("referenced resource has been {cause}")]
    InvalidatedResourceReference { cause: InvalidationCause },

    #[error("recursive transfer of value: a container cannot be moved into itself")]
    RecursiveTransfer,

    #[error("failed to load type `{0}`")]
    TypeLoading(String),

    #[error("invalid container update: expected a subtype of `{expected}`, found `{actual}`")]
    ContainerMutation { expected: String, actual: String },

    #[error("type mismatch: expected `{expected}`, found `{actual}`")]
    TypeMismatch { expected: String, actual: String },

    #[error("unexpectedly found non-`{expected}` while force-casting value of type `{actual}`")]
    ForceCast { expected: String, actual: String },

    #[error("unexpectedly found nil while forcing an Optional value")]
    ForceNil,

    #[error("failed to force-move: target is not nil")]
    ForceAssignmentToNonNil,

    #[error("failed to decode argument: {0}")]
    ArgumentDecoding(String),

    #[error("incorrect number of arguments: expected {expected}, got {actual}")]
    ArgumentCount { expected: usize, actual: usize },

    #[error("incorrect number of signers: expected {expected}, got {actual}")]
    SignerCount { expected: usize, actual: usize },

    #[error("call stack limit of {0} exceeded")]
    CallStackLimitExceeded(usize),

    #[error("{kind} failed: {message}")]
    Condition { kind: ConditionKind, message: String },

    #[error("panic: {0}")]
    Panic(String),

    #[error("assertion failed: {0}")]
    Assertion(String),

    #[error("overflow")]
    Overflow,

    #[error("underflow")]
    Underflow,

    #[error("division by zero")]
    DivisionByZero,

    #[error("index out of bounds: {index}, but length is {length}")]
    IndexOutOfBounds { index: String, length: usize },

    #[error("failed to save object: path {path} in account {address} already stores an object")]
    Overwrite { address: String, path: String },

    #[error("invalid move: {0}")]
    InvalidMove(String),

    #[error("loss of resource: {0}")]
    ResourceLoss(String),

    #[error("incorrect transfer operation: expected `{expected}`")]
    IncorrectTransferOperation { expected: String },

    #[error("value is not storable: {0}")]
    NonStorableValue(String),

    #[error("value cannot be exported: {0}")]
    NonExportable(String),

    #[error("failed to dereference: {0}")]
    DereferenceFailure(String),

    #[error("invalid contract deployment: {0}")]
    InvalidContractDeployment(String),

    #[error("cannot assign to constant `{0}`")]
    AssignmentToConstant(String),

    #[error("cannot find `{0}` in this scope")]
    NotDeclared(String),

    #[error("cannot access `{member}`: requires entitlement {required}")]
    AccessDenied { member: String, required: String },

    #[error("value of type `{type_id}` has no member `{name}`")]
    MissingMember { type_id: String, name: String },

    #[error("invalid entry point: {0}")]
    InvalidEntryPoint(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Syntax(#[from] SyntaxError),
}

/// A program-caused failure, attributed to a source location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserError {
    pub kind: UserErrorKind,
    pub location: Option<Location>,
    pub range: Option<Range>,
}

impl UserError {
    pub fn new(kind: UserErrorKind) -> Self {
        Self {
            kind,
            location: None,
            range: None,
        }
    }
}

impl fmt::Display for UserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.location, &self.range) {
            (Some(location), Some(range)) => write!(f, "{}:{}: {}", location, range, self.kind),
            (Some(location), None) => write!(f, "{}: {}", location, self.kind),
            _ => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for UserError {}

/// Engine bugs
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InternalError {
    #[error("internal error: unreachable: {0}")]
    Unreachable(String),

    #[error("internal error: unexpected value: {0}")]
    UnexpectedValue(String),

    #[error("internal error: storage: {0}")]
    Storage(StorageError),

    #[error("internal error: panic: {0}")]
    Panic(String),
}

/// Failures originating in host collaborators
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExternalError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("host callback `{callback}` panicked: {message}")]
    CallbackPanic { callback: String, message: String },

    #[error("host callback `{callback}` failed: {message}")]
    Callback { callback: String, message: String },

    #[error("metering failed: {0}")]
    Metering(String),
}

impl Error {
    /// Create a new user error without position information
    pub fn user(kind: UserErrorKind) -> Self {
        Error::User(UserError::new(kind))
    }

    /// Create a new internal error for an unreachable state
    pub fn unreachable<S: Into<String>>(msg: S) -> Self {
        Error::Internal(InternalError::Unreachable(msg.into()))
    }

    /// Create a new internal error for a value of unexpected shape
    pub fn unexpected<S: Into<String>>(msg: S) -> Self {
        Error::Internal(InternalError::UnexpectedValue(msg.into()))
    }

    /// Attach a location and range to a user error that has none yet
    pub fn at(self, location: &Location, range: Range) -> Self {
        match self {
            Error::User(mut err) => {
                if err.location.is_none() {
                    err.location = Some(location.clone());
                    err.range = Some(range);
                }
                Error::User(err)
            }
            other => other,
        }
    }

    /// The kind of a user error
    pub fn user_kind(&self) -> Option<&UserErrorKind> {
        match self {
            Error::User(err) => Some(&err.kind),
            _ => None,
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Error::User(_))
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, Error::Internal(_))
    }

    pub fn is_external(&self) -> bool {
        matches!(self, Error::External(_))
    }
}

impl From<UserErrorKind> for Error {
    fn from(kind: UserErrorKind) -> Self {
        Error::user(kind)
    }
}

impl From<SyntaxError> for Error {
    fn from(err: SyntaxError) -> Self {
        Error::user(UserErrorKind::Syntax(err))
    }
}

impl From<LedgerError> for Error {
    fn from(err: LedgerError) -> Self {
        Error::External(ExternalError::Ledger(err))
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Ledger(err) => Error::External(ExternalError::Ledger(err)),
            StorageError::NonStorable(msg) => Error::user(UserErrorKind::NonStorableValue(msg)),
            StorageError::IndexOutOfBounds { index, length } => Error::user(UserErrorKind::IndexOutOfBounds {
                index: index.to_string(),
                length,
            }),
            other => Error::Internal(InternalError::Storage(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ore_common::{Address, Position};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_position_is_attached_once() {
        let location = Location::Script("s".into());
        let range = Range::new(Position::new(3, 5), Position::new(3, 9));
        let err = Error::user(UserErrorKind::ForceNil)
            .at(&location, range)
            .at(&Location::Script("outer".into()), Range::default());
        assert_eq!(err.to_string(), "s.s:3:5-3:9: unexpectedly found nil while forcing an Optional value");
    }

    #[test]
    fn test_storage_errors_are_classified() {
        let ledger: Error = StorageError::Ledger(LedgerError::failure("down")).into();
        assert!(ledger.is_external());
        let storable: Error = StorageError::non_storable("function").into();
        assert!(matches!(storable.user_kind(), Some(UserErrorKind::NonStorableValue(_))));
        let missing: Error = StorageError::SlabNotFound(ore_storage::SlabId::new(Address::ZERO, 1)).into();
        assert!(missing.is_internal());
    }
}
