//! Common types for the ORE execution core
//!
//! Addresses, code locations, storage paths and source ranges are shared by
//! the storage layer, the front-end and the interpreter.

pub mod address;
pub mod error;
pub mod location;
pub mod path;
pub mod range;

pub use address::Address;
pub use error::{CommonError, Result};
pub use location::Location;
pub use path::{Path, PathDomain};
pub use range::{Position, Range};
