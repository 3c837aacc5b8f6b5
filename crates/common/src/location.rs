//! Code locations
//!
//! A location identifies a unit of source code. Locations are the keys of
//! the program cache and the prefix of every composite type identifier.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::address::Address;

/// Identifies a unit of source code
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Location {
    /// A contract deployed to an account
    Address { address: Address, name: String },
    /// A named source string, mostly used by tests and tooling
    String(String),
    /// A transaction, identified by its id
    Transaction(String),
    /// A script, identified by its id
    Script(String),
    /// A built-in location such as `flow`
    Identifier(String),
}

impl Location {
    /// Create a new address location
    pub fn address<S: Into<String>>(address: Address, name: S) -> Self {
        Location::Address {
            address,
            name: name.into(),
        }
    }

    /// The address of an address location
    pub fn address_of(&self) -> Option<Address> {
        match self {
            Location::Address { address, .. } => Some(*address),
            _ => None,
        }
    }

    /// Whether this location is a top-level program (script or transaction)
    pub fn is_top_level(&self) -> bool {
        matches!(self, Location::Transaction(_) | Location::Script(_))
    }

    /// Type identifier prefix of this location
    pub fn type_id_prefix(&self) -> String {
        match self {
            Location::Address { address, .. } => format!("A.{}", address.hex()),
            Location::String(s) => format!("S.{}", s),
            Location::Transaction(id) => format!("t.{}", id),
            Location::Script(id) => format!("s.{}", id),
            Location::Identifier(id) => id.clone(),
        }
    }

    /// Fully qualified type identifier of a type declared at this location
    pub fn type_id(&self, qualified_identifier: &str) -> String {
        if qualified_identifier.is_empty() {
            return self.type_id_prefix();
        }
        format!("{}.{}", self.type_id_prefix(), qualified_identifier)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Address { address, name } => write!(f, "{}.{}", address, name),
            Location::String(s) => write!(f, "S.{}", s),
            Location::Transaction(id) => write!(f, "t.{}", id),
            Location::Script(id) => write!(f, "s.{}", id),
            Location::Identifier(id) => write!(f, "{}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_type_ids() {
        let location = Location::address(Address::from_u64(1), "Test");
        assert_eq!(location.type_id("Test.R"), "A.0000000000000001.Test.R");
        assert_eq!(Location::Script("ab".into()).type_id("R"), "s.ab.R");
        assert_eq!(Location::Identifier("flow".into()).type_id("AccountCreated"), "flow.AccountCreated");
    }

    #[test]
    fn test_top_level() {
        assert!(Location::Transaction("1".into()).is_top_level());
        assert!(!Location::address(Address::ZERO, "C").is_top_level());
    }
}
