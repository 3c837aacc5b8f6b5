//! Storage paths

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CommonError, Result};

/// Domain of a storage path
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PathDomain {
    Storage,
    Public,
    Private,
}

impl PathDomain {
    /// The domain identifier, also used as the ledger key of the domain map
    pub fn identifier(&self) -> &'static str {
        match self {
            PathDomain::Storage => "storage",
            PathDomain::Public => "public",
            PathDomain::Private => "private",
        }
    }

    pub fn from_identifier(identifier: &str) -> Result<Self> {
        match identifier {
            "storage" => Ok(PathDomain::Storage),
            "public" => Ok(PathDomain::Public),
            "private" => Ok(PathDomain::Private),
            other => Err(CommonError::InvalidPathDomain(other.to_string())),
        }
    }

    /// Capability paths are public or private
    pub fn is_capability(&self) -> bool {
        matches!(self, PathDomain::Public | PathDomain::Private)
    }
}

/// A path into an account's storage, e.g. `/storage/vault`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Path {
    pub domain: PathDomain,
    pub identifier: String,
}

impl Path {
    /// Create a new path
    pub fn new<S: Into<String>>(domain: PathDomain, identifier: S) -> Self {
        Self {
            domain,
            identifier: identifier.into(),
        }
    }

    pub fn storage<S: Into<String>>(identifier: S) -> Self {
        Self::new(PathDomain::Storage, identifier)
    }

    pub fn public<S: Into<String>>(identifier: S) -> Self {
        Self::new(PathDomain::Public, identifier)
    }

    pub fn private<S: Into<String>>(identifier: S) -> Self {
        Self::new(PathDomain::Private, identifier)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.domain.identifier(), self.identifier)
    }
}

impl FromStr for Path {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self> {
        let rest = s
            .strip_prefix('/')
            .ok_or_else(|| CommonError::invalid_path(s))?;
        let (domain, identifier) = rest
            .split_once('/')
            .ok_or_else(|| CommonError::invalid_path(s))?;
        if identifier.is_empty() || identifier.contains('/') {
            return Err(CommonError::invalid_path(s));
        }
        Ok(Path::new(PathDomain::from_identifier(domain)?, identifier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_and_display() {
        let path: Path = "/storage/r".parse().unwrap();
        assert_eq!(path, Path::storage("r"));
        assert_eq!(path.to_string(), "/storage/r");
        assert!("/nowhere/r".parse::<Path>().is_err());
        assert!("storage/r".parse::<Path>().is_err());
    }
}
