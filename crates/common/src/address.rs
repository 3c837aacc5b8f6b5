//! Account addresses

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CommonError, Result};

/// Length of an account address in bytes
pub const ADDRESS_LENGTH: usize = 8;

/// An 8-byte account address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Address(pub [u8; ADDRESS_LENGTH]);

impl Address {
    /// The zero address. Values owned by it are temporary and never persisted.
    pub const ZERO: Address = Address([0; ADDRESS_LENGTH]);

    /// Create an address from a big-endian integer
    pub fn from_u64(value: u64) -> Self {
        Address(value.to_be_bytes())
    }

    /// Create an address from up to eight bytes, left-padded with zeros
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > ADDRESS_LENGTH {
            return Err(CommonError::invalid_address(format!(
                "address too long: {} bytes",
                bytes.len()
            )));
        }
        let mut raw = [0u8; ADDRESS_LENGTH];
        raw[ADDRESS_LENGTH - bytes.len()..].copy_from_slice(bytes);
        Ok(Address(raw))
    }

    /// Parse a hex address with or without `0x` prefix; short forms are padded
    pub fn from_hex(text: &str) -> Result<Self> {
        let digits = text.strip_prefix("0x").unwrap_or(text);
        if digits.is_empty() || digits.len() > ADDRESS_LENGTH * 2 {
            return Err(CommonError::invalid_address(text));
        }
        let padded = format!("{:0>width$}", digits, width = ADDRESS_LENGTH * 2);
        let bytes = hex::decode(padded).map_err(|_| CommonError::invalid_address(text))?;
        Address::from_bytes(&bytes)
    }

    /// The address as an integer
    pub fn to_u64(&self) -> u64 {
        u64::from_be_bytes(self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        *self == Address::ZERO
    }

    /// Hex digits without prefix, full width
    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Hex digits with `0x` prefix, full width
    pub fn hex_with_prefix(&self) -> String {
        format!("0x{}", self.hex())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex_with_prefix())
    }
}

impl FromStr for Address {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self> {
        Address::from_hex(s)
    }
}

impl From<u64> for Address {
    fn from(value: u64) -> Self {
        Address::from_u64(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_short_hex_is_padded() {
        let address = Address::from_hex("0x1").unwrap();
        assert_eq!(address, Address::from_u64(1));
        assert_eq!(address.to_string(), "0x0000000000000001");
    }

    #[test]
    fn test_rejects_long_address() {
        assert!(Address::from_hex("0x000000000000000001").is_err());
        assert!(Address::from_bytes(&[0; 9]).is_err());
        assert!(Address::from_hex("0xzz").is_err());
    }
}
