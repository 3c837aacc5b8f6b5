//! Ledger adapter
//!
//! The ledger is the durable key/value substrate owned by the host. Keys are
//! scoped by owner address. An empty value means the key is absent.

use ore_common::Address;
use serde::{Deserialize, Serialize};

use crate::error::LedgerResult;

/// Tag byte prefixed to every slab key
pub const STORAGE_INDEX_TAG: u8 = b'$';

/// A storage index allocated by the ledger for an owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StorageIndex(pub u64);

impl StorageIndex {
    /// The ledger key of this index: tag byte followed by the big-endian index
    pub fn to_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(9);
        key.push(STORAGE_INDEX_TAG);
        key.extend_from_slice(&self.0.to_be_bytes());
        key
    }

    /// Parse a ledger key produced by [`StorageIndex::to_key`]
    pub fn from_key(key: &[u8]) -> Option<Self> {
        match key.split_first() {
            Some((&STORAGE_INDEX_TAG, rest)) if rest.len() == 8 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(rest);
                Some(StorageIndex(u64::from_be_bytes(raw)))
            }
            _ => None,
        }
    }
}

/// Byte-oriented storage provided by the host
pub trait Ledger: Send + Sync {
    /// Get the value stored under `key` for `owner`; empty if absent
    fn get_value(&self, owner: Address, key: &[u8]) -> LedgerResult<Vec<u8>>;

    /// Set the value under `key`; an empty value deletes the key
    fn set_value(&self, owner: Address, key: &[u8], value: &[u8]) -> LedgerResult<()>;

    /// Whether a non-empty value is stored under `key`
    fn value_exists(&self, owner: Address, key: &[u8]) -> LedgerResult<bool>;

    /// Allocate a fresh storage index for `owner`
    fn allocate_storage_index(&self, owner: Address) -> LedgerResult<StorageIndex>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_storage_index_key_layout() {
        let key = StorageIndex(0x0102).to_key();
        assert_eq!(key, vec![b'$', 0, 0, 0, 0, 0, 0, 1, 2]);
        assert_eq!(StorageIndex::from_key(&key), Some(StorageIndex(0x0102)));
        assert_eq!(StorageIndex::from_key(b"storage"), None);
    }
}
