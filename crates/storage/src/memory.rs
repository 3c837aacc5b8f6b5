//! In-memory ledger

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use dashmap::DashMap;
use ore_common::Address;

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{Ledger, StorageIndex};

/// In-memory ledger implementation, safe to share between executions
#[derive(Default)]
pub struct MemoryLedger {
    values: DashMap<(Address, Vec<u8>), Vec<u8>>,
    indices: DashMap<Address, u64>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryLedger {
    /// Create a new memory ledger instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `get_value` calls served so far
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of `set_value` calls served so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every subsequent write fail, to exercise error propagation
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Sorted keys stored for `owner`
    pub fn keys(&self, owner: Address) -> Vec<Vec<u8>> {
        let mut keys: Vec<Vec<u8>> = self
            .values
            .iter()
            .filter(|entry| entry.key().0 == owner)
            .map(|entry| entry.key().1.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Total number of stored keys
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Ledger for MemoryLedger {
    fn get_value(&self, owner: Address, key: &[u8]) -> LedgerResult<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .values
            .get(&(owner, key.to_vec()))
            .map(|value| value.clone())
            .unwrap_or_default())
    }

    fn set_value(&self, owner: Address, key: &[u8], value: &[u8]) -> LedgerResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LedgerError::failure("writes are disabled"));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        if value.is_empty() {
            self.values.remove(&(owner, key.to_vec()));
        } else {
            self.values.insert((owner, key.to_vec()), value.to_vec());
        }
        Ok(())
    }

    fn value_exists(&self, owner: Address, key: &[u8]) -> LedgerResult<bool> {
        Ok(self.values.contains_key(&(owner, key.to_vec())))
    }

    fn allocate_storage_index(&self, owner: Address) -> LedgerResult<StorageIndex> {
        let mut next = self.indices.entry(owner).or_insert(0);
        *next += 1;
        Ok(StorageIndex(*next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_memory_ledger_basic_operations() {
        let ledger = MemoryLedger::new();
        let owner = Address::from_u64(1);

        ledger.set_value(owner, b"key", b"data").unwrap();
        assert_eq!(ledger.get_value(owner, b"key").unwrap(), b"data".to_vec());
        assert!(ledger.value_exists(owner, b"key").unwrap());
        assert!(!ledger.value_exists(Address::from_u64(2), b"key").unwrap());

        ledger.set_value(owner, b"key", b"").unwrap();
        assert!(ledger.get_value(owner, b"key").unwrap().is_empty());
        assert!(ledger.is_empty());
        assert_eq!(ledger.write_count(), 2);
    }

    #[test]
    fn test_storage_indices_are_per_owner() {
        let ledger = MemoryLedger::new();
        let a = Address::from_u64(1);
        let b = Address::from_u64(2);
        assert_eq!(ledger.allocate_storage_index(a).unwrap(), StorageIndex(1));
        assert_eq!(ledger.allocate_storage_index(a).unwrap(), StorageIndex(2));
        assert_eq!(ledger.allocate_storage_index(b).unwrap(), StorageIndex(1));
    }

    #[test]
    fn test_failing_writes() {
        let ledger = MemoryLedger::new();
        ledger.set_fail_writes(true);
        assert!(ledger.set_value(Address::ZERO, b"k", b"v").is_err());
        assert_eq!(ledger.write_count(), 0);
    }
}
