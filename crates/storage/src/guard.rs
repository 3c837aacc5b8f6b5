//! Panic isolation for host-provided ledgers

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use ore_common::Address;

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{Ledger, StorageIndex};

/// Extract a readable message from a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Wraps a ledger so that panics inside its callbacks surface as
/// [`LedgerError::Panic`] instead of unwinding through the interpreter.
pub struct GuardedLedger<'a> {
    inner: &'a dyn Ledger,
}

impl<'a> GuardedLedger<'a> {
    /// Create a new guarded ledger
    pub fn new(inner: &'a dyn Ledger) -> Self {
        Self { inner }
    }

    fn guard<T>(&self, f: impl FnOnce() -> LedgerResult<T>) -> LedgerResult<T> {
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(result) => result,
            Err(payload) => Err(LedgerError::Panic(panic_message(payload.as_ref()))),
        }
    }
}

impl<'a> Ledger for GuardedLedger<'a> {
    fn get_value(&self, owner: Address, key: &[u8]) -> LedgerResult<Vec<u8>> {
        self.guard(|| self.inner.get_value(owner, key))
    }

    fn set_value(&self, owner: Address, key: &[u8], value: &[u8]) -> LedgerResult<()> {
        self.guard(|| self.inner.set_value(owner, key, value))
    }

    fn value_exists(&self, owner: Address, key: &[u8]) -> LedgerResult<bool> {
        self.guard(|| self.inner.value_exists(owner, key))
    }

    fn allocate_storage_index(&self, owner: Address) -> LedgerResult<StorageIndex> {
        self.guard(|| self.inner.allocate_storage_index(owner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PanickingLedger;

    impl Ledger for PanickingLedger {
        fn get_value(&self, _owner: Address, _key: &[u8]) -> LedgerResult<Vec<u8>> {
            panic!("ledger exploded")
        }

        fn set_value(&self, _owner: Address, _key: &[u8], _value: &[u8]) -> LedgerResult<()> {
            Ok(())
        }

        fn value_exists(&self, _owner: Address, _key: &[u8]) -> LedgerResult<bool> {
            Ok(false)
        }

        fn allocate_storage_index(&self, _owner: Address) -> LedgerResult<StorageIndex> {
            Err(LedgerError::failure("no indices"))
        }
    }

    #[test]
    fn test_panics_become_ledger_errors() {
        let inner = PanickingLedger;
        let ledger = GuardedLedger::new(&inner);
        let err = ledger.get_value(Address::ZERO, b"k").unwrap_err();
        assert_eq!(err, LedgerError::Panic("ledger exploded".to_string()));
        assert!(matches!(
            ledger.allocate_storage_index(Address::ZERO),
            Err(LedgerError::Failure(_))
        ));
    }
}
