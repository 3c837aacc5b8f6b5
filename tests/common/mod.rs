//! Shared setup for the end-to-end tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use ore::{Address, Context, Error, ExportedValue, Location, MemoryInterface, MemoryLedger, Runtime, RuntimeConfig};

pub const ALICE: u64 = 0x1;
pub const BOB: u64 = 0x2;

pub const DEPLOY: &str = r#"
transaction(name: String, code: String) {
    prepare(signer: auth(Contracts) &Account) {
        signer.contracts.add(name: name, code: code)
    }
}
"#;

pub const UPDATE: &str = r#"
transaction(name: String, code: String) {
    prepare(signer: auth(Contracts) &Account) {
        signer.contracts.update(name: name, code: code)
    }
}
"#;

pub fn address(value: u64) -> Address {
    Address::from_u64(value)
}

/// A runtime with an in-memory host and ledger
pub struct Harness {
    pub runtime: Runtime,
    pub interface: MemoryInterface,
    pub ledger: MemoryLedger,
    executions: AtomicUsize,
}

impl Harness {
    pub fn new() -> Self {
        let config = RuntimeConfig {
            slab_validation_enabled: true,
            ..RuntimeConfig::default()
        };
        Self::with_config(config)
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            runtime: Runtime::new(config),
            interface: MemoryInterface::new(),
            ledger: MemoryLedger::new(),
            executions: AtomicUsize::new(0),
        }
    }

    fn next_id(&self) -> String {
        self.executions.fetch_add(1, Ordering::SeqCst).to_string()
    }

    pub fn script(&self, code: &str, arguments: &[ExportedValue]) -> Result<ExportedValue, Error> {
        let location = Location::Script(self.next_id());
        self.runtime
            .execute_script(code, arguments, Context::new(&self.interface, &self.ledger, &location))
    }

    pub fn transaction(&self, code: &str, arguments: &[ExportedValue], signers: &[u64]) -> Result<(), Error> {
        self.interface
            .set_signers(signers.iter().copied().map(Address::from_u64).collect());
        let location = Location::Transaction(self.next_id());
        self.runtime
            .execute_transaction(code, arguments, Context::new(&self.interface, &self.ledger, &location))
    }

    pub fn deploy(&self, account: u64, name: &str, code: &str) -> Result<(), Error> {
        self.transaction(
            DEPLOY,
            &[ExportedValue::string(name), ExportedValue::string(code)],
            &[account],
        )
    }

    pub fn update(&self, account: u64, name: &str, code: &str) -> Result<(), Error> {
        self.transaction(
            UPDATE,
            &[ExportedValue::string(name), ExportedValue::string(code)],
            &[account],
        )
    }

    pub fn read_stored(&self, account: u64, path: &ore::Path) -> Result<Option<ExportedValue>, Error> {
        let location = Location::Script(self.next_id());
        self.runtime.read_stored(
            Address::from_u64(account),
            path,
            Context::new(&self.interface, &self.ledger, &location),
        )
    }
}
