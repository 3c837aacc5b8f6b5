//! Host collaborators
//!
//! Everything the runtime needs from its host goes through [`Interface`]:
//! code and contract management, account data, events, crypto, metering,
//! logging and the signing accounts of a transaction. Every method has a
//! default so a host only implements what it supports.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, bail};
use dashmap::DashMap;
use ore_common::{Address, Location};
use ore_syntax::ast::ImportLocation;
use ore_syntax::Program;
use serde::{Deserialize, Serialize};

use crate::crypto::{default_hash, AccountKeyInfo, HashAlgorithm, PublicKeyInfo};
use crate::error::Result;
use crate::export::ExportedValue;

/// A concrete location an import resolves to, with the identifiers it
/// provides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedLocation {
    pub location: Location,
    pub identifiers: Vec<String>,
}

/// An emitted event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub type_id: String,
    pub fields: Vec<(String, ExportedValue)>,
}

impl Event {
    pub fn field(&self, name: &str) -> Option<&ExportedValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// Points at which computation is metered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComputationKind {
    Statement,
    LoopIteration,
    FunctionInvocation,
    Transfer,
    Destroy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryKind {
    Array,
    Dictionary,
    Composite,
    String,
    Reference,
}

/// Memory allocated by an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub kind: MemoryKind,
    pub amount: u64,
}

impl MemoryUsage {
    pub fn new(kind: MemoryKind, amount: u64) -> Self {
        Self { kind, amount }
    }
}

/// Loader handed to [`Interface::get_or_load_program`]
pub type ProgramLoader<'a> = dyn FnMut() -> Result<Arc<Program>> + 'a;

pub trait Interface: Send + Sync {
    // Code

    /// Source code of a location
    fn get_code(&self, location: &Location) -> anyhow::Result<Option<String>> {
        match location {
            Location::Address { address, name } => self.get_account_contract_code(*address, name),
            _ => Ok(None),
        }
    }

    /// Expand an import into concrete locations. An address import without
    /// identifiers imports every contract of that account.
    fn resolve_location(
        &self,
        identifiers: &[String],
        location: &ImportLocation,
    ) -> anyhow::Result<Vec<ResolvedLocation>> {
        Ok(match location {
            ImportLocation::Address(address) => {
                let names = if identifiers.is_empty() {
                    self.get_account_contract_names(*address)?
                } else {
                    identifiers.to_vec()
                };
                names
                    .into_iter()
                    .map(|name| ResolvedLocation {
                        location: Location::address(*address, name.clone()),
                        identifiers: vec![name],
                    })
                    .collect()
            }
            ImportLocation::String(name) => vec![ResolvedLocation {
                location: Location::String(name.clone()),
                identifiers: identifiers.to_vec(),
            }],
            ImportLocation::Identifier(name) => vec![ResolvedLocation {
                location: Location::Identifier(name.clone()),
                identifiers: identifiers.to_vec(),
            }],
        })
    }

    /// Return a cached program or run `load`
    fn get_or_load_program(&self, _location: &Location, load: &mut ProgramLoader<'_>) -> Result<Arc<Program>> {
        load()
    }

    /// Called after a transaction that updated contract code committed
    fn invalidate_programs(&self, _locations: &[Location]) {}

    // Contracts

    fn get_account_contract_code(&self, _address: Address, _name: &str) -> anyhow::Result<Option<String>> {
        Ok(None)
    }

    fn update_account_contract_code(&self, address: Address, name: &str, _code: &str) -> anyhow::Result<()> {
        bail!("cannot update contract {} of {}: contract updates are not supported", name, address)
    }

    fn remove_account_contract_code(&self, address: Address, name: &str) -> anyhow::Result<()> {
        bail!("cannot remove contract {} of {}: contract removal is not supported", name, address)
    }

    fn get_account_contract_names(&self, _address: Address) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }

    // Accounts

    fn create_account(&self, _payer: Address) -> anyhow::Result<Address> {
        bail!("account creation is not supported")
    }

    fn add_account_key(
        &self,
        _address: Address,
        _public_key: &PublicKeyInfo,
        _hash_algorithm: HashAlgorithm,
        _weight: u64,
    ) -> anyhow::Result<AccountKeyInfo> {
        bail!("account keys are not supported")
    }

    fn revoke_account_key(&self, _address: Address, _index: u32) -> anyhow::Result<Option<AccountKeyInfo>> {
        Ok(None)
    }

    fn get_account_key(&self, _address: Address, _index: u32) -> anyhow::Result<Option<AccountKeyInfo>> {
        Ok(None)
    }

    /// Balance scaled by 10^8
    fn get_account_balance(&self, _address: Address) -> anyhow::Result<u64> {
        Ok(0)
    }

    fn get_account_available_balance(&self, address: Address) -> anyhow::Result<u64> {
        self.get_account_balance(address)
    }

    fn get_storage_used(&self, _address: Address) -> anyhow::Result<u64> {
        Ok(0)
    }

    fn get_storage_capacity(&self, _address: Address) -> anyhow::Result<u64> {
        Ok(0)
    }

    // Events and logs

    fn emit_event(&self, _event: &Event) -> anyhow::Result<()> {
        Ok(())
    }

    fn program_log(&self, _message: &str) -> anyhow::Result<()> {
        Ok(())
    }

    // Crypto

    fn hash(&self, data: &[u8], tag: &str, algorithm: HashAlgorithm) -> anyhow::Result<Vec<u8>> {
        default_hash(data, tag, algorithm).ok_or_else(|| anyhow!("{} is not supported", algorithm))
    }

    fn verify_signature(
        &self,
        _signature: &[u8],
        _tag: &str,
        _signed_data: &[u8],
        _public_key: &PublicKeyInfo,
        _hash_algorithm: HashAlgorithm,
    ) -> anyhow::Result<bool> {
        bail!("signature verification is not supported")
    }

    fn validate_public_key(&self, _public_key: &PublicKeyInfo) -> anyhow::Result<()> {
        Ok(())
    }

    fn bls_aggregate_signatures(&self, _signatures: &[Vec<u8>]) -> anyhow::Result<Vec<u8>> {
        bail!("BLS signature aggregation is not supported")
    }

    fn bls_aggregate_public_keys(&self, _keys: &[PublicKeyInfo]) -> anyhow::Result<PublicKeyInfo> {
        bail!("BLS public key aggregation is not supported")
    }

    // Metering

    fn meter_computation(&self, _kind: ComputationKind, _intensity: u64) -> anyhow::Result<()> {
        Ok(())
    }

    fn meter_memory(&self, _usage: MemoryUsage) -> anyhow::Result<()> {
        Ok(())
    }

    // Transactions

    fn get_signing_accounts(&self) -> anyhow::Result<Vec<Address>> {
        Ok(Vec::new())
    }

    fn generate_uuid(&self) -> anyhow::Result<u64> {
        Ok(0)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// First address handed out by [`MemoryInterface::create_account`]
const FIRST_CREATED_ACCOUNT: u64 = 0x1000;

/// In-memory host, used by tests and simple embedders
pub struct MemoryInterface {
    contracts: DashMap<Address, BTreeMap<String, String>>,
    keys: DashMap<Address, Vec<AccountKeyInfo>>,
    balances: DashMap<Address, u64>,
    events: Mutex<Vec<Event>>,
    logs: Mutex<Vec<String>>,
    signers: Mutex<Vec<Address>>,
    invalidated: Mutex<Vec<Location>>,
    uuid: AtomicU64,
    next_account: AtomicU64,
    computation: AtomicUsize,
}

impl Default for MemoryInterface {
    fn default() -> Self {
        Self {
            contracts: DashMap::new(),
            keys: DashMap::new(),
            balances: DashMap::new(),
            events: Mutex::new(Vec::new()),
            logs: Mutex::new(Vec::new()),
            signers: Mutex::new(Vec::new()),
            invalidated: Mutex::new(Vec::new()),
            uuid: AtomicU64::new(0),
            next_account: AtomicU64::new(FIRST_CREATED_ACCOUNT),
            computation: AtomicUsize::new(0),
        }
    }
}

impl MemoryInterface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_signers(signers: Vec<Address>) -> Self {
        let interface = Self::default();
        interface.set_signers(signers);
        interface
    }

    pub fn set_signers(&self, signers: Vec<Address>) {
        *lock(&self.signers) = signers;
    }

    pub fn set_contract<S: Into<String>>(&self, address: Address, name: &str, code: S) {
        self.contracts
            .entry(address)
            .or_default()
            .insert(name.to_string(), code.into());
    }

    pub fn contract(&self, address: Address, name: &str) -> Option<String> {
        self.contracts.get(&address).and_then(|c| c.get(name).cloned())
    }

    pub fn set_balance(&self, address: Address, balance: u64) {
        self.balances.insert(address, balance);
    }

    pub fn events(&self) -> Vec<Event> {
        lock(&self.events).clone()
    }

    pub fn take_events(&self) -> Vec<Event> {
        std::mem::take(&mut *lock(&self.events))
    }

    pub fn logs(&self) -> Vec<String> {
        lock(&self.logs).clone()
    }

    pub fn take_logs(&self) -> Vec<String> {
        std::mem::take(&mut *lock(&self.logs))
    }

    /// Locations reported through [`Interface::invalidate_programs`]
    pub fn invalidated(&self) -> Vec<Location> {
        lock(&self.invalidated).clone()
    }

    /// Number of metered computation steps
    pub fn computation_used(&self) -> usize {
        self.computation.load(Ordering::Relaxed)
    }
}

impl Interface for MemoryInterface {
    fn get_account_contract_code(&self, address: Address, name: &str) -> anyhow::Result<Option<String>> {
        Ok(self.contract(address, name))
    }

    fn update_account_contract_code(&self, address: Address, name: &str, code: &str) -> anyhow::Result<()> {
        self.set_contract(address, name, code);
        Ok(())
    }

    fn remove_account_contract_code(&self, address: Address, name: &str) -> anyhow::Result<()> {
        if let Some(mut contracts) = self.contracts.get_mut(&address) {
            contracts.remove(name);
        }
        Ok(())
    }

    fn get_account_contract_names(&self, address: Address) -> anyhow::Result<Vec<String>> {
        Ok(self
            .contracts
            .get(&address)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn invalidate_programs(&self, locations: &[Location]) {
        lock(&self.invalidated).extend_from_slice(locations);
    }

    fn create_account(&self, _payer: Address) -> anyhow::Result<Address> {
        Ok(Address::from_u64(self.next_account.fetch_add(1, Ordering::SeqCst)))
    }

    fn add_account_key(
        &self,
        address: Address,
        public_key: &PublicKeyInfo,
        hash_algorithm: HashAlgorithm,
        weight: u64,
    ) -> anyhow::Result<AccountKeyInfo> {
        let mut keys = self.keys.entry(address).or_default();
        let key = AccountKeyInfo {
            index: keys.len() as u32,
            public_key: public_key.clone(),
            hash_algorithm,
            weight,
            is_revoked: false,
        };
        keys.push(key.clone());
        Ok(key)
    }

    fn revoke_account_key(&self, address: Address, index: u32) -> anyhow::Result<Option<AccountKeyInfo>> {
        let Some(mut keys) = self.keys.get_mut(&address) else {
            return Ok(None);
        };
        Ok(keys.get_mut(index as usize).map(|key| {
            key.is_revoked = true;
            key.clone()
        }))
    }

    fn get_account_key(&self, address: Address, index: u32) -> anyhow::Result<Option<AccountKeyInfo>> {
        Ok(self
            .keys
            .get(&address)
            .and_then(|keys| keys.get(index as usize).cloned()))
    }

    fn get_account_balance(&self, address: Address) -> anyhow::Result<u64> {
        Ok(self.balances.get(&address).map(|b| *b).unwrap_or(0))
    }

    fn emit_event(&self, event: &Event) -> anyhow::Result<()> {
        lock(&self.events).push(event.clone());
        Ok(())
    }

    fn program_log(&self, message: &str) -> anyhow::Result<()> {
        lock(&self.logs).push(message.to_string());
        Ok(())
    }

    fn meter_computation(&self, _kind: ComputationKind, intensity: u64) -> anyhow::Result<()> {
        self.computation.fetch_add(intensity as usize, Ordering::Relaxed);
        Ok(())
    }

    fn get_signing_accounts(&self) -> anyhow::Result<Vec<Address>> {
        Ok(lock(&self.signers).clone())
    }

    fn generate_uuid(&self) -> anyhow::Result<u64> {
        Ok(self.uuid.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_address_import_without_identifiers_resolves_all_contracts() {
        let interface = MemoryInterface::new();
        let owner = Address::from_u64(1);
        interface.set_contract(owner, "A", "contract A {}");
        interface.set_contract(owner, "B", "contract B {}");
        let resolved = interface
            .resolve_location(&[], &ImportLocation::Address(owner))
            .unwrap();
        assert_eq!(
            resolved,
            vec![
                ResolvedLocation {
                    location: Location::address(owner, "A"),
                    identifiers: vec!["A".to_string()],
                },
                ResolvedLocation {
                    location: Location::address(owner, "B"),
                    identifiers: vec!["B".to_string()],
                },
            ]
        );
    }

    #[test]
    fn test_code_comes_from_contracts() {
        let interface = MemoryInterface::new();
        let owner = Address::from_u64(2);
        interface.update_account_contract_code(owner, "C", "contract C {}").unwrap();
        assert_eq!(
            interface.get_code(&Location::address(owner, "C")).unwrap().as_deref(),
            Some("contract C {}")
        );
        assert_eq!(interface.get_code(&Location::Script("x".into())).unwrap(), None);
        interface.remove_account_contract_code(owner, "C").unwrap();
        assert!(interface.get_account_contract_names(owner).unwrap().is_empty());
    }

    #[test]
    fn test_keys_and_uuids() {
        let interface = MemoryInterface::new();
        let owner = Address::from_u64(3);
        let key = PublicKeyInfo {
            public_key: vec![1, 2, 3],
            signature_algorithm: crate::crypto::SignatureAlgorithm::ECDSA_P256,
        };
        let added = interface
            .add_account_key(owner, &key, HashAlgorithm::SHA3_256, 1000)
            .unwrap();
        assert_eq!(added.index, 0);
        assert!(interface.revoke_account_key(owner, 0).unwrap().unwrap().is_revoked);
        assert_eq!(interface.generate_uuid().unwrap(), 1);
        assert_eq!(interface.generate_uuid().unwrap(), 2);
    }
}
