//! Per-execution environment
//!
//! Bridges the interpreter to the host: loads programs through the shared
//! cache while pinning every program used by this execution, stages
//! contract code changes until the execution succeeds, and calls host
//! callbacks behind a panic guard.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use ore_common::{Address, Location};
use ore_storage::panic_message;
use ore_syntax::ast::ImportLocation;
use ore_syntax::{parse_and_check, Program};
use tracing::{debug, trace};

use crate::cache::ProgramCache;
use crate::error::{Error, ExternalError, Result, UserErrorKind};
use crate::interface::{ComputationKind, Event, Interface, MemoryUsage, ResolvedLocation};

/// Call a host callback, classifying its failures and panics as external
pub(crate) fn guard<T, F>(callback: &str, f: F) -> Result<T>
where
    F: FnOnce() -> anyhow::Result<T>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(ExternalError::Callback {
            callback: callback.to_string(),
            message: format!("{:#}", err),
        }
        .into()),
        Err(payload) => Err(ExternalError::CallbackPanic {
            callback: callback.to_string(),
            message: panic_message(&*payload),
        }
        .into()),
    }
}

/// A staged change of deployed contract code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeChange {
    Update(String),
    Remove,
}

pub struct Environment<'r> {
    interface: &'r dyn Interface,
    cache: &'r ProgramCache,
    programs: HashMap<Location, Arc<Program>>,
    resolved: HashMap<(ImportLocation, Vec<String>), Vec<ResolvedLocation>>,
    code_changes: BTreeMap<(Address, String), CodeChange>,
}

impl<'r> Environment<'r> {
    pub fn new(interface: &'r dyn Interface, cache: &'r ProgramCache) -> Self {
        Self {
            interface,
            cache,
            programs: HashMap::new(),
            resolved: HashMap::new(),
            code_changes: BTreeMap::new(),
        }
    }

    pub fn interface(&self) -> &'r dyn Interface {
        self.interface
    }

    /// Register the program being executed
    pub fn pin(&mut self, program: Arc<Program>) {
        self.programs.insert(program.location.clone(), program);
    }

    /// Program of `location`. Within one execution the same location
    /// always yields the same program, even after its code was updated.
    pub fn program(&mut self, location: &Location) -> Result<Arc<Program>> {
        if let Some(program) = self.programs.get(location) {
            return Ok(program.clone());
        }
        let interface = self.interface;
        let cache = self.cache;
        let mut load = || -> Result<Arc<Program>> {
            cache.get_or_load(location, || {
                let code = guard("get_code", || interface.get_code(location))?
                    .ok_or_else(|| Error::user(UserErrorKind::TypeLoading(format!("no code found for {}", location))))?;
                Ok(parse_and_check(&code, location.clone())?)
            })
        };
        let program = match catch_unwind(AssertUnwindSafe(|| interface.get_or_load_program(location, &mut load))) {
            Ok(result) => result?,
            Err(payload) => {
                return Err(ExternalError::CallbackPanic {
                    callback: "get_or_load_program".to_string(),
                    message: panic_message(&*payload),
                }
                .into())
            }
        };
        debug!(
            %location,
            parse = ?program.metrics.parse,
            check = ?program.metrics.check,
            "Loaded program"
        );
        self.programs.insert(location.clone(), program.clone());
        Ok(program)
    }

    /// Resolve an import, memoized for the execution
    pub fn resolve(&mut self, identifiers: &[String], location: &ImportLocation) -> Result<Vec<ResolvedLocation>> {
        let key = (location.clone(), identifiers.to_vec());
        if let Some(resolved) = self.resolved.get(&key) {
            return Ok(resolved.clone());
        }
        let interface = self.interface;
        let resolved = guard("resolve_location", || interface.resolve_location(identifiers, location))?;
        trace!(?location, count = resolved.len(), "Resolved import");
        self.resolved.insert(key, resolved.clone());
        Ok(resolved)
    }

    // Contract code

    /// Code of a contract, including changes staged by this execution
    pub fn contract_code(&self, address: Address, name: &str) -> Result<Option<String>> {
        match self.code_changes.get(&(address, name.to_string())) {
            Some(CodeChange::Update(code)) => Ok(Some(code.clone())),
            Some(CodeChange::Remove) => Ok(None),
            None => {
                let interface = self.interface;
                guard("get_account_contract_code", || interface.get_account_contract_code(address, name))
            }
        }
    }

    /// Names of the contracts of an account, including staged changes
    pub fn contract_names(&self, address: Address) -> Result<Vec<String>> {
        let interface = self.interface;
        let mut names: BTreeSet<String> = guard("get_account_contract_names", || {
            interface.get_account_contract_names(address)
        })?
        .into_iter()
        .collect();
        for ((owner, name), change) in &self.code_changes {
            if *owner != address {
                continue;
            }
            match change {
                CodeChange::Update(_) => names.insert(name.clone()),
                CodeChange::Remove => names.remove(name),
            };
        }
        Ok(names.into_iter().collect())
    }

    pub fn stage_code(&mut self, address: Address, name: &str, change: CodeChange) {
        debug!(%address, name, removed = change == CodeChange::Remove, "Staged contract code change");
        self.code_changes.insert((address, name.to_string()), change);
    }

    /// Locations whose code this execution changed
    pub fn updated_locations(&self) -> Vec<Location> {
        self.code_changes
            .keys()
            .map(|(address, name)| Location::address(*address, name.clone()))
            .collect()
    }

    /// Hand staged code changes to the host
    pub fn apply_code_changes(&mut self) -> Result<Vec<Location>> {
        let interface = self.interface;
        let mut updated = Vec::new();
        for ((address, name), change) in std::mem::take(&mut self.code_changes) {
            match change {
                CodeChange::Update(code) => guard("update_account_contract_code", || {
                    interface.update_account_contract_code(address, &name, &code)
                })?,
                CodeChange::Remove => guard("remove_account_contract_code", || {
                    interface.remove_account_contract_code(address, &name)
                })?,
            }
            updated.push(Location::address(address, name));
        }
        Ok(updated)
    }

    // Host callbacks

    pub fn meter_computation(&self, kind: ComputationKind, intensity: u64) -> Result<()> {
        let interface = self.interface;
        guard("meter_computation", || interface.meter_computation(kind, intensity)).map_err(metering)
    }

    pub fn meter_memory(&self, usage: MemoryUsage) -> Result<()> {
        let interface = self.interface;
        guard("meter_memory", || interface.meter_memory(usage)).map_err(metering)
    }

    pub fn emit_event(&self, event: &Event) -> Result<()> {
        debug!(type_id = %event.type_id, "Emitted event");
        let interface = self.interface;
        guard("emit_event", || interface.emit_event(event))
    }

    pub fn log(&self, message: &str) -> Result<()> {
        debug!(message, "Program log");
        let interface = self.interface;
        guard("program_log", || interface.program_log(message))
    }

    pub fn generate_uuid(&self) -> Result<u64> {
        let interface = self.interface;
        guard("generate_uuid", || interface.generate_uuid())
    }

    /// Run any other host callback behind the panic guard
    pub fn call<T, F>(&self, callback: &str, f: F) -> Result<T>
    where
        F: FnOnce(&dyn Interface) -> anyhow::Result<T>,
    {
        let interface = self.interface;
        guard(callback, || f(interface))
    }
}

/// Metering failures abort as metering errors; panics keep their class
fn metering(err: Error) -> Error {
    match err {
        Error::External(ExternalError::Callback { message, .. }) => ExternalError::Metering(message).into(),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::MemoryInterface;
    use pretty_assertions::assert_eq;

    struct PanickingLog;

    impl Interface for PanickingLog {
        fn program_log(&self, _message: &str) -> anyhow::Result<()> {
            panic!("log sink is gone")
        }

        fn meter_computation(&self, _kind: ComputationKind, _intensity: u64) -> anyhow::Result<()> {
            anyhow::bail!("computation limit reached")
        }
    }

    #[test]
    fn test_callback_failures_are_external() {
        let cache = ProgramCache::new(4);
        let interface = PanickingLog;
        let env = Environment::new(&interface, &cache);
        let err = env.log("hello").unwrap_err();
        assert_eq!(
            err,
            Error::External(ExternalError::CallbackPanic {
                callback: "program_log".to_string(),
                message: "log sink is gone".to_string(),
            })
        );
        let err = env.meter_computation(ComputationKind::Statement, 1).unwrap_err();
        assert_eq!(
            err,
            Error::External(ExternalError::Metering("computation limit reached".to_string()))
        );
    }

    #[test]
    fn test_programs_are_pinned_for_the_execution() {
        let cache = ProgramCache::new(4);
        let interface = MemoryInterface::new();
        let owner = Address::from_u64(1);
        interface.set_contract(owner, "C", "access(all) contract C { init() {} }");
        let location = Location::address(owner, "C");
        let mut env = Environment::new(&interface, &cache);
        let first = env.program(&location).unwrap();

        cache.invalidate(&location);
        interface.set_contract(owner, "C", "access(all) contract C { access(all) let x: Int\n init() { self.x = 1 } }");
        let second = env.program(&location).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let mut next = Environment::new(&interface, &cache);
        let fresh = next.program(&location).unwrap();
        assert!(!Arc::ptr_eq(&first, &fresh));
    }

    #[test]
    fn test_staged_code_changes() {
        let cache = ProgramCache::new(4);
        let interface = MemoryInterface::new();
        let owner = Address::from_u64(1);
        interface.set_contract(owner, "A", "access(all) contract A {}");
        let mut env = Environment::new(&interface, &cache);
        env.stage_code(owner, "B", CodeChange::Update("access(all) contract B {}".into()));
        env.stage_code(owner, "A", CodeChange::Remove);
        assert_eq!(env.contract_names(owner).unwrap(), vec!["B".to_string()]);
        assert_eq!(interface.get_account_contract_names(owner).unwrap(), vec!["A".to_string()]);

        let updated = env.apply_code_changes().unwrap();
        assert_eq!(updated.len(), 2);
        assert_eq!(interface.get_account_contract_names(owner).unwrap(), vec!["B".to_string()]);
    }
}
