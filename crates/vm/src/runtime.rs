//! Runtime entry points
//!
//! A [`Runtime`] owns the configuration and the program cache shared by all
//! executions. Every execution runs on its own thread with the configured
//! stack size, gets a fresh interpreter and heap, and writes to the ledger
//! only when it succeeds.

use std::sync::Arc;
use std::thread;

use ore_common::{Address, Location, Path};
use ore_storage::{panic_message, GuardedLedger, Ledger};
use ore_syntax::{parse_and_check, Program};
use tracing::{debug, info, warn};

use crate::cache::ProgramCache;
use crate::config::RuntimeConfig;
use crate::environment::Environment;
use crate::error::{Error, InternalError, Result};
use crate::export::{export_value, ExportedValue};
use crate::interface::Interface;
use crate::interpreter::Interpreter;
use crate::types::StaticType;

/// Host collaborators and the location of the code being executed
#[derive(Clone, Copy)]
pub struct Context<'c> {
    pub interface: &'c dyn Interface,
    pub ledger: &'c dyn Ledger,
    pub location: &'c Location,
}

impl<'c> Context<'c> {
    pub fn new(interface: &'c dyn Interface, ledger: &'c dyn Ledger, location: &'c Location) -> Self {
        Self {
            interface,
            ledger,
            location,
        }
    }
}

pub struct Runtime {
    config: RuntimeConfig,
    cache: ProgramCache,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        let cache = ProgramCache::new(config.program_cache_capacity);
        Self { config, cache }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn cache(&self) -> &ProgramCache {
        &self.cache
    }

    /// Execute a script and return the exported result of its `main`.
    /// Scripts are read-only: nothing they write is committed.
    pub fn execute_script(&self, code: &str, arguments: &[ExportedValue], context: Context<'_>) -> Result<ExportedValue> {
        info!(location = %context.location, "Executing script");
        let program = parse_and_check(code, context.location.clone())?;
        self.execute(context, false, |interpreter| {
            interpreter.env.pin(program.clone());
            interpreter.run_script(&program, arguments)
        })
    }

    /// Execute a transaction signed by the host's signing accounts
    pub fn execute_transaction(&self, code: &str, arguments: &[ExportedValue], context: Context<'_>) -> Result<()> {
        info!(location = %context.location, "Executing transaction");
        let program = parse_and_check(code, context.location.clone())?;
        self.execute(context, true, |interpreter| {
            interpreter.env.pin(program.clone());
            let signers: Vec<Address> = interpreter
                .env
                .call("get_signing_accounts", |interface| interface.get_signing_accounts())?;
            interpreter.run_transaction(&program, arguments, &signers)
        })
    }

    /// Invoke `function` of the contract deployed at `contract`
    pub fn invoke_contract_function(
        &self,
        contract: &Location,
        function: &str,
        arguments: &[ExportedValue],
        argument_types: &[StaticType],
        context: Context<'_>,
    ) -> Result<ExportedValue> {
        info!(%contract, function, "Invoking contract function");
        self.execute(context, true, |interpreter| {
            interpreter.invoke_contract(contract, function, arguments, argument_types)
        })
    }

    /// Parse and check a program at the context location, loading its
    /// imports through the shared cache
    pub fn parse_and_check_program(&self, code: &str, context: Context<'_>) -> Result<Arc<Program>> {
        let program = parse_and_check(code, context.location.clone())?;
        self.execute(context, false, |interpreter| {
            interpreter.imports_of(&program)?;
            Ok(())
        })?;
        Ok(program)
    }

    /// Exported value stored at `path` of `address`, if any
    pub fn read_stored(&self, address: Address, path: &Path, context: Context<'_>) -> Result<Option<ExportedValue>> {
        self.execute(context, false, |interpreter| match interpreter.heap.read_path(address, path)? {
            Some(value) => export_value(&mut interpreter.heap, &value).map(Some),
            None => Ok(None),
        })
    }

    /// Run `f` on a fresh interpreter on its own thread. When `commit` is
    /// set and `f` succeeds, staged code changes and storage are written.
    fn execute<T, F>(&self, context: Context<'_>, commit: bool, f: F) -> Result<T>
    where
        T: Send,
        F: FnOnce(&mut Interpreter<'_>) -> Result<T> + Send,
    {
        let config = &self.config;
        let cache = &self.cache;
        thread::scope(|scope| {
            let handle = thread::Builder::new()
                .name("ore-execution".to_string())
                .stack_size(config.execution_stack_size)
                .spawn_scoped(scope, move || -> Result<T> {
                    let ledger = GuardedLedger::new(context.ledger);
                    let env = Environment::new(context.interface, cache);
                    let mut interpreter = Interpreter::new(&ledger, env, config);
                    let value = f(&mut interpreter)?;
                    if commit {
                        finish(interpreter, context.interface, cache)?;
                    }
                    Ok(value)
                })
                .map_err(|e| Error::Internal(InternalError::Panic(format!("cannot spawn execution thread: {}", e))))?;
            match handle.join() {
                Ok(result) => result,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!(%message, "Execution panicked");
                    Err(Error::Internal(InternalError::Panic(message)))
                }
            }
        })
        .map_err(|e| {
            debug!(error = %e, "Execution failed");
            e
        })
    }
}

/// Write the effects of a successful execution: contract code, then
/// storage. Cached programs of updated contracts are dropped afterwards.
fn finish(mut interpreter: Interpreter<'_>, interface: &dyn Interface, cache: &ProgramCache) -> Result<()> {
    let updated = interpreter.env.apply_code_changes()?;
    let summary = interpreter.heap.commit()?;
    debug!(
        written = summary.slabs_written,
        removed = summary.slabs_removed,
        domains = summary.domains_created,
        "Committed storage"
    );
    if interpreter.config().slab_validation_enabled {
        let report = interpreter.heap.validate()?;
        debug!(domains = report.domains, slabs = report.slabs, "Validated storage");
    }
    if !updated.is_empty() {
        for location in &updated {
            cache.invalidate(location);
        }
        interface.invalidate_programs(&updated);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UserErrorKind;
    use crate::interface::MemoryInterface;
    use ore_storage::MemoryLedger;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_script_result() {
        let runtime = Runtime::default();
        let interface = MemoryInterface::new();
        let ledger = MemoryLedger::new();
        let location = Location::Script("s".to_string());
        let result = runtime
            .execute_script(
                "fun main(): String { return \"hello\" }",
                &[],
                Context::new(&interface, &ledger, &location),
            )
            .unwrap();
        assert_eq!(result, ExportedValue::string("hello"));
    }

    #[test]
    fn test_failed_transaction_writes_nothing() {
        let runtime = Runtime::default();
        let interface = MemoryInterface::with_signers(vec![Address::from_u64(1)]);
        let ledger = MemoryLedger::new();
        let location = Location::Transaction("t".to_string());
        let err = runtime
            .execute_transaction(
                r#"
                transaction {
                    prepare(signer: auth(Storage) &Account) {
                        signer.storage.save(1, to: /storage/one)
                        panic("nope")
                    }
                }
                "#,
                &[],
                Context::new(&interface, &ledger, &location),
            )
            .unwrap_err();
        assert!(matches!(err.user_kind(), Some(UserErrorKind::Panic(_))));
        let stored = runtime
            .read_stored(
                Address::from_u64(1),
                &Path::storage("one"),
                Context::new(&interface, &ledger, &location),
            )
            .unwrap();
        assert_eq!(stored, None);
    }

    #[test]
    fn test_syntax_errors_are_user_errors() {
        let runtime = Runtime::default();
        let interface = MemoryInterface::new();
        let ledger = MemoryLedger::new();
        let location = Location::Script("s".to_string());
        let err = runtime
            .parse_and_check_program("fun main( {", Context::new(&interface, &ledger, &location))
            .unwrap_err();
        assert!(matches!(err.user_kind(), Some(UserErrorKind::Syntax(_))));
    }
}
