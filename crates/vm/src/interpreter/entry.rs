//! Program entry points: script `main`, transaction phases and contract
//! functions invoked by the host

use std::rc::Rc;
use std::sync::Arc;

use ore_common::{Address, Location};
use ore_syntax::ast::{CompositeKind, Parameter, VariableKind};
use ore_syntax::Program;
use tracing::debug;

use crate::error::{ConditionKind, Error, Result, UserErrorKind};
use crate::export::{export_value, import_value, ExportedValue};
use crate::types::{CompositeType, StaticType};
use crate::value::{AccountHandle, FunctionValue, InterpretedFunction, Value};

use super::account::full_authorization;
use super::scope::{Binding, BindingState, Scope};
use super::{Frame, Interpreter};

/// Name of the function a script runs
pub const SCRIPT_MAIN: &str = "main";

impl<'a> Interpreter<'a> {
    /// Import host arguments against the declared parameters
    fn import_arguments(
        &mut self,
        program: &Arc<Program>,
        parameters: &[Parameter],
        arguments: &[ExportedValue],
    ) -> Result<Vec<Value>> {
        if parameters.len() != arguments.len() {
            return Err(UserErrorKind::ArgumentCount {
                expected: parameters.len(),
                actual: arguments.len(),
            }
            .into());
        }
        let mut values = Vec::with_capacity(arguments.len());
        for (parameter, argument) in parameters.iter().zip(arguments) {
            let ty = self.resolve_type(program, &parameter.ty)?;
            let value = import_value(&mut self.heap, argument, &ty).map_err(|e| match e {
                Error::User(_) => e,
                other => UserErrorKind::ArgumentDecoding(format!("`{}`: {}", parameter.name, other)).into(),
            })?;
            values.push(value);
        }
        Ok(values)
    }

    fn import_typed_arguments(
        &mut self,
        program: &Arc<Program>,
        parameters: &[Parameter],
        arguments: &[ExportedValue],
        argument_types: &[StaticType],
    ) -> Result<Vec<Value>> {
        if parameters.len() != arguments.len() || arguments.len() != argument_types.len() {
            return Err(UserErrorKind::ArgumentCount {
                expected: parameters.len(),
                actual: arguments.len().min(argument_types.len()),
            }
            .into());
        }
        let mut values = Vec::with_capacity(arguments.len());
        for ((parameter, argument), ty) in parameters.iter().zip(arguments).zip(argument_types) {
            let declared = self.resolve_type(program, &parameter.ty)?;
            let value = import_value(&mut self.heap, argument, ty)?;
            if !self.conforms(&value, &declared)? {
                return Err(UserErrorKind::ArgumentDecoding(format!(
                    "`{}` expects `{}`, got `{}`",
                    parameter.name, declared, ty
                ))
                .into());
            }
            values.push(value);
        }
        Ok(values)
    }

    /// Run the `main` function of a script and export its result
    pub fn run_script(&mut self, program: &Arc<Program>, arguments: &[ExportedValue]) -> Result<ExportedValue> {
        let Some(main) = program.elaboration.function(SCRIPT_MAIN).cloned() else {
            return Err(UserErrorKind::InvalidEntryPoint(format!("script has no `{}` function", SCRIPT_MAIN)).into());
        };
        let values = self.import_arguments(program, &main.parameters, arguments)?;
        let function = InterpretedFunction {
            decl: main,
            program: program.clone(),
            scope: None,
            receiver: None,
            composite: None,
        };
        let result = self
            .invoke_interpreted(&function, values)
            .map_err(|e| e.at(&program.location, function.decl.range))?;
        let exported = export_value(&mut self.heap, &result)?;
        debug!(location = %program.location, "Script finished");
        Ok(exported)
    }

    /// Run a transaction: `prepare` with one account per signer, then the
    /// pre-conditions, `execute` and the post-conditions. Resources left in
    /// fields of the transaction are lost and fail the transaction.
    pub fn run_transaction(
        &mut self,
        program: &Arc<Program>,
        arguments: &[ExportedValue],
        signers: &[Address],
    ) -> Result<()> {
        let Some(transaction) = program.elaboration.transaction().cloned() else {
            return Err(UserErrorKind::InvalidEntryPoint("program does not declare a transaction".to_string()).into());
        };
        let values = self.import_arguments(program, &transaction.parameters, arguments)?;

        let ty = CompositeType::new(program.location.clone(), "", CompositeKind::Struct);
        let id = self
            .heap
            .storage
            .create_composite(Address::ZERO, StaticType::Composite(ty.clone()), Vec::new())?;
        self.transaction = Some(id);
        let receiver = Value::Composite(id);

        let scope = Scope::root();
        for (parameter, value) in transaction.parameters.iter().zip(values) {
            let ty = self.resolve_type(program, &parameter.ty)?;
            scope.declare(
                parameter.name.clone(),
                Binding {
                    value,
                    kind: VariableKind::Let,
                    state: BindingState::Valid,
                    owning: false,
                    ty: Some(ty),
                },
            );
        }
        scope.declare("self", Binding::constant(receiver.clone()));
        let frame = Frame::new(program.clone(), scope.clone());

        match &transaction.prepare {
            Some(prepare) => {
                if prepare.parameters.len() != signers.len() {
                    return Err(UserErrorKind::SignerCount {
                        expected: prepare.parameters.len(),
                        actual: signers.len(),
                    }
                    .into());
                }
                let accounts = signers
                    .iter()
                    .map(|signer| Value::Account(AccountHandle::new(*signer, full_authorization())))
                    .collect();
                let function = InterpretedFunction {
                    decl: prepare.clone(),
                    program: program.clone(),
                    scope: Some(scope.clone()),
                    receiver: Some(receiver.clone()),
                    composite: Some(ty.clone()),
                };
                self.invoke_interpreted(&function, accounts)
                    .map_err(|e| e.at(&program.location, prepare.range))?;
            }
            None if !signers.is_empty() => {
                return Err(UserErrorKind::SignerCount {
                    expected: 0,
                    actual: signers.len(),
                }
                .into())
            }
            None => {}
        }

        self.check_conditions(&frame, &transaction.pre, ConditionKind::Pre)?;
        if let Some(execute) = &transaction.execute {
            self.exec_block(&frame, execute)?;
        }
        self.check_conditions(&frame, &transaction.post, ConditionKind::Post)?;

        for (name, value) in self.heap.storage.composite_fields(id)? {
            if self.is_live_resource(&value)? {
                return Err(Error::from(UserErrorKind::ResourceLoss(format!(
                    "transaction field `{}` still holds a resource",
                    name
                )))
                .at(&program.location, transaction.range));
            }
        }
        self.heap.storage.deep_remove(id)?;
        self.transaction = None;
        debug!(location = %program.location, signers = signers.len(), "Transaction finished");
        Ok(())
    }

    /// Invoke a function of the contract deployed at `location`. When
    /// `argument_types` is given, arguments are imported as those types and
    /// must conform to the declared parameters.
    pub fn invoke_contract(
        &mut self,
        location: &Location,
        function: &str,
        arguments: &[ExportedValue],
        argument_types: &[StaticType],
    ) -> Result<ExportedValue> {
        let program = self.env.program(location)?;
        let Some(contract) = program.elaboration.contract().cloned() else {
            return Err(UserErrorKind::InvalidEntryPoint(format!("{} does not declare a contract", location)).into());
        };
        let Some(decl) = contract.function(function).cloned() else {
            return Err(UserErrorKind::MissingMember {
                type_id: format!("{}.{}", location, contract.name),
                name: function.to_string(),
            }
            .into());
        };
        let instance = self.contract_value(&program, &contract.name)?;
        let values = if argument_types.is_empty() {
            self.import_arguments(&program, &decl.parameters, arguments)?
        } else {
            self.import_typed_arguments(&program, &decl.parameters, arguments, argument_types)?
        };
        let callee = Value::Function(FunctionValue::Interpreted(Rc::new(InterpretedFunction {
            decl,
            program: program.clone(),
            scope: None,
            receiver: Some(instance),
            composite: Some(CompositeType::new(location.clone(), contract.name.clone(), CompositeKind::Contract)),
        })));
        let result = self.call_function(&callee, values)?;
        let exported = export_value(&mut self.heap, &result)?;
        debug!(%location, function, "Contract function finished");
        Ok(exported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ProgramCache;
    use crate::config::RuntimeConfig;
    use crate::environment::Environment;
    use crate::interface::MemoryInterface;
    use ore_storage::MemoryLedger;
    use ore_syntax::parse_and_check;
    use pretty_assertions::assert_eq;

    fn script(code: &str) -> Arc<Program> {
        parse_and_check(code, Location::Script("s".to_string())).unwrap()
    }

    #[test]
    fn test_script_arguments_are_checked() {
        let ledger = MemoryLedger::new();
        let interface = MemoryInterface::new();
        let cache = ProgramCache::new(8);
        let config = RuntimeConfig::default();
        let mut interpreter = Interpreter::new(&ledger, Environment::new(&interface, &cache), &config);
        let program = script("fun main(a: Int, b: Int): Int { return a + b }");

        let result = interpreter
            .run_script(&program, &[ExportedValue::int(40), ExportedValue::int(2)])
            .unwrap();
        assert_eq!(result, ExportedValue::int(42));

        let err = interpreter.run_script(&program, &[ExportedValue::int(1)]).unwrap_err();
        assert!(matches!(err.user_kind(), Some(UserErrorKind::ArgumentCount { expected: 2, actual: 1 })));
    }

    #[test]
    fn test_transaction_requires_matching_signers() {
        let ledger = MemoryLedger::new();
        let interface = MemoryInterface::new();
        let cache = ProgramCache::new(8);
        let config = RuntimeConfig::default();
        let mut interpreter = Interpreter::new(&ledger, Environment::new(&interface, &cache), &config);
        let program = parse_and_check(
            "transaction { prepare(signer: &Account) {} }",
            Location::Transaction("t".to_string()),
        )
        .unwrap();

        let err = interpreter.run_transaction(&program, &[], &[]).unwrap_err();
        assert!(matches!(err.user_kind(), Some(UserErrorKind::SignerCount { expected: 1, actual: 0 })));
        interpreter
            .run_transaction(&program, &[], &[Address::from_u64(1)])
            .unwrap();
    }

    #[test]
    fn test_script_without_main() {
        let ledger = MemoryLedger::new();
        let interface = MemoryInterface::new();
        let cache = ProgramCache::new(8);
        let config = RuntimeConfig::default();
        let mut interpreter = Interpreter::new(&ledger, Environment::new(&interface, &cache), &config);
        let err = interpreter.run_script(&script("fun helper() {}"), &[]).unwrap_err();
        assert!(matches!(err.user_kind(), Some(UserErrorKind::InvalidEntryPoint(_))));
    }
}
