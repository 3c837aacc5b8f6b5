//! Tree-walking interpreter
//!
//! The interpreter evaluates checked programs directly on their AST. Values
//! live in the [`Heap`] of the execution; variables hold handles and carry
//! their own validity state, so every resource-safety rule is enforced at
//! run time:
//!
//! * moving a resource invalidates the source binding or slot,
//! * every move or destroy invalidates ephemeral references to the moved
//!   subtree,
//! * a resource can only be destroyed once, even from its own destructor,
//! * discarding a live resource fails with a resource-loss error.

pub mod account;
pub mod builtins;
pub mod entry;
pub mod expression;
pub mod invocation;
pub mod members;
pub mod scope;
pub mod statement;

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use ore_common::{Address, Location};
use ore_storage::{Ledger, SlabId};
use ore_syntax::ast::{CompositeDecl, CompositeKind, Condition, Declaration, FunctionDecl, TypeExpr, VariableKind};
use ore_syntax::Program;
use tracing::trace;

use crate::config::RuntimeConfig;
use crate::environment::Environment;
use crate::error::{ConditionKind, Error, Result, UserErrorKind};
use crate::heap::{Heap, CONTRACT_DOMAIN};
use crate::interface::{ComputationKind, MemoryKind, MemoryUsage};
use crate::types::{Authorization, CompositeType, StaticType};
use crate::value::{FunctionValue, IntegerValue, InterpretedFunction, Value};
use scope::{Binding, BindingState, Scope};

/// Location of the composite types provided by the runtime itself
pub const BUILTIN_LOCATION: &str = "flow";

pub fn builtin_location() -> Location {
    Location::Identifier(BUILTIN_LOCATION.to_string())
}

/// Outcome of executing a statement
pub(crate) enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// Evaluation context of a block
#[derive(Clone)]
pub(crate) struct Frame {
    pub program: Arc<Program>,
    pub scope: Rc<Scope>,
    /// Declared return type of the enclosing function
    pub return_type: Option<StaticType>,
}

impl Frame {
    pub fn new(program: Arc<Program>, scope: Rc<Scope>) -> Self {
        Self {
            program,
            scope,
            return_type: None,
        }
    }

    /// Frame of a nested block
    pub fn child(&self) -> Frame {
        Frame {
            program: self.program.clone(),
            scope: Scope::child(&self.scope),
            return_type: self.return_type.clone(),
        }
    }

    pub fn location(&self) -> &Location {
        &self.program.location
    }
}

pub struct Interpreter<'a> {
    pub(crate) heap: Heap<'a>,
    pub(crate) env: Environment<'a>,
    config: &'a RuntimeConfig,
    depth: usize,
    /// Imported identifiers of every program used so far
    imports: HashMap<Location, Rc<HashMap<String, Location>>>,
    /// Composites whose initializer is running
    initializing: Vec<SlabId>,
    /// The transaction composite while a transaction executes
    pub(crate) transaction: Option<SlabId>,
}

impl<'a> Interpreter<'a> {
    pub fn new(ledger: &'a dyn Ledger, env: Environment<'a>, config: &'a RuntimeConfig) -> Self {
        Self {
            heap: Heap::new(ledger, config.slab_page_capacity),
            env,
            config,
            depth: 0,
            imports: HashMap::new(),
            initializing: Vec::new(),
            transaction: None,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        self.config
    }

    pub(crate) fn mismatch(&mut self, expected: &StaticType, value: &Value) -> Result<Error> {
        let actual = self.heap.static_type(value)?;
        Ok(UserErrorKind::TypeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
        .into())
    }

    // Imports

    /// Identifiers imported by `program`, resolving and loading every
    /// import on first use
    pub(crate) fn imports_of(&mut self, program: &Arc<Program>) -> Result<Rc<HashMap<String, Location>>> {
        if let Some(table) = self.imports.get(&program.location) {
            return Ok(table.clone());
        }
        let mut table = HashMap::new();
        for import in &program.ast.imports {
            let resolved = self
                .env
                .resolve(&import.identifiers, &import.location)
                .map_err(|e| e.at(&program.location, import.range))?;
            for resolved in resolved {
                let imported = self
                    .env
                    .program(&resolved.location)
                    .map_err(|e| e.at(&program.location, import.range))?;
                if resolved.identifiers.is_empty() {
                    for name in top_level_names(&imported) {
                        table.insert(name, resolved.location.clone());
                    }
                } else {
                    for name in resolved.identifiers {
                        table.insert(name, resolved.location.clone());
                    }
                }
            }
        }
        trace!(location = %program.location, imported = table.len(), "Resolved imports");
        let table = Rc::new(table);
        self.imports.insert(program.location.clone(), table.clone());
        Ok(table)
    }

    // Types

    pub(crate) fn resolve_type(&mut self, program: &Arc<Program>, ty: &TypeExpr) -> Result<StaticType> {
        Ok(match ty {
            TypeExpr::Resource(inner) => self.resolve_type(program, inner)?,
            TypeExpr::Optional(inner) => StaticType::optional(self.resolve_type(program, inner)?),
            TypeExpr::VariableArray(element) => StaticType::array(self.resolve_type(program, element)?),
            TypeExpr::Dictionary(key, value) => {
                StaticType::dictionary(self.resolve_type(program, key)?, self.resolve_type(program, value)?)
            }
            TypeExpr::Reference {
                authorization,
                referenced,
            } => StaticType::reference(
                Authorization::from_names(authorization),
                self.resolve_type(program, referenced)?,
            ),
            TypeExpr::Nominal { name, arguments } => self.resolve_nominal(program, name, arguments)?,
        })
    }

    fn resolve_nominal(&mut self, program: &Arc<Program>, name: &[String], arguments: &[TypeExpr]) -> Result<StaticType> {
        if let [single] = name {
            match single.as_str() {
                "AuthAccount" => return Ok(StaticType::reference(account::full_authorization(), StaticType::Account)),
                "PublicAccount" => return Ok(StaticType::reference(Authorization::Unauthorized, StaticType::Account)),
                "Capability" => {
                    let borrow = match arguments.first() {
                        Some(argument) => Some(Box::new(self.resolve_type(program, argument)?)),
                        None => None,
                    };
                    return Ok(StaticType::Capability(borrow));
                }
                _ => {}
            }
            if let Some(builtin) = StaticType::builtin(single) {
                return Ok(builtin);
            }
        }
        match self.resolve_composite(program, name)? {
            Some(composite) => Ok(StaticType::Composite(composite)),
            None => Err(UserErrorKind::TypeLoading(name.join(".")).into()),
        }
    }

    /// Composite type named `name` as seen from `program`
    pub(crate) fn resolve_composite(&mut self, program: &Arc<Program>, name: &[String]) -> Result<Option<CompositeType>> {
        let qualified = name.join(".");
        if let Some(decl) = program.elaboration.composite(&qualified) {
            return Ok(Some(CompositeType::new(program.location.clone(), qualified, decl.kind)));
        }
        if let Some(contract) = program.elaboration.contract() {
            let nested = format!("{}.{}", contract.name, qualified);
            if let Some(decl) = program.elaboration.composite(&nested) {
                return Ok(Some(CompositeType::new(program.location.clone(), nested, decl.kind)));
            }
        }
        let imports = self.imports_of(program)?;
        let Some(location) = name.first().and_then(|head| imports.get(head)) else {
            return Ok(None);
        };
        let imported = self.env.program(location)?;
        Ok(imported
            .elaboration
            .composite(&qualified)
            .map(|decl| CompositeType::new(location.clone(), qualified.clone(), decl.kind)))
    }

    /// Declaration of a composite type with the program declaring it.
    /// Types of the runtime itself and the transaction have none.
    pub(crate) fn composite_decl(&mut self, ty: &CompositeType) -> Result<Option<(Arc<Program>, Arc<CompositeDecl>)>> {
        if ty.qualified.is_empty() || ty.location == builtin_location() {
            return Ok(None);
        }
        let program = self.env.program(&ty.location)?;
        match program.elaboration.composite(&ty.qualified).cloned() {
            Some(decl) => Ok(Some((program, decl))),
            None => Err(UserErrorKind::TypeLoading(ty.type_id()).into()),
        }
    }

    /// Composite type of a composite handle
    pub(crate) fn composite_type(&mut self, id: SlabId) -> Result<CompositeType> {
        match self.heap.storage.info(id)? {
            StaticType::Composite(ty) => Ok(ty),
            other => Err(Error::unexpected(format!("slab {} holds a `{}`, not a composite", id, other))),
        }
    }

    pub(crate) fn parameter_types(&mut self, program: &Arc<Program>, decl: &FunctionDecl) -> Result<Vec<StaticType>> {
        decl.parameters
            .iter()
            .map(|parameter| self.resolve_type(program, &parameter.ty))
            .collect()
    }

    // Conformance

    /// Whether `value` can be used where `ty` is expected
    pub(crate) fn conforms(&mut self, value: &Value, ty: &StaticType) -> Result<bool> {
        match (value, ty) {
            (
                Value::Reference(reference),
                StaticType::Reference {
                    authorization,
                    referenced,
                },
            ) => {
                if !reference.authorization().permits(authorization) {
                    return Ok(false);
                }
                if reference.borrowed().is_subtype(referenced) {
                    return Ok(true);
                }
                let target = self.heap.deref(reference)?;
                self.conforms(&target, referenced)
            }
            (Value::Some(inner), StaticType::Optional(expected)) => self.conforms(inner, expected),
            (Value::Nil, StaticType::Optional(_)) => Ok(true),
            (_, StaticType::Optional(expected)) => self.conforms(value, expected),
            _ => self.heap.conforms(value, ty),
        }
    }

    /// Conformance of a value read from storage: the static type must match
    /// and every declared field of a composite must be present
    pub(crate) fn deep_conforms(&mut self, value: &Value, ty: &StaticType) -> Result<bool> {
        if !self.conforms(value, ty)? {
            return Ok(false);
        }
        let Some(id) = value.slab() else {
            return Ok(true);
        };
        let StaticType::Composite(composite) = self.heap.storage.info(id)? else {
            return Ok(true);
        };
        let Some((_, decl)) = self.composite_decl(&composite)? else {
            return Ok(true);
        };
        for field in &decl.fields {
            if self.heap.storage.composite_get(id, &field.name)?.is_none()
                && !self.heap.tracker.is_field_moved(id, &field.name)
            {
                return Ok(false);
            }
        }
        Ok(true)
    }

    // Names

    /// Value of an identifier: local bindings, declarations of the program,
    /// imports and finally built-ins
    pub(crate) fn lookup(&mut self, frame: &Frame, name: &str) -> Result<Value> {
        if let Some(binding) = frame.scope.lookup(name) {
            if binding.state == BindingState::Moved {
                return Err(UserErrorKind::InvalidatedResourceUse(name.to_string()).into());
            }
            return Ok(binding.value);
        }
        if let Some(value) = self.global(&frame.program, name)? {
            return Ok(value);
        }
        let imports = self.imports_of(&frame.program)?;
        if let Some(location) = imports.get(name).cloned() {
            let program = self.env.program(&location)?;
            return match self.global(&program, name)? {
                Some(value) => Ok(value),
                None => Err(UserErrorKind::TypeLoading(format!("`{}` is not declared in {}", name, location)).into()),
            };
        }
        builtins::lookup(name).ok_or_else(|| UserErrorKind::NotDeclared(name.to_string()).into())
    }

    /// Function, constructor or contract declared by `program` under `name`
    fn global(&mut self, program: &Arc<Program>, name: &str) -> Result<Option<Value>> {
        if let Some(decl) = program.elaboration.function(name) {
            return Ok(Some(Value::Function(FunctionValue::Interpreted(Rc::new(InterpretedFunction {
                decl: decl.clone(),
                program: program.clone(),
                scope: None,
                receiver: None,
                composite: None,
            })))));
        }
        let Some(ty) = self.resolve_local_composite(program, name) else {
            return Ok(None);
        };
        match ty.kind {
            CompositeKind::Contract => self.contract_value(program, ty.name()).map(Some),
            _ => Ok(Some(Value::Function(FunctionValue::Constructor(ty)))),
        }
    }

    fn resolve_local_composite(&self, program: &Arc<Program>, name: &str) -> Option<CompositeType> {
        if let Some(decl) = program.elaboration.composite(name) {
            return Some(CompositeType::new(program.location.clone(), name, decl.kind));
        }
        let contract = program.elaboration.contract()?;
        let nested = format!("{}.{}", contract.name, name);
        let decl = program.elaboration.composite(&nested)?;
        Some(CompositeType::new(program.location.clone(), nested, decl.kind))
    }

    /// The deployed instance of the contract declared by `program`
    pub(crate) fn contract_value(&mut self, program: &Program, name: &str) -> Result<Value> {
        let Some(address) = program.location.address_of() else {
            return Err(UserErrorKind::TypeLoading(format!("contract `{}` is not deployed", name)).into());
        };
        self.heap
            .domain_get(address, CONTRACT_DOMAIN, name)?
            .ok_or_else(|| UserErrorKind::TypeLoading(format!("contract `{}` is not deployed at {}", name, address)).into())
    }

    // Functions

    /// Invoke an interpreted function with evaluated arguments
    pub(crate) fn invoke_interpreted(&mut self, function: &InterpretedFunction, arguments: Vec<Value>) -> Result<Value> {
        if self.depth >= self.config.stack_depth_limit {
            return Err(UserErrorKind::CallStackLimitExceeded(self.config.stack_depth_limit).into());
        }
        self.env.meter_computation(ComputationKind::FunctionInvocation, 1)?;
        self.depth += 1;
        let result = self.run_function(function, arguments);
        self.depth -= 1;
        result
    }

    fn run_function(&mut self, function: &InterpretedFunction, arguments: Vec<Value>) -> Result<Value> {
        let decl = function.decl.clone();
        let program = function.program.clone();
        if arguments.len() != decl.parameters.len() {
            return Err(UserErrorKind::ArgumentCount {
                expected: decl.parameters.len(),
                actual: arguments.len(),
            }
            .into());
        }
        let scope = match &function.scope {
            Some(captured) => Scope::child(captured),
            None => Scope::root(),
        };
        if let Some(receiver) = &function.receiver {
            scope.declare("self", Binding::constant(receiver.clone()));
        }
        let types = self.parameter_types(&program, &decl)?;
        for ((parameter, value), ty) in decl.parameters.iter().zip(arguments).zip(types) {
            let value = self.heap.transfer(value, Address::ZERO, true)?;
            if !self.conforms(&value, &ty)? {
                return Err(self.mismatch(&ty, &value)?);
            }
            let value = self.coerce(value, &ty);
            let owning = self.heap.is_resource(&value)?;
            scope.declare(
                parameter.name.clone(),
                Binding {
                    value,
                    kind: VariableKind::Let,
                    state: BindingState::Valid,
                    owning,
                    ty: Some(ty),
                },
            );
        }
        let mut frame = Frame::new(program, scope);
        frame.return_type = match &decl.return_type {
            Some(ty) => Some(self.resolve_type(&frame.program, ty)?),
            None => None,
        };

        self.check_conditions(&frame, &decl.body.pre, ConditionKind::Pre)?;
        let result = match self.exec_body(&frame, &decl.body.statements)? {
            Flow::Return(value) => value,
            _ => Value::Void,
        };
        if !decl.body.post.is_empty() {
            let post = frame.child();
            post.scope.declare("result", Binding::constant(result.clone()));
            self.check_conditions(&post, &decl.body.post, ConditionKind::Post)?;
        }
        Ok(result)
    }

    pub(crate) fn check_conditions(&mut self, frame: &Frame, conditions: &[Condition], kind: ConditionKind) -> Result<()> {
        for condition in conditions {
            self.check_condition(frame, condition, kind)
                .map_err(|e| e.at(frame.location(), condition.range))?;
        }
        Ok(())
    }

    fn check_condition(&mut self, frame: &Frame, condition: &Condition, kind: ConditionKind) -> Result<()> {
        match self.eval(frame, &condition.test, Some(&StaticType::Bool))? {
            Value::Bool(true) => Ok(()),
            Value::Bool(false) => {
                let message = match &condition.message {
                    Some(message) => match self.eval(frame, message, Some(&StaticType::String))? {
                        Value::String(message) => message,
                        other => self.heap.describe(&other)?,
                    },
                    None => String::new(),
                };
                Err(UserErrorKind::Condition { kind, message }.into())
            }
            other => Err(self.mismatch(&StaticType::Bool, &other)?),
        }
    }

    // Composites

    /// Parameter types of the initializer of a composite type
    pub(crate) fn constructor_parameter_types(&mut self, ty: &CompositeType) -> Result<Vec<StaticType>> {
        match self.composite_decl(ty)? {
            Some((program, decl)) => match &decl.initializer {
                Some(initializer) => self.parameter_types(&program, initializer),
                None => Ok(Vec::new()),
            },
            None => Err(UserErrorKind::TypeLoading(ty.type_id()).into()),
        }
    }

    /// Create a struct or resource and run its initializer
    pub(crate) fn construct(&mut self, ty: &CompositeType, arguments: Vec<Value>) -> Result<Value> {
        let Some((program, decl)) = self.composite_decl(ty)? else {
            return Err(UserErrorKind::TypeLoading(ty.type_id()).into());
        };
        match decl.kind {
            CompositeKind::Event => {
                return Err(UserErrorKind::InvalidArgument(format!("event `{}` can only be emitted", ty.type_id())).into())
            }
            CompositeKind::Contract => {
                return Err(UserErrorKind::InvalidContractDeployment(format!(
                    "contract `{}` cannot be instantiated",
                    ty.type_id()
                ))
                .into())
            }
            CompositeKind::Struct | CompositeKind::Resource => {}
        }
        self.env
            .meter_memory(MemoryUsage::new(MemoryKind::Composite, decl.fields.len() as u64 + 1))?;
        let id = self
            .heap
            .storage
            .create_composite(Address::ZERO, StaticType::Composite(ty.clone()), Vec::new())?;
        if decl.kind == CompositeKind::Resource {
            let uuid = self.env.generate_uuid()?;
            self.heap
                .storage
                .composite_set(id, "uuid", Value::Integer(IntegerValue::uint64(uuid)))?;
        }
        self.initialize(id, ty, &program, &decl, arguments)?;
        trace!(type_id = %ty.type_id(), %id, "Constructed composite");
        Ok(Value::Composite(id))
    }

    /// Run the initializer of a freshly created composite
    pub(crate) fn initialize(
        &mut self,
        id: SlabId,
        ty: &CompositeType,
        program: &Arc<Program>,
        decl: &CompositeDecl,
        arguments: Vec<Value>,
    ) -> Result<()> {
        let Some(initializer) = decl.initializer.clone() else {
            if !arguments.is_empty() {
                return Err(UserErrorKind::ArgumentCount {
                    expected: 0,
                    actual: arguments.len(),
                }
                .into());
            }
            return Ok(());
        };
        let function = InterpretedFunction {
            decl: initializer,
            program: program.clone(),
            scope: None,
            receiver: Some(Value::Composite(id)),
            composite: Some(ty.clone()),
        };
        self.initializing.push(id);
        let result = self.invoke_interpreted(&function, arguments);
        self.initializing.pop();
        result.map(|_| ())
    }

    pub(crate) fn is_initializing(&self, id: SlabId) -> bool {
        self.initializing.contains(&id)
    }

    /// Destroy a resource and everything it owns
    pub(crate) fn destroy_value(&mut self, value: Value) -> Result<()> {
        match value {
            Value::Some(inner) => self.destroy_value(*inner),
            Value::Composite(id) => self.destroy_composite(id),
            Value::Array(id) | Value::Dictionary(id) => {
                self.heap.tracker.check_alive(id)?;
                let subtree = self.heap.storage.subtree(id)?;
                for child in self.heap.storage.values(id)? {
                    if self.heap.is_resource(&child)? {
                        self.destroy_value(child)?;
                    }
                }
                self.heap.tracker.destroyed(&subtree);
                self.heap.storage.deep_remove(id)?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn destroy_composite(&mut self, id: SlabId) -> Result<()> {
        self.heap.tracker.begin_destroy(id)?;
        self.env.meter_computation(ComputationKind::Destroy, 1)?;
        let ty = self.composite_type(id)?;
        if let Some((program, decl)) = self.composite_decl(&ty)? {
            if let Some(destructor) = decl.destructor.clone() {
                let function = InterpretedFunction {
                    decl: destructor,
                    program,
                    scope: None,
                    receiver: Some(Value::Composite(id)),
                    composite: Some(ty.clone()),
                };
                self.invoke_interpreted(&function, Vec::new())?;
            }
        }
        let subtree = self.heap.storage.subtree(id)?;
        for (_, field) in self.heap.storage.composite_fields(id)? {
            if self.heap.is_resource(&field)? {
                self.destroy_value(field)?;
            }
        }
        self.heap.tracker.destroyed(&subtree);
        self.heap.storage.deep_remove(id)?;
        trace!(type_id = %ty.type_id(), %id, "Destroyed resource");
        Ok(())
    }
}

/// Names of the top-level declarations of a program
fn top_level_names(program: &Program) -> Vec<String> {
    program
        .ast
        .declarations
        .iter()
        .filter_map(|declaration| match declaration {
            Declaration::Composite(composite) => Some(composite.name.clone()),
            Declaration::Function(function) => Some(function.name.clone()),
            _ => None,
        })
        .collect()
}
