//! Statement execution
//!
//! Assignments go through [`Place`]s: a variable, a composite field, an
//! array element or a dictionary entry. Writing a place transfers the new
//! value to the address of the container that owns the place.

use ore_common::Address;
use ore_storage::SlabId;
use ore_syntax::ast::{Block, ExprKind, Expression, IfTest, Statement, StatementKind, Transfer, VariableDecl, VariableKind};

use crate::error::{Result, UserErrorKind};
use crate::export::export_value;
use crate::interface::{ComputationKind, Event};
use crate::tracker::ResourceState;
use crate::types::StaticType;
use crate::value::Value;

use super::members::{ArrayMembers, DictionaryMembers, Indexable};
use super::scope::{Binding, BindingState};
use super::{Flow, Frame, Interpreter};

/// An assignable location
#[derive(Debug, Clone)]
pub(crate) enum Place {
    Variable(String),
    Field { owner: SlabId, name: String },
    Element { array: SlabId, index: Value },
    Entry { dictionary: SlabId, key: Value },
}

impl Place {
    /// Container slab the place belongs to
    fn container(&self) -> Option<SlabId> {
        match self {
            Place::Variable(_) => None,
            Place::Field { owner, .. } => Some(*owner),
            Place::Element { array, .. } => Some(*array),
            Place::Entry { dictionary, .. } => Some(*dictionary),
        }
    }
}

impl<'a> Interpreter<'a> {
    /// Run statements in the scope of `frame`, then check that the scope
    /// does not end while still owning a resource
    pub(crate) fn exec_body(&mut self, frame: &Frame, statements: &[Statement]) -> Result<Flow> {
        let mut flow = Flow::Normal;
        for statement in statements {
            flow = self.exec_statement(frame, statement)?;
            if !matches!(flow, Flow::Normal) {
                break;
            }
        }
        self.check_scope_exit(frame)?;
        Ok(flow)
    }

    pub(crate) fn exec_block(&mut self, frame: &Frame, block: &Block) -> Result<Flow> {
        let inner = frame.child();
        self.exec_body(&inner, &block.statements)
            .map_err(|e| e.at(frame.location(), block.range))
    }

    fn check_scope_exit(&mut self, frame: &Frame) -> Result<()> {
        for (name, value) in frame.scope.owned() {
            if self.is_live_resource(&value)? {
                return Err(UserErrorKind::ResourceLoss(format!(
                    "`{}` still holds a resource at the end of its scope",
                    name
                ))
                .into());
            }
        }
        Ok(())
    }

    /// Whether the value is a resource that was neither moved out nor
    /// destroyed
    pub(crate) fn is_live_resource(&mut self, value: &Value) -> Result<bool> {
        match value {
            Value::Some(inner) => self.is_live_resource(inner),
            Value::Array(id) | Value::Dictionary(id) | Value::Composite(id) => {
                if self.heap.tracker.state(*id) == Some(ResourceState::Destroyed) || !self.heap.storage.contains(*id)? {
                    return Ok(false);
                }
                self.heap.is_resource(value)
            }
            _ => Ok(false),
        }
    }

    /// Resources must be transferred with `<-`, everything else with `=`
    pub(crate) fn check_transfer(&mut self, moved: bool, value: &Value) -> Result<()> {
        let resource = self.heap.is_resource(value)?;
        if resource && !moved {
            return Err(UserErrorKind::IncorrectTransferOperation {
                expected: "<-".to_string(),
            }
            .into());
        }
        if moved && !resource && !value.is_nil() {
            return Err(UserErrorKind::IncorrectTransferOperation {
                expected: "=".to_string(),
            }
            .into());
        }
        Ok(())
    }

    pub(crate) fn exec_statement(&mut self, frame: &Frame, statement: &Statement) -> Result<Flow> {
        self.env.meter_computation(ComputationKind::Statement, 1)?;
        self.exec_statement_kind(frame, statement)
            .map_err(|e| e.at(frame.location(), statement.range))
    }

    fn exec_statement_kind(&mut self, frame: &Frame, statement: &Statement) -> Result<Flow> {
        match &statement.kind {
            StatementKind::Variable(decl) => {
                self.declare_variable(frame, decl)?;
                Ok(Flow::Normal)
            }
            StatementKind::Assignment {
                target,
                transfer,
                value,
            } => {
                self.assign(frame, target, *transfer, value)?;
                Ok(Flow::Normal)
            }
            StatementKind::Swap { left, right } => {
                self.swap(frame, left, right)?;
                Ok(Flow::Normal)
            }
            StatementKind::Expression(expression) => {
                let value = self.eval(frame, expression, None)?;
                let owned_result = !matches!(
                    expression.kind,
                    ExprKind::Identifier(_) | ExprKind::Member { .. } | ExprKind::Index { .. }
                );
                if owned_result && self.is_live_resource(&value)? {
                    return Err(UserErrorKind::ResourceLoss("the resulting resource is not used".to_string()).into());
                }
                Ok(Flow::Normal)
            }
            StatementKind::Return(value) => {
                let Some(expression) = value else {
                    return Ok(Flow::Return(Value::Void));
                };
                let expected = frame.return_type.clone();
                let value = self.eval(frame, expression, expected.as_ref())?;
                self.check_transfer(expression.is_resource_producing(), &value)?;
                let value = match &expected {
                    Some(expected) if !self.conforms(&value, expected)? => return Err(self.mismatch(expected, &value)?),
                    Some(expected) => self.coerce(value, expected),
                    None => value,
                };
                let value = self.heap.transfer(value, Address::ZERO, true)?;
                Ok(Flow::Return(value))
            }
            StatementKind::Break => Ok(Flow::Break),
            StatementKind::Continue => Ok(Flow::Continue),
            StatementKind::If { test, then, otherwise } => self.exec_if(frame, test, then, otherwise.as_ref()),
            StatementKind::While { test, body } => {
                loop {
                    if !self.eval_condition(frame, test)? {
                        break;
                    }
                    self.env.meter_computation(ComputationKind::LoopIteration, 1)?;
                    match self.exec_block(frame, body)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            StatementKind::For {
                variable,
                iterable,
                body,
            } => {
                let iterable = self.eval(frame, iterable, None)?;
                for item in self.iteration_items(&iterable)? {
                    self.env.meter_computation(ComputationKind::LoopIteration, 1)?;
                    let inner = frame.child();
                    self.bind(&inner, VariableKind::Let, variable, item, None)?;
                    match self.exec_body(&inner, &body.statements)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            StatementKind::Emit(expression) => {
                self.emit(frame, expression)?;
                Ok(Flow::Normal)
            }
        }
    }

    fn eval_condition(&mut self, frame: &Frame, test: &Expression) -> Result<bool> {
        match self.eval(frame, test, Some(&StaticType::Bool))? {
            Value::Bool(b) => Ok(b),
            other => Err(self.mismatch(&StaticType::Bool, &other)?),
        }
    }

    fn exec_if(&mut self, frame: &Frame, test: &IfTest, then: &Block, otherwise: Option<&Block>) -> Result<Flow> {
        match test {
            IfTest::Expression(test) => {
                if self.eval_condition(frame, test)? {
                    self.exec_block(frame, then)
                } else if let Some(otherwise) = otherwise {
                    self.exec_block(frame, otherwise)
                } else {
                    Ok(Flow::Normal)
                }
            }
            IfTest::Binding(decl) => {
                let ty = match &decl.ty {
                    Some(ty) => Some(self.resolve_type(&frame.program, ty)?),
                    None => None,
                };
                let expected = ty.clone().map(StaticType::optional);
                let value = self.eval_transferred(frame, &decl.value, decl.transfer, expected.as_ref())?;
                match value {
                    Value::Some(inner) => {
                        let inner_frame = frame.child();
                        self.bind(&inner_frame, decl.kind, &decl.name, *inner, ty)?;
                        self.exec_body(&inner_frame, &then.statements)
                            .map_err(|e| e.at(frame.location(), then.range))
                    }
                    Value::Nil => match otherwise {
                        Some(otherwise) => self.exec_block(frame, otherwise),
                        None => Ok(Flow::Normal),
                    },
                    other => Err(self.mismatch(&StaticType::optional(StaticType::AnyStruct), &other)?),
                }
            }
        }
    }

    /// Values a `for` loop iterates over. Resource arrays cannot be
    /// iterated directly; iterating a reference yields references.
    fn iteration_items(&mut self, iterable: &Value) -> Result<Vec<Value>> {
        match iterable {
            Value::Reference(reference) => {
                let target = self.heap.deref(reference)?;
                match target {
                    Value::Array(id) => {
                        let element = self.heap.storage.info(id)?.element().cloned().unwrap_or(StaticType::AnyStruct);
                        let authorization = reference.authorization().clone();
                        let items = self.heap.storage.array_items(id)?;
                        Ok(items
                            .into_iter()
                            .map(|item| match item.slab() {
                                Some(_) => self.heap.reference_to(item, authorization.clone(), element.clone()),
                                None => item,
                            })
                            .collect())
                    }
                    other => self.iteration_items(&other),
                }
            }
            Value::Array(id) => {
                if self.heap.is_resource(iterable)? {
                    return Err(UserErrorKind::InvalidMove(
                        "cannot iterate over a resource array, iterate over a reference instead".to_string(),
                    )
                    .into());
                }
                Ok(self.heap.storage.array_items(*id)?)
            }
            Value::Dictionary(id) => Ok(self
                .heap
                .storage
                .dictionary_entries(*id)?
                .into_iter()
                .map(|(key, _)| key)
                .collect()),
            Value::String(s) => Ok(s.chars().map(|c| Value::String(c.to_string())).collect()),
            other => Err(UserErrorKind::TypeMismatch {
                expected: "iterable".to_string(),
                actual: self.heap.static_type(other)?.to_string(),
            }
            .into()),
        }
    }

    // Declarations

    fn declare_variable(&mut self, frame: &Frame, decl: &VariableDecl) -> Result<()> {
        let ty = match &decl.ty {
            Some(ty) => Some(self.resolve_type(&frame.program, ty)?),
            None => None,
        };
        let value = match &decl.second {
            Some((transfer, second)) => {
                if decl.transfer == Transfer::Copy {
                    return Err(UserErrorKind::IncorrectTransferOperation {
                        expected: "<-".to_string(),
                    }
                    .into());
                }
                self.exchange(frame, &decl.value, *transfer, second)?
            }
            None => self.eval_transferred(frame, &decl.value, decl.transfer, ty.as_ref())?,
        };
        let value = match &ty {
            Some(ty) if !self.conforms(&value, ty)? => return Err(self.mismatch(ty, &value)?),
            Some(ty) => self.coerce(value, ty),
            None => value,
        };
        self.bind(frame, decl.kind, &decl.name, value, ty)
    }

    /// Evaluate the right-hand side of a transfer and check the operator
    pub(crate) fn eval_transferred(
        &mut self,
        frame: &Frame,
        expression: &Expression,
        transfer: Transfer,
        expected: Option<&StaticType>,
    ) -> Result<Value> {
        let moved = transfer != Transfer::Copy;
        let value = if moved {
            self.eval_move(frame, expression, expected)?
        } else {
            self.eval(frame, expression, expected)?
        };
        self.check_transfer(moved || expression.is_resource_producing(), &value)?;
        Ok(value)
    }

    /// Declare a variable holding `value`
    pub(crate) fn bind(
        &mut self,
        frame: &Frame,
        kind: VariableKind,
        name: &str,
        value: Value,
        ty: Option<StaticType>,
    ) -> Result<()> {
        let value = self.heap.transfer(value, Address::ZERO, true)?;
        let owning = self.heap.is_resource(&value)? || ty.as_ref().map_or(false, StaticType::is_resource);
        frame.scope.declare(
            name,
            Binding {
                value,
                kind,
                state: BindingState::Valid,
                owning,
                ty,
            },
        );
        Ok(())
    }

    /// `let old <- place <- value`: move the current value out of `place`
    /// and `value` into it
    fn exchange(&mut self, frame: &Frame, target: &Expression, transfer: Transfer, value: &Expression) -> Result<Value> {
        let place = self.eval_place(frame, target)?;
        let ty = self.place_type(&place)?;
        let old = self.read_place(frame, &place, false)?;
        let new = self.eval_transferred(frame, value, transfer, ty.as_ref())?;
        if let Some(container) = place.container() {
            self.heap.check_recursive_transfer(&new, container)?;
        }
        self.write_place(frame, &place, new)?;
        if let Place::Field { owner, name } = &place {
            self.heap.tracker.field_restored(*owner, name);
        }
        Ok(old)
    }

    // Assignment

    fn assign(&mut self, frame: &Frame, target: &Expression, transfer: Transfer, value: &Expression) -> Result<()> {
        let place = self.eval_place(frame, target)?;
        let ty = self.place_type(&place)?;
        let new = self.eval_transferred(frame, value, transfer, ty.as_ref())?;
        let old = self.read_place(frame, &place, true)?;
        match transfer {
            Transfer::ForceMove if !old.is_nil() => return Err(UserErrorKind::ForceAssignmentToNonNil.into()),
            Transfer::Move if self.is_live_resource(&old)? => {
                return Err(UserErrorKind::ResourceLoss("the assigned place still holds a resource".to_string()).into())
            }
            _ => {}
        }
        if let Some(container) = place.container() {
            self.heap.check_recursive_transfer(&new, container)?;
        }
        let old = self.write_place(frame, &place, new)?;
        self.discard_copy(&old)
    }

    fn swap(&mut self, frame: &Frame, left: &Expression, right: &Expression) -> Result<()> {
        let left = self.eval_place(frame, left)?;
        let right = self.eval_place(frame, right)?;
        let left_value = self.read_place(frame, &left, false)?;
        let right_value = self.read_place(frame, &right, false)?;
        if let Some(container) = right.container() {
            self.heap.check_recursive_transfer(&left_value, container)?;
        }
        if let Some(container) = left.container() {
            self.heap.check_recursive_transfer(&right_value, container)?;
        }
        self.write_place(frame, &left, right_value)?;
        self.write_place(frame, &right, left_value)?;
        Ok(())
    }

    /// Free the slabs of a replaced non-resource value
    fn discard_copy(&mut self, old: &Value) -> Result<()> {
        let Some(id) = old.slab() else {
            return Ok(());
        };
        if !self.heap.storage.contains(id)? || self.heap.is_resource(old)? {
            return Ok(());
        }
        self.heap.remove_value(old)
    }

    // Places

    pub(crate) fn eval_place(&mut self, frame: &Frame, target: &Expression) -> Result<Place> {
        match &target.kind {
            ExprKind::Identifier(name) => match frame.scope.lookup(name) {
                Some(_) => Ok(Place::Variable(name.clone())),
                None => Err(UserErrorKind::NotDeclared(name.clone()).into()),
            },
            ExprKind::Member {
                target: owner,
                name,
                optional: false,
            } => {
                let owner = self.eval(frame, owner, None)?;
                match self.deref_value(owner)? {
                    Value::Composite(id) => Ok(Place::Field {
                        owner: id,
                        name: name.clone(),
                    }),
                    other => Err(UserErrorKind::MissingMember {
                        type_id: self.heap.static_type(&other)?.to_string(),
                        name: name.clone(),
                    }
                    .into()),
                }
            }
            ExprKind::Index { target: container, index } => {
                let container = self.eval(frame, container, None)?;
                match self.deref_value(container)? {
                    Value::Array(id) => {
                        let index = self.eval(frame, index, Some(&StaticType::Integer(crate::value::IntegerKind::Int)))?;
                        Ok(Place::Element { array: id, index })
                    }
                    Value::Dictionary(id) => {
                        let key_type = match self.heap.storage.info(id)? {
                            StaticType::Dictionary(key, _) => Some(*key),
                            _ => None,
                        };
                        let key = self.eval(frame, index, key_type.as_ref())?;
                        Ok(Place::Entry { dictionary: id, key })
                    }
                    other => Err(UserErrorKind::TypeMismatch {
                        expected: "indexable value".to_string(),
                        actual: self.heap.static_type(&other)?.to_string(),
                    }
                    .into()),
                }
            }
            _ => Err(UserErrorKind::InvalidArgument("expression cannot be assigned to".to_string()).into()),
        }
    }

    /// Declared type of a place, used to type literals assigned to it
    fn place_type(&mut self, place: &Place) -> Result<Option<StaticType>> {
        match place {
            Place::Variable(_) => Ok(None),
            Place::Field { owner, name } => {
                let ty = self.composite_type(*owner)?;
                match self.composite_decl(&ty)? {
                    Some((program, decl)) => match decl.field(name) {
                        Some(field) => Ok(Some(self.resolve_type(&program, &field.ty)?)),
                        None => Ok(None),
                    },
                    None => Ok(None),
                }
            }
            Place::Element { array, .. } => Ok(self.heap.storage.info(*array)?.element().cloned()),
            Place::Entry { dictionary, .. } => match self.heap.storage.info(*dictionary)? {
                StaticType::Dictionary(_, value) => Ok(Some(StaticType::optional(*value))),
                _ => Ok(None),
            },
        }
    }

    /// Current value of a place. Moved variables read as nil when
    /// `allow_moved` is set.
    fn read_place(&mut self, frame: &Frame, place: &Place, allow_moved: bool) -> Result<Value> {
        match place {
            Place::Variable(name) => match frame.scope.lookup(name) {
                Some(binding) if binding.state == BindingState::Valid => Ok(binding.value),
                Some(_) if allow_moved => Ok(Value::Nil),
                Some(_) => Err(UserErrorKind::InvalidatedResourceUse(name.clone()).into()),
                None => Err(UserErrorKind::NotDeclared(name.clone()).into()),
            },
            Place::Field { owner, name } => {
                self.heap.tracker.check_alive(*owner)?;
                Ok(self.heap.storage.composite_get(*owner, name)?.unwrap_or(Value::Nil))
            }
            Place::Element { array, index } => {
                let index = self.element_index(*array, index)?;
                Ok(self.heap.storage.array_get(*array, index)?)
            }
            Place::Entry { dictionary, key } => Ok(match self.heap.storage.dictionary_get(*dictionary, key)? {
                Some(value) => Value::some(value),
                None => Value::Nil,
            }),
        }
    }

    pub(crate) fn element_index(&mut self, array: SlabId, index: &Value) -> Result<usize> {
        let length = self.heap.storage.array_len(array)?;
        let out_of_bounds = || UserErrorKind::IndexOutOfBounds {
            index: index_text(index),
            length,
        };
        let Value::Integer(integer) = index else {
            return Err(out_of_bounds().into());
        };
        match integer.to_usize() {
            Some(i) if i < length => Ok(i),
            _ => Err(out_of_bounds().into()),
        }
    }

    /// Store `value` in `place`, returning the replaced value
    fn write_place(&mut self, frame: &Frame, place: &Place, value: Value) -> Result<Value> {
        match place {
            Place::Variable(name) => {
                let Some(binding) = frame.scope.lookup(name) else {
                    return Err(UserErrorKind::NotDeclared(name.clone()).into());
                };
                if binding.kind == VariableKind::Let {
                    return Err(UserErrorKind::AssignmentToConstant(name.clone()).into());
                }
                if let Some(ty) = &binding.ty {
                    if !self.conforms(&value, ty)? {
                        return Err(self.mismatch(ty, &value)?);
                    }
                }
                let value = self.heap.transfer(value, Address::ZERO, true)?;
                let resource = self.heap.is_resource(&value)?;
                let old = frame
                    .scope
                    .update(name, |binding| {
                        let old = std::mem::replace(&mut binding.value, value);
                        let valid = binding.state == BindingState::Valid;
                        binding.state = BindingState::Valid;
                        binding.owning |= resource;
                        if valid {
                            old
                        } else {
                            Value::Nil
                        }
                    })
                    .unwrap_or(Value::Nil);
                Ok(old)
            }
            Place::Field { owner, name } => {
                self.heap.tracker.check_alive(*owner)?;
                self.check_field_assignment(*owner, name)?;
                if let Some(expected) = self.place_type(place)? {
                    if !self.conforms(&value, &expected)? {
                        return Err(self.mismatch(&expected, &value)?);
                    }
                }
                let value = self.heap.transfer(value, owner.address, true)?;
                let old = self.heap.storage.composite_set(*owner, name, value)?;
                self.heap.tracker.field_restored(*owner, name);
                Ok(old.unwrap_or(Value::Nil))
            }
            Place::Element { array, index } => ArrayMembers(*array).set_index(self, index, value),
            Place::Entry { dictionary, key } => DictionaryMembers(*dictionary).set_index(self, key, value),
        }
    }

    /// Constant fields can only be assigned by the initializer
    fn check_field_assignment(&mut self, owner: SlabId, name: &str) -> Result<()> {
        if self.is_initializing(owner) || self.transaction == Some(owner) {
            return Ok(());
        }
        let ty = self.composite_type(owner)?;
        let Some((_, decl)) = self.composite_decl(&ty)? else {
            return Ok(());
        };
        match decl.field(name) {
            Some(field) if field.kind == VariableKind::Let => Err(UserErrorKind::AssignmentToConstant(name.to_string()).into()),
            _ => Ok(()),
        }
    }

    /// Fail with a container mutation error if `value` does not fit the
    /// element type of the container
    pub(crate) fn check_element(&mut self, container: SlabId, value: &Value) -> Result<()> {
        let expected = match self.heap.storage.info(container)? {
            StaticType::Array(element) => *element,
            StaticType::Dictionary(_, value) => *value,
            _ => return Ok(()),
        };
        if self.conforms(value, &expected)? {
            return Ok(());
        }
        let actual = self.heap.static_type(value)?;
        Err(UserErrorKind::ContainerMutation {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
        .into())
    }

    // Events

    fn emit(&mut self, frame: &Frame, expression: &Expression) -> Result<()> {
        let ExprKind::Invocation { target, arguments, .. } = &expression.kind else {
            return Err(UserErrorKind::InvalidArgument("only events can be emitted".to_string()).into());
        };
        let path = match &target.kind {
            ExprKind::Identifier(name) => vec![name.clone()],
            ExprKind::Member { target, name, .. } => match &target.kind {
                ExprKind::Identifier(owner) => vec![owner.clone(), name.clone()],
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };
        let ty = match self.resolve_composite(&frame.program, &path)? {
            Some(ty) if ty.kind == ore_syntax::ast::CompositeKind::Event => ty,
            _ => return Err(UserErrorKind::InvalidArgument("only events can be emitted".to_string()).into()),
        };
        let Some((program, decl)) = self.composite_decl(&ty)? else {
            return Err(UserErrorKind::TypeLoading(ty.type_id()).into());
        };
        if arguments.len() != decl.parameters.len() {
            return Err(UserErrorKind::ArgumentCount {
                expected: decl.parameters.len(),
                actual: arguments.len(),
            }
            .into());
        }
        let mut fields = Vec::with_capacity(arguments.len());
        for (parameter, argument) in decl.parameters.iter().zip(arguments) {
            let expected = self.resolve_type(&program, &parameter.ty)?;
            let value = self.eval(frame, &argument.value, Some(&expected))?;
            if !self.conforms(&value, &expected)? {
                return Err(self.mismatch(&expected, &value)?);
            }
            fields.push((parameter.name.clone(), export_value(&mut self.heap, &value)?));
        }
        self.env.emit_event(&Event {
            type_id: ty.type_id(),
            fields,
        })
    }
}

fn index_text(index: &Value) -> String {
    match index {
        Value::Integer(integer) => integer.to_string(),
        other => format!("{:?}", other.kind()),
    }
}
