//! Expression evaluation
//!
//! `expected` carries the type the context expects, if any. It only types
//! literals; every other expression produces its own dynamic type and is
//! checked by the caller.

use std::cmp::Ordering;
use std::rc::Rc;

use num_bigint::BigInt;
use ore_common::{Address, Path};
use ore_syntax::ast::{BinaryOp, CastKind, ExprKind, Expression, TypeExpr, UnaryOp};

use crate::error::{Result, UserErrorKind};
use crate::interface::{MemoryKind, MemoryUsage};
use crate::types::{Authorization, StaticType};
use crate::value::number::{parse_fixed, FixedKind};
use crate::value::{FunctionValue, IntegerKind, IntegerValue, InterpretedFunction, ReferenceValue, Value};

use super::scope::BindingState;
use super::{Frame, Interpreter};

impl<'a> Interpreter<'a> {
    pub(crate) fn eval(&mut self, frame: &Frame, expression: &Expression, expected: Option<&StaticType>) -> Result<Value> {
        self.eval_kind(frame, expression, expected)
            .map_err(|e| e.at(frame.location(), expression.range))
    }

    fn eval_kind(&mut self, frame: &Frame, expression: &Expression, expected: Option<&StaticType>) -> Result<Value> {
        match &expression.kind {
            ExprKind::Nil => Ok(Value::Nil),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Integer { digits, radix } => integer_literal(digits, *radix, false, expected),
            ExprKind::Fixed(text) => fixed_literal(text, false, expected),
            ExprKind::String(s) => {
                self.env
                    .meter_memory(MemoryUsage::new(MemoryKind::String, s.len() as u64))?;
                Ok(Value::String(s.clone()))
            }
            ExprKind::Path { domain, identifier } => Ok(Value::Path(Path::new(*domain, identifier.clone()))),
            ExprKind::Identifier(name) => self.lookup(frame, name),
            ExprKind::Array(items) => self.array_literal(frame, items, expected),
            ExprKind::Dictionary(entries) => self.dictionary_literal(frame, entries, expected),
            ExprKind::Member { target, name, optional } => {
                let target = self.eval(frame, target, None)?;
                match (target, *optional) {
                    (Value::Nil, true) => Ok(Value::Nil),
                    (Value::Some(inner), true) => Ok(self.get_member(&inner, name)?.into_optional()),
                    (target, _) => self.get_member(&target, name),
                }
            }
            ExprKind::Index { target, index } => {
                let target = self.eval(frame, target, None)?;
                let index_type = self.index_type(&target)?;
                let index = self.eval(frame, index, index_type.as_ref())?;
                self.get_index(&target, &index)
            }
            ExprKind::Invocation {
                target,
                type_arguments,
                arguments,
            } => self.eval_invocation(frame, target, type_arguments, arguments, false),
            ExprKind::Force(inner) => {
                let expected = expected.map(|ty| StaticType::optional(ty.clone()));
                let value = self.eval(frame, inner, expected.as_ref())?;
                force(value)
            }
            ExprKind::Cast { value, kind, ty } => self.eval_cast(frame, value, *kind, ty, false),
            ExprKind::Reference { value, ty } => self.eval_reference(frame, value, ty.as_ref()),
            ExprKind::Create(inner) => match &inner.kind {
                ExprKind::Invocation {
                    target,
                    type_arguments,
                    arguments,
                } => self.eval_invocation(frame, target, type_arguments, arguments, true),
                _ => Err(UserErrorKind::InvalidArgument("`create` requires a constructor call".to_string()).into()),
            },
            ExprKind::Destroy(inner) => {
                let value = self.eval_move(frame, inner, None)?;
                if !value.is_nil() && !self.heap.is_resource(&value)? {
                    return Err(UserErrorKind::InvalidArgument(format!(
                        "only resources can be destroyed, found `{}`",
                        self.heap.static_type(&value)?
                    ))
                    .into());
                }
                self.destroy_value(value)?;
                Ok(Value::Void)
            }
            ExprKind::Move(inner) => self.eval_move(frame, inner, expected),
            ExprKind::Unary { op, operand } => self.eval_unary(frame, *op, operand, expected),
            ExprKind::Binary { op, left, right } => self.eval_binary(frame, *op, left, right, expected),
            ExprKind::Conditional { test, then, otherwise } => {
                let chosen = if self.eval_test(frame, test)? { then } else { otherwise };
                self.eval(frame, chosen, expected)
            }
            ExprKind::Function(decl) => Ok(Value::Function(FunctionValue::Interpreted(Rc::new(InterpretedFunction {
                decl: decl.clone(),
                program: frame.program.clone(),
                scope: Some(frame.scope.clone()),
                receiver: None,
                composite: None,
            })))),
        }
    }

    fn eval_test(&mut self, frame: &Frame, test: &Expression) -> Result<bool> {
        match self.eval(frame, test, Some(&StaticType::Bool))? {
            Value::Bool(b) => Ok(b),
            other => Err(self.mismatch(&StaticType::Bool, &other)?),
        }
    }

    /// Expected type of an index into `target`
    fn index_type(&mut self, target: &Value) -> Result<Option<StaticType>> {
        let target = self.deref_value(target.clone())?;
        Ok(match &target {
            Value::Array(_) | Value::String(_) => Some(StaticType::Integer(IntegerKind::Int)),
            Value::Dictionary(id) => match self.heap.storage.info(*id)? {
                StaticType::Dictionary(key, _) => Some(*key),
                _ => None,
            },
            _ => None,
        })
    }

    /// Follow references to the value they point at
    pub(crate) fn deref_value(&mut self, value: Value) -> Result<Value> {
        match value {
            Value::Reference(reference) => {
                let target = self.heap.deref(&reference)?;
                self.deref_value(target)
            }
            other => Ok(other),
        }
    }

    // Literals

    fn array_literal(&mut self, frame: &Frame, items: &[Expression], expected: Option<&StaticType>) -> Result<Value> {
        let element = match expected.map(StaticType::unwrap_optional) {
            Some(StaticType::Array(element)) => Some((**element).clone()),
            _ => None,
        };
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            let value = self.eval(frame, item, element.as_ref())?;
            self.check_transfer(item.is_resource_producing(), &value)
                .map_err(|e| e.at(frame.location(), item.range))?;
            values.push(value);
        }
        let element = match element {
            Some(element) => element,
            None => self.common_type(&values)?,
        };
        for value in &values {
            if !self.conforms(value, &element)? {
                return Err(self.mismatch(&element, value)?);
            }
        }
        self.new_array(element, values)
    }

    fn dictionary_literal(
        &mut self,
        frame: &Frame,
        entries: &[(Expression, Expression)],
        expected: Option<&StaticType>,
    ) -> Result<Value> {
        let (key_type, value_type) = match expected.map(StaticType::unwrap_optional) {
            Some(StaticType::Dictionary(key, value)) => (Some((**key).clone()), Some((**value).clone())),
            _ => (None, None),
        };
        let mut keys = Vec::with_capacity(entries.len());
        let mut values = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let key = self.eval(frame, key, key_type.as_ref())?;
            if key.slab().is_some() {
                return Err(UserErrorKind::InvalidArgument(format!(
                    "`{}` cannot be used as a dictionary key",
                    self.heap.static_type(&key)?
                ))
                .into());
            }
            let evaluated = self.eval(frame, value, value_type.as_ref())?;
            self.check_transfer(value.is_resource_producing(), &evaluated)
                .map_err(|e| e.at(frame.location(), value.range))?;
            keys.push(key);
            values.push(evaluated);
        }
        let key_type = match key_type {
            Some(ty) => ty,
            None => self.common_type(&keys)?,
        };
        let value_type = match value_type {
            Some(ty) => ty,
            None => self.common_type(&values)?,
        };
        self.env
            .meter_memory(MemoryUsage::new(MemoryKind::Dictionary, entries.len() as u64 + 1))?;
        let id = self.heap.storage.create_dictionary(
            Address::ZERO,
            StaticType::dictionary(key_type.clone(), value_type.clone()),
            Vec::new(),
        )?;
        for (key, value) in keys.into_iter().zip(values) {
            if !self.conforms(&key, &key_type)? {
                return Err(self.mismatch(&key_type, &key)?);
            }
            if !self.conforms(&value, &value_type)? {
                return Err(self.mismatch(&value_type, &value)?);
            }
            let value = self.heap.transfer(value, Address::ZERO, true)?;
            if let Some(replaced) = self.heap.storage.dictionary_insert(id, key, value)? {
                if self.is_live_resource(&replaced)? {
                    return Err(UserErrorKind::ResourceLoss("duplicate key in a resource dictionary literal".to_string()).into());
                }
            }
        }
        Ok(Value::Dictionary(id))
    }

    // Casts and references

    fn eval_cast(&mut self, frame: &Frame, value: &Expression, kind: CastKind, ty: &TypeExpr, moving: bool) -> Result<Value> {
        let ty = self.resolve_type(&frame.program, ty)?;
        let expected = match kind {
            CastKind::Static => Some(&ty),
            CastKind::Failable | CastKind::Force => None,
        };
        let value = if moving {
            self.eval_move(frame, value, expected)?
        } else {
            self.eval(frame, value, expected)?
        };
        let conforms = self.conforms(&value, &ty)?;
        match kind {
            CastKind::Static if conforms => Ok(value),
            CastKind::Static => Err(self.mismatch(&ty, &value)?),
            CastKind::Failable if conforms => Ok(Value::some(value)),
            CastKind::Failable => Ok(Value::Nil),
            CastKind::Force if conforms => Ok(value),
            CastKind::Force => Err(UserErrorKind::ForceCast {
                expected: ty.to_string(),
                actual: self.heap.static_type(&value)?.to_string(),
            }
            .into()),
        }
    }

    fn eval_reference(&mut self, frame: &Frame, value: &Expression, ty: Option<&TypeExpr>) -> Result<Value> {
        let ty = match ty {
            Some(ty) => Some(self.resolve_type(&frame.program, ty)?),
            None => None,
        };
        let (authorization, referenced) = match ty.as_ref().map(StaticType::unwrap_optional) {
            Some(StaticType::Reference {
                authorization,
                referenced,
            }) => (authorization.clone(), Some((**referenced).clone())),
            Some(other) => {
                return Err(UserErrorKind::TypeMismatch {
                    expected: "reference type".to_string(),
                    actual: other.to_string(),
                }
                .into())
            }
            None => (Authorization::Unauthorized, None),
        };
        let target = self.eval(frame, value, None)?;
        self.make_reference(target, authorization, referenced)
    }

    /// Reference to `target`; optionals produce optional references
    pub(crate) fn make_reference(
        &mut self,
        target: Value,
        authorization: Authorization,
        referenced: Option<StaticType>,
    ) -> Result<Value> {
        match target {
            Value::Nil => Ok(Value::Nil),
            Value::Some(inner) => Ok(Value::some(self.make_reference(*inner, authorization, referenced)?)),
            Value::Reference(existing) => {
                let inner = self.heap.deref(&existing)?;
                self.make_reference(inner, authorization, referenced)
            }
            target => {
                let borrowed = match referenced {
                    Some(ty) => ty,
                    None => self.heap.static_type(&target)?,
                };
                if !self.conforms(&target, &borrowed)? {
                    return Err(self.mismatch(&borrowed, &target)?);
                }
                self.env.meter_memory(MemoryUsage::new(MemoryKind::Reference, 1))?;
                Ok(self.heap.reference_to(target, authorization, borrowed))
            }
        }
    }

    /// A value stored under a declared type: references take the
    /// authorization of the declared reference type
    pub(crate) fn coerce(&mut self, value: Value, ty: &StaticType) -> Value {
        match (value, ty) {
            (Value::Some(inner), StaticType::Optional(ty)) => Value::some(self.coerce(*inner, ty)),
            (Value::Reference(reference), StaticType::Reference { authorization, .. }) => {
                Value::Reference(with_authorization(reference, authorization.clone()))
            }
            (Value::Account(mut handle), StaticType::Reference { authorization, .. }) => {
                handle.authorization = authorization.clone();
                Value::Account(handle)
            }
            (value, StaticType::Optional(ty)) => self.coerce(value, ty),
            (value, _) => value,
        }
    }

    // Operators

    fn eval_unary(&mut self, frame: &Frame, op: UnaryOp, operand: &Expression, expected: Option<&StaticType>) -> Result<Value> {
        match op {
            UnaryOp::Not => Ok(Value::Bool(!self.eval_test(frame, operand)?)),
            UnaryOp::Negate => {
                match &operand.kind {
                    ExprKind::Integer { digits, radix } => return integer_literal(digits, *radix, true, expected),
                    ExprKind::Fixed(text) => return fixed_literal(text, true, expected),
                    _ => {}
                }
                match self.eval(frame, operand, expected)? {
                    Value::Integer(integer) => Ok(Value::Integer(integer.neg()?)),
                    Value::Fix64(v) => Ok(Value::Fix64(FixedKind::Fix64.check(-(v as i128))? as i64)),
                    other => Err(UserErrorKind::TypeMismatch {
                        expected: "signed number".to_string(),
                        actual: self.heap.static_type(&other)?.to_string(),
                    }
                    .into()),
                }
            }
        }
    }

    fn eval_binary(
        &mut self,
        frame: &Frame,
        op: BinaryOp,
        left: &Expression,
        right: &Expression,
        expected: Option<&StaticType>,
    ) -> Result<Value> {
        match op {
            BinaryOp::Coalesce => {
                let optional = expected.map(|ty| StaticType::optional(ty.clone()));
                match self.eval(frame, left, optional.as_ref())? {
                    Value::Some(inner) => Ok(*inner),
                    Value::Nil => self.eval(frame, right, expected),
                    other => Ok(other),
                }
            }
            BinaryOp::And => Ok(Value::Bool(self.eval_test(frame, left)? && self.eval_test(frame, right)?)),
            BinaryOp::Or => Ok(Value::Bool(self.eval_test(frame, left)? || self.eval_test(frame, right)?)),
            BinaryOp::Equal | BinaryOp::NotEqual => {
                let (l, r) = self.eval_operands(frame, left, right, None)?;
                let equal = self.heap.equal(&l, &r)?;
                Ok(Value::Bool(equal == (op == BinaryOp::Equal)))
            }
            BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
                let (l, r) = self.eval_operands(frame, left, right, None)?;
                let ordering = self.compare(op, &l, &r)?;
                Ok(Value::Bool(match op {
                    BinaryOp::Less => ordering == Ordering::Less,
                    BinaryOp::LessEqual => ordering != Ordering::Greater,
                    BinaryOp::Greater => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                }))
            }
            BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Modulo => {
                let (l, r) = self.eval_operands(frame, left, right, expected)?;
                self.arithmetic(op, l, r)
            }
        }
    }

    /// Evaluate both operands so that a literal takes the type of the other
    /// side
    fn eval_operands(
        &mut self,
        frame: &Frame,
        left: &Expression,
        right: &Expression,
        expected: Option<&StaticType>,
    ) -> Result<(Value, Value)> {
        if left.is_literal() && !right.is_literal() {
            let r = self.eval(frame, right, expected)?;
            let ty = self.heap.static_type(&r)?;
            let l = self.eval(frame, left, Some(&ty))?;
            return Ok((l, r));
        }
        let l = self.eval(frame, left, expected)?;
        let ty = self.heap.static_type(&l)?;
        let r = self.eval(frame, right, Some(&ty))?;
        Ok((l, r))
    }

    fn compare(&mut self, op: BinaryOp, l: &Value, r: &Value) -> Result<Ordering> {
        Ok(match (l, r) {
            (Value::Integer(a), Value::Integer(b)) if a.kind == b.kind => a.value.cmp(&b.value),
            (Value::Fix64(a), Value::Fix64(b)) => a.cmp(b),
            (Value::UFix64(a), Value::UFix64(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            _ => return Err(self.operand_mismatch(op, l, r)?),
        })
    }

    fn arithmetic(&mut self, op: BinaryOp, l: Value, r: Value) -> Result<Value> {
        Ok(match (&l, &r) {
            (Value::Integer(a), Value::Integer(b)) if a.kind == b.kind => Value::Integer(match op {
                BinaryOp::Add => a.add(b)?,
                BinaryOp::Subtract => a.sub(b)?,
                BinaryOp::Multiply => a.mul(b)?,
                BinaryOp::Divide => a.div(b)?,
                _ => a.rem(b)?,
            }),
            (Value::Fix64(a), Value::Fix64(b)) => {
                Value::Fix64(fixed_arithmetic(FixedKind::Fix64, op, *a as i128, *b as i128)? as i64)
            }
            (Value::UFix64(a), Value::UFix64(b)) => {
                Value::UFix64(fixed_arithmetic(FixedKind::UFix64, op, *a as i128, *b as i128)? as u64)
            }
            _ => return Err(self.operand_mismatch(op, &l, &r)?),
        })
    }

    fn operand_mismatch(&mut self, op: BinaryOp, l: &Value, r: &Value) -> Result<crate::error::Error> {
        Ok(UserErrorKind::TypeMismatch {
            expected: format!("operands of `{}` with the same numeric type", op.symbol()),
            actual: format!("{}, {}", self.heap.static_type(l)?, self.heap.static_type(r)?),
        }
        .into())
    }

    // Moves

    /// Evaluate the operand of `<-`. Moving out of a variable invalidates
    /// the variable; resource fields can only be moved out while their
    /// owner is being destroyed or by the running transaction.
    pub(crate) fn eval_move(&mut self, frame: &Frame, expression: &Expression, expected: Option<&StaticType>) -> Result<Value> {
        self.eval_move_kind(frame, expression, expected)
            .map_err(|e| e.at(frame.location(), expression.range))
    }

    fn eval_move_kind(&mut self, frame: &Frame, expression: &Expression, expected: Option<&StaticType>) -> Result<Value> {
        match &expression.kind {
            ExprKind::Identifier(name) => {
                let value = self.lookup(frame, name)?;
                if self.is_live_resource(&value)? {
                    frame.scope.update(name, |binding| binding.state = BindingState::Moved);
                }
                Ok(value)
            }
            ExprKind::Member {
                target,
                name,
                optional: false,
            } => {
                let owner = self.eval(frame, target, None)?;
                let Value::Composite(id) = self.deref_value(owner.clone())? else {
                    return self.get_member(&owner, name);
                };
                let Some(value) = self.heap.storage.composite_get(id, name)? else {
                    if self.heap.tracker.is_field_moved(id, name) {
                        return Err(UserErrorKind::InvalidatedResourceUse(name.clone()).into());
                    }
                    return self.get_member(&Value::Composite(id), name);
                };
                if !self.heap.is_resource(&value)? {
                    return Ok(value);
                }
                if !self.heap.tracker.is_destroying(id) && self.transaction != Some(id) {
                    return Err(UserErrorKind::InvalidMove(format!(
                        "resource field `{}` can only be moved out with a swap",
                        name
                    ))
                    .into());
                }
                self.heap.storage.composite_remove(id, name)?;
                self.heap.tracker.field_moved(id, name);
                Ok(value)
            }
            ExprKind::Index { .. } => {
                let value = self.eval(frame, expression, expected)?;
                if self.heap.is_resource(&value)? {
                    return Err(UserErrorKind::InvalidMove(
                        "resources in containers can only be moved out with a swap or `remove`".to_string(),
                    )
                    .into());
                }
                Ok(value)
            }
            ExprKind::Force(inner) => {
                let expected = expected.map(|ty| StaticType::optional(ty.clone()));
                let value = self.eval_move(frame, inner, expected.as_ref())?;
                force(value)
            }
            ExprKind::Cast { value, kind, ty } => self.eval_cast(frame, value, *kind, ty, true),
            ExprKind::Binary {
                op: BinaryOp::Coalesce,
                left,
                right,
            } => {
                let optional = expected.map(|ty| StaticType::optional(ty.clone()));
                match self.eval_move(frame, left, optional.as_ref())? {
                    Value::Some(inner) => Ok(*inner),
                    Value::Nil => self.eval_move(frame, right, expected),
                    other => Ok(other),
                }
            }
            ExprKind::Conditional { test, then, otherwise } => {
                let chosen = if self.eval_test(frame, test)? { then } else { otherwise };
                self.eval_move(frame, chosen, expected)
            }
            _ => self.eval(frame, expression, expected),
        }
    }
}

fn force(value: Value) -> Result<Value> {
    match value {
        Value::Some(inner) => Ok(*inner),
        Value::Nil => Err(UserErrorKind::ForceNil.into()),
        other => Ok(other),
    }
}

pub(super) fn with_authorization(reference: ReferenceValue, authorization: Authorization) -> ReferenceValue {
    match reference {
        ReferenceValue::Ephemeral {
            target,
            generation,
            borrowed,
            ..
        } => ReferenceValue::Ephemeral {
            target,
            generation,
            authorization,
            borrowed,
        },
        ReferenceValue::Storage {
            address, path, borrowed, ..
        } => ReferenceValue::Storage {
            address,
            path,
            authorization,
            borrowed,
        },
    }
}

/// Integer literal typed by the expected type. Hexadecimal literals without
/// an integer expectation are addresses.
fn integer_literal(digits: &str, radix: u32, negative: bool, expected: Option<&StaticType>) -> Result<Value> {
    let magnitude = BigInt::parse_bytes(digits.as_bytes(), radix)
        .ok_or_else(|| UserErrorKind::InvalidArgument(format!("invalid integer literal `{}`", digits)))?;
    let value = if negative { -magnitude } else { magnitude };
    match expected.map(StaticType::unwrap_optional) {
        Some(StaticType::Integer(kind)) => Ok(Value::Integer(IntegerValue::new(*kind, value)?)),
        Some(StaticType::Fix64) => Ok(Value::Fix64(FixedKind::Fix64.check(scale(&value)?)? as i64)),
        Some(StaticType::UFix64) => Ok(Value::UFix64(FixedKind::UFix64.check(scale(&value)?)? as u64)),
        Some(StaticType::Address) => address_literal(&value),
        _ if radix == 16 && !negative => address_literal(&value),
        _ => Ok(Value::Integer(IntegerValue::int(value))),
    }
}

fn scale(value: &BigInt) -> Result<i128> {
    let value: i128 = value.try_into().map_err(|_| UserErrorKind::Overflow)?;
    value
        .checked_mul(crate::value::number::FIXED_SCALE)
        .ok_or_else(|| UserErrorKind::Overflow.into())
}

fn address_literal(value: &BigInt) -> Result<Value> {
    let value: u64 = value
        .try_into()
        .map_err(|_| UserErrorKind::InvalidArgument(format!("address literal {} is out of range", value)))?;
    Ok(Value::Address(Address::from_u64(value)))
}

/// Fixed-point literal, `UFix64` unless negative or expected otherwise
fn fixed_literal(text: &str, negative: bool, expected: Option<&StaticType>) -> Result<Value> {
    let scaled = parse_fixed(text)?;
    let scaled = if negative { -scaled } else { scaled };
    match expected.map(StaticType::unwrap_optional) {
        Some(StaticType::Fix64) => Ok(Value::Fix64(FixedKind::Fix64.check(scaled)? as i64)),
        Some(StaticType::UFix64) => Ok(Value::UFix64(FixedKind::UFix64.check(scaled)? as u64)),
        _ if negative => Ok(Value::Fix64(FixedKind::Fix64.check(scaled)? as i64)),
        _ => Ok(Value::UFix64(FixedKind::UFix64.check(scaled)? as u64)),
    }
}

fn fixed_arithmetic(kind: FixedKind, op: BinaryOp, a: i128, b: i128) -> Result<i128> {
    match op {
        BinaryOp::Add => kind.add(a, b),
        BinaryOp::Subtract => kind.sub(a, b),
        BinaryOp::Multiply => kind.mul(a, b),
        BinaryOp::Divide => kind.div(a, b),
        _ => kind.rem(a, b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn int(value: &Value) -> (IntegerKind, i128) {
        match value {
            Value::Integer(integer) => (integer.kind, integer.to_i128().unwrap()),
            other => panic!("not an integer: {:?}", other),
        }
    }

    #[test]
    fn test_integer_literals_follow_expectation() {
        assert_eq!(int(&integer_literal("42", 10, false, None).unwrap()), (IntegerKind::Int, 42));
        let uint8 = StaticType::Integer(IntegerKind::UInt8);
        assert_eq!(int(&integer_literal("255", 10, false, Some(&uint8)).unwrap()), (IntegerKind::UInt8, 255));
        assert!(integer_literal("256", 10, false, Some(&uint8)).is_err());
        let optional = StaticType::optional(StaticType::Integer(IntegerKind::Int8));
        assert_eq!(int(&integer_literal("128", 10, true, Some(&optional)).unwrap()), (IntegerKind::Int8, -128));
    }

    #[test]
    fn test_hex_literals_are_addresses() {
        match integer_literal("01", 16, false, None).unwrap() {
            Value::Address(address) => assert_eq!(address, Address::from_u64(1)),
            other => panic!("expected an address, got {:?}", other),
        }
        let int = StaticType::Integer(IntegerKind::Int);
        assert!(matches!(integer_literal("ff", 16, false, Some(&int)).unwrap(), Value::Integer(_)));
    }

    #[test]
    fn test_fixed_literals() {
        assert!(matches!(fixed_literal("1.5", false, None).unwrap(), Value::UFix64(150_000_000)));
        assert!(matches!(fixed_literal("1.5", true, None).unwrap(), Value::Fix64(-150_000_000)));
        assert!(fixed_literal("1.0", true, Some(&StaticType::UFix64)).is_err());
        assert!(matches!(
            integer_literal("2", 10, false, Some(&StaticType::UFix64)).unwrap(),
            Value::UFix64(200_000_000)
        ));
    }

    #[test]
    fn test_fixed_arithmetic_checks_range() {
        let one = crate::value::number::FIXED_SCALE;
        assert_eq!(fixed_arithmetic(FixedKind::UFix64, BinaryOp::Add, one, one).unwrap(), 2 * one);
        assert!(fixed_arithmetic(FixedKind::UFix64, BinaryOp::Subtract, one, 2 * one).is_err());
    }
}
