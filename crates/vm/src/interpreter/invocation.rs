//! Function invocation
//!
//! Callees are interpreted functions, composite constructors and host
//! functions. Host functions are named `Prefix.member` and dispatched to
//! the account API, the container/value members or the global built-ins.

use ore_common::Path;
use ore_syntax::ast::{Argument, CompositeKind, ExprKind, Expression, TypeExpr};

use crate::error::{Result, UserErrorKind};
use crate::types::StaticType;
use crate::value::{FunctionValue, IntegerKind, IntegerValue, Value};

use super::{account, builtins, members, Frame, Interpreter};

impl<'a> Interpreter<'a> {
    /// Evaluate an invocation expression. `creating` is set for the
    /// operand of `create`, the only place resource constructors may run.
    pub(crate) fn eval_invocation(
        &mut self,
        frame: &Frame,
        target: &Expression,
        type_arguments: &[TypeExpr],
        arguments: &[Argument],
        creating: bool,
    ) -> Result<Value> {
        let (callee, chained) = match &target.kind {
            ExprKind::Member {
                target: receiver,
                name,
                optional,
            } => {
                let receiver = self.eval(frame, receiver, None)?;
                let receiver = match (receiver, *optional) {
                    (Value::Nil, true) => return Ok(Value::Nil),
                    (Value::Some(inner), true) => *inner,
                    (receiver, _) => receiver,
                };
                (self.get_member(&receiver, name)?, *optional)
            }
            _ => (self.eval(frame, target, None)?, false),
        };
        let Value::Function(function) = callee else {
            return Err(self.mismatch(&StaticType::Function, &callee)?);
        };
        let mut resolved = Vec::with_capacity(type_arguments.len());
        for ty in type_arguments {
            resolved.push(self.resolve_type(&frame.program, ty)?);
        }

        let result = match function {
            FunctionValue::Constructor(ty) => {
                match (ty.kind, creating) {
                    (CompositeKind::Resource, false) => {
                        return Err(UserErrorKind::InvalidArgument(format!(
                            "resource `{}` must be created with `create`",
                            ty.type_id()
                        ))
                        .into())
                    }
                    (CompositeKind::Struct, true) => {
                        return Err(UserErrorKind::InvalidArgument(format!(
                            "only resources can be created, `{}` is a struct",
                            ty.type_id()
                        ))
                        .into())
                    }
                    _ => {}
                }
                let types = self.constructor_parameter_types(&ty)?;
                let values = self.eval_arguments(frame, arguments, &types)?;
                self.construct(&ty, values)?
            }
            _ if creating => {
                return Err(UserErrorKind::InvalidArgument("`create` requires a resource constructor".to_string()).into())
            }
            FunctionValue::Interpreted(function) => {
                let types = self.parameter_types(&function.program, &function.decl)?;
                let values = self.eval_arguments(frame, arguments, &types)?;
                self.invoke_interpreted(&function, values)?
            }
            FunctionValue::Native { name, receiver } => {
                let receiver = receiver.map(|receiver| *receiver);
                let types = self.native_parameter_types(&name, receiver.as_ref())?;
                let values = self.eval_arguments(frame, arguments, &types)?;
                self.call_native(&name, receiver, values, &resolved)?
            }
        };
        Ok(if chained { result.into_optional() } else { result })
    }

    /// Evaluate arguments against the parameter types of the callee.
    /// Resources must be passed with `<-`.
    fn eval_arguments(&mut self, frame: &Frame, arguments: &[Argument], types: &[StaticType]) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(arguments.len());
        for (i, argument) in arguments.iter().enumerate() {
            let value = self.eval(frame, &argument.value, types.get(i))?;
            self.check_transfer(argument.value.is_resource_producing(), &value)
                .map_err(|e| e.at(frame.location(), argument.value.range))?;
            values.push(value);
        }
        Ok(values)
    }

    /// Call a function value with evaluated arguments
    pub(crate) fn call_function(&mut self, function: &Value, arguments: Vec<Value>) -> Result<Value> {
        match function {
            Value::Function(FunctionValue::Interpreted(function)) => self.invoke_interpreted(function, arguments),
            Value::Function(FunctionValue::Native { name, receiver }) => {
                let receiver = receiver.as_ref().map(|receiver| (**receiver).clone());
                self.call_native(name, receiver, arguments, &[])
            }
            Value::Function(FunctionValue::Constructor(ty)) if ty.kind == CompositeKind::Struct => {
                self.construct(ty, arguments)
            }
            other => Err(self.mismatch(&StaticType::Function, other)?),
        }
    }

    pub(crate) fn call_native(
        &mut self,
        name: &str,
        receiver: Option<Value>,
        arguments: Vec<Value>,
        type_arguments: &[StaticType],
    ) -> Result<Value> {
        match (name.split_once('.'), receiver) {
            (Some(("Account", member)), Some(Value::Account(handle))) => {
                self.call_account(member, handle, arguments, type_arguments)
            }
            (_, Some(receiver)) => self.call_member(name, receiver, arguments, type_arguments),
            (_, None) => self.call_builtin(name, arguments, type_arguments),
        }
    }

    /// Parameter types of a host function, used to type literal arguments
    fn native_parameter_types(&mut self, name: &str, receiver: Option<&Value>) -> Result<Vec<StaticType>> {
        match (name.split_once('.'), receiver) {
            (Some(("Account", member)), Some(_)) => Ok(account::parameter_types(member)),
            (_, Some(receiver)) => members::parameter_types(self, name, receiver),
            (_, None) => Ok(builtins::parameter_types(name)),
        }
    }
}

/// Destructure exactly `N` arguments
pub(crate) fn arguments<const N: usize>(values: Vec<Value>) -> Result<[Value; N]> {
    <[Value; N]>::try_from(values).map_err(|values: Vec<Value>| {
        UserErrorKind::ArgumentCount {
            expected: N,
            actual: values.len(),
        }
        .into()
    })
}

fn wrong_argument(expected: &str, value: &Value) -> crate::error::Error {
    UserErrorKind::TypeMismatch {
        expected: expected.to_string(),
        actual: format!("{:?}", value.kind()),
    }
    .into()
}

pub(crate) fn integer_argument(value: Value) -> Result<IntegerValue> {
    match value {
        Value::Integer(integer) => Ok(integer),
        other => Err(wrong_argument("Integer", &other)),
    }
}

/// A non-negative `Int` used as a position
pub(crate) fn index_argument(value: Value) -> Result<usize> {
    let integer = integer_argument(value)?;
    integer.to_usize().ok_or_else(|| {
        UserErrorKind::IndexOutOfBounds {
            index: integer.to_string(),
            length: 0,
        }
        .into()
    })
}

pub(crate) fn string_argument(value: Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(wrong_argument("String", &other)),
    }
}

pub(crate) fn bool_argument(value: Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(wrong_argument("Bool", &other)),
    }
}

pub(crate) fn path_argument(value: Value) -> Result<Path> {
    match value {
        Value::Path(path) => Ok(path),
        other => Err(wrong_argument("Path", &other)),
    }
}

pub(crate) fn type_argument(type_arguments: &[StaticType], name: &str) -> Result<StaticType> {
    type_arguments
        .first()
        .cloned()
        .ok_or_else(|| UserErrorKind::InvalidArgument(format!("`{}` requires a type argument", name)).into())
}

/// `Int` value of a length or position
pub(crate) fn int_value(value: usize) -> Value {
    Value::Integer(IntegerValue::int(value as u64))
}

/// `UInt8` value
pub(crate) fn byte_value(value: u8) -> Value {
    Value::Integer(IntegerValue {
        kind: IntegerKind::UInt8,
        value: value.into(),
    })
}
