//! Global built-in functions and type namespaces

use num_bigint::BigInt;
use ore_common::Address;
use tracing::debug;

use crate::crypto::PublicKeyInfo;
use crate::error::{Error, Result, UserErrorKind};
use crate::export::ExportedValue;
use crate::interface::Event;
use crate::types::{Authorization, StaticType};
use crate::value::number::{FixedKind, FIXED_SCALE};
use crate::value::{AccountHandle, FunctionValue, IntegerKind, IntegerValue, Value};

use super::account::{self, ACCOUNT_CREATED};
use super::invocation::{arguments, bool_argument, string_argument, type_argument};
use super::Interpreter;

/// Value of a built-in identifier
pub(crate) fn lookup(name: &str) -> Option<Value> {
    match name {
        "log" | "assert" | "panic" | "getAccount" | "Account" | "Type" | "PublicKey" => {
            return Some(Value::Function(FunctionValue::native(name)))
        }
        "String" | "HashAlgorithm" | "SignatureAlgorithm" | "BLS" => return StaticType::builtin(name).map(Value::Type),
        _ => {}
    }
    if IntegerKind::from_name(name).is_some() || matches!(name, "Fix64" | "UFix64" | "Address") {
        return Some(Value::Function(FunctionValue::native(format!("Convert.{}", name))));
    }
    None
}

/// Parameter types of a built-in function
pub(crate) fn parameter_types(name: &str) -> Vec<StaticType> {
    match name {
        "assert" => vec![StaticType::Bool, StaticType::String],
        "panic" => vec![StaticType::String],
        "getAccount" => vec![StaticType::Address],
        "PublicKey" => vec![StaticType::bytes(), StaticType::SignatureAlgorithm],
        "String.encodeHex" | "String.fromUTF8" => vec![StaticType::bytes()],
        "BLS.aggregateSignatures" => vec![StaticType::array(StaticType::bytes())],
        "BLS.aggregatePublicKeys" => vec![StaticType::array(StaticType::PublicKey)],
        _ => Vec::new(),
    }
}

impl<'a> Interpreter<'a> {
    pub(crate) fn call_builtin(
        &mut self,
        name: &str,
        values: Vec<Value>,
        type_arguments: &[StaticType],
    ) -> Result<Value> {
        if let Some(target) = name.strip_prefix("Convert.") {
            let [value] = arguments::<1>(values)?;
            return self.convert(target, value);
        }
        match name {
            "log" => {
                let [value] = arguments::<1>(values)?;
                let message = self.heap.describe(&value)?;
                self.env.log(&message)?;
                Ok(Value::Void)
            }
            "assert" => {
                let (condition, message) = match values.len() {
                    1 => {
                        let [condition] = arguments::<1>(values)?;
                        (condition, String::new())
                    }
                    _ => {
                        let [condition, message] = arguments::<2>(values)?;
                        (condition, string_argument(message)?)
                    }
                };
                if bool_argument(condition)? {
                    Ok(Value::Void)
                } else {
                    Err(UserErrorKind::Assertion(message).into())
                }
            }
            "panic" => {
                let [message] = arguments::<1>(values)?;
                Err(UserErrorKind::Panic(string_argument(message)?).into())
            }
            "getAccount" => {
                let [address] = arguments::<1>(values)?;
                match address {
                    Value::Address(address) => Ok(Value::Account(AccountHandle::new(address, Authorization::Unauthorized))),
                    other => Err(self.mismatch(&StaticType::Address, &other)?),
                }
            }
            "Account" => {
                let [payer] = arguments::<1>(values)?;
                let Value::Account(payer) = payer else {
                    return Err(self.mismatch(&StaticType::reference(account::full_authorization(), StaticType::Account), &payer)?);
                };
                let address = self.env.call("create_account", |interface| interface.create_account(payer.address))?;
                debug!(%address, payer = %payer.address, "Created account");
                self.env.emit_event(&Event {
                    type_id: ACCOUNT_CREATED.to_string(),
                    fields: vec![("address".to_string(), ExportedValue::Address(address))],
                })?;
                Ok(Value::Account(AccountHandle::new(address, account::full_authorization())))
            }
            "Type" => {
                let [] = arguments::<0>(values)?;
                Ok(Value::Type(type_argument(type_arguments, "Type")?))
            }
            "PublicKey" => {
                let [public_key, algorithm] = arguments::<2>(values)?;
                let public_key = self.read_bytes(&public_key)?;
                let Value::SignatureAlgorithm(signature_algorithm) = algorithm else {
                    return Err(self.mismatch(&StaticType::SignatureAlgorithm, &algorithm)?);
                };
                let key = PublicKeyInfo {
                    public_key,
                    signature_algorithm,
                };
                self.env
                    .call("validate_public_key", |interface| interface.validate_public_key(&key))
                    .map_err(|e| match e {
                        Error::External(err) => UserErrorKind::InvalidArgument(format!("invalid public key: {}", err)).into(),
                        other => other,
                    })?;
                Ok(Value::PublicKey(key))
            }
            "String.encodeHex" => {
                let [bytes] = arguments::<1>(values)?;
                Ok(Value::String(hex::encode(self.read_bytes(&bytes)?)))
            }
            "String.fromUTF8" => {
                let [bytes] = arguments::<1>(values)?;
                let bytes = self.read_bytes(&bytes)?;
                Ok(match String::from_utf8(bytes) {
                    Ok(s) => Value::some(Value::String(s)),
                    Err(_) => Value::Nil,
                })
            }
            "BLS.aggregateSignatures" => {
                let [signatures] = arguments::<1>(values)?;
                let mut collected = Vec::new();
                for signature in self.list_items(&signatures)? {
                    collected.push(self.read_bytes(&signature)?);
                }
                match self
                    .env
                    .call("bls_aggregate_signatures", |interface| interface.bls_aggregate_signatures(&collected))
                {
                    Ok(aggregated) => Ok(Value::some(self.bytes_value(&aggregated)?)),
                    Err(Error::External(_)) => Ok(Value::Nil),
                    Err(other) => Err(other),
                }
            }
            "BLS.aggregatePublicKeys" => {
                let [keys] = arguments::<1>(values)?;
                let mut collected = Vec::new();
                for key in self.list_items(&keys)? {
                    match key {
                        Value::PublicKey(key) => collected.push(key),
                        other => return Err(self.mismatch(&StaticType::PublicKey, &other)?),
                    }
                }
                match self
                    .env
                    .call("bls_aggregate_public_keys", |interface| interface.bls_aggregate_public_keys(&collected))
                {
                    Ok(aggregated) => Ok(Value::some(Value::PublicKey(aggregated))),
                    Err(Error::External(_)) => Ok(Value::Nil),
                    Err(other) => Err(other),
                }
            }
            other => Err(Error::unreachable(format!("unknown built-in function `{}`", other))),
        }
    }

    fn list_items(&mut self, value: &Value) -> Result<Vec<Value>> {
        match self.deref_value(value.clone())? {
            Value::Array(id) => Ok(self.heap.storage.array_items(id)?),
            other => Err(self.mismatch(&StaticType::array(StaticType::AnyStruct), &other)?),
        }
    }

    /// Numeric conversion functions such as `UInt8(x)` and `UFix64(x)`
    fn convert(&mut self, target: &str, value: Value) -> Result<Value> {
        if let Some(kind) = IntegerKind::from_name(target) {
            let integer = match &value {
                Value::Integer(integer) => integer.convert(kind)?,
                Value::Fix64(v) => IntegerValue::new(kind, BigInt::from(*v as i128 / FIXED_SCALE))?,
                Value::UFix64(v) => IntegerValue::new(kind, BigInt::from(*v as i128 / FIXED_SCALE))?,
                Value::Address(address) => IntegerValue::new(kind, BigInt::from(address.to_u64()))?,
                other => return Err(self.mismatch(&StaticType::Integer(kind), other)?),
            };
            return Ok(Value::Integer(integer));
        }
        let scaled = match &value {
            Value::Integer(integer) if target != "Address" => integer
                .to_i128()
                .and_then(|v| v.checked_mul(FIXED_SCALE))
                .ok_or(UserErrorKind::Overflow)?,
            Value::Fix64(v) => *v as i128,
            Value::UFix64(v) => *v as i128,
            Value::Integer(integer) => {
                let address = integer.to_u64().ok_or(UserErrorKind::Overflow)?;
                return Ok(Value::Address(Address::from_u64(address)));
            }
            Value::Address(address) if target == "Address" => return Ok(Value::Address(*address)),
            other => {
                let expected = StaticType::builtin(target).unwrap_or(StaticType::AnyStruct);
                return Err(self.mismatch(&expected, other)?);
            }
        };
        match target {
            "Fix64" => Ok(Value::Fix64(FixedKind::Fix64.check(scaled)? as i64)),
            "UFix64" => Ok(Value::UFix64(FixedKind::UFix64.check(scaled)? as u64)),
            _ => Err(self.mismatch(&StaticType::Address, &value)?),
        }
    }
}
