//! Member access and indexing
//!
//! Every value variant with members implements [`MemberAccessible`];
//! arrays, dictionaries and strings implement [`Indexable`]. Host methods
//! are handed out as bound native functions and run by
//! [`Interpreter::call_member`].
//!
//! Members read through a reference are themselves references when they
//! are resources, so a resource nested in a borrowed value can never be
//! moved out through the borrow.

use std::rc::Rc;

use ore_common::Address;
use ore_storage::SlabId;
use ore_syntax::ast::CompositeKind;

use crate::crypto::{HashAlgorithm, PublicKeyInfo, SignatureAlgorithm};
use crate::error::{Error, Result, UserErrorKind};
use crate::interface::{MemoryKind, MemoryUsage};
use crate::types::{Authorization, StaticType};
use crate::value::number::format_fixed;
use crate::value::{
    CapabilityValue, ControllerValue, FunctionValue, IntegerKind, IntegerValue, InterpretedFunction, ReferenceValue, Value,
};

use super::invocation::{
    arguments, bool_argument, byte_value, index_argument, int_value, string_argument,
};
use super::expression::with_authorization;
use super::Interpreter;

/// Values with named members
pub(crate) trait MemberAccessible {
    /// Value of the member `name`, `None` if there is no such member
    fn get_member(&self, interpreter: &mut Interpreter<'_>, name: &str) -> Result<Option<Value>>;
}

/// Values supporting `value[index]`
pub(crate) trait Indexable {
    fn get_index(&self, interpreter: &mut Interpreter<'_>, index: &Value) -> Result<Value>;

    /// Store `value` at `index`, returning the replaced value
    fn set_index(&self, interpreter: &mut Interpreter<'_>, index: &Value, value: Value) -> Result<Value>;
}

fn bound(prefix: &str, name: &str, receiver: Value) -> Option<Value> {
    Some(Value::Function(FunctionValue::bound(format!("{}.{}", prefix, name), receiver)))
}

// Arrays

pub(crate) struct ArrayMembers(pub SlabId);

impl MemberAccessible for ArrayMembers {
    fn get_member(&self, interpreter: &mut Interpreter<'_>, name: &str) -> Result<Option<Value>> {
        interpreter.heap.tracker.check_alive(self.0)?;
        Ok(match name {
            "length" => Some(int_value(interpreter.heap.storage.array_len(self.0)?)),
            "append" | "appendAll" | "insert" | "remove" | "removeFirst" | "removeLast" | "contains"
            | "firstIndex" | "concat" | "slice" | "reverse" | "filter" | "map" => {
                bound("Array", name, Value::Array(self.0))
            }
            _ => None,
        })
    }
}

impl Indexable for ArrayMembers {
    fn get_index(&self, interpreter: &mut Interpreter<'_>, index: &Value) -> Result<Value> {
        interpreter.heap.tracker.check_alive(self.0)?;
        let index = interpreter.element_index(self.0, index)?;
        Ok(interpreter.heap.storage.array_get(self.0, index)?)
    }

    fn set_index(&self, interpreter: &mut Interpreter<'_>, index: &Value, value: Value) -> Result<Value> {
        interpreter.heap.tracker.check_alive(self.0)?;
        let index = interpreter.element_index(self.0, index)?;
        let value = interpreter.store_in(self.0, value)?;
        Ok(interpreter.heap.storage.array_set(self.0, index, value)?)
    }
}

// Dictionaries

pub(crate) struct DictionaryMembers(pub SlabId);

impl MemberAccessible for DictionaryMembers {
    fn get_member(&self, interpreter: &mut Interpreter<'_>, name: &str) -> Result<Option<Value>> {
        interpreter.heap.tracker.check_alive(self.0)?;
        Ok(match name {
            "length" => Some(int_value(interpreter.heap.storage.dictionary_len(self.0)?)),
            "keys" => {
                let (key_type, _) = interpreter.dictionary_types(self.0)?;
                let keys = interpreter
                    .heap
                    .storage
                    .dictionary_entries(self.0)?
                    .into_iter()
                    .map(|(key, _)| key)
                    .collect();
                Some(interpreter.new_array(key_type, keys)?)
            }
            "values" => {
                if interpreter.heap.is_resource(&Value::Dictionary(self.0))? {
                    return Err(UserErrorKind::InvalidMove(
                        "values of a resource dictionary cannot be copied".to_string(),
                    )
                    .into());
                }
                let (_, value_type) = interpreter.dictionary_types(self.0)?;
                let values = interpreter
                    .heap
                    .storage
                    .dictionary_entries(self.0)?
                    .into_iter()
                    .map(|(_, value)| value)
                    .collect();
                Some(interpreter.new_array(value_type, values)?)
            }
            "insert" | "remove" | "containsKey" | "forEachKey" => bound("Dictionary", name, Value::Dictionary(self.0)),
            _ => None,
        })
    }
}

impl Indexable for DictionaryMembers {
    fn get_index(&self, interpreter: &mut Interpreter<'_>, index: &Value) -> Result<Value> {
        interpreter.heap.tracker.check_alive(self.0)?;
        Ok(match interpreter.heap.storage.dictionary_get(self.0, index)? {
            Some(value) => Value::some(value),
            None => Value::Nil,
        })
    }

    fn set_index(&self, interpreter: &mut Interpreter<'_>, index: &Value, value: Value) -> Result<Value> {
        interpreter.heap.tracker.check_alive(self.0)?;
        let old = match value {
            Value::Nil => interpreter.heap.storage.dictionary_remove(self.0, index)?,
            Value::Some(inner) => {
                let inner = interpreter.store_in(self.0, *inner)?;
                interpreter.heap.storage.dictionary_insert(self.0, index.clone(), inner)?
            }
            other => {
                let other = interpreter.store_in(self.0, other)?;
                interpreter.heap.storage.dictionary_insert(self.0, index.clone(), other)?
            }
        };
        Ok(old.map(Value::some).unwrap_or(Value::Nil))
    }
}

// Composites

/// Members of a composite. `receiver` is bound to `self` in its functions;
/// `authorization` is set when the composite is accessed through a
/// reference and gates entitled functions.
pub(crate) struct CompositeMembers {
    pub id: SlabId,
    pub receiver: Value,
    pub authorization: Option<Authorization>,
}

impl MemberAccessible for CompositeMembers {
    fn get_member(&self, interpreter: &mut Interpreter<'_>, name: &str) -> Result<Option<Value>> {
        interpreter.heap.tracker.check_alive(self.id)?;
        if let Some(value) = interpreter.heap.storage.composite_get(self.id, name)? {
            return Ok(Some(value));
        }
        if interpreter.heap.tracker.is_field_moved(self.id, name) {
            return Err(UserErrorKind::InvalidatedResourceUse(name.to_string()).into());
        }
        if name == "owner" {
            return Ok(Some(if self.id.address.is_zero() {
                Value::Nil
            } else {
                Value::some(Value::Account(crate::value::AccountHandle::new(
                    self.id.address,
                    Authorization::Unauthorized,
                )))
            }));
        }
        let ty = interpreter.composite_type(self.id)?;
        if name == "account" && ty.kind == CompositeKind::Contract {
            return Ok(Some(Value::Account(crate::value::AccountHandle::new(
                self.id.address,
                super::account::full_authorization(),
            ))));
        }
        let Some((program, decl)) = interpreter.composite_decl(&ty)? else {
            return Ok(None);
        };
        if let Some(function) = decl.function(name) {
            if let Some(authorization) = &self.authorization {
                check_access(function.access.as_deref(), authorization, name)?;
            }
            return Ok(Some(Value::Function(FunctionValue::Interpreted(Rc::new(InterpretedFunction {
                decl: function.clone(),
                program,
                scope: None,
                receiver: Some(self.receiver.clone()),
                composite: Some(ty),
            })))));
        }
        if let Some(nested) = decl.nested(name) {
            let nested = crate::types::CompositeType::new(
                ty.location.clone(),
                format!("{}.{}", ty.qualified, name),
                nested.kind,
            );
            return Ok(Some(Value::Function(FunctionValue::Constructor(nested))));
        }
        Ok(None)
    }
}

/// Entitlements named by an access modifier such as `access(A, B)` or
/// `access(A | B)`. Returns the names and whether any one of them suffices.
pub(crate) fn entitlement_requirement(access: Option<&str>) -> Option<(Vec<String>, bool)> {
    let inner = access?.strip_prefix("access")?.trim().strip_prefix('(')?.strip_suffix(')')?.trim();
    if matches!(inner, "all" | "self" | "contract" | "account") {
        return None;
    }
    let any = inner.contains('|');
    let names: Vec<String> = inner
        .split(|c| c == ',' || c == '|')
        .map(|name| {
            let name = name.trim();
            name.rsplit('.').next().unwrap_or(name).to_string()
        })
        .filter(|name| !name.is_empty())
        .collect();
    Some((names, any))
}

fn check_access(access: Option<&str>, authorization: &Authorization, member: &str) -> Result<()> {
    let Some((names, any)) = entitlement_requirement(access) else {
        return Ok(());
    };
    let granted = if any {
        authorization.grants_any(&names)
    } else {
        names.iter().all(|name| authorization.grants_any(&[name]))
    };
    if granted {
        return Ok(());
    }
    Err(UserErrorKind::AccessDenied {
        member: member.to_string(),
        required: names.join(if any { " | " } else { ", " }),
    }
    .into())
}

/// Entitlements any one of which unlocks a mutating container function through a reference
fn container_entitlements(name: &str) -> &'static [&'static str] {
    match name {
        "append" | "appendAll" | "insert" => &["Mutate", "Insert"],
        "remove" | "removeFirst" | "removeLast" => &["Mutate", "Remove"],
        _ => &[],
    }
}

// Primitives

impl MemberAccessible for String {
    fn get_member(&self, interpreter: &mut Interpreter<'_>, name: &str) -> Result<Option<Value>> {
        Ok(match name {
            "length" => Some(int_value(self.chars().count())),
            "utf8" => Some(interpreter.bytes_value(self.as_bytes())?),
            "concat" | "slice" | "toLower" | "toUpper" | "decodeHex" | "contains" | "split" => {
                bound("String", name, Value::String(self.clone()))
            }
            _ => None,
        })
    }
}

impl Indexable for String {
    fn get_index(&self, _interpreter: &mut Interpreter<'_>, index: &Value) -> Result<Value> {
        let length = self.chars().count();
        let position = match index {
            Value::Integer(integer) => integer.to_usize().filter(|i| *i < length),
            _ => None,
        };
        match position.and_then(|i| self.chars().nth(i)) {
            Some(c) => Ok(Value::String(c.to_string())),
            None => Err(UserErrorKind::IndexOutOfBounds {
                index: format!("{:?}", index.kind()),
                length,
            }
            .into()),
        }
    }

    fn set_index(&self, _interpreter: &mut Interpreter<'_>, _index: &Value, _value: Value) -> Result<Value> {
        Err(UserErrorKind::InvalidArgument("strings cannot be mutated".to_string()).into())
    }
}

impl MemberAccessible for IntegerValue {
    fn get_member(&self, _interpreter: &mut Interpreter<'_>, name: &str) -> Result<Option<Value>> {
        Ok(match name {
            "toBigEndianBytes" => bound("Integer", name, Value::Integer(self.clone())),
            _ => None,
        })
    }
}

impl MemberAccessible for Address {
    fn get_member(&self, _interpreter: &mut Interpreter<'_>, name: &str) -> Result<Option<Value>> {
        Ok(match name {
            "toBytes" => bound("Address", name, Value::Address(*self)),
            _ => None,
        })
    }
}

impl MemberAccessible for StaticType {
    fn get_member(&self, _interpreter: &mut Interpreter<'_>, name: &str) -> Result<Option<Value>> {
        let namespace = match (self, name) {
            (StaticType::String, "encodeHex" | "fromUTF8") => Some(FunctionValue::native(format!("String.{}", name))),
            (StaticType::Bls, "aggregateSignatures" | "aggregatePublicKeys") => {
                Some(FunctionValue::native(format!("BLS.{}", name)))
            }
            _ => None,
        };
        if let Some(function) = namespace {
            return Ok(Some(Value::Function(function)));
        }
        Ok(match (self, name) {
            (StaticType::HashAlgorithm, _) if HashAlgorithm::from_name(name).is_some() => {
                HashAlgorithm::from_name(name).map(Value::HashAlgorithm)
            }
            (StaticType::SignatureAlgorithm, _) if SignatureAlgorithm::from_name(name).is_some() => {
                SignatureAlgorithm::from_name(name).map(Value::SignatureAlgorithm)
            }
            (_, "identifier") => Some(Value::String(self.id())),
            (_, "isSubtype") => bound("Type", name, Value::Type(self.clone())),
            _ => None,
        })
    }
}

impl MemberAccessible for HashAlgorithm {
    fn get_member(&self, _interpreter: &mut Interpreter<'_>, name: &str) -> Result<Option<Value>> {
        Ok(match name {
            "rawValue" => Some(byte_value(self.raw_value())),
            "hash" | "hashWithTag" => bound("HashAlgorithm", name, Value::HashAlgorithm(*self)),
            _ => None,
        })
    }
}

impl MemberAccessible for SignatureAlgorithm {
    fn get_member(&self, _interpreter: &mut Interpreter<'_>, name: &str) -> Result<Option<Value>> {
        Ok(match name {
            "rawValue" => Some(byte_value(self.raw_value())),
            _ => None,
        })
    }
}

impl MemberAccessible for PublicKeyInfo {
    fn get_member(&self, interpreter: &mut Interpreter<'_>, name: &str) -> Result<Option<Value>> {
        Ok(match name {
            "publicKey" => Some(interpreter.bytes_value(&self.public_key)?),
            "signatureAlgorithm" => Some(Value::SignatureAlgorithm(self.signature_algorithm)),
            "verify" => bound("PublicKey", name, Value::PublicKey(self.clone())),
            _ => None,
        })
    }
}

impl MemberAccessible for CapabilityValue {
    fn get_member(&self, _interpreter: &mut Interpreter<'_>, name: &str) -> Result<Option<Value>> {
        Ok(match name {
            "address" => Some(Value::Address(self.address())),
            "id" => Some(Value::Integer(IntegerValue::uint64(self.id()))),
            "borrow" | "check" => bound("Capability", name, Value::Capability(self.clone())),
            _ => None,
        })
    }
}

impl MemberAccessible for ControllerValue {
    fn get_member(&self, _interpreter: &mut Interpreter<'_>, name: &str) -> Result<Option<Value>> {
        Ok(match name {
            "capabilityID" => Some(Value::Integer(IntegerValue::uint64(self.id))),
            "borrowType" => Some(Value::Type(self.borrow.clone())),
            "target" | "delete" => bound("Controller", name, Value::Controller(self.clone())),
            _ => None,
        })
    }
}

impl<'a> Interpreter<'a> {
    /// Member `name` of `target`
    pub(crate) fn get_member(&mut self, target: &Value, name: &str) -> Result<Value> {
        let member = match (target, name) {
            (_, "getType" | "isInstance") => bound("Any", name, target.clone()),
            (
                Value::Integer(_) | Value::Fix64(_) | Value::UFix64(_) | Value::Address(_) | Value::Path(_) | Value::Bool(_),
                "toString",
            ) => bound("Any", name, target.clone()),
            (Value::Reference(reference), _) => self.reference_member(reference, name)?,
            (Value::Composite(id), _) => {
                let receiver = if self.heap.is_resource(target)? {
                    let ty = self.heap.static_type(target)?;
                    self.heap.reference_to(target.clone(), Authorization::Owner, ty)
                } else {
                    target.clone()
                };
                CompositeMembers {
                    id: *id,
                    receiver,
                    authorization: None,
                }
                .get_member(self, name)?
            }
            (Value::Array(id), _) => ArrayMembers(*id).get_member(self, name)?,
            (Value::Dictionary(id), _) => DictionaryMembers(*id).get_member(self, name)?,
            (Value::String(s), _) => s.get_member(self, name)?,
            (Value::Integer(integer), _) => integer.get_member(self, name)?,
            (Value::Address(address), _) => address.get_member(self, name)?,
            (Value::Type(ty), _) => ty.get_member(self, name)?,
            (Value::Account(handle), _) => handle.get_member(self, name)?,
            (Value::Capability(capability), _) => capability.get_member(self, name)?,
            (Value::Controller(controller), _) => controller.get_member(self, name)?,
            (Value::PublicKey(key), _) => key.get_member(self, name)?,
            (Value::HashAlgorithm(algorithm), _) => algorithm.get_member(self, name)?,
            (Value::SignatureAlgorithm(algorithm), _) => algorithm.get_member(self, name)?,
            _ => None,
        };
        match member {
            Some(value) => Ok(value),
            None => Err(UserErrorKind::MissingMember {
                type_id: self.heap.static_type(target)?.to_string(),
                name: name.to_string(),
            }
            .into()),
        }
    }

    fn reference_member(&mut self, reference: &ReferenceValue, name: &str) -> Result<Option<Value>> {
        let target = self.heap.deref(reference)?;
        let authorization = reference.authorization().clone();
        let member = match &target {
            // `self` inside the method owns the value whatever the caller holds
            Value::Composite(id) => CompositeMembers {
                id: *id,
                receiver: Value::Reference(with_authorization(reference.clone(), Authorization::Owner)),
                authorization: Some(authorization.clone()),
            }
            .get_member(self, name)?,
            other @ (Value::Array(_) | Value::Dictionary(_)) => {
                let required = container_entitlements(name);
                if !authorization.grants_any(required) {
                    return Err(UserErrorKind::AccessDenied {
                        member: name.to_string(),
                        required: required.join(" | "),
                    }
                    .into());
                }
                Some(self.get_member(other, name)?)
            }
            other => Some(self.get_member(other, name)?),
        };
        match member {
            Some(value) => self.reference_into(value, &authorization).map(Some),
            None => Ok(None),
        }
    }

    /// Resources read through a reference are handed out as references
    fn reference_into(&mut self, value: Value, authorization: &Authorization) -> Result<Value> {
        if let Value::Some(inner) = value {
            return Ok(Value::some(self.reference_into(*inner, authorization)?));
        }
        if value.slab().is_some() && self.heap.is_resource(&value)? {
            let ty = self.heap.static_type(&value)?;
            return Ok(self.heap.reference_to(value, authorization.clone(), ty));
        }
        Ok(value)
    }

    /// `target[index]`
    pub(crate) fn get_index(&mut self, target: &Value, index: &Value) -> Result<Value> {
        match target {
            Value::Reference(reference) => {
                let authorization = reference.authorization().clone();
                let inner = self.heap.deref(reference)?;
                let value = self.get_index(&inner, index)?;
                self.reference_into(value, &authorization)
            }
            Value::Array(id) => ArrayMembers(*id).get_index(self, index),
            Value::Dictionary(id) => DictionaryMembers(*id).get_index(self, index),
            Value::String(s) => s.get_index(self, index),
            other => Err(UserErrorKind::TypeMismatch {
                expected: "indexable value".to_string(),
                actual: self.heap.static_type(other)?.to_string(),
            }
            .into()),
        }
    }

    // Containers

    /// Check and transfer a value about to be stored in `container`
    pub(crate) fn store_in(&mut self, container: SlabId, value: Value) -> Result<Value> {
        self.check_element(container, &value)?;
        self.heap.check_recursive_transfer(&value, container)?;
        self.heap.transfer(value, container.address, true)
    }

    /// Bring a value removed from a container into the execution
    pub(crate) fn take_out(&mut self, value: Value) -> Result<Value> {
        let Some(id) = value.slab() else {
            return Ok(value);
        };
        if id.address.is_zero() {
            return Ok(value);
        }
        let resource = self.heap.is_resource(&value)?;
        let taken = self.heap.transfer(value.clone(), Address::ZERO, true)?;
        if !resource {
            self.heap.remove_value(&value)?;
        }
        Ok(taken)
    }

    pub(crate) fn new_array(&mut self, element: StaticType, items: Vec<Value>) -> Result<Value> {
        self.env
            .meter_memory(MemoryUsage::new(MemoryKind::Array, items.len() as u64 + 1))?;
        let mut owned = Vec::with_capacity(items.len());
        for item in items {
            owned.push(self.heap.transfer(item, Address::ZERO, true)?);
        }
        let id = self
            .heap
            .storage
            .create_array(Address::ZERO, StaticType::array(element), owned)?;
        Ok(Value::Array(id))
    }

    pub(crate) fn bytes_value(&mut self, bytes: &[u8]) -> Result<Value> {
        let items = bytes.iter().map(|b| byte_value(*b)).collect();
        self.new_array(StaticType::Integer(IntegerKind::UInt8), items)
    }

    /// Contents of a `[UInt8]` value
    pub(crate) fn read_bytes(&mut self, value: &Value) -> Result<Vec<u8>> {
        let value = self.deref_value(value.clone())?;
        let Value::Array(id) = value else {
            return Err(self.mismatch(&StaticType::bytes(), &value)?);
        };
        let mut bytes = Vec::new();
        for item in self.heap.storage.array_items(id)? {
            match item.as_integer().and_then(|i| i.to_u64()).and_then(|b| u8::try_from(b).ok()) {
                Some(b) => bytes.push(b),
                None => return Err(self.mismatch(&StaticType::bytes(), &value)?),
            }
        }
        Ok(bytes)
    }

    fn dictionary_types(&mut self, id: SlabId) -> Result<(StaticType, StaticType)> {
        match self.heap.storage.info(id)? {
            StaticType::Dictionary(key, value) => Ok((*key, *value)),
            other => Err(Error::unexpected(format!("slab {} holds a `{}`, not a dictionary", id, other))),
        }
    }

    fn element_type(&mut self, id: SlabId) -> Result<StaticType> {
        Ok(self
            .heap
            .storage
            .info(id)?
            .element()
            .cloned()
            .unwrap_or(StaticType::AnyStruct))
    }

    // Host methods

    pub(crate) fn call_member(
        &mut self,
        name: &str,
        receiver: Value,
        arguments: Vec<Value>,
        type_arguments: &[StaticType],
    ) -> Result<Value> {
        let (prefix, member) = name.split_once('.').unwrap_or(("", name));
        match (prefix, receiver) {
            ("Any", receiver) => self.call_any(member, receiver, arguments),
            ("Array", Value::Array(id)) => self.call_array(member, id, arguments),
            ("Dictionary", Value::Dictionary(id)) => self.call_dictionary(member, id, arguments),
            ("String", Value::String(s)) => self.call_string(member, &s, arguments),
            ("Integer", Value::Integer(integer)) => {
                let [] = super::invocation::arguments::<0>(arguments)?;
                let bytes = big_endian_bytes(&integer);
                self.bytes_value(&bytes)
            }
            ("Address", Value::Address(address)) => {
                let [] = super::invocation::arguments::<0>(arguments)?;
                self.bytes_value(address.as_bytes())
            }
            ("Type", Value::Type(ty)) => {
                let [other] = super::invocation::arguments::<1>(arguments)?;
                match other {
                    Value::Type(other) => Ok(Value::Bool(ty.is_subtype(&other))),
                    other => Err(self.mismatch(&StaticType::MetaType, &other)?),
                }
            }
            ("HashAlgorithm", Value::HashAlgorithm(algorithm)) => self.call_hash(member, algorithm, arguments),
            ("PublicKey", Value::PublicKey(key)) => self.call_public_key(key, arguments),
            ("Capability", Value::Capability(capability)) => {
                self.call_capability(member, capability, arguments, type_arguments)
            }
            ("Controller", Value::Controller(controller)) => self.call_controller(member, controller, arguments),
            (_, receiver) => Err(Error::unreachable(format!(
                "host function `{}` called on {:?}",
                name,
                receiver.kind()
            ))),
        }
    }

    fn call_any(&mut self, member: &str, receiver: Value, values: Vec<Value>) -> Result<Value> {
        match member {
            "getType" => {
                let [] = arguments::<0>(values)?;
                Ok(Value::Type(self.heap.static_type(&receiver)?))
            }
            "isInstance" => {
                let [ty] = arguments::<1>(values)?;
                match ty {
                    Value::Type(ty) => Ok(Value::Bool(self.conforms(&receiver, &ty)?)),
                    other => Err(self.mismatch(&StaticType::MetaType, &other)?),
                }
            }
            _ => {
                let [] = arguments::<0>(values)?;
                Ok(Value::String(match &receiver {
                    Value::Fix64(v) => format_fixed(*v as i128),
                    Value::UFix64(v) => format_fixed(*v as i128),
                    Value::Integer(integer) => integer.to_string(),
                    Value::Address(address) => address.to_string(),
                    Value::Path(path) => path.to_string(),
                    other => self.heap.describe(other)?,
                }))
            }
        }
    }

    fn call_array(&mut self, member: &str, id: SlabId, values: Vec<Value>) -> Result<Value> {
        self.heap.tracker.check_alive(id)?;
        let length = self.heap.storage.array_len(id)?;
        match member {
            "append" => {
                let [value] = arguments::<1>(values)?;
                let value = self.store_in(id, value)?;
                self.heap.storage.array_append(id, value)?;
                Ok(Value::Void)
            }
            "appendAll" => {
                let [other] = arguments::<1>(values)?;
                let other = self.deref_value(other)?;
                let Value::Array(other) = other else {
                    return Err(self.mismatch(&StaticType::array(StaticType::AnyStruct), &other)?);
                };
                self.refuse_resource_copy(other)?;
                for item in self.heap.storage.array_items(other)? {
                    let item = self.store_in(id, item)?;
                    self.heap.storage.array_append(id, item)?;
                }
                Ok(Value::Void)
            }
            "insert" => {
                let [at, value] = arguments::<2>(values)?;
                let at = index_argument(at)?;
                if at > length {
                    return Err(UserErrorKind::IndexOutOfBounds {
                        index: at.to_string(),
                        length,
                    }
                    .into());
                }
                let value = self.store_in(id, value)?;
                self.heap.storage.array_insert(id, at, value)?;
                Ok(Value::Void)
            }
            "remove" => {
                let [at] = arguments::<1>(values)?;
                let at = self.element_index(id, &at)?;
                let removed = self.heap.storage.array_remove(id, at)?;
                self.take_out(removed)
            }
            "removeFirst" | "removeLast" => {
                let [] = arguments::<0>(values)?;
                if length == 0 {
                    return Err(UserErrorKind::IndexOutOfBounds {
                        index: "0".to_string(),
                        length,
                    }
                    .into());
                }
                let at = if member == "removeFirst" { 0 } else { length - 1 };
                let removed = self.heap.storage.array_remove(id, at)?;
                self.take_out(removed)
            }
            "contains" | "firstIndex" => {
                let [needle] = arguments::<1>(values)?;
                let mut found = None;
                for (i, item) in self.heap.storage.array_items(id)?.iter().enumerate() {
                    if self.heap.equal(item, &needle)? {
                        found = Some(i);
                        break;
                    }
                }
                Ok(if member == "contains" {
                    Value::Bool(found.is_some())
                } else {
                    found.map(|i| Value::some(int_value(i))).unwrap_or(Value::Nil)
                })
            }
            "concat" => {
                let [other] = arguments::<1>(values)?;
                let other = self.deref_value(other)?;
                let Value::Array(other) = other else {
                    return Err(self.mismatch(&StaticType::array(StaticType::AnyStruct), &other)?);
                };
                self.refuse_resource_copy(id)?;
                let mut items = self.heap.storage.array_items(id)?;
                items.extend(self.heap.storage.array_items(other)?);
                let element = self.element_type(id)?;
                self.new_array(element, items)
            }
            "slice" => {
                let [from, up_to] = arguments::<2>(values)?;
                let (from, up_to) = (index_argument(from)?, index_argument(up_to)?);
                if from > up_to || up_to > length {
                    return Err(UserErrorKind::IndexOutOfBounds {
                        index: format!("{}..{}", from, up_to),
                        length,
                    }
                    .into());
                }
                self.refuse_resource_copy(id)?;
                let items = self.heap.storage.array_items(id)?[from..up_to].to_vec();
                let element = self.element_type(id)?;
                self.new_array(element, items)
            }
            "reverse" => {
                let [] = arguments::<0>(values)?;
                self.refuse_resource_copy(id)?;
                let mut items = self.heap.storage.array_items(id)?;
                items.reverse();
                let element = self.element_type(id)?;
                self.new_array(element, items)
            }
            "filter" => {
                let [predicate] = arguments::<1>(values)?;
                self.refuse_resource_copy(id)?;
                let mut kept = Vec::new();
                for item in self.heap.storage.array_items(id)? {
                    let keep = self.call_function(&predicate, vec![item.clone()])?;
                    if bool_argument(keep)? {
                        kept.push(item);
                    }
                }
                let element = self.element_type(id)?;
                self.new_array(element, kept)
            }
            "map" => {
                let [transform] = arguments::<1>(values)?;
                self.refuse_resource_copy(id)?;
                let mut mapped = Vec::new();
                for item in self.heap.storage.array_items(id)? {
                    mapped.push(self.call_function(&transform, vec![item])?);
                }
                let element = self.common_type(&mapped)?;
                self.new_array(element, mapped)
            }
            other => Err(Error::unreachable(format!("unknown array function `{}`", other))),
        }
    }

    fn refuse_resource_copy(&mut self, id: SlabId) -> Result<()> {
        if self.heap.storage.info(id)?.is_resource() {
            return Err(UserErrorKind::InvalidMove("resources in an array cannot be copied".to_string()).into());
        }
        Ok(())
    }

    /// Most specific type shared by all values
    pub(crate) fn common_type(&mut self, values: &[Value]) -> Result<StaticType> {
        let mut common: Option<StaticType> = None;
        let mut resource = false;
        for value in values {
            let ty = self.heap.static_type(value)?;
            resource |= ty.is_resource();
            common = match common {
                None => Some(ty),
                Some(current) if ty.is_subtype(&current) => Some(current),
                Some(current) if current.is_subtype(&ty) => Some(ty),
                Some(_) => Some(if resource {
                    StaticType::AnyResource
                } else {
                    StaticType::AnyStruct
                }),
            };
        }
        Ok(common.unwrap_or(StaticType::AnyStruct))
    }

    fn call_dictionary(&mut self, member: &str, id: SlabId, values: Vec<Value>) -> Result<Value> {
        self.heap.tracker.check_alive(id)?;
        match member {
            "insert" => {
                let [key, value] = arguments::<2>(values)?;
                let value = self.store_in(id, value)?;
                match self.heap.storage.dictionary_insert(id, key, value)? {
                    Some(old) => Ok(Value::some(self.take_out(old)?)),
                    None => Ok(Value::Nil),
                }
            }
            "remove" => {
                let [key] = arguments::<1>(values)?;
                match self.heap.storage.dictionary_remove(id, &key)? {
                    Some(old) => Ok(Value::some(self.take_out(old)?)),
                    None => Ok(Value::Nil),
                }
            }
            "containsKey" => {
                let [key] = arguments::<1>(values)?;
                Ok(Value::Bool(self.heap.storage.dictionary_get(id, &key)?.is_some()))
            }
            "forEachKey" => {
                let [function] = arguments::<1>(values)?;
                for (key, _) in self.heap.storage.dictionary_entries(id)? {
                    let more = self.call_function(&function, vec![key])?;
                    if !bool_argument(more)? {
                        break;
                    }
                }
                Ok(Value::Void)
            }
            other => Err(Error::unreachable(format!("unknown dictionary function `{}`", other))),
        }
    }

    fn call_string(&mut self, member: &str, s: &str, values: Vec<Value>) -> Result<Value> {
        match member {
            "concat" => {
                let [other] = arguments::<1>(values)?;
                Ok(Value::String(format!("{}{}", s, string_argument(other)?)))
            }
            "slice" => {
                let [from, up_to] = arguments::<2>(values)?;
                let (from, up_to) = (index_argument(from)?, index_argument(up_to)?);
                let length = s.chars().count();
                if from > up_to || up_to > length {
                    return Err(UserErrorKind::IndexOutOfBounds {
                        index: format!("{}..{}", from, up_to),
                        length,
                    }
                    .into());
                }
                Ok(Value::String(s.chars().skip(from).take(up_to - from).collect()))
            }
            "toLower" => Ok(Value::String(s.to_lowercase())),
            "toUpper" => Ok(Value::String(s.to_uppercase())),
            "decodeHex" => {
                let bytes = hex::decode(s)
                    .map_err(|e| UserErrorKind::InvalidArgument(format!("invalid hex string {:?}: {}", s, e)))?;
                self.bytes_value(&bytes)
            }
            "contains" => {
                let [other] = arguments::<1>(values)?;
                Ok(Value::Bool(s.contains(string_argument(other)?.as_str())))
            }
            "split" => {
                let [separator] = arguments::<1>(values)?;
                let separator = string_argument(separator)?;
                let parts = s.split(separator.as_str()).map(Value::string).collect();
                self.new_array(StaticType::String, parts)
            }
            other => Err(Error::unreachable(format!("unknown string function `{}`", other))),
        }
    }

    fn call_hash(&mut self, member: &str, algorithm: HashAlgorithm, values: Vec<Value>) -> Result<Value> {
        let (data, tag) = if member == "hashWithTag" {
            let [data, tag] = arguments::<2>(values)?;
            (data, string_argument(tag)?)
        } else {
            let [data] = arguments::<1>(values)?;
            (data, String::new())
        };
        let data = self.read_bytes(&data)?;
        let digest = self.env.call("hash", |interface| interface.hash(&data, &tag, algorithm))?;
        self.bytes_value(&digest)
    }

    fn call_public_key(&mut self, key: PublicKeyInfo, values: Vec<Value>) -> Result<Value> {
        let [signature, signed_data, tag, hash_algorithm] = arguments::<4>(values)?;
        let signature = self.read_bytes(&signature)?;
        let signed_data = self.read_bytes(&signed_data)?;
        let tag = string_argument(tag)?;
        let Value::HashAlgorithm(hash_algorithm) = hash_algorithm else {
            return Err(self.mismatch(&StaticType::HashAlgorithm, &hash_algorithm)?);
        };
        let valid = self.env.call("verify_signature", |interface| {
            interface.verify_signature(&signature, &tag, &signed_data, &key, hash_algorithm)
        })?;
        Ok(Value::Bool(valid))
    }
}

/// Parameter types of the host methods of `receiver`
pub(crate) fn parameter_types(
    interpreter: &mut Interpreter<'_>,
    name: &str,
    receiver: &Value,
) -> Result<Vec<StaticType>> {
    let int = StaticType::Integer(IntegerKind::Int);
    Ok(match (name, receiver) {
        ("Array.append" | "Array.contains" | "Array.firstIndex", Value::Array(id)) => {
            vec![interpreter.element_type(*id)?]
        }
        ("Array.insert", Value::Array(id)) => vec![int, interpreter.element_type(*id)?],
        ("Array.remove", _) => vec![int],
        ("Array.slice" | "String.slice", _) => vec![int.clone(), int],
        ("Dictionary.insert", Value::Dictionary(id)) => {
            let (key, value) = interpreter.dictionary_types(*id)?;
            vec![key, value]
        }
        ("Dictionary.remove" | "Dictionary.containsKey", Value::Dictionary(id)) => {
            vec![interpreter.dictionary_types(*id)?.0]
        }
        ("HashAlgorithm.hash", _) => vec![StaticType::bytes()],
        ("HashAlgorithm.hashWithTag", _) => vec![StaticType::bytes(), StaticType::String],
        ("PublicKey.verify", _) => vec![
            StaticType::bytes(),
            StaticType::bytes(),
            StaticType::String,
            StaticType::HashAlgorithm,
        ],
        _ => Vec::new(),
    })
}

/// Big-endian two's complement bytes, padded to the width of sized kinds
fn big_endian_bytes(integer: &IntegerValue) -> Vec<u8> {
    let mut bytes = if integer.kind.is_signed() {
        integer.value.to_signed_bytes_be()
    } else {
        integer.value.to_bytes_be().1
    };
    if let Some(bits) = integer.kind.bits() {
        let width = (bits / 8) as usize;
        if bytes.len() < width {
            let fill = if integer.value < num_bigint::BigInt::from(0) { 0xff } else { 0 };
            let mut padded = vec![fill; width - bytes.len()];
            padded.extend(bytes);
            bytes = padded;
        }
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_entitlement_requirements() {
        assert_eq!(entitlement_requirement(Some("access(all)")), None);
        assert_eq!(entitlement_requirement(Some("pub")), None);
        assert_eq!(entitlement_requirement(None), None);
        assert_eq!(
            entitlement_requirement(Some("access(Token.Withdraw)")),
            Some((vec!["Withdraw".to_string()], false))
        );
        assert_eq!(
            entitlement_requirement(Some("access(A | B)")),
            Some((vec!["A".to_string(), "B".to_string()], true))
        );
        assert_eq!(
            entitlement_requirement(Some("access(A, B)")),
            Some((vec!["A".to_string(), "B".to_string()], false))
        );
    }

    #[test]
    fn test_access_checks() {
        let withdraw = Authorization::from_names(&["Withdraw"]);
        assert!(check_access(Some("access(Withdraw)"), &withdraw, "withdraw").is_ok());
        assert!(check_access(Some("access(Withdraw)"), &Authorization::Owner, "withdraw").is_ok());
        let err = check_access(Some("access(Withdraw)"), &Authorization::Unauthorized, "withdraw").unwrap_err();
        assert!(matches!(err.user_kind(), Some(UserErrorKind::AccessDenied { .. })));
        assert!(check_access(Some("access(A, Withdraw)"), &withdraw, "f").is_err());
        assert!(check_access(Some("access(A | Withdraw)"), &withdraw, "f").is_ok());
    }

    #[test]
    fn test_container_mutators_need_entitlements() {
        assert!(Authorization::Unauthorized.grants_any(container_entitlements("length")));
        assert!(!Authorization::Unauthorized.grants_any(container_entitlements("append")));
        assert!(!Authorization::Unauthorized.grants_any(container_entitlements("removeLast")));
        let insert = Authorization::from_names(&["Insert"]);
        assert!(insert.grants_any(container_entitlements("insert")));
        assert!(!insert.grants_any(container_entitlements("remove")));
        let mutate = Authorization::from_names(&["Mutate"]);
        assert!(mutate.grants_any(container_entitlements("appendAll")));
        assert!(mutate.grants_any(container_entitlements("removeFirst")));
        assert!(Authorization::Owner.grants_any(container_entitlements("remove")));
    }

    #[test]
    fn test_big_endian_bytes() {
        let value = IntegerValue::new(IntegerKind::UInt16, 258).unwrap();
        assert_eq!(big_endian_bytes(&value), vec![1, 2]);
        let value = IntegerValue::new(IntegerKind::Int16, -1).unwrap();
        assert_eq!(big_endian_bytes(&value), vec![0xff, 0xff]);
        let value = IntegerValue::new(IntegerKind::UInt32, 1).unwrap();
        assert_eq!(big_endian_bytes(&value), vec![0, 0, 0, 1]);
    }
}
