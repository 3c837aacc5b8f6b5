//! Runtime values
//!
//! Containers are handles into slab storage: the value itself is only the
//! [`SlabId`] of its root slab, so moving a resource moves a handle and the
//! resource tracker decides whether the handle is still usable.

pub mod encoding;
pub mod number;

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use ore_common::{Address, Path};
use ore_storage::SlabId;
use ore_syntax::ast::FunctionDecl;
use ore_syntax::Program;
use serde::{Deserialize, Serialize};

use crate::crypto::{HashAlgorithm, PublicKeyInfo, SignatureAlgorithm};
use crate::interpreter::scope::Scope;
use crate::types::{Authorization, CompositeType, StaticType};

pub use number::{FixedKind, IntegerKind, IntegerValue};

/// Discriminant of [`Value`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Void,
    Nil,
    Some,
    Bool,
    Integer,
    Fix64,
    UFix64,
    String,
    Address,
    Path,
    Array,
    Dictionary,
    Composite,
    Reference,
    Capability,
    Link,
    Controller,
    Function,
    Type,
    Account,
    HashAlgorithm,
    SignatureAlgorithm,
    PublicKey,
}

#[derive(Debug, Clone)]
pub enum Value {
    Void,
    Nil,
    Some(Box<Value>),
    Bool(bool),
    Integer(IntegerValue),
    /// Scaled by 10^8
    Fix64(i64),
    /// Scaled by 10^8
    UFix64(u64),
    String(String),
    Address(Address),
    Path(Path),
    Array(SlabId),
    Dictionary(SlabId),
    Composite(SlabId),
    Reference(ReferenceValue),
    Capability(CapabilityValue),
    Link(LinkValue),
    Controller(ControllerValue),
    Function(FunctionValue),
    Type(StaticType),
    Account(AccountHandle),
    HashAlgorithm(HashAlgorithm),
    SignatureAlgorithm(SignatureAlgorithm),
    PublicKey(PublicKeyInfo),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Void => ValueKind::Void,
            Value::Nil => ValueKind::Nil,
            Value::Some(_) => ValueKind::Some,
            Value::Bool(_) => ValueKind::Bool,
            Value::Integer(_) => ValueKind::Integer,
            Value::Fix64(_) => ValueKind::Fix64,
            Value::UFix64(_) => ValueKind::UFix64,
            Value::String(_) => ValueKind::String,
            Value::Address(_) => ValueKind::Address,
            Value::Path(_) => ValueKind::Path,
            Value::Array(_) => ValueKind::Array,
            Value::Dictionary(_) => ValueKind::Dictionary,
            Value::Composite(_) => ValueKind::Composite,
            Value::Reference(_) => ValueKind::Reference,
            Value::Capability(_) => ValueKind::Capability,
            Value::Link(_) => ValueKind::Link,
            Value::Controller(_) => ValueKind::Controller,
            Value::Function(_) => ValueKind::Function,
            Value::Type(_) => ValueKind::Type,
            Value::Account(_) => ValueKind::Account,
            Value::HashAlgorithm(_) => ValueKind::HashAlgorithm,
            Value::SignatureAlgorithm(_) => ValueKind::SignatureAlgorithm,
            Value::PublicKey(_) => ValueKind::PublicKey,
        }
    }

    pub fn int<V: Into<num_bigint::BigInt>>(value: V) -> Self {
        Value::Integer(IntegerValue::int(value))
    }

    pub fn string<S: Into<String>>(value: S) -> Self {
        Value::String(value.into())
    }

    pub fn some(value: Value) -> Self {
        Value::Some(Box::new(value))
    }

    /// Wrap in an optional unless the value is already nil
    pub fn into_optional(self) -> Self {
        match self {
            Value::Nil | Value::Some(_) => self,
            other => Value::some(other),
        }
    }

    /// Root slab of a container handle, looking through optionals
    pub fn slab(&self) -> Option<SlabId> {
        match self {
            Value::Array(id) | Value::Dictionary(id) | Value::Composite(id) => Some(*id),
            Value::Some(inner) => inner.slab(),
            _ => None,
        }
    }

    /// The same value pointing at another root slab
    pub fn with_slab(&self, slab: SlabId) -> Value {
        match self {
            Value::Array(_) => Value::Array(slab),
            Value::Dictionary(_) => Value::Dictionary(slab),
            Value::Composite(_) => Value::Composite(slab),
            Value::Some(inner) => Value::some(inner.with_slab(slab)),
            other => other.clone(),
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Value::Path(path) => Some(path),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<&IntegerValue> {
        match self {
            Value::Integer(integer) => Some(integer),
            _ => None,
        }
    }

    /// Equality of dictionary keys and other primitive values
    pub fn key_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Void, Value::Void) | (Value::Nil, Value::Nil) => true,
            (Value::Some(a), Value::Some(b)) => a.key_eq(b),
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a.value == b.value,
            (Value::Fix64(a), Value::Fix64(b)) => a == b,
            (Value::UFix64(a), Value::UFix64(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Address(a), Value::Address(b)) => a == b,
            (Value::Path(a), Value::Path(b)) => a == b,
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::HashAlgorithm(a), Value::HashAlgorithm(b)) => a == b,
            (Value::SignatureAlgorithm(a), Value::SignatureAlgorithm(b)) => a == b,
            _ => false,
        }
    }
}

/// A non-owning alias of a value
#[derive(Debug, Clone)]
pub enum ReferenceValue {
    /// Points at a value of the current execution; containers are checked
    /// for liveness against the generation captured at creation
    Ephemeral {
        target: Box<Value>,
        generation: Option<u64>,
        authorization: Authorization,
        borrowed: StaticType,
    },
    /// Re-resolved through account storage on every access
    Storage {
        address: Address,
        path: Path,
        authorization: Authorization,
        borrowed: StaticType,
    },
}

impl ReferenceValue {
    pub fn authorization(&self) -> &Authorization {
        match self {
            ReferenceValue::Ephemeral { authorization, .. } | ReferenceValue::Storage { authorization, .. } => {
                authorization
            }
        }
    }

    pub fn borrowed(&self) -> &StaticType {
        match self {
            ReferenceValue::Ephemeral { borrowed, .. } | ReferenceValue::Storage { borrowed, .. } => borrowed,
        }
    }

    pub fn static_type(&self) -> StaticType {
        StaticType::reference(self.authorization().clone(), self.borrowed().clone())
    }
}

/// A capability to borrow a reference from an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapabilityValue {
    /// Resolved through the controller with the given id
    Id { address: Address, id: u64, borrow: StaticType },
    /// Legacy capability resolved through a link at a capability path
    Path { address: Address, path: Path, borrow: StaticType },
}

impl CapabilityValue {
    pub fn address(&self) -> Address {
        match self {
            CapabilityValue::Id { address, .. } | CapabilityValue::Path { address, .. } => *address,
        }
    }

    /// Borrow type, always a reference type
    pub fn borrow_type(&self) -> &StaticType {
        match self {
            CapabilityValue::Id { borrow, .. } | CapabilityValue::Path { borrow, .. } => borrow,
        }
    }

    pub fn id(&self) -> u64 {
        match self {
            CapabilityValue::Id { id, .. } => *id,
            CapabilityValue::Path { .. } => 0,
        }
    }
}

/// Legacy link stored at a capability path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkValue {
    pub target: Path,
    pub borrow: StaticType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerTarget {
    Storage(Path),
    Account,
}

/// Capability controller record, stored in the `cap_con` domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerValue {
    pub address: Address,
    pub id: u64,
    pub borrow: StaticType,
    pub target: ControllerTarget,
    /// Authorization of the account handle the controller was obtained
    /// through; never persisted
    #[serde(skip)]
    pub handle: Authorization,
}

/// Part of the account API a handle exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountSection {
    Root,
    Storage,
    Contracts,
    Keys,
    Capabilities,
    StorageCapabilities,
    AccountCapabilities,
}

/// Handle to an account; authorized handles may modify storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountHandle {
    pub address: Address,
    pub authorization: Authorization,
    pub section: AccountSection,
}

impl AccountHandle {
    pub fn new(address: Address, authorization: Authorization) -> Self {
        Self {
            address,
            authorization,
            section: AccountSection::Root,
        }
    }

    pub fn is_authorized(&self) -> bool {
        self.authorization.is_authorized()
    }

    pub fn section(&self, section: AccountSection) -> Self {
        Self {
            section,
            ..self.clone()
        }
    }
}

/// A function declared in a program
pub struct InterpretedFunction {
    pub decl: Arc<FunctionDecl>,
    pub program: Arc<Program>,
    /// Captured scope of function expressions
    pub scope: Option<Rc<Scope>>,
    /// Receiver of a bound method
    pub receiver: Option<Value>,
    pub composite: Option<CompositeType>,
}

#[derive(Clone)]
pub enum FunctionValue {
    Interpreted(Rc<InterpretedFunction>),
    /// Built-in function, optionally bound to a receiver
    Native { name: String, receiver: Option<Box<Value>> },
    /// Constructor of a composite type
    Constructor(CompositeType),
}

impl FunctionValue {
    pub fn native<S: Into<String>>(name: S) -> Self {
        FunctionValue::Native {
            name: name.into(),
            receiver: None,
        }
    }

    pub fn bound<S: Into<String>>(name: S, receiver: Value) -> Self {
        FunctionValue::Native {
            name: name.into(),
            receiver: Some(Box::new(receiver)),
        }
    }
}

impl fmt::Debug for FunctionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionValue::Interpreted(function) => write!(f, "Function({})", function.decl.name),
            FunctionValue::Native { name, .. } => write!(f, "Native({})", name),
            FunctionValue::Constructor(ty) => write!(f, "Constructor({})", ty.type_id()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slab_is_found_through_optionals() {
        let id = SlabId::new(Address::ZERO, 3);
        let value = Value::some(Value::Composite(id));
        assert_eq!(value.slab(), Some(id));
        let moved = value.with_slab(SlabId::new(Address::from_u64(1), 9));
        assert_eq!(moved.slab(), Some(SlabId::new(Address::from_u64(1), 9)));
        assert!(matches!(moved, Value::Some(_)));
    }

    #[test]
    fn test_key_equality() {
        assert!(Value::string("a").key_eq(&Value::string("a")));
        assert!(!Value::string("a").key_eq(&Value::int(1)));
        assert!(Value::Address(Address::from_u64(1)).key_eq(&Value::Address(Address::from_u64(1))));
    }
}
