//! Persisted form of values
//!
//! Only storable values have an encoding. References, functions and account
//! handles live for one execution and fail to encode.

use ore_common::{Address, Path};
use ore_storage::{SlabElement, SlabId, StorageError};
use serde::{Deserialize, Serialize};

use crate::crypto::{HashAlgorithm, PublicKeyInfo, SignatureAlgorithm};
use crate::types::StaticType;
use crate::value::{CapabilityValue, ControllerValue, IntegerValue, LinkValue, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StoredValue {
    Void,
    Nil,
    Some(Box<StoredValue>),
    Bool(bool),
    Integer(IntegerValue),
    Fix64(i64),
    UFix64(u64),
    String(String),
    Address(Address),
    Path(Path),
    Array(SlabId),
    Dictionary(SlabId),
    Composite(SlabId),
    Capability(CapabilityValue),
    Link(LinkValue),
    Controller(ControllerValue),
    Type(StaticType),
    HashAlgorithm(HashAlgorithm),
    SignatureAlgorithm(SignatureAlgorithm),
    PublicKey(PublicKeyInfo),
}

impl SlabElement for Value {
    type Encoded = StoredValue;
    type TypeInfo = StaticType;

    fn encode(&self) -> ore_storage::Result<StoredValue> {
        Ok(match self {
            Value::Void => StoredValue::Void,
            Value::Nil => StoredValue::Nil,
            Value::Some(inner) => StoredValue::Some(Box::new(inner.encode()?)),
            Value::Bool(b) => StoredValue::Bool(*b),
            Value::Integer(i) => StoredValue::Integer(i.clone()),
            Value::Fix64(v) => StoredValue::Fix64(*v),
            Value::UFix64(v) => StoredValue::UFix64(*v),
            Value::String(s) => StoredValue::String(s.clone()),
            Value::Address(a) => StoredValue::Address(*a),
            Value::Path(p) => StoredValue::Path(p.clone()),
            Value::Array(id) => StoredValue::Array(*id),
            Value::Dictionary(id) => StoredValue::Dictionary(*id),
            Value::Composite(id) => StoredValue::Composite(*id),
            Value::Capability(c) => StoredValue::Capability(c.clone()),
            Value::Link(l) => StoredValue::Link(l.clone()),
            Value::Controller(c) => StoredValue::Controller(c.clone()),
            Value::Type(t) => StoredValue::Type(t.clone()),
            Value::HashAlgorithm(h) => StoredValue::HashAlgorithm(*h),
            Value::SignatureAlgorithm(s) => StoredValue::SignatureAlgorithm(*s),
            Value::PublicKey(k) => StoredValue::PublicKey(k.clone()),
            Value::Reference(_) => return Err(StorageError::non_storable("reference")),
            Value::Function(_) => return Err(StorageError::non_storable("function")),
            Value::Account(_) => return Err(StorageError::non_storable("account")),
        })
    }

    fn decode(encoded: StoredValue) -> Self {
        match encoded {
            StoredValue::Void => Value::Void,
            StoredValue::Nil => Value::Nil,
            StoredValue::Some(inner) => Value::some(Value::decode(*inner)),
            StoredValue::Bool(b) => Value::Bool(b),
            StoredValue::Integer(i) => Value::Integer(i),
            StoredValue::Fix64(v) => Value::Fix64(v),
            StoredValue::UFix64(v) => Value::UFix64(v),
            StoredValue::String(s) => Value::String(s),
            StoredValue::Address(a) => Value::Address(a),
            StoredValue::Path(p) => Value::Path(p),
            StoredValue::Array(id) => Value::Array(id),
            StoredValue::Dictionary(id) => Value::Dictionary(id),
            StoredValue::Composite(id) => Value::Composite(id),
            StoredValue::Capability(c) => Value::Capability(c),
            StoredValue::Link(l) => Value::Link(l),
            StoredValue::Controller(c) => Value::Controller(c),
            StoredValue::Type(t) => Value::Type(t),
            StoredValue::HashAlgorithm(h) => Value::HashAlgorithm(h),
            StoredValue::SignatureAlgorithm(s) => Value::SignatureAlgorithm(s),
            StoredValue::PublicKey(k) => Value::PublicKey(k),
        }
    }

    fn child_slab(&self) -> Option<SlabId> {
        self.slab()
    }

    fn with_child_slab(&self, child: SlabId) -> Self {
        self.with_slab(child)
    }

    fn same_key(&self, other: &Self) -> bool {
        self.key_eq(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ore_storage::{Ledger, MemoryLedger, SlabStorage};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_values_persist_through_slabs() {
        let ledger = MemoryLedger::new();
        let owner = Address::from_u64(1);
        let id = {
            let mut storage: SlabStorage<Value> = SlabStorage::new(&ledger, 4);
            let items = (0..10).map(|i| Value::int(i)).collect();
            let id = storage
                .create_array(owner, StaticType::array(StaticType::Integer(crate::value::IntegerKind::Int)), items)
                .unwrap();
            storage.domain_set(owner, "storage", "numbers", Value::Array(id)).unwrap();
            storage.commit().unwrap();
            id
        };
        assert!(ledger.value_exists(owner, &id.key()).unwrap());

        let mut storage: SlabStorage<Value> = SlabStorage::new(&ledger, 4);
        let stored = storage.domain_get(owner, "storage", "numbers").unwrap().unwrap();
        assert_eq!(stored.slab(), Some(id));
        let seventh = storage.array_get(id, 7).unwrap();
        assert!(seventh.key_eq(&Value::int(7)));
    }

    #[test]
    fn test_references_are_not_storable() {
        let function = Value::Function(crate::value::FunctionValue::native("log"));
        assert!(matches!(function.encode(), Err(StorageError::NonStorable(_))));
    }
}
