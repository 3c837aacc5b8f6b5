//! Value heap of one execution
//!
//! Wraps slab storage together with the resource tracker and implements the
//! transfer protocol: resources move, everything else is copied, and every
//! move invalidates references to the moved subtree.

use std::collections::BTreeMap;

use ore_common::{Address, Path};
use ore_storage::{CommitSummary, Ledger, SlabId, SlabStorage, ValidationReport};
use tracing::{debug, trace};

use crate::error::{Error, Result, UserErrorKind};
use crate::tracker::Tracker;
use crate::types::{PathType, StaticType};
use crate::value::number::format_fixed;
use crate::value::{ControllerTarget, ReferenceValue, Value};

pub const STORAGE_DOMAIN: &str = "storage";
pub const PUBLIC_DOMAIN: &str = "public";
pub const PRIVATE_DOMAIN: &str = "private";
pub const CONTRACT_DOMAIN: &str = "contract";
/// Capability controller records keyed by capability id
pub const CONTROLLER_DOMAIN: &str = "cap_con";

/// Every account domain, in validation order
pub const DOMAINS: [&str; 5] = [
    STORAGE_DOMAIN,
    PUBLIC_DOMAIN,
    PRIVATE_DOMAIN,
    CONTRACT_DOMAIN,
    CONTROLLER_DOMAIN,
];

/// Ledger key of the per-account capability id counter
pub const CAPABILITY_ID_KEY: &[u8] = b"cap_id";

pub struct Heap<'l> {
    pub(crate) storage: SlabStorage<'l, Value>,
    pub(crate) tracker: Tracker,
    /// Last issued capability id per account, written on commit
    capability_ids: BTreeMap<Address, u64>,
}

impl<'l> Heap<'l> {
    pub fn new(ledger: &'l dyn Ledger, page_capacity: usize) -> Self {
        Self {
            storage: SlabStorage::new(ledger, page_capacity),
            tracker: Tracker::new(),
            capability_ids: BTreeMap::new(),
        }
    }

    // Types

    pub fn static_type(&mut self, value: &Value) -> Result<StaticType> {
        Ok(match value {
            Value::Void => StaticType::Void,
            Value::Nil => StaticType::optional(StaticType::Never),
            Value::Some(inner) => StaticType::optional(self.static_type(inner)?),
            Value::Bool(_) => StaticType::Bool,
            Value::Integer(integer) => StaticType::Integer(integer.kind),
            Value::Fix64(_) => StaticType::Fix64,
            Value::UFix64(_) => StaticType::UFix64,
            Value::String(_) => StaticType::String,
            Value::Address(_) => StaticType::Address,
            Value::Path(path) => StaticType::Path(PathType::of(path.domain)),
            Value::Array(id) | Value::Dictionary(id) | Value::Composite(id) => self.storage.info(*id)?,
            Value::Reference(reference) => reference.static_type(),
            Value::Capability(capability) => StaticType::Capability(Some(Box::new(capability.borrow_type().clone()))),
            Value::Link(link) => StaticType::Capability(Some(Box::new(link.borrow.clone()))),
            Value::Controller(controller) => match controller.target {
                ControllerTarget::Storage(_) => StaticType::StorageCapabilityController,
                ControllerTarget::Account => StaticType::AccountCapabilityController,
            },
            Value::Function(_) => StaticType::Function,
            Value::Type(_) => StaticType::MetaType,
            Value::Account(handle) => StaticType::reference(handle.authorization.clone(), StaticType::Account),
            Value::HashAlgorithm(_) => StaticType::HashAlgorithm,
            Value::SignatureAlgorithm(_) => StaticType::SignatureAlgorithm,
            Value::PublicKey(_) => StaticType::PublicKey,
        })
    }

    /// Whether the value is resource-kinded
    pub fn is_resource(&mut self, value: &Value) -> Result<bool> {
        match value {
            Value::Array(id) | Value::Dictionary(id) | Value::Composite(id) => Ok(self.storage.info(*id)?.is_resource()),
            Value::Some(inner) => self.is_resource(inner),
            _ => Ok(false),
        }
    }

    /// Whether the dynamic type of the value is a subtype of `ty`
    pub fn conforms(&mut self, value: &Value, ty: &StaticType) -> Result<bool> {
        if let (Value::Some(inner), StaticType::Optional(expected)) = (value, ty) {
            return self.conforms(inner, expected);
        }
        Ok(self.static_type(value)?.is_subtype(ty))
    }

    // Transfer protocol

    /// Produce the value to store at `address`. Resources keep their slabs
    /// when they stay at the same address and are moved to new slabs
    /// otherwise, removing the source slabs if `remove` is set; other
    /// containers are always copied.
    pub fn transfer(&mut self, value: Value, address: Address, remove: bool) -> Result<Value> {
        let Some(id) = value.slab() else {
            return Ok(value);
        };
        self.tracker.check_alive(id)?;
        if !self.is_resource(&value)? {
            let copy = self.storage.deep_copy(id, address)?;
            return Ok(value.with_slab(copy));
        }
        let subtree = self.storage.subtree(id)?;
        if id.address == address {
            self.tracker.moved(&subtree);
            return Ok(value);
        }
        let copy = self.storage.deep_copy(id, address)?;
        self.tracker.moved(&subtree);
        if remove {
            self.storage.deep_remove(id)?;
        }
        trace!(from = %id, to = %copy, "Moved resource between accounts");
        Ok(value.with_slab(copy))
    }

    /// Deep copy of a value, used for non-moving reads of storage
    pub fn copy_value(&mut self, value: &Value, address: Address) -> Result<Value> {
        match value.slab() {
            Some(id) => {
                let copy = self.storage.deep_copy(id, address)?;
                Ok(value.with_slab(copy))
            }
            None => Ok(value.clone()),
        }
    }

    /// Remove the slabs owned by a value that is discarded
    pub fn remove_value(&mut self, value: &Value) -> Result<()> {
        if let Some(id) = value.slab() {
            if self.storage.contains(id)? {
                self.storage.deep_remove(id)?;
            }
        }
        Ok(())
    }

    /// Fail if moving `moved` into the container `target` would make a
    /// container contain itself
    pub fn check_recursive_transfer(&self, moved: &Value, target: SlabId) -> Result<()> {
        if let Some(moved) = moved.slab() {
            if self.storage.is_ancestor_or_self(moved, target) {
                return Err(UserErrorKind::RecursiveTransfer.into());
            }
        }
        Ok(())
    }

    /// Fail if the value contains anything that cannot be persisted
    pub fn check_storable(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::Reference(_) => Err(UserErrorKind::NonStorableValue("reference".to_string()).into()),
            Value::Function(_) => Err(UserErrorKind::NonStorableValue("function".to_string()).into()),
            Value::Account(_) => Err(UserErrorKind::NonStorableValue("account".to_string()).into()),
            Value::Some(inner) => self.check_storable(inner),
            Value::Array(id) | Value::Dictionary(id) | Value::Composite(id) => {
                for child in self.storage.values(*id)? {
                    self.check_storable(&child)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    // References

    /// Resolve a reference to the value it points at
    pub fn deref(&mut self, reference: &ReferenceValue) -> Result<Value> {
        match reference {
            ReferenceValue::Ephemeral { target, generation, .. } => {
                if let (Some(id), Some(generation)) = (target.slab(), generation) {
                    self.tracker.check_reference(id, *generation)?;
                    if !self.storage.contains(id)? {
                        return Err(UserErrorKind::InvalidatedResourceReference {
                            cause: self.tracker.invalidation_cause(id),
                        }
                        .into());
                    }
                }
                Ok((**target).clone())
            }
            ReferenceValue::Storage {
                address,
                path,
                borrowed,
                ..
            } => {
                let value = self
                    .domain_get(*address, path.domain.identifier(), &path.identifier)?
                    .ok_or_else(|| {
                        Error::from(UserErrorKind::DereferenceFailure(format!(
                            "no value stored at {} in account {}",
                            path, address
                        )))
                    })?;
                if !self.conforms(&value, borrowed)? {
                    return Err(UserErrorKind::DereferenceFailure(format!(
                        "value stored at {} in account {} is not a `{}`",
                        path, address, borrowed
                    ))
                    .into());
                }
                Ok(value)
            }
        }
    }

    /// Ephemeral reference to `target`, capturing the current generation
    pub fn reference_to(&self, target: Value, authorization: crate::types::Authorization, borrowed: StaticType) -> Value {
        let generation = target.slab().map(|id| self.tracker.generation(id));
        Value::Reference(ReferenceValue::Ephemeral {
            target: Box::new(target),
            generation,
            authorization,
            borrowed,
        })
    }

    // Equality

    pub fn equal(&mut self, left: &Value, right: &Value) -> Result<bool> {
        match (left, right) {
            (Value::Some(a), Value::Some(b)) => self.equal(a, b),
            (Value::Array(a), Value::Array(b)) => {
                if a == b {
                    return Ok(true);
                }
                let left = self.storage.array_items(*a)?;
                let right = self.storage.array_items(*b)?;
                if left.len() != right.len() {
                    return Ok(false);
                }
                for (x, y) in left.iter().zip(right.iter()) {
                    if !self.equal(x, y)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            (Value::Dictionary(a), Value::Dictionary(b)) => {
                if a == b {
                    return Ok(true);
                }
                let left = self.storage.dictionary_entries(*a)?;
                if left.len() != self.storage.dictionary_len(*b)? {
                    return Ok(false);
                }
                for (key, value) in left {
                    match self.storage.dictionary_get(*b, &key)? {
                        Some(other) if self.equal(&value, &other)? => {}
                        _ => return Ok(false),
                    }
                }
                Ok(true)
            }
            (Value::Composite(a), Value::Composite(b)) => {
                if a == b {
                    return Ok(true);
                }
                let info = self.storage.info(*a)?;
                if info.is_resource() || info != self.storage.info(*b)? {
                    return Ok(false);
                }
                let left = self.storage.composite_fields(*a)?;
                let right = self.storage.composite_fields(*b)?;
                if left.len() != right.len() {
                    return Ok(false);
                }
                for (name, value) in left {
                    match right.iter().find(|(other, _)| *other == name) {
                        Some((_, other)) if self.equal(&value, other)? => {}
                        _ => return Ok(false),
                    }
                }
                Ok(true)
            }
            (Value::Reference(a), Value::Reference(b)) => {
                let a = self.deref(a)?;
                let b = self.deref(b)?;
                match (a.slab(), b.slab()) {
                    (Some(x), Some(y)) => Ok(x == y),
                    _ => self.equal(&a, &b),
                }
            }
            (Value::Capability(a), Value::Capability(b)) => Ok(a == b),
            (Value::Link(a), Value::Link(b)) => Ok(a == b),
            (Value::Account(a), Value::Account(b)) => Ok(a.address == b.address),
            (Value::PublicKey(a), Value::PublicKey(b)) => Ok(a == b),
            _ => Ok(left.key_eq(right)),
        }
    }

    // Account domains

    pub fn domain_get(&mut self, address: Address, domain: &str, key: &str) -> Result<Option<Value>> {
        Ok(self.storage.domain_get(address, domain, key)?)
    }

    pub fn domain_set(&mut self, address: Address, domain: &str, key: &str, value: Value) -> Result<Option<Value>> {
        Ok(self.storage.domain_set(address, domain, key, value)?)
    }

    pub fn domain_remove(&mut self, address: Address, domain: &str, key: &str) -> Result<Option<Value>> {
        Ok(self.storage.domain_remove(address, domain, key)?)
    }

    pub fn domain_entries(&mut self, address: Address, domain: &str) -> Result<Vec<(String, Value)>> {
        Ok(self.storage.domain_entries(address, domain)?)
    }

    /// Value stored at a path
    pub fn read_path(&mut self, address: Address, path: &Path) -> Result<Option<Value>> {
        self.domain_get(address, path.domain.identifier(), &path.identifier)
    }

    // Capability ids

    /// Allocate the next capability id of `address`
    pub fn next_capability_id(&mut self, address: Address) -> Result<u64> {
        let current = match self.capability_ids.get(&address) {
            Some(current) => *current,
            None => {
                let raw = self.storage.ledger().get_value(address, CAPABILITY_ID_KEY)?;
                if raw.is_empty() {
                    0
                } else {
                    let bytes = <[u8; 8]>::try_from(raw.as_slice())
                        .map_err(|_| Error::unexpected(format!("malformed capability id counter of {}", address)))?;
                    u64::from_be_bytes(bytes)
                }
            }
        };
        let next = current + 1;
        self.capability_ids.insert(address, next);
        Ok(next)
    }

    // Persistence

    /// Write staged slabs and capability counters to the ledger
    pub fn commit(&mut self) -> Result<CommitSummary> {
        let summary = self.storage.commit()?;
        for (address, id) in std::mem::take(&mut self.capability_ids) {
            self.storage.ledger().set_value(address, CAPABILITY_ID_KEY, &id.to_be_bytes())?;
        }
        Ok(summary)
    }

    /// Validate the slab trees written by the last commit
    pub fn validate(&self) -> Result<ValidationReport> {
        let report = self.storage.validate(&DOMAINS)?;
        debug!(slabs = report.slabs, domains = report.domains, "Storage validation passed");
        Ok(report)
    }

    // Formatting

    /// Human-readable rendering used by `log` and `toString`
    pub fn describe(&mut self, value: &Value) -> Result<String> {
        Ok(match value {
            Value::Void => "()".to_string(),
            Value::Nil => "nil".to_string(),
            Value::Some(inner) => self.describe(inner)?,
            Value::Bool(b) => b.to_string(),
            Value::Integer(integer) => integer.to_string(),
            Value::Fix64(v) => format_fixed(*v as i128),
            Value::UFix64(v) => format_fixed(*v as i128),
            Value::String(s) => format!("{:?}", s),
            Value::Address(address) => address.to_string(),
            Value::Path(path) => path.to_string(),
            Value::Array(id) => {
                let mut parts = Vec::new();
                for item in self.storage.array_items(*id)? {
                    parts.push(self.describe(&item)?);
                }
                format!("[{}]", parts.join(", "))
            }
            Value::Dictionary(id) => {
                let mut parts = Vec::new();
                for (key, item) in self.storage.dictionary_entries(*id)? {
                    parts.push(format!("{}: {}", self.describe(&key)?, self.describe(&item)?));
                }
                format!("{{{}}}", parts.join(", "))
            }
            Value::Composite(id) => {
                let info = self.storage.info(*id)?;
                let mut parts = Vec::new();
                for (name, field) in self.storage.composite_fields(*id)? {
                    parts.push(format!("{}: {}", name, self.describe(&field)?));
                }
                format!("{}({})", info, parts.join(", "))
            }
            Value::Reference(reference) => {
                let target = self.deref(reference)?;
                self.describe(&target)?
            }
            Value::Capability(capability) => format!(
                "Capability<{}>(address: {}, id: {})",
                capability.borrow_type(),
                capability.address(),
                capability.id()
            ),
            Value::Link(link) => format!("Link<{}>({})", link.borrow, link.target),
            Value::Controller(controller) => format!("CapabilityController(id: {})", controller.id),
            Value::Function(function) => format!("{:?}", function),
            Value::Type(ty) => format!("Type<{}>()", ty),
            Value::Account(handle) => format!("Account({})", handle.address),
            Value::HashAlgorithm(algorithm) => algorithm.to_string(),
            Value::SignatureAlgorithm(algorithm) => algorithm.to_string(),
            Value::PublicKey(key) => format!("PublicKey(publicKey: {})", hex::encode(&key.public_key)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CompositeType;
    use crate::value::IntegerKind;
    use ore_common::Location;
    use ore_storage::MemoryLedger;
    use ore_syntax::ast::CompositeKind;
    use pretty_assertions::assert_eq;

    fn resource_type() -> StaticType {
        StaticType::Composite(CompositeType::new(Location::String("test".into()), "R", CompositeKind::Resource))
    }

    fn struct_type() -> StaticType {
        StaticType::Composite(CompositeType::new(Location::String("test".into()), "S", CompositeKind::Struct))
    }

    #[test]
    fn test_resources_move_and_structs_copy() {
        let ledger = MemoryLedger::new();
        let mut heap = Heap::new(&ledger, 4);
        let resource = heap
            .storage
            .create_composite(Address::ZERO, resource_type(), vec![("x".into(), Value::int(42))])
            .unwrap();
        let generation = heap.tracker.generation(resource);
        let moved = heap.transfer(Value::Composite(resource), Address::ZERO, true).unwrap();
        assert_eq!(moved.slab(), Some(resource));
        assert!(heap.tracker.check_reference(resource, generation).is_err());

        let owner = Address::from_u64(1);
        let stored = heap.transfer(moved, owner, true).unwrap();
        let stored_id = stored.slab().unwrap();
        assert_eq!(stored_id.address, owner);
        assert!(!heap.storage.contains(resource).unwrap());

        let structure = heap.storage.create_composite(Address::ZERO, struct_type(), vec![]).unwrap();
        let copied = heap.transfer(Value::Composite(structure), Address::ZERO, true).unwrap();
        assert_ne!(copied.slab(), Some(structure));
        assert!(heap.storage.contains(structure).unwrap());
    }

    #[test]
    fn test_recursive_transfer_is_detected() {
        let ledger = MemoryLedger::new();
        let mut heap = Heap::new(&ledger, 4);
        let ty = StaticType::array(StaticType::array(resource_type()));
        let inner = heap
            .storage
            .create_array(Address::ZERO, StaticType::array(resource_type()), vec![])
            .unwrap();
        let outer = heap.storage.create_array(Address::ZERO, ty, vec![Value::Array(inner)]).unwrap();
        let err = heap.check_recursive_transfer(&Value::Array(outer), inner).unwrap_err();
        assert_eq!(err.user_kind(), Some(&UserErrorKind::RecursiveTransfer));
        assert!(heap.check_recursive_transfer(&Value::Array(inner), outer).is_ok());
    }

    #[test]
    fn test_structural_equality() {
        let ledger = MemoryLedger::new();
        let mut heap = Heap::new(&ledger, 4);
        let ty = StaticType::array(StaticType::Integer(IntegerKind::Int));
        let a = heap.storage.create_array(Address::ZERO, ty.clone(), vec![Value::int(1), Value::int(2)]).unwrap();
        let b = heap.storage.create_array(Address::ZERO, ty.clone(), vec![Value::int(1), Value::int(2)]).unwrap();
        let c = heap.storage.create_array(Address::ZERO, ty, vec![Value::int(1)]).unwrap();
        assert!(heap.equal(&Value::Array(a), &Value::Array(b)).unwrap());
        assert!(!heap.equal(&Value::Array(a), &Value::Array(c)).unwrap());
        assert_eq!(heap.describe(&Value::Array(a)).unwrap(), "[1, 2]");
        assert_eq!(heap.describe(&Value::string("2")).unwrap(), "\"2\"");
    }

    #[test]
    fn test_capability_ids_are_staged_until_commit() {
        let ledger = MemoryLedger::new();
        let owner = Address::from_u64(7);
        {
            let mut heap = Heap::new(&ledger, 4);
            assert_eq!(heap.next_capability_id(owner).unwrap(), 1);
            assert_eq!(heap.next_capability_id(owner).unwrap(), 2);
            assert!(ledger.get_value(owner, CAPABILITY_ID_KEY).unwrap().is_empty());
            heap.commit().unwrap();
        }
        let mut heap = Heap::new(&ledger, 4);
        assert_eq!(heap.next_capability_id(owner).unwrap(), 3);
    }
}
