//! Values crossing the host boundary
//!
//! Arguments and results are exchanged as [`ExportedValue`], a plain serde
//! tree with no handles into the execution's heap. Importing checks the
//! value against the static type of the parameter it is passed to.

use ore_common::{Address, Location, Path};
use ore_syntax::ast::CompositeKind;
use serde::{Deserialize, Serialize};

use crate::error::{Error, InvalidationCause, Result, UserErrorKind};
use crate::heap::Heap;
use crate::types::{CompositeType, StaticType};
use crate::value::{CapabilityValue, IntegerKind, IntegerValue, ReferenceValue, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum ExportedValue {
    Void,
    Optional(Option<Box<ExportedValue>>),
    Bool(bool),
    String(String),
    Address(Address),
    Integer(IntegerValue),
    /// Scaled by 10^8
    Fix64(i64),
    /// Scaled by 10^8
    UFix64(u64),
    Path(Path),
    Array(Vec<ExportedValue>),
    Dictionary(Vec<(ExportedValue, ExportedValue)>),
    Composite {
        type_id: String,
        kind: CompositeKind,
        fields: Vec<(String, ExportedValue)>,
    },
    Capability {
        address: Address,
        id: u64,
        borrow_type: String,
    },
    Type(String),
    /// Raw value of a built-in enumeration such as `HashAlgorithm`
    Enum {
        type_id: String,
        raw_value: u8,
    },
}

impl ExportedValue {
    pub fn int(value: i64) -> Self {
        ExportedValue::Integer(IntegerValue::int(value))
    }

    pub fn string<S: Into<String>>(value: S) -> Self {
        ExportedValue::String(value.into())
    }

    pub fn some(value: ExportedValue) -> Self {
        ExportedValue::Optional(Some(Box::new(value)))
    }

    pub fn nil() -> Self {
        ExportedValue::Optional(None)
    }

    /// Field of an exported composite
    pub fn field(&self, name: &str) -> Option<&ExportedValue> {
        match self {
            ExportedValue::Composite { fields, .. } => fields.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }
}

fn decoding<S: Into<String>>(message: S) -> Error {
    UserErrorKind::ArgumentDecoding(message.into()).into()
}

/// Convert a value of the execution into its host representation
pub fn export_value(heap: &mut Heap<'_>, value: &Value) -> Result<ExportedValue> {
    Ok(match value {
        Value::Void => ExportedValue::Void,
        Value::Nil => ExportedValue::Optional(None),
        Value::Some(inner) => ExportedValue::some(export_value(heap, inner)?),
        Value::Bool(b) => ExportedValue::Bool(*b),
        Value::String(s) => ExportedValue::String(s.clone()),
        Value::Address(address) => ExportedValue::Address(*address),
        Value::Integer(integer) => ExportedValue::Integer(integer.clone()),
        Value::Fix64(v) => ExportedValue::Fix64(*v),
        Value::UFix64(v) => ExportedValue::UFix64(*v),
        Value::Path(path) => ExportedValue::Path(path.clone()),
        Value::Array(id) => {
            heap.tracker.check_alive(*id)?;
            let mut items = Vec::new();
            for item in heap.storage.array_items(*id)? {
                items.push(export_value(heap, &item)?);
            }
            ExportedValue::Array(items)
        }
        Value::Dictionary(id) => {
            heap.tracker.check_alive(*id)?;
            let mut entries = Vec::new();
            for (key, item) in heap.storage.dictionary_entries(*id)? {
                entries.push((export_value(heap, &key)?, export_value(heap, &item)?));
            }
            ExportedValue::Dictionary(entries)
        }
        Value::Composite(id) => {
            heap.tracker.check_alive(*id)?;
            let StaticType::Composite(ty) = heap.storage.info(*id)? else {
                return Err(Error::unexpected(format!("composite slab {} without composite type", id)));
            };
            let mut fields = Vec::new();
            for (name, field) in heap.storage.composite_fields(*id)? {
                fields.push((name, export_value(heap, &field)?));
            }
            ExportedValue::Composite {
                type_id: ty.type_id(),
                kind: ty.kind,
                fields,
            }
        }
        Value::Reference(reference) => {
            let target = heap.deref(reference).map_err(|err| match err.user_kind() {
                Some(UserErrorKind::InvalidatedResourceReference {
                    cause: InvalidationCause::Destroyed,
                }) => UserErrorKind::DestroyedResourceUse.into(),
                _ => err,
            })?;
            if let ReferenceValue::Ephemeral { .. } = reference {
                if let Some(id) = target.slab() {
                    heap.tracker.check_alive(id)?;
                }
            }
            export_value(heap, &target)?
        }
        Value::Capability(capability) => ExportedValue::Capability {
            address: capability.address(),
            id: capability.id(),
            borrow_type: capability.borrow_type().to_string(),
        },
        Value::Type(ty) => ExportedValue::Type(ty.id()),
        Value::Account(handle) => ExportedValue::Address(handle.address),
        Value::HashAlgorithm(algorithm) => ExportedValue::Enum {
            type_id: "HashAlgorithm".to_string(),
            raw_value: algorithm.raw_value(),
        },
        Value::SignatureAlgorithm(algorithm) => ExportedValue::Enum {
            type_id: "SignatureAlgorithm".to_string(),
            raw_value: algorithm.raw_value(),
        },
        Value::PublicKey(key) => ExportedValue::Composite {
            type_id: "PublicKey".to_string(),
            kind: CompositeKind::Struct,
            fields: vec![
                (
                    "publicKey".to_string(),
                    ExportedValue::Array(
                        key.public_key
                            .iter()
                            .map(|b| ExportedValue::Integer(IntegerValue { kind: IntegerKind::UInt8, value: (*b).into() }))
                            .collect(),
                    ),
                ),
                (
                    "signatureAlgorithm".to_string(),
                    ExportedValue::Enum {
                        type_id: "SignatureAlgorithm".to_string(),
                        raw_value: key.signature_algorithm.raw_value(),
                    },
                ),
            ],
        },
        Value::Link(_) | Value::Controller(_) | Value::Function(_) => {
            let ty = heap.static_type(value)?;
            return Err(UserErrorKind::NonExportable(ty.to_string()).into());
        }
    })
}

/// Composite type named by a type identifier such as
/// `A.0000000000000001.Token.Vault` or `s.abc.S`
pub fn composite_type_of(type_id: &str, kind: CompositeKind) -> Option<CompositeType> {
    let (prefix, rest) = type_id.split_once('.')?;
    let (location, qualified) = match prefix {
        "A" => {
            let (address, qualified) = rest.split_once('.')?;
            let address = Address::from_hex(address).ok()?;
            let contract = qualified.split('.').next()?;
            (Location::address(address, contract), qualified)
        }
        "S" | "s" | "t" => {
            let (id, qualified) = rest.split_once('.')?;
            let location = match prefix {
                "S" => Location::String(id.to_string()),
                "s" => Location::Script(id.to_string()),
                _ => Location::Transaction(id.to_string()),
            };
            (location, qualified)
        }
        other => (Location::Identifier(other.to_string()), rest),
    };
    Some(CompositeType::new(location, qualified, kind))
}

/// Convert a host value into a value of this execution, checking it
/// against `ty`
pub fn import_value(heap: &mut Heap<'_>, exported: &ExportedValue, ty: &StaticType) -> Result<Value> {
    if ty.is_resource() {
        return Err(decoding(format!("cannot import a value of resource type `{}`", ty)));
    }
    let value = match (exported, ty) {
        (ExportedValue::Optional(None), StaticType::Optional(_) | StaticType::AnyStruct) => Value::Nil,
        (ExportedValue::Optional(Some(inner)), StaticType::Optional(expected)) => {
            Value::some(import_value(heap, inner, expected)?)
        }
        (other, StaticType::Optional(expected)) => Value::some(import_value(heap, other, expected)?),
        (ExportedValue::Optional(Some(inner)), StaticType::AnyStruct) => {
            Value::some(import_value(heap, inner, &StaticType::AnyStruct)?)
        }
        (ExportedValue::Integer(integer), StaticType::Integer(kind)) => Value::Integer(
            IntegerValue::new(*kind, integer.value.clone())
                .map_err(|_| decoding(format!("{} is out of range for `{}`", integer.value, kind)))?,
        ),
        (ExportedValue::Array(items), StaticType::Array(element)) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(import_value(heap, item, element)?);
            }
            Value::Array(heap.storage.create_array(Address::ZERO, ty.clone(), values)?)
        }
        (ExportedValue::Array(items), StaticType::AnyStruct) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(import_value(heap, item, &StaticType::AnyStruct)?);
            }
            let ty = StaticType::array(StaticType::AnyStruct);
            Value::Array(heap.storage.create_array(Address::ZERO, ty, values)?)
        }
        (ExportedValue::Dictionary(entries), StaticType::Dictionary(key_type, value_type)) => {
            let mut values = Vec::with_capacity(entries.len());
            for (key, item) in entries {
                values.push((import_value(heap, key, key_type)?, import_value(heap, item, value_type)?));
            }
            Value::Dictionary(heap.storage.create_dictionary(Address::ZERO, ty.clone(), values)?)
        }
        (ExportedValue::Dictionary(entries), StaticType::AnyStruct) => {
            let mut values = Vec::with_capacity(entries.len());
            for (key, item) in entries {
                values.push((
                    import_value(heap, key, &StaticType::AnyStruct)?,
                    import_value(heap, item, &StaticType::AnyStruct)?,
                ));
            }
            let ty = StaticType::dictionary(StaticType::AnyStruct, StaticType::AnyStruct);
            Value::Dictionary(heap.storage.create_dictionary(Address::ZERO, ty, values)?)
        }
        (ExportedValue::Composite { type_id, kind, fields }, _) => {
            if *kind == CompositeKind::Resource {
                return Err(decoding(format!("cannot import resource `{}`", type_id)));
            }
            let composite = composite_type_of(type_id, *kind)
                .ok_or_else(|| decoding(format!("invalid type identifier `{}`", type_id)))?;
            let mut values = Vec::with_capacity(fields.len());
            for (name, field) in fields {
                values.push((name.clone(), import_value(heap, field, &StaticType::AnyStruct)?));
            }
            Value::Composite(
                heap.storage
                    .create_composite(Address::ZERO, StaticType::Composite(composite), values)?,
            )
        }
        (ExportedValue::Capability { address, id, borrow_type }, _) => {
            let borrow = match ty {
                StaticType::Capability(Some(borrow)) => (**borrow).clone(),
                _ => return Err(decoding(format!("cannot import capability with borrow type `{}`", borrow_type))),
            };
            Value::Capability(CapabilityValue::Id {
                address: *address,
                id: *id,
                borrow,
            })
        }
        (ExportedValue::Type(name), _) => Value::Type(
            StaticType::builtin(name).ok_or_else(|| decoding(format!("cannot import type `{}`", name)))?,
        ),
        (ExportedValue::Void, _) => Value::Void,
        (ExportedValue::Bool(b), _) => Value::Bool(*b),
        (ExportedValue::String(s), _) => Value::String(s.clone()),
        (ExportedValue::Address(address), _) => Value::Address(*address),
        (ExportedValue::Integer(integer), _) => Value::Integer(integer.clone()),
        (ExportedValue::Fix64(v), _) => Value::Fix64(*v),
        (ExportedValue::UFix64(v), _) => Value::UFix64(*v),
        (ExportedValue::Path(path), _) => Value::Path(path.clone()),
        (other, _) => return Err(decoding(format!("cannot import {:?} as `{}`", other, ty))),
    };
    if !heap.conforms(&value, ty)? {
        let actual = heap.static_type(&value)?;
        return Err(decoding(format!("expected `{}`, got `{}`", ty, actual)));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ore_storage::MemoryLedger;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_import_checks_types() {
        let ledger = MemoryLedger::new();
        let mut heap = Heap::new(&ledger, 4);
        let ty = StaticType::array(StaticType::Integer(IntegerKind::UInt8));
        let exported = ExportedValue::Array(vec![ExportedValue::int(1), ExportedValue::int(2)]);
        let value = import_value(&mut heap, &exported, &ty).unwrap();
        assert_eq!(heap.static_type(&value).unwrap(), ty);
        let back = export_value(&mut heap, &value).unwrap();
        assert_eq!(
            back,
            ExportedValue::Array(vec![
                ExportedValue::Integer(IntegerValue::new(IntegerKind::UInt8, 1).unwrap()),
                ExportedValue::Integer(IntegerValue::new(IntegerKind::UInt8, 2).unwrap()),
            ])
        );

        let err = import_value(&mut heap, &ExportedValue::int(300), &StaticType::Integer(IntegerKind::UInt8))
            .unwrap_err();
        assert!(matches!(err.user_kind(), Some(UserErrorKind::ArgumentDecoding(_))));
        let err = import_value(&mut heap, &ExportedValue::string("x"), &StaticType::Bool).unwrap_err();
        assert!(matches!(err.user_kind(), Some(UserErrorKind::ArgumentDecoding(_))));
    }

    #[test]
    fn test_resources_cannot_be_imported() {
        let ledger = MemoryLedger::new();
        let mut heap = Heap::new(&ledger, 4);
        let exported = ExportedValue::Composite {
            type_id: "S.test.R".to_string(),
            kind: CompositeKind::Resource,
            fields: vec![],
        };
        let err = import_value(&mut heap, &exported, &StaticType::AnyStruct).unwrap_err();
        assert!(matches!(err.user_kind(), Some(UserErrorKind::ArgumentDecoding(_))));
    }

    #[test]
    fn test_type_ids_are_parsed() {
        let ty = composite_type_of("A.0000000000000001.Token.Vault", CompositeKind::Resource).unwrap();
        assert_eq!(ty.location, Location::address(Address::from_u64(1), "Token"));
        assert_eq!(ty.qualified, "Token.Vault");
        let ty = composite_type_of("s.abc.S", CompositeKind::Struct).unwrap();
        assert_eq!(ty.location, Location::Script("abc".to_string()));
        assert_eq!(ty.type_id(), "s.abc.S");
    }

    #[test]
    fn test_exported_values_serialize() {
        let value = ExportedValue::some(ExportedValue::int(42));
        let json = serde_json::to_string(&value).unwrap();
        let back: ExportedValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }
}
