//! Runtime static types
//!
//! Static types are attached to every container slab and are used for
//! conformance checks after loading from storage, for casts and for borrow
//! authorization.

use std::collections::BTreeSet;
use std::fmt;

use ore_common::{Location, PathDomain};
use ore_syntax::ast::CompositeKind;
use serde::{Deserialize, Serialize};

use crate::value::number::IntegerKind;

/// Nominal type of a composite
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompositeType {
    pub location: Location,
    /// Qualified identifier inside the location, e.g. `Token.Vault`
    pub qualified: String,
    pub kind: CompositeKind,
}

impl CompositeType {
    pub fn new<S: Into<String>>(location: Location, qualified: S, kind: CompositeKind) -> Self {
        Self {
            location,
            qualified: qualified.into(),
            kind,
        }
    }

    pub fn type_id(&self) -> String {
        self.location.type_id(&self.qualified)
    }

    /// Last segment of the qualified identifier
    pub fn name(&self) -> &str {
        self.qualified.rsplit('.').next().unwrap_or(&self.qualified)
    }
}

/// Entitlements granted by a reference or capability
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Authorization {
    #[default]
    Unauthorized,
    Entitlements(BTreeSet<String>),
    /// Full access held by the owner of a value, e.g. `self` inside a
    /// resource method
    Owner,
}

impl Authorization {
    /// Build an authorization from entitlement names. Qualified names are
    /// normalized to their last segment.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        let set: BTreeSet<String> = names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                name.rsplit('.').next().unwrap_or(name).to_string()
            })
            .collect();
        if set.is_empty() {
            Authorization::Unauthorized
        } else {
            Authorization::Entitlements(set)
        }
    }

    pub fn is_authorized(&self) -> bool {
        match self {
            Authorization::Unauthorized => false,
            Authorization::Entitlements(set) => !set.is_empty(),
            Authorization::Owner => true,
        }
    }

    fn entitlements(&self) -> BTreeSet<String> {
        match self {
            Authorization::Unauthorized | Authorization::Owner => BTreeSet::new(),
            Authorization::Entitlements(set) => set.clone(),
        }
    }

    /// Whether `requested` is covered by this authorization
    pub fn permits(&self, requested: &Authorization) -> bool {
        match (self, requested) {
            (Authorization::Owner, _) => true,
            (_, Authorization::Owner) => false,
            _ => requested.entitlements().is_subset(&self.entitlements()),
        }
    }

    /// Whether any of `names` is granted
    pub fn grants_any<S: AsRef<str>>(&self, names: &[S]) -> bool {
        match self {
            Authorization::Owner => true,
            Authorization::Unauthorized => names.is_empty(),
            Authorization::Entitlements(set) => {
                names.is_empty() || names.iter().any(|name| set.contains(name.as_ref()))
            }
        }
    }

    pub fn intersect(&self, other: &Authorization) -> Authorization {
        match (self, other) {
            (Authorization::Owner, other) | (other, Authorization::Owner) => return other.clone(),
            _ => {}
        }
        let set: BTreeSet<String> = self
            .entitlements()
            .intersection(&other.entitlements())
            .cloned()
            .collect();
        if set.is_empty() {
            Authorization::Unauthorized
        } else {
            Authorization::Entitlements(set)
        }
    }
}

impl fmt::Display for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Authorization::Unauthorized | Authorization::Owner => Ok(()),
            Authorization::Entitlements(set) => {
                let names: Vec<&str> = set.iter().map(String::as_str).collect();
                write!(f, "auth({}) ", names.join(", "))
            }
        }
    }
}

/// Path type hierarchy: `Path` > `StoragePath`, `CapabilityPath` >
/// `PublicPath`, `PrivatePath`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathType {
    Any,
    Storage,
    Capability,
    Public,
    Private,
}

impl PathType {
    pub fn of(domain: PathDomain) -> Self {
        match domain {
            PathDomain::Storage => PathType::Storage,
            PathDomain::Public => PathType::Public,
            PathDomain::Private => PathType::Private,
        }
    }

    fn is_subtype(self, other: PathType) -> bool {
        match (self, other) {
            (a, b) if a == b => true,
            (_, PathType::Any) => true,
            (PathType::Public | PathType::Private, PathType::Capability) => true,
            _ => false,
        }
    }

    fn name(self) -> &'static str {
        match self {
            PathType::Any => "Path",
            PathType::Storage => "StoragePath",
            PathType::Capability => "CapabilityPath",
            PathType::Public => "PublicPath",
            PathType::Private => "PrivatePath",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StaticType {
    Never,
    Void,
    AnyStruct,
    AnyResource,
    Bool,
    String,
    Address,
    Integer(IntegerKind),
    Fix64,
    UFix64,
    Path(PathType),
    Optional(Box<StaticType>),
    Array(Box<StaticType>),
    Dictionary(Box<StaticType>, Box<StaticType>),
    Composite(CompositeType),
    Reference {
        authorization: Authorization,
        referenced: Box<StaticType>,
    },
    Capability(Option<Box<StaticType>>),
    StorageCapabilityController,
    AccountCapabilityController,
    Function,
    MetaType,
    Account,
    HashAlgorithm,
    SignatureAlgorithm,
    PublicKey,
    Bls,
}

impl StaticType {
    /// Built-in type by name
    pub fn builtin(name: &str) -> Option<StaticType> {
        if let Some(kind) = IntegerKind::from_name(name) {
            return Some(StaticType::Integer(kind));
        }
        Some(match name {
            "Never" => StaticType::Never,
            "Void" => StaticType::Void,
            "AnyStruct" => StaticType::AnyStruct,
            "AnyResource" => StaticType::AnyResource,
            "Bool" => StaticType::Bool,
            "String" => StaticType::String,
            "Address" => StaticType::Address,
            "Fix64" => StaticType::Fix64,
            "UFix64" => StaticType::UFix64,
            "Path" => StaticType::Path(PathType::Any),
            "StoragePath" => StaticType::Path(PathType::Storage),
            "CapabilityPath" => StaticType::Path(PathType::Capability),
            "PublicPath" => StaticType::Path(PathType::Public),
            "PrivatePath" => StaticType::Path(PathType::Private),
            "Capability" => StaticType::Capability(None),
            "StorageCapabilityController" => StaticType::StorageCapabilityController,
            "AccountCapabilityController" => StaticType::AccountCapabilityController,
            "Type" => StaticType::MetaType,
            "Account" => StaticType::Account,
            "HashAlgorithm" => StaticType::HashAlgorithm,
            "SignatureAlgorithm" => StaticType::SignatureAlgorithm,
            "PublicKey" => StaticType::PublicKey,
            "BLS" => StaticType::Bls,
            _ => return None,
        })
    }

    pub fn optional(inner: StaticType) -> Self {
        StaticType::Optional(Box::new(inner))
    }

    pub fn array(element: StaticType) -> Self {
        StaticType::Array(Box::new(element))
    }

    pub fn dictionary(key: StaticType, value: StaticType) -> Self {
        StaticType::Dictionary(Box::new(key), Box::new(value))
    }

    pub fn reference(authorization: Authorization, referenced: StaticType) -> Self {
        StaticType::Reference {
            authorization,
            referenced: Box::new(referenced),
        }
    }

    /// `[UInt8]`
    pub fn bytes() -> Self {
        StaticType::array(StaticType::Integer(IntegerKind::UInt8))
    }

    /// Whether values of this type are resource-kinded
    pub fn is_resource(&self) -> bool {
        match self {
            StaticType::AnyResource => true,
            StaticType::Composite(composite) => composite.kind == CompositeKind::Resource,
            StaticType::Optional(inner) | StaticType::Array(inner) => inner.is_resource(),
            StaticType::Dictionary(_, value) => value.is_resource(),
            _ => false,
        }
    }

    /// The type without any optional wrapping
    pub fn unwrap_optional(&self) -> &StaticType {
        match self {
            StaticType::Optional(inner) => inner.unwrap_optional(),
            other => other,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, StaticType::Integer(_) | StaticType::Fix64 | StaticType::UFix64)
    }

    /// Element type of an array type
    pub fn element(&self) -> Option<&StaticType> {
        match self {
            StaticType::Array(element) => Some(element),
            _ => None,
        }
    }

    /// Type identifier as reported by `Type.identifier`
    pub fn id(&self) -> String {
        self.to_string()
    }

    /// Subtyping between static types
    pub fn is_subtype(&self, other: &StaticType) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (StaticType::Never, _) => true,
            (_, StaticType::AnyStruct) => !self.is_resource(),
            (_, StaticType::AnyResource) => self.is_resource(),
            (StaticType::Optional(a), StaticType::Optional(b)) => a.is_subtype(b),
            (_, StaticType::Optional(b)) => self.is_subtype(b),
            (StaticType::Array(a), StaticType::Array(b)) => a.is_subtype(b),
            (StaticType::Dictionary(ka, va), StaticType::Dictionary(kb, vb)) => {
                ka.is_subtype(kb) && va.is_subtype(vb)
            }
            (StaticType::Path(a), StaticType::Path(b)) => a.is_subtype(*b),
            (
                StaticType::Reference {
                    authorization: auth_a,
                    referenced: ref_a,
                },
                StaticType::Reference {
                    authorization: auth_b,
                    referenced: ref_b,
                },
            ) => auth_a.permits(auth_b) && ref_a.is_subtype(ref_b),
            (StaticType::Capability(_), StaticType::Capability(None)) => true,
            (StaticType::Capability(Some(a)), StaticType::Capability(Some(b))) => a.is_subtype(b),
            _ => false,
        }
    }
}

impl fmt::Display for StaticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaticType::Never => write!(f, "Never"),
            StaticType::Void => write!(f, "Void"),
            StaticType::AnyStruct => write!(f, "AnyStruct"),
            StaticType::AnyResource => write!(f, "AnyResource"),
            StaticType::Bool => write!(f, "Bool"),
            StaticType::String => write!(f, "String"),
            StaticType::Address => write!(f, "Address"),
            StaticType::Integer(kind) => write!(f, "{}", kind),
            StaticType::Fix64 => write!(f, "Fix64"),
            StaticType::UFix64 => write!(f, "UFix64"),
            StaticType::Path(path) => write!(f, "{}", path.name()),
            StaticType::Optional(inner) => write!(f, "{}?", inner),
            StaticType::Array(element) => write!(f, "[{}]", element),
            StaticType::Dictionary(key, value) => write!(f, "{{{}: {}}}", key, value),
            StaticType::Composite(composite) => write!(f, "{}", composite.type_id()),
            StaticType::Reference {
                authorization,
                referenced,
            } => write!(f, "{}&{}", authorization, referenced),
            StaticType::Capability(None) => write!(f, "Capability"),
            StaticType::Capability(Some(borrow)) => write!(f, "Capability<{}>", borrow),
            StaticType::StorageCapabilityController => write!(f, "StorageCapabilityController"),
            StaticType::AccountCapabilityController => write!(f, "AccountCapabilityController"),
            StaticType::Function => write!(f, "Function"),
            StaticType::MetaType => write!(f, "Type"),
            StaticType::Account => write!(f, "Account"),
            StaticType::HashAlgorithm => write!(f, "HashAlgorithm"),
            StaticType::SignatureAlgorithm => write!(f, "SignatureAlgorithm"),
            StaticType::PublicKey => write!(f, "PublicKey"),
            StaticType::Bls => write!(f, "BLS"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ore_common::Address;
    use pretty_assertions::assert_eq;

    fn vault() -> StaticType {
        StaticType::Composite(CompositeType::new(
            Location::address(Address::from_u64(1), "Token"),
            "Token.Vault",
            CompositeKind::Resource,
        ))
    }

    #[test]
    fn test_type_ids() {
        assert_eq!(vault().to_string(), "A.0000000000000001.Token.Vault");
        let reference = StaticType::reference(Authorization::from_names(&["Token.Withdraw"]), vault());
        assert_eq!(reference.to_string(), "auth(Withdraw) &A.0000000000000001.Token.Vault");
        assert_eq!(
            StaticType::dictionary(StaticType::String, StaticType::optional(StaticType::UFix64)).to_string(),
            "{String: UFix64?}"
        );
    }

    #[test]
    fn test_resource_kinds() {
        assert!(vault().is_resource());
        assert!(StaticType::array(StaticType::optional(vault())).is_resource());
        assert!(!StaticType::reference(Authorization::Unauthorized, vault()).is_resource());
        assert!(vault().is_subtype(&StaticType::AnyResource));
        assert!(!vault().is_subtype(&StaticType::AnyStruct));
    }

    #[test]
    fn test_reference_subtyping_follows_entitlements() {
        let withdraw = StaticType::reference(Authorization::from_names(&["Withdraw"]), vault());
        let plain = StaticType::reference(Authorization::Unauthorized, vault());
        assert!(withdraw.is_subtype(&plain));
        assert!(!plain.is_subtype(&withdraw));
    }

    #[test]
    fn test_authorization_intersection() {
        let a = Authorization::from_names(&["A", "B"]);
        let b = Authorization::from_names(&["B", "C"]);
        assert_eq!(a.intersect(&b), Authorization::from_names(&["B"]));
        assert!(a.permits(&Authorization::Unauthorized));
        assert!(!Authorization::Unauthorized.permits(&a));
    }

    #[test]
    fn test_owner_authorization() {
        let a = Authorization::from_names(&["A"]);
        assert!(Authorization::Owner.permits(&a));
        assert!(!a.permits(&Authorization::Owner));
        assert_eq!(Authorization::Owner.intersect(&a), a);
        assert!(Authorization::Owner.grants_any(&["Withdraw"]));
        assert!(!Authorization::Unauthorized.grants_any(&["Withdraw"]));
        assert!(a.grants_any(&["B", "A"]));
    }

    #[test]
    fn test_path_subtyping() {
        let public = StaticType::Path(PathType::Public);
        assert!(public.is_subtype(&StaticType::Path(PathType::Capability)));
        assert!(public.is_subtype(&StaticType::Path(PathType::Any)));
        assert!(!public.is_subtype(&StaticType::Path(PathType::Storage)));
    }
}
