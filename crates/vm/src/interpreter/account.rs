//! Account API
//!
//! An account is reached through an [`AccountHandle`]: the address, the
//! authorization it was obtained with and the section of the API it
//! exposes (`account.storage`, `account.capabilities.storage`, ...). Handles
//! without authorization expose only reading members.
//!
//! Capabilities resolve either through a controller record in the
//! `cap_con` domain (`CapabilityValue::Id`) or through a legacy link stored
//! at a capability path (`CapabilityValue::Path`). Borrowing yields storage
//! references, which re-resolve their path on every access.

use std::sync::Arc;

use ore_common::{Address, Location, Path, PathDomain};
use ore_syntax::ast::CompositeKind;
use ore_syntax::{parse_and_check, Program};
use sha3::{Digest, Sha3_256};
use tracing::debug;

use crate::crypto::AccountKeyInfo;
use crate::environment::CodeChange;
use crate::error::{Error, Result, UserErrorKind};
use crate::export::ExportedValue;
use crate::heap::{CONTRACT_DOMAIN, CONTROLLER_DOMAIN, PUBLIC_DOMAIN, STORAGE_DOMAIN};
use crate::interface::Event;
use crate::types::{Authorization, CompositeType, PathType, StaticType};
use crate::value::{
    AccountHandle, AccountSection, CapabilityValue, ControllerTarget, ControllerValue, FunctionValue, IntegerKind,
    IntegerValue, LinkValue, ReferenceValue, Value,
};

use super::invocation::{arguments, index_argument, integer_argument, path_argument, string_argument, type_argument};
use super::members::MemberAccessible;
use super::{builtin_location, Interpreter};

pub const ACCOUNT_CREATED: &str = "flow.AccountCreated";
pub const CONTRACT_ADDED: &str = "flow.AccountContractAdded";
pub const CONTRACT_UPDATED: &str = "flow.AccountContractUpdated";
pub const CONTRACT_REMOVED: &str = "flow.AccountContractRemoved";

/// Authorization of signer accounts and newly created accounts
pub(crate) fn full_authorization() -> Authorization {
    Authorization::from_names(&["Storage", "Contracts", "Keys", "Inbox", "Capabilities"])
}

/// Entitlements any one of which unlocks an account function
fn required_entitlements(function: &str) -> &'static [&'static str] {
    match function {
        "storage.save" => &["Storage", "SaveValue"],
        "storage.load" => &["Storage", "LoadValue"],
        "storage.copy" | "storage.borrow" | "storage.type" | "storage.check" | "storage.storagePaths" => {
            &["Storage", "BorrowValue"]
        }
        "legacy.link" | "legacy.unlink" | "legacy.getLinkTarget" => &["Capabilities", "Storage"],
        "contracts.add" => &["Contracts", "AddContract"],
        "contracts.update" => &["Contracts", "UpdateContract"],
        "contracts.remove" => &["Contracts", "RemoveContract"],
        "keys.add" => &["Keys", "AddKey"],
        "keys.revoke" => &["Keys", "RevokeKey"],
        "capabilities.storage.issue" | "capabilities.storage.getController" | "capabilities.storage.getControllers" => {
            &["Capabilities", "StorageCapabilities", "IssueStorageCapabilityController"]
        }
        "controller.delete" => &["Capabilities", "StorageCapabilities", "IssueStorageCapabilityController"],
        "capabilities.account.issue" => &["Capabilities", "AccountCapabilities", "IssueAccountCapabilityController"],
        "capabilities.publish" => &["Capabilities", "PublishCapability"],
        "capabilities.unpublish" => &["Capabilities", "UnpublishCapability"],
        _ => &[],
    }
}

impl MemberAccessible for AccountHandle {
    fn get_member(&self, interpreter: &mut Interpreter<'_>, name: &str) -> Result<Option<Value>> {
        use AccountSection::*;
        let address = self.address;
        let section = |section| Ok(Some(Value::Account(self.section(section))));
        let function = match (self.section, name) {
            (Root, "address") => return Ok(Some(Value::Address(address))),
            (Root, "balance") => {
                let balance = interpreter
                    .env
                    .call("get_account_balance", |interface| interface.get_account_balance(address))?;
                return Ok(Some(Value::UFix64(balance)));
            }
            (Root, "availableBalance") => {
                let balance = interpreter.env.call("get_account_available_balance", |interface| {
                    interface.get_account_available_balance(address)
                })?;
                return Ok(Some(Value::UFix64(balance)));
            }
            (Root, "storageUsed") | (Storage, "used") => {
                let used = interpreter
                    .env
                    .call("get_storage_used", |interface| interface.get_storage_used(address))?;
                return Ok(Some(Value::Integer(IntegerValue::uint64(used))));
            }
            (Root, "storageCapacity") | (Storage, "capacity") => {
                let capacity = interpreter
                    .env
                    .call("get_storage_capacity", |interface| interface.get_storage_capacity(address))?;
                return Ok(Some(Value::Integer(IntegerValue::uint64(capacity))));
            }
            (Root, "storage") => return section(Storage),
            (Root, "contracts") => return section(Contracts),
            (Root, "keys") => return section(Keys),
            (Root, "capabilities") => return section(Capabilities),
            (Capabilities, "storage") => return section(StorageCapabilities),
            (Capabilities, "account") => return section(AccountCapabilities),
            (Contracts, "names") => {
                let names = interpreter.env.contract_names(address)?;
                let names = names.into_iter().map(Value::String).collect();
                return interpreter.new_array(StaticType::String, names).map(Some);
            }
            (Root | Storage, "storagePaths") => {
                if !self.authorization.grants_any(required_entitlements("storage.storagePaths")) {
                    return Ok(None);
                }
                return interpreter.stored_paths(address, STORAGE_DOMAIN).map(Some);
            }
            (Root | Storage, "publicPaths") => return interpreter.stored_paths(address, PUBLIC_DOMAIN).map(Some),
            (Root | Storage, "save" | "load" | "copy" | "borrow" | "type" | "check") => format!("storage.{}", name),
            (Root, "link" | "unlink" | "getLinkTarget" | "getCapability") => format!("legacy.{}", name),
            (Contracts, "update__experimental") => "contracts.update".to_string(),
            (Contracts, "add" | "update" | "remove" | "get") => format!("contracts.{}", name),
            (Keys, "add" | "revoke" | "get") => format!("keys.{}", name),
            (Capabilities, "get" | "borrow" | "publish" | "unpublish" | "exists") => format!("capabilities.{}", name),
            (StorageCapabilities, "issue" | "getController" | "getControllers") => {
                format!("capabilities.storage.{}", name)
            }
            (AccountCapabilities, "issue") => "capabilities.account.issue".to_string(),
            _ => return Ok(None),
        };
        let required = required_entitlements(&function);
        if !self.authorization.grants_any(required) {
            if !self.is_authorized() {
                return Ok(None);
            }
            return Err(UserErrorKind::AccessDenied {
                member: name.to_string(),
                required: required.join(" | "),
            }
            .into());
        }
        Ok(Some(Value::Function(FunctionValue::bound(
            format!("Account.{}", function),
            Value::Account(self.clone()),
        ))))
    }
}

/// Parameter types of an account function
pub(crate) fn parameter_types(function: &str) -> Vec<StaticType> {
    let storage_path = StaticType::Path(PathType::Storage);
    let public_path = StaticType::Path(PathType::Public);
    match function {
        "storage.save" => vec![StaticType::AnyStruct, storage_path],
        "storage.load" | "storage.copy" | "storage.borrow" | "storage.type" | "storage.check" => vec![storage_path],
        "legacy.link" => vec![StaticType::Path(PathType::Capability), StaticType::Path(PathType::Any)],
        "legacy.unlink" | "legacy.getLinkTarget" | "legacy.getCapability" => vec![StaticType::Path(PathType::Capability)],
        "contracts.add" | "contracts.update" => vec![StaticType::String, StaticType::bytes()],
        "contracts.remove" | "contracts.get" => vec![StaticType::String],
        "keys.add" => vec![StaticType::PublicKey, StaticType::HashAlgorithm, StaticType::UFix64],
        "keys.revoke" | "keys.get" => vec![StaticType::Integer(IntegerKind::Int)],
        "capabilities.get" | "capabilities.borrow" | "capabilities.unpublish" | "capabilities.exists" => {
            vec![public_path]
        }
        "capabilities.publish" => vec![StaticType::Capability(None), public_path],
        "capabilities.storage.issue" | "capabilities.storage.getControllers" => vec![storage_path],
        "capabilities.storage.getController" => vec![StaticType::Integer(IntegerKind::UInt64)],
        _ => Vec::new(),
    }
}

fn domain_path(value: Value, domain: PathDomain) -> Result<Path> {
    let path = path_argument(value)?;
    if path.domain != domain {
        return Err(UserErrorKind::InvalidArgument(format!("{} is not a {} path", path, domain.identifier())).into());
    }
    Ok(path)
}

/// Split a reference type into its authorization and referenced type
fn reference_parts(ty: &StaticType) -> Result<(Authorization, StaticType)> {
    match ty {
        StaticType::Reference {
            authorization,
            referenced,
        } => Ok((authorization.clone(), (**referenced).clone())),
        other => Err(UserErrorKind::InvalidArgument(format!("expected a reference type, found `{}`", other)).into()),
    }
}

fn code_hash(code: &str) -> ExportedValue {
    let digest = Sha3_256::digest(code.as_bytes());
    ExportedValue::Array(
        digest
            .iter()
            .map(|b| {
                ExportedValue::Integer(IntegerValue {
                    kind: IntegerKind::UInt8,
                    value: (*b).into(),
                })
            })
            .collect(),
    )
}

impl<'a> Interpreter<'a> {
    pub(crate) fn call_account(
        &mut self,
        function: &str,
        handle: AccountHandle,
        values: Vec<Value>,
        type_arguments: &[StaticType],
    ) -> Result<Value> {
        let address = handle.address;
        match function {
            // Storage
            "storage.save" => {
                let [value, path] = arguments::<2>(values)?;
                let path = domain_path(path, PathDomain::Storage)?;
                if self.heap.read_path(address, &path)?.is_some() {
                    return Err(UserErrorKind::Overwrite {
                        address: address.to_string(),
                        path: path.to_string(),
                    }
                    .into());
                }
                self.heap.check_storable(&value)?;
                let value = self.heap.transfer(value, address, true)?;
                self.heap.domain_set(address, STORAGE_DOMAIN, &path.identifier, value)?;
                debug!(%address, %path, "Saved value");
                Ok(Value::Void)
            }
            "storage.load" => {
                let [path] = arguments::<1>(values)?;
                let path = domain_path(path, PathDomain::Storage)?;
                let ty = type_argument(type_arguments, "load")?;
                let Some(value) = self.heap.read_path(address, &path)? else {
                    return Ok(Value::Nil);
                };
                if !self.deep_conforms(&value, &ty)? {
                    return Err(self.mismatch(&ty, &value)?);
                }
                self.heap.domain_remove(address, STORAGE_DOMAIN, &path.identifier)?;
                debug!(%address, %path, "Loaded value");
                Ok(Value::some(self.take_out(value)?))
            }
            "storage.copy" => {
                let [path] = arguments::<1>(values)?;
                let path = domain_path(path, PathDomain::Storage)?;
                let ty = type_argument(type_arguments, "copy")?;
                let Some(value) = self.heap.read_path(address, &path)? else {
                    return Ok(Value::Nil);
                };
                if self.heap.is_resource(&value)? {
                    return Err(UserErrorKind::InvalidMove(format!("the resource at {} cannot be copied", path)).into());
                }
                if !self.deep_conforms(&value, &ty)? {
                    return Err(self.mismatch(&ty, &value)?);
                }
                Ok(Value::some(self.heap.copy_value(&value, Address::ZERO)?))
            }
            "storage.borrow" => {
                let [path] = arguments::<1>(values)?;
                let path = domain_path(path, PathDomain::Storage)?;
                let (authorization, referenced) = reference_parts(&type_argument(type_arguments, "borrow")?)?;
                Ok(self
                    .storage_reference(address, &path, authorization, referenced)?
                    .map(Value::some)
                    .unwrap_or(Value::Nil))
            }
            "storage.type" => {
                let [path] = arguments::<1>(values)?;
                let path = domain_path(path, PathDomain::Storage)?;
                match self.heap.read_path(address, &path)? {
                    Some(value) => Ok(Value::some(Value::Type(self.heap.static_type(&value)?))),
                    None => Ok(Value::Nil),
                }
            }
            "storage.check" => {
                let [path] = arguments::<1>(values)?;
                let path = domain_path(path, PathDomain::Storage)?;
                let ty = type_argument(type_arguments, "check")?;
                match self.heap.read_path(address, &path)? {
                    Some(value) => Ok(Value::Bool(self.deep_conforms(&value, &ty)?)),
                    None => Ok(Value::Bool(false)),
                }
            }

            // Links
            "legacy.link" => {
                let [path, target] = arguments::<2>(values)?;
                let path = path_argument(path)?;
                let target = path_argument(target)?;
                if !path.domain.is_capability() {
                    return Err(UserErrorKind::InvalidArgument(format!("cannot link at {}", path)).into());
                }
                let borrow = type_argument(type_arguments, "link")?;
                reference_parts(&borrow)?;
                if self.heap.read_path(address, &path)?.is_some() {
                    return Ok(Value::Nil);
                }
                let link = Value::Link(LinkValue {
                    target,
                    borrow: borrow.clone(),
                });
                self.heap.domain_set(address, path.domain.identifier(), &path.identifier, link)?;
                Ok(Value::some(Value::Capability(CapabilityValue::Path { address, path, borrow })))
            }
            "legacy.unlink" => {
                let [path] = arguments::<1>(values)?;
                let path = path_argument(path)?;
                if let Some(Value::Link(_)) = self.heap.read_path(address, &path)? {
                    self.heap.domain_remove(address, path.domain.identifier(), &path.identifier)?;
                }
                Ok(Value::Void)
            }
            "legacy.getLinkTarget" => {
                let [path] = arguments::<1>(values)?;
                let path = path_argument(path)?;
                match self.heap.read_path(address, &path)? {
                    Some(Value::Link(link)) => Ok(Value::some(Value::Path(link.target))),
                    _ => Ok(Value::Nil),
                }
            }
            "legacy.getCapability" => {
                let [path] = arguments::<1>(values)?;
                let path = path_argument(path)?;
                let borrow = type_arguments
                    .first()
                    .cloned()
                    .unwrap_or_else(|| StaticType::reference(Authorization::Unauthorized, StaticType::AnyStruct));
                Ok(Value::Capability(CapabilityValue::Path { address, path, borrow }))
            }

            // Capability controllers
            "capabilities.storage.issue" => {
                let [path] = arguments::<1>(values)?;
                let path = domain_path(path, PathDomain::Storage)?;
                let borrow = type_argument(type_arguments, "issue")?;
                reference_parts(&borrow)?;
                self.issue_capability(address, borrow, ControllerTarget::Storage(path))
            }
            "capabilities.account.issue" => {
                let [] = arguments::<0>(values)?;
                let borrow = type_argument(type_arguments, "issue")?;
                let (_, referenced) = reference_parts(&borrow)?;
                if referenced != StaticType::Account {
                    return Err(UserErrorKind::InvalidArgument(format!(
                        "account capabilities must borrow `&Account`, not `{}`",
                        borrow
                    ))
                    .into());
                }
                self.issue_capability(address, borrow, ControllerTarget::Account)
            }
            "capabilities.storage.getController" => {
                let [id] = arguments::<1>(values)?;
                let id = integer_argument(id)?.to_u64().unwrap_or(0);
                match self.controller(address, id)? {
                    Some(controller) if matches!(controller.target, ControllerTarget::Storage(_)) => {
                        Ok(Value::some(Value::Controller(ControllerValue {
                            handle: handle.authorization.clone(),
                            ..controller
                        })))
                    }
                    _ => Ok(Value::Nil),
                }
            }
            "capabilities.storage.getControllers" => {
                let [path] = arguments::<1>(values)?;
                let path = domain_path(path, PathDomain::Storage)?;
                let mut controllers: Vec<ControllerValue> = self
                    .heap
                    .domain_entries(address, CONTROLLER_DOMAIN)?
                    .into_iter()
                    .filter_map(|(_, value)| match value {
                        Value::Controller(controller) => Some(controller),
                        _ => None,
                    })
                    .filter(|controller| controller.target == ControllerTarget::Storage(path.clone()))
                    .collect();
                controllers.sort_by_key(|controller| controller.id);
                let controllers = controllers
                    .into_iter()
                    .map(|controller| {
                        Value::Controller(ControllerValue {
                            handle: handle.authorization.clone(),
                            ..controller
                        })
                    })
                    .collect();
                self.new_array(StaticType::StorageCapabilityController, controllers)
            }
            "capabilities.publish" => {
                let [capability, path] = arguments::<2>(values)?;
                let path = domain_path(path, PathDomain::Public)?;
                let Value::Capability(capability) = capability else {
                    return Err(self.mismatch(&StaticType::Capability(None), &capability)?);
                };
                if capability.address() != address {
                    return Err(UserErrorKind::InvalidArgument(format!(
                        "cannot publish a capability of {} in account {}",
                        capability.address(),
                        address
                    ))
                    .into());
                }
                if self.heap.read_path(address, &path)?.is_some() {
                    return Err(UserErrorKind::Overwrite {
                        address: address.to_string(),
                        path: path.to_string(),
                    }
                    .into());
                }
                self.heap
                    .domain_set(address, PUBLIC_DOMAIN, &path.identifier, Value::Capability(capability))?;
                debug!(%address, %path, "Published capability");
                Ok(Value::Void)
            }
            "capabilities.unpublish" => {
                let [path] = arguments::<1>(values)?;
                let path = domain_path(path, PathDomain::Public)?;
                match self.heap.read_path(address, &path)? {
                    Some(Value::Capability(capability)) => {
                        self.heap.domain_remove(address, PUBLIC_DOMAIN, &path.identifier)?;
                        Ok(Value::some(Value::Capability(capability)))
                    }
                    _ => Ok(Value::Nil),
                }
            }
            "capabilities.get" => {
                let [path] = arguments::<1>(values)?;
                let path = domain_path(path, PathDomain::Public)?;
                Ok(self
                    .published_capability(address, &path, type_arguments.first())?
                    .map(|capability| Value::some(Value::Capability(capability)))
                    .unwrap_or(Value::Nil))
            }
            "capabilities.borrow" => {
                let [path] = arguments::<1>(values)?;
                let path = domain_path(path, PathDomain::Public)?;
                let requested = type_argument(type_arguments, "borrow")?;
                let Some(capability) = self.published_capability(address, &path, Some(&requested))? else {
                    return Ok(Value::Nil);
                };
                Ok(self
                    .borrow_capability(&capability, Some(requested))?
                    .map(Value::some)
                    .unwrap_or(Value::Nil))
            }
            "capabilities.exists" => {
                let [path] = arguments::<1>(values)?;
                let path = domain_path(path, PathDomain::Public)?;
                Ok(Value::Bool(self.heap.read_path(address, &path)?.is_some()))
            }

            // Contracts
            "contracts.add" | "contracts.update" => {
                let mut values = values.into_iter();
                let (Some(name), Some(code)) = (values.next(), values.next()) else {
                    return Err(UserErrorKind::ArgumentCount { expected: 2, actual: 0 }.into());
                };
                let name = string_argument(name)?;
                let code = self.code_argument(code)?;
                if function == "contracts.add" {
                    self.deploy_contract(address, &name, code, values.collect())
                } else {
                    self.update_contract(address, &name, code)
                }
            }
            "contracts.remove" => {
                let [name] = arguments::<1>(values)?;
                let name = string_argument(name)?;
                let Some(code) = self.env.contract_code(address, &name)? else {
                    return Ok(Value::Nil);
                };
                self.env.stage_code(address, &name, CodeChange::Remove);
                if let Some(contract) = self.heap.domain_remove(address, CONTRACT_DOMAIN, &name)? {
                    self.heap.remove_value(&contract)?;
                }
                self.emit_contract_event(CONTRACT_REMOVED, address, &name, &code)?;
                Ok(Value::some(self.deployed_contract(address, &name, &code)?))
            }
            "contracts.get" => {
                let [name] = arguments::<1>(values)?;
                let name = string_argument(name)?;
                match self.env.contract_code(address, &name)? {
                    Some(code) => Ok(Value::some(self.deployed_contract(address, &name, &code)?)),
                    None => Ok(Value::Nil),
                }
            }

            // Keys
            "keys.add" => {
                let [public_key, hash_algorithm, weight] = arguments::<3>(values)?;
                let Value::PublicKey(public_key) = public_key else {
                    return Err(self.mismatch(&StaticType::PublicKey, &public_key)?);
                };
                let Value::HashAlgorithm(hash_algorithm) = hash_algorithm else {
                    return Err(self.mismatch(&StaticType::HashAlgorithm, &hash_algorithm)?);
                };
                let Value::UFix64(weight) = weight else {
                    return Err(self.mismatch(&StaticType::UFix64, &weight)?);
                };
                let key = self.env.call("add_account_key", |interface| {
                    interface.add_account_key(address, &public_key, hash_algorithm, weight)
                })?;
                self.account_key(key)
            }
            "keys.revoke" | "keys.get" => {
                let [index] = arguments::<1>(values)?;
                let index = u32::try_from(index_argument(index)?).map_err(|_| UserErrorKind::Overflow)?;
                let key = if function == "keys.revoke" {
                    self.env
                        .call("revoke_account_key", |interface| interface.revoke_account_key(address, index))?
                } else {
                    self.env
                        .call("get_account_key", |interface| interface.get_account_key(address, index))?
                };
                match key {
                    Some(key) => Ok(Value::some(self.account_key(key)?)),
                    None => Ok(Value::Nil),
                }
            }
            other => Err(Error::unreachable(format!("unknown account function `{}`", other))),
        }
    }

    fn stored_paths(&mut self, address: Address, domain: &str) -> Result<Value> {
        let (path_type, path_domain) = if domain == STORAGE_DOMAIN {
            (PathType::Storage, PathDomain::Storage)
        } else {
            (PathType::Public, PathDomain::Public)
        };
        let paths = self
            .heap
            .domain_entries(address, domain)?
            .into_iter()
            .map(|(identifier, _)| Value::Path(Path::new(path_domain, identifier)))
            .collect();
        self.new_array(StaticType::Path(path_type), paths)
    }

    /// Storage reference to the value at `path`, `None` if nothing of the
    /// referenced type is stored there
    fn storage_reference(
        &mut self,
        address: Address,
        path: &Path,
        authorization: Authorization,
        referenced: StaticType,
    ) -> Result<Option<Value>> {
        let Some(value) = self.heap.read_path(address, path)? else {
            return Ok(None);
        };
        if !self.deep_conforms(&value, &referenced)? {
            return Ok(None);
        }
        Ok(Some(Value::Reference(ReferenceValue::Storage {
            address,
            path: path.clone(),
            authorization,
            borrowed: referenced,
        })))
    }

    // Capabilities

    fn issue_capability(&mut self, address: Address, borrow: StaticType, target: ControllerTarget) -> Result<Value> {
        let id = self.heap.next_capability_id(address)?;
        let controller = ControllerValue {
            address,
            id,
            borrow: borrow.clone(),
            target,
            handle: Authorization::Unauthorized,
        };
        self.heap
            .domain_set(address, CONTROLLER_DOMAIN, &id.to_string(), Value::Controller(controller))?;
        debug!(%address, id, %borrow, "Issued capability");
        Ok(Value::Capability(CapabilityValue::Id { address, id, borrow }))
    }

    fn controller(&mut self, address: Address, id: u64) -> Result<Option<ControllerValue>> {
        match self.heap.domain_get(address, CONTROLLER_DOMAIN, &id.to_string())? {
            Some(Value::Controller(controller)) => Ok(Some(controller)),
            _ => Ok(None),
        }
    }

    /// Capability published at a public path, typed as `requested` if its
    /// borrow type allows it
    fn published_capability(
        &mut self,
        address: Address,
        path: &Path,
        requested: Option<&StaticType>,
    ) -> Result<Option<CapabilityValue>> {
        match self.heap.read_path(address, path)? {
            Some(Value::Capability(capability)) => match requested {
                Some(requested) if !capability.borrow_type().is_subtype(requested) => Ok(None),
                Some(requested) => Ok(Some(match capability {
                    CapabilityValue::Id { address, id, .. } => CapabilityValue::Id {
                        address,
                        id,
                        borrow: requested.clone(),
                    },
                    CapabilityValue::Path { address, path, .. } => CapabilityValue::Path {
                        address,
                        path,
                        borrow: requested.clone(),
                    },
                })),
                None => Ok(Some(capability)),
            },
            Some(Value::Link(link)) => Ok(Some(CapabilityValue::Path {
                address,
                path: path.clone(),
                borrow: requested.cloned().unwrap_or(link.borrow),
            })),
            _ => Ok(None),
        }
    }

    /// Borrow a reference through a capability. The granted authorization
    /// is the intersection of the capability's and its controller's (or
    /// link's); requesting more fails.
    pub(crate) fn borrow_capability(
        &mut self,
        capability: &CapabilityValue,
        requested: Option<StaticType>,
    ) -> Result<Option<Value>> {
        let requested = requested.unwrap_or_else(|| capability.borrow_type().clone());
        let (wanted, referenced) = reference_parts(&requested)?;
        let (capability_authorization, _) = reference_parts(capability.borrow_type())?;
        match capability {
            CapabilityValue::Id { address, id, .. } => {
                let Some(controller) = self.controller(*address, *id)? else {
                    return Ok(None);
                };
                let (controller_authorization, _) = reference_parts(&controller.borrow)?;
                let granted = capability_authorization.intersect(&controller_authorization);
                check_granted(&granted, &wanted, &referenced, &requested)?;
                match controller.target {
                    ControllerTarget::Storage(path) => self.storage_reference(*address, &path, wanted, referenced),
                    ControllerTarget::Account if StaticType::Account.is_subtype(&referenced) => {
                        Ok(Some(Value::Account(AccountHandle::new(*address, wanted))))
                    }
                    ControllerTarget::Account => Ok(None),
                }
            }
            CapabilityValue::Path { address, path, .. } => match self.heap.read_path(*address, path)? {
                Some(Value::Link(link)) => {
                    let (link_authorization, _) = reference_parts(&link.borrow)?;
                    let granted = capability_authorization.intersect(&link_authorization);
                    check_granted(&granted, &wanted, &referenced, &requested)?;
                    if link.target.domain != PathDomain::Storage {
                        return Ok(None);
                    }
                    self.storage_reference(*address, &link.target, wanted, referenced)
                }
                // One hop only: a path capability never resolves through another one
                Some(Value::Capability(CapabilityValue::Path { .. })) => Ok(None),
                Some(Value::Capability(published)) => {
                    check_granted(&capability_authorization, &wanted, &referenced, &requested)?;
                    self.borrow_capability(&published, Some(requested))
                }
                _ => Ok(None),
            },
        }
    }

    pub(crate) fn call_capability(
        &mut self,
        function: &str,
        capability: CapabilityValue,
        values: Vec<Value>,
        type_arguments: &[StaticType],
    ) -> Result<Value> {
        let [] = arguments::<0>(values)?;
        let requested = type_arguments.first().cloned();
        match function {
            "borrow" => Ok(self
                .borrow_capability(&capability, requested)?
                .map(Value::some)
                .unwrap_or(Value::Nil)),
            "check" => match self.borrow_capability(&capability, requested) {
                Ok(borrowed) => Ok(Value::Bool(borrowed.is_some())),
                Err(err) if err.is_user() => Ok(Value::Bool(false)),
                Err(err) => Err(err),
            },
            other => Err(Error::unreachable(format!("unknown capability function `{}`", other))),
        }
    }

    pub(crate) fn call_controller(
        &mut self,
        function: &str,
        controller: ControllerValue,
        values: Vec<Value>,
    ) -> Result<Value> {
        let [] = arguments::<0>(values)?;
        match function {
            "target" => Ok(match controller.target {
                ControllerTarget::Storage(path) => Value::Path(path),
                ControllerTarget::Account => Value::Nil,
            }),
            "delete" => {
                let required = required_entitlements("controller.delete");
                if !controller.handle.grants_any(required) {
                    return Err(UserErrorKind::AccessDenied {
                        member: "delete".to_string(),
                        required: required.join(" | "),
                    }
                    .into());
                }
                self.heap
                    .domain_remove(controller.address, CONTROLLER_DOMAIN, &controller.id.to_string())?;
                debug!(address = %controller.address, id = controller.id, "Deleted capability controller");
                Ok(Value::Void)
            }
            other => Err(Error::unreachable(format!("unknown controller function `{}`", other))),
        }
    }

    // Contracts

    fn code_argument(&mut self, code: Value) -> Result<String> {
        match code {
            Value::String(code) => Ok(code),
            other => {
                let bytes = self.read_bytes(&other)?;
                String::from_utf8(bytes)
                    .map_err(|_| UserErrorKind::InvalidContractDeployment("code is not valid UTF-8".to_string()).into())
            }
        }
    }

    /// Parse and check contract code, which must declare the contract `name`
    fn check_contract(&mut self, address: Address, name: &str, code: &str) -> Result<Arc<Program>> {
        let location = Location::address(address, name);
        let program = parse_and_check(code, location)
            .map_err(|e| Error::from(UserErrorKind::InvalidContractDeployment(e.to_string())))?;
        match program.elaboration.contract() {
            Some(contract) if contract.name == name => Ok(program),
            Some(contract) => Err(UserErrorKind::InvalidContractDeployment(format!(
                "code declares contract `{}`, not `{}`",
                contract.name, name
            ))
            .into()),
            None => Err(UserErrorKind::InvalidContractDeployment(format!("code does not declare contract `{}`", name)).into()),
        }
    }

    fn deploy_contract(&mut self, address: Address, name: &str, code: String, arguments: Vec<Value>) -> Result<Value> {
        if self.env.contract_code(address, name)?.is_some() {
            return Err(UserErrorKind::InvalidContractDeployment(format!(
                "contract `{}` already exists in account {}",
                name, address
            ))
            .into());
        }
        let program = self.check_contract(address, name, &code)?;
        let Some(decl) = program.elaboration.contract().cloned() else {
            return Err(Error::unreachable("checked contract program without a contract"));
        };
        self.env.pin(program.clone());
        self.env.stage_code(address, name, CodeChange::Update(code.clone()));

        let ty = CompositeType::new(program.location.clone(), name, CompositeKind::Contract);
        let id = self
            .heap
            .storage
            .create_composite(address, StaticType::Composite(ty.clone()), Vec::new())?;
        self.heap.domain_set(address, CONTRACT_DOMAIN, name, Value::Composite(id))?;
        self.initialize(id, &ty, &program, &decl, arguments)?;
        debug!(%address, name, "Deployed contract");
        self.emit_contract_event(CONTRACT_ADDED, address, name, &code)?;
        self.deployed_contract(address, name, &code)
    }

    /// Stage new code for a deployed contract. The running execution keeps
    /// using the program it already loaded.
    fn update_contract(&mut self, address: Address, name: &str, code: String) -> Result<Value> {
        if self.env.contract_code(address, name)?.is_none() {
            return Err(UserErrorKind::InvalidContractDeployment(format!(
                "contract `{}` does not exist in account {}",
                name, address
            ))
            .into());
        }
        self.check_contract(address, name, &code)?;
        self.env.stage_code(address, name, CodeChange::Update(code.clone()));
        debug!(%address, name, "Updated contract");
        self.emit_contract_event(CONTRACT_UPDATED, address, name, &code)?;
        self.deployed_contract(address, name, &code)
    }

    fn emit_contract_event(&mut self, type_id: &str, address: Address, name: &str, code: &str) -> Result<()> {
        self.env.emit_event(&Event {
            type_id: type_id.to_string(),
            fields: vec![
                ("address".to_string(), ExportedValue::Address(address)),
                ("codeHash".to_string(), code_hash(code)),
                ("contract".to_string(), ExportedValue::string(name)),
            ],
        })
    }

    fn deployed_contract(&mut self, address: Address, name: &str, code: &str) -> Result<Value> {
        let code = self.bytes_value(code.as_bytes())?;
        self.builtin_composite(
            "DeployedContract",
            vec![
                ("address".to_string(), Value::Address(address)),
                ("name".to_string(), Value::string(name)),
                ("code".to_string(), code),
            ],
        )
    }

    fn account_key(&mut self, key: AccountKeyInfo) -> Result<Value> {
        self.builtin_composite(
            "AccountKey",
            vec![
                ("keyIndex".to_string(), Value::Integer(IntegerValue::int(key.index))),
                ("publicKey".to_string(), Value::PublicKey(key.public_key)),
                ("hashAlgorithm".to_string(), Value::HashAlgorithm(key.hash_algorithm)),
                ("weight".to_string(), Value::UFix64(key.weight)),
                ("isRevoked".to_string(), Value::Bool(key.is_revoked)),
            ],
        )
    }

    /// Struct of a type provided by the runtime itself
    pub(crate) fn builtin_composite(&mut self, name: &str, fields: Vec<(String, Value)>) -> Result<Value> {
        let ty = CompositeType::new(builtin_location(), name, CompositeKind::Struct);
        let mut owned = Vec::with_capacity(fields.len());
        for (field, value) in fields {
            owned.push((field, self.heap.transfer(value, Address::ZERO, true)?));
        }
        let id = self
            .heap
            .storage
            .create_composite(Address::ZERO, StaticType::Composite(ty), owned)?;
        Ok(Value::Composite(id))
    }
}

fn check_granted(granted: &Authorization, wanted: &Authorization, referenced: &StaticType, requested: &StaticType) -> Result<()> {
    if granted.permits(wanted) {
        return Ok(());
    }
    Err(UserErrorKind::TypeMismatch {
        expected: StaticType::reference(granted.clone(), referenced.clone()).to_string(),
        actual: requested.to_string(),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_full_authorization_grants_every_section() {
        let full = full_authorization();
        for function in ["storage.save", "contracts.add", "keys.add", "capabilities.storage.issue", "capabilities.publish"] {
            assert!(full.grants_any(required_entitlements(function)), "{}", function);
        }
        assert!(Authorization::Unauthorized.grants_any(required_entitlements("capabilities.get")));
        assert!(!Authorization::Unauthorized.grants_any(required_entitlements("storage.borrow")));
    }

    #[test]
    fn test_controller_delete_needs_capability_entitlements() {
        assert!(!Authorization::Unauthorized.grants_any(required_entitlements("controller.delete")));
        assert!(full_authorization().grants_any(required_entitlements("controller.delete")));
        let issue = Authorization::from_names(&["IssueStorageCapabilityController"]);
        assert!(issue.grants_any(required_entitlements("controller.delete")));
        let publish = Authorization::from_names(&["PublishCapability"]);
        assert!(!publish.grants_any(required_entitlements("controller.delete")));
    }

    #[test]
    fn test_granular_entitlements() {
        let borrow_only = Authorization::from_names(&["BorrowValue"]);
        assert!(borrow_only.grants_any(required_entitlements("storage.borrow")));
        assert!(!borrow_only.grants_any(required_entitlements("storage.save")));
    }

    #[test]
    fn test_borrow_authorization_is_checked() {
        let withdraw = Authorization::from_names(&["Withdraw"]);
        let vault = StaticType::AnyResource;
        let requested = StaticType::reference(withdraw.clone(), vault.clone());
        let err = check_granted(&Authorization::Unauthorized, &withdraw, &vault, &requested).unwrap_err();
        assert!(matches!(err.user_kind(), Some(UserErrorKind::TypeMismatch { .. })));
        assert!(check_granted(&withdraw, &withdraw, &vault, &requested).is_ok());
        assert!(check_granted(&withdraw, &Authorization::Unauthorized, &vault, &requested).is_ok());
    }

    #[test]
    fn test_parameter_types() {
        assert_eq!(parameter_types("keys.revoke"), vec![StaticType::Integer(IntegerKind::Int)]);
        assert_eq!(parameter_types("storage.save").len(), 2);
    }

    #[test]
    fn test_code_hash_is_sha3() {
        let ExportedValue::Array(bytes) = code_hash("") else {
            panic!("expected bytes");
        };
        assert_eq!(bytes.len(), 32);
        assert_eq!(bytes[0], ExportedValue::Integer(IntegerValue::new(IntegerKind::UInt8, 0xa7).unwrap()));
    }
}
