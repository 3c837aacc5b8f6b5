//! Slab storage: the persistent container layer
//!
//! Slabs are cached in memory, mutated in place and written back to the
//! ledger on [`SlabStorage::commit`]. Only slabs touched since the last
//! commit are rewritten. Temporary slabs (zero address) never reach the
//! ledger.

use std::collections::{BTreeSet, HashMap};

use ore_common::Address;
use sha2::{Digest, Sha256};
use tracing::{debug, trace};

use crate::error::{Result, StorageError};
use crate::ledger::{Ledger, StorageIndex};
use crate::slab::{decode_slab, encode_slab, Body, PageRef, Slab, SlabData, SlabElement, SlabId};

/// Default maximum number of elements per page
pub const DEFAULT_PAGE_CAPACITY: usize = 32;

/// Outcome of a commit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub slabs_written: usize,
    pub slabs_removed: usize,
    pub domains_created: usize,
}

/// Position of an element inside a container
enum Spot {
    Inline(usize),
    Page {
        position: usize,
        page: SlabId,
        offset: usize,
    },
}

/// Access to the element storage of arrays and dictionaries
trait Layout<E: SlabElement> {
    type Item: Clone;
    const KIND: &'static str;

    fn body(slab: &Slab<E>) -> Option<&Body<Self::Item>>;
    fn body_mut(slab: &mut Slab<E>) -> Option<&mut Body<Self::Item>>;
    fn page_items(slab: &Slab<E>) -> Option<&Vec<Self::Item>>;
    fn page_items_mut(slab: &mut Slab<E>) -> Option<&mut Vec<Self::Item>>;
    fn page(items: Vec<Self::Item>) -> Slab<E>;
}

struct ArrayLayout;

impl<E: SlabElement> Layout<E> for ArrayLayout {
    type Item = E;
    const KIND: &'static str = "array";

    fn body(slab: &Slab<E>) -> Option<&Body<E>> {
        match slab {
            SlabData::Array { body, .. } => Some(body),
            _ => None,
        }
    }

    fn body_mut(slab: &mut Slab<E>) -> Option<&mut Body<E>> {
        match slab {
            SlabData::Array { body, .. } => Some(body),
            _ => None,
        }
    }

    fn page_items(slab: &Slab<E>) -> Option<&Vec<E>> {
        match slab {
            SlabData::ArrayPage { items } => Some(items),
            _ => None,
        }
    }

    fn page_items_mut(slab: &mut Slab<E>) -> Option<&mut Vec<E>> {
        match slab {
            SlabData::ArrayPage { items } => Some(items),
            _ => None,
        }
    }

    fn page(items: Vec<E>) -> Slab<E> {
        SlabData::ArrayPage { items }
    }
}

struct DictionaryLayout;

impl<E: SlabElement> Layout<E> for DictionaryLayout {
    type Item = (E, E);
    const KIND: &'static str = "dictionary";

    fn body(slab: &Slab<E>) -> Option<&Body<(E, E)>> {
        match slab {
            SlabData::Dictionary { body, .. } => Some(body),
            _ => None,
        }
    }

    fn body_mut(slab: &mut Slab<E>) -> Option<&mut Body<(E, E)>> {
        match slab {
            SlabData::Dictionary { body, .. } => Some(body),
            _ => None,
        }
    }

    fn page_items(slab: &Slab<E>) -> Option<&Vec<(E, E)>> {
        match slab {
            SlabData::DictionaryPage { items } => Some(items),
            _ => None,
        }
    }

    fn page_items_mut(slab: &mut Slab<E>) -> Option<&mut Vec<(E, E)>> {
        match slab {
            SlabData::DictionaryPage { items } => Some(items),
            _ => None,
        }
    }

    fn page(items: Vec<(E, E)>) -> Slab<E> {
        SlabData::DictionaryPage { items }
    }
}

/// Slab-backed storage of containers and account domains
pub struct SlabStorage<'a, E: SlabElement> {
    ledger: &'a dyn Ledger,
    page_capacity: usize,
    slabs: HashMap<SlabId, Slab<E>>,
    dirty: BTreeSet<SlabId>,
    removed: BTreeSet<SlabId>,
    /// Container slab owning each child container
    parents: HashMap<SlabId, SlabId>,
    /// Root slab of each page
    page_owner: HashMap<SlabId, SlabId>,
    domains: HashMap<(Address, String), SlabId>,
    new_domains: BTreeSet<(Address, String)>,
    next_temporary: u64,
    last_written: Vec<SlabId>,
}

impl<'a, E: SlabElement> SlabStorage<'a, E> {
    /// Create a new slab storage over `ledger`
    pub fn new(ledger: &'a dyn Ledger, page_capacity: usize) -> Self {
        Self {
            ledger,
            page_capacity: page_capacity.max(2),
            slabs: HashMap::new(),
            dirty: BTreeSet::new(),
            removed: BTreeSet::new(),
            parents: HashMap::new(),
            page_owner: HashMap::new(),
            domains: HashMap::new(),
            new_domains: BTreeSet::new(),
            next_temporary: 0,
            last_written: Vec::new(),
        }
    }

    pub fn ledger(&self) -> &'a dyn Ledger {
        self.ledger
    }

    pub fn page_capacity(&self) -> usize {
        self.page_capacity
    }

    /// Allocate a slab id owned by `address`
    pub fn allocate(&mut self, address: Address) -> Result<SlabId> {
        if address.is_zero() {
            self.next_temporary += 1;
            return Ok(SlabId::new(address, self.next_temporary));
        }
        let index = self.ledger.allocate_storage_index(address)?;
        Ok(index.slab_id(address))
    }

    fn register_slab(&mut self, id: SlabId, slab: Slab<E>, dirty: bool) {
        let owner = self.page_owner.get(&id).copied().unwrap_or(id);
        let mut children = Vec::new();
        slab.for_each_value(&mut |v: &E| {
            if let Some(child) = v.child_slab() {
                children.push(child);
            }
        });
        for child in children {
            self.parents.insert(child, owner);
        }
        self.slabs.insert(id, slab);
        if dirty {
            self.dirty.insert(id);
        }
    }

    fn drop_slab(&mut self, id: SlabId) {
        self.slabs.remove(&id);
        self.dirty.remove(&id);
        self.page_owner.remove(&id);
        self.parents.remove(&id);
        if !id.is_temporary() {
            self.removed.insert(id);
        }
    }

    fn ensure_loaded(&mut self, id: SlabId) -> Result<()> {
        if self.slabs.contains_key(&id) {
            return Ok(());
        }
        if id.is_temporary() || self.removed.contains(&id) {
            return Err(StorageError::SlabNotFound(id));
        }
        let bytes = self.ledger.get_value(id.address, &id.key())?;
        if bytes.is_empty() {
            return Err(StorageError::SlabNotFound(id));
        }
        let slab: Slab<E> = decode_slab::<E>(&bytes)?;
        if let Some(refs) = slab.page_refs() {
            for page in refs {
                self.page_owner.insert(page.id, id);
            }
        }
        trace!(%id, kind = slab.kind_name(), "Loaded slab");
        self.register_slab(id, slab, false);
        Ok(())
    }

    /// Whether the slab exists, loading it if necessary
    pub fn contains(&mut self, id: SlabId) -> Result<bool> {
        match self.ensure_loaded(id) {
            Ok(()) => Ok(true),
            Err(StorageError::SlabNotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Read access to a slab
    pub fn slab(&mut self, id: SlabId) -> Result<&Slab<E>> {
        self.ensure_loaded(id)?;
        self.slabs.get(&id).ok_or(StorageError::SlabNotFound(id))
    }

    /// Write access to a slab; marks it dirty
    fn slab_mut(&mut self, id: SlabId) -> Result<&mut Slab<E>> {
        self.ensure_loaded(id)?;
        self.dirty.insert(id);
        self.slabs.get_mut(&id).ok_or(StorageError::SlabNotFound(id))
    }

    /// Static type information of a container slab
    pub fn info(&mut self, id: SlabId) -> Result<E::TypeInfo> {
        let slab = self.slab(id)?;
        slab.info()
            .cloned()
            .ok_or(StorageError::UnexpectedSlab(id, "container"))
    }

    /// Replace the type information of a container slab
    pub fn set_info(&mut self, id: SlabId, new_info: E::TypeInfo) -> Result<()> {
        match self.slab_mut(id)? {
            SlabData::Array { info, .. }
            | SlabData::Dictionary { info, .. }
            | SlabData::Composite { info, .. } => {
                *info = new_info;
                Ok(())
            }
            _ => Err(StorageError::UnexpectedSlab(id, "container")),
        }
    }

    fn adopt(&mut self, parent: SlabId, value: &E) {
        if let Some(child) = value.child_slab() {
            self.parents.insert(child, parent);
        }
    }

    fn orphan(&mut self, value: &E) {
        if let Some(child) = value.child_slab() {
            self.parents.remove(&child);
        }
    }

    /// The container currently owning `id`
    pub fn parent(&self, id: SlabId) -> Option<SlabId> {
        self.parents.get(&id).copied()
    }

    /// Whether `candidate` is `id` itself or one of its ancestors
    pub fn is_ancestor_or_self(&self, candidate: SlabId, id: SlabId) -> bool {
        let mut current = Some(id);
        let mut steps = 0;
        while let Some(slab) = current {
            if slab == candidate {
                return true;
            }
            steps += 1;
            if steps > self.parents.len() + 1 {
                break;
            }
            current = self.parents.get(&slab).copied();
        }
        false
    }

    // Element storage shared by arrays and dictionaries

    fn paginate<L: Layout<E>>(&mut self, root: SlabId, items: Vec<L::Item>) -> Result<Body<L::Item>> {
        if items.len() <= self.page_capacity {
            return Ok(Body::Inline(items));
        }
        let mut refs = Vec::new();
        let mut iter = items.into_iter().peekable();
        while iter.peek().is_some() {
            let chunk: Vec<L::Item> = iter.by_ref().take(self.page_capacity).collect();
            let page = self.allocate(root.address)?;
            self.page_owner.insert(page, root);
            refs.push(PageRef {
                id: page,
                len: chunk.len(),
                digest: [0; 32],
            });
            self.register_slab(page, L::page(chunk), true);
        }
        Ok(Body::Paged(refs))
    }

    fn items_of<L: Layout<E>>(slab: &Slab<E>, id: SlabId) -> Result<&Vec<L::Item>> {
        if let Some(items) = L::page_items(slab) {
            return Ok(items);
        }
        match L::body(slab) {
            Some(Body::Inline(items)) => Ok(items),
            _ => Err(StorageError::UnexpectedSlab(id, L::KIND)),
        }
    }

    fn items_of_mut<L: Layout<E>>(slab: &mut Slab<E>, id: SlabId) -> Result<&mut Vec<L::Item>> {
        if L::page_items(slab).is_some() {
            return L::page_items_mut(slab).ok_or(StorageError::UnexpectedSlab(id, L::KIND));
        }
        match L::body_mut(slab) {
            Some(Body::Inline(items)) => Ok(items),
            _ => Err(StorageError::UnexpectedSlab(id, L::KIND)),
        }
    }

    fn len_of<L: Layout<E>>(&mut self, root: SlabId) -> Result<usize> {
        match L::body(self.slab(root)?) {
            Some(Body::Inline(items)) => Ok(items.len()),
            Some(Body::Paged(refs)) => Ok(refs.iter().map(|r| r.len).sum()),
            None => Err(StorageError::UnexpectedSlab(root, L::KIND)),
        }
    }

    fn locate<L: Layout<E>>(&mut self, root: SlabId, index: usize, inserting: bool) -> Result<Spot> {
        let refs = match L::body(self.slab(root)?) {
            Some(Body::Inline(items)) => {
                let length = items.len();
                if index > length || (!inserting && index == length) {
                    return Err(StorageError::IndexOutOfBounds { index, length });
                }
                return Ok(Spot::Inline(index));
            }
            Some(Body::Paged(refs)) => refs.clone(),
            None => return Err(StorageError::UnexpectedSlab(root, L::KIND)),
        };
        let length: usize = refs.iter().map(|r| r.len).sum();
        if index > length || (!inserting && index == length) {
            return Err(StorageError::IndexOutOfBounds { index, length });
        }
        let mut remaining = index;
        let last = refs.len().saturating_sub(1);
        for (position, page) in refs.iter().enumerate() {
            if remaining < page.len || (inserting && remaining == page.len && position == last) {
                return Ok(Spot::Page {
                    position,
                    page: page.id,
                    offset: remaining,
                });
            }
            remaining -= page.len;
        }
        Err(StorageError::IndexOutOfBounds { index, length })
    }

    fn item_at<L: Layout<E>>(&mut self, root: SlabId, index: usize) -> Result<L::Item> {
        let (slab_id, offset) = match self.locate::<L>(root, index, false)? {
            Spot::Inline(offset) => (root, offset),
            Spot::Page { page, offset, .. } => (page, offset),
        };
        let slab = self.slab(slab_id)?;
        let items = Self::items_of::<L>(slab, slab_id)?;
        items.get(offset).cloned().ok_or(StorageError::IndexOutOfBounds {
            index,
            length: items.len(),
        })
    }

    fn replace_at<L: Layout<E>>(&mut self, root: SlabId, index: usize, item: L::Item) -> Result<L::Item> {
        let (slab_id, offset) = match self.locate::<L>(root, index, false)? {
            Spot::Inline(offset) => (root, offset),
            Spot::Page { page, offset, .. } => {
                self.dirty.insert(root);
                (page, offset)
            }
        };
        let items = Self::items_of_mut::<L>(self.slab_mut(slab_id)?, slab_id)?;
        let length = items.len();
        let slot = items
            .get_mut(offset)
            .ok_or(StorageError::IndexOutOfBounds { index, length })?;
        Ok(std::mem::replace(slot, item))
    }

    fn insert_at<L: Layout<E>>(&mut self, root: SlabId, index: usize, item: L::Item) -> Result<()> {
        let capacity = self.page_capacity;
        match self.locate::<L>(root, index, true)? {
            Spot::Inline(offset) => {
                let length = {
                    let items = Self::items_of_mut::<L>(self.slab_mut(root)?, root)?;
                    items.insert(offset, item);
                    items.len()
                };
                if length > capacity {
                    let items = std::mem::take(Self::items_of_mut::<L>(self.slab_mut(root)?, root)?);
                    let body = self.paginate::<L>(root, items)?;
                    if let Some(slot) = L::body_mut(self.slab_mut(root)?) {
                        *slot = body;
                    }
                }
            }
            Spot::Page {
                position,
                page,
                offset,
            } => {
                let length = {
                    let items = Self::items_of_mut::<L>(self.slab_mut(page)?, page)?;
                    items.insert(offset, item);
                    items.len()
                };
                if let Some(refs) = self.slab_mut(root)?.page_refs_mut() {
                    refs[position].len += 1;
                }
                if length > capacity {
                    self.split_page::<L>(root, position, page)?;
                }
            }
        }
        Ok(())
    }

    fn split_page<L: Layout<E>>(&mut self, root: SlabId, position: usize, page: SlabId) -> Result<()> {
        let tail = {
            let items = Self::items_of_mut::<L>(self.slab_mut(page)?, page)?;
            let half = items.len() / 2;
            items.split_off(half)
        };
        let tail_len = tail.len();
        let new_page = self.allocate(root.address)?;
        self.page_owner.insert(new_page, root);
        self.register_slab(new_page, L::page(tail), true);
        if let Some(refs) = self.slab_mut(root)?.page_refs_mut() {
            refs[position].len -= tail_len;
            refs.insert(
                position + 1,
                PageRef {
                    id: new_page,
                    len: tail_len,
                    digest: [0; 32],
                },
            );
        }
        trace!(%root, %page, %new_page, "Split page");
        Ok(())
    }

    fn remove_at<L: Layout<E>>(&mut self, root: SlabId, index: usize) -> Result<L::Item> {
        match self.locate::<L>(root, index, false)? {
            Spot::Inline(offset) => {
                let items = Self::items_of_mut::<L>(self.slab_mut(root)?, root)?;
                Ok(items.remove(offset))
            }
            Spot::Page {
                position,
                page,
                offset,
            } => {
                let (item, now_empty) = {
                    let items = Self::items_of_mut::<L>(self.slab_mut(page)?, page)?;
                    let item = items.remove(offset);
                    (item, items.is_empty())
                };
                let mut no_pages_left = false;
                if let Some(refs) = self.slab_mut(root)?.page_refs_mut() {
                    refs[position].len -= 1;
                    if now_empty {
                        refs.remove(position);
                    }
                    no_pages_left = refs.is_empty();
                }
                if now_empty {
                    self.drop_slab(page);
                }
                if no_pages_left {
                    if let Some(body) = L::body_mut(self.slab_mut(root)?) {
                        *body = Body::Inline(Vec::new());
                    }
                }
                Ok(item)
            }
        }
    }

    fn all_items<L: Layout<E>>(&mut self, root: SlabId) -> Result<Vec<L::Item>> {
        let refs = match L::body(self.slab(root)?) {
            Some(Body::Inline(items)) => return Ok(items.clone()),
            Some(Body::Paged(refs)) => refs.clone(),
            None => return Err(StorageError::UnexpectedSlab(root, L::KIND)),
        };
        let mut out = Vec::new();
        for page in refs {
            let slab = self.slab(page.id)?;
            out.extend(Self::items_of::<L>(slab, page.id)?.iter().cloned());
        }
        Ok(out)
    }

    // Arrays

    /// Create an array slab owned by `address`
    pub fn create_array(&mut self, address: Address, info: E::TypeInfo, items: Vec<E>) -> Result<SlabId> {
        let id = self.allocate(address)?;
        let body = self.paginate::<ArrayLayout>(id, items)?;
        self.register_slab(id, SlabData::Array { info, body }, true);
        Ok(id)
    }

    pub fn array_len(&mut self, id: SlabId) -> Result<usize> {
        self.len_of::<ArrayLayout>(id)
    }

    pub fn array_get(&mut self, id: SlabId, index: usize) -> Result<E> {
        self.item_at::<ArrayLayout>(id, index)
    }

    /// Replace the element at `index`, returning the previous element
    pub fn array_set(&mut self, id: SlabId, index: usize, value: E) -> Result<E> {
        let incoming = value.child_slab();
        self.adopt(id, &value);
        let old = self.replace_at::<ArrayLayout>(id, index, value)?;
        if old.child_slab() != incoming {
            self.orphan(&old);
        }
        Ok(old)
    }

    pub fn array_insert(&mut self, id: SlabId, index: usize, value: E) -> Result<()> {
        self.adopt(id, &value);
        self.insert_at::<ArrayLayout>(id, index, value)
    }

    pub fn array_append(&mut self, id: SlabId, value: E) -> Result<()> {
        let length = self.array_len(id)?;
        self.array_insert(id, length, value)
    }

    pub fn array_remove(&mut self, id: SlabId, index: usize) -> Result<E> {
        let old = self.remove_at::<ArrayLayout>(id, index)?;
        self.orphan(&old);
        Ok(old)
    }

    pub fn array_items(&mut self, id: SlabId) -> Result<Vec<E>> {
        self.all_items::<ArrayLayout>(id)
    }

    // Dictionaries

    /// Create a dictionary slab owned by `address`
    pub fn create_dictionary(
        &mut self,
        address: Address,
        info: E::TypeInfo,
        entries: Vec<(E, E)>,
    ) -> Result<SlabId> {
        let id = self.allocate(address)?;
        let body = self.paginate::<DictionaryLayout>(id, entries)?;
        self.register_slab(id, SlabData::Dictionary { info, body }, true);
        Ok(id)
    }

    pub fn dictionary_len(&mut self, id: SlabId) -> Result<usize> {
        self.len_of::<DictionaryLayout>(id)
    }

    fn dictionary_position(&mut self, id: SlabId, key: &E) -> Result<Option<usize>> {
        let entries = self.all_items::<DictionaryLayout>(id)?;
        Ok(entries.iter().position(|(k, _)| k.same_key(key)))
    }

    pub fn dictionary_get(&mut self, id: SlabId, key: &E) -> Result<Option<E>> {
        match self.dictionary_position(id, key)? {
            Some(index) => Ok(Some(self.item_at::<DictionaryLayout>(id, index)?.1)),
            None => Ok(None),
        }
    }

    /// Insert or replace the value for `key`, returning the previous value
    pub fn dictionary_insert(&mut self, id: SlabId, key: E, value: E) -> Result<Option<E>> {
        let incoming = value.child_slab();
        self.adopt(id, &value);
        match self.dictionary_position(id, &key)? {
            Some(index) => {
                let (_, old) = self.replace_at::<DictionaryLayout>(id, index, (key, value))?;
                if old.child_slab() != incoming {
                    self.orphan(&old);
                }
                Ok(Some(old))
            }
            None => {
                let length = self.dictionary_len(id)?;
                self.insert_at::<DictionaryLayout>(id, length, (key, value))?;
                Ok(None)
            }
        }
    }

    pub fn dictionary_remove(&mut self, id: SlabId, key: &E) -> Result<Option<E>> {
        match self.dictionary_position(id, key)? {
            Some(index) => {
                let (_, old) = self.remove_at::<DictionaryLayout>(id, index)?;
                self.orphan(&old);
                Ok(Some(old))
            }
            None => Ok(None),
        }
    }

    pub fn dictionary_entries(&mut self, id: SlabId) -> Result<Vec<(E, E)>> {
        self.all_items::<DictionaryLayout>(id)
    }

    // Composites

    /// Create a composite slab owned by `address`
    pub fn create_composite(
        &mut self,
        address: Address,
        info: E::TypeInfo,
        fields: Vec<(String, E)>,
    ) -> Result<SlabId> {
        let id = self.allocate(address)?;
        self.register_slab(id, SlabData::Composite { info, fields }, true);
        Ok(id)
    }

    pub fn composite_get(&mut self, id: SlabId, name: &str) -> Result<Option<E>> {
        match self.slab(id)? {
            SlabData::Composite { fields, .. } => Ok(fields
                .iter()
                .find(|(field, _)| field == name)
                .map(|(_, value)| value.clone())),
            _ => Err(StorageError::UnexpectedSlab(id, "composite")),
        }
    }

    /// Set a field, returning the previous value
    pub fn composite_set(&mut self, id: SlabId, name: &str, value: E) -> Result<Option<E>> {
        self.adopt(id, &value);
        let old = match self.slab_mut(id)? {
            SlabData::Composite { fields, .. } => {
                match fields.iter_mut().find(|(field, _)| field == name) {
                    Some(slot) => Some(std::mem::replace(&mut slot.1, value)),
                    None => {
                        fields.push((name.to_string(), value));
                        None
                    }
                }
            }
            _ => return Err(StorageError::UnexpectedSlab(id, "composite")),
        };
        if let Some(old) = &old {
            if old.child_slab() != self.composite_get(id, name)?.and_then(|v| v.child_slab()) {
                self.orphan(old);
            }
        }
        Ok(old)
    }

    pub fn composite_remove(&mut self, id: SlabId, name: &str) -> Result<Option<E>> {
        let old = match self.slab_mut(id)? {
            SlabData::Composite { fields, .. } => fields
                .iter()
                .position(|(field, _)| field == name)
                .map(|index| fields.remove(index).1),
            _ => return Err(StorageError::UnexpectedSlab(id, "composite")),
        };
        if let Some(old) = &old {
            self.orphan(old);
        }
        Ok(old)
    }

    pub fn composite_fields(&mut self, id: SlabId) -> Result<Vec<(String, E)>> {
        match self.slab(id)? {
            SlabData::Composite { fields, .. } => Ok(fields.clone()),
            _ => Err(StorageError::UnexpectedSlab(id, "composite")),
        }
    }

    // Account domains

    /// Root slab of an account domain, created on demand
    pub fn domain_root(&mut self, address: Address, domain: &str, create: bool) -> Result<Option<SlabId>> {
        let key = (address, domain.to_string());
        if let Some(id) = self.domains.get(&key) {
            return Ok(Some(*id));
        }
        let raw = self.ledger.get_value(address, domain.as_bytes())?;
        if !raw.is_empty() {
            let index = <[u8; 8]>::try_from(raw.as_slice()).map_err(|_| {
                StorageError::Serialization(format!("malformed root of domain {} for {}", domain, address))
            })?;
            let id = SlabId::new(address, u64::from_be_bytes(index));
            self.domains.insert(key, id);
            return Ok(Some(id));
        }
        if !create {
            return Ok(None);
        }
        let id = self.allocate(address)?;
        self.register_slab(id, SlabData::Domain { entries: Vec::new() }, true);
        self.domains.insert(key.clone(), id);
        self.new_domains.insert(key);
        debug!(%address, domain, %id, "Created storage domain");
        Ok(Some(id))
    }

    pub fn domain_get(&mut self, address: Address, domain: &str, key: &str) -> Result<Option<E>> {
        let Some(root) = self.domain_root(address, domain, false)? else {
            return Ok(None);
        };
        match self.slab(root)? {
            SlabData::Domain { entries } => Ok(entries
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, value)| value.clone())),
            _ => Err(StorageError::UnexpectedSlab(root, "domain")),
        }
    }

    /// Store `value` under `key`, returning the previous value
    pub fn domain_set(&mut self, address: Address, domain: &str, key: &str, value: E) -> Result<Option<E>> {
        let root = self
            .domain_root(address, domain, true)?
            .ok_or(StorageError::UnexpectedSlab(SlabId::new(address, 0), "domain"))?;
        self.adopt(root, &value);
        match self.slab_mut(root)? {
            SlabData::Domain { entries } => match entries.iter_mut().find(|(name, _)| name == key) {
                Some(slot) => Ok(Some(std::mem::replace(&mut slot.1, value))),
                None => {
                    entries.push((key.to_string(), value));
                    Ok(None)
                }
            },
            _ => Err(StorageError::UnexpectedSlab(root, "domain")),
        }
    }

    pub fn domain_remove(&mut self, address: Address, domain: &str, key: &str) -> Result<Option<E>> {
        let Some(root) = self.domain_root(address, domain, false)? else {
            return Ok(None);
        };
        let old = match self.slab(root)? {
            SlabData::Domain { entries } => entries.iter().position(|(name, _)| name == key),
            _ => return Err(StorageError::UnexpectedSlab(root, "domain")),
        };
        let Some(index) = old else {
            return Ok(None);
        };
        let removed = match self.slab_mut(root)? {
            SlabData::Domain { entries } => entries.remove(index).1,
            _ => return Err(StorageError::UnexpectedSlab(root, "domain")),
        };
        self.orphan(&removed);
        Ok(Some(removed))
    }

    /// Entries of a domain in insertion order
    pub fn domain_entries(&mut self, address: Address, domain: &str) -> Result<Vec<(String, E)>> {
        let Some(root) = self.domain_root(address, domain, false)? else {
            return Ok(Vec::new());
        };
        match self.slab(root)? {
            SlabData::Domain { entries } => Ok(entries.clone()),
            _ => Err(StorageError::UnexpectedSlab(root, "domain")),
        }
    }

    // Whole-value operations

    /// Every value held by a container slab, including paged elements
    pub fn values(&mut self, id: SlabId) -> Result<Vec<E>> {
        let kind = self.slab(id)?.kind_name();
        match kind {
            "array" => self.array_items(id),
            "dictionary" => Ok(self
                .dictionary_entries(id)?
                .into_iter()
                .flat_map(|(k, v)| [k, v])
                .collect()),
            _ => {
                let mut out = Vec::new();
                self.slab(id)?.for_each_value(&mut |v: &E| out.push(v.clone()));
                Ok(out)
            }
        }
    }

    /// Container slabs directly owned by `id`
    pub fn children(&mut self, id: SlabId) -> Result<Vec<SlabId>> {
        Ok(self
            .values(id)?
            .iter()
            .filter_map(|value| value.child_slab())
            .collect())
    }

    /// `id` and every container slab nested in it, depth first. Slabs
    /// already removed are skipped.
    pub fn subtree(&mut self, id: SlabId) -> Result<Vec<SlabId>> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !self.contains(current)? {
                continue;
            }
            out.push(current);
            stack.extend(self.children(current)?);
        }
        Ok(out)
    }

    fn copy_element(&mut self, value: E, address: Address) -> Result<E> {
        match value.child_slab() {
            Some(child) => {
                let copied = self.deep_copy(child, address)?;
                Ok(value.with_child_slab(copied))
            }
            None => Ok(value),
        }
    }

    /// Copy a container and everything it owns into new slabs at `address`
    pub fn deep_copy(&mut self, id: SlabId, address: Address) -> Result<SlabId> {
        let slab = self.slab(id)?.clone();
        match slab {
            SlabData::Array { info, .. } => {
                let items = self.array_items(id)?;
                let copied = items
                    .into_iter()
                    .map(|item| self.copy_element(item, address))
                    .collect::<Result<Vec<_>>>()?;
                self.create_array(address, info, copied)
            }
            SlabData::Dictionary { info, .. } => {
                let entries = self.dictionary_entries(id)?;
                let mut copied = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    copied.push((key, self.copy_element(value, address)?));
                }
                self.create_dictionary(address, info, copied)
            }
            SlabData::Composite { info, fields } => {
                let mut copied = Vec::with_capacity(fields.len());
                for (name, value) in fields {
                    copied.push((name, self.copy_element(value, address)?));
                }
                self.create_composite(address, info, copied)
            }
            _ => Err(StorageError::UnexpectedSlab(id, "container")),
        }
    }

    /// Remove a container and every slab it owns
    pub fn deep_remove(&mut self, id: SlabId) -> Result<()> {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !self.contains(current)? {
                continue;
            }
            let children = self.children(current)?;
            let pages: Vec<SlabId> = self
                .slab(current)?
                .page_refs()
                .map(|refs| refs.iter().map(|page| page.id).collect())
                .unwrap_or_default();
            for page in pages {
                self.drop_slab(page);
            }
            self.drop_slab(current);
            stack.extend(children);
        }
        trace!(%id, "Removed slab tree");
        Ok(())
    }

    // Persistence

    /// Write dirty slabs, removals and new domain roots to the ledger
    pub fn commit(&mut self) -> Result<CommitSummary> {
        let mut pages = Vec::new();
        let mut roots = BTreeSet::new();
        for id in std::mem::take(&mut self.dirty) {
            if id.is_temporary() {
                continue;
            }
            match self.slabs.get(&id) {
                Some(slab) if slab.is_page() => {
                    pages.push(id);
                    if let Some(root) = self.page_owner.get(&id) {
                        roots.insert(*root);
                    }
                }
                Some(_) => {
                    roots.insert(id);
                }
                None => {}
            }
        }

        let mut encoded: Vec<(SlabId, Vec<u8>)> = Vec::with_capacity(pages.len() + roots.len());
        for id in pages {
            let Some(slab) = self.slabs.get(&id) else {
                continue;
            };
            let bytes = encode_slab::<E>(slab)?;
            let mut digest = [0u8; 32];
            digest.copy_from_slice(&Sha256::digest(&bytes));
            if let Some(root) = self.page_owner.get(&id).copied() {
                if let Some(refs) = self.slabs.get_mut(&root).and_then(|slab| slab.page_refs_mut()) {
                    if let Some(page) = refs.iter_mut().find(|page| page.id == id) {
                        page.digest = digest;
                    }
                }
            }
            encoded.push((id, bytes));
        }
        for id in roots {
            if let Some(slab) = self.slabs.get(&id) {
                encoded.push((id, encode_slab::<E>(slab)?));
            }
        }

        for (id, bytes) in &encoded {
            self.ledger.set_value(id.address, &id.key(), bytes)?;
        }
        let removed = std::mem::take(&mut self.removed);
        for id in &removed {
            self.ledger.set_value(id.address, &id.key(), &[])?;
        }
        let new_domains = std::mem::take(&mut self.new_domains);
        for (address, domain) in &new_domains {
            if let Some(root) = self.domains.get(&(*address, domain.clone())) {
                self.ledger.set_value(*address, domain.as_bytes(), &root.index.to_be_bytes())?;
            }
        }

        self.last_written = encoded.iter().map(|(id, _)| *id).collect();
        let summary = CommitSummary {
            slabs_written: encoded.len(),
            slabs_removed: removed.len(),
            domains_created: new_domains.len(),
        };
        debug!(
            written = summary.slabs_written,
            removed = summary.slabs_removed,
            domains = summary.domains_created,
            "Committed slab storage"
        );
        Ok(summary)
    }

    /// Slabs written by the most recent commit
    pub fn last_written(&self) -> &[SlabId] {
        &self.last_written
    }

    /// Number of slabs cached in memory
    pub fn cached_len(&self) -> usize {
        self.slabs.len()
    }
}

impl StorageIndex {
    /// Slab id of this index under `address`
    pub fn slab_id(&self, address: Address) -> SlabId {
        SlabId::new(address, self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerResult;
    use crate::memory::MemoryLedger;
    use pretty_assertions::assert_eq;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    enum Element {
        Int(i64),
        Child(SlabId),
        Ephemeral,
    }

    impl SlabElement for Element {
        type Encoded = Element;
        type TypeInfo = String;

        fn encode(&self) -> Result<Element> {
            match self {
                Element::Ephemeral => Err(StorageError::non_storable("ephemeral")),
                other => Ok(other.clone()),
            }
        }

        fn decode(encoded: Element) -> Self {
            encoded
        }

        fn child_slab(&self) -> Option<SlabId> {
            match self {
                Element::Child(id) => Some(*id),
                _ => None,
            }
        }

        fn with_child_slab(&self, child: SlabId) -> Self {
            match self {
                Element::Child(_) => Element::Child(child),
                other => other.clone(),
            }
        }

        fn same_key(&self, other: &Self) -> bool {
            self == other
        }
    }

    fn owner() -> Address {
        Address::from_u64(1)
    }

    #[test]
    fn test_temporary_slabs_are_never_committed() {
        let ledger = MemoryLedger::new();
        let mut storage: SlabStorage<Element> = SlabStorage::new(&ledger, 4);
        let id = storage
            .create_array(Address::ZERO, "[Int]".into(), vec![Element::Int(1)])
            .unwrap();
        assert!(id.is_temporary());
        let summary = storage.commit().unwrap();
        assert_eq!(summary.slabs_written, 0);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_paged_array_round_trip() {
        let ledger = MemoryLedger::new();
        let items: Vec<Element> = (0..10).map(Element::Int).collect();
        {
            let mut storage: SlabStorage<Element> = SlabStorage::new(&ledger, 4);
            let array = storage.create_array(owner(), "[Int]".into(), items.clone()).unwrap();
            assert_eq!(storage.slab(array).unwrap().page_refs().unwrap().len(), 3);
            storage
                .domain_set(owner(), "storage", "numbers", Element::Child(array))
                .unwrap();
            storage.commit().unwrap();
            storage.validate(&["storage"]).unwrap();
        }
        let mut storage: SlabStorage<Element> = SlabStorage::new(&ledger, 4);
        let Some(Element::Child(array)) = storage.domain_get(owner(), "storage", "numbers").unwrap() else {
            panic!("missing array");
        };
        assert_eq!(storage.array_items(array).unwrap(), items);
        assert_eq!(storage.array_get(array, 7).unwrap(), Element::Int(7));
    }

    #[test]
    fn test_element_update_rewrites_only_touched_page() {
        let ledger = MemoryLedger::new();
        let mut storage: SlabStorage<Element> = SlabStorage::new(&ledger, 4);
        let array = storage
            .create_array(owner(), "[Int]".into(), (0..12).map(Element::Int).collect())
            .unwrap();
        storage
            .domain_set(owner(), "storage", "numbers", Element::Child(array))
            .unwrap();
        storage.commit().unwrap();

        storage.array_set(array, 5, Element::Int(50)).unwrap();
        let summary = storage.commit().unwrap();
        // the touched page and its root
        assert_eq!(summary.slabs_written, 2);
        storage.validate(&["storage"]).unwrap();
    }

    #[test]
    fn test_insert_and_remove_across_pages() {
        let ledger = MemoryLedger::new();
        let mut storage: SlabStorage<Element> = SlabStorage::new(&ledger, 3);
        let array = storage.create_array(owner(), "[Int]".into(), Vec::new()).unwrap();
        let mut model = Vec::new();
        for i in 0..20 {
            let index = (i * 7) % (model.len() + 1);
            storage.array_insert(array, index, Element::Int(i as i64)).unwrap();
            model.insert(index, Element::Int(i as i64));
        }
        assert_eq!(storage.array_items(array).unwrap(), model);
        while !model.is_empty() {
            let index = model.len() / 2;
            assert_eq!(storage.array_remove(array, index).unwrap(), model.remove(index));
        }
        assert_eq!(storage.array_len(array).unwrap(), 0);
        assert!(storage.array_get(array, 0).is_err());
    }

    #[test]
    fn test_deep_copy_and_remove() {
        let ledger = MemoryLedger::new();
        let mut storage: SlabStorage<Element> = SlabStorage::new(&ledger, 4);
        let inner = storage
            .create_array(Address::ZERO, "[Int]".into(), vec![Element::Int(1)])
            .unwrap();
        let outer = storage
            .create_composite(Address::ZERO, "S".into(), vec![("items".into(), Element::Child(inner))])
            .unwrap();
        assert_eq!(storage.parent(inner), Some(outer));
        assert!(storage.is_ancestor_or_self(outer, inner));
        assert!(!storage.is_ancestor_or_self(inner, outer));

        let copy = storage.deep_copy(outer, owner()).unwrap();
        assert_eq!(copy.address, owner());
        let Some(Element::Child(copied_inner)) = storage.composite_get(copy, "items").unwrap() else {
            panic!("missing field");
        };
        assert_ne!(copied_inner, inner);
        assert_eq!(storage.subtree(copy).unwrap(), vec![copy, copied_inner]);

        storage.deep_remove(outer).unwrap();
        assert!(!storage.contains(outer).unwrap());
        assert!(!storage.contains(inner).unwrap());
        assert!(storage.contains(copied_inner).unwrap());
    }

    #[test]
    fn test_subtree_skips_removed_children() {
        let ledger = MemoryLedger::new();
        let mut storage: SlabStorage<Element> = SlabStorage::new(&ledger, 2);
        let first = storage.create_array(Address::ZERO, "[Int]".into(), vec![Element::Int(1)]).unwrap();
        let second = storage.create_array(Address::ZERO, "[Int]".into(), vec![Element::Int(2)]).unwrap();
        let third = storage.create_array(Address::ZERO, "[Int]".into(), vec![Element::Int(3)]).unwrap();
        let outer = storage
            .create_array(
                Address::ZERO,
                "[[Int]]".into(),
                vec![Element::Child(first), Element::Child(second), Element::Child(third)],
            )
            .unwrap();

        storage.deep_remove(second).unwrap();
        let mut subtree = storage.subtree(outer).unwrap();
        subtree.sort_by_key(|id| id.index);
        let mut expected = vec![outer, first, third];
        expected.sort_by_key(|id| id.index);
        assert_eq!(subtree, expected);

        storage.deep_remove(outer).unwrap();
        assert!(!storage.contains(first).unwrap());
        assert!(!storage.contains(third).unwrap());
    }

    #[test]
    fn test_dictionary_operations() {
        let ledger = MemoryLedger::new();
        let mut storage: SlabStorage<Element> = SlabStorage::new(&ledger, 2);
        let dict = storage.create_dictionary(owner(), "{Int: Int}".into(), Vec::new()).unwrap();
        for i in 0..5 {
            assert_eq!(storage.dictionary_insert(dict, Element::Int(i), Element::Int(i * 10)).unwrap(), None);
        }
        assert_eq!(
            storage.dictionary_insert(dict, Element::Int(3), Element::Int(0)).unwrap(),
            Some(Element::Int(30))
        );
        assert_eq!(storage.dictionary_len(dict).unwrap(), 5);
        assert_eq!(storage.dictionary_get(dict, &Element::Int(3)).unwrap(), Some(Element::Int(0)));
        assert_eq!(storage.dictionary_remove(dict, &Element::Int(1)).unwrap(), Some(Element::Int(10)));
        assert_eq!(storage.dictionary_get(dict, &Element::Int(1)).unwrap(), None);
    }

    #[test]
    fn test_non_storable_values_fail_commit() {
        let ledger = MemoryLedger::new();
        let mut storage: SlabStorage<Element> = SlabStorage::new(&ledger, 4);
        storage
            .domain_set(owner(), "storage", "bad", Element::Ephemeral)
            .unwrap();
        assert!(matches!(storage.commit(), Err(StorageError::NonStorable(_))));
    }

    struct BrokenLedger;

    impl Ledger for BrokenLedger {
        fn get_value(&self, _owner: Address, _key: &[u8]) -> LedgerResult<Vec<u8>> {
            Ok(Vec::new())
        }

        fn set_value(&self, _owner: Address, _key: &[u8], _value: &[u8]) -> LedgerResult<()> {
            Ok(())
        }

        fn value_exists(&self, _owner: Address, _key: &[u8]) -> LedgerResult<bool> {
            Ok(false)
        }

        fn allocate_storage_index(&self, _owner: Address) -> LedgerResult<StorageIndex> {
            Err(crate::error::LedgerError::failure("exhausted"))
        }
    }

    #[test]
    fn test_allocation_failure_propagates() {
        let ledger = BrokenLedger;
        let mut storage: SlabStorage<Element> = SlabStorage::new(&ledger, 4);
        assert!(matches!(
            storage.create_array(owner(), "[Int]".into(), Vec::new()),
            Err(StorageError::Ledger(_))
        ));
    }
}
