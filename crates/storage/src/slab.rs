//! Slab definitions
//!
//! A slab is the unit of persistence. Root slabs hold arrays, dictionaries,
//! composites and domain maps; page slabs hold a contiguous run of the
//! elements of a large array or dictionary.

use std::fmt;

use ore_common::Address;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ledger::StorageIndex;

/// Stable identifier of a slab
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlabId {
    pub address: Address,
    pub index: u64,
}

impl SlabId {
    /// Create a new slab id
    pub fn new(address: Address, index: u64) -> Self {
        Self { address, index }
    }

    /// Temporary slabs belong to the zero address and are never committed
    pub fn is_temporary(&self) -> bool {
        self.address.is_zero()
    }

    /// Ledger key under which the slab is stored
    pub fn key(&self) -> Vec<u8> {
        StorageIndex(self.index).to_key()
    }
}

impl fmt::Display for SlabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.address, self.index)
    }
}

/// Reference from a root slab to one of its pages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRef {
    pub id: SlabId,
    pub len: usize,
    /// SHA-256 of the encoded page, refreshed on commit
    pub digest: [u8; 32],
}

/// Element storage of an array or dictionary root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Body<T> {
    Inline(Vec<T>),
    Paged(Vec<PageRef>),
}

/// Slab contents, generic over the element representation so the same shape
/// serves both the in-memory and the encoded form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SlabData<V, I> {
    Array { info: I, body: Body<V> },
    Dictionary { info: I, body: Body<(V, V)> },
    Composite { info: I, fields: Vec<(String, V)> },
    Domain { entries: Vec<(String, V)> },
    ArrayPage { items: Vec<V> },
    DictionaryPage { items: Vec<(V, V)> },
}

/// In-memory slab of elements `E`
pub type Slab<E> = SlabData<E, <E as SlabElement>::TypeInfo>;

/// Encoded slab of elements `E`
pub type EncodedSlab<E> = SlabData<<E as SlabElement>::Encoded, <E as SlabElement>::TypeInfo>;

/// An element that can live inside slabs
pub trait SlabElement: Clone + fmt::Debug {
    /// Persisted form of the element
    type Encoded: Serialize + DeserializeOwned + Clone + fmt::Debug;
    /// Static type information carried by container slabs
    type TypeInfo: Serialize + DeserializeOwned + Clone + fmt::Debug;

    /// Convert into the persisted form; fails for values that cannot be stored
    fn encode(&self) -> Result<Self::Encoded>;

    fn decode(encoded: Self::Encoded) -> Self;

    /// The root slab this element owns, if it is a container handle
    fn child_slab(&self) -> Option<SlabId>;

    /// The same element pointing at a different child slab
    fn with_child_slab(&self, child: SlabId) -> Self;

    /// Dictionary key equality
    fn same_key(&self, other: &Self) -> bool;
}

impl<V, I> SlabData<V, I> {
    pub fn kind_name(&self) -> &'static str {
        match self {
            SlabData::Array { .. } => "array",
            SlabData::Dictionary { .. } => "dictionary",
            SlabData::Composite { .. } => "composite",
            SlabData::Domain { .. } => "domain",
            SlabData::ArrayPage { .. } => "array page",
            SlabData::DictionaryPage { .. } => "dictionary page",
        }
    }

    /// Type information of container slabs
    pub fn info(&self) -> Option<&I> {
        match self {
            SlabData::Array { info, .. }
            | SlabData::Dictionary { info, .. }
            | SlabData::Composite { info, .. } => Some(info),
            _ => None,
        }
    }

    pub fn is_page(&self) -> bool {
        matches!(self, SlabData::ArrayPage { .. } | SlabData::DictionaryPage { .. })
    }

    /// Page references of a paged array or dictionary
    pub fn page_refs(&self) -> Option<&[PageRef]> {
        match self {
            SlabData::Array {
                body: Body::Paged(refs),
                ..
            }
            | SlabData::Dictionary {
                body: Body::Paged(refs),
                ..
            } => Some(refs),
            _ => None,
        }
    }

    pub fn page_refs_mut(&mut self) -> Option<&mut Vec<PageRef>> {
        match self {
            SlabData::Array {
                body: Body::Paged(refs),
                ..
            }
            | SlabData::Dictionary {
                body: Body::Paged(refs),
                ..
            } => Some(refs),
            _ => None,
        }
    }

    /// Number of elements held directly by a page slab
    pub fn page_len(&self) -> Option<usize> {
        match self {
            SlabData::ArrayPage { items } => Some(items.len()),
            SlabData::DictionaryPage { items } => Some(items.len()),
            _ => None,
        }
    }

    /// Visit every value held directly by this slab. Values in pages are not
    /// visited through the root.
    pub fn for_each_value(&self, f: &mut dyn FnMut(&V)) {
        fn visit_body<V>(body: &Body<V>, f: &mut dyn FnMut(&V)) {
            if let Body::Inline(items) = body {
                items.iter().for_each(|v| f(v));
            }
        }
        match self {
            SlabData::Array { body, .. } => visit_body(body, f),
            SlabData::Dictionary { body, .. } => {
                if let Body::Inline(items) = body {
                    for (k, v) in items {
                        f(k);
                        f(v);
                    }
                }
            }
            SlabData::Composite { fields, .. } => fields.iter().for_each(|(_, v)| f(v)),
            SlabData::Domain { entries } => entries.iter().for_each(|(_, v)| f(v)),
            SlabData::ArrayPage { items } => items.iter().for_each(|v| f(v)),
            SlabData::DictionaryPage { items } => {
                for (k, v) in items {
                    f(k);
                    f(v);
                }
            }
        }
    }

    /// Convert every value, failing on the first error
    pub fn try_map<W, X>(
        &self,
        f: &mut dyn FnMut(&V) -> std::result::Result<W, X>,
    ) -> std::result::Result<SlabData<W, I>, X>
    where
        I: Clone,
    {
        fn map_vec<V, W, X>(
            items: &[V],
            f: &mut dyn FnMut(&V) -> std::result::Result<W, X>,
        ) -> std::result::Result<Vec<W>, X> {
            items.iter().map(|v| f(v)).collect()
        }
        fn map_pairs<V, W, X>(
            items: &[(V, V)],
            f: &mut dyn FnMut(&V) -> std::result::Result<W, X>,
        ) -> std::result::Result<Vec<(W, W)>, X> {
            items.iter().map(|(k, v)| Ok((f(k)?, f(v)?))).collect()
        }
        fn map_named<V, W, X>(
            items: &[(String, V)],
            f: &mut dyn FnMut(&V) -> std::result::Result<W, X>,
        ) -> std::result::Result<Vec<(String, W)>, X> {
            items.iter().map(|(n, v)| Ok((n.clone(), f(v)?))).collect()
        }
        Ok(match self {
            SlabData::Array { info, body } => SlabData::Array {
                info: info.clone(),
                body: match body {
                    Body::Inline(items) => Body::Inline(map_vec(items, f)?),
                    Body::Paged(refs) => Body::Paged(refs.clone()),
                },
            },
            SlabData::Dictionary { info, body } => SlabData::Dictionary {
                info: info.clone(),
                body: match body {
                    Body::Inline(items) => Body::Inline(map_pairs(items, f)?),
                    Body::Paged(refs) => Body::Paged(refs.clone()),
                },
            },
            SlabData::Composite { info, fields } => SlabData::Composite {
                info: info.clone(),
                fields: map_named(fields, f)?,
            },
            SlabData::Domain { entries } => SlabData::Domain {
                entries: map_named(entries, f)?,
            },
            SlabData::ArrayPage { items } => SlabData::ArrayPage {
                items: map_vec(items, f)?,
            },
            SlabData::DictionaryPage { items } => SlabData::DictionaryPage {
                items: map_pairs(items, f)?,
            },
        })
    }

    /// Convert every value by ownership
    pub fn map_into<W>(self, f: &mut dyn FnMut(V) -> W) -> SlabData<W, I> {
        fn map_body<V, W>(body: Body<V>, f: &mut dyn FnMut(V) -> W) -> Body<W> {
            match body {
                Body::Inline(items) => Body::Inline(items.into_iter().map(|v| f(v)).collect()),
                Body::Paged(refs) => Body::Paged(refs),
            }
        }
        match self {
            SlabData::Array { info, body } => SlabData::Array {
                info,
                body: map_body(body, f),
            },
            SlabData::Dictionary { info, body } => SlabData::Dictionary {
                info,
                body: match body {
                    Body::Inline(items) => {
                        Body::Inline(items.into_iter().map(|(k, v)| (f(k), f(v))).collect())
                    }
                    Body::Paged(refs) => Body::Paged(refs),
                },
            },
            SlabData::Composite { info, fields } => SlabData::Composite {
                info,
                fields: fields.into_iter().map(|(n, v)| (n, f(v))).collect(),
            },
            SlabData::Domain { entries } => SlabData::Domain {
                entries: entries.into_iter().map(|(n, v)| (n, f(v))).collect(),
            },
            SlabData::ArrayPage { items } => SlabData::ArrayPage {
                items: items.into_iter().map(|v| f(v)).collect(),
            },
            SlabData::DictionaryPage { items } => SlabData::DictionaryPage {
                items: items.into_iter().map(|(k, v)| (f(k), f(v))).collect(),
            },
        }
    }
}

/// Encode a slab to bytes
pub(crate) fn encode_slab<E: SlabElement>(slab: &Slab<E>) -> Result<Vec<u8>> {
    let encoded: EncodedSlab<E> = slab.try_map(&mut |v: &E| v.encode())?;
    Ok(bincode::serialize(&encoded)?)
}

/// Decode a slab from bytes
pub(crate) fn decode_slab<E: SlabElement>(bytes: &[u8]) -> Result<Slab<E>> {
    let encoded: EncodedSlab<E> = bincode::deserialize(bytes)?;
    Ok(encoded.map_into(&mut E::decode))
}
