//! Post-commit validation of slab trees
//!
//! Re-reads everything reachable from the domain roots of each account
//! touched by the last commit, straight from the ledger, and checks that
//! every slab is referenced exactly once, stays at its owner's address and
//! that page references agree with their pages.

use std::collections::{BTreeSet, HashSet};

use ore_common::Address;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Result, StorageError};
use crate::slab::{decode_slab, Slab, SlabElement, SlabId};
use crate::storage::SlabStorage;

/// Counts gathered while validating
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub domains: usize,
    pub slabs: usize,
}

impl<'a, E: SlabElement> SlabStorage<'a, E> {
    fn read_slab(&self, id: SlabId) -> Result<(Vec<u8>, Slab<E>)> {
        let bytes = self.ledger().get_value(id.address, &id.key())?;
        if bytes.is_empty() {
            return Err(StorageError::validation(format!("missing slab {}", id)));
        }
        let slab = decode_slab::<E>(&bytes)?;
        Ok((bytes, slab))
    }

    /// Validate the persisted slab trees of the given domains
    pub fn validate(&self, domains: &[&str]) -> Result<ValidationReport> {
        let addresses: BTreeSet<Address> = self.last_written().iter().map(|id| id.address).collect();
        let mut report = ValidationReport::default();
        let mut seen: HashSet<SlabId> = HashSet::new();

        for address in &addresses {
            for domain in domains {
                let raw = self.ledger().get_value(*address, domain.as_bytes())?;
                if raw.is_empty() {
                    continue;
                }
                let index = <[u8; 8]>::try_from(raw.as_slice()).map_err(|_| {
                    StorageError::validation(format!("malformed root of domain {} for {}", domain, address))
                })?;
                report.domains += 1;
                self.walk(*address, SlabId::new(*address, u64::from_be_bytes(index)), &mut seen)?;
            }
        }

        for id in self.last_written() {
            if !seen.contains(id) {
                return Err(StorageError::validation(format!("slab {} is not reachable from any domain", id)));
            }
        }
        report.slabs = seen.len();
        debug!(domains = report.domains, slabs = report.slabs, "Validated slab storage");
        Ok(report)
    }

    fn walk(&self, address: Address, root: SlabId, seen: &mut HashSet<SlabId>) -> Result<()> {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if id.address != address {
                return Err(StorageError::validation(format!(
                    "slab {} is referenced from account {}",
                    id, address
                )));
            }
            if !seen.insert(id) {
                return Err(StorageError::validation(format!("slab {} is referenced more than once", id)));
            }
            let (_, slab) = self.read_slab(id)?;
            if slab.is_page() {
                return Err(StorageError::validation(format!("page {} is referenced as a value", id)));
            }
            push_children(&slab, &mut stack);

            for page in slab.page_refs().unwrap_or_default() {
                if page.id.address != address || !seen.insert(page.id) {
                    return Err(StorageError::validation(format!("page {} of {} is shared or foreign", page.id, id)));
                }
                let (bytes, contents) = self.read_slab(page.id)?;
                if Sha256::digest(&bytes).as_slice() != page.digest.as_slice() {
                    return Err(StorageError::validation(format!("digest mismatch for page {}", page.id)));
                }
                if contents.page_len() != Some(page.len) {
                    return Err(StorageError::validation(format!(
                        "page {} holds {:?} elements, expected {}",
                        page.id,
                        contents.page_len(),
                        page.len
                    )));
                }
                push_children(&contents, &mut stack);
            }
        }
        Ok(())
    }
}

fn push_children<E: SlabElement>(slab: &Slab<E>, stack: &mut Vec<SlabId>) {
    slab.for_each_value(&mut |value: &E| {
        if let Some(child) = value.child_slab() {
            stack.push(child);
        }
    });
}
