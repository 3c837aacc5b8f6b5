//! Resource-safety tracker
//!
//! Per-execution record of resource slabs that were moved or destroyed.
//! Every move and every destroy bumps the generation of the affected slabs;
//! ephemeral references remember the generation they were created at and
//! are rejected once it changes.

use std::collections::{HashMap, HashSet};

use ore_storage::SlabId;
use tracing::trace;

use crate::error::{InvalidationCause, Result, UserErrorKind};

/// Lifecycle state of a resource slab; absent means alive and never moved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Moved,
    Destroying,
    Destroyed,
}

#[derive(Debug, Default)]
pub struct Tracker {
    generations: HashMap<SlabId, u64>,
    states: HashMap<SlabId, ResourceState>,
    /// Resource fields moved out of their composite
    moved_fields: HashSet<(SlabId, String)>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self, id: SlabId) -> u64 {
        self.generations.get(&id).copied().unwrap_or(0)
    }

    pub fn state(&self, id: SlabId) -> Option<ResourceState> {
        self.states.get(&id).copied()
    }

    fn bump(&mut self, id: SlabId) {
        *self.generations.entry(id).or_insert(0) += 1;
    }

    /// Record that the given slabs were moved; references to them die
    pub fn moved(&mut self, ids: &[SlabId]) {
        for id in ids {
            self.bump(*id);
            match self.states.get(id) {
                Some(ResourceState::Destroying) | Some(ResourceState::Destroyed) => {}
                _ => {
                    self.states.insert(*id, ResourceState::Moved);
                }
            }
        }
        trace!(count = ids.len(), "Invalidated references to moved resources");
    }

    /// Mark a composite as being destroyed. Fails if it is already being
    /// destroyed or gone, which rejects re-entrant destruction.
    pub fn begin_destroy(&mut self, id: SlabId) -> Result<()> {
        match self.states.get(&id) {
            Some(ResourceState::Destroying) | Some(ResourceState::Destroyed) => {
                Err(UserErrorKind::DestroyedResourceUse.into())
            }
            _ => {
                self.states.insert(id, ResourceState::Destroying);
                Ok(())
            }
        }
    }

    pub fn is_destroying(&self, id: SlabId) -> bool {
        self.states.get(&id) == Some(&ResourceState::Destroying)
    }

    /// Mark the given slabs destroyed
    pub fn destroyed(&mut self, ids: &[SlabId]) {
        for id in ids {
            self.bump(*id);
            self.states.insert(*id, ResourceState::Destroyed);
        }
    }

    /// Fail if the slab was destroyed
    pub fn check_alive(&self, id: SlabId) -> Result<()> {
        match self.states.get(&id) {
            Some(ResourceState::Destroyed) => Err(UserErrorKind::DestroyedResourceUse.into()),
            _ => Ok(()),
        }
    }

    /// Check an ephemeral reference created at `generation`
    pub fn check_reference(&self, id: SlabId, generation: u64) -> Result<()> {
        if self.generation(id) == generation {
            return Ok(());
        }
        Err(UserErrorKind::InvalidatedResourceReference {
            cause: self.invalidation_cause(id),
        }
        .into())
    }

    pub fn invalidation_cause(&self, id: SlabId) -> InvalidationCause {
        match self.states.get(&id) {
            Some(ResourceState::Destroying) | Some(ResourceState::Destroyed) => InvalidationCause::Destroyed,
            _ => InvalidationCause::Moved,
        }
    }

    pub fn field_moved(&mut self, owner: SlabId, name: &str) {
        self.moved_fields.insert((owner, name.to_string()));
    }

    pub fn field_restored(&mut self, owner: SlabId, name: &str) {
        self.moved_fields.remove(&(owner, name.to_string()));
    }

    pub fn is_field_moved(&self, owner: SlabId, name: &str) -> bool {
        self.moved_fields.contains(&(owner, name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ore_common::Address;
    use pretty_assertions::assert_eq;

    fn id(index: u64) -> SlabId {
        SlabId::new(Address::ZERO, index)
    }

    #[test]
    fn test_moves_invalidate_references() {
        let mut tracker = Tracker::new();
        let generation = tracker.generation(id(1));
        assert!(tracker.check_reference(id(1), generation).is_ok());
        tracker.moved(&[id(1)]);
        let err = tracker.check_reference(id(1), generation).unwrap_err();
        assert_eq!(
            err.user_kind(),
            Some(&UserErrorKind::InvalidatedResourceReference {
                cause: InvalidationCause::Moved
            })
        );
        assert!(tracker.check_reference(id(1), tracker.generation(id(1))).is_ok());
    }

    #[test]
    fn test_destroy_is_terminal() {
        let mut tracker = Tracker::new();
        let generation = tracker.generation(id(2));
        tracker.begin_destroy(id(2)).unwrap();
        assert_eq!(
            tracker.begin_destroy(id(2)).unwrap_err().user_kind(),
            Some(&UserErrorKind::DestroyedResourceUse)
        );
        tracker.destroyed(&[id(2)]);
        assert!(tracker.begin_destroy(id(2)).is_err());
        assert!(tracker.check_alive(id(2)).is_err());
        assert_eq!(
            tracker.check_reference(id(2), generation).unwrap_err().user_kind(),
            Some(&UserErrorKind::InvalidatedResourceReference {
                cause: InvalidationCause::Destroyed
            })
        );
    }

    #[test]
    fn test_moved_fields() {
        let mut tracker = Tracker::new();
        tracker.field_moved(id(3), "vault");
        assert!(tracker.is_field_moved(id(3), "vault"));
        tracker.field_restored(id(3), "vault");
        assert!(!tracker.is_field_moved(id(3), "vault"));
    }
}
