//! Shared program cache
//!
//! Programs are cached per location across executions, failures included.
//! Concurrent misses for the same location may both parse; the first result
//! inserted wins, so every execution observes the same `Arc<Program>`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use ore_common::Location;
use ore_syntax::Program;
use tracing::{debug, trace};

use crate::error::Result;

/// Hit and miss counters of a [`ProgramCache`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

pub struct ProgramCache {
    programs: DashMap<Location, Result<Arc<Program>>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ProgramCache {
    /// Create a cache holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            programs: DashMap::new(),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, location: &Location) -> Option<Result<Arc<Program>>> {
        self.programs.get(location).map(|entry| entry.clone())
    }

    /// Cached program of `location`, or the result of `load`. Scripts and
    /// transactions are never cached.
    pub fn get_or_load<F>(&self, location: &Location, load: F) -> Result<Arc<Program>>
    where
        F: FnOnce() -> Result<Arc<Program>>,
    {
        if location.is_top_level() {
            return load();
        }
        if let Some(entry) = self.programs.get(location) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(%location, "Program cache hit");
            return entry.clone();
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        trace!(%location, "Program cache miss");

        let result = load();
        if self.programs.len() >= self.capacity {
            debug!(%location, capacity = self.capacity, "Program cache is full, not caching");
            return result;
        }
        let entry = self.programs.entry(location.clone()).or_insert(result);
        entry.clone()
    }

    /// Drop the entry of `location`; returns whether one existed
    pub fn invalidate(&self, location: &Location) -> bool {
        let removed = self.programs.remove(location).is_some();
        if removed {
            debug!(%location, "Invalidated cached program");
        }
        removed
    }

    pub fn clear(&self) {
        self.programs.clear();
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.programs.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, UserErrorKind};
    use ore_common::Address;
    use ore_syntax::parse_and_check;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_cached_program_is_shared() {
        let cache = ProgramCache::new(16);
        let location = Location::address(Address::from_u64(1), "C");
        let loads = AtomicUsize::new(0);
        let load = || -> Result<Arc<Program>> {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok(parse_and_check("access(all) contract C { init() {} }", location.clone())?)
        };
        let first = cache.get_or_load(&location, load).unwrap();
        let second = cache.get_or_load(&location, load).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_failures_are_cached() {
        let cache = ProgramCache::new(16);
        let location = Location::String("broken".into());
        let loads = AtomicUsize::new(0);
        let load = || -> Result<Arc<Program>> {
            loads.fetch_add(1, Ordering::SeqCst);
            Err(Error::user(UserErrorKind::TypeLoading("broken".into())))
        };
        assert!(cache.get_or_load(&location, load).is_err());
        assert!(cache.get_or_load(&location, load).is_err());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(cache.invalidate(&location));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_top_level_programs_are_not_cached() {
        let cache = ProgramCache::new(16);
        let location = Location::Script("s".into());
        cache
            .get_or_load(&location, || -> Result<Arc<Program>> {
                Ok(parse_and_check("fun main() {}", location.clone())?)
            })
            .unwrap();
        assert!(cache.is_empty());
    }
}
