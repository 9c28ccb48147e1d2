//! Concurrent chunk registries.
//!
//! [`MetaCache`] owns one chunk file per [`ChunkId`]. [`CloneCache`] is a
//! second, non-owning index over the same instances, keyed by
//! `(root id, clone number)`: entries are [`Weak`] back-references that die
//! with the owning `MetaCache` entry, so a concurrently deleted chunk simply
//! reads as "not found" here.

use cks_types::{ChunkId, CloneNo};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Weak};

/// Owning registry: chunk id → chunk file.
#[derive(Debug, Default)]
pub struct MetaCache<F> {
    map: RwLock<HashMap<ChunkId, Arc<F>>>,
}

impl<F> MetaCache<F> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn get(&self, id: ChunkId) -> Option<Arc<F>> {
        self.map.read().get(&id).cloned()
    }

    /// Insert unless present; the first writer wins. Returns the surviving
    /// instance either way, so racing creators converge on one chunk file
    /// and the loser's object is discarded.
    #[must_use]
    pub fn set(&self, id: ChunkId, file: Arc<F>) -> Arc<F> {
        let mut map = self.map.write();
        Arc::clone(map.entry(id).or_insert(file))
    }

    pub fn remove(&self, id: ChunkId) -> Option<Arc<F>> {
        self.map.write().remove(&id)
    }

    pub fn clear(&self) {
        self.map.write().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// Point-in-time copy of the registry contents.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<ChunkId, Arc<F>> {
        self.map.read().clone()
    }
}

/// Non-owning index: (root id, clone number) → chunk file.
#[derive(Debug, Default)]
pub struct CloneCache<F> {
    map: RwLock<HashMap<(ChunkId, CloneNo), Weak<F>>>,
}

impl<F> CloneCache<F> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }

    /// Upgrades the back-reference; a dead entry reads as absent.
    #[must_use]
    pub fn get(&self, root: ChunkId, clone_no: CloneNo) -> Option<Arc<F>> {
        self.map.read().get(&(root, clone_no)).and_then(Weak::upgrade)
    }

    /// First live writer wins; a dead entry is replaced.
    pub fn set(&self, root: ChunkId, clone_no: CloneNo, file: &Arc<F>) {
        let mut map = self.map.write();
        match map.entry((root, clone_no)) {
            Entry::Occupied(mut e) => {
                if e.get().upgrade().is_none() {
                    e.insert(Arc::downgrade(file));
                }
            }
            Entry::Vacant(v) => {
                v.insert(Arc::downgrade(file));
            }
        }
    }

    pub fn remove(&self, root: ChunkId, clone_no: CloneNo) {
        self.map.write().remove(&(root, clone_no));
    }

    pub fn clear(&self) {
        self.map.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn first_writer_wins_under_races() {
        let cache: Arc<MetaCache<u32>> = Arc::new(MetaCache::new());
        let mut handles = Vec::new();
        for i in 0..8u32 {
            let cache = Arc::clone(&cache);
            handles.push(thread::spawn(move || cache.set(ChunkId(1), Arc::new(i))));
        }
        let survivors: Vec<Arc<u32>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let first = &survivors[0];
        for s in &survivors {
            assert!(Arc::ptr_eq(first, s), "all racing creators must converge");
        }
        assert_eq!(cache.len(), 1);
        assert!(Arc::ptr_eq(&cache.get(ChunkId(1)).unwrap(), first));
    }

    #[test]
    fn clone_cache_entry_dies_with_owner() {
        let meta: MetaCache<u32> = MetaCache::new();
        let clones: CloneCache<u32> = CloneCache::new();
        let file = meta.set(ChunkId(7), Arc::new(42));
        clones.set(ChunkId(100), CloneNo(3), &file);
        drop(file);
        assert!(clones.get(ChunkId(100), CloneNo(3)).is_some());

        meta.remove(ChunkId(7));
        assert!(
            clones.get(ChunkId(100), CloneNo(3)).is_none(),
            "back-reference must not outlive the owning entry"
        );
    }

    #[test]
    fn dead_clone_entry_is_replaced() {
        let clones: CloneCache<u32> = CloneCache::new();
        let stale = Arc::new(1);
        clones.set(ChunkId(1), CloneNo(1), &stale);
        drop(stale);

        let fresh = Arc::new(2);
        clones.set(ChunkId(1), CloneNo(1), &fresh);
        assert_eq!(*clones.get(ChunkId(1), CloneNo(1)).unwrap(), 2);
    }
}
