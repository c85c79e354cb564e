//! Bounded LRU cache of inode records, keyed by inode UUID.
//!
//! The cache is process-local and never a source of truth; the metadata pool
//! is. Values are `Arc<Inode>`, so eviction cannot invalidate a record that a
//! handle or transient caller still holds.

use crate::inode::Inode;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::trace;
use uuid::Uuid;

pub struct InodeCache {
    capacity: usize,
    state: Mutex<CacheState>,
}

#[derive(Default)]
struct CacheState {
    map: HashMap<Uuid, Arc<Inode>>,
    /// Recency order, least recently used at the front.
    order: VecDeque<Uuid>,
}

impl CacheState {
    fn touch(&mut self, id: Uuid) {
        if let Some(pos) = self.order.iter().position(|k| *k == id) {
            let _ = self.order.remove(pos);
        }
        self.order.push_back(id);
    }

    fn evict_over(&mut self, capacity: usize) {
        while self.map.len() > capacity {
            let Some(victim) = self.order.pop_front() else {
                break;
            };
            let _ = self.map.remove(&victim);
            trace!(target: "orfs::cache", event = "evict", inode = %victim);
        }
    }
}

impl InodeCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Look up an inode, refreshing its recency on hit.
    #[must_use]
    pub fn get(&self, id: &Uuid) -> Option<Arc<Inode>> {
        let mut state = self.state.lock();
        let inode = state.map.get(id).cloned()?;
        state.touch(*id);
        Some(inode)
    }

    /// Insert (or refresh) an inode, evicting the least recently used
    /// entries on overflow.
    pub fn insert(&self, inode: Arc<Inode>) {
        let id = inode.id();
        let mut state = self.state.lock();
        state.map.insert(id, inode);
        state.touch(id);
        state.evict_over(self.capacity);
    }

    /// Return the cached inode for `id`, or insert the one produced by
    /// `make`. Used to fabricate skeletons without clobbering loaded records.
    pub fn get_or_insert_with(
        &self,
        id: Uuid,
        make: impl FnOnce() -> Arc<Inode>,
    ) -> Arc<Inode> {
        let mut state = self.state.lock();
        if let Some(inode) = state.map.get(&id).cloned() {
            state.touch(id);
            return inode;
        }
        let inode = make();
        state.map.insert(id, Arc::clone(&inode));
        state.touch(id);
        state.evict_over(self.capacity);
        inode
    }

    #[must_use]
    pub fn contains(&self, id: &Uuid) -> bool {
        self.state.lock().map.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
