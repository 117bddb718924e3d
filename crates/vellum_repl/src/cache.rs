//! Bounded cache of open index handles.

use crate::traits::ReplIndex;
use std::collections::HashMap;
use std::sync::Arc;
use vellum_core::IndexId;

/// Least-recently-used cache from index id to an open index.
///
/// Replay touches the same handful of indexes over and over; holding
/// them open avoids a metadata lookup per record. The cache is bounded
/// so inactive replicated indexes do not pin memory forever, and
/// explicit removal on index deletion guarantees a dropped index is
/// never resurrected from here.
pub struct IndexCache {
    capacity: usize,
    entries: HashMap<u64, CacheEntry>,
    tick: u64,
}

struct CacheEntry {
    index: Arc<dyn ReplIndex>,
    last_used: u64,
}

impl IndexCache {
    /// Creates a cache holding up to `capacity` open indexes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            tick: 0,
        }
    }

    /// Looks up an index, marking it recently used.
    pub fn get(&mut self, index_id: IndexId) -> Option<Arc<dyn ReplIndex>> {
        self.tick += 1;
        let tick = self.tick;
        self.entries.get_mut(&index_id.value()).map(|entry| {
            entry.last_used = tick;
            Arc::clone(&entry.index)
        })
    }

    /// Inserts an open index, evicting the least recently used entry
    /// when over capacity.
    pub fn insert(&mut self, index_id: IndexId, index: Arc<dyn ReplIndex>) {
        self.tick += 1;
        self.entries.insert(
            index_id.value(),
            CacheEntry {
                index,
                last_used: self.tick,
            },
        );

        while self.entries.len() > self.capacity {
            let Some((&oldest, _)) = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
            else {
                break;
            };
            self.entries.remove(&oldest);
        }
    }

    /// Removes an index so it cannot be resurrected from the cache.
    pub fn remove(&mut self, index_id: IndexId) -> Option<Arc<dyn ReplIndex>> {
        self.entries.remove(&index_id.value()).map(|entry| entry.index)
    }

    /// Number of cached indexes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
