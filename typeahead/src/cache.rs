//! Bounded per-field cache of ranked results, keyed by normalized query.
//!
//! Every entry carries a monotonic marker. With `EvictionOrder::Insertion` the
//! marker is set on store only (FIFO); with `EvictionOrder::Access` lookups
//! refresh it too (LRU). When a store would push the cache past its limit, the
//! oldest fifth of the entries (at least one) goes in a single pass, before
//! the new entry is inserted.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::config::EvictionOrder;
use crate::interface::CandidateItem;
use crate::ranking::normalize;

/// Share of entries dropped per eviction pass, in percent.
const EVICTION_PERCENT: usize = 20;

pub type RankedResults<T> = Arc<Vec<CandidateItem<T>>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug)]
struct CacheEntry<T> {
    results: RankedResults<T>,
    marker: u64,
}

#[derive(Debug)]
pub struct SearchCache<T> {
    entries: HashMap<String, CacheEntry<T>>,
    /// marker -> key, oldest first
    order: BTreeMap<u64, String>,
    next_marker: u64,
    max_entries: usize,
    eviction_order: EvictionOrder,
    stats: CacheStats,
}

impl<T> SearchCache<T> {
    pub fn new(max_entries: usize, eviction_order: EvictionOrder) -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_marker: 0,
            max_entries: max_entries.max(1),
            eviction_order,
            stats: CacheStats::default(),
        }
    }

    pub fn lookup(&mut self, query: &str) -> Option<RankedResults<T>> {
        let key = normalize(query);
        let marker = self.next_marker;

        let Some(entry) = self.entries.get_mut(&key) else {
            self.stats.misses += 1;
            return None;
        };
        self.stats.hits += 1;

        if self.eviction_order == EvictionOrder::Access {
            self.order.remove(&entry.marker);
            entry.marker = marker;
            self.order.insert(marker, key);
            self.next_marker += 1;
        }
        Some(Arc::clone(&entry.results))
    }

    pub fn store(&mut self, query: &str, results: RankedResults<T>) {
        let key = normalize(query);
        let marker = self.next_marker;
        self.next_marker += 1;

        if let Some(entry) = self.entries.get_mut(&key) {
            self.order.remove(&entry.marker);
            entry.results = results;
            entry.marker = marker;
            self.order.insert(marker, key);
            return;
        }

        if self.entries.len() >= self.max_entries {
            self.evict_oldest();
        }

        self.order.insert(marker, key.clone());
        self.entries.insert(key, CacheEntry { results, marker });
    }

    fn evict_oldest(&mut self) {
        let count = (self.entries.len() * EVICTION_PERCENT / 100).max(1);
        for _ in 0..count {
            let Some((_, key)) = self.order.pop_first() else {
                break;
            };
            self.entries.remove(&key);
            self.stats.evictions += 1;
        }
    }

    pub fn contains(&self, query: &str) -> bool {
        self.entries.contains_key(&normalize(query))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}
