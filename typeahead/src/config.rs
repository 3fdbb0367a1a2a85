//! Search field and worker pool configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::interface::{SearchError, SearchResult};

/// Default delay between the last keystroke and the search.
pub const DEFAULT_DEBOUNCE_DELAY_MS: u64 = 250;
pub const DEFAULT_MAX_SUGGESTIONS: usize = 10;
pub const DEFAULT_MAX_CACHE_ENTRIES: usize = 100;
pub const DEFAULT_MIN_QUERY_LENGTH: usize = 1;

/// Which marker a cache entry's age is measured by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionOrder {
    /// Oldest insertion goes first; lookups don't refresh an entry
    #[default]
    Insertion,
    /// Least recently looked-up goes first
    Access,
}

/// Per-field search configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SearchConfig {
    #[validate(range(min = 1))]
    pub max_suggestions: usize,
    #[validate(range(max = 60000))]
    pub debounce_delay_ms: u64,
    /// Shorter (normalized) input leaves the field idle
    pub min_query_length: usize,
    pub cache_enabled: bool,
    #[validate(range(min = 1))]
    pub max_cache_entries: usize,
    pub eviction_order: EvictionOrder,
    /// Enables the approximate character-overlap tier in ranking
    pub fuzzy_fallback: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_suggestions: DEFAULT_MAX_SUGGESTIONS,
            debounce_delay_ms: DEFAULT_DEBOUNCE_DELAY_MS,
            min_query_length: DEFAULT_MIN_QUERY_LENGTH,
            cache_enabled: true,
            max_cache_entries: DEFAULT_MAX_CACHE_ENTRIES,
            eviction_order: EvictionOrder::Insertion,
            fuzzy_fallback: false,
        }
    }
}

impl SearchConfig {
    /// Parse a JSON config. Missing fields take their defaults.
    pub fn from_json(json: &str) -> SearchResult<Self> {
        let config: SearchConfig = serde_json::from_str(json)
            .map_err(|e| SearchError::InvalidConfig(e.to_string()))?;
        config.validated()
    }

    /// Run the field-level checks, returning the config unchanged if it passes.
    pub fn validated(self) -> SearchResult<Self> {
        self.validate()
            .map_err(|e| SearchError::InvalidConfig(e.to_string()))?;
        Ok(self)
    }

    pub fn debounce_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_delay_ms)
    }
}

/// Worker pool sizing and shutdown behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Worker count override. `None` = available parallelism (minimum 2).
    pub worker_threads: Option<usize>,
    /// Bounded wait for in-flight work when the last field releases the pool.
    pub drain_timeout_ms: u64,
    pub thread_name_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            drain_timeout_ms: 250,
            thread_name_prefix: "typeahead-worker".to_string(),
        }
    }
}

impl PoolConfig {
    /// Resolved worker count, never below 2.
    pub fn worker_count(&self) -> usize {
        let n = self.worker_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2)
        });
        n.max(2)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}
